//! Forward-reference link pass.
//!
//! Runs once per unit after `endformset`. Every `Reference::Pending` the
//! parser left behind is looked up in the finished symbol tables; goto
//! targets inside the formset are checked against the declared forms.
//! Anything still unknown is an undeclared symbol.

use crate::error::{VfrError, VfrResult};
use crate::opcode::{FormId, GotoTarget, Opcode, OpcodeNode, Reference};
use crate::symbols::SymbolTable;
use tracing::{event, Level};

/// Resolve every pending reference under `root` in place. Returns the
/// number of references rewritten.
pub fn link(root: &mut OpcodeNode, symbols: &SymbolTable) -> VfrResult<usize> {
    let mut linked = 0;
    link_node(root, symbols, &mut linked)?;
    Ok(linked)
}

fn link_node(node: &mut OpcodeNode, symbols: &SymbolTable, linked: &mut usize) -> VfrResult<()> {
    let line = node.line;
    let questions = |name: &str| symbols.find_question(name);
    match &mut node.op {
        Opcode::QuestionRef1 { question }
        | Opcode::EqIdVal { question, .. }
        | Opcode::EqIdValList { question, .. } => resolve(question, questions, linked)?,
        Opcode::EqIdId {
            question1,
            question2,
        } => {
            resolve(question1, questions, linked)?;
            resolve(question2, questions, linked)?;
        }
        Opcode::RuleRef { rule } => resolve(rule, |name| symbols.find_rule(name), linked)?,
        Opcode::Goto { target, .. } => match target {
            GotoTarget::Form { form_id } => check_form(symbols, *form_id, line)?,
            GotoTarget::FormQuestion { form_id, question } => {
                check_form(symbols, *form_id, line)?;
                resolve(question, questions, linked)?;
            }
            _ => {}
        },
        _ => {}
    }
    for child in &mut node.children {
        link_node(child, symbols, linked)?;
    }
    Ok(())
}

fn resolve<T: Copy>(
    reference: &mut Reference<T>,
    lookup: impl Fn(&str) -> Option<T>,
    linked: &mut usize,
) -> VfrResult<()> {
    if let Reference::Pending { name, line } = reference {
        let id = lookup(name).ok_or_else(|| VfrError::undeclared(*line, name.clone()))?;
        event!(Level::TRACE, "line {}: '{}' linked", line, name);
        *reference = Reference::Resolved(id);
        *linked += 1;
    }
    Ok(())
}

fn check_form(symbols: &SymbolTable, form_id: FormId, line: u32) -> VfrResult<()> {
    if symbols.has_form(form_id) {
        Ok(())
    } else {
        Err(VfrError::undeclared(line, format!("form {}", form_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{QuestionHeader, QuestionId, RuleId, StringId};

    fn pending<T>(name: &str, line: u32) -> Reference<T> {
        Reference::Pending {
            name: name.into(),
            line,
        }
    }

    fn tree(children: Vec<OpcodeNode>) -> OpcodeNode {
        OpcodeNode::with_children(Opcode::SuppressIf, 1, children)
    }

    #[test]
    fn pending_references_resolve_against_the_tables() {
        let mut symbols = SymbolTable::new(8);
        let q = symbols.register_question(Some("Later"), None, None, 9).unwrap();
        let r = symbols.declare_rule("Check", 10).unwrap();
        let mut root = tree(vec![
            OpcodeNode::new(
                Opcode::EqIdId {
                    question1: pending("Later", 2),
                    question2: Reference::Resolved(QuestionId(40)),
                },
                2,
            ),
            OpcodeNode::new(Opcode::RuleRef { rule: pending("Check", 3) }, 3),
        ]);
        assert_eq!(link(&mut root, &symbols).unwrap(), 2);
        assert_eq!(
            root.children[0].op,
            Opcode::EqIdId {
                question1: Reference::Resolved(q),
                question2: Reference::Resolved(QuestionId(40)),
            }
        );
        assert_eq!(
            root.children[1].op,
            Opcode::RuleRef {
                rule: Reference::Resolved(r)
            }
        );
        assert_eq!(r, RuleId(0));
    }

    #[test]
    fn leftover_reference_is_undeclared_at_its_use() {
        let symbols = SymbolTable::new(8);
        let mut root = tree(vec![OpcodeNode::new(
            Opcode::QuestionRef1 {
                question: pending("Ghost", 7),
            },
            7,
        )]);
        assert_eq!(
            link(&mut root, &symbols).unwrap_err(),
            VfrError::undeclared(7, "Ghost")
        );
    }

    #[test]
    fn goto_targets_must_name_declared_forms() {
        let mut symbols = SymbolTable::new(8);
        symbols.declare_form(FormId(1), 1).unwrap();
        let goto = |form: u16| {
            OpcodeNode::new(
                Opcode::Goto {
                    header: QuestionHeader {
                        prompt: StringId(1),
                        help: StringId(2),
                        question_id: QuestionId(1),
                        name: None,
                        storage: None,
                        flags: 0,
                    },
                    target: GotoTarget::Form {
                        form_id: FormId(form),
                    },
                },
                5,
            )
        };
        assert_eq!(link(&mut tree(vec![goto(1)]), &symbols).unwrap(), 0);
        assert_eq!(
            link(&mut tree(vec![goto(2)]), &symbols).unwrap_err(),
            VfrError::undeclared(5, "form 2")
        );
    }

    #[test]
    fn linking_twice_is_a_no_op() {
        let mut symbols = SymbolTable::new(8);
        symbols.register_question(Some("Q"), None, None, 1).unwrap();
        let mut root = tree(vec![OpcodeNode::new(
            Opcode::EqIdVal {
                question: pending("Q", 2),
                value: 1,
            },
            2,
        )]);
        assert_eq!(link(&mut root, &symbols).unwrap(), 1);
        assert_eq!(link(&mut root, &symbols).unwrap(), 0);
    }
}
