//! Scope tracking for productions that own children.
//!
//! A scope is OPEN once its header is parsed, in BODY after its condition
//! (if any), and CLOSED when the matching closing keyword is consumed. Closing
//! appends exactly one `End` child.

use crate::opcode::{ExpressionInfo, Opcode, OpcodeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Open,
    Body,
}

#[derive(Debug)]
pub struct Scope {
    node: OpcodeNode,
    state: ScopeState,
}

impl Scope {
    pub fn open(op: Opcode, line: u32) -> Self {
        Scope {
            node: OpcodeNode::new(op, line),
            state: ScopeState::Open,
        }
    }

    /// Attach the guarding expression. Only valid while OPEN.
    pub fn condition(&mut self, expr: ExpressionInfo) {
        debug_assert_eq!(self.state, ScopeState::Open);
        self.node.children.push(expr.root);
    }

    pub fn begin_body(&mut self) {
        self.state = ScopeState::Body;
    }

    pub fn emit(&mut self, child: OpcodeNode) {
        self.state = ScopeState::Body;
        self.node.children.push(child);
    }

    pub fn emit_all(&mut self, children: impl IntoIterator<Item = OpcodeNode>) {
        for child in children {
            self.emit(child);
        }
    }

    /// Close on the matching keyword at `line`.
    pub fn close(mut self, line: u32) -> OpcodeNode {
        self.node.children.push(OpcodeNode::new(Opcode::End, line));
        self.node
    }

    /// Finish without a body: no `End` is appended.
    pub fn finish(self) -> OpcodeNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Constant;

    #[test]
    fn close_appends_a_single_end() {
        let mut s = Scope::open(Opcode::SuppressIf, 3);
        s.condition(ExpressionInfo::new(
            3,
            OpcodeNode::new(Opcode::Constant(Constant::True), 3),
        ));
        s.begin_body();
        assert_eq!(s.state, ScopeState::Body);
        s.emit(OpcodeNode::new(Opcode::Label { number: 1 }, 4));
        let node = s.close(5);
        assert_eq!(node.children.len(), 3);
        assert_eq!(node.children[2], OpcodeNode::new(Opcode::End, 5));
        assert_eq!(
            node.children.iter().filter(|c| c.op == Opcode::End).count(),
            1
        );
    }

    #[test]
    fn finish_leaves_no_end() {
        let s = Scope::open(Opcode::Subtitle { prompt: crate::opcode::StringId(1), flags: 0 }, 1);
        assert!(s.finish().children.is_empty());
    }
}
