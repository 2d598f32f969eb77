//! Indented text rendering of an opcode tree, one node per line.

use std::fmt::Write;

use serde_json::Value;
use vfr_core::OpcodeNode;

pub fn render_tree(root: &OpcodeNode) -> String {
    let mut out = String::new();
    render_node(root, 0, &mut out);
    out
}

fn render_node(node: &OpcodeNode, depth: usize, out: &mut String) {
    let (name, payload) = describe(node);
    let _ = write!(out, "{}{}", "  ".repeat(depth), name);
    if let Some(payload) = payload {
        let _ = write!(out, " {}", payload);
    }
    let _ = writeln!(out, "  @{}", node.line);
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}

/// Variant name and compact JSON payload of a node's opcode.
fn describe(node: &OpcodeNode) -> (String, Option<String>) {
    match serde_json::to_value(&node.op) {
        Ok(Value::String(name)) => (name, None),
        Ok(Value::Object(map)) => match map.into_iter().next() {
            Some((name, payload)) => (name, Some(payload.to_string())),
            None => (format!("{:?}", node.op), None),
        },
        _ => (format!("{:?}", node.op), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfr_core::opcode::{Constant, FormId, Opcode, StringId};

    #[test]
    fn nodes_indent_by_depth() {
        let tree = OpcodeNode::with_children(
            Opcode::Form {
                form_id: FormId(1),
                title: StringId(4),
            },
            3,
            vec![
                OpcodeNode::new(Opcode::Constant(Constant::True), 4),
                OpcodeNode::new(Opcode::End, 5),
            ],
        );
        let text = render_tree(&tree);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#"Form {"form_id":1,"title":4}  @3"#);
        assert_eq!(lines[1], r#"  Constant "True"  @4"#);
        assert_eq!(lines[2], "  End  @5");
    }
}
