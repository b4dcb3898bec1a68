//! Nested export of a structured graph.
//!
//! Each structure's slots (loop head/body/tail, branch arms, switch cases)
//! become named lists of child nodes, found by walking successor chains
//! inside the structure. This is what the emitter consumes and what the CLI
//! prints.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::context::DecompileContext;
use crate::graph::{LoopKind, NodeId, NodeKind};

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub kind: &'static str,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<&'static str, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Slot {
    pub name: &'static str,
    pub nodes: Vec<TreeNode>,
}

impl TreeNode {
    pub fn slot(&self, name: &str) -> Option<&[TreeNode]> {
        self.slots.iter().find(|s| s.name == name).map(|s| s.nodes.as_slice())
    }
}

/// Export the tree rooted at the entry's root fragment. `None` before the
/// fragment pass has run.
pub fn build(ctx: &DecompileContext<'_>) -> Option<TreeNode> {
    ctx.root.map(|root| Exporter { ctx }.node(root))
}

struct Exporter<'c, 'a> {
    ctx: &'c DecompileContext<'a>,
}

impl Exporter<'_, '_> {
    fn node(&self, id: NodeId) -> TreeNode {
        let graph = &self.ctx.graph;
        let n = &graph[id];
        let mut out = TreeNode {
            kind: n.kind.name(),
            start: n.start,
            end: n.end,
            name: None,
            instructions: Vec::new(),
            attributes: BTreeMap::new(),
            slots: Vec::new(),
        };

        match &n.kind {
            NodeKind::Block(b) => {
                let symbols = &self.ctx.code.symbols;
                out.instructions = b.instructions.iter().map(|i| i.display(symbols).to_string()).collect();
            }
            NodeKind::Fragment(f) => {
                out.name = Some(f.name.clone());
                out.push_slot("body", self.chain(f.entry, id, None));
            }
            NodeKind::Loop(l) => {
                match l.kind {
                    LoopKind::While { must_be_while_loop, for_loop_incrementor } => {
                        out.attributes.insert("must_be_while_loop", must_be_while_loop.to_string());
                        if let Some(inc) = for_loop_incrementor {
                            out.attributes.insert("for_loop_incrementor", format!("{:#x}", graph[inc].start));
                        }
                    }
                    LoopKind::With { break_block: Some(b) } => {
                        out.attributes.insert("break_block", format!("{:#x}", graph[b].start));
                    }
                    LoopKind::With { break_block: None } | LoopKind::DoUntil | LoopKind::Repeat => {}
                }
                let head = if l.body == Some(l.head) {
                    Vec::new()
                } else {
                    self.chain_ids(Some(l.head), id, l.body)
                };
                // A body starting at the tail includes it (single-block loops).
                let body_stop = (l.body != Some(l.tail)).then_some(l.tail);
                let body = self.chain_ids(l.body, id, body_stop);
                let tail_shown = head.contains(&l.tail) || body.contains(&l.tail);
                out.push_slot("head", self.nodes(head));
                out.push_slot("body", self.nodes(body));
                if !tail_shown {
                    out.push_slot("tail", vec![self.node(l.tail)]);
                }
            }
            NodeKind::ShortCircuit(sc) => {
                for &operand in &sc.conditions {
                    out.push_slot("operand", self.chain(Some(operand), id, None));
                }
            }
            NodeKind::BinaryBranch(bb) => {
                out.push_slot("condition", vec![self.node(bb.condition)]);
                out.push_slot("then", self.chain(Some(bb.true_branch), id, None));
                if let Some(e) = bb.else_branch {
                    out.push_slot("else", self.chain(Some(e), id, None));
                }
            }
            NodeKind::Switch(sw) => {
                out.push_slot("cases", self.chain(Some(sw.cases), id, None));
                out.push_slot("body", self.chain(sw.body, id, None));
                out.push_slot("end_cases", self.chain(sw.end_case_destinations, id, None));
            }
            NodeKind::StaticInit(si) => {
                out.push_slot("body", self.chain(Some(si.head), id, None));
            }
            NodeKind::CaseJump
            | NodeKind::CaseDestination { .. }
            | NodeKind::Empty
            | NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Return => {}
        }
        out
    }

    fn chain(&self, start: Option<NodeId>, parent: NodeId, stop: Option<NodeId>) -> Vec<TreeNode> {
        self.nodes(self.chain_ids(start, parent, stop))
    }

    /// Follow first successors from `start` while they stay directly inside
    /// `parent`, stopping before `stop`.
    fn chain_ids(&self, start: Option<NodeId>, parent: NodeId, stop: Option<NodeId>) -> Vec<NodeId> {
        let graph = &self.ctx.graph;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut cur = start;
        while let Some(id) = cur {
            if Some(id) == stop || graph[id].parent != Some(parent) || !seen.insert(id) {
                break;
            }
            out.push(id);
            cur = graph[id].successors.first().copied();
        }
        out
    }

    fn nodes(&self, ids: Vec<NodeId>) -> Vec<TreeNode> {
        ids.into_iter().map(|id| self.node(id)).collect()
    }
}

impl TreeNode {
    fn push_slot(&mut self, name: &'static str, nodes: Vec<TreeNode>) {
        if !nodes.is_empty() {
            self.slots.push(Slot { name, nodes });
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        write!(f, "{pad}{} [{:#x}..{:#x}]", self.kind, self.start, self.end)?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        for (key, value) in &self.attributes {
            write!(f, " {key}={value}")?;
        }
        writeln!(f)?;
        for inst in &self.instructions {
            writeln!(f, "{pad}  | {inst}")?;
        }
        for slot in &self.slots {
            writeln!(f, "{pad}  {}:", slot.name)?;
            for node in &slot.nodes {
                node.write(f, depth + 2)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_util::assemble;
    use crate::pipeline::{decompile, Settings};

    #[test]
    fn if_else_exports_named_arms() {
        let code = assemble(
            "push.v self.a\n\
             conv.v.b\n\
             bf [else]\n\
             pushi.e 1\n\
             pop.v.i self.b\n\
             b [end]\n\
             :[else]\n\
             pushi.e 2\n\
             pop.v.i self.b\n\
             :[end]\n\
             exit.i",
        );
        let ctx = decompile(&code, Settings::default()).unwrap();
        let root = build(&ctx).unwrap();
        assert_eq!(root.kind, "fragment");
        assert_eq!(root.name.as_deref(), Some("gml_Script_test"));

        let body = root.slot("body").unwrap();
        assert_eq!(body[0].kind, "if");
        assert_eq!(body[1].kind, "block");
        assert_eq!(body[0].slot("then").unwrap()[0].instructions, vec!["pushi.e 1", "pop.v.i self.b"]);
        assert!(body[0].slot("else").is_some());

        let text = root.to_string();
        assert!(text.contains("then:"));
        assert!(text.contains("| exit.i"));
    }

    fn first_loop(text: &str) -> TreeNode {
        let code = assemble(text);
        let ctx = decompile(&code, Settings::default()).unwrap();
        let root = build(&ctx).unwrap();
        root.slot("body").unwrap()[0].clone()
    }

    #[test]
    fn single_block_do_until_keeps_its_statements() {
        let l = first_loop(
            ":[top]\n\
             call.i step(0)\n\
             popz.v\n\
             push.v self.done\n\
             conv.v.b\n\
             bf [top]\n\
             exit.i",
        );
        assert_eq!(
            l.to_string(),
            "do-until [0x0..0x1c]\n\
             \x20 body:\n\
             \x20   block [0x0..0x1c]\n\
             \x20     | call.i step(0)\n\
             \x20     | popz.v\n\
             \x20     | push.v self.done\n\
             \x20     | conv.v.b\n"
        );
        assert!(l.slot("tail").is_none());
    }

    #[test]
    fn while_loop_prints_condition_then_body() {
        let l = first_loop(
            ":[head]\n\
             push.v self.a\n\
             conv.v.b\n\
             bf [end]\n\
             call.i step(0)\n\
             popz.v\n\
             b [head]\n\
             :[end]\n\
             exit.i",
        );
        assert_eq!(
            l.to_string(),
            "while [0x0..0x20] must_be_while_loop=true\n\
             \x20 head:\n\
             \x20   block [0x0..0x10]\n\
             \x20     | push.v self.a\n\
             \x20     | conv.v.b\n\
             \x20 body:\n\
             \x20   block [0x10..0x20]\n\
             \x20     | call.i step(0)\n\
             \x20     | popz.v\n"
        );
    }
}
