//! Arena-backed control-flow graph shared by every structuring pass.
//!
//! Nodes live in a single [`PrimaryMap`] and refer to each other only by
//! [`NodeId`]. Edges are stored on both endpoints; all mutation goes through
//! the methods here so that `a -> b` always has a matching `b <- a`.

mod kinds;
pub mod verify;

pub use kinds::{
    BinaryBranch, Block, Fragment, LogicKind, Loop, LoopKind, NodeKind, ShortCircuit, StaticInit,
    Switch,
};

use std::ops::{Index, IndexMut};

use unweave_bytecode::bytecode::Instruction;

use crate::entity::PrimaryMap;
use crate::error::{AddressRange, Result, StructureError};

crate::define_entity!(NodeId);

#[derive(Debug, Clone)]
pub struct Node {
    /// First address covered.
    pub start: usize,
    /// One past the last address covered.
    pub end: usize,
    pub predecessors: Vec<NodeId>,
    pub successors: Vec<NodeId>,
    /// Innermost enclosing structure or fragment.
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
}

impl Node {
    pub fn range(&self) -> AddressRange {
        AddressRange::new(self.start, self.end)
    }

    pub fn as_block(&self) -> Option<&Block> {
        match &self.kind {
            NodeKind::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Last instruction, for blocks.
    pub fn last_instruction(&self) -> Option<&Instruction> {
        self.as_block().and_then(Block::last)
    }

    /// No edges in either direction.
    pub fn is_detached(&self) -> bool {
        self.predecessors.is_empty() && self.successors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: PrimaryMap<NodeId, Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        kind: NodeKind,
        start: usize,
        end: usize,
        parent: Option<NodeId>,
    ) -> NodeId {
        self.nodes.push(Node {
            start,
            end,
            predecessors: Vec::new(),
            successors: Vec::new(),
            parent,
            kind,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn block_mut(&mut self, id: NodeId) -> Option<&mut Block> {
        match &mut self.nodes[id].kind {
            NodeKind::Block(b) => Some(b),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from].successors.push(to);
        self.nodes[to].predecessors.push(from);
    }

    /// Remove one `from -> to` edge. Returns `false` if there was none.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let succs = &mut self.nodes[from].successors;
        let Some(i) = succs.iter().position(|&s| s == to) else {
            return false;
        };
        succs.remove(i);
        let preds = &mut self.nodes[to].predecessors;
        if let Some(j) = preds.iter().position(|&p| p == from) {
            preds.remove(j);
        }
        true
    }

    /// Remove every `from -> to` edge.
    pub fn remove_all_edges(&mut self, from: NodeId, to: NodeId) {
        while self.remove_edge(from, to) {}
    }

    pub fn clear_successors(&mut self, id: NodeId) {
        for succ in std::mem::take(&mut self.nodes[id].successors) {
            let preds = &mut self.nodes[succ].predecessors;
            if let Some(j) = preds.iter().position(|&p| p == id) {
                preds.remove(j);
            }
        }
    }

    /// Redirect every incoming edge of `from` to `to`, keeping each
    /// predecessor's successor order.
    pub fn move_predecessors(&mut self, from: NodeId, to: NodeId) {
        for pred in std::mem::take(&mut self.nodes[from].predecessors) {
            if let Some(slot) = self.nodes[pred].successors.iter_mut().find(|s| **s == from) {
                *slot = to;
            }
            self.nodes[to].predecessors.push(pred);
        }
    }

    /// Put `new` in the place of `old`: incoming edges and the slot in the
    /// parent structure both move over.
    pub fn substitute(&mut self, old: NodeId, new: NodeId) {
        self.move_predecessors(old, new);
        if let Some(parent) = self.nodes[old].parent {
            self.nodes[parent].kind.replace_child(old, new);
        }
    }

    // ------------------------------------------------------------------
    // Nesting
    // ------------------------------------------------------------------

    /// The ancestor of `node` (or `node` itself) whose parent is `level`.
    pub fn climb(&self, node: NodeId, level: Option<NodeId>) -> Option<NodeId> {
        let mut cur = node;
        loop {
            let parent = self.nodes[cur].parent;
            if parent == level {
                return Some(cur);
            }
            cur = parent?;
        }
    }

    /// Reparent every node directly under `level` whose start lies in
    /// `[start, end)` to `structure`.
    pub fn absorb(&mut self, structure: NodeId, level: Option<NodeId>, start: usize, end: usize) {
        for id in self.nodes.keys() {
            if id == structure {
                continue;
            }
            let node = &mut self.nodes[id];
            if node.parent == level && node.start >= start && node.start < end {
                node.parent = Some(structure);
            }
        }
    }

    /// Direct children of `parent`, in address order.
    pub fn children(&self, parent: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent == Some(parent))
            .map(|(id, _)| id)
            .collect();
        out.sort_by_key(|&id| (self.nodes[id].start, id));
        out
    }

    /// Fail if any edge crosses the boundary of a finished structure.
    pub fn ensure_closed(&self, structure: NodeId) -> Result<()> {
        let inside = |id: NodeId| self.nodes[id].parent == Some(structure);
        for id in self.children(structure) {
            let node = &self.nodes[id];
            let leaks = node.successors.iter().any(|&s| !inside(s))
                || node.predecessors.iter().any(|&p| !inside(p));
            if leaks {
                return Err(StructureError::unsupported(
                    self.nodes[structure].range(),
                    format!(
                        "{} at {:#x} has control flow crossing the {} boundary",
                        node.kind.name(),
                        node.start,
                        self.nodes[structure].kind.name()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// The node directly under `level` that ends exactly at `address` and
    /// therefore flows into it. Prefers connected nodes, then the latest start.
    pub fn last_node_before(&self, level: Option<NodeId>, address: usize) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent == level && n.end == address && n.start < address)
            .max_by_key(|(id, n)| (!n.is_detached(), n.start, *id))
            .map(|(id, _)| id)
    }
}

impl Index<NodeId> for Graph {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }
}

impl IndexMut<NodeId> for Graph {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(g: &mut Graph, start: usize, parent: Option<NodeId>) -> NodeId {
        g.add_node(NodeKind::Empty, start, start + 4, parent)
    }

    #[test]
    fn remove_edge_drops_one_occurrence() {
        let mut g = Graph::new();
        let a = leaf(&mut g, 0, None);
        let b = leaf(&mut g, 4, None);
        g.add_edge(a, b);
        g.add_edge(a, b);
        assert!(g.remove_edge(a, b));
        assert_eq!(g[a].successors, vec![b]);
        assert_eq!(g[b].predecessors, vec![a]);
        g.remove_all_edges(a, b);
        assert!(g[a].successors.is_empty());
        assert!(!g.remove_edge(a, b));
    }

    #[test]
    fn move_predecessors_keeps_successor_order() {
        let mut g = Graph::new();
        let c = leaf(&mut g, 0, None);
        let f = leaf(&mut g, 4, None);
        let x = leaf(&mut g, 8, None);
        let s = leaf(&mut g, 8, None);
        g.add_edge(c, f);
        g.add_edge(c, x);
        g.move_predecessors(x, s);
        assert_eq!(g[c].successors, vec![f, s]);
        assert_eq!(g[s].predecessors, vec![c]);
        assert!(g[x].predecessors.is_empty());
    }

    #[test]
    fn substitute_updates_parent_slot() {
        let mut g = Graph::new();
        let frag = g.add_node(
            NodeKind::Fragment(Fragment { name: "f".into(), entry: None, blocks: vec![] }),
            0,
            16,
            None,
        );
        let a = leaf(&mut g, 0, Some(frag));
        if let NodeKind::Fragment(f) = &mut g[frag].kind {
            f.entry = Some(a);
        }
        let b = leaf(&mut g, 0, Some(frag));
        g.substitute(a, b);
        match &g[frag].kind {
            NodeKind::Fragment(f) => assert_eq!(f.entry, Some(b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn climb_and_absorb() {
        let mut g = Graph::new();
        let outer = leaf(&mut g, 0, None);
        let a = leaf(&mut g, 0, Some(outer));
        let b = leaf(&mut g, 4, Some(outer));
        let c = leaf(&mut g, 8, Some(outer));
        let s = g.add_node(NodeKind::Empty, 0, 8, Some(outer));
        g.absorb(s, Some(outer), 0, 8);
        assert_eq!(g[a].parent, Some(s));
        assert_eq!(g[b].parent, Some(s));
        assert_eq!(g[c].parent, Some(outer));
        assert_eq!(g.climb(a, Some(outer)), Some(s));
        assert_eq!(g.climb(c, Some(outer)), Some(c));
        assert_eq!(g.climb(a, Some(c)), None);
    }

    #[test]
    fn ensure_closed_reports_leaks() {
        let mut g = Graph::new();
        let s = leaf(&mut g, 0, None);
        let inner = leaf(&mut g, 0, Some(s));
        let outside = leaf(&mut g, 8, None);
        assert!(g.ensure_closed(s).is_ok());
        g.add_edge(inner, outside);
        let err = g.ensure_closed(s).unwrap_err();
        assert!(!err.is_internal());
    }

    #[test]
    fn last_node_before_prefers_connected_nodes() {
        let mut g = Graph::new();
        let a = leaf(&mut g, 0, None);
        let dead = leaf(&mut g, 4, None);
        let live = leaf(&mut g, 4, None);
        g.add_edge(a, live);
        assert_eq!(g.last_node_before(None, 8), Some(live));
        let _ = dead;
        assert_eq!(g.last_node_before(None, 4), Some(a));
    }
}
