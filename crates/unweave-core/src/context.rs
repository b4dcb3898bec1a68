use unweave_bytecode::CodeEntry;

use crate::graph::{Fragment, Graph, NodeId, NodeKind};
use crate::pipeline::Settings;

/// Everything known about one code entry while it is being structured.
///
/// The graph owns every node; the lists here only index into it.
pub struct DecompileContext<'a> {
    pub code: &'a CodeEntry,
    pub settings: Settings,
    pub graph: Graph,
    /// Raw blocks in address order. The last one is the empty block at
    /// `code.length`.
    pub blocks: Vec<NodeId>,
    /// Fragment covering the whole entry.
    pub root: Option<NodeId>,
    /// Every fragment, root first, then in address order.
    pub fragments: Vec<NodeId>,
    pub loops: Vec<NodeId>,
    pub short_circuits: Vec<NodeId>,
    pub branches: Vec<NodeId>,
    pub switches: Vec<NodeId>,
    pub static_inits: Vec<NodeId>,
}

impl<'a> DecompileContext<'a> {
    pub fn new(code: &'a CodeEntry, settings: Settings) -> Self {
        Self {
            code,
            settings,
            graph: Graph::new(),
            blocks: Vec::new(),
            root: None,
            fragments: Vec::new(),
            loops: Vec::new(),
            short_circuits: Vec::new(),
            branches: Vec::new(),
            switches: Vec::new(),
            static_inits: Vec::new(),
        }
    }

    pub fn fragment(&self, id: NodeId) -> Option<&Fragment> {
        match &self.graph[id].kind {
            NodeKind::Fragment(f) => Some(f),
            _ => None,
        }
    }

    /// Raw blocks lexically inside fragment `id`.
    pub fn fragment_blocks(&self, id: NodeId) -> Vec<NodeId> {
        self.fragment(id).map(|f| f.blocks.clone()).unwrap_or_default()
    }
}
