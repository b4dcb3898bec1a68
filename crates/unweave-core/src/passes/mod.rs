//! The structuring passes, in pipeline order.

pub mod blocks;
pub mod branches;
pub mod fragments;
pub mod loops;
pub mod short_circuit;
pub mod static_init;
pub mod switches;

pub use blocks::BlockBuilder;
pub use branches::BinaryBranchFinder;
pub use fragments::FragmentFinder;
pub use loops::LoopFinder;
pub use static_init::StaticInitFinder;
pub use switches::{SwitchInsert, SwitchLocate};

use std::collections::HashSet;

use unweave_bytecode::bytecode::Opcode;

use crate::graph::{Graph, NodeId, NodeKind};

/// A dispatch chain found by [`SwitchLocate`], waiting for [`SwitchInsert`].
#[derive(Debug, Clone)]
pub struct SwitchLocation {
    pub fragment: NodeId,
    /// Block holding the switched value's first `dup`.
    pub cases_block: NodeId,
    /// Blocks ending in `cmp EQ; bt`, in dispatch order.
    pub compare_blocks: Vec<NodeId>,
    /// The `b` after the last comparison (default or exit).
    pub jump_block: NodeId,
    /// Block starting with the `popz` that discards the switched value.
    pub end_block: NodeId,
    pub start: usize,
    pub end: usize,
}

impl SwitchLocation {
    /// Whether `address` lies inside the switch (exit excluded).
    pub fn contains(&self, address: usize) -> bool {
        self.start <= address && address < self.end
    }
}

/// "Already structured" bookkeeping owned by the pipeline and handed to each
/// pass, instead of flags on the nodes.
#[derive(Debug, Default)]
pub struct Claims {
    /// Located switches, innermost (latest start) first.
    pub switches: Vec<SwitchLocation>,
    /// Dispatch blocks whose branches belong to a switch.
    pub switch_blocks: HashSet<NodeId>,
}

impl Claims {
    pub fn is_claimed(&self, block: NodeId) -> bool {
        self.switch_blocks.contains(&block)
    }

    /// A jump from `source` to `target` that leaves a located switch through
    /// its exit.
    pub fn is_switch_exit(&self, source: usize, target: usize) -> bool {
        self.switches.iter().any(|s| s.end == target && s.contains(source))
    }
}

/// Sentinel kinds a raw jump can be rewritten into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sentinel {
    Empty,
    Break,
    Continue,
    Return,
}

impl Sentinel {
    fn kind(self) -> NodeKind {
        match self {
            Self::Empty => NodeKind::Empty,
            Self::Break => NodeKind::Break,
            Self::Continue => NodeKind::Continue,
            Self::Return => NodeKind::Return,
        }
    }
}

/// Drop the trailing unconditional jump of `block` and its edge, and return
/// the node that now ends the path.
///
/// A block left empty is replaced outright by the sentinel. Otherwise the
/// sentinel follows the block. `Sentinel::Empty` on a non-empty block adds
/// nothing and returns the block itself.
pub(crate) fn replace_jump(graph: &mut Graph, block: NodeId, sentinel: Sentinel) -> NodeId {
    let Some(inst) = graph.block_mut(block).and_then(|b| b.instructions.pop()) else {
        return block;
    };
    graph.clear_successors(block);

    let emptied = graph[block].as_block().map_or(true, |b| b.instructions.is_empty());
    if sentinel == Sentinel::Empty && !emptied {
        return block;
    }

    let parent = graph[block].parent;
    let node = graph.add_node(sentinel.kind(), inst.address, inst.next_address(), parent);
    if emptied {
        graph.substitute(block, node);
    } else {
        graph.add_edge(block, node);
    }
    node
}

/// Remove the last instruction of `block` if it has `opcode`.
pub(crate) fn pop_if(graph: &mut Graph, block: NodeId, opcode: Opcode) -> bool {
    let Some(b) = graph.block_mut(block) else {
        return false;
    };
    if b.instructions.last().map(|i| i.opcode) == Some(opcode) {
        b.instructions.pop();
        true
    } else {
        false
    }
}

/// Last opcode of a raw block.
pub(crate) fn last_opcode(graph: &Graph, block: NodeId) -> Option<Opcode> {
    graph[block].last_instruction().map(|i| i.opcode)
}

/// Index of the raw block starting at `address` within an address-ordered list.
pub(crate) fn block_at(graph: &Graph, blocks: &[NodeId], address: usize) -> Option<usize> {
    blocks
        .binary_search_by_key(&address, |&b| graph[b].start)
        .ok()
}

/// Remove every edge into `target` from nodes directly under `level` that
/// start inside `[start, end)`.
pub(crate) fn cut_edges_into(
    graph: &mut Graph,
    level: Option<NodeId>,
    start: usize,
    end: usize,
    target: NodeId,
) {
    let sources: Vec<NodeId> = graph[target]
        .predecessors
        .iter()
        .copied()
        .filter(|&p| graph[p].parent == level && graph[p].start >= start && graph[p].start < end)
        .collect();
    for source in sources {
        graph.remove_all_edges(source, target);
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use unweave_bytecode::{asm, CodeEntry};

    use crate::context::DecompileContext;
    use crate::graph::NodeId;
    use crate::pipeline::{Pass, Settings};

    use super::Claims;

    pub fn assemble(text: &str) -> CodeEntry {
        asm::parse("gml_Script_test", text).unwrap()
    }

    /// Run `passes` in order on a fresh context.
    pub fn run_passes<'a>(code: &'a CodeEntry, passes: &[&dyn Pass]) -> DecompileContext<'a> {
        let mut ctx = DecompileContext::new(code, Settings::default());
        let mut claims = Claims::default();
        for pass in passes {
            pass.apply(&mut ctx, &mut claims).unwrap();
            crate::graph::verify::verify_edges(&ctx.graph).unwrap();
        }
        ctx
    }

    /// Raw block starting at `address`.
    pub fn block(ctx: &DecompileContext<'_>, address: usize) -> NodeId {
        ctx.blocks
            .iter()
            .copied()
            .find(|&b| ctx.graph[b].start == address)
            .unwrap()
    }

    pub fn kind_name(ctx: &DecompileContext<'_>, id: NodeId) -> &'static str {
        ctx.graph[id].kind.name()
    }
}
