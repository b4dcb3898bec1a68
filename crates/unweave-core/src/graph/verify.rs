//! Graph-wide postconditions.

use super::{Graph, NodeId, NodeKind};

/// Check that every edge is recorded on both endpoints, with matching
/// multiplicity.
pub fn verify_edges(graph: &Graph) -> Result<(), String> {
    let count = |list: &[NodeId], id: NodeId| list.iter().filter(|&&x| x == id).count();
    for (id, node) in graph.iter() {
        for &succ in &node.successors {
            let forward = count(&node.successors, succ);
            let backward = count(&graph[succ].predecessors, id);
            if forward != backward {
                return Err(format!(
                    "{id} -> {succ} recorded {forward} time(s) as successor but {backward} time(s) as predecessor"
                ));
            }
        }
        for &pred in &node.predecessors {
            let backward = count(&node.predecessors, pred);
            let forward = count(&graph[pred].successors, id);
            if forward != backward {
                return Err(format!(
                    "{pred} -> {id} recorded {forward} time(s) as successor but {backward} time(s) as predecessor"
                ));
            }
        }
    }
    Ok(())
}

/// Check that no block still ends in a control transfer.
pub fn ensure_no_remaining_jumps(graph: &Graph) -> Result<(), String> {
    for (id, node) in graph.iter() {
        let NodeKind::Block(block) = &node.kind else {
            continue;
        };
        if let Some(inst) = block.instructions.iter().find(|i| i.is_branch()) {
            return Err(format!(
                "{id} still contains `{}` at {:#x}",
                inst.opcode.mnemonic(),
                inst.address
            ));
        }
    }
    Ok(())
}
