use unweave_bytecode::bytecode::{Instruction, Opcode};
use unweave_bytecode::Features;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{BinaryBranch, Graph, NodeId, NodeKind};
use crate::pipeline::{Pass, PassResult};

use super::{
    cut_edges_into, last_opcode, pop_if, replace_jump, short_circuit, static_init, Claims, Sentinel,
};

/// Collapses `&&`/`||` chains, then every remaining `bf` into an if/else.
///
/// ```text
/// c; bf [else]      c; bf [join]
/// <then>            <then>
/// b [join]          :[join]
/// :[else] <else>
/// :[join]
/// ```
///
/// Conditionals are handled from the highest address down, so the branches
/// nested inside an arm are already single nodes when the arm is examined.
pub struct BinaryBranchFinder;

impl Pass for BinaryBranchFinder {
    fn name(&self) -> &'static str {
        "branches"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        let mut changed = short_circuit::collapse(ctx, claims)?;
        changed |= convert_switch_breaks(ctx, claims);

        let conditions: Vec<NodeId> = ctx
            .blocks
            .iter()
            .rev()
            .copied()
            .filter(|&b| !claims.is_claimed(b))
            .filter(|&b| last_opcode(&ctx.graph, b) == Some(Opcode::Bf))
            .collect();
        for condition in conditions {
            build(ctx, condition)?;
            changed = true;
        }

        reject_leftovers(ctx, claims)?;
        Ok(PassResult { changed })
    }
}

/// `b` to a switch's exit from inside its body is a `break`.
fn convert_switch_breaks(ctx: &mut DecompileContext<'_>, claims: &Claims) -> bool {
    let mut changed = false;
    for loc in &claims.switches {
        let after = ctx.graph[loc.jump_block].start;
        for block in ctx.fragment_blocks(loc.fragment) {
            let node = &ctx.graph[block];
            let exits = node.start > after
                && node.start < loc.end
                && node
                    .last_instruction()
                    .is_some_and(|i| i.is_unconditional_branch() && i.branch_target() == Some(loc.end));
            if exits {
                replace_jump(&mut ctx.graph, block, Sentinel::Break);
                changed = true;
            }
        }
    }
    changed
}

fn build(ctx: &mut DecompileContext<'_>, condition: NodeId) -> Result<(), StructureError> {
    let graph = &mut ctx.graph;
    let c_start = graph[condition].start;
    let level = graph[condition].parent;
    let Some(x_addr) = graph[condition].last_instruction().and_then(Instruction::branch_target) else {
        return Ok(());
    };
    if x_addr <= c_start {
        return Err(StructureError::unsupported(
            graph[condition].range(),
            format!("backward conditional jump to {x_addr:#x}"),
        ));
    }
    let (f, x) = match graph[condition].successors.as_slice() {
        &[f, x] => (f, x),
        _ => {
            return Err(StructureError::malformed(
                graph[condition].range(),
                "conditional branch without two successors",
            ))
        }
    };

    let mut true_branch = Some(f);
    let mut else_branch = None;
    let mut empty_else = false;
    let (join, join_addr) = if f == x {
        true_branch = None;
        (x, x_addr)
    } else {
        let Some(n) = graph.last_node_before(level, x_addr) else {
            return Err(StructureError::unsupported(
                AddressRange::new(c_start, x_addr),
                "no node ends the `then` arm",
            ));
        };
        let skip = graph[n]
            .last_instruction()
            .filter(|i| i.opcode == Opcode::B)
            .and_then(Instruction::branch_target);
        match skip {
            Some(y) if y == x_addr => {
                let end = replace_jump(graph, n, Sentinel::Empty);
                if n == f {
                    true_branch = Some(end);
                }
                empty_else = true;
                (x, x_addr)
            }
            Some(y) if y > x_addr => {
                let Some(&join) = graph[n].successors.first() else {
                    return Err(StructureError::malformed(graph[n].range(), "jump without a successor"));
                };
                let end = replace_jump(graph, n, Sentinel::Empty);
                if n == f {
                    true_branch = Some(end);
                }
                else_branch = Some(x);
                (join, y)
            }
            Some(y) => {
                return Err(StructureError::unsupported(
                    graph[n].range(),
                    format!("`then` arm jumps back to {y:#x}"),
                ))
            }
            None if graph[n].successors.is_empty() || graph[n].successors == [x] => (x, x_addr),
            None => {
                return Err(StructureError::unsupported(
                    graph[n].range(),
                    "`then` arm does not reach its join point",
                ))
            }
        }
    };

    pop_if(graph, condition, Opcode::Bf);
    graph.clear_successors(condition);
    cut_edges_into(graph, level, c_start, join_addr, join);

    let mut fresh = Vec::new();
    let mut empty = |graph: &mut Graph| {
        let id = graph.add_node(NodeKind::Empty, x_addr, x_addr, None);
        fresh.push(id);
        id
    };
    let true_branch = match true_branch {
        Some(t) => t,
        None => empty(graph),
    };
    if empty_else {
        else_branch = Some(empty(graph));
    }
    let false_branch = match else_branch {
        Some(e) => e,
        None => empty(graph),
    };

    let bb = graph.add_node(
        NodeKind::BinaryBranch(BinaryBranch { condition, true_branch, false_branch, else_branch }),
        c_start,
        join_addr,
        level,
    );
    for id in fresh {
        graph[id].parent = Some(bb);
    }
    graph.substitute(condition, bb);
    graph.add_edge(bb, join);
    graph.absorb(bb, level, c_start, join_addr);
    graph.ensure_closed(bb)?;

    log::debug!(
        "{}: if{} at {}",
        ctx.code.name,
        if else_branch.is_some() { "/else" } else { "" },
        AddressRange::new(c_start, join_addr)
    );
    ctx.branches.push(bb);
    Ok(())
}

/// Any jump still present here has no structured reading.
fn reject_leftovers(ctx: &DecompileContext<'_>, claims: &Claims) -> Result<(), StructureError> {
    let static_init = ctx.settings.has(Features::STATIC_INIT);
    for &block in &ctx.blocks {
        let Some(inst) = ctx.graph[block].last_instruction() else {
            continue;
        };
        if !inst.is_branch() || claims.is_claimed(block) {
            continue;
        }
        let allowed = inst.opcode == Opcode::Bt
            && static_init
            && static_init::is_static_guard(&ctx.graph, block);
        if !allowed {
            return Err(StructureError::unsupported(
                AddressRange::new(inst.address, inst.next_address()),
                format!("unstructured jump `{}`", inst.opcode.mnemonic()),
            ));
        }
    }
    Ok(())
}
