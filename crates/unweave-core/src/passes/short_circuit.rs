//! `&&`/`||` chains, collapsed before if/else detection.
//!
//! ```text
//! a; bf [false]        <- condition 1 (`bt [true]` for `||`)
//! b; bf [false]        <- condition 2
//! c; b [done]          <- last operand jumps over the constant
//! :[false] push.e 0    <- `push.e 1` for `||`
//! :[done] ...          <- consumer of the value
//! ```

use unweave_bytecode::bytecode::Opcode;
use unweave_bytecode::Features;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{LogicKind, NodeId, NodeKind, ShortCircuit};

use super::{pop_if, Claims};

struct Diamond {
    logic: LogicKind,
    level: Option<NodeId>,
    constant: NodeId,
    consumer: NodeId,
    jump: NodeId,
    conditions: Vec<NodeId>,
}

/// Collapse every short-circuit diamond into a `ShortCircuit` node, inner
/// ones first. Returns whether any were found.
pub(crate) fn collapse(ctx: &mut DecompileContext<'_>, claims: &Claims) -> Result<bool, StructureError> {
    if !ctx.settings.has(Features::SHORT_CIRCUIT) {
        return Ok(false);
    }
    let mut changed = false;
    for index in 1..ctx.blocks.len() {
        if let Some(diamond) = match_diamond(ctx, claims, index) {
            build(ctx, diamond)?;
            changed = true;
        }
    }
    Ok(changed)
}

fn match_diamond(ctx: &DecompileContext<'_>, claims: &Claims, index: usize) -> Option<Diamond> {
    let graph = &ctx.graph;
    let constant = ctx.blocks[index];
    let node = &graph[constant];

    let value = match node.as_block()?.instructions.as_slice() {
        [push] => push.constant_int()?,
        _ => return None,
    };
    let (logic, branch) = match value {
        0 => (LogicKind::And, Opcode::Bf),
        1 => (LogicKind::Or, Opcode::Bt),
        _ => return None,
    };
    let consumer = match node.successors.as_slice() {
        &[next] if graph[next].start == node.end => next,
        _ => return None,
    };

    let jump = ctx.blocks[index - 1];
    let level = graph[jump].parent;
    let jumps_over = graph[jump]
        .last_instruction()
        .is_some_and(|i| i.is_unconditional_branch() && i.branch_target() == Some(node.end));
    if !jumps_over || node.parent != level || node.predecessors.is_empty() {
        return None;
    }

    let mut conditions = node.predecessors.clone();
    conditions.sort_by_key(|&c| graph[c].start);
    conditions.dedup();
    let all_branch = conditions.iter().all(|&c| {
        graph[c].parent == level
            && !claims.is_claimed(c)
            && graph[c]
                .last_instruction()
                .is_some_and(|i| i.opcode == branch && i.branch_target() == Some(node.start))
    });
    all_branch.then_some(Diamond { logic, level, constant, consumer, jump, conditions })
}

fn build(ctx: &mut DecompileContext<'_>, d: Diamond) -> Result<(), StructureError> {
    let graph = &mut ctx.graph;
    let branch = match d.logic {
        LogicKind::And => Opcode::Bf,
        LogicKind::Or => Opcode::Bt,
    };

    // The first operand may be an earlier collapsed chain, as in `(a && b) || c`,
    // unless the first condition block also holds a finished statement.
    let first = d.conditions[0];
    let mut start_node = graph.climb(first, d.level).unwrap_or(first);
    let ends_statement = graph[first].as_block().is_some_and(|b| {
        b.instructions.iter().any(|i| {
            matches!(i.opcode, Opcode::Pop | Opcode::Popz | Opcode::PopEnv | Opcode::Exit | Opcode::Ret)
        })
    });
    if !ends_statement {
        while let Some(prev) = graph.last_node_before(d.level, graph[start_node].start) {
            if !matches!(graph[prev].kind, NodeKind::ShortCircuit(_)) {
                break;
            }
            start_node = prev;
        }
    }
    let start = graph[start_node].start;
    let end = graph[d.consumer].start;

    let mut operands = vec![start_node];
    for &cond in &d.conditions {
        let fallthrough = graph[cond].successors.first().copied();
        pop_if(graph, cond, branch);
        graph.clear_successors(cond);
        operands.extend(fallthrough);
    }
    pop_if(graph, d.jump, Opcode::B);
    graph.clear_successors(d.jump);
    graph.clear_successors(d.constant);

    let sc = graph.add_node(
        NodeKind::ShortCircuit(ShortCircuit { logic: d.logic, conditions: operands }),
        start,
        end,
        d.level,
    );
    graph.substitute(start_node, sc);
    graph.add_edge(sc, d.consumer);
    graph.absorb(sc, d.level, start, end);
    graph.ensure_closed(sc)?;

    log::debug!(
        "{}: {} chain of {} operand(s) at {}",
        ctx.code.name,
        ctx.graph[sc].kind.name(),
        d.conditions.len() + 1,
        AddressRange::new(start, end)
    );
    ctx.short_circuits.push(sc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_util::{assemble, block, kind_name, run_passes};
    use crate::passes::{BlockBuilder, FragmentFinder};

    #[test]
    fn and_chain_becomes_one_node() {
        let code = assemble(
            "push.v self.a\n\
             conv.v.b\n\
             bf [false]\n\
             push.v self.b\n\
             conv.v.b\n\
             bf [false]\n\
             push.v self.c\n\
             conv.v.b\n\
             b [done]\n\
             :[false]\n\
             push.e 0\n\
             :[done]\n\
             pop.v.b self.x\n\
             exit.i",
        );
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        assert!(collapse(&mut ctx, &Claims::default()).unwrap());

        let sc = ctx.short_circuits[0];
        assert_eq!(kind_name(&ctx, sc), "and");
        let NodeKind::ShortCircuit(s) = &ctx.graph[sc].kind else { unreachable!() };
        assert_eq!(s.conditions, vec![block(&ctx, 0), block(&ctx, 16), block(&ctx, 32)]);
        assert_eq!(ctx.graph[sc].successors, vec![block(&ctx, 52)]);
        assert_eq!(ctx.fragment(ctx.root.unwrap()).unwrap().entry, Some(sc));
        // The `push.e 0` block is no longer reachable.
        assert!(ctx.graph[block(&ctx, 48)].is_detached());
        crate::graph::verify::verify_edges(&ctx.graph).unwrap();
    }

    #[test]
    fn outer_chain_absorbs_inner() {
        // (a && b) || c
        let code = assemble(
            "push.v self.a\n\
             conv.v.b\n\
             bf [f1]\n\
             push.v self.b\n\
             conv.v.b\n\
             b [d1]\n\
             :[f1]\n\
             push.e 0\n\
             :[d1]\n\
             bt [t2]\n\
             push.v self.c\n\
             conv.v.b\n\
             b [d2]\n\
             :[t2]\n\
             push.e 1\n\
             :[d2]\n\
             pop.v.b self.x\n\
             exit.i",
        );
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        collapse(&mut ctx, &Claims::default()).unwrap();
        assert_eq!(ctx.short_circuits.len(), 2);
        let (inner, outer) = (ctx.short_circuits[0], ctx.short_circuits[1]);
        assert_eq!(kind_name(&ctx, outer), "or");
        assert_eq!(ctx.graph[inner].parent, Some(outer));
        let NodeKind::ShortCircuit(s) = &ctx.graph[outer].kind else { unreachable!() };
        assert_eq!(s.conditions, vec![inner, block(&ctx, 40)]);
        assert_eq!((ctx.graph[outer].start, ctx.graph[outer].end), (0, 60));
    }

    #[test]
    fn disabled_without_the_feature() {
        let code = assemble("pushi.e 1\nbf [f]\npushi.e 1\nb [d]\n:[f]\npush.e 0\n:[d]\npopz.v");
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        ctx.settings = crate::pipeline::Settings::for_version(unweave_bytecode::BytecodeVersion(14));
        assert!(!collapse(&mut ctx, &Claims::default()).unwrap());
    }
}
