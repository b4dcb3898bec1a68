use unweave_bytecode::bytecode::{ExtendedOp, Instruction, Opcode};
use unweave_bytecode::Features;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{Graph, NodeId, NodeKind, StaticInit};
use crate::pipeline::{Pass, PassResult};

use super::{block_at, cut_edges_into, Claims};

/// Wraps the run-once `static` initializers of a function.
///
/// ```text
/// isstaticok.e
/// bt [done]
/// <initializers>
/// :[done]
/// setstatic.e
/// ```
pub struct StaticInitFinder;

impl Pass for StaticInitFinder {
    fn name(&self) -> &'static str {
        "static-init"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        _claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        if !ctx.settings.has(Features::STATIC_INIT) {
            return Ok(PassResult { changed: false });
        }
        let guards: Vec<NodeId> = ctx
            .blocks
            .iter()
            .copied()
            .filter(|&b| is_static_guard(&ctx.graph, b))
            .collect();
        for &guard in &guards {
            build(ctx, guard)?;
        }
        Ok(PassResult { changed: !guards.is_empty() })
    }
}

/// A raw block ending in `isstaticok; bt`.
pub(crate) fn is_static_guard(graph: &Graph, block: NodeId) -> bool {
    match graph[block].as_block().map(|b| b.instructions.as_slice()) {
        Some([.., check, bt]) => {
            check.extended_op() == Some(ExtendedOp::IsStaticOk) && bt.opcode == Opcode::Bt
        }
        _ => false,
    }
}

fn build(ctx: &mut DecompileContext<'_>, guard: NodeId) -> Result<(), StructureError> {
    let Some(done) = ctx.graph[guard].last_instruction().and_then(Instruction::branch_target) else {
        return Ok(());
    };
    let marked = block_at(&ctx.graph, &ctx.blocks, done)
        .map(|i| ctx.blocks[i])
        .and_then(|b| ctx.graph[b].as_block())
        .and_then(|b| b.instructions.first())
        .is_some_and(|i| i.extended_op() == Some(ExtendedOp::SetStatic));
    if !marked {
        return Err(StructureError::malformed(
            ctx.graph[guard].range(),
            format!("static guard target {done:#x} does not start with `setstatic`"),
        ));
    }

    let graph = &mut ctx.graph;
    let (first, target) = match graph[guard].successors.as_slice() {
        &[first, target] => (first, target),
        _ => {
            return Err(StructureError::malformed(
                graph[guard].range(),
                "static guard without two successors",
            ))
        }
    };
    if let Some(block) = graph.block_mut(guard) {
        let keep = block.instructions.len() - 2;
        block.instructions.truncate(keep);
    }
    graph.clear_successors(guard);

    let level = graph[guard].parent;
    let start = graph[guard].end;
    let si = graph.add_node(NodeKind::StaticInit(StaticInit { head: first }), start, done, level);
    let head = if first == target {
        let empty = graph.add_node(NodeKind::Empty, done, done, Some(si));
        if let NodeKind::StaticInit(s) = &mut graph[si].kind {
            s.head = empty;
        }
        empty
    } else {
        first
    };
    cut_edges_into(graph, level, start, done, target);

    graph.add_edge(guard, si);
    graph.add_edge(si, target);
    graph.absorb(si, level, start, done);
    graph.ensure_closed(si)?;

    log::debug!(
        "{}: static initializers at {} (head {})",
        ctx.code.name,
        AddressRange::new(start, done),
        ctx.graph[head].kind.name()
    );
    ctx.static_inits.push(si);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_util::{assemble, block, kind_name, run_passes};
    use crate::passes::{BinaryBranchFinder, BlockBuilder, FragmentFinder, LoopFinder, SwitchLocate};

    const GUARDED: &str = "\
        isstaticok.e\n\
        bt [done]\n\
        pushi.e 0\n\
        pop.v.i static.count\n\
        :[done]\n\
        setstatic.e\n\
        exit.i";

    #[test]
    fn guard_wraps_initializers() {
        let code = assemble(GUARDED);
        let ctx = run_passes(
            &code,
            &[&BlockBuilder, &FragmentFinder, &SwitchLocate, &LoopFinder, &BinaryBranchFinder, &StaticInitFinder],
        );
        assert_eq!(ctx.static_inits.len(), 1);
        let si = ctx.static_inits[0];
        let NodeKind::StaticInit(s) = ctx.graph[si].kind else { unreachable!() };
        assert_eq!(s.head, block(&ctx, 8));
        assert_eq!(ctx.graph[block(&ctx, 8)].parent, Some(si));
        assert_eq!((ctx.graph[si].start, ctx.graph[si].end), (8, 20));

        let guard = block(&ctx, 0);
        assert!(ctx.graph[guard].as_block().unwrap().instructions.is_empty());
        assert_eq!(ctx.graph[guard].successors, vec![si]);
        assert_eq!(ctx.graph[si].successors, vec![block(&ctx, 20)]);
        assert!(ctx.graph[block(&ctx, 8)].successors.is_empty());
    }

    #[test]
    fn empty_initializer_gets_a_placeholder_head() {
        let code = assemble("isstaticok.e\nbt [done]\n:[done]\nsetstatic.e\nexit.i");
        let ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder, &BinaryBranchFinder, &StaticInitFinder]);
        let NodeKind::StaticInit(s) = ctx.graph[ctx.static_inits[0]].kind else { unreachable!() };
        assert_eq!(kind_name(&ctx, s.head), "empty");
    }

    #[test]
    fn guard_without_setstatic_is_malformed() {
        let code = assemble("isstaticok.e\nbt [done]\npushi.e 0\npopz.v\n:[done]\nexit.i");
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        let err = StaticInitFinder.apply(&mut ctx, &mut Claims::default()).unwrap_err();
        assert!(matches!(err, StructureError::Malformed { .. }));
    }
}
