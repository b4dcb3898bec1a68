use std::collections::HashSet;

use unweave_bytecode::bytecode::{ComparisonKind, Instruction, Opcode, Operand};
use unweave_bytecode::Features;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{Loop, LoopKind, NodeId, NodeKind};
use crate::pipeline::{Pass, PassResult};

use super::{block_at, pop_if, replace_jump, Claims, Sentinel};

/// Recognizes the four loop shapes from their back-edges.
///
/// | shape    | back-edge                  | entry                        |
/// |----------|----------------------------|------------------------------|
/// | while    | `b head` at the tail       | `bf after` in the head       |
/// | do-until | `bf head` at the tail      | none                         |
/// | repeat   | `bt head` after a decrement| `dup; 0; cmp LTE; bt after`  |
/// | with     | `popenv head`              | `pushenv tail`               |
///
/// Loops are built innermost first, so an enclosing loop sees each inner one
/// as a single node. Jumps inside the range that target the loop's exit or
/// continue point become `Break`/`Continue` sentinels.
pub struct LoopFinder;

impl Pass for LoopFinder {
    fn name(&self) -> &'static str {
        "loops"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        let mut changed = false;
        for fragment in ctx.fragments.clone() {
            let mut candidates = find_candidates(ctx, fragment)?;
            candidates.sort_by_key(|c| (c.end - c.start, c.start));
            for candidate in &candidates {
                build(ctx, claims, fragment, candidate)?;
                changed = true;
            }
        }
        Ok(PassResult { changed })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    While,
    DoUntil,
    Repeat,
    With,
}

/// A back-edge awaiting construction. Block ids are raw blocks.
#[derive(Debug)]
struct Candidate {
    shape: Shape,
    head: NodeId,
    tail: NodeId,
    start: usize,
    end: usize,
}

fn find_candidates(
    ctx: &DecompileContext<'_>,
    fragment: NodeId,
) -> Result<Vec<Candidate>, StructureError> {
    let graph = &ctx.graph;
    let blocks = ctx.fragment_blocks(fragment);
    let mut out = Vec::new();
    let mut while_heads = HashSet::new();
    let mut with_tails = HashSet::new();
    let mut popenvs = Vec::new();

    for (i, &id) in blocks.iter().enumerate().rev() {
        let node = &graph[id];
        let Some((opcode, target)) = node
            .last_instruction()
            .and_then(|inst| Some((inst.opcode, inst.branch_target()?)))
        else {
            continue;
        };
        let no_shape = || {
            StructureError::malformed(node.range(), "back-edge matches no loop shape")
        };

        if opcode == Opcode::PushEnv {
            let head = blocks.get(i + 1).copied().ok_or_else(no_shape)?;
            let tail = block_at(graph, &blocks, target)
                .map(|t| blocks[t])
                .ok_or_else(no_shape)?;
            with_tails.insert(tail);
            out.push(Candidate {
                shape: Shape::With,
                head,
                tail,
                start: graph[head].start,
                end: graph[tail].end,
            });
            continue;
        }
        if target > node.start {
            continue;
        }

        let head = block_at(graph, &blocks, target)
            .map(|h| blocks[h])
            .ok_or_else(no_shape)?;
        let shape = match opcode {
            Opcode::B if while_heads.insert(target) => Shape::While,
            // Another `b head` before the tail: a `continue`.
            Opcode::B => continue,
            Opcode::Bf => Shape::DoUntil,
            Opcode::Bt => Shape::Repeat,
            Opcode::PopEnv => {
                popenvs.push(id);
                continue;
            }
            _ => continue,
        };
        out.push(Candidate { shape, head, tail: id, start: target, end: node.end });
    }

    if let Some(&stray) = popenvs.iter().find(|id| !with_tails.contains(id)) {
        return Err(StructureError::malformed(
            graph[stray].range(),
            "back-edge matches no loop shape",
        ));
    }
    Ok(out)
}

/// What the shape-specific step leaves for the common one.
struct Shaped {
    kind: LoopKind,
    body: Option<NodeId>,
    /// Raw block the loop flows into.
    exit: Option<NodeId>,
    end: usize,
}

fn build(
    ctx: &mut DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    c: &Candidate,
) -> Result<(), StructureError> {
    let level = Some(fragment);
    let head_top = ctx.graph.climb(c.head, level).unwrap_or(c.head);
    let tail_top = ctx.graph.climb(c.tail, level).unwrap_or(c.tail);

    let shaped = match c.shape {
        Shape::While => build_while(ctx, claims, fragment, c, head_top)?,
        Shape::DoUntil => {
            pop_if(&mut ctx.graph, c.tail, Opcode::Bf);
            ctx.graph.clear_successors(c.tail);
            let after = ctx.graph[c.tail].end;
            let cont = ctx.graph[c.tail].start;
            convert_jumps(ctx, claims, fragment, c.start, after, &[after], &[cont])?;
            Shaped {
                kind: LoopKind::DoUntil,
                body: Some(head_top),
                exit: next_block(ctx, c.tail),
                end: after,
            }
        }
        Shape::Repeat => build_repeat(ctx, claims, fragment, c, head_top)?,
        Shape::With => build_with(ctx, claims, fragment, c, head_top)?,
    };

    let after = ctx.graph.add_node(NodeKind::Empty, shaped.end, shaped.end, None);
    let node = ctx.graph.add_node(
        NodeKind::Loop(Loop {
            kind: shaped.kind,
            head: head_top,
            tail: tail_top,
            body: shaped.body,
            after,
        }),
        c.start,
        shaped.end,
        level,
    );
    ctx.graph[after].parent = Some(node);

    ctx.graph.substitute(head_top, node);
    if let Some(exit) = shaped.exit.and_then(|a| ctx.graph.climb(a, level)) {
        ctx.graph.add_edge(node, exit);
    }
    ctx.graph.absorb(node, level, c.start, shaped.end);
    ctx.graph.ensure_closed(node)?;

    log::debug!(
        "{}: {} loop at {}",
        ctx.code.name,
        ctx.graph[node].kind.name(),
        AddressRange::new(c.start, shaped.end)
    );
    ctx.loops.push(node);
    Ok(())
}

fn build_while(
    ctx: &mut DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    c: &Candidate,
    head_top: NodeId,
) -> Result<Shaped, StructureError> {
    let level = Some(fragment);
    let (head_start, after) = (c.start, c.end);
    let tail = c.tail;
    pop_if(&mut ctx.graph, tail, Opcode::B);
    ctx.graph.clear_successors(tail);

    let in_range: Vec<NodeId> = ctx
        .fragment_blocks(fragment)
        .into_iter()
        .filter(|&b| (head_start..after).contains(&ctx.graph[b].start))
        .collect();
    let jumps_to = |b: NodeId, opcode: Opcode, target: usize| {
        ctx.graph[b]
            .last_instruction()
            .is_some_and(|i| i.opcode == opcode && i.branch_target() == Some(target))
    };

    let head_continues = in_range.iter().any(|&b| jumps_to(b, Opcode::B, head_start));
    let cond = in_range
        .iter()
        .copied()
        .find(|&b| ctx.graph[b].parent == level && jumps_to(b, Opcode::Bf, after));
    let first = |ctx: &DecompileContext<'_>| {
        cond.and_then(|c| ctx.graph[c].successors.first().copied())
    };

    let incrementor = !head_continues
        && cond.is_some()
        && first(ctx) != Some(tail)
        && is_incrementor(ctx.graph[tail].as_block().map(|b| b.instructions.as_slice()));

    let mut continues = vec![head_start];
    if incrementor {
        continues.push(ctx.graph[tail].start);
    }
    convert_jumps(ctx, claims, fragment, head_start, after, &[after], &continues)?;

    let body_start = first(ctx);
    if let Some(cond) = cond {
        pop_if(&mut ctx.graph, cond, Opcode::Bf);
        ctx.graph.clear_successors(cond);
    }
    let tail_empty = is_empty_block(ctx, tail);
    let body = match cond {
        None => Some(head_top),
        Some(_) if body_start == Some(tail) && tail_empty => None,
        Some(_) => body_start,
    };

    Ok(Shaped {
        kind: LoopKind::While {
            must_be_while_loop: !incrementor,
            for_loop_incrementor: incrementor.then_some(tail),
        },
        body,
        exit: next_block(ctx, tail),
        end: after,
    })
}

/// A tail that is exactly one assignment (`... pop.v.i self.i`).
fn is_incrementor(insts: Option<&[Instruction]>) -> bool {
    let Some(insts) = insts else {
        return false;
    };
    let stores = insts
        .iter()
        .filter(|i| matches!(i.opcode, Opcode::Pop | Opcode::Popz))
        .count();
    insts.last().is_some_and(|i| i.opcode == Opcode::Pop) && stores == 1
}

fn build_repeat(
    ctx: &mut DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    c: &Candidate,
    head_top: NodeId,
) -> Result<Shaped, StructureError> {
    let no_shape = |range: AddressRange, what: &str| {
        StructureError::malformed(range, format!("back-edge matches no loop shape: {what}"))
    };
    let (head, tail) = (c.head, c.tail);
    let after = c.end;
    let typed = ctx.settings.has(Features::TYPED_BOOLEANS);

    let prelude = prev_block(ctx, head)
        .filter(|&p| {
            let insts = block_insts(ctx, p);
            insts.len() >= 4 && {
                let e = &insts[insts.len() - 4..];
                e[0].opcode == Opcode::Dup
                    && e[1].constant_int() == Some(0)
                    && e[2].is_comparison(ComparisonKind::LessEqual)
                    && e[3].opcode == Opcode::Bt
                    && e[3].branch_target() == Some(after)
            }
        })
        .ok_or_else(|| no_shape(ctx.graph[head].range(), "repeat counter test not found"))?;

    let decrement = if typed { 5 } else { 4 };
    let tail_ok = {
        let insts = block_insts(ctx, tail);
        insts.len() >= decrement && {
            let e = &insts[insts.len() - decrement..];
            e[0].constant_int() == Some(1)
                && e[1].opcode == Opcode::Sub
                && e[2].opcode == Opcode::Dup
                && (!typed || e[3].opcode == Opcode::Conv)
        }
    };
    if !tail_ok {
        return Err(no_shape(ctx.graph[tail].range(), "repeat decrement not found"));
    }

    let exit = next_block(ctx, tail)
        .filter(|&a| block_insts(ctx, a).first().is_some_and(|i| i.opcode == Opcode::Popz))
        .ok_or_else(|| no_shape(ctx.graph[tail].range(), "repeat counter is not discarded"))?;

    truncate(ctx, prelude, 4);
    if let Some(&skip) = ctx.graph[prelude].successors.get(1) {
        ctx.graph.remove_edge(prelude, skip);
    }
    truncate(ctx, tail, decrement);
    ctx.graph.clear_successors(tail);
    if let Some(b) = ctx.graph.block_mut(exit) {
        b.instructions.remove(0);
    }

    let cont = ctx.graph[tail].start;
    convert_jumps(ctx, claims, fragment, c.start, after, &[after], &[cont])?;

    let body = if head == tail && is_empty_block(ctx, tail) { None } else { Some(head_top) };
    Ok(Shaped { kind: LoopKind::Repeat, body, exit: Some(exit), end: after })
}

fn build_with(
    ctx: &mut DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    c: &Candidate,
    head_top: NodeId,
) -> Result<Shaped, StructureError> {
    let (head, tail) = (c.head, c.tail);
    let head_start = c.start;
    let prelude = prev_block(ctx, head).ok_or_else(|| {
        StructureError::malformed(AddressRange::at(head_start), "pushenv without a block")
    })?;

    let tail_ok = match block_insts(ctx, tail) {
        [only] => only.opcode == Opcode::PopEnv && only.branch_target() == Some(head_start),
        _ => false,
    };
    if !tail_ok {
        return Err(StructureError::malformed(
            ctx.graph[tail].range(),
            "back-edge matches no loop shape: pushenv target is not `popenv` to the body",
        ));
    }

    let cont = ctx.graph[tail].start;
    if let Some(stub) = switch_continue(ctx, claims, fragment, head_start, cont) {
        return Err(StructureError::unsupported(
            ctx.graph[stub].range(),
            "`continue` from a switch inside a `with` loop",
        ));
    }

    let mut end = ctx.graph[tail].end;
    let mut exit = next_block(ctx, tail);
    let mut breaks = vec![end];
    let mut break_block = None;

    if ctx.settings.has(Features::WITH_BREAK_BLOCKS) {
        if let Some((jump, drop, target)) = drop_idiom(ctx, tail) {
            // `b END` is the normal exit; breaks leave through `popenv <drop>`.
            pop_if(&mut ctx.graph, jump, Opcode::B);
            ctx.graph.clear_successors(jump);
            breaks = vec![ctx.graph[drop].start, target];
            break_block = Some(drop);
            end = target;
            exit = ctx.blocks.iter().copied().find(|&b| ctx.graph[b].start == target);
        }
    }

    pop_if(&mut ctx.graph, prelude, Opcode::PushEnv);
    if let Some(&skip) = ctx.graph[prelude].successors.get(1) {
        ctx.graph.remove_edge(prelude, skip);
    }
    pop_if(&mut ctx.graph, tail, Opcode::PopEnv);
    ctx.graph.clear_successors(tail);

    convert_jumps(ctx, claims, fragment, head_start, end, &breaks, &[cont])?;

    if let Some(drop) = break_block {
        if let Some(b) = ctx.graph.block_mut(drop) {
            b.instructions.clear();
        }
        ctx.graph.clear_successors(drop);
        for pred in ctx.graph[drop].predecessors.clone() {
            ctx.graph.remove_all_edges(pred, drop);
        }
    }

    let body = if head == tail { None } else { Some(head_top) };
    Ok(Shaped { kind: LoopKind::With { break_block }, body, exit, end })
}

/// A block inside a switch nested in the loop that jumps to `cont`. The
/// switched value would still be on the stack when the environment pops.
fn switch_continue(
    ctx: &DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    start: usize,
    cont: usize,
) -> Option<NodeId> {
    ctx.fragment_blocks(fragment).into_iter().find(|&b| {
        let source = ctx.graph[b].start;
        let in_switch = claims
            .switches
            .iter()
            .any(|s| s.fragment == fragment && s.start >= start && s.contains(source));
        in_switch
            && ctx.graph[b]
                .last_instruction()
                .is_some_and(|i| i.is_unconditional_branch() && i.branch_target() == Some(cont))
    })
}

/// `tail` followed by `[b END]` and `[popenv <drop>]`.
fn drop_idiom(ctx: &DecompileContext<'_>, tail: NodeId) -> Option<(NodeId, NodeId, usize)> {
    let jump = next_block(ctx, tail)?;
    let drop = next_block(ctx, jump)?;
    let target = match block_insts(ctx, jump) {
        [b] if b.opcode == Opcode::B => b.branch_target()?,
        _ => return None,
    };
    let is_drop = matches!(
        block_insts(ctx, drop),
        [p] if p.opcode == Opcode::PopEnv && p.operand == Operand::PopEnvExit
    );
    (is_drop && target >= ctx.graph[drop].end).then_some((jump, drop, target))
}

/// Rewrite the `b` jumps of the raw blocks in `[start, end)` whose role is
/// now known.
fn convert_jumps(
    ctx: &mut DecompileContext<'_>,
    claims: &Claims,
    fragment: NodeId,
    start: usize,
    end: usize,
    breaks: &[usize],
    continues: &[usize],
) -> Result<(), StructureError> {
    let function_end = ctx.graph[fragment].end;
    let in_range: Vec<NodeId> = ctx
        .fragment_blocks(fragment)
        .into_iter()
        .filter(|&b| (start..end).contains(&ctx.graph[b].start))
        .collect();

    for &block in &in_range {
        let Some(target) = ctx.graph[block]
            .last_instruction()
            .filter(|i| i.opcode == Opcode::B)
            .and_then(Instruction::branch_target)
        else {
            continue;
        };
        let source = ctx.graph[block].start;

        if claims.is_switch_exit(source, target) {
            continue;
        }
        let sentinel = if breaks.contains(&target) {
            Sentinel::Break
        } else if continues.contains(&target) {
            if skips_else(ctx, &in_range, block, target) {
                continue;
            }
            Sentinel::Continue
        } else if target == function_end {
            Sentinel::Return
        } else if target < start || target >= end {
            return Err(StructureError::unsupported(
                ctx.graph[block].range(),
                format!("jump to {target:#x} leaves the loop at {}", AddressRange::new(start, end)),
            ));
        } else {
            continue;
        };
        log::trace!("{source:#x}: b {target:#x} -> {sentinel:?}");
        replace_jump(&mut ctx.graph, block, sentinel);
    }
    Ok(())
}

/// The jump ends the `then` arm of an if/else (an earlier `bf` targets the
/// address right after it) and lands past the `else` arm.
fn skips_else(ctx: &DecompileContext<'_>, in_range: &[NodeId], block: NodeId, target: usize) -> bool {
    let node = &ctx.graph[block];
    target > node.end
        && in_range.iter().any(|&k| {
            ctx.graph[k].start < node.start
                && ctx.graph[k]
                    .last_instruction()
                    .is_some_and(|i| i.opcode == Opcode::Bf && i.branch_target() == Some(node.end))
        })
}

fn block_insts<'g>(ctx: &'g DecompileContext<'_>, id: NodeId) -> &'g [Instruction] {
    ctx.graph[id]
        .as_block()
        .map(|b| b.instructions.as_slice())
        .unwrap_or_default()
}

fn is_empty_block(ctx: &DecompileContext<'_>, id: NodeId) -> bool {
    block_insts(ctx, id).is_empty()
}

fn truncate(ctx: &mut DecompileContext<'_>, id: NodeId, count: usize) {
    if let Some(b) = ctx.graph.block_mut(id) {
        let keep = b.instructions.len().saturating_sub(count);
        b.instructions.truncate(keep);
    }
}

fn next_block(ctx: &DecompileContext<'_>, id: NodeId) -> Option<NodeId> {
    let index = ctx.graph[id].as_block()?.index;
    ctx.blocks.get(index + 1).copied()
}

fn prev_block(ctx: &DecompileContext<'_>, id: NodeId) -> Option<NodeId> {
    let index = ctx.graph[id].as_block()?.index;
    ctx.blocks.get(index.checked_sub(1)?).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_util::{assemble, block, kind_name, run_passes};
    use crate::passes::{BlockBuilder, FragmentFinder, SwitchLocate};

    fn the_loop(ctx: &DecompileContext<'_>, index: usize) -> Loop {
        match &ctx.graph[ctx.loops[index]].kind {
            NodeKind::Loop(l) => *l,
            other => panic!("not a loop: {}", other.name()),
        }
    }

    const PASSES: [&dyn Pass; 4] = [&BlockBuilder, &FragmentFinder, &SwitchLocate, &LoopFinder];

    #[test]
    fn while_loop_collapses_head_and_tail() {
        let code = assemble(
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
        let ctx = run_passes(&code, &PASSES);
        assert_eq!(ctx.loops.len(), 1);
        let l = the_loop(&ctx, 0);
        let node = ctx.loops[0];
        assert_eq!(l.head, block(&ctx, 0));
        assert_eq!(l.tail, block(&ctx, 16));
        assert_eq!(l.body, Some(block(&ctx, 16)));
        assert!(ctx.graph[l.head].predecessors.is_empty());
        assert!(ctx.graph[l.after].successors.is_empty());
        assert_eq!(ctx.graph[node].successors, vec![block(&ctx, 32)]);
        assert!(matches!(
            l.kind,
            LoopKind::While { must_be_while_loop: true, for_loop_incrementor: None }
        ));
        assert_eq!(ctx.fragment(ctx.root.unwrap()).unwrap().entry, Some(node));
    }

    #[test]
    fn separable_tail_is_a_for_incrementor() {
        // for (i = 0; i < 10; i++) { if (a) { step(); } }
        let code = assemble(
            "pushi.e 0\n\
             pop.v.i self.i\n\
             :[head]\n\
             push.v self.i\n\
             pushi.e 10\n\
             cmp.i.v LT\n\
             bf [end]\n\
             push.v self.a\n\
             conv.v.b\n\
             bf [inc]\n\
             call.i step(0)\n\
             popz.v\n\
             :[inc]\n\
             push.v self.i\n\
             pushi.e 1\n\
             add.i.v\n\
             pop.v.v self.i\n\
             b [head]\n\
             :[end]\n\
             exit.i",
        );
        let ctx = run_passes(&code, &PASSES);
        let l = the_loop(&ctx, 0);
        match l.kind {
            LoopKind::While { must_be_while_loop, for_loop_incrementor } => {
                assert!(!must_be_while_loop);
                assert_eq!(for_loop_incrementor, Some(l.tail));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn continue_to_head_forces_while() {
        let code = assemble(
            ":[head]\n\
             push.v self.a\n\
             conv.v.b\n\
             bf [end]\n\
             push.v self.b\n\
             conv.v.b\n\
             bf [inc]\n\
             b [head]\n\
             :[inc]\n\
             push.v self.i\n\
             pushi.e 1\n\
             add.i.v\n\
             pop.v.v self.i\n\
             b [head]\n\
             :[end]\n\
             exit.i",
        );
        let ctx = run_passes(&code, &PASSES);
        let l = the_loop(&ctx, 0);
        assert!(matches!(
            l.kind,
            LoopKind::While { must_be_while_loop: true, for_loop_incrementor: None }
        ));
        let cont = ctx.graph[block(&ctx, 16)].successors[0];
        assert_eq!(kind_name(&ctx, cont), "continue");
    }

    #[test]
    fn do_until_on_a_single_block() {
        let code = assemble(
            ":[top]\n\
             call.i step(0)\n\
             popz.v\n\
             push.v self.done\n\
             conv.v.b\n\
             bf [top]\n\
             exit.i",
        );
        let ctx = run_passes(&code, &PASSES);
        let l = the_loop(&ctx, 0);
        assert_eq!(kind_name(&ctx, ctx.loops[0]), "do-until");
        assert_eq!(l.head, l.tail);
        assert_eq!(l.body, Some(l.head));
        assert!(ctx.graph[l.head].is_detached());
    }

    #[test]
    fn with_loop_break_uses_the_drop_block() {
        let code = assemble(
            "pushi.e -1\n\
             pushenv [tail]\n\
             :[body]\n\
             push.v self.a\n\
             conv.v.b\n\
             bf [next]\n\
             b [brk]\n\
             :[next]\n\
             call.i step(0)\n\
             popz.v\n\
             :[tail]\n\
             popenv [body]\n\
             b [end]\n\
             :[brk]\n\
             popenv <drop>\n\
             :[end]\n\
             exit.i",
        );
        let ctx = run_passes(&code, &PASSES);
        let l = the_loop(&ctx, 0);
        let node = ctx.loops[0];
        match l.kind {
            LoopKind::With { break_block } => assert_eq!(break_block, Some(block(&ctx, 48))),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ctx.graph[node].end, 52);
        assert_eq!(ctx.graph[node].successors, vec![block(&ctx, 52)]);
        let brk = ctx.graph[block(&ctx, 8)].successors[0];
        assert_eq!(kind_name(&ctx, brk), "break");
    }

    #[test]
    fn continue_from_switch_in_with_is_unsupported() {
        let code = assemble(
            "pushi.e -1\n\
             pushenv [tail]\n\
             :[body]\n\
             push.v self.a\n\
             dup.v 0\n\
             pushi.e 1\n\
             cmp.i.v EQ\n\
             bt [c1]\n\
             b [end]\n\
             :[c1]\n\
             b [tail]\n\
             :[end]\n\
             popz.v\n\
             :[tail]\n\
             popenv [body]\n\
             exit.i",
        );
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        let mut claims = Claims::default();
        SwitchLocate.apply(&mut ctx, &mut claims).unwrap();
        let err = LoopFinder.apply(&mut ctx, &mut claims).unwrap_err();
        assert!(matches!(err, StructureError::Unsupported { .. }));
        assert_eq!(err.range().map(|r| r.start), Some(36));
    }

    #[test]
    fn broken_repeat_is_malformed() {
        let code = assemble(
            "pushi.e 3\n\
             :[top]\n\
             call.i step(0)\n\
             popz.v\n\
             push.v self.x\n\
             conv.v.b\n\
             bt [top]\n\
             exit.i",
        );
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        let err = LoopFinder.apply(&mut ctx, &mut Claims::default()).unwrap_err();
        assert!(matches!(err, StructureError::Malformed { .. }));
        assert!(err.to_string().contains("no loop shape"));
    }
}
