use std::collections::HashSet;

use unweave_bytecode::bytecode::{ComparisonKind, Instruction, Opcode};

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{Graph, NodeId, NodeKind, Switch};
use crate::pipeline::{Pass, PassResult};

use super::{block_at, pop_if, Claims, SwitchLocation};

/// Records switch dispatch chains before any other pass can mistake their
/// comparisons for conditionals.
///
/// ```text
/// <value>; dup; push 1; cmp EQ; bt [case1]   <- cases block, first compare
///          dup; push 2; cmp EQ; bt [case2]   <- compare
///          b [default or end]                <- jump block
/// ...
/// :[end] popz                                <- end block
/// ```
///
/// Only claims are written. The graph is left untouched.
pub struct SwitchLocate;

impl Pass for SwitchLocate {
    fn name(&self) -> &'static str {
        "switch-locate"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        let mut chains = Vec::new();
        for &fragment in &ctx.fragments {
            chains.extend(find_chains(&ctx.graph, fragment, &ctx.fragment_blocks(fragment))?);
        }
        // Innermost first: a nested switch claims its exit before the
        // enclosing one looks for its own.
        chains.sort_by_key(|c| std::cmp::Reverse(ctx.graph[c.cases_block].start));

        let mut ends = HashSet::new();
        for chain in chains {
            let location = locate_end(ctx, chain, &ends)?;
            log::debug!(
                "{}: switch with {} comparison(s) at {}",
                ctx.code.name,
                location.compare_blocks.len(),
                AddressRange::new(location.start, location.end)
            );
            ends.insert(location.end_block);
            claims.switch_blocks.extend(location.compare_blocks.iter().copied());
            claims.switch_blocks.insert(location.jump_block);
            claims.switches.push(location);
        }
        Ok(PassResult { changed: !claims.switches.is_empty() })
    }
}

struct Chain {
    fragment: NodeId,
    cases_block: NodeId,
    compare_blocks: Vec<NodeId>,
    jump_block: NodeId,
}

fn insts(graph: &Graph, id: NodeId) -> &[Instruction] {
    graph[id].as_block().map(|b| b.instructions.as_slice()).unwrap_or_default()
}

/// Target of a block ending in `cmp EQ; bt`.
fn case_target(graph: &Graph, id: NodeId) -> Option<usize> {
    match insts(graph, id) {
        [.., cmp, bt] if cmp.is_comparison(ComparisonKind::Equal) && bt.opcode == Opcode::Bt => {
            bt.branch_target()
        }
        _ => None,
    }
}

fn find_chains(graph: &Graph, fragment: NodeId, blocks: &[NodeId]) -> Result<Vec<Chain>, StructureError> {
    let mut out = Vec::new();
    for (i, &jump) in blocks.iter().enumerate() {
        let lone_jump = matches!(insts(graph, jump), [b] if b.opcode == Opcode::B);
        let jump_start = graph[jump].start;
        let is_case = |id: NodeId| case_target(graph, id).is_some_and(|t| t > jump_start);
        if !lone_jump || i == 0 || !is_case(blocks[i - 1]) {
            continue;
        }

        let mut compare_blocks = Vec::new();
        let mut cur = i - 1;
        let cases_block = loop {
            compare_blocks.push(blocks[cur]);
            // A non-constant label puts blocks between the `dup` and its `cmp`.
            let mut dup = cur;
            while !insts(graph, blocks[dup]).iter().any(|inst| inst.opcode == Opcode::Dup) {
                let inconsistent = dup == 0 || (dup < cur && case_target(graph, blocks[dup]).is_some());
                if inconsistent {
                    return Err(StructureError::malformed(
                        graph[blocks[cur]].range(),
                        "switch comparison without a duplicated value",
                    ));
                }
                dup -= 1;
            }
            match dup.checked_sub(1) {
                Some(prev) if is_case(blocks[prev]) => cur = prev,
                _ => break blocks[dup],
            }
        };
        compare_blocks.reverse();
        out.push(Chain { fragment, cases_block, compare_blocks, jump_block: jump });
    }
    Ok(out)
}

/// Find the `popz` that ends the switch and check every destination lies
/// before it.
fn locate_end(
    ctx: &DecompileContext<'_>,
    chain: Chain,
    claimed_ends: &HashSet<NodeId>,
) -> Result<SwitchLocation, StructureError> {
    let graph = &ctx.graph;
    let blocks = ctx.fragment_blocks(chain.fragment);
    let start = graph[chain.cases_block].start;

    let dests: Vec<usize> = chain
        .compare_blocks
        .iter()
        .filter_map(|&c| case_target(graph, c))
        .chain(graph[chain.jump_block].last_instruction().and_then(Instruction::branch_target))
        .collect();
    let furthest = dests.iter().copied().max().unwrap_or(start);

    let repeat_tail = |id: NodeId| {
        graph[id]
            .last_instruction()
            .is_some_and(|i| i.opcode == Opcode::Bt && i.branch_target().is_some_and(|t| t <= graph[id].start))
    };
    let from = block_at(graph, &blocks, furthest).unwrap_or(blocks.len());
    let end_block = (from..blocks.len())
        .find(|&i| {
            let id = blocks[i];
            insts(graph, id).first().is_some_and(|inst| inst.opcode == Opcode::Popz)
                && !claimed_ends.contains(&id)
                && !(i > 0 && repeat_tail(blocks[i - 1]))
        })
        .map(|i| blocks[i])
        .ok_or_else(|| {
            StructureError::malformed(
                AddressRange::new(start, graph[chain.jump_block].end),
                "switch without a `popz` exit",
            )
        })?;

    let end = graph[end_block].start;
    if let Some(bad) = dests.iter().find(|&&d| d > end) {
        return Err(StructureError::malformed(
            AddressRange::new(start, end),
            format!("switch case at {bad:#x} lies past the exit"),
        ));
    }

    Ok(SwitchLocation {
        fragment: chain.fragment,
        cases_block: chain.cases_block,
        compare_blocks: chain.compare_blocks,
        jump_block: chain.jump_block,
        end_block,
        start,
        end,
    })
}

/// Materializes each located switch once everything inside it is structured.
///
/// Each comparison's taken edge becomes a `CaseJump`, and each destination
/// gets a chain of `CaseDestination` labels (cases in dispatch order, then
/// default). Labels that land directly on the exit form
/// `end_case_destinations`. Top-level breaks lead to the next label group.
pub struct SwitchInsert;

impl Pass for SwitchInsert {
    fn name(&self) -> &'static str {
        "switch-insert"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        let locations = std::mem::take(&mut claims.switches);
        let changed = !locations.is_empty();
        for location in &locations {
            insert(ctx, location)?;
        }
        Ok(PassResult { changed })
    }
}

/// One destination node and the labels that lead to it.
struct Group {
    target: NodeId,
    defaults: Vec<bool>,
}

fn insert(ctx: &mut DecompileContext<'_>, loc: &SwitchLocation) -> Result<(), StructureError> {
    let range = AddressRange::new(loc.start, loc.end);
    let graph = &mut ctx.graph;
    let level = graph[loc.jump_block].parent;
    if loc.compare_blocks.iter().any(|&c| graph[c].parent != level) {
        return Err(StructureError::unsupported(range, "switch dispatch is split across structures"));
    }
    let cases = graph.climb(loc.cases_block, level).ok_or_else(|| {
        StructureError::unsupported(range, "switch value is computed inside another structure")
    })?;
    let exit = graph.climb(loc.end_block, level);

    let sw = graph.add_node(
        NodeKind::Switch(Switch { cases, body: None, end_case_destinations: None }),
        loc.start,
        loc.end,
        level,
    );

    let mut groups: Vec<Group> = Vec::new();
    let mut add_dest = |target: NodeId, is_default: bool| {
        match groups.iter_mut().find(|g| g.target == target) {
            Some(g) => g.defaults.push(is_default),
            None => groups.push(Group { target, defaults: vec![is_default] }),
        }
    };

    let last = loc.compare_blocks.len().saturating_sub(1);
    for (i, &compare) in loc.compare_blocks.iter().enumerate() {
        let (next, dest) = match graph[compare].successors.as_slice() {
            &[next, dest] => (next, dest),
            _ => {
                return Err(StructureError::malformed(
                    graph[compare].range(),
                    "switch comparison lost its branch",
                ))
            }
        };
        let at = graph[compare].end;
        pop_if(graph, compare, Opcode::Bt);
        graph.clear_successors(compare);
        add_dest(dest, false);

        let jump = graph.add_node(NodeKind::CaseJump, at, at, Some(sw));
        graph.add_edge(compare, jump);
        if i < last {
            graph.add_edge(jump, next);
        }
    }

    let default = graph[loc.jump_block].successors.first().copied();
    let default_addr = graph[loc.jump_block]
        .last_instruction()
        .and_then(Instruction::branch_target);
    pop_if(graph, loc.jump_block, Opcode::B);
    graph.clear_successors(loc.jump_block);
    if let (Some(target), Some(addr)) = (default, default_addr) {
        if addr != loc.end {
            add_dest(target, true);
        }
    }

    groups.sort_by_key(|g| graph[g.target].start);
    let mut heads: Vec<(usize, NodeId)> = Vec::new();
    let mut body = None;
    let mut end_chain: Option<(NodeId, NodeId)> = None;
    for group in &groups {
        let at = graph[group.target].start;
        let labels: Vec<NodeId> = group
            .defaults
            .iter()
            .map(|&is_default| graph.add_node(NodeKind::CaseDestination { is_default }, at, at, Some(sw)))
            .collect();
        for pair in labels.windows(2) {
            graph.add_edge(pair[0], pair[1]);
        }
        let (first, last) = (labels[0], labels[labels.len() - 1]);

        if at >= loc.end {
            // Trailing labels with nothing to run.
            end_chain = Some(match end_chain {
                Some((head, tail)) => {
                    graph.add_edge(tail, first);
                    (head, last)
                }
                None => (first, last),
            });
        } else {
            graph.move_predecessors(group.target, first);
            graph.add_edge(last, group.target);
            body.get_or_insert(first);
        }
        heads.push((at, first));
    }
    let end_head = end_chain.map(|(head, _)| head);

    let breaks: Vec<NodeId> = graph
        .iter()
        .map(|(id, _)| id)
        .filter(|&id| {
            let n = &graph[id];
            matches!(n.kind, NodeKind::Break) && n.parent == level && loc.contains(n.start)
        })
        .collect();
    for brk in breaks {
        let from = graph[brk].start;
        if let Some(&(_, head)) = heads.iter().find(|(at, _)| *at > from) {
            graph.add_edge(brk, head);
        }
    }

    if let Some(exit) = exit {
        let inside: Vec<NodeId> = graph[exit]
            .predecessors
            .iter()
            .copied()
            .filter(|&p| graph[p].parent == level && loc.contains(graph[p].start))
            .collect();
        for pred in inside {
            graph.remove_edge(pred, exit);
            if let Some(head) = end_head {
                graph.add_edge(pred, head);
            }
        }
    }

    if let Some(b) = graph.block_mut(loc.end_block) {
        if b.instructions.first().map(|i| i.opcode) == Some(Opcode::Popz) {
            b.instructions.remove(0);
        }
    }
    if let NodeKind::Switch(s) = &mut graph[sw].kind {
        s.body = body;
        s.end_case_destinations = end_head;
    }

    graph.substitute(cases, sw);
    if let Some(exit) = exit {
        graph.add_edge(sw, exit);
    }
    graph.absorb(sw, level, loc.start, loc.end);
    graph.ensure_closed(sw)?;

    log::debug!("{}: switch at {range} with {} destination(s)", ctx.code.name, groups.len());
    ctx.switches.push(sw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_util::{assemble, block, kind_name, run_passes};
    use crate::passes::{BinaryBranchFinder, BlockBuilder, FragmentFinder, LoopFinder};

    const TWO_BREAKS: &str = "\
        push.v self.a\n\
        dup.v 0\n\
        pushi.e 1\n\
        cmp.i.v EQ\n\
        bt [c1]\n\
        dup.v 0\n\
        pushi.e 2\n\
        cmp.i.v EQ\n\
        bt [c2]\n\
        b [end]\n\
        :[c1]\n\
        b [end]\n\
        :[c2]\n\
        b [end]\n\
        :[end]\n\
        popz.v\n\
        exit.i";

    #[test]
    fn locate_records_chain_without_editing_edges() {
        let code = assemble(TWO_BREAKS);
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        let edges_before: Vec<_> = ctx.blocks.iter().map(|&b| ctx.graph[b].successors.clone()).collect();
        let mut claims = Claims::default();
        assert!(SwitchLocate.apply(&mut ctx, &mut claims).unwrap().changed);

        let loc = &claims.switches[0];
        assert_eq!(loc.cases_block, block(&ctx, 0));
        assert_eq!(loc.compare_blocks, vec![block(&ctx, 0), block(&ctx, 24)]);
        assert_eq!(loc.jump_block, block(&ctx, 40));
        assert_eq!(loc.end_block, block(&ctx, 52));
        assert_eq!((loc.start, loc.end), (0, 52));
        assert!(claims.is_claimed(block(&ctx, 24)));

        let edges_after: Vec<_> = ctx.blocks.iter().map(|&b| ctx.graph[b].successors.clone()).collect();
        assert_eq!(edges_before, edges_after);
    }

    #[test]
    fn breaks_chain_through_case_destinations() {
        let code = assemble(TWO_BREAKS);
        let ctx = run_passes(
            &code,
            &[&BlockBuilder, &FragmentFinder, &SwitchLocate, &LoopFinder, &BinaryBranchFinder, &SwitchInsert],
        );
        assert_eq!(ctx.switches.len(), 1);
        let sw = ctx.switches[0];
        let NodeKind::Switch(s) = &ctx.graph[sw].kind else { unreachable!() };
        assert!(s.end_case_destinations.is_none());

        let cd1 = s.body.unwrap();
        assert_eq!(kind_name(&ctx, cd1), "case");
        let brk1 = ctx.graph[cd1].successors[0];
        assert_eq!(kind_name(&ctx, brk1), "break");
        let cd2 = ctx.graph[brk1].successors[0];
        assert_eq!(kind_name(&ctx, cd2), "case");
        let brk2 = ctx.graph[cd2].successors[0];
        assert_eq!(kind_name(&ctx, brk2), "break");
        assert!(ctx.graph[brk2].successors.is_empty());

        assert_eq!(ctx.graph[sw].successors, vec![block(&ctx, 52)]);
        assert!(ctx.graph[block(&ctx, 52)].as_block().unwrap().instructions[0].opcode != Opcode::Popz);
    }

    #[test]
    fn labels_without_code_are_end_destinations() {
        // switch (a) { case 1: case 2: }
        let code = assemble(
            "push.v self.a\n\
             dup.v 0\n\
             pushi.e 1\n\
             cmp.i.v EQ\n\
             bt [end]\n\
             dup.v 0\n\
             pushi.e 2\n\
             cmp.i.v EQ\n\
             bt [end]\n\
             b [end]\n\
             :[end]\n\
             popz.v\n\
             exit.i",
        );
        let ctx = run_passes(
            &code,
            &[&BlockBuilder, &FragmentFinder, &SwitchLocate, &LoopFinder, &BinaryBranchFinder, &SwitchInsert],
        );
        let NodeKind::Switch(s) = &ctx.graph[ctx.switches[0]].kind else { unreachable!() };
        assert!(s.body.is_none());
        let first = s.end_case_destinations.unwrap();
        let second = ctx.graph[first].successors[0];
        assert_eq!(kind_name(&ctx, second), "case");
        assert!(ctx.graph[second].successors.is_empty());
    }

    #[test]
    fn repeat_exit_is_not_a_switch_end() {
        // switch (a) { case 1: default: repeat (2) { } }
        let code = assemble(
            "push.v self.a\n\
             dup.v 0\n\
             pushi.e 1\n\
             cmp.i.v EQ\n\
             bt [dflt]\n\
             b [dflt]\n\
             :[dflt]\n\
             pushi.e 2\n\
             dup.i 0\n\
             pushi.e 0\n\
             cmp.i.i LTE\n\
             bt [rend]\n\
             :[rtop]\n\
             pushi.e 1\n\
             sub.i.i\n\
             dup.i 0\n\
             conv.i.b\n\
             bt [rtop]\n\
             :[rend]\n\
             popz.i\n\
             b [end]\n\
             :[end]\n\
             popz.v\n\
             exit.i",
        );
        let mut ctx = run_passes(&code, &[&BlockBuilder, &FragmentFinder]);
        let mut claims = Claims::default();
        SwitchLocate.apply(&mut ctx, &mut claims).unwrap();
        let end = claims.switches[0].end_block;
        assert_eq!(ctx.graph[end].start, 76);
    }
}
