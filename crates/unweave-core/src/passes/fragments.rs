use unweave_bytecode::bytecode::Opcode;
use unweave_bytecode::Features;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{Fragment, NodeId, NodeKind};
use crate::pipeline::{Pass, PassResult};

use super::{pop_if, replace_jump, Claims, Sentinel};

/// Partitions the blocks into a tree of fragments, one per function body.
///
/// A nested body is skipped over in its parent by a `b` just before it. That
/// jump is replaced by a fragment node, so the parent's control flow runs
/// `prev -> fragment -> after-body`. Inside a nested body, a `b` that leaves
/// the body is a return and a fallthrough off its end is dropped.
pub struct FragmentFinder;

impl Pass for FragmentFinder {
    fn name(&self) -> &'static str {
        "fragments"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        _claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        if ctx.root.is_some() {
            return Ok(PassResult { changed: false });
        }
        let code = ctx.code;
        let nested = ctx.settings.has(Features::NESTED_FUNCTIONS);

        let root = ctx.graph.add_node(
            NodeKind::Fragment(Fragment { name: code.name.clone(), entry: None, blocks: Vec::new() }),
            0,
            code.length,
            None,
        );
        ctx.root = Some(root);
        ctx.fragments.push(root);

        let mut stack = vec![root];
        for index in 0..ctx.blocks.len() {
            let id = ctx.blocks[index];
            let start = ctx.graph[id].start;

            while stack.len() > 1 && start >= ctx.graph[stack[stack.len() - 1]].end {
                stack.pop();
            }
            let current = stack[stack.len() - 1];

            let child = code.children.iter().find(|c| c.start == start && c.start != 0);
            if let Some(child) = child.filter(|_| nested) {
                let prev = ctx.blocks[index - 1];
                let limit = ctx.graph[current].end;
                let skip = ctx.graph[prev]
                    .last_instruction()
                    .filter(|i| i.opcode == Opcode::B)
                    .and_then(|i| i.branch_target())
                    .filter(|&x| x > start && x <= limit);
                let Some(end) = skip else {
                    return Err(StructureError::malformed(
                        AddressRange::at(start),
                        format!("unterminated fragment: `{}` is not jumped over", child.name),
                    ));
                };

                // `prev` ends in `b`, so its only successor is the jump target.
                let after = ctx.graph[prev].successors.first().copied();
                pop_if(&mut ctx.graph, prev, Opcode::B);
                ctx.graph.clear_successors(prev);

                let fragment = ctx.graph.add_node(
                    NodeKind::Fragment(Fragment { name: child.name.clone(), entry: None, blocks: Vec::new() }),
                    start,
                    end,
                    Some(current),
                );
                ctx.graph.add_edge(prev, fragment);
                if let Some(after) = after {
                    ctx.graph.add_edge(fragment, after);
                }
                log::debug!("fragment `{}` at {}", child.name, AddressRange::new(start, end));
                ctx.fragments.push(fragment);
                stack.push(fragment);
            } else if let Some(child) = child {
                log::warn!("{}: `{}` treated as inline code", code.name, child.name);
            }

            let owner = stack[stack.len() - 1];
            ctx.graph[id].parent = Some(owner);
            if let NodeKind::Fragment(f) = &mut ctx.graph[owner].kind {
                f.entry.get_or_insert(id);
                f.blocks.push(id);
            }
        }

        // The trailing block at `code.length` closes every open fragment.
        if stack.len() > 1 {
            let open = stack[stack.len() - 1];
            return Err(StructureError::malformed(
                ctx.graph[open].range(),
                "unterminated fragment",
            ));
        }

        for &fragment in &ctx.fragments.clone() {
            confine(ctx, fragment, fragment == root)?;
        }
        Ok(PassResult { changed: true })
    }
}

/// Cut the edges that leave `fragment`.
fn confine(
    ctx: &mut DecompileContext<'_>,
    fragment: NodeId,
    is_root: bool,
) -> Result<(), StructureError> {
    for block in ctx.fragment_blocks(fragment) {
        let leaving: Vec<NodeId> = ctx.graph[block]
            .successors
            .iter()
            .copied()
            .filter(|&s| ctx.graph[s].parent != Some(fragment))
            .collect();
        if leaving.is_empty() {
            continue;
        }
        if is_root {
            return Err(StructureError::malformed(
                ctx.graph[block].range(),
                "jump into a nested function body",
            ));
        }

        let last = ctx.graph[block]
            .last_instruction()
            .map(|i| (i.is_unconditional_branch(), i.branch_target()));
        match last {
            Some((true, _)) => {
                replace_jump(&mut ctx.graph, block, Sentinel::Return);
            }
            Some((false, Some(target))) if leaving.iter().any(|&s| ctx.graph[s].start == target) => {
                return Err(StructureError::malformed(
                    ctx.graph[block].range(),
                    format!("conditional branch to {target:#x} leaves its function"),
                ));
            }
            _ => {
                for succ in leaving {
                    ctx.graph.remove_edge(block, succ);
                }
            }
        }
    }
    Ok(())
}
