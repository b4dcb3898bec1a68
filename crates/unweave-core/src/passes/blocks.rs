use std::collections::BTreeSet;

use unweave_bytecode::bytecode::Instruction;

use crate::context::DecompileContext;
use crate::error::{AddressRange, StructureError};
use crate::graph::{Block, NodeKind};
use crate::pipeline::{Pass, PassResult};

use super::{block_at, Claims};

/// Splits the instruction stream into basic blocks and links them.
///
/// Cut points are the entry, every branch target, the instruction after every
/// branch or return, and every nested function entry. A trailing empty block
/// always sits at `code.length` so that jumps to the end have a target.
///
/// Conditional branches (`bt`, `bf`, `pushenv`, `popenv`) get two successors,
/// fallthrough first and target second. `popenv <drop>` is not a branch.
pub struct BlockBuilder;

impl Pass for BlockBuilder {
    fn name(&self) -> &'static str {
        "blocks"
    }

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        _claims: &mut Claims,
    ) -> Result<PassResult, StructureError> {
        if !ctx.blocks.is_empty() {
            return Ok(PassResult { changed: false });
        }
        let code = ctx.code;

        let mut cuts = BTreeSet::from([0, code.length]);
        for inst in &code.instructions {
            if let Some(target) = inst.branch_target() {
                if !code.is_boundary(target) {
                    return Err(StructureError::malformed(
                        AddressRange::new(inst.address, inst.next_address()),
                        format!(
                            "`{}` targets {target:#x}, which is not an instruction in 0x0..{:#x}",
                            inst.opcode.mnemonic(),
                            code.length
                        ),
                    ));
                }
                cuts.insert(target);
                cuts.insert(inst.next_address());
            } else if inst.is_return() {
                cuts.insert(inst.next_address());
            }
        }
        for child in &code.children {
            if child.start == 0 {
                continue;
            }
            if !code.is_boundary(child.start) {
                return Err(StructureError::malformed(
                    AddressRange::at(child.start),
                    format!("function `{}` does not start on an instruction", child.name),
                ));
            }
            cuts.insert(child.start);
        }

        let cuts: Vec<usize> = cuts.into_iter().collect();
        let mut insts = code.instructions.iter().peekable();
        for (index, &start) in cuts.iter().enumerate() {
            let end = cuts.get(index + 1).copied().unwrap_or(start);
            let mut instructions = Vec::new();
            while let Some(inst) = insts.next_if(|i| i.address < end) {
                instructions.push(inst.clone());
            }
            let block = Block { index, instructions };
            let id = ctx.graph.add_node(NodeKind::Block(block), start, end, None);
            ctx.blocks.push(id);
        }

        for index in 0..ctx.blocks.len() {
            let id = ctx.blocks[index];
            let next = ctx.blocks.get(index + 1).copied();
            let last = ctx.graph[id].last_instruction();
            let target = last.and_then(Instruction::branch_target);
            let fallthrough = match last {
                Some(i) if i.is_unconditional_branch() || i.is_return() => None,
                _ => next,
            };

            if let Some(next) = fallthrough {
                ctx.graph.add_edge(id, next);
            }
            if let Some(target) = target {
                let Some(t) = block_at(&ctx.graph, &ctx.blocks, target) else {
                    return Err(StructureError::malformed(
                        ctx.graph[id].range(),
                        format!("no block starts at branch target {target:#x}"),
                    ));
                };
                ctx.graph.add_edge(id, ctx.blocks[t]);
            }
        }

        log::trace!("{}: {} blocks", code.name, ctx.blocks.len());
        Ok(PassResult { changed: true })
    }
}
