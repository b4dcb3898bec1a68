use unweave_bytecode::CodeEntry;

use super::config::{DebugConfig, Settings};
use crate::context::DecompileContext;
use crate::error::StructureError;
use crate::graph::verify;
use crate::passes::{
    BinaryBranchFinder, BlockBuilder, Claims, FragmentFinder, LoopFinder, StaticInitFinder,
    SwitchInsert, SwitchLocate,
};
use crate::tree;

/// Result of applying a structuring pass.
#[derive(Debug)]
pub struct PassResult {
    /// Whether the pass modified the graph or the claims.
    pub changed: bool,
}

/// Output of the pipeline.
#[derive(Debug)]
pub struct PipelineOutput {
    /// `true` when the pipeline was stopped early by `dump_after`.
    pub stopped_early: bool,
    /// Names of the passes that reported changes, in order.
    pub changed: Vec<&'static str>,
}

/// A structuring pass over the whole context.
///
/// Passes rely on what earlier passes established (sentinels, claims, nested
/// structures already collapsed) and must run in [`VALID_PASS_NAMES`] order.
pub trait Pass {
    /// Name of this pass, as accepted by `dump_after`.
    fn name(&self) -> &'static str;

    fn apply(
        &self,
        ctx: &mut DecompileContext<'_>,
        claims: &mut Claims,
    ) -> Result<PassResult, StructureError>;
}

/// Valid pass names for `dump_after`, in pipeline order.
pub const VALID_PASS_NAMES: &[&str] = &[
    "blocks",
    "fragments",
    "switch-locate",
    "loops",
    "branches",
    "switch-insert",
    "static-init",
];

/// An ordered sequence of passes.
pub struct Pipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// All passes in their required order.
    pub fn standard() -> Self {
        let mut pipeline = Self::new();
        pipeline.add(Box::new(BlockBuilder));
        pipeline.add(Box::new(FragmentFinder));
        pipeline.add(Box::new(SwitchLocate));
        pipeline.add(Box::new(LoopFinder));
        pipeline.add(Box::new(BinaryBranchFinder));
        pipeline.add(Box::new(SwitchInsert));
        pipeline.add(Box::new(StaticInitFinder));
        pipeline
    }

    pub fn add(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn run(&self, ctx: &mut DecompileContext<'_>) -> Result<PipelineOutput, StructureError> {
        self.run_with_debug(ctx, &DebugConfig::default())
    }

    /// Run the pipeline, honouring debug configuration.
    ///
    /// With `debug.dump_after` set, the pipeline stops after the named pass,
    /// dumps the structure tree (filtered by `debug.function_filter`) and
    /// returns with `stopped_early = true`. The final no-remaining-jumps check
    /// only runs when the whole pipeline completes.
    pub fn run_with_debug(
        &self,
        ctx: &mut DecompileContext<'_>,
        debug: &DebugConfig,
    ) -> Result<PipelineOutput, StructureError> {
        let mut claims = Claims::default();
        let mut changed = Vec::new();

        for pass in &self.passes {
            let result = pass.apply(ctx, &mut claims)?;
            log::debug!(
                "[{}] {}: {}",
                pass.name(),
                ctx.code.name,
                if result.changed { "changed" } else { "no change" }
            );
            if result.changed {
                changed.push(pass.name());
            }

            if debug.verify_each_pass {
                verify::verify_edges(&ctx.graph).map_err(|message| StructureError::Invariant {
                    pass: pass.name().to_string(),
                    message,
                })?;
            }

            if debug.dump_after.as_deref() == Some(pass.name()) {
                dump_structure(ctx, pass.name(), debug);
                return Ok(PipelineOutput { stopped_early: true, changed });
            }
        }

        verify::ensure_no_remaining_jumps(&ctx.graph).map_err(|message| {
            StructureError::Invariant { pass: "final".to_string(), message }
        })?;

        Ok(PipelineOutput { stopped_early: false, changed })
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

fn dump_structure(ctx: &DecompileContext<'_>, pass: &str, debug: &DebugConfig) {
    if debug.should_dump(&ctx.code.name) {
        if let Some(root) = tree::build(ctx) {
            eprintln!("=== after {pass}: {} ===\n{root}=== end ===\n", ctx.code.name);
        }
    }
}

/// Structure one code entry with the standard pipeline.
pub fn decompile(code: &CodeEntry, settings: Settings) -> Result<DecompileContext<'_>, StructureError> {
    let mut ctx = DecompileContext::new(code, settings);
    Pipeline::standard().run(&mut ctx)?;
    Ok(ctx)
}
