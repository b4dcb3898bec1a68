pub mod config;
pub mod pass;

pub use config::{DebugConfig, Settings, UnknownPass};
pub use pass::{decompile, Pass, PassResult, Pipeline, PipelineOutput, VALID_PASS_NAMES};
