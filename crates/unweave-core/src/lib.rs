pub mod context;
pub mod entity;
pub mod error;
pub mod graph;
pub mod passes;
pub mod pipeline;
pub mod tree;

pub use context::DecompileContext;
pub use error::{AddressRange, StructureError};
pub use graph::{Graph, Node, NodeId, NodeKind};
pub use pipeline::{decompile, DebugConfig, Pipeline, Settings};
