//! GameMaker VM instruction model.
//!
//! Provides the decoded instruction stream consumed by the control-flow
//! structurer, the bytecode-version capability flags that select between
//! compiler idioms, and a small text assembler used to write inputs by hand.

pub mod asm;
pub mod bytecode;
pub mod code;
pub mod error;
pub mod version;

pub use code::{ChildEntry, CodeEntry, SymbolTable};
pub use error::{Error, Result};
pub use version::{BytecodeVersion, Features};
