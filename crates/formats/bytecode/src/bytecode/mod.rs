pub mod instruction;
pub mod opcode;
pub mod types;

pub use instruction::{Instruction, Operand};
pub use opcode::{ExtendedOp, Opcode};
pub use types::{ComparisonKind, DataType, InstanceType, VariableRef};
