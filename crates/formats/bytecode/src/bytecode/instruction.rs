use std::fmt;

use super::opcode::{ExtendedOp, Opcode};
use super::types::{ComparisonKind, DataType, InstanceType, VariableRef};
use crate::code::SymbolTable;

/// Decoded instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Float(f32),
    Bool(bool),
    /// Index into the string table.
    String(u32),
    Variable { var_ref: VariableRef, instance: i16 },
    Comparison(ComparisonKind),
    /// Absolute branch target address.
    Branch(usize),
    /// The stack-dropping exit form of `popenv`. Not a branch.
    PopEnvExit,
    Dup(u8),
    Call { function_id: u32, argc: u16 },
    Break { signal: u16, extra: Option<i32> },
}

impl Operand {
    /// Bytes the operand occupies after the 4-byte instruction word.
    pub fn extra_size(&self) -> usize {
        match self {
            Self::Int32(_)
            | Self::Float(_)
            | Self::Bool(_)
            | Self::String(_)
            | Self::Variable { .. }
            | Self::Call { .. } => 4,
            Self::Int64(_) | Self::Double(_) => 8,
            Self::Break { extra: Some(_), .. } => 4,
            Self::None
            | Self::Int16(_)
            | Self::Comparison(_)
            | Self::Branch(_)
            | Self::PopEnvExit
            | Self::Dup(_)
            | Self::Break { extra: None, .. } => 0,
        }
    }

    /// Integer value of a constant push operand.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int16(v) => Some(v as i64),
            Self::Int32(v) => Some(v as i64),
            Self::Int64(v) => Some(v),
            Self::Bool(v) => Some(v as i64),
            _ => None,
        }
    }
}

/// A single VM instruction at a fixed address.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub address: usize,
    pub opcode: Opcode,
    pub type1: DataType,
    pub type2: DataType,
    pub operand: Operand,
}

impl Instruction {
    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        4 + self.operand.extra_size()
    }

    /// Address of the instruction that follows this one.
    pub fn next_address(&self) -> usize {
        self.address + self.size()
    }

    /// Target address if this instruction transfers control.
    pub fn branch_target(&self) -> Option<usize> {
        match self.operand {
            Operand::Branch(target) if self.opcode.is_branch() => Some(target),
            _ => None,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.branch_target().is_some()
    }

    pub fn is_unconditional_branch(&self) -> bool {
        self.opcode == Opcode::B && self.is_branch()
    }

    /// Ends the function (`ret`/`exit`).
    pub fn is_return(&self) -> bool {
        matches!(self.opcode, Opcode::Ret | Opcode::Exit)
    }

    pub fn extended_op(&self) -> Option<ExtendedOp> {
        match self.operand {
            Operand::Break { signal, .. } if self.opcode == Opcode::Break => {
                ExtendedOp::from_u16(signal)
            }
            _ => None,
        }
    }

    pub fn is_comparison(&self, kind: ComparisonKind) -> bool {
        self.opcode == Opcode::Cmp && self.operand == Operand::Comparison(kind)
    }

    /// A push of a literal integer/boolean (`push.e 1`, `pushi.e 0`, `push.b true`).
    pub fn constant_int(&self) -> Option<i64> {
        if matches!(self.opcode, Opcode::Push | Opcode::PushI) {
            self.operand.as_int()
        } else {
            None
        }
    }

    /// Format with names resolved through `symbols`.
    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> InstructionDisplay<'a> {
        InstructionDisplay { inst: self, symbols: Some(symbols) }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        InstructionDisplay { inst: self, symbols: None }.fmt(f)
    }
}

pub struct InstructionDisplay<'a> {
    inst: &'a Instruction,
    symbols: Option<&'a SymbolTable>,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inst = self.inst;
        if let Some(ext) = inst.extended_op() {
            write!(f, "{}.{}", ext.mnemonic(), inst.type1.suffix())?;
            if let Operand::Break { extra: Some(v), .. } = inst.operand {
                write!(f, " {v}")?;
            }
            return Ok(());
        }

        write!(f, "{}", inst.opcode.mnemonic())?;
        if has_types(inst.opcode) {
            write!(f, ".{}", inst.type1.suffix())?;
            if has_second_type(inst.opcode) {
                write!(f, ".{}", inst.type2.suffix())?;
            }
        }

        match &inst.operand {
            Operand::None => Ok(()),
            Operand::Int16(v) => write!(f, " {v}"),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Double(v) => write!(f, " {v:?}"),
            Operand::Float(v) => write!(f, " {v:?}"),
            Operand::Bool(v) => write!(f, " {v}"),
            Operand::String(id) => match self.symbols.and_then(|s| s.strings.get(*id as usize)) {
                Some(s) => write!(f, " {s:?}"),
                None => write!(f, " str#{id}"),
            },
            Operand::Variable { var_ref, instance } => {
                let scope = InstanceType::from_i16(*instance)
                    .map(|i| i.scope_name().to_string())
                    .unwrap_or_else(|| instance.to_string());
                match self.symbols.and_then(|s| s.variables.get(var_ref.variable_id as usize)) {
                    Some(name) => write!(f, " {scope}.{name}"),
                    None => write!(f, " {scope}.var#{}", var_ref.variable_id),
                }
            }
            Operand::Comparison(kind) => write!(f, " {}", kind.mnemonic()),
            Operand::Branch(target) => write!(f, " {target:#x}"),
            Operand::PopEnvExit => write!(f, " <drop>"),
            Operand::Dup(n) => write!(f, " {n}"),
            Operand::Call { function_id, argc } => {
                match self.symbols.and_then(|s| s.functions.get(*function_id as usize)) {
                    Some(name) => write!(f, " {name}({argc})"),
                    None => write!(f, " func#{function_id}({argc})"),
                }
            }
            Operand::Break { signal, .. } => write!(f, " {signal:#x}"),
        }
    }
}

fn has_types(op: Opcode) -> bool {
    !matches!(op, Opcode::B | Opcode::Bt | Opcode::Bf | Opcode::PushEnv | Opcode::PopEnv)
}

/// Opcodes written with both type suffixes.
pub(crate) fn has_second_type(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Conv
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Mod
            | Opcode::Add
            | Opcode::Sub
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Cmp
            | Opcode::Pop
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(opcode: Opcode, operand: Operand) -> Instruction {
        Instruction {
            address: 0x10,
            opcode,
            type1: DataType::Int32,
            type2: DataType::Variable,
            operand,
        }
    }

    #[test]
    fn sizes() {
        assert_eq!(inst(Opcode::PushI, Operand::Int16(3)).size(), 4);
        assert_eq!(inst(Opcode::Push, Operand::Int32(3)).size(), 8);
        assert_eq!(inst(Opcode::Push, Operand::Double(1.5)).size(), 12);
        assert_eq!(inst(Opcode::B, Operand::Branch(0)).next_address(), 0x14);
    }

    #[test]
    fn popenv_exit_is_not_a_branch() {
        let drop = inst(Opcode::PopEnv, Operand::PopEnvExit);
        assert!(!drop.is_branch());
        let normal = inst(Opcode::PopEnv, Operand::Branch(0));
        assert!(normal.is_branch());
        assert!(!normal.is_unconditional_branch());
    }

    #[test]
    fn extended_ops_decode_from_break() {
        let i = inst(Opcode::Break, Operand::Break { signal: 0xFFFA, extra: None });
        assert_eq!(i.extended_op(), Some(ExtendedOp::IsStaticOk));
        assert_eq!(i.to_string(), "isstaticok.i");
    }

    #[test]
    fn display_without_symbols() {
        let cmp = inst(Opcode::Cmp, Operand::Comparison(ComparisonKind::Equal));
        assert_eq!(cmp.to_string(), "cmp.i.v EQ");
        assert_eq!(inst(Opcode::Bf, Operand::Branch(0x20)).to_string(), "bf 0x20");
    }
}
