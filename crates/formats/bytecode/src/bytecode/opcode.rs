/// VM opcodes (GMS1.4+ numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Conv = 0x07,
    Mul = 0x08,
    Div = 0x09,
    Rem = 0x0A,
    Mod = 0x0B,
    Add = 0x0C,
    Sub = 0x0D,
    And = 0x0E,
    Or = 0x0F,
    Xor = 0x10,
    Neg = 0x11,
    Not = 0x12,
    Shl = 0x13,
    Shr = 0x14,
    Cmp = 0x15,
    Pop = 0x45,
    Dup = 0x86,
    Ret = 0x9C,
    Exit = 0x9D,
    Popz = 0x9E,
    B = 0xB6,
    Bt = 0xB7,
    Bf = 0xB8,
    PushEnv = 0xBA,
    PopEnv = 0xBB,
    Push = 0xC0,
    PushLoc = 0xC1,
    PushGlb = 0xC2,
    PushBltn = 0xC3,
    PushI = 0x84,
    Call = 0xD9,
    CallV = 0x99,
    Break = 0xFF,
}

const ALL: &[Opcode] = &[
    Opcode::Conv,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Rem,
    Opcode::Mod,
    Opcode::Add,
    Opcode::Sub,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Neg,
    Opcode::Not,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Cmp,
    Opcode::Pop,
    Opcode::Dup,
    Opcode::Ret,
    Opcode::Exit,
    Opcode::Popz,
    Opcode::B,
    Opcode::Bt,
    Opcode::Bf,
    Opcode::PushEnv,
    Opcode::PopEnv,
    Opcode::Push,
    Opcode::PushLoc,
    Opcode::PushGlb,
    Opcode::PushBltn,
    Opcode::PushI,
    Opcode::Call,
    Opcode::CallV,
    Opcode::Break,
];

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Conv => "conv",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Mod => "mod",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Neg => "neg",
            Self::Not => "not",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Cmp => "cmp",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Ret => "ret",
            Self::Exit => "exit",
            Self::Popz => "popz",
            Self::B => "b",
            Self::Bt => "bt",
            Self::Bf => "bf",
            Self::PushEnv => "pushenv",
            Self::PopEnv => "popenv",
            Self::Push => "push",
            Self::PushLoc => "pushloc",
            Self::PushGlb => "pushglb",
            Self::PushBltn => "pushbltn",
            Self::PushI => "pushi",
            Self::Call => "call",
            Self::CallV => "callv",
            Self::Break => "break",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        ALL.iter().copied().find(|op| op.mnemonic() == s)
    }

    /// Opcodes whose operand is a branch target.
    pub fn is_branch(self) -> bool {
        matches!(self, Self::B | Self::Bt | Self::Bf | Self::PushEnv | Self::PopEnv)
    }
}

/// Extended opcodes encoded as `break` with a signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ExtendedOp {
    /// Check array index bounds.
    ChkIndex = 0xFFFF,
    /// Push array element (multi-dimensional access).
    PushAf = 0xFFFE,
    /// Pop into array element.
    PopAf = 0xFFFD,
    /// Push array container.
    PushAc = 0xFFFC,
    /// Set array owner for copy-on-write.
    SetOwner = 0xFFFB,
    /// Push whether the enclosing function's statics are initialized.
    IsStaticOk = 0xFFFA,
    /// Mark the enclosing function's statics as initialized.
    SetStatic = 0xFFF9,
    SaveARef = 0xFFF8,
    RestoreARef = 0xFFF7,
    /// Push whether the top of stack is nullish.
    ChkNullish = 0xFFF6,
    /// Push an asset reference (carries an extra operand word).
    PushRef = 0xFFF5,
}

const ALL_EXTENDED: &[ExtendedOp] = &[
    ExtendedOp::ChkIndex,
    ExtendedOp::PushAf,
    ExtendedOp::PopAf,
    ExtendedOp::PushAc,
    ExtendedOp::SetOwner,
    ExtendedOp::IsStaticOk,
    ExtendedOp::SetStatic,
    ExtendedOp::SaveARef,
    ExtendedOp::RestoreARef,
    ExtendedOp::ChkNullish,
    ExtendedOp::PushRef,
];

impl ExtendedOp {
    pub fn from_u16(v: u16) -> Option<Self> {
        ALL_EXTENDED.iter().copied().find(|op| *op as u16 == v)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::ChkIndex => "chkindex",
            Self::PushAf => "pushaf",
            Self::PopAf => "popaf",
            Self::PushAc => "pushac",
            Self::SetOwner => "setowner",
            Self::IsStaticOk => "isstaticok",
            Self::SetStatic => "setstatic",
            Self::SaveARef => "savearef",
            Self::RestoreARef => "restorearef",
            Self::ChkNullish => "chknullish",
            Self::PushRef => "pushref",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        ALL_EXTENDED.iter().copied().find(|op| op.mnemonic() == s)
    }
}
