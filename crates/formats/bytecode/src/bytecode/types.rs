/// Data type for instruction operands (4-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Double = 0x0,
    Float = 0x1,
    Int32 = 0x2,
    Int64 = 0x3,
    Bool = 0x4,
    Variable = 0x5,
    String = 0x6,
    // 0x7..0xE unused
    Int16 = 0xF,
}

impl DataType {
    /// Assembler suffix letter (`push.i`, `conv.v.b`, ...).
    pub fn suffix(self) -> char {
        match self {
            Self::Double => 'd',
            Self::Float => 'f',
            Self::Int32 => 'i',
            Self::Int64 => 'l',
            Self::Bool => 'b',
            Self::Variable => 'v',
            Self::String => 's',
            Self::Int16 => 'e',
        }
    }

    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            'd' => Some(Self::Double),
            'f' => Some(Self::Float),
            'i' => Some(Self::Int32),
            'l' => Some(Self::Int64),
            'b' => Some(Self::Bool),
            'v' => Some(Self::Variable),
            's' => Some(Self::String),
            'e' => Some(Self::Int16),
            _ => None,
        }
    }
}

/// Comparison kind for Cmp instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ComparisonKind {
    Less = 1,
    LessEqual = 2,
    Equal = 3,
    NotEqual = 4,
    GreaterEqual = 5,
    Greater = 6,
}

impl ComparisonKind {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Less => "LT",
            Self::LessEqual => "LTE",
            Self::Equal => "EQ",
            Self::NotEqual => "NEQ",
            Self::GreaterEqual => "GTE",
            Self::Greater => "GT",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        match s {
            "LT" => Some(Self::Less),
            "LTE" => Some(Self::LessEqual),
            "EQ" => Some(Self::Equal),
            "NEQ" => Some(Self::NotEqual),
            "GTE" => Some(Self::GreaterEqual),
            "GT" => Some(Self::Greater),
            _ => None,
        }
    }
}

/// Instance type for variable access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum InstanceType {
    /// Current instance (`self`).
    Own = -1,
    /// Other instance in collision event.
    Other = -2,
    /// All instances.
    All = -3,
    /// No instance (object reference follows).
    Noone = -4,
    /// Global scope.
    Global = -5,
    /// Built-in variable.
    Builtin = -6,
    /// Local scope.
    Local = -7,
    /// Stack-top instance (GMS2).
    Stacktop = -9,
    /// Static variable (GMS2.3+).
    Static = -15,
    /// Argument variable.
    Arg = -16,
}

impl InstanceType {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            -1 => Some(Self::Own),
            -2 => Some(Self::Other),
            -3 => Some(Self::All),
            -4 => Some(Self::Noone),
            -5 => Some(Self::Global),
            -6 => Some(Self::Builtin),
            -7 => Some(Self::Local),
            -9 => Some(Self::Stacktop),
            -15 => Some(Self::Static),
            -16 => Some(Self::Arg),
            _ => None,
        }
    }

    /// Scope prefix used by the assembler (`self.x`, `global.y`).
    pub fn scope_name(self) -> &'static str {
        match self {
            Self::Own => "self",
            Self::Other => "other",
            Self::All => "all",
            Self::Noone => "noone",
            Self::Global => "global",
            Self::Builtin => "builtin",
            Self::Local => "local",
            Self::Stacktop => "stacktop",
            Self::Static => "static",
            Self::Arg => "arg",
        }
    }

    pub fn from_scope_name(s: &str) -> Option<Self> {
        match s {
            "self" => Some(Self::Own),
            "other" => Some(Self::Other),
            "all" => Some(Self::All),
            "noone" => Some(Self::Noone),
            "global" => Some(Self::Global),
            "builtin" => Some(Self::Builtin),
            "local" => Some(Self::Local),
            "stacktop" => Some(Self::Stacktop),
            "static" => Some(Self::Static),
            "arg" => Some(Self::Arg),
            _ => None,
        }
    }
}

/// Variable reference in bytecode: an index into the entry's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub variable_id: u32,
}
