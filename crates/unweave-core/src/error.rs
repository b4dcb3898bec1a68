use std::fmt;

/// Half-open byte address range `[start, end)` within a code entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: usize,
    pub end: usize,
}

impl AddressRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn at(address: usize) -> Self {
        Self { start: address, end: address }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}..{:#x}", self.start, self.end)
    }
}

/// Structuring failure.
///
/// `Malformed` and `Unsupported` describe the input and abort the code entry.
/// `Invariant` means a pass left the graph in an inconsistent state, which is
/// a bug in the structurer rather than in the bytecode.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("malformed bytecode at {range}: {message}")]
    Malformed { range: AddressRange, message: String },

    #[error("unsupported control flow at {range}: {message}")]
    Unsupported { range: AddressRange, message: String },

    #[error("internal error after `{pass}`: {message}")]
    Invariant { pass: String, message: String },
}

impl StructureError {
    pub fn malformed(range: AddressRange, message: impl Into<String>) -> Self {
        Self::Malformed { range, message: message.into() }
    }

    pub fn unsupported(range: AddressRange, message: impl Into<String>) -> Self {
        Self::Unsupported { range, message: message.into() }
    }

    /// Whether this is a structurer bug rather than a property of the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Invariant { .. })
    }

    /// Address range of the offending region, when the error is about the input.
    pub fn range(&self) -> Option<AddressRange> {
        match self {
            Self::Malformed { range, .. } | Self::Unsupported { range, .. } => Some(*range),
            Self::Invariant { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StructureError>;
