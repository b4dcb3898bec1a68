use bitflags::bitflags;

/// Bytecode format version as stored in the GEN8 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BytecodeVersion(pub u8);

impl BytecodeVersion {
    /// Version produced by GMS2.3 and later runtimes.
    pub const LATEST: Self = Self(17);

    /// Compiler idioms this version emits.
    pub fn features(self) -> Features {
        let mut features = Features::empty();
        if self.0 >= 15 {
            features |= Features::TYPED_BOOLEANS | Features::SHORT_CIRCUIT | Features::WITH_BREAK_BLOCKS;
        }
        if self.0 >= 17 {
            features |= Features::NESTED_FUNCTIONS | Features::STATIC_INIT;
        }
        features
    }
}

impl Default for BytecodeVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

bitflags! {
    /// Capability flags selecting between bytecode idioms for the same construct.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u32 {
        /// Repeat-loop counters are converted to bool before the back-branch.
        const TYPED_BOOLEANS = 1 << 0;
        /// `&&`/`||` compile to branch diamonds joined by a constant push.
        const SHORT_CIRCUIT = 1 << 1;
        /// `break` inside `with` exits through a `popenv` drop block.
        const WITH_BREAK_BLOCKS = 1 << 2;
        /// Function, constructor and struct bodies are embedded in their parent entry.
        const NESTED_FUNCTIONS = 1 << 3;
        /// Functions carry `static` initializer guards.
        const STATIC_INIT = 1 << 4;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn features_by_version() {
        assert!(BytecodeVersion(14).features().is_empty());
        let v16 = BytecodeVersion(16).features();
        assert!(v16.contains(Features::TYPED_BOOLEANS | Features::SHORT_CIRCUIT));
        assert!(!v16.contains(Features::NESTED_FUNCTIONS));
        assert_eq!(BytecodeVersion::LATEST.features(), Features::all());
    }
}
