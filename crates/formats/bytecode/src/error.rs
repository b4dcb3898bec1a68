/// Errors produced while assembling or validating a code entry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("line {line}: {message}")]
    Asm { line: usize, message: String },

    #[error("line {line}: unknown opcode `{mnemonic}`")]
    UnknownOpcode { line: usize, mnemonic: String },

    #[error("line {line}: undefined label `{label}`")]
    UndefinedLabel { line: usize, label: String },

    #[error("line {line}: label `{label}` defined twice")]
    DuplicateLabel { line: usize, label: String },
}

pub type Result<T> = std::result::Result<T, Error>;
