use thiserror::Error;

/// Errors raised while generating or finalizing matcher code.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("label {0} is referenced but never bound")]
    UnboundLabel(u32),

    #[error("label {0} is bound more than once")]
    LabelRebound(u32),

    #[error("program label {0} is out of range")]
    UnknownLabel(u32),

    #[error("register {0} exceeds the supported maximum")]
    RegisterOutOfRange(usize),

    #[error("relocation safety violation: {0}")]
    RelocationSafetyViolation(String),

    #[error("code generation was aborted")]
    Aborted,

    #[error("code has already been finalized")]
    AlreadyFinalized,

    #[error("no native regexp backend for this host architecture")]
    UnsupportedArchitecture,

    #[error("executable memory: {0}")]
    Io(#[from] std::io::Error),
}
