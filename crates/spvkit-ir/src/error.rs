//! Error types for the module IR.

/// Errors from module construction or invariant checking.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// A module-level invariant does not hold.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// An instruction appeared in a position the grammar does not allow.
    #[error("unexpected {opcode} {context}")]
    UnexpectedInstruction {
        opcode: &'static str,
        context: &'static str,
    },
}
