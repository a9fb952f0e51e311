//! Errors raised by the core model.

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Configuration errors detected while building or rescheduling jobs.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The schedule expression could not be parsed.
    #[error("invalid schedule expression `{expression}`: {reason}")]
    InvalidSchedule {
        /// Expression as declared
        expression: String,
        /// Parser message
        reason: String,
    },

    /// The expression is valid but never fires again.
    #[error("schedule expression `{0}` has no upcoming trigger")]
    ExhaustedSchedule(String),

    /// A declared job definition is missing or has an invalid field.
    #[error("invalid job definition `{command}`: {reason}")]
    InvalidDefinition {
        /// Command of the offending definition
        command: String,
        /// What is wrong with it
        reason: String,
    },
}
