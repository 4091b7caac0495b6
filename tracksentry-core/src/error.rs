//! Error types for configuration and persistence

use thiserror::Error;

/// Errors returned by the configuration API.
///
/// Evaluation never produces these: missing track data, deleted shapes and
/// unresolvable tracks make a condition evaluate false instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Condition type value is not one of the known types
    #[error("Invalid condition type: {0}")]
    InvalidType(u32),

    /// Operator is not valid for this condition type or limit
    #[error("Operator {op} not valid for {context}")]
    InvalidOperator { op: u32, context: String },

    /// Argument value or string is not valid for this condition type
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Time limit is not applicable to this condition type or out of range
    #[error("Invalid time limit: {0}")]
    InvalidTimeLimit(String),

    /// Range limit is not applicable to this condition type or out of range
    #[error("Invalid range limit: {0}")]
    InvalidRangeLimit(String),

    /// Action type is reserved or otherwise not valid
    #[error("Invalid action type: {0}")]
    InvalidActionType(u32),

    /// A built-in action of this type already exists in the config
    #[error("Action type {0} already present in config")]
    DuplicateAction(u32),

    /// Option value outside the action's limits or not in its list
    #[error("Invalid option value {value} for action type {action_type}")]
    InvalidOptionValue { action_type: u32, value: u32 },

    /// State value is not a single known state
    #[error("Invalid state: {0:#x}")]
    InvalidState(u32),

    /// Requested alarm state change goes backwards
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Group cannot be enabled without at least one valid condition
    #[error("Group {0} has no valid conditions")]
    NotConfigured(u32),

    /// Operation blocked by restriction flags
    #[error("Operation restricted: {0}")]
    Restricted(String),

    /// ID lookup failed
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u32 },

    /// Track descriptor string could not be decoded
    #[error("Invalid track descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration file syntax error
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Reading or writing configuration failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: u32) -> Self {
        Error::NotFound { kind, id }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            line,
            message: message.into(),
        }
    }
}

impl From<std::fmt::Error> for Error {
    fn from(e: std::fmt::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
