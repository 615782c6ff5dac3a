//! Exceptions raised while executing bytecode

use core_types::{ErrorKind, Value, VmError};
use thiserror::Error;

/// A pending exception.
///
/// Engine errors travel as [`VmError`] until handler search turns them into
/// error instances; script `throw` carries any value.
#[derive(Debug, Clone, Error)]
pub enum Exception {
    /// Raised by the engine
    #[error(transparent)]
    Error(#[from] VmError),
    /// Thrown by script
    #[error("uncaught exception")]
    Thrown(Value),
    /// The interpreter is shutting down
    #[error("interpreter is exiting")]
    Exit,
}

/// Result of an operation that may raise an exception.
pub type ExecResult<T> = Result<T, Exception>;

impl Exception {
    /// Kind of an engine error, if this is one
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Exception::Error(error) => Some(error.kind),
            _ => None,
        }
    }
}
