//! Engine error types.
//!
//! Every failure the engine can raise belongs to one [`ErrorKind`]. Errors
//! raised by the engine itself are carried as [`VmError`] until they reach a
//! handler, where the interpreter turns them into script-visible error values.

use crate::{SourcePosition, StackFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of a runtime error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Use of null, undefined, or a missing binding
    ReferenceError,
    /// Operator, cast or argument-shape mismatch
    TypeError,
    /// Arity or argument validation failure at a call boundary
    ArgError,
    /// Arithmetic the numeric domain forbids (e.g. division by zero)
    ArithmeticError,
    /// Allocation denied or memory red line exceeded
    MemoryError,
    /// Engine invariant violation
    InternalError,
    /// Failure delegated from I/O collaborators (module loading included)
    IOError,
    /// End of an iteration; not a true error
    StopIteration,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::ReferenceError,
        ErrorKind::TypeError,
        ErrorKind::ArgError,
        ErrorKind::ArithmeticError,
        ErrorKind::MemoryError,
        ErrorKind::InternalError,
        ErrorKind::IOError,
        ErrorKind::StopIteration,
    ];

    /// Script-visible type name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ArgError => "ArgError",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::MemoryError => "MemoryError",
            ErrorKind::InternalError => "InternalError",
            ErrorKind::IOError => "IOError",
            ErrorKind::StopIteration => "StopIteration",
        }
    }

    /// Looks a kind up by its script-visible name.
    pub fn from_name(name: &str) -> Option<ErrorKind> {
        ErrorKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// True for the stop-iteration sentinel.
    pub fn is_sentinel(self) -> bool {
        self == ErrorKind::StopIteration
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An engine error with message and stack trace.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, VmError};
///
/// let error = VmError::arg("Insufficient actual parameters");
/// assert_eq!(error.kind, ErrorKind::ArgError);
/// assert_eq!(error.to_string(), "ArgError: Insufficient actual parameters");
/// ```
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct VmError {
    /// The kind of error
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
    /// Call stack at the point the error was raised
    pub stack: Vec<StackFrame>,
    /// Source position of the faulting instruction
    pub source_position: Option<SourcePosition>,
}

/// Result alias used across the engine crates.
pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Creates an error with no stack information.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: Vec::new(),
            source_position: None,
        }
    }

    /// Creates a `ReferenceError`.
    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReferenceError, message)
    }

    /// Creates a `TypeError`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// Creates an `ArgError`.
    pub fn arg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgError, message)
    }

    /// Creates an `ArithmeticError`.
    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArithmeticError, message)
    }

    /// Creates a `MemoryError`.
    pub fn memory(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MemoryError, message)
    }

    /// Creates an `InternalError`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Creates an `IOError`.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IOError, message)
    }

    /// Creates the stop-iteration sentinel.
    pub fn stop_iteration() -> Self {
        Self::new(ErrorKind::StopIteration, "")
    }

    /// Attaches the source position of the faulting instruction.
    pub fn with_position(mut self, position: Option<SourcePosition>) -> Self {
        self.source_position = position;
        self
    }

    /// Attaches call-stack frames.
    pub fn with_stack(mut self, stack: Vec<StackFrame>) -> Self {
        self.stack = stack;
        self
    }

    /// Renders the call stack, one frame per line.
    pub fn stack_text(&self) -> String {
        self.stack
            .iter()
            .map(|frame| format!("    at {}", frame))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
