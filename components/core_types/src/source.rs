//! Source position and stack frame types for error reporting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a position in source code.
///
/// Instructions carry the position of the source construct they were
/// compiled from; errors report the position of the faulting instruction.
///
/// # Examples
///
/// ```
/// use core_types::SourcePosition;
///
/// let pos = SourcePosition::new(10, 5, 150);
/// assert_eq!(pos.line, 10);
/// assert_eq!(pos.to_string(), "10:5");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
    /// Byte offset from the start of the source file
    pub offset: usize,
}

impl SourcePosition {
    /// Creates a source position.
    pub fn new(line: u32, column: u32, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Represents a single frame in a call stack.
///
/// # Examples
///
/// ```
/// use core_types::StackFrame;
///
/// let frame = StackFrame {
///     function_name: Some("area".to_string()),
///     source_url: Some("shapes.es".to_string()),
///     line: 25,
///     column: 10,
/// };
///
/// assert_eq!(frame.to_string(), "area (shapes.es:25:10)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Name of the function, or None for anonymous functions
    pub function_name: Option<String>,
    /// Module or file the function came from, if known
    pub source_url: Option<String>,
    /// Line number of the active instruction
    pub line: u32,
    /// Column number of the active instruction
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.function_name.as_deref().unwrap_or("<anonymous>");
        let url = self.source_url.as_deref().unwrap_or("<unknown>");
        write!(f, "{} ({}:{}:{})", name, url, self.line, self.column)
    }
}
