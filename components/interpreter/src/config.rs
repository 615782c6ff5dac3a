//! Interpreter configuration

use core_types::{VmError, VmResult};
use memory_manager::GcConfig;
use serde::Deserialize;

/// How strictly calls are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum LanguageLevel {
    /// Loose ECMAScript compatible checking
    Ecma,
    /// Enhanced language with loose argument checking
    #[default]
    Plus,
    /// Missing fixed arguments are an error
    Fixed,
}

/// Number semantics of arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum NumericDomain {
    /// IEEE doubles; division by zero yields an infinity or NaN
    #[default]
    Double,
    /// Truncated integers; division by zero raises
    Integer,
}

/// Interpreter settings.
///
/// # Examples
///
/// ```
/// use interpreter::{LanguageLevel, VmConfig};
///
/// let config = VmConfig::from_json(r#"{"language": "Fixed", "gc": {"work_quota": 50}}"#).unwrap();
/// assert_eq!(config.language, LanguageLevel::Fixed);
/// assert_eq!(config.gc.work_quota, 50);
/// assert_eq!(config.max_call_depth, VmConfig::default().max_call_depth);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Collector settings
    pub gc: GcConfig,
    /// Argument checking level
    pub language: LanguageLevel,
    /// Arithmetic domain
    pub numeric: NumericDomain,
    /// Deepest allowed call nesting
    pub max_call_depth: usize,
    /// Largest allowed operand stack
    pub stack_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            gc: GcConfig::default(),
            language: LanguageLevel::default(),
            numeric: NumericDomain::default(),
            max_call_depth: 512,
            stack_limit: 64 * 1024,
        }
    }
}

impl VmConfig {
    /// Parses a configuration; absent fields take their defaults.
    pub fn from_json(text: &str) -> VmResult<Self> {
        serde_json::from_str(text).map_err(|e| VmError::io(format!("Bad interpreter configuration: {}", e)))
    }
}
