//! Core runtime value types and error handling.
//!
//! This crate provides the foundational types shared by every engine
//! component: the runtime value representation, qualified property names,
//! type and trait attribute sets, and the error taxonomy.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of runtime values
//! - [`ValueId`] - Handle of a heap-resident value
//! - [`QualifiedName`] - `(namespace, name)` property key
//! - [`TypeAttributes`] / [`TraitAttributes`] - Attribute bit sets
//! - [`VmError`] - Engine errors with stack traces
//! - [`ErrorKind`] - Error taxonomy, including the stop-iteration sentinel
//! - [`SourcePosition`] / [`StackFrame`] - Source location tracking
//!
//! # Examples
//!
//! ```
//! use core_types::{ErrorKind, QualifiedName, Value, VmError};
//!
//! let num = Value::Number(42.0);
//! assert!(num.is_truthy());
//!
//! let name = QualifiedName::public("x");
//! assert!(name.is_public());
//!
//! let error = VmError::reference("x is not defined");
//! assert_eq!(error.kind, ErrorKind::ReferenceError);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod attributes;
mod error;
mod name;
mod source;
mod value;

pub use attributes::{TraitAttributes, TypeAttributes};
pub use error::{ErrorKind, VmError, VmResult};
pub use name::QualifiedName;
pub use source::{SourcePosition, StackFrame};
pub use value::{format_number, Value, ValueId};
