//! Bytecode interpreter, object model and type system
//!
//! This crate provides the engine proper:
//! - A stack interpreter with try/catch/finally and iteration handlers
//! - Per-type helper sets that implement property access for each value kind
//! - Runtime types linked to their bases by a one-time fixup
//! - Module loading with version and checksum checks
//! - A generational collector driven at interpreter safe points
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Code, FunctionDef, Opcode};
//! use core_types::Value;
//! use interpreter::{Vm, VmConfig};
//!
//! let mut vm = Vm::new(VmConfig::default()).unwrap();
//! let mut code = Code::new();
//! code.emit(Opcode::LoadNumber(40.0));
//! code.emit(Opcode::LoadNumber(2.0));
//! code.emit(Opcode::Add);
//! code.emit(Opcode::ReturnValue);
//!
//! let result = vm.run(&FunctionDef::new("main", code)).unwrap();
//! assert_eq!(result, Value::Number(42.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod bootstrap;
pub mod call_frame;
mod calls;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
mod exceptions;
mod gc_integration;
pub mod helpers;
pub mod inline_cache;
pub mod loader;
pub mod object;
mod operators;
mod primitives;
mod property;
mod scope;
pub mod service;
pub mod types;
pub mod vm;

// Re-export main types at crate root
pub use call_frame::{CallFrame, Completion};
pub use config::{LanguageLevel, NumericDomain, VmConfig};
pub use error::{ExecResult, Exception};
pub use events::{Event, EventQueue};
pub use helpers::{ArrayHelpers, BlockHelpers, ErrorHelpers, FunctionHelpers, Helpers, ObjectHelpers, TypeHelpers};
pub use inline_cache::InlineCache;
pub use loader::{MemoryModuleLoader, ModuleLoader};
pub use object::{
    BlockData, ErrorData, FunctionBody, FunctionData, HeapObject, NativeFn, ObjectKind, Trait, TypeData,
};
pub use primitives::StringHelpers;
pub use service::{NativeModule, NativeModuleFn, Service};
pub use types::TypeSpec;
pub use vm::{CoreTypes, Vm};
