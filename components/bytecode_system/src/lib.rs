//! Bytecode system for the execution engine
//!
//! This crate defines what the external compiler hands the engine: the
//! stack-machine instruction set, function bodies with their constant pools,
//! exception handler and block tables, and module records with their
//! additive checksum.
//!
//! # Features
//!
//! - Stack-based instruction set with every addressing mode
//! - Handler tables for catch, finally and iteration regions
//! - Module records serialized with `bincode`
//!
//! # Example
//!
//! ```
//! use bytecode_system::{Code, FunctionDef, Opcode};
//!
//! let mut code = Code::new();
//! code.emit(Opcode::GetLocalSlot(0));
//! code.emit(Opcode::GetLocalSlot(1));
//! code.emit(Opcode::Add);
//! code.emit(Opcode::ReturnValue);
//!
//! let add = FunctionDef::new("add", code).with_params(&["a", "b"], 0);
//! assert_eq!(add.num_locals(), 2);
//! assert!(add.code.validate().is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod code;
pub mod instruction;
pub mod module;
pub mod opcode;

// Re-export main types at crate root
pub use code::{BlockDef, Code, ConstantPool, ExceptionHandler, FunctionDef, HandlerKind, TypeRef};
pub use instruction::Instruction;
pub use module::{
    ClassDef, Constant, Definition, Dependency, ModuleRecord, PropertyDef, VariableDef,
};
pub use opcode::{ConstIndex, IterKind, NameRef, Opcode, Operator};
