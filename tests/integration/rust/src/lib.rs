//! Integration test suite for the engine
//!
//! Fixtures shared by the cross-component tests: interpreters bound to a
//! service holding hand-assembled modules, and builders for the classes
//! and bodies the scenarios use.

use bytecode_system::{ClassDef, Code, Constant, ModuleRecord, Opcode, PropertyDef, TypeRef};
use core_types::QualifiedName;
use interpreter::{Service, Vm, VmConfig};
use std::sync::Arc;

/// Re-export components for test convenience
pub mod components {
    pub use bytecode_system;
    pub use core_types;
    pub use interpreter;
    pub use memory_manager;
    pub use workers;
}

/// Initializes test logging once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A service holding `records`.
pub fn service_with(records: Vec<ModuleRecord>) -> Arc<Service> {
    let service = Service::new();
    for record in records {
        service.register_module(record);
    }
    Arc::new(service)
}

/// An interpreter with every record of `records` loaded, in order.
pub fn vm_with_modules(records: Vec<ModuleRecord>) -> Vm {
    init_logging();
    let names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    let mut vm = Vm::with_service(VmConfig::default(), service_with(records)).unwrap();
    for name in names {
        vm.load_module(&name).unwrap();
    }
    vm
}

/// A class with numeric instance fields initialized to zero.
pub fn class_with_fields(name: &str, base: Option<&str>, fields: &[&str]) -> ClassDef {
    let mut class = ClassDef::new(name);
    class.base = base.map(|b| TypeRef::Name(QualifiedName::public(b)));
    for field in fields {
        class
            .instance_properties
            .push(PropertyDef::new(*field).with_value(Constant::Number(0.0)));
    }
    class
}

/// A sealed module record holding `classes`.
pub fn module_of(name: &str, classes: Vec<ClassDef>) -> ModuleRecord {
    let mut module = ModuleRecord::new(name, 1);
    module
        .definitions
        .extend(classes.into_iter().map(bytecode_system::Definition::Class));
    module.seal();
    module
}

/// Appends `name = name * 10 + digit`, recording the order blocks ran in.
pub fn append_digit(code: &mut Code, name: &str, digit: f64) {
    let target = code.name("", name);
    code.emit(Opcode::GetScopedName(target));
    code.emit(Opcode::LoadNumber(10.0));
    code.emit(Opcode::Mul);
    code.emit(Opcode::LoadNumber(digit));
    code.emit(Opcode::Add);
    code.emit(Opcode::PutScopedName(target));
}
