//! Contract tests for interpreter API
//!
//! These tests pin the public surface other components build on.

use bytecode_system::{ClassDef, Code, Definition, FunctionDef, ModuleRecord, Opcode};
use core_types::{ErrorKind, QualifiedName, Value, VmError};
use interpreter::{
    EventQueue, ExecResult, Exception, Helpers, MemoryModuleLoader, ModuleLoader, Service, TypeSpec, Vm,
    VmConfig,
};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Helper set answering one computed property
struct MagicHelpers;

impl Helpers for MagicHelpers {
    fn name(&self) -> &'static str {
        "magic"
    }

    fn get_property_by_name(
        &self,
        _vm: &mut Vm,
        _object: &Value,
        name: &QualifiedName,
    ) -> ExecResult<Option<Value>> {
        Ok((name.name == "answer").then_some(Value::Number(42.0)))
    }
}

/// Exception::kind() exposes the kind of engine errors only
#[test]
fn test_exception_kind_contract() {
    let error: Exception = VmError::type_error("bad").into();
    assert_eq!(error.kind(), Some(ErrorKind::TypeError));
    assert_eq!(Exception::Thrown(Value::Null).kind(), None);
    assert_eq!(Exception::Exit.kind(), None);
}

/// VmConfig::from_json() fills absent fields with defaults
#[test]
fn test_config_contract() {
    let config = VmConfig::from_json(r#"{"max_call_depth": 64}"#).unwrap();
    assert_eq!(config.max_call_depth, 64);
    assert_eq!(config.stack_limit, VmConfig::default().stack_limit);
    assert_eq!(VmConfig::from_json("[").unwrap_err().kind, ErrorKind::IOError);
}

/// A type's helper set answers property access for its instances
#[test]
fn test_custom_helpers_contract() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    let magic = vm
        .create_type(TypeSpec::new("Magic").with_helpers(Rc::new(MagicHelpers)))
        .unwrap();
    let global = vm.global();
    let instance = vm.call_function(&magic, &global, &[]).unwrap();
    assert_eq!(vm.get_property(&instance, "answer").unwrap(), Value::Number(42.0));
    assert_eq!(vm.get_property(&instance, "other").unwrap(), Value::Undefined);
    assert_eq!(vm.type_info(&magic).unwrap().helpers.name(), "magic");
}

/// Subtypes without their own helpers inherit the base's
#[test]
fn test_helpers_are_inherited_contract() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    let magic = vm
        .create_type(TypeSpec::new("Magic").with_helpers(Rc::new(MagicHelpers)))
        .unwrap();
    let derived = vm
        .create_type(TypeSpec::new("MoreMagic").with_base(magic.as_ref_id().unwrap()))
        .unwrap();
    assert_eq!(vm.type_info(&derived).unwrap().helpers.name(), "magic");
}

/// ModuleLoader feeds the service; load_module() defines the module's globals
#[test]
fn test_module_loader_contract() {
    let loader = MemoryModuleLoader::new();
    let mut record = ModuleRecord::new("widgets", 1);
    record.definitions.push(Definition::Class(ClassDef::new("Widget")));
    let mut code = Code::new();
    code.emit(Opcode::LoadNumber(3.0));
    code.emit(Opcode::ReturnValue);
    record.definitions.push(Definition::Function(FunctionDef::new("three", code)));
    record.seal();
    loader.add(record);
    assert!(loader.load("gadgets").is_err());

    let service = Arc::new(Service::with_loader(Arc::new(loader)));
    let mut vm = Vm::with_service(VmConfig::default(), service.clone()).unwrap();
    vm.load_module("widgets").unwrap();
    assert_eq!(service.module_names(), vec!["widgets".to_string()]);

    let widget = vm.get_global("Widget").unwrap();
    assert!(vm.type_info(&widget).unwrap().fixup_done);
    let three = vm.get_global("three").unwrap();
    let global = vm.global();
    assert_eq!(vm.call_function(&three, &global, &[]).unwrap(), Value::Number(3.0));

    let err = vm.load_module("gadgets").unwrap_err();
    assert_eq!(err.kind, ErrorKind::IOError);
}

/// Interpreters sharing a service share its registry, not their heaps
#[test]
fn test_shared_service_contract() {
    let service = Arc::new(Service::new());
    let mut record = ModuleRecord::new("shared", 1);
    record.definitions.push(Definition::Class(ClassDef::new("Thing")));
    service.register_module(record);

    let mut first = Vm::with_service(VmConfig::default(), service.clone()).unwrap();
    let mut second = Vm::with_service(VmConfig::default(), service).unwrap();
    first.load_module("shared").unwrap();
    assert!(first.get_global("Thing").is_some());
    assert!(second.get_global("Thing").is_none());
    second.load_module("shared").unwrap();
    assert_ne!(first.get_global("Thing"), None);
    assert_eq!(second.loaded_modules(), vec!["shared".to_string()]);
}

/// EventQueue::post() from another thread is run by service_events()
#[test]
fn test_event_queue_contract() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    let queue: EventQueue = vm.events();
    let poster = queue.clone();
    std::thread::spawn(move || {
        poster.post(Box::new(|vm: &mut Vm| {
            vm.set_global("posted", Value::Number(1.0))?;
            Ok(())
        }));
    })
    .join()
    .unwrap();

    assert!(queue.wait(Duration::from_millis(100)));
    assert_eq!(vm.service_events(), 1);
    assert!(queue.is_empty());
    assert_eq!(vm.get_global("posted"), Some(Value::Number(1.0)));
}

/// request_exit() stops running script with an InternalError at the host
#[test]
fn test_exit_contract() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.request_exit();
    assert!(vm.is_exiting());
    let mut code = Code::new();
    code.emit(Opcode::LoadNumber(1.0));
    code.emit(Opcode::ReturnValue);
    let err = vm.run(&FunctionDef::new("main", code)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert_eq!(vm.frame_count(), 0);
}

/// collect_garbage() reports a cycle and keeps the globals alive
#[test]
fn test_collect_garbage_contract() {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    let kept = vm.new_array(vec![Value::Number(1.0)]).unwrap();
    vm.set_global("kept", kept.clone()).unwrap();
    let stats_before = vm.gc_stats();

    let cycle = vm.collect_garbage(true).unwrap();
    assert!(cycle.marked > 0);
    assert_eq!(vm.gc_stats().collections, stats_before.collections + 1);
    assert!(vm.heap_object(kept.as_ref_id().unwrap()).is_some());
}
