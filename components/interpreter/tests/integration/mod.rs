//! Integration tests for interpreter
//!
//! Exercises the dispatcher, exception unwinding, calls, modules and the
//! collector together through the public API.

use bytecode_system::{
    ClassDef, Code, Definition, ExceptionHandler, FunctionDef, HandlerKind, ModuleRecord, Opcode, PropertyDef,
};
use bytecode_system::Constant;
use core_types::{ErrorKind, TraitAttributes, Value};
use interpreter::{Service, Vm, VmConfig};
use std::sync::Arc;

fn new_vm() -> Vm {
    let _ = env_logger::builder().is_test(true).try_init();
    Vm::new(VmConfig::default()).unwrap()
}

fn handler(kind: HandlerKind, try_start: usize, try_end: usize, handler_start: usize, handler_end: usize) -> ExceptionHandler {
    ExceptionHandler {
        kind,
        try_start,
        try_end,
        handler_start,
        handler_end,
        num_blocks: 0,
        num_stack: 0,
        catch_type: None,
    }
}

fn vm_with_module(record: ModuleRecord) -> Vm {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = Service::new();
    let name = record.name.clone();
    service.register_module(record);
    let mut vm = Vm::with_service(VmConfig::default(), Arc::new(service)).unwrap();
    vm.load_module(&name).unwrap();
    vm
}

/// log = log * 10 + digit
fn append_digit(code: &mut Code, digit: f64) {
    let log = code.name("", "log");
    code.emit(Opcode::GetScopedName(log));
    code.emit(Opcode::LoadNumber(10.0));
    code.emit(Opcode::Mul);
    code.emit(Opcode::LoadNumber(digit));
    code.emit(Opcode::Add);
    code.emit(Opcode::PutScopedName(log));
}

/// try { try { throw 1 } finally { log(1) } } catch (e) { log(2) } return log
fn nested_try() -> FunctionDef {
    let mut code = Code::new();
    let log = code.name("", "log");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutScopedName(log)); // 1
    code.emit(Opcode::LoadNumber(1.0)); // 2  outer and inner try
    code.emit(Opcode::Throw); // 3
    code.emit(Opcode::CallFinally(0)); // 4
    code.emit(Opcode::Goto(13)); // 5
    append_digit(&mut code, 1.0); // 6..12 inner finally
    code.emit(Opcode::EndException); // 12
    code.emit(Opcode::Goto(21)); // 13
    append_digit(&mut code, 2.0); // 14..20 outer catch
    code.emit(Opcode::EndException); // 20
    code.emit(Opcode::GetScopedName(log)); // 21
    code.emit(Opcode::ReturnValue); // 22
    code.add_handler(handler(HandlerKind::Finally, 2, 6, 6, 13));
    code.add_handler(handler(HandlerKind::Catch, 2, 14, 14, 21));
    FunctionDef::new("nested", code)
}

#[test]
fn test_inner_finally_runs_before_outer_catch() {
    let mut vm = new_vm();
    let def = nested_try();
    assert_eq!(vm.run(&def).unwrap(), Value::Number(12.0));
    assert_eq!(vm.stack_depth(), 0);

    for _ in 0..3 {
        assert_eq!(vm.run(&def).unwrap(), Value::Number(12.0));
        assert_eq!(vm.stack_depth(), 0);
        assert_eq!(vm.frame_count(), 0);
    }
}

#[test]
fn test_finally_runs_and_unmatched_exception_propagates() {
    // try { throw new TypeError } catch (e: ReferenceError) { log(2) } finally { log(1) }
    let mut code = Code::new();
    let log = code.name("", "log");
    let type_error = code.name("", "TypeError");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutScopedName(log)); // 1
    code.emit(Opcode::GetScopedName(type_error)); // 2 try
    code.emit(Opcode::New(0)); // 3
    code.emit(Opcode::Throw); // 4
    code.emit(Opcode::CallFinally(1)); // 5
    code.emit(Opcode::Goto(21)); // 6
    append_digit(&mut code, 2.0); // 7..13 catch
    code.emit(Opcode::EndException); // 13
    append_digit(&mut code, 1.0); // 14..20 finally
    code.emit(Opcode::EndException); // 20
    code.emit(Opcode::LoadNull); // 21
    code.emit(Opcode::ReturnValue); // 22
    let mut catch = handler(HandlerKind::Catch, 2, 7, 7, 14);
    catch.catch_type = Some(bytecode_system::TypeRef::Name(core_types::QualifiedName::public(
        "ReferenceError",
    )));
    code.add_handler(catch);
    code.add_handler(handler(HandlerKind::Finally, 2, 7, 14, 21));

    let mut vm = new_vm();
    let err = vm.run(&FunctionDef::new("main", code)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(vm.get_global("log"), Some(Value::Number(1.0)));
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_finally_runs_on_normal_exit() {
    // try { log(3) } finally { log(1) } return log
    let mut code = Code::new();
    let log = code.name("", "log");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutScopedName(log)); // 1
    append_digit(&mut code, 3.0); // 2..8
    code.emit(Opcode::CallFinally(0)); // 8
    code.emit(Opcode::Goto(17)); // 9
    append_digit(&mut code, 1.0); // 10..16
    code.emit(Opcode::EndException); // 16
    code.emit(Opcode::GetScopedName(log)); // 17
    code.emit(Opcode::ReturnValue); // 18
    code.add_handler(handler(HandlerKind::Finally, 2, 10, 10, 17));

    let mut vm = new_vm();
    assert_eq!(vm.run(&FunctionDef::new("main", code)).unwrap(), Value::Number(31.0));
}

#[test]
fn test_default_and_rest_arguments() {
    // function f(a, b = 10) { return b }
    let mut code = Code::new();
    code.emit(Opcode::InitDefaultArgs(vec![1, 3])); // 0
    code.emit(Opcode::LoadNumber(10.0)); // 1
    code.emit(Opcode::PutLocalSlot(1)); // 2
    code.emit(Opcode::GetLocalSlot(1)); // 3
    code.emit(Opcode::ReturnValue); // 4
    let def = FunctionDef::new("f", code).with_params(&["a", "b"], 1);

    let mut vm = new_vm();
    let f = vm.create_function(&def).unwrap();
    vm.add_root(f.clone());
    let global = vm.global();
    let one = Value::Number(1.0);
    assert_eq!(vm.call_function(&f, &global, &[one.clone()]).unwrap(), Value::Number(10.0));
    assert_eq!(
        vm.call_function(&f, &global, &[one.clone(), Value::Number(5.0)]).unwrap(),
        Value::Number(5.0)
    );
    assert_eq!(
        vm.call_function(&f, &global, &[one.clone(), Value::Number(5.0), Value::Number(7.0)])
            .unwrap(),
        Value::Number(5.0)
    );

    // function g(a, ...rest) { return rest }
    let mut code = Code::new();
    code.emit(Opcode::GetLocalSlot(1));
    code.emit(Opcode::ReturnValue);
    let def = FunctionDef::new("g", code).with_params(&["a"], 0).with_rest("rest");
    let g = vm.create_function(&def).unwrap();
    vm.add_root(g.clone());
    let rest = vm
        .call_function(&g, &global, &[one, Value::Number(2.0), Value::Number(3.0)])
        .unwrap();
    assert_eq!(vm.get_property(&rest, "length").unwrap(), Value::Number(2.0));
    assert_eq!(vm.get_property(&rest, "1").unwrap(), Value::Number(3.0));
}

#[test]
fn test_closure_reads_enclosing_locals() {
    let mut inner = Code::new();
    let n = inner.name("", "n");
    inner.emit(Opcode::GetScopedName(n));
    inner.emit(Opcode::LoadNumber(1.0));
    inner.emit(Opcode::Add);
    inner.emit(Opcode::ReturnValue);

    let mut outer = Code::new();
    let index = outer.add_function(FunctionDef::new("inner", inner));
    outer.emit(Opcode::LoadNumber(5.0));
    outer.emit(Opcode::PutLocalSlot(0));
    outer.emit(Opcode::MakeClosure(index));
    outer.emit(Opcode::LoadNull);
    outer.emit(Opcode::Call(0));
    outer.emit(Opcode::ReturnValue);
    let def = FunctionDef::new("outer", outer).with_locals(&["n"]);

    let mut vm = new_vm();
    assert_eq!(vm.run(&def).unwrap(), Value::Number(6.0));
}

#[test]
fn test_getter_and_setter_pair() {
    let mut getter = Code::new();
    let raw = getter.name("", "raw");
    getter.emit(Opcode::LoadThis);
    getter.emit(Opcode::GetObjName(raw));
    getter.emit(Opcode::LoadNumber(2.0));
    getter.emit(Opcode::Mul);
    getter.emit(Opcode::ReturnValue);

    let mut setter = Code::new();
    let raw = setter.name("", "raw");
    setter.emit(Opcode::LoadThis);
    setter.emit(Opcode::GetLocalSlot(0));
    setter.emit(Opcode::LoadNumber(1.0));
    setter.emit(Opcode::Add);
    setter.emit(Opcode::PutObjName(raw));
    setter.emit(Opcode::Return);

    let mut gauge = ClassDef::new("Gauge");
    gauge
        .instance_properties
        .push(PropertyDef::new("raw").with_value(Constant::Number(4.0)));
    gauge
        .methods
        .push(FunctionDef::new("value", getter).with_attributes(TraitAttributes::GETTER));
    gauge.methods.push(
        FunctionDef::new("value", setter)
            .with_params(&["v"], 0)
            .with_attributes(TraitAttributes::SETTER),
    );
    let mut module = ModuleRecord::new("gauges", 1);
    module.definitions.push(Definition::Class(gauge));
    module.seal();

    let mut vm = vm_with_module(module);
    let gauge = vm.get_global("Gauge").unwrap();
    let global = vm.global();
    let instance = vm.call_function(&gauge, &global, &[]).unwrap();
    vm.add_root(instance.clone());

    assert_eq!(vm.get_property(&instance, "value").unwrap(), Value::Number(8.0));
    vm.set_property(&instance, "value", Value::Number(10.0)).unwrap();
    assert_eq!(vm.get_property(&instance, "raw").unwrap(), Value::Number(11.0));
    assert_eq!(vm.get_property(&instance, "value").unwrap(), Value::Number(22.0));
}

#[test]
fn test_read_only_getter_rejects_writes() {
    let mut getter = Code::new();
    getter.emit(Opcode::LoadNumber(1.0));
    getter.emit(Opcode::ReturnValue);
    let mut constant = ClassDef::new("Constant");
    constant
        .methods
        .push(FunctionDef::new("one", getter).with_attributes(TraitAttributes::GETTER));
    let mut module = ModuleRecord::new("constants", 1);
    module.definitions.push(Definition::Class(constant));

    let mut vm = vm_with_module(module);
    let class = vm.get_global("Constant").unwrap();
    let global = vm.global();
    let instance = vm.call_function(&class, &global, &[]).unwrap();
    vm.add_root(instance.clone());
    assert_eq!(vm.get_property(&instance, "one").unwrap(), Value::Number(1.0));
    let err = vm.set_property(&instance, "one", Value::Number(2.0)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn test_short_lived_instances_are_pooled() {
    let mut item = ClassDef::new("Item");
    item.instance_properties
        .push(PropertyDef::new("value").with_value(Constant::Number(0.0)));
    let mut module = ModuleRecord::new("items", 1);
    module.definitions.push(Definition::Class(item));
    let mut vm = vm_with_module(module);

    // for (i = 0; i < 1000; i++) new Item
    let mut code = Code::new();
    let item = code.name("", "Item");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutLocalSlot(0)); // 1
    code.emit(Opcode::GetLocalSlot(0)); // 2
    code.emit(Opcode::LoadNumber(1000.0)); // 3
    code.emit(Opcode::Lt); // 4
    code.emit(Opcode::BranchFalse(14)); // 5
    code.emit(Opcode::GetScopedName(item)); // 6
    code.emit(Opcode::New(0)); // 7
    code.emit(Opcode::Pop); // 8
    code.emit(Opcode::GetLocalSlot(0)); // 9
    code.emit(Opcode::LoadNumber(1.0)); // 10
    code.emit(Opcode::Add); // 11
    code.emit(Opcode::PutLocalSlot(0)); // 12
    code.emit(Opcode::Goto(2)); // 13
    code.emit(Opcode::Return); // 14
    let def = FunctionDef::new("churn", code).with_locals(&["i"]);

    vm.collect_garbage(true);
    let baseline = vm.heap().live_count();
    vm.run(&def).unwrap();
    vm.collect_garbage(true);

    let class = vm.get_global("Item").unwrap();
    let pool_key = vm.type_info(&class).unwrap().pool_key;
    assert!(vm.heap().pool_count(pool_key) > 0);
    assert!(vm.heap().pool_stats(pool_key).peak_allocated >= 1);
    assert_eq!(vm.heap().live_count(), baseline);
    assert!(vm.heap().verify_disjoint());
}
