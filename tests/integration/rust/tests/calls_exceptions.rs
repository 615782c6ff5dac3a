//! Calls and exception unwinding through loaded modules

use bytecode_system::{Code, Definition, ExceptionHandler, FunctionDef, HandlerKind, ModuleRecord, Opcode, TypeRef};
use core_types::{ErrorKind, QualifiedName, Value};
use integration_tests::{append_digit, vm_with_modules};

fn handler(
    kind: HandlerKind,
    try_start: usize,
    try_end: usize,
    handler_start: usize,
    handler_end: usize,
) -> ExceptionHandler {
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

/// function f(a, b = 10) { return b }
fn with_default() -> FunctionDef {
    let mut code = Code::new();
    code.emit(Opcode::InitDefaultArgs(vec![1, 3]));
    code.emit(Opcode::LoadNumber(10.0));
    code.emit(Opcode::PutLocalSlot(1));
    code.emit(Opcode::GetLocalSlot(1));
    code.emit(Opcode::ReturnValue);
    FunctionDef::new("f", code).with_params(&["a", "b"], 1)
}

/// function g(a, b = 10, ...rest) { return rest }
fn with_rest() -> FunctionDef {
    let mut code = Code::new();
    code.emit(Opcode::InitDefaultArgs(vec![1, 3]));
    code.emit(Opcode::LoadNumber(10.0));
    code.emit(Opcode::PutLocalSlot(1));
    code.emit(Opcode::GetLocalSlot(2));
    code.emit(Opcode::ReturnValue);
    FunctionDef::new("g", code).with_params(&["a", "b"], 1).with_rest("rest")
}

/// try { throw new TypeError } catch (e: ReferenceError) { log(2) } finally { log(1) }
fn risky() -> FunctionDef {
    let mut code = Code::new();
    let type_error = code.name("", "TypeError");
    code.emit(Opcode::GetScopedName(type_error)); // 0
    code.emit(Opcode::New(0)); // 1
    code.emit(Opcode::Throw); // 2
    code.emit(Opcode::CallFinally(1)); // 3
    code.emit(Opcode::Goto(19)); // 4
    append_digit(&mut code, "log", 2.0); // 5..11
    code.emit(Opcode::EndException); // 11
    append_digit(&mut code, "log", 1.0); // 12..18
    code.emit(Opcode::EndException); // 18
    code.emit(Opcode::Return); // 19
    let mut catch = handler(HandlerKind::Catch, 0, 5, 5, 12);
    catch.catch_type = Some(TypeRef::Name(QualifiedName::public("ReferenceError")));
    code.add_handler(catch);
    code.add_handler(handler(HandlerKind::Finally, 0, 5, 12, 19));
    FunctionDef::new("risky", code)
}

fn library() -> ModuleRecord {
    let mut module = ModuleRecord::new("library", 1);
    module.definitions.push(Definition::Function(with_default()));
    module.definitions.push(Definition::Function(with_rest()));
    module.definitions.push(Definition::Function(risky()));
    module.definitions.push(Definition::Variable(bytecode_system::VariableDef {
        name: QualifiedName::public("log"),
        attributes: core_types::TraitAttributes::NONE,
        slot: None,
        type_ref: None,
        value: bytecode_system::Constant::Number(0.0),
    }));
    module.seal();
    module
}

/// return name(args...)
fn call_with(name: &str, args: &[f64]) -> FunctionDef {
    let mut code = Code::new();
    let callee = code.name("", name);
    for arg in args {
        code.emit(Opcode::LoadNumber(*arg));
    }
    code.emit(Opcode::CallScopedName {
        name: callee,
        argc: args.len() as u32,
    });
    code.emit(Opcode::ReturnValue);
    FunctionDef::new("main", code)
}

#[test]
fn test_default_argument_fills_in() {
    let mut vm = vm_with_modules(vec![library()]);
    assert_eq!(vm.run(&call_with("f", &[1.0])).unwrap(), Value::Number(10.0));
    assert_eq!(vm.run(&call_with("f", &[1.0, 2.0])).unwrap(), Value::Number(2.0));
    assert_eq!(vm.run(&call_with("f", &[1.0, 2.0, 3.0])).unwrap(), Value::Number(2.0));
}

#[test]
fn test_rest_collects_extra_arguments() {
    let mut vm = vm_with_modules(vec![library()]);
    let rest = vm.run(&call_with("g", &[1.0, 2.0, 3.0, 4.0])).unwrap();
    vm.add_root(rest.clone());
    assert_eq!(vm.get_property(&rest, "length").unwrap(), Value::Number(2.0));
    assert_eq!(vm.get_property(&rest, "0").unwrap(), Value::Number(3.0));

    let empty = vm.run(&call_with("g", &[1.0])).unwrap();
    assert_eq!(vm.get_property(&empty, "length").unwrap(), Value::Number(0.0));
}

#[test]
fn test_finally_runs_and_exception_reaches_the_caller() {
    let mut vm = vm_with_modules(vec![library()]);
    let risky = vm.get_global("risky").unwrap();
    let global = vm.global();
    let err = vm.call_function(&risky, &global, &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(vm.get_global("log"), Some(Value::Number(1.0)));

    // log = 0; try { risky() } catch (e) { log(3) } return log
    let mut code = Code::new();
    let log = code.name("", "log");
    let risky = code.name("", "risky");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutScopedName(log)); // 1
    code.emit(Opcode::CallScopedName { name: risky, argc: 0 }); // 2
    code.emit(Opcode::Pop); // 3
    code.emit(Opcode::Goto(12)); // 4
    append_digit(&mut code, "log", 3.0); // 5..11
    code.emit(Opcode::EndException); // 11
    code.emit(Opcode::GetScopedName(log)); // 12
    code.emit(Opcode::ReturnValue); // 13
    code.add_handler(handler(HandlerKind::Catch, 2, 5, 5, 12));

    assert_eq!(vm.run(&FunctionDef::new("main", code)).unwrap(), Value::Number(13.0));
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_repeated_throw_and_catch_leaves_no_residue() {
    let mut vm = vm_with_modules(vec![library()]);
    vm.define_native("depth", 0, |vm, _this, _args| Ok(Value::Number(vm.stack_depth() as f64)))
        .unwrap();

    // base = depth(); for (i = 0; i < 50; i++) { try { push 3 values; throw } catch { if (depth() !== base) return false } }
    let mut code = Code::new();
    let depth = code.name("", "depth");
    code.emit(Opcode::CallScopedName { name: depth, argc: 0 }); // 0
    code.emit(Opcode::PutLocalSlot(1)); // 1
    code.emit(Opcode::LoadNumber(0.0)); // 2
    code.emit(Opcode::PutLocalSlot(0)); // 3
    code.emit(Opcode::GetLocalSlot(0)); // 4
    code.emit(Opcode::LoadNumber(50.0)); // 5
    code.emit(Opcode::Lt); // 6
    code.emit(Opcode::BranchFalse(23)); // 7
    code.emit(Opcode::LoadNumber(1.0)); // 8  try
    code.emit(Opcode::LoadNumber(2.0)); // 9
    code.emit(Opcode::LoadNumber(3.0)); // 10
    code.emit(Opcode::Throw); // 11
    code.emit(Opcode::Goto(18)); // 12
    code.emit(Opcode::CallScopedName { name: depth, argc: 0 }); // 13 catch
    code.emit(Opcode::GetLocalSlot(1)); // 14
    code.emit(Opcode::StrictNe); // 15
    code.emit(Opcode::BranchTrue(25)); // 16
    code.emit(Opcode::EndException); // 17
    code.emit(Opcode::GetLocalSlot(0)); // 18
    code.emit(Opcode::LoadNumber(1.0)); // 19
    code.emit(Opcode::Add); // 20
    code.emit(Opcode::PutLocalSlot(0)); // 21
    code.emit(Opcode::Goto(4)); // 22
    code.emit(Opcode::LoadTrue); // 23
    code.emit(Opcode::ReturnValue); // 24
    code.emit(Opcode::LoadFalse); // 25
    code.emit(Opcode::ReturnValue); // 26
    code.add_handler(handler(HandlerKind::Catch, 8, 13, 13, 18));
    let main = FunctionDef::new("main", code).with_locals(&["i", "base"]);

    assert_eq!(vm.run(&main).unwrap(), Value::Boolean(true));
    assert_eq!(vm.stack_depth(), 0);
    assert_eq!(vm.frame_count(), 0);
}

#[test]
fn test_call_depth_is_bounded() {
    // function recurse() { return recurse() }
    let mut code = Code::new();
    let recurse = code.name("", "recurse");
    code.emit(Opcode::CallScopedName { name: recurse, argc: 0 });
    code.emit(Opcode::ReturnValue);
    let mut module = ModuleRecord::new("recursion", 1);
    module
        .definitions
        .push(Definition::Function(FunctionDef::new("recurse", code)));

    let mut vm = vm_with_modules(vec![module]);
    let err = vm.run(&call_with("recurse", &[])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert_eq!(vm.frame_count(), 0);
    assert_eq!(vm.stack_depth(), 0);
}
