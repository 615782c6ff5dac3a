//! Memory Manager and Interpreter Integration Tests
//!
//! The collector runs over interpreter heaps: reachable graphs survive,
//! dropped values come back through their type's pool, and the memory
//! limit turns into a `MemoryError` plus an orderly exit.

use bytecode_system::{Code, FunctionDef, Opcode};
use core_types::{ErrorKind, Value};
use integration_tests::{class_with_fields, init_logging, module_of, vm_with_modules};
use interpreter::{Vm, VmConfig};
use memory_manager::{GcConfig, MemoryDecision};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// for (i = 0; i < count; i++) new Item
fn churn(count: f64) -> FunctionDef {
    let mut code = Code::new();
    let item = code.name("", "Item");
    code.emit(Opcode::LoadNumber(0.0)); // 0
    code.emit(Opcode::PutLocalSlot(0)); // 1
    code.emit(Opcode::GetLocalSlot(0)); // 2
    code.emit(Opcode::LoadNumber(count)); // 3
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
    FunctionDef::new("churn", code).with_locals(&["i"])
}

fn items_vm() -> Vm {
    vm_with_modules(vec![module_of("items", vec![class_with_fields("Item", None, &["value"])])])
}

#[test]
fn test_short_lived_objects_return_to_their_pool() {
    let mut vm = items_vm();
    let item = vm.get_global("Item").unwrap();
    let pool_key = vm.type_info(&item).unwrap().pool_key;

    vm.collect_garbage(true);
    let baseline = vm.heap().live_count();
    vm.run(&churn(1000.0)).unwrap();
    vm.collect_garbage(true);

    assert!(vm.heap().pool_count(pool_key) > 0);
    assert_eq!(vm.heap().live_count(), baseline);
    assert!(vm.heap().verify_disjoint());

    let reused_before = vm.heap().pool_stats(pool_key).reuse;
    vm.run(&churn(100.0)).unwrap();
    assert!(vm.heap().pool_stats(pool_key).reuse > reused_before);
    vm.collect_garbage(true);
    assert_eq!(vm.heap().live_count(), baseline);
    assert!(vm.heap().verify_disjoint());
}

#[test]
fn test_reachable_graph_survives_collections() {
    let mut vm = items_vm();
    let mut chain = Value::Null;
    for i in 0..100 {
        chain = vm.new_array(vec![Value::Number(i as f64), chain]).unwrap();
    }
    vm.set_global("chain", chain).unwrap();

    for _ in 0..3 {
        vm.collect_garbage(false);
        vm.collect_garbage(true);
        assert!(vm.heap().verify_disjoint());
    }

    let mut node = vm.get_global("chain").unwrap();
    let mut expected = 99;
    while node != Value::Null {
        assert_eq!(vm.get_property(&node, "0").unwrap(), Value::Number(expected as f64));
        node = vm.get_property(&node, "1").unwrap();
        expected -= 1;
    }
    assert_eq!(expected, -1);
}

#[test]
fn test_dropped_graph_is_reclaimed() {
    let mut vm = items_vm();
    vm.collect_garbage(true);
    let baseline = vm.heap().live_count();

    let items: Vec<Value> = (0..200).map(|_| vm.new_object().unwrap()).collect();
    let holder = vm.new_array(items).unwrap();
    vm.set_global("holder", holder).unwrap();
    vm.collect_garbage(true);
    assert!(vm.heap().live_count() >= baseline + 201);

    vm.set_global("holder", Value::Null).unwrap();
    for _ in 0..3 {
        vm.collect_garbage(true);
    }
    assert_eq!(vm.heap().live_count(), baseline);
    assert!(vm.heap().verify_disjoint());
}

#[test]
fn test_memory_limit_raises_and_exits() {
    init_logging();
    let config = VmConfig {
        gc: GcConfig {
            max_memory: 1024 * 1024,
            redline: 512 * 1024,
            ..GcConfig::default()
        },
        ..VmConfig::default()
    };
    let mut vm = Vm::new(config).unwrap();
    let asked = Arc::new(AtomicUsize::new(0));
    let counter = asked.clone();
    vm.set_memory_notifier(Box::new(move |requested: usize, limit: usize| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            MemoryDecision::Grant(limit + 64 * requested)
        } else {
            MemoryDecision::Deny
        }
    }));

    let mut error = None;
    for _ in 0..1_000_000 {
        if let Err(e) = vm.new_object() {
            error = Some(e);
            break;
        }
    }
    let error = error.expect("allocation never failed");
    assert_eq!(error.kind, ErrorKind::MemoryError);
    assert_eq!(asked.load(Ordering::SeqCst), 2);
    assert!(vm.is_exiting());
}
