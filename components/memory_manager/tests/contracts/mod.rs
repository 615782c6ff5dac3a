//! Contract tests verifying the memory_manager API used by the interpreter.

use core_types::{QualifiedName, Value, ValueId};
use memory_manager::{
    BlockState, Disposal, GcConfig, Generation, Heap, MemoryDecision, SlotTable,
};

/// Test SlotTable contract: unused slots read as null
#[test]
fn contract_unused_slots_are_null() {
    let mut table = SlotTable::new();
    table.set(3, Value::Boolean(true));
    assert_eq!(table.count(), 4);
    assert_eq!(table.get(0), Some(&Value::Null));
    assert_eq!(table.get(4), None);
}

/// Test SlotTable contract: define overwrites an existing name
#[test]
fn contract_define_is_idempotent_per_name() {
    let mut table = SlotTable::new();
    let first = table.define(QualifiedName::public("a"), Value::Number(1.0));
    let second = table.define(QualifiedName::public("a"), Value::Number(2.0));
    assert_eq!(first, second);
    assert_eq!(table.get(first), Some(&Value::Number(2.0)));
}

/// Test Heap contract: allocate returns a live handle in the current generation
#[test]
fn contract_heap_allocate() {
    let mut heap: Heap<u32> = Heap::new(GcConfig::default());
    let id = heap.allocate(1, 4, false, |_| 5).unwrap();
    assert_eq!(heap.get(id), Some(&5));
    assert_eq!(heap.state(id), Some(BlockState::InGeneration(Generation::New)));
}

/// Test Heap contract: collect returns None while a collection runs
#[test]
fn contract_collect_reports_cycle() {
    let mut heap: Heap<u32> = Heap::new(GcConfig::default());
    let cycle = heap.collect(
        Generation::New,
        &[],
        |_: &u32, _: &mut Vec<ValueId>| {},
        |_| Disposal::Pool,
    );
    assert!(cycle.is_some());
    assert_eq!(heap.stats().collections, 1);
}

/// Test MemoryNotifier contract: a grant raises the limit
#[test]
fn contract_notifier_grant() {
    let mut heap: Heap<u32> = Heap::new(GcConfig {
        max_memory: 4,
        redline: 4,
        ..GcConfig::default()
    });
    heap.set_notifier(Box::new(|_: usize, _: usize| MemoryDecision::Grant(1024)));
    assert!(heap.allocate(1, 64, false, |_| 0).is_ok());
}
