//! Unit tests for workers

use core_types::{ErrorKind, QualifiedName, Value, VmError};
use interpreter::{Service, Vm, VmConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use workers::{decode, encode, serialize_value, StructuredValue, WorkerPool};

fn new_vm() -> Vm {
    let _ = env_logger::builder().is_test(true).try_init();
    Vm::new(VmConfig::default()).unwrap()
}

fn pool(capacity: usize) -> (Vm, WorkerPool) {
    let _ = env_logger::builder().is_test(true).try_init();
    let service = Arc::new(Service::new());
    let host = Vm::with_service(VmConfig::default(), service.clone()).unwrap();
    (host, WorkerPool::new(capacity, service, VmConfig::default()))
}

/// Services `vm` until the global `name` appears or five seconds pass.
fn wait_for_global(vm: &mut Vm, name: &str) -> Option<Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        vm.events().wait(Duration::from_millis(10));
        vm.service_events();
        if let Some(value) = vm.get_global(name) {
            return Some(value);
        }
    }
    None
}

// ============================================================================
// Structured clone
// ============================================================================

#[test]
fn test_clone_object_with_qualified_names() {
    let mut sender = new_vm();
    let object = sender.new_object().unwrap();
    sender.set_property(&object, "x", Value::Number(1.0)).unwrap();
    let hidden = QualifiedName::new("internal", "x");
    sender
        .set_qualified_property(&object, &hidden, Value::from("secret"))
        .unwrap();

    let bytes = encode(&sender, &object).unwrap();
    let mut receiver = new_vm();
    let copy = decode(&mut receiver, &bytes).unwrap();
    assert_eq!(receiver.get_property(&copy, "x").unwrap(), Value::Number(1.0));

    match StructuredValue::from_bytes(&bytes).unwrap() {
        StructuredValue::Object(properties) => {
            assert!(properties.iter().any(|(name, _)| *name == hidden));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_clone_preserves_cycles() {
    let mut sender = new_vm();
    let node = sender.new_object().unwrap();
    sender.set_property(&node, "me", node.clone()).unwrap();

    let mut receiver = new_vm();
    let copy = decode(&mut receiver, &encode(&sender, &node).unwrap()).unwrap();
    assert_eq!(receiver.get_property(&copy, "me").unwrap(), copy);
}

#[test]
fn test_clone_errors() {
    let mut sender = new_vm();
    let error = sender.new_error(ErrorKind::ArgError, "bad count").unwrap();
    let mut receiver = new_vm();
    let copy = decode(&mut receiver, &encode(&sender, &error).unwrap()).unwrap();
    let data = receiver.error_data(&copy).unwrap();
    assert_eq!(data.kind, Some(ErrorKind::ArgError));
    assert_eq!(data.message, "bad count");

    let base = sender.new_base_error("plain").unwrap();
    let copy = decode(&mut receiver, &encode(&sender, &base).unwrap()).unwrap();
    assert_eq!(receiver.error_data(&copy).unwrap().kind, None);
}

#[test]
fn test_functions_and_types_are_not_cloneable() {
    let mut vm = new_vm();
    let function = vm.native_function("f", 0, |_vm, _this, _args| Ok(Value::Null)).unwrap();
    assert_eq!(serialize_value(&vm, &function).unwrap_err().kind, ErrorKind::TypeError);

    let array_type = vm.get_global("Array").unwrap();
    let holder = vm.new_array(vec![array_type]).unwrap();
    assert_eq!(serialize_value(&vm, &holder).unwrap_err().kind, ErrorKind::TypeError);
}

#[test]
fn test_corrupt_message() {
    let mut vm = new_vm();
    let err = decode(&mut vm, &[0xff, 0xff, 0xff]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::IOError);
}

// ============================================================================
// Workers
// ============================================================================

#[test]
fn test_worker_echoes_messages() {
    let (mut host, pool) = pool(2);
    host.define_native("onmessage", 1, |vm, _this, args| {
        vm.set_global("reply", args[0].clone())?;
        Ok(Value::Undefined)
    })
    .unwrap();

    let mut worker = pool
        .spawn(&host, "doubler", |vm| {
            vm.define_native("onmessage", 1, |vm, _this, args| {
                let doubled = Value::Number(vm.to_number(&args[0])? * 2.0);
                let post = vm
                    .get_global("postMessage")
                    .ok_or_else(|| VmError::reference("postMessage is not defined"))?;
                let global = vm.global();
                vm.call_function(&post, &global, &[doubled])?;
                Ok(Value::Undefined)
            })?;
            Ok(())
        })
        .unwrap();
    assert_eq!(pool.live_count(), 1);

    worker.post_message(&host, &Value::Number(21.0)).unwrap();
    assert_eq!(wait_for_global(&mut host, "reply"), Some(Value::Number(42.0)));

    worker.terminate();
    assert!(worker.join(&mut host, Duration::from_secs(5)).unwrap());
    assert!(worker.is_finished());
    assert_eq!(pool.live_count(), 0);
    assert!(worker.post_message(&host, &Value::Null).is_err());
}

#[test]
fn test_pool_is_bounded() {
    let (mut host, pool) = pool(1);
    let mut first = pool.spawn(&host, "first", |_vm| Ok(())).unwrap();
    let err = pool.spawn(&host, "second", |_vm| Ok(())).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MemoryError);
    assert_eq!(err.message, "Worker pool exhausted");

    first.terminate();
    assert!(first.join(&mut host, Duration::from_secs(5)).unwrap());
    let mut again = pool.spawn(&host, "again", |_vm| Ok(())).unwrap();
    again.terminate();
    assert!(again.join(&mut host, Duration::from_secs(5)).unwrap());
}

#[test]
fn test_worker_can_close_itself() {
    let (mut host, pool) = pool(1);
    let mut worker = pool
        .spawn(&host, "closer", |vm| {
            let close = vm
                .get_global("close")
                .ok_or_else(|| VmError::reference("close is not defined"))?;
            let global = vm.global();
            vm.call_function(&close, &global, &[])?;
            Ok(())
        })
        .unwrap();
    assert!(worker.join(&mut host, Duration::from_secs(5)).unwrap());
}

#[test]
fn test_join_times_out_and_reports_failures() {
    let (mut host, pool) = pool(2);
    let mut idle = pool.spawn(&host, "idle", |_vm| Ok(())).unwrap();
    assert!(!idle.join(&mut host, Duration::from_millis(30)).unwrap());
    idle.terminate();
    assert!(idle.join(&mut host, Duration::from_secs(5)).unwrap());

    let mut failing = pool
        .spawn(&host, "failing", |_vm| Err(VmError::reference("boom")))
        .unwrap();
    let err = failing.join(&mut host, Duration::from_secs(5)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert_eq!(err.message, "boom");
}
