//! Workers loading modules from a shared service and exchanging messages

use bytecode_system::{Code, Definition, FunctionDef, ModuleRecord, Opcode};
use core_types::Value;
use integration_tests::{init_logging, service_with};
use interpreter::{Vm, VmConfig};
use std::time::{Duration, Instant};
use workers::WorkerPool;

/// module double-handlers: function onmessage(data) { postMessage(data.n * 2) }
fn doubler() -> ModuleRecord {
    let mut code = Code::new();
    let n = code.name("", "n");
    let post = code.name("", "postMessage");
    code.emit(Opcode::GetLocalSlot(0));
    code.emit(Opcode::GetObjName(n));
    code.emit(Opcode::LoadNumber(2.0));
    code.emit(Opcode::Mul);
    code.emit(Opcode::CallScopedName { name: post, argc: 1 });
    code.emit(Opcode::Pop);
    code.emit(Opcode::Return);
    handler_module("double-handlers", code)
}

/// module echo-handlers: function onmessage(data) { postMessage(data) }
fn echo() -> ModuleRecord {
    let mut code = Code::new();
    let post = code.name("", "postMessage");
    code.emit(Opcode::GetLocalSlot(0));
    code.emit(Opcode::CallScopedName { name: post, argc: 1 });
    code.emit(Opcode::Pop);
    code.emit(Opcode::Return);
    handler_module("echo-handlers", code)
}

fn handler_module(name: &str, code: Code) -> ModuleRecord {
    let mut module = ModuleRecord::new(name, 1);
    module.definitions.push(Definition::Function(
        FunctionDef::new("onmessage", code).with_params(&["data"], 0),
    ));
    module.seal();
    module
}

fn host_and_pool() -> (Vm, WorkerPool) {
    init_logging();
    let service = service_with(vec![doubler(), echo()]);
    let mut host = Vm::with_service(VmConfig::default(), service.clone()).unwrap();
    host.define_native("onmessage", 1, |vm, _this, args| {
        vm.set_global("reply", args[0].clone())?;
        Ok(Value::Undefined)
    })
    .unwrap();
    (host, WorkerPool::new(4, service, VmConfig::default()))
}

fn wait_for_reply(host: &mut Vm) -> Value {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        host.events().wait(Duration::from_millis(10));
        host.service_events();
        if let Some(reply) = host.get_global("reply") {
            return reply;
        }
    }
    panic!("no reply from worker");
}

#[test]
fn test_worker_runs_module_handler() {
    let (mut host, pool) = host_and_pool();
    let mut worker = pool
        .spawn(&host, "doubler", |vm| vm.load_module("double-handlers"))
        .unwrap();

    let message = host.new_object().unwrap();
    host.set_property(&message, "n", Value::Number(21.0)).unwrap();
    worker.post_message(&host, &message).unwrap();
    assert_eq!(wait_for_reply(&mut host), Value::Number(42.0));

    worker.terminate();
    assert!(worker.join(&mut host, Duration::from_secs(5)).unwrap());
    assert_eq!(pool.live_count(), 0);
}

#[test]
fn test_cycles_survive_a_round_trip() {
    let (mut host, pool) = host_and_pool();
    let mut worker = pool
        .spawn(&host, "echo", |vm| vm.load_module("echo-handlers"))
        .unwrap();

    let node = host.new_object().unwrap();
    host.set_property(&node, "me", node.clone()).unwrap();
    host.set_property(&node, "label", Value::from("loop")).unwrap();
    worker.post_message(&host, &node).unwrap();

    let reply = wait_for_reply(&mut host);
    assert_ne!(reply, node);
    assert_eq!(host.get_property(&reply, "me").unwrap(), reply);
    assert_eq!(host.get_property(&reply, "label").unwrap(), Value::from("loop"));

    worker.terminate();
    assert!(worker.join(&mut host, Duration::from_secs(5)).unwrap());
}

#[test]
fn test_workers_have_separate_globals() {
    let (mut host, pool) = host_and_pool();
    let mut first = pool
        .spawn(&host, "first", |vm| {
            vm.set_global("marker", Value::Number(1.0))?;
            vm.load_module("echo-handlers")
        })
        .unwrap();
    let mut second = pool
        .spawn(&host, "second", |vm| vm.load_module("echo-handlers"))
        .unwrap();
    assert_eq!(pool.live_count(), 2);

    // each worker echoes what it was sent; the host global is untouched
    let probe = host.new_array(vec![Value::Null]).unwrap();
    second.post_message(&host, &probe).unwrap();
    assert!(host.get_global("marker").is_none());
    let reply = wait_for_reply(&mut host);
    assert_eq!(host.get_property(&reply, "0").unwrap(), Value::Null);

    first.terminate();
    second.terminate();
    assert!(first.join(&mut host, Duration::from_secs(5)).unwrap());
    assert!(second.join(&mut host, Duration::from_secs(5)).unwrap());
    assert_eq!(pool.live_count(), 0);
}
