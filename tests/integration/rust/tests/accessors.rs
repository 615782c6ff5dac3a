//! Getter and setter pairs defined by modules and used from script

use bytecode_system::{ClassDef, Code, Constant, Definition, FunctionDef, ModuleRecord, Opcode, PropertyDef, TypeRef};
use core_types::{QualifiedName, TraitAttributes, Value};
use integration_tests::vm_with_modules;

/// class Gauge { raw = 4; get value() { return raw * 2 } set value(v) { raw = v + 1 } }
/// class Dial extends Gauge {}
fn gauges() -> ModuleRecord {
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

    let mut dial = ClassDef::new("Dial");
    dial.base = Some(TypeRef::Name(QualifiedName::public("Gauge")));

    let mut module = ModuleRecord::new("gauges", 1);
    module.definitions.push(Definition::Class(gauge));
    module.definitions.push(Definition::Class(dial));
    module.seal();
    module
}

/// g = new <class>; g.value = 10; return [g.raw, g.value]
fn write_then_read(class: &str) -> FunctionDef {
    let mut code = Code::new();
    let class = code.name("", class);
    let value = code.name("", "value");
    let raw = code.name("", "raw");
    code.emit(Opcode::GetScopedName(class));
    code.emit(Opcode::New(0));
    code.emit(Opcode::PutLocalSlot(0));
    code.emit(Opcode::GetLocalSlot(0));
    code.emit(Opcode::LoadNumber(10.0));
    code.emit(Opcode::PutObjName(value));
    code.emit(Opcode::GetLocalSlot(0));
    code.emit(Opcode::GetObjName(raw));
    code.emit(Opcode::GetLocalSlot(0));
    code.emit(Opcode::GetObjName(value));
    code.emit(Opcode::NewArray(2));
    code.emit(Opcode::ReturnValue);
    FunctionDef::new("main", code).with_locals(&["g"])
}

#[test]
fn test_getter_reads_and_setter_writes() {
    let mut vm = vm_with_modules(vec![gauges()]);
    let gauge = vm.get_global("Gauge").unwrap();
    let global = vm.global();
    let instance = vm.call_function(&gauge, &global, &[]).unwrap();
    vm.add_root(instance.clone());
    assert_eq!(vm.get_property(&instance, "value").unwrap(), Value::Number(8.0));

    let pair = vm.run(&write_then_read("Gauge")).unwrap();
    assert_eq!(vm.get_property(&pair, "0").unwrap(), Value::Number(11.0));
    assert_eq!(vm.get_property(&pair, "1").unwrap(), Value::Number(22.0));
}

#[test]
fn test_accessors_are_inherited() {
    let mut vm = vm_with_modules(vec![gauges()]);
    let pair = vm.run(&write_then_read("Dial")).unwrap();
    assert_eq!(vm.get_property(&pair, "0").unwrap(), Value::Number(11.0));
    assert_eq!(vm.get_property(&pair, "1").unwrap(), Value::Number(22.0));
}
