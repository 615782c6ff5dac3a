//! Unit tests for bytecode_system

use bytecode_system::{
    BlockDef, ClassDef, Code, Constant, Definition, Dependency, ExceptionHandler, FunctionDef,
    HandlerKind, ModuleRecord, Opcode, PropertyDef, TypeRef,
};
use core_types::{QualifiedName, TraitAttributes};

fn sample_module() -> ModuleRecord {
    let mut module = ModuleRecord::new("shapes", 3);
    module.dependencies.push(Dependency {
        name: "core".into(),
        checksum: 42,
        min_version: 1,
        max_version: 9,
    });

    let mut area = Code::new();
    area.emit(Opcode::GetThisSlot(0));
    area.emit(Opcode::Dup);
    area.emit(Opcode::Mul);
    area.emit(Opcode::ReturnValue);

    let mut circle = ClassDef::new("Circle");
    circle.base = Some(TypeRef::Name(QualifiedName::public("Shape")));
    circle
        .instance_properties
        .push(PropertyDef::new("radius").with_value(Constant::Number(1.0)));
    circle.methods.push(
        FunctionDef::new("area", area).with_attributes(TraitAttributes::GETTER),
    );
    module.definitions.push(Definition::Class(circle));
    module.seal();
    module
}

#[test]
fn test_module_bytes_round_trip_keeps_checksum() {
    let module = sample_module();
    let restored = ModuleRecord::from_bytes(&module.to_bytes().unwrap()).unwrap();
    assert_eq!(restored, module);
    assert_eq!(restored.compute_checksum(), restored.checksum);
}

#[test]
fn test_module_checksum_changes_with_new_member() {
    let mut module = sample_module();
    let before = module.checksum;
    if let Definition::Class(class) = &mut module.definitions[0] {
        class.static_properties.push(PropertyDef::new("count"));
    }
    assert_ne!(module.compute_checksum(), before);
}

#[test]
fn test_module_validate_reports_function() {
    let mut module = sample_module();
    let mut bad = Code::new();
    bad.emit(Opcode::OpenBlock(3));
    module
        .definitions
        .push(Definition::Function(FunctionDef::new("broken", bad)));
    let err = module.validate().unwrap_err();
    assert!(err.message.contains("broken"));
}

#[test]
fn test_class_trait_counts() {
    let mut class = ClassDef::new("Point");
    class.instance_properties.push(PropertyDef::new("x"));
    class.instance_properties.push(PropertyDef::new("y"));
    class.constructor = Some(FunctionDef::new("Point", Code::new()));
    class.static_initializer = Some(FunctionDef::new("-init-", Code::new()));
    assert_eq!(class.instance_trait_count(), 2);
    assert_eq!(class.static_trait_count(), 2);
}

#[test]
fn test_try_catch_finally_layout_validates() {
    let mut code = Code::new();
    // try { throw 1 } catch { } finally { }
    code.emit(Opcode::LoadNumber(1.0));
    code.emit(Opcode::Throw);
    code.emit(Opcode::CallFinally(1));
    let skip = code.emit(Opcode::Goto(0));
    let catch_start = code.here();
    code.emit(Opcode::CallFinally(1));
    code.emit(Opcode::EndException);
    let finally_start = code.here();
    code.emit(Opcode::EndException);
    let end = code.here();
    code.patch(skip, end);
    code.emit(Opcode::Return);

    code.add_handler(ExceptionHandler {
        kind: HandlerKind::Catch,
        try_start: 0,
        try_end: 4,
        handler_start: catch_start,
        handler_end: finally_start,
        num_blocks: 0,
        num_stack: 0,
        catch_type: None,
    });
    code.add_handler(ExceptionHandler {
        kind: HandlerKind::Finally,
        try_start: 0,
        try_end: 4,
        handler_start: finally_start,
        handler_end: end,
        num_blocks: 0,
        num_stack: 0,
        catch_type: None,
    });
    assert!(code.validate().is_ok());
    assert!(code.handlers[1].covers(catch_start));
    assert!(!code.handlers[0].covers(catch_start));
}

#[test]
fn test_call_finally_must_name_finally_handler() {
    let mut code = Code::new();
    code.emit(Opcode::CallFinally(0));
    code.add_handler(ExceptionHandler {
        kind: HandlerKind::Catch,
        try_start: 0,
        try_end: 1,
        handler_start: 1,
        handler_end: 1,
        num_blocks: 0,
        num_stack: 0,
        catch_type: None,
    });
    assert!(code.validate().is_err());
}

#[test]
fn test_nested_function_is_validated() {
    let mut inner = Code::new();
    inner.emit(Opcode::Goto(10));
    let mut outer = Code::new();
    let index = outer.add_function(FunctionDef::new("inner", inner));
    outer.emit(Opcode::MakeClosure(index));
    assert!(outer.validate().is_err());
}

#[test]
fn test_names_share_pool_entries() {
    let mut code = Code::new();
    let a = code.name("", "x");
    let b = code.name("ns", "x");
    assert_eq!(a.name, b.name);
    assert_eq!(a.space, 0);
    let block = code.add_block(BlockDef {
        name: "loop".into(),
        slots: vec![QualifiedName::public("i")],
    });
    assert_eq!(block, 0);
    assert_eq!(
        code.constants.qualified_name(b).unwrap(),
        QualifiedName::new("ns", "x")
    );
}
