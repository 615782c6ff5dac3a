//! Contract tests for core_types
//!
//! These tests verify the public API shared by the engine crates.

use core_types::{
    ErrorKind, QualifiedName, SourcePosition, TraitAttributes, TypeAttributes, Value, ValueId,
    VmError,
};

/// Test Value contract: every runtime value is one of six variants
#[test]
fn test_value_variants_contract() {
    let values = [
        Value::Undefined,
        Value::Null,
        Value::Boolean(true),
        Value::Number(1.0),
        Value::string("s"),
        Value::Ref(ValueId(0)),
    ];
    assert_eq!(values.len(), 6);
}

/// Test ErrorKind contract: the taxonomy has exactly one sentinel
#[test]
fn test_error_taxonomy_contract() {
    assert_eq!(ErrorKind::ALL.len(), 8);
    assert_eq!(ErrorKind::ALL.iter().filter(|k| k.is_sentinel()).count(), 1);
}

/// Test VmError contract: errors serialize for cross-thread reporting
#[test]
fn test_vm_error_serializes_contract() {
    let error = VmError::io("Can't find module app")
        .with_position(Some(SourcePosition::new(1, 1, 0)));
    let json = serde_json::to_string(&error).unwrap();
    let back: VmError = serde_json::from_str(&json).unwrap();
    assert_eq!(back, error);
}

/// Test attribute contract: attribute sets are independent bits
#[test]
fn test_attribute_bits_contract() {
    let type_attrs = TypeAttributes::NATIVE | TypeAttributes::DYNAMIC_INSTANCE;
    assert!(type_attrs.contains(TypeAttributes::NATIVE));
    assert!(!type_attrs.contains(TypeAttributes::FINAL));

    let trait_attrs = TraitAttributes::GETTER;
    assert!(!trait_attrs.contains(TraitAttributes::SETTER));
}

/// Test QualifiedName contract: empty names are placeholders
#[test]
fn test_placeholder_name_contract() {
    assert!(QualifiedName::empty().is_empty());
}
