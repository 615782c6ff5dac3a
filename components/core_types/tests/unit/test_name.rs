//! Unit tests for QualifiedName

use core_types::QualifiedName;

#[test]
fn test_namespace_participates_in_equality() {
    let a = QualifiedName::new("ns1", "value");
    let b = QualifiedName::new("ns2", "value");
    assert_ne!(a, b);
    assert!(a.same_name(&b));
}

#[test]
fn test_from_str_is_public() {
    let name: QualifiedName = "count".into();
    assert!(name.is_public());
    assert_eq!(name.name, "count");
}

#[test]
fn test_display_with_namespace() {
    assert_eq!(QualifiedName::new("intrinsic", "print").to_string(), "intrinsic::print");
}
