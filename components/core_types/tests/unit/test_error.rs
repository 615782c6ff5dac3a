//! Unit tests for ErrorKind and VmError

use core_types::{ErrorKind, SourcePosition, StackFrame, VmError};

#[test]
fn test_constructors_set_kind() {
    assert_eq!(VmError::reference("x").kind, ErrorKind::ReferenceError);
    assert_eq!(VmError::type_error("x").kind, ErrorKind::TypeError);
    assert_eq!(VmError::arg("x").kind, ErrorKind::ArgError);
    assert_eq!(VmError::arithmetic("x").kind, ErrorKind::ArithmeticError);
    assert_eq!(VmError::memory("x").kind, ErrorKind::MemoryError);
    assert_eq!(VmError::internal("x").kind, ErrorKind::InternalError);
    assert_eq!(VmError::io("x").kind, ErrorKind::IOError);
    assert_eq!(VmError::stop_iteration().kind, ErrorKind::StopIteration);
}

#[test]
fn test_with_position_and_stack() {
    let frame = StackFrame {
        function_name: Some("main".to_string()),
        source_url: None,
        line: 3,
        column: 1,
    };
    let error = VmError::type_error("bad cast")
        .with_position(Some(SourcePosition::new(3, 1, 40)))
        .with_stack(vec![frame]);

    assert_eq!(error.source_position.map(|p| p.line), Some(3));
    assert_eq!(error.stack_text(), "    at main (<unknown>:3:1)");
}

#[test]
fn test_error_is_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&VmError::internal("boom"));
}
