//! Contract tests for the bytecode_system API consumed by the interpreter

use bytecode_system::{Code, ConstantPool, FunctionDef, Instruction, NameRef, Opcode, Operator};
use core_types::SourcePosition;

/// Test ConstantPool contract: index 0 is the empty string
#[test]
fn contract_pool_reserves_zero() {
    let pool = ConstantPool::new();
    assert_eq!(pool.get(0), Some(""));
    assert!(pool.is_empty());
    assert!(pool.string(5).is_err());
}

/// Test Instruction contract: opcode plus optional source position
#[test]
fn contract_instruction_fields() {
    let inst = Instruction::with_position(Opcode::Nop, SourcePosition::new(1, 2, 3));
    let _opcode: &Opcode = &inst.opcode;
    let _pos: &Option<SourcePosition> = &inst.source_position;
}

/// Test Opcode contract: every operator opcode maps to an operator
#[test]
fn contract_operator_opcodes() {
    let ops = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Rem,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::Ushr,
        Opcode::BitAnd,
        Opcode::BitOr,
        Opcode::BitXor,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::StrictEq,
        Opcode::StrictNe,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Neg,
        Opcode::LogicalNot,
        Opcode::BitNot,
    ];
    for op in ops {
        let operator = op.operator().unwrap();
        assert_eq!(operator.is_unary(), matches!(op, Opcode::Neg | Opcode::LogicalNot | Opcode::BitNot));
    }
    assert_eq!(Opcode::Mul.operator().map(Operator::symbol), Some("*"));
}

/// Test Code contract: emit returns consecutive indices
#[test]
fn contract_code_emit_indices() {
    let mut code = Code::new();
    assert_eq!(code.emit(Opcode::LoadNull), 0);
    assert_eq!(code.emit(Opcode::Pop), 1);
    assert_eq!(code.here(), 2);
}

/// Test FunctionDef contract: defaults count toward num_args
#[test]
fn contract_function_def_arity() {
    let def = FunctionDef::new("f", Code::new()).with_params(&["a", "b"], 1);
    assert_eq!(def.num_args, 2);
    assert_eq!(def.num_default, 1);
    assert_eq!(def.num_required(), 1);
}

/// Test NameRef contract: two constant indices
#[test]
fn contract_name_ref_structure() {
    let name = NameRef::new(0, 3);
    assert_eq!(name.space, 0);
    assert_eq!(name.name, 3);
}
