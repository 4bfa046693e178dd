//! End-to-end checks driving whole op sequences through the pass, the
//! way the driver does after parsing.

use cont::config::{Config, Target};
use cont::ir::{
    Block, BlockType, Loc, Op, OpType, Operand, Operator, Proc, Program, Span, Var,
};
use cont::types::{StructId, Type};
use cont::{type_check, CheckError};

fn loc() -> Loc {
    Loc::new("test.cn", Span::new(0, 1))
}

fn push_int(n: i64) -> Op {
    Op::new(OpType::PushInt, Operand::Int(n), loc())
}

fn oper(operator: Operator) -> Op {
    Op::operator(operator, loc())
}

fn check(program: &mut Program) -> Result<Vec<Option<Type>>, CheckError> {
    type_check(program, &Config::default())
}

fn with_malloc(program: &mut Program) {
    program.add_proc(Proc::new("malloc", vec![Type::Int], vec![Type::ptr_any()]));
}

/// A pointer to a struct, forged the way the driver sees one come out
/// of a cast.
fn struct_ptr_ops(sid: StructId) -> Vec<Op> {
    vec![
        Op::new(OpType::PushNullStr, Operand::Str("p".to_string()), loc()),
        Op::new(
            OpType::CastPtr,
            Operand::Type(Type::ptr_to(Type::Struct(sid))),
            loc(),
        ),
    ]
}

// ========================================================================
// Straight-line programs
// ========================================================================

#[test]
fn test_arithmetic_chain() {
    let mut program = Program::new();
    program.ops = vec![
        push_int(1),
        push_int(2),
        oper(Operator::Add),
        push_int(3),
        oper(Operator::Mul),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

#[test]
fn test_store_type_mismatch_is_reported() {
    let mut program = Program::new();
    program.ops = vec![
        push_int(1),
        Op::new(OpType::PushNullStr, Operand::Str("p".to_string()), loc()),
        Op::new(
            OpType::CastPtr,
            Operand::Type(Type::ptr_to(Type::array_of(4, Type::Int))),
            loc(),
        ),
        oper(Operator::Store),
    ];
    let err = check(&mut program).unwrap_err();
    assert!(matches!(err, CheckError::StackShape { .. }));
    assert!(err.loc().is_some());
}

#[test]
fn test_stack_underflow_names_the_operation() {
    let mut program = Program::new();
    program.ops = vec![oper(Operator::Add)];
    let err = check(&mut program).unwrap_err();
    assert!(err.message().contains("too short"));
}

// ========================================================================
// Branches
// ========================================================================

fn if_else_program(
    program: &mut Program,
    then_ops: Vec<Op>,
    else_ops: Vec<Op>,
) -> cont::ir::BlockId {
    let block = program.add_block(Block::new(BlockType::If));
    let mut ops = vec![push_int(1), Op::new(OpType::If, Operand::Block(block), loc())];
    ops.extend(then_ops);
    ops.push(Op::new(OpType::Else, Operand::Block(block), loc()));
    ops.extend(else_ops);
    ops.push(Op::new(OpType::EndIf, Operand::Block(block), loc()));
    program.ops = ops;
    block
}

#[test]
fn test_if_else_arms_must_agree_in_shape() {
    let mut program = Program::new();
    if_else_program(&mut program, vec![push_int(1)], vec![]);
    let err = check(&mut program).unwrap_err();
    assert!(matches!(err, CheckError::RouteMerge { .. }));
    assert!(err.message().contains("different stack shapes"));
}

#[test]
fn test_if_else_unifies_struct_pointers_to_base() {
    let mut program = Program::new();
    let base = program
        .structs
        .define("Base", None, vec![("x".to_string(), Type::Int)]);
    let child = program
        .structs
        .define("Child", Some(base), vec![("y".to_string(), Type::Int)]);
    if_else_program(&mut program, struct_ptr_ops(child), struct_ptr_ops(base));
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::ptr_to(Type::Struct(base)))]);
}

#[test]
fn test_if_else_unrelated_types_fail() {
    let mut program = Program::new();
    if_else_program(
        &mut program,
        vec![push_int(1)],
        vec![Op::new(
            OpType::PushNullStr,
            Operand::Str("p".to_string()),
            loc(),
        )],
    );
    let err = check(&mut program).unwrap_err();
    assert!(err.message().contains("different types in the routes of if"));
}

#[test]
fn test_branch_arm_effects_are_recorded() {
    let mut program = Program::new();
    let block = if_else_program(&mut program, vec![push_int(1)], vec![push_int(2)]);
    check(&mut program).unwrap();
    assert_eq!(program.block(block).arm_effects, vec![1, 1]);
}

#[test]
fn test_block_addresses_follow_the_output_stream() {
    let mut program = Program::new();
    let block = if_else_program(&mut program, vec![push_int(1)], vec![push_int(2)]);
    check(&mut program).unwrap();
    let b = program.block(block);
    assert_eq!(program.ops[b.start].typ, OpType::If);
    assert_eq!(program.ops[b.end].typ, OpType::EndIf);
}

#[test]
fn test_bare_if_merges_with_fallthrough() {
    // without an else, the arm must leave the pre-branch stack intact
    let mut program = Program::new();
    let block = program.add_block(Block::new(BlockType::If));
    program.ops = vec![
        push_int(1),
        Op::new(OpType::If, Operand::Block(block), loc()),
        push_int(5),
        Op::new(OpType::EndIf, Operand::Block(block), loc()),
    ];
    let err = check(&mut program).unwrap_err();
    assert!(matches!(err, CheckError::RouteMerge { .. }));

    let mut ok = Program::new();
    let block = ok.add_block(Block::new(BlockType::If));
    ok.ops = vec![
        push_int(1),
        Op::new(OpType::If, Operand::Block(block), loc()),
        push_int(5),
        oper(Operator::Drop),
        Op::new(OpType::EndIf, Operand::Block(block), loc()),
    ];
    assert!(check(&mut ok).unwrap().is_empty());
}

// ========================================================================
// Loops
// ========================================================================

#[test]
fn test_while_body_must_preserve_the_stack_shape() {
    let mut program = Program::new();
    let block = program.add_block(Block::new(BlockType::While));
    program.ops = vec![
        push_int(10),
        push_int(1),
        Op::new(OpType::While, Operand::Block(block), loc()),
        oper(Operator::Drop),
        Op::new(OpType::EndWhile, Operand::Block(block), loc()),
    ];
    let err = check(&mut program).unwrap_err();
    assert!(err
        .message()
        .contains("different types/shapes in different routes of while"));
}

#[test]
fn test_counted_loop() {
    // i = 10; while i > 0 { i = i - 1 } in op form
    let mut program = Program::new();
    let block = program.add_block(Block::new(BlockType::While));
    program.ops = vec![
        push_int(10),
        oper(Operator::Dup),
        push_int(0),
        oper(Operator::Gt),
        Op::new(OpType::While, Operand::Block(block), loc()),
        push_int(1),
        oper(Operator::Sub),
        Op::new(OpType::EndWhile, Operand::Block(block), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

#[test]
fn test_for_lowers_to_counted_while() {
    let mut program = Program::new();
    let xs = program.add_var(Var {
        name: "xs".to_string(),
        typ: Type::array_of(3, Type::Int),
    });
    let block = program.add_block(Block::new(BlockType::For));
    program.ops = vec![
        Op::new(OpType::PushVarPtr, Operand::Var(xs), loc()),
        Op::new(OpType::For, Operand::Block(block), loc()),
        Op::new(OpType::EndFor, Operand::Block(block), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert!(stack.is_empty());
    // the surface loop is gone from the output stream
    assert!(!program.ops.iter().any(|o| o.typ == OpType::For));
    assert!(program.ops.iter().any(|o| o.typ == OpType::While));
    assert_eq!(program.block(block).typ, BlockType::While);
}

#[test]
fn test_for_body_sees_the_element_pointer() {
    let mut program = Program::new();
    let xs = program.add_var(Var {
        name: "xs".to_string(),
        typ: Type::array_of(3, Type::Int),
    });
    let block = program.add_block(Block::new(BlockType::For));
    // loop body loads the current element and prints it
    program.ops = vec![
        Op::new(OpType::PushVarPtr, Operand::Var(xs), loc()),
        Op::new(OpType::For, Operand::Block(block), loc()),
        Op::new(OpType::PushBind, Operand::Int(1), loc()),
        oper(Operator::Load),
        oper(Operator::Print),
        Op::new(OpType::EndFor, Operand::Block(block), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert!(stack.is_empty());
}

#[test]
fn test_for_requires_a_sized_array_pointer() {
    let mut program = Program::new();
    let block = program.add_block(Block::new(BlockType::For));
    program.ops = vec![
        push_int(0),
        Op::new(OpType::For, Operand::Block(block), loc()),
        Op::new(OpType::EndFor, Operand::Block(block), loc()),
    ];
    let err = check(&mut program).unwrap_err();
    assert!(err.message().contains("pointer to an array"));
}

// ========================================================================
// Procedures and calls
// ========================================================================

fn proc_body(program: &mut Program, pid: cont::ir::ProcId, body: Vec<Op>) {
    let mut ops = vec![Op::new(OpType::Proc, Operand::Proc(pid), loc())];
    ops.extend(body);
    ops.push(Op::new(OpType::EndProc, Operand::Proc(pid), loc()));
    program.ops = ops;
}

#[test]
fn test_proc_body_checked_against_signature() {
    let mut program = Program::new();
    let add = program.add_proc(Proc::new(
        "add",
        vec![Type::Int, Type::Int],
        vec![Type::Int],
    ));
    proc_body(&mut program, add, vec![oper(Operator::Add)]);
    let stack = check(&mut program).unwrap();
    assert!(stack.is_empty());
}

#[test]
fn test_proc_exit_shape_mismatch() {
    let mut program = Program::new();
    let add = program.add_proc(Proc::new(
        "add",
        vec![Type::Int, Type::Int],
        vec![Type::Int],
    ));
    proc_body(
        &mut program,
        add,
        vec![oper(Operator::Drop), oper(Operator::Drop)],
    );
    let err = check(&mut program).unwrap_err();
    assert!(err.message().contains("wrong stack shape at exit from add"));
}

#[test]
fn test_return_diverges_one_arm() {
    let mut program = Program::new();
    let f = program.add_proc(Proc::new("f", vec![Type::Int], vec![Type::Int]));
    let block = program.add_block(Block::new(BlockType::If));
    proc_body(
        &mut program,
        f,
        vec![
            Op::new(OpType::If, Operand::Block(block), loc()),
            push_int(5),
            Op::new(OpType::Return, Operand::None, loc()),
            Op::new(OpType::Else, Operand::Block(block), loc()),
            Op::new(OpType::EndIf, Operand::Block(block), loc()),
            push_int(3),
        ],
    );
    let stack = check(&mut program).unwrap();
    assert!(stack.is_empty());
}

#[test]
fn test_call_applies_signature() {
    let mut program = Program::new();
    let double = program.add_proc(Proc::new("double", vec![Type::Int], vec![Type::Int]));
    program.ops = vec![
        push_int(21),
        Op::new(OpType::Call, Operand::Proc(double), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

#[test]
fn test_call_argument_mismatch_names_the_proc() {
    let mut program = Program::new();
    let f = program.add_proc(Proc::new("takes-ptr", vec![Type::ptr_to(Type::Int)], vec![]));
    program.ops = vec![push_int(1), Op::new(OpType::Call, Operand::Proc(f), loc())];
    let err = check(&mut program).unwrap_err();
    assert!(err.message().contains("takes-ptr"));
}

#[test]
fn test_call_accepts_derived_where_base_is_declared() {
    let mut program = Program::new();
    let base = program
        .structs
        .define("Base", None, vec![("x".to_string(), Type::Int)]);
    let child = program
        .structs
        .define("Child", Some(base), vec![("y".to_string(), Type::Int)]);
    let f = program.add_proc(Proc::new(
        "takes-base",
        vec![Type::ptr_to(Type::Struct(base))],
        vec![],
    ));
    let mut ops = struct_ptr_ops(child);
    ops.push(Op::new(OpType::Call, Operand::Proc(f), loc()));
    program.ops = ops;
    assert!(check(&mut program).is_ok());

    // the opposite direction is rejected
    let mut program2 = Program::new();
    let base2 = program2
        .structs
        .define("Base", None, vec![("x".to_string(), Type::Int)]);
    let child2 = program2
        .structs
        .define("Child", Some(base2), vec![("y".to_string(), Type::Int)]);
    let g = program2.add_proc(Proc::new(
        "takes-child",
        vec![Type::ptr_to(Type::Struct(child2))],
        vec![],
    ));
    let mut ops = struct_ptr_ops(base2);
    ops.push(Op::new(OpType::Call, Operand::Proc(g), loc()));
    program2.ops = ops;
    assert!(check(&mut program2).is_err());
}

#[test]
fn test_generic_proc_resolves_per_call_site() {
    let mut program = Program::new();
    let t = Type::var("T");
    let id = program.add_proc(Proc::new("id", vec![t.clone()], vec![t]));
    program.ops = vec![push_int(1), Op::new(OpType::Call, Operand::Proc(id), loc())];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

#[test]
fn test_generic_output_needs_a_binding() {
    let mut program = Program::new();
    let t = Type::var("T");
    let mk = program.add_proc(Proc::new("mk", vec![], vec![t]));
    program.ops = vec![Op::new(OpType::Call, Operand::Proc(mk), loc())];
    let err = check(&mut program).unwrap_err();
    assert!(matches!(err, CheckError::GenericResolution { .. }));
    assert!(err.message().contains("T"));
}

#[test]
fn test_call_through_proc_address() {
    let mut program = Program::new();
    let double = program.add_proc(Proc::new("double", vec![Type::Int], vec![Type::Int]));
    program.ops = vec![
        push_int(21),
        Op::new(OpType::PushProc, Operand::Proc(double), loc()),
        Op::new(OpType::CallAddr, Operand::None, loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

// ========================================================================
// Structs end to end
// ========================================================================

#[test]
fn test_pack_then_field_access() {
    let mut program = Program::new();
    with_malloc(&mut program);
    let vec2 = program.structs.define(
        "Vec2",
        None,
        vec![("x".to_string(), Type::Int), ("y".to_string(), Type::Int)],
    );
    program.ops = vec![
        push_int(3),
        push_int(4),
        Op::new(OpType::PackStruct, Operand::Struct(vec2), loc()),
        Op::new(OpType::PushField, Operand::Str("y".to_string()), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
    // the field access carries the resolved byte offset for codegen
    assert_eq!(program.ops.last().unwrap().operand, Operand::Int(8));
}

#[test]
fn test_operator_overload_round_trip() {
    let mut program = Program::new();
    with_malloc(&mut program);
    let vec2 = program
        .structs
        .define("Vec2", None, vec![("x".to_string(), Type::Int)]);
    let add = program.add_proc(Proc::new(
        "Vec2.__add__",
        vec![
            Type::ptr_to(Type::Struct(vec2)),
            Type::ptr_to(Type::Struct(vec2)),
        ],
        vec![Type::ptr_to(Type::Struct(vec2))],
    ));
    program
        .structs
        .get_mut(vec2)
        .methods
        .insert("__add__".to_string(), add);
    program.ops = vec![
        push_int(1),
        Op::new(OpType::PackStruct, Operand::Struct(vec2), loc()),
        push_int(2),
        Op::new(OpType::PackStruct, Operand::Struct(vec2), loc()),
        oper(Operator::Add),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::ptr_to(Type::Struct(vec2)))]);
}

#[test]
fn test_upcast_round_trip() {
    let mut program = Program::new();
    with_malloc(&mut program);
    let base = program
        .structs
        .define("Base", None, vec![("x".to_string(), Type::Int)]);
    let child = program
        .structs
        .define("Child", Some(base), vec![("y".to_string(), Type::Int)]);
    program.ops = vec![
        push_int(9), // value for Child.y
        push_int(1), // value for Base.x
        Op::new(OpType::PackStruct, Operand::Struct(base), loc()),
        Op::new(OpType::Upcast, Operand::Struct(child), loc()),
        Op::new(OpType::PushField, Operand::Str("y".to_string()), loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
}

// ========================================================================
// Backend-facing rewrites
// ========================================================================

#[test]
fn test_index_records_a_runtime_loc_for_fasm() {
    let mut program = Program::new();
    let xs = program.add_var(Var {
        name: "xs".to_string(),
        typ: Type::array_of(2, Type::Int),
    });
    program.ops = vec![
        Op::new(OpType::PushVarPtr, Operand::Var(xs), loc()),
        push_int(0),
        Op::new(OpType::Index, Operand::None, loc()),
    ];
    let stack = check(&mut program).unwrap();
    assert_eq!(stack, vec![Some(Type::Int)]);
    assert_eq!(program.runtime_locs.len(), 1);
    assert_eq!(program.ops.last().unwrap().operand, Operand::Int(0));
}

#[test]
fn test_index_is_not_rewritten_for_wat64() {
    let mut program = Program::new();
    let xs = program.add_var(Var {
        name: "xs".to_string(),
        typ: Type::array_of(2, Type::Int),
    });
    program.ops = vec![
        Op::new(OpType::PushVarPtr, Operand::Var(xs), loc()),
        push_int(0),
        Op::new(OpType::Index, Operand::None, loc()),
    ];
    let config = Config {
        target: Target::Wat64,
        ..Config::default()
    };
    type_check(&mut program, &config).unwrap();
    assert!(program.runtime_locs.is_empty());
    assert_eq!(program.ops.last().unwrap().operand, Operand::None);
}

#[test]
fn test_checking_is_idempotent_on_a_checked_program() {
    // sizeof and for are gone after one pass; a second pass over the
    // rewritten stream reaches the same result
    let mut program = Program::new();
    program.ops = vec![
        Op::new(
            OpType::SizeOf,
            Operand::Type(Type::array_of(4, Type::Int)),
            loc(),
        ),
        push_int(1),
        oper(Operator::Add),
    ];
    let first = check(&mut program).unwrap();
    let rewritten = program.ops.clone();
    let second = check(&mut program).unwrap();
    assert_eq!(first, second);
    assert_eq!(program.ops, rewritten);
}
