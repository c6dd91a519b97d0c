use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pascalc_core::ast::{
    Block, Expr, ExprKind, ProcRef, ProcedureEntry, Program, ScopeRef, Stmt, StmtKind, SymEntry, VariableData,
};
use pascalc_core::checker::Checker;
use pascalc_core::codegen::{generate_program, ProcKey};
use pascalc_core::config::Limits;
use pascalc_core::emitter::{Code, Opcode};
use pascalc_core::env::Scope;
use pascalc_core::errors::{CollectingSink, SourceSpan};
use pascalc_core::types::{self, Ty, TypeKind};

fn span() -> SourceSpan {
    SourceSpan { line: 1, column: 1 }
}

fn ident(name: &str) -> Expr {
    Expr::new(span(), types::error_ty(), ExprKind::Identifier(name.to_string()))
}

fn int(n: i64) -> Expr {
    Expr::new(span(), types::integer(), ExprKind::Const(n))
}

fn binary(op: &str, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(span(), types::error_ty(), ExprKind::Binary { op: op.to_string(), resolved: None, lhs: Box::new(lhs), rhs: Box::new(rhs) })
}

fn limits() -> Limits {
    Limits::default()
}

fn root_scope() -> ScopeRef {
    Scope::root(limits().frame_reserved)
}

fn main_proc(scope: ScopeRef, body: Vec<Stmt>) -> ProcRef {
    Rc::new(ProcedureEntry {
        name: "main".to_string(),
        level: 1,
        local_scope: scope.clone(),
        block: RefCell::new(Some(Block { scope, body, procedures: vec![] })),
    })
}

fn check(sink: &CollectingSink, scope: &ScopeRef, stmts: Vec<Stmt>) -> ProcRef {
    let checker = Checker::new(sink, limits());
    let proc = main_proc(scope.clone(), stmts);
    let block = proc.block.borrow_mut().take().unwrap();
    checker.check_procedure(&proc, block);
    proc
}

fn compile(sink: &CollectingSink, proc: &ProcRef) -> Code {
    let program = Program { main: proc.clone() };
    let unit = generate_program(sink, limits(), &program);
    unit.code.get(&ProcKey(proc.clone())).expect("main procedure compiled").clone()
}

fn define_variable(scope: &ScopeRef, name: &str, ty: Ty) -> Rc<VariableData> {
    let var = Rc::new(VariableData { ty, level: scope.level(), offset: scope.alloc_variable_space(1), read_only: Cell::new(false) });
    scope.define(name, SymEntry::Variable(var.clone()));
    var
}

fn array_of_int(lower: i64, upper: i64) -> Ty {
    let index = Rc::new(TypeKind::Subrange { base: types::integer(), lower, upper });
    Rc::new(TypeKind::Array { index, element: types::integer() })
}

// Strips the trailing `Return` that `gen_procedure` always appends.
fn without_trailing_return(code: &Code) -> &[Opcode] {
    let ops = code.ops();
    &ops[..ops.len() - 1]
}

// Scenario 1: `write 1 + 2` emits `ONE; LOAD_CONST 2; ADD; WRITE`.
#[test]
fn write_one_plus_two() {
    let scope = root_scope();
    let sink = CollectingSink::new();
    let proc = check(&sink, &scope, vec![Stmt::new(span(), StmtKind::Write(Box::new(binary("+", int(1), int(2)))))]);
    assert!(!sink.has_errors());

    let code = compile(&sink, &proc);
    assert_eq!(
        without_trailing_return(&code),
        &[Opcode::AllocStack(scope.local_size()), Opcode::One, Opcode::LoadConst(2), Opcode::Add, Opcode::Write]
    );
}

// Scenario 2: `var x: int; x := 5; write x` elaborates the r-value `x` to
// `Dereference(Variable x)` and emits the matching load/store sequence.
#[test]
fn assign_then_write_a_plain_variable() {
    let scope = root_scope();
    let x = define_variable(&scope, "x", types::integer());
    let sink = CollectingSink::new();

    let proc = check(
        &sink,
        &scope,
        vec![
            Stmt::new(span(), StmtKind::Assignment { lhs: Box::new(ident("x")), rhs: Box::new(int(5)) }),
            Stmt::new(span(), StmtKind::Write(Box::new(ident("x")))),
        ],
    );
    assert!(!sink.has_errors());

    {
        let block = proc.block.borrow();
        match &block.as_ref().unwrap().body[1].kind {
            StmtKind::Write(expr) => assert!(matches!(expr.kind, ExprKind::Dereference(_))),
            other => panic!("expected Write, got {other:?}"),
        }
    }

    let code = compile(&sink, &proc);
    assert_eq!(
        without_trailing_return(&code),
        &[
            Opcode::AllocStack(scope.local_size()),
            Opcode::LoadConst(5),
            Opcode::MemRef(0, x.offset),
            Opcode::Store(1),
            Opcode::MemRef(0, x.offset),
            Opcode::Load(1),
            Opcode::Write,
        ]
    );
}

// Scenario 3: `for i := 1 to 3 do write i` synthesizes a scalar type for
// `i` bounded by the literal limits, allocates two hidden slots, marks `i`
// read-only, and compiles to a loop whose back edge and two head checks are
// all present.
#[test]
fn for_loop_synthesizes_a_bounded_scalar_and_marks_its_variable_read_only() {
    let outer = root_scope();
    let inner = Scope::nested_frame(&outer);
    define_variable(&inner, "i", types::integer());
    let sink = CollectingSink::new();
    let proc = check(
        &sink,
        &outer,
        vec![Stmt::new(
            span(),
            StmtKind::For {
                var: Box::new(ident("i")),
                lower: Box::new(int(1)),
                upper: Box::new(int(3)),
                body: Box::new(Stmt::new(span(), StmtKind::Write(Box::new(ident("i"))))),
                scope: inner.clone(),
                low_slot: 0,
                high_slot: 0,
            },
        )],
    );
    assert!(!sink.has_errors());

    let i = match inner.lookup("i") {
        Some(SymEntry::Variable(v)) => v,
        other => panic!("expected `i` to resolve to a Variable, got {other:?}"),
    };
    assert!(i.read_only.get());

    // The loop variable's own symbol-table entry keeps its originally
    // declared type; the synthesized scalar lives on the `For` node's `var`
    // expression, retyped to `Reference(scalar)`.
    let block = proc.block.borrow();
    match &block.as_ref().unwrap().body[0].kind {
        StmtKind::For { var, .. } => match var.ty.as_ref() {
            TypeKind::Reference(scalar) => match scalar.as_ref() {
                TypeKind::Scalar { lower, upper, .. } => {
                    assert_eq!(*lower, 1);
                    assert_eq!(*upper, 3);
                }
                other => panic!("expected a synthesized Scalar, got {other:?}"),
            },
            other => panic!("expected Reference(Scalar), got {other:?}"),
        },
        other => panic!("expected For, got {other:?}"),
    }
    drop(block);

    let code = compile(&sink, &proc);
    assert!(code.ops().iter().any(|op| matches!(op, Opcode::JumpIfFalse(_))));
    assert!(code.ops().iter().any(|op| matches!(op, Opcode::JumpAlways(_))));
}

// `for i := 1 to 3 do i := 0` assigns to the loop's own control variable,
// which must be rejected even though the write is in the loop's immediate
// body.
#[test]
fn assigning_to_a_for_loop_variable_in_its_own_body_is_rejected() {
    let outer = root_scope();
    let inner = Scope::nested_frame(&outer);
    define_variable(&inner, "i", types::integer());
    let sink = CollectingSink::new();
    let proc = check(
        &sink,
        &outer,
        vec![Stmt::new(
            span(),
            StmtKind::For {
                var: Box::new(ident("i")),
                lower: Box::new(int(1)),
                upper: Box::new(int(3)),
                body: Box::new(Stmt::new(span(), StmtKind::Assignment { lhs: Box::new(ident("i")), rhs: Box::new(int(0)) })),
                scope: inner,
                low_slot: 0,
                high_slot: 0,
            },
        )],
    );
    assert!(sink.has_errors());

    let block = proc.block.borrow();
    match &block.as_ref().unwrap().body[0].kind {
        StmtKind::For { body, .. } => match &body.kind {
            StmtKind::Assignment { lhs, .. } => assert!(lhs.is_error()),
            other => panic!("expected Assignment, got {other:?}"),
        },
        other => panic!("expected For, got {other:?}"),
    }
}

// Scenario 4: `a[i+1] := 0` with `a: array[2..5] of int`, `i: int` narrows
// the index to the array's declared range and compiles the address as
// `base + (index - 2) * elementSize`, with a runtime bounds check.
#[test]
fn array_store_narrows_the_index_and_computes_the_element_address() {
    let scope = root_scope();
    define_variable(&scope, "a", array_of_int(2, 5));
    define_variable(&scope, "i", types::integer());
    let sink = CollectingSink::new();

    let index_expr = binary("+", ident("i"), int(1));
    let assign = Stmt::new(
        span(),
        StmtKind::Assignment {
            lhs: Box::new(Expr::new(span(), types::error_ty(), ExprKind::ArrayIndexing { base: Box::new(ident("a")), index: Box::new(index_expr) })),
            rhs: Box::new(int(0)),
        },
    );
    let proc = check(&sink, &scope, vec![assign]);
    assert!(!sink.has_errors());

    {
        let block = proc.block.borrow();
        match &block.as_ref().unwrap().body[0].kind {
            StmtKind::Assignment { lhs, .. } => match &lhs.kind {
                ExprKind::ArrayIndexing { index, .. } => {
                    assert!(matches!(index.kind, ExprKind::NarrowSubrange { lower: 2, upper: 5, .. }));
                }
                other => panic!("expected ArrayIndexing, got {other:?}"),
            },
            other => panic!("expected Assignment, got {other:?}"),
        }
    }

    let code = compile(&sink, &proc);
    assert!(code.ops().iter().any(|op| matches!(op, Opcode::BoundsCheck(2, 5))));
    assert!(code.ops().iter().any(|op| matches!(op, Opcode::LoadConst(-2))));
}

// Scenario 5: `x := y` with `x: bool` and `y: int` is a static error; both
// sides are marked `Error` and compilation continues (the sink queues the
// error rather than halting).
#[test]
fn mismatched_assignment_reports_and_marks_both_sides_error() {
    let scope = root_scope();
    define_variable(&scope, "x", types::boolean());
    define_variable(&scope, "y", types::integer());
    let sink = CollectingSink::new();

    let proc = check(
        &sink,
        &scope,
        vec![Stmt::new(span(), StmtKind::Assignment { lhs: Box::new(ident("x")), rhs: Box::new(ident("y")) })],
    );
    assert!(sink.has_errors());
    let block = proc.block.borrow();
    match &block.as_ref().unwrap().body[0].kind {
        StmtKind::Assignment { rhs, .. } => assert!(rhs.is_error()),
        other => panic!("expected Assignment, got {other:?}"),
    }
}

// Scenario 6: `if x = y then ... else ...` with `=` overloaded over
// `{int*int->bool, bool*bool->bool}`, `x: 1..10`, `y: int`, resolves to the
// int overload after widening `x`.
#[test]
fn overloaded_equality_resolves_to_the_widened_integer_candidate() {
    let scope = root_scope();
    let narrow = Rc::new(TypeKind::Subrange { base: types::integer(), lower: 1, upper: 10 });
    define_variable(&scope, "x", narrow);
    define_variable(&scope, "y", types::integer());
    let sink = CollectingSink::new();

    let proc = check(
        &sink,
        &scope,
        vec![Stmt::new(
            span(),
            StmtKind::If {
                cond: Box::new(binary("=", ident("x"), ident("y"))),
                then_branch: Box::new(Stmt::new(span(), StmtKind::List(vec![]))),
                else_branch: Some(Box::new(Stmt::new(span(), StmtKind::List(vec![])))),
            },
        )],
    );
    assert!(!sink.has_errors());

    let block = proc.block.borrow();
    match &block.as_ref().unwrap().body[0].kind {
        StmtKind::If { cond, .. } => match &cond.kind {
            ExprKind::Binary { resolved, lhs, .. } => {
                assert_eq!(resolved.as_deref(), Some("="));
                assert!(matches!(lhs.kind, ExprKind::WidenSubrange(_)));
                assert_eq!(*cond.ty, *types::boolean());
            }
            other => panic!("expected Binary, got {other:?}"),
        },
        other => panic!("expected If, got {other:?}"),
    }
}
