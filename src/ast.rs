use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::env::Scope;
use crate::errors::SourceSpan;
use crate::types::Ty;

// Operator written in source form, before overload resolution has picked a
// concrete candidate.
pub type OpSymbol = String;

#[derive(Clone, Debug)]
pub struct VariableData {
    pub ty: Ty,
    pub level: u32,
    pub offset: u32,
    // Flipped by the `for` checker once this variable becomes a loop
    // control variable; checked by the assignment checker.
    pub read_only: Cell<bool>,
}

pub type VarRef = Rc<VariableData>;

pub type ScopeRef = Rc<Scope<SymEntry>>;

#[derive(Debug)]
pub struct ProcedureEntry {
    pub name: String,
    pub level: u32,
    pub local_scope: ScopeRef,
    pub block: RefCell<Option<Block>>,
}

pub type ProcRef = Rc<ProcedureEntry>;

#[derive(Clone, Debug)]
pub struct OperatorEntry {
    pub ty: Ty,
}

#[derive(Clone, Debug)]
pub enum SymEntry {
    Constant { ty: Ty, value: i64 },
    Variable(VarRef),
    Procedure(ProcRef),
    Type(Ty),
    Operator(Rc<OperatorEntry>),
}

impl SymEntry {
    #[must_use]
    pub fn ty(&self) -> Ty {
        match self {
            SymEntry::Constant { ty, .. } => ty.clone(),
            SymEntry::Variable(v) => v.ty.clone(),
            SymEntry::Type(t) => t.clone(),
            SymEntry::Operator(op) => op.ty.clone(),
            SymEntry::Procedure(_) => crate::types::error_ty(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub scope: ScopeRef,
    pub body: Vec<Stmt>,
    pub procedures: Vec<ProcRef>,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub span: SourceSpan,
    pub ty: Ty,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(span: SourceSpan, ty: Ty, kind: ExprKind) -> Self {
        Expr { span, ty, kind }
    }

    #[must_use]
    pub fn error(span: SourceSpan) -> Self {
        Expr { span, ty: crate::types::error_ty(), kind: ExprKind::Error }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        crate::types::is_error(&self.ty)
    }
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Const(i64),
    // Not-yet-resolved name; the checker replaces this with `Const`,
    // `Variable`, or `Error`.
    Identifier(String),
    Variable(VarRef),
    Binary {
        op: OpSymbol,
        resolved: Option<OpSymbol>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: OpSymbol,
        resolved: Option<OpSymbol>,
        operand: Box<Expr>,
        // Hidden frame word reserved for pred/succ's wrap computation.
        idx_offset: u32,
    },
    ArrayIndexing {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Dereference(Box<Expr>),
    NarrowSubrange {
        expr: Box<Expr>,
        lower: i64,
        upper: i64,
    },
    WidenSubrange(Box<Expr>),
    Error,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub span: SourceSpan,
    pub kind: StmtKind,
}

impl Stmt {
    #[must_use]
    pub fn new(span: SourceSpan, kind: StmtKind) -> Self {
        Stmt { span, kind }
    }
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Assignment { lhs: Box<Expr>, rhs: Box<Expr> },
    Read(Box<Expr>),
    Write(Box<Expr>),
    // `None` means either not yet checked, or checked and reported as an
    // error.
    Call { name: String, resolved: Option<ProcRef> },
    If { cond: Box<Expr>, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    While { cond: Box<Expr>, body: Box<Stmt> },
    For {
        var: Box<Expr>,
        lower: Box<Expr>,
        upper: Box<Expr>,
        body: Box<Stmt>,
        // Pre-allocated inner scope; the checker populates it with the two
        // hidden slots.
        scope: ScopeRef,
        low_slot: u32,
        high_slot: u32,
    },
    List(Vec<Stmt>),
    Error,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub main: ProcRef,
}
