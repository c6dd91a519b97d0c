use std::cell::{Cell, RefCell};
use std::fmt;

use crate::types::Ty;

// Location in the input source, as produced by the (out of scope) parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SourceSpan {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// User-facing, non-fatal diagnostics (§7).
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CheckError {
    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { found: Ty, expected: Ty },
    #[error("no overload of `{name}` accepts operand types {operands:?}")]
    OperatorMismatch { name: String, operands: Vec<Ty> },
    #[error("variable expected")]
    VariableExpected,
    #[error("integer variable expected")]
    IntegerVariableExpected,
    #[error("Procedure identifier required")]
    ProcedureIdentifierRequired,
    #[error("Constant or variable identifier required")]
    ConstantOrVariableRequired,
    #[error("must be an array type")]
    NotAnArrayType,
    #[error("expression cannot be dereferenced")]
    NotAReference,
    #[error("identifier `{0}` is undefined")]
    Undefined(String),
    #[error("cannot assign to a for-loop control variable")]
    ReadOnlyAssignment,
}

// Internal, fatal errors: the checker or generator was handed an AST shape
// that should have been eliminated by an earlier pass. Never queued
// alongside `CheckError`; these abort compilation via panic.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InternalError {
    #[error("unknown operator kind")]
    UnknownOperatorKind,
    #[error("code generation reached an unresolved Identifier node")]
    UnresolvedIdentifier,
    #[error("code generation reached an Error node")]
    ErrorNode,
    #[error("unknown operator symbol `{0}` at code emission")]
    UnknownOperatorSymbol(String),
}

pub fn fatal(err: InternalError, span: SourceSpan) -> ! {
    panic!("internal compiler error at {span}: {err}");
}

pub trait ErrorSink {
    fn error(&self, err: CheckError, span: SourceSpan);
    fn fatal(&self, err: InternalError, span: SourceSpan) -> ! {
        fatal(err, span)
    }
    fn debug_message(&self, msg: &str);
    fn inc_debug(&self);
    fn dec_debug(&self);
}

// Queues `CheckError`s instead of halting; routes debug tracing through
// `log` at `Trace`, indented by the current nesting depth.
#[derive(Default)]
pub struct CollectingSink {
    errors: RefCell<Vec<(CheckError, SourceSpan)>>,
    depth: Cell<u32>,
}

impl CollectingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn errors(&self) -> Vec<(CheckError, SourceSpan)> {
        self.errors.borrow().clone()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.borrow().is_empty()
    }

    pub fn into_errors(self) -> Vec<(CheckError, SourceSpan)> {
        self.errors.into_inner()
    }
}

impl ErrorSink for CollectingSink {
    fn error(&self, err: CheckError, span: SourceSpan) {
        log::debug!("{}static error at {span}: {err}", "  ".repeat(self.depth.get() as usize));
        self.errors.borrow_mut().push((err, span));
    }

    fn debug_message(&self, msg: &str) {
        log::trace!("{}{msg}", "  ".repeat(self.depth.get() as usize));
    }

    fn inc_debug(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    fn dec_debug(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}
