use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Block, Expr, ExprKind, ProcRef, Program, ScopeRef, Stmt, StmtKind, SymEntry};
use crate::config::Limits;
use crate::errors::{CheckError, ErrorSink, InternalError, SourceSpan};
use crate::types::{self, coerce_to_type, Coercible, OperatorTy, Ty, TypeKind};

impl Coercible for Expr {
    fn ty(&self) -> &Ty {
        &self.ty
    }

    fn wrap_dereference(self) -> Self {
        match self.ty.as_ref() {
            TypeKind::Reference(inner) => {
                let inner = inner.clone();
                let span = self.span;
                Expr::new(span, inner, ExprKind::Dereference(Box::new(self)))
            }
            _ => self,
        }
    }

    fn wrap_narrow(self, target: &Ty) -> Self {
        let span = self.span;
        let (lower, upper) = match target.as_ref() {
            TypeKind::Subrange { lower, upper, .. } => (*lower, *upper),
            _ => (0, 0),
        };
        Expr::new(span, target.clone(), ExprKind::NarrowSubrange { expr: Box::new(self), lower, upper })
    }

    fn wrap_widen(self) -> Self {
        let span = self.span;
        let widened = match self.ty.as_ref() {
            TypeKind::Subrange { base, .. } => base.clone(),
            other => Rc::new(other.clone()),
        };
        Expr::new(span, widened, ExprKind::WidenSubrange(Box::new(self)))
    }
}

// Built-in operator symbols never go through ordinary scope lookup, so they
// cannot be shadowed by a user-declared identifier.
pub struct OperatorTable {
    entries: HashMap<String, Ty>,
}

impl OperatorTable {
    #[must_use]
    pub fn lookup(&self, symbol: &str) -> Option<&Ty> {
        self.entries.get(symbol)
    }

    fn candidate(symbol: &str, arg: Ty, result: Ty) -> OperatorTy {
        OperatorTy { symbol: symbol.to_string(), arg, result }
    }

    fn intersection(symbol: &str, candidates: Vec<OperatorTy>) -> Ty {
        if candidates.len() == 1 {
            let c = candidates.into_iter().next().unwrap();
            Rc::new(TypeKind::Function { arg: c.arg, result: c.result })
        } else {
            let _ = symbol;
            Rc::new(TypeKind::Intersection(candidates))
        }
    }
}

#[must_use]
pub fn standard_operators() -> OperatorTable {
    let int = types::integer();
    let boolean = types::boolean();
    let pair = |a: &Ty, b: &Ty| Rc::new(TypeKind::Product(vec![a.clone(), b.clone()]));

    let mut entries = HashMap::new();
    entries.insert(
        "+".to_string(),
        OperatorTable::intersection("+", vec![OperatorTable::candidate("+", pair(&int, &int), int.clone())]),
    );
    entries.insert(
        "-".to_string(),
        OperatorTable::intersection("-", vec![OperatorTable::candidate("-", pair(&int, &int), int.clone())]),
    );
    entries.insert(
        "*".to_string(),
        OperatorTable::intersection("*", vec![OperatorTable::candidate("*", pair(&int, &int), int.clone())]),
    );
    entries.insert(
        "/".to_string(),
        OperatorTable::intersection("/", vec![OperatorTable::candidate("/", pair(&int, &int), int.clone())]),
    );
    for symbol in ["=", "<>"] {
        entries.insert(
            symbol.to_string(),
            OperatorTable::intersection(
                symbol,
                vec![
                    OperatorTable::candidate(symbol, pair(&int, &int), boolean.clone()),
                    OperatorTable::candidate(symbol, pair(&boolean, &boolean), boolean.clone()),
                ],
            ),
        );
    }
    for symbol in ["<", "<=", ">", ">="] {
        entries.insert(
            symbol.to_string(),
            OperatorTable::intersection(symbol, vec![OperatorTable::candidate(symbol, pair(&int, &int), boolean.clone())]),
        );
    }
    entries.insert(
        "neg".to_string(),
        OperatorTable::intersection("neg", vec![OperatorTable::candidate("neg", int.clone(), int.clone())]),
    );
    entries.insert(
        "pred".to_string(),
        OperatorTable::intersection("pred", vec![OperatorTable::candidate("pred", int.clone(), int.clone())]),
    );
    entries.insert(
        "succ".to_string(),
        OperatorTable::intersection("succ", vec![OperatorTable::candidate("succ", int.clone(), int.clone())]),
    );
    OperatorTable { entries }
}

pub struct Checker<'a> {
    sink: &'a dyn ErrorSink,
    limits: Limits,
    operators: OperatorTable,
}

impl<'a> Checker<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn ErrorSink, limits: Limits) -> Self {
        Checker { sink, limits, operators: standard_operators() }
    }

    fn coerce_to_type(&self, target: &Ty, expr: Expr) -> Result<Expr, Expr> {
        match coerce_to_type(target, expr) {
            Ok(e) => Ok(e),
            Err(_) => Err(Expr::error(SourceSpan::default())),
        }
    }

    // Same search as `coerce_to_type`, but on failure reports a static error
    // and returns an `Error`-typed node instead of propagating the failure.
    fn coerce_exp(&self, target: &Ty, expr: Expr) -> Expr {
        let span = expr.span;
        let found = expr.ty.clone();
        match coerce_to_type(target, expr) {
            Ok(e) => e,
            Err(_) => {
                self.sink.error(CheckError::TypeMismatch { found, expected: target.clone() }, span);
                Expr::error(span)
            }
        }
    }

    fn base_type(ty: &Ty) -> Ty {
        match ty.as_ref() {
            TypeKind::Reference(inner) => inner.clone(),
            _ => ty.clone(),
        }
    }

    pub fn check_procedure(&self, proc: &ProcRef, block: Block) {
        self.sink.debug_message(&format!("checking procedure `{}`", proc.name));
        self.sink.inc_debug();

        let scope = block.scope.clone();
        for child in &block.procedures {
            scope.define(&child.name, SymEntry::Procedure(child.clone()));
        }

        let mut body = block.body;
        for stmt in &mut body {
            self.check_stmt(stmt, &scope);
        }
        if let Err(pending) = scope.resolve_scope() {
            for name in pending {
                self.sink.error(CheckError::Undefined(name), SourceSpan::default());
            }
        }

        for child in &block.procedures {
            let child_block = child.block.borrow_mut().take();
            if let Some(child_block) = child_block {
                self.check_procedure(child, child_block);
            }
        }

        *proc.block.borrow_mut() = Some(Block { scope: scope.clone(), body, procedures: block.procedures });
        self.sink.dec_debug();
    }

    fn check_stmt(&self, stmt: &mut Stmt, scope: &ScopeRef) {
        let span = stmt.span;
        match &mut stmt.kind {
            StmtKind::Assignment { lhs, rhs } => {
                self.check_expr(lhs, scope);
                self.check_expr(rhs, scope);
                if let ExprKind::Variable(v) = &lhs.kind {
                    if v.read_only.get() {
                        self.sink.error(CheckError::ReadOnlyAssignment, lhs.span);
                        **lhs = Expr::error(lhs.span);
                    }
                }
                match lhs.ty.as_ref() {
                    TypeKind::Reference(base) => {
                        let base = base.clone();
                        let owned_rhs = std::mem::replace(rhs.as_mut(), Expr::error(span));
                        *rhs.as_mut() = self.coerce_exp(&base, owned_rhs);
                    }
                    TypeKind::Error => {}
                    _ => {
                        self.sink.error(CheckError::VariableExpected, lhs.span);
                        **lhs = Expr::error(lhs.span);
                    }
                }
            }
            StmtKind::Read(target) => {
                self.check_expr(target, scope);
                let integer = types::integer();
                let ok = matches!(target.ty.as_ref(), TypeKind::Reference(base) if base.as_ref() == integer.as_ref());
                if !ok && !target.is_error() {
                    self.sink.error(CheckError::IntegerVariableExpected, target.span);
                    **target = Expr::error(target.span);
                }
            }
            StmtKind::Write(expr) => {
                self.check_expr(expr, scope);
                let owned = std::mem::replace(expr.as_mut(), Expr::error(span));
                *expr.as_mut() = self.coerce_exp(&types::integer(), owned);
            }
            StmtKind::Call { name, resolved } => match scope.lookup(name) {
                Some(SymEntry::Procedure(proc)) => *resolved = Some(proc),
                Some(_) | None => {
                    self.sink.error(CheckError::ProcedureIdentifierRequired, span);
                    *resolved = None;
                }
            },
            StmtKind::If { cond, then_branch, else_branch } => {
                self.check_condition(cond, scope);
                self.check_stmt(then_branch, scope);
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch, scope);
                }
            }
            StmtKind::While { cond, body } => {
                self.check_condition(cond, scope);
                self.check_stmt(body, scope);
            }
            StmtKind::For { var, lower, upper, body, scope: loop_scope, low_slot, high_slot } => {
                self.check_expr(lower, scope);
                self.check_expr(upper, scope);

                *low_slot = loop_scope.alloc_variable_space(self.limits.hidden_slot_size);
                *high_slot = loop_scope.alloc_variable_space(self.limits.hidden_slot_size);

                self.check_expr(var, loop_scope);

                // Literal bounds win over either bound's own Scalar type: a
                // bare int literal is already typed as plain `integer`,
                // which would otherwise always match first.
                let lower_base = Self::base_type(&lower.ty);
                let upper_base = Self::base_type(&upper.ty);
                let scalar = if let (ExprKind::Const(low_val), ExprKind::Const(high_val)) = (&lower.kind, &upper.kind) {
                    Rc::new(TypeKind::Scalar {
                        name: Rc::from("ScalarTypeFor"),
                        size: 1,
                        lower: *low_val,
                        upper: *high_val,
                    })
                } else if matches!(lower_base.as_ref(), TypeKind::Scalar { .. }) {
                    lower_base
                } else if matches!(upper_base.as_ref(), TypeKind::Scalar { .. }) {
                    upper_base
                } else {
                    Self::base_type(&var.ty)
                };

                var.ty = Rc::new(TypeKind::Reference(scalar.clone()));

                for bound in [lower.as_mut(), upper.as_mut()] {
                    bound.ty = if matches!(bound.kind, ExprKind::Variable(_)) {
                        Rc::new(TypeKind::Reference(scalar.clone()))
                    } else {
                        scalar.clone()
                    };
                }
                let owned_lower = std::mem::replace(lower.as_mut(), Expr::error(span));
                *lower.as_mut() = self.coerce_exp(&scalar, owned_lower);
                let owned_upper = std::mem::replace(upper.as_mut(), Expr::error(span));
                *upper.as_mut() = self.coerce_exp(&scalar, owned_upper);

                if let ExprKind::Variable(v) = &var.kind {
                    v.read_only.set(true);
                }

                self.check_stmt(body, loop_scope);
            }
            StmtKind::List(stmts) => {
                for s in stmts {
                    self.check_stmt(s, scope);
                }
            }
            StmtKind::Error => {}
        }
    }

    fn check_condition(&self, cond: &mut Box<Expr>, scope: &ScopeRef) {
        self.check_expr(cond, scope);
        let span = cond.span;
        let owned = std::mem::replace(cond.as_mut(), Expr::error(span));
        *cond.as_mut() = self.coerce_exp(&types::boolean(), owned);
    }

    fn check_expr(&self, expr: &mut Expr, scope: &ScopeRef) {
        match &mut expr.kind {
            ExprKind::Const(_) | ExprKind::Variable(_) | ExprKind::NarrowSubrange { .. } | ExprKind::WidenSubrange(_) | ExprKind::Error => {}
            ExprKind::Identifier(name) => {
                let span = expr.span;
                match scope.lookup(name) {
                    Some(SymEntry::Constant { ty, value }) => {
                        *expr = Expr::new(span, ty, ExprKind::Const(value));
                    }
                    Some(SymEntry::Variable(v)) => {
                        let ty = Rc::new(TypeKind::Reference(v.ty.clone()));
                        *expr = Expr::new(span, ty, ExprKind::Variable(v));
                    }
                    _ => {
                        self.sink.error(CheckError::ConstantOrVariableRequired, span);
                        *expr = Expr::error(span);
                    }
                }
            }
            ExprKind::Dereference(inner) => {
                self.check_expr(inner, scope);
                let span = expr.span;
                match inner.ty.as_ref() {
                    TypeKind::Reference(base) => expr.ty = base.clone(),
                    TypeKind::Error => expr.ty = types::error_ty(),
                    _ => {
                        self.sink.error(CheckError::NotAReference, span);
                        expr.ty = types::error_ty();
                    }
                }
            }
            ExprKind::Binary { op, resolved, lhs, rhs } => {
                self.check_expr(lhs, scope);
                self.check_expr(rhs, scope);
                let span = expr.span;
                let symbol = op.clone();
                let candidates = self.candidates_for(&symbol, span);
                let lhs_owned = std::mem::replace(lhs.as_mut(), Expr::error(span));
                let rhs_owned = std::mem::replace(rhs.as_mut(), Expr::error(span));
                match self.resolve_binary(&symbol, candidates, lhs_owned, rhs_owned, span) {
                    Some((new_lhs, new_rhs, result_ty, matched)) => {
                        *lhs.as_mut() = new_lhs;
                        *rhs.as_mut() = new_rhs;
                        *resolved = Some(matched);
                        expr.ty = result_ty;
                    }
                    None => {
                        *lhs.as_mut() = Expr::error(span);
                        *rhs.as_mut() = Expr::error(span);
                        expr.ty = types::error_ty();
                    }
                }
            }
            ExprKind::Unary { op, resolved, operand, idx_offset } => {
                self.check_expr(operand, scope);
                let span = expr.span;
                *idx_offset = scope.alloc_variable_space(self.limits.hidden_slot_size);
                let symbol = op.clone();
                let candidates = self.candidates_for(&symbol, span);
                let operand_owned = std::mem::replace(operand.as_mut(), Expr::error(span));
                match self.resolve_unary(&symbol, candidates, operand_owned, span) {
                    Some((new_operand, result_ty, matched)) => {
                        *operand.as_mut() = new_operand;
                        *resolved = Some(matched);
                        expr.ty = result_ty;
                    }
                    None => {
                        *operand.as_mut() = Expr::error(span);
                        expr.ty = types::error_ty();
                    }
                }
            }
            ExprKind::ArrayIndexing { base, index } => {
                self.check_expr(base, scope);
                self.check_expr(index, scope);
                let span = expr.span;
                match base.ty.as_ref() {
                    TypeKind::Error => expr.ty = types::error_ty(),
                    TypeKind::Reference(inner) => match inner.as_ref() {
                        TypeKind::Array { index: arg_ty, element } => {
                            let arg_ty = arg_ty.clone();
                            let element = element.clone();
                            let index_owned = std::mem::replace(index.as_mut(), Expr::error(span));
                            *index.as_mut() = self.coerce_exp(&arg_ty, index_owned);
                            expr.ty = Rc::new(TypeKind::Reference(element));
                        }
                        _ => {
                            self.sink.error(CheckError::NotAnArrayType, span);
                            expr.ty = types::error_ty();
                        }
                    },
                    _ => {
                        self.sink.error(CheckError::NotAnArrayType, span);
                        expr.ty = types::error_ty();
                    }
                }
            }
        }
    }

    fn candidates_for(&self, symbol: &str, span: SourceSpan) -> Vec<OperatorTy> {
        match self.operators.lookup(symbol) {
            Some(ty) => match ty.as_ref() {
                TypeKind::Function { arg, result } => {
                    vec![OperatorTy { symbol: symbol.to_string(), arg: arg.clone(), result: result.clone() }]
                }
                TypeKind::Intersection(candidates) => candidates.clone(),
                _ => self.sink.fatal(InternalError::UnknownOperatorKind, span),
            },
            None => self.sink.fatal(InternalError::UnknownOperatorKind, span),
        }
    }

    fn resolve_binary(
        &self,
        symbol: &str,
        candidates: Vec<OperatorTy>,
        lhs: Expr,
        rhs: Expr,
        span: SourceSpan,
    ) -> Option<(Expr, Expr, Ty, String)> {
        if lhs.is_error() || rhs.is_error() {
            return None;
        }
        for candidate in &candidates {
            let (t1, t2) = match candidate.arg.as_ref() {
                TypeKind::Product(ts) if ts.len() == 2 => (ts[0].clone(), ts[1].clone()),
                _ => continue,
            };
            if types::coercible(&t1, &lhs.ty) && types::coercible(&t2, &rhs.ty) {
                let new_lhs = self.coerce_to_type(&t1, lhs.clone()).unwrap_or_else(|e| e);
                let new_rhs = self.coerce_to_type(&t2, rhs.clone()).unwrap_or_else(|e| e);
                return Some((new_lhs, new_rhs, candidate.result.clone(), candidate.symbol.clone()));
            }
        }
        self.sink.error(
            CheckError::OperatorMismatch { name: symbol.to_string(), operands: vec![lhs.ty.clone(), rhs.ty.clone()] },
            span,
        );
        None
    }

    fn resolve_unary(
        &self,
        symbol: &str,
        candidates: Vec<OperatorTy>,
        operand: Expr,
        span: SourceSpan,
    ) -> Option<(Expr, Ty, String)> {
        if operand.is_error() {
            return None;
        }
        for candidate in &candidates {
            if matches!(candidate.arg.as_ref(), TypeKind::Product(_)) {
                continue;
            }
            if types::coercible(&candidate.arg, &operand.ty) {
                let new_operand = self.coerce_to_type(&candidate.arg, operand.clone()).unwrap_or_else(|e| e);
                return Some((new_operand, candidate.result.clone(), candidate.symbol.clone()));
            }
        }
        self.sink.error(CheckError::OperatorMismatch { name: symbol.to_string(), operands: vec![operand.ty.clone()] }, span);
        None
    }
}

pub fn check_program(sink: &dyn ErrorSink, limits: Limits, program: &Program) {
    sink.debug_message(&format!("checking program `{}`", program.main.name));
    let checker = Checker::new(sink, limits);
    if let Some(block) = program.main.block.borrow_mut().take() {
        checker.check_procedure(&program.main, block);
    }
}
