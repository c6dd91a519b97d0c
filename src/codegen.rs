use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Block, Expr, ExprKind, ProcRef, Program, Stmt, StmtKind};
use crate::config::Limits;
use crate::emitter::{Code, Opcode};
use crate::errors::{ErrorSink, InternalError, SourceSpan};
use crate::types::{Ty, TypeKind};

// Keys by pointer identity, not the `RefCell` contents.
#[derive(Clone)]
#[allow(clippy::mutable_key_type)]
pub struct ProcKey(pub ProcRef);

impl PartialEq for ProcKey {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ProcKey {}
impl std::hash::Hash for ProcKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

pub type CompiledProgram = HashMap<ProcKey, Code>;

pub struct CompiledUnit {
    pub main: ProcRef,
    pub code: CompiledProgram,
}

// A reference's width is its base's, since `STORE`/`LOAD` always move the
// pointed-to value, never the pointer's own representation.
fn ty_size(ty: &Ty) -> u32 {
    match ty.as_ref() {
        TypeKind::Scalar { size, .. } => *size,
        TypeKind::Subrange { base, .. } => ty_size(base),
        TypeKind::Reference(inner) => ty_size(inner),
        _ => 1,
    }
}

// Reads the bounds from the subrange the checker widened away, since the
// operator table coerces pred/succ's operand to plain `integer`.
fn scalar_bounds(operand: &Expr) -> (i64, i64) {
    let ty = match &operand.kind {
        ExprKind::WidenSubrange(inner) => &inner.ty,
        _ => &operand.ty,
    };
    match ty.as_ref() {
        TypeKind::Scalar { lower, upper, .. } | TypeKind::Subrange { lower, upper, .. } => (*lower, *upper),
        _ => (i64::MIN, i64::MAX),
    }
}

pub struct CodeGen<'a> {
    sink: &'a dyn ErrorSink,
    limits: Limits,
}

impl<'a> CodeGen<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn ErrorSink, limits: Limits) -> Self {
        CodeGen { sink, limits }
    }

    #[allow(clippy::mutable_key_type)]
    pub fn gen_procedure(&self, proc: &ProcRef, static_level: u32, out: &mut CompiledProgram) {
        let block = {
            let borrowed = proc.block.borrow();
            borrowed.clone().unwrap_or_else(|| self.sink.fatal(InternalError::ErrorNode, SourceSpan::default()))
        };
        let mut code = self.gen_block(&block, static_level);
        code.generate_op(Opcode::Return);
        out.insert(ProcKey(proc.clone()), code);

        for child in &block.procedures {
            self.gen_procedure(child, static_level + 1, out);
        }
    }

    fn gen_block(&self, block: &Block, static_level: u32) -> Code {
        let mut code = Code::new(self.limits);
        code.gen_alloc_stack(block.scope.local_size());
        for stmt in &block.body {
            code.append(self.gen_stmt(stmt, static_level));
        }
        code
    }

    fn gen_stmt(&self, stmt: &Stmt, level: u32) -> Code {
        match &stmt.kind {
            StmtKind::Assignment { lhs, rhs } => {
                let mut code = self.gen_expr(rhs, level);
                code.append(self.gen_expr(lhs, level));
                code.gen_store(ty_size(&rhs.ty));
                code
            }
            StmtKind::Read(target) => {
                let mut code = Code::new(self.limits);
                code.generate_op(Opcode::Read);
                code.append(self.gen_expr(target, level));
                let deref_ty = match target.ty.as_ref() {
                    TypeKind::Reference(inner) => inner.clone(),
                    _ => target.ty.clone(),
                };
                code.gen_store(ty_size(&deref_ty));
                code
            }
            StmtKind::Write(expr) => {
                let mut code = self.gen_expr(expr, level);
                code.generate_op(Opcode::Write);
                code
            }
            StmtKind::Call { resolved, .. } => {
                let proc = resolved.clone().unwrap_or_else(|| self.sink.fatal(InternalError::ErrorNode, stmt.span));
                let mut code = Code::new(self.limits);
                code.gen_call(level as i32 - proc.level as i32, proc);
                code
            }
            StmtKind::If { cond, then_branch, else_branch } => {
                let cond_code = self.gen_expr(cond, level);
                let then_code = self.gen_stmt(then_branch, level);
                let else_code = match else_branch {
                    Some(e) => self.gen_stmt(e, level),
                    None => Code::new(self.limits),
                };
                Code::gen_if_then_else(cond_code, then_code, else_code)
            }
            StmtKind::While { cond, body } => self.gen_while(cond, body, level),
            StmtKind::For { var, lower, upper, body, scope, low_slot, high_slot } => {
                self.gen_for(var, lower, upper, body, scope.local_size(), *low_slot, *high_slot, level)
            }
            StmtKind::List(stmts) => {
                let mut code = Code::new(self.limits);
                for s in stmts {
                    code.append(self.gen_stmt(s, level));
                }
                code
            }
            StmtKind::Error => self.sink.fatal(InternalError::ErrorNode, stmt.span),
        }
    }

    // `body`'s size must be known before the forward JIF is sized, so it is
    // assembled first.
    fn gen_while(&self, cond: &Expr, body: &Stmt, level: u32) -> Code {
        let body_code = self.gen_stmt(body, level);
        let cond_code = self.gen_expr(cond, level);
        let jump_width = self.limits.size_jump_always as i32;
        let body_len = body_code.size() as i32;

        let mut out = Code::new(self.limits);
        out.append(cond_code);
        out.gen_jump_if_false(body_len + jump_width);
        out.append(body_code);
        let current_size = out.size() as i32;
        out.gen_jump_always(-(current_size + jump_width));
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn gen_for(
        &self,
        var: &Expr,
        lower: &Expr,
        upper: &Expr,
        body: &Stmt,
        _local_size: u32,
        low_slot: u32,
        high_slot: u32,
        level: u32,
    ) -> Code {
        let width = ty_size(&var.ty);
        let slot_width = self.limits.hidden_slot_size;
        let jump_width = self.limits.size_jump_always as i32;

        let mut init = Code::new(self.limits);
        init.append(self.gen_expr(lower, level));
        init.append(self.gen_expr(var, level));
        init.gen_store(width);
        init.append(self.gen_expr(lower, level));
        init.gen_mem_ref(0, low_slot);
        init.gen_store(slot_width);
        init.append(self.gen_expr(upper, level));
        init.gen_mem_ref(0, high_slot);
        init.gen_store(slot_width);

        let var_value = |gen: &Self| {
            let mut c = gen.gen_expr(var, level);
            c.gen_load(width);
            c
        };
        let low_slot_value = |gen: &Self| {
            let mut c = Code::new(gen.limits);
            c.gen_mem_ref(0, low_slot);
            c.gen_load(slot_width);
            c
        };
        let high_slot_value = |gen: &Self| {
            let mut c = Code::new(gen.limits);
            c.gen_mem_ref(0, high_slot);
            c.gen_load(slot_width);
            c
        };

        let mut body_code = self.gen_stmt(body, level);
        body_code.append(var_value(self));
        body_code.generate_op(Opcode::One);
        body_code.generate_op(Opcode::Add);
        body_code.append(self.gen_expr(var, level));
        body_code.gen_store(width);

        let mut check2 = Code::new(self.limits);
        check2.append(var_value(self));
        check2.append(high_slot_value(self));
        check2.generate_op(Opcode::LessEq);
        let check2_size = check2.size() as i32;
        let skip_to_exit = body_code.size() as i32 + jump_width;

        let mut check1 = Code::new(self.limits);
        check1.append(low_slot_value(self));
        check1.append(var_value(self));
        check1.generate_op(Opcode::LessEq);

        let mut head = Code::new(self.limits);
        head.append(check1);
        head.gen_jump_if_false(check2_size + jump_width + skip_to_exit);
        head.append(check2);
        head.gen_jump_if_false(skip_to_exit);

        let mut out = init;
        let back_distance = head.size() as i32 + body_code.size() as i32;
        out.append(head);
        out.append(body_code);
        out.gen_jump_always(-(back_distance + jump_width));
        out
    }

    fn gen_expr(&self, expr: &Expr, level: u32) -> Code {
        let mut code = Code::new(self.limits);
        match &expr.kind {
            ExprKind::Const(n) => match *n {
                0 => code.generate_op(Opcode::Zero),
                1 => code.generate_op(Opcode::One),
                n => code.gen_load_constant(n),
            },
            ExprKind::Variable(v) => {
                code.gen_mem_ref(level as i32 - v.level as i32, v.offset);
            }
            ExprKind::Dereference(inner) => {
                code = self.gen_expr(inner, level);
                code.gen_load(ty_size(&expr.ty));
            }
            ExprKind::NarrowSubrange { expr: inner, lower, upper } => {
                code = self.gen_expr(inner, level);
                code.gen_bounds_check(*lower, *upper);
            }
            ExprKind::WidenSubrange(inner) => {
                code = self.gen_expr(inner, level);
            }
            ExprKind::Binary { resolved, lhs, rhs, .. } => {
                let symbol = resolved.as_deref().unwrap_or_else(|| self.sink.fatal(InternalError::ErrorNode, expr.span));
                code = self.gen_binary(symbol, lhs, rhs, level, expr.span);
            }
            ExprKind::Unary { resolved, operand, idx_offset, .. } => {
                let symbol = resolved.as_deref().unwrap_or_else(|| self.sink.fatal(InternalError::ErrorNode, expr.span));
                code = self.gen_unary(symbol, operand, *idx_offset, level, expr.span);
            }
            ExprKind::ArrayIndexing { base, index } => {
                code = self.gen_array_indexing(base, index, level);
            }
            ExprKind::Identifier(_) => self.sink.fatal(InternalError::UnresolvedIdentifier, expr.span),
            ExprKind::Error => self.sink.fatal(InternalError::ErrorNode, expr.span),
        }
        code
    }

    fn gen_binary(&self, symbol: &str, lhs: &Expr, rhs: &Expr, level: u32, span: SourceSpan) -> Code {
        let left = self.gen_expr(lhs, level);
        let right = self.gen_expr(rhs, level);
        let mut code = Code::new(self.limits);
        match symbol {
            "+" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Add);
            }
            "-" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Negate);
                code.generate_op(Opcode::Add);
            }
            "*" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Mpy);
            }
            "/" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Div);
            }
            "=" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Equal);
            }
            "<>" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Equal);
                code.gen_bool_not();
            }
            "<" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::Less);
            }
            "<=" => {
                code.append(left);
                code.append(right);
                code.generate_op(Opcode::LessEq);
            }
            ">" => {
                code.append(right);
                code.append(left);
                code.generate_op(Opcode::Less);
            }
            ">=" => {
                code.append(right);
                code.append(left);
                code.generate_op(Opcode::LessEq);
            }
            other => self.sink.fatal(InternalError::UnknownOperatorSymbol(other.to_string()), span),
        }
        code
    }

    fn gen_unary(&self, symbol: &str, operand: &Expr, idx_offset: u32, level: u32, span: SourceSpan) -> Code {
        match symbol {
            "neg" => {
                let mut code = self.gen_expr(operand, level);
                code.generate_op(Opcode::Negate);
                code
            }
            "pred" | "succ" => self.gen_pred_succ(symbol, operand, idx_offset, level),
            other => self.sink.fatal(InternalError::UnknownOperatorSymbol(other.to_string()), span),
        }
    }

    fn gen_pred_succ(&self, symbol: &str, operand: &Expr, idx_offset: u32, level: u32) -> Code {
        let step: i64 = if symbol == "pred" { -1 } else { 1 };
        let (lower, upper) = scalar_bounds(operand);
        let width = self.limits.hidden_slot_size;

        let slot_value = |gen: &Self| {
            let mut c = Code::new(gen.limits);
            c.gen_mem_ref(0, idx_offset);
            c.gen_load(width);
            c
        };

        let mut code = self.gen_expr(operand, level);
        code.gen_load_constant(step);
        code.generate_op(Opcode::Add);
        code.gen_mem_ref(0, idx_offset);
        code.gen_store(width);

        if let Some(range_width) = upper.checked_sub(lower).and_then(|w| w.checked_add(1)) {
            // if slot < lower { slot += (upper - lower + 1) }
            let mut low_cond = slot_value(self);
            low_cond.gen_load_constant(lower);
            low_cond.generate_op(Opcode::Less);
            let mut low_then = slot_value(self);
            low_then.gen_load_constant(range_width);
            low_then.generate_op(Opcode::Add);
            low_then.gen_mem_ref(0, idx_offset);
            low_then.gen_store(width);
            code.append(Code::gen_if_then_else(low_cond, low_then, Code::new(self.limits)));

            // if slot > upper { slot -= (upper - lower + 1) }
            let mut high_cond = Code::new(self.limits);
            high_cond.gen_load_constant(upper);
            high_cond.append(slot_value(self));
            high_cond.generate_op(Opcode::Less);
            let mut high_then = slot_value(self);
            high_then.gen_load_constant(range_width);
            high_then.generate_op(Opcode::Negate);
            high_then.generate_op(Opcode::Add);
            high_then.gen_mem_ref(0, idx_offset);
            high_then.gen_store(width);
            code.append(Code::gen_if_then_else(high_cond, high_then, Code::new(self.limits)));
        }

        code.append(slot_value(self));
        code
    }

    fn gen_array_indexing(&self, base: &Expr, index: &Expr, level: u32) -> Code {
        let (lower, element) = match base.ty.as_ref() {
            TypeKind::Reference(inner) => match inner.as_ref() {
                TypeKind::Array { index: idx_ty, element } => {
                    let lower = match idx_ty.as_ref() {
                        TypeKind::Scalar { lower, .. } | TypeKind::Subrange { lower, .. } => *lower,
                        _ => 0,
                    };
                    (lower, element.clone())
                }
                _ => self.sink.fatal(InternalError::ErrorNode, base.span),
            },
            _ => self.sink.fatal(InternalError::ErrorNode, base.span),
        };
        let element_size = ty_size(&element) as i64;

        let mut code = self.gen_expr(base, level);
        code.append(self.gen_expr(index, level));
        code.gen_load_constant(-lower);
        code.generate_op(Opcode::Add);
        code.gen_load_constant(element_size);
        code.generate_op(Opcode::Mpy);
        code.generate_op(Opcode::Add);
        code
    }
}

#[must_use]
#[allow(clippy::mutable_key_type)]
pub fn generate_program(sink: &dyn ErrorSink, limits: Limits, program: &Program) -> CompiledUnit {
    sink.debug_message(&format!("generating code for program `{}`", program.main.name));
    let codegen = CodeGen::new(sink, limits);
    let mut code = CompiledProgram::new();
    codegen.gen_procedure(&program.main, program.main.level, &mut code);
    CompiledUnit { main: program.main.clone(), code }
}
