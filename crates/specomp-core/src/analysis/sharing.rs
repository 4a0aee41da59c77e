//! Whole-program sharing pass.
//!
//! One walk over every function body, before any directive is considered:
//! registers locals and call edges with the alias graph and turns every
//! pointer-typed assignment, pointer/array initializer, and pointer-typed
//! call argument into a symmetric sharing edge. Runs once; the graph's
//! fixpoint closure happens afterwards in
//! [`AliasGraph::propagate_shares`](super::alias::AliasGraph::propagate_shares).

use super::alias::AliasGraph;
use super::path::PathStub;
use super::resolve::{dominant_ref, expr_stub};
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::program::{
    BinOp, DeclId, ExprId, ExprKind, FunctionId, ProgramContext, StmtId, StmtKind, TypeKind,
};
use tracing::{debug, trace};

/// Seeds the alias graph from directly-written code.
pub struct SharingPass<'a> {
    ctx: &'a ProgramContext,
    graph: &'a mut AliasGraph,
    diagnostics: &'a mut dyn DiagnosticHandler,
    current: FunctionId,
}

impl<'a> SharingPass<'a> {
    pub fn new(
        ctx: &'a ProgramContext,
        graph: &'a mut AliasGraph,
        diagnostics: &'a mut dyn DiagnosticHandler,
    ) -> Self {
        SharingPass {
            ctx,
            graph,
            diagnostics,
            current: FunctionId(0),
        }
    }

    /// Walk every defined function once.
    pub fn run(mut self) {
        for function in self.ctx.functions() {
            if self.ctx.canonical_function(function) != function {
                continue;
            }
            if let Some(body) = self.ctx.function(function).body {
                debug!(function = %self.ctx.function_name(function), "sharing pass");
                self.current = function;
                self.walk_stmt(body);
            }
        }
    }

    fn walk_stmt(&mut self, stmt: StmtId) {
        if let StmtKind::Decl(decls) = &self.ctx.stmt(stmt).kind {
            for &decl in decls.clone().iter() {
                self.graph.add_local(self.ctx, decl, self.current);
                if let Some(init) = self.ctx.decl(decl).init {
                    self.handle_init(decl, init);
                }
            }
        }
        for root in self.ctx.stmt_root_exprs(stmt) {
            self.walk_expr(root);
        }
        for child in self.ctx.stmt_children(stmt) {
            self.walk_stmt(child);
        }
    }

    fn walk_expr(&mut self, expr: ExprId) {
        match &self.ctx.expr(expr).kind {
            ExprKind::Call { .. } => self.handle_call(expr),
            ExprKind::Binary(op, lhs, rhs) if op.is_assignment() => {
                self.handle_assignment(*op, *lhs, *rhs);
            }
            _ => {}
        }
        for child in self.ctx.expr_children(expr) {
            self.walk_expr(child);
        }
    }

    /// A pointer or array initializer is a sharing edge from the declared
    /// variable to whatever the initializer points at.
    fn handle_init(&mut self, decl: DeclId, init: ExprId) {
        let mut ty = self.ctx.decl(decl).ty;
        let mut in_array = false;
        loop {
            match self.ctx.types.kind(ty) {
                TypeKind::Array(element) => {
                    in_array = true;
                    ty = *element;
                }
                TypeKind::Pointer(_) => {
                    if in_array {
                        self.array_init(decl, init);
                    } else {
                        self.pointer_init(decl, init);
                    }
                    break;
                }
                _ => break,
            }
        }
    }

    fn pointer_init(&mut self, decl: DeclId, init: ExprId) {
        let Some(dominant) = dominant_ref(self.ctx, init) else {
            trace!(
                decl = %self.ctx.decl_name(decl),
                "initializer has no dominant reference"
            );
            return;
        };
        let rstub = expr_stub(self.ctx, dominant.expr);
        let ty = self.ctx.expr(dominant.expr).ty;
        if self.ctx.types.indirect(ty).is_none() {
            return;
        }
        self.graph.share_pointers(
            self.ctx,
            decl,
            &PathStub::empty(),
            dominant.decl,
            &rstub,
            ty,
            self.current,
            self.current,
            self.diagnostics,
        );
    }

    /// `int *a[] = { &x, q, ... }`: every element is its own edge.
    fn array_init(&mut self, decl: DeclId, init: ExprId) {
        let ExprKind::InitList(inits) = &self.ctx.expr(init).kind else {
            self.diagnostics.report(Diagnostic::warning(
                format!(
                    "expected an initializer list for array '{}'",
                    self.ctx.decl_name(decl)
                ),
                Some(self.ctx.expr(init).span),
            ));
            return;
        };
        for element in inits.clone() {
            if matches!(self.ctx.expr(element).kind, ExprKind::InitList(_)) {
                self.array_init(decl, element);
            } else {
                self.pointer_init(decl, element);
            }
        }
    }

    /// `p = q` with a pointer-typed left side.
    fn handle_assignment(&mut self, _op: BinOp, lhs: ExprId, rhs: ExprId) {
        if !self.ctx.types.is_pointer(self.ctx.expr(lhs).ty) {
            return;
        }
        let Some(left) = dominant_ref(self.ctx, lhs) else {
            self.diagnostics.report(Diagnostic::warning(
                "a pointer is modified through an expression with no dominant declaration; \
                 the sharing edge cannot be recorded",
                Some(self.ctx.expr(lhs).span),
            ));
            return;
        };
        let Some(right) = dominant_ref(self.ctx, rhs) else {
            trace!("assignment right side has no dominant reference");
            return;
        };
        let lstub = expr_stub(self.ctx, left.expr);
        let rstub = expr_stub(self.ctx, right.expr);
        let ty = self.ctx.expr(left.expr).ty;
        if self.ctx.types.indirect(ty).is_none() {
            return;
        }
        let updated = self.graph.share_pointers(
            self.ctx,
            left.decl,
            &lstub,
            right.decl,
            &rstub,
            ty,
            self.current,
            self.current,
            self.diagnostics,
        );
        if updated {
            trace!(
                lhs = %self.ctx.decl_name(self.ctx.canonical_decl(left.decl)),
                rhs = %self.ctx.decl_name(self.ctx.canonical_decl(right.decl)),
                "assignment sharing edge recorded"
            );
        }
    }

    /// A call links each pointer-typed formal parameter to the dominant
    /// declaration of its actual argument, across the two functions'
    /// tables.
    fn handle_call(&mut self, call: ExprId) {
        self.graph.add_call(self.ctx, call, self.current);

        let ExprKind::Call { callee, args } = &self.ctx.expr(call).kind else {
            unreachable!();
        };
        let callee = self.ctx.canonical_function(*callee);
        let args = args.clone();
        if self.graph.tracker(callee).is_none() {
            return;
        }
        for (i, &param) in self.ctx.function(callee).params.iter().enumerate() {
            let Some(dominant) = dominant_ref(self.ctx, args[i]) else {
                continue;
            };
            let rstub = expr_stub(self.ctx, dominant.expr);
            let ty = self.ctx.expr(dominant.expr).ty;
            if self.ctx.types.indirect(ty).is_none() {
                continue;
            }
            self.graph.share_pointers(
                self.ctx,
                param,
                &PathStub::empty(),
                dominant.decl,
                &rstub,
                ty,
                callee,
                self.current,
                self.diagnostics,
            );
        }
    }
}
