//! Per-region contamination walker.
//!
//! Walks one top-level directive region at a time, pushing scopes as it
//! enters nested directive bodies and call sites (recursing into callee
//! bodies), registering locals as private, and turning every pointer
//! assignment or initializer into a contamination event on the scope
//! stack. The driver repeats the walk over all top-level regions until a
//! whole round flips no privacy flag.

use super::path::PathStub;
use super::resolve::{dominant_ref, expr_stub};
use super::scope::{ScopeId, ScopeKind, ScopeStack};
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::program::{
    DeclId, ExprId, ExprKind, FunctionId, ProgramContext, StmtId, StmtKind, TypeKind,
};
use tracing::{debug, trace};

/// One contamination walk over a directive region.
pub struct ContaminationPass<'a> {
    ctx: &'a ProgramContext,
    scopes: &'a mut ScopeStack,
    diagnostics: &'a mut dyn DiagnosticHandler,
    report_contamination: bool,
    /// Function whose body is currently being walked; callee bodies push.
    function_stack: Vec<FunctionId>,
}

impl<'a> ContaminationPass<'a> {
    pub fn new(
        ctx: &'a ProgramContext,
        scopes: &'a mut ScopeStack,
        diagnostics: &'a mut dyn DiagnosticHandler,
        report_contamination: bool,
    ) -> Self {
        ContaminationPass {
            ctx,
            scopes,
            diagnostics,
            report_contamination,
            function_stack: Vec::new(),
        }
    }

    /// Walk one top-level directive region.
    pub fn handle_directive(&mut self, scope: ScopeId) {
        let (directive, body) = {
            let s = self.scopes.scope(scope);
            let ScopeKind::Directive { directive } = s.kind else {
                panic!("contamination walk started on a non-directive scope");
            };
            (directive, s.body)
        };
        let function = self
            .ctx
            .function_containing(self.ctx.stmt(body).span)
            .expect("directive body outside any function");

        debug!(?directive, "contamination walk");
        self.scopes.reset_stack();
        self.scopes.push_directive(self.ctx, directive, body);
        self.function_stack.push(function);
        self.walk_stmt(body, body);
        self.function_stack.pop();
    }

    fn current_function(&self) -> FunctionId {
        *self
            .function_stack
            .last()
            .expect("contamination walk outside any function")
    }

    /// Push the directive governing `stmt`, if any. The entry statement's
    /// own directive was already pushed by the caller.
    fn maybe_push_directive(&mut self, stmt: StmtId, entry: StmtId) {
        if stmt == entry {
            return;
        }
        let function = self.current_function();
        let Some(&directive) = self.ctx.function(function).directives.get(&stmt) else {
            return;
        };
        let dir = self.ctx.directive(directive);
        // Unsupported directives were already reported at discovery time;
        // their regions are walked as serial code.
        if dir.is_threadprivate() || !dir.is_supported() {
            return;
        }
        self.scopes.push_directive(self.ctx, directive, stmt);
    }

    fn walk_stmt(&mut self, stmt: StmtId, entry: StmtId) {
        self.maybe_push_directive(stmt, entry);

        if let StmtKind::Decl(decls) = &self.ctx.stmt(stmt).kind {
            for &decl in decls.clone().iter() {
                self.scopes.insert_private_decl(self.ctx, decl);
                if let Some(init) = self.ctx.decl(decl).init {
                    self.handle_init(decl, init);
                }
            }
        }
        for root in self.ctx.stmt_root_exprs(stmt) {
            self.walk_expr(root);
        }
        for child in self.ctx.stmt_children(stmt) {
            self.walk_stmt(child, entry);
        }
    }

    fn walk_expr(&mut self, expr: ExprId) {
        match &self.ctx.expr(expr).kind {
            ExprKind::Call { .. } => self.handle_call(expr),
            ExprKind::Binary(op, lhs, rhs) if op.is_assignment() => {
                self.handle_assignment(*lhs, *rhs);
            }
            _ => {}
        }
        for child in self.ctx.expr_children(expr) {
            self.walk_expr(child);
        }
    }

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
        self.scopes.pop_to(self.ctx.expr(init).span);
        let contaminated = self.scopes.contaminate_decl(
            self.ctx,
            decl,
            &PathStub::empty(),
            dominant.decl,
            &rstub,
            ty,
            self.diagnostics,
        );
        self.report(contaminated, decl, dominant.decl, init);
    }

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

    fn handle_assignment(&mut self, lhs: ExprId, rhs: ExprId) {
        if !self.ctx.types.is_pointer(self.ctx.expr(lhs).ty) {
            return;
        }
        let Some(left) = dominant_ref(self.ctx, lhs) else {
            self.diagnostics.report(Diagnostic::warning(
                "a pointer is modified through an expression with no dominant declaration; \
                 its contamination cannot be determined",
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
        self.scopes.pop_to(self.ctx.expr(lhs).span);
        let contaminated = self.scopes.contaminate_decl(
            self.ctx,
            left.decl,
            &lstub,
            right.decl,
            &rstub,
            ty,
            self.diagnostics,
        );
        self.report(contaminated, left.decl, right.decl, lhs);
    }

    fn report(&mut self, contaminated: bool, lhs: DeclId, rhs: DeclId, at: ExprId) {
        if contaminated && self.report_contamination {
            self.diagnostics.report(Diagnostic::warning(
                format!(
                    "contamination occurred between '{}' and '{}'",
                    self.ctx.decl_name(self.ctx.canonical_decl(lhs)),
                    self.ctx.decl_name(self.ctx.canonical_decl(rhs)),
                ),
                Some(self.ctx.expr(at).span),
            ));
        }
    }

    /// Enter a call site and walk the callee's body under its call scope.
    fn handle_call(&mut self, call: ExprId) {
        let ExprKind::Call { callee, .. } = &self.ctx.expr(call).kind else {
            unreachable!();
        };
        let callee = self.ctx.canonical_function(*callee);

        match self.scopes.push_call(self.ctx, call, self.diagnostics) {
            Some(scope) => {
                let body = self.scopes.scope(scope).body;
                self.function_stack.push(callee);
                self.walk_stmt(body, body);
                self.function_stack.pop();
            }
            None => {
                self.diagnostics.report(Diagnostic::warning(
                    format!(
                        "call to function '{}' does not have a definition, \
                         hence cannot be checked for safety",
                        self.ctx.function_name(callee)
                    ),
                    Some(self.ctx.expr(call).span),
                ));
            }
        }
    }
}
