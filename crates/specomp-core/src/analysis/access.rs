//! Read/write access recording.
//!
//! After contamination has reached its fixpoint, each handler start point
//! (speculative function or uncovered top-level directive) is re-walked
//! to record which declarations its region actually reads and writes.
//! Every declaration reference is classified by walking up its expression
//! spine: assignment targets are writes (compound assignments also read),
//! increments are read+write, a dereference re-targets the chain at the
//! pointed-to storage, member crossings update the access-path stub.
//! Completely-private declarations are skipped outright, and individual
//! accesses that are private at their specific path are not recorded.

use super::resolve::expr_stub;
use super::scope::{ScopeId, ScopeKind, ScopeStack};
use crate::analysis::path::PathStub;
use crate::program::{
    DeclId, ExprId, ExprKind, FunctionId, ProgramContext, StmtId, StmtKind, UnaryOp,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Which kind of start point a walk begins at.
enum Entry {
    Directive(crate::program::DirectiveId),
    Speculative(FunctionId),
}

/// Records read/write sets for every handler start point.
pub struct AccessPass<'a> {
    ctx: &'a ProgramContext,
    scopes: &'a mut ScopeStack,
    /// Parent links of the function currently being walked.
    parents: FxHashMap<ExprId, ExprId>,
    /// Accesses already recorded, keyed by (chain expression, is-write).
    recorded: FxHashSet<(ExprId, bool)>,
    function: FunctionId,
}

impl<'a> AccessPass<'a> {
    pub fn new(ctx: &'a ProgramContext, scopes: &'a mut ScopeStack) -> Self {
        AccessPass {
            ctx,
            scopes,
            parents: FxHashMap::default(),
            recorded: FxHashSet::default(),
            function: FunctionId(0),
        }
    }

    /// Record accesses for one start point.
    pub fn handle_start_point(&mut self, start: ScopeId) {
        self.scopes.reset_stack();
        let body = self.scopes.scope(start).body;
        let entry = {
            let scope = self.scopes.scope(start);
            match &scope.kind {
                ScopeKind::Directive { directive } => Entry::Directive(*directive),
                ScopeKind::SpeculativeFunction { function } => Entry::Speculative(*function),
                ScopeKind::Call { .. } => panic!("access recording started on a call scope"),
            }
        };
        let function = match entry {
            Entry::Directive(directive) => {
                let function = self
                    .ctx
                    .function_containing(self.ctx.stmt(body).span)
                    .expect("directive body outside any function");
                self.scopes.push_directive(self.ctx, directive, body);
                function
            }
            Entry::Speculative(function) => {
                self.scopes.push_speculative(start);
                function
            }
        };
        debug!(?start, "access recording walk");
        self.function = function;
        self.parents = self.ctx.expr_parents(function);
        self.walk_stmt(body, body);
    }

    fn maybe_push_directive(&mut self, stmt: StmtId, entry: StmtId) {
        if stmt == entry {
            return;
        }
        let Some(&directive) = self.ctx.function(self.function).directives.get(&stmt) else {
            return;
        };
        let dir = self.ctx.directive(directive);
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
        if let ExprKind::DeclRef(decl) = self.ctx.expr(expr).kind {
            self.handle_decl_ref(expr, decl);
        }
        for child in self.ctx.expr_children(expr) {
            self.walk_expr(child);
        }
    }

    fn parent(&self, expr: ExprId) -> Option<ExprId> {
        self.parents.get(&expr).copied()
    }

    /// The nearest ancestor that affects access classification: an
    /// operator, subscript, or member access. Calls and casts are
    /// transparent.
    fn relevant_parent(&self, expr: ExprId) -> Option<ExprId> {
        let mut current = expr;
        while let Some(next) = self.parent(current) {
            match self.ctx.expr(next).kind {
                ExprKind::Binary(..)
                | ExprKind::Unary(..)
                | ExprKind::Index { .. }
                | ExprKind::Member { .. } => return Some(next),
                _ => current = next,
            }
        }
        None
    }

    /// Climb from the reference through subscripts taken on its base, so
    /// the chain starts at the innermost expression denoting the
    /// variable's storage. A reference used as an array index stays
    /// itself.
    fn chain_start(&self, expr: ExprId) -> ExprId {
        let mut current = expr;
        while let Some(next) = self.parent(current) {
            match &self.ctx.expr(next).kind {
                ExprKind::Index { index, .. } if *index == current => return current,
                ExprKind::Index { .. } | ExprKind::Cast(_) => current = next,
                _ => return current,
            }
        }
        current
    }

    /// Is `expr` within the written side of this assignment?
    fn is_write_target(&self, assignment: ExprId, expr: ExprId) -> bool {
        let ExprKind::Binary(_, lhs, _) = self.ctx.expr(assignment).kind else {
            return false;
        };
        self.ctx
            .expr(lhs)
            .span
            .contains(self.ctx.expr(expr).span)
    }

    fn is_pointer_like(&self, expr: ExprId) -> bool {
        self.ctx.types.is_pointer_or_array(self.ctx.expr(expr).ty)
    }

    fn handle_decl_ref(&mut self, expr: ExprId, decl: DeclId) {
        let loc = self.ctx.expr(expr).span;
        if self.scopes.is_completely_private(self.ctx, decl, loc) {
            return;
        }
        let var = self.chain_start(expr);
        self.walk_up(expr, decl, var, true, PathStub::empty());
    }

    /// Walk the expression spine upward from `var`, recording accesses.
    /// `actual` is true while the chain still denotes the tracked
    /// storage itself.
    fn walk_up(&mut self, origin: ExprId, decl: DeclId, var: ExprId, actual: bool, stub: PathStub) {
        let Some(next) = self.relevant_parent(var) else {
            // Top of the expression: a plain read.
            self.insert_access(origin, decl, var, false, actual, &stub);
            return;
        };

        match self.ctx.expr(next).kind {
            ExprKind::Binary(op, ..) if op.is_assignment() => {
                if self.is_write_target(next, var) {
                    self.insert_access(origin, decl, var, true, actual, &stub);
                    if op.is_compound_assignment() {
                        self.insert_access(origin, decl, var, false, actual, &stub);
                    }
                } else {
                    self.insert_access(origin, decl, var, false, actual, &stub);
                }
                if self.is_pointer_like(var) && self.is_pointer_like(next) {
                    self.walk_up(origin, decl, next, false, stub);
                }
            }
            ExprKind::Binary(..) => {
                self.insert_access(origin, decl, var, false, actual, &stub);
                if self.is_pointer_like(var) && self.is_pointer_like(next) {
                    self.walk_up(origin, decl, next, false, stub);
                }
            }
            ExprKind::Unary(op, _) => {
                let continue_actual = match op {
                    _ if op.is_increment_or_decrement() => {
                        self.insert_access(origin, decl, var, false, actual, &stub);
                        self.insert_access(origin, decl, var, true, actual, &stub);
                        actual
                    }
                    UnaryOp::Deref => {
                        // Reading the pointer; the chain now denotes the
                        // pointed-to storage.
                        self.insert_access(origin, decl, var, false, actual, &stub);
                        true
                    }
                    _ => {
                        self.insert_access(origin, decl, var, false, actual, &stub);
                        false
                    }
                };
                if self.is_pointer_like(var) {
                    self.walk_up(origin, decl, next, continue_actual, stub);
                }
            }
            ExprKind::Index { index, .. } => {
                if index == var || self.ctx.expr(index).span.contains(self.ctx.expr(var).span) {
                    self.insert_access(origin, decl, var, false, actual, &stub);
                    return;
                }
                if self.is_pointer_like(var) {
                    self.insert_access(origin, decl, var, false, actual, &stub);
                    self.walk_up(origin, decl, next, true, stub);
                }
            }
            ExprKind::Member { arrow, .. } => {
                if arrow {
                    self.insert_access(origin, decl, var, false, actual, &stub);
                }
                let stub = expr_stub(self.ctx, next);
                self.walk_up(origin, decl, next, actual, stub);
            }
            _ => unreachable!("relevant parent returned a transparent node"),
        }
    }

    /// Record one access against the origin declaration, unless it is
    /// private at this specific path or already recorded.
    fn insert_access(
        &mut self,
        origin: ExprId,
        decl: DeclId,
        var: ExprId,
        write: bool,
        actual: bool,
        stub: &PathStub,
    ) {
        if !actual {
            return;
        }
        let ty = self.ctx.expr(var).ty;
        let loc = self.ctx.expr(origin).span;
        if self.scopes.is_private(self.ctx, decl, stub, ty, loc) {
            return;
        }
        if !self.recorded.insert((var, write)) {
            return;
        }
        self.scopes.insert_decl_access(self.ctx, decl, write);
    }
}
