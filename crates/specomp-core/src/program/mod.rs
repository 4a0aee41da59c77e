//! The whole-program snapshot the engine analyzes.
//!
//! [`ProgramContext`] owns every arena (types, declarations, expressions,
//! statements, functions, directives) plus the canonicalization tables that
//! collapse extern re-declarations and repeated function signatures to one
//! instance each. It is constructed once by the front end (or a test
//! builder) and then passed by reference into every analysis component —
//! there is no process-wide state.

pub mod ast;
pub mod directive;
pub mod interner;
pub mod types;

pub use ast::{
    BinOp, Decl, DeclId, Expr, ExprId, ExprKind, Function, FunctionId, Span, Stmt, StmtId,
    StmtKind, StorageKind, UnaryOp,
};
pub use directive::{Clause, ClauseKind, ConstructKind, Directive, DirectiveId};
pub use interner::{StringId, StringInterner};
pub use types::{Field, RecordKind, TypeId, TypeKind, TypeTable};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Errors surfaced while constructing the program model. These are contract
/// errors in the front-end facts, not analysis diagnostics.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("type `{0}` is not a pointer or array")]
    NotIndirectable(String),
    #[error("type `{0}` has no field named `{1}`")]
    UnknownField(String, String),
    #[error("call to `{0}` passes {1} arguments, expected {2}")]
    ArityMismatch(String, usize, usize),
}

/// The program snapshot: arenas + registries.
#[derive(Debug, Default)]
pub struct ProgramContext {
    pub interner: StringInterner,
    pub types: TypeTable,
    decls: Vec<Decl>,
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    functions: Vec<Function>,
    directives: Vec<Directive>,
    /// Registration order of global declarations.
    globals: Vec<DeclId>,
    /// Non-canonical declaration → its canonical instance.
    canonical_decls: FxHashMap<DeclId, DeclId>,
    /// Non-canonical function → its canonical instance.
    canonical_fns: FxHashMap<FunctionId, FunctionId>,
    /// Globals named by `threadprivate` directives.
    threadprivate: FxHashSet<DeclId>,
}

impl ProgramContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- arena accessors -------------------------------------------------

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn directive(&self, id: DirectiveId) -> &Directive {
        &self.directives[id.index()]
    }

    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        (0..self.functions.len()).map(|i| FunctionId(i as u32))
    }

    pub fn directive_ids(&self) -> impl Iterator<Item = DirectiveId> + '_ {
        (0..self.directives.len()).map(|i| DirectiveId(i as u32))
    }

    pub fn globals(&self) -> &[DeclId] {
        &self.globals
    }

    pub fn decl_name(&self, id: DeclId) -> String {
        self.interner.resolve(self.decl(id).name)
    }

    pub fn function_name(&self, id: FunctionId) -> String {
        self.interner.resolve(self.function(id).name)
    }

    // ---- construction ----------------------------------------------------

    pub fn add_decl(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        if decl.storage == StorageKind::Global {
            self.globals.push(id);
        }
        self.decls.push(decl);
        id
    }

    pub fn set_decl_init(&mut self, decl: DeclId, init: ExprId) {
        self.decls[decl.index()].init = Some(init);
    }

    pub fn add_stmt(&mut self, kind: StmtKind) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt {
            kind,
            span: Span::dummy(),
        });
        id
    }

    pub fn add_function(&mut self, name: StringId, params: Vec<DeclId>, ret_ty: TypeId) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(Function {
            name,
            params,
            ret_ty,
            body: None,
            span: Span::dummy(),
            directives: FxHashMap::default(),
        });
        id
    }

    pub fn set_function_body(&mut self, function: FunctionId, body: StmtId) {
        self.functions[function.index()].body = Some(body);
    }

    pub fn add_directive(&mut self, directive: Directive) -> DirectiveId {
        let id = DirectiveId(self.directives.len() as u32);
        self.directives.push(directive);
        id
    }

    /// Record the discovery result: `stmt` (inside `function`) is governed
    /// by `directive`.
    pub fn attach_directive(&mut self, function: FunctionId, stmt: StmtId, directive: DirectiveId) {
        self.functions[function.index()]
            .directives
            .insert(stmt, directive);
    }

    // ---- typed expression constructors -----------------------------------

    fn push_expr(&mut self, kind: ExprKind, ty: TypeId) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr {
            kind,
            ty,
            span: Span::dummy(),
        });
        id
    }

    pub fn mk_decl_ref(&mut self, decl: DeclId) -> ExprId {
        let ty = self.decl(decl).ty;
        self.push_expr(ExprKind::DeclRef(decl), ty)
    }

    pub fn mk_int(&mut self, value: i64) -> ExprId {
        let ty = self.types.scalar(&self.interner, "int");
        self.push_expr(ExprKind::IntLit(value), ty)
    }

    pub fn mk_unary(&mut self, op: UnaryOp, operand: ExprId) -> Result<ExprId, ProgramError> {
        let operand_ty = self.expr(operand).ty;
        let ty = match op {
            UnaryOp::AddrOf => self.types.pointer_to(operand_ty),
            UnaryOp::Deref => self.types.indirect(operand_ty).ok_or_else(|| {
                ProgramError::NotIndirectable(self.types.display(operand_ty, &self.interner))
            })?,
            _ => operand_ty,
        };
        Ok(self.push_expr(ExprKind::Unary(op, operand), ty))
    }

    pub fn mk_binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let ty = match op {
            BinOp::Comma => self.expr(rhs).ty,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
            | BinOp::LogicalAnd | BinOp::LogicalOr => self.types.scalar(&self.interner, "int"),
            _ if op.is_assignment() => self.expr(lhs).ty,
            // Arithmetic: pointer + integer keeps the pointer type
            // whichever side carries it.
            _ => {
                let l = self.expr(lhs).ty;
                let r = self.expr(rhs).ty;
                if self.types.is_pointer_or_array(l) {
                    l
                } else if self.types.is_pointer_or_array(r) {
                    r
                } else {
                    l
                }
            }
        };
        self.push_expr(ExprKind::Binary(op, lhs, rhs), ty)
    }

    pub fn mk_index(&mut self, base: ExprId, index: ExprId) -> Result<ExprId, ProgramError> {
        let base_ty = self.expr(base).ty;
        let ty = self.types.indirect(base_ty).ok_or_else(|| {
            ProgramError::NotIndirectable(self.types.display(base_ty, &self.interner))
        })?;
        Ok(self.push_expr(ExprKind::Index { base, index }, ty))
    }

    pub fn mk_member(
        &mut self,
        base: ExprId,
        field: StringId,
        arrow: bool,
    ) -> Result<ExprId, ProgramError> {
        let base_ty = self.expr(base).ty;
        let record = if arrow {
            self.types.indirect(base_ty).ok_or_else(|| {
                ProgramError::NotIndirectable(self.types.display(base_ty, &self.interner))
            })?
        } else {
            base_ty
        };
        let ty = self.types.field_type(record, field).ok_or_else(|| {
            ProgramError::UnknownField(
                self.types.display(record, &self.interner),
                self.interner.resolve(field),
            )
        })?;
        Ok(self.push_expr(ExprKind::Member { base, field, arrow }, ty))
    }

    pub fn mk_call(&mut self, callee: FunctionId, args: Vec<ExprId>) -> Result<ExprId, ProgramError> {
        let function = self.function(callee);
        if function.params.len() != args.len() {
            return Err(ProgramError::ArityMismatch(
                self.interner.resolve(function.name),
                args.len(),
                function.params.len(),
            ));
        }
        let ty = function.ret_ty;
        Ok(self.push_expr(ExprKind::Call { callee, args }, ty))
    }

    pub fn mk_init_list(&mut self, inits: Vec<ExprId>) -> ExprId {
        let ty = self.types.scalar(&self.interner, "void");
        self.push_expr(ExprKind::InitList(inits), ty)
    }

    // ---- canonicalization ------------------------------------------------

    /// Link `alias` (an extern re-declaration) to its canonical declaration.
    pub fn link_decl(&mut self, alias: DeclId, canonical: DeclId) {
        let root = self.canonical_decl(canonical);
        self.canonical_decls.insert(alias, root);
    }

    /// Resolve a declaration reference to its canonical instance.
    pub fn canonical_decl(&self, decl: DeclId) -> DeclId {
        let mut current = decl;
        while let Some(&next) = self.canonical_decls.get(&current) {
            current = next;
        }
        current
    }

    /// Link a repeated function signature to its canonical (defining)
    /// instance.
    pub fn link_function(&mut self, alias: FunctionId, canonical: FunctionId) {
        let root = self.canonical_function(canonical);
        self.canonical_fns.insert(alias, root);
    }

    /// Resolve a function reference to its canonical instance.
    pub fn canonical_function(&self, function: FunctionId) -> FunctionId {
        let mut current = function;
        while let Some(&next) = self.canonical_fns.get(&current) {
            current = next;
        }
        current
    }

    // ---- threadprivate registry ------------------------------------------

    pub fn register_threadprivate(&mut self, decl: DeclId) {
        let canonical = self.canonical_decl(decl);
        self.threadprivate.insert(canonical);
    }

    pub fn is_threadprivate(&self, decl: DeclId) -> bool {
        self.threadprivate.contains(&self.canonical_decl(decl))
    }

    // ---- structural helpers ----------------------------------------------

    /// Direct child expressions of an expression.
    pub fn expr_children(&self, id: ExprId) -> Vec<ExprId> {
        match &self.expr(id).kind {
            ExprKind::DeclRef(_) | ExprKind::IntLit(_) | ExprKind::FloatLit(_) => Vec::new(),
            ExprKind::Unary(_, operand) | ExprKind::Cast(operand) => vec![*operand],
            ExprKind::Binary(_, lhs, rhs) => vec![*lhs, *rhs],
            ExprKind::Index { base, index } => vec![*base, *index],
            ExprKind::Member { base, .. } => vec![*base],
            ExprKind::Call { args, .. } => args.clone(),
            ExprKind::InitList(inits) => inits.clone(),
        }
    }

    /// Root expressions of a statement (conditions, increments, expression
    /// statements, initializers of declared locals).
    pub fn stmt_root_exprs(&self, id: StmtId) -> Vec<ExprId> {
        match &self.stmt(id).kind {
            StmtKind::Expr(e) => vec![*e],
            StmtKind::Decl(decls) => decls
                .iter()
                .filter_map(|d| self.decl(*d).init)
                .collect(),
            StmtKind::For { cond, inc, .. } => {
                cond.iter().chain(inc.iter()).copied().collect()
            }
            StmtKind::While { cond, .. }
            | StmtKind::DoWhile { cond, .. }
            | StmtKind::If { cond, .. }
            | StmtKind::Switch { cond, .. } => vec![*cond],
            StmtKind::Return(value) => value.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Direct child statements of a statement.
    pub fn stmt_children(&self, id: StmtId) -> Vec<StmtId> {
        match &self.stmt(id).kind {
            StmtKind::Compound(stmts) => stmts.clone(),
            StmtKind::For { init, body, .. } => {
                init.iter().copied().chain(std::iter::once(*body)).collect()
            }
            StmtKind::While { body, .. }
            | StmtKind::DoWhile { body, .. }
            | StmtKind::Switch { body, .. } => vec![*body],
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => std::iter::once(*then_body).chain(*else_body).collect(),
            _ => Vec::new(),
        }
    }

    /// Parent links for every expression reachable from `function`'s body.
    pub fn expr_parents(&self, function: FunctionId) -> FxHashMap<ExprId, ExprId> {
        let mut parents = FxHashMap::default();
        if let Some(body) = self.function(function).body {
            self.collect_expr_parents_in_stmt(body, &mut parents);
        }
        parents
    }

    fn collect_expr_parents_in_stmt(&self, stmt: StmtId, parents: &mut FxHashMap<ExprId, ExprId>) {
        for root in self.stmt_root_exprs(stmt) {
            self.collect_expr_parents(root, parents);
        }
        for child in self.stmt_children(stmt) {
            self.collect_expr_parents_in_stmt(child, parents);
        }
    }

    fn collect_expr_parents(&self, expr: ExprId, parents: &mut FxHashMap<ExprId, ExprId>) {
        for child in self.expr_children(expr) {
            parents.insert(child, expr);
            self.collect_expr_parents(child, parents);
        }
    }

    /// The function whose body contains `span`, if any.
    pub fn function_containing(&self, span: Span) -> Option<FunctionId> {
        self.functions().find(|&f| {
            self.function(f)
                .body
                .is_some_and(|body| self.stmt(body).span.contains(span))
        })
    }

    // ---- span assignment -------------------------------------------------

    /// Assign nesting-consistent spans to every node. Called once after
    /// construction; scope push/pop relies on span containment.
    pub fn assign_spans(&mut self) {
        let mut counter = 0u32;
        for i in 0..self.decls.len() {
            if self.decls[i].storage == StorageKind::Global {
                let lo = Self::bump(&mut counter);
                if let Some(init) = self.decls[i].init {
                    self.assign_expr_spans(init, &mut counter);
                }
                let hi = Self::bump(&mut counter);
                self.decls[i].span = Span { lo, hi };
            }
        }
        for i in 0..self.functions.len() {
            let lo = Self::bump(&mut counter);
            let params = self.functions[i].params.clone();
            for param in params {
                let plo = Self::bump(&mut counter);
                let phi = Self::bump(&mut counter);
                self.decls[param.index()].span = Span { lo: plo, hi: phi };
            }
            if let Some(body) = self.functions[i].body {
                self.assign_stmt_spans(body, &mut counter);
            }
            let hi = Self::bump(&mut counter);
            self.functions[i].span = Span { lo, hi };
        }
        // A directive's range is the range of the statement it governs.
        for i in 0..self.functions.len() {
            let pairs: Vec<(StmtId, DirectiveId)> = self.functions[i]
                .directives
                .iter()
                .map(|(&s, &d)| (s, d))
                .collect();
            for (stmt, dir) in pairs {
                self.directives[dir.index()].range = self.stmts[stmt.index()].span;
            }
        }
    }

    fn bump(counter: &mut u32) -> u32 {
        let v = *counter;
        *counter += 1;
        v
    }

    fn assign_stmt_spans(&mut self, stmt: StmtId, counter: &mut u32) {
        let lo = Self::bump(counter);
        if let StmtKind::Decl(decls) = &self.stmts[stmt.index()].kind {
            for decl in decls.clone() {
                let dlo = Self::bump(counter);
                if let Some(init) = self.decls[decl.index()].init {
                    self.assign_expr_spans(init, counter);
                }
                let dhi = Self::bump(counter);
                self.decls[decl.index()].span = Span { lo: dlo, hi: dhi };
            }
        } else {
            for root in self.stmt_root_exprs(stmt) {
                self.assign_expr_spans(root, counter);
            }
        }
        for child in self.stmt_children(stmt) {
            self.assign_stmt_spans(child, counter);
        }
        let hi = Self::bump(counter);
        self.stmts[stmt.index()].span = Span { lo, hi };
    }

    fn assign_expr_spans(&mut self, expr: ExprId, counter: &mut u32) {
        let lo = Self::bump(counter);
        for child in self.expr_children(expr) {
            self.assign_expr_spans(child, counter);
        }
        let hi = Self::bump(counter);
        self.exprs[expr.index()].span = Span { lo, hi };
    }
}
