//! Program construction helpers for specomp tests.
//!
//! Provides [`ProgramBuilder`], a thin fluent layer over
//! [`ProgramContext`] for assembling small synthetic C-like programs:
//! types, globals, functions, statements, and directives. Builder methods
//! panic on malformed programs — tests want the failure at the
//! construction site, not a `Result` to thread through.

use specomp_core::program::{
    BinOp, Clause, ClauseKind, ConstructKind, Decl, DeclId, Directive, DirectiveId, ExprId, Field,
    FunctionId, ProgramContext, RecordKind, Span, StmtId, StmtKind, StorageKind, TypeId, UnaryOp,
};

/// Fluent construction of a [`ProgramContext`].
#[derive(Default)]
pub struct ProgramBuilder {
    pub ctx: ProgramContext,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish construction: assigns spans and hands over the context.
    pub fn finish(mut self) -> ProgramContext {
        self.ctx.assign_spans();
        self.ctx
    }

    // ---- types -----------------------------------------------------------

    pub fn int(&mut self) -> TypeId {
        self.ctx.types.scalar(&self.ctx.interner, "int")
    }

    pub fn double(&mut self) -> TypeId {
        self.ctx.types.scalar(&self.ctx.interner, "double")
    }

    pub fn ptr(&mut self, ty: TypeId) -> TypeId {
        self.ctx.types.pointer_to(ty)
    }

    pub fn array(&mut self, element: TypeId) -> TypeId {
        self.ctx.types.array_of(element)
    }

    /// Declare a struct with no fields yet; define them with
    /// [`fields`](Self::fields). Needed for self-referential records.
    pub fn record(&mut self, name: &str) -> TypeId {
        let name = self.ctx.interner.get_or_intern(name);
        self.ctx.types.declare_record(RecordKind::Struct, name)
    }

    pub fn union(&mut self, name: &str) -> TypeId {
        let name = self.ctx.interner.get_or_intern(name);
        self.ctx.types.declare_record(RecordKind::Union, name)
    }

    pub fn fields(&mut self, record: TypeId, fields: &[(&str, TypeId)]) {
        let fields = fields
            .iter()
            .map(|(name, ty)| Field {
                name: self.ctx.interner.get_or_intern(name),
                ty: *ty,
            })
            .collect();
        self.ctx.types.define_record_fields(record, fields);
    }

    /// Declare-and-define in one step for non-recursive structs.
    pub fn strukt(&mut self, name: &str, fields: &[(&str, TypeId)]) -> TypeId {
        let record = self.record(name);
        self.fields(record, fields);
        record
    }

    // ---- declarations ----------------------------------------------------

    fn decl(&mut self, name: &str, ty: TypeId, storage: StorageKind) -> DeclId {
        let name = self.ctx.interner.get_or_intern(name);
        self.ctx.add_decl(Decl {
            name,
            ty,
            storage,
            init: None,
            span: Span::dummy(),
        })
    }

    pub fn global(&mut self, name: &str, ty: TypeId) -> DeclId {
        self.decl(name, ty, StorageKind::Global)
    }

    pub fn local(&mut self, name: &str, ty: TypeId) -> DeclId {
        self.decl(name, ty, StorageKind::Local)
    }

    pub fn param(&mut self, name: &str, ty: TypeId) -> DeclId {
        self.decl(name, ty, StorageKind::Param)
    }

    pub fn set_init(&mut self, decl: DeclId, init: ExprId) {
        self.ctx.set_decl_init(decl, init);
    }

    // ---- functions -------------------------------------------------------

    pub fn function(&mut self, name: &str, params: Vec<DeclId>, ret_ty: TypeId) -> FunctionId {
        let name = self.ctx.interner.get_or_intern(name);
        self.ctx.add_function(name, params, ret_ty)
    }

    pub fn body(&mut self, function: FunctionId, body: StmtId) {
        self.ctx.set_function_body(function, body);
    }

    // ---- expressions -----------------------------------------------------

    pub fn var(&mut self, decl: DeclId) -> ExprId {
        self.ctx.mk_decl_ref(decl)
    }

    pub fn lit(&mut self, value: i64) -> ExprId {
        self.ctx.mk_int(value)
    }

    pub fn assign(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.ctx.mk_binary(BinOp::Assign, lhs, rhs)
    }

    pub fn add_assign(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.ctx.mk_binary(BinOp::AddAssign, lhs, rhs)
    }

    pub fn add(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.ctx.mk_binary(BinOp::Add, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.ctx.mk_binary(BinOp::Lt, lhs, rhs)
    }

    pub fn comma(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.ctx.mk_binary(BinOp::Comma, lhs, rhs)
    }

    pub fn addr_of(&mut self, operand: ExprId) -> ExprId {
        self.ctx
            .mk_unary(UnaryOp::AddrOf, operand)
            .expect("address-of")
    }

    pub fn deref(&mut self, operand: ExprId) -> ExprId {
        self.ctx.mk_unary(UnaryOp::Deref, operand).expect("deref")
    }

    pub fn post_inc(&mut self, operand: ExprId) -> ExprId {
        self.ctx
            .mk_unary(UnaryOp::PostInc, operand)
            .expect("post-increment")
    }

    pub fn index(&mut self, base: ExprId, index: ExprId) -> ExprId {
        self.ctx.mk_index(base, index).expect("index")
    }

    pub fn member(&mut self, base: ExprId, field: &str) -> ExprId {
        let field = self.ctx.interner.get_or_intern(field);
        self.ctx.mk_member(base, field, false).expect("member")
    }

    pub fn arrow(&mut self, base: ExprId, field: &str) -> ExprId {
        let field = self.ctx.interner.get_or_intern(field);
        self.ctx.mk_member(base, field, true).expect("arrow member")
    }

    pub fn call(&mut self, callee: FunctionId, args: Vec<ExprId>) -> ExprId {
        self.ctx.mk_call(callee, args).expect("call")
    }

    pub fn init_list(&mut self, inits: Vec<ExprId>) -> ExprId {
        self.ctx.mk_init_list(inits)
    }

    // ---- statements ------------------------------------------------------

    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        self.ctx.add_stmt(StmtKind::Expr(expr))
    }

    pub fn decl_stmt(&mut self, decls: Vec<DeclId>) -> StmtId {
        self.ctx.add_stmt(StmtKind::Decl(decls))
    }

    pub fn block(&mut self, stmts: Vec<StmtId>) -> StmtId {
        self.ctx.add_stmt(StmtKind::Compound(stmts))
    }

    pub fn for_loop(
        &mut self,
        init: Option<StmtId>,
        cond: Option<ExprId>,
        inc: Option<ExprId>,
        body: StmtId,
    ) -> StmtId {
        self.ctx.add_stmt(StmtKind::For {
            init,
            cond,
            inc,
            body,
        })
    }

    pub fn ret(&mut self, value: Option<ExprId>) -> StmtId {
        self.ctx.add_stmt(StmtKind::Return(value))
    }

    // ---- directives ------------------------------------------------------

    pub fn directive(&mut self, constructs: &[ConstructKind], clauses: Vec<Clause>) -> DirectiveId {
        self.ctx
            .add_directive(Directive::new(constructs.to_vec(), clauses))
    }

    /// `#pragma omp parallel for`
    pub fn parallel_for(&mut self) -> DirectiveId {
        self.directive(&[ConstructKind::Parallel, ConstructKind::For], vec![])
    }

    /// `#pragma omp parallel for private(...)`
    pub fn parallel_for_private(&mut self, vars: &[DeclId]) -> DirectiveId {
        self.directive(
            &[ConstructKind::Parallel, ConstructKind::For],
            vec![Clause {
                kind: ClauseKind::Private,
                vars: vars.to_vec(),
            }],
        )
    }

    /// `#pragma omp for` (no parallel construct of its own)
    pub fn for_directive(&mut self) -> DirectiveId {
        self.directive(&[ConstructKind::For], vec![])
    }

    /// Attach a directive to the statement it governs.
    pub fn attach(&mut self, function: FunctionId, stmt: StmtId, directive: DirectiveId) {
        self.ctx.attach_directive(function, stmt, directive);
    }
}
