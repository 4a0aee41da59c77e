//! The directive/call scope stack and contamination propagation.
//!
//! Scopes are created the first time their directive or call site is
//! encountered and cached by originating node in registries that own them
//! across passes; the stack itself holds the chain active at the location
//! currently being visited, rebuilt by popping entries whose governed
//! range does not contain the new location.
//!
//! Each scope tracks, per declaration, a privacy flag for every access
//! path (`true` = private, `false` = contaminated). Flags only ever flip
//! to contaminated within a run. Privacy searches walk the stack from the
//! innermost scope outward, translating formal parameters to their actual
//! arguments at call boundaries, and stop at the first parallel
//! directive, at a call holding the declaration as an untranslated
//! (by-value) parameter, or at a speculative-function boundary.

use super::alias::AliasGraph;
use super::path::{decompose, AccessPath, PathStub};
use super::resolve::{dominant_ref, expr_stub};
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::program::{
    DeclId, DirectiveId, ExprId, ExprKind, FunctionId, ProgramContext, Span, StmtId, TypeId,
    TypeKind,
};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

/// Index of a scope in the stack's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Access path → privacy flag (`true` = private).
pub type PrivacyTypeMap = IndexMap<AccessPath, bool>;
/// Declaration → its scoped privacy map.
pub type PrivacyDeclMap = IndexMap<DeclId, PrivacyTypeMap>;

/// What kind of region a scope governs.
#[derive(Debug, Clone)]
pub enum ScopeKind {
    /// The body of a pragma directive.
    Directive { directive: DirectiveId },
    /// A call site: the governed region is the callee's body, entered
    /// from this particular call expression.
    Call {
        call: ExprId,
        callee: FunctionId,
        /// Formal parameter → dominant actual-argument declaration, for
        /// pointer/array parameters only. A parameter without an entry is
        /// by-value and cannot be contaminated from outside.
        translations: IndexMap<DeclId, DeclId>,
    },
    /// The merged, call-site-independent view of a function called from
    /// within a parallel region. A hard analysis boundary.
    SpeculativeFunction { function: FunctionId },
}

/// One scope: governed region, privacy table, access bookkeeping.
#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    /// The statement this scope governs.
    pub body: StmtId,
    /// Source range of the governed statement.
    pub range: Span,
    pub tracked: PrivacyDeclMap,
    pub reads: IndexSet<DeclId>,
    pub writes: IndexSet<DeclId>,
    pub read_only: IndexSet<DeclId>,
    pub parent: Option<ScopeId>,
    caches_required: Option<usize>,
}

impl Scope {
    fn new(kind: ScopeKind, body: StmtId, range: Span, parent: Option<ScopeId>) -> Self {
        Scope {
            kind,
            body,
            range,
            tracked: PrivacyDeclMap::default(),
            reads: IndexSet::new(),
            writes: IndexSet::new(),
            read_only: IndexSet::new(),
            parent,
            caches_required: None,
        }
    }

    pub fn is_parallel_directive(&self, ctx: &ProgramContext) -> bool {
        match &self.kind {
            ScopeKind::Directive { directive } => ctx.directive(*directive).is_parallel(),
            _ => false,
        }
    }
}

/// The scope registry plus the active stack.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    directive_scopes: FxHashMap<DirectiveId, ScopeId>,
    call_scopes: IndexMap<ExprId, ScopeId>,
    spec_fn_scopes: IndexMap<FunctionId, ScopeId>,
    top_level: Vec<ScopeId>,
    /// Active chain; the last element is the innermost scope.
    stack: Vec<ScopeId>,
    changed: bool,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index()]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index()]
    }

    pub fn top_level_directives(&self) -> &[ScopeId] {
        &self.top_level
    }

    pub fn directive_scope(&self, directive: DirectiveId) -> Option<ScopeId> {
        self.directive_scopes.get(&directive).copied()
    }

    pub fn call_scope(&self, call: ExprId) -> Option<ScopeId> {
        self.call_scopes.get(&call).copied()
    }

    pub fn speculative_scope(&self, function: FunctionId) -> Option<ScopeId> {
        self.spec_fn_scopes.get(&function).copied()
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn reset_changed(&mut self) {
        self.changed = false;
    }

    pub fn reset_stack(&mut self) {
        self.stack.clear();
    }

    // ---- tracking --------------------------------------------------------

    /// Seed `tracked` with every access path of `decl`, all private.
    fn track_decl(ctx: &ProgramContext, decl: DeclId, tracked: &mut PrivacyDeclMap) {
        let ty = ctx.decl(decl).ty;
        let types = tracked.entry(decl).or_default();
        for path in decompose(ctx, ty) {
            types.entry(path).or_insert(true);
        }
    }

    fn alloc(&mut self, scope: Scope) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(scope);
        id
    }

    fn create_directive_scope(
        &mut self,
        ctx: &ProgramContext,
        directive: DirectiveId,
        body: StmtId,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let range = ctx.stmt(body).span;
        let mut scope = Scope::new(ScopeKind::Directive { directive }, body, range, parent);
        for var in ctx.directive(directive).private_vars() {
            Self::track_decl(ctx, ctx.canonical_decl(var), &mut scope.tracked);
        }
        debug!(?directive, "created directive scope");
        self.alloc(scope)
    }

    fn create_call_scope(
        &mut self,
        ctx: &ProgramContext,
        call: ExprId,
        callee: FunctionId,
        parent: Option<ScopeId>,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> ScopeId {
        let body = ctx
            .function(callee)
            .body
            .expect("call scope for a bodiless function");
        let range = ctx.stmt(body).span;
        let ExprKind::Call { args, .. } = &ctx.expr(call).kind else {
            panic!("call scope on a non-call expression");
        };
        let args = args.clone();

        let mut tracked = PrivacyDeclMap::default();
        let mut translations = IndexMap::new();
        for (i, &param) in ctx.function(callee).params.iter().enumerate() {
            let param = ctx.canonical_decl(param);
            Self::track_decl(ctx, param, &mut tracked);
            let ty = ctx.decl(param).ty;
            if !ctx.types.is_pointer_or_array(ty) {
                continue;
            }
            match dominant_ref(ctx, args[i]) {
                Some(dominant) => {
                    translations.insert(param, ctx.canonical_decl(dominant.decl));
                }
                None => diagnostics.report(Diagnostic::warning(
                    format!(
                        "argument {} of call to '{}' has no dominant declaration; \
                         parameter '{}' is treated as call-local",
                        i,
                        ctx.function_name(callee),
                        ctx.decl_name(param),
                    ),
                    Some(ctx.expr(args[i]).span),
                )),
            }
        }

        let mut scope = Scope::new(
            ScopeKind::Call {
                call,
                callee,
                translations,
            },
            body,
            range,
            parent,
        );
        scope.tracked = tracked;
        debug!(callee = %ctx.function_name(callee), "created call scope");
        self.alloc(scope)
    }

    // ---- stack maintenance -----------------------------------------------

    /// Pop the stack back to the scope governing `loc` before an
    /// operation that does not itself take a location.
    pub fn pop_to(&mut self, loc: Span) {
        self.remove_to_parent(loc);
    }

    /// Pop every scope whose governed range does not contain `loc`.
    fn remove_to_parent(&mut self, loc: Span) {
        while let Some(&top) = self.stack.last() {
            if self.scope(top).range.contains(loc) {
                break;
            }
            self.stack.pop();
        }
    }

    /// Register a top-level directive before any walking starts.
    pub fn create_top_level(&mut self, ctx: &ProgramContext, directive: DirectiveId, body: StmtId) {
        assert!(
            !self.directive_scopes.contains_key(&directive),
            "top-level directive registered twice"
        );
        self.changed = true;
        let id = self.create_directive_scope(ctx, directive, body, None);
        self.directive_scopes.insert(directive, id);
        self.top_level.push(id);
    }

    /// Enter a directive body at `body`; creates and caches the scope on
    /// first encounter.
    pub fn push_directive(
        &mut self,
        ctx: &ProgramContext,
        directive: DirectiveId,
        body: StmtId,
    ) -> ScopeId {
        self.remove_to_parent(ctx.stmt(body).span);
        let id = match self.directive_scopes.get(&directive).copied() {
            Some(id) => id,
            None => {
                self.changed = true;
                let parent = self.stack.last().copied();
                let id = self.create_directive_scope(ctx, directive, body, parent);
                self.directive_scopes.insert(directive, id);
                id
            }
        };
        self.stack.push(id);
        id
    }

    /// Enter a call site. Returns `None` (and records nothing) when the
    /// callee has no body. On every entry, first-seen or cached, any
    /// contamination already attached to a translated actual argument is
    /// re-derived into the matching formal parameter.
    pub fn push_call(
        &mut self,
        ctx: &ProgramContext,
        call: ExprId,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> Option<ScopeId> {
        self.remove_to_parent(ctx.expr(call).span);

        let ExprKind::Call { callee, args } = &ctx.expr(call).kind else {
            panic!("push_call on a non-call expression");
        };
        let callee = ctx.canonical_function(*callee);
        let args = args.clone();
        if !ctx.function(callee).has_body() {
            return None;
        }

        let id = match self.call_scopes.get(&call).copied() {
            Some(id) => id,
            None => {
                self.changed = true;
                let parent = self.stack.last().copied();
                let id = self.create_call_scope(ctx, call, callee, parent, diagnostics);
                self.call_scopes.insert(call, id);
                id
            }
        };
        self.stack.push(id);

        // Copy over any contamination carried by the actual arguments into
        // the formal parameters, as far up the stack as a normal
        // contamination event would reach.
        let ScopeKind::Call { translations, .. } = &self.scope(id).kind else {
            unreachable!();
        };
        let translations: Vec<(DeclId, DeclId)> =
            translations.iter().map(|(&p, &a)| (p, a)).collect();
        for (i, &param) in ctx.function(callee).params.iter().enumerate() {
            let param = ctx.canonical_decl(param);
            let Some(&(_, translated)) = translations.iter().find(|(p, _)| *p == param) else {
                // No translation: the parameter is call-local and cannot
                // be contaminated by anything outside.
                continue;
            };
            let arg = args[i];
            let Some(dominant) = dominant_ref(ctx, arg) else {
                diagnostics.report(Diagnostic::warning(
                    format!(
                        "argument {} of call to '{}' has no dominant declaration; \
                         contamination not propagated",
                        i,
                        ctx.function_name(callee),
                    ),
                    Some(ctx.expr(arg).span),
                ));
                continue;
            };
            let arg_stub = expr_stub(ctx, dominant.expr);
            self.contaminate_decl(
                ctx,
                param,
                &PathStub::empty(),
                translated,
                &arg_stub,
                ctx.expr(arg).ty,
                diagnostics,
            );
        }

        Some(id)
    }

    /// Enter a speculative function as the root of a fresh walk.
    pub fn push_speculative(&mut self, id: ScopeId) -> ScopeId {
        assert!(
            self.stack.is_empty(),
            "speculative function pushed onto a non-empty stack"
        );
        assert!(
            matches!(self.scope(id).kind, ScopeKind::SpeculativeFunction { .. }),
            "push_speculative on a non-speculative scope"
        );
        self.stack.push(id);
        id
    }

    // ---- stack searching -------------------------------------------------

    /// Should a stack search stop after visiting `id`? Crossing a call
    /// scope translates `decl` to the dominant actual argument when one
    /// exists; an untranslated (by-value) parameter ends the search.
    fn finished_searching(&self, ctx: &ProgramContext, id: ScopeId, decl: &mut DeclId) -> bool {
        let scope = self.scope(id);
        match &scope.kind {
            ScopeKind::Directive { directive } => ctx.directive(*directive).is_parallel(),
            ScopeKind::Call { translations, .. } => {
                // Only parameters are tracked at a call scope; an
                // untracked declaration is a global passing through.
                if scope.tracked.contains_key(decl) {
                    match translations.get(decl) {
                        Some(&translated) => {
                            *decl = translated;
                            false
                        }
                        None => true,
                    }
                } else {
                    false
                }
            }
            ScopeKind::SpeculativeFunction { .. } => true,
        }
    }

    /// Look up the privacy flag for `stub` + `ty`, falling back one
    /// pointer level for address-of expressions whose chain sits one
    /// level above the declared shape.
    fn privacy_flag(
        ctx: &ProgramContext,
        types: &PrivacyTypeMap,
        stub: &PathStub,
        ty: TypeId,
    ) -> Option<bool> {
        if let Some(&flag) = types.get(&stub.join(ty)) {
            return Some(flag);
        }
        let pointee = ctx.types.pointee(ty)?;
        if let Some(&flag) = types.get(&stub.join(pointee)) {
            return Some(flag);
        }
        types.get(&AccessPath::root(pointee)).copied()
    }

    /// Is `decl` private at `stub` + `ty`, as seen from `loc`? An
    /// untracked declaration is conservatively non-private.
    pub fn is_private(
        &mut self,
        ctx: &ProgramContext,
        decl: DeclId,
        stub: &PathStub,
        ty: TypeId,
        loc: Span,
    ) -> bool {
        let mut decl = ctx.canonical_decl(decl);
        self.remove_to_parent(loc);

        let mut found = false;
        let mut private = true;
        let order: Vec<ScopeId> = self.stack.iter().rev().copied().collect();
        for id in order {
            if let Some(types) = self.scope(id).tracked.get(&decl) {
                found = true;
                let flag = Self::privacy_flag(ctx, types, stub, ty).unwrap_or_else(|| {
                    panic!(
                        "privacy map for '{}' is missing path '{}'",
                        ctx.decl_name(decl),
                        stub.join(ty).display(ctx),
                    )
                });
                // Not private if any level of the chain is contaminated.
                private = private && flag;
            }
            if self.finished_searching(ctx, id, &mut decl) {
                break;
            }
        }

        if found {
            private
        } else {
            false
        }
    }

    /// Is every path of `decl` private in every visited scope? Used to
    /// skip analyzing an access entirely.
    pub fn is_completely_private(&mut self, ctx: &ProgramContext, decl: DeclId, loc: Span) -> bool {
        let mut decl = ctx.canonical_decl(decl);
        self.remove_to_parent(loc);

        let mut found = false;
        let order: Vec<ScopeId> = self.stack.iter().rev().copied().collect();
        for id in order {
            if let Some(types) = self.scope(id).tracked.get(&decl) {
                found = true;
                if types.values().any(|&flag| !flag) {
                    return false;
                }
            }
            if self.finished_searching(ctx, id, &mut decl) {
                break;
            }
        }
        found
    }

    /// Start tracking a local declared inside the innermost scope; locals
    /// begin fully private.
    pub fn insert_private_decl(&mut self, ctx: &ProgramContext, decl: DeclId) {
        self.remove_to_parent(ctx.decl(decl).span);
        let &top = self
            .stack
            .last()
            .expect("local declaration outside any scope");
        if !self.scope(top).tracked.contains_key(&decl) {
            self.changed = true;
            Self::track_decl(ctx, decl, &mut self.scope_mut(top).tracked);
        }
    }

    // ---- contamination ---------------------------------------------------

    fn get_privacy(&self, scope: ScopeId, decl: DeclId, path: &AccessPath) -> Option<bool> {
        self.scope(scope)
            .tracked
            .get(&decl)
            .and_then(|types| types.get(path))
            .copied()
    }

    fn set_contaminated(&mut self, scope: ScopeId, decl: DeclId, path: &AccessPath) {
        let flag = self
            .scope_mut(scope)
            .tracked
            .get_mut(&decl)
            .and_then(|types| types.get_mut(path))
            .expect("contaminating an untracked path");
        *flag = false;
        self.changed = true;
    }

    /// The scoped analogue of the alias graph's sharing edge: walk the
    /// stack for both sides of an assignment and flip privacy flags.
    /// Sides not tracked anywhere are already as contaminated as they can
    /// be, so the tracked side is contaminated outright.
    pub fn contaminate_decl(
        &mut self,
        ctx: &ProgramContext,
        lhs: DeclId,
        lstub: &PathStub,
        rhs: DeclId,
        rstub: &PathStub,
        ty: TypeId,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> bool {
        let lhs = ctx.canonical_decl(lhs);
        let rhs = ctx.canonical_decl(rhs);
        let mut lhs_cur = lhs;
        let mut rhs_cur = rhs;
        let mut found_lhs = false;
        let mut found_rhs = false;
        let mut contaminated = false;

        let order: Vec<ScopeId> = self.stack.iter().rev().copied().collect();

        for &lid in &order {
            if self.scope(lid).tracked.contains_key(&lhs_cur) {
                found_lhs = true;
                let lhs_here = lhs_cur;

                // The search for the other side restarts from the top of
                // the stack for every scope holding the left side.
                for &rid in &order {
                    if self.scope(rid).tracked.contains_key(&rhs_cur) {
                        found_rhs = true;
                        let mut visited = FxHashSet::default();
                        contaminated |= self.contaminate_swap(
                            ctx,
                            lid,
                            lhs_here,
                            lstub,
                            rid,
                            rhs_cur,
                            rstub,
                            ty,
                            false,
                            &mut visited,
                            diagnostics,
                        );
                    }
                    let _ = self.finished_searching(ctx, rid, &mut rhs_cur);
                }

                if !found_rhs {
                    // Left side is tracked, right side is foreign: the
                    // left side's whole chain becomes contaminated.
                    let mut visited = FxHashSet::default();
                    contaminated |= self.contaminate_all(
                        ctx,
                        lid,
                        lhs_here,
                        lstub,
                        ty,
                        false,
                        &mut visited,
                        diagnostics,
                    );
                }

                rhs_cur = rhs;
            }
            let _ = self.finished_searching(ctx, lid, &mut lhs_cur);
        }

        if !found_lhs {
            // Never looked for the right side; if it is tracked anywhere
            // it picks up the contamination of the foreign left side.
            for &rid in &order {
                if self.scope(rid).tracked.contains_key(&rhs_cur) {
                    let mut visited = FxHashSet::default();
                    contaminated |= self.contaminate_all(
                        ctx,
                        rid,
                        rhs_cur,
                        rstub,
                        ty,
                        false,
                        &mut visited,
                        diagnostics,
                    );
                }
                let _ = self.finished_searching(ctx, rid, &mut rhs_cur);
            }
        }

        if contaminated {
            trace!(
                lhs = %ctx.decl_name(lhs),
                rhs = %ctx.decl_name(rhs),
                "contamination propagated"
            );
        }
        contaminated
    }

    /// Flip the whole path chain under `stub` + `ty` to contaminated,
    /// stopping early once a level is already contaminated.
    #[allow(clippy::too_many_arguments)]
    fn contaminate_all(
        &mut self,
        ctx: &ProgramContext,
        scope: ScopeId,
        decl: DeclId,
        stub: &PathStub,
        ty: TypeId,
        include_first: bool,
        visited: &mut FxHashSet<AccessPath>,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> bool {
        let mut contaminated = false;
        let mut current = if include_first {
            ty
        } else {
            match ctx.types.indirect(ty) {
                Some(t) => t,
                None => {
                    diagnostics.report(Diagnostic::warning(
                        format!(
                            "contamination of '{}' over non-pointer type '{}' dropped",
                            ctx.decl_name(decl),
                            ctx.types.display(ty, &ctx.interner),
                        ),
                        Some(ctx.decl(decl).span),
                    ));
                    return false;
                }
            }
        };

        loop {
            let path = stub.join(current);
            // Recursive types cycle back onto already-walked paths.
            if !visited.insert(path.clone()) {
                break;
            }
            let Some(flag) = self.get_privacy(scope, decl, &path) else {
                diagnostics.report(Diagnostic::warning(
                    format!(
                        "'{}' has no access path '{}'; contamination below this level dropped",
                        ctx.decl_name(decl),
                        path.display(ctx),
                    ),
                    Some(ctx.decl(decl).span),
                ));
                break;
            };
            if !flag {
                break;
            }
            self.set_contaminated(scope, decl, &path);
            contaminated = true;

            match ctx.types.kind(current) {
                TypeKind::Pointer(next) | TypeKind::Array(next) => current = *next,
                TypeKind::Record { fields, .. } => {
                    for field in fields.clone() {
                        let nested = stub.push_field(current, field.name);
                        contaminated |= self.contaminate_all(
                            ctx, scope, decl, &nested, field.ty, true, visited, diagnostics,
                        );
                    }
                    break;
                }
                TypeKind::Scalar(_) => break,
            }
        }

        contaminated
    }

    /// Walk both sides' chains together; wherever exactly one side is
    /// still private, it takes the other side's contamination.
    #[allow(clippy::too_many_arguments)]
    fn contaminate_swap(
        &mut self,
        ctx: &ProgramContext,
        lscope: ScopeId,
        lhs: DeclId,
        lstub: &PathStub,
        rscope: ScopeId,
        rhs: DeclId,
        rstub: &PathStub,
        ty: TypeId,
        include_first: bool,
        visited: &mut FxHashSet<(AccessPath, AccessPath)>,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> bool {
        let mut contaminated = false;
        let mut current = if include_first {
            ty
        } else {
            match ctx.types.indirect(ty) {
                Some(t) => t,
                None => {
                    diagnostics.report(Diagnostic::warning(
                        format!(
                            "contamination between '{}' and '{}' over non-pointer type '{}' dropped",
                            ctx.decl_name(lhs),
                            ctx.decl_name(rhs),
                            ctx.types.display(ty, &ctx.interner),
                        ),
                        Some(ctx.decl(lhs).span),
                    ));
                    return false;
                }
            }
        };

        loop {
            let lpath = lstub.join(current);
            let rpath = rstub.join(current);
            // Recursive types cycle back onto already-walked path pairs.
            if !visited.insert((lpath.clone(), rpath.clone())) {
                break;
            }
            let (Some(lflag), Some(rflag)) = (
                self.get_privacy(lscope, lhs, &lpath),
                self.get_privacy(rscope, rhs, &rpath),
            ) else {
                diagnostics.report(Diagnostic::warning(
                    format!(
                        "no matching access path '{}' between '{}' and '{}'; \
                         contamination below this level dropped",
                        lpath.display(ctx),
                        ctx.decl_name(lhs),
                        ctx.decl_name(rhs),
                    ),
                    Some(ctx.decl(lhs).span),
                ));
                break;
            };

            match (lflag, rflag) {
                (false, false) => break,
                (false, true) => {
                    self.set_contaminated(rscope, rhs, &rpath);
                    contaminated = true;
                }
                (true, false) => {
                    self.set_contaminated(lscope, lhs, &lpath);
                    contaminated = true;
                }
                // Both still private: nothing to swap at this level, keep
                // walking the chain.
                (true, true) => {}
            }

            match ctx.types.kind(current) {
                TypeKind::Pointer(next) | TypeKind::Array(next) => current = *next,
                TypeKind::Record { fields, .. } => {
                    for field in fields.clone() {
                        let nl = lstub.push_field(current, field.name);
                        let nr = rstub.push_field(current, field.name);
                        contaminated |= self.contaminate_swap(
                            ctx, lscope, lhs, &nl, rscope, rhs, &nr, field.ty, true, visited,
                            diagnostics,
                        );
                    }
                    break;
                }
                TypeKind::Scalar(_) => break,
            }
        }

        contaminated
    }

    // ---- speculative functions -------------------------------------------

    /// Collate per-call contamination into one speculative-function scope
    /// per distinct callee: the first call seeds the scope, later calls
    /// fold their contamination in.
    pub fn generate_spec_functions(&mut self, ctx: &ProgramContext) {
        let entries: Vec<(ExprId, ScopeId)> =
            self.call_scopes.iter().map(|(&c, &s)| (c, s)).collect();
        for (_, call_scope) in entries {
            let ScopeKind::Call { callee, .. } = self.scope(call_scope).kind else {
                unreachable!("call registry holds a non-call scope");
            };
            match self.spec_fn_scopes.get(&callee).copied() {
                Some(spec) => self.contaminate_spec_function(ctx, spec, call_scope),
                None => {
                    let call = self.scope(call_scope);
                    let spec = Scope {
                        kind: ScopeKind::SpeculativeFunction { function: callee },
                        body: call.body,
                        range: call.range,
                        tracked: call.tracked.clone(),
                        reads: IndexSet::new(),
                        writes: IndexSet::new(),
                        read_only: IndexSet::new(),
                        parent: None,
                        caches_required: None,
                    };
                    let id = self.alloc(spec);
                    self.spec_fn_scopes.insert(callee, id);
                    debug!(function = %ctx.function_name(callee), "created speculative function");
                }
            }
        }
    }

    /// Fold one call's contamination into the callee's speculative scope.
    fn contaminate_spec_function(&mut self, ctx: &ProgramContext, spec: ScopeId, call: ScopeId) {
        let call_tracked = self.scope(call).tracked.clone();
        for (decl, call_types) in call_tracked {
            for (path, flag) in call_types {
                if flag {
                    continue;
                }
                let spec_flag = self
                    .scope_mut(spec)
                    .tracked
                    .get_mut(&decl)
                    .unwrap_or_else(|| {
                        panic!(
                            "speculative function lost declaration '{}'",
                            ctx.decl_name(decl)
                        )
                    })
                    .get_mut(&path)
                    .unwrap_or_else(|| {
                        panic!(
                            "speculative function lost path '{}' of '{}'",
                            path.display(ctx),
                            ctx.decl_name(decl)
                        )
                    });
                *spec_flag = false;
            }
        }
    }

    // ---- access bookkeeping ----------------------------------------------

    /// Record `decl` into the read or write set of every directive scope
    /// on the stack, stopping (inclusively) at a speculative-function
    /// boundary.
    pub fn insert_decl_access(&mut self, ctx: &ProgramContext, decl: DeclId, write: bool) {
        let decl = ctx.canonical_decl(decl);
        let order: Vec<ScopeId> = self.stack.iter().rev().copied().collect();
        for id in order {
            {
                let scope = self.scope_mut(id);
                if write {
                    scope.writes.insert(decl);
                } else {
                    scope.reads.insert(decl);
                }
            }
            match self.scope(id).kind {
                ScopeKind::Directive { .. } => continue,
                ScopeKind::SpeculativeFunction { .. } => break,
                ScopeKind::Call { .. } => {
                    panic!("access recorded while a call scope is active")
                }
            }
        }
    }

    /// Ordered analysis entry points: every speculative function, then
    /// every top-level directive not nested inside one. Directives that
    /// are nested get their parent fixed up instead.
    pub fn handler_start_points(&mut self, ctx: &ProgramContext) -> Vec<ScopeId> {
        let mut out: Vec<ScopeId> = self.spec_fn_scopes.values().copied().collect();
        let top_level = self.top_level.clone();
        for dir_scope in top_level {
            let ScopeKind::Directive { directive } = self.scope(dir_scope).kind else {
                unreachable!("top-level registry holds a non-directive scope");
            };
            let range = ctx.directive(directive).range;
            let enclosing = self
                .spec_fn_scopes
                .values()
                .copied()
                .find(|&spec| self.scope(spec).range.contains(range));
            match enclosing {
                Some(spec) => self.scope_mut(dir_scope).parent = Some(spec),
                None => out.push(dir_scope),
            }
        }
        out
    }

    /// Is `span` inside some already-registered top-level directive?
    pub fn inside_top_level(&self, span: Span) -> bool {
        self.top_level
            .iter()
            .any(|&id| self.scope(id).range.contains(span))
    }

    // ---- read-only classification ----------------------------------------

    /// Mark each recorded read that no aliasing write can reach — in the
    /// scope itself or in any call nested in it — as read-only.
    pub fn generate_read_only(&mut self, ctx: &ProgramContext, alias: &AliasGraph) {
        let top_level = self.top_level.clone();
        for dir_scope in top_level {
            let range = self.scope(dir_scope).range;
            let function = ctx
                .function_containing(range)
                .expect("top-level directive outside any function body");
            self.generate_read_only_for(ctx, alias, dir_scope, function);
        }
        let spec_fns: Vec<(FunctionId, ScopeId)> =
            self.spec_fn_scopes.iter().map(|(&f, &s)| (f, s)).collect();
        for (function, spec) in spec_fns {
            self.generate_read_only_for(ctx, alias, spec, function);
        }
    }

    fn generate_read_only_for(
        &mut self,
        ctx: &ProgramContext,
        alias: &AliasGraph,
        scope: ScopeId,
        function: FunctionId,
    ) {
        let reads: Vec<DeclId> = self.scope(scope).reads.iter().copied().collect();
        for decl in reads {
            let mut seen = FxHashSet::default();
            if self.is_read_only_in(ctx, alias, decl, function, scope, &mut seen) {
                self.scope_mut(scope).read_only.insert(decl);
            }
        }
    }

    fn is_read_only_in(
        &self,
        ctx: &ProgramContext,
        alias: &AliasGraph,
        decl: DeclId,
        function: FunctionId,
        scope: ScopeId,
        seen: &mut FxHashSet<ScopeId>,
    ) -> bool {
        if !seen.insert(scope) {
            return true;
        }
        if alias.contains_match(ctx, decl, function, &self.scope(scope).writes) {
            return false;
        }
        let body_span = self.scope(scope).range;
        for (&call, &call_scope) in &self.call_scopes {
            if !body_span.contains(ctx.expr(call).span) {
                continue;
            }
            let ScopeKind::Call { callee, .. } = self.scope(call_scope).kind else {
                unreachable!();
            };
            let spec = self
                .spec_fn_scopes
                .get(&callee)
                .copied()
                .expect("call recorded without a speculative function");
            if !self.is_read_only_in(ctx, alias, decl, function, spec, seen) {
                return false;
            }
        }
        true
    }

    /// Is `decl` read-only in the top-level scope governing the current
    /// stack position?
    pub fn is_read_only(&self, ctx: &ProgramContext, decl: DeclId) -> bool {
        let decl = ctx.canonical_decl(decl);
        let &top = self
            .stack
            .last()
            .expect("read-only query on an empty stack");
        let mut current = top;
        while let Some(parent) = self.scope(current).parent {
            current = parent;
        }
        self.scope(current).read_only.contains(&decl)
    }

    // ---- cache counting --------------------------------------------------

    /// The largest per-entry-point speculative-cache requirement.
    pub fn max_caches_required(&mut self, ctx: &ProgramContext) -> usize {
        let mut max = 0;
        let spec_fns: Vec<ScopeId> = self.spec_fn_scopes.values().copied().collect();
        for spec in spec_fns {
            max = max.max(self.caches_required(ctx, spec, &mut FxHashSet::default()));
        }
        let top_level = self.top_level.clone();
        for dir_scope in top_level {
            max = max.max(self.caches_required(ctx, dir_scope, &mut FxHashSet::default()));
        }
        max
    }

    /// Caches needed by one scope: every read and write that is not
    /// read-only, plus the totals of every call nested in its body,
    /// resolved through the callee's speculative function.
    fn caches_required(
        &mut self,
        ctx: &ProgramContext,
        scope: ScopeId,
        in_progress: &mut FxHashSet<ScopeId>,
    ) -> usize {
        if let Some(cached) = self.scope(scope).caches_required {
            return cached;
        }
        if !in_progress.insert(scope) {
            // A recursive callee contributes no additional distinct
            // accesses beyond its own total.
            return 0;
        }

        let (reads, writes, read_only) = {
            let s = self.scope(scope);
            (s.reads.len(), s.writes.len(), s.read_only.len())
        };
        let mut total = reads + writes - read_only;

        let body_span = self.scope(scope).range;
        let nested: Vec<ScopeId> = self
            .call_scopes
            .iter()
            .filter(|(&call, _)| body_span.contains(ctx.expr(call).span))
            .map(|(_, &s)| s)
            .collect();
        for call_scope in nested {
            let ScopeKind::Call { callee, .. } = self.scope(call_scope).kind else {
                unreachable!();
            };
            let spec = self
                .spec_fn_scopes
                .get(&callee)
                .copied()
                .expect("call recorded without a speculative function");
            total += self.caches_required(ctx, spec, in_progress);
        }

        in_progress.remove(&scope);
        self.scope_mut(scope).caches_required = Some(total);
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::program::{
        Clause, ClauseKind, ConstructKind, Decl, Directive, StmtKind, StorageKind,
    };

    struct Fixture {
        ctx: ProgramContext,
        outer_dir: DirectiveId,
        inner_dir: DirectiveId,
        outer_body: StmtId,
        inner_body: StmtId,
        x: DeclId,
        y: DeclId,
        int: TypeId,
        int_ptr: TypeId,
        int_ptr_ptr: TypeId,
    }

    /// A parallel region with a nested `for` region; `x` is private in
    /// both, `y` only in the inner one. Both are `int **`.
    fn fixture() -> Fixture {
        let mut ctx = ProgramContext::new();
        let int = ctx.types.scalar(&ctx.interner, "int");
        let int_ptr = ctx.types.pointer_to(int);
        let int_ptr_ptr = ctx.types.pointer_to(int_ptr);

        let x_name = ctx.interner.get_or_intern("x");
        let x = ctx.add_decl(Decl {
            name: x_name,
            ty: int_ptr_ptr,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let y_name = ctx.interner.get_or_intern("y");
        let y = ctx.add_decl(Decl {
            name: y_name,
            ty: int_ptr_ptr,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });

        let inner_body = ctx.add_stmt(StmtKind::Compound(vec![]));
        let outer_body = ctx.add_stmt(StmtKind::Compound(vec![inner_body]));
        let f_name = ctx.interner.get_or_intern("main");
        let f = ctx.add_function(f_name, vec![], int);
        ctx.set_function_body(f, outer_body);

        let outer_dir = ctx.add_directive(Directive::new(
            vec![ConstructKind::Parallel, ConstructKind::For],
            vec![Clause {
                kind: ClauseKind::Private,
                vars: vec![x],
            }],
        ));
        let inner_dir = ctx.add_directive(Directive::new(
            vec![ConstructKind::For],
            vec![Clause {
                kind: ClauseKind::Private,
                vars: vec![x, y],
            }],
        ));
        ctx.attach_directive(f, outer_body, outer_dir);
        ctx.attach_directive(f, inner_body, inner_dir);
        ctx.assign_spans();

        Fixture {
            ctx,
            outer_dir,
            inner_dir,
            outer_body,
            inner_body,
            x,
            y,
            int,
            int_ptr,
            int_ptr_ptr,
        }
    }

    fn pushed_stack(fx: &Fixture) -> ScopeStack {
        let mut scopes = ScopeStack::new();
        scopes.create_top_level(&fx.ctx, fx.outer_dir, fx.outer_body);
        scopes.push_directive(&fx.ctx, fx.outer_dir, fx.outer_body);
        scopes.push_directive(&fx.ctx, fx.inner_dir, fx.inner_body);
        scopes
    }

    #[test]
    fn private_clause_vars_start_private() {
        let fx = fixture();
        let mut scopes = pushed_stack(&fx);
        let loc = fx.ctx.stmt(fx.inner_body).span;
        assert!(scopes.is_completely_private(&fx.ctx, fx.x, loc));
        assert!(scopes.is_private(&fx.ctx, fx.x, &PathStub::empty(), fx.int_ptr_ptr, loc));
        assert!(scopes.is_private(&fx.ctx, fx.x, &PathStub::empty(), fx.int, loc));
    }

    #[test]
    fn untracked_declaration_is_not_private() {
        let mut fx = fixture();
        let z_name = fx.ctx.interner.get_or_intern("z");
        let z = fx.ctx.add_decl(Decl {
            name: z_name,
            ty: fx.int_ptr,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let mut scopes = pushed_stack(&fx);
        let loc = fx.ctx.stmt(fx.inner_body).span;
        assert!(!scopes.is_private(&fx.ctx, z, &PathStub::empty(), fx.int_ptr, loc));
        assert!(!scopes.is_completely_private(&fx.ctx, z, loc));
    }

    #[test]
    fn contamination_reaches_every_scope_holding_the_left_side() {
        // The search for the right side restarts from the top of the
        // stack for every scope holding the left side, so a later
        // (outer) left-side hit still sees contamination recorded in an
        // inner scope. Pins current behavior.
        let fx = fixture();
        let mut scopes = pushed_stack(&fx);
        let inner_scope = scopes.directive_scope(fx.inner_dir).unwrap();
        let outer_scope = scopes.directive_scope(fx.outer_dir).unwrap();

        // y's deepest level is contaminated in the inner scope only.
        scopes.set_contaminated(inner_scope, fx.y, &AccessPath::root(fx.int));

        let mut diags = CollectingDiagnosticHandler::new();
        let changed = scopes.contaminate_decl(
            &fx.ctx,
            fx.x,
            &PathStub::empty(),
            fx.y,
            &PathStub::empty(),
            fx.int_ptr_ptr,
            &mut diags,
        );
        assert!(changed);

        // Both scopes tracking x picked up the deep contamination; the
        // shallower pointer level stays private in both.
        for scope in [inner_scope, outer_scope] {
            assert_eq!(
                scopes.get_privacy(scope, fx.x, &AccessPath::root(fx.int)),
                Some(false)
            );
            assert_eq!(
                scopes.get_privacy(scope, fx.x, &AccessPath::root(fx.int_ptr)),
                Some(true)
            );
        }
    }

    #[test]
    fn contamination_is_monotonic_and_idempotent() {
        let fx = fixture();
        let mut scopes = pushed_stack(&fx);
        let inner_scope = scopes.directive_scope(fx.inner_dir).unwrap();
        scopes.set_contaminated(inner_scope, fx.y, &AccessPath::root(fx.int));

        let mut diags = CollectingDiagnosticHandler::new();
        assert!(scopes.contaminate_decl(
            &fx.ctx,
            fx.x,
            &PathStub::empty(),
            fx.y,
            &PathStub::empty(),
            fx.int_ptr_ptr,
            &mut diags,
        ));
        // A second identical event finds everything already contaminated.
        assert!(!scopes.contaminate_decl(
            &fx.ctx,
            fx.x,
            &PathStub::empty(),
            fx.y,
            &PathStub::empty(),
            fx.int_ptr_ptr,
            &mut diags,
        ));
    }

    #[test]
    fn privacy_aggregates_across_nested_scopes() {
        let fx = fixture();
        let mut scopes = pushed_stack(&fx);
        let outer_scope = scopes.directive_scope(fx.outer_dir).unwrap();

        // Contaminate x's deepest level in the outer scope only.
        scopes.set_contaminated(outer_scope, fx.x, &AccessPath::root(fx.int));

        let loc = fx.ctx.stmt(fx.inner_body).span;
        // The inner copy is still private, but the walk ANDs in the
        // outer scope's flag.
        assert!(!scopes.is_private(&fx.ctx, fx.x, &PathStub::empty(), fx.int, loc));
        assert!(scopes.is_private(&fx.ctx, fx.x, &PathStub::empty(), fx.int_ptr, loc));
        assert!(!scopes.is_completely_private(&fx.ctx, fx.x, loc));
    }

    #[test]
    fn popping_to_an_outer_location_drops_inner_scopes() {
        let fx = fixture();
        let mut scopes = pushed_stack(&fx);
        let inner_scope = scopes.directive_scope(fx.inner_dir).unwrap();
        // y is only tracked in the inner scope; after popping to the
        // outer body it is no longer visible.
        scopes.set_contaminated(inner_scope, fx.y, &AccessPath::root(fx.int));
        let outer_loc = fx.ctx.stmt(fx.outer_body).span;
        assert!(!scopes.is_completely_private(&fx.ctx, fx.y, outer_loc));
        // x is tracked by the outer scope and fully private there.
        let outer_loc = fx.ctx.stmt(fx.outer_body).span;
        assert!(scopes.is_completely_private(&fx.ctx, fx.x, outer_loc));
    }
}
