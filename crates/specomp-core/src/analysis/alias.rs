//! The alias graph: a structural, type-shape-aware points-to
//! approximation.
//!
//! For every tracked declaration (global, parameter, local) and every
//! access path under it, the graph holds the set of declarations that may
//! alias that path. Assignment, initialization, and parameter passing add
//! symmetric edges; [`AliasGraph::propagate_shares`] closes the relation
//! over globals, function locals, and call edges until a full pass adds
//! nothing. Sets only grow and are bounded by the declaration count, so
//! the fixpoint terminates.
//!
//! Globals and each function's locals/parameters live in separate tables;
//! a declaration's table is found by probing the function first and
//! falling back to the globals.

use super::path::{decompose, AccessPath, PathStub};
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::program::{DeclId, ExprId, ExprKind, FunctionId, ProgramContext, TypeId, TypeKind};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

/// Declarations that may alias one path.
pub type DeclSet = IndexSet<DeclId>;
/// Per-declaration map: access path → aliasing declarations.
pub type SharedTypeMap = IndexMap<AccessPath, DeclSet>;
/// One table of tracked declarations.
pub type SharedDeclMap = IndexMap<DeclId, SharedTypeMap>;

/// Which table a declaration's paths live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TableKey {
    Globals,
    Function(FunctionId),
}

/// Per-function tracking state: the function's parameters and locals.
#[derive(Debug)]
pub struct FunctionTracker {
    pub function: FunctionId,
    pub tracked: SharedDeclMap,
}

/// A recorded call site: caller's table merges with callee's during
/// propagation.
#[derive(Debug, Clone, Copy)]
struct CallEdge {
    caller: FunctionId,
    callee: FunctionId,
}

/// The whole-program alias graph.
#[derive(Debug, Default)]
pub struct AliasGraph {
    globals: SharedDeclMap,
    functions: IndexMap<FunctionId, FunctionTracker>,
    calls: IndexMap<ExprId, CallEdge>,
    changed: bool,
}

impl AliasGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with every access path of `decl`, each aliasing only
    /// itself. Re-tracking an already-tracked declaration is a no-op.
    fn track_decl(ctx: &ProgramContext, decl: DeclId, table: &mut SharedDeclMap) {
        let ty = ctx.decl(decl).ty;
        let types = table.entry(decl).or_default();
        for path in decompose(ctx, ty) {
            types.entry(path).or_insert_with(|| {
                let mut set = DeclSet::new();
                set.insert(decl);
                set
            });
        }
    }

    /// Start tracking a global declaration.
    pub fn add_global(&mut self, ctx: &ProgramContext, decl: DeclId) {
        let decl = ctx.canonical_decl(decl);
        Self::track_decl(ctx, decl, &mut self.globals);
        self.changed = true;
    }

    /// Start tracking a function: its parameters get their own table. A
    /// function without a body cannot be analyzed and is skipped with a
    /// warning.
    pub fn add_function(
        &mut self,
        ctx: &ProgramContext,
        function: FunctionId,
        diagnostics: &mut dyn DiagnosticHandler,
    ) {
        let function = ctx.canonical_function(function);
        let def = ctx.function(function);
        if !def.has_body() {
            diagnostics.report(Diagnostic::warning(
                format!(
                    "function '{}' does not have a definition, hence cannot be checked for safety",
                    ctx.function_name(function)
                ),
                Some(def.span),
            ));
            return;
        }
        let tracker = self.functions.entry(function).or_insert_with(|| {
            debug!(function = %ctx.function_name(function), "created function tracker");
            FunctionTracker {
                function,
                tracked: SharedDeclMap::default(),
            }
        });
        for param in ctx.function(function).params.clone() {
            Self::track_decl(ctx, ctx.canonical_decl(param), &mut tracker.tracked);
        }
        self.changed = true;
    }

    /// Start tracking a local declaration of `function`.
    pub fn add_local(&mut self, ctx: &ProgramContext, decl: DeclId, function: FunctionId) {
        let decl = ctx.canonical_decl(decl);
        let tracker = self
            .functions
            .get_mut(&function)
            .expect("add_local on untracked function");
        Self::track_decl(ctx, decl, &mut tracker.tracked);
        self.changed = true;
    }

    /// Record a call edge. Calls to bodiless functions are excluded.
    pub fn add_call(&mut self, ctx: &ProgramContext, call: ExprId, caller: FunctionId) {
        let ExprKind::Call { callee, .. } = &ctx.expr(call).kind else {
            panic!("add_call on a non-call expression");
        };
        let callee = ctx.canonical_function(*callee);
        if !ctx.function(callee).has_body() {
            return;
        }
        self.calls.insert(call, CallEdge { caller, callee });
        self.changed = true;
    }

    pub fn tracker(&self, function: FunctionId) -> Option<&FunctionTracker> {
        self.functions.get(&function)
    }

    /// Resolve which table holds `decl`'s paths: the function's own, else
    /// the globals.
    fn table_key(&self, decl: DeclId, function: FunctionId) -> TableKey {
        if self
            .functions
            .get(&function)
            .is_some_and(|t| t.tracked.contains_key(&decl))
        {
            TableKey::Function(function)
        } else {
            assert!(
                self.globals.contains_key(&decl),
                "declaration is tracked neither locally nor globally"
            );
            TableKey::Globals
        }
    }

    fn table(&self, key: TableKey) -> &SharedDeclMap {
        match key {
            TableKey::Globals => &self.globals,
            TableKey::Function(f) => &self.functions[&f].tracked,
        }
    }

    fn table_mut(&mut self, key: TableKey) -> &mut SharedDeclMap {
        match key {
            TableKey::Globals => &mut self.globals,
            TableKey::Function(f) => &mut self.functions[&f].tracked,
        }
    }

    fn path_set(&self, key: TableKey, decl: DeclId, path: &AccessPath) -> Option<&DeclSet> {
        self.table(key).get(&decl).and_then(|types| types.get(path))
    }

    /// Merge the alias sets of `lhs` and `rhs` at the paths reached from
    /// one structural-assignment edge of type `ty`, symmetrically, then
    /// recurse through `ty`'s own decomposition. Returns whether any set
    /// grew.
    #[allow(clippy::too_many_arguments)]
    pub fn share_pointers(
        &mut self,
        ctx: &ProgramContext,
        lhs: DeclId,
        lstub: &PathStub,
        rhs: DeclId,
        rstub: &PathStub,
        ty: TypeId,
        lhs_function: FunctionId,
        rhs_function: FunctionId,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> bool {
        let lhs = ctx.canonical_decl(lhs);
        let rhs = ctx.canonical_decl(rhs);
        let lkey = self.table_key(lhs, lhs_function);
        let rkey = self.table_key(rhs, rhs_function);
        let mut visited = FxHashSet::default();
        self.share_pointers_at(
            ctx,
            lhs,
            lkey,
            lstub,
            rhs,
            rkey,
            rstub,
            ty,
            false,
            &mut visited,
            diagnostics,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn share_pointers_at(
        &mut self,
        ctx: &ProgramContext,
        lhs: DeclId,
        lkey: TableKey,
        lstub: &PathStub,
        rhs: DeclId,
        rkey: TableKey,
        rstub: &PathStub,
        ty: TypeId,
        include_first: bool,
        visited: &mut FxHashSet<(AccessPath, AccessPath)>,
        diagnostics: &mut dyn DiagnosticHandler,
    ) -> bool {
        let mut updated = false;
        // The assignment writes a pointer (or decayed array): what becomes
        // shared is the storage it points at, so the merge starts one
        // structural level down unless the caller already descended.
        let mut current = if include_first {
            ty
        } else {
            ctx.types
                .indirect(ty)
                .expect("sharing edge over a non-pointer, non-array type")
        };

        loop {
            let lpath = lstub.join(current);
            let rpath = rstub.join(current);
            // Recursive types cycle back onto already-merged paths; one
            // visit per path pair is enough.
            if !visited.insert((lpath.clone(), rpath.clone())) {
                break;
            }
            let (Some(lset), Some(rset)) = (
                self.path_set(lkey, lhs, &lpath),
                self.path_set(rkey, rhs, &rpath),
            ) else {
                // One side's declared shape does not reach this path (an
                // address-of can hand a deeper pointer level than the
                // declaration decomposes to). The edge below this level
                // cannot be represented and is dropped.
                diagnostics.report(Diagnostic::warning(
                    format!(
                        "no matching alias path '{}' between '{}' and '{}'; sharing edge dropped",
                        lpath.display(ctx),
                        ctx.decl_name(lhs),
                        ctx.decl_name(rhs),
                    ),
                    Some(ctx.decl(lhs).span),
                ));
                break;
            };
            let lset = lset.clone();
            let rset = rset.clone();

            {
                let entry = self
                    .table_mut(lkey)
                    .get_mut(&lhs)
                    .and_then(|t| t.get_mut(&lpath))
                    .expect("path disappeared during merge");
                updated |= entry.insert(rhs);
                for d in &rset {
                    updated |= entry.insert(*d);
                }
            }
            {
                let entry = self
                    .table_mut(rkey)
                    .get_mut(&rhs)
                    .and_then(|t| t.get_mut(&rpath))
                    .expect("path disappeared during merge");
                updated |= entry.insert(lhs);
                for d in &lset {
                    updated |= entry.insert(*d);
                }
            }

            match ctx.types.kind(current) {
                TypeKind::Pointer(next) | TypeKind::Array(next) => current = *next,
                TypeKind::Record { fields, .. } => {
                    for field in fields.clone() {
                        let nl = lstub.push_field(current, field.name);
                        let nr = rstub.push_field(current, field.name);
                        updated |= self.share_pointers_at(
                            ctx, lhs, lkey, &nl, rhs, rkey, &nr, field.ty, true, visited,
                            diagnostics,
                        );
                    }
                    break;
                }
                TypeKind::Scalar(_) => break,
            }
        }

        if updated {
            trace!(
                lhs = %ctx.decl_name(lhs),
                rhs = %ctx.decl_name(rhs),
                ty = %ctx.types.display(ty, &ctx.interner),
                "alias sets merged"
            );
        }
        self.changed |= updated;
        updated
    }

    /// One directed propagation step between two tables: wherever a
    /// declaration of `from` appears in an alias set of `into`'s
    /// declarations, copy that whole set over.
    fn propagate_pair(
        &mut self,
        ctx: &ProgramContext,
        into: TableKey,
        from: TableKey,
        diagnostics: &mut dyn DiagnosticHandler,
    ) {
        let mut updated = false;
        let into_decls: Vec<DeclId> = self.table(into).keys().copied().collect();
        let from_decls: Vec<DeclId> = self.table(from).keys().copied().collect();

        for current in into_decls {
            for other in &from_decls {
                let other_paths: Vec<AccessPath> =
                    self.table(from)[other].keys().cloned().collect();
                for path in other_paths {
                    let source = &self.table(from)[other][&path];
                    if !source.contains(&current) {
                        continue;
                    }
                    let source = source.clone();
                    match self
                        .table_mut(into)
                        .get_mut(&current)
                        .and_then(|t| t.get_mut(&path))
                    {
                        Some(target) => {
                            for d in &source {
                                updated |= target.insert(*d);
                            }
                        }
                        None => {
                            // Two declarations can share a set through a
                            // field path one of them does not decompose to
                            // (e.g. a bare pointer aliased into a record
                            // field). The edge cannot be represented, so
                            // it is dropped.
                            diagnostics.report(Diagnostic::warning(
                                format!(
                                    "alias path '{}' of '{}' has no counterpart on '{}'; \
                                     propagation skipped",
                                    path.display(ctx),
                                    ctx.decl_name(*other),
                                    ctx.decl_name(current),
                                ),
                                Some(ctx.decl(current).span),
                            ));
                        }
                    }
                }
            }
        }
        self.changed |= updated;
    }

    /// Close the sharing relation: globals against globals, every
    /// function against the globals and itself, and both sides of every
    /// recorded call edge, repeated until a full pass changes nothing.
    pub fn propagate_shares(
        &mut self,
        ctx: &ProgramContext,
        diagnostics: &mut dyn DiagnosticHandler,
    ) {
        let mut passes = 0usize;
        loop {
            self.changed = false;
            passes += 1;

            self.propagate_pair(ctx, TableKey::Globals, TableKey::Globals, diagnostics);

            let function_keys: Vec<FunctionId> = self.functions.keys().copied().collect();
            for f in function_keys {
                let key = TableKey::Function(f);
                self.propagate_pair(ctx, key, key, diagnostics);
                self.propagate_pair(ctx, TableKey::Globals, key, diagnostics);
                self.propagate_pair(ctx, key, TableKey::Globals, diagnostics);
            }

            let edges: Vec<CallEdge> = self.calls.values().copied().collect();
            for edge in edges {
                let caller = TableKey::Function(edge.caller);
                let callee = TableKey::Function(edge.callee);
                self.propagate_pair(ctx, caller, callee, diagnostics);
                self.propagate_pair(ctx, callee, caller, diagnostics);
            }

            if !self.changed {
                break;
            }
        }
        debug!(passes, "alias propagation reached fixpoint");
    }

    /// True when any declaration aliasing `decl` (at any path) appears in
    /// `targets`.
    pub fn contains_match(
        &self,
        ctx: &ProgramContext,
        decl: DeclId,
        function: FunctionId,
        targets: &IndexSet<DeclId>,
    ) -> bool {
        let decl = ctx.canonical_decl(decl);
        let key = self.table_key(decl, function);
        let types = &self.table(key)[&decl];
        for set in types.values() {
            if let Some(hit) = set.iter().find(|d| targets.contains(*d)) {
                trace!(
                    decl = %ctx.decl_name(decl),
                    hit = %ctx.decl_name(*hit),
                    "alias match found"
                );
                return true;
            }
        }
        false
    }

    /// Every declaration known to alias `decl` at some path, excluding
    /// `decl` itself.
    pub fn aliases(
        &self,
        ctx: &ProgramContext,
        decl: DeclId,
        function: FunctionId,
    ) -> IndexSet<DeclId> {
        let decl = ctx.canonical_decl(decl);
        let key = self.table_key(decl, function);
        let mut out = IndexSet::new();
        for set in self.table(key)[&decl].values() {
            for d in set {
                if *d != decl {
                    out.insert(*d);
                }
            }
        }
        out
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn reset_changed(&mut self) {
        self.changed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnosticHandler;
    use crate::program::{Decl, Span, StorageKind};

    /// One function `f()` and two global int pointers.
    fn fixture() -> (ProgramContext, DeclId, DeclId, FunctionId) {
        let mut ctx = ProgramContext::new();
        let int = ctx.types.scalar(&ctx.interner, "int");
        let int_ptr = ctx.types.pointer_to(int);
        let p = ctx.add_decl(Decl {
            name: ctx.interner.get_or_intern("p"),
            ty: int_ptr,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let q = ctx.add_decl(Decl {
            name: ctx.interner.get_or_intern("q"),
            ty: int_ptr,
            storage: StorageKind::Global,
            init: None,
            span: Span::dummy(),
        });
        let f_name = ctx.interner.get_or_intern("f");
        let f = ctx.add_function(f_name, vec![], int);
        let body = ctx.add_stmt(crate::program::StmtKind::Compound(vec![]));
        ctx.set_function_body(f, body);
        ctx.assign_spans();
        (ctx, p, q, f)
    }

    #[test]
    fn sharing_is_symmetric() {
        let (ctx, p, q, f) = fixture();
        let mut graph = AliasGraph::new();
        graph.add_global(&ctx, p);
        graph.add_global(&ctx, q);

        let ty = ctx.decl(p).ty;
        let mut diags = CollectingDiagnosticHandler::new();
        let updated = graph.share_pointers(
            &ctx,
            p,
            &PathStub::empty(),
            q,
            &PathStub::empty(),
            ty,
            f,
            f,
            &mut diags,
        );
        assert!(updated);
        assert!(graph.aliases(&ctx, p, f).contains(&q));
        assert!(graph.aliases(&ctx, q, f).contains(&p));
    }

    #[test]
    fn sharing_is_idempotent() {
        let (ctx, p, q, f) = fixture();
        let mut graph = AliasGraph::new();
        graph.add_global(&ctx, p);
        graph.add_global(&ctx, q);
        let ty = ctx.decl(p).ty;
        let mut diags = CollectingDiagnosticHandler::new();
        assert!(graph.share_pointers(&ctx, p, &PathStub::empty(), q, &PathStub::empty(), ty, f, f, &mut diags));
        assert!(!graph.share_pointers(&ctx, p, &PathStub::empty(), q, &PathStub::empty(), ty, f, f, &mut diags));
    }

    #[test]
    fn propagation_is_transitive() {
        let mut ctx = ProgramContext::new();
        let int = ctx.types.scalar(&ctx.interner, "int");
        let int_ptr = ctx.types.pointer_to(int);
        let mut mk = |ctx: &mut ProgramContext, name: &str| {
            let name = ctx.interner.get_or_intern(name);
            ctx.add_decl(Decl {
                name,
                ty: int_ptr,
                storage: StorageKind::Global,
                init: None,
                span: Span::dummy(),
            })
        };
        let a = mk(&mut ctx, "a");
        let b = mk(&mut ctx, "b");
        let c = mk(&mut ctx, "c");
        let f_name = ctx.interner.get_or_intern("f");
        let f = ctx.add_function(f_name, vec![], int);
        let body = ctx.add_stmt(crate::program::StmtKind::Compound(vec![]));
        ctx.set_function_body(f, body);
        ctx.assign_spans();

        let mut graph = AliasGraph::new();
        for d in [a, b, c] {
            graph.add_global(&ctx, d);
        }
        let empty = PathStub::empty();
        let mut diags = CollectingDiagnosticHandler::new();
        graph.share_pointers(&ctx, a, &empty, b, &empty, int_ptr, f, f, &mut diags);
        graph.share_pointers(&ctx, b, &empty, c, &empty, int_ptr, f, f, &mut diags);

        graph.propagate_shares(&ctx, &mut diags);

        assert!(graph.aliases(&ctx, a, f).contains(&c));
        assert!(graph.aliases(&ctx, c, f).contains(&a));
    }

    #[test]
    fn contains_match_sees_aliases() {
        let (ctx, p, q, f) = fixture();
        let mut graph = AliasGraph::new();
        graph.add_global(&ctx, p);
        graph.add_global(&ctx, q);
        let ty = ctx.decl(p).ty;
        let mut diags = CollectingDiagnosticHandler::new();
        graph.share_pointers(&ctx, p, &PathStub::empty(), q, &PathStub::empty(), ty, f, f, &mut diags);

        let mut writes = IndexSet::new();
        writes.insert(q);
        assert!(graph.contains_match(&ctx, p, f, &writes));

        let mut unrelated = IndexSet::new();
        unrelated.insert(DeclId(999));
        assert!(!graph.contains_match(&ctx, p, f, &unrelated));
    }

    #[test]
    fn bodiless_function_is_skipped_with_warning() {
        let mut ctx = ProgramContext::new();
        let int = ctx.types.scalar(&ctx.interner, "int");
        let g_name = ctx.interner.get_or_intern("g");
        let g = ctx.add_function(g_name, vec![], int);
        ctx.assign_spans();

        let mut graph = AliasGraph::new();
        let mut diags = CollectingDiagnosticHandler::new();
        graph.add_function(&ctx, g, &mut diags);
        assert!(graph.tracker(g).is_none());
        assert_eq!(diags.diagnostics.len(), 1);
        assert!(diags.diagnostics[0].message.contains("does not have a definition"));
    }
}
