//! The analysis engine: alias graph, scope stack, and the driver that
//! sequences them.
//!
//! The passes form a strict pipeline over one whole-program snapshot:
//!
//! ```text
//! seed alias graph (globals, parameters, locals, call edges)
//!  └─> sharing propagation fixpoint                (alias graph)
//!       └─> directive discovery                    (scope registries)
//!            └─> contamination fixpoint            (scope stack)
//!                 └─> speculative-function collation
//!                      └─> access recording
//!                           └─> read-only sets + cache counts
//! ```
//!
//! Sharing must reach its fixpoint before contamination starts, and
//! access recording must run only after contamination has converged; a
//! privacy query issued mid-contamination could read a stale flag.
//! Everything is single-threaded batch work over exclusively-owned state.

pub mod access;
pub mod alias;
pub mod contamination;
pub mod path;
pub mod resolve;
pub mod scope;
pub mod sharing;

pub use alias::{AliasGraph, DeclSet, FunctionTracker, SharedDeclMap, SharedTypeMap};
pub use path::{decompose, AccessPath, FieldSeg, PathStub};
pub use resolve::{dominant_ref, expr_stub, DominantRef};
pub use scope::{PrivacyDeclMap, PrivacyTypeMap, Scope, ScopeId, ScopeKind, ScopeStack};

use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticHandler};
use crate::program::{
    DeclId, DirectiveId, FunctionId, ProgramContext, Span, StmtId, TypeId,
};
use access::AccessPass;
use contamination::ContaminationPass;
use indexmap::IndexSet;
use sharing::SharingPass;
use tracing::{debug, info};

/// The completed analysis: the alias graph, the scope registry with its
/// privacy and access sets, and the derived entry points. Exposed to the
/// code-generation stage.
#[derive(Debug)]
pub struct SpeculationAnalysis {
    pub alias: AliasGraph,
    pub scopes: ScopeStack,
    /// Ordered entry points: speculative functions, then uncovered
    /// top-level directives.
    pub start_points: Vec<ScopeId>,
    /// Speculative-cache pool size needed by the most demanding entry
    /// point.
    pub max_caches_required: usize,
}

impl SpeculationAnalysis {
    /// Is `decl` private at a specific path, seen from `loc`?
    pub fn is_private(
        &mut self,
        ctx: &ProgramContext,
        decl: DeclId,
        stub: &PathStub,
        ty: TypeId,
        loc: Span,
    ) -> bool {
        self.scopes.is_private(ctx, decl, stub, ty, loc)
    }

    /// Is every path of `decl` private everywhere it is tracked?
    pub fn is_completely_private(
        &mut self,
        ctx: &ProgramContext,
        decl: DeclId,
        loc: Span,
    ) -> bool {
        self.scopes.is_completely_private(ctx, decl, loc)
    }

    pub fn top_level_directives(&self) -> &[ScopeId] {
        self.scopes.top_level_directives()
    }

    pub fn speculative_scope(&self, function: FunctionId) -> Option<ScopeId> {
        self.scopes.speculative_scope(function)
    }

    pub fn read_decls(&self, scope: ScopeId) -> &IndexSet<DeclId> {
        &self.scopes.scope(scope).reads
    }

    pub fn write_decls(&self, scope: ScopeId) -> &IndexSet<DeclId> {
        &self.scopes.scope(scope).writes
    }

    pub fn read_only_decls(&self, scope: ScopeId) -> &IndexSet<DeclId> {
        &self.scopes.scope(scope).read_only
    }
}

/// Run the whole analysis over one program snapshot.
pub fn analyze(
    ctx: &mut ProgramContext,
    config: &AnalysisConfig,
    diagnostics: &mut dyn DiagnosticHandler,
) -> SpeculationAnalysis {
    register_threadprivate(ctx);
    let ctx: &ProgramContext = ctx;

    info!("seeding alias graph");
    let mut alias = AliasGraph::new();
    for &global in ctx.globals() {
        if ctx.canonical_decl(global) == global {
            alias.add_global(ctx, global);
        }
    }
    for function in ctx.functions() {
        if ctx.canonical_function(function) == function {
            alias.add_function(ctx, function, diagnostics);
        }
    }
    SharingPass::new(ctx, &mut alias, diagnostics).run();
    alias.propagate_shares(ctx, diagnostics);

    info!("discovering directives");
    let mut scopes = ScopeStack::new();
    discover_directives(ctx, &mut scopes, diagnostics);

    info!("scanning for contamination");
    let mut passes = 0usize;
    loop {
        scopes.reset_changed();
        let top_level: Vec<ScopeId> = scopes.top_level_directives().to_vec();
        for scope in top_level {
            ContaminationPass::new(ctx, &mut scopes, diagnostics, config.report_contamination)
                .handle_directive(scope);
        }
        passes += 1;
        if !scopes.changed() {
            break;
        }
        assert!(
            passes <= config.max_fixpoint_passes,
            "contamination did not reach a fixpoint within {} passes",
            config.max_fixpoint_passes
        );
    }
    debug!(passes, "contamination reached fixpoint");

    info!("collating call contamination");
    scopes.generate_spec_functions(ctx);

    info!("generating read and write lists");
    let start_points = scopes.handler_start_points(ctx);
    {
        let mut pass = AccessPass::new(ctx, &mut scopes);
        for &start in &start_points {
            pass.handle_start_point(start);
        }
    }

    info!("discovering read-only variables");
    scopes.generate_read_only(ctx, &alias);
    let max_caches_required = scopes.max_caches_required(ctx);

    SpeculationAnalysis {
        alias,
        scopes,
        start_points,
        max_caches_required,
    }
}

/// Mark the globals named by `threadprivate` directives.
fn register_threadprivate(ctx: &mut ProgramContext) {
    let directives: Vec<DirectiveId> = ctx.directive_ids().collect();
    for id in directives {
        let directive = ctx.directive(id);
        if !directive.is_threadprivate() {
            continue;
        }
        let vars: Vec<DeclId> = directive
            .clauses
            .iter()
            .flat_map(|c| c.vars.iter().copied())
            .collect();
        for var in vars {
            ctx.register_threadprivate(var);
        }
    }
}

/// Walk every function body in source order registering top-level
/// directive regions; nested directives are picked up during the
/// contamination walks.
fn discover_directives(
    ctx: &ProgramContext,
    scopes: &mut ScopeStack,
    diagnostics: &mut dyn DiagnosticHandler,
) {
    for function in ctx.functions() {
        if ctx.canonical_function(function) != function {
            continue;
        }
        let Some(body) = ctx.function(function).body else {
            continue;
        };
        discover_in_stmt(ctx, function, body, scopes, diagnostics);
    }
}

fn discover_in_stmt(
    ctx: &ProgramContext,
    function: FunctionId,
    stmt: StmtId,
    scopes: &mut ScopeStack,
    diagnostics: &mut dyn DiagnosticHandler,
) {
    if let Some(&directive) = ctx.function(function).directives.get(&stmt) {
        let d = ctx.directive(directive);
        if d.is_threadprivate() {
            // Registered up front; never a scope.
        } else if !d.is_supported() {
            diagnostics.report(Diagnostic::warning(
                "directive uses an unsupported construct or clause; \
                 the region is analyzed as serial code",
                Some(d.range),
            ));
        } else if !scopes.inside_top_level(ctx.stmt(stmt).span) {
            scopes.create_top_level(ctx, directive, stmt);
        }
    }
    for child in ctx.stmt_children(stmt) {
        discover_in_stmt(ctx, function, child, scopes, diagnostics);
    }
}
