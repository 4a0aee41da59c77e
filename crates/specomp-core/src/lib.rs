//! Alias and contamination analysis for speculative parallelization of
//! OpenMP-annotated C programs.
//!
//! A source-to-source transformer that executes pragma-annotated regions
//! speculatively needs to know, for every variable access inside every
//! parallel region (and every function reachable from one), whether the
//! accessed storage could be aliased outside the current speculative
//! scope or is provably exclusive to it. Exclusive ("private") accesses
//! need no runtime check; everything else does.
//!
//! This crate is that analysis core:
//!
//! - [`program`] — the whole-program snapshot the front end hands over:
//!   types, declarations, statements, expressions, and structured
//!   directives, all id-indexed, with canonical-declaration collapsing.
//! - [`analysis::path`] — typed access paths through pointers, arrays,
//!   and record fields.
//! - [`analysis::alias`] — the global alias graph and its sharing
//!   fixpoint.
//! - [`analysis::scope`] — the directive/call scope stack, privacy
//!   queries, and contamination propagation.
//! - [`analysis`] — the driver that sequences the passes and the
//!   [`SpeculationAnalysis`] result consumed by code generation.
//!
//! Parsing, pragma lexing, and source rewriting are out of scope; see
//! [`program::ProgramContext`] for the boundary.

pub mod analysis;
pub mod config;
pub mod diagnostics;
pub mod program;

pub use analysis::{analyze, AliasGraph, ScopeId, ScopeKind, ScopeStack, SpeculationAnalysis};
pub use config::AnalysisConfig;
pub use diagnostics::{CollectingDiagnosticHandler, Diagnostic, DiagnosticHandler, Severity};
pub use program::{ProgramContext, ProgramError};
