//! Structured pragma directives as the directive-discovery step reports
//! them: construct kinds, clause kinds, and the supported subsets.

use super::ast::{DeclId, Span};

/// Index of a directive in the program arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirectiveId(pub(crate) u32);

impl DirectiveId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// OpenMP construct kinds the discovery step can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
    Parallel,
    For,
    Single,
    Master,
    Critical,
    Barrier,
    Threadprivate,
    // Recognized but carries no analysis semantics.
    Flush,
    // Not modeled: regions governed by these are never treated as parallel.
    Atomic,
    Ordered,
    Section,
    Sections,
    Task,
    Taskwait,
    Taskyield,
    Unknown,
}

impl ConstructKind {
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            ConstructKind::Parallel
                | ConstructKind::For
                | ConstructKind::Single
                | ConstructKind::Master
                | ConstructKind::Critical
                | ConstructKind::Barrier
                | ConstructKind::Threadprivate
                | ConstructKind::Flush
        )
    }
}

/// OpenMP clause kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    Private,
    Shared,
    Reduction,
    Nowait,
    Threadprivate,
    // Recognized but carries no analysis semantics.
    Copyin,
    Schedule,
    // Not modeled.
    Firstprivate,
    Lastprivate,
    Ordered,
    Collapse,
    If,
    NumThreads,
    Default,
    Unknown,
}

impl ClauseKind {
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            ClauseKind::Private
                | ClauseKind::Shared
                | ClauseKind::Reduction
                | ClauseKind::Nowait
                | ClauseKind::Threadprivate
                | ClauseKind::Copyin
                | ClauseKind::Schedule
        )
    }
}

/// A clause together with the declarations it names.
#[derive(Debug, Clone)]
pub struct Clause {
    pub kind: ClauseKind,
    pub vars: Vec<DeclId>,
}

/// One `#pragma omp` directive and its clause set.
#[derive(Debug, Clone)]
pub struct Directive {
    pub constructs: Vec<ConstructKind>,
    pub clauses: Vec<Clause>,
    /// Source range of the pragma line; set alongside statement spans.
    pub range: Span,
}

impl Directive {
    pub fn new(constructs: Vec<ConstructKind>, clauses: Vec<Clause>) -> Self {
        Directive {
            constructs,
            clauses,
            range: Span::dummy(),
        }
    }

    /// A parallel region: owns the team of threads, so privacy searches
    /// stop here.
    pub fn is_parallel(&self) -> bool {
        self.constructs.contains(&ConstructKind::Parallel)
    }

    pub fn is_threadprivate(&self) -> bool {
        self.constructs.contains(&ConstructKind::Threadprivate)
    }

    pub fn is_nowait(&self) -> bool {
        self.clauses.iter().any(|c| c.kind == ClauseKind::Nowait)
    }

    /// All constructs and clauses are ones the analysis models.
    pub fn is_supported(&self) -> bool {
        self.constructs.iter().all(|c| c.is_supported())
            && self.clauses.iter().all(|c| c.kind.is_supported())
    }

    /// Declarations named by `private` clauses, in clause order.
    pub fn private_vars(&self) -> Vec<DeclId> {
        let mut out = Vec::new();
        for clause in &self.clauses {
            if clause.kind == ClauseKind::Private {
                for &d in &clause.vars {
                    if !out.contains(&d) {
                        out.push(d);
                    }
                }
            }
        }
        out
    }

    /// Declarations named by `threadprivate` clauses.
    pub fn threadprivate_vars(&self) -> Vec<DeclId> {
        self.clauses
            .iter()
            .filter(|c| c.kind == ClauseKind::Threadprivate)
            .flat_map(|c| c.vars.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_for_is_parallel_and_supported() {
        let d = Directive::new(
            vec![ConstructKind::Parallel, ConstructKind::For],
            vec![Clause {
                kind: ClauseKind::Private,
                vars: vec![],
            }],
        );
        assert!(d.is_parallel());
        assert!(d.is_supported());
        assert!(!d.is_nowait());
    }

    #[test]
    fn task_construct_is_unsupported() {
        let d = Directive::new(vec![ConstructKind::Task], vec![]);
        assert!(!d.is_supported());
        assert!(!d.is_parallel());
    }
}
