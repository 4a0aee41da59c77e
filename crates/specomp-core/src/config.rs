//! Analysis configuration.

/// Knobs for a single analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Ceiling on outer fixpoint passes. The fixpoints are monotone over
    /// finite lattices and terminate on their own; hitting this ceiling
    /// means the front-end facts are inconsistent and aborts the run.
    pub max_fixpoint_passes: usize,
    /// Emit a diagnostic for every contamination event, not just the
    /// tracing log line.
    pub report_contamination: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            max_fixpoint_passes: 10_000,
            report_contamination: false,
        }
    }
}
