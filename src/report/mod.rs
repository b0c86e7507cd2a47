//! Run artifacts handed to the external reporting layer. Data only; this
//! crate never formats text output.

use crate::cache::CacheStats;
use crate::model::{EvaluationResult, PairStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl RunSummary {
    pub fn from_results(results: &[EvaluationResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            match r.status {
                PairStatus::Passed => summary.passed += 1,
                PairStatus::Failed => summary.failed += 1,
                PairStatus::Errored => summary.errored += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifacts {
    pub description: Option<String>,
    /// Sorted by (test_id, provider_id) regardless of completion order.
    pub results: Vec<EvaluationResult>,
    pub summary: RunSummary,
    pub cache: CacheStats,
}
