//! Semantic-judge collaborator seam.
//!
//! The judge is a black box that scores one output against a natural-language
//! rubric. Network or provider failures from an implementation surface as
//! failed assertions at the registry boundary, never as process-fatal errors.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    pub passed: bool,
    pub score: f64,
    pub reason: String,
}

#[async_trait]
pub trait Judge: Send + Sync {
    /// `model` is a per-assertion override; `None` means the implementation's
    /// default judge model.
    async fn judge(
        &self,
        rubric: &str,
        output: &str,
        model: Option<&str>,
    ) -> anyhow::Result<JudgeVerdict>;
}
