//! Provider invocation seam.
//!
//! The orchestrator treats providers as black boxes with possible latency and
//! failure; request formatting and wire protocols live behind this trait.

pub mod fake;

use crate::model::ProviderOutput;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        vars: &Map<String, Value>,
        config: &Value,
    ) -> anyhow::Result<ProviderOutput>;

    fn provider_name(&self) -> &'static str;
}
