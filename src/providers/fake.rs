use super::ProviderClient;
use crate::model::ProviderOutput;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted in-process provider for tests. Returns a fixed response, a queue
/// of responses (one per call), or a per-prompt echo; counts live invocations
/// so cache behavior can be asserted.
#[derive(Debug, Default)]
pub struct FakeClient {
    model: String,
    fixed_response: Option<String>,
    scripted: Mutex<Vec<String>>,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl FakeClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.fixed_response = Some(response.into());
        self
    }

    /// Responses consumed front-to-back, one per invocation.
    pub fn with_scripted(self, responses: Vec<String>) -> Self {
        *self.scripted.lock().unwrap() = responses;
        self
    }

    /// Every invocation fails with this message.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Number of live invocations (cache hits never reach the client).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for FakeClient {
    async fn invoke(
        &self,
        prompt: &str,
        _vars: &Map<String, Value>,
        _config: &Value,
    ) -> anyhow::Result<ProviderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(msg) = &self.fail_with {
            anyhow::bail!("{}", msg);
        }

        let text = {
            let mut scripted = self.scripted.lock().unwrap();
            if !scripted.is_empty() {
                scripted.remove(0)
            } else if let Some(fixed) = &self.fixed_response {
                fixed.clone()
            } else {
                format!("echo: {}", prompt)
            }
        };

        Ok(ProviderOutput {
            text,
            provider: "fake".into(),
            model: self.model.clone(),
            cached: false,
            meta: serde_json::json!({}),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
