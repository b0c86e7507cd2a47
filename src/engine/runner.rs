use crate::cache::{cache_key, CacheStore};
use crate::errors::ConfigError;
use crate::evaluators::external::{CustomCheckRunner, ScriptCheckRunner};
use crate::evaluators::{EvalContext, Registry};
use crate::judge::Judge;
use crate::model::{
    AssertionRecord, EvalConfig, EvaluationResult, PairStatus, ProviderConfig, ProviderOutput,
    TestCase,
};
use crate::providers::ProviderClient;
use crate::report::{RunArtifacts, RunSummary};
use crate::template;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct RunPolicy {
    pub max_concurrent: usize,
    /// Bypass cache reads; outputs are still written back.
    pub refresh_cache: bool,
    /// Restrict the matrix to a single provider id.
    pub provider_override: Option<String>,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            refresh_cache: false,
            provider_override: None,
        }
    }
}

/// Cooperative run-level cancellation: stops scheduling new pairs promptly,
/// lets in-flight pairs finish (cache writes stay all-or-nothing).
#[derive(Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives the {test x provider} matrix: cache lookup, provider invocation on
/// miss, then every assertion in the test (never short-circuited), aggregated
/// into one immutable result per pair.
pub struct Runner {
    pub cache: CacheStore,
    pub clients: HashMap<String, Arc<dyn ProviderClient>>,
    pub judge: Option<Arc<dyn Judge>>,
    pub checks: Arc<dyn CustomCheckRunner>,
    pub policy: RunPolicy,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(cache: CacheStore) -> Self {
        Self {
            cache,
            clients: HashMap::new(),
            judge: None,
            checks: Arc::new(ScriptCheckRunner::default()),
            policy: RunPolicy::default(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_client(mut self, provider_id: impl Into<String>, client: Arc<dyn ProviderClient>) -> Self {
        self.clients.insert(provider_id.into(), client);
        self
    }

    pub fn with_judge(mut self, judge: Arc<dyn Judge>) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_checks(mut self, checks: Arc<dyn CustomCheckRunner>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_policy(mut self, policy: RunPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Run the full matrix. Results are collected in completion order and
    /// returned sorted by (test_id, provider_id) for deterministic reporting.
    ///
    /// Configuration problems (unknown provider, empty override) abort before
    /// any pair is scheduled; per-pair provider failures become `Errored` rows
    /// and never abort the rest of the matrix.
    pub async fn run_matrix(&self, cfg: &EvalConfig) -> anyhow::Result<RunArtifacts> {
        let providers = self.select_providers(cfg)?;
        for p in &providers {
            if !self.clients.contains_key(&p.id) {
                return Err(ConfigError(format!(
                    "no invocation client registered for provider `{}`",
                    p.id
                ))
                .into());
            }
        }

        let registry = Arc::new(Registry::new(self.judge.clone(), self.checks.clone()));
        let max_concurrent = cfg
            .max_concurrent
            .unwrap_or(self.policy.max_concurrent)
            .max(1);
        let sem = Arc::new(Semaphore::new(max_concurrent));
        let mut join_set = JoinSet::new();

        let total = cfg.tests.len() * providers.len();
        tracing::info!(
            tests = cfg.tests.len(),
            providers = providers.len(),
            max_concurrent,
            "starting evaluation matrix"
        );

        'schedule: for tc in &cfg.tests {
            for provider in &providers {
                // Checked after the permit so a cancel raised by an in-flight
                // pair is seen before the next pair is spawned.
                let permit = sem.clone().acquire_owned().await?;
                if self.cancel.load(Ordering::SeqCst) {
                    tracing::info!("run cancelled; no new pairs scheduled");
                    break 'schedule;
                }
                let pair = PairContext {
                    cache: self.cache.clone(),
                    ttl: cfg.cache.ttl,
                    refresh_cache: self.policy.refresh_cache,
                    client: self.clients[&provider.id].clone(),
                    registry: registry.clone(),
                    prompt_template: cfg.prompt.clone(),
                    test: tc.clone(),
                    provider: provider.clone(),
                };
                join_set.spawn(async move {
                    let _permit = permit;
                    run_pair(pair).await
                });
            }
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let row = match joined {
                Ok(row) => row,
                Err(e) => errored_row("unknown", "unknown", format!("join error: {}", e), 0),
            };
            results.push(row);
        }

        // Canonical order for reporting and golden comparisons.
        results.sort_by(|a, b| {
            (a.test_id.as_str(), a.provider_id.as_str())
                .cmp(&(b.test_id.as_str(), b.provider_id.as_str()))
        });

        let summary = RunSummary::from_results(&results);
        tracing::info!(
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            "evaluation matrix complete"
        );

        Ok(RunArtifacts {
            description: cfg.description.clone(),
            results,
            summary,
            cache: self.cache.stats()?,
        })
    }

    fn select_providers(&self, cfg: &EvalConfig) -> Result<Vec<ProviderConfig>, ConfigError> {
        match &self.policy.provider_override {
            None => Ok(cfg.providers.clone()),
            Some(id) => {
                let selected: Vec<ProviderConfig> = cfg
                    .providers
                    .iter()
                    .filter(|p| &p.id == id)
                    .cloned()
                    .collect();
                if selected.is_empty() {
                    return Err(ConfigError(format!(
                        "provider override `{}` matches no configured provider",
                        id
                    )));
                }
                Ok(selected)
            }
        }
    }
}

struct PairContext {
    cache: CacheStore,
    ttl: u64,
    refresh_cache: bool,
    client: Arc<dyn ProviderClient>,
    registry: Arc<Registry>,
    prompt_template: String,
    test: TestCase,
    provider: ProviderConfig,
}

/// One (test, provider) pair: cache lookup strictly precedes invocation,
/// which strictly precedes assertion evaluation.
async fn run_pair(ctx: PairContext) -> EvaluationResult {
    let start = Instant::now();
    let tc = &ctx.test;
    let provider = &ctx.provider;

    let prompt = match template::render(&ctx.prompt_template, &tc.vars) {
        Ok(p) => p,
        Err(e) => {
            return errored_row(&tc.id, &provider.id, e.to_string(), elapsed_ms(start));
        }
    };

    let key = cache_key(&provider.id, &provider.model, &prompt, &tc.vars, &provider.config);

    let mut output: Option<ProviderOutput> = None;
    let mut cached = false;
    if !ctx.refresh_cache {
        match ctx.cache.get(&key) {
            Ok(Some(value)) => match serde_json::from_value::<ProviderOutput>(value) {
                Ok(mut hit) => {
                    tracing::debug!(test = %tc.id, provider = %provider.id, "cache hit");
                    hit.cached = true;
                    cached = true;
                    output = Some(hit);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cached value undecodable; treating as miss");
                }
            },
            Ok(None) => {}
            Err(e) => {
                // Cache trouble is never fatal to the pair.
                tracing::warn!(key = %key, error = %e, "cache read failed; treating as miss");
            }
        }
    }

    let output = match output {
        Some(o) => o,
        None => {
            match ctx
                .client
                .invoke(&prompt, &tc.vars, &provider.config)
                .await
            {
                Ok(fresh) => {
                    // Write-back only after a successful invocation; failed
                    // assertions downstream still keep this entry.
                    match serde_json::to_value(&fresh) {
                        Ok(value) => {
                            if let Err(e) = ctx.cache.put(&key, &value, ctx.ttl) {
                                tracing::warn!(key = %key, error = %e, "cache write failed");
                            }
                        }
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "output not serializable for cache");
                        }
                    }
                    fresh
                }
                Err(e) => {
                    return errored_row(
                        &tc.id,
                        &provider.id,
                        format!("provider invocation failed: {}", e),
                        elapsed_ms(start),
                    );
                }
            }
        }
    };

    let eval_ctx = EvalContext {
        test_id: &tc.id,
        provider_id: &provider.id,
        vars: &tc.vars,
    };

    let mut records = Vec::with_capacity(tc.assertions.len());
    let mut all_passed = true;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut failed_count = 0usize;

    // All assertions always run so the report can show per-field detail.
    for spec in &tc.assertions {
        let outcome = match ctx.registry.evaluate(spec, &output.text, &eval_ctx).await {
            Ok(o) => o,
            Err(e) => crate::model::AssertionOutcome::fail(0.0, e.to_string()),
        };
        all_passed &= outcome.passed;
        if !outcome.passed {
            failed_count += 1;
        }
        weighted_sum += spec.weight * outcome.score;
        weight_total += spec.weight;
        records.push(AssertionRecord {
            name: spec.kind.name().to_string(),
            passed: outcome.passed,
            score: outcome.score,
            reason: outcome.reason,
            expected: spec.value.clone(),
            actual: Value::String(output.text.clone()),
            details: outcome.details,
        });
    }

    let score = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        1.0
    };
    let (status, reason) = if all_passed {
        (PairStatus::Passed, "ok".to_string())
    } else {
        (
            PairStatus::Failed,
            format!("{} of {} assertions failed", failed_count, records.len()),
        )
    };

    EvaluationResult {
        test_id: tc.id.clone(),
        provider_id: provider.id.clone(),
        status,
        pass: all_passed,
        score,
        reason,
        assertions: records,
        output: Some(output.text),
        cached,
        duration_ms: elapsed_ms(start),
    }
}

fn errored_row(
    test_id: &str,
    provider_id: &str,
    reason: String,
    duration_ms: u64,
) -> EvaluationResult {
    EvaluationResult {
        test_id: test_id.to_string(),
        provider_id: provider_id.to_string(),
        status: PairStatus::Errored,
        pass: false,
        score: 0.0,
        reason,
        assertions: Vec::new(),
        output: None,
        cached: false,
        duration_ms,
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
