//! End-to-end matrix runs over scripted in-process providers: cache reuse on
//! reruns, error isolation across pairs, deterministic result ordering.

use promptdev_core::providers::fake::FakeClient;
use promptdev_core::{
    AssertionKind, AssertionSpec, CacheSettings, CacheStore, EvalConfig, PairStatus,
    ProviderConfig, Runner, TestCase,
};
use serde_json::json;
use std::sync::Arc;

fn provider(id: &str) -> ProviderConfig {
    ProviderConfig {
        id: id.into(),
        model: format!("fake:{}", id),
        config: json!({"temperature": 0.0}),
    }
}

fn test_case(id: &str, input: &str, assertions: Vec<AssertionSpec>) -> TestCase {
    let mut vars = serde_json::Map::new();
    vars.insert("input".into(), json!(input));
    TestCase {
        id: id.into(),
        vars,
        assertions,
    }
}

fn config(tests: Vec<TestCase>, providers: Vec<ProviderConfig>) -> EvalConfig {
    EvalConfig {
        description: Some("matrix integration".into()),
        prompt: "Respond to: {{input}}".into(),
        providers,
        tests,
        cache: CacheSettings::default(),
        max_concurrent: Some(4),
    }
}

#[tokio::test]
async fn full_matrix_produces_one_row_per_pair_in_order() {
    let cfg = config(
        vec![test_case("t2", "b", vec![]), test_case("t1", "a", vec![])],
        vec![provider("p2"), provider("p1")],
    );
    let runner = Runner::new(CacheStore::memory().unwrap())
        .with_client("p1", Arc::new(FakeClient::new("m1").with_response("out")))
        .with_client("p2", Arc::new(FakeClient::new("m2").with_response("out")));

    let artifacts = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(artifacts.results.len(), 4);

    let order: Vec<(String, String)> = artifacts
        .results
        .iter()
        .map(|r| (r.test_id.clone(), r.provider_id.clone()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("t1".into(), "p1".into()),
            ("t1".into(), "p2".into()),
            ("t2".into(), "p1".into()),
            ("t2".into(), "p2".into()),
        ]
    );
    assert_eq!(artifacts.summary.total(), 4);
}

#[tokio::test]
async fn rerun_serves_outputs_from_cache() {
    let cfg = config(
        vec![test_case("t1", "a", vec![]), test_case("t2", "b", vec![])],
        vec![provider("p1")],
    );
    let client = Arc::new(FakeClient::new("m1").with_response("stable output"));
    let runner =
        Runner::new(CacheStore::memory().unwrap()).with_client("p1", client.clone());

    let first = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 2);
    assert!(first.results.iter().all(|r| !r.cached));

    let second = runner.run_matrix(&cfg).await.unwrap();
    // No new invocations; both rows marked cached with identical outputs.
    assert_eq!(client.calls(), 2);
    assert!(second.results.iter().all(|r| r.cached));
    assert_eq!(second.cache.hits, 2);
    for (a, b) in first.results.iter().zip(&second.results) {
        assert_eq!(a.output, b.output);
    }
}

#[tokio::test]
async fn distinct_vars_never_share_cache_entries() {
    let cfg = config(
        vec![test_case("t1", "a", vec![]), test_case("t2", "b", vec![])],
        vec![provider("p1")],
    );
    let client = Arc::new(FakeClient::new("m1").with_scripted(vec![
        "first".into(),
        "second".into(),
    ]));
    let runner = Runner::new(CacheStore::memory().unwrap()).with_client("p1", client.clone());

    let artifacts = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 2);
    let outputs: std::collections::HashSet<_> = artifacts
        .results
        .iter()
        .filter_map(|r| r.output.clone())
        .collect();
    assert_eq!(outputs.len(), 2);
}

#[tokio::test]
async fn provider_failure_is_isolated_to_its_pairs() {
    let cfg = config(
        vec![test_case(
            "t1",
            "a",
            vec![AssertionSpec::new(AssertionKind::Contains, json!("out"))],
        )],
        vec![provider("good"), provider("bad")],
    );
    let runner = Runner::new(CacheStore::memory().unwrap())
        .with_client("good", Arc::new(FakeClient::new("m").with_response("out")))
        .with_client("bad", Arc::new(FakeClient::new("m").failing("backend down")));

    let artifacts = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(artifacts.results.len(), 2);

    let bad = artifacts
        .results
        .iter()
        .find(|r| r.provider_id == "bad")
        .unwrap();
    assert_eq!(bad.status, PairStatus::Errored);
    assert!(bad.reason.contains("provider invocation failed"));
    assert!(bad.output.is_none());

    let good = artifacts
        .results
        .iter()
        .find(|r| r.provider_id == "good")
        .unwrap();
    assert_eq!(good.status, PairStatus::Passed);
    assert_eq!(artifacts.summary.passed, 1);
    assert_eq!(artifacts.summary.errored, 1);
}

#[tokio::test]
async fn assertions_never_short_circuit() {
    let cfg = config(
        vec![test_case(
            "t1",
            "a",
            vec![
                AssertionSpec::new(AssertionKind::Contains, json!("absent")),
                AssertionSpec::new(AssertionKind::Contains, json!("out")),
                AssertionSpec::new(AssertionKind::IsInstance, json!("object")),
            ],
        )],
        vec![provider("p1")],
    );
    let runner = Runner::new(CacheStore::memory().unwrap())
        .with_client("p1", Arc::new(FakeClient::new("m").with_response("out")));

    let artifacts = runner.run_matrix(&cfg).await.unwrap();
    let row = &artifacts.results[0];
    assert_eq!(row.status, PairStatus::Failed);
    // All three ran despite the first failing.
    assert_eq!(row.assertions.len(), 3);
    assert_eq!(row.reason, "2 of 3 assertions failed");
}

#[tokio::test]
async fn failed_assertions_still_cache_the_output() {
    let cfg = config(
        vec![test_case(
            "t1",
            "a",
            vec![AssertionSpec::new(AssertionKind::Contains, json!("absent"))],
        )],
        vec![provider("p1")],
    );
    let client = Arc::new(FakeClient::new("m").with_response("out"));
    let runner = Runner::new(CacheStore::memory().unwrap()).with_client("p1", client.clone());

    let first = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(first.results[0].status, PairStatus::Failed);

    let second = runner.run_matrix(&cfg).await.unwrap();
    // Invocation succeeded, so the entry stays regardless of the verdict.
    assert_eq!(client.calls(), 1);
    assert!(second.results[0].cached);
}

#[tokio::test]
async fn refresh_cache_bypasses_reads_but_writes_back() {
    let cfg = config(vec![test_case("t1", "a", vec![])], vec![provider("p1")]);
    let client = Arc::new(FakeClient::new("m").with_scripted(vec![
        "first".into(),
        "second".into(),
    ]));
    let cache = CacheStore::memory().unwrap();
    let runner = Runner::new(cache.clone()).with_client("p1", client.clone());

    runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 1);

    let refreshing = Runner::new(cache.clone())
        .with_client("p1", client.clone())
        .with_policy(promptdev_core::RunPolicy {
            refresh_cache: true,
            ..Default::default()
        });
    let refreshed = refreshing.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 2);
    assert_eq!(refreshed.results[0].output.as_deref(), Some("second"));

    // The refreshed entry replaced the stale one.
    let third = Runner::new(cache).with_client("p1", client.clone());
    let replayed = third.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 2);
    assert_eq!(replayed.results[0].output.as_deref(), Some("second"));
}

#[tokio::test]
async fn disabled_cache_invokes_every_run()
{
    let mut cfg = config(vec![test_case("t1", "a", vec![])], vec![provider("p1")]);
    cfg.cache.enabled = false;
    let client = Arc::new(FakeClient::new("m").with_response("out"));
    let cache = CacheStore::from_settings(&cfg.cache).unwrap();
    let runner = Runner::new(cache).with_client("p1", client.clone());

    runner.run_matrix(&cfg).await.unwrap();
    runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(client.calls(), 2);
}

/// Raises the run's cancel flag from inside the first invocation, so the
/// cancel lands while that pair is still in flight.
struct CancelOnInvoke {
    inner: Arc<FakeClient>,
    handle: promptdev_core::CancelHandle,
}

#[async_trait::async_trait]
impl promptdev_core::providers::ProviderClient for CancelOnInvoke {
    async fn invoke(
        &self,
        prompt: &str,
        vars: &serde_json::Map<String, serde_json::Value>,
        config: &serde_json::Value,
    ) -> anyhow::Result<promptdev_core::ProviderOutput> {
        self.handle.cancel();
        self.inner.invoke(prompt, vars, config).await
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

#[tokio::test]
async fn mid_run_cancel_finishes_in_flight_pair_and_schedules_no_more() {
    let mut cfg = config(
        (0..4)
            .map(|i| test_case(&format!("t{}", i), "a", vec![]))
            .collect(),
        vec![provider("p1")],
    );
    cfg.max_concurrent = Some(1);

    let inner = Arc::new(FakeClient::new("m").with_response("out"));
    let cache = CacheStore::memory().unwrap();
    let runner = Runner::new(cache.clone());
    let client = CancelOnInvoke {
        inner: inner.clone(),
        handle: runner.cancel_handle(),
    };
    let runner = runner.with_client("p1", Arc::new(client));

    let artifacts = runner.run_matrix(&cfg).await.unwrap();

    // The pair that raised the cancel ran to completion and its cache write
    // landed whole; nothing after it was scheduled.
    assert_eq!(artifacts.results.len(), 1);
    assert_eq!(artifacts.results[0].test_id, "t0");
    assert_eq!(artifacts.results[0].status, PairStatus::Passed);
    assert_eq!(artifacts.results[0].output.as_deref(), Some("out"));
    assert_eq!(inner.calls(), 1);
    assert_eq!(cache.stats().unwrap().entries, 1);
}

#[tokio::test]
async fn config_document_runs_end_to_end() {
    let doc = json!({
        "description": "doc-driven run",
        "prompt": "Answer: {{q}}",
        "providers": [{"id": "p1", "model": "fake:m"}],
        "schemas": {
            "reply": {
                "type": "object",
                "properties": {"answer": {"type": "string"}},
                "required": ["answer"]
            }
        },
        "tests": [{
            "id": "t1",
            "vars": {"q": "hello"},
            "assert": [{"type": "json_schema", "value": {"$ref": "#/schemas/reply"}}]
        }]
    });
    let cfg = promptdev_core::config::from_document(&doc).unwrap();
    let runner = Runner::new(CacheStore::memory().unwrap()).with_client(
        "p1",
        Arc::new(FakeClient::new("m").with_response(r#"{"answer": "hi"}"#)),
    );

    let artifacts = runner.run_matrix(&cfg).await.unwrap();
    assert_eq!(artifacts.results[0].status, PairStatus::Passed);
    assert_eq!(artifacts.summary.passed, 1);
}
