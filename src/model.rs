use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One model/backend combination capable of producing an output for a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    #[serde(default)]
    pub vars: Map<String, Value>,
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
}

/// Canonical assertion variants. Deprecated type names are folded into these
/// once at config load; the pipeline never sees alias strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertionKind {
    Exact,
    Contains,
    IsInstance,
    /// Validate the whole output as JSON against a schema.
    JsonSchema,
    /// Extract the first embedded JSON value from the output, then validate.
    ContainsJson,
    /// File-path-addressed custom check run out of process.
    External,
    /// Rubric-driven semantic judge.
    LlmJudge,
}

impl AssertionKind {
    /// Map a config-level type tag onto a canonical kind. Unknown tags with no
    /// alias are a configuration error.
    pub fn parse(tag: &str) -> Result<Self, ConfigError> {
        let canonical = match tag {
            "g-eval" | "g_eval" | "llm-rubric" | "llm_rubric" => "llm_judge",
            "contains-json" => "contains_json",
            other => other,
        };
        match canonical {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "is_instance" => Ok(Self::IsInstance),
            "json_schema" => Ok(Self::JsonSchema),
            "contains_json" => Ok(Self::ContainsJson),
            "python" | "external" => Ok(Self::External),
            "llm_judge" => Ok(Self::LlmJudge),
            other => Err(ConfigError(format!("unknown assertion type `{}`", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::IsInstance => "is_instance",
            Self::JsonSchema => "json_schema",
            Self::ContainsJson => "contains_json",
            Self::External => "external",
            Self::LlmJudge => "llm_judge",
        }
    }
}

/// A single pass/fail/score-producing check applied to one provider output.
///
/// `value` carries the kind-specific payload: the expected string for
/// `exact`/`contains`, a type name for `is_instance`, a (pre-resolved) schema
/// for the JSON kinds, a script path for `external`, a rubric for `llm_judge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionSpec {
    pub kind: AssertionKind,
    pub value: Value,
    /// Relative weight in the aggregate score.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Pass cutoff for numeric custom-check results.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    /// Judge model override for `llm_judge`.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

impl AssertionSpec {
    pub fn new(kind: AssertionKind, value: Value) -> Self {
        Self {
            kind,
            value,
            weight: default_weight(),
            threshold: default_threshold(),
            case_sensitive: default_true(),
            model: None,
        }
    }
}

/// Uniform evaluator result shape; every assertion kind returns this so the
/// orchestrator can aggregate without knowing the kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

impl AssertionOutcome {
    pub fn pass(score: f64) -> Self {
        Self {
            passed: true,
            score,
            reason: "ok".into(),
            details: Value::Null,
        }
    }

    pub fn fail(score: f64, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score,
            reason: reason.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Per-assertion detail kept on the result row for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionRecord {
    pub name: String,
    pub passed: bool,
    pub score: f64,
    pub reason: String,
    pub expected: Value,
    pub actual: Value,
    #[serde(default)]
    pub details: Value,
}

/// Terminal state of one (test, provider) pair.
///
/// `Errored` means the provider invocation itself failed; it is distinct from
/// `Failed` (output produced, assertions did not pass).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairStatus {
    Passed,
    Failed,
    Errored,
}

/// Immutable outcome of one (test, provider) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub test_id: String,
    pub provider_id: String,
    pub status: PairStatus,
    pub pass: bool,
    pub score: f64,
    pub reason: String,
    pub assertions: Vec<AssertionRecord>,
    pub output: Option<String>,
    pub cached: bool,
    pub duration_ms: u64,
}

/// Output of one provider invocation, as cached and as fed to evaluators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub text: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub meta: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Seconds; 0 means entries never expire.
    #[serde(default)]
    pub ttl: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            ttl: 0,
        }
    }
}

/// Fully resolved, alias-normalized run configuration. Built by
/// `config::from_document`; reference nodes are gone by the time this exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub description: Option<String>,
    pub prompt: String,
    pub providers: Vec<ProviderConfig>,
    pub tests: Vec<TestCase>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_map_folds_deprecated_tags() {
        assert_eq!(AssertionKind::parse("g-eval").unwrap(), AssertionKind::LlmJudge);
        assert_eq!(
            AssertionKind::parse("llm-rubric").unwrap(),
            AssertionKind::LlmJudge
        );
        assert_eq!(
            AssertionKind::parse("contains-json").unwrap(),
            AssertionKind::ContainsJson
        );
        assert_eq!(AssertionKind::parse("python").unwrap(), AssertionKind::External);
    }

    #[test]
    fn unknown_tag_is_config_error() {
        let err = AssertionKind::parse("regex").unwrap_err();
        assert!(err.to_string().contains("unknown assertion type"));
    }
}
