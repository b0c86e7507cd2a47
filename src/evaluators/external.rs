//! File-path-addressed custom assertions, isolated behind a narrow capability
//! trait. All failures at this boundary become data; nothing raised by an
//! external check may propagate into the orchestrator.

use crate::errors::ConfigError;
use crate::model::AssertionOutcome;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

/// Narrow capability interface for custom checks: `(output, context)` in, one
/// JSON value out. The returned value is normalized by [`normalize_verdict`].
#[async_trait]
pub trait CustomCheckRunner: Send + Sync {
    async fn run(&self, script: &Path, output: &str, context: &Value) -> anyhow::Result<Value>;
}

/// Runs the check script out of process: `{"output", "context"}` JSON on
/// stdin, one JSON value expected on stdout.
pub struct ScriptCheckRunner {
    interpreter: String,
    timeout: Duration,
}

impl Default for ScriptCheckRunner {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ScriptCheckRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl CustomCheckRunner for ScriptCheckRunner {
    async fn run(&self, script: &Path, output: &str, context: &Value) -> anyhow::Result<Value> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "output": output,
            "context": context,
        }))?;

        let mut child = tokio::process::Command::new(&self.interpreter)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let done = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("custom check timed out: {}", script.display()))??;

        if !done.status.success() {
            let stderr = String::from_utf8_lossy(&done.stderr);
            anyhow::bail!(
                "custom check {} exited with {}: {}",
                script.display(),
                done.status,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&done.stdout);
        let verdict = serde_json::from_str(stdout.trim()).map_err(|e| {
            anyhow::anyhow!(
                "custom check {} produced non-JSON result: {}",
                script.display(),
                e
            )
        })?;
        Ok(verdict)
    }
}

/// Normalize a custom check's return value into the uniform outcome shape.
///
/// A boolean is a trivial pass/fail; a number is a score thresholded at
/// `threshold`; a mapping must supply `pass` and may supply `score`, `reason`
/// and `details`. A mapping missing `pass`, or an unsupported value type, is a
/// configuration error rather than a failed assertion.
pub fn normalize_verdict(value: &Value, threshold: f64) -> Result<AssertionOutcome, ConfigError> {
    match value {
        Value::Bool(true) => Ok(AssertionOutcome::pass(1.0)),
        Value::Bool(false) => Ok(AssertionOutcome::fail(0.0, "custom check returned false")),
        Value::Number(n) => {
            let score = n.as_f64().unwrap_or(0.0);
            if score >= threshold {
                Ok(AssertionOutcome::pass(score))
            } else {
                Ok(AssertionOutcome::fail(
                    score,
                    format!("score {} below threshold {}", score, threshold),
                ))
            }
        }
        Value::Object(map) => {
            let passed = map
                .get("pass")
                .and_then(Value::as_bool)
                .ok_or_else(|| ConfigError("custom check result missing `pass`".into()))?;
            let score = map
                .get("score")
                .and_then(Value::as_f64)
                .unwrap_or(if passed { 1.0 } else { 0.0 });
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or(if passed { "ok" } else { "custom check failed" })
                .to_string();
            let details = map.get("details").cloned().unwrap_or(Value::Null);
            Ok(AssertionOutcome {
                passed,
                score,
                reason,
                details,
            })
        }
        other => Err(ConfigError(format!(
            "unsupported custom check return type: {}",
            kind_name(other)
        ))),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn boolean_is_trivial_pass_fail() {
        let ok = normalize_verdict(&json!(true), 0.5).unwrap();
        assert!(ok.passed);
        assert_eq!(ok.score, 1.0);

        let bad = normalize_verdict(&json!(false), 0.5).unwrap();
        assert!(!bad.passed);
        assert_eq!(bad.score, 0.0);
    }

    #[test]
    fn number_thresholds_at_cutoff() {
        let above = normalize_verdict(&json!(0.75), 0.5).unwrap();
        assert!(above.passed);
        assert_eq!(above.score, 0.75);

        let below = normalize_verdict(&json!(0.25), 0.5).unwrap();
        assert!(!below.passed);
        assert!(below.reason.contains("below threshold"));
    }

    #[test]
    fn mapping_fields_pass_through_exactly() {
        let v = json!({"pass": false, "score": 0.25, "reason": "x"});
        let out = normalize_verdict(&v, 0.5).unwrap();
        assert!(!out.passed);
        assert_eq!(out.score, 0.25);
        assert_eq!(out.reason, "x");
    }

    #[test]
    fn mapping_missing_pass_is_config_error() {
        let err = normalize_verdict(&json!({"score": 1.0}), 0.5).unwrap_err();
        assert!(err.to_string().contains("missing `pass`"));
    }

    #[test]
    fn unsupported_type_is_config_error() {
        assert!(normalize_verdict(&json!("yes"), 0.5).is_err());
        assert!(normalize_verdict(&json!([1]), 0.5).is_err());
    }
}
