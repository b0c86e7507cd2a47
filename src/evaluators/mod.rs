//! Assertion evaluator registry.
//!
//! Dispatch is a single match over the canonical [`AssertionKind`] set; alias
//! folding happened at config load. Every evaluator returns the same
//! [`AssertionOutcome`] shape so the orchestrator aggregates uniformly.
//! Collaborator failures (judge, custom checks) come back as failed outcomes;
//! only genuine configuration problems surface as errors.

pub mod external;

use crate::errors::ConfigError;
use crate::judge::Judge;
use crate::model::{AssertionKind, AssertionOutcome, AssertionSpec};
use external::CustomCheckRunner;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

pub struct EvalContext<'a> {
    pub test_id: &'a str,
    pub provider_id: &'a str,
    pub vars: &'a Map<String, Value>,
}

pub struct Registry {
    judge: Option<Arc<dyn Judge>>,
    checks: Arc<dyn CustomCheckRunner>,
}

impl Registry {
    pub fn new(judge: Option<Arc<dyn Judge>>, checks: Arc<dyn CustomCheckRunner>) -> Self {
        Self { judge, checks }
    }

    /// Evaluate one assertion against one provider output. `Err` is reserved
    /// for configuration problems (missing judge, malformed spec payload);
    /// everything an external collaborator can do wrong becomes a failed
    /// outcome instead.
    pub async fn evaluate(
        &self,
        spec: &AssertionSpec,
        output: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<AssertionOutcome, ConfigError> {
        match spec.kind {
            AssertionKind::Exact => Ok(eval_exact(spec, output)),
            AssertionKind::Contains => eval_contains(spec, output),
            AssertionKind::IsInstance => eval_is_instance(spec, output),
            AssertionKind::JsonSchema => Ok(eval_json_schema(spec, output, false)),
            AssertionKind::ContainsJson => Ok(eval_json_schema(spec, output, true)),
            AssertionKind::External => self.eval_external(spec, output, ctx).await,
            AssertionKind::LlmJudge => self.eval_judge(spec, output).await,
        }
    }

    async fn eval_external(
        &self,
        spec: &AssertionSpec,
        output: &str,
        ctx: &EvalContext<'_>,
    ) -> Result<AssertionOutcome, ConfigError> {
        let path = spec
            .value
            .as_str()
            .ok_or_else(|| ConfigError("external assertion requires a script path".into()))?;

        let context = serde_json::json!({
            "vars": ctx.vars,
            "test": ctx.test_id,
            "provider": ctx.provider_id,
        });

        match self.checks.run(Path::new(path), output, &context).await {
            Ok(verdict) => external::normalize_verdict(&verdict, spec.threshold),
            // Raised inside the check: failed assertion, not a crash.
            Err(e) => Ok(AssertionOutcome::fail(
                0.0,
                format!("custom check error: {}", e),
            )),
        }
    }

    async fn eval_judge(
        &self,
        spec: &AssertionSpec,
        output: &str,
    ) -> Result<AssertionOutcome, ConfigError> {
        let rubric = spec
            .value
            .as_str()
            .ok_or_else(|| ConfigError("llm_judge assertion requires a rubric string".into()))?;
        let judge = self
            .judge
            .as_ref()
            .ok_or_else(|| ConfigError("llm_judge assertion requires a judge collaborator".into()))?;

        match judge.judge(rubric, output, spec.model.as_deref()).await {
            Ok(verdict) => {
                let outcome = AssertionOutcome {
                    passed: verdict.passed,
                    score: verdict.score,
                    reason: verdict.reason,
                    details: Value::Null,
                };
                Ok(outcome)
            }
            // Judge unavailability is a failed assertion, never fatal.
            Err(e) => Ok(AssertionOutcome::fail(0.0, format!("judge error: {}", e))),
        }
    }
}

fn eval_exact(spec: &AssertionSpec, output: &str) -> AssertionOutcome {
    let passed = match &spec.value {
        Value::String(expected) => output.trim() == expected.trim(),
        expected => serde_json::from_str::<Value>(output.trim())
            .map(|parsed| &parsed == expected)
            .unwrap_or(false),
    };
    if passed {
        AssertionOutcome::pass(1.0)
    } else {
        AssertionOutcome::fail(0.0, "output does not equal expected value")
    }
}

fn eval_contains(spec: &AssertionSpec, output: &str) -> Result<AssertionOutcome, ConfigError> {
    let needle = spec
        .value
        .as_str()
        .ok_or_else(|| ConfigError("contains assertion requires a string value".into()))?;
    let passed = if spec.case_sensitive {
        output.contains(needle)
    } else {
        output.to_lowercase().contains(&needle.to_lowercase())
    };
    if passed {
        Ok(AssertionOutcome::pass(1.0))
    } else {
        Ok(AssertionOutcome::fail(
            0.0,
            format!("output does not contain {:?}", needle),
        ))
    }
}

fn eval_is_instance(spec: &AssertionSpec, output: &str) -> Result<AssertionOutcome, ConfigError> {
    let type_name = spec
        .value
        .as_str()
        .ok_or_else(|| ConfigError("is_instance assertion requires a type name".into()))?;

    let parsed: Option<Value> = serde_json::from_str(output.trim()).ok();
    let passed = match type_name {
        // Raw, unparseable text still counts as a string.
        "string" => parsed.as_ref().map_or(true, Value::is_string),
        "number" => parsed.as_ref().is_some_and(Value::is_number),
        "integer" => parsed
            .as_ref()
            .is_some_and(|v| v.is_i64() || v.is_u64()),
        "boolean" => parsed.as_ref().is_some_and(Value::is_boolean),
        "array" => parsed.as_ref().is_some_and(Value::is_array),
        "object" => parsed.as_ref().is_some_and(Value::is_object),
        "null" => parsed.as_ref().is_some_and(Value::is_null),
        other => {
            return Err(ConfigError(format!(
                "is_instance: unknown type name `{}`",
                other
            )))
        }
    };

    if passed {
        Ok(AssertionOutcome::pass(1.0))
    } else {
        Ok(AssertionOutcome::fail(
            0.0,
            format!("output is not an instance of {}", type_name),
        ))
    }
}

fn eval_json_schema(spec: &AssertionSpec, output: &str, embedded: bool) -> AssertionOutcome {
    let candidate = if embedded {
        extract_json(output)
    } else {
        serde_json::from_str(output.trim()).ok()
    };
    let Some(instance) = candidate else {
        // Parse failure fails the assertion with a descriptive reason.
        return AssertionOutcome::fail(0.0, "failed to parse output as JSON");
    };

    let validator = match jsonschema::options().build(&spec.value) {
        Ok(v) => v,
        Err(e) => {
            return AssertionOutcome::fail(0.0, format!("schema compile error: {}", e));
        }
    };

    if validator.is_valid(&instance) {
        return AssertionOutcome::pass(1.0);
    }

    const MAX_ERRORS: usize = 5;
    let violations: Vec<String> = validator
        .iter_errors(&instance)
        .take(MAX_ERRORS)
        .map(|e| e.to_string())
        .collect();
    AssertionOutcome::fail(
        0.0,
        format!("schema validation failed: {}", violations.join("; ")),
    )
    .with_details(serde_json::json!({ "violations": violations }))
}

/// First JSON object or array embedded in free-form text, fenced blocks
/// included.
fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text.trim()) {
        return Some(v);
    }

    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            if let Ok(v) = serde_json::from_str(body[..end].trim()) {
                return Some(v);
            }
        }
    }

    let bytes = text.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'{' && *b != b'[' {
            continue;
        }
        if let Some(end) = matching_close(&text[i..]) {
            if let Ok(v) = serde_json::from_str(&text[i..i + end]) {
                return Some(v);
            }
        }
    }
    None
}

/// Byte length of the balanced bracket span starting at `text[0]`, tracking
/// strings and escapes.
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
