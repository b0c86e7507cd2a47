//! Config loading: YAML file to document, `$ref` expansion over the whole
//! document, then alias normalization and per-kind payload validation into a
//! typed [`EvalConfig`]. Everything downstream of this module sees canonical
//! assertion kinds and no reference nodes.

use crate::errors::{ConfigError, LoadError};
use crate::model::{
    AssertionKind, AssertionSpec, CacheSettings, EvalConfig, ProviderConfig, TestCase,
};
use crate::resolver;
use crate::template;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    description: Option<String>,
    prompt: String,
    providers: Vec<RawProvider>,
    #[serde(default)]
    tests: Vec<RawTest>,
    #[serde(default, rename = "default_test")]
    default_test: Option<RawDefaults>,
    #[serde(default)]
    cache: Option<CacheSettings>,
    #[serde(default)]
    max_concurrent: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawProvider {
    id: String,
    model: String,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    vars: Map<String, Value>,
    #[serde(default, alias = "assert")]
    assertions: Vec<RawAssertion>,
}

#[derive(Debug, Deserialize)]
struct RawDefaults {
    #[serde(default, alias = "assert")]
    assertions: Vec<RawAssertion>,
}

#[derive(Debug, Deserialize)]
struct RawAssertion {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    case_sensitive: Option<bool>,
    #[serde(default)]
    model: Option<String>,
}

/// Load a config file from disk and build the typed run configuration.
pub fn load(path: &Path) -> Result<EvalConfig, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let doc: Value = serde_yaml::from_str(&text)?;
    from_document(&doc)
}

/// Build the typed run configuration from an already-parsed document.
///
/// References are expanded against the document itself, so shared assertion
/// templates and schemas can live anywhere in the file and be pulled in with
/// `{"$ref": "#/..."}` nodes.
pub fn from_document(doc: &Value) -> Result<EvalConfig, LoadError> {
    let resolved = resolver::resolve(doc, doc)?;
    let raw: RawConfig = serde_json::from_value(resolved)
        .map_err(|e| ConfigError(format!("malformed config: {}", e)))?;

    if raw.providers.is_empty() {
        return Err(ConfigError("at least one provider is required".into()).into());
    }
    let mut seen = HashSet::new();
    for p in &raw.providers {
        if p.id.trim().is_empty() {
            return Err(ConfigError("provider id must not be empty".into()).into());
        }
        if !seen.insert(p.id.clone()) {
            return Err(ConfigError(format!("duplicate provider id `{}`", p.id)).into());
        }
    }
    if raw.tests.is_empty() {
        return Err(ConfigError("at least one test is required".into()).into());
    }

    let defaults: Vec<AssertionSpec> = raw
        .default_test
        .map(|d| {
            d.assertions
                .into_iter()
                .map(build_assertion)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut tests = Vec::with_capacity(raw.tests.len());
    for (i, t) in raw.tests.into_iter().enumerate() {
        let id = t
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("test-{}", i + 1));
        let mut assertions = defaults.clone();
        for a in t.assertions {
            assertions.push(build_assertion(a)?);
        }
        tests.push(TestCase {
            id,
            vars: t.vars,
            assertions,
        });
    }

    // Every placeholder must be satisfiable before any provider is invoked.
    let placeholders = template::variables(&raw.prompt);
    for t in &tests {
        for name in &placeholders {
            if !t.vars.contains_key(name) {
                return Err(ConfigError(format!(
                    "test `{}` is missing variable `{}` required by the prompt template",
                    t.id, name
                ))
                .into());
            }
        }
    }

    let providers = raw
        .providers
        .into_iter()
        .map(|p| ProviderConfig {
            id: p.id,
            model: p.model,
            config: p.config,
        })
        .collect();

    Ok(EvalConfig {
        description: raw.description,
        prompt: raw.prompt,
        providers,
        tests,
        cache: raw.cache.unwrap_or_default(),
        max_concurrent: raw.max_concurrent,
    })
}

fn build_assertion(raw: RawAssertion) -> Result<AssertionSpec, ConfigError> {
    let kind = AssertionKind::parse(&raw.kind)?;
    validate_payload(kind, &raw.value)?;
    let mut spec = AssertionSpec::new(kind, raw.value);
    if let Some(w) = raw.weight {
        if w <= 0.0 || !w.is_finite() {
            return Err(ConfigError(format!(
                "assertion weight must be positive, got {}",
                w
            )));
        }
        spec.weight = w;
    }
    if let Some(t) = raw.threshold {
        spec.threshold = t;
    }
    if let Some(cs) = raw.case_sensitive {
        spec.case_sensitive = cs;
    }
    spec.model = raw.model;
    Ok(spec)
}

fn validate_payload(kind: AssertionKind, value: &Value) -> Result<(), ConfigError> {
    match kind {
        AssertionKind::Exact => {
            if value.is_null() {
                return Err(ConfigError("`exact` assertion requires a value".into()));
            }
        }
        AssertionKind::Contains
        | AssertionKind::IsInstance
        | AssertionKind::External
        | AssertionKind::LlmJudge => {
            if !value.as_str().is_some_and(|s| !s.is_empty()) {
                return Err(ConfigError(format!(
                    "`{}` assertion requires a non-empty string value",
                    kind.name()
                )));
            }
        }
        AssertionKind::JsonSchema | AssertionKind::ContainsJson => {
            if !value.is_object() {
                return Err(ConfigError(format!(
                    "`{}` assertion requires a schema object",
                    kind.name()
                )));
            }
        }
    }
    Ok(())
}
