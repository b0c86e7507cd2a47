//! `{{var}}` substitution for prompt templates.

use crate::errors::ConfigError;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Render a template by substituting every `{{name}}` placeholder from `vars`.
/// A placeholder with no matching variable is a configuration error.
pub fn render(template: &str, vars: &Map<String, Value>) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated placeholder: keep literal text.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = after[..end].trim();
        let value = vars
            .get(name)
            .ok_or_else(|| ConfigError(format!("missing variable `{}` for prompt template", name)))?;
        out.push_str(&value_to_text(value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Placeholder names referenced by a template, deduplicated and sorted.
pub fn variables(template: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        names.insert(after[..end].trim().to_string());
        rest = &after[end + 2..];
    }
    names.into_iter().collect()
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_string_and_non_string_vars() {
        let v = vars(&[("name", json!("Alice")), ("count", json!(3))]);
        let out = render("hello {{name}}, {{count}} items", &v).unwrap();
        assert_eq!(out, "hello Alice, 3 items");
    }

    #[test]
    fn missing_variable_is_config_error() {
        let err = render("hi {{who}}", &Map::new()).unwrap_err();
        assert!(err.to_string().contains("missing variable `who`"));
    }

    #[test]
    fn collects_template_variables() {
        let names = variables("{{b}} and {{a}} and {{b}}");
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn unterminated_placeholder_stays_literal() {
        let out = render("plain {{oops", &Map::new()).unwrap();
        assert_eq!(out, "plain {{oops");
    }
}
