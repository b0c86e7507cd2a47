use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Content-addressed key for one provider call. Two logically identical calls
/// hash identically; any variation in provider, model, rendered prompt,
/// variables, or provider config changes the key. Variables and config are
/// canonicalized (JCS) so map ordering cannot perturb the digest.
pub fn cache_key(
    provider: &str,
    model: &str,
    prompt: &str,
    vars: &Map<String, Value>,
    provider_config: &Value,
) -> String {
    let vars_canonical = canonical(&Value::Object(vars.clone()));
    let config_canonical = canonical(provider_config);

    let mut h = Sha256::new();
    h.update(provider.as_bytes());
    h.update(b"\n");
    h.update(model.as_bytes());
    h.update(b"\n");
    h.update(prompt.as_bytes());
    h.update(b"\n");
    h.update(vars_canonical.as_bytes());
    h.update(b"\n");
    h.update(config_canonical.as_bytes());
    format!("{:x}", h.finalize())
}

fn canonical(value: &Value) -> String {
    serde_jcs::to_string(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_vars() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("var1".into(), json!("value1"));
        m
    }

    #[test]
    fn identical_inputs_identical_key() {
        let a = cache_key(
            "openai",
            "gpt-4",
            "Test prompt",
            &sample_vars(),
            &json!({"temperature": 0.0}),
        );
        let b = cache_key(
            "openai",
            "gpt-4",
            "Test prompt",
            &sample_vars(),
            &json!({"temperature": 0.0}),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn any_field_variation_changes_key() {
        let base = cache_key(
            "openai",
            "gpt-4",
            "Test prompt",
            &sample_vars(),
            &json!({"temperature": 0.0}),
        );
        let other_prompt = cache_key(
            "openai",
            "gpt-4",
            "Different prompt",
            &sample_vars(),
            &json!({"temperature": 0.0}),
        );
        let other_config = cache_key(
            "openai",
            "gpt-4",
            "Test prompt",
            &sample_vars(),
            &json!({"temperature": 0.7}),
        );
        let other_provider = cache_key(
            "anthropic",
            "gpt-4",
            "Test prompt",
            &sample_vars(),
            &json!({"temperature": 0.0}),
        );
        assert_ne!(base, other_prompt);
        assert_ne!(base, other_config);
        assert_ne!(base, other_provider);
    }

    #[test]
    fn map_ordering_does_not_perturb_key() {
        let mut forward = Map::new();
        forward.insert("a".into(), json!(1));
        forward.insert("b".into(), json!(2));
        let mut backward = Map::new();
        backward.insert("b".into(), json!(2));
        backward.insert("a".into(), json!(1));

        let k1 = cache_key("p", "m", "x", &forward, &Value::Null);
        let k2 = cache_key("p", "m", "x", &backward, &Value::Null);
        assert_eq!(k1, k2);
    }
}
