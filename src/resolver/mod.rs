//! `$ref` pointer expansion for configuration documents.
//!
//! Pointers have the form `#/a/b/c` and are looked up against a root document
//! (typically the config itself, carrying `schemas` / `assertionTemplates`
//! sections). Cycle detection uses an explicit chain of in-flight pointers,
//! not call-stack depth, so `A -> B -> A` fails deterministically.

use crate::errors::ResolveError;
use serde_json::{Map, Value};

/// Expand every reference node in `document` against `root`.
///
/// The returned document contains no residual `$ref` nodes; substituted
/// targets are deep copies, so two usages of one template never alias.
/// Resolving an already-resolved document is a no-op.
pub fn resolve(document: &Value, root: &Value) -> Result<Value, ResolveError> {
    let mut chain = Vec::new();
    resolve_node(document, root, &mut chain)
}

fn resolve_node(
    node: &Value,
    root: &Value,
    chain: &mut Vec<String>,
) -> Result<Value, ResolveError> {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(pointer)) = map.get("$ref") {
                return resolve_pointer(pointer, root, chain);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_node(v, root, chain)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_node(item, root, chain)?);
            }
            Ok(Value::Array(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn resolve_pointer(
    pointer: &str,
    root: &Value,
    chain: &mut Vec<String>,
) -> Result<Value, ResolveError> {
    if chain.iter().any(|p| p == pointer) {
        let mut cycle = chain.clone();
        cycle.push(pointer.to_string());
        return Err(ResolveError::Cycle { chain: cycle });
    }

    let target =
        lookup(pointer, root).ok_or_else(|| ResolveError::NotFound(pointer.to_string()))?;

    chain.push(pointer.to_string());
    let resolved = resolve_node(target, root, chain)?;
    chain.pop();
    Ok(resolved)
}

fn lookup<'a>(pointer: &str, root: &'a Value) -> Option<&'a Value> {
    let path = pointer.strip_prefix('#')?;
    if path.is_empty() {
        return Some(root);
    }
    root.pointer(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_simple_reference() {
        let root = json!({
            "schemas": { "person": { "type": "object" } },
            "assertion": { "value": { "$ref": "#/schemas/person" } }
        });
        let resolved = resolve(&root, &root).unwrap();
        assert_eq!(resolved["assertion"]["value"], json!({"type": "object"}));
    }

    #[test]
    fn resolves_reference_to_reference() {
        let root = json!({
            "a": { "$ref": "#/b" },
            "b": { "$ref": "#/c" },
            "c": "leaf"
        });
        let resolved = resolve(&root, &root).unwrap();
        assert_eq!(resolved["a"], json!("leaf"));
        assert_eq!(resolved["b"], json!("leaf"));
    }

    #[test]
    fn missing_target_carries_pointer() {
        let root = json!({ "x": { "$ref": "#/nowhere" } });
        let err = resolve(&root, &root).unwrap_err();
        assert_eq!(err, ResolveError::NotFound("#/nowhere".into()));
    }

    #[test]
    fn cycle_fails_instead_of_hanging() {
        let root = json!({
            "a": { "$ref": "#/b" },
            "b": { "$ref": "#/a" }
        });
        let err = resolve(&root, &root).unwrap_err();
        match err {
            ResolveError::Cycle { chain } => {
                assert_eq!(chain, vec!["#/b", "#/a", "#/b"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let root = json!({ "a": { "$ref": "#/a" } });
        assert!(matches!(
            resolve(&root, &root).unwrap_err(),
            ResolveError::Cycle { .. }
        ));
    }

    #[test]
    fn resolution_is_idempotent() {
        let root = json!({
            "schemas": { "s": { "type": "string" } },
            "tests": [{ "value": { "$ref": "#/schemas/s" } }]
        });
        let once = resolve(&root, &root).unwrap();
        let twice = resolve(&once, &root).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn array_indices_resolve() {
        let root = json!({
            "items": ["zero", "one"],
            "x": { "$ref": "#/items/1" }
        });
        let resolved = resolve(&root, &root).unwrap();
        assert_eq!(resolved["x"], json!("one"));
    }

    #[test]
    fn two_usages_are_independent_copies() {
        let root = json!({
            "tpl": { "k": "v" },
            "first": { "$ref": "#/tpl" },
            "second": { "$ref": "#/tpl" }
        });
        let mut resolved = resolve(&root, &root).unwrap();
        resolved["first"]["k"] = json!("mutated");
        assert_eq!(resolved["second"]["k"], json!("v"));
    }

    #[test]
    fn external_root_resolves_document_refs() {
        let root = json!({ "assertionTemplates": { "t": { "type": "exact", "value": "x" } } });
        let doc = json!({ "$ref": "#/assertionTemplates/t" });
        let resolved = resolve(&doc, &root).unwrap();
        assert_eq!(resolved, json!({"type": "exact", "value": "x"}));
    }
}
