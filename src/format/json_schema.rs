//! JSON Schema documents
//!
//! The document is kept as a `serde_json::Value`. Structure is validated by
//! compiling with `jsonschema` (Draft 7) whenever every `$ref` is local;
//! external `$ref`s must name one of the supplied references.

use std::collections::HashMap;

use jsonschema::{Draft, JSONSchema};
use serde_json::{Map, Number, Value};

use super::sorted_json;
use crate::error::{RegistryError, Result};
use crate::schema::{ResolvedReference, SchemaFormat};

const MAX_REF_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaDocument {
    root: Value,
    external: HashMap<String, Value>,
}

impl JsonSchemaDocument {
    pub fn parse(raw: &str, references: &[ResolvedReference]) -> Result<Self> {
        let root: Value = serde_json::from_str(raw).map_err(|e| parse_error(format!("invalid JSON: {}", e)))?;
        if !root.is_object() && !root.is_boolean() {
            return Err(parse_error("a JSON Schema must be an object or a boolean"));
        }

        let mut external = HashMap::new();
        for resolved in references {
            let value: Value = serde_json::from_str(&resolved.schema).map_err(|e| {
                parse_error(format!("reference '{}' is not valid JSON: {}", resolved.reference.name, e))
            })?;
            external.insert(resolved.reference.name.clone(), value);
        }

        let mut refs = Vec::new();
        collect_refs(&root, &mut refs);
        let mut all_local = true;
        for reference in &refs {
            if let Some(pointer) = reference.strip_prefix('#') {
                if !pointer.is_empty() && root.pointer(pointer).is_none() {
                    return Err(parse_error(format!("unresolved $ref '{}'", reference)));
                }
            } else {
                all_local = false;
                let document = reference.split('#').next().unwrap_or_default();
                if !external.contains_key(document) {
                    return Err(parse_error(format!(
                        "$ref '{}' does not name a supplied reference",
                        reference
                    )));
                }
            }
        }

        if all_local {
            JSONSchema::options()
                .with_draft(Draft::Draft7)
                .compile(&root)
                .map_err(|e| parse_error(format!("failed to compile JSON schema: {}", e)))?;
        }

        Ok(Self { root, external })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Sorted-key compact JSON; integral floats print as integers
    pub fn canonical_form(&self) -> String {
        sorted_json(&normalize_numbers(&self.root))
    }

    /// The document with `$ref`s replaced by their targets.
    ///
    /// Local refs resolve against `definitions`/`$defs` (or any JSON pointer),
    /// external refs against the supplied references by name. Recursive
    /// definitions stop expanding after a fixed depth and keep their `$ref`.
    pub fn resolved(&self) -> Value {
        self.inline(&self.root, &self.root, 0)
    }

    fn inline(&self, value: &Value, document: &Value, depth: usize) -> Value {
        match value {
            Value::Object(map) => {
                if let Some(Value::String(reference)) = map.get("$ref") {
                    if depth < MAX_REF_DEPTH {
                        if let Some((target, target_doc)) = self.lookup(reference, document) {
                            return self.inline(&target, &target_doc, depth + 1);
                        }
                    }
                }
                let mut out = Map::new();
                for (key, child) in map {
                    if key == "definitions" || key == "$defs" {
                        out.insert(key.clone(), child.clone());
                    } else {
                        out.insert(key.clone(), self.inline(child, document, depth));
                    }
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.inline(v, document, depth)).collect()),
            other => other.clone(),
        }
    }

    fn lookup(&self, reference: &str, document: &Value) -> Option<(Value, Value)> {
        match reference.split_once('#') {
            Some(("", pointer)) => Some((resolve_pointer(document, pointer)?.clone(), document.clone())),
            Some((name, pointer)) => {
                let doc = self.external.get(name)?;
                Some((resolve_pointer(doc, pointer)?.clone(), doc.clone()))
            }
            None => {
                let doc = self.external.get(reference)?;
                Some((doc.clone(), doc.clone()))
            }
        }
    }
}

fn parse_error(reason: impl Into<String>) -> RegistryError {
    RegistryError::parse(SchemaFormat::Json, reason)
}

fn resolve_pointer<'a>(document: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer.is_empty() {
        Some(document)
    } else {
        document.pointer(pointer)
    }
}

fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == "$ref" {
                    if let Value::String(s) = child {
                        out.push(s.clone());
                    }
                } else if key != "const" && key != "enum" && key != "default" && key != "examples" {
                    collect_refs(child, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}

fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::Number(Number::from(f as i64)),
            _ => value.clone(),
        },
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize_numbers(v))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaReference;
    use serde_json::json;

    #[test]
    fn test_canonical_form_sorts_keys_and_normalizes_numbers() {
        let doc = JsonSchemaDocument::parse(
            r#"{"type":"object","properties":{"b":{"type":"number","maximum":10.0},"a":{"type":"string"}}}"#,
            &[],
        )
        .unwrap();
        assert_eq!(
            doc.canonical_form(),
            r#"{"properties":{"a":{"type":"string"},"b":{"maximum":10,"type":"number"}},"type":"object"}"#
        );
    }

    #[test]
    fn test_rejects_non_schema_documents() {
        assert!(JsonSchemaDocument::parse("[1,2]", &[]).is_err());
        assert!(JsonSchemaDocument::parse("{not json", &[]).is_err());
        assert!(JsonSchemaDocument::parse("true", &[]).is_ok());
    }

    #[test]
    fn test_rejects_invalid_keywords() {
        let err = JsonSchemaDocument::parse(r#"{"type":"string","pattern":"(unclosed"}"#, &[]).unwrap_err();
        assert!(matches!(err, RegistryError::SchemaParse { format: SchemaFormat::Json, .. }));
    }

    #[test]
    fn test_local_refs_are_inlined() {
        let doc = JsonSchemaDocument::parse(
            r##"{
                "type":"object",
                "properties":{"home":{"$ref":"#/definitions/address"}},
                "definitions":{"address":{"type":"object","properties":{"city":{"type":"string"}}}}
            }"##,
            &[],
        )
        .unwrap();
        let resolved = doc.resolved();
        assert_eq!(resolved["properties"]["home"]["properties"]["city"], json!({"type":"string"}));
    }

    #[test]
    fn test_unresolved_local_ref_is_rejected() {
        let err = JsonSchemaDocument::parse(r##"{"properties":{"a":{"$ref":"#/definitions/missing"}}}"##, &[]).unwrap_err();
        assert!(err.to_string().contains("unresolved $ref"));
    }

    #[test]
    fn test_external_refs_resolve_by_reference_name() {
        let refs = vec![ResolvedReference {
            reference: SchemaReference::new("address.json", "address-value", 1),
            schema: r#"{"type":"object","properties":{"zip":{"type":"string"}}}"#.to_string(),
        }];
        let doc = JsonSchemaDocument::parse(r#"{"type":"object","properties":{"addr":{"$ref":"address.json"}}}"#, &refs)
            .unwrap();
        assert_eq!(doc.resolved()["properties"]["addr"]["properties"]["zip"]["type"], "string");

        let err = JsonSchemaDocument::parse(r#"{"properties":{"addr":{"$ref":"other.json"}}}"#, &refs).unwrap_err();
        assert!(err.to_string().contains("other.json"));
    }

    #[test]
    fn test_recursive_refs_terminate() {
        let doc = JsonSchemaDocument::parse(
            r##"{"$ref":"#/definitions/node","definitions":{"node":{"type":"object","properties":{"next":{"$ref":"#/definitions/node"}}}}}"##,
            &[],
        )
        .unwrap();
        let resolved = doc.resolved();
        assert_eq!(resolved["type"], "object");
    }
}
