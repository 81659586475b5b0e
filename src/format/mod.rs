//! Schema parsing and canonicalization
//!
//! Every format produces a deterministic canonical form; its SHA-256 is the
//! fingerprint used for content-addressed deduplication.

pub mod avro;
pub mod json_schema;
pub mod protobuf;

use serde_json::Value;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::schema::{ResolvedReference, SchemaDraft, SchemaFormat, SchemaReference};

pub use avro::AvroSchema;
pub use json_schema::JsonSchemaDocument;
pub use protobuf::ProtoFile;

/// A schema parsed into its format-specific model
#[derive(Debug, Clone)]
pub enum ParsedSchema {
    Avro(AvroSchema),
    Protobuf(ProtoFile),
    Json(JsonSchemaDocument),
}

impl ParsedSchema {
    pub fn format(&self) -> SchemaFormat {
        match self {
            ParsedSchema::Avro(_) => SchemaFormat::Avro,
            ParsedSchema::Protobuf(_) => SchemaFormat::Protobuf,
            ParsedSchema::Json(_) => SchemaFormat::Json,
        }
    }

    /// Canonical form of the schema body alone
    pub fn canonical(&self) -> String {
        match self {
            ParsedSchema::Avro(schema) => schema.canonical_form(),
            ParsedSchema::Protobuf(file) => file.canonical_form(),
            ParsedSchema::Json(doc) => doc.canonical_form(),
        }
    }
}

/// Parse `raw` as `format`, resolving named types against `references`
pub fn parse(format: SchemaFormat, raw: &str, references: &[ResolvedReference]) -> Result<ParsedSchema> {
    match format {
        SchemaFormat::Avro => AvroSchema::parse(raw, references).map(ParsedSchema::Avro),
        SchemaFormat::Protobuf => ProtoFile::parse(raw, references).map(ParsedSchema::Protobuf),
        SchemaFormat::Json => JsonSchemaDocument::parse(raw, references).map(ParsedSchema::Json),
    }
}

/// Canonical form and fingerprint of a schema without references
pub fn canonicalize(format: SchemaFormat, raw: &str) -> Result<(String, Fingerprint)> {
    let parsed = parse(format, raw, &[])?;
    let canonical = canonical_with_references(&parsed, &[]);
    let fingerprint = Fingerprint::of_canonical(&canonical);
    Ok((canonical, fingerprint))
}

/// Build the draft that identifies this content for deduplication.
///
/// References are part of the identity: the same text pointing at a different
/// referenced version is different content.
pub fn draft(parsed: &ParsedSchema, raw: &str, references: &[SchemaReference]) -> SchemaDraft {
    let canonical = canonical_with_references(parsed, references);
    SchemaDraft {
        format: parsed.format(),
        schema: raw.to_string(),
        fingerprint: Fingerprint::of_canonical(&canonical),
        canonical,
        references: references.to_vec(),
    }
}

fn canonical_with_references(parsed: &ParsedSchema, references: &[SchemaReference]) -> String {
    let mut canonical = parsed.canonical();
    if references.is_empty() {
        return canonical;
    }
    let mut refs: Vec<String> = references
        .iter()
        .map(|r| format!("{}={}@{}", r.name, r.subject, r.version))
        .collect();
    refs.sort();
    canonical.push_str("\n#references ");
    canonical.push_str(&refs.join(","));
    canonical
}

/// Write `value` as compact JSON with object keys in lexicographic order
pub(crate) fn write_sorted_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(key, out);
                out.push(':');
                write_sorted_json(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_sorted_json(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_json_string(s, out),
        other => out.push_str(&other.to_string()),
    }
}

pub(crate) fn write_json_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

/// [`write_sorted_json`] into a fresh string
pub(crate) fn sorted_json(value: &Value) -> String {
    let mut out = String::new();
    write_sorted_json(value, &mut out);
    out
}
