//! Canonicalization Tests
//!
//! Fingerprints must depend on schema content only: key order and whitespace
//! in the submitted document never change them.

use familiar_schema_registry::format::canonicalize;
use familiar_schema_registry::SchemaFormat;
use proptest::prelude::*;

const PRIMITIVES: [&str; 6] = ["int", "long", "string", "boolean", "double", "bytes"];

fn field_names() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z][a-z0-9_]{0,8}", 1..6).prop_map(|set| set.into_iter().collect())
}

fn types(len: usize) -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(PRIMITIVES.to_vec()), len)
}

/// Render an object with its members in the given order, padded by `gap`
fn object(members: &[(String, String)], gap: &str) -> String {
    let body: Vec<String> = members
        .iter()
        .map(|(k, v)| format!("{gap}\"{k}\"{gap}:{gap}{v}{gap}"))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn avro_record(fields: &[(String, &str)], reversed: bool, gap: &str) -> String {
    let rendered: Vec<String> = fields
        .iter()
        .map(|(name, ty)| {
            let mut members = vec![
                ("name".to_string(), format!("\"{}\"", name)),
                ("type".to_string(), format!("\"{}\"", ty)),
            ];
            if reversed {
                members.reverse();
            }
            object(&members, gap)
        })
        .collect();
    let mut members = vec![
        ("type".to_string(), "\"record\"".to_string()),
        ("name".to_string(), "\"Generated\"".to_string()),
        ("namespace".to_string(), "\"com.acme\"".to_string()),
        ("fields".to_string(), format!("[{}]", rendered.join(&format!(",{}", gap)))),
    ];
    if reversed {
        members.reverse();
    }
    object(&members, gap)
}

fn json_schema(properties: &[(String, &str)], reversed: bool, gap: &str) -> String {
    let mut props: Vec<(String, String)> = properties
        .iter()
        .map(|(name, ty)| {
            let ty = match *ty {
                "int" | "long" => "integer",
                "double" => "number",
                "boolean" => "boolean",
                _ => "string",
            };
            (name.clone(), object(&[("type".to_string(), format!("\"{}\"", ty))], gap))
        })
        .collect();
    if reversed {
        props.reverse();
    }
    let mut members = vec![
        ("type".to_string(), "\"object\"".to_string()),
        ("properties".to_string(), object(&props, gap)),
        ("additionalProperties".to_string(), "false".to_string()),
    ];
    if reversed {
        members.reverse();
    }
    object(&members, gap)
}

fn named_fields() -> impl Strategy<Value = Vec<(String, &'static str)>> {
    field_names().prop_flat_map(|names| {
        let len = names.len();
        types(len).prop_map(move |types| names.iter().cloned().zip(types).collect::<Vec<_>>())
    })
}

proptest! {
    #[test]
    fn test_avro_fingerprint_ignores_layout(fields in named_fields(), gap in "[ \n\t]{0,3}") {
        let compact = canonicalize(SchemaFormat::Avro, &avro_record(&fields, false, "")).unwrap();
        let spaced = canonicalize(SchemaFormat::Avro, &avro_record(&fields, true, &gap)).unwrap();
        prop_assert_eq!(compact.0, spaced.0);
        prop_assert_eq!(compact.1, spaced.1);
    }

    #[test]
    fn test_json_schema_fingerprint_ignores_layout(fields in named_fields(), gap in "[ \n\t]{0,3}") {
        let compact = canonicalize(SchemaFormat::Json, &json_schema(&fields, false, "")).unwrap();
        let spaced = canonicalize(SchemaFormat::Json, &json_schema(&fields, true, &gap)).unwrap();
        prop_assert_eq!(compact.1, spaced.1);
    }

    #[test]
    fn test_avro_field_types_change_fingerprint(fields in named_fields()) {
        let flipped: Vec<(String, &str)> = fields
            .iter()
            .enumerate()
            .map(|(i, (name, ty))| if i == 0 {
                (name.clone(), if *ty == "int" { "long" } else { "int" })
            } else {
                (name.clone(), *ty)
            })
            .collect();
        let original = canonicalize(SchemaFormat::Avro, &avro_record(&fields, false, "")).unwrap();
        let changed = canonicalize(SchemaFormat::Avro, &avro_record(&flipped, false, "")).unwrap();
        prop_assert_ne!(original.1, changed.1);
    }
}

#[test]
fn test_protobuf_fingerprint_ignores_comments() {
    let plain = "syntax = \"proto3\";\nmessage User { int64 id = 1; string name = 2; }\n";
    let commented = "// users\nsyntax = \"proto3\";\n\nmessage User {\n  int64 id = 1; // key\n  string name = 2;\n}\n";
    let a = canonicalize(SchemaFormat::Protobuf, plain).unwrap();
    let b = canonicalize(SchemaFormat::Protobuf, commented).unwrap();
    assert_eq!(a.1, b.1);
}
