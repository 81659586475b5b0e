//! Avro schema resolution rules

use std::collections::HashSet;

use super::{join_path, path_or_root, ChangeType, FormatCompatibilityRule, SchemaChange};
use crate::format::avro::{union_branch_key, AvroSchema, AvroType, NamedType, RecordSchema};
use crate::format::ParsedSchema;
use crate::schema::SchemaFormat;

/// Avro reader/writer resolution as defined by the Avro specification
#[derive(Debug, Clone, Copy, Default)]
pub struct AvroRule;

impl FormatCompatibilityRule for AvroRule {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Avro
    }

    fn reader_can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<SchemaChange> {
        match (reader, writer) {
            (ParsedSchema::Avro(reader), ParsedSchema::Avro(writer)) => {
                let mut resolution = Resolution {
                    reader,
                    writer,
                    visiting: HashSet::new(),
                    changes: Vec::new(),
                };
                resolution.check(reader.root(), writer.root(), "");
                resolution.changes
            }
            _ => vec![SchemaChange::breaking(
                ChangeType::FormatChanged,
                "root",
                "both schemas must be AVRO",
            )],
        }
    }
}

struct Resolution<'a> {
    reader: &'a AvroSchema,
    writer: &'a AvroSchema,
    visiting: HashSet<(String, String)>,
    changes: Vec<SchemaChange>,
}

fn strip_logical(ty: &AvroType) -> &AvroType {
    match ty {
        AvroType::Logical { base, .. } => strip_logical(base),
        other => other,
    }
}

/// Writer-to-reader promotions allowed by the Avro specification
fn promotes(writer: &AvroType, reader: &AvroType) -> bool {
    matches!(
        (writer, reader),
        (AvroType::Int, AvroType::Long | AvroType::Float | AvroType::Double)
            | (AvroType::Long, AvroType::Float | AvroType::Double)
            | (AvroType::Float, AvroType::Double)
            | (AvroType::String, AvroType::Bytes)
            | (AvroType::Bytes, AvroType::String)
    )
}

fn describe(ty: &AvroType) -> String {
    union_branch_key(ty)
}

impl<'a> Resolution<'a> {
    fn breaking(&mut self, change_type: ChangeType, path: &str, description: String) {
        self.changes
            .push(SchemaChange::breaking(change_type, path_or_root(path), description));
    }

    fn note(&mut self, change_type: ChangeType, path: &str, description: String) {
        self.changes
            .push(SchemaChange::compatible(change_type, path_or_root(path), description));
    }

    /// Run a nested check without recording its changes
    fn trial_resolve(&mut self, reader: &AvroType, writer: &AvroType, path: &str) -> bool {
        let saved = std::mem::take(&mut self.changes);
        self.check(reader, writer, path);
        let ok = self.changes.iter().all(|c| !c.is_breaking);
        self.changes = saved;
        ok
    }

    fn check(&mut self, reader: &AvroType, writer: &AvroType, path: &str) {
        let reader = strip_logical(reader);
        let writer = strip_logical(writer);

        if promotes(writer, reader) {
            self.changes.push(
                SchemaChange::compatible(
                    ChangeType::TypeChanged,
                    path_or_root(path),
                    format!("{}: {} promoted to {}", path_or_root(path), describe(writer), describe(reader)),
                )
                .with_values(describe(writer), describe(reader)),
            );
            return;
        }

        match (reader, writer) {
            (AvroType::Union(reader_branches), AvroType::Union(writer_branches)) => {
                for writer_branch in writer_branches {
                    let found = reader_branches.iter().any(|rb| self.trial_resolve(rb, writer_branch, path));
                    if !found {
                        self.breaking(
                            ChangeType::TypeChanged,
                            path,
                            format!(
                                "{}: writer union type {} is not compatible with any reader union type",
                                path_or_root(path),
                                describe(writer_branch)
                            ),
                        );
                    }
                }
            }
            (AvroType::Union(reader_branches), _) => {
                if !reader_branches.iter().any(|rb| self.trial_resolve(rb, writer, path)) {
                    self.breaking(
                        ChangeType::TypeChanged,
                        path,
                        format!(
                            "{}: writer type {} is not compatible with any type in reader union",
                            path_or_root(path),
                            describe(writer)
                        ),
                    );
                }
            }
            (_, AvroType::Union(writer_branches)) => {
                for writer_branch in writer_branches {
                    if !self.trial_resolve(reader, writer_branch, path) {
                        self.breaking(
                            ChangeType::TypeChanged,
                            path,
                            format!(
                                "{}: reader type {} cannot read writer union type {}",
                                path_or_root(path),
                                describe(reader),
                                describe(writer_branch)
                            ),
                        );
                        return;
                    }
                }
            }
            (AvroType::Array(reader_items), AvroType::Array(writer_items)) => {
                self.check(reader_items, writer_items, &join_path(path, "[]"));
            }
            (AvroType::Map(reader_values), AvroType::Map(writer_values)) => {
                self.check(reader_values, writer_values, &join_path(path, "{}"));
            }
            (AvroType::Named(reader_name), AvroType::Named(writer_name)) => {
                self.check_named(reader_name, writer_name, path);
            }
            (r, w) if r == w => {}
            (r, w) => {
                self.changes.push(
                    SchemaChange::breaking(
                        ChangeType::TypeChanged,
                        path_or_root(path),
                        format!(
                            "{}: type mismatch: reader has {}, writer has {}",
                            path_or_root(path),
                            describe(r),
                            describe(w)
                        ),
                    )
                    .with_values(describe(w), describe(r)),
                );
            }
        }
    }

    fn check_named(&mut self, reader_name: &str, writer_name: &str, path: &str) {
        let key = (reader_name.to_string(), writer_name.to_string());
        if !self.visiting.insert(key.clone()) {
            return;
        }
        let (reader, writer) = (self.reader, self.writer);
        match (reader.lookup(reader_name), writer.lookup(writer_name)) {
            (Some(NamedType::Record(r)), Some(NamedType::Record(w))) => {
                if names_match(reader_name, r.aliases.as_slice(), writer_name, w.aliases.as_slice()) {
                    self.check_record(r, w, path);
                } else {
                    self.name_mismatch("record", reader_name, writer_name, path);
                }
            }
            (Some(NamedType::Enum(r)), Some(NamedType::Enum(w))) => {
                if !names_match(reader_name, &r.aliases, writer_name, &w.aliases) {
                    self.name_mismatch("enum", reader_name, writer_name, path);
                } else {
                    for symbol in w.symbols.iter().filter(|s| !r.symbols.contains(s)) {
                        match &r.default {
                            Some(default) => self.note(
                                ChangeType::EnumVariantRemoved,
                                path,
                                format!(
                                    "{}: writer enum symbol '{}' resolves to reader default '{}'",
                                    path_or_root(path),
                                    symbol,
                                    default
                                ),
                            ),
                            None => self.breaking(
                                ChangeType::EnumVariantRemoved,
                                path,
                                format!(
                                    "{}: writer enum symbol '{}' not found in reader and no default set",
                                    path_or_root(path),
                                    symbol
                                ),
                            ),
                        }
                    }
                    for symbol in r.symbols.iter().filter(|s| !w.symbols.contains(s)) {
                        self.note(
                            ChangeType::EnumVariantAdded,
                            path,
                            format!("{}: reader enum symbol '{}' added", path_or_root(path), symbol),
                        );
                    }
                }
            }
            (Some(NamedType::Fixed(r)), Some(NamedType::Fixed(w))) => {
                if !names_match(reader_name, &r.aliases, writer_name, &w.aliases) {
                    self.name_mismatch("fixed", reader_name, writer_name, path);
                }
                if r.size != w.size {
                    self.changes.push(
                        SchemaChange::breaking(
                            ChangeType::TypeChanged,
                            path_or_root(path),
                            format!(
                                "{}: fixed size mismatch: reader has {}, writer has {}",
                                path_or_root(path),
                                r.size,
                                w.size
                            ),
                        )
                        .with_values(w.size.to_string(), r.size.to_string()),
                    );
                }
            }
            (Some(r), Some(w)) => {
                let description = format!(
                    "{}: type mismatch: reader has {}, writer has {}",
                    path_or_root(path),
                    r.kind(),
                    w.kind()
                );
                self.breaking(ChangeType::TypeChanged, path, description);
            }
            _ => {
                let description = format!(
                    "{}: unresolved named type {} or {}",
                    path_or_root(path),
                    reader_name,
                    writer_name
                );
                self.breaking(ChangeType::Other, path, description);
            }
        }
        self.visiting.remove(&key);
    }

    fn name_mismatch(&mut self, kind: &str, reader_name: &str, writer_name: &str, path: &str) {
        self.changes.push(
            SchemaChange::breaking(
                ChangeType::NameChanged,
                path_or_root(path),
                format!(
                    "{}: {} name mismatch: reader has {}, writer has {}",
                    path_or_root(path),
                    kind,
                    reader_name,
                    writer_name
                ),
            )
            .with_values(writer_name, reader_name),
        );
    }

    fn check_record(&mut self, reader: &RecordSchema, writer: &RecordSchema, path: &str) {
        let mut matched = HashSet::new();
        for field in &reader.fields {
            let field_path = join_path(path, &field.name);
            let writer_field = writer.fields.iter().find(|wf| {
                wf.name == field.name
                    || wf.aliases.contains(&field.name)
                    || field.aliases.contains(&wf.name)
            });
            match writer_field {
                Some(wf) => {
                    matched.insert(wf.name.as_str());
                    self.check(&field.ty, &wf.ty, &field_path);
                }
                None if field.default.is_some() => self.note(
                    ChangeType::FieldAdded,
                    &field_path,
                    format!(
                        "{}: reader field '{}' is missing from writer and takes its default",
                        path_or_root(path),
                        field.name
                    ),
                ),
                None => self.breaking(
                    ChangeType::FieldAdded,
                    &field_path,
                    format!(
                        "{}: reader field '{}' has no default and is missing from writer",
                        path_or_root(path),
                        field.name
                    ),
                ),
            }
        }
        for field in writer.fields.iter().filter(|wf| !matched.contains(wf.name.as_str())) {
            self.note(
                ChangeType::FieldRemoved,
                &join_path(path, &field.name),
                format!("{}: writer field '{}' is ignored by reader", path_or_root(path), field.name),
            );
        }
    }
}

fn names_match(reader_name: &str, reader_aliases: &[String], writer_name: &str, writer_aliases: &[String]) -> bool {
    reader_name == writer_name
        || reader_aliases.iter().any(|a| a == writer_name)
        || writer_aliases.iter().any(|a| a == reader_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;

    fn parse(raw: &str) -> ParsedSchema {
        format::parse(SchemaFormat::Avro, raw, &[]).unwrap()
    }

    fn breaking(reader: &str, writer: &str) -> Vec<String> {
        AvroRule
            .reader_can_read(&parse(reader), &parse(writer))
            .into_iter()
            .filter(|c| c.is_breaking)
            .map(|c| c.description)
            .collect()
    }

    fn compatible(reader: &str, writer: &str) -> bool {
        breaking(reader, writer).is_empty()
    }

    const ORDER_V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"}]}"#;
    const ORDER_V2: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"},{"name":"email","type":["null","string"],"default":null}]}"#;
    const ORDER_V3: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"},{"name":"email","type":"string"}]}"#;

    #[test]
    fn test_added_field_needs_default() {
        assert!(compatible(ORDER_V2, ORDER_V1));
        // the writer's null branch has no counterpart in the reader
        let errors = breaking(ORDER_V3, ORDER_V2);
        assert_eq!(errors, vec!["email: reader type string cannot read writer union type null"]);
        let errors = breaking(ORDER_V3, ORDER_V1);
        assert_eq!(errors, vec!["root: reader field 'email' has no default and is missing from writer"]);
    }

    #[test]
    fn test_writer_union_must_fit_reader() {
        let with_null = r#"{"type":"record","name":"R","fields":[{"name":"f","type":["null","string"],"default":null}]}"#;
        let plain = r#"{"type":"record","name":"R","fields":[{"name":"f","type":"string"}]}"#;
        assert!(!compatible(plain, with_null));
        assert!(compatible(with_null, plain));
    }

    #[test]
    fn test_removed_field_is_compatible() {
        assert!(compatible(ORDER_V1, ORDER_V2));
        let changes = AvroRule.reader_can_read(&parse(ORDER_V1), &parse(ORDER_V2));
        assert!(changes.iter().any(|c| c.change_type == ChangeType::FieldRemoved && !c.is_breaking));
    }

    #[test]
    fn test_numeric_promotions() {
        let record = |t: &str| format!(r#"{{"type":"record","name":"N","fields":[{{"name":"v","type":"{}"}}]}}"#, t);
        assert!(compatible(&record("long"), &record("int")));
        assert!(compatible(&record("double"), &record("float")));
        assert!(compatible(&record("bytes"), &record("string")));
        assert!(!compatible(&record("int"), &record("long")));
        assert!(!compatible(&record("string"), &record("int")));
    }

    #[test]
    fn test_enum_symbols() {
        let abc = r#"{"type":"enum","name":"E","symbols":["A","B","C"]}"#;
        let ab = r#"{"type":"enum","name":"E","symbols":["A","B"]}"#;
        let ab_default = r#"{"type":"enum","name":"E","symbols":["A","B"],"default":"A"}"#;
        assert!(compatible(abc, ab));
        assert!(!compatible(ab, abc));
        assert!(compatible(ab_default, abc));
    }

    #[test]
    fn test_record_rename_needs_alias() {
        let renamed = r#"{"type":"record","name":"Purchase","fields":[{"name":"id","type":"int"},{"name":"name","type":"string"}]}"#;
        let aliased = r#"{"type":"record","name":"Purchase","aliases":["Order"],"fields":[{"name":"id","type":"int"},{"name":"name","type":"string"}]}"#;
        assert!(!compatible(renamed, ORDER_V1));
        assert!(compatible(aliased, ORDER_V1));
    }

    #[test]
    fn test_field_alias_matches_writer_field() {
        let renamed = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"title","type":"string","aliases":["name"]}]}"#;
        assert!(compatible(renamed, ORDER_V1));
    }

    #[test]
    fn test_nested_collections() {
        let arr = |t: &str| format!(r#"{{"type":"array","items":"{}"}}"#, t);
        let map = |t: &str| format!(r#"{{"type":"map","values":"{}"}}"#, t);
        assert!(compatible(&arr("long"), &arr("int")));
        assert!(!compatible(&arr("int"), &arr("string")));
        assert!(compatible(&map("double"), &map("int")));
        assert!(!compatible(&map("boolean"), &map("int")));
    }

    #[test]
    fn test_fixed_size_must_match() {
        let f8 = r#"{"type":"fixed","name":"Hash","size":8}"#;
        let f16 = r#"{"type":"fixed","name":"Hash","size":16}"#;
        assert!(compatible(f8, f8));
        assert!(!compatible(f16, f8));
    }

    #[test]
    fn test_recursive_records_terminate() {
        let node = r#"{"type":"record","name":"Node","fields":[{"name":"v","type":"int"},{"name":"next","type":["null","Node"],"default":null}]}"#;
        let wider = r#"{"type":"record","name":"Node","fields":[{"name":"v","type":"long"},{"name":"next","type":["null","Node"],"default":null}]}"#;
        assert!(compatible(wider, node));
        assert!(!compatible(node, wider));
    }
}
