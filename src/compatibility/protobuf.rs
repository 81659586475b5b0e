//! Protobuf wire compatibility
//!
//! Fields match by number; names are irrelevant on the wire. Messages, enums and
//! services match by package-relative name so a package rename alone does not
//! orphan every definition. Anything the old schema declares that the new one
//! drops is breaking: field numbers, enum values, enums, services and methods.

use std::collections::{BTreeMap, HashSet};

use super::{ChangeType, FormatCompatibilityRule, SchemaChange};
use crate::format::protobuf::{EnumDef, FieldDef, FieldType, Label, MessageDef, ProtoFile, ScalarType, ServiceDef};
use crate::format::ParsedSchema;
use crate::schema::SchemaFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufRule;

impl FormatCompatibilityRule for ProtobufRule {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Protobuf
    }

    fn reader_can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<SchemaChange> {
        match (reader, writer) {
            (ParsedSchema::Protobuf(reader), ParsedSchema::Protobuf(writer)) => check_files(reader, writer),
            _ => vec![SchemaChange::breaking(
                ChangeType::FormatChanged,
                "root",
                "both schemas must be PROTOBUF",
            )],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireClass {
    Varint,
    ZigZag,
    Fixed32,
    Fixed64,
    LengthDelimited,
    Float,
    Double,
}

fn wire_class(scalar: ScalarType) -> WireClass {
    match scalar {
        ScalarType::Int32 | ScalarType::Int64 | ScalarType::Uint32 | ScalarType::Uint64 | ScalarType::Bool => {
            WireClass::Varint
        }
        ScalarType::Sint32 | ScalarType::Sint64 => WireClass::ZigZag,
        ScalarType::Fixed32 | ScalarType::Sfixed32 => WireClass::Fixed32,
        ScalarType::Fixed64 | ScalarType::Sfixed64 => WireClass::Fixed64,
        ScalarType::String | ScalarType::Bytes => WireClass::LengthDelimited,
        ScalarType::Float => WireClass::Float,
        ScalarType::Double => WireClass::Double,
    }
}

fn flatten<'a>(file: &'a ProtoFile, messages: &'a [MessageDef], out: &mut BTreeMap<String, &'a MessageDef>) {
    for message in messages {
        out.insert(file.relative_name(&message.full_name).to_string(), message);
        flatten(file, &message.messages, out);
    }
}

fn flatten_enums<'a>(file: &'a ProtoFile, out: &mut BTreeMap<String, &'a EnumDef>) {
    fn walk<'a>(file: &'a ProtoFile, messages: &'a [MessageDef], out: &mut BTreeMap<String, &'a EnumDef>) {
        for message in messages {
            for e in &message.enums {
                out.insert(file.relative_name(&e.full_name).to_string(), e);
            }
            walk(file, &message.messages, out);
        }
    }
    for e in &file.enums {
        out.insert(file.relative_name(&e.full_name).to_string(), e);
    }
    walk(file, &file.messages, out);
}

fn type_key(file: &ProtoFile, ty: &FieldType) -> String {
    match ty {
        FieldType::Scalar(s) => s.keyword().to_string(),
        FieldType::Message(name) | FieldType::Enum(name) => file.relative_name(name).to_string(),
        FieldType::Map { key, value } => format!("map<{}, {}>", key.keyword(), type_key(file, value)),
        FieldType::Unresolved(name) => name.clone(),
    }
}

struct FileCheck<'a> {
    reader: &'a ProtoFile,
    writer: &'a ProtoFile,
    changes: Vec<SchemaChange>,
}

fn check_files(reader: &ProtoFile, writer: &ProtoFile) -> Vec<SchemaChange> {
    let mut check = FileCheck {
        reader,
        writer,
        changes: Vec::new(),
    };

    if reader.package() != writer.package() {
        check.changes.push(
            SchemaChange::compatible(
                ChangeType::NameChanged,
                "package",
                format!("Package changed from '{}' to '{}'", writer.package(), reader.package()),
            )
            .with_values(writer.package(), reader.package()),
        );
    }
    if reader.syntax != writer.syntax {
        check.changes.push(
            SchemaChange::compatible(
                ChangeType::Other,
                "syntax",
                format!(
                    "Syntax changed from '{}' to '{}'",
                    writer.syntax.as_str(),
                    reader.syntax.as_str()
                ),
            )
            .with_values(writer.syntax.as_str(), reader.syntax.as_str()),
        );
    }

    let mut reader_messages = BTreeMap::new();
    let mut writer_messages = BTreeMap::new();
    flatten(reader, &reader.messages, &mut reader_messages);
    flatten(writer, &writer.messages, &mut writer_messages);

    for (name, writer_message) in &writer_messages {
        match reader_messages.get(name) {
            Some(reader_message) => check.message(name, reader_message, writer_message),
            None => check.changes.push(SchemaChange::breaking(
                ChangeType::DefinitionRemoved,
                name.clone(),
                format!("Message '{}' was removed", name),
            )),
        }
    }
    for name in reader_messages.keys().filter(|n| !writer_messages.contains_key(*n)) {
        check.changes.push(SchemaChange::compatible(
            ChangeType::FieldAdded,
            name.clone(),
            format!("Message '{}' was added", name),
        ));
    }

    let mut reader_enums = BTreeMap::new();
    let mut writer_enums = BTreeMap::new();
    flatten_enums(reader, &mut reader_enums);
    flatten_enums(writer, &mut writer_enums);
    for (name, writer_enum) in &writer_enums {
        match reader_enums.get(name) {
            Some(reader_enum) => check.enumeration(name, reader_enum, writer_enum),
            None => check.changes.push(SchemaChange::breaking(
                ChangeType::DefinitionRemoved,
                name.clone(),
                format!("Enum '{}' was removed", name),
            )),
        }
    }

    for writer_service in &writer.services {
        match reader.services.iter().find(|s| s.name == writer_service.name) {
            Some(reader_service) => check.service(reader_service, writer_service),
            None => check.changes.push(SchemaChange::breaking(
                ChangeType::DefinitionRemoved,
                writer_service.name.clone(),
                format!("Service '{}' was removed", writer_service.name),
            )),
        }
    }

    check.changes
}

impl<'a> FileCheck<'a> {
    fn message(&mut self, name: &str, reader: &MessageDef, writer: &MessageDef) {
        let mut seen = HashSet::new();
        for writer_field in &writer.fields {
            let path = format!("{}.{}", name, writer_field.name);
            match reader.field(writer_field.number) {
                Some(reader_field) => {
                    seen.insert(reader_field.number);
                    self.field(name, &path, reader_field, writer_field);
                }
                None => {
                    let renumbered = reader.fields.iter().find(|f| f.name == writer_field.name);
                    let description = match (&writer_field.oneof, renumbered) {
                        (_, Some(moved)) => format!(
                            "Message '{}': field '{}' changed number from {} to {}",
                            name, writer_field.name, writer_field.number, moved.number
                        ),
                        (Some(oneof), None) => format!(
                            "Message '{}': field '{}' (number {}) was removed from oneof '{}'",
                            name, writer_field.name, writer_field.number, oneof
                        ),
                        (None, None) => format!(
                            "Message '{}': field '{}' (number {}) was removed",
                            name, writer_field.name, writer_field.number
                        ),
                    };
                    self.changes
                        .push(SchemaChange::breaking(ChangeType::FieldRemoved, path, description));
                }
            }
        }

        for reader_field in reader.fields.iter().filter(|f| !seen.contains(&f.number)) {
            let path = format!("{}.{}", name, reader_field.name);
            if reader_field.label == Label::Required {
                self.changes.push(SchemaChange::breaking(
                    ChangeType::FieldAdded,
                    path,
                    format!(
                        "Message '{}': new required field '{}' (number {}) added",
                        name, reader_field.name, reader_field.number
                    ),
                ));
            } else {
                self.changes.push(SchemaChange::compatible(
                    ChangeType::FieldAdded,
                    path,
                    format!(
                        "Message '{}': field '{}' (number {}) added",
                        name, reader_field.name, reader_field.number
                    ),
                ));
            }
        }
    }

    fn field(&mut self, message: &str, path: &str, reader: &FieldDef, writer: &FieldDef) {
        if reader.name != writer.name {
            self.changes.push(
                SchemaChange::compatible(
                    ChangeType::NameChanged,
                    path,
                    format!("Message '{}': field {} renamed", message, reader.number),
                )
                .with_values(writer.name.as_str(), reader.name.as_str()),
            );
        }

        let reader_type = type_key(self.reader, &reader.ty);
        let writer_type = type_key(self.writer, &writer.ty);
        if !self.types_compatible(&reader.ty, &writer.ty) {
            self.changes.push(
                SchemaChange::breaking(
                    ChangeType::TypeChanged,
                    path,
                    format!(
                        "Message '{}': field {} type changed from '{}' to '{}'",
                        message, reader.number, writer_type, reader_type
                    ),
                )
                .with_values(writer_type.clone(), reader_type.clone()),
            );
        } else if reader_type != writer_type {
            self.changes.push(
                SchemaChange::compatible(
                    ChangeType::TypeChanged,
                    path,
                    format!(
                        "Message '{}': field {} type changed from '{}' to '{}' within one wire type",
                        message, reader.number, writer_type, reader_type
                    ),
                )
                .with_values(writer_type, reader_type),
            );
        }

        let reader_repeated = reader.label == Label::Repeated;
        let writer_repeated = writer.label == Label::Repeated;
        if reader.label == Label::Required && writer.label != Label::Required {
            self.changes.push(SchemaChange::breaking(
                ChangeType::OptionalityChanged,
                path,
                format!("Message '{}': field '{}' changed from optional to required", message, reader.name),
            ));
        } else if writer_repeated && !reader_repeated && !is_length_delimited(&writer.ty) {
            self.changes.push(SchemaChange::breaking(
                ChangeType::OptionalityChanged,
                path,
                format!("Message '{}': field '{}' changed from repeated to singular", message, reader.name),
            ));
        } else if reader_repeated != writer_repeated {
            self.changes.push(SchemaChange::compatible(
                ChangeType::OptionalityChanged,
                path,
                format!("Message '{}': field '{}' cardinality changed", message, reader.name),
            ));
        }

        if reader.oneof.is_some() != writer.oneof.is_some() {
            self.changes.push(SchemaChange::breaking(
                ChangeType::Other,
                path,
                format!("Message '{}': field '{}' oneof membership changed", message, reader.name),
            ));
        }
    }

    fn types_compatible(&self, reader: &FieldType, writer: &FieldType) -> bool {
        match (reader, writer) {
            (FieldType::Scalar(r), FieldType::Scalar(w)) => r == w || wire_class(*r) == wire_class(*w),
            (FieldType::Enum(_), FieldType::Enum(_)) => true,
            (FieldType::Enum(_), FieldType::Scalar(s)) | (FieldType::Scalar(s), FieldType::Enum(_)) => {
                wire_class(*s) == WireClass::Varint
            }
            (FieldType::Message(r), FieldType::Message(w)) => {
                self.reader.relative_name(r) == self.writer.relative_name(w)
            }
            (
                FieldType::Map { key: rk, value: rv },
                FieldType::Map { key: wk, value: wv },
            ) => {
                (rk == wk || wire_class(*rk) == wire_class(*wk)) && self.types_compatible(rv, wv)
            }
            _ => false,
        }
    }

    fn enumeration(&mut self, name: &str, reader: &EnumDef, writer: &EnumDef) {
        for value in &writer.values {
            if !reader.values.iter().any(|v| v.number == value.number) {
                self.changes.push(SchemaChange::breaking(
                    ChangeType::EnumVariantRemoved,
                    format!("{}.{}", name, value.name),
                    format!("Enum '{}': value '{}' (number {}) was removed", name, value.name, value.number),
                ));
            }
        }
        for value in &reader.values {
            if !writer.values.iter().any(|v| v.number == value.number) {
                self.changes.push(SchemaChange::compatible(
                    ChangeType::EnumVariantAdded,
                    format!("{}.{}", name, value.name),
                    format!("Enum '{}': value '{}' (number {}) was added", name, value.name, value.number),
                ));
            }
        }
    }

    fn service(&mut self, reader: &ServiceDef, writer: &ServiceDef) {
        let service = &writer.name;
        for writer_rpc in &writer.rpcs {
            let path = format!("{}.{}", service, writer_rpc.name);
            let Some(reader_rpc) = reader.rpcs.iter().find(|r| r.name == writer_rpc.name) else {
                self.changes.push(SchemaChange::breaking(
                    ChangeType::DefinitionRemoved,
                    path,
                    format!("Service '{}': method '{}' was removed", service, writer_rpc.name),
                ));
                continue;
            };
            let endpoints = [
                ("input", &reader_rpc.input, &writer_rpc.input),
                ("output", &reader_rpc.output, &writer_rpc.output),
            ];
            for (side, reader_type, writer_type) in endpoints {
                let (reader_type, writer_type) =
                    (self.reader.relative_name(reader_type), self.writer.relative_name(writer_type));
                if reader_type != writer_type {
                    self.changes.push(
                        SchemaChange::breaking(
                            ChangeType::TypeChanged,
                            path.clone(),
                            format!(
                                "Service '{}': method '{}' {} type changed from '{}' to '{}'",
                                service, writer_rpc.name, side, writer_type, reader_type
                            ),
                        )
                        .with_values(writer_type, reader_type),
                    );
                }
            }
            if reader_rpc.client_streaming != writer_rpc.client_streaming {
                self.changes.push(SchemaChange::breaking(
                    ChangeType::Other,
                    path.clone(),
                    format!("Service '{}': method '{}' client streaming changed", service, writer_rpc.name),
                ));
            }
            if reader_rpc.server_streaming != writer_rpc.server_streaming {
                self.changes.push(SchemaChange::breaking(
                    ChangeType::Other,
                    path,
                    format!("Service '{}': method '{}' server streaming changed", service, writer_rpc.name),
                ));
            }
        }
    }
}

/// Repeated length-delimited values read as singular keep the last element
fn is_length_delimited(ty: &FieldType) -> bool {
    match ty {
        FieldType::Scalar(s) => wire_class(*s) == WireClass::LengthDelimited,
        FieldType::Message(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;

    fn parse(raw: &str) -> ParsedSchema {
        format::parse(SchemaFormat::Protobuf, raw, &[]).unwrap()
    }

    fn breaking(reader: &str, writer: &str) -> Vec<String> {
        ProtobufRule
            .reader_can_read(&parse(reader), &parse(writer))
            .into_iter()
            .filter(|c| c.is_breaking)
            .map(|c| c.description)
            .collect()
    }

    fn compatible(reader: &str, writer: &str) -> bool {
        breaking(reader, writer).is_empty()
    }

    fn proto3(body: &str) -> String {
        format!("syntax = \"proto3\";\npackage acme;\n{}", body)
    }

    fn proto2(body: &str) -> String {
        format!("syntax = \"proto2\";\npackage acme;\n{}", body)
    }

    #[test]
    fn test_adding_and_removing_fields() {
        let v1 = proto3("message User { string id = 1; }");
        let v2 = proto3("message User { string id = 1; string email = 2; }");
        assert!(compatible(&v2, &v1));
        assert_eq!(
            breaking(&v1, &v2),
            vec!["Message 'User': field 'email' (number 2) was removed"]
        );
    }

    #[test]
    fn test_renumbering_a_field_is_breaking() {
        let v1 = proto3("message M { int32 a = 1; }");
        let v2 = proto3("message M { string a = 2; }");
        assert_eq!(
            breaking(&v2, &v1),
            vec!["Message 'M': field 'a' changed number from 1 to 2"]
        );
    }

    #[test]
    fn test_adding_required_field_is_breaking() {
        let v1 = proto2("message User { optional string id = 1; }");
        let v2 = proto2("message User { optional string id = 1; required int32 age = 2; }");
        assert_eq!(
            breaking(&v2, &v1),
            vec!["Message 'User': new required field 'age' (number 2) added"]
        );
    }

    #[test]
    fn test_optional_to_required_is_breaking() {
        let v1 = proto2("message User { optional string id = 1; }");
        let v2 = proto2("message User { required string id = 1; }");
        assert!(!compatible(&v2, &v1));
        assert!(compatible(&v1, &v2));
    }

    #[test]
    fn test_renaming_a_field_keeps_compatibility() {
        let v1 = proto3("message User { string id = 1; }");
        let v2 = proto3("message User { string user_id = 1; }");
        assert!(compatible(&v2, &v1));
    }

    #[test]
    fn test_wire_type_groups() {
        let field = |t: &str| proto3(&format!("message M {{ {} v = 1; }}", t));
        assert!(compatible(&field("int64"), &field("int32")));
        assert!(compatible(&field("bool"), &field("uint32")));
        assert!(compatible(&field("sint64"), &field("sint32")));
        assert!(compatible(&field("sfixed32"), &field("fixed32")));
        assert!(compatible(&field("bytes"), &field("string")));
        assert!(!compatible(&field("sint32"), &field("int32")));
        assert!(!compatible(&field("int32"), &field("sint32")));
        assert!(!compatible(&field("fixed32"), &field("int32")));
        assert!(!compatible(&field("string"), &field("int32")));
    }

    #[test]
    fn test_enum_and_int32_share_wire_type() {
        let as_enum = proto3("enum Status { UNKNOWN = 0; OK = 1; } message M { Status s = 1; }");
        let as_int = proto3("enum Status { UNKNOWN = 0; OK = 1; } message M { int32 s = 1; }");
        assert!(compatible(&as_int, &as_enum));
        assert!(compatible(&as_enum, &as_int));
    }

    #[test]
    fn test_message_field_type_must_keep_its_name() {
        let v1 = proto3("message A { string x = 1; } message B { string x = 1; } message M { A a = 1; }");
        let v2 = proto3("message A { string x = 1; } message B { string x = 1; } message M { B a = 1; }");
        assert!(!compatible(&v2, &v1));
    }

    #[test]
    fn test_removing_a_message_is_breaking() {
        let v1 = proto3("message A { string x = 1; } message B { string y = 1; }");
        let v2 = proto3("message A { string x = 1; }");
        assert_eq!(breaking(&v2, &v1), vec!["Message 'B' was removed"]);
        assert!(compatible(&v1, &v2));
    }

    #[test]
    fn test_enum_values_may_be_added_but_not_removed() {
        let v1 = proto3("enum Color { RED = 0; GREEN = 1; } message M { Color c = 1; }");
        let v2 = proto3("enum Color { RED = 0; GREEN = 1; BLUE = 2; } message M { Color c = 1; }");
        assert!(compatible(&v2, &v1));
        assert_eq!(
            breaking(&v1, &v2),
            vec!["Enum 'Color': value 'BLUE' (number 2) was removed"]
        );
    }

    #[test]
    fn test_removing_an_enum_is_breaking() {
        let v1 = proto3("enum Color { RED = 0; } enum Size { SMALL = 0; } message M { Color c = 1; }");
        let v2 = proto3("enum Color { RED = 0; } message M { Color c = 1; }");
        assert_eq!(breaking(&v2, &v1), vec!["Enum 'Size' was removed"]);

        let nested_v1 = proto3("message M { enum Kind { A = 0; } int32 k = 1; }");
        let nested_v2 = proto3("message M { int32 k = 1; }");
        assert_eq!(breaking(&nested_v2, &nested_v1), vec!["Enum 'M.Kind' was removed"]);
    }

    #[test]
    fn test_oneof_rules() {
        let v1 = proto3("message M { oneof choice { string a = 1; int32 b = 2; } }");
        let added = proto3("message M { oneof choice { string a = 1; int32 b = 2; bool c = 3; } }");
        let removed = proto3("message M { oneof choice { string a = 1; } }");
        let moved_out = proto3("message M { string a = 1; oneof choice { int32 b = 2; } }");
        assert!(compatible(&added, &v1));
        assert!(!compatible(&removed, &v1));
        assert!(!compatible(&moved_out, &v1));
    }

    #[test]
    fn test_repeated_to_singular() {
        let field = |t: &str| proto3(&format!("message M {{ {} v = 1; }}", t));
        assert!(compatible(&field("string"), &field("repeated string")));
        assert!(!compatible(&field("int32"), &field("repeated int32")));
        assert!(compatible(&field("repeated int32"), &field("int32")));
    }

    #[test]
    fn test_package_and_syntax_changes_are_reported_without_breaking() {
        let v1 = "syntax = \"proto3\"; package acme.v1; message M { string x = 1; }";
        let v2 = "syntax = \"proto3\"; package acme.v2; message M { string x = 1; }";
        let changes = ProtobufRule.reader_can_read(&parse(v2), &parse(v1));
        assert!(changes.iter().all(|c| !c.is_breaking));
        assert!(changes.iter().any(|c| c.path == "package"));

        let p2 = "syntax = \"proto2\"; message M { optional string x = 1; }";
        let p3 = "syntax = \"proto3\"; message M { string x = 1; }";
        assert!(compatible(p3, p2));
    }

    #[test]
    fn test_service_changes() {
        let v1 = proto3(
            "message Req {} message Resp {} service S { rpc Get (Req) returns (Resp); rpc List (Req) returns (stream Resp); }",
        );
        let same = proto3(
            "message Req {} message Resp {} service S { rpc List (Req) returns (stream Resp); rpc Get (Req) returns (Resp); rpc Put (Req) returns (Resp); }",
        );
        assert!(compatible(&same, &v1));

        let no_service = proto3("message Req {} message Resp {}");
        assert_eq!(breaking(&no_service, &v1), vec!["Service 'S' was removed"]);

        let no_method = proto3("message Req {} message Resp {} service S { rpc Get (Req) returns (Resp); }");
        assert_eq!(breaking(&no_method, &v1), vec!["Service 'S': method 'List' was removed"]);

        let changed = proto3(
            "message Req {} message Resp {} service S { rpc Get (Resp) returns (Resp); rpc List (Req) returns (Resp); }",
        );
        assert_eq!(
            breaking(&changed, &v1),
            vec![
                "Service 'S': method 'Get' input type changed from 'Req' to 'Resp'",
                "Service 'S': method 'List' server streaming changed",
            ]
        );
    }

    #[test]
    fn test_map_value_types() {
        let v1 = proto3("message M { map<string, int32> counts = 1; }");
        let v2 = proto3("message M { map<string, int64> counts = 1; }");
        let v3 = proto3("message M { map<string, string> counts = 1; }");
        assert!(compatible(&v2, &v1));
        assert!(!compatible(&v3, &v1));
    }

    #[test]
    fn test_nested_messages_are_compared() {
        let v1 = proto3("message Outer { message Inner { int32 n = 1; } Inner i = 1; }");
        let v2 = proto3("message Outer { message Inner { string n = 1; } Inner i = 1; }");
        assert_eq!(
            breaking(&v2, &v1),
            vec!["Message 'Outer.Inner': field 1 type changed from 'int32' to 'string'"]
        );
    }
}
