//! JSON Schema compatibility
//!
//! A reader schema can read data valid under a writer schema when it is no
//! more restrictive: widening `type`, `enum` or numeric bounds is fine, adding
//! `required` entries, tightening bounds or closing the content model is not.
//! Both documents are compared with their `$ref`s inlined.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::{join_path, path_or_root, ChangeType, FormatCompatibilityRule, SchemaChange};
use crate::format::ParsedSchema;
use crate::schema::SchemaFormat;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaRule;

impl FormatCompatibilityRule for JsonSchemaRule {
    fn format(&self) -> SchemaFormat {
        SchemaFormat::Json
    }

    fn reader_can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<SchemaChange> {
        match (reader, writer) {
            (ParsedSchema::Json(reader), ParsedSchema::Json(writer)) => {
                let mut changes = Vec::new();
                check_value(&reader.resolved(), &writer.resolved(), "", &mut changes);
                changes
            }
            _ => vec![SchemaChange::breaking(
                ChangeType::FormatChanged,
                "root",
                "both schemas must be JSON",
            )],
        }
    }
}

type Schema = Map<String, Value>;

const OBJECT_KEYWORDS: [&str; 4] = ["properties", "required", "patternProperties", "additionalProperties"];
const ARRAY_KEYWORDS: [&str; 6] = ["prefixItems", "additionalItems", "items", "minItems", "maxItems", "uniqueItems"];

fn constraint(out: &mut Vec<SchemaChange>, path: &str, description: String) {
    out.push(SchemaChange::breaking(ChangeType::ConstraintChanged, path_or_root(path), description));
}

/// Run a nested check and report whether it found nothing breaking
fn is_compatible(new: &Value, old: &Value, path: &str) -> bool {
    let mut local = Vec::new();
    check_value(new, old, path, &mut local);
    local.iter().all(|c| !c.is_breaking)
}

fn check_value(new: &Value, old: &Value, path: &str, out: &mut Vec<SchemaChange>) {
    match (new, old) {
        (Value::Object(new), Value::Object(old)) => check_schema(new, old, path, out),
        _ if new == old => {}
        // nothing validated under `false`; `true` accepts everything
        (_, Value::Bool(false)) | (Value::Bool(true), _) => {}
        (Value::Object(new), Value::Bool(true)) if new.is_empty() => {}
        (Value::Bool(false), _) => constraint(
            out,
            path,
            format!("schema changed to reject everything at '{}'", path_or_root(path)),
        ),
        _ => constraint(out, path, format!("schema narrowed from 'true' at '{}'", path_or_root(path))),
    }
}

fn check_schema(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    if has_composition(new) || has_composition(old) {
        check_composition(new, old, path, out);
        if new.get("type").is_none()
            && old.get("type").is_none()
            && !has_any(new, &OBJECT_KEYWORDS)
            && !has_any(old, &OBJECT_KEYWORDS)
        {
            return;
        }
    }

    let new_types = types(new);
    let old_types = types(old);
    if !types_compatible(&new_types, &old_types) {
        out.push(
            SchemaChange::breaking(
                ChangeType::TypeChanged,
                path_or_root(path),
                format!(
                    "Type changed at {} from '{}' to '{}'",
                    path_or_root(path),
                    render_types(old.get("type")),
                    render_types(new.get("type"))
                ),
            )
            .with_values(render_types(old.get("type")), render_types(new.get("type"))),
        );
    } else if new_types.len() > old_types.len() && !old_types.is_empty() {
        out.push(SchemaChange::compatible(
            ChangeType::TypeChanged,
            path_or_root(path),
            format!("Type widened at {}", path_or_root(path)),
        ));
    }

    let new_type = type_str(new);
    let old_type = type_str(old);
    if new_type == Some("object") || old_type == Some("object") || has_any(new, &OBJECT_KEYWORDS) || has_any(old, &OBJECT_KEYWORDS) {
        check_object(new, old, path, out);
    }
    if new_type == Some("array") || old_type == Some("array") || has_any(new, &ARRAY_KEYWORDS) || has_any(old, &ARRAY_KEYWORDS) {
        check_array(new, old, path, out);
    }

    check_enum(new, old, path, out);
    check_const(new, old, path, out);
    check_additional_properties(new, old, path, out);
    check_string(new, old, path, out);
    check_numeric(new, old, path, out);
    check_bound(new, old, "minProperties", path, true, out);
    check_bound(new, old, "maxProperties", path, false, out);
    check_not(new, old, path, out);
    check_dependencies(new, old, path, out);
    check_dependent_required(new, old, path, out);
    check_dependent_schemas(new, old, path, out);
    check_unique_items(new, old, path, out);
    check_additional_items(new, old, path, out);
    check_items_boolean(new, old, path, out);
}

fn has_any(schema: &Schema, keys: &[&str]) -> bool {
    keys.iter().any(|k| schema.contains_key(*k))
}

fn has_composition(schema: &Schema) -> bool {
    has_any(schema, &["oneOf", "anyOf", "allOf"])
}

fn type_str(schema: &Schema) -> Option<&str> {
    schema.get("type").and_then(Value::as_str)
}

fn types(schema: &Schema) -> BTreeSet<String> {
    match schema.get("type") {
        Some(Value::String(s)) => BTreeSet::from([s.clone()]),
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => BTreeSet::new(),
    }
}

fn render_types(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => {
            let names: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            format!("[{}]", names.join(", "))
        }
        Some(other) => other.to_string(),
        None => "any".to_string(),
    }
}

fn is_promotion(old: &str, new: &str) -> bool {
    old == "integer" && new == "number"
}

fn types_compatible(new: &BTreeSet<String>, old: &BTreeSet<String>) -> bool {
    if new.is_empty() || old.is_empty() {
        return true;
    }
    old.iter().all(|o| new.iter().any(|n| n == o || is_promotion(o, n)))
}

fn properties(schema: &Schema) -> Option<&Schema> {
    schema.get("properties").and_then(Value::as_object)
}

fn required(schema: &Schema) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Missing or `true` additionalProperties
fn is_open(schema: &Schema) -> bool {
    match schema.get("additionalProperties") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => false,
    }
}

fn additional_properties_schema(schema: &Schema) -> Option<&Value> {
    schema.get("additionalProperties").filter(|v| v.is_object())
}

fn has_pattern_properties(schema: &Schema) -> bool {
    schema
        .get("patternProperties")
        .and_then(Value::as_object)
        .map(|m| !m.is_empty())
        .unwrap_or(false)
}

fn check_object(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let empty = Schema::new();
    let new_props = properties(new).unwrap_or(&empty);
    let old_props = properties(old).unwrap_or(&empty);
    let new_required = required(new);
    let old_required = required(old);
    let reader_open = is_open(new);

    for (name, old_prop) in old_props {
        if new_props.contains_key(name) || old_prop == &Value::Bool(false) {
            continue;
        }
        let prop_path = join_path(path, name);
        if reader_open {
            out.push(SchemaChange::compatible(
                ChangeType::FieldRemoved,
                prop_path.clone(),
                format!("Property '{}' was removed", prop_path),
            ));
        } else if has_pattern_properties(new) {
            continue;
        } else if let Some(ap) = additional_properties_schema(new) {
            if old_prop.is_object() && !is_compatible(ap, old_prop, &prop_path) {
                out.push(SchemaChange::breaking(
                    ChangeType::FieldRemoved,
                    prop_path.clone(),
                    format!("Property '{}' removed but not covered by additionalProperties", prop_path),
                ));
            }
        } else {
            out.push(SchemaChange::breaking(
                ChangeType::FieldRemoved,
                prop_path.clone(),
                format!("Property '{}' was removed", prop_path),
            ));
        }
    }

    for (name, new_prop) in new_props {
        let prop_path = join_path(path, name);
        let is_required = new_required.contains(name.as_str());
        if !old_props.contains_key(name) {
            if new_prop == &Value::Bool(true) {
                continue;
            }
            if is_required {
                out.push(SchemaChange::breaking(
                    ChangeType::FieldAdded,
                    prop_path.clone(),
                    format!("New required property '{}' was added", prop_path),
                ));
            } else if is_open(old) {
                out.push(SchemaChange::breaking(
                    ChangeType::FieldAdded,
                    prop_path.clone(),
                    format!("Property '{}' was added to open content model", prop_path),
                ));
            } else if let Some(ap) = additional_properties_schema(old) {
                if new_prop.is_object() && !is_compatible(new_prop, ap, &prop_path) {
                    out.push(SchemaChange::breaking(
                        ChangeType::FieldAdded,
                        prop_path.clone(),
                        format!(
                            "Property '{}' added with type incompatible with additionalProperties",
                            prop_path
                        ),
                    ));
                }
            } else {
                out.push(SchemaChange::compatible(
                    ChangeType::FieldAdded,
                    prop_path.clone(),
                    format!("Property '{}' was added to closed content model", prop_path),
                ));
            }
        } else if is_required && !old_required.contains(name.as_str()) {
            out.push(SchemaChange::breaking(
                ChangeType::OptionalityChanged,
                prop_path.clone(),
                format!("Property '{}' changed from optional to required", prop_path),
            ));
        }
    }

    for (name, new_prop) in new_props {
        if let Some(old_prop) = old_props.get(name) {
            if new_prop.is_object() && old_prop.is_object() {
                check_value(new_prop, old_prop, &join_path(path, name), out);
            }
        }
    }

    for name in old_required.difference(&new_required) {
        out.push(SchemaChange::compatible(
            ChangeType::OptionalityChanged,
            join_path(path, name),
            format!("Property '{}' is no longer required", join_path(path, name)),
        ));
    }
}

fn tuple_items(schema: &Schema) -> &[Value] {
    schema
        .get("prefixItems")
        .and_then(Value::as_array)
        .or_else(|| schema.get("items").and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Schema applied to items past the tuple prefix
fn additional_items_schema(schema: &Schema) -> Option<&Value> {
    let key = if schema.contains_key("prefixItems") {
        "items"
    } else {
        "additionalItems"
    };
    schema.get(key).filter(|v| v.is_object())
}

fn check_array(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let new_items = new.get("items").filter(|v| v.is_object());
    let old_items = old.get("items").filter(|v| v.is_object());
    match (new_items, old_items) {
        (Some(n), Some(o)) => check_value(n, o, &join_path(path, "items"), out),
        (Some(_), None) if !old.contains_key("items") => {
            constraint(out, path, format!("items schema added at '{}'", path_or_root(path)))
        }
        _ => {}
    }

    let new_tuple = tuple_items(new);
    let old_tuple = tuple_items(old);
    if !new_tuple.is_empty() || !old_tuple.is_empty() {
        for (i, (n, o)) in new_tuple.iter().zip(old_tuple).enumerate() {
            if n.is_object() && o.is_object() {
                check_value(n, o, &join_path(path, &format!("items/{}", i)), out);
            }
        }
        if let Some(old_ai) = additional_items_schema(old) {
            for (i, n) in new_tuple.iter().enumerate().skip(old_tuple.len()) {
                if n.is_object() && !is_compatible(n, old_ai, &join_path(path, &format!("items/{}", i))) {
                    constraint(out, path, format!("Item added at position {} not covered by additionalItems", i));
                }
            }
        }
        if let Some(new_ai) = additional_items_schema(new) {
            for (i, o) in old_tuple.iter().enumerate().skip(new_tuple.len()) {
                if o.is_object() && !is_compatible(new_ai, o, &join_path(path, &format!("items/{}", i))) {
                    constraint(out, path, format!("Item removed at position {} not covered by additionalItems", i));
                }
            }
        }
    }

    check_bound(new, old, "minItems", path, true, out);
    check_bound(new, old, "maxItems", path, false, out);
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_enum(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let new_enum = new.get("enum").and_then(Value::as_array);
    let old_enum = old.get("enum").and_then(Value::as_array);
    match (new_enum, old_enum) {
        (Some(_), None) => constraint(out, path, format!("Enum constraint added at '{}'", path_or_root(path))),
        (Some(new_enum), Some(old_enum)) => {
            let new_values: BTreeSet<String> = new_enum.iter().map(value_text).collect();
            let old_values: BTreeSet<String> = old_enum.iter().map(value_text).collect();
            for removed in old_values.difference(&new_values) {
                out.push(SchemaChange::breaking(
                    ChangeType::EnumVariantRemoved,
                    path_or_root(path),
                    format!("Enum value '{}' was removed at '{}'", removed, path_or_root(path)),
                ));
            }
            for added in new_values.difference(&old_values) {
                out.push(SchemaChange::compatible(
                    ChangeType::EnumVariantAdded,
                    path_or_root(path),
                    format!("Enum value '{}' was added at '{}'", added, path_or_root(path)),
                ));
            }
        }
        _ => {}
    }
}

fn check_const(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    match (new.get("const"), old.get("const")) {
        (Some(_), None) => constraint(out, path, format!("const constraint added at '{}'", path_or_root(path))),
        (Some(n), Some(o)) if n != o => constraint(
            out,
            path,
            format!(
                "const value changed at '{}' from '{}' to '{}'",
                path_or_root(path),
                value_text(o),
                value_text(n)
            ),
        ),
        _ => {}
    }
}

fn check_additional_properties(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let new_ap = new.get("additionalProperties");
    let old_ap = old.get("additionalProperties");
    let old_unrestricted = matches!(old_ap, None | Some(Value::Bool(true)));

    if old_unrestricted && new_ap == Some(&Value::Bool(false)) {
        constraint(
            out,
            path,
            format!("additionalProperties changed from allowed to forbidden at '{}'", path_or_root(path)),
        );
    }
    if let Some(new_schema) = new_ap.filter(|v| v.is_object()) {
        match old_ap.filter(|v| v.is_object()) {
            Some(old_schema) => check_value(new_schema, old_schema, &join_path(path, "additionalProperties"), out),
            None if old_unrestricted => {
                constraint(out, path, format!("additionalProperties narrowed at '{}'", path_or_root(path)))
            }
            None => {}
        }
    }
}

fn number(schema: &Schema, key: &str) -> Option<f64> {
    schema.get(key).and_then(Value::as_f64)
}

/// Lower bounds may not rise and upper bounds may not fall
fn check_bound(new: &Schema, old: &Schema, key: &str, path: &str, is_min: bool, out: &mut Vec<SchemaChange>) {
    let Some(new_value) = new.get(key) else {
        return;
    };
    let tightened = match number(old, key) {
        None => true,
        Some(old_num) => {
            let new_num = new_value.as_f64().unwrap_or(0.0);
            if is_min {
                new_num > old_num
            } else {
                new_num < old_num
            }
        }
    };
    if tightened {
        let was = old.get(key).map(Value::to_string).unwrap_or_else(|| "none".to_string());
        out.push(
            SchemaChange::breaking(
                ChangeType::ConstraintChanged,
                path_or_root(path),
                format!(
                    "'{}' constraint tightened at '{}' (was {}, now {})",
                    key,
                    path_or_root(path),
                    was,
                    new_value
                ),
            )
            .with_values(was, new_value.to_string()),
        );
    }
}

fn check_string(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    check_bound(new, old, "minLength", path, true, out);
    check_bound(new, old, "maxLength", path, false, out);
    match (new.get("pattern"), old.get("pattern")) {
        (Some(n), Some(o)) if n != o => constraint(
            out,
            path,
            format!(
                "pattern changed at '{}' from '{}' to '{}'",
                path_or_root(path),
                value_text(o),
                value_text(n)
            ),
        ),
        (Some(_), None) => constraint(out, path, format!("pattern constraint added at '{}'", path_or_root(path))),
        _ => {}
    }
}

fn check_numeric(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    check_bound(new, old, "minimum", path, true, out);
    check_bound(new, old, "maximum", path, false, out);
    check_bound(new, old, "exclusiveMinimum", path, true, out);
    check_bound(new, old, "exclusiveMaximum", path, false, out);

    match (number(new, "multipleOf"), number(old, "multipleOf")) {
        (Some(n), Some(o)) if n != 0.0 && o != 0.0 => {
            let ratio = o / n;
            if (ratio - ratio.round()).abs() > 1e-9 {
                constraint(
                    out,
                    path,
                    format!("multipleOf changed at '{}' from {} to {}", path_or_root(path), o, n),
                );
            }
        }
        (Some(_), None) => constraint(out, path, format!("multipleOf constraint added at '{}'", path_or_root(path))),
        _ => {}
    }
}

fn check_not(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    match (new.get("not"), old.get("not")) {
        (Some(_), None) => constraint(out, path, format!("'not' constraint added at '{}'", path_or_root(path))),
        (Some(Value::Object(n)), Some(Value::Object(o))) => {
            let new_type = type_str(n);
            let old_type = type_str(o);
            if let (Some(nt), Some(ot)) = (new_type, old_type) {
                if nt != ot && !is_promotion(nt, ot) {
                    constraint(
                        out,
                        path,
                        format!("'not' schema changed at '{}' from '{}' to '{}'", path_or_root(path), ot, nt),
                    );
                }
            }
            if n != o && new_type == old_type && n.len() < o.len() {
                constraint(out, path, format!("'not' schema broadened at '{}'", path_or_root(path)));
            }
        }
        _ => {}
    }
}

fn check_dependencies(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let (new_deps, old_deps) = match (new.get("dependencies"), old.get("dependencies")) {
        (Some(_), None) => {
            constraint(out, path, format!("dependencies added at '{}'", path_or_root(path)));
            return;
        }
        (Some(Value::Object(n)), Some(Value::Object(o))) => (n, o),
        _ => return,
    };

    for name in new_deps.keys().filter(|k| !old_deps.contains_key(*k)) {
        constraint(
            out,
            path,
            format!("dependency added for property '{}' at '{}'", name, path_or_root(path)),
        );
    }
    for (name, old_dep) in old_deps {
        match new_deps.get(name) {
            None if old_dep.is_object() => {}
            None => constraint(
                out,
                path,
                format!("dependency removed for property '{}' at '{}'", name, path_or_root(path)),
            ),
            Some(new_dep) if new_dep.is_object() && old_dep.is_object() => {
                check_value(new_dep, old_dep, &join_path(path, &format!("dependencies/{}", name)), out)
            }
            Some(new_dep) if new_dep != old_dep => constraint(
                out,
                path,
                format!("dependency changed for property '{}' at '{}'", name, path_or_root(path)),
            ),
            Some(_) => {}
        }
    }
}

fn check_dependent_required(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let (new_deps, old_deps) = match (new.get("dependentRequired"), old.get("dependentRequired")) {
        (Some(_), None) => {
            constraint(out, path, format!("dependentRequired added at '{}'", path_or_root(path)));
            return;
        }
        (Some(Value::Object(n)), Some(Value::Object(o))) => (n, o),
        _ => return,
    };

    for name in new_deps.keys().filter(|k| !old_deps.contains_key(*k)) {
        constraint(
            out,
            path,
            format!("dependentRequired added for property '{}' at '{}'", name, path_or_root(path)),
        );
    }
    for (name, old_dep) in old_deps {
        match new_deps.get(name) {
            None => constraint(
                out,
                path,
                format!("dependentRequired removed for property '{}' at '{}'", name, path_or_root(path)),
            ),
            Some(new_dep) if new_dep != old_dep => constraint(
                out,
                path,
                format!("dependentRequired changed for property '{}' at '{}'", name, path_or_root(path)),
            ),
            Some(_) => {}
        }
    }
}

fn check_dependent_schemas(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let (new_deps, old_deps) = match (new.get("dependentSchemas"), old.get("dependentSchemas")) {
        (Some(_), None) => {
            constraint(out, path, format!("dependentSchemas added at '{}'", path_or_root(path)));
            return;
        }
        (Some(Value::Object(n)), Some(Value::Object(o))) => (n, o),
        _ => return,
    };

    for (name, new_dep) in new_deps {
        match old_deps.get(name) {
            None => constraint(
                out,
                path,
                format!("dependentSchema added for property '{}' at '{}'", name, path_or_root(path)),
            ),
            Some(old_dep) if new_dep.is_object() && old_dep.is_object() => {
                check_value(new_dep, old_dep, &join_path(path, &format!("dependencies/{}", name)), out)
            }
            Some(_) => {}
        }
    }
}

fn check_unique_items(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    if new.get("uniqueItems") == Some(&Value::Bool(true)) && old.get("uniqueItems") != Some(&Value::Bool(true)) {
        constraint(out, path, format!("uniqueItems constraint added at '{}'", path_or_root(path)));
    }
}

fn check_additional_items(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let new_ai = new.get("additionalItems");
    let old_ai = old.get("additionalItems");
    if matches!(old_ai, None | Some(Value::Bool(true))) && new_ai == Some(&Value::Bool(false)) {
        constraint(
            out,
            path,
            format!("additionalItems changed from allowed to forbidden at '{}'", path_or_root(path)),
        );
    }
    if let (Some(n), Some(o)) = (new_ai.filter(|v| v.is_object()), old_ai.filter(|v| v.is_object())) {
        check_value(n, o, &join_path(path, "additionalItems"), out);
    }
}

fn check_items_boolean(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    match (new.get("items"), old.get("items")) {
        (Some(Value::Bool(false)), Some(Value::Bool(true))) => constraint(
            out,
            path,
            format!("items changed from allowed to forbidden at '{}'", path_or_root(path)),
        ),
        (Some(Value::Bool(false)), Some(old)) if !old.is_boolean() => constraint(
            out,
            path,
            format!("items changed from schema to forbidden at '{}'", path_or_root(path)),
        ),
        _ => {}
    }
}

fn schema_array<'a>(schema: &'a Schema, key: &str) -> Vec<&'a Schema> {
    schema
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default()
}

fn dedup<'a>(schemas: Vec<&'a Schema>) -> Vec<&'a Schema> {
    let mut out: Vec<&Schema> = Vec::with_capacity(schemas.len());
    for schema in schemas {
        if !out.contains(&schema) {
            out.push(schema);
        }
    }
    out
}

/// Type names a value may take: one per oneOf/anyOf branch, the single type
/// an allOf pins, or the plain `type`. Untyped branches yield "".
fn sum_options(schema: &Schema, include_all_of: bool) -> Vec<String> {
    for key in ["oneOf", "anyOf"] {
        let options = schema_array(schema, key);
        if !options.is_empty() {
            return options.iter().map(|o| type_str(o).unwrap_or("").to_string()).collect();
        }
    }
    if include_all_of {
        let all_of = schema_array(schema, "allOf");
        if !all_of.is_empty() {
            let pinned: BTreeSet<&str> = all_of.iter().filter_map(|s| type_str(s)).collect();
            if pinned.len() == 1 {
                return pinned.into_iter().map(str::to_string).collect();
            }
        }
    }
    types(schema).into_iter().collect()
}

fn check_composition(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let old_options = sum_options(old, true);
    let new_options = sum_options(new, true);
    for old_option in &old_options {
        let covered = new_options.iter().any(|n| {
            n == old_option || (!old_option.is_empty() && !n.is_empty() && is_promotion(old_option, n))
        });
        if !covered {
            let shown = if old_option.is_empty() { "schema" } else { old_option.as_str() };
            out.push(SchemaChange::breaking(
                ChangeType::TypeChanged,
                path_or_root(path),
                format!("Type option '{}' removed at '{}'", shown, path_or_root(path)),
            ));
        }
    }

    check_all_of(new, old, path, out);

    for key in ["oneOf", "anyOf"] {
        let old_elems = schema_array(old, key);
        let new_elems = schema_array(new, key);
        if !old_elems.is_empty() && old_elems.len() == new_elems.len() {
            let changed = new_elems
                .iter()
                .zip(&old_elems)
                .any(|(n, o)| !is_compatible(&Value::Object((*n).clone()), &Value::Object((*o).clone()), path));
            if changed {
                constraint(out, path, format!("Composed schema element changed at '{}'", path_or_root(path)));
                return;
            }
        }
    }
}

fn check_all_of(new: &Schema, old: &Schema, path: &str, out: &mut Vec<SchemaChange>) {
    let old_all = dedup(schema_array(old, "allOf"));
    let new_all = dedup(schema_array(new, "allOf"));
    if new_all.is_empty() {
        return;
    }

    if old_all.is_empty() {
        let old_type = type_str(old);
        let old_options = sum_options(old, false);
        for elem in &new_all {
            let elem_type = type_str(elem);
            if let Some(nt) = elem_type {
                if old_type.is_some_and(|ot| ot == nt || is_promotion(ot, nt)) {
                    continue;
                }
                if old_options.iter().any(|o| o == nt || is_promotion(o, nt)) {
                    continue;
                }
            }
            let subsumed = match (elem_type, old_type) {
                (Some(nt), Some(ot)) => nt == ot || is_promotion(ot, nt),
                _ => *elem == old,
            };
            if !subsumed {
                constraint(out, path, format!("New constraint added to allOf at '{}'", path_or_root(path)));
                return;
            }
        }
        return;
    }

    for elem in &new_all {
        if old_all.contains(elem) {
            continue;
        }
        if let Some(nt) = type_str(elem) {
            if old_all.iter().filter_map(|o| type_str(o)).any(|ot| ot == nt || is_promotion(ot, nt)) {
                continue;
            }
        }
        if elem.contains_key("enum") {
            if let Some(old_enum) = old_all.iter().find(|o| o.contains_key("enum")) {
                check_enum(elem, old_enum, path, out);
                continue;
            }
        }
        let shares_keys = old_all
            .iter()
            .any(|o| !elem.is_empty() && elem.keys().all(|k| o.contains_key(k)));
        if shares_keys {
            continue;
        }
        constraint(out, path, format!("New constraint added to allOf at '{}'", path_or_root(path)));
    }

    for old_elem in &old_all {
        let Some(ot) = type_str(old_elem) else {
            continue;
        };
        for new_elem in &new_all {
            if let Some(nt) = type_str(new_elem) {
                if nt != ot && !is_promotion(ot, nt) && old_elem.len() == 1 && new_elem.len() == 1 {
                    out.push(SchemaChange::breaking(
                        ChangeType::TypeChanged,
                        path_or_root(path),
                        format!("Type changed in allOf at '{}' from '{}' to '{}'", path_or_root(path), ot, nt),
                    ));
                }
            }
        }
    }
}
