//! Avro schema model and canonical form

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::{write_json_string, write_sorted_json};
use crate::error::{RegistryError, Result};
use crate::schema::{ResolvedReference, SchemaFormat};

const PRIMITIVES: [&str; 8] = ["null", "boolean", "int", "long", "float", "double", "bytes", "string"];

/// An Avro type expression; named types are held by full name in [`AvroSchema`]
#[derive(Debug, Clone, PartialEq)]
pub enum AvroType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Bytes,
    String,
    Array(Box<AvroType>),
    Map(Box<AvroType>),
    Union(Vec<AvroType>),
    Named(String),
    Logical {
        base: Box<AvroType>,
        logical: LogicalType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalType {
    pub name: String,
    pub precision: Option<u64>,
    pub scale: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NamedType {
    Record(RecordSchema),
    Enum(EnumSchema),
    Fixed(FixedSchema),
}

impl NamedType {
    pub fn name(&self) -> &str {
        match self {
            NamedType::Record(r) => &r.name,
            NamedType::Enum(e) => &e.name,
            NamedType::Fixed(f) => &f.name,
        }
    }

    pub fn aliases(&self) -> &[String] {
        match self {
            NamedType::Record(r) => &r.aliases,
            NamedType::Enum(e) => &e.aliases,
            NamedType::Fixed(f) => &f.aliases,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NamedType::Record(_) => "record",
            NamedType::Enum(_) => "enum",
            NamedType::Fixed(_) => "fixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSchema {
    pub name: String,
    pub aliases: Vec<String>,
    pub fields: Vec<RecordField>,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub ty: AvroType,
    pub default: Option<Value>,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumSchema {
    pub name: String,
    pub aliases: Vec<String>,
    pub symbols: Vec<String>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixedSchema {
    pub name: String,
    pub aliases: Vec<String>,
    pub size: u64,
    pub logical: Option<LogicalType>,
}

/// A parsed Avro schema together with every named type it can see
#[derive(Debug, Clone)]
pub struct AvroSchema {
    root: AvroType,
    named: HashMap<String, NamedType>,
    external: HashSet<String>,
}

impl AvroSchema {
    /// Parse `raw`, with named types from `references` in scope
    pub fn parse(raw: &str, references: &[ResolvedReference]) -> Result<Self> {
        let mut parser = Parser::default();
        for reference in references {
            let value: Value = serde_json::from_str(&reference.schema).map_err(|e| {
                parse_error(format!("reference '{}' is not valid JSON: {}", reference.reference.name, e))
            })?;
            parser.parse_type(&value, None)?;
        }
        let external: HashSet<String> = parser.named.keys().cloned().collect();

        let value: Value = serde_json::from_str(raw).map_err(|e| parse_error(format!("not valid JSON: {}", e)))?;
        let root = parser.parse_type(&value, None)?;

        validate_with_apache_avro(raw, references)?;

        Ok(Self {
            root,
            named: parser.named,
            external,
        })
    }

    pub fn root(&self) -> &AvroType {
        &self.root
    }

    pub fn lookup(&self, full_name: &str) -> Option<&NamedType> {
        self.named.get(full_name)
    }

    /// Compact JSON with fixed key order, full names, and no docs
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        let mut printed = HashSet::new();
        self.write_type(&self.root, &mut out, &mut printed);
        out
    }

    fn write_type(&self, ty: &AvroType, out: &mut String, printed: &mut HashSet<String>) {
        match ty {
            AvroType::Null => out.push_str("\"null\""),
            AvroType::Boolean => out.push_str("\"boolean\""),
            AvroType::Int => out.push_str("\"int\""),
            AvroType::Long => out.push_str("\"long\""),
            AvroType::Float => out.push_str("\"float\""),
            AvroType::Double => out.push_str("\"double\""),
            AvroType::Bytes => out.push_str("\"bytes\""),
            AvroType::String => out.push_str("\"string\""),
            AvroType::Array(items) => {
                out.push_str("{\"type\":\"array\",\"items\":");
                self.write_type(items, out, printed);
                out.push('}');
            }
            AvroType::Map(values) => {
                out.push_str("{\"type\":\"map\",\"values\":");
                self.write_type(values, out, printed);
                out.push('}');
            }
            AvroType::Union(branches) => {
                out.push('[');
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_type(branch, out, printed);
                }
                out.push(']');
            }
            AvroType::Logical { base, logical } => {
                out.push_str("{\"type\":");
                self.write_type(base, out, printed);
                write_logical(logical, out);
                out.push('}');
            }
            AvroType::Named(name) => {
                if self.external.contains(name) || !printed.insert(name.clone()) {
                    write_json_string(name, out);
                    return;
                }
                match self.named.get(name) {
                    Some(named) => self.write_named(named, out, printed),
                    None => write_json_string(name, out),
                }
            }
        }
    }

    fn write_named(&self, named: &NamedType, out: &mut String, printed: &mut HashSet<String>) {
        out.push_str("{\"name\":");
        write_json_string(named.name(), out);
        match named {
            NamedType::Record(record) => {
                out.push_str(if record.is_error { ",\"type\":\"error\"" } else { ",\"type\":\"record\"" });
                out.push_str(",\"fields\":[");
                for (i, field) in record.fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str("{\"name\":");
                    write_json_string(&field.name, out);
                    out.push_str(",\"type\":");
                    self.write_type(&field.ty, out, printed);
                    if let Some(default) = &field.default {
                        out.push_str(",\"default\":");
                        write_sorted_json(default, out);
                    }
                    write_aliases(&field.aliases, out);
                    out.push('}');
                }
                out.push(']');
            }
            NamedType::Enum(e) => {
                out.push_str(",\"type\":\"enum\",\"symbols\":[");
                for (i, symbol) in e.symbols.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_string(symbol, out);
                }
                out.push(']');
                if let Some(default) = &e.default {
                    out.push_str(",\"default\":");
                    write_json_string(default, out);
                }
            }
            NamedType::Fixed(f) => {
                out.push_str(",\"type\":\"fixed\",\"size\":");
                out.push_str(&f.size.to_string());
                if let Some(logical) = &f.logical {
                    write_logical(logical, out);
                }
            }
        }
        write_aliases(named.aliases(), out);
        out.push('}');
    }
}

fn write_logical(logical: &LogicalType, out: &mut String) {
    out.push_str(",\"logicalType\":");
    write_json_string(&logical.name, out);
    if let Some(precision) = logical.precision {
        out.push_str(&format!(",\"precision\":{}", precision));
    }
    if let Some(scale) = logical.scale {
        out.push_str(&format!(",\"scale\":{}", scale));
    }
}

fn write_aliases(aliases: &[String], out: &mut String) {
    if aliases.is_empty() {
        return;
    }
    out.push_str(",\"aliases\":[");
    for (i, alias) in aliases.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(alias, out);
    }
    out.push(']');
}

fn parse_error(reason: impl Into<String>) -> RegistryError {
    RegistryError::parse(SchemaFormat::Avro, reason)
}

/// Cross-check with the Apache Avro parser, which also validates defaults
fn validate_with_apache_avro(raw: &str, references: &[ResolvedReference]) -> Result<()> {
    if references.is_empty() {
        return apache_avro::Schema::parse_str(raw)
            .map(|_| ())
            .map_err(|e| parse_error(e.to_string()));
    }
    let mut inputs: Vec<&str> = references.iter().map(|r| r.schema.as_str()).collect();
    inputs.push(raw);
    let all_named = inputs.iter().all(|input| {
        serde_json::from_str::<Value>(input)
            .map(|v| v.get("name").is_some())
            .unwrap_or(false)
    });
    if !all_named {
        return Ok(());
    }
    apache_avro::Schema::parse_list(&inputs)
        .map(|_| ())
        .map_err(|e| parse_error(e.to_string()))
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_full_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(valid_name)
}

#[derive(Default)]
struct Parser {
    named: HashMap<String, NamedType>,
}

impl Parser {
    fn parse_type(&mut self, value: &Value, namespace: Option<&str>) -> Result<AvroType> {
        match value {
            Value::String(name) => self.parse_type_name(name, namespace),
            Value::Array(branches) => self.parse_union(branches, namespace),
            Value::Object(obj) => self.parse_object(obj, namespace),
            other => Err(parse_error(format!("expected a type, found {}", other))),
        }
    }

    fn parse_type_name(&self, name: &str, namespace: Option<&str>) -> Result<AvroType> {
        if let Some(primitive) = primitive(name) {
            return Ok(primitive);
        }
        let candidates = match namespace {
            Some(ns) if !name.contains('.') => vec![format!("{}.{}", ns, name), name.to_string()],
            _ => vec![name.to_string()],
        };
        candidates
            .into_iter()
            .find(|candidate| self.named.contains_key(candidate))
            .map(AvroType::Named)
            .ok_or_else(|| parse_error(format!("unknown type '{}'", name)))
    }

    fn parse_union(&mut self, branches: &[Value], namespace: Option<&str>) -> Result<AvroType> {
        let mut parsed = Vec::with_capacity(branches.len());
        let mut seen = HashSet::new();
        for branch in branches {
            let ty = self.parse_type(branch, namespace)?;
            if matches!(ty, AvroType::Union(_)) {
                return Err(parse_error("unions may not immediately contain other unions"));
            }
            let key = union_branch_key(&ty);
            if !seen.insert(key.clone()) {
                return Err(parse_error(format!("duplicate type '{}' in union", key)));
            }
            parsed.push(ty);
        }
        Ok(AvroType::Union(parsed))
    }

    fn parse_object(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let type_value = obj
            .get("type")
            .ok_or_else(|| parse_error("object schema is missing 'type'"))?;
        let type_name = match type_value {
            Value::String(s) => s.as_str(),
            nested => return self.parse_type(nested, namespace),
        };
        match type_name {
            "record" | "error" => self.parse_record(obj, namespace, type_name == "error"),
            "enum" => self.parse_enum(obj, namespace),
            "fixed" => self.parse_fixed(obj, namespace),
            "array" => {
                let items = obj.get("items").ok_or_else(|| parse_error("array is missing 'items'"))?;
                Ok(AvroType::Array(Box::new(self.parse_type(items, namespace)?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| parse_error("map is missing 'values'"))?;
                Ok(AvroType::Map(Box::new(self.parse_type(values, namespace)?)))
            }
            other => {
                let base = self.parse_type_name(other, namespace)?;
                match (logical_type(obj)?, primitive(other)) {
                    (Some(logical), Some(_)) => Ok(AvroType::Logical {
                        base: Box::new(base),
                        logical,
                    }),
                    _ => Ok(base),
                }
            }
        }
    }

    fn declare(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<(String, Option<String>, Vec<String>)> {
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| parse_error("named type is missing 'name'"))?;
        let explicit_ns = obj.get("namespace").and_then(Value::as_str).filter(|ns| !ns.is_empty());
        let (full, ns) = if let Some(idx) = name.rfind('.') {
            (name.to_string(), Some(name[..idx].to_string()))
        } else {
            let ns = explicit_ns.or(namespace).map(str::to_string);
            let full = match &ns {
                Some(ns) => format!("{}.{}", ns, name),
                None => name.to_string(),
            };
            (full, ns)
        };
        if !valid_full_name(&full) {
            return Err(parse_error(format!("invalid name '{}'", full)));
        }
        if PRIMITIVES.contains(&full.as_str()) {
            return Err(parse_error(format!("'{}' redefines a primitive type", full)));
        }
        if self.named.contains_key(&full) {
            return Err(parse_error(format!("duplicate definition of '{}'", full)));
        }
        let aliases = parse_aliases(obj, ns.as_deref())?;
        Ok((full, ns, aliases))
    }

    fn parse_record(&mut self, obj: &Map<String, Value>, namespace: Option<&str>, is_error: bool) -> Result<AvroType> {
        let (full, ns, aliases) = self.declare(obj, namespace)?;
        // Registered before the fields so recursive references resolve.
        self.named.insert(
            full.clone(),
            NamedType::Record(RecordSchema {
                name: full.clone(),
                aliases: aliases.clone(),
                fields: Vec::new(),
                is_error,
            }),
        );

        let raw_fields = obj
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| parse_error(format!("record '{}' is missing 'fields'", full)))?;
        let mut fields = Vec::with_capacity(raw_fields.len());
        let mut names = HashSet::new();
        for raw in raw_fields {
            let field = raw
                .as_object()
                .ok_or_else(|| parse_error(format!("field of '{}' is not an object", full)))?;
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| parse_error(format!("field of '{}' is missing 'name'", full)))?;
            if !valid_name(name) {
                return Err(parse_error(format!("invalid field name '{}' in '{}'", name, full)));
            }
            if !names.insert(name.to_string()) {
                return Err(parse_error(format!("duplicate field '{}' in '{}'", name, full)));
            }
            let ty_value = field
                .get("type")
                .ok_or_else(|| parse_error(format!("field '{}.{}' is missing 'type'", full, name)))?;
            let ty = self.parse_type(ty_value, ns.as_deref())?;
            let field_aliases = field
                .get("aliases")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            fields.push(RecordField {
                name: name.to_string(),
                ty,
                default: field.get("default").cloned(),
                aliases: field_aliases,
            });
        }

        self.named.insert(
            full.clone(),
            NamedType::Record(RecordSchema {
                name: full.clone(),
                aliases,
                fields,
                is_error,
            }),
        );
        Ok(AvroType::Named(full))
    }

    fn parse_enum(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (full, _, aliases) = self.declare(obj, namespace)?;
        let raw_symbols = obj
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| parse_error(format!("enum '{}' is missing 'symbols'", full)))?;
        let mut symbols = Vec::with_capacity(raw_symbols.len());
        for raw in raw_symbols {
            let symbol = raw
                .as_str()
                .filter(|s| valid_name(s))
                .ok_or_else(|| parse_error(format!("invalid symbol {} in enum '{}'", raw, full)))?;
            if symbols.iter().any(|s| s == symbol) {
                return Err(parse_error(format!("duplicate symbol '{}' in enum '{}'", symbol, full)));
            }
            symbols.push(symbol.to_string());
        }
        let default = match obj.get("default") {
            None | Some(Value::Null) => None,
            Some(Value::String(d)) if symbols.contains(d) => Some(d.clone()),
            Some(other) => {
                return Err(parse_error(format!("enum '{}' default {} is not one of its symbols", full, other)))
            }
        };
        self.named.insert(
            full.clone(),
            NamedType::Enum(EnumSchema {
                name: full.clone(),
                aliases,
                symbols,
                default,
            }),
        );
        Ok(AvroType::Named(full))
    }

    fn parse_fixed(&mut self, obj: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (full, _, aliases) = self.declare(obj, namespace)?;
        let size = obj
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| parse_error(format!("fixed '{}' needs a non-negative integer 'size'", full)))?;
        let logical = logical_type(obj)?;
        self.named.insert(
            full.clone(),
            NamedType::Fixed(FixedSchema {
                name: full.clone(),
                aliases,
                size,
                logical,
            }),
        );
        Ok(AvroType::Named(full))
    }
}

fn primitive(name: &str) -> Option<AvroType> {
    Some(match name {
        "null" => AvroType::Null,
        "boolean" => AvroType::Boolean,
        "int" => AvroType::Int,
        "long" => AvroType::Long,
        "float" => AvroType::Float,
        "double" => AvroType::Double,
        "bytes" => AvroType::Bytes,
        "string" => AvroType::String,
        _ => return None,
    })
}

fn logical_type(obj: &Map<String, Value>) -> Result<Option<LogicalType>> {
    let Some(name) = obj.get("logicalType") else {
        return Ok(None);
    };
    let name = name
        .as_str()
        .ok_or_else(|| parse_error("'logicalType' must be a string"))?;
    Ok(Some(LogicalType {
        name: name.to_string(),
        precision: obj.get("precision").and_then(Value::as_u64),
        scale: obj.get("scale").and_then(Value::as_u64),
    }))
}

fn parse_aliases(obj: &Map<String, Value>, namespace: Option<&str>) -> Result<Vec<String>> {
    let Some(raw) = obj.get("aliases") else {
        return Ok(Vec::new());
    };
    let raw = raw
        .as_array()
        .ok_or_else(|| parse_error("'aliases' must be an array"))?;
    raw.iter()
        .map(|alias| {
            let alias = alias
                .as_str()
                .ok_or_else(|| parse_error("alias must be a string"))?;
            Ok(match namespace {
                Some(ns) if !alias.contains('.') => format!("{}.{}", ns, alias),
                _ => alias.to_string(),
            })
        })
        .collect()
}

/// Identity of a union branch; unions may hold each unnamed type once
pub(crate) fn union_branch_key(ty: &AvroType) -> String {
    match ty {
        AvroType::Null => "null".into(),
        AvroType::Boolean => "boolean".into(),
        AvroType::Int => "int".into(),
        AvroType::Long => "long".into(),
        AvroType::Float => "float".into(),
        AvroType::Double => "double".into(),
        AvroType::Bytes => "bytes".into(),
        AvroType::String => "string".into(),
        AvroType::Array(_) => "array".into(),
        AvroType::Map(_) => "map".into(),
        AvroType::Union(_) => "union".into(),
        AvroType::Named(name) => name.clone(),
        AvroType::Logical { base, .. } => union_branch_key(base),
    }
}
