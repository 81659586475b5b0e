//! Protocol Buffers source parser and canonical form
//!
//! Covers the proto2/proto3 surface relevant to schema evolution: packages,
//! imports, options, messages (nested), enums, oneofs, maps, reserved ranges
//! and services. Extensions and `extend` blocks are skipped. Every named field
//! type is resolved to a fully-qualified message or enum.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::{RegistryError, Result};
use crate::schema::{ResolvedReference, SchemaFormat};

const MAX_FIELD_NUMBER: u32 = 536_870_911;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub path: String,
    /// `public` or `weak`
    pub modifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OptionDecl {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// proto3 singular field without a label
    Implicit,
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    fn from_keyword(word: &str) -> Option<Self> {
        Some(match word {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Uint32 => "uint32",
            ScalarType::Uint64 => "uint64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// Fully-qualified message name, without the leading dot
    Message(String),
    /// Fully-qualified enum name, without the leading dot
    Enum(String),
    Map {
        key: ScalarType,
        value: Box<FieldType>,
    },
    /// A type name before resolution
    Unresolved(String),
}

impl FieldType {
    pub fn describe(&self) -> String {
        match self {
            FieldType::Scalar(s) => s.keyword().to_string(),
            FieldType::Message(name) | FieldType::Enum(name) => format!(".{}", name),
            FieldType::Map { key, value } => format!("map<{}, {}>", key.keyword(), value.describe()),
            FieldType::Unresolved(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub number: u32,
    pub label: Label,
    pub ty: FieldType,
    pub oneof: Option<String>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reserved {
    Range(u32, u32),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDef {
    pub name: String,
    pub full_name: String,
    pub fields: Vec<FieldDef>,
    pub oneofs: Vec<String>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
    pub reserved: Vec<Reserved>,
    pub options: Vec<OptionDecl>,
}

impl MessageDef {
    pub fn field(&self, number: u32) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub full_name: String,
    pub values: Vec<EnumValue>,
    pub reserved: Vec<Reserved>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcDef {
    pub name: String,
    pub input: String,
    pub output: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub name: String,
    pub rpcs: Vec<RpcDef>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Message,
    Enum,
}

/// A parsed `.proto` file with all field types resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoFile {
    pub syntax: Syntax,
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub options: Vec<OptionDecl>,
    pub messages: Vec<MessageDef>,
    pub enums: Vec<EnumDef>,
    pub services: Vec<ServiceDef>,
}

impl ProtoFile {
    /// Parse `raw`; every import must be supplied by a reference named after
    /// its path or be one of the bundled `google/protobuf` files.
    pub fn parse(raw: &str, references: &[ResolvedReference]) -> Result<Self> {
        let mut file = parse_unresolved(raw)?;

        let mut index = HashMap::new();
        let mut loaded: HashMap<String, ()> = HashMap::new();
        let mut pending: Vec<String> = file.imports.iter().map(|i| i.path.clone()).collect();
        while let Some(path) = pending.pop() {
            if loaded.insert(path.clone(), ()).is_some() {
                continue;
            }
            let source = references
                .iter()
                .find(|r| r.reference.name == path)
                .map(|r| r.schema.as_str())
                .or_else(|| well_known(&path))
                .ok_or_else(|| parse_error(format!("import \"{}\" is not provided by any reference", path)))?;
            let imported = parse_unresolved(source)
                .map_err(|e| parse_error(format!("imported file \"{}\": {}", path, e)))?;
            index_file(&imported, &mut index);
            pending.extend(imported.imports.iter().map(|i| i.path.clone()));
        }
        index_file(&file, &mut index);

        for message in &mut file.messages {
            resolve_message(message, &index)?;
        }
        for service in &mut file.services {
            let scope = file.package.clone().unwrap_or_default();
            for rpc in &mut service.rpcs {
                rpc.input = resolve_name(&rpc.input, &scope, &index, TypeKind::Message)?;
                rpc.output = resolve_name(&rpc.output, &scope, &index, TypeKind::Message)?;
            }
        }
        Ok(file)
    }

    pub fn package(&self) -> &str {
        self.package.as_deref().unwrap_or("")
    }

    /// Strip this file's package from a fully-qualified name
    pub fn relative_name<'a>(&self, full_name: &'a str) -> &'a str {
        match &self.package {
            Some(pkg) => full_name
                .strip_prefix(pkg.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
                .unwrap_or(full_name),
            None => full_name,
        }
    }

    /// Deterministic source rendering: sorted imports and options, fields by
    /// number, nested definitions by name, fully-qualified type names.
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "syntax = \"{}\";", self.syntax.as_str());
        if let Some(pkg) = &self.package {
            let _ = writeln!(out, "package {};", pkg);
        }
        let mut imports: Vec<&Import> = self.imports.iter().collect();
        imports.sort_by(|a, b| a.path.cmp(&b.path));
        for import in imports {
            match &import.modifier {
                Some(m) => {
                    let _ = writeln!(out, "import {} {};", m, quote(&import.path));
                }
                None => {
                    let _ = writeln!(out, "import {};", quote(&import.path));
                }
            }
        }
        for option in sorted(&self.options) {
            let _ = writeln!(out, "option {} = {};", option.name, option.value);
        }
        let mut enums: Vec<&EnumDef> = self.enums.iter().collect();
        enums.sort_by(|a, b| a.name.cmp(&b.name));
        for e in enums {
            write_enum(e, 0, &mut out);
        }
        let mut messages: Vec<&MessageDef> = self.messages.iter().collect();
        messages.sort_by(|a, b| a.name.cmp(&b.name));
        for m in messages {
            write_message(m, 0, &mut out);
        }
        let mut services: Vec<&ServiceDef> = self.services.iter().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        for s in services {
            let _ = writeln!(out, "service {} {{", s.name);
            for option in sorted(&s.options) {
                let _ = writeln!(out, "  option {} = {};", option.name, option.value);
            }
            let mut rpcs: Vec<&RpcDef> = s.rpcs.iter().collect();
            rpcs.sort_by(|a, b| a.name.cmp(&b.name));
            for rpc in rpcs {
                let _ = writeln!(
                    out,
                    "  rpc {} ({}.{}) returns ({}.{});",
                    rpc.name,
                    if rpc.client_streaming { "stream " } else { "" },
                    rpc.input,
                    if rpc.server_streaming { "stream " } else { "" },
                    rpc.output
                );
            }
            out.push_str("}\n");
        }
        out
    }
}

fn parse_error(reason: impl Into<String>) -> RegistryError {
    RegistryError::parse(SchemaFormat::Protobuf, reason)
}

fn sorted(options: &[OptionDecl]) -> Vec<&OptionDecl> {
    let mut v: Vec<&OptionDecl> = options.iter().collect();
    v.sort();
    v
}

fn write_options_suffix(options: &[OptionDecl], out: &mut String) {
    if options.is_empty() {
        return;
    }
    let rendered: Vec<String> = sorted(options)
        .into_iter()
        .map(|o| format!("{} = {}", o.name, o.value))
        .collect();
    let _ = write!(out, " [{}]", rendered.join(", "));
}

fn write_reserved(reserved: &[Reserved], indent: &str, out: &mut String) {
    let mut ranges: Vec<&Reserved> = reserved.iter().filter(|r| matches!(r, Reserved::Range(..))).collect();
    let mut names: Vec<&Reserved> = reserved.iter().filter(|r| matches!(r, Reserved::Name(_))).collect();
    ranges.sort();
    names.sort();
    if !ranges.is_empty() {
        let parts: Vec<String> = ranges
            .into_iter()
            .map(|r| match r {
                Reserved::Range(a, b) if a == b => a.to_string(),
                Reserved::Range(a, b) if *b == MAX_FIELD_NUMBER => format!("{} to max", a),
                Reserved::Range(a, b) => format!("{} to {}", a, b),
                Reserved::Name(_) => String::new(),
            })
            .collect();
        let _ = writeln!(out, "{}reserved {};", indent, parts.join(", "));
    }
    if !names.is_empty() {
        let parts: Vec<String> = names
            .into_iter()
            .map(|r| match r {
                Reserved::Name(n) => quote(n),
                Reserved::Range(..) => String::new(),
            })
            .collect();
        let _ = writeln!(out, "{}reserved {};", indent, parts.join(", "));
    }
}

fn write_field(field: &FieldDef, indent: &str, out: &mut String) {
    let label = match field.label {
        _ if field.oneof.is_some() => "",
        Label::Implicit => "",
        Label::Optional => "optional ",
        Label::Required => "required ",
        Label::Repeated => "repeated ",
    };
    let _ = write!(out, "{}{}{} {} = {}", indent, label, field.ty.describe(), field.name, field.number);
    write_options_suffix(&field.options, out);
    out.push_str(";\n");
}

fn write_enum(e: &EnumDef, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let inner = "  ".repeat(depth + 1);
    let _ = writeln!(out, "{}enum {} {{", indent, e.name);
    for option in sorted(&e.options) {
        let _ = writeln!(out, "{}option {} = {};", inner, option.name, option.value);
    }
    write_reserved(&e.reserved, &inner, out);
    let mut values: Vec<&EnumValue> = e.values.iter().collect();
    values.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.name.cmp(&b.name)));
    for v in values {
        let _ = write!(out, "{}{} = {}", inner, v.name, v.number);
        write_options_suffix(&v.options, out);
        out.push_str(";\n");
    }
    let _ = writeln!(out, "{}}}", indent);
}

fn write_message(m: &MessageDef, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let inner = "  ".repeat(depth + 1);
    let _ = writeln!(out, "{}message {} {{", indent, m.name);
    for option in sorted(&m.options) {
        let _ = writeln!(out, "{}option {} = {};", inner, option.name, option.value);
    }
    write_reserved(&m.reserved, &inner, out);

    let mut plain: Vec<&FieldDef> = m.fields.iter().filter(|f| f.oneof.is_none()).collect();
    plain.sort_by_key(|f| f.number);
    for field in plain {
        write_field(field, &inner, out);
    }

    let mut oneofs: Vec<&String> = m.oneofs.iter().collect();
    oneofs.sort();
    let member_indent = "  ".repeat(depth + 2);
    for oneof in oneofs {
        let _ = writeln!(out, "{}oneof {} {{", inner, oneof);
        let mut members: Vec<&FieldDef> = m.fields.iter().filter(|f| f.oneof.as_deref() == Some(oneof)).collect();
        members.sort_by_key(|f| f.number);
        for field in members {
            write_field(field, &member_indent, out);
        }
        let _ = writeln!(out, "{}}}", inner);
    }

    let mut enums: Vec<&EnumDef> = m.enums.iter().collect();
    enums.sort_by(|a, b| a.name.cmp(&b.name));
    for e in enums {
        write_enum(e, depth + 1, out);
    }
    let mut nested: Vec<&MessageDef> = m.messages.iter().collect();
    nested.sort_by(|a, b| a.name.cmp(&b.name));
    for n in nested {
        write_message(n, depth + 1, out);
    }
    let _ = writeln!(out, "{}}}", indent);
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// Type resolution
// ---------------------------------------------------------------------------

fn index_file(file: &ProtoFile, index: &mut HashMap<String, TypeKind>) {
    fn walk(message: &MessageDef, index: &mut HashMap<String, TypeKind>) {
        index.insert(message.full_name.clone(), TypeKind::Message);
        for e in &message.enums {
            index.insert(e.full_name.clone(), TypeKind::Enum);
        }
        for nested in &message.messages {
            walk(nested, index);
        }
    }
    for e in &file.enums {
        index.insert(e.full_name.clone(), TypeKind::Enum);
    }
    for m in &file.messages {
        walk(m, index);
    }
}

fn lookup(name: &str, scope: &str, index: &HashMap<String, TypeKind>) -> Option<(String, TypeKind)> {
    if let Some(absolute) = name.strip_prefix('.') {
        return index.get(absolute).map(|k| (absolute.to_string(), *k));
    }
    let mut scope = scope.to_string();
    loop {
        let candidate = if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", scope, name)
        };
        if let Some(kind) = index.get(&candidate) {
            return Some((candidate, *kind));
        }
        if scope.is_empty() {
            return None;
        }
        match scope.rfind('.') {
            Some(idx) => scope.truncate(idx),
            None => scope.clear(),
        }
    }
}

fn resolve_name(name: &str, scope: &str, index: &HashMap<String, TypeKind>, expected: TypeKind) -> Result<String> {
    match lookup(name, scope, index) {
        Some((full, kind)) if kind == expected => Ok(full),
        Some((full, _)) => Err(parse_error(format!("'{}' is not a message type", full))),
        None => Err(parse_error(format!("unknown type '{}'", name))),
    }
}

fn resolve_type(ty: &mut FieldType, scope: &str, index: &HashMap<String, TypeKind>) -> Result<()> {
    match ty {
        FieldType::Unresolved(name) => {
            let (full, kind) = lookup(name, scope, index).ok_or_else(|| parse_error(format!("unknown type '{}'", name)))?;
            *ty = match kind {
                TypeKind::Message => FieldType::Message(full),
                TypeKind::Enum => FieldType::Enum(full),
            };
            Ok(())
        }
        FieldType::Map { value, .. } => resolve_type(value, scope, index),
        FieldType::Scalar(_) | FieldType::Message(_) | FieldType::Enum(_) => Ok(()),
    }
}

fn resolve_message(message: &mut MessageDef, index: &HashMap<String, TypeKind>) -> Result<()> {
    let scope = message.full_name.clone();
    for field in &mut message.fields {
        resolve_type(&mut field.ty, &scope, index)?;
    }
    for nested in &mut message.messages {
        resolve_message(nested, index)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(String),
    Float(String),
    Str(String),
    Symbol(char),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) | Token::Int(s) | Token::Float(s) => format!("'{}'", s),
            Token::Str(s) => quote(s),
            Token::Symbol(c) => format!("'{}'", c),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut line = 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
        } else if c.is_whitespace() {
            i += 1;
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            loop {
                if i >= chars.len() {
                    return Err(parse_error(format!("line {}: unterminated block comment", line)));
                }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    i += 2;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
        } else if c.is_ascii_alphabetic() || c == '_' || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_alphabetic() || *n == '_')) {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push((Token::Ident(chars[start..i].iter().collect()), line));
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) {
            let start = i;
            let mut is_float = false;
            if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
            } else {
                while i < chars.len() {
                    let d = chars[i];
                    if d.is_ascii_digit() {
                        i += 1;
                    } else if d == '.' {
                        is_float = true;
                        i += 1;
                    } else if d == 'e' || d == 'E' {
                        is_float = true;
                        i += 1;
                        if matches!(chars.get(i), Some('+') | Some('-')) {
                            i += 1;
                        }
                    } else {
                        break;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push((if is_float { Token::Float(text) } else { Token::Int(text) }, line));
        } else if c == '"' || c == '\'' {
            let quote_char = c;
            i += 1;
            let mut value = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err(parse_error(format!("line {}: unterminated string", line)));
                };
                i += 1;
                if ch == quote_char {
                    break;
                }
                if ch == '\n' {
                    return Err(parse_error(format!("line {}: newline in string literal", line)));
                }
                if ch != '\\' {
                    value.push(ch);
                    continue;
                }
                let Some(&esc) = chars.get(i) else {
                    return Err(parse_error(format!("line {}: unterminated string", line)));
                };
                i += 1;
                match esc {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    '0'..='7' => {
                        let mut code = esc.to_digit(8).unwrap_or(0);
                        for _ in 0..2 {
                            match chars.get(i).and_then(|d| d.to_digit(8)) {
                                Some(d) => {
                                    code = code * 8 + d;
                                    i += 1;
                                }
                                None => break,
                            }
                        }
                        value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    'x' | 'X' => {
                        let mut code = 0;
                        let mut digits = 0;
                        while digits < 2 {
                            match chars.get(i).and_then(|d| d.to_digit(16)) {
                                Some(d) => {
                                    code = code * 16 + d;
                                    i += 1;
                                    digits += 1;
                                }
                                None => break,
                            }
                        }
                        value.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => value.push(other),
                }
            }
            tokens.push((Token::Str(value), line));
        } else if "{}[]()<>;=,:-+".contains(c) {
            tokens.push((Token::Symbol(c), line));
            i += 1;
        } else {
            return Err(parse_error(format!("line {}: unexpected character '{}'", line, c)));
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    syntax: Syntax,
}

fn parse_unresolved(src: &str) -> Result<ProtoFile> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
        syntax: Syntax::Proto2,
    };
    parser.parse_file()
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, l)| *l)
            .unwrap_or(1)
    }

    fn error(&self, message: impl AsRef<str>) -> RegistryError {
        parse_error(format!("line {}: {}", self.line(), message.as_ref()))
    }

    fn next(&mut self) -> Result<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn is_symbol(&self, c: char) -> bool {
        self.peek() == Some(&Token::Symbol(c))
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<()> {
        match self.next()? {
            Token::Symbol(s) if s == c => Ok(()),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected '{}', found {}", c, other.describe())))
            }
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected identifier, found {}", other.describe())))
            }
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        let ident = self.expect_ident()?;
        if ident == keyword {
            Ok(())
        } else {
            self.pos -= 1;
            Err(self.error(format!("expected '{}', found '{}'", keyword, ident)))
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        let mut value = match self.next()? {
            Token::Str(s) => s,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("expected string, found {}", other.describe())));
            }
        };
        while let Some(Token::Str(next)) = self.peek() {
            value.push_str(next);
            self.pos += 1;
        }
        Ok(value)
    }

    fn parse_int(&mut self) -> Result<i64> {
        let negative = self.eat_symbol('-');
        let text = match self.next()? {
            Token::Int(s) => s,
            other => {
                self.pos -= 1;
                return Err(self.error(format!("expected integer, found {}", other.describe())));
            }
        };
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16)
        } else if text.len() > 1 && text.starts_with('0') {
            i64::from_str_radix(&text[1..], 8)
        } else {
            text.parse::<i64>()
        }
        .map_err(|_| self.error(format!("invalid integer '{}'", text)))?;
        Ok(if negative { -parsed } else { parsed })
    }

    fn parse_field_number(&mut self) -> Result<u32> {
        let n = self.parse_int()?;
        if n < 1 || n > i64::from(MAX_FIELD_NUMBER) {
            return Err(self.error(format!("field number {} out of range", n)));
        }
        Ok(n as u32)
    }

    fn parse_file(&mut self) -> Result<ProtoFile> {
        let mut file = ProtoFile {
            syntax: Syntax::Proto2,
            package: None,
            imports: Vec::new(),
            options: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
        };
        if matches!(self.peek(), Some(Token::Ident(s)) if s == "syntax") {
            self.pos += 1;
            self.expect_symbol('=')?;
            let syntax = self.expect_string()?;
            file.syntax = match syntax.as_str() {
                "proto2" => Syntax::Proto2,
                "proto3" => Syntax::Proto3,
                other => return Err(self.error(format!("unsupported syntax \"{}\"", other))),
            };
            self.expect_symbol(';')?;
        }
        self.syntax = file.syntax;

        while self.peek().is_some() {
            if self.eat_symbol(';') {
                continue;
            }
            let keyword = self.expect_ident()?;
            match keyword.as_str() {
                "package" => {
                    if file.package.is_some() {
                        return Err(self.error("multiple package declarations"));
                    }
                    let name = self.expect_ident()?;
                    self.expect_symbol(';')?;
                    file.package = Some(name);
                }
                "import" => {
                    let modifier = match self.peek() {
                        Some(Token::Ident(m)) if m == "public" || m == "weak" => {
                            let m = m.clone();
                            self.pos += 1;
                            Some(m)
                        }
                        _ => None,
                    };
                    let path = self.expect_string()?;
                    self.expect_symbol(';')?;
                    file.imports.push(Import { path, modifier });
                }
                "option" => file.options.push(self.parse_option_statement()?),
                "message" => {
                    let scope = file.package.clone().unwrap_or_default();
                    file.messages.push(self.parse_message(&scope)?);
                }
                "enum" => {
                    let scope = file.package.clone().unwrap_or_default();
                    file.enums.push(self.parse_enum(&scope)?);
                }
                "service" => file.services.push(self.parse_service()?),
                "extend" => self.skip_extend()?,
                "syntax" => return Err(self.error("syntax must be the first statement")),
                "edition" => return Err(self.error("editions are not supported")),
                other => return Err(self.error(format!("unexpected '{}' at top level", other))),
            }
        }
        Ok(file)
    }

    fn parse_option_name(&mut self) -> Result<String> {
        let mut name = String::new();
        if self.eat_symbol('(') {
            let inner = self.expect_ident()?;
            self.expect_symbol(')')?;
            name.push('(');
            name.push_str(&inner);
            name.push(')');
            if let Some(Token::Ident(rest)) = self.peek() {
                if rest.starts_with('.') {
                    name.push_str(rest);
                    self.pos += 1;
                }
            }
        } else {
            name = self.expect_ident()?;
        }
        Ok(name)
    }

    fn parse_constant(&mut self) -> Result<String> {
        match self.next()? {
            Token::Str(s) => {
                let mut value = s;
                while let Some(Token::Str(next)) = self.peek() {
                    value.push_str(next);
                    self.pos += 1;
                }
                Ok(quote(&value))
            }
            Token::Symbol('-') => Ok(format!("-{}", self.parse_constant()?)),
            Token::Symbol('+') => self.parse_constant(),
            Token::Int(s) | Token::Float(s) | Token::Ident(s) => Ok(s),
            Token::Symbol('{') => {
                let mut depth = 1;
                let mut parts = Vec::new();
                while depth > 0 {
                    let token = self.next()?;
                    match &token {
                        Token::Symbol('{') => depth += 1,
                        Token::Symbol('}') => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        parts.push(match token {
                            Token::Str(s) => quote(&s),
                            Token::Ident(s) | Token::Int(s) | Token::Float(s) => s,
                            Token::Symbol(c) => c.to_string(),
                        });
                    }
                }
                Ok(format!("{{ {} }}", parts.join(" ")))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected constant, found {}", other.describe())))
            }
        }
    }

    fn parse_option_statement(&mut self) -> Result<OptionDecl> {
        let name = self.parse_option_name()?;
        self.expect_symbol('=')?;
        let value = self.parse_constant()?;
        self.expect_symbol(';')?;
        Ok(OptionDecl { name, value })
    }

    fn parse_bracket_options(&mut self) -> Result<Vec<OptionDecl>> {
        let mut options = Vec::new();
        if !self.eat_symbol('[') {
            return Ok(options);
        }
        loop {
            let name = self.parse_option_name()?;
            self.expect_symbol('=')?;
            let value = self.parse_constant()?;
            options.push(OptionDecl { name, value });
            if self.eat_symbol(']') {
                break;
            }
            self.expect_symbol(',')?;
        }
        Ok(options)
    }

    fn parse_reserved(&mut self) -> Result<Vec<Reserved>> {
        let mut reserved = Vec::new();
        loop {
            if let Some(Token::Str(_)) = self.peek() {
                reserved.push(Reserved::Name(self.expect_string()?));
            } else if let Some(Token::Ident(_)) = self.peek() {
                // editions-style bare identifiers
                reserved.push(Reserved::Name(self.expect_ident()?));
            } else {
                let start = self.parse_int()?;
                let end = if matches!(self.peek(), Some(Token::Ident(s)) if s == "to") {
                    self.pos += 1;
                    if matches!(self.peek(), Some(Token::Ident(s)) if s == "max") {
                        self.pos += 1;
                        i64::from(MAX_FIELD_NUMBER)
                    } else {
                        self.parse_int()?
                    }
                } else {
                    start
                };
                if start < 0 || end < start {
                    return Err(self.error(format!("invalid reserved range {} to {}", start, end)));
                }
                reserved.push(Reserved::Range(start as u32, end.min(i64::from(u32::MAX)) as u32));
            }
            if self.eat_symbol(';') {
                return Ok(reserved);
            }
            self.expect_symbol(',')?;
        }
    }

    fn skip_statement(&mut self) -> Result<()> {
        while !self.eat_symbol(';') {
            self.next()?;
        }
        Ok(())
    }

    fn skip_block(&mut self) -> Result<()> {
        self.expect_symbol('{')?;
        let mut depth = 1;
        while depth > 0 {
            match self.next()? {
                Token::Symbol('{') => depth += 1,
                Token::Symbol('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn skip_extend(&mut self) -> Result<()> {
        self.expect_ident()?;
        self.skip_block()
    }

    fn parse_message(&mut self, scope: &str) -> Result<MessageDef> {
        let name = self.expect_ident()?;
        if name.contains('.') {
            return Err(self.error(format!("invalid message name '{}'", name)));
        }
        let full_name = qualify(scope, &name);
        let mut message = MessageDef {
            name,
            full_name,
            fields: Vec::new(),
            oneofs: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
            reserved: Vec::new(),
            options: Vec::new(),
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.eat_symbol(';') {
                continue;
            }
            let word = self.expect_ident()?;
            match word.as_str() {
                "message" => {
                    let nested = self.parse_message(&message.full_name)?;
                    message.messages.push(nested);
                }
                "enum" => {
                    let nested = self.parse_enum(&message.full_name)?;
                    message.enums.push(nested);
                }
                "option" => message.options.push(self.parse_option_statement()?),
                "reserved" => {
                    let reserved = self.parse_reserved()?;
                    message.reserved.extend(reserved);
                }
                "extensions" => self.skip_statement()?,
                "extend" => self.skip_extend()?,
                "oneof" => {
                    let oneof = self.expect_ident()?;
                    self.expect_symbol('{')?;
                    while !self.eat_symbol('}') {
                        if self.eat_symbol(';') {
                            continue;
                        }
                        let word = self.expect_ident()?;
                        if word == "option" {
                            self.parse_option_statement()?;
                            continue;
                        }
                        let field = self.parse_field(Label::Optional, word, Some(oneof.clone()))?;
                        message.fields.push(field);
                    }
                    message.oneofs.push(oneof);
                }
                "optional" | "required" | "repeated" => {
                    let label = match word.as_str() {
                        "required" => {
                            if self.syntax == Syntax::Proto3 {
                                return Err(self.error("required fields are not allowed in proto3"));
                            }
                            Label::Required
                        }
                        "repeated" => Label::Repeated,
                        _ => Label::Optional,
                    };
                    let ty = self.expect_ident()?;
                    let field = self.parse_field(label, ty, None)?;
                    message.fields.push(field);
                }
                _ => {
                    let label = match self.syntax {
                        Syntax::Proto3 => Label::Implicit,
                        Syntax::Proto2 => Label::Optional,
                    };
                    let field = self.parse_field(label, word, None)?;
                    message.fields.push(field);
                }
            }
        }
        let mut seen = HashMap::new();
        for field in &message.fields {
            if let Some(previous) = seen.insert(field.number, field.name.clone()) {
                return Err(parse_error(format!(
                    "message '{}': fields '{}' and '{}' share number {}",
                    message.full_name, previous, field.name, field.number
                )));
            }
        }
        Ok(message)
    }

    fn parse_field(&mut self, label: Label, type_word: String, oneof: Option<String>) -> Result<FieldDef> {
        if type_word == "group" {
            return Err(self.error("groups are not supported"));
        }
        let ty = if type_word == "map" && self.is_symbol('<') {
            self.expect_symbol('<')?;
            let key_word = self.expect_ident()?;
            let key = ScalarType::from_keyword(&key_word)
                .filter(|k| !matches!(k, ScalarType::Double | ScalarType::Float | ScalarType::Bytes))
                .ok_or_else(|| self.error(format!("invalid map key type '{}'", key_word)))?;
            self.expect_symbol(',')?;
            let value_word = self.expect_ident()?;
            self.expect_symbol('>')?;
            if label != Label::Implicit && label != Label::Optional || oneof.is_some() {
                return Err(self.error("map fields cannot carry a label or live in a oneof"));
            }
            FieldType::Map {
                key,
                value: Box::new(scalar_or_named(&value_word)),
            }
        } else {
            scalar_or_named(&type_word)
        };
        let name = self.expect_ident()?;
        self.expect_symbol('=')?;
        let number = self.parse_field_number()?;
        let options = self.parse_bracket_options()?;
        self.expect_symbol(';')?;
        let label = if matches!(ty, FieldType::Map { .. }) { Label::Repeated } else { label };
        Ok(FieldDef {
            name,
            number,
            label,
            ty,
            oneof,
            options,
        })
    }

    fn parse_enum(&mut self, scope: &str) -> Result<EnumDef> {
        let name = self.expect_ident()?;
        let full_name = qualify(scope, &name);
        let mut def = EnumDef {
            name,
            full_name,
            values: Vec::new(),
            reserved: Vec::new(),
            options: Vec::new(),
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.eat_symbol(';') {
                continue;
            }
            let word = self.expect_ident()?;
            match word.as_str() {
                "option" => def.options.push(self.parse_option_statement()?),
                "reserved" => {
                    let reserved = self.parse_reserved()?;
                    def.reserved.extend(reserved);
                }
                _ => {
                    self.expect_symbol('=')?;
                    let number = self.parse_int()?;
                    let number = i32::try_from(number).map_err(|_| self.error(format!("enum value {} out of range", number)))?;
                    let options = self.parse_bracket_options()?;
                    self.expect_symbol(';')?;
                    def.values.push(EnumValue {
                        name: word,
                        number,
                        options,
                    });
                }
            }
        }
        if def.values.is_empty() {
            return Err(parse_error(format!("enum '{}' has no values", def.full_name)));
        }
        if self.syntax == Syntax::Proto3 && def.values[0].number != 0 {
            return Err(parse_error(format!("enum '{}': the first value must be zero in proto3", def.full_name)));
        }
        Ok(def)
    }

    fn parse_service(&mut self) -> Result<ServiceDef> {
        let name = self.expect_ident()?;
        let mut service = ServiceDef {
            name,
            rpcs: Vec::new(),
            options: Vec::new(),
        };
        self.expect_symbol('{')?;
        while !self.eat_symbol('}') {
            if self.eat_symbol(';') {
                continue;
            }
            let word = self.expect_ident()?;
            match word.as_str() {
                "option" => service.options.push(self.parse_option_statement()?),
                "rpc" => {
                    let name = self.expect_ident()?;
                    let (client_streaming, input) = self.parse_rpc_type()?;
                    self.expect_keyword("returns")?;
                    let (server_streaming, output) = self.parse_rpc_type()?;
                    if self.is_symbol('{') {
                        self.skip_block()?;
                    } else {
                        self.expect_symbol(';')?;
                    }
                    service.rpcs.push(RpcDef {
                        name,
                        input,
                        output,
                        client_streaming,
                        server_streaming,
                    });
                }
                other => return Err(self.error(format!("unexpected '{}' in service", other))),
            }
        }
        Ok(service)
    }

    fn parse_rpc_type(&mut self) -> Result<(bool, String)> {
        self.expect_symbol('(')?;
        let mut ident = self.expect_ident()?;
        let mut streaming = false;
        if ident == "stream" {
            if let Some(Token::Ident(_)) = self.peek() {
                streaming = true;
                ident = self.expect_ident()?;
            }
        }
        self.expect_symbol(')')?;
        Ok((streaming, ident))
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn scalar_or_named(word: &str) -> FieldType {
    match ScalarType::from_keyword(word) {
        Some(scalar) => FieldType::Scalar(scalar),
        None => FieldType::Unresolved(word.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Bundled well-known types
// ---------------------------------------------------------------------------

fn well_known(path: &str) -> Option<&'static str> {
    Some(match path {
        "google/protobuf/any.proto" => {
            "syntax = \"proto3\"; package google.protobuf; message Any { string type_url = 1; bytes value = 2; }"
        }
        "google/protobuf/timestamp.proto" => {
            "syntax = \"proto3\"; package google.protobuf; message Timestamp { int64 seconds = 1; int32 nanos = 2; }"
        }
        "google/protobuf/duration.proto" => {
            "syntax = \"proto3\"; package google.protobuf; message Duration { int64 seconds = 1; int32 nanos = 2; }"
        }
        "google/protobuf/empty.proto" => "syntax = \"proto3\"; package google.protobuf; message Empty {}",
        "google/protobuf/field_mask.proto" => {
            "syntax = \"proto3\"; package google.protobuf; message FieldMask { repeated string paths = 1; }"
        }
        "google/protobuf/wrappers.proto" => {
            "syntax = \"proto3\"; package google.protobuf;
             message DoubleValue { double value = 1; }
             message FloatValue { float value = 1; }
             message Int64Value { int64 value = 1; }
             message UInt64Value { uint64 value = 1; }
             message Int32Value { int32 value = 1; }
             message UInt32Value { uint32 value = 1; }
             message BoolValue { bool value = 1; }
             message StringValue { string value = 1; }
             message BytesValue { bytes value = 1; }"
        }
        "google/protobuf/struct.proto" => {
            "syntax = \"proto3\"; package google.protobuf;
             message Struct { map<string, Value> fields = 1; }
             message Value {
               oneof kind {
                 NullValue null_value = 1;
                 double number_value = 2;
                 string string_value = 3;
                 bool bool_value = 4;
                 Struct struct_value = 5;
                 ListValue list_value = 6;
               }
             }
             message ListValue { repeated Value values = 1; }
             enum NullValue { NULL_VALUE = 0; }"
        }
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaReference;

    fn parse(src: &str) -> ProtoFile {
        ProtoFile::parse(src, &[]).unwrap()
    }

    #[test]
    fn test_parses_messages_enums_and_services() {
        let file = parse(
            r#"
            syntax = "proto3";
            package com.acme.orders;
            option java_package = "com.acme.orders";

            // An order
            message Order {
              string id = 1;
              repeated LineItem items = 2;
              Status status = 3;
              map<string, string> labels = 4;
              oneof payment {
                string card = 5;
                string iban = 6;
              }
              message LineItem {
                string sku = 1;
                int32 quantity = 2 [deprecated = true];
              }
              enum Status {
                STATUS_UNKNOWN = 0;
                STATUS_OPEN = 1;
              }
              reserved 10 to 12, 20;
              reserved "legacy";
            }

            service Orders {
              rpc Get (Order) returns (Order);
              rpc Watch (Order) returns (stream Order) {}
            }
            "#,
        );
        assert_eq!(file.syntax, Syntax::Proto3);
        assert_eq!(file.package(), "com.acme.orders");
        let order = &file.messages[0];
        assert_eq!(order.full_name, "com.acme.orders.Order");
        assert_eq!(
            order.field(2).unwrap().ty,
            FieldType::Message("com.acme.orders.Order.LineItem".into())
        );
        assert_eq!(order.field(3).unwrap().ty, FieldType::Enum("com.acme.orders.Order.Status".into()));
        assert_eq!(order.field(4).unwrap().label, Label::Repeated);
        assert_eq!(order.field(6).unwrap().oneof.as_deref(), Some("payment"));
        assert!(file.services[0].rpcs[1].server_streaming);
        assert_eq!(file.services[0].rpcs[0].input, "com.acme.orders.Order");
    }

    #[test]
    fn test_canonical_form_ignores_declaration_order_and_comments() {
        let a = parse(
            r#"syntax = "proto3";
               message B { int32 y = 2; string x = 1; }
               message A { B b = 1; }"#,
        );
        let b = parse(
            r#"syntax = "proto3";
               /* reordered */
               message A {
                 B b = 1;
               }
               message B {
                 string x = 1;   // first
                 int32 y = 2;
               }"#,
        );
        assert_eq!(a.canonical_form(), b.canonical_form());
        assert_eq!(
            a.canonical_form(),
            "syntax = \"proto3\";\nmessage A {\n  .B b = 1;\n}\nmessage B {\n  string x = 1;\n  int32 y = 2;\n}\n"
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = ProtoFile::parse("syntax = \"proto3\"; message A { Missing m = 1; }", &[]).unwrap_err();
        assert!(err.to_string().contains("unknown type 'Missing'"));
    }

    #[test]
    fn test_syntax_errors_carry_line_numbers() {
        let err = ProtoFile::parse("syntax = \"proto3\";\nmessage A {\n  string x = ;\n}", &[]).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{}", err);
    }

    #[test]
    fn test_duplicate_field_numbers_are_rejected() {
        assert!(ProtoFile::parse("syntax = \"proto3\"; message A { string a = 1; string b = 1; }", &[]).is_err());
    }

    #[test]
    fn test_well_known_imports_resolve() {
        let file = parse(
            r#"syntax = "proto3";
               import "google/protobuf/timestamp.proto";
               message Event { google.protobuf.Timestamp at = 1; }"#,
        );
        assert_eq!(
            file.messages[0].fields[0].ty,
            FieldType::Message("google.protobuf.Timestamp".into())
        );
    }

    #[test]
    fn test_imports_resolve_through_references() {
        let customer = "syntax = \"proto3\"; package acme; message Customer { string id = 1; }";
        let refs = vec![ResolvedReference {
            reference: SchemaReference::new("customer.proto", "customer-value", 1),
            schema: customer.to_string(),
        }];
        let file = ProtoFile::parse(
            "syntax = \"proto3\"; package acme; import \"customer.proto\"; message Order { Customer c = 1; }",
            &refs,
        )
        .unwrap();
        assert_eq!(file.messages[0].fields[0].ty, FieldType::Message("acme.Customer".into()));

        let err = ProtoFile::parse("syntax = \"proto3\"; import \"missing.proto\";", &[]).unwrap_err();
        assert!(err.to_string().contains("missing.proto"));
    }

    #[test]
    fn test_proto2_labels() {
        let file = parse("syntax = \"proto2\"; message A { required int32 id = 1; optional string n = 2 [default = \"x\"]; }");
        assert_eq!(file.messages[0].fields[0].label, Label::Required);
        assert_eq!(file.messages[0].fields[1].options[0].value, "\"x\"");
        assert!(ProtoFile::parse("syntax = \"proto3\"; message A { required int32 id = 1; }", &[]).is_err());
    }
}
