//! Schema types and structures

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextName;
use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;

/// Format of a schema document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    /// Apache Avro (`.avsc` JSON)
    #[default]
    Avro,
    /// Protocol Buffers (`.proto` source)
    Protobuf,
    /// JSON Schema
    Json,
}

impl SchemaFormat {
    /// All supported formats
    pub const ALL: [SchemaFormat; 3] = [SchemaFormat::Avro, SchemaFormat::Protobuf, SchemaFormat::Json];

    /// The wire tag for this format
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Protobuf => "PROTOBUF",
            SchemaFormat::Json => "JSON",
        }
    }

    /// Parse a format tag; an empty tag means Avro
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "" | "AVRO" => Ok(SchemaFormat::Avro),
            "PROTOBUF" => Ok(SchemaFormat::Protobuf),
            "JSON" => Ok(SchemaFormat::Json),
            _ => Err(RegistryError::UnsupportedSchemaType(tag.to_string())),
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s)
    }
}

/// Schema identifier, unique within its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub u32);

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference from one schema to a version registered under another subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaReference {
    /// Name the referencing schema uses (Avro full name, proto import path, JSON `$ref`)
    pub name: String,
    /// Subject holding the referenced schema
    pub subject: String,
    /// Version of the referenced subject
    pub version: u32,
}

impl SchemaReference {
    pub fn new(name: impl Into<String>, subject: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            version,
        }
    }
}

/// A reference whose target schema text has been loaded
#[derive(Debug, Clone)]
pub struct ResolvedReference {
    pub reference: SchemaReference,
    pub schema: String,
}

/// Parsed content waiting for an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDraft {
    pub format: SchemaFormat,
    /// Raw definition as submitted
    pub schema: String,
    pub canonical: String,
    pub fingerprint: Fingerprint,
    pub references: Vec<SchemaReference>,
}

/// An immutable, content-addressed schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub id: SchemaId,
    pub format: SchemaFormat,
    pub schema: String,
    pub canonical: String,
    pub fingerprint: Fingerprint,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    pub created_at: DateTime<Utc>,
}

impl SchemaRecord {
    pub fn from_draft(id: SchemaId, draft: &SchemaDraft) -> Self {
        Self {
            id,
            format: draft.format,
            schema: draft.schema.clone(),
            canonical: draft.canonical.clone(),
            fingerprint: draft.fingerprint.clone(),
            references: draft.references.clone(),
            created_at: Utc::now(),
        }
    }
}

/// One entry of a subject's version chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectVersion {
    pub subject: String,
    pub version: u32,
    pub schema_id: SchemaId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
}

/// A schema as seen through a (context, subject, version) coordinate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredSchema {
    pub context: ContextName,
    pub subject: String,
    pub version: u32,
    pub id: SchemaId,
    pub format: SchemaFormat,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<SchemaReference>,
    #[serde(default)]
    pub deleted: bool,
}

impl RegisteredSchema {
    pub(crate) fn new(context: &ContextName, version: &SubjectVersion, record: &SchemaRecord) -> Self {
        Self {
            context: context.clone(),
            subject: version.subject.clone(),
            version: version.version,
            id: record.id,
            format: record.format,
            schema: record.schema.clone(),
            references: record.references.clone(),
            deleted: version.deleted,
        }
    }

    /// The subject in `:.ctx:subject` form (plain for the default context)
    pub fn qualified_subject(&self) -> String {
        self.context.qualify(&self.subject)
    }
}

/// Selects a version of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionSelector {
    /// The most recent non-deleted version
    Latest,
    /// An explicit version number
    Number(u32),
    /// Every non-deleted version (compatibility checks only)
    All,
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Number(n) => write!(f, "{}", n),
            VersionSelector::All => f.write_str("all"),
        }
    }
}

impl FromStr for VersionSelector {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "latest" | "-1" => Ok(VersionSelector::Latest),
            "" | "all" => Ok(VersionSelector::All),
            other => match other.parse::<u32>() {
                Ok(n) if n > 0 => Ok(VersionSelector::Number(n)),
                _ => Err(RegistryError::InvalidVersion(other.to_string())),
            },
        }
    }
}
