//! Schema compatibility checking
//!
//! Each format implements [`FormatCompatibilityRule`], a directional primitive
//! answering whether data written with one schema can be read with another.
//! [`CompatibilityChecker`] applies it across a subject's chain according to a
//! [`CompatibilityMode`].

pub mod avro;
pub mod json_schema;
pub mod protobuf;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::format::ParsedSchema;
use crate::schema::SchemaFormat;

pub use avro::AvroRule;
pub use json_schema::JsonSchemaRule;
pub use protobuf::ProtobufRule;

/// Evolution policy applied when a new version is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    None,
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityMode {
    pub const ALL: [CompatibilityMode; 7] = [
        CompatibilityMode::None,
        CompatibilityMode::Backward,
        CompatibilityMode::BackwardTransitive,
        CompatibilityMode::Forward,
        CompatibilityMode::ForwardTransitive,
        CompatibilityMode::Full,
        CompatibilityMode::FullTransitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Check against every prior version rather than only the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive | CompatibilityMode::ForwardTransitive | CompatibilityMode::FullTransitive
        )
    }

    pub fn requires_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    pub fn requires_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == upper)
            .ok_or_else(|| RegistryError::InvalidCompatibilityLevel(s.to_string()))
    }
}

/// Which reader/writer pairing a comparison exercised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// The candidate reads data written with the prior version
    Backward,
    /// The prior version reads data written with the candidate
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Backward => "BACKWARD",
            Direction::Forward => "FORWARD",
        })
    }
}

/// A detected change between two schemas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Type of change
    pub change_type: ChangeType,
    /// Path to the changed element (e.g., "root", "address.city", "Order.items")
    pub path: String,
    /// Old value (if applicable)
    pub old_value: Option<String>,
    /// New value (if applicable)
    pub new_value: Option<String>,
    /// Whether the reader fails on data produced by the writer
    pub is_breaking: bool,
    /// Human-readable description
    pub description: String,
}

impl SchemaChange {
    pub fn breaking(change_type: ChangeType, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            change_type,
            path: path.into(),
            old_value: None,
            new_value: None,
            is_breaking: true,
            description: description.into(),
        }
    }

    pub fn compatible(change_type: ChangeType, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            is_breaking: false,
            ..Self::breaking(change_type, path, description)
        }
    }

    pub fn with_values(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.old_value = Some(old.into());
        self.new_value = Some(new.into());
        self
    }
}

/// Kind of schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A field or property exists only in the reader
    FieldAdded,
    /// A field or property exists only in the writer
    FieldRemoved,
    /// A field's type changed
    TypeChanged,
    /// A named type's name or package changed
    NameChanged,
    /// A field's optionality changed (required <-> optional)
    OptionalityChanged,
    /// Default value missing or changed
    DefaultChanged,
    /// Enum variant added
    EnumVariantAdded,
    /// Enum variant removed
    EnumVariantRemoved,
    /// A message or definition was removed
    DefinitionRemoved,
    /// A validation constraint was tightened or relaxed
    ConstraintChanged,
    /// Schema format changed
    FormatChanged,
    /// Other change
    Other,
}

/// Directional compatibility primitive, implemented once per schema format
pub trait FormatCompatibilityRule: Send + Sync {
    fn format(&self) -> SchemaFormat;

    /// Changes observed when data written with `writer` is decoded with `reader`.
    ///
    /// Breaking changes make the pair incompatible; the rest are informational.
    fn reader_can_read(&self, reader: &ParsedSchema, writer: &ParsedSchema) -> Vec<SchemaChange>;
}

/// One reader/writer comparison against a registered version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub version: u32,
    pub direction: Direction,
    pub is_compatible: bool,
    pub changes: Vec<SchemaChange>,
}

/// Result of checking a candidate against a subject's chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub mode: CompatibilityMode,
    pub is_compatible: bool,
    pub comparisons: Vec<Comparison>,
}

impl CompatibilityReport {
    /// Create a compatible report with no comparisons
    pub fn compatible(mode: CompatibilityMode) -> Self {
        Self {
            mode,
            is_compatible: true,
            comparisons: Vec::new(),
        }
    }

    /// Versions whose comparison failed, in check order and without duplicates
    pub fn violated_versions(&self) -> Vec<u32> {
        let mut versions = Vec::new();
        for comparison in self.comparisons.iter().filter(|c| !c.is_compatible) {
            if !versions.contains(&comparison.version) {
                versions.push(comparison.version);
            }
        }
        versions
    }

    /// One line per breaking change
    pub fn messages(&self) -> Vec<String> {
        self.comparisons
            .iter()
            .flat_map(|comparison| {
                comparison.changes.iter().filter(|c| c.is_breaking).map(move |change| {
                    format!(
                        "{} compatibility check failed against version {}: {}",
                        comparison.direction, comparison.version, change.description
                    )
                })
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        if self.is_compatible {
            let noted: usize = self.comparisons.iter().map(|c| c.changes.len()).sum();
            return if noted == 0 {
                "compatible".to_string()
            } else {
                format!("compatible ({} non-breaking changes)", noted)
            };
        }
        self.messages().join("; ")
    }
}

/// Applies a [`CompatibilityMode`] across prior versions using the rule for each format
pub struct CompatibilityChecker {
    avro: AvroRule,
    protobuf: ProtobufRule,
    json: JsonSchemaRule,
}

impl Default for CompatibilityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl CompatibilityChecker {
    pub fn new() -> Self {
        Self {
            avro: AvroRule,
            protobuf: ProtobufRule,
            json: JsonSchemaRule,
        }
    }

    pub fn rule(&self, format: SchemaFormat) -> &dyn FormatCompatibilityRule {
        match format {
            SchemaFormat::Avro => &self.avro,
            SchemaFormat::Protobuf => &self.protobuf,
            SchemaFormat::Json => &self.json,
        }
    }

    /// Check `candidate` against `chain` (non-deleted versions, oldest first).
    ///
    /// Non-transitive modes only compare with the last entry.
    pub fn check(&self, mode: CompatibilityMode, candidate: &ParsedSchema, chain: &[(u32, ParsedSchema)]) -> CompatibilityReport {
        if mode == CompatibilityMode::None || chain.is_empty() {
            return CompatibilityReport::compatible(mode);
        }
        let targets = if mode.is_transitive() {
            chain
        } else {
            &chain[chain.len() - 1..]
        };
        self.check_each(mode, candidate, targets)
    }

    /// Check `candidate` against every entry of `targets` in the directions `mode` requires
    pub fn check_each(
        &self,
        mode: CompatibilityMode,
        candidate: &ParsedSchema,
        targets: &[(u32, ParsedSchema)],
    ) -> CompatibilityReport {
        let mut report = CompatibilityReport::compatible(mode);
        if mode == CompatibilityMode::None {
            return report;
        }
        for (version, existing) in targets {
            if mode.requires_backward() {
                report
                    .comparisons
                    .push(self.compare(*version, Direction::Backward, candidate, existing));
            }
            if mode.requires_forward() {
                report
                    .comparisons
                    .push(self.compare(*version, Direction::Forward, existing, candidate));
            }
        }
        report.is_compatible = report.comparisons.iter().all(|c| c.is_compatible);
        report
    }

    fn compare(&self, version: u32, direction: Direction, reader: &ParsedSchema, writer: &ParsedSchema) -> Comparison {
        let changes = if reader.format() != writer.format() {
            vec![SchemaChange::breaking(
                ChangeType::FormatChanged,
                "root",
                format!("schema type changed from {} to {}", writer.format(), reader.format()),
            )
            .with_values(writer.format().as_str(), reader.format().as_str())]
        } else {
            self.rule(reader.format()).reader_can_read(reader, writer)
        };
        Comparison {
            version,
            direction,
            is_compatible: changes.iter().all(|c| !c.is_breaking),
            changes,
        }
    }
}

pub(crate) fn path_or_root(path: &str) -> &str {
    if path.is_empty() {
        "root"
    } else {
        path
    }
}

pub(crate) fn join_path(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", base, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;

    fn avro(raw: &str) -> ParsedSchema {
        format::parse(SchemaFormat::Avro, raw, &[]).unwrap()
    }

    const V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"}]}"#;
    const V2: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":"string","default":""}]}"#;
    const V3: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":"string","default":""},{"name":"total","type":"double"}]}"#;

    #[test]
    fn test_mode_parsing() {
        for mode in CompatibilityMode::ALL {
            assert_eq!(mode.as_str().parse::<CompatibilityMode>().unwrap(), mode);
        }
        assert_eq!("full_transitive".parse::<CompatibilityMode>().unwrap(), CompatibilityMode::FullTransitive);
        assert!(matches!(
            "SIDEWAYS".parse::<CompatibilityMode>(),
            Err(RegistryError::InvalidCompatibilityLevel(_))
        ));
        assert_eq!(serde_json::to_string(&CompatibilityMode::BackwardTransitive).unwrap(), "\"BACKWARD_TRANSITIVE\"");
    }

    #[test]
    fn test_mode_directions() {
        assert!(CompatibilityMode::Full.requires_backward() && CompatibilityMode::Full.requires_forward());
        assert!(!CompatibilityMode::Forward.requires_backward());
        assert!(!CompatibilityMode::None.requires_backward() && !CompatibilityMode::None.requires_forward());
        assert!(CompatibilityMode::FullTransitive.is_transitive());
        assert!(!CompatibilityMode::Full.is_transitive());
    }

    #[test]
    fn test_none_is_always_compatible() {
        let checker = CompatibilityChecker::new();
        let report = checker.check(CompatibilityMode::None, &avro(V3), &[(1, avro(V1))]);
        assert!(report.is_compatible);
        assert!(report.comparisons.is_empty());
    }

    #[test]
    fn test_non_transitive_checks_latest_only() {
        let checker = CompatibilityChecker::new();
        let chain = vec![(1, avro(V1)), (2, avro(V2))];
        // v3 adds a field without default: incompatible with both, but only v2 is consulted
        let report = checker.check(CompatibilityMode::Backward, &avro(V3), &chain);
        assert!(!report.is_compatible);
        assert_eq!(report.violated_versions(), vec![2]);
    }

    #[test]
    fn test_transitive_reports_every_violated_version() {
        let checker = CompatibilityChecker::new();
        let chain = vec![(1, avro(V1)), (2, avro(V2))];
        let report = checker.check(CompatibilityMode::BackwardTransitive, &avro(V3), &chain);
        assert_eq!(report.violated_versions(), vec![1, 2]);
        assert!(report.messages()[0].starts_with("BACKWARD compatibility check failed against version 1"));
    }

    #[test]
    fn test_forward_reverses_roles() {
        let checker = CompatibilityChecker::new();
        // v1 reading v2 data ignores the extra field
        let report = checker.check(CompatibilityMode::Forward, &avro(V2), &[(1, avro(V1))]);
        assert!(report.is_compatible, "{}", report.summary());
        // v2 reading v1 data needs the default, which exists
        let full = checker.check(CompatibilityMode::Full, &avro(V2), &[(1, avro(V1))]);
        assert!(full.is_compatible, "{}", full.summary());
        assert_eq!(full.comparisons.len(), 2);
    }

    #[test]
    fn test_format_change_is_breaking() {
        let checker = CompatibilityChecker::new();
        let json = format::parse(SchemaFormat::Json, r#"{"type":"object"}"#, &[]).unwrap();
        let report = checker.check(CompatibilityMode::Backward, &json, &[(1, avro(V1))]);
        assert!(!report.is_compatible);
        assert_eq!(report.comparisons[0].changes[0].change_type, ChangeType::FormatChanged);
    }

    #[test]
    fn test_report_serializes_snake_case_change_types() {
        let change = SchemaChange::breaking(ChangeType::FieldRemoved, "a.b", "Property 'a.b' was removed");
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["change_type"], "field_removed");
        assert_eq!(json["is_breaking"], true);
    }
}
