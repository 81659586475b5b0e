//! Error types for the schema registry

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compatibility::CompatibilityReport;
use crate::mode::WriteMode;
use crate::schema::{SchemaFormat, SchemaId};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid {format} schema: {reason}")]
    SchemaParse { format: SchemaFormat, reason: String },

    #[error("Unsupported schema type: {0}")]
    UnsupportedSchemaType(String),

    #[error("Invalid context name '{name}': {reason}")]
    InvalidContextName { name: String, reason: String },

    #[error("Operation '{operation}' is not allowed in the __GLOBAL context")]
    OperationNotAllowedInGlobalContext { operation: String },

    #[error("Invalid subject name '{0}'")]
    InvalidSubject(String),

    #[error("Reference '{name}' not found: subject {subject} version {version}")]
    ReferenceNotFound {
        name: String,
        subject: String,
        version: u32,
    },

    #[error("Schema being registered is incompatible with an earlier schema for subject {subject}: {}", .report.summary())]
    IncompatibleSchema {
        subject: String,
        report: CompatibilityReport,
    },

    #[error("Subject not found: {subject}")]
    SubjectNotFound { subject: String },

    #[error("Version not found: subject {subject} version {version}")]
    VersionNotFound { subject: String, version: String },

    #[error("Schema not found: id {id}")]
    SchemaNotFound { id: SchemaId },

    #[error("Schema not found under subject {subject}")]
    SchemaNotRegistered { subject: String },

    #[error("Subject {subject} was already soft-deleted")]
    SubjectAlreadyDeleted { subject: String },

    #[error("Subject {subject} must be soft-deleted before it can be permanently deleted")]
    SubjectNotSoftDeleted { subject: String },

    #[error("Version {version} of subject {subject} must be soft-deleted before it can be permanently deleted")]
    VersionNotSoftDeleted { subject: String, version: u32 },

    #[error("{target} is still referenced by schemas {referenced_by:?}")]
    ReferenceExists {
        target: String,
        referenced_by: Vec<SchemaId>,
    },

    #[error("Subject {subject} is in {mode} mode and rejects writes")]
    WriteModeReadOnly { subject: String, mode: WriteMode },

    #[error("Operation not permitted: {0}")]
    OperationNotPermitted(String),

    #[error("Cannot switch to IMPORT mode while subjects exist in {scope} without force")]
    ImportRequiresForce { scope: String },

    #[error("Cannot import schema id {id}: {reason}")]
    DuplicateIdOnImport { id: SchemaId, reason: String },

    #[error("Version {version} of subject {subject} is already taken")]
    VersionAlreadyExists { subject: String, version: u32 },

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid compatibility level: {0}")]
    InvalidCompatibilityLevel(String),

    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Gave up appending to subject {subject} after {attempts} attempts under concurrent writes")]
    WriteContention { subject: String, attempts: u32 },

    #[error("Request deadline exceeded before commit")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, machine-readable classification of a [`RegistryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SchemaParseError,
    UnsupportedSchemaType,
    InvalidContextName,
    OperationNotAllowedInGlobalContext,
    InvalidSubject,
    ReferenceNotFound,
    IncompatibleSchema,
    SubjectNotFound,
    VersionNotFound,
    SchemaNotFound,
    SubjectAlreadyDeleted,
    SubjectNotSoftDeleted,
    VersionNotSoftDeleted,
    ReferenceExists,
    WriteModeReadOnly,
    OperationNotPermitted,
    DuplicateIdOnImport,
    VersionAlreadyExists,
    InvalidVersion,
    InvalidCompatibilityLevel,
    InvalidMode,
    StorageUnavailable,
    WriteContention,
    DeadlineExceeded,
    Internal,
}

impl ErrorCode {
    /// Symbolic name, stable across releases
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::SchemaParseError => "SCHEMA_PARSE_ERROR",
            ErrorCode::UnsupportedSchemaType => "UNSUPPORTED_SCHEMA_TYPE",
            ErrorCode::InvalidContextName => "INVALID_CONTEXT_NAME",
            ErrorCode::OperationNotAllowedInGlobalContext => "OPERATION_NOT_ALLOWED_IN_GLOBAL_CONTEXT",
            ErrorCode::InvalidSubject => "INVALID_SUBJECT",
            ErrorCode::ReferenceNotFound => "REFERENCE_NOT_FOUND",
            ErrorCode::IncompatibleSchema => "INCOMPATIBLE_SCHEMA",
            ErrorCode::SubjectNotFound => "SUBJECT_NOT_FOUND",
            ErrorCode::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorCode::SchemaNotFound => "SCHEMA_NOT_FOUND",
            ErrorCode::SubjectAlreadyDeleted => "SUBJECT_ALREADY_DELETED",
            ErrorCode::SubjectNotSoftDeleted => "SUBJECT_NOT_SOFT_DELETED",
            ErrorCode::VersionNotSoftDeleted => "VERSION_NOT_SOFT_DELETED",
            ErrorCode::ReferenceExists => "REFERENCE_EXISTS",
            ErrorCode::WriteModeReadOnly => "WRITE_MODE_READ_ONLY",
            ErrorCode::OperationNotPermitted => "OPERATION_NOT_PERMITTED",
            ErrorCode::DuplicateIdOnImport => "DUPLICATE_ID_ON_IMPORT",
            ErrorCode::VersionAlreadyExists => "VERSION_ALREADY_EXISTS",
            ErrorCode::InvalidVersion => "INVALID_VERSION",
            ErrorCode::InvalidCompatibilityLevel => "INVALID_COMPATIBILITY_LEVEL",
            ErrorCode::InvalidMode => "INVALID_MODE",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::WriteContention => "WRITE_CONTENTION",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Numeric code in the convention used by Kafka schema registries
    pub fn numeric(&self) -> u32 {
        match self {
            ErrorCode::SubjectNotFound => 40401,
            ErrorCode::VersionNotFound => 40402,
            ErrorCode::SchemaNotFound => 40403,
            ErrorCode::SubjectAlreadyDeleted => 40404,
            ErrorCode::SubjectNotSoftDeleted => 40405,
            ErrorCode::VersionNotSoftDeleted => 40407,
            ErrorCode::ReferenceNotFound => 40408,
            ErrorCode::IncompatibleSchema => 409,
            ErrorCode::DuplicateIdOnImport | ErrorCode::VersionAlreadyExists => 42207,
            ErrorCode::SchemaParseError => 42201,
            ErrorCode::UnsupportedSchemaType | ErrorCode::InvalidVersion => 42202,
            ErrorCode::InvalidCompatibilityLevel => 42203,
            ErrorCode::InvalidMode => 42204,
            ErrorCode::OperationNotPermitted
            | ErrorCode::OperationNotAllowedInGlobalContext
            | ErrorCode::WriteModeReadOnly => 42205,
            ErrorCode::ReferenceExists => 42206,
            ErrorCode::InvalidContextName => 42208,
            ErrorCode::InvalidSubject => 42209,
            ErrorCode::Internal => 50001,
            ErrorCode::StorageUnavailable | ErrorCode::WriteContention => 50002,
            ErrorCode::DeadlineExceeded => 50003,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RegistryError {
    /// Machine-readable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::SchemaParse { .. } => ErrorCode::SchemaParseError,
            RegistryError::UnsupportedSchemaType(_) => ErrorCode::UnsupportedSchemaType,
            RegistryError::InvalidContextName { .. } => ErrorCode::InvalidContextName,
            RegistryError::OperationNotAllowedInGlobalContext { .. } => {
                ErrorCode::OperationNotAllowedInGlobalContext
            }
            RegistryError::InvalidSubject(_) => ErrorCode::InvalidSubject,
            RegistryError::ReferenceNotFound { .. } => ErrorCode::ReferenceNotFound,
            RegistryError::IncompatibleSchema { .. } => ErrorCode::IncompatibleSchema,
            RegistryError::SubjectNotFound { .. } => ErrorCode::SubjectNotFound,
            RegistryError::VersionNotFound { .. } => ErrorCode::VersionNotFound,
            RegistryError::SchemaNotFound { .. } | RegistryError::SchemaNotRegistered { .. } => {
                ErrorCode::SchemaNotFound
            }
            RegistryError::SubjectAlreadyDeleted { .. } => ErrorCode::SubjectAlreadyDeleted,
            RegistryError::SubjectNotSoftDeleted { .. } => ErrorCode::SubjectNotSoftDeleted,
            RegistryError::VersionNotSoftDeleted { .. } => ErrorCode::VersionNotSoftDeleted,
            RegistryError::ReferenceExists { .. } => ErrorCode::ReferenceExists,
            RegistryError::WriteModeReadOnly { .. } => ErrorCode::WriteModeReadOnly,
            RegistryError::OperationNotPermitted(_) | RegistryError::ImportRequiresForce { .. } => {
                ErrorCode::OperationNotPermitted
            }
            RegistryError::DuplicateIdOnImport { .. } => ErrorCode::DuplicateIdOnImport,
            RegistryError::VersionAlreadyExists { .. } => ErrorCode::VersionAlreadyExists,
            RegistryError::InvalidVersion(_) => ErrorCode::InvalidVersion,
            RegistryError::InvalidCompatibilityLevel(_) => ErrorCode::InvalidCompatibilityLevel,
            RegistryError::InvalidMode(_) => ErrorCode::InvalidMode,
            RegistryError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            RegistryError::WriteContention { .. } => ErrorCode::WriteContention,
            RegistryError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            RegistryError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    ///
    /// Parse, validation and compatibility failures are deterministic and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::StorageUnavailable(_)
                | RegistryError::WriteContention { .. }
                | RegistryError::DeadlineExceeded
        )
    }

    pub(crate) fn parse(format: SchemaFormat, reason: impl Into<String>) -> Self {
        RegistryError::SchemaParse {
            format,
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::StorageUnavailable(err.to_string())
    }
}
