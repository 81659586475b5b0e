//! Familiar Schema Registry
//!
//! A context-aware schema metadata registry for Avro, Protobuf and JSON Schema:
//! clients register versions under subjects, the registry assigns stable
//! content-addressed IDs and enforces evolution rules between versions.
//!
//! ## Features
//!
//! - **Content Addressing**: SHA-256 fingerprints of canonical forms deduplicate schemas per context
//! - **Compatibility Checking**: Seven modes, transitive or not, with per-path change reports
//! - **Context Isolation**: Subjects, IDs and configuration partitioned by `:.context:` namespaces
//! - **Write Modes**: READWRITE, READONLY, IMPORT and the READONLY_OVERRIDE kill switch
//! - **Pluggable Storage**: In-memory and SQLite backends behind one persistence contract
//!
//! ## Architecture
//!
//! ```text
//! subject + raw schema
//!   └─ context resolver ─ canonicalizer ─ reference resolver
//!        └─ compatibility checker (chain snapshot)
//!             └─ store.append_version (resolve-or-allocate ID, conditioned on head)
//! ```
//!
//! ## Example
//!
//! ```
//! use familiar_schema_registry::{SchemaRegistry, SchemaRequest};
//!
//! let registry = SchemaRegistry::in_memory();
//! let v1 = registry
//!     .register(&SchemaRequest::avro(
//!         "orders-value",
//!         r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"}]}"#,
//!     ))
//!     .unwrap();
//! assert_eq!((v1.id.0, v1.version), (1, 1));
//! ```

pub mod cache;
pub mod compatibility;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod mode;
pub mod registry;
pub mod schema;
pub mod store;

pub use cache::SchemaCache;
pub use compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityReport, FormatCompatibilityRule};
pub use config::{RegistryConfig, RegistryDefaults};
pub use context::{ContextName, QualifiedSubject};
pub use error::{ErrorCode, RegistryError, Result};
pub use fingerprint::Fingerprint;
pub use mode::WriteMode;
pub use registry::{ConfigSource, Resolved, SchemaRegistry, SchemaRequest, WriteOptions};
pub use schema::{RegisteredSchema, SchemaFormat, SchemaId, SchemaRecord, SchemaReference, SubjectVersion, VersionSelector};
pub use store::{MemoryStore, RegistryStore, SqliteStore};
