//! Persistence contract
//!
//! Every backend partitions its state per context: schema records and the
//! fingerprint index, subject version chains, and config/mode overrides.
//! Backends own the atomicity guarantees the orchestrator relies on:
//!
//! - [`RegistryStore::append_version`] resolves (or allocates) the schema ID and
//!   appends the version in one step, serialized per subject.
//! - Concurrent first registrations of the same content converge on one ID.
//! - Distinct subjects and distinct contexts never wait on each other for the
//!   duration of an append.

pub mod memory;
pub mod sqlite;

use serde::{Deserialize, Serialize};

use crate::compatibility::CompatibilityMode;
use crate::context::ContextName;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::mode::WriteMode;
use crate::schema::{SchemaDraft, SchemaId, SchemaRecord, SubjectVersion};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Where a config or mode override is attached within a context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// The context-wide value
    Context,
    /// A single subject's override
    Subject(String),
}

impl Scope {
    pub fn subject(name: impl Into<String>) -> Self {
        Scope::Subject(name.into())
    }

    pub(crate) fn key(&self) -> &str {
        match self {
            Scope::Context => "",
            Scope::Subject(name) => name,
        }
    }
}

/// Snapshot of one subject's chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectState {
    /// Highest version number ever assigned; survives every kind of deletion
    pub high_water: u32,
    /// Version rows still stored, soft-deleted ones included, oldest first
    pub versions: Vec<SubjectVersion>,
}

impl SubjectState {
    pub fn live(&self) -> impl Iterator<Item = &SubjectVersion> {
        self.versions.iter().filter(|v| !v.deleted)
    }

    pub fn latest_live(&self) -> Option<&SubjectVersion> {
        self.live().last()
    }

    pub fn version(&self, number: u32) -> Option<&SubjectVersion> {
        self.versions.iter().find(|v| v.version == number)
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// A request to attach content to a subject
#[derive(Debug, Clone)]
pub struct AppendRequest<'a> {
    pub subject: &'a str,
    pub draft: &'a SchemaDraft,
    /// High-water mark the caller's compatibility snapshot was taken at.
    /// `None` skips the head check (imports).
    pub expected_head: Option<u32>,
    /// Caller-chosen schema ID (imports only)
    pub explicit_id: Option<SchemaId>,
    /// Caller-chosen version number (imports only)
    pub explicit_version: Option<u32>,
}

/// Result of [`RegistryStore::append_version`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new version was written
    Appended {
        version: SubjectVersion,
        record: SchemaRecord,
        /// Whether the schema record was created by this append
        new_schema: bool,
    },
    /// The subject already holds this content in a live version
    Existing {
        version: SubjectVersion,
        record: SchemaRecord,
    },
    /// Another writer appended since the snapshot; nothing was written
    HeadMoved { current: u32 },
}

/// Abstract persistence for the registry.
///
/// All methods operate inside one context partition; nothing is visible
/// across contexts. `__GLOBAL` only ever holds config and mode rows.
pub trait RegistryStore: Send + Sync {
    /// Human-readable backend name for logs
    fn backend(&self) -> &'static str;

    fn schema_by_id(&self, context: &ContextName, id: SchemaId) -> Result<Option<SchemaRecord>>;

    fn schema_by_fingerprint(&self, context: &ContextName, fingerprint: &Fingerprint) -> Result<Option<SchemaRecord>>;

    /// Resolve-or-allocate the schema and append a version atomically.
    ///
    /// Order of checks, all under the subject's lock:
    /// 1. a live version with the same fingerprint returns `Existing`;
    /// 2. a high-water mark other than `expected_head` returns `HeadMoved`;
    /// 3. the fingerprint index is consulted, an explicit ID is validated or a
    ///    fresh one allocated, and the version row written.
    fn append_version(&self, context: &ContextName, request: AppendRequest<'_>) -> Result<AppendOutcome>;

    fn subject_state(&self, context: &ContextName, subject: &str) -> Result<SubjectState>;

    /// Subjects holding at least one stored version, sorted
    fn subjects(&self, context: &ContextName, include_deleted: bool) -> Result<Vec<String>>;

    /// Version rows pointing at `id`, across every subject of the context
    fn versions_for_id(&self, context: &ContextName, id: SchemaId) -> Result<Vec<SubjectVersion>>;

    /// IDs of schemas referencing `subject` at `version` that are still live somewhere
    fn referenced_by(&self, context: &ContextName, subject: &str, version: u32) -> Result<Vec<SchemaId>>;

    /// Mark every live version deleted; returns the affected version numbers
    fn soft_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>>;

    /// Remove every version row plus the subject's config and mode overrides.
    /// Schema records stay resolvable by ID.
    fn hard_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>>;

    fn soft_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()>;

    fn hard_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()>;

    fn get_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>>;

    fn set_config(&self, context: &ContextName, scope: &Scope, level: CompatibilityMode) -> Result<()>;

    /// Remove an override, returning what was stored
    fn delete_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>>;

    fn get_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>>;

    fn set_mode(&self, context: &ContextName, scope: &Scope, mode: WriteMode) -> Result<()>;

    fn delete_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>>;

    /// Contexts owning at least one subject or explicit config/mode row
    fn contexts(&self) -> Result<Vec<ContextName>>;
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behavior every backend must share; each adapter runs these against itself.

    use super::*;
    use crate::error::RegistryError;
    use crate::format;
    use crate::schema::{SchemaFormat, SchemaReference};

    pub fn draft(raw: &str) -> SchemaDraft {
        let parsed = format::parse(SchemaFormat::Avro, raw, &[]).unwrap();
        format::draft(&parsed, raw, &[])
    }

    pub fn record(n: u32) -> SchemaDraft {
        draft(&format!(
            r#"{{"type":"record","name":"R{}","fields":[{{"name":"f","type":"int"}}]}}"#,
            n
        ))
    }

    fn append(store: &dyn RegistryStore, ctx: &ContextName, subject: &str, d: &SchemaDraft, head: u32) -> AppendOutcome {
        store
            .append_version(
                ctx,
                AppendRequest {
                    subject,
                    draft: d,
                    expected_head: Some(head),
                    explicit_id: None,
                    explicit_version: None,
                },
            )
            .unwrap()
    }

    fn appended(outcome: AppendOutcome) -> (SubjectVersion, SchemaRecord) {
        match outcome {
            AppendOutcome::Appended { version, record, .. } => (version, record),
            other => panic!("expected Appended, got {:?}", other),
        }
    }

    pub fn append_assigns_versions_and_ids(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        let (v1, r1) = appended(append(store, &ctx, "orders", &record(1), 0));
        let (v2, r2) = appended(append(store, &ctx, "orders", &record(2), 1));
        assert_eq!((v1.version, r1.id), (1, SchemaId(1)));
        assert_eq!((v2.version, r2.id), (2, SchemaId(2)));

        let state = store.subject_state(&ctx, "orders").unwrap();
        assert_eq!(state.high_water, 2);
        assert_eq!(state.versions.len(), 2);
        assert_eq!(store.schema_by_id(&ctx, SchemaId(2)).unwrap().unwrap().fingerprint, record(2).fingerprint);
    }

    pub fn existing_content_is_reported(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        appended(append(store, &ctx, "orders", &record(1), 0));
        match append(store, &ctx, "orders", &record(1), 0) {
            AppendOutcome::Existing { version, record } => {
                assert_eq!(version.version, 1);
                assert_eq!(record.id, SchemaId(1));
            }
            other => panic!("expected Existing, got {:?}", other),
        }
    }

    pub fn stale_head_is_rejected(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        appended(append(store, &ctx, "orders", &record(1), 0));
        assert_eq!(
            append(store, &ctx, "orders", &record(2), 0),
            AppendOutcome::HeadMoved { current: 1 }
        );
        assert_eq!(store.subject_state(&ctx, "orders").unwrap().versions.len(), 1);
    }

    pub fn content_is_shared_across_subjects(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        let (_, a) = appended(append(store, &ctx, "a", &record(1), 0));
        let (_, b) = appended(append(store, &ctx, "b", &record(1), 0));
        assert_eq!(a.id, b.id);
        let users = store.versions_for_id(&ctx, a.id).unwrap();
        let subjects: Vec<&str> = users.iter().map(|v| v.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a", "b"]);
    }

    pub fn contexts_are_isolated(store: &dyn RegistryStore) {
        let a = ContextName::parse(".a").unwrap();
        let b = ContextName::parse(".b").unwrap();
        appended(append(store, &a, "orders", &record(9), 0));
        appended(append(store, &a, "orders", &record(1), 1));
        let (vb, rb) = appended(append(store, &b, "orders", &record(1), 0));
        assert_eq!((vb.version, rb.id), (1, SchemaId(1)));
        assert!(store.schema_by_id(&b, SchemaId(2)).unwrap().is_none());
        assert_eq!(store.contexts().unwrap(), vec![a, b]);
    }

    pub fn deletion_lifecycle(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        appended(append(store, &ctx, "orders", &record(1), 0));
        appended(append(store, &ctx, "orders", &record(2), 1));

        assert!(matches!(
            store.hard_delete_subject(&ctx, "orders"),
            Err(RegistryError::SubjectNotSoftDeleted { .. })
        ));
        assert!(matches!(
            store.hard_delete_version(&ctx, "orders", 2),
            Err(RegistryError::VersionNotSoftDeleted { .. })
        ));

        store.soft_delete_version(&ctx, "orders", 2).unwrap();
        store.hard_delete_version(&ctx, "orders", 2).unwrap();
        assert!(store.subject_state(&ctx, "orders").unwrap().version(2).is_none());

        assert_eq!(store.soft_delete_subject(&ctx, "orders").unwrap(), vec![1]);
        assert!(matches!(
            store.soft_delete_subject(&ctx, "orders"),
            Err(RegistryError::SubjectAlreadyDeleted { .. })
        ));
        assert!(store.subjects(&ctx, false).unwrap().is_empty());
        assert_eq!(store.subjects(&ctx, true).unwrap(), vec!["orders".to_string()]);

        store.set_config(&ctx, &Scope::subject("orders"), CompatibilityMode::Full).unwrap();
        assert_eq!(store.hard_delete_subject(&ctx, "orders").unwrap(), vec![1]);
        assert!(store.get_config(&ctx, &Scope::subject("orders")).unwrap().is_none());
        assert!(store.subjects(&ctx, true).unwrap().is_empty());
        assert!(matches!(
            store.soft_delete_subject(&ctx, "orders"),
            Err(RegistryError::SubjectNotFound { .. })
        ));

        // schema stays resolvable and the high-water mark survives
        assert!(store.schema_by_id(&ctx, SchemaId(1)).unwrap().is_some());
        assert_eq!(store.subject_state(&ctx, "orders").unwrap().high_water, 2);
        let (v, _) = appended(append(store, &ctx, "orders", &record(3), 2));
        assert_eq!(v.version, 3);
    }

    pub fn import_rules(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        let import = |subject: &str, d: &SchemaDraft, id: u32, version: Option<u32>| {
            store.append_version(
                &ctx,
                AppendRequest {
                    subject,
                    draft: d,
                    expected_head: None,
                    explicit_id: Some(SchemaId(id)),
                    explicit_version: version,
                },
            )
        };

        let (v, r) = appended(import("orders", &record(1), 100, Some(5)).unwrap());
        assert_eq!((v.version, r.id), (5, SchemaId(100)));

        assert!(matches!(
            import("orders", &record(2), 100, None),
            Err(RegistryError::DuplicateIdOnImport { .. })
        ));
        assert!(matches!(
            import("other", &record(1), 101, None),
            Err(RegistryError::DuplicateIdOnImport { .. })
        ));
        assert!(matches!(
            import("orders", &record(3), 102, Some(5)),
            Err(RegistryError::VersionAlreadyExists { .. })
        ));

        // numbers below the high-water mark were never used but stay unavailable
        assert!(matches!(
            import("orders", &record(3), 102, Some(2)),
            Err(RegistryError::VersionAlreadyExists { version: 2, .. })
        ));

        // the sequence continues past the imported ID and version
        let (v, r) = appended(append(store, &ctx, "orders", &record(4), 5));
        assert_eq!((v.version, r.id), (6, SchemaId(101)));

        // a permanently deleted version number is not handed out again
        store.soft_delete_version(&ctx, "orders", 6).unwrap();
        store.hard_delete_version(&ctx, "orders", 6).unwrap();
        assert!(matches!(
            import("orders", &record(3), 103, Some(6)),
            Err(RegistryError::VersionAlreadyExists { version: 6, .. })
        ));
        let (v, _) = appended(import("orders", &record(3), 103, Some(7)).unwrap());
        assert_eq!(v.version, 7);
    }

    pub fn config_and_mode_rows(store: &dyn RegistryStore) {
        let ctx = ContextName::parse(".cfg").unwrap();
        let global = ContextName::global();
        assert!(store.get_config(&ctx, &Scope::Context).unwrap().is_none());

        store.set_config(&ctx, &Scope::Context, CompatibilityMode::Forward).unwrap();
        store.set_config(&ctx, &Scope::subject("s"), CompatibilityMode::None).unwrap();
        store.set_mode(&global, &Scope::Context, WriteMode::ReadOnly).unwrap();

        assert_eq!(store.get_config(&ctx, &Scope::Context).unwrap(), Some(CompatibilityMode::Forward));
        assert_eq!(store.get_config(&ctx, &Scope::subject("s")).unwrap(), Some(CompatibilityMode::None));
        assert_eq!(store.get_mode(&global, &Scope::Context).unwrap(), Some(WriteMode::ReadOnly));

        assert_eq!(
            store.delete_config(&ctx, &Scope::subject("s")).unwrap(),
            Some(CompatibilityMode::None)
        );
        assert!(store.delete_config(&ctx, &Scope::subject("s")).unwrap().is_none());
        assert_eq!(store.delete_mode(&global, &Scope::Context).unwrap(), Some(WriteMode::ReadOnly));

        let contexts = store.contexts().unwrap();
        assert!(contexts.contains(&ctx));
        assert!(!contexts.contains(&global));
    }

    pub fn references_are_tracked(store: &dyn RegistryStore) {
        let ctx = ContextName::default_context();
        appended(append(store, &ctx, "address", &record(1), 0));
        let mut with_ref = record(2);
        with_ref.references = vec![SchemaReference::new("R1", "address", 1)];
        let (_, r) = appended(append(store, &ctx, "customer", &with_ref, 0));
        assert_eq!(store.referenced_by(&ctx, "address", 1).unwrap(), vec![r.id]);
        assert_eq!(store.schema_by_id(&ctx, r.id).unwrap().unwrap().references.len(), 1);

        store.soft_delete_subject(&ctx, "customer").unwrap();
        assert!(store.referenced_by(&ctx, "address", 1).unwrap().is_empty());
    }

    pub fn run_all<S: RegistryStore>(make: impl Fn() -> S) {
        append_assigns_versions_and_ids(&make());
        existing_content_is_reported(&make());
        stale_head_is_rejected(&make());
        content_is_shared_across_subjects(&make());
        contexts_are_isolated(&make());
        deletion_lifecycle(&make());
        import_rules(&make());
        config_and_mode_rows(&make());
        references_are_tracked(&make());
    }
}
