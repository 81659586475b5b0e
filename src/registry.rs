//! Schema Registry
//!
//! The orchestrator composing context resolution, canonicalization, reference
//! resolution, compatibility enforcement and the persistence contract into the
//! operations callers use.
//!
//! Registration is optimistic: the compatibility check runs against a snapshot
//! of the subject's chain and the append is conditioned on the chain's
//! high-water mark being unchanged. A moved head re-reads and re-checks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cache::SchemaCache;
use crate::compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityReport};
use crate::config::{RegistryConfig, RegistryDefaults, StorageBackend};
use crate::context::{ContextName, QualifiedSubject};
use crate::error::{RegistryError, Result};
use crate::format::{self, ParsedSchema};
use crate::mode::WriteMode;
use crate::schema::{
    RegisteredSchema, ResolvedReference, SchemaFormat, SchemaId, SchemaRecord, SchemaReference, SubjectVersion,
    VersionSelector,
};
use crate::store::{AppendOutcome, AppendRequest, MemoryStore, RegistryStore, Scope, SqliteStore, SubjectState};

/// Deepest reference chain followed before giving up
const MAX_REFERENCE_DEPTH: usize = 32;

/// Which tier of the resolution chain produced a config or mode value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSource {
    /// The subject's own override
    Subject,
    /// The context-wide value
    Context,
    /// The `__GLOBAL` context's value
    Global,
    /// The process default from [`RegistryDefaults`]
    Default,
    /// `READONLY_OVERRIDE` on the default context or `__GLOBAL`
    KillSwitch,
}

/// A resolved config or mode value and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ConfigSource,
}

/// Options shared by every write
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Proceed through `READONLY_OVERRIDE`
    pub allow_override: bool,
    /// Give up before committing once this instant has passed
    pub deadline: Option<Instant>,
}

/// A schema submitted for registration, compatibility checking or lookup
#[derive(Debug, Clone)]
pub struct SchemaRequest {
    /// URL-level context; an inline `:.ctx:` prefix on `subject` wins over it
    pub context: Option<String>,
    pub subject: String,
    pub format: SchemaFormat,
    pub schema: String,
    pub references: Vec<SchemaReference>,
    /// Explicit schema ID (IMPORT mode only)
    pub id: Option<SchemaId>,
    /// Explicit version number (IMPORT mode only)
    pub version: Option<u32>,
    pub options: WriteOptions,
}

impl SchemaRequest {
    pub fn new(subject: impl Into<String>, format: SchemaFormat, schema: impl Into<String>) -> Self {
        Self {
            context: None,
            subject: subject.into(),
            format,
            schema: schema.into(),
            references: Vec::new(),
            id: None,
            version: None,
            options: WriteOptions::default(),
        }
    }

    pub fn avro(subject: impl Into<String>, schema: impl Into<String>) -> Self {
        Self::new(subject, SchemaFormat::Avro, schema)
    }

    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_references(mut self, references: Vec<SchemaReference>) -> Self {
        self.references = references;
        self
    }

    /// Import under an explicit ID and, optionally, version
    pub fn with_import(mut self, id: SchemaId, version: Option<u32>) -> Self {
        self.id = Some(id);
        self.version = version;
        self
    }

    pub fn with_options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    fn is_import(&self) -> bool {
        self.id.is_some() || self.version.is_some()
    }
}

/// The registration orchestrator
pub struct SchemaRegistry {
    store: Arc<dyn RegistryStore>,
    checker: CompatibilityChecker,
    defaults: RegistryDefaults,
    cache: Option<SchemaCache>,
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn RegistryStore>, defaults: RegistryDefaults) -> Self {
        Self {
            store,
            checker: CompatibilityChecker::new(),
            defaults,
            cache: None,
        }
    }

    /// An in-memory registry with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), RegistryDefaults::default())
    }

    /// Open the configured backend
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let store: Arc<dyn RegistryStore> = match config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Sqlite => Arc::new(SqliteStore::open_with_readers(
                config.storage_path(),
                config.busy_timeout(),
                config.storage.read_pool_size,
            )?),
        };
        let mut registry = Self::new(store, config.defaults());
        if config.cache.enabled {
            registry = registry.with_cache(SchemaCache::new(config.cache.capacity, config.cache_ttl()));
        }
        info!(backend = registry.store.backend(), "schema registry ready");
        Ok(registry)
    }

    pub fn with_cache(mut self, cache: SchemaCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn store(&self) -> &dyn RegistryStore {
        self.store.as_ref()
    }

    pub fn defaults(&self) -> &RegistryDefaults {
        &self.defaults
    }

    pub fn cache(&self) -> Option<&SchemaCache> {
        self.cache.as_ref()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a schema under a subject, returning its (subject, version, id).
    ///
    /// Re-registering content the subject already holds returns the existing
    /// version. Content known under other subjects reuses its ID but still has to
    /// pass this subject's compatibility gate.
    pub fn register(&self, request: &SchemaRequest) -> Result<RegisteredSchema> {
        let target = subject_target(request.context.as_deref(), &request.subject, "register")?;
        let ctx = &target.context;
        let subject = target.subject.as_str();
        let deadline = self.deadline(&request.options);

        let mode = self.ensure_writable(&target, &request.options)?;
        let importing = request.is_import();
        if importing && mode != WriteMode::Import {
            warn!(subject = %target, mode = %mode, "explicit id or version outside IMPORT mode");
            return Err(RegistryError::OperationNotPermitted(format!(
                "subject '{}' is not in IMPORT mode; explicit ids and versions require IMPORT mode",
                target
            )));
        }
        if mode == WriteMode::Import && request.id.is_none() {
            return Err(RegistryError::OperationNotPermitted(format!(
                "subject '{}' is in IMPORT mode; registrations must carry an explicit id",
                target
            )));
        }

        let resolved = self.resolve_references(ctx, &request.references)?;
        let parsed = format::parse(request.format, &request.schema, &resolved)?;
        let draft = format::draft(&parsed, &request.schema, &request.references);
        let level = self.resolve_config(ctx, Some(subject))?.value;

        let attempts = self.defaults.max_append_attempts.max(1);
        for attempt in 1..=attempts {
            check_deadline(deadline)?;
            let state = self.store.subject_state(ctx, subject)?;

            if let Some(record) = self.store.schema_by_fingerprint(ctx, &draft.fingerprint)? {
                let same_id = request.id.map_or(true, |id| id == record.id);
                if let Some(existing) = state.live().find(|v| v.schema_id == record.id).filter(|_| same_id) {
                    debug!(subject = %target, version = existing.version, id = %record.id, "schema already registered");
                    return Ok(RegisteredSchema::new(ctx, existing, &record));
                }
            }

            if !importing {
                let report = self.check_against_chain(ctx, level, &parsed, &state)?;
                if !report.is_compatible {
                    warn!(subject = %target, level = %level, violated = ?report.violated_versions(), "incompatible schema rejected");
                    return Err(RegistryError::IncompatibleSchema {
                        subject: target.to_string(),
                        report,
                    });
                }
            }

            check_deadline(deadline)?;
            let outcome = self.store.append_version(
                ctx,
                AppendRequest {
                    subject,
                    draft: &draft,
                    expected_head: if importing { None } else { Some(state.high_water) },
                    explicit_id: request.id,
                    explicit_version: request.version,
                },
            )?;
            match outcome {
                AppendOutcome::Appended {
                    version,
                    record,
                    new_schema,
                } => {
                    info!(
                        subject = %target,
                        version = version.version,
                        id = %record.id,
                        new_schema,
                        import = importing,
                        "registered schema"
                    );
                    return Ok(RegisteredSchema::new(ctx, &version, &record));
                }
                AppendOutcome::Existing { version, record } => {
                    return Ok(RegisteredSchema::new(ctx, &version, &record));
                }
                AppendOutcome::HeadMoved { current } => {
                    warn!(subject = %target, attempt, expected = state.high_water, current, "subject head moved, retrying");
                }
            }
        }

        Err(RegistryError::WriteContention {
            subject: target.to_string(),
            attempts,
        })
    }

    /// Check a candidate against selected versions without writing anything.
    ///
    /// `Latest` and `Number` compare with one version; `All` compares with every
    /// live version whatever the level's transitivity.
    pub fn check_compatibility(&self, request: &SchemaRequest, selector: VersionSelector) -> Result<CompatibilityReport> {
        let target = subject_target(request.context.as_deref(), &request.subject, "check compatibility")?;
        let ctx = &target.context;
        let resolved = self.resolve_references(ctx, &request.references)?;
        let parsed = format::parse(request.format, &request.schema, &resolved)?;
        let level = self.resolve_config(ctx, Some(&target.subject))?.value;
        if level == CompatibilityMode::None {
            return Ok(CompatibilityReport::compatible(level));
        }

        let state = self.store.subject_state(ctx, &target.subject)?;
        let selected: Vec<&SubjectVersion> = match selector {
            VersionSelector::Latest => state.latest_live().into_iter().collect(),
            VersionSelector::All => state.live().collect(),
            VersionSelector::Number(n) => {
                if state.live().next().is_none() {
                    return Err(subject_not_found(&target));
                }
                match state.version(n).filter(|v| !v.deleted) {
                    Some(v) => vec![v],
                    None => return Err(version_not_found(&target, n)),
                }
            }
        };

        let chain = self.load_chain(ctx, selected)?;
        let report = self.checker.check_each(level, &parsed, &chain);
        debug!(subject = %target, selector = %selector, compatible = report.is_compatible, "compatibility checked");
        Ok(report)
    }

    /// Find the version of a subject holding this content
    pub fn lookup_schema(&self, request: &SchemaRequest, include_deleted: bool) -> Result<RegisteredSchema> {
        let target = subject_target(request.context.as_deref(), &request.subject, "lookup")?;
        let ctx = &target.context;
        let state = self.existing_subject(&target, include_deleted)?;

        let resolved = self.resolve_references(ctx, &request.references)?;
        let parsed = format::parse(request.format, &request.schema, &resolved)?;
        let draft = format::draft(&parsed, &request.schema, &request.references);

        let not_registered = || RegistryError::SchemaNotRegistered {
            subject: target.to_string(),
        };
        let record = self
            .store
            .schema_by_fingerprint(ctx, &draft.fingerprint)?
            .ok_or_else(not_registered)?;
        let version = state
            .versions
            .iter()
            .rev()
            .find(|v| v.schema_id == record.id && (include_deleted || !v.deleted))
            .ok_or_else(not_registered)?;
        Ok(RegisteredSchema::new(ctx, version, &record))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Resolve a schema by ID within a context
    pub fn get_by_id(&self, context: Option<&str>, id: SchemaId) -> Result<SchemaRecord> {
        let ctx = context_target(context, "get schema by id")?;
        if let Some(record) = self.cache.as_ref().and_then(|c| c.get(&ctx, id)) {
            return Ok(record);
        }
        let record = self
            .store
            .schema_by_id(&ctx, id)?
            .ok_or(RegistryError::SchemaNotFound { id })?;
        debug!(context = %ctx, id = %id, "schema loaded");
        if let Some(cache) = &self.cache {
            cache.insert(&ctx, record.clone());
        }
        Ok(record)
    }

    /// Fetch one version of a subject
    pub fn get_version(
        &self,
        context: Option<&str>,
        subject: &str,
        selector: VersionSelector,
        include_deleted: bool,
    ) -> Result<RegisteredSchema> {
        let target = subject_target(context, subject, "get version")?;
        let state = self.existing_subject(&target, include_deleted)?;
        let version = match selector {
            VersionSelector::Latest => state.latest_live().ok_or_else(|| subject_not_found(&target))?,
            VersionSelector::Number(n) => state
                .version(n)
                .filter(|v| include_deleted || !v.deleted)
                .ok_or_else(|| version_not_found(&target, n))?,
            VersionSelector::All => {
                return Err(RegistryError::InvalidVersion(selector.to_string()));
            }
        };
        let record = self.record(&target.context, version.schema_id)?;
        Ok(RegisteredSchema::new(&target.context, version, &record))
    }

    /// Subjects of a context, sorted
    pub fn subjects(&self, context: Option<&str>, include_deleted: bool) -> Result<Vec<String>> {
        let ctx = context_target(context, "list subjects")?;
        self.store.subjects(&ctx, include_deleted)
    }

    /// Version numbers of a subject, ascending
    pub fn versions(&self, context: Option<&str>, subject: &str, include_deleted: bool) -> Result<Vec<u32>> {
        let target = subject_target(context, subject, "list versions")?;
        let state = self.existing_subject(&target, include_deleted)?;
        Ok(state
            .versions
            .iter()
            .filter(|v| include_deleted || !v.deleted)
            .map(|v| v.version)
            .collect())
    }

    /// (subject, version) pairs using a schema ID
    pub fn versions_for_id(&self, context: Option<&str>, id: SchemaId, include_deleted: bool) -> Result<Vec<SubjectVersion>> {
        let ctx = context_target(context, "list versions by id")?;
        if self.store.schema_by_id(&ctx, id)?.is_none() {
            return Err(RegistryError::SchemaNotFound { id });
        }
        let mut versions = self.store.versions_for_id(&ctx, id)?;
        versions.retain(|v| include_deleted || !v.deleted);
        Ok(versions)
    }

    /// Subjects using a schema ID, sorted and deduplicated
    pub fn subjects_for_id(&self, context: Option<&str>, id: SchemaId, include_deleted: bool) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self
            .versions_for_id(context, id, include_deleted)?
            .into_iter()
            .map(|v| v.subject)
            .collect();
        subjects.dedup();
        Ok(subjects)
    }

    /// IDs of live schemas referencing a version of a subject
    pub fn referenced_by(&self, context: Option<&str>, subject: &str, version: u32) -> Result<Vec<SchemaId>> {
        let target = subject_target(context, subject, "list references")?;
        let state = self.existing_subject(&target, true)?;
        if state.version(version).is_none() {
            return Err(version_not_found(&target, version));
        }
        self.store.referenced_by(&target.context, &target.subject, version)
    }

    /// Contexts holding subjects or explicit config/mode rows
    pub fn contexts(&self) -> Result<Vec<ContextName>> {
        self.store.contexts()
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Soft-delete every live version, or permanently remove an already
    /// soft-deleted subject. Returns the affected version numbers.
    pub fn delete_subject(
        &self,
        context: Option<&str>,
        subject: &str,
        permanent: bool,
        options: &WriteOptions,
    ) -> Result<Vec<u32>> {
        let target = subject_target(context, subject, "delete subject")?;
        self.ensure_writable(&target, options)?;
        let ctx = &target.context;

        let state = self.store.subject_state(ctx, &target.subject)?;
        if state.is_empty() {
            return Err(subject_not_found(&target));
        }
        let candidates: Vec<u32> = if permanent {
            state.versions.iter().map(|v| v.version).collect()
        } else {
            state.live().map(|v| v.version).collect()
        };
        for version in candidates {
            self.ensure_unreferenced(&target, version)?;
        }

        check_deadline(self.deadline(options))?;
        let versions = if permanent {
            self.store.hard_delete_subject(ctx, &target.subject)?
        } else {
            self.store.soft_delete_subject(ctx, &target.subject)?
        };
        info!(subject = %target, permanent, versions = ?versions, "deleted subject");
        Ok(versions)
    }

    /// Soft-delete one version, or permanently remove an already soft-deleted one.
    /// Returns the affected version number.
    pub fn delete_version(
        &self,
        context: Option<&str>,
        subject: &str,
        selector: VersionSelector,
        permanent: bool,
        options: &WriteOptions,
    ) -> Result<u32> {
        let target = subject_target(context, subject, "delete version")?;
        self.ensure_writable(&target, options)?;
        let ctx = &target.context;

        let state = self.store.subject_state(ctx, &target.subject)?;
        if state.is_empty() {
            return Err(subject_not_found(&target));
        }
        let version = match selector {
            VersionSelector::Number(n) => n,
            VersionSelector::Latest => state.latest_live().map(|v| v.version).ok_or_else(|| subject_not_found(&target))?,
            VersionSelector::All => return Err(RegistryError::InvalidVersion(selector.to_string())),
        };
        self.ensure_unreferenced(&target, version)?;

        check_deadline(self.deadline(options))?;
        if permanent {
            self.store.hard_delete_version(ctx, &target.subject, version)?;
        } else {
            self.store.soft_delete_version(ctx, &target.subject, version)?;
        }
        info!(subject = %target, version, permanent, "deleted version");
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Config and mode
    // ------------------------------------------------------------------

    /// Effective compatibility level for a subject (or a context when `subject` is `None`)
    pub fn config(&self, context: Option<&str>, subject: Option<&str>) -> Result<Resolved<CompatibilityMode>> {
        let (ctx, scope) = scope_target(context, subject)?;
        self.resolve_config(&ctx, scope_subject(&scope))
    }

    pub fn set_config(&self, context: Option<&str>, subject: Option<&str>, level: CompatibilityMode) -> Result<()> {
        let (ctx, scope) = scope_target(context, subject)?;
        self.store.set_config(&ctx, &scope, level)?;
        info!(context = %ctx, scope = ?scope, level = %level, "compatibility level set");
        Ok(())
    }

    /// Remove an override, returning the removed value
    pub fn delete_config(&self, context: Option<&str>, subject: Option<&str>) -> Result<Option<CompatibilityMode>> {
        let (ctx, scope) = scope_target(context, subject)?;
        let removed = self.store.delete_config(&ctx, &scope)?;
        info!(context = %ctx, scope = ?scope, removed = ?removed, "compatibility level override removed");
        Ok(removed)
    }

    /// Effective write mode; an engaged kill switch takes precedence
    pub fn mode(&self, context: Option<&str>, subject: Option<&str>) -> Result<Resolved<WriteMode>> {
        let (ctx, scope) = scope_target(context, subject)?;
        if self.kill_switch()? {
            return Ok(Resolved {
                value: WriteMode::ReadOnlyOverride,
                source: ConfigSource::KillSwitch,
            });
        }
        self.resolve_mode(&ctx, scope_subject(&scope))
    }

    /// Set a write mode. Switching to IMPORT while the scope holds subjects needs `force`.
    pub fn set_mode(&self, context: Option<&str>, subject: Option<&str>, mode: WriteMode, force: bool) -> Result<()> {
        let (ctx, scope) = scope_target(context, subject)?;
        if mode == WriteMode::Import && !force {
            let current = self.resolve_mode(&ctx, scope_subject(&scope))?.value;
            if current != WriteMode::Import && self.scope_has_subjects(&ctx, &scope)? {
                warn!(context = %ctx, scope = ?scope, "IMPORT mode refused without force");
                return Err(RegistryError::ImportRequiresForce {
                    scope: describe_scope(&ctx, &scope),
                });
            }
        }
        self.store.set_mode(&ctx, &scope, mode)?;
        info!(context = %ctx, scope = ?scope, mode = %mode, "write mode set");
        Ok(())
    }

    pub fn delete_mode(&self, context: Option<&str>, subject: Option<&str>) -> Result<Option<WriteMode>> {
        let (ctx, scope) = scope_target(context, subject)?;
        let removed = self.store.delete_mode(&ctx, &scope)?;
        info!(context = %ctx, scope = ?scope, removed = ?removed, "write mode override removed");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn deadline(&self, options: &WriteOptions) -> Option<Instant> {
        options
            .deadline
            .or_else(|| self.defaults.request_timeout.map(|timeout| Instant::now() + timeout))
    }

    fn resolve_config(&self, context: &ContextName, subject: Option<&str>) -> Result<Resolved<CompatibilityMode>> {
        resolve_tiers(context, subject, self.defaults.compatibility, |ctx, scope| {
            self.store.get_config(ctx, scope)
        })
    }

    fn resolve_mode(&self, context: &ContextName, subject: Option<&str>) -> Result<Resolved<WriteMode>> {
        resolve_tiers(context, subject, self.defaults.mode, |ctx, scope| self.store.get_mode(ctx, scope))
    }

    /// `READONLY_OVERRIDE` on the default context, else on `__GLOBAL`
    fn kill_switch(&self) -> Result<bool> {
        for ctx in [ContextName::default_context(), ContextName::global()] {
            if let Some(mode) = self.store.get_mode(&ctx, &Scope::Context)? {
                return Ok(mode == WriteMode::ReadOnlyOverride);
            }
        }
        Ok(false)
    }

    fn ensure_writable(&self, target: &QualifiedSubject, options: &WriteOptions) -> Result<WriteMode> {
        if !options.allow_override && self.kill_switch()? {
            warn!(subject = %target, "write rejected by READONLY_OVERRIDE");
            return Err(RegistryError::WriteModeReadOnly {
                subject: target.to_string(),
                mode: WriteMode::ReadOnlyOverride,
            });
        }
        let mode = self.resolve_mode(&target.context, Some(&target.subject))?.value;
        let blocked = match mode {
            WriteMode::ReadOnly => true,
            WriteMode::ReadOnlyOverride => !options.allow_override,
            WriteMode::ReadWrite | WriteMode::Import => false,
        };
        if blocked {
            warn!(subject = %target, mode = %mode, "write rejected by mode");
            return Err(RegistryError::WriteModeReadOnly {
                subject: target.to_string(),
                mode,
            });
        }
        Ok(mode)
    }

    fn ensure_unreferenced(&self, target: &QualifiedSubject, version: u32) -> Result<()> {
        let referenced_by = self.store.referenced_by(&target.context, &target.subject, version)?;
        if referenced_by.is_empty() {
            return Ok(());
        }
        warn!(subject = %target, version, referenced_by = ?referenced_by, "delete blocked by references");
        Err(RegistryError::ReferenceExists {
            target: format!("{} version {}", target, version),
            referenced_by,
        })
    }

    fn scope_has_subjects(&self, context: &ContextName, scope: &Scope) -> Result<bool> {
        Ok(match scope {
            Scope::Context if context.is_global() => self
                .store
                .contexts()?
                .iter()
                .map(|ctx| self.store.subjects(ctx, false))
                .collect::<Result<Vec<_>>>()?
                .iter()
                .any(|subjects| !subjects.is_empty()),
            Scope::Context => !self.store.subjects(context, false)?.is_empty(),
            Scope::Subject(subject) => self.store.subject_state(context, subject)?.live().next().is_some(),
        })
    }

    /// Subject state, failing when nothing visible remains
    fn existing_subject(&self, target: &QualifiedSubject, include_deleted: bool) -> Result<SubjectState> {
        let state = self.store.subject_state(&target.context, &target.subject)?;
        let visible = if include_deleted {
            !state.is_empty()
        } else {
            state.live().next().is_some()
        };
        if !visible {
            return Err(subject_not_found(target));
        }
        Ok(state)
    }

    fn record(&self, context: &ContextName, id: SchemaId) -> Result<SchemaRecord> {
        self.store.schema_by_id(context, id)?.ok_or_else(|| {
            RegistryError::Internal(format!("version points at missing schema id {} in {}", id, context))
        })
    }

    fn check_against_chain(
        &self,
        context: &ContextName,
        level: CompatibilityMode,
        candidate: &ParsedSchema,
        state: &SubjectState,
    ) -> Result<CompatibilityReport> {
        if level == CompatibilityMode::None {
            return Ok(CompatibilityReport::compatible(level));
        }
        let selected: Vec<&SubjectVersion> = if level.is_transitive() {
            state.live().collect()
        } else {
            state.latest_live().into_iter().collect()
        };
        let chain = self.load_chain(context, selected)?;
        Ok(self.checker.check(level, candidate, &chain))
    }

    /// Parse stored versions, oldest first
    fn load_chain(&self, context: &ContextName, versions: Vec<&SubjectVersion>) -> Result<Vec<(u32, ParsedSchema)>> {
        versions
            .into_iter()
            .map(|version| {
                let record = self.record(context, version.schema_id)?;
                let resolved = self.resolve_references(context, &record.references)?;
                let parsed = format::parse(record.format, &record.schema, &resolved)?;
                Ok((version.version, parsed))
            })
            .collect()
    }

    /// Load referenced schemas, dependencies before dependents.
    ///
    /// Soft-deleted versions still resolve.
    fn resolve_references(&self, context: &ContextName, references: &[SchemaReference]) -> Result<Vec<ResolvedReference>> {
        let mut resolved = Vec::new();
        let mut seen = HashSet::new();
        for reference in references {
            self.resolve_reference(context, reference, 0, &mut seen, &mut resolved)?;
        }
        Ok(resolved)
    }

    fn resolve_reference(
        &self,
        context: &ContextName,
        reference: &SchemaReference,
        depth: usize,
        seen: &mut HashSet<(String, u32)>,
        resolved: &mut Vec<ResolvedReference>,
    ) -> Result<()> {
        if !seen.insert((reference.subject.clone(), reference.version)) {
            return Ok(());
        }
        let not_found = || RegistryError::ReferenceNotFound {
            name: reference.name.clone(),
            subject: reference.subject.clone(),
            version: reference.version,
        };
        if depth >= MAX_REFERENCE_DEPTH {
            return Err(not_found());
        }
        let state = self.store.subject_state(context, &reference.subject)?;
        let version = state.version(reference.version).ok_or_else(not_found)?;
        let record = self.record(context, version.schema_id)?;
        for nested in &record.references {
            self.resolve_reference(context, nested, depth + 1, seen, resolved)?;
        }
        resolved.push(ResolvedReference {
            reference: reference.clone(),
            schema: record.schema,
        });
        Ok(())
    }
}

fn resolve_tiers<T: Copy>(
    context: &ContextName,
    subject: Option<&str>,
    fallback: T,
    get: impl Fn(&ContextName, &Scope) -> Result<Option<T>>,
) -> Result<Resolved<T>> {
    if let Some(subject) = subject {
        if let Some(value) = get(context, &Scope::subject(subject))? {
            return Ok(Resolved {
                value,
                source: ConfigSource::Subject,
            });
        }
    }
    if let Some(value) = get(context, &Scope::Context)? {
        return Ok(Resolved {
            value,
            source: ConfigSource::Context,
        });
    }
    if !context.is_global() {
        if let Some(value) = get(&ContextName::global(), &Scope::Context)? {
            return Ok(Resolved {
                value,
                source: ConfigSource::Global,
            });
        }
    }
    Ok(Resolved {
        value: fallback,
        source: ConfigSource::Default,
    })
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(RegistryError::DeadlineExceeded),
        _ => Ok(()),
    }
}

/// A subject operation's target; `__GLOBAL` never holds subjects
fn subject_target(context: Option<&str>, subject: &str, operation: &str) -> Result<QualifiedSubject> {
    let target = QualifiedSubject::resolve(context, subject)?;
    target.context.ensure_not_global(operation)?;
    if target.subject.trim().is_empty() || target.subject.chars().any(char::is_control) {
        return Err(RegistryError::InvalidSubject(subject.to_string()));
    }
    Ok(target)
}

fn context_target(context: Option<&str>, operation: &str) -> Result<ContextName> {
    let ctx = ContextName::parse(context.unwrap_or(""))?;
    ctx.ensure_not_global(operation)?;
    Ok(ctx)
}

/// Config/mode target: a subject override or, without a subject, the context value
fn scope_target(context: Option<&str>, subject: Option<&str>) -> Result<(ContextName, Scope)> {
    match subject {
        Some(subject) => {
            let target = subject_target(context, subject, "subject config")?;
            Ok((target.context, Scope::Subject(target.subject)))
        }
        None => Ok((ContextName::parse(context.unwrap_or(""))?, Scope::Context)),
    }
}

fn scope_subject(scope: &Scope) -> Option<&str> {
    match scope {
        Scope::Context => None,
        Scope::Subject(subject) => Some(subject),
    }
}

fn describe_scope(context: &ContextName, scope: &Scope) -> String {
    match scope {
        Scope::Context => format!("context {}", context),
        Scope::Subject(subject) => format!("subject {}", context.qualify(subject)),
    }
}

fn subject_not_found(target: &QualifiedSubject) -> RegistryError {
    RegistryError::SubjectNotFound {
        subject: target.to_string(),
    }
}

fn version_not_found(target: &QualifiedSubject, version: u32) -> RegistryError {
    RegistryError::VersionNotFound {
        subject: target.to_string(),
        version: version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::fingerprint::Fingerprint;
    use crate::schema::SchemaDraft;
    use crate::store::contract;

    const V1: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"}]}"#;
    const V2: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":["null","string"],"default":null}]}"#;
    const V3_BREAKING: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":"string"}]}"#;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::in_memory()
    }

    #[test]
    fn test_register_and_read_back() {
        let registry = registry();
        let registered = registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        assert_eq!((registered.version, registered.id), (1, SchemaId(1)));

        let by_id = registry.get_by_id(None, SchemaId(1)).unwrap();
        assert_eq!(by_id.schema, V1);
        let latest = registry.get_version(None, "orders", VersionSelector::Latest, false).unwrap();
        assert_eq!(latest.id, SchemaId(1));
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = registry();
        let first = registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        registry.register(&SchemaRequest::avro("orders", V2)).unwrap();
        let again = registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        assert_eq!((again.version, again.id), (first.version, first.id));
        assert_eq!(registry.versions(None, "orders", false).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_incompatible_schema_reports_versions() {
        let registry = registry();
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        registry.register(&SchemaRequest::avro("orders", V2)).unwrap();
        let err = registry.register(&SchemaRequest::avro("orders", V3_BREAKING)).unwrap_err();
        match err {
            RegistryError::IncompatibleSchema { report, .. } => assert_eq!(report.violated_versions(), vec![2]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_dedup_does_not_bypass_subject_compatibility() {
        let registry = registry();
        registry.register(&SchemaRequest::avro("a", V3_BREAKING)).unwrap();
        registry.register(&SchemaRequest::avro("b", V2)).unwrap();
        let err = registry.register(&SchemaRequest::avro("b", V3_BREAKING)).unwrap_err();
        assert!(matches!(err, RegistryError::IncompatibleSchema { .. }));
    }

    #[test]
    fn test_global_context_rejects_subject_operations() {
        let registry = registry();
        let err = registry
            .register(&SchemaRequest::avro(":.__GLOBAL:orders", V1))
            .unwrap_err();
        assert!(matches!(err, RegistryError::OperationNotAllowedInGlobalContext { .. }));
        assert!(matches!(
            registry.get_by_id(Some("__GLOBAL"), SchemaId(1)),
            Err(RegistryError::OperationNotAllowedInGlobalContext { .. })
        ));
        registry.set_config(Some("__GLOBAL"), None, CompatibilityMode::Full).unwrap();
    }

    #[test]
    fn test_empty_subject_is_invalid() {
        let registry = registry();
        assert!(matches!(
            registry.register(&SchemaRequest::avro("", V1)),
            Err(RegistryError::InvalidSubject(_))
        ));
    }

    #[test]
    fn test_config_resolution_tiers() {
        let registry = registry();
        let resolved = registry.config(Some(".a"), Some("s")).unwrap();
        assert_eq!(resolved, Resolved { value: CompatibilityMode::Backward, source: ConfigSource::Default });

        registry.set_config(Some("__GLOBAL"), None, CompatibilityMode::Forward).unwrap();
        assert_eq!(registry.config(Some(".a"), Some("s")).unwrap().source, ConfigSource::Global);

        registry.set_config(Some(".a"), None, CompatibilityMode::Full).unwrap();
        assert_eq!(registry.config(Some(".a"), Some("s")).unwrap().value, CompatibilityMode::Full);

        registry.set_config(Some(".a"), Some("s"), CompatibilityMode::None).unwrap();
        let resolved = registry.config(None, Some(":.a:s")).unwrap();
        assert_eq!(resolved, Resolved { value: CompatibilityMode::None, source: ConfigSource::Subject });

        assert_eq!(registry.delete_config(Some(".a"), Some("s")).unwrap(), Some(CompatibilityMode::None));
        assert_eq!(registry.config(Some(".a"), Some("s")).unwrap().source, ConfigSource::Context);
    }

    #[test]
    fn test_process_default_is_never_persisted() {
        let store: Arc<dyn RegistryStore> = Arc::new(MemoryStore::new());
        let strict = RegistryDefaults {
            compatibility: CompatibilityMode::FullTransitive,
            ..RegistryDefaults::default()
        };
        let first = SchemaRegistry::new(store.clone(), strict);
        first.register(&SchemaRequest::avro("orders", V1)).unwrap();
        assert!(store.get_config(&ContextName::default_context(), &Scope::Context).unwrap().is_none());

        let relaxed = SchemaRegistry::new(store, RegistryDefaults::default());
        assert_eq!(relaxed.config(None, Some("orders")).unwrap().value, CompatibilityMode::Backward);
    }

    #[test]
    fn test_readonly_mode_blocks_writes() {
        let registry = registry();
        registry.set_mode(None, Some("orders"), WriteMode::ReadOnly, false).unwrap();
        let err = registry.register(&SchemaRequest::avro("orders", V1)).unwrap_err();
        assert!(matches!(err, RegistryError::WriteModeReadOnly { mode: WriteMode::ReadOnly, .. }));
        registry.register(&SchemaRequest::avro("other", V1)).unwrap();
    }

    #[test]
    fn test_kill_switch_and_opt_in() {
        let registry = registry();
        registry.set_mode(Some("__GLOBAL"), None, WriteMode::ReadOnlyOverride, false).unwrap();

        let blocked = registry.register(&SchemaRequest::avro(":.tenant:orders", V1)).unwrap_err();
        assert!(matches!(blocked, RegistryError::WriteModeReadOnly { mode: WriteMode::ReadOnlyOverride, .. }));
        assert_eq!(registry.mode(Some(".tenant"), Some("orders")).unwrap().source, ConfigSource::KillSwitch);

        let opted_in = SchemaRequest::avro(":.tenant:orders", V1).with_options(WriteOptions {
            allow_override: true,
            deadline: None,
        });
        registry.register(&opted_in).unwrap();

        assert_eq!(
            registry.delete_mode(Some("__GLOBAL"), None).unwrap(),
            Some(WriteMode::ReadOnlyOverride)
        );
        registry.register(&SchemaRequest::avro(":.tenant:orders", V2)).unwrap();
    }

    #[test]
    fn test_import_requires_mode_and_force() {
        let registry = registry();
        let import = SchemaRequest::avro("orders", V1).with_import(SchemaId(42), Some(3));
        assert!(matches!(registry.register(&import), Err(RegistryError::OperationNotPermitted(_))));

        registry.register(&SchemaRequest::avro("existing", V2)).unwrap();
        assert!(matches!(
            registry.set_mode(None, None, WriteMode::Import, false),
            Err(RegistryError::ImportRequiresForce { .. })
        ));
        registry.set_mode(None, None, WriteMode::Import, true).unwrap();

        let imported = registry.register(&import).unwrap();
        assert_eq!((imported.id, imported.version), (SchemaId(42), 3));
        assert!(matches!(
            registry.register(&SchemaRequest::avro("orders", V2)),
            Err(RegistryError::OperationNotPermitted(_))
        ));

        registry.set_mode(None, None, WriteMode::ReadWrite, false).unwrap();
        let next = registry.register(&SchemaRequest::avro("fresh", V3_BREAKING)).unwrap();
        assert_eq!(next.id, SchemaId(43));
    }

    #[test]
    fn test_expired_deadline_leaves_no_state() {
        let registry = registry();
        let request = SchemaRequest::avro("orders", V1).with_options(WriteOptions {
            allow_override: false,
            deadline: Some(Instant::now() - Duration::from_millis(1)),
        });
        assert!(matches!(registry.register(&request), Err(RegistryError::DeadlineExceeded)));
        assert!(registry.subjects(None, true).unwrap().is_empty());
        assert!(registry.get_by_id(None, SchemaId(1)).is_err());
    }

    #[test]
    fn test_delete_lifecycle() {
        let registry = registry();
        let opts = WriteOptions::default();
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        registry.register(&SchemaRequest::avro("orders", V2)).unwrap();

        assert!(matches!(
            registry.delete_version(None, "orders", VersionSelector::Number(2), true, &opts),
            Err(RegistryError::VersionNotSoftDeleted { .. })
        ));
        assert_eq!(registry.delete_version(None, "orders", VersionSelector::Latest, false, &opts).unwrap(), 2);
        assert!(registry.get_version(None, "orders", VersionSelector::Number(2), false).is_err());
        assert!(registry.get_version(None, "orders", VersionSelector::Number(2), true).unwrap().deleted);

        assert_eq!(registry.delete_subject(None, "orders", false, &opts).unwrap(), vec![1]);
        assert!(matches!(
            registry.delete_subject(None, "orders", false, &opts),
            Err(RegistryError::SubjectAlreadyDeleted { .. })
        ));
        assert!(matches!(
            registry.get_version(None, "orders", VersionSelector::Latest, false),
            Err(RegistryError::SubjectNotFound { .. })
        ));
        assert_eq!(registry.delete_subject(None, "orders", true, &opts).unwrap(), vec![1, 2]);

        // IDs still resolve and version numbers stay retired
        assert!(registry.get_by_id(None, SchemaId(2)).is_ok());
        let next = registry.register(&SchemaRequest::avro("orders", V3_BREAKING)).unwrap();
        assert_eq!(next.version, 3);
    }

    #[test]
    fn test_references_resolve_and_block_deletion() {
        let registry = registry();
        let opts = WriteOptions::default();
        let address = r#"{"type":"record","name":"Address","namespace":"com.acme","fields":[{"name":"city","type":"string"}]}"#;
        let customer = r#"{"type":"record","name":"Customer","namespace":"com.acme","fields":[{"name":"home","type":"Address"}]}"#;
        registry.register(&SchemaRequest::avro("address", address)).unwrap();

        let missing = SchemaRequest::avro("customer", customer)
            .with_references(vec![SchemaReference::new("com.acme.Address", "address", 9)]);
        assert!(matches!(registry.register(&missing), Err(RegistryError::ReferenceNotFound { .. })));

        let request = SchemaRequest::avro("customer", customer)
            .with_references(vec![SchemaReference::new("com.acme.Address", "address", 1)]);
        let registered = registry.register(&request).unwrap();
        assert_eq!(registry.referenced_by(None, "address", 1).unwrap(), vec![registered.id]);

        assert!(matches!(
            registry.delete_subject(None, "address", false, &opts),
            Err(RegistryError::ReferenceExists { .. })
        ));
        registry.delete_subject(None, "customer", false, &opts).unwrap();
        registry.delete_subject(None, "address", false, &opts).unwrap();
    }

    #[test]
    fn test_check_compatibility_selectors() {
        let registry = registry();
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        registry.register(&SchemaRequest::avro("orders", V2)).unwrap();
        // readable from v1 through the default, not from v2's union
        let candidate = SchemaRequest::avro(
            "orders",
            r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":"int","default":0}]}"#,
        );

        assert!(registry.check_compatibility(&candidate, VersionSelector::Number(1)).unwrap().is_compatible);
        assert!(!registry.check_compatibility(&candidate, VersionSelector::Latest).unwrap().is_compatible);
        let all = registry.check_compatibility(&candidate, VersionSelector::All).unwrap();
        assert_eq!(all.violated_versions(), vec![2]);
        assert!(matches!(
            registry.check_compatibility(&candidate, VersionSelector::Number(7)),
            Err(RegistryError::VersionNotFound { .. })
        ));
        assert!(registry
            .check_compatibility(&SchemaRequest::avro("new-subject", V1), VersionSelector::Latest)
            .unwrap()
            .is_compatible);
        assert_eq!(registry.versions(None, "orders", false).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_lookup_schema() {
        let registry = registry();
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        let found = registry.lookup_schema(&SchemaRequest::avro("orders", V1), false).unwrap();
        assert_eq!((found.version, found.id), (1, SchemaId(1)));
        assert!(matches!(
            registry.lookup_schema(&SchemaRequest::avro("orders", V2), false),
            Err(RegistryError::SchemaNotRegistered { .. })
        ));
        assert!(matches!(
            registry.lookup_schema(&SchemaRequest::avro("missing", V1), false),
            Err(RegistryError::SubjectNotFound { .. })
        ));
    }

    #[test]
    fn test_get_by_id_populates_cache() {
        let registry = registry().with_cache(SchemaCache::new(8, Duration::from_secs(60)));
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        registry.get_by_id(None, SchemaId(1)).unwrap();
        registry.get_by_id(None, SchemaId(1)).unwrap();
        let stats = registry.cache().unwrap().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_subjects_for_id() {
        let registry = registry();
        registry.register(&SchemaRequest::avro("a", V1)).unwrap();
        registry.register(&SchemaRequest::avro("b", V1)).unwrap();
        assert_eq!(registry.subjects_for_id(None, SchemaId(1), false).unwrap(), vec!["a", "b"]);
        assert!(matches!(
            registry.subjects_for_id(None, SchemaId(9), false),
            Err(RegistryError::SchemaNotFound { .. })
        ));
    }

    // ------------------------------------------------------------------
    // Optimistic retry
    // ------------------------------------------------------------------

    /// Lets a queued competitor append ahead of each conditioned write
    struct RacingStore {
        inner: MemoryStore,
        competitors: parking_lot::Mutex<Vec<SchemaDraft>>,
    }

    impl RacingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                competitors: parking_lot::Mutex::new(Vec::new()),
            }
        }

        /// Competitors run in the order given, one per conditioned append
        fn queue(&self, competitors: &[&str]) {
            let mut queued = self.competitors.lock();
            for raw in competitors {
                queued.insert(0, contract::draft(raw));
            }
        }

        fn pending(&self) -> usize {
            self.competitors.lock().len()
        }
    }

    impl RegistryStore for RacingStore {
        fn backend(&self) -> &'static str {
            "racing"
        }

        fn schema_by_id(&self, context: &ContextName, id: SchemaId) -> Result<Option<SchemaRecord>> {
            self.inner.schema_by_id(context, id)
        }

        fn schema_by_fingerprint(&self, context: &ContextName, fingerprint: &Fingerprint) -> Result<Option<SchemaRecord>> {
            self.inner.schema_by_fingerprint(context, fingerprint)
        }

        fn append_version(&self, context: &ContextName, request: AppendRequest<'_>) -> Result<AppendOutcome> {
            let competitor = match request.expected_head {
                Some(_) => self.competitors.lock().pop(),
                None => None,
            };
            if let Some(competitor) = competitor {
                let outcome = self.inner.append_version(
                    context,
                    AppendRequest {
                        subject: request.subject,
                        draft: &competitor,
                        expected_head: None,
                        explicit_id: None,
                        explicit_version: None,
                    },
                )?;
                assert!(matches!(outcome, AppendOutcome::Appended { .. }), "{:?}", outcome);
            }
            self.inner.append_version(context, request)
        }

        fn subject_state(&self, context: &ContextName, subject: &str) -> Result<SubjectState> {
            self.inner.subject_state(context, subject)
        }

        fn subjects(&self, context: &ContextName, include_deleted: bool) -> Result<Vec<String>> {
            self.inner.subjects(context, include_deleted)
        }

        fn versions_for_id(&self, context: &ContextName, id: SchemaId) -> Result<Vec<SubjectVersion>> {
            self.inner.versions_for_id(context, id)
        }

        fn referenced_by(&self, context: &ContextName, subject: &str, version: u32) -> Result<Vec<SchemaId>> {
            self.inner.referenced_by(context, subject, version)
        }

        fn soft_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
            self.inner.soft_delete_subject(context, subject)
        }

        fn hard_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
            self.inner.hard_delete_subject(context, subject)
        }

        fn soft_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
            self.inner.soft_delete_version(context, subject, version)
        }

        fn hard_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
            self.inner.hard_delete_version(context, subject, version)
        }

        fn get_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
            self.inner.get_config(context, scope)
        }

        fn set_config(&self, context: &ContextName, scope: &Scope, level: CompatibilityMode) -> Result<()> {
            self.inner.set_config(context, scope, level)
        }

        fn delete_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
            self.inner.delete_config(context, scope)
        }

        fn get_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
            self.inner.get_mode(context, scope)
        }

        fn set_mode(&self, context: &ContextName, scope: &Scope, mode: WriteMode) -> Result<()> {
            self.inner.set_mode(context, scope, mode)
        }

        fn delete_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
            self.inner.delete_mode(context, scope)
        }

        fn contexts(&self) -> Result<Vec<ContextName>> {
            self.inner.contexts()
        }
    }

    #[test]
    fn test_moved_head_is_rechecked_and_retried() {
        const TAGGED: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"tag","type":["null","string"],"default":null}]}"#;

        let store = Arc::new(RacingStore::new());
        let registry = SchemaRegistry::new(store.clone(), RegistryDefaults::default());
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        store.queue(&[V2]);

        // the first append loses to V2; the retry checks against it and lands after it
        let registered = registry.register(&SchemaRequest::avro("orders", TAGGED)).unwrap();
        assert_eq!(store.pending(), 0);
        assert_eq!((registered.version, registered.id), (3, SchemaId(3)));
        assert_eq!(registry.versions(None, "orders", false).unwrap(), vec![1, 2, 3]);
        let raced = registry.get_version(None, "orders", VersionSelector::Number(2), false).unwrap();
        assert_eq!((raced.id, raced.schema.as_str()), (SchemaId(2), V2));
    }

    #[test]
    fn test_retry_rejects_candidate_incompatible_with_new_head() {
        // compatible with V1 but not with the V2 that wins the race
        const NOTE_AS_INT: &str = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"int"},{"name":"note","type":["null","int"],"default":null}]}"#;

        let store = Arc::new(RacingStore::new());
        let registry = SchemaRegistry::new(store.clone(), RegistryDefaults::default());
        registry.register(&SchemaRequest::avro("orders", V1)).unwrap();
        store.queue(&[V2]);

        match registry.register(&SchemaRequest::avro("orders", NOTE_AS_INT)) {
            Err(RegistryError::IncompatibleSchema { report, .. }) => assert_eq!(report.violated_versions(), vec![2]),
            other => panic!("expected IncompatibleSchema, got {:?}", other),
        }
        assert_eq!(registry.versions(None, "orders", false).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_retries_are_bounded() {
        let store = Arc::new(RacingStore::new());
        store.queue(&[V2, V3_BREAKING, V1]);
        let defaults = RegistryDefaults {
            max_append_attempts: 2,
            ..RegistryDefaults::default()
        };
        let registry = SchemaRegistry::new(store.clone(), defaults);
        registry.set_config(None, Some("orders"), CompatibilityMode::None).unwrap();

        let candidate = r#"{"type":"record","name":"Order","fields":[{"name":"id","type":"long"}]}"#;
        match registry.register(&SchemaRequest::avro("orders", candidate)) {
            Err(RegistryError::WriteContention { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected WriteContention, got {:?}", other),
        }
        assert_eq!(store.pending(), 1);
        assert_eq!(registry.versions(None, "orders", false).unwrap(), vec![1, 2]);
    }
}
