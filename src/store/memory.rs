//! In-memory backend
//!
//! Each context owns a partition. Appends lock only their subject's chain and,
//! briefly, the partition's schema index; unrelated subjects proceed in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{AppendOutcome, AppendRequest, RegistryStore, Scope, SubjectState};
use crate::compatibility::CompatibilityMode;
use crate::context::ContextName;
use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;
use crate::mode::WriteMode;
use crate::schema::{SchemaId, SchemaRecord, SubjectVersion};

#[derive(Debug, Default)]
struct SchemaIndex {
    by_id: BTreeMap<SchemaId, SchemaRecord>,
    by_fingerprint: HashMap<Fingerprint, SchemaId>,
    next_id: u32,
}

impl SchemaIndex {
    fn next_id(&self) -> u32 {
        self.next_id.max(1)
    }
}

#[derive(Debug, Default)]
struct SubjectChain {
    high_water: u32,
    versions: BTreeMap<u32, SubjectVersion>,
}

#[derive(Debug, Default)]
struct Partition {
    schemas: Mutex<SchemaIndex>,
    subjects: RwLock<BTreeMap<String, Arc<Mutex<SubjectChain>>>>,
    configs: RwLock<BTreeMap<Scope, CompatibilityMode>>,
    modes: RwLock<BTreeMap<Scope, WriteMode>>,
}

impl Partition {
    fn chain(&self, subject: &str) -> Option<Arc<Mutex<SubjectChain>>> {
        self.subjects.read().get(subject).cloned()
    }

    fn chain_or_create(&self, subject: &str) -> Arc<Mutex<SubjectChain>> {
        if let Some(chain) = self.chain(subject) {
            return chain;
        }
        self.subjects.write().entry(subject.to_string()).or_default().clone()
    }

    /// Snapshot of every chain; each chain is locked one at a time
    fn each_chain<T>(&self, mut f: impl FnMut(&str, &SubjectChain) -> Option<T>) -> Vec<T> {
        let chains: Vec<(String, Arc<Mutex<SubjectChain>>)> = self
            .subjects
            .read()
            .iter()
            .map(|(name, chain)| (name.clone(), chain.clone()))
            .collect();
        chains
            .iter()
            .filter_map(|(name, chain)| f(name, &chain.lock()))
            .collect()
    }

    fn has_rows(&self) -> bool {
        !self.configs.read().is_empty()
            || !self.modes.read().is_empty()
            || self.subjects.read().values().any(|c| !c.lock().versions.is_empty())
    }
}

/// Registry state held in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: RwLock<BTreeMap<ContextName, Arc<Partition>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, context: &ContextName) -> Option<Arc<Partition>> {
        self.partitions.read().get(context).cloned()
    }

    fn partition_or_create(&self, context: &ContextName) -> Arc<Partition> {
        if let Some(partition) = self.partition(context) {
            return partition;
        }
        self.partitions.write().entry(context.clone()).or_default().clone()
    }
}

fn subject_not_found(subject: &str) -> RegistryError {
    RegistryError::SubjectNotFound {
        subject: subject.to_string(),
    }
}

fn version_not_found(subject: &str, version: u32) -> RegistryError {
    RegistryError::VersionNotFound {
        subject: subject.to_string(),
        version: version.to_string(),
    }
}

impl RegistryStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn schema_by_id(&self, context: &ContextName, id: SchemaId) -> Result<Option<SchemaRecord>> {
        Ok(self
            .partition(context)
            .and_then(|p| p.schemas.lock().by_id.get(&id).cloned()))
    }

    fn schema_by_fingerprint(&self, context: &ContextName, fingerprint: &Fingerprint) -> Result<Option<SchemaRecord>> {
        Ok(self.partition(context).and_then(|p| {
            let index = p.schemas.lock();
            index
                .by_fingerprint
                .get(fingerprint)
                .and_then(|id| index.by_id.get(id).cloned())
        }))
    }

    fn append_version(&self, context: &ContextName, request: AppendRequest<'_>) -> Result<AppendOutcome> {
        let partition = self.partition_or_create(context);
        let chain = partition.chain_or_create(request.subject);
        let mut chain = chain.lock();
        let draft = request.draft;

        // the subject lock is held from here to the end, the index lock only inside
        {
            let index = partition.schemas.lock();
            if let Some(id) = index.by_fingerprint.get(&draft.fingerprint) {
                if let Some(existing) = chain.versions.values().find(|v| !v.deleted && v.schema_id == *id) {
                    if request.explicit_id.map_or(true, |explicit| explicit == *id) {
                        return Ok(AppendOutcome::Existing {
                            version: existing.clone(),
                            record: index.by_id[id].clone(),
                        });
                    }
                }
            }
        }

        if let Some(expected) = request.expected_head {
            if chain.high_water != expected {
                return Ok(AppendOutcome::HeadMoved {
                    current: chain.high_water,
                });
            }
        }

        let number = match request.explicit_version {
            // numbers up to the high-water mark are live, soft-deleted or retired
            Some(v) if v <= chain.high_water => {
                return Err(RegistryError::VersionAlreadyExists {
                    subject: request.subject.to_string(),
                    version: v,
                })
            }
            Some(v) => v,
            None => chain.high_water + 1,
        };

        let mut index = partition.schemas.lock();
        let known = index.by_fingerprint.get(&draft.fingerprint).copied();
        let (record, new_schema) = match (request.explicit_id, known) {
            (Some(explicit), Some(bound)) if explicit != bound => {
                return Err(RegistryError::DuplicateIdOnImport {
                    id: explicit,
                    reason: format!("content is already registered as id {}", bound),
                })
            }
            (_, Some(bound)) => (index.by_id[&bound].clone(), false),
            (Some(explicit), None) => {
                if index.by_id.contains_key(&explicit) {
                    return Err(RegistryError::DuplicateIdOnImport {
                        id: explicit,
                        reason: "id is already bound to different content".to_string(),
                    });
                }
                let record = SchemaRecord::from_draft(explicit, draft);
                index.next_id = index.next_id().max(explicit.0 + 1);
                (record, true)
            }
            (None, None) => {
                let id = SchemaId(index.next_id());
                index.next_id = id.0 + 1;
                (SchemaRecord::from_draft(id, draft), true)
            }
        };
        if new_schema {
            index.by_fingerprint.insert(record.fingerprint.clone(), record.id);
            index.by_id.insert(record.id, record.clone());
        }
        drop(index);

        let version = SubjectVersion {
            subject: request.subject.to_string(),
            version: number,
            schema_id: record.id,
            created_at: Utc::now(),
            deleted: false,
        };
        chain.high_water = chain.high_water.max(number);
        chain.versions.insert(number, version.clone());
        debug!(context = %context, subject = request.subject, version = number, id = %record.id, "appended version");

        Ok(AppendOutcome::Appended {
            version,
            record,
            new_schema,
        })
    }

    fn subject_state(&self, context: &ContextName, subject: &str) -> Result<SubjectState> {
        let Some(chain) = self.partition(context).and_then(|p| p.chain(subject)) else {
            return Ok(SubjectState::default());
        };
        let chain = chain.lock();
        Ok(SubjectState {
            high_water: chain.high_water,
            versions: chain.versions.values().cloned().collect(),
        })
    }

    fn subjects(&self, context: &ContextName, include_deleted: bool) -> Result<Vec<String>> {
        let Some(partition) = self.partition(context) else {
            return Ok(Vec::new());
        };
        Ok(partition.each_chain(|name, chain| {
            chain
                .versions
                .values()
                .any(|v| include_deleted || !v.deleted)
                .then(|| name.to_string())
        }))
    }

    fn versions_for_id(&self, context: &ContextName, id: SchemaId) -> Result<Vec<SubjectVersion>> {
        let Some(partition) = self.partition(context) else {
            return Ok(Vec::new());
        };
        let nested = partition.each_chain(|_, chain| {
            Some(
                chain
                    .versions
                    .values()
                    .filter(|v| v.schema_id == id)
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        });
        Ok(nested.into_iter().flatten().collect())
    }

    fn referenced_by(&self, context: &ContextName, subject: &str, version: u32) -> Result<Vec<SchemaId>> {
        let Some(partition) = self.partition(context) else {
            return Ok(Vec::new());
        };
        let referencing: Vec<SchemaId> = partition
            .schemas
            .lock()
            .by_id
            .values()
            .filter(|r| r.references.iter().any(|x| x.subject == subject && x.version == version))
            .map(|r| r.id)
            .collect();
        if referencing.is_empty() {
            return Ok(Vec::new());
        }
        let mut live: Vec<SchemaId> = partition
            .each_chain(|_, chain| {
                Some(
                    chain
                        .versions
                        .values()
                        .filter(|v| !v.deleted && referencing.contains(&v.schema_id))
                        .map(|v| v.schema_id)
                        .collect::<Vec<_>>(),
                )
            })
            .into_iter()
            .flatten()
            .collect();
        live.sort();
        live.dedup();
        Ok(live)
    }

    fn soft_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
        let chain = self
            .partition(context)
            .and_then(|p| p.chain(subject))
            .ok_or_else(|| subject_not_found(subject))?;
        let mut chain = chain.lock();
        if chain.versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        let mut deleted = Vec::new();
        for v in chain.versions.values_mut().filter(|v| !v.deleted) {
            v.deleted = true;
            deleted.push(v.version);
        }
        if deleted.is_empty() {
            return Err(RegistryError::SubjectAlreadyDeleted {
                subject: subject.to_string(),
            });
        }
        Ok(deleted)
    }

    fn hard_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
        let partition = self.partition(context).ok_or_else(|| subject_not_found(subject))?;
        let chain = partition.chain(subject).ok_or_else(|| subject_not_found(subject))?;
        let mut chain = chain.lock();
        if chain.versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        if chain.versions.values().any(|v| !v.deleted) {
            return Err(RegistryError::SubjectNotSoftDeleted {
                subject: subject.to_string(),
            });
        }
        let removed: Vec<u32> = chain.versions.keys().copied().collect();
        chain.versions.clear();
        drop(chain);

        let scope = Scope::subject(subject);
        partition.configs.write().remove(&scope);
        partition.modes.write().remove(&scope);
        Ok(removed)
    }

    fn soft_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
        let chain = self
            .partition(context)
            .and_then(|p| p.chain(subject))
            .ok_or_else(|| subject_not_found(subject))?;
        let mut chain = chain.lock();
        match chain.versions.get_mut(&version) {
            Some(v) if !v.deleted => {
                v.deleted = true;
                Ok(())
            }
            _ => Err(version_not_found(subject, version)),
        }
    }

    fn hard_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
        let chain = self
            .partition(context)
            .and_then(|p| p.chain(subject))
            .ok_or_else(|| subject_not_found(subject))?;
        let mut chain = chain.lock();
        match chain.versions.get(&version) {
            None => Err(version_not_found(subject, version)),
            Some(v) if !v.deleted => Err(RegistryError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            }),
            Some(_) => {
                chain.versions.remove(&version);
                Ok(())
            }
        }
    }

    fn get_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
        Ok(self.partition(context).and_then(|p| p.configs.read().get(scope).copied()))
    }

    fn set_config(&self, context: &ContextName, scope: &Scope, level: CompatibilityMode) -> Result<()> {
        self.partition_or_create(context).configs.write().insert(scope.clone(), level);
        Ok(())
    }

    fn delete_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
        Ok(self.partition(context).and_then(|p| p.configs.write().remove(scope)))
    }

    fn get_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
        Ok(self.partition(context).and_then(|p| p.modes.read().get(scope).copied()))
    }

    fn set_mode(&self, context: &ContextName, scope: &Scope, mode: WriteMode) -> Result<()> {
        self.partition_or_create(context).modes.write().insert(scope.clone(), mode);
        Ok(())
    }

    fn delete_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
        Ok(self.partition(context).and_then(|p| p.modes.write().remove(scope)))
    }

    fn contexts(&self) -> Result<Vec<ContextName>> {
        Ok(self
            .partitions
            .read()
            .iter()
            .filter(|(name, partition)| !name.is_global() && partition.has_rows())
            .map(|(name, _)| name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use std::thread;

    #[test]
    fn test_memory_store_contract() {
        contract::run_all(MemoryStore::new);
    }

    #[test]
    fn test_concurrent_identical_content_converges() {
        let store = Arc::new(MemoryStore::new());
        let ctx = ContextName::default_context();
        let draft = contract::record(1);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let ctx = ctx.clone();
                let draft = draft.clone();
                thread::spawn(move || {
                    let subject = format!("subject-{}", i);
                    match store
                        .append_version(
                            &ctx,
                            AppendRequest {
                                subject: &subject,
                                draft: &draft,
                                expected_head: Some(0),
                                explicit_id: None,
                                explicit_version: None,
                            },
                        )
                        .unwrap()
                    {
                        AppendOutcome::Appended { record, .. } => record.id,
                        other => panic!("unexpected {:?}", other),
                    }
                })
            })
            .collect();
        let ids: Vec<SchemaId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == SchemaId(1)));
    }
}
