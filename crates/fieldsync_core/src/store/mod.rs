//! The local store: replica tables and the mutation log behind one
//! transactional boundary.
//!
//! Every write runs inside [`LocalStore::commit`], which holds the table
//! write lock for the whole transaction, appends exactly one journal
//! record and only then publishes the changes to readers. A reader can
//! therefore never see a queued mutation whose effect is missing from the
//! entity view, or the reverse.

mod mutation_log;
mod replica;

pub use replica::{MergeOutcome, RemovalOutcome};

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::journal::{CommitRecord, EntityRow, Journal, JournalRecord, SnapshotRecord, TableOp};
use crate::mutation::{Mutation, MutationState, MutationType};
use crate::types::{ChangeId, EntityId, ProjectId};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Key of an entity row.
pub type EntityKey = (ProjectId, EntityId);

/// Counters describing a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entity rows, tombstones included.
    pub entities: usize,
    /// Rows whose view is a live entity.
    pub live_entities: usize,
    /// Queued mutations in PENDING state.
    pub pending: usize,
    /// Queued mutations in FAILED state.
    pub failed: usize,
    /// Rows waiting on a deferred remote removal.
    pub deferred_removals: usize,
    /// Last committed sequence.
    pub sequence: u64,
    /// Next change id to be assigned.
    pub next_change_id: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct Tables {
    entities: BTreeMap<EntityKey, EntityRow>,
    mutations: BTreeMap<ChangeId, Mutation>,
    by_entity: HashMap<EntityId, BTreeSet<ChangeId>>,
    next_change_id: ChangeId,
    sequence: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            entities: BTreeMap::new(),
            mutations: BTreeMap::new(),
            by_entity: HashMap::new(),
            next_change_id: ChangeId::FIRST,
            sequence: 0,
        }
    }
}

impl Tables {
    fn replay(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Commit(commit) => {
                for op in commit.ops {
                    self.apply(op);
                }
                self.sequence = commit.sequence;
            }
            JournalRecord::Snapshot(snapshot) => {
                *self = Self::default();
                for row in snapshot.entities {
                    self.apply(TableOp::PutEntity(row));
                }
                for mutation in snapshot.mutations {
                    self.apply(TableOp::PutMutation(mutation));
                }
                self.next_change_id = snapshot.next_change_id;
                self.sequence = snapshot.sequence;
            }
        }
    }

    fn apply(&mut self, op: TableOp) {
        match op {
            TableOp::PutEntity(row) => {
                self.entities
                    .insert((row.project_id.clone(), row.entity_id.clone()), row);
            }
            TableOp::RemoveEntity {
                project_id,
                entity_id,
            } => {
                self.entities.remove(&(project_id, entity_id));
            }
            TableOp::PutMutation(mutation) => {
                self.by_entity
                    .entry(mutation.entity_id.clone())
                    .or_default()
                    .insert(mutation.change_id);
                self.mutations.insert(mutation.change_id, mutation);
            }
            TableOp::RemoveMutation(change_id) => {
                if let Some(mutation) = self.mutations.remove(&change_id) {
                    if let Some(ids) = self.by_entity.get_mut(&mutation.entity_id) {
                        ids.remove(&change_id);
                        if ids.is_empty() {
                            self.by_entity.remove(&mutation.entity_id);
                        }
                    }
                }
            }
            TableOp::SetNextChangeId(next) => {
                self.next_change_id = self.next_change_id.max(next);
            }
        }
    }

    fn pending_for(&self, entity_id: &EntityId) -> Vec<Mutation> {
        self.by_entity
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.mutations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self) -> SnapshotRecord {
        SnapshotRecord {
            sequence: self.sequence,
            next_change_id: self.next_change_id,
            entities: self.entities.values().cloned().collect(),
            mutations: self.mutations.values().cloned().collect(),
        }
    }
}

/// Staged writes of one transaction, overlaid on the committed tables.
pub(crate) struct Txn<'a> {
    tables: &'a Tables,
    entities: BTreeMap<EntityKey, Option<EntityRow>>,
    mutations: BTreeMap<ChangeId, Option<Mutation>>,
    next_change_id: Option<ChangeId>,
}

impl<'a> Txn<'a> {
    fn new(tables: &'a Tables) -> Self {
        Self {
            tables,
            entities: BTreeMap::new(),
            mutations: BTreeMap::new(),
            next_change_id: None,
        }
    }

    pub(crate) fn entity_row(&self, key: &EntityKey) -> Option<EntityRow> {
        match self.entities.get(key) {
            Some(staged) => staged.clone(),
            None => self.tables.entities.get(key).cloned(),
        }
    }

    pub(crate) fn put_entity_row(&mut self, row: EntityRow) {
        let key = (row.project_id.clone(), row.entity_id.clone());
        self.entities.insert(key, Some(row));
    }

    pub(crate) fn remove_entity_row(&mut self, key: EntityKey) {
        self.entities.insert(key, None);
    }

    pub(crate) fn mutation(&self, change_id: ChangeId) -> Option<Mutation> {
        match self.mutations.get(&change_id) {
            Some(staged) => staged.clone(),
            None => self.tables.mutations.get(&change_id).cloned(),
        }
    }

    /// Queued mutations of the entity, oldest first.
    pub(crate) fn pending_for(&self, entity_id: &EntityId) -> Vec<Mutation> {
        let mut ids: BTreeSet<ChangeId> = self
            .tables
            .by_entity
            .get(entity_id)
            .cloned()
            .unwrap_or_default();
        for (id, staged) in &self.mutations {
            if matches!(staged, Some(m) if &m.entity_id == entity_id) {
                ids.insert(*id);
            }
        }
        ids.into_iter().filter_map(|id| self.mutation(id)).collect()
    }

    pub(crate) fn put_mutation(&mut self, mutation: Mutation) {
        self.mutations.insert(mutation.change_id, Some(mutation));
    }

    pub(crate) fn remove_mutation(&mut self, change_id: ChangeId) {
        self.mutations.insert(change_id, None);
    }

    pub(crate) fn allocate_change_id(&mut self) -> ChangeId {
        let id = self.next_change_id.unwrap_or(self.tables.next_change_id);
        self.next_change_id = Some(id.next());
        id
    }

    fn into_ops(self) -> Vec<TableOp> {
        let mut ops = Vec::new();
        for (key, staged) in self.entities {
            match staged {
                Some(row) => ops.push(TableOp::PutEntity(row)),
                None => {
                    if self.tables.entities.contains_key(&key) {
                        ops.push(TableOp::RemoveEntity {
                            project_id: key.0,
                            entity_id: key.1,
                        });
                    }
                }
            }
        }
        for (id, staged) in self.mutations {
            match staged {
                Some(mutation) => ops.push(TableOp::PutMutation(mutation)),
                None => {
                    if self.tables.mutations.contains_key(&id) {
                        ops.push(TableOp::RemoveMutation(id));
                    }
                }
            }
        }
        if let Some(next) = self.next_change_id {
            ops.push(TableOp::SetNextChangeId(next));
        }
        ops
    }
}

/// Rebuilds an entity view by replaying queued mutations over `base`.
///
/// A mutation that no longer applies (an UPDATE whose entity was removed
/// remotely, say) is skipped so one bad entry cannot hide the rest.
pub(crate) fn materialize(base: Option<&Entity>, pending: &[Mutation]) -> Option<Entity> {
    let mut view = base.cloned();
    for mutation in pending {
        if mutation.mutation_type == MutationType::Reload {
            continue;
        }
        match mutation.apply_to(view.as_ref()) {
            Ok(next) => view = next,
            Err(err) => tracing::warn!(
                change_id = %mutation.change_id,
                entity_id = %mutation.entity_id,
                error = %err,
                "skipping mutation that no longer applies"
            ),
        }
    }
    view
}

/// Local replica store and durable mutation log.
///
/// # Example
///
/// ```rust
/// use fieldsync_core::{Entity, EntityId, LayerId, LocalStore, Mutation, ProjectId, UserId};
/// use fieldsync_core::{AuditInfo, Timestamp};
///
/// let store = LocalStore::open_in_memory().unwrap();
/// let entity = Entity::new(
///     ProjectId::from("p1"),
///     EntityId::from("well-7"),
///     LayerId::from("wells"),
///     AuditInfo::new(UserId::from("ana"), Timestamp::now()),
/// );
/// let change_id = store
///     .apply_and_enqueue(Mutation::create(&entity, UserId::from("ana")))
///     .unwrap();
///
/// assert_eq!(store.get_pending_changes(&entity.id)[0].change_id, change_id);
/// assert!(store.get_entity(&entity.project_id, &entity.id).is_some());
/// ```
pub struct LocalStore {
    config: StoreConfig,
    dir: Option<StoreDir>,
    journal: Mutex<Journal>,
    tables: RwLock<Tables>,
}

impl LocalStore {
    /// Opens an empty, memory-backed store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(
            Box::new(InMemoryBackend::new()),
            StoreConfig::default().sync_on_commit(false),
        )
    }

    /// Opens a store over an arbitrary backend, replaying its journal.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, config: StoreConfig) -> CoreResult<Self> {
        Self::open_inner(backend, config, None)
    }

    /// Opens (or creates) a store directory with default configuration.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens (or creates) a store directory.
    pub fn open_with_config(path: &Path, config: StoreConfig) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        dir.remove_stale_compaction()?;
        let backend = FileBackend::open(&dir.journal_path())?;
        Self::open_inner(Box::new(backend), config, Some(dir))
    }

    fn open_inner(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let (journal, outcome) = Journal::recover(backend, config.sync_on_commit)?;
        let mut tables = Tables::default();
        let record_count = outcome.records.len();
        for (_, record) in outcome.records {
            tables.replay(record);
        }
        tracing::info!(
            records = record_count,
            entities = tables.entities.len(),
            queued = tables.mutations.len(),
            sequence = tables.sequence,
            "local store opened"
        );

        Ok(Self {
            config,
            dir,
            journal: Mutex::new(journal),
            tables: RwLock::new(tables),
        })
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Runs `f` as one transaction.
    ///
    /// If `f` fails, or the journal append fails, nothing is published and
    /// the error is returned. A transaction that stages nothing writes
    /// nothing.
    pub(crate) fn commit<T>(&self, f: impl FnOnce(&mut Txn<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let mut tables = self.tables.write();
        let (out, ops) = {
            let mut txn = Txn::new(&tables);
            let out = f(&mut txn)?;
            (out, txn.into_ops())
        };
        if ops.is_empty() {
            return Ok(out);
        }

        let record = JournalRecord::Commit(CommitRecord {
            sequence: tables.sequence + 1,
            ops,
        });
        self.journal.lock().append(&record)?;
        tables.replay(record);
        Ok(out)
    }

    /// Store counters.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        let tables = self.tables.read();
        let journal_bytes = self.journal.lock().size()?;
        let failed = tables
            .mutations
            .values()
            .filter(|m| m.state == MutationState::Failed)
            .count();
        Ok(StoreStats {
            entities: tables.entities.len(),
            live_entities: tables
                .entities
                .values()
                .filter(|row| row.view.as_ref().is_some_and(|e| !e.is_deleted()))
                .count(),
            pending: tables.mutations.len() - failed,
            failed,
            deferred_removals: tables.entities.values().filter(|r| r.removal_deferred).count(),
            sequence: tables.sequence,
            next_change_id: tables.next_change_id.as_u64(),
            journal_bytes,
        })
    }

    /// Checks cross-table invariants and returns a description of every
    /// violation found.
    pub fn check_consistency(&self) -> Vec<String> {
        let tables = self.tables.read();
        let mut problems = Vec::new();

        for (id, mutation) in &tables.mutations {
            if *id != mutation.change_id {
                problems.push(format!("{id} stored under a different id ({})", mutation.change_id));
            }
            if *id >= tables.next_change_id {
                problems.push(format!("{id} is not below the allocator ({})", tables.next_change_id));
            }
            if mutation.mutation_type == MutationType::Reload {
                problems.push(format!("{id} is a RELOAD left in the log"));
            }
            let key = (mutation.project_id.clone(), mutation.entity_id.clone());
            if !tables.entities.contains_key(&key) {
                problems.push(format!("{id} targets missing entity {}", mutation.entity_id));
            }
            if !tables
                .by_entity
                .get(&mutation.entity_id)
                .is_some_and(|ids| ids.contains(id))
            {
                problems.push(format!("{id} missing from the entity index"));
            }
        }
        for ((project_id, entity_id), row) in &tables.entities {
            if &row.project_id != project_id || &row.entity_id != entity_id {
                problems.push(format!("row {entity_id} stored under the wrong key"));
            }
            if row.removal_deferred && !tables.by_entity.contains_key(entity_id) {
                problems.push(format!("row {entity_id} defers a removal with nothing queued"));
            }
        }
        problems
    }

    /// Rewrites the journal as a single snapshot record.
    ///
    /// Only directory stores can be compacted. The snapshot is written to a
    /// side file, synced, then renamed over the journal, so a crash at any
    /// point leaves either the old or the new journal intact.
    pub fn compact(&self) -> CoreResult<StoreStats> {
        let dir = self.dir.as_ref().ok_or_else(|| {
            CoreError::invalid_operation("only directory-backed stores can be compacted")
        })?;

        {
            let tables = self.tables.write();
            let mut journal = self.journal.lock();
            let before = journal.size()?;

            dir.remove_stale_compaction()?;
            let mut side = FileBackend::open(&dir.compact_path())?;
            let frame = JournalRecord::Snapshot(tables.snapshot()).encode_frame()?;
            side.append(&frame)?;
            side.sync()?;
            drop(side);

            dir.install_compaction()?;
            journal.replace_backend(Box::new(FileBackend::open(&dir.journal_path())?));
            tracing::info!(
                before_bytes = before,
                after_bytes = frame.len(),
                sequence = tables.sequence,
                "journal compacted"
            );
        }
        self.stats()
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("LocalStore")
            .field("path", &self.dir.as_ref().map(StoreDir::path))
            .field("entities", &tables.entities.len())
            .field("queued", &tables.mutations.len())
            .field("sequence", &tables.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::AuditInfo;
    use crate::types::{LayerId, Timestamp, UserId};

    fn entity(id: &str) -> Entity {
        Entity::new(
            ProjectId::from("p"),
            EntityId::from(id),
            LayerId::from("l"),
            AuditInfo::new(UserId::from("u"), Timestamp::from_millis(1)),
        )
    }

    #[test]
    fn failed_transaction_publishes_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        let result: CoreResult<()> = store.commit(|txn| {
            txn.put_entity_row(EntityRow::new(ProjectId::from("p"), EntityId::from("e")));
            Err(CoreError::invalid_operation("abort"))
        });
        assert!(result.is_err());
        assert_eq!(store.stats().unwrap().entities, 0);
        assert_eq!(store.stats().unwrap().journal_bytes, 0);
    }

    #[test]
    fn empty_transaction_writes_nothing() {
        let store = LocalStore::open_in_memory().unwrap();
        store.commit(|_| Ok(())).unwrap();
        assert_eq!(store.stats().unwrap().sequence, 0);
    }

    #[test]
    fn txn_overlay_sees_staged_mutations_in_order() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .commit(|txn| {
                let mut a = Mutation::create(&entity("e"), UserId::from("u"));
                a.change_id = txn.allocate_change_id();
                let mut b = Mutation::delete(ProjectId::from("p"), EntityId::from("e"), UserId::from("u"));
                b.change_id = txn.allocate_change_id();
                txn.put_mutation(b);
                txn.put_mutation(a);

                let pending = txn.pending_for(&EntityId::from("e"));
                assert_eq!(pending.len(), 2);
                assert!(pending[0].change_id < pending[1].change_id);
                Ok(())
            })
            .unwrap();
        assert_eq!(store.stats().unwrap().next_change_id, 3);
    }

    #[test]
    fn materialize_skips_mutations_that_no_longer_apply() {
        let base = entity("e").tombstone();
        let update = Mutation::update(
            ProjectId::from("p"),
            EntityId::from("e"),
            UserId::from("u"),
            Default::default(),
        );
        let view = materialize(Some(&base), &[update]);
        assert_eq!(view, Some(base));
    }

    #[test]
    fn compact_needs_a_directory() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(matches!(store.compact(), Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn fresh_store_is_consistent() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.check_consistency().is_empty());
    }
}
