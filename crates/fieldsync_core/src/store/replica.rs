//! Replica operations: reads and remote merges.

use super::mutation_log::{apply_removal, rebase};
use super::{EntityKey, LocalStore};
use crate::config::RemovalPolicy;
use crate::entity::Entity;
use crate::error::CoreResult;
use crate::journal::EntityRow;
use crate::types::{EntityId, ProjectId};

/// Result of merging a remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local intent; the remote version replaced the local one.
    Replaced,
    /// The remote version became the new base under queued mutations.
    Rebased {
        /// Mutations still layered on top.
        pending: usize,
    },
    /// The snapshot was already applied.
    Unchanged,
}

/// Result of a remote removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The entity is not known locally.
    NotPresent,
    /// Queued mutations exist; the removal waits for them.
    Deferred,
    /// The entity is now deleted locally.
    Removed,
    /// Already deleted or already deferred.
    Unchanged,
}

impl LocalStore {
    /// Locally visible version of an entity, tombstones included.
    pub fn get_entity(&self, project_id: &ProjectId, entity_id: &EntityId) -> Option<Entity> {
        self.tables
            .read()
            .entities
            .get(&(project_id.clone(), entity_id.clone()))
            .and_then(|row| row.view.clone())
    }

    /// Last remote version of an entity.
    pub fn base_entity(&self, project_id: &ProjectId, entity_id: &EntityId) -> Option<Entity> {
        self.tables
            .read()
            .entities
            .get(&(project_id.clone(), entity_id.clone()))
            .and_then(|row| row.base.clone())
    }

    /// Live entities of a project, ordered by id.
    pub fn entities_in_project(&self, project_id: &ProjectId) -> Vec<Entity> {
        self.tables
            .read()
            .entities
            .iter()
            .filter(|((project, _), _)| project == project_id)
            .filter_map(|(_, row)| row.view.as_ref())
            .filter(|entity| !entity.is_deleted())
            .cloned()
            .collect()
    }

    /// Full row of an entity, for diagnostics.
    pub fn entity_row(&self, project_id: &ProjectId, entity_id: &EntityId) -> Option<EntityRow> {
        self.tables
            .read()
            .entities
            .get(&(project_id.clone(), entity_id.clone()))
            .cloned()
    }

    /// Every entity row, for diagnostics.
    pub fn entity_rows(&self) -> Vec<EntityRow> {
        self.tables.read().entities.values().cloned().collect()
    }

    /// Merges a remote snapshot of an entity.
    ///
    /// Without queued mutations the remote version replaces the local one.
    /// With queued mutations it becomes the new base and the mutations are
    /// replayed on top, so local edits stay visible. Merging the same
    /// snapshot again writes nothing.
    pub fn merge_remote(&self, entity: Entity) -> CoreResult<MergeOutcome> {
        let outcome = self.commit(|txn| {
            let key: EntityKey = (entity.project_id.clone(), entity.id.clone());
            let current = txn.entity_row(&key);
            let mut row = current
                .clone()
                .unwrap_or_else(|| EntityRow::new(key.0.clone(), key.1.clone()));
            let pending = txn.pending_for(&key.1);

            row.base = Some(entity.clone());
            row.removal_deferred = false;
            let outcome = if pending.is_empty() {
                row.view = Some(entity.clone());
                MergeOutcome::Replaced
            } else {
                rebase(&mut row, &pending);
                MergeOutcome::Rebased {
                    pending: pending.len(),
                }
            };

            if current.as_ref() == Some(&row) {
                return Ok(MergeOutcome::Unchanged);
            }
            txn.put_entity_row(row);
            Ok(outcome)
        })?;

        tracing::debug!(entity_id = %entity.id, ?outcome, "remote entity merged");
        Ok(outcome)
    }

    /// Applies a remote removal according to the configured
    /// [`RemovalPolicy`].
    pub fn remove_remote(&self, project_id: &ProjectId, entity_id: &EntityId) -> CoreResult<RemovalOutcome> {
        let policy = self.config.removal_policy;
        let outcome = self.commit(|txn| {
            let key: EntityKey = (project_id.clone(), entity_id.clone());
            let Some(current) = txn.entity_row(&key) else {
                return Ok(RemovalOutcome::NotPresent);
            };
            let has_pending = !txn.pending_for(entity_id).is_empty();

            let mut row = current.clone();
            let outcome = if has_pending && policy == RemovalPolicy::DeferWhilePending {
                row.removal_deferred = true;
                RemovalOutcome::Deferred
            } else {
                apply_removal(&mut row);
                RemovalOutcome::Removed
            };

            if row == current {
                return Ok(RemovalOutcome::Unchanged);
            }
            txn.put_entity_row(row);
            Ok(outcome)
        })?;

        tracing::debug!(%entity_id, ?outcome, "remote removal handled");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::entity::{AuditInfo, FieldValue};
    use crate::mutation::{FieldChange, Mutation, MutationPayload};
    use crate::types::{LayerId, Timestamp, UserId};
    use fieldsync_storage::InMemoryBackend;

    fn remote(id: &str, name: &str) -> Entity {
        Entity::new(
            ProjectId::from("p"),
            EntityId::from(id),
            LayerId::from("l"),
            AuditInfo::new(UserId::from("remote"), Timestamp::from_millis(1)),
        )
        .with_field("name", FieldValue::Text(name.into()))
    }

    fn local_edit(id: &str, field: &str, value: &str) -> Mutation {
        Mutation::update(
            ProjectId::from("p"),
            EntityId::from(id),
            UserId::from("u"),
            MutationPayload {
                field_changes: vec![FieldChange::set(field, FieldValue::Text(value.into()))],
                ..Default::default()
            },
        )
    }

    fn key() -> (ProjectId, EntityId) {
        (ProjectId::from("p"), EntityId::from("e"))
    }

    #[test]
    fn remote_replaces_when_nothing_queued() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.merge_remote(remote("e", "v1")).unwrap(), MergeOutcome::Replaced);
        assert_eq!(store.merge_remote(remote("e", "v2")).unwrap(), MergeOutcome::Replaced);
        let (p, e) = key();
        assert_eq!(store.get_entity(&p, &e), Some(remote("e", "v2")));
    }

    #[test]
    fn redelivered_snapshot_is_unchanged() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        let sequence = store.stats().unwrap().sequence;
        assert_eq!(store.merge_remote(remote("e", "v1")).unwrap(), MergeOutcome::Unchanged);
        assert_eq!(store.stats().unwrap().sequence, sequence);
    }

    #[test]
    fn local_edits_survive_remote_update() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        store.apply_and_enqueue(local_edit("e", "notes", "mine")).unwrap();

        let outcome = store.merge_remote(remote("e", "v2")).unwrap();
        assert_eq!(outcome, MergeOutcome::Rebased { pending: 1 });

        let (p, e) = key();
        let view = store.get_entity(&p, &e).unwrap();
        assert_eq!(view.fields["name"], FieldValue::Text("v2".into()));
        assert_eq!(view.fields["notes"], FieldValue::Text("mine".into()));
        assert_eq!(store.base_entity(&p, &e), Some(remote("e", "v2")));
    }

    #[test]
    fn removal_without_pending_marks_deleted() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        let (p, e) = key();

        assert_eq!(store.remove_remote(&p, &e).unwrap(), RemovalOutcome::Removed);
        assert!(store.get_entity(&p, &e).unwrap().is_deleted());
        assert!(store.entities_in_project(&p).is_empty());
        assert_eq!(store.remove_remote(&p, &e).unwrap(), RemovalOutcome::Unchanged);
        assert_eq!(
            store.remove_remote(&p, &EntityId::from("other")).unwrap(),
            RemovalOutcome::NotPresent
        );
    }

    #[test]
    fn removal_deferred_until_queue_drains() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        store.apply_and_enqueue(local_edit("e", "notes", "mine")).unwrap();
        let (p, e) = key();

        assert_eq!(store.remove_remote(&p, &e).unwrap(), RemovalOutcome::Deferred);
        let view = store.get_entity(&p, &e).unwrap();
        assert!(!view.is_deleted());
        assert_eq!(view.fields["notes"], FieldValue::Text("mine".into()));

        let pending = store.get_pending_changes(&e);
        store.dequeue(&pending).unwrap();
        assert!(store.get_entity(&p, &e).unwrap().is_deleted());
        assert!(!store.entity_row(&p, &e).unwrap().removal_deferred);
    }

    #[test]
    fn remote_reappearance_cancels_deferred_removal() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        store.apply_and_enqueue(local_edit("e", "notes", "mine")).unwrap();
        let (p, e) = key();
        store.remove_remote(&p, &e).unwrap();

        store.merge_remote(remote("e", "v2")).unwrap();
        store.dequeue(&store.get_pending_changes(&e)).unwrap();
        assert!(!store.get_entity(&p, &e).unwrap().is_deleted());
    }

    #[test]
    fn immediate_policy_removes_with_pending() {
        let store = LocalStore::open_with_backend(
            Box::new(InMemoryBackend::new()),
            StoreConfig::new().removal_policy(RemovalPolicy::Immediate),
        )
        .unwrap();
        store.merge_remote(remote("e", "v1")).unwrap();
        store.apply_and_enqueue(local_edit("e", "notes", "mine")).unwrap();
        let (p, e) = key();

        assert_eq!(store.remove_remote(&p, &e).unwrap(), RemovalOutcome::Removed);
        assert!(store.get_entity(&p, &e).unwrap().is_deleted());
        assert_eq!(store.get_pending_changes(&e).len(), 1);
    }

    #[test]
    fn project_listing_filters_other_projects() {
        let store = LocalStore::open_in_memory().unwrap();
        store.merge_remote(remote("a", "x")).unwrap();
        let mut elsewhere = remote("b", "y");
        elsewhere.project_id = ProjectId::from("q");
        store.merge_remote(elsewhere).unwrap();

        let listed = store.entities_in_project(&ProjectId::from("p"));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, EntityId::from("a"));
        assert_eq!(store.entity_rows().len(), 2);
    }
}
