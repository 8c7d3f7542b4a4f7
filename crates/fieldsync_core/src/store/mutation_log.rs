//! Mutation log operations.

use super::{materialize, EntityKey, LocalStore, Txn};
use crate::error::CoreResult;
use crate::journal::EntityRow;
use crate::mutation::{Mutation, MutationState, MutationType};
use crate::types::{ChangeId, EntityId};
use std::collections::BTreeSet;

impl LocalStore {
    /// Applies a local edit to the entity view and queues it for delivery,
    /// in one transaction. Returns the assigned change id.
    ///
    /// A RELOAD instead drops every queued mutation of the entity and
    /// resets its view to the last remote version; nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns the apply error if the edit does not fit the current view
    /// (an UPDATE of a missing entity, a CREATE without a layer), or a
    /// storage error. In both cases nothing was saved.
    pub fn apply_and_enqueue(&self, mut mutation: Mutation) -> CoreResult<ChangeId> {
        let change_id = self.commit(|txn| {
            let key: EntityKey = (mutation.project_id.clone(), mutation.entity_id.clone());
            let mut row = txn
                .entity_row(&key)
                .unwrap_or_else(|| EntityRow::new(key.0.clone(), key.1.clone()));

            if mutation.mutation_type == MutationType::Reload {
                for queued in txn.pending_for(&mutation.entity_id) {
                    txn.remove_mutation(queued.change_id);
                }
                row.view = row.base.clone();
                if row.removal_deferred {
                    apply_removal(&mut row);
                }
                if row.base.is_none() && row.view.is_none() {
                    txn.remove_entity_row(key);
                } else {
                    txn.put_entity_row(row);
                }
                return Ok(txn.allocate_change_id());
            }

            let view = mutation.apply_to(row.view.as_ref())?;
            let change_id = txn.allocate_change_id();
            mutation.change_id = change_id;
            mutation.state = MutationState::Pending;
            mutation.retry_count = 0;
            mutation.last_error = None;

            row.view = view;
            txn.put_entity_row(row);
            txn.put_mutation(mutation.clone());
            Ok(change_id)
        })?;

        tracing::debug!(
            %change_id,
            entity_id = %mutation.entity_id,
            mutation_type = ?mutation.mutation_type,
            "local mutation committed"
        );
        Ok(change_id)
    }

    /// Queued (PENDING or FAILED) mutations of the entity, oldest first.
    pub fn get_pending_changes(&self, entity_id: &EntityId) -> Vec<Mutation> {
        self.tables.read().pending_for(entity_id)
    }

    /// Removes delivered mutations.
    ///
    /// Mutations that are no longer queued are ignored. If this empties an
    /// entity's queue and a remote removal was deferred, the removal is
    /// applied in the same transaction.
    pub fn dequeue(&self, mutations: &[Mutation]) -> CoreResult<()> {
        self.commit(|txn| {
            let mut touched: BTreeSet<EntityKey> = BTreeSet::new();
            for mutation in mutations {
                if txn.mutation(mutation.change_id).is_some() {
                    txn.remove_mutation(mutation.change_id);
                    touched.insert((mutation.project_id.clone(), mutation.entity_id.clone()));
                }
            }
            for key in touched {
                settle_deferred_removal(txn, key);
            }
            Ok(())
        })
    }

    /// Marks queued mutations FAILED, recording `reason` and counting the
    /// attempt. They stay queued for the next retry.
    pub fn mark_failed(&self, mutations: &[Mutation], reason: &str) -> CoreResult<()> {
        self.commit(|txn| {
            for mutation in mutations {
                if let Some(mut queued) = txn.mutation(mutation.change_id) {
                    queued.state = MutationState::Failed;
                    queued.retry_count = queued.retry_count.saturating_add(1);
                    queued.last_error = Some(reason.to_string());
                    txn.put_mutation(queued);
                }
            }
            Ok(())
        })
    }

    /// Entities with at least one queued mutation, ordered by their oldest
    /// queued change.
    pub fn entities_with_pending_changes(&self) -> Vec<EntityId> {
        let tables = self.tables.read();
        let mut oldest: Vec<(ChangeId, EntityId)> = tables
            .by_entity
            .iter()
            .filter_map(|(entity_id, ids)| ids.first().map(|id| (*id, entity_id.clone())))
            .collect();
        oldest.sort();
        oldest.into_iter().map(|(_, entity_id)| entity_id).collect()
    }

    /// Number of queued mutations.
    pub fn pending_count(&self) -> usize {
        self.tables.read().mutations.len()
    }

    /// Every queued mutation in change-id order.
    pub fn all_pending_changes(&self) -> Vec<Mutation> {
        self.tables.read().mutations.values().cloned().collect()
    }
}

/// Marks a row deleted: both the remote base and the local view become
/// tombstones.
pub(super) fn apply_removal(row: &mut EntityRow) {
    row.base = row.base.as_ref().map(|e| e.tombstone());
    row.view = row.view.as_ref().map(|e| e.tombstone());
    row.removal_deferred = false;
}

fn settle_deferred_removal(txn: &mut Txn<'_>, key: EntityKey) {
    if !txn.pending_for(&key.1).is_empty() {
        return;
    }
    if let Some(mut row) = txn.entity_row(&key) {
        if row.removal_deferred {
            tracing::debug!(entity_id = %key.1, "applying deferred remote removal");
            apply_removal(&mut row);
            txn.put_entity_row(row);
        }
    }
}

/// Recomputes a view after the base changed under queued mutations.
pub(super) fn rebase(row: &mut EntityRow, pending: &[Mutation]) {
    row.view = materialize(row.base.as_ref(), pending);
}
