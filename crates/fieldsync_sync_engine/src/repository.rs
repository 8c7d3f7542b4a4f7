//! Feature repository: the API the app layer uses to read and edit
//! features.

use crate::coordinator::SyncCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::work_manager::DataSyncWorkManager;
use fieldsync_core::{
    ChangeId, CoreError, Entity, EntityId, LocalStore, Mutation, MutationPayload, ProjectId, User,
};
use std::sync::Arc;

/// Reads features from the local store and turns edits into queued
/// mutations plus sync work.
pub struct FeatureRepository {
    store: Arc<LocalStore>,
    coordinator: Arc<SyncCoordinator>,
    work: Arc<DataSyncWorkManager>,
}

impl FeatureRepository {
    /// Creates a repository.
    pub fn new(coordinator: Arc<SyncCoordinator>, work: Arc<DataSyncWorkManager>) -> Self {
        Self {
            store: Arc::clone(coordinator.store()),
            coordinator,
            work,
        }
    }

    /// Mirrors a project's remote features locally. Returns only when the
    /// subscription fails.
    pub async fn sync_features(&self, project_id: &ProjectId) -> SyncError {
        self.coordinator.sync_features(project_id).await
    }

    /// Live features of a project.
    pub fn features_in_project(&self, project_id: &ProjectId) -> Vec<Entity> {
        self.store.entities_in_project(project_id)
    }

    /// A live feature.
    ///
    /// # Errors
    ///
    /// [`CoreError::EntityNotFound`] if the feature is unknown or deleted.
    pub fn get_feature(&self, project_id: &ProjectId, entity_id: &EntityId) -> SyncResult<Entity> {
        self.store
            .get_entity(project_id, entity_id)
            .filter(|entity| !entity.is_deleted())
            .ok_or_else(|| CoreError::entity_not_found(project_id, entity_id).into())
    }

    /// Saves a new feature and schedules its upload.
    pub fn save_feature(&self, feature: &Entity, user: &User) -> SyncResult<ChangeId> {
        self.enqueue(Mutation::create(feature, user.id.clone()))
    }

    /// Edits a feature and schedules the change for upload.
    pub fn update_feature(
        &self,
        project_id: &ProjectId,
        entity_id: &EntityId,
        payload: MutationPayload,
        user: &User,
    ) -> SyncResult<ChangeId> {
        self.enqueue(Mutation::update(
            project_id.clone(),
            entity_id.clone(),
            user.id.clone(),
            payload,
        ))
    }

    /// Deletes a feature and schedules the deletion for upload.
    pub fn delete_feature(&self, project_id: &ProjectId, entity_id: &EntityId, user: &User) -> SyncResult<ChangeId> {
        self.enqueue(Mutation::delete(project_id.clone(), entity_id.clone(), user.id.clone()))
    }

    /// Discards unsynced local changes to a feature and restores the last
    /// remote version.
    pub fn reload_feature(&self, project_id: &ProjectId, entity_id: &EntityId, user: &User) -> SyncResult<ChangeId> {
        let change_id = self.store.apply_and_enqueue(Mutation::reload(
            project_id.clone(),
            entity_id.clone(),
            user.id.clone(),
        ))?;
        tracing::info!(%entity_id, "local changes discarded");
        Ok(change_id)
    }

    fn enqueue(&self, mutation: Mutation) -> SyncResult<ChangeId> {
        let entity_id = mutation.entity_id.clone();
        let change_id = self.store.apply_and_enqueue(mutation)?;
        // Already saved; reschedule_pending picks it up on next start.
        if let Err(err) = self.work.enqueue_sync_worker(&entity_id) {
            tracing::warn!(%entity_id, error = %err, "could not schedule sync");
        }
        Ok(change_id)
    }
}
