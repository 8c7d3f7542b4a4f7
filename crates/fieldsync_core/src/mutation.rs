//! Mutations: intended local changes queued for remote delivery.

use crate::codes;
use crate::entity::{AuditInfo, Entity, EntityState, FieldValue, Point};
use crate::error::{CoreError, CoreResult};
use crate::types::{ChangeId, EntityId, LayerId, ProjectId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Kind of change a mutation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// A new entity should be created.
    Create,
    /// An existing entity should be updated.
    Update,
    /// An existing entity should be marked deleted.
    Delete,
    /// Local changes are abandoned and the entity is reset to the latest
    /// remote version. Issued when the user gives up on a change that
    /// failed to sync.
    Reload,
}

/// Delivery state of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    /// Waiting for (first or next) delivery.
    Pending,
    /// The last delivery attempt failed; still queued.
    Failed,
}

/// How a mutation changes the entity's location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum LocationChange {
    /// Location untouched.
    #[default]
    Unchanged,
    /// Location moved to the point.
    Set(Point),
    /// Location removed.
    Clear,
}

/// A change to one form response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Field being changed.
    pub field_id: String,
    /// New response; `None` clears the current response.
    pub new_value: Option<FieldValue>,
}

impl FieldChange {
    /// Sets a response.
    pub fn set(field_id: impl Into<String>, value: FieldValue) -> Self {
        Self {
            field_id: field_id.into(),
            new_value: Some(value),
        }
    }

    /// Clears a response.
    pub fn clear(field_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            new_value: None,
        }
    }
}

/// Field-level delta carried by a mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MutationPayload {
    /// Layer to assign; required for CREATE.
    pub layer_id: Option<LayerId>,
    /// Location change.
    pub location: LocationChange,
    /// Response changes, applied in order.
    pub field_changes: Vec<FieldChange>,
}

impl MutationPayload {
    /// Builds the payload that recreates `entity` from nothing.
    pub fn from_entity(entity: &Entity) -> Self {
        Self {
            layer_id: Some(entity.layer_id.clone()),
            location: entity
                .location
                .map(LocationChange::Set)
                .unwrap_or(LocationChange::Unchanged),
            field_changes: entity
                .fields
                .iter()
                .map(|(id, value)| FieldChange::set(id.clone(), value.clone()))
                .collect(),
        }
    }

    fn apply_fields(&self, entity: &mut Entity) {
        match self.location {
            LocationChange::Unchanged => {}
            LocationChange::Set(point) => entity.location = Some(point),
            LocationChange::Clear => entity.location = None,
        }
        for change in &self.field_changes {
            match &change.new_value {
                Some(value) => {
                    entity.fields.insert(change.field_id.clone(), value.clone());
                }
                None => {
                    entity.fields.remove(&change.field_id);
                }
            }
        }
    }
}

/// An intended change to one entity.
///
/// Within an entity, `change_id` order is replay order: mutations on the
/// same entity are never reordered relative to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Assigned at enqueue time; [`ChangeId::UNASSIGNED`] before that.
    pub change_id: ChangeId,
    /// Requested change.
    #[serde(with = "codes::as_code")]
    pub mutation_type: MutationType,
    /// Project of the target entity.
    pub project_id: ProjectId,
    /// Target entity.
    pub entity_id: EntityId,
    /// User requesting the change.
    pub user_id: UserId,
    /// Device time the change was made.
    pub client_timestamp: Timestamp,
    /// Delivery state.
    #[serde(with = "codes::as_code")]
    pub state: MutationState,
    /// Failed delivery attempts so far.
    pub retry_count: u32,
    /// Reason for the last failed delivery.
    pub last_error: Option<String>,
    /// Field-level delta.
    pub payload: MutationPayload,
}

impl Mutation {
    /// Creates an unassigned mutation of the given type.
    pub fn new(
        mutation_type: MutationType,
        project_id: ProjectId,
        entity_id: EntityId,
        user_id: UserId,
        payload: MutationPayload,
    ) -> Self {
        Self {
            change_id: ChangeId::UNASSIGNED,
            mutation_type,
            project_id,
            entity_id,
            user_id,
            client_timestamp: Timestamp::now(),
            state: MutationState::Pending,
            retry_count: 0,
            last_error: None,
            payload,
        }
    }

    /// CREATE mutation that materializes `entity` as authored by `user_id`.
    pub fn create(entity: &Entity, user_id: UserId) -> Self {
        Self::new(
            MutationType::Create,
            entity.project_id.clone(),
            entity.id.clone(),
            user_id,
            MutationPayload::from_entity(entity),
        )
    }

    /// UPDATE mutation applying `payload`.
    pub fn update(project_id: ProjectId, entity_id: EntityId, user_id: UserId, payload: MutationPayload) -> Self {
        Self::new(MutationType::Update, project_id, entity_id, user_id, payload)
    }

    /// DELETE mutation.
    pub fn delete(project_id: ProjectId, entity_id: EntityId, user_id: UserId) -> Self {
        Self::new(
            MutationType::Delete,
            project_id,
            entity_id,
            user_id,
            MutationPayload::default(),
        )
    }

    /// RELOAD request discarding local changes to the entity.
    pub fn reload(project_id: ProjectId, entity_id: EntityId, user_id: UserId) -> Self {
        Self::new(
            MutationType::Reload,
            project_id,
            entity_id,
            user_id,
            MutationPayload::default(),
        )
    }

    /// Overrides the device timestamp.
    #[must_use]
    pub fn with_client_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.client_timestamp = timestamp;
        self
    }

    fn audit(&self) -> AuditInfo {
        AuditInfo::new(self.user_id.clone(), self.client_timestamp)
    }

    /// Applies this mutation's delta on top of `base`.
    ///
    /// - CREATE builds a fresh entity, replacing any existing one.
    /// - UPDATE and DELETE require a live `base`.
    /// - RELOAD is not a delta and is refused.
    pub fn apply_to(&self, base: Option<&Entity>) -> CoreResult<Option<Entity>> {
        match self.mutation_type {
            MutationType::Create => {
                let layer_id = self.payload.layer_id.clone().ok_or_else(|| {
                    CoreError::invalid_mutation(format!("CREATE of {} has no layer", self.entity_id))
                })?;
                let mut entity = Entity::new(
                    self.project_id.clone(),
                    self.entity_id.clone(),
                    layer_id,
                    self.audit(),
                );
                self.payload.apply_fields(&mut entity);
                Ok(Some(entity))
            }
            MutationType::Update => {
                let mut entity = self.live_base(base)?;
                if let Some(layer_id) = &self.payload.layer_id {
                    entity.layer_id = layer_id.clone();
                }
                self.payload.apply_fields(&mut entity);
                entity.last_modified = self.audit();
                Ok(Some(entity))
            }
            MutationType::Delete => {
                let mut entity = self.live_base(base)?;
                entity.state = EntityState::Deleted;
                entity.last_modified = self.audit();
                Ok(Some(entity))
            }
            MutationType::Reload => Err(CoreError::invalid_mutation(
                "RELOAD discards local changes and has no delta",
            )),
        }
    }

    fn live_base(&self, base: Option<&Entity>) -> CoreResult<Entity> {
        match base {
            Some(entity) if !entity.is_deleted() => Ok(entity.clone()),
            _ => Err(CoreError::entity_not_found(&self.project_id, &self.entity_id)),
        }
    }
}
