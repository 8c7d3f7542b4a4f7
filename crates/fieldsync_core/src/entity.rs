//! Entities: versioned geographic features held by the local replica.

use crate::codes;
use crate::types::{EntityId, LayerId, ProjectId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A response recorded against one field of an entity's form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Free text.
    Text(String),
    /// Numeric reading.
    Number(f64),
    /// Selected option codes.
    MultipleChoice(Vec<String>),
    /// Yes/no answer.
    Bool(bool),
}

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Live entity.
    Default,
    /// Entity marked deleted (tombstone).
    Deleted,
}

/// A person using the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id.
    pub id: UserId,
    /// Contact email.
    pub email: String,
    /// Name shown in the UI.
    pub display_name: String,
}

impl User {
    /// Creates a user.
    pub fn new(id: impl Into<UserId>, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: display_name.into(),
        }
    }
}

/// Who changed an entity and when, according to the device clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// User that made the change.
    pub user_id: UserId,
    /// Device time of the change.
    pub client_timestamp: Timestamp,
}

impl AuditInfo {
    /// Creates audit info.
    pub fn new(user_id: UserId, client_timestamp: Timestamp) -> Self {
        Self {
            user_id,
            client_timestamp,
        }
    }
}

/// A geographic feature identified by `(project_id, id)`.
///
/// Entities are owned by the local store and change only through a remote
/// merge or a local mutation, never by direct writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Project the entity belongs to.
    pub project_id: ProjectId,
    /// Globally unique entity id.
    pub id: EntityId,
    /// Layer (feature type) of the entity.
    pub layer_id: LayerId,
    /// Map position, if placed.
    pub location: Option<Point>,
    /// Form responses keyed by field id.
    pub fields: BTreeMap<String, FieldValue>,
    /// Live or deleted.
    #[serde(with = "codes::as_code")]
    pub state: EntityState,
    /// Creation audit.
    pub created: AuditInfo,
    /// Last modification audit.
    pub last_modified: AuditInfo,
}

impl Entity {
    /// Creates a live entity with no location and no responses.
    pub fn new(project_id: ProjectId, id: EntityId, layer_id: LayerId, created: AuditInfo) -> Self {
        Self {
            project_id,
            id,
            layer_id,
            location: None,
            fields: BTreeMap::new(),
            state: EntityState::Default,
            last_modified: created.clone(),
            created,
        }
    }

    /// Sets the location.
    #[must_use]
    pub fn with_location(mut self, point: Point) -> Self {
        self.location = Some(point);
        self
    }

    /// Sets one field response.
    #[must_use]
    pub fn with_field(mut self, field_id: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(field_id.into(), value);
        self
    }

    /// Returns true if the entity is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == EntityState::Deleted
    }

    /// Returns a tombstone copy of this entity.
    #[must_use]
    pub fn tombstone(&self) -> Self {
        Self {
            state: EntityState::Deleted,
            ..self.clone()
        }
    }
}
