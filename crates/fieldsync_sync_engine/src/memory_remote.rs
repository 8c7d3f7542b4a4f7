//! In-memory remote for tests and local development.

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteChangeEvent, RemoteDataStore, RemoteEventStream, RemoteStorage, TileSource};
use async_trait::async_trait;
use fieldsync_core::{Entity, EntityId, Mutation, ProjectId};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const EVENT_CAPACITY: usize = 1024;

/// Scripted result of one push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accept the mutation.
    Accept,
    /// Fail with a retryable transport error.
    Offline(String),
    /// Refuse the mutation.
    Reject(String),
}

#[derive(Debug, Clone)]
enum Broadcast {
    Event(RemoteChangeEvent),
    Failure { message: String, retryable: bool },
}

#[derive(Default)]
struct RemoteState {
    entities: BTreeMap<(ProjectId, EntityId), Entity>,
    script: VecDeque<PushOutcome>,
    push_log: Vec<Mutation>,
    push_delay: Duration,
    in_flight: HashMap<EntityId, usize>,
    max_in_flight: usize,
    subscriptions: usize,
    fail_next_subscribe: Option<SyncError>,
    uploads: HashMap<String, Vec<u8>>,
    finished_uploads: HashMap<String, u64>,
    tiles: HashMap<String, Vec<u8>>,
    tile_fetches: usize,
}

/// An in-memory remote data store, photo storage and tile source.
///
/// Accepted mutations are applied to the remote copy and echoed to
/// subscribers as [`RemoteChangeEvent::EntityModified`].
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    events: Mutex<broadcast::Sender<Broadcast>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Creates an empty remote.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(RemoteState::default()),
            events: Mutex::new(events),
        }
    }

    fn send(&self, message: Broadcast) {
        // No subscribers is fine.
        let _ = self.events.lock().send(message);
    }

    /// Seeds an entity without notifying subscribers.
    pub fn insert_entity(&self, entity: Entity) {
        self.state
            .lock()
            .entities
            .insert((entity.project_id.clone(), entity.id.clone()), entity);
    }

    /// Remote copy of an entity.
    pub fn entity(&self, project_id: &ProjectId, entity_id: &EntityId) -> Option<Entity> {
        self.state
            .lock()
            .entities
            .get(&(project_id.clone(), entity_id.clone()))
            .cloned()
    }

    /// Changes an entity remotely and notifies subscribers.
    pub fn publish_modified(&self, entity: Entity) {
        self.insert_entity(entity.clone());
        self.send(Broadcast::Event(RemoteChangeEvent::EntityModified(entity)));
    }

    /// Removes an entity remotely and notifies subscribers.
    pub fn publish_removed(&self, project_id: &ProjectId, entity_id: &EntityId) {
        self.state
            .lock()
            .entities
            .remove(&(project_id.clone(), entity_id.clone()));
        self.send(Broadcast::Event(RemoteChangeEvent::EntityRemoved {
            project_id: project_id.clone(),
            entity_id: entity_id.clone(),
        }));
    }

    /// Sends an unreadable-record event.
    pub fn publish_error(&self, message: impl Into<String>) {
        self.send(Broadcast::Event(RemoteChangeEvent::Error(message.into())));
    }

    /// Fails every open subscription with a transport error.
    pub fn fail_streams(&self, message: impl Into<String>, retryable: bool) {
        self.send(Broadcast::Failure {
            message: message.into(),
            retryable,
        });
    }

    /// Ends every open subscription.
    pub fn close_streams(&self) {
        let (fresh, _) = broadcast::channel(EVENT_CAPACITY);
        *self.events.lock() = fresh;
    }

    /// Makes the next subscribe call fail.
    pub fn fail_next_subscribe(&self, err: SyncError) {
        self.state.lock().fail_next_subscribe = Some(err);
    }

    /// Number of subscribe calls that succeeded.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions
    }

    /// Queues results for upcoming pushes. Once the script runs out every
    /// push is accepted.
    pub fn script_pushes(&self, outcomes: impl IntoIterator<Item = PushOutcome>) {
        self.state.lock().script.extend(outcomes);
    }

    /// Delays every push, to make overlapping pushes observable.
    pub fn set_push_delay(&self, delay: Duration) {
        self.state.lock().push_delay = delay;
    }

    /// Every push attempt, in arrival order.
    pub fn pushed(&self) -> Vec<Mutation> {
        self.state.lock().push_log.clone()
    }

    /// Highest number of overlapping pushes seen for a single entity.
    pub fn max_concurrent_pushes_per_entity(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Bytes uploaded to `remote_path` so far.
    pub fn uploaded(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.state.lock().uploads.get(remote_path).cloned()
    }

    /// Final size of a finished upload.
    pub fn finished_upload(&self, remote_path: &str) -> Option<u64> {
        self.state.lock().finished_uploads.get(remote_path).copied()
    }

    /// Serves a tile.
    pub fn put_tile(&self, tile_id: impl Into<String>, bytes: Vec<u8>) {
        self.state.lock().tiles.insert(tile_id.into(), bytes);
    }

    /// Number of tile fetches served.
    pub fn tile_fetches(&self) -> usize {
        self.state.lock().tile_fetches
    }

    fn accept(&self, mutation: &Mutation) -> SyncResult<()> {
        let echo = {
            let mut state = self.state.lock();
            let key = (mutation.project_id.clone(), mutation.entity_id.clone());
            let current = state.entities.get(&key);
            let updated = mutation
                .apply_to(current)
                .map_err(|e| SyncError::rejected(e.to_string()))?;
            match updated {
                Some(entity) => {
                    state.entities.insert(key, entity.clone());
                    Some(entity)
                }
                None => None,
            }
        };
        if let Some(entity) = echo {
            self.send(Broadcast::Event(RemoteChangeEvent::EntityModified(entity)));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDataStore for MemoryRemote {
    async fn subscribe(&self, project_id: &ProjectId) -> SyncResult<RemoteEventStream> {
        let (receiver, snapshot) = {
            let mut state = self.state.lock();
            if let Some(err) = state.fail_next_subscribe.take() {
                return Err(err);
            }
            state.subscriptions += 1;
            // Subscribe before taking the snapshot so nothing falls between.
            let receiver = self.events.lock().subscribe();
            let snapshot: Vec<SyncResult<RemoteChangeEvent>> = state
                .entities
                .values()
                .filter(|e| &e.project_id == project_id && !e.is_deleted())
                .cloned()
                .map(|e| Ok(RemoteChangeEvent::EntityLoaded(e)))
                .collect();
            (receiver, snapshot)
        };

        let project_id = project_id.clone();
        let live = stream::unfold(receiver, move |mut receiver| {
            let project_id = project_id.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(Broadcast::Event(event)) => {
                            if belongs_to(&event, &project_id) {
                                return Some((Ok(event), receiver));
                            }
                        }
                        Ok(Broadcast::Failure { message, retryable }) => {
                            let err = SyncError::Transport { message, retryable };
                            return Some((Err(err), receiver));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            let err = SyncError::transport_retryable(format!(
                                "subscriber lagged by {skipped} events"
                            ));
                            return Some((Err(err), receiver));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream::iter(snapshot).chain(live).boxed())
    }

    async fn push(&self, mutation: &Mutation) -> SyncResult<()> {
        let (outcome, delay) = {
            let mut state = self.state.lock();
            state.push_log.push(mutation.clone());
            let in_flight = state.in_flight.entry(mutation.entity_id.clone()).or_insert(0);
            *in_flight += 1;
            let now = *in_flight;
            state.max_in_flight = state.max_in_flight.max(now);
            (state.script.pop_front().unwrap_or(PushOutcome::Accept), state.push_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = match outcome {
            PushOutcome::Accept => self.accept(mutation),
            PushOutcome::Offline(message) => Err(SyncError::transport_retryable(message)),
            PushOutcome::Reject(reason) => Err(SyncError::rejected(reason)),
        };

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&mutation.entity_id) {
            *in_flight -= 1;
        }
        result
    }
}

fn belongs_to(event: &RemoteChangeEvent, project_id: &ProjectId) -> bool {
    match event {
        RemoteChangeEvent::EntityLoaded(e) | RemoteChangeEvent::EntityModified(e) => {
            &e.project_id == project_id
        }
        RemoteChangeEvent::EntityRemoved { project_id: p, .. } => p == project_id,
        RemoteChangeEvent::Error(_) => true,
    }
}

#[async_trait]
impl RemoteStorage for MemoryRemote {
    async fn upload_chunk(&self, remote_path: &str, offset: u64, chunk: &[u8]) -> SyncResult<()> {
        let mut state = self.state.lock();
        let object = state.uploads.entry(remote_path.to_string()).or_default();
        if object.len() as u64 != offset {
            return Err(SyncError::transport_retryable(format!(
                "upload offset {offset} does not match stored length {}",
                object.len()
            )));
        }
        object.extend_from_slice(chunk);
        Ok(())
    }

    async fn finish_upload(&self, remote_path: &str, total_bytes: u64) -> SyncResult<()> {
        self.state
            .lock()
            .finished_uploads
            .insert(remote_path.to_string(), total_bytes);
        Ok(())
    }
}

#[async_trait]
impl TileSource for MemoryRemote {
    async fn fetch_tile(&self, tile_id: &str) -> SyncResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.tile_fetches += 1;
        state
            .tiles
            .get(tile_id)
            .cloned()
            .ok_or_else(|| SyncError::transport_fatal(format!("tile {tile_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::{AuditInfo, LayerId, Timestamp, UserId};

    fn entity(project: &str, id: &str) -> Entity {
        Entity::new(
            ProjectId::from(project),
            EntityId::from(id),
            LayerId::from("l"),
            AuditInfo::new(UserId::from("u"), Timestamp::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn snapshot_then_incremental_for_one_project() {
        let remote = MemoryRemote::new();
        remote.insert_entity(entity("p", "a"));
        remote.insert_entity(entity("q", "b"));

        let mut stream = remote.subscribe(&ProjectId::from("p")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, RemoteChangeEvent::EntityLoaded(entity("p", "a")));

        remote.publish_modified(entity("q", "c"));
        remote.publish_modified(entity("p", "d"));
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next, RemoteChangeEvent::EntityModified(entity("p", "d")));

        remote.close_streams();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_pushes() {
        let remote = MemoryRemote::new();
        remote.script_pushes([PushOutcome::Offline("down".into()), PushOutcome::Reject("no".into())]);
        let create = Mutation::create(&entity("p", "a"), UserId::from("u"));

        assert!(remote.push(&create).await.unwrap_err().is_retryable());
        assert!(matches!(remote.push(&create).await, Err(SyncError::Rejected { .. })));
        remote.push(&create).await.unwrap();
        assert_eq!(remote.pushed().len(), 3);
        assert!(remote.entity(&ProjectId::from("p"), &EntityId::from("a")).is_some());
    }

    #[tokio::test]
    async fn invalid_mutation_is_rejected() {
        let remote = MemoryRemote::new();
        let delete = Mutation::delete(ProjectId::from("p"), EntityId::from("missing"), UserId::from("u"));
        assert!(matches!(remote.push(&delete).await, Err(SyncError::Rejected { .. })));
    }

    #[tokio::test]
    async fn chunked_upload_must_be_contiguous() {
        let remote = MemoryRemote::new();
        remote.upload_chunk("a.jpg", 0, b"abc").await.unwrap();
        assert!(remote.upload_chunk("a.jpg", 10, b"x").await.is_err());
        remote.upload_chunk("a.jpg", 3, b"de").await.unwrap();
        remote.finish_upload("a.jpg", 5).await.unwrap();
        assert_eq!(remote.uploaded("a.jpg").unwrap(), b"abcde");
        assert_eq!(remote.finished_upload("a.jpg"), Some(5));
    }
}
