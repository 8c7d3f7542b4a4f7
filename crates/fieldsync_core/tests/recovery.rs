//! Crash-recovery tests for the local store.

use fieldsync_core::journal::HEADER_SIZE;
use fieldsync_core::{
    AuditInfo, CoreError, Entity, EntityId, FieldChange, FieldValue, LayerId, LocalStore, Mutation,
    MutationPayload, MutationState, ProjectId, StoreConfig, Timestamp, UserId,
};
use fieldsync_storage::{FaultyBackend, InMemoryBackend};
use tempfile::tempdir;

fn config() -> StoreConfig {
    StoreConfig::new().sync_on_commit(false)
}

fn entity(id: &str) -> Entity {
    Entity::new(
        ProjectId::from("survey"),
        EntityId::from(id),
        LayerId::from("trees"),
        AuditInfo::new(UserId::from("ana"), Timestamp::from_millis(100)),
    )
}

fn rename(id: &str, name: &str) -> Mutation {
    Mutation::update(
        ProjectId::from("survey"),
        EntityId::from(id),
        UserId::from("ana"),
        MutationPayload {
            field_changes: vec![FieldChange::set("species", FieldValue::Text(name.into()))],
            ..Default::default()
        },
    )
}

fn reopen(memory: &InMemoryBackend) -> LocalStore {
    LocalStore::open_with_backend(Box::new(memory.clone()), config()).unwrap()
}

#[test]
fn committed_state_survives_reopen() {
    let memory = InMemoryBackend::new();
    {
        let store = reopen(&memory);
        store
            .apply_and_enqueue(Mutation::create(&entity("oak"), UserId::from("ana")))
            .unwrap();
        store.apply_and_enqueue(rename("oak", "quercus")).unwrap();
        store.merge_remote(entity("elm")).unwrap();
        let pending = store.get_pending_changes(&EntityId::from("oak"));
        store.mark_failed(&pending[1..], "timeout").unwrap();
    }

    let store = reopen(&memory);
    let pending = store.get_pending_changes(&EntityId::from("oak"));
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[1].state, MutationState::Failed);
    assert_eq!(pending[1].last_error.as_deref(), Some("timeout"));

    let oak = store
        .get_entity(&ProjectId::from("survey"), &EntityId::from("oak"))
        .unwrap();
    assert_eq!(oak.fields["species"], FieldValue::Text("quercus".into()));
    assert_eq!(store.entities_in_project(&ProjectId::from("survey")).len(), 2);

    let next = store.apply_and_enqueue(rename("oak", "robur")).unwrap();
    assert!(next > pending[1].change_id);
    assert!(store.check_consistency().is_empty());
}

#[test]
fn torn_write_leaves_view_and_log_consistent() {
    let memory = InMemoryBackend::new();
    let (faulty, faults) = FaultyBackend::new(Box::new(memory.clone()));
    let store = LocalStore::open_with_backend(Box::new(faulty), config()).unwrap();
    store
        .apply_and_enqueue(Mutation::create(&entity("oak"), UserId::from("ana")))
        .unwrap();

    faults.tear_next_append(HEADER_SIZE + 3);
    assert!(store.apply_and_enqueue(rename("oak", "lost")).is_err());

    // Neither the view nor the log saw the failed edit.
    let oak = store
        .get_entity(&ProjectId::from("survey"), &EntityId::from("oak"))
        .unwrap();
    assert!(!oak.fields.contains_key("species"));
    assert_eq!(store.pending_count(), 1);
    drop(store);

    let store = reopen(&memory);
    assert_eq!(store.pending_count(), 1);
    assert!(store
        .get_entity(&ProjectId::from("survey"), &EntityId::from("oak"))
        .unwrap()
        .fields
        .is_empty());
}

#[test]
fn crash_mid_write_discards_torn_tail_on_open() {
    let memory = InMemoryBackend::new();
    {
        let store = reopen(&memory);
        store
            .apply_and_enqueue(Mutation::create(&entity("oak"), UserId::from("ana")))
            .unwrap();
    }
    let clean_len = memory.data().len();

    // A process that died mid-append leaves a partial frame behind.
    {
        let scratch = InMemoryBackend::new();
        let store = reopen(&scratch);
        store
            .apply_and_enqueue(Mutation::create(&entity("ash"), UserId::from("ana")))
            .unwrap();
        let frame = scratch.data();
        let mut raw = memory.clone();
        fieldsync_storage::StorageBackend::append(&mut raw, &frame[..frame.len() - 2]).unwrap();
    }

    let store = reopen(&memory);
    assert_eq!(memory.data().len(), clean_len);
    assert_eq!(store.pending_count(), 1);
    assert!(store
        .get_entity(&ProjectId::from("survey"), &EntityId::from("ash"))
        .is_none());
}

#[test]
fn checksum_damage_refuses_to_open() {
    let memory = InMemoryBackend::new();
    {
        let store = reopen(&memory);
        store
            .apply_and_enqueue(Mutation::create(&entity("oak"), UserId::from("ana")))
            .unwrap();
    }
    let data = memory.data();
    let at = data.len() - 6;
    memory.corrupt_byte(at, !data[at]);

    let err = LocalStore::open_with_backend(Box::new(memory.clone()), config()).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn failed_flush_rolls_back_whole_transaction() {
    let memory = InMemoryBackend::new();
    let (faulty, faults) = FaultyBackend::new(Box::new(memory.clone()));
    let store = LocalStore::open_with_backend(Box::new(faulty), config()).unwrap();
    store.merge_remote(entity("oak")).unwrap();
    let before = memory.data();

    faults.set_fail_flush(true);
    let err = store
        .apply_and_enqueue(rename("oak", "quercus"))
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert_eq!(memory.data(), before);
    assert_eq!(store.pending_count(), 0);

    faults.clear();
    store.apply_and_enqueue(rename("oak", "quercus")).unwrap();
    assert_eq!(store.pending_count(), 1);
}

#[test]
fn directory_store_reopens_and_compacts() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("store");
    {
        let store = LocalStore::open_with_config(&path, config()).unwrap();
        store
            .apply_and_enqueue(Mutation::create(&entity("oak"), UserId::from("ana")))
            .unwrap();
        for i in 0..20 {
            store.apply_and_enqueue(rename("oak", &format!("v{i}"))).unwrap();
        }
        let pending = store.get_pending_changes(&EntityId::from("oak"));
        store.dequeue(&pending[..15]).unwrap();

        let before = store.stats().unwrap();
        let after = store.compact().unwrap();
        assert!(after.journal_bytes < before.journal_bytes);
        assert_eq!(after.pending, before.pending);

        // The store keeps writing to the compacted journal.
        store.apply_and_enqueue(rename("oak", "final")).unwrap();
    }

    let store = LocalStore::open_with_config(&path, config()).unwrap();
    assert_eq!(store.pending_count(), 7);
    let oak = store
        .get_entity(&ProjectId::from("survey"), &EntityId::from("oak"))
        .unwrap();
    assert_eq!(oak.fields["species"], FieldValue::Text("final".into()));
    assert!(store.check_consistency().is_empty());
}

#[test]
fn directory_is_exclusive() {
    let tmp = tempdir().unwrap();
    let _store = LocalStore::open(tmp.path()).unwrap();
    assert!(matches!(LocalStore::open(tmp.path()), Err(CoreError::StoreLocked)));
}
