//! In-memory record and control-flag stores (process lifetime only).

use async_trait::async_trait;
use chrono::Utc;
use relay_types::{
    ControlFlag, ControlStore, Direction, EventRecord, EventStore, RecordFilter, RecordPatch,
    StagedWrite, StoreError, StoreTransaction,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

struct StoredRecord {
    /// Insertion sequence; breaks `created_at` ties.
    seq: u64,
    record: EventRecord,
}

#[derive(Default)]
struct Tables {
    outbox: HashMap<String, StoredRecord>,
    inbox: HashMap<String, StoredRecord>,
    next_seq: u64,
}

impl Tables {
    fn table(&self, direction: Direction) -> &HashMap<String, StoredRecord> {
        match direction {
            Direction::Outbox => &self.outbox,
            Direction::Inbox => &self.inbox,
        }
    }

    fn table_mut(&mut self, direction: Direction) -> &mut HashMap<String, StoredRecord> {
        match direction {
            Direction::Outbox => &mut self.outbox,
            Direction::Inbox => &mut self.inbox,
        }
    }
}

/// In-memory implementation of EventStore.
/// Both tables sit behind one lock so a transaction spanning them applies atomically.
pub struct InMemoryEventStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    /// Reject the whole transaction before touching any row.
    fn validate(tables: &Tables, writes: &[StagedWrite]) -> Result<(), StoreError> {
        let mut staged: HashSet<(Direction, &str)> = HashSet::new();
        for write in writes {
            match write {
                StagedWrite::Create(record) => {
                    let key = (record.direction, record.id.as_str());
                    if tables.table(record.direction).contains_key(&record.id)
                        || !staged.insert(key)
                    {
                        return Err(StoreError::Duplicate(record.id.clone()));
                    }
                }
                StagedWrite::Update { direction, id, .. } => {
                    if !tables.table(*direction).contains_key(id)
                        && !staged.contains(&(*direction, id.as_str()))
                    {
                        return Err(StoreError::Backend(format!(
                            "update of unknown {} record {}",
                            direction, id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError> {
        let writes = tx.into_writes();
        let mut guard = self.tables.write().await;
        Self::validate(&guard, &writes)?;
        let now = Utc::now();
        for write in writes {
            match write {
                StagedWrite::Create(record) => {
                    let seq = guard.next_seq;
                    guard.next_seq += 1;
                    guard
                        .table_mut(record.direction)
                        .insert(record.id.clone(), StoredRecord { seq, record });
                }
                StagedWrite::Update {
                    direction,
                    id,
                    patch,
                } => {
                    if let Some(row) = guard.table_mut(direction).get_mut(&id) {
                        patch.apply_to(&mut row.record, now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get(&self, direction: Direction, id: &str) -> Result<Option<EventRecord>, StoreError> {
        let guard = self.tables.read().await;
        Ok(guard.table(direction).get(id).map(|r| r.record.clone()))
    }

    async fn update(
        &self,
        direction: Direction,
        id: &str,
        patch: &RecordPatch,
    ) -> Result<bool, StoreError> {
        let mut guard = self.tables.write().await;
        match guard.table_mut(direction).get_mut(id) {
            Some(row) if patch.allows(&row.record) => {
                patch.apply_to(&mut row.record, Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(
        &self,
        direction: Direction,
        filter: &RecordFilter,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let guard = self.tables.read().await;
        let mut rows: Vec<&StoredRecord> = guard
            .table(direction)
            .values()
            .filter(|r| filter.matches(&r.record))
            .collect();
        rows.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        Ok(rows.into_iter().map(|r| r.record.clone()).collect())
    }
}

/// In-memory implementation of ControlStore.
pub struct InMemoryControlStore {
    flags: RwLock<HashMap<(String, ControlFlag), bool>>,
}

impl InMemoryControlStore {
    pub fn new() -> Self {
        Self {
            flags: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryControlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlStore for InMemoryControlStore {
    async fn flag(&self, tenant_id: &str, flag: ControlFlag) -> Result<Option<bool>, StoreError> {
        let guard = self.flags.read().await;
        Ok(guard.get(&(tenant_id.to_string(), flag)).copied())
    }

    async fn set_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        value: bool,
    ) -> Result<(), StoreError> {
        self.flags
            .write()
            .await
            .insert((tenant_id.to_string(), flag), value);
        Ok(())
    }

    async fn replace_flag(
        &self,
        tenant_id: &str,
        flag: ControlFlag,
        expected: bool,
        value: bool,
    ) -> Result<bool, StoreError> {
        let mut guard = self.flags.write().await;
        match guard.get_mut(&(tenant_id.to_string(), flag)) {
            Some(current) if *current == expected => {
                *current = value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{EnvelopeBuilder, EventStatus};
    use serde_json::json;

    fn record(direction: Direction, event_type: &str, tenant: &str) -> EventRecord {
        let envelope = EnvelopeBuilder::default().build(event_type, json!({ "k": 1 }));
        match direction {
            Direction::Outbox => EventRecord::outbound(&envelope, "name", "desc", tenant, "system"),
            Direction::Inbox => EventRecord::inbound(&envelope, "name", "desc", tenant, "system"),
        }
    }

    #[tokio::test]
    async fn commit_applies_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let existing = record(Direction::Outbox, "lmp_grade_submitted", "t1");
        store.create(existing.clone()).await.unwrap();

        let mut tx = StoreTransaction::new();
        let fresh = record(Direction::Outbox, "lmp_grade_submitted", "t1");
        let fresh_id = tx.create(fresh);
        tx.create(existing.clone());
        let err = store.commit(tx).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == existing.id));
        assert!(store.get(Direction::Outbox, &fresh_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let store = InMemoryEventStore::new();
        let mut tx = StoreTransaction::new();
        let id = tx.create(record(Direction::Outbox, "lmp_grade_submitted", "t1"));
        tx.rollback();
        assert!(store.get(Direction::Outbox, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_insertion_tiebreak() {
        let store = InMemoryEventStore::new();
        let a = record(Direction::Outbox, "e", "t1");
        let mut b = record(Direction::Outbox, "e", "t1");
        let mut older = record(Direction::Outbox, "e", "t1");
        // a and b share a timestamp; b was inserted later.
        b.created_at = a.created_at;
        older.created_at = a.created_at - chrono::Duration::seconds(10);
        store.create(older.clone()).await.unwrap();
        store.create(a.clone()).await.unwrap();
        store.create(b.clone()).await.unwrap();

        let ids: Vec<String> = store
            .list(Direction::Outbox, &RecordFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id, older.id]);
    }

    #[tokio::test]
    async fn list_filters_by_tenant_and_status() {
        let store = InMemoryEventStore::new();
        store.create(record(Direction::Inbox, "x", "t1")).await.unwrap();
        store.create(record(Direction::Inbox, "x", "t2")).await.unwrap();
        store.create(record(Direction::Outbox, "x", "t1")).await.unwrap();

        let filter = RecordFilter {
            tenant_id: Some("t1".into()),
            status: Some(EventStatus::Received),
            ..Default::default()
        };
        let inbox = store.list(Direction::Inbox, &filter).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(store.list(Direction::Outbox, &filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn guarded_update_writes_only_from_expected_status() {
        let store = InMemoryEventStore::new();
        let id = store
            .create(record(Direction::Outbox, "e", "t1"))
            .await
            .unwrap();
        let publish = RecordPatch::delivered().when_status(EventStatus::Pending);
        assert!(store.update(Direction::Outbox, &id, &publish).await.unwrap());

        let late_failure = RecordPatch::delivery_failed("late").when_status(EventStatus::Pending);
        assert!(!store
            .update(Direction::Outbox, &id, &late_failure)
            .await
            .unwrap());
        let got = store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert_eq!(got.status, EventStatus::Published);
        assert_eq!(got.retry_count, 0);

        let too_recent = RecordPatch::default()
            .with_status(EventStatus::Pending)
            .when_modified_before(got.modified_at);
        assert!(!store
            .update(Direction::Outbox, &id, &too_recent)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn update_unknown_id_returns_false() {
        let store = InMemoryEventStore::new();
        let ok = store
            .update(Direction::Outbox, "nope", &RecordPatch::delivered())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn concurrent_field_updates_both_persist() {
        let store = Arc::new(InMemoryEventStore::new());
        let r = record(Direction::Outbox, "e", "t1");
        let id = store.create(r).await.unwrap();

        let s1 = store.clone();
        let id1 = id.clone();
        let toggle = tokio::spawn(async move {
            s1.update(
                Direction::Outbox,
                &id1,
                &RecordPatch::by_operator("admin").with_enabled(false),
            )
            .await
        });
        let s2 = store.clone();
        let id2 = id.clone();
        let deliver = tokio::spawn(async move {
            s2.update(Direction::Outbox, &id2, &RecordPatch::delivery_failed("down"))
                .await
        });
        assert!(toggle.await.unwrap().unwrap());
        assert!(deliver.await.unwrap().unwrap());

        let got = store.get(Direction::Outbox, &id).await.unwrap().unwrap();
        assert!(!got.enabled);
        assert_eq!(got.status, EventStatus::Failed);
        assert_eq!(got.retry_count, 1);
        assert_eq!(got.updated_by.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn replace_flag_only_from_expected_value() {
        let store = InMemoryControlStore::new();
        let flag = ControlFlag::EventsConsuming;
        assert!(!store.replace_flag("t1", flag, true, false).await.unwrap());
        assert_eq!(store.flag("t1", flag).await.unwrap(), None);

        store.set_flag("t1", flag, false).await.unwrap();
        assert!(!store.replace_flag("t1", flag, true, false).await.unwrap());
        assert!(store.replace_flag("t1", flag, false, true).await.unwrap());
        assert_eq!(store.flag("t1", flag).await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn control_flags_are_tenant_scoped() {
        let store = InMemoryControlStore::new();
        assert_eq!(
            store.flag("t1", ControlFlag::EventsPublishing).await.unwrap(),
            None
        );
        store
            .set_flag("t1", ControlFlag::EventsPublishing, false)
            .await
            .unwrap();
        assert_eq!(
            store.flag("t1", ControlFlag::EventsPublishing).await.unwrap(),
            Some(false)
        );
        assert_eq!(
            store.flag("t2", ControlFlag::EventsPublishing).await.unwrap(),
            None
        );
        assert_eq!(
            store.flag("t1", ControlFlag::EventsConsuming).await.unwrap(),
            None
        );
    }
}
