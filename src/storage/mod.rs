//! Backing-store adapters (§4.7, §6 "persisted state layout"): the async
//! surface the durable and in-memory stand-ins for "IndexedDB-like" and
//! "localStorage-like" caches both implement, keyed the same way as
//! [`crate::cache::RecordCache`] but reachable only through `async` methods
//! since a real backing store is never assumed to be free to read.
//!
//! `openDB` is idempotent; a schema version bump (derived from
//! [`crate::schema::Schema::schema_hash`]) rebuilds the object stores from
//! scratch. Every mutation is wrapped in a single transaction: on failure
//! the whole transform fails and the caller's log is not advanced.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::schema::Schema;
use crate::types::{Identity, Record, Transform};

/// A row of the `inverseRelationships` store (§6): `owner` is the record
/// this edge is filed under, pointing back at whichever record's
/// relationship produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverseEdgeRow {
    pub owner: Identity,
    pub relationship: String,
    pub related_record: Identity,
}

/// Everything one transform's application changes, applied atomically by
/// [`AsyncKvStore::commit`]. `inverse_edges` replaces the full inverse-edge
/// set filed under each touched owner (mirroring how `RecordCache` keeps
/// one `BTreeSet` per owner rather than diffing edges individually).
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub transform: Transform,
    pub upserts: Vec<Record>,
    pub deletes: Vec<Identity>,
    pub inverse_edges: Vec<(Identity, Vec<InverseEdgeRow>)>,
}

/// The async surface of §4.3 over a persisted `(type, id)`-keyed store.
#[async_trait]
pub trait AsyncKvStore: Send + Sync {
    /// Idempotent. Rebuilds the object stores if the schema's hash differs
    /// from what is on record.
    async fn open(&self, schema: &Schema) -> Result<()>;

    async fn get_record(&self, identity: &Identity) -> Result<Option<Record>>;

    async fn records_of_type(&self, type_: &str) -> Result<Vec<Record>>;

    async fn inverse_edges(&self, owner: &Identity) -> Result<Vec<InverseEdgeRow>>;

    async fn transform_log(&self) -> Result<Vec<Transform>>;

    /// Apply one transform's record/inverse-edge changes and append it to
    /// the log, as a single transaction.
    async fn commit(&self, change: StoreChange) -> Result<()>;
}

#[cfg(test)]
mod conformance {
    use super::*;

    fn jupiter() -> Record {
        let mut r = Record::shell("planet", "jupiter");
        r.attributes.insert("name".into(), serde_json::Value::String("Jupiter".into()));
        r
    }

    /// Exercises the same read/write/log surface against both adapters, so
    /// a bug specific to one backend (rather than the shared contract)
    /// shows up as a single-test failure instead of a silent divergence.
    async fn roundtrips_record_and_log(store: &dyn AsyncKvStore) {
        store.open(&Schema::new()).await.unwrap();
        assert!(store.get_record(&Identity::new("planet", "jupiter")).await.unwrap().is_none());

        let transform = Transform::new(vec![crate::types::Operation::AddRecord { record: jupiter() }]);
        store
            .commit(StoreChange {
                transform: transform.clone(),
                upserts: vec![jupiter()],
                deletes: vec![],
                inverse_edges: vec![],
            })
            .await
            .unwrap();

        let fetched = store.get_record(&Identity::new("planet", "jupiter")).await.unwrap().unwrap();
        assert_eq!(fetched.attributes.get("name"), jupiter().attributes.get("name"));

        let log = store.transform_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, transform.id);

        let edges = vec![InverseEdgeRow {
            owner: Identity::new("planet", "jupiter"),
            relationship: "moons".into(),
            related_record: Identity::new("moon", "io"),
        }];
        store
            .commit(StoreChange {
                transform: Transform::new(vec![]),
                upserts: vec![],
                deletes: vec![],
                inverse_edges: vec![(Identity::new("planet", "jupiter"), edges.clone())],
            })
            .await
            .unwrap();
        assert_eq!(store.inverse_edges(&Identity::new("planet", "jupiter")).await.unwrap(), edges);
        assert!(!store.records_of_type("planet").await.unwrap().is_empty());

        store
            .commit(StoreChange {
                transform: Transform::new(vec![]),
                upserts: vec![],
                deletes: vec![Identity::new("planet", "jupiter")],
                inverse_edges: vec![],
            })
            .await
            .unwrap();
        assert!(store.get_record(&Identity::new("planet", "jupiter")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_roundtrips() {
        roundtrips_record_and_log(&MemoryKvStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store_roundtrips() {
        roundtrips_record_and_log(&SqliteStore::open_in_memory().unwrap()).await;
    }
}
