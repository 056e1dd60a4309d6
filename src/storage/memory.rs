//! The "localStorage-like" backing store: everything lives in one
//! process-local map, guarded by a single `RwLock` (mirrors the teacher's
//! `MemoryMapped` wrapper, minus its batched-flush-to-inner-backend layer,
//! which has no counterpart for a store with no inner backend of its own).

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{AsyncKvStore, InverseEdgeRow, StoreChange};
use crate::error::Result;
use crate::schema::Schema;
use crate::types::{Identity, Record, Transform};

#[derive(Default)]
struct State {
    records: HashMap<Identity, Record>,
    inverse_edges: HashMap<Identity, Vec<InverseEdgeRow>>,
    log: Vec<Transform>,
    schema_hash: Option<u64>,
}

pub struct MemoryKvStore {
    state: RwLock<State>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncKvStore for MemoryKvStore {
    async fn open(&self, schema: &Schema) -> Result<()> {
        let hash = schema.schema_hash();
        let mut state = self.state.write();
        if state.schema_hash != Some(hash) {
            *state = State {
                schema_hash: Some(hash),
                ..State::default()
            };
        }
        Ok(())
    }

    async fn get_record(&self, identity: &Identity) -> Result<Option<Record>> {
        Ok(self.state.read().records.get(identity).cloned())
    }

    async fn records_of_type(&self, type_: &str) -> Result<Vec<Record>> {
        Ok(self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.type_ == type_)
            .cloned()
            .collect())
    }

    async fn inverse_edges(&self, owner: &Identity) -> Result<Vec<InverseEdgeRow>> {
        Ok(self.state.read().inverse_edges.get(owner).cloned().unwrap_or_default())
    }

    async fn transform_log(&self) -> Result<Vec<Transform>> {
        Ok(self.state.read().log.clone())
    }

    async fn commit(&self, change: StoreChange) -> Result<()> {
        let mut state = self.state.write();
        for record in change.upserts {
            state.records.insert(record.identity(), record);
        }
        for identity in change.deletes {
            state.records.remove(&identity);
            state.inverse_edges.remove(&identity);
        }
        for (owner, edges) in change.inverse_edges {
            if edges.is_empty() {
                state.inverse_edges.remove(&owner);
            } else {
                state.inverse_edges.insert(owner, edges);
            }
        }
        state.log.push(change.transform);
        Ok(())
    }
}
