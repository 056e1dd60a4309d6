//! The in-memory source: a `SourceHandlers` implementation that owns a
//! plain [`RecordCache`] and is the only source type fork/merge/rebase
//! (§4.6) are built around — forking requires an owned, forkable cache,
//! and the networked JSON:API source has no local cache to fork.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;

use crate::cache::RecordCache;
use crate::error::Result;
use crate::fork::Fork;
use crate::schema::Schema;
use crate::source::{Capabilities, FullResponse, Hints, Source, SourceSettings, UpdateDetails};
use crate::types::{Operation, RequestOptions, Transform};

pub struct MemoryHandlers {
    cache: SyncMutex<RecordCache>,
}

impl MemoryHandlers {
    pub fn new(schema: Schema) -> Self {
        Self {
            cache: SyncMutex::new(RecordCache::new(schema)),
        }
    }
}

#[async_trait]
impl crate::source::SourceHandlers for MemoryHandlers {
    async fn handle_update(
        &self,
        transform: &Transform,
        _hints: &Hints,
    ) -> Result<FullResponse<Vec<Operation>, UpdateDetails>> {
        let inverses = self.cache.lock().patch(&transform.operations)?;
        let mut response = FullResponse::new(transform.operations.clone());
        response.details = Some(UpdateDetails {
            inverse_operations: inverses,
        });
        Ok(response)
    }

    async fn handle_sync(&self, transform: &Transform) -> Result<()> {
        self.cache.lock().patch(&transform.operations)?;
        Ok(())
    }

    fn cache(&self) -> Option<&SyncMutex<RecordCache>> {
        Some(&self.cache)
    }
}

/// Construct a `Source` backed by an in-memory cache, with `updatable`,
/// `queryable`, and `syncable` installed (§4.5 — `pullable`/`pushable` have
/// no meaning without a remote counterpart).
pub fn memory_source(name: impl Into<String>, schema: Schema) -> Source<MemoryHandlers> {
    let settings = SourceSettings {
        name: name.into(),
        schema: schema.clone(),
        capabilities: Capabilities {
            updatable: true,
            queryable: true,
            syncable: true,
            ..Default::default()
        },
        default_max_requests: None,
    };
    let source = Source::new(settings, MemoryHandlers::new(schema));
    source.mark_activated();
    source
}

impl Source<MemoryHandlers> {
    /// Snapshot the current cache into a read-only base and start a fork
    /// (§4.6). `fork_point` is the log head at the moment of the snapshot.
    pub fn fork(&self) -> Fork {
        let snapshot = Arc::new(self.handlers.cache.lock().clone());
        Fork::new(snapshot, self.log_head())
    }

    /// Coalesce a fork's local transforms into one reduced transform and
    /// apply it to this (the parent) source.
    pub async fn merge(&self, fork: &Fork) -> Result<Transform> {
        let merged = fork.merge();
        self.update(merged.clone(), RequestOptions::new()).await?;
        Ok(merged)
    }

    /// Replay everything this source logged since `fork`'s fork point onto
    /// the fork, then replay the fork's own local transforms on top,
    /// advancing its fork point to this source's current log head. No-op
    /// if nothing happened on this source since the fork was taken.
    pub fn rebase(&self, fork: &mut Fork) -> Result<()> {
        let base_transforms = self.transforms_since_point(fork.fork_point.as_deref())?;
        fork.rebase(&base_transforms, self.log_head())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, Record};
    use serde_json::Value;

    fn io_on_jupiter() -> Record {
        let mut r = Record::shell("moon", "io");
        r.relationships.insert(
            "planet".into(),
            crate::types::RelationshipData::ToOne(Some(Identity::new("planet", "jupiter"))),
        );
        r
    }

    fn planets_and_moons_schema() -> Schema {
        use crate::schema::{RecordTypeDef, RelationshipDef, RelationshipKind};
        use std::collections::BTreeMap;
        let mut schema = Schema::new();
        schema.add_type(
            "planet",
            RecordTypeDef {
                attributes: vec!["name".into()],
                relationships: BTreeMap::from([(
                    "moons".to_string(),
                    RelationshipDef {
                        kind: RelationshipKind::HasMany,
                        type_: "moon".into(),
                        inverse: Some("planet".into()),
                    },
                )]),
            },
        );
        schema.add_type(
            "moon",
            RecordTypeDef {
                attributes: vec![],
                relationships: BTreeMap::from([(
                    "planet".to_string(),
                    RelationshipDef {
                        kind: RelationshipKind::HasOne,
                        type_: "planet".into(),
                        inverse: Some("moons".into()),
                    },
                )]),
            },
        );
        schema
    }

    #[tokio::test]
    async fn s4_fork_rebase_keeps_local_removal_and_replays_parent_addition() {
        let source = memory_source("memory", planets_and_moons_schema());
        source
            .update(
                Transform::new(vec![Operation::AddRecord { record: Record::shell("planet", "jupiter") }]),
                RequestOptions::new(),
            )
            .await
            .unwrap();
        source
            .update(Transform::new(vec![Operation::AddRecord { record: io_on_jupiter() }]), RequestOptions::new())
            .await
            .unwrap();

        let mut fork = source.fork();
        fork.apply(Transform::new(vec![Operation::RemoveRecord {
            record: Identity::new("moon", "io"),
        }]))
        .unwrap();

        source
            .update(
                Transform::new(vec![Operation::AddRecord {
                    record: {
                        let mut r = Record::shell("moon", "europa");
                        r.relationships.insert(
                            "planet".into(),
                            crate::types::RelationshipData::ToOne(Some(Identity::new("planet", "jupiter"))),
                        );
                        r
                    },
                }]),
                RequestOptions::new(),
            )
            .await
            .unwrap();

        source.rebase(&mut fork).unwrap();

        let jupiter = fork.cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        let moons = jupiter.relationships.get("moons").unwrap().as_to_many().unwrap();
        assert_eq!(moons, &[Identity::new("moon", "europa")]);
    }

    #[tokio::test]
    async fn merge_applies_coalesced_fork_transform_to_parent() {
        let source = memory_source("memory", Schema::new());
        let mut fork = source.fork();
        fork.apply(Transform::new(vec![Operation::AddRecord {
            record: Record::shell("planet", "jupiter"),
        }]))
        .unwrap();
        fork.apply(Transform::new(vec![Operation::ReplaceAttribute {
            record: Identity::new("planet", "jupiter"),
            attribute: "name".into(),
            value: Some(Value::String("Jupiter".into())),
        }]))
        .unwrap();

        source.merge(&fork).await.unwrap();

        let record = source
            .query(
                crate::types::Query::new(crate::types::QueryExpression::FindRecord {
                    record: Identity::new("planet", "jupiter"),
                }),
                RequestOptions::new(),
            )
            .await
            .unwrap();
        match record.data {
            Some(crate::types::QueryResultData::One(Some(r))) => {
                assert_eq!(r.attributes.get("name"), Some(&Value::String("Jupiter".into())));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
