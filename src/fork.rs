//! Fork/merge/rebase over a [`crate::cache::RecordCache`] snapshot (§4.6).
//!
//! Only a source with its own owned cache can meaningfully fork — the
//! in-memory source (`sources::memory`) is the one built on this. A forked
//! cache shares its parent's records by reference (`Arc<RecordCache>`) and
//! only materializes the operations applied after the fork point, mirroring
//! git's object-sharing model rather than a deep copy.

use std::sync::Arc;

use crate::cache::RecordCache;
use crate::error::Result;
use crate::types::{Operation, Transform};

/// A forked working copy: the cache snapshot plus everything needed to
/// replay, merge, or rebase its local history against the base it split
/// from.
pub struct Fork {
    pub cache: RecordCache,
    /// The frozen parent snapshot this fork was taken from. Rebasing
    /// replays from this same snapshot, not from the parent's live
    /// (possibly since-mutated) cache.
    base: Arc<RecordCache>,
    /// The log entry the base source was at when this fork was taken. `None`
    /// means the base's log was empty at fork time.
    pub fork_point: Option<String>,
    /// Transforms applied to this fork since the fork point, oldest first.
    local_transforms: Vec<Transform>,
}

impl Fork {
    pub fn new(base: Arc<RecordCache>, fork_point: Option<String>) -> Self {
        Self {
            cache: RecordCache::forked_from(Arc::clone(&base)),
            base,
            fork_point,
            local_transforms: Vec::new(),
        }
    }

    /// Apply and record a transform against this fork's own cache.
    pub fn apply(&mut self, transform: Transform) -> Result<()> {
        self.cache.patch(&transform.operations)?;
        self.local_transforms.push(transform);
        Ok(())
    }

    pub fn local_transforms(&self) -> &[Transform] {
        &self.local_transforms
    }

    /// Merge this fork's local transforms into a single coalesced
    /// transform, applying the algebraic simplifications from §4.6 (P7):
    ///
    /// - an `addRecord` immediately annihilated by a later `removeRecord`
    ///   on the same identity drops both operations entirely;
    /// - successive `replaceAttribute`/`replaceKey` on the same
    ///   `(record, path)` collapse to the last value (last write wins);
    /// - a `replaceRelatedRecords`/`replaceRelatedRecord` supersedes any
    ///   earlier operation on the same `(record, relationship)`;
    /// - anything not collapsed keeps its original relative order.
    pub fn merge(&self) -> Transform {
        let flattened: Vec<Operation> = self
            .local_transforms
            .iter()
            .flat_map(|t| t.operations.iter().cloned())
            .collect();
        Transform::new(coalesce(flattened))
    }

    /// Replay this fork's local transforms against the base transforms
    /// applied to the parent since the old fork point (§4.6 rebase):
    ///
    /// 1. unwind the fork's own operations (implicit — rebuilding from the
    ///    frozen base snapshot discards them rather than replaying their
    ///    inverses one at a time);
    /// 2. reapply the base's transforms since the old fork point, in order;
    /// 3. reapply this fork's own local transforms on top, in original order;
    /// 4. advance `fork_point` to the new base position.
    ///
    /// No-ops if `base_transforms_since` is empty, per §4.6.
    pub fn rebase(&mut self, base_transforms_since: &[Transform], new_fork_point: Option<String>) -> Result<()> {
        if base_transforms_since.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            base_transforms = base_transforms_since.len(),
            local_transforms = self.local_transforms.len(),
            "rebasing fork onto new base transforms"
        );
        let mut cache = RecordCache::forked_from(Arc::clone(&self.base));
        for t in base_transforms_since {
            cache.patch(&t.operations)?;
        }
        for t in &self.local_transforms {
            if let Err(e) = cache.patch(&t.operations) {
                tracing::warn!(transform = %t.id, error = %e, "local transform failed to replay during rebase");
                return Err(e);
            }
        }
        self.cache = cache;
        self.fork_point = new_fork_point;
        Ok(())
    }
}

fn coalesce(ops: Vec<Operation>) -> Vec<Operation> {
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Slot {
        Op(Operation),
        Annihilated,
    }

    let mut slots: Vec<Slot> = Vec::with_capacity(ops.len());
    // Index of the most recent slot touching a given (record, path) key, so
    // a later operation on the same key can collapse into it in place
    // rather than appending a duplicate.
    let mut last_attr: HashMap<(String, String), usize> = HashMap::new();
    let mut last_key: HashMap<(String, String), usize> = HashMap::new();
    let mut last_rel: HashMap<(String, String), usize> = HashMap::new();
    let mut last_add: HashMap<String, usize> = HashMap::new();
    let mut last_add_to_related: HashMap<(String, String, String), usize> = HashMap::new();
    // Every not-yet-annihilated add/remove-related slot touching a given
    // (record, relationship), regardless of which related record — a later
    // replace on that relationship supersedes all of them (§4.6).
    let mut related_touches: HashMap<(String, String), Vec<usize>> = HashMap::new();

    for op in ops {
        match &op {
            Operation::AddRecord { record } => {
                let id = record.identity().to_string();
                last_add.insert(id, slots.len());
                slots.push(Slot::Op(op));
            }
            Operation::UpdateRecord { record } => {
                let id = record.identity().to_string();
                if let Some(&idx) = last_add.get(&id) {
                    if let Slot::Op(Operation::AddRecord { record: base }) = &slots[idx] {
                        let mut merged = base.clone();
                        merged.keys.extend(record.keys.clone());
                        merged.attributes.extend(record.attributes.clone());
                        merged.relationships.extend(record.relationships.clone());
                        slots[idx] = Slot::Op(Operation::AddRecord { record: merged });
                        continue;
                    }
                }
                slots.push(Slot::Op(op));
            }
            Operation::RemoveRecord { record } => {
                let id = record.to_string();
                if let Some(&idx) = last_add.get(&id) {
                    if matches!(slots[idx], Slot::Op(Operation::AddRecord { .. })) {
                        slots[idx] = Slot::Annihilated;
                        last_add.remove(&id);
                        continue;
                    }
                }
                slots.push(Slot::Op(op));
            }
            Operation::AddToRelatedRecords { record, relationship, related_record } => {
                let k = (record.to_string(), relationship.clone(), related_record.to_string());
                last_add_to_related.insert(k, slots.len());
                related_touches
                    .entry((record.to_string(), relationship.clone()))
                    .or_default()
                    .push(slots.len());
                slots.push(Slot::Op(op));
            }
            Operation::RemoveFromRelatedRecords { record, relationship, related_record } => {
                let k = (record.to_string(), relationship.clone(), related_record.to_string());
                if let Some(&idx) = last_add_to_related.get(&k) {
                    if matches!(slots[idx], Slot::Op(Operation::AddToRelatedRecords { .. })) {
                        slots[idx] = Slot::Annihilated;
                        last_add_to_related.remove(&k);
                        continue;
                    }
                }
                related_touches
                    .entry((record.to_string(), relationship.clone()))
                    .or_default()
                    .push(slots.len());
                slots.push(Slot::Op(op));
            }
            Operation::ReplaceAttribute { record, attribute, .. } => {
                let key = (record.to_string(), attribute.clone());
                if let Some(&idx) = last_attr.get(&key) {
                    slots[idx] = Slot::Op(op);
                } else {
                    last_attr.insert(key, slots.len());
                    slots.push(Slot::Op(op));
                }
            }
            Operation::ReplaceKey { record, key, .. } => {
                let k = (record.to_string(), key.clone());
                if let Some(&idx) = last_key.get(&k) {
                    slots[idx] = Slot::Op(op);
                } else {
                    last_key.insert(k, slots.len());
                    slots.push(Slot::Op(op));
                }
            }
            Operation::ReplaceRelatedRecords { record, relationship, .. }
            | Operation::ReplaceRelatedRecord { record, relationship, .. } => {
                let k = (record.to_string(), relationship.clone());
                if let Some(touched) = related_touches.remove(&k) {
                    for idx in touched {
                        slots[idx] = Slot::Annihilated;
                    }
                }
                if let Some(&idx) = last_rel.get(&k) {
                    slots[idx] = Slot::Op(op);
                } else {
                    last_rel.insert(k, slots.len());
                    slots.push(Slot::Op(op));
                }
            }
            _ => slots.push(Slot::Op(op)),
        }
    }

    slots
        .into_iter()
        .filter_map(|s| match s {
            Slot::Op(op) => Some(op),
            Slot::Annihilated => None,
        })
        .collect()
}
