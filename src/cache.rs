//! The in-memory record cache (§4.3): an operation-sourced store over a
//! `{type -> id -> Record}` graph plus an inverse-relationship index that
//! cascades relationship edits to the opposite side (I4), producing an
//! inverse operation for every mutation (I3, the rollback substrate).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{OrbitError, Result};
use crate::schema::Schema;
use crate::types::{Identity, Operation, Record, RelationshipData};

/// `{type -> keyName -> keyValue -> id}` reverse index, updated on every
/// mutation that writes a `keys[k]` (§4.3 "Key map").
#[derive(Debug, Default, Clone)]
pub struct KeyMap {
    index: HashMap<String, HashMap<String, HashMap<String, String>>>,
}

impl KeyMap {
    pub fn id_for(&self, type_: &str, key_name: &str, key_value: &str) -> Option<&str> {
        self.index
            .get(type_)
            .and_then(|m| m.get(key_name))
            .and_then(|m| m.get(key_value))
            .map(String::as_str)
    }

    fn set(&mut self, type_: &str, key_name: &str, key_value: &str, id: &str) {
        self.index
            .entry(type_.to_string())
            .or_default()
            .entry(key_name.to_string())
            .or_default()
            .insert(key_value.to_string(), id.to_string());
    }

    fn unset(&mut self, type_: &str, key_name: &str, key_value: &str) {
        if let Some(m) = self.index.get_mut(type_).and_then(|m| m.get_mut(key_name)) {
            m.remove(key_value);
        }
    }
}

/// An entry in the inverse-relationship index: `owner.relationship` points
/// at the record this entry is keyed under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct InverseEdge {
    owner: Identity,
    relationship: String,
}

/// `{type -> id -> Record}` plus the inverse-relationship index (§4.3).
///
/// A forked cache (`base: Some(..)`) falls through reads to its parent for
/// anything not present — and not explicitly removed — locally, per §4.6.
#[derive(Clone)]
pub struct RecordCache {
    schema: Schema,
    records: HashMap<String, IndexMap<String, Record>>,
    inverse_relationships: HashMap<Identity, BTreeSet<InverseEdge>>,
    key_map: Option<KeyMap>,
    base: Option<Arc<RecordCache>>,
    /// Identities tombstoned locally so a fork's removal shadows the
    /// parent's copy rather than falling through to it.
    removed_from_base: std::collections::HashSet<Identity>,
}

impl RecordCache {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            records: HashMap::new(),
            inverse_relationships: HashMap::new(),
            key_map: None,
            base: None,
            removed_from_base: std::collections::HashSet::new(),
        }
    }

    pub fn with_key_map(mut self) -> Self {
        self.key_map = Some(KeyMap::default());
        self
    }

    /// Construct a cache that falls through reads to `base` (§4.6 fork).
    pub fn forked_from(base: Arc<RecordCache>) -> Self {
        Self {
            schema: base.schema.clone_for_fork(),
            records: HashMap::new(),
            inverse_relationships: HashMap::new(),
            key_map: base.key_map.as_ref().map(|_| KeyMap::default()),
            base: Some(base),
            removed_from_base: std::collections::HashSet::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn key_map(&self) -> Option<&KeyMap> {
        self.key_map.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none() && self.records.values().all(|m| m.is_empty())
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub fn get_record_sync(&self, identity: &Identity) -> Option<Record> {
        if let Some(local) = self
            .records
            .get(&identity.type_)
            .and_then(|m| m.get(&identity.id))
        {
            return Some(local.clone());
        }
        if self.removed_from_base.contains(identity) {
            return None;
        }
        self.base.as_ref().and_then(|b| b.get_record_sync(identity))
    }

    /// All records of a type, own-records first in insertion order, then
    /// any base-only records not locally shadowed — in the base's order.
    pub fn records_of_type(&self, type_: &str) -> Vec<Record> {
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut out = Vec::new();

        if let Some(local) = self.records.get(type_) {
            for (id, record) in local {
                seen.insert(id.as_str());
                out.push(record.clone());
            }
        }
        if let Some(base) = &self.base {
            for record in base.records_of_type(type_) {
                if seen.contains(record.id.as_str()) {
                    continue;
                }
                let identity = record.identity();
                if self.removed_from_base.contains(&identity) {
                    continue;
                }
                out.push(record);
            }
        }
        out
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    /// Apply a sequence of operations, returning their inverses in reverse
    /// forward order (directly replayable for rollback, per §4.3).
    pub fn patch(&mut self, operations: &[Operation]) -> Result<Vec<Operation>> {
        tracing::debug!(operations = operations.len(), "patching cache");
        let mut inverses = Vec::with_capacity(operations.len());
        for op in operations {
            inverses.extend(self.apply_one(op).map_err(|e| {
                tracing::warn!(target = %op.target(), error = %e, "operation failed to apply");
                e
            })?);
        }
        inverses.reverse();
        Ok(inverses)
    }

    /// A mutable handle on the local overlay's copy of a record, seeded
    /// from the base (via `get_record_sync`, so forks materialize with the
    /// base's existing attributes/relationships) the first time it is
    /// touched locally, rather than a bare shell that would otherwise wipe
    /// inherited state out from under it.
    fn record_mut_entry(&mut self, type_: &str, id: &str) -> &mut Record {
        if !self
            .records
            .get(type_)
            .map(|m| m.contains_key(id))
            .unwrap_or(false)
        {
            let seed = self
                .get_record_sync(&Identity::new(type_, id))
                .unwrap_or_else(|| Record::shell(type_, id));
            self.records
                .entry(type_.to_string())
                .or_default()
                .insert(id.to_string(), seed);
        }
        self.records.get_mut(type_).unwrap().get_mut(id).unwrap()
    }

    /// The inverse(s) of a single forward operation. Every arm but
    /// `UpdateRecord` inverts to exactly one operation; `UpdateRecord` can
    /// additionally need a removal per attribute that didn't exist before
    /// the update, so it's the only arm that returns more than one.
    fn apply_one(&mut self, op: &Operation) -> Result<Vec<Operation>> {
        match op {
            Operation::AddRecord { record } => self.add_record(record).map(|op| vec![op]),
            Operation::UpdateRecord { record } => self.update_record(record),
            Operation::RemoveRecord { record } => self.remove_record(record).map(|op| vec![op]),
            Operation::ReplaceKey { record, key, value } => self
                .replace_key(record, key, value.clone())
                .map(|op| vec![op]),
            Operation::ReplaceAttribute {
                record,
                attribute,
                value,
            } => self
                .replace_attribute(record, attribute, value.clone())
                .map(|op| vec![op]),
            Operation::AddToRelatedRecords {
                record,
                relationship,
                related_record,
            } => self
                .add_to_related_records(record, relationship, related_record)
                .map(|op| vec![op]),
            Operation::RemoveFromRelatedRecords {
                record,
                relationship,
                related_record,
            } => self
                .remove_from_related_records(record, relationship, related_record)
                .map(|op| vec![op]),
            Operation::ReplaceRelatedRecords {
                record,
                relationship,
                related_records,
            } => self
                .replace_related_records(record, relationship, related_records)
                .map(|op| vec![op]),
            Operation::ReplaceRelatedRecord {
                record,
                relationship,
                related_record,
            } => self
                .replace_related_record(record, relationship, related_record.clone())
                .map(|op| vec![op]),
        }
    }

    fn add_record(&mut self, record: &Record) -> Result<Operation> {
        let identity = record.identity();
        self.records
            .entry(identity.type_.clone())
            .or_default()
            .insert(identity.id.clone(), record.clone());

        if let Some(km) = &mut self.key_map {
            for (k, v) in &record.keys {
                km.set(&identity.type_, k, v, &identity.id);
            }
        }

        for (rel, data) in &record.relationships {
            for target in relationship_targets(data) {
                self.link(&identity, rel, &target);
            }
        }

        Ok(Operation::RemoveRecord { record: identity })
    }

    fn update_record(&mut self, incoming: &Record) -> Result<Vec<Operation>> {
        let identity = incoming.identity();
        let previous = self.get_record_sync(&identity);
        let mut current = previous
            .clone()
            .unwrap_or_else(|| Record::shell(&identity.type_, &identity.id));

        // Pre-image: for every key/attribute in `incoming` that already
        // existed, its old value; ones that didn't exist are left out of
        // `pre_image` and instead undone with an explicit removal op below,
        // so replaying the inverse restores "absent" rather than "null"
        // (I3: the inverse must restore the exact prior state).
        let mut pre_image = Record::shell(&identity.type_, &identity.id);
        let mut removals = Vec::new();

        for (k, v) in &incoming.keys {
            match current.keys.get(k).cloned() {
                Some(old) => {
                    pre_image.keys.insert(k.clone(), old);
                }
                None => removals.push(Operation::ReplaceKey {
                    record: identity.clone(),
                    key: k.clone(),
                    value: None,
                }),
            }
            current.keys.insert(k.clone(), v.clone());
            if let Some(km) = &mut self.key_map {
                km.set(&identity.type_, k, v, &identity.id);
            }
        }

        for (k, v) in &incoming.attributes {
            match current.attributes.get(k).cloned() {
                Some(old) => {
                    pre_image.attributes.insert(k.clone(), old);
                }
                None => removals.push(Operation::ReplaceAttribute {
                    record: identity.clone(),
                    attribute: k.clone(),
                    value: None,
                }),
            }
            current.attributes.insert(k.clone(), v.clone());
        }

        for (rel, new_data) in &incoming.relationships {
            let old_data = current.relationships.get(rel).cloned();
            pre_image.relationships.insert(
                rel.clone(),
                old_data.clone().unwrap_or_else(|| empty_like(new_data)),
            );

            let old_targets = old_data
                .as_ref()
                .map(relationship_targets)
                .unwrap_or_default();
            let new_targets = relationship_targets(new_data);

            for removed in old_targets.iter().filter(|t| !new_targets.contains(t)) {
                self.unlink(&identity, rel, removed);
            }
            for added in new_targets.iter().filter(|t| !old_targets.contains(t)) {
                self.link(&identity, rel, added);
            }

            current.relationships.insert(rel.clone(), new_data.clone());
        }

        self.records
            .entry(identity.type_.clone())
            .or_default()
            .insert(identity.id.clone(), current);

        let mut inverses = vec![Operation::UpdateRecord { record: pre_image }];
        inverses.extend(removals);
        Ok(inverses)
    }

    fn remove_record(&mut self, identity: &Identity) -> Result<Operation> {
        let pre_image = self
            .get_record_sync(identity)
            .unwrap_or_else(|| Record::shell(&identity.type_, &identity.id));

        // Strip every inverse edge referring to this record (cascade to
        // the owning side) before dropping the record itself.
        if let Some(edges) = self
            .inverse_relationships
            .remove(identity)
            .map(|s| s.into_iter().collect::<Vec<_>>())
        {
            for edge in edges {
                self.remove_target_from_owner(&edge.owner, &edge.relationship, identity);
            }
        }

        // This record's own outgoing edges become dangling once it is
        // gone; drop the corresponding index entries and cascade.
        for (rel, data) in &pre_image.relationships {
            for target in relationship_targets(data) {
                self.unlink(identity, rel, &target);
            }
        }

        if let Some(km) = &mut self.key_map {
            for (k, v) in &pre_image.keys {
                km.unset(&identity.type_, k, v);
            }
        }

        self.records
            .get_mut(&identity.type_)
            .map(|m| m.shift_remove(&identity.id));
        self.removed_from_base.insert(identity.clone());

        Ok(Operation::AddRecord { record: pre_image })
    }

    fn replace_key(&mut self, identity: &Identity, key: &str, value: Option<String>) -> Result<Operation> {
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let previous = record.keys.get(key).cloned();
        match &value {
            Some(v) => {
                record.keys.insert(key.to_string(), v.clone());
            }
            None => {
                record.keys.remove(key);
            }
        }
        if let Some(km) = &mut self.key_map {
            if let Some(prev) = &previous {
                km.unset(&identity.type_, key, prev);
            }
            if let Some(v) = &value {
                km.set(&identity.type_, key, v, &identity.id);
            }
        }
        Ok(Operation::ReplaceKey {
            record: identity.clone(),
            key: key.to_string(),
            value: previous,
        })
    }

    fn replace_attribute(
        &mut self,
        identity: &Identity,
        attribute: &str,
        value: Option<Value>,
    ) -> Result<Operation> {
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let previous = record.attributes.get(attribute).cloned();
        match &value {
            Some(v) => {
                record.attributes.insert(attribute.to_string(), v.clone());
            }
            None => {
                record.attributes.remove(attribute);
            }
        }
        Ok(Operation::ReplaceAttribute {
            record: identity.clone(),
            attribute: attribute.to_string(),
            value: previous,
        })
    }

    fn add_to_related_records(
        &mut self,
        identity: &Identity,
        relationship: &str,
        related: &Identity,
    ) -> Result<Operation> {
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let entry = record
            .relationships
            .entry(relationship.to_string())
            .or_insert_with(|| RelationshipData::ToMany(Vec::new()));
        let list = match entry {
            RelationshipData::ToMany(v) => v,
            RelationshipData::ToOne(_) => {
                return Err(OrbitError::Assertion(format!(
                    "relationship `{relationship}` is to-one, not to-many"
                )))
            }
        };
        let already_present = list.iter().any(|x| x == related);
        if !already_present {
            list.push(related.clone());
            self.link(identity, relationship, related);
        }

        Ok(Operation::RemoveFromRelatedRecords {
            record: identity.clone(),
            relationship: relationship.to_string(),
            related_record: related.clone(),
        })
    }

    fn remove_from_related_records(
        &mut self,
        identity: &Identity,
        relationship: &str,
        related: &Identity,
    ) -> Result<Operation> {
        // Per §9's open-question resolution: create the shell uniformly
        // even if the base record does not exist yet.
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let entry = record
            .relationships
            .entry(relationship.to_string())
            .or_insert_with(|| RelationshipData::ToMany(Vec::new()));
        let list = match entry {
            RelationshipData::ToMany(v) => v,
            RelationshipData::ToOne(_) => {
                return Err(OrbitError::Assertion(format!(
                    "relationship `{relationship}` is to-one, not to-many"
                )))
            }
        };
        let was_present = list.iter().any(|x| x == related);
        list.retain(|x| x != related);
        if was_present {
            self.unlink(identity, relationship, related);
        }

        Ok(Operation::AddToRelatedRecords {
            record: identity.clone(),
            relationship: relationship.to_string(),
            related_record: related.clone(),
        })
    }

    fn replace_related_records(
        &mut self,
        identity: &Identity,
        relationship: &str,
        new_list: &[Identity],
    ) -> Result<Operation> {
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let old_list = match record.relationships.get(relationship) {
            Some(RelationshipData::ToMany(v)) => v.clone(),
            Some(RelationshipData::ToOne(_)) => {
                return Err(OrbitError::Assertion(format!(
                    "relationship `{relationship}` is to-one, not to-many"
                )))
            }
            None => Vec::new(),
        };

        let added: Vec<Identity> = new_list.iter().filter(|x| !old_list.contains(x)).cloned().collect();
        let removed: Vec<Identity> = old_list.iter().filter(|x| !new_list.contains(x)).cloned().collect();

        let record = self.record_mut_entry(&identity.type_, &identity.id);
        record
            .relationships
            .insert(relationship.to_string(), RelationshipData::ToMany(new_list.to_vec()));

        for r in &removed {
            self.unlink(identity, relationship, r);
        }
        for a in &added {
            self.link(identity, relationship, a);
        }

        Ok(Operation::ReplaceRelatedRecords {
            record: identity.clone(),
            relationship: relationship.to_string(),
            related_records: old_list,
        })
    }

    fn replace_related_record(
        &mut self,
        identity: &Identity,
        relationship: &str,
        new_value: Option<Identity>,
    ) -> Result<Operation> {
        let record = self.record_mut_entry(&identity.type_, &identity.id);
        let old_value = match record.relationships.get(relationship) {
            Some(RelationshipData::ToOne(v)) => v.clone(),
            Some(RelationshipData::ToMany(_)) => {
                return Err(OrbitError::Assertion(format!(
                    "relationship `{relationship}` is to-many, not to-one"
                )))
            }
            None => None,
        };

        let record = self.record_mut_entry(&identity.type_, &identity.id);
        record
            .relationships
            .insert(relationship.to_string(), RelationshipData::ToOne(new_value.clone()));

        if let Some(old) = &old_value {
            if Some(old) != new_value.as_ref() {
                self.unlink(identity, relationship, old);
            }
        }
        if let Some(new) = &new_value {
            if old_value.as_ref() != Some(new) {
                self.link(identity, relationship, new);
            }
        }

        Ok(Operation::ReplaceRelatedRecord {
            record: identity.clone(),
            relationship: relationship.to_string(),
            related_record: old_value,
        })
    }

    // -----------------------------------------------------------------
    // Inverse-relationship index and cascade (I4)
    // -----------------------------------------------------------------

    fn link(&mut self, owner: &Identity, relationship: &str, target: &Identity) {
        self.inverse_relationships
            .entry(target.clone())
            .or_default()
            .insert(InverseEdge {
                owner: owner.clone(),
                relationship: relationship.to_string(),
            });

        if let Some((_, inverse_rel)) = self.schema.inverse_of(&owner.type_, relationship) {
            self.cascade_add(target, &inverse_rel, owner);
        }
    }

    fn unlink(&mut self, owner: &Identity, relationship: &str, target: &Identity) {
        if let Some(edges) = self.inverse_relationships.get_mut(target) {
            edges.remove(&InverseEdge {
                owner: owner.clone(),
                relationship: relationship.to_string(),
            });
        }

        if let Some((_, inverse_rel)) = self.schema.inverse_of(&owner.type_, relationship) {
            self.cascade_remove(target, &inverse_rel, owner);
        }
    }

    fn cascade_add(&mut self, target: &Identity, inverse_rel: &str, back_to: &Identity) {
        if self.get_record_sync(target).is_none() {
            return;
        }
        let record = self.record_mut_entry(&target.type_, &target.id);
        match record
            .relationships
            .entry(inverse_rel.to_string())
            .or_insert_with(|| RelationshipData::ToMany(Vec::new()))
        {
            RelationshipData::ToMany(v) => {
                if !v.iter().any(|x| x == back_to) {
                    v.push(back_to.clone());
                }
            }
            RelationshipData::ToOne(v) => {
                *v = Some(back_to.clone());
            }
        }
    }

    fn cascade_remove(&mut self, target: &Identity, inverse_rel: &str, back_to: &Identity) {
        if self.get_record_sync(target).is_none() {
            return;
        }
        let record = self.record_mut_entry(&target.type_, &target.id);
        if let Some(entry) = record.relationships.get_mut(inverse_rel) {
            match entry {
                RelationshipData::ToMany(v) => v.retain(|x| x != back_to),
                RelationshipData::ToOne(v) => {
                    if v.as_ref() == Some(back_to) {
                        *v = None;
                    }
                }
            }
        }
    }

    fn remove_target_from_owner(&mut self, owner: &Identity, relationship: &str, target: &Identity) {
        if self.get_record_sync(owner).is_none() {
            return;
        }
        let record = self.record_mut_entry(&owner.type_, &owner.id);
        if let Some(entry) = record.relationships.get_mut(relationship) {
            match entry {
                RelationshipData::ToMany(v) => v.retain(|x| x != target),
                RelationshipData::ToOne(v) => {
                    if v.as_ref() == Some(target) {
                        *v = None;
                    }
                }
            }
        }
    }
}

fn relationship_targets(data: &RelationshipData) -> Vec<Identity> {
    match data {
        RelationshipData::ToOne(Some(id)) => vec![id.clone()],
        RelationshipData::ToOne(None) => vec![],
        RelationshipData::ToMany(v) => v.clone(),
    }
}

fn empty_like(data: &RelationshipData) -> RelationshipData {
    match data {
        RelationshipData::ToOne(_) => RelationshipData::ToOne(None),
        RelationshipData::ToMany(_) => RelationshipData::ToMany(Vec::new()),
    }
}

impl Schema {
    /// Schemas are cheap to clone (small maps); a fork gets its own copy
    /// rather than sharing a reference, matching `less-db`'s value-type
    /// treatment of schema definitions.
    fn clone_for_fork(&self) -> Schema {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RecordTypeDef, RelationshipDef, RelationshipKind};
    use std::collections::BTreeMap;

    fn planets_and_moons_schema() -> Schema {
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

    fn jupiter() -> Record {
        let mut r = Record::shell("planet", "jupiter");
        r.attributes.insert("name".into(), Value::String("Jupiter".into()));
        r
    }

    #[test]
    fn s1_add_record_and_inverse() {
        let mut cache = RecordCache::new(Schema::new());
        let record = jupiter();
        let inverses = cache.patch(&[Operation::AddRecord { record: record.clone() }]).unwrap();

        let fetched = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        assert_eq!(fetched, record);
        assert_eq!(
            inverses,
            vec![Operation::RemoveRecord {
                record: Identity::new("planet", "jupiter")
            }]
        );
    }

    #[test]
    fn s2_update_record_deep_merges() {
        let mut cache = RecordCache::new(Schema::new());
        cache.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();

        let mut update = Record::shell("planet", "jupiter");
        update
            .attributes
            .insert("classification".into(), Value::String("gas giant".into()));
        cache.patch(&[Operation::UpdateRecord { record: update }]).unwrap();

        let fetched = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        assert_eq!(fetched.attributes.get("name"), Some(&Value::String("Jupiter".into())));
        assert_eq!(
            fetched.attributes.get("classification"),
            Some(&Value::String("gas giant".into()))
        );
    }

    #[test]
    fn s3_inverse_relationship_cascades() {
        let mut cache = RecordCache::new(planets_and_moons_schema());
        cache.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();

        let mut io = Record::shell("moon", "io");
        io.relationships.insert(
            "planet".into(),
            RelationshipData::ToOne(Some(Identity::new("planet", "jupiter"))),
        );
        cache.patch(&[Operation::AddRecord { record: io }]).unwrap();

        let jupiter_after = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        let moons = jupiter_after.relationships.get("moons").unwrap().as_to_many().unwrap();
        assert_eq!(moons, &[Identity::new("moon", "io")]);
    }

    #[test]
    fn remove_record_strips_inverse_edges() {
        let mut cache = RecordCache::new(planets_and_moons_schema());
        cache.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();
        let mut io = Record::shell("moon", "io");
        io.relationships.insert(
            "planet".into(),
            RelationshipData::ToOne(Some(Identity::new("planet", "jupiter"))),
        );
        cache.patch(&[Operation::AddRecord { record: io }]).unwrap();

        cache
            .patch(&[Operation::RemoveRecord {
                record: Identity::new("moon", "io"),
            }])
            .unwrap();

        let jupiter_after = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        let moons = jupiter_after.relationships.get("moons").unwrap().as_to_many().unwrap();
        assert!(moons.is_empty());
    }

    #[test]
    fn add_to_related_records_is_idempotent() {
        let mut cache = RecordCache::new(Schema::new());
        let identity = Identity::new("planet", "jupiter");
        cache.patch(&[Operation::AddRecord { record: Record::shell("planet", "jupiter") }]).unwrap();

        let op = Operation::AddToRelatedRecords {
            record: identity.clone(),
            relationship: "moons".into(),
            related_record: Identity::new("moon", "io"),
        };
        cache.patch(&[op.clone()]).unwrap();
        cache.patch(&[op]).unwrap();

        let record = cache.get_record_sync(&identity).unwrap();
        let moons = record.relationships.get("moons").unwrap().as_to_many().unwrap();
        assert_eq!(moons.len(), 1);
    }

    #[test]
    fn p3_inverse_round_trip() {
        let mut cache = RecordCache::new(planets_and_moons_schema());
        let ops = vec![
            Operation::AddRecord { record: jupiter() },
            Operation::ReplaceAttribute {
                record: Identity::new("planet", "jupiter"),
                attribute: "name".into(),
                value: Some(Value::String("Jove".into())),
            },
            Operation::AddToRelatedRecords {
                record: Identity::new("planet", "jupiter"),
                relationship: "moons".into(),
                related_record: Identity::new("moon", "io"),
            },
        ];

        let before = cache.get_record_sync(&Identity::new("planet", "jupiter"));
        assert!(before.is_none());

        let inverses = cache.patch(&ops).unwrap();
        cache.patch(&inverses).unwrap();

        let after = cache.get_record_sync(&Identity::new("planet", "jupiter"));
        assert_eq!(after, None);
    }

    #[test]
    fn update_record_inverse_removes_previously_absent_attribute() {
        let mut cache = RecordCache::new(Schema::new());
        cache.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();

        let mut patch_record = Record::shell("planet", "jupiter");
        patch_record
            .attributes
            .insert("classification".into(), Value::String("gas giant".into()));
        let inverses = cache
            .patch(&[Operation::UpdateRecord { record: patch_record }])
            .unwrap();

        let patched = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        assert_eq!(
            patched.attributes.get("classification"),
            Some(&Value::String("gas giant".into()))
        );

        cache.patch(&inverses).unwrap();
        let restored = cache.get_record_sync(&Identity::new("planet", "jupiter")).unwrap();
        assert_eq!(restored, jupiter());
        assert!(!restored.attributes.contains_key("classification"));
    }

    #[test]
    fn replace_key_updates_key_map() {
        let mut cache = RecordCache::new(Schema::new()).with_key_map();
        cache
            .patch(&[Operation::ReplaceKey {
                record: Identity::new("planet", "jupiter"),
                key: "remoteId".into(),
                value: Some("12345".into()),
            }])
            .unwrap();

        assert_eq!(
            cache.key_map().unwrap().id_for("planet", "remoteId", "12345"),
            Some("jupiter")
        );
    }

    #[test]
    fn forked_cache_reads_fall_through_to_base() {
        let mut base = RecordCache::new(Schema::new());
        base.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();
        let base = Arc::new(base);

        let fork = RecordCache::forked_from(Arc::clone(&base));
        let fetched = fork.get_record_sync(&Identity::new("planet", "jupiter"));
        assert_eq!(fetched, Some(jupiter()));
    }

    #[test]
    fn p4_fork_mutation_does_not_alter_base() {
        let mut base = RecordCache::new(Schema::new());
        base.patch(&[Operation::AddRecord { record: jupiter() }]).unwrap();
        let base = Arc::new(base);

        let mut fork = RecordCache::forked_from(Arc::clone(&base));
        fork.patch(&[Operation::RemoveRecord {
            record: Identity::new("planet", "jupiter"),
        }])
        .unwrap();

        assert!(fork.get_record_sync(&Identity::new("planet", "jupiter")).is_none());
        assert_eq!(
            base.get_record_sync(&Identity::new("planet", "jupiter")),
            Some(jupiter())
        );
    }
}
