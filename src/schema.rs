//! The minimal schema surface the cache needs to maintain inverse
//! relationships (I4) and raise `SchemaError` (§7). Richer schema
//! declaration — validators, key generation strategy — is explicitly out
//! of scope (`spec.md` §1); this is just enough to know which
//! relationships are inverses of which.

use std::collections::BTreeMap;

use crate::error::{OrbitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    HasOne,
    HasMany,
}

#[derive(Debug, Clone)]
pub struct RelationshipDef {
    pub kind: RelationshipKind,
    pub type_: String,
    pub inverse: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordTypeDef {
    pub attributes: Vec<String>,
    pub relationships: BTreeMap<String, RelationshipDef>,
}

/// `{type name -> RecordTypeDef}`.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: BTreeMap<String, RecordTypeDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, name: impl Into<String>, def: RecordTypeDef) -> &mut Self {
        self.types.insert(name.into(), def);
        self
    }

    pub fn type_def(&self, type_: &str) -> Result<&RecordTypeDef> {
        self.types
            .get(type_)
            .ok_or_else(|| OrbitError::Schema(format!("type `{type_}` is not declared")))
    }

    pub fn relationship_def(&self, type_: &str, relationship: &str) -> Result<&RelationshipDef> {
        self.type_def(type_)?.relationships.get(relationship).ok_or_else(|| {
            OrbitError::Schema(format!(
                "relationship `{relationship}` is not declared on type `{type_}`"
            ))
        })
    }

    /// The relationship on `other_type` declared as the inverse of
    /// `(type_, relationship)`, if any.
    pub fn inverse_of(&self, type_: &str, relationship: &str) -> Option<(String, String)> {
        let def = self.relationship_def(type_, relationship).ok()?;
        let inverse_name = def.inverse.clone()?;
        Some((def.type_.clone(), inverse_name))
    }

    /// A stable hash of the declared type/relationship shape, used to derive
    /// a backing-store's schema version (§6 "schema version derives from
    /// the declared record schema hash"). `BTreeMap` iteration order makes
    /// this deterministic across runs.
    pub fn schema_hash(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (name, def) in &self.types {
            name.hash(&mut hasher);
            def.attributes.hash(&mut hasher);
            for (rel_name, rel) in &def.relationships {
                rel_name.hash(&mut hasher);
                (rel.kind as u8).hash(&mut hasher);
                rel.type_.hash(&mut hasher);
                rel.inverse.hash(&mut hasher);
            }
        }
        hasher.finish()
    }
}
