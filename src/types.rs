//! Core data model: records, identities, operations, transforms, and the
//! `FullResponse` envelope shared by every request-flow capability.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(type, id)` — the identity of a record. Byte-equal comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
}

impl Identity {
    pub fn new(type_: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.type_, self.id)
    }
}

/// Either a to-one or to-many relationship. Absence of `data` (modeled here
/// as a third variant) means "unknown"; `ToOne(None)` means "known empty".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    ToOne(Option<Identity>),
    ToMany(Vec<Identity>),
}

impl RelationshipData {
    pub fn as_to_many(&self) -> Option<&[Identity]> {
        match self {
            RelationshipData::ToMany(v) => Some(v),
            RelationshipData::ToOne(_) => None,
        }
    }

    pub fn as_to_one(&self) -> Option<&Option<Identity>> {
        match self {
            RelationshipData::ToOne(v) => Some(v),
            RelationshipData::ToMany(_) => None,
        }
    }
}

/// A record. Identity is `(type, id)`; records are value objects cloned on
/// every cache modification (never mutated in place behind a shared ref).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipData>,
}

impl Record {
    pub fn shell(type_: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.type_.clone(), self.id.clone())
    }
}

/// One of the nine record-mutating operation kinds. `Operation::apply`
/// (in `cache`) is the only place these are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    AddRecord {
        record: Record,
    },
    UpdateRecord {
        record: Record,
    },
    RemoveRecord {
        record: Identity,
    },
    /// `value: None` deletes the key (used in inverse operations when the
    /// forward operation's path was previously absent).
    ReplaceKey {
        record: Identity,
        key: String,
        value: Option<String>,
    },
    /// `value: None` deletes the attribute (same absent-path convention as
    /// `ReplaceKey`).
    ReplaceAttribute {
        record: Identity,
        attribute: String,
        value: Option<Value>,
    },
    AddToRelatedRecords {
        record: Identity,
        relationship: String,
        related_record: Identity,
    },
    RemoveFromRelatedRecords {
        record: Identity,
        relationship: String,
        related_record: Identity,
    },
    ReplaceRelatedRecords {
        record: Identity,
        relationship: String,
        related_records: Vec<Identity>,
    },
    ReplaceRelatedRecord {
        record: Identity,
        relationship: String,
        related_record: Option<Identity>,
    },
}

impl Operation {
    /// The identity of the record this operation targets.
    pub fn target(&self) -> Identity {
        match self {
            Operation::AddRecord { record } | Operation::UpdateRecord { record } => {
                record.identity()
            }
            Operation::RemoveRecord { record }
            | Operation::ReplaceKey { record, .. }
            | Operation::ReplaceAttribute { record, .. }
            | Operation::AddToRelatedRecords { record, .. }
            | Operation::RemoveFromRelatedRecords { record, .. }
            | Operation::ReplaceRelatedRecords { record, .. }
            | Operation::ReplaceRelatedRecord { record, .. } => record.clone(),
        }
    }
}

/// An immutable, identified bundle of operations. The id must be stable
/// across re-submission for dedup (§8 P2) — caller-provided or generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub id: String,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, Value>,
}

impl Transform {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operations,
            options: BTreeMap::new(),
        }
    }

    pub fn with_id(id: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            id: id.into(),
            operations,
            options: BTreeMap::new(),
        }
    }

    pub fn max_requests(&self) -> Option<usize> {
        self.options
            .get("maxRequests")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
    }
}

/// A single query expression. Filter/sort/page terms refine `FindRecords`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum QueryExpression {
    FindRecord {
        record: Identity,
    },
    FindRecords {
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        type_: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        records: Option<Vec<Identity>>,
        #[serde(default)]
        filter: Vec<FilterSpecifier>,
        #[serde(default)]
        sort: Vec<SortSpecifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<PageSpecifier>,
    },
    FindRelatedRecord {
        record: Identity,
        relationship: String,
    },
    FindRelatedRecords {
        record: Identity,
        relationship: String,
        #[serde(default)]
        filter: Vec<FilterSpecifier>,
        #[serde(default)]
        sort: Vec<SortSpecifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        page: Option<PageSpecifier>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOp {
    Equal,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Match,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpecifier {
    pub attribute: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpecifier {
    pub attribute: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpecifier {
    pub offset: usize,
    pub limit: Option<usize>,
}

/// A query is a sequence of expressions; in practice Orbit only ever builds
/// one at a time, but the log/dedup machinery treats it uniformly with
/// Transform by giving it a stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: String,
    pub expression: QueryExpression,
    pub options: BTreeMap<String, Value>,
}

impl Query {
    pub fn new(expression: QueryExpression) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            expression,
            options: BTreeMap::new(),
        }
    }
}

/// Result of evaluating a query: either a single optional record or a set.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResultData {
    One(Option<Record>),
    Many(Vec<Record>),
}

/// `{data?, details?, transforms?, sources?}` — the uniform envelope every
/// request-flow handler produces (§6).
#[derive(Debug, Clone, Default)]
pub struct FullResponse<Data, Details = ()> {
    pub data: Option<Data>,
    pub details: Option<Details>,
    pub transforms: Vec<Transform>,
    pub sources: BTreeMap<String, ()>,
}

impl<Data, Details> FullResponse<Data, Details> {
    pub fn new(data: Data) -> Self {
        Self {
            data: Some(data),
            details: None,
            transforms: Vec::new(),
            sources: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self {
            data: None,
            details: None,
            transforms: Vec::new(),
            sources: BTreeMap::new(),
        }
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = transforms;
        self
    }
}

/// Options accepted by `query`; mirrors `options.raiseNotFoundExceptions`
/// and the generic `fullResponse`/`includeSources` flags from §4.4/§6.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub full_response: bool,
    pub include_sources: bool,
    pub raise_not_found_exceptions: bool,
    pub max_requests: Option<usize>,
    pub timeout_ms: Option<u64>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self {
            raise_not_found_exceptions: true,
            ..Default::default()
        }
    }
}
