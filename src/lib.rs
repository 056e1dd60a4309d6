//! Orbit: a client-side data framework that composes multiple sources and
//! keeps them in sync through an immutable, append-only log of Transforms.
//!
//! The hard core is three layers: the [`event_bus`] + [`task_queue`] +
//! [`log`] request pipeline every [`source::Source`] is built on, the
//! operation-sourced [`cache::RecordCache`], and the fork/merge/rebase
//! protocol in [`fork`].

pub mod cache;
pub mod error;
pub mod event_bus;
pub mod fork;
pub mod log;
pub mod query;
pub mod schema;
pub mod source;
pub mod sources;
pub mod storage;
pub mod task_queue;
pub mod types;

pub use cache::RecordCache;
pub use error::{OrbitError, Result};
pub use event_bus::EventBus;
pub use log::TransformLog;
pub use schema::Schema;
pub use task_queue::TaskQueue;
pub use types::{
    FullResponse, Identity, Operation, Query, QueryExpression, Record, RelationshipData, Transform,
};
