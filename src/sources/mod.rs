//! Concrete sources built on [`crate::source::Source`]: an in-memory source
//! with a forkable cache, and a JSON:API-speaking networked source.

pub mod jsonapi;
pub mod memory;

pub use jsonapi::{HttpClient, HttpMethod, HttpResponse, JsonApiHandlers};
pub use memory::MemoryHandlers;
