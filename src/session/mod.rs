//! Keyed storage for chat session records.
//!
//! [`SessionStore`] is the client-facing API: it stores, reads and deletes
//! records keyed by a top-level string field (`sessionId` by default). It
//! runs on an [`Engine`], which may be shared by several stores to model
//! several open connections to the same database.

pub mod config;
pub mod engine;
pub mod store;

pub use config::Config;
pub use engine::{Engine, Handle};
pub use store::SessionStore;
