//! HTTP relay for chat API calls.
//!
//! **Feature flag:** `relay`
//!
//! Chat backends are often reached through a site endpoint that forwards the
//! request on the client's behalf and checks a security token. [`Client`]
//! packs a call into the form that endpoint expects and unwraps its
//! `{ "success", "data" }` answer.

pub mod client;
pub mod config;

pub use client::Client;
pub use config::Config;
pub use reqwest::Method;
