use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

use super::config::Config;
use super::engine::{Engine, Handle};
use crate::Result;
use crate::error::Error;
use crate::serde_helpers::decode_with_warnings;

/// Persists chat session records keyed by their session id.
///
/// The database handle is opened lazily on first use and reused for every
/// later call. Concurrent first calls share one open.
///
/// ```
/// # async fn run() -> chat_client_sdk::Result<()> {
/// use chat_client_sdk::session::SessionStore;
/// use serde_json::{Value, json};
///
/// let store = SessionStore::default();
/// store
///     .store_session(&json!({ "sessionId": "s1", "messages": [] }))
///     .await?;
///
/// let session: Option<Value> = store.get_session("s1").await?;
/// assert!(session.is_some());
/// # Ok(())
/// # }
/// ```
pub struct SessionStore {
    engine: Engine,
    config: Config,
    handle: Mutex<Option<Arc<Handle>>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Engine::in_memory(), Config::default())
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(engine: Engine, config: Config) -> Self {
        Self {
            engine,
            config,
            handle: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Open the database, creating it and the session table if needed.
    ///
    /// Returns the cached handle when one is already open.
    pub async fn open_database(&self) -> Result<Arc<Handle>> {
        let mut cached = self.handle.lock().await;
        if let Some(handle) = cached.as_ref().filter(|handle| !handle.is_closed()) {
            return Ok(Arc::clone(handle));
        }

        let handle = Arc::new(
            self.engine
                .open(&self.config.database_name, &self.config.store_name)
                .await?,
        );
        *cached = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Insert or overwrite a session record.
    ///
    /// The record must serialize to an object whose key field is a string.
    pub async fn store_session<R: Serialize + ?Sized>(&self, record: &R) -> Result<()> {
        let record = serde_json::to_value(record)?;
        let key = self.key_of(&record)?;

        let handle = self.open_database().await?;
        handle.put(key, record).await?;

        #[cfg(feature = "tracing")]
        tracing::trace!(database = %self.config.database_name, "stored session");
        Ok(())
    }

    /// Read the session stored under `session_id`, if any.
    pub async fn get_session<R: DeserializeOwned>(&self, session_id: &str) -> Result<Option<R>> {
        let handle = self.open_database().await?;
        handle
            .get(session_id)?
            .map(decode_with_warnings)
            .transpose()
    }

    /// Remove the session stored under `session_id`. Missing sessions are not an error.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let handle = self.open_database().await?;
        handle.delete(session_id).await
    }

    /// Close this store's handle and delete the whole database.
    ///
    /// Fails with a blocked error while another store still holds the
    /// database open. The next operation on this store reopens an empty
    /// database.
    pub async fn delete_database(&self) -> Result<()> {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.close();
        }
        self.engine.delete(&self.config.database_name).await
    }

    fn key_of(&self, record: &Value) -> Result<String> {
        let key_path = &self.config.key_path;
        match record.get(key_path) {
            Some(Value::String(key)) => Ok(key.clone()),
            Some(other) => Err(Error::validation(format!(
                "session key {key_path} must be a string, got {other}"
            ))),
            None => Err(Error::validation(format!(
                "session record has no {key_path} field"
            ))),
        }
    }
}
