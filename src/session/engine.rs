//! In-process keyed-table engine behind [`SessionStore`](super::SessionStore).
//!
//! An [`Engine`] is a registry of named databases, each holding named tables
//! of JSON records keyed by string. Every [`Handle`] counts as an open
//! connection to its database; a database can only be deleted once no
//! handle to it remains open.
//!
//! Engines created with [`Engine::with_directory`] snapshot each database to
//! `<directory>/<name>.json` after every write and load it again on first
//! open, so records outlive the process.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};

use crate::Result;
use crate::error::{Closed, Error};

type Table = BTreeMap<String, Value>;

/// Registry of databases shared by every store created from it.
///
/// Cloning is cheap and yields the same registry.
#[derive(Clone, Default)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Default)]
struct EngineInner {
    databases: DashMap<String, Arc<Database>>,
    directory: Option<PathBuf>,
}

impl Engine {
    /// An engine whose databases live only as long as the engine.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// An engine persisting each database as a JSON snapshot under `directory`.
    #[must_use]
    pub fn with_directory<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                databases: DashMap::new(),
                directory: Some(directory.into()),
            }),
        }
    }

    #[must_use]
    pub fn directory(&self) -> Option<&Path> {
        self.inner.directory.as_deref()
    }

    /// Open a connection to database `name`, creating the database and
    /// `table` on first use.
    pub async fn open(&self, name: &str, table: &str) -> Result<Handle> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::validation(format!("invalid database name {name:?}")));
        }

        // Counted while the registry entry is locked so a concurrent delete sees this handle
        let database = {
            let entry = self
                .inner
                .databases
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Database::new(name, self.snapshot_path(name))));
            entry.open_handles.fetch_add(1, Ordering::AcqRel);
            Arc::clone(entry.value())
        };
        let handle = Handle {
            database,
            table: table.to_owned(),
            closed: AtomicBool::new(false),
        };

        handle.database.load().await?;
        handle.database.ensure_table(table);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            database = %name,
            table = %table,
            open_handles = handle.database.open_handles.load(Ordering::Acquire),
            "opened database"
        );

        Ok(handle)
    }

    /// Drop database `name` with all its tables.
    ///
    /// Fails with a blocked error while any handle to it is open. Deleting a
    /// database that does not exist succeeds.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let removed = self.inner.databases.remove_if(name, |_, database| {
            database.open_handles.load(Ordering::Acquire) == 0
        });

        match removed {
            Some((_, database)) => {
                database.deleted.store(true, Ordering::Release);
                database.remove_snapshot().await?;
            }
            None if self.inner.databases.contains_key(name) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(database = %name, "delete blocked by open handles");
                return Err(Error::blocked(name));
            }
            None => {
                if let Some(path) = self.snapshot_path(name) {
                    remove_file(&path).await?;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(database = %name, "deleted database");
        Ok(())
    }

    /// Names of the databases currently known to this engine, sorted.
    #[must_use]
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .databases
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Number of open handles to database `name`.
    #[must_use]
    pub fn open_handles(&self, name: &str) -> usize {
        self.inner
            .databases
            .get(name)
            .map_or(0, |database| database.open_handles.load(Ordering::Acquire))
    }

    fn snapshot_path(&self, name: &str) -> Option<PathBuf> {
        self.inner
            .directory
            .as_ref()
            .map(|directory| directory.join(format!("{name}.json")))
    }
}

struct Database {
    name: String,
    tables: RwLock<HashMap<String, Table>>,
    loaded: OnceCell<()>,
    open_handles: AtomicUsize,
    deleted: AtomicBool,
    snapshot: Option<PathBuf>,
    /// Serializes commits so a slower snapshot write never overwrites a newer one
    persist: Mutex<()>,
}

// A poisoned lock cannot leave a table half-written: every mutation is a single map call.
impl Database {
    fn new(name: &str, snapshot: Option<PathBuf>) -> Self {
        Self {
            name: name.to_owned(),
            tables: RwLock::new(HashMap::new()),
            loaded: OnceCell::new(),
            open_handles: AtomicUsize::new(0),
            deleted: AtomicBool::new(false),
            snapshot,
            persist: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Table>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Table>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self) -> Result<()> {
        self.loaded.get_or_try_init(|| self.read_snapshot()).await?;
        Ok(())
    }

    async fn read_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let tables: HashMap<String, Table> = serde_json::from_slice(&bytes)?;
                #[cfg(feature = "tracing")]
                tracing::debug!(database = %self.name, path = %path.display(), "loaded snapshot");
                *self.write() = tables;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_table(&self, table: &str) {
        let mut tables = self.write();
        if !tables.contains_key(table) {
            #[cfg(feature = "tracing")]
            tracing::debug!(database = %self.name, table = %table, "creating table");
            tables.insert(table.to_owned(), Table::new());
        }
    }

    /// Apply `change` to the tables once the snapshot reflecting it is on disk.
    ///
    /// A failed snapshot write leaves the tables untouched.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: Fn(&mut HashMap<String, Table>),
    {
        let Some(path) = &self.snapshot else {
            change(&mut *self.write());
            return Ok(());
        };

        // Held until the tables are updated so writers cannot interleave
        let _guard = self.persist.lock().await;
        if self.deleted.load(Ordering::Acquire) {
            change(&mut *self.write());
            return Ok(());
        }

        let mut candidate = self.read().clone();
        change(&mut candidate);
        let bytes = serde_json::to_vec(&candidate)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, path).await?;

        change(&mut *self.write());
        Ok(())
    }

    async fn remove_snapshot(&self) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };

        let _guard = self.persist.lock().await;
        remove_file(path).await
    }
}

async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// An open connection to one table of a database.
///
/// Dropping the handle, or calling [`close`](Self::close), releases the
/// connection so the database can be deleted.
pub struct Handle {
    database: Arc<Database>,
    table: String,
    closed: AtomicBool,
}

impl Handle {
    /// Name of the database this handle is connected to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database.name
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.database.deleted.load(Ordering::Acquire)
    }

    /// Release the connection. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.database.open_handles.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Closed {
                database: self.database.name.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Read one record.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self
            .database
            .read()
            .get(&self.table)
            .and_then(|table| table.get(key))
            .cloned())
    }

    /// Insert or overwrite one record.
    ///
    /// When the database is persisted and the snapshot cannot be written the
    /// previous record stays in place.
    pub async fn put(&self, key: String, record: Value) -> Result<()> {
        self.ensure_open()?;
        self.database
            .commit(|tables| {
                tables
                    .entry(self.table.clone())
                    .or_default()
                    .insert(key.clone(), record.clone());
            })
            .await
    }

    /// Remove one record. Removing a missing key succeeds.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let present = self
            .database
            .read()
            .get(&self.table)
            .is_some_and(|table| table.contains_key(key));
        if !present {
            return Ok(());
        }

        self.database
            .commit(|tables| {
                if let Some(table) = tables.get_mut(&self.table) {
                    table.remove(key);
                }
            })
            .await
    }

    /// Number of records in the table.
    pub fn count(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.database.read().get(&self.table).map_or(0, Table::len))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.close();
    }
}
