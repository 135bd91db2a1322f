//! Statement execution against the two backends.
//!
//! Both backends run rusqlite calls on the blocking thread pool and shape
//! their responses the same way; they differ in who owns durability.
//!
//! - [`NativeBackend`] opens the database file directly and leaves durability
//!   to SQLite.
//! - [`EmbeddedBackend`] holds the whole database in one in-memory connection
//!   and writes a full snapshot over the backing file after every statement
//!   that can change it: anything run for an affected count, and any
//!   `insert`/`update`/`delete` whatever shape it was asked for. The
//!   connection sits behind a FIFO async mutex, so embedded operations run
//!   one at a time, in the order they asked for the lock. Rewriting the whole file per change only stays correct under that
//!   exclusion, and it caps how large an embedded database can usefully grow.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;
use tracing::{debug, warn};

use crate::config::{Client, ConnectionOptions, VerboseHook};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::sqlite::{execute_on, Response, ResponseShape, Row, SqlQuery, SqlValue};

/// Executes compiled statements. Both implementations give the same
/// observable results for the same statements.
#[async_trait]
pub trait Backend: Send + Sync {
    fn client(&self) -> Client;

    /// Runs the statements in order on one exclusive hold of the connection.
    /// Stops at the first failure.
    async fn execute_batch(&self, batch: Vec<(SqlQuery, ResponseShape)>) -> Result<Vec<Response>>;

    async fn execute(&self, query: SqlQuery, shape: ResponseShape) -> Result<Response> {
        let mut responses = self.execute_batch(vec![(query, shape)]).await?;
        responses
            .pop()
            .ok_or_else(|| Error::codec("backend returned no response"))
    }

    /// Flushes and releases the connection. Later calls fail with
    /// [`Error::Closed`].
    async fn close(&self) -> Result<()>;
}

/// Opens the backend selected by `client`. `file` is `None` for an in-memory
/// database.
pub fn connect(
    client: Client,
    file: Option<PathBuf>,
    options: &ConnectionOptions,
) -> Result<Box<dyn Backend>> {
    Ok(match client {
        Client::Native => Box::new(NativeBackend::open(file.as_deref(), options)?),
        Client::Embedded => Box::new(EmbeddedBackend::open(file, options)?),
    })
}

fn configure(conn: &Connection, options: &ConnectionOptions) -> Result<()> {
    if let Some(timeout) = options.busy_timeout() {
        conn.busy_timeout(timeout)?;
    }
    if options.foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    }
    Ok(())
}

fn execute_all(conn: &Connection, batch: &[(SqlQuery, ResponseShape)]) -> Result<Vec<Response>> {
    batch
        .iter()
        .map(|(query, shape)| execute_on(conn, query, *shape))
        .collect()
}

fn close_connection(conn: Connection) -> Result<()> {
    conn.close().map_err(|(_, err)| {
        warn!(error = %err, "connection did not close cleanly");
        Error::Backend(err)
    })
}

/// SQLite connection on the database file itself.
pub struct NativeBackend {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl NativeBackend {
    pub fn open(file: Option<&Path>, options: &ConnectionOptions) -> Result<Self> {
        let conn = match file {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        configure(&conn, options)?;
        debug!(path = ?file, "opened native backend");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }
}

#[async_trait]
impl Backend for NativeBackend {
    fn client(&self) -> Client {
        Client::Native
    }

    async fn execute_batch(&self, batch: Vec<(SqlQuery, ResponseShape)>) -> Result<Vec<Response>> {
        let slot = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = slot.lock();
            match &*guard {
                Some(conn) => execute_all(conn, &batch),
                None => Err(Error::Closed),
            }
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        match conn {
            Some(conn) => task::spawn_blocking(move || close_connection(conn)).await?,
            None => Ok(()),
        }
    }
}

/// In-memory SQLite database mirrored to a file by whole-database snapshots.
pub struct EmbeddedBackend {
    slot: Arc<AsyncMutex<Option<Connection>>>,
    file: Option<PathBuf>,
}

impl EmbeddedBackend {
    /// Loads `file` into memory, or creates it with an empty database when it
    /// does not exist yet.
    pub fn open(file: Option<PathBuf>, options: &ConnectionOptions) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        configure(&conn, options)?;

        if let Some(path) = &file {
            if path.exists() {
                conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)?;
                debug!(path = %path.display(), "restored embedded snapshot");
            } else {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                persist(&conn, path)?;
            }
        }

        Ok(Self {
            slot: Arc::new(AsyncMutex::new(Some(conn))),
            file,
        })
    }
}

/// Overwrites `path` with the full contents of `conn`.
fn persist(conn: &Connection, path: &Path) -> Result<()> {
    conn.backup(DatabaseName::Main, path, None)?;
    debug!(path = %path.display(), "persisted embedded snapshot");
    Ok(())
}

#[async_trait]
impl Backend for EmbeddedBackend {
    fn client(&self) -> Client {
        Client::Embedded
    }

    async fn execute_batch(&self, batch: Vec<(SqlQuery, ResponseShape)>) -> Result<Vec<Response>> {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        let file = self.file.clone();
        // The guard moves into the blocking task and is released when it ends,
        // even if the caller stops waiting.
        task::spawn_blocking(move || {
            let conn = match &*guard {
                Some(conn) => conn,
                None => return Err(Error::Closed),
            };
            let responses = execute_all(conn, &batch);
            let mutating = batch
                .iter()
                .any(|(query, shape)| *shape == ResponseShape::Affected || query.is_mutation());
            if let (true, Some(path)) = (mutating, &file) {
                persist(conn, path)?;
            }
            responses
        })
        .await?
    }

    async fn close(&self) -> Result<()> {
        let conn = self.slot.lock().await.take();
        let file = self.file.clone();
        match conn {
            Some(conn) => {
                task::spawn_blocking(move || {
                    if let Some(path) = &file {
                        persist(&conn, path)?;
                    }
                    close_connection(conn)
                })
                .await?
            }
            None => Ok(()),
        }
    }
}

/// Routes compiled queries to the active backend.
pub struct Dispatcher {
    backend: Box<dyn Backend>,
    verbose: Option<VerboseHook>,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn Backend>, verbose: Option<VerboseHook>) -> Self {
        Self { backend, verbose }
    }

    pub fn client(&self) -> Client {
        self.backend.client()
    }

    fn report(&self, query: &SqlQuery) {
        let text = query.to_string();
        if let Some(hook) = &self.verbose {
            hook(&text);
        }
        debug!(client = ?self.client(), sql = %text, "executing statement");
    }

    /// Runs a compiled statement, reporting it to the verbose hook first.
    pub async fn execute(&self, query: SqlQuery, shape: ResponseShape) -> Result<Response> {
        self.report(&query);
        self.backend.execute(query, shape).await
    }

    pub async fn dispatch(&self, query: &Query) -> Result<Response> {
        self.execute(query.to_sql(), query.shape()).await
    }

    pub async fn fetch(&self, query: &Query) -> Result<Vec<Row>> {
        Ok(self.dispatch(query).await?.into_rows())
    }

    pub async fn fetch_one(&self, query: &Query) -> Result<Option<Row>> {
        Ok(self.fetch(query).await?.into_iter().next())
    }

    /// Runs a statement and returns its affected-row count.
    pub async fn run(&self, query: &Query) -> Result<usize> {
        Ok(self.dispatch(query).await?.affected())
    }

    pub async fn exists(&self, query: &Query) -> Result<bool> {
        let query = query.clone().exists();
        Ok(self.dispatch(&query).await?.exists())
    }

    /// Runs an insert and reads the auto-increment value SQLite last handed
    /// out for its table, with no other statement in between.
    pub async fn insert_with_sequence(&self, insert: &Query) -> Result<(usize, Option<i64>)> {
        let sequence = Query::select_columns("sqlite_sequence", ["seq"])
            .where_eq("name", insert.table.as_str())
            .limit(1);
        let batch = vec![
            (insert.to_sql(), ResponseShape::Affected),
            (sequence.to_sql(), ResponseShape::Rows),
        ];
        for (query, _) in &batch {
            self.report(query);
        }

        let mut responses = self.backend.execute_batch(batch).await?.into_iter();
        let inserted = responses.next().map(|r| r.affected()).unwrap_or(0);
        let seq = responses
            .next()
            .and_then(|r| r.into_rows().into_iter().next())
            .and_then(|row| match row.get("seq") {
                Some(SqlValue::Integer(seq)) => Some(*seq),
                _ => None,
            });
        Ok((inserted, seq))
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}
