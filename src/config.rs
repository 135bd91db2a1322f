use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::criteria::Order;
use crate::error::{Error, Result};
use crate::schema::CreateTable;

/// Callback invoked with every compiled statement before it runs.
pub type VerboseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback that builds a table's DDL by hand.
pub type RawDdl = Arc<dyn Fn(&mut CreateTable) + Send + Sync>;

/// Path that opens a private in-memory database.
pub const MEMORY: &str = ":memory:";

/// Which backend executes statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Client {
    /// SQLite owns the database file directly.
    #[default]
    Native,
    /// The whole database lives in memory and is written back to the file
    /// after every change.
    Embedded,
}

impl FromStr for Client {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Client::Native),
            "embedded" => Ok(Client::Embedded),
            other => Err(Error::Configuration(format!(
                "unknown client '{other}', expected 'native' or 'embedded'"
            ))),
        }
    }
}

/// Engine settings applied to every connection the store opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout_ms: Option<u64>,
    /// Enforce foreign key constraints.
    pub foreign_keys: bool,
}

impl ConnectionOptions {
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout_ms.map(Duration::from_millis)
    }
}

/// Options accepted by [`crate::Store::open`].
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub client: Client,
    /// Base directory for relative paths. Defaults to the working directory.
    pub dir: Option<PathBuf>,
    pub connection: ConnectionOptions,
    #[serde(skip)]
    pub verbose: Option<VerboseHook>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn embedded() -> Self {
        Self::new().client(Client::Embedded)
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    pub fn verbose(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.verbose = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("client", &self.client)
            .field("dir", &self.dir)
            .field("connection", &self.connection)
            .field("verbose", &self.verbose.is_some())
            .finish()
    }
}

/// Table-level options used when a table is first created.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    /// Add `created_at` / `updated_at` columns.
    pub timestamps: bool,
    /// Composite primary key.
    pub primary: Vec<String>,
    /// Composite unique constraint.
    pub unique: Vec<String>,
    #[serde(skip)]
    raw: Option<RawDdl>,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    pub fn with_primary<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Hands the DDL builder to `callback` instead of applying the options
    /// above.
    pub fn with_raw(mut self, callback: impl Fn(&mut CreateTable) + Send + Sync + 'static) -> Self {
        self.raw = Some(Arc::new(callback));
        self
    }

    pub fn raw(&self) -> Option<&RawDdl> {
        self.raw.as_ref()
    }
}

impl fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableOptions")
            .field("timestamps", &self.timestamps)
            .field("primary", &self.primary)
            .field("unique", &self.unique)
            .field("raw", &self.raw.is_some())
            .finish()
    }
}

/// Options for `find`, `find_one` and friends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub order: Option<Order>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    /// Skip column getters.
    pub raw: bool,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.order = Some(order.into());
        self
    }

    pub fn random(self) -> Self {
        self.order(Order::Random)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }
}

/// Options for `create`, `update` and `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Skip column setters.
    pub raw: bool,
}

impl WriteOptions {
    pub fn raw() -> Self {
        Self { raw: true }
    }
}

/// Options for `count`, `min` and `max`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub order: Option<Order>,
    /// Count distinct values only.
    pub distinct: bool,
    pub group_by: Vec<String>,
}

impl AggregateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn order(mut self, order: impl Into<Order>) -> Self {
        self.order = Some(order.into());
        self
    }

    /// Groups by a single column.
    pub fn group(self, column: impl Into<String>) -> Self {
        self.group_by([column.into()])
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_names() {
        assert_eq!("native".parse::<Client>().unwrap(), Client::Native);
        assert_eq!("Embedded".parse::<Client>().unwrap(), Client::Embedded);
        assert!("postgres".parse::<Client>().unwrap_err().is_configuration());
    }

    #[test]
    fn store_options_deserialize_with_defaults() {
        let options: StoreOptions = serde_json::from_str(
            r#"{"client": "embedded", "connection": {"busy_timeout_ms": 250}}"#,
        )
        .unwrap();
        assert_eq!(options.client, Client::Embedded);
        assert_eq!(options.dir, None);
        assert_eq!(
            options.connection.busy_timeout(),
            Some(Duration::from_millis(250))
        );
        assert!(!options.connection.foreign_keys);
        assert!(options.verbose.is_none());
    }

    #[test]
    fn table_options_deserialize() {
        let options: TableOptions =
            serde_json::from_str(r#"{"timestamps": true, "unique": ["a", "b"]}"#).unwrap();
        assert!(options.timestamps);
        assert_eq!(options.unique, vec!["a".to_string(), "b".to_string()]);
        assert!(options.primary.is_empty());
        assert!(options.raw().is_none());
    }

    #[test]
    fn group_coerces_to_a_sequence() {
        assert_eq!(AggregateOptions::new().group("kind").group_by, vec!["kind".to_string()]);
    }
}
