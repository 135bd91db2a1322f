use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::backend::{self, Dispatcher};
use crate::config::{AggregateOptions, Client, FindOptions, StoreOptions, TableOptions, MEMORY};
use crate::criteria::Criteria;
use crate::error::{Error, Result};
use crate::query::{quote, AggregateFn, Operator, Query};
use crate::schema::{CreateTable, Schema};
use crate::sqlite::{Response, ResponseShape, SqlQuery, SqlValue};
use crate::table::{Record, Table, Upsert};

/// An open database and the tables defined on it.
///
/// Every operation is also reachable through the store with a location
/// string: `"table"` or `"table.column"`.
pub struct Store {
    dispatcher: Arc<Dispatcher>,
    definitions: Mutex<HashMap<String, Table>>,
    file: Option<PathBuf>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("client", &self.client())
            .field("file", &self.file)
            .field("tables", &self.tables())
            .finish()
    }
}

impl Store {
    /// Opens `path` with the configured client.
    ///
    /// `":memory:"` opens a private in-memory database. Relative paths are
    /// resolved against `options.dir` or the working directory, and missing
    /// parent directories are created.
    #[instrument(skip_all, fields(path = %path.as_ref().display(), client = ?options.client))]
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "a store must be given a file path or ':memory:'".to_string(),
            ));
        }

        let file = if path.as_os_str() == MEMORY {
            None
        } else {
            let base = match &options.dir {
                Some(dir) => dir.clone(),
                None => std::env::current_dir()?,
            };
            let file = base.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent)?;
            }
            Some(file)
        };

        let backend = backend::connect(options.client, file.clone(), &options.connection)?;
        info!(file = ?file, "store opened");

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(backend, options.verbose)),
            definitions: Mutex::new(HashMap::new()),
            file,
        })
    }

    /// Opens a private in-memory database on the native client.
    pub fn open_memory() -> Result<Self> {
        Self::open(MEMORY, StoreOptions::default())
    }

    pub fn client(&self) -> Client {
        self.dispatcher.client()
    }

    /// Resolved database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Defines `name` and creates it in the database if it does not exist.
    ///
    /// Defining a name twice returns the first definition; the second schema
    /// is ignored. A table that already exists in the database is never
    /// altered.
    #[instrument(skip(self, schema, options))]
    pub async fn define_table(&self, name: &str, schema: Schema, options: TableOptions) -> Result<Table> {
        if let Some(existing) = self.definitions.lock().get(name) {
            return Ok(existing.clone());
        }
        if name.is_empty() {
            return Err(Error::Configuration("a table needs a name".to_string()));
        }

        let ddl = CreateTable::from_schema(name, &schema, &options)?;
        let table = Table::new(name, schema, &options, Arc::clone(&self.dispatcher));
        {
            let mut definitions = self.definitions.lock();
            if let Some(existing) = definitions.get(name) {
                return Ok(existing.clone());
            }
            definitions.insert(name.to_string(), table.clone());
        }

        if let Err(err) = self.ensure_table(name, &ddl).await {
            warn!(table = name, error = %err, "table definition failed");
            self.definitions.lock().remove(name);
            return Err(err);
        }
        Ok(table)
    }

    async fn ensure_table(&self, name: &str, ddl: &CreateTable) -> Result<()> {
        if self.dispatcher.exists(&table_exists(name)).await? {
            debug!(table = name, "table already present");
            return Ok(());
        }
        for statement in ddl.statements() {
            self.dispatcher
                .execute(statement, ResponseShape::Affected)
                .await?;
        }
        debug!(table = name, "table created");
        Ok(())
    }

    /// Handle to a defined table.
    pub fn table(&self, name: &str) -> Result<Table> {
        self.definitions
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// True when `name` is defined on this store and exists in the database.
    pub async fn has_table(&self, name: &str) -> Result<bool> {
        if !self.definitions.lock().contains_key(name) {
            return Ok(false);
        }
        self.dispatcher.exists(&table_exists(name)).await
    }

    /// Drops a defined table and forgets its definition. Returns `false` when
    /// the name was never defined.
    pub async fn drop_table(&self, name: &str) -> Result<bool> {
        if !self.definitions.lock().contains_key(name) {
            return Ok(false);
        }
        let statement = SqlQuery::new(&format!("DROP TABLE IF EXISTS {}", quote(name)));
        self.dispatcher
            .execute(statement, ResponseShape::Affected)
            .await?;
        self.definitions.lock().remove(name);
        debug!(table = name, "table dropped");
        Ok(true)
    }

    /// Names of the tables defined on this store, sorted.
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of tables in the database, including ones this store never
    /// defined. SQLite's internal sequence table is not counted.
    pub async fn count_tables(&self) -> Result<i64> {
        let query = Query::aggregate("sqlite_master", AggregateFn::Count, None, false)
            .where_eq("type", "table")
            .where_op("name", Operator::NotEqual, "sqlite_sequence");
        let row = self.dispatcher.fetch_one(&query).await?;
        match row.and_then(|mut row| row.take(AggregateFn::Count.alias())) {
            Some(SqlValue::Integer(count)) => Ok(count),
            _ => Ok(0),
        }
    }

    /// Runs a hand-written statement through the active backend.
    pub async fn raw(&self, query: SqlQuery, shape: ResponseShape) -> Result<Response> {
        self.dispatcher.execute(query, shape).await
    }

    /// Closes the connection. Later operations fail with [`Error::Closed`].
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        self.dispatcher.close().await?;
        info!("store closed");
        Ok(())
    }

    fn locate<'a>(&self, location: &'a str) -> Result<(Table, Option<&'a str>)> {
        match location.split_once('.') {
            Some((table, column)) => Ok((self.table(table)?, Some(column).filter(|c| !c.is_empty()))),
            None => Ok((self.table(location)?, None)),
        }
    }

    fn locate_column<'a>(&self, location: &'a str) -> Result<(Table, &'a str)> {
        match self.locate(location)? {
            (table, Some(column)) => Ok((table, column)),
            (_, None) => Err(Error::Configuration(format!(
                "'{location}' must name a column as 'table.column'"
            ))),
        }
    }

    pub async fn create(&self, table: &str, object: Value) -> Result<Option<Record>> {
        self.table(table)?.create(object).await
    }

    /// Finds rows, or a single column of them when `location` names one.
    pub async fn find(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        match self.locate(location)? {
            (table, Some(column)) => table.find_column(column, criteria, options).await,
            (table, None) => Ok(table
                .find_with(criteria, options)
                .await?
                .into_iter()
                .map(Value::Object)
                .collect()),
        }
    }

    pub async fn find_one(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Option<Value>> {
        match self.locate(location)? {
            (table, Some(column)) => table.find_one_column(column, criteria, options).await,
            (table, None) => Ok(table
                .find_one_with(criteria, options)
                .await?
                .map(Value::Object)),
        }
    }

    pub async fn find_or_create(
        &self,
        table: &str,
        criteria: impl Into<Criteria>,
        creation: Value,
    ) -> Result<Option<Record>> {
        self.table(table)?.find_or_create(criteria, creation).await
    }

    pub async fn update(&self, table: &str, criteria: impl Into<Criteria>, data: Value) -> Result<usize> {
        self.table(table)?.update(criteria, data).await
    }

    pub async fn update_or_create(
        &self,
        table: &str,
        criteria: impl Into<Criteria>,
        data: Value,
    ) -> Result<Upsert> {
        self.table(table)?.update_or_create(criteria, data).await
    }

    pub async fn get(&self, location: &str, criteria: impl Into<Criteria>, default: Value) -> Result<Value> {
        let (table, column) = self.locate_column(location)?;
        table.get(column, criteria, default).await
    }

    pub async fn get_raw(&self, location: &str, criteria: impl Into<Criteria>, default: Value) -> Result<Value> {
        let (table, column) = self.locate_column(location)?;
        table.get_raw(column, criteria, default).await
    }

    pub async fn set(&self, location: &str, criteria: impl Into<Criteria>, value: Value) -> Result<usize> {
        let (table, column) = self.locate_column(location)?;
        table.set(column, criteria, value).await
    }

    pub async fn set_raw(&self, location: &str, criteria: impl Into<Criteria>, value: Value) -> Result<usize> {
        let (table, column) = self.locate_column(location)?;
        table.set_raw(column, criteria, value).await
    }

    pub async fn incr(&self, location: &str, criteria: impl Into<Criteria>, amount: Option<f64>) -> Result<usize> {
        let (table, column) = self.locate_column(location)?;
        table.incr(column, criteria, amount).await
    }

    pub async fn decr(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        amount: Option<f64>,
        allow_negative: bool,
    ) -> Result<usize> {
        let (table, column) = self.locate_column(location)?;
        table.decr(column, criteria, amount, allow_negative).await
    }

    pub async fn remove(&self, table: &str, criteria: impl Into<Criteria>) -> Result<usize> {
        self.table(table)?.remove(criteria).await
    }

    pub async fn clear(&self, table: &str) -> Result<usize> {
        self.table(table)?.clear().await
    }

    /// Counts rows, or non-null values of a column when `location` names one.
    pub async fn count(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<i64>> {
        match self.locate(location)? {
            (table, Some(column)) => table.count_column(column, criteria, options).await,
            (table, None) => table.count_with(criteria, options).await,
        }
    }

    pub async fn min(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<Value>> {
        let (table, column) = self.locate_column(location)?;
        table.min(column, criteria, options).await
    }

    pub async fn max(
        &self,
        location: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<Value>> {
        let (table, column) = self.locate_column(location)?;
        table.max(column, criteria, options).await
    }
}

fn table_exists(name: &str) -> Query {
    Query::select_columns("sqlite_master", ["name"])
        .where_eq("type", "table")
        .where_eq("name", name)
        .exists()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::types::LogicalType;

    #[test]
    fn empty_path_is_rejected() {
        let err = Store::open("", StoreOptions::default()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn relative_paths_resolve_against_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open("data/app.db", StoreOptions::new().dir(dir.path())).unwrap();
        assert_eq!(store.path(), Some(dir.path().join("data/app.db").as_path()));
        assert!(dir.path().join("data").is_dir());

        let memory = Store::open_memory().unwrap();
        assert_eq!(memory.path(), None);
    }

    #[tokio::test]
    async fn define_table_is_idempotent() {
        let statements = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&statements);
        let store = Store::open(
            MEMORY,
            StoreOptions::new().verbose(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        let first = store
            .define_table("t", Schema::new().column("a", LogicalType::String), TableOptions::new())
            .await
            .unwrap();
        let issued = statements.load(Ordering::SeqCst);
        assert!(issued > 0);

        let second = store
            .define_table("t", Schema::new().column("b", LogicalType::Number), TableOptions::new())
            .await
            .unwrap();
        assert!(first.same_definition(&second));
        assert!(second.schema().contains("a"));
        assert!(!second.schema().contains("b"));
        assert_eq!(statements.load(Ordering::SeqCst), issued);
        assert_eq!(store.tables(), vec!["t".to_string()]);
    }

    #[tokio::test]
    async fn failed_definition_is_forgotten() {
        let store = Store::open_memory().unwrap();
        let options = TableOptions::new().with_raw(|table| {
            table.column("broken (");
        });
        assert!(store.define_table("bad", Schema::new(), options).await.is_err());
        assert!(matches!(store.table("bad"), Err(Error::UnknownTable(_))));
    }

    #[tokio::test]
    async fn locations_require_a_column_where_needed() {
        let store = Store::open_memory().unwrap();
        store
            .define_table("t", Schema::new().column("n", LogicalType::Number), TableOptions::new())
            .await
            .unwrap();

        let err = store.get("t", json!({}), Value::Null).await.unwrap_err();
        assert!(err.is_configuration());
        let err = store.incr("t.", json!({}), None).await.unwrap_err();
        assert!(err.is_configuration());
        let err = store.set("missing.n", json!({}), json!(1)).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTable(name) if name == "missing"));
    }

    #[tokio::test]
    async fn count_tables_skips_the_sequence_table() {
        let store = Store::open_memory().unwrap();
        store
            .define_table("a", Schema::new().column("id", LogicalType::Increments), TableOptions::new())
            .await
            .unwrap();
        store.create("a", json!({})).await.unwrap();
        store
            .raw(SqlQuery::new("CREATE TABLE other (x TEXT)"), ResponseShape::Affected)
            .await
            .unwrap();
        assert_eq!(store.count_tables().await.unwrap(), 2);

        assert!(store.drop_table("a").await.unwrap());
        assert!(!store.drop_table("a").await.unwrap());
        assert!(!store.has_table("a").await.unwrap());
        assert_eq!(store.count_tables().await.unwrap(), 1);
    }
}
