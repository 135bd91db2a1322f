//! Schema-declared tables over SQLite with a small CRUD and aggregate API.
//!
//! # Intention
//!
//! - Declare a table once as a map of columns to logical types and get back a
//!   handle that creates, finds, updates, counts and removes rows as JSON.
//! - Run the same operations against either a native SQLite file or an
//!   embedded in-memory database that is snapshotted to disk after each
//!   change.
//!
//! # Architectural Boundaries
//!
//! - [`types`], [`schema`] and [`codec`] describe columns and convert values.
//! - [`criteria`] and [`query`] compile predicates and statements; they never
//!   touch a connection.
//! - [`backend`] owns connections. [`table`] and [`store`] are the public
//!   façade on top.
//!
//! ```no_run
//! use rust_sqlite_tables::{LogicalType, Schema, Store, StoreOptions, TableOptions};
//! use serde_json::json;
//!
//! # async fn demo() -> rust_sqlite_tables::Result<()> {
//! let store = Store::open("app.db", StoreOptions::embedded())?;
//! let people = store
//!     .define_table(
//!         "people",
//!         Schema::new()
//!             .column("id", LogicalType::Increments)
//!             .column("name", LogicalType::String)
//!             .column("tags", LogicalType::Array),
//!         TableOptions::new(),
//!     )
//!     .await?;
//!
//! people.create(json!({"name": "ada", "tags": ["math"]})).await?;
//! let found = people.find_one(json!({"name": "ada"})).await?;
//! assert_eq!(found.and_then(|row| row.get("tags").cloned()), Some(json!(["math"])));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod criteria;
pub mod error;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod table;
pub mod types;

pub use config::{
    AggregateOptions, Client, ConnectionOptions, FindOptions, StoreOptions, TableOptions,
    WriteOptions, MEMORY,
};
pub use criteria::{Criteria, Direction, Order};
pub use error::{Error, Result};
pub use schema::{ColumnDescriptor, CreateTable, KeyColumn, Schema};
pub use sqlite::{Params, Response, ResponseShape, Row, SqlQuery, SqlValue};
pub use store::Store;
pub use table::{Record, Table, Upsert};
pub use types::LogicalType;
