use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::codec;
use crate::config::TableOptions;
use crate::error::{Error, Result};
use crate::query::quote;
use crate::sqlite::SqlQuery;
use crate::types::LogicalType;

/// A user transform applied to a column value (setter on the way in, getter on
/// the way out).
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Names of the columns added by [`TableOptions::timestamps`].
pub const TIMESTAMP_COLUMNS: [&str; 2] = ["created_at", "updated_at"];

/// Canonical description of one column.
///
/// Built once when a table is defined and never mutated afterwards. Any raw
/// declaration converts into one: a [`LogicalType`], a type name, or a JSON
/// descriptor object (see [`ColumnDescriptor::from_json`]).
#[derive(Clone)]
pub struct ColumnDescriptor {
    pub ty: LogicalType,
    pub default_to: Option<Value>,
    pub unique: bool,
    pub primary: bool,
    pub nullable: bool,
    pub not_nullable: bool,
    /// Name of a single-column index to create on this column.
    pub index: Option<String>,
    getter: Option<Transform>,
    setter: Option<Transform>,
}

impl ColumnDescriptor {
    pub fn new(ty: LogicalType) -> Self {
        Self {
            ty,
            default_to: None,
            unique: false,
            primary: false,
            nullable: false,
            not_nullable: false,
            index: None,
            getter: None,
            setter: None,
        }
    }

    /// Normalizes a JSON declaration.
    ///
    /// A string is a type name. An object is a descriptor whose `type` is a
    /// type name; a missing or unknown type becomes `String`. Descriptor
    /// fields of the wrong kind are rejected.
    pub fn from_json(declaration: &Value) -> Result<Self> {
        let fields = match declaration {
            Value::String(name) => return Ok(Self::new(LogicalType::parse_lossy(name))),
            Value::Object(fields) => fields,
            _ => return Ok(Self::new(LogicalType::String)),
        };

        let ty = fields
            .get("type")
            .and_then(Value::as_str)
            .map(LogicalType::parse_lossy)
            .unwrap_or(LogicalType::String);
        let mut descriptor = Self::new(ty);

        for (key, value) in fields {
            match key.as_str() {
                "type" | "name" => {}
                "defaultTo" => descriptor.default_to = Some(value.clone()),
                "unique" => descriptor.unique = expect_bool(key, value)?,
                "primary" => descriptor.primary = expect_bool(key, value)?,
                "nullable" => descriptor.nullable = expect_bool(key, value)?,
                "notNullable" => descriptor.not_nullable = expect_bool(key, value)?,
                "index" => match value {
                    Value::String(name) => descriptor.index = Some(name.clone()),
                    _ => {
                        return Err(Error::Configuration(format!(
                            "column option 'index' must be a string, got {value}"
                        )))
                    }
                },
                "getter" | "setter" | "get" | "set" => {
                    return Err(Error::Configuration(format!(
                        "column option '{key}' must be attached as a closure"
                    )))
                }
                _ => {}
            }
        }
        Ok(descriptor)
    }

    pub fn default_to(mut self, value: impl Into<Value>) -> Self {
        self.default_to = Some(value.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn not_nullable(mut self) -> Self {
        self.not_nullable = true;
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn with_getter(mut self, getter: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn with_setter(mut self, setter: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    pub fn getter(&self) -> Option<&Transform> {
        self.getter.as_ref()
    }

    pub fn setter(&self) -> Option<&Transform> {
        self.setter.as_ref()
    }

    /// Column definition used inside `CREATE TABLE`.
    pub fn to_column_sql(&self, name: &str) -> Result<String> {
        let mut def = format!("{} {}", quote(name), self.ty.to_sqlite_type());
        if let Some(default) = &self.default_to {
            let literal = codec::to_column_value(self.ty, default)?.to_literal();
            def.push_str(" DEFAULT ");
            def.push_str(&literal);
        }
        let increments = self.ty == LogicalType::Increments;
        if self.unique {
            def.push_str(" UNIQUE");
        }
        if self.primary && !increments {
            def.push_str(" PRIMARY KEY");
        }
        if self.nullable && !self.not_nullable {
            def.push_str(" NULL");
        }
        if self.not_nullable && !increments {
            def.push_str(" NOT NULL");
        }
        Ok(def)
    }
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("ty", &self.ty)
            .field("default_to", &self.default_to)
            .field("unique", &self.unique)
            .field("primary", &self.primary)
            .field("nullable", &self.nullable)
            .field("not_nullable", &self.not_nullable)
            .field("index", &self.index)
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

impl From<LogicalType> for ColumnDescriptor {
    fn from(ty: LogicalType) -> Self {
        Self::new(ty)
    }
}

impl From<&str> for ColumnDescriptor {
    fn from(name: &str) -> Self {
        Self::new(LogicalType::parse_lossy(name))
    }
}

impl From<String> for ColumnDescriptor {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

fn expect_bool(key: &str, value: &Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        Error::Configuration(format!("column option '{key}' must be a boolean, got {value}"))
    })
}

/// The column used to find a row again after it was inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    /// The column is an auto-increment id.
    pub increments: bool,
}

/// Ordered mapping of column name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<(String, ColumnDescriptor)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column; a second declaration of the same name replaces the first
    /// in place.
    pub fn column(mut self, name: impl Into<String>, declaration: impl Into<ColumnDescriptor>) -> Self {
        let name = name.into();
        let descriptor = declaration.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = descriptor,
            None => self.columns.push((name, descriptor)),
        }
        self
    }

    /// Normalizes a JSON object of `column -> declaration`.
    pub fn from_json(raw: &Value) -> Result<Self> {
        let fields = raw.as_object().ok_or_else(|| {
            Error::Configuration(format!("schema must be an object, got {raw}"))
        })?;
        let mut schema = Self::new();
        for (name, declaration) in fields {
            schema = schema.column(name.clone(), ColumnDescriptor::from_json(declaration)?);
        }
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnDescriptor)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Finds the auto-increment column, or failing that the first primary or
    /// unique column.
    ///
    /// The first `Increments` column ends the scan and overrides any candidate
    /// seen before it; among primary/unique columns the earliest one is kept.
    pub fn find_key(&self) -> Option<KeyColumn> {
        let mut key: Option<KeyColumn> = None;
        for (name, descriptor) in &self.columns {
            if descriptor.ty == LogicalType::Increments {
                return Some(KeyColumn {
                    name: name.clone(),
                    increments: true,
                });
            }
            if key.is_none() && (descriptor.primary || descriptor.unique) {
                key = Some(KeyColumn {
                    name: name.clone(),
                    increments: false,
                });
            }
        }
        key
    }
}

/// Builder for the DDL that creates one table and its indexes.
#[derive(Debug, Clone)]
pub struct CreateTable {
    table: String,
    columns: Vec<String>,
    constraints: Vec<String>,
    indexes: Vec<String>,
}

impl CreateTable {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Compiles a schema and its table options into DDL. When the options carry
    /// a raw callback it replaces the timestamp/primary/unique handling.
    pub fn from_schema(table: &str, schema: &Schema, options: &TableOptions) -> Result<Self> {
        let mut ddl = Self::new(table);
        for (name, descriptor) in schema.iter() {
            ddl.column(descriptor.to_column_sql(name)?);
            if let Some(index) = &descriptor.index {
                ddl.index(index, &[name]);
            }
        }

        match options.raw() {
            Some(callback) => callback(&mut ddl),
            None => {
                if options.timestamps {
                    ddl.timestamps();
                }
                if !options.primary.is_empty() {
                    ddl.primary(&options.primary);
                }
                if !options.unique.is_empty() {
                    ddl.unique(&options.unique);
                }
            }
        }
        Ok(ddl)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Appends a raw column definition.
    pub fn column(&mut self, definition: impl Into<String>) -> &mut Self {
        self.columns.push(definition.into());
        self
    }

    /// Appends a raw table constraint.
    pub fn constraint(&mut self, constraint: impl Into<String>) -> &mut Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn timestamps(&mut self) -> &mut Self {
        for name in TIMESTAMP_COLUMNS {
            self.columns.push(format!(
                "{} DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP",
                quote(name)
            ));
        }
        self
    }

    pub fn primary<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Self {
        let list = quote_list(columns);
        self.constraint(format!("PRIMARY KEY ({list})"))
    }

    pub fn unique<S: AsRef<str>>(&mut self, columns: &[S]) -> &mut Self {
        let list = quote_list(columns);
        self.constraint(format!("UNIQUE ({list})"))
    }

    pub fn index<S: AsRef<str>>(&mut self, name: &str, columns: &[S]) -> &mut Self {
        self.indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote(name),
            quote(&self.table),
            quote_list(columns)
        ));
        self
    }

    /// The statements to run, in order: the table first, then its indexes.
    pub fn statements(&self) -> Vec<SqlQuery> {
        let body: Vec<&str> = self
            .columns
            .iter()
            .chain(self.constraints.iter())
            .map(String::as_str)
            .collect();
        let mut statements = vec![SqlQuery::new(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.table),
            body.join(", ")
        ))];
        statements.extend(self.indexes.iter().map(|sql| SqlQuery::new(sql)));
        statements
    }
}

fn quote_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
