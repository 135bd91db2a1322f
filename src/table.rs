use std::sync::Arc;

use serde_json::{Map, Value};

use crate::backend::Dispatcher;
use crate::codec;
use crate::config::{AggregateOptions, FindOptions, TableOptions, WriteOptions};
use crate::criteria::{build_order, build_where, Criteria};
use crate::error::{Error, Result};
use crate::query::{AggregateFn, Assignment, Query};
use crate::schema::{ColumnDescriptor, KeyColumn, Schema, TIMESTAMP_COLUMNS};
use crate::sqlite::{Row, SqlValue};
use crate::types::LogicalType;

/// A row as returned to callers, keyed by column name in column order.
pub type Record = Map<String, Value>;

/// What [`Table::update_or_create`] ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// No row matched; this row was inserted.
    Created(Option<Record>),
    /// Rows matched and this many were updated.
    Updated(usize),
}

/// Handle to a defined table. Cheap to clone; all clones share one definition.
#[derive(Clone)]
pub struct Table {
    inner: Arc<TableInner>,
}

struct TableInner {
    name: String,
    schema: Schema,
    key: Option<KeyColumn>,
    /// Column sets that can reject an insert, single keys first.
    conflict_keys: Vec<Vec<String>>,
    timestamps: bool,
    timestamp_descriptor: ColumnDescriptor,
    dispatcher: Arc<Dispatcher>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.inner.name)
            .field("schema", &self.inner.schema)
            .field("key", &self.inner.key)
            .finish()
    }
}

impl Table {
    pub(crate) fn new(
        name: &str,
        schema: Schema,
        options: &TableOptions,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let key = schema.find_key();
        let conflict_keys = conflict_keys(&schema, key.as_ref(), options);
        Self {
            inner: Arc::new(TableInner {
                name: name.to_string(),
                schema,
                key,
                conflict_keys,
                timestamps: options.timestamps && options.raw().is_none(),
                timestamp_descriptor: ColumnDescriptor::new(LogicalType::Date),
                dispatcher,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Column used to fetch a row back after inserting it.
    pub fn key(&self) -> Option<&KeyColumn> {
        self.inner.key.as_ref()
    }

    /// True when both handles refer to the same definition.
    pub fn same_definition(&self, other: &Table) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    fn descriptor(&self, column: &str) -> Option<&ColumnDescriptor> {
        self.inner.schema.get(column).or_else(|| {
            (self.inner.timestamps && TIMESTAMP_COLUMNS.contains(&column))
                .then_some(&self.inner.timestamp_descriptor)
        })
    }

    fn unknown_column(&self, column: &str) -> Error {
        Error::UnknownColumn {
            table: self.inner.name.clone(),
            column: column.to_string(),
        }
    }

    /// Casts every field of a JSON object for writing.
    fn encode_payload(&self, data: &Value, raw: bool) -> Result<Vec<(String, SqlValue)>> {
        let fields = data.as_object().ok_or_else(|| {
            Error::Configuration(format!(
                "data written to '{}' must be an object, got {data}",
                self.inner.name
            ))
        })?;
        fields
            .iter()
            .map(|(column, value)| {
                let descriptor = self
                    .inner
                    .schema
                    .get(column)
                    .ok_or_else(|| self.unknown_column(column))?;
                Ok((column.clone(), codec::encode(descriptor, value, raw)?))
            })
            .collect()
    }

    fn decode_row(&self, row: Row, raw: bool) -> Result<Record> {
        let mut record = Record::new();
        for (column, value) in row.into_pairs() {
            let value = match self.descriptor(&column) {
                Some(descriptor) => codec::decode(descriptor, value, raw)?,
                None => codec::sql_to_json(value),
            };
            record.insert(column, value);
        }
        Ok(record)
    }

    fn decode_column(&self, column: &str, mut row: Row, raw: bool) -> Result<Value> {
        let value = row.take(column).unwrap_or(SqlValue::Null);
        match self.descriptor(column) {
            Some(descriptor) => codec::decode(descriptor, value, raw),
            None => Ok(codec::sql_to_json(value)),
        }
    }

    fn filtered(&self, mut query: Query, criteria: &Criteria) -> Result<Query> {
        build_where(&mut query, criteria, &self.inner.schema)?;
        Ok(query)
    }

    fn select_query(&self, criteria: &Criteria, options: &FindOptions, first: bool) -> Result<Query> {
        let query = if first {
            Query::first(self.name())
        } else {
            Query::select(self.name())
        };
        let mut query = build_order(self.filtered(query, criteria)?, options.order.as_ref());
        if !first {
            if let Some(limit) = options.limit.filter(|limit| *limit > 0) {
                query = query.limit(limit);
            }
        }
        if let Some(skip) = options.skip.filter(|skip| *skip > 0) {
            query = query.offset(skip);
        }
        Ok(query)
    }

    /// Inserts `object`, ignoring the insert if it conflicts with a unique or
    /// primary key, and returns the stored row.
    ///
    /// A new row is fetched back through the table's key: the key value in
    /// the payload when there is one, otherwise the auto-increment sequence
    /// read together with the insert. An ignored insert returns the row it
    /// conflicted with, found through the first unique or primary key whose
    /// columns are all in the payload. Without either, a non-empty payload is
    /// itself the lookup criteria.
    pub async fn create(&self, object: Value) -> Result<Option<Record>> {
        self.create_with(object, WriteOptions::default()).await
    }

    pub async fn create_with(&self, object: Value, options: WriteOptions) -> Result<Option<Record>> {
        let values = self.encode_payload(&object, options.raw)?;
        let insert = Query::insert(self.name(), values, true);

        let key = self.key();
        let given = key.and_then(|key| {
            object
                .get(&key.name)
                .filter(|value| !value.is_null())
                .map(|value| Criteria::eq(key.name.clone(), value.clone()))
        });
        let (inserted, lookup) = match key {
            Some(key) if key.increments && given.is_none() => {
                let (inserted, seq) = self.dispatcher().insert_with_sequence(&insert).await?;
                let lookup = seq.map(|seq| Criteria::eq(key.name.clone(), seq));
                (inserted, lookup)
            }
            _ => (self.dispatcher().run(&insert).await?, given),
        };

        let lookup = if inserted > 0 {
            lookup
        } else {
            // an ignored insert leaves the sequence on an older row
            self.conflict_criteria(&object)
        };
        if let Some(criteria) = lookup {
            if let Some(row) = self.find_one(criteria).await? {
                return Ok(Some(row));
            }
        }

        if object.as_object().map_or(true, Map::is_empty) {
            return Ok(None);
        }
        self.find_one(object).await
    }

    /// Equality criteria on the first conflict key fully present in `object`.
    fn conflict_criteria(&self, object: &Value) -> Option<Criteria> {
        let fields = object.as_object()?;
        self.inner.conflict_keys.iter().find_map(|columns| {
            let pairs: Option<Vec<(String, Value)>> = columns
                .iter()
                .map(|column| {
                    fields
                        .get(column)
                        .filter(|value| !value.is_null())
                        .map(|value| (column.clone(), value.clone()))
                })
                .collect();
            pairs.map(Criteria::EqualityMap)
        })
    }

    pub async fn find(&self, criteria: impl Into<Criteria>) -> Result<Vec<Record>> {
        self.find_with(criteria, &FindOptions::default()).await
    }

    pub async fn find_with(
        &self,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Vec<Record>> {
        let query = self.select_query(&criteria.into(), options, false)?;
        let rows = self.dispatcher().fetch(&query).await?;
        rows.into_iter()
            .map(|row| self.decode_row(row, options.raw))
            .collect()
    }

    /// Like [`Table::find_with`], returning only `column` from each row.
    pub async fn find_column(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Vec<Value>> {
        let query = self.select_query(&criteria.into(), options, false)?;
        let rows = self.dispatcher().fetch(&query).await?;
        rows.into_iter()
            .map(|row| self.decode_column(column, row, options.raw))
            .collect()
    }

    pub async fn find_one(&self, criteria: impl Into<Criteria>) -> Result<Option<Record>> {
        self.find_one_with(criteria, &FindOptions::default()).await
    }

    pub async fn find_one_with(
        &self,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Option<Record>> {
        let query = self.select_query(&criteria.into(), options, true)?;
        match self.dispatcher().fetch_one(&query).await? {
            Some(row) => self.decode_row(row, options.raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn find_one_column(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        options: &FindOptions,
    ) -> Result<Option<Value>> {
        let query = self.select_query(&criteria.into(), options, true)?;
        match self.dispatcher().fetch_one(&query).await? {
            Some(row) => self.decode_column(column, row, options.raw).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the first row matching `criteria`, or creates one from the
    /// criteria's equality terms merged with `creation`.
    pub async fn find_or_create(
        &self,
        criteria: impl Into<Criteria>,
        creation: Value,
    ) -> Result<Option<Record>> {
        self.find_or_create_with(criteria, creation, &FindOptions::default())
            .await
    }

    pub async fn find_or_create_with(
        &self,
        criteria: impl Into<Criteria>,
        creation: Value,
        options: &FindOptions,
    ) -> Result<Option<Record>> {
        let criteria = criteria.into();
        if let Some(existing) = self.find_one_with(criteria.clone(), options).await? {
            return Ok(Some(existing));
        }
        let payload = merge(&criteria, creation)?;
        self.create(payload).await
    }

    /// Updates the rows matching `criteria` and returns how many changed.
    pub async fn update(&self, criteria: impl Into<Criteria>, data: Value) -> Result<usize> {
        self.update_with(criteria, data, WriteOptions::default()).await
    }

    pub async fn update_with(
        &self,
        criteria: impl Into<Criteria>,
        data: Value,
        options: WriteOptions,
    ) -> Result<usize> {
        let assignments: Vec<(String, Assignment)> = self
            .encode_payload(&data, options.raw)?
            .into_iter()
            .map(|(column, value)| (column, Assignment::Value(value)))
            .collect();
        if assignments.is_empty() {
            return Ok(0);
        }
        let query = self.filtered(Query::update(self.name(), assignments), &criteria.into())?;
        self.dispatcher().run(&query).await
    }

    /// Updates matching rows, or creates one when nothing matches.
    ///
    /// The existence check and the write are separate statements; concurrent
    /// callers on the native backend can both decide to create.
    pub async fn update_or_create(&self, criteria: impl Into<Criteria>, data: Value) -> Result<Upsert> {
        self.update_or_create_with(criteria, data, WriteOptions::default())
            .await
    }

    pub async fn update_or_create_with(
        &self,
        criteria: impl Into<Criteria>,
        data: Value,
        options: WriteOptions,
    ) -> Result<Upsert> {
        let criteria = criteria.into();
        let found = self.find_one(criteria.clone()).await?;
        match found {
            None => {
                let payload = merge(&criteria, data)?;
                Ok(Upsert::Created(self.create_with(payload, options).await?))
            }
            Some(_) => Ok(Upsert::Updated(
                self.update_with(criteria, data, options).await?,
            )),
        }
    }

    /// Value of `column` in the first matching row, or `default` when no row
    /// matches.
    pub async fn get(&self, column: &str, criteria: impl Into<Criteria>, default: Value) -> Result<Value> {
        self.base_get(column, criteria.into(), default, false).await
    }

    /// [`Table::get`] without the column getter.
    pub async fn get_raw(&self, column: &str, criteria: impl Into<Criteria>, default: Value) -> Result<Value> {
        self.base_get(column, criteria.into(), default, true).await
    }

    async fn base_get(&self, column: &str, criteria: Criteria, default: Value, raw: bool) -> Result<Value> {
        let options = FindOptions {
            raw,
            ..FindOptions::default()
        };
        let found = self.find_one_with(criteria, &options).await?;
        Ok(found
            .and_then(|record| record.get(column).cloned())
            .unwrap_or(default))
    }

    /// Sets `column` on matching rows. The column must be declared.
    pub async fn set(&self, column: &str, criteria: impl Into<Criteria>, value: Value) -> Result<usize> {
        self.base_set(column, criteria.into(), value, false).await
    }

    /// [`Table::set`] without the column setter.
    pub async fn set_raw(&self, column: &str, criteria: impl Into<Criteria>, value: Value) -> Result<usize> {
        self.base_set(column, criteria.into(), value, true).await
    }

    async fn base_set(&self, column: &str, criteria: Criteria, value: Value, raw: bool) -> Result<usize> {
        if !self.inner.schema.contains(column) {
            return Err(self.unknown_column(column));
        }
        let mut data = Map::new();
        data.insert(column.to_string(), value);
        self.update_with(criteria, Value::Object(data), WriteOptions { raw })
            .await
    }

    /// Adds `amount` (default 1) to `column` on matching rows.
    pub async fn incr(&self, column: &str, criteria: impl Into<Criteria>, amount: Option<f64>) -> Result<usize> {
        let amount = amount_or_one(amount);
        if amount == 0.0 {
            return Ok(0);
        }
        let assignment = Assignment::Increment(amount_value(amount));
        let query = self.filtered(
            Query::update(self.name(), vec![(column.to_string(), assignment)]),
            &criteria.into(),
        )?;
        self.dispatcher().run(&query).await
    }

    /// Subtracts `amount` (default 1) from `column` on matching rows. Unless
    /// `allow_negative` is set the result is floored at zero.
    pub async fn decr(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        amount: Option<f64>,
        allow_negative: bool,
    ) -> Result<usize> {
        let amount = amount_or_one(amount);
        if amount == 0.0 {
            return Ok(0);
        }
        let assignment = Assignment::Decrement {
            amount: amount_value(amount),
            floor_zero: !allow_negative,
        };
        let query = self.filtered(
            Query::update(self.name(), vec![(column.to_string(), assignment)]),
            &criteria.into(),
        )?;
        self.dispatcher().run(&query).await
    }

    /// Deletes matching rows. Empty criteria delete nothing; use
    /// [`Table::clear`] to empty the table.
    pub async fn remove(&self, criteria: impl Into<Criteria>) -> Result<usize> {
        let criteria = criteria.into();
        if criteria.is_empty() {
            return Ok(0);
        }
        let query = self.filtered(Query::delete(self.name()), &criteria)?;
        self.dispatcher().run(&query).await
    }

    /// Deletes every row, keeping the table.
    pub async fn clear(&self) -> Result<usize> {
        self.dispatcher().run(&Query::delete(self.name())).await
    }

    /// Number of matching rows.
    pub async fn count(&self, criteria: impl Into<Criteria>) -> Result<Option<i64>> {
        self.count_with(criteria, &AggregateOptions::default()).await
    }

    pub async fn count_with(
        &self,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<i64>> {
        let value = self
            .aggregate(AggregateFn::Count, None, criteria.into(), options)
            .await?;
        Ok(as_count(value))
    }

    /// Number of matching rows with a non-null `column`, or of distinct values
    /// when `options.distinct` is set.
    pub async fn count_column(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<i64>> {
        let value = self
            .aggregate(AggregateFn::Count, Some(column), criteria.into(), options)
            .await?;
        Ok(as_count(value))
    }

    pub async fn min(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<Value>> {
        let value = self
            .aggregate(AggregateFn::Min, Some(column), criteria.into(), options)
            .await?;
        self.aggregate_value(column, value)
    }

    pub async fn max(
        &self,
        column: &str,
        criteria: impl Into<Criteria>,
        options: &AggregateOptions,
    ) -> Result<Option<Value>> {
        let value = self
            .aggregate(AggregateFn::Max, Some(column), criteria.into(), options)
            .await?;
        self.aggregate_value(column, value)
    }

    async fn aggregate(
        &self,
        function: AggregateFn,
        column: Option<&str>,
        criteria: Criteria,
        options: &AggregateOptions,
    ) -> Result<Option<SqlValue>> {
        let distinct = options.distinct && function == AggregateFn::Count;
        let query = Query::aggregate(self.name(), function, column.map(String::from), distinct);
        let query = self
            .filtered(query, &criteria)?
            .group_by(options.group_by.iter().cloned());
        let query = build_order(query, options.order.as_ref());

        let row = self.dispatcher().fetch_one(&query).await?;
        Ok(row.and_then(|mut row| row.take(function.alias())))
    }

    fn aggregate_value(&self, column: &str, value: Option<SqlValue>) -> Result<Option<Value>> {
        match value {
            None | Some(SqlValue::Null) => Ok(None),
            Some(value) => match self.descriptor(column) {
                Some(descriptor) => codec::from_column_value(descriptor.ty, value).map(Some),
                None => Ok(Some(codec::sql_to_json(value))),
            },
        }
    }
}

fn conflict_keys(schema: &Schema, key: Option<&KeyColumn>, options: &TableOptions) -> Vec<Vec<String>> {
    let mut keys: Vec<Vec<String>> = key.map(|key| vec![key.name.clone()]).into_iter().collect();
    for (name, descriptor) in schema.iter() {
        if descriptor.primary || descriptor.unique {
            keys.push(vec![name.to_string()]);
        }
    }
    if options.raw().is_none() {
        for columns in [&options.primary, &options.unique] {
            if !columns.is_empty() {
                keys.push(columns.clone());
            }
        }
    }
    keys.dedup();
    keys
}

fn merge(criteria: &Criteria, extra: Value) -> Result<Value> {
    let mut payload = Map::new();
    if let Some(pairs) = criteria.as_equality_map() {
        for (column, value) in pairs {
            payload.insert(column.clone(), value.clone());
        }
    }
    match extra {
        Value::Object(fields) => payload.extend(fields),
        Value::Null => {}
        other => {
            return Err(Error::Configuration(format!(
                "creation data must be an object, got {other}"
            )))
        }
    }
    Ok(Value::Object(payload))
}

fn amount_or_one(amount: Option<f64>) -> f64 {
    match amount {
        Some(amount) if !amount.is_nan() => amount,
        _ => 1.0,
    }
}

fn amount_value(amount: f64) -> SqlValue {
    if amount.fract() == 0.0 && amount.abs() < 9.0e15 {
        SqlValue::Integer(amount as i64)
    } else {
        SqlValue::Real(amount)
    }
}

fn as_count(value: Option<SqlValue>) -> Option<i64> {
    match value? {
        SqlValue::Integer(n) => Some(n),
        SqlValue::Real(f) => Some(f as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_keys_put_single_columns_before_composites() {
        let schema = Schema::new()
            .column("id", LogicalType::Increments)
            .column("email", ColumnDescriptor::new(LogicalType::String).unique())
            .column("a", LogicalType::String)
            .column("b", LogicalType::String);
        let options = TableOptions::new().with_unique(["a", "b"]);
        let keys = conflict_keys(&schema, schema.find_key().as_ref(), &options);
        assert_eq!(
            keys,
            vec![
                vec!["id".to_string()],
                vec!["email".to_string()],
                vec!["a".to_string(), "b".to_string()],
            ]
        );

        let raw = TableOptions::new().with_unique(["a", "b"]).with_raw(|_| {});
        assert_eq!(conflict_keys(&schema, None, &raw), vec![vec!["email".to_string()]]);
    }

    #[test]
    fn amounts_default_to_one() {
        assert_eq!(amount_or_one(None), 1.0);
        assert_eq!(amount_or_one(Some(f64::NAN)), 1.0);
        assert_eq!(amount_or_one(Some(0.0)), 0.0);
        assert_eq!(amount_value(3.0), SqlValue::Integer(3));
        assert_eq!(amount_value(0.5), SqlValue::Real(0.5));
    }

    #[test]
    fn merge_prefers_creation_fields() {
        let criteria = Criteria::from(serde_json::json!({"name": "a", "n": 1}));
        let merged = merge(&criteria, serde_json::json!({"n": 2, "x": true})).unwrap();
        assert_eq!(merged, serde_json::json!({"name": "a", "n": 2, "x": true}));

        let triple = Criteria::triple("n", ">", 1);
        assert_eq!(merge(&triple, Value::Null).unwrap(), serde_json::json!({}));
        assert!(merge(&triple, serde_json::json!([1])).unwrap_err().is_configuration());
    }
}
