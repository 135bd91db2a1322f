//! Predicate and order compilation.
//!
//! Criteria arrive in one of three shapes and are classified once, when they
//! are converted into [`Criteria`]:
//!
//! - an equality map `{"column": value, ...}`, all terms joined with AND;
//! - a triple `[column, operator, value]` (or `[column, value]` for `=`);
//! - a list of either, joined with AND.
//!
//! List entries are classified shallowly: a nested list is accepted as a list
//! without validating what it holds, and entries that are neither maps,
//! triples nor lists are dropped. Dropping is per entry: one stray scalar in
//! a list does not turn the whole list into match-all criteria, so the valid
//! entries still filter.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec;
use crate::error::Result;
use crate::query::{Condition, Operator, Query};
use crate::schema::Schema;
use crate::sqlite::SqlValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    EqualityMap(Vec<(String, Value)>),
    Triple {
        column: String,
        operator: String,
        value: Value,
    },
    ClauseList(Vec<Criteria>),
}

impl Criteria {
    /// Criteria that match every row.
    pub fn all() -> Self {
        Criteria::EqualityMap(Vec::new())
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Criteria::EqualityMap(vec![(column.into(), value.into())])
    }

    pub fn triple(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Criteria::Triple {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Joins two criteria with AND.
    pub fn and(self, other: impl Into<Criteria>) -> Self {
        match self {
            Criteria::ClauseList(mut list) => {
                list.push(other.into());
                Criteria::ClauseList(list)
            }
            first => Criteria::ClauseList(vec![first, other.into()]),
        }
    }

    /// True when the criteria carry no terms at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Criteria::EqualityMap(pairs) => pairs.is_empty(),
            Criteria::Triple { .. } => false,
            Criteria::ClauseList(list) => list.iter().all(Criteria::is_empty),
        }
    }

    /// The equality pairs, when the criteria are a plain map.
    pub fn as_equality_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Criteria::EqualityMap(pairs) => Some(pairs),
            _ => None,
        }
    }

    fn classify_entry(value: Value) -> Option<Criteria> {
        match value {
            value if is_triple(&value) => Some(Criteria::from_triple(value)),
            Value::Object(map) => Some(Criteria::from(map)),
            Value::Array(entries) => Some(Criteria::ClauseList(
                entries.into_iter().filter_map(Criteria::classify_entry).collect(),
            )),
            _ => None,
        }
    }

    fn from_triple(value: Value) -> Criteria {
        let mut parts = match value {
            Value::Array(parts) => parts.into_iter(),
            _ => return Criteria::all(),
        };
        let column = match parts.next() {
            Some(Value::String(column)) => column,
            _ => return Criteria::all(),
        };
        let rest: Vec<Value> = parts.collect();
        match <[Value; 2]>::try_from(rest) {
            Ok([operator, value]) => Criteria::Triple {
                column,
                operator: match operator {
                    Value::String(op) => op,
                    other => other.to_string(),
                },
                value,
            },
            Err(mut rest) => Criteria::Triple {
                column,
                operator: "=".to_string(),
                value: rest.pop().unwrap_or(Value::Null),
            },
        }
    }
}

fn is_triple(value: &Value) -> bool {
    match value {
        Value::Array(parts) => {
            (parts.len() == 2 || parts.len() == 3) && parts.first().is_some_and(Value::is_string)
        }
        _ => false,
    }
}

impl From<Value> for Criteria {
    fn from(value: Value) -> Self {
        match value {
            value if is_triple(&value) => Criteria::from_triple(value),
            Value::Array(entries) => Criteria::ClauseList(
                entries.into_iter().filter_map(Criteria::classify_entry).collect(),
            ),
            Value::Object(map) => Criteria::from(map),
            _ => Criteria::all(),
        }
    }
}

impl From<Map<String, Value>> for Criteria {
    fn from(map: Map<String, Value>) -> Self {
        Criteria::EqualityMap(map.into_iter().collect())
    }
}

impl From<Vec<Criteria>> for Criteria {
    fn from(list: Vec<Criteria>) -> Self {
        Criteria::ClauseList(list)
    }
}

/// Appends the criteria to `query` as AND-ed conditions.
///
/// Equality values and comparison values are cast with the column's declared
/// type, so they compare against the stored representation. Pattern operators
/// keep their pattern text as is. Empty criteria add nothing and therefore
/// match every row.
pub fn build_where(query: &mut Query, criteria: &Criteria, schema: &Schema) -> Result<()> {
    match criteria {
        Criteria::EqualityMap(pairs) => {
            for (column, value) in pairs {
                let cast = cast_for(schema, column, value)?;
                query.push_condition(Condition::new(column.clone(), Operator::Equal, cast));
            }
        }
        Criteria::Triple {
            column,
            operator,
            value,
        } => {
            let operator: Operator = operator.parse()?;
            let cast = if operator.is_pattern() {
                codec::cast_value(value)?
            } else {
                cast_for(schema, column, value)?
            };
            query.push_condition(Condition::new(column.clone(), operator, cast));
        }
        Criteria::ClauseList(list) => {
            for clause in list {
                build_where(query, clause, schema)?;
            }
        }
    }
    Ok(())
}

fn cast_for(schema: &Schema, column: &str, value: &Value) -> Result<SqlValue> {
    match schema.get(column) {
        Some(descriptor) => codec::to_column_value(descriptor.ty, value),
        None => codec::cast_value(value),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    /// `desc` in any case is descending; anything else is ascending.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    /// Engine-native random order.
    Random,
    /// Ascending on a column.
    Column(String),
    Directed(String, Direction),
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Order::Directed(column.into(), Direction::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Order::Directed(column.into(), Direction::Desc)
    }

    /// Reads `"random"`, a column name, `[column]` or `[column, direction]`.
    /// Any other shape yields `None` and the order is ignored.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Order::from(s.as_str())),
            Value::Array(parts) => match parts.as_slice() {
                [Value::String(column)] => Some(Order::Column(column.clone())),
                [Value::String(column), Value::String(direction)] => Some(Order::Directed(
                    column.clone(),
                    Direction::parse(direction),
                )),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<&str> for Order {
    fn from(s: &str) -> Self {
        if s == "random" {
            Order::Random
        } else {
            Order::Column(s.to_string())
        }
    }
}

/// Applies an optional order to `query`.
pub fn build_order(query: Query, order: Option<&Order>) -> Query {
    match order {
        Some(order) => query.order_by(order.clone()),
        None => query,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::LogicalType;

    fn schema() -> Schema {
        Schema::new()
            .column("id", LogicalType::Increments)
            .column("name", LogicalType::String)
            .column("tags", LogicalType::Array)
            .column("active", LogicalType::Boolean)
    }

    fn compile(criteria: impl Into<Criteria>) -> crate::sqlite::SqlQuery {
        let mut query = Query::select("t");
        build_where(&mut query, &criteria.into(), &schema()).unwrap();
        query.to_sql()
    }

    #[test]
    fn classifies_the_three_shapes() {
        assert_eq!(
            Criteria::from(json!({"name": "a"})),
            Criteria::EqualityMap(vec![("name".into(), json!("a"))])
        );
        assert_eq!(
            Criteria::from(json!(["id", ">", 3])),
            Criteria::triple("id", ">", 3)
        );
        assert_eq!(Criteria::from(json!(["id", 3])), Criteria::triple("id", "=", 3));
        assert_eq!(
            Criteria::from(json!([{"name": "a"}, ["id", "<", 9]])),
            Criteria::ClauseList(vec![Criteria::eq("name", "a"), Criteria::triple("id", "<", 9)])
        );
    }

    #[test]
    fn invalid_criteria_match_everything() {
        assert!(Criteria::from(json!(null)).is_empty());
        assert!(Criteria::from(json!(42)).is_empty());
        assert!(Criteria::from(json!({})).is_empty());
        assert!(Criteria::from(json!([])).is_empty());
        assert_eq!(compile(json!({})).statement, "SELECT * FROM \"t\"");
    }

    #[test]
    fn list_entries_are_validated_shallowly() {
        // scalars inside a list are dropped, nested lists are kept as lists
        let criteria = Criteria::from(json!([7, {"name": "a"}, [[["id", 1]], "x"]]));
        assert_eq!(
            criteria,
            Criteria::ClauseList(vec![
                Criteria::eq("name", "a"),
                Criteria::ClauseList(vec![Criteria::ClauseList(vec![Criteria::triple(
                    "id", "=", 1
                )])]),
            ])
        );
        let sql = compile(criteria);
        assert_eq!(sql.statement, "SELECT * FROM \"t\" WHERE \"name\" = ? AND \"id\" = ?");
    }

    #[test]
    fn equality_values_are_cast_by_column_type() {
        let sql = compile(json!({"tags": ["x"], "active": true, "extra": false}));
        assert_eq!(
            sql.params.values,
            vec![
                SqlValue::Text("[\"x\"]".into()),
                SqlValue::Integer(1),
                SqlValue::Integer(0)
            ]
        );
    }

    #[test]
    fn triple_casts_only_the_value() {
        let sql = compile(json!(["active", "!=", false]));
        assert_eq!(sql.statement, "SELECT * FROM \"t\" WHERE \"active\" != ?");
        assert_eq!(sql.params.values, vec![SqlValue::Integer(0)]);

        let sql = compile(json!(["tags", "like", "%x%"]));
        assert_eq!(sql.params.values, vec![SqlValue::Text("%x%".into())]);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let mut query = Query::select("t");
        let err = build_where(&mut query, &Criteria::triple("id", "~~", 1), &schema()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn order_shapes() {
        assert_eq!(Order::from_json(&json!("random")), Some(Order::Random));
        assert_eq!(Order::from_json(&json!("name")), Some(Order::Column("name".into())));
        assert_eq!(
            Order::from_json(&json!(["name", "DESC"])),
            Some(Order::desc("name"))
        );
        assert_eq!(Order::from_json(&json!(["a", "b", "c"])), None);
        assert_eq!(Order::from_json(&json!(3)), None);

        let sql = build_order(Query::select("t"), Some(&Order::Random)).to_sql();
        assert_eq!(sql.statement, "SELECT * FROM \"t\" ORDER BY RANDOM()");
        let sql = build_order(Query::select("t"), None).to_sql();
        assert_eq!(sql.statement, "SELECT * FROM \"t\"");
    }
}
