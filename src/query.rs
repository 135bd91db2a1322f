//! Logical query descriptors and their compilation to parameterized SQL.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::criteria::{Direction, Order};
use crate::error::{Error, Result};
use crate::sqlite::{Params, ResponseShape, SqlQuery, SqlValue};

/// Quotes an identifier for SQLite.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Comparison operators accepted in `[column, operator, value]` criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Like,
    NotLike,
    Glob,
    Is,
    IsNot,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::Glob => "GLOB",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
        }
    }

    /// Pattern operators compare against a pattern string, not a column value.
    pub fn is_pattern(self) -> bool {
        matches!(self, Operator::Like | Operator::NotLike | Operator::Glob)
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "=" | "==" => Operator::Equal,
            "!=" | "<>" => Operator::NotEqual,
            "<" => Operator::LessThan,
            "<=" => Operator::LessThanOrEqual,
            ">" => Operator::GreaterThan,
            ">=" => Operator::GreaterThanOrEqual,
            "like" => Operator::Like,
            "not like" => Operator::NotLike,
            "glob" => Operator::Glob,
            "is" => Operator::Is,
            "is not" => Operator::IsNot,
            _ => {
                return Err(Error::Configuration(format!(
                    "the operator '{s}' is not permitted"
                )))
            }
        })
    }
}

/// One `column <operator> value` term of a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: SqlValue,
}

impl Condition {
    pub fn new(column: impl Into<String>, operator: Operator, value: SqlValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    fn render(&self, sql: &mut String, params: &mut Params) {
        let column = quote(&self.column);
        match (self.operator, &self.value) {
            (Operator::Equal | Operator::Is, SqlValue::Null) => {
                let _ = write!(sql, "{column} IS NULL");
            }
            (Operator::NotEqual | Operator::IsNot, SqlValue::Null) => {
                let _ = write!(sql, "{column} IS NOT NULL");
            }
            (operator, value) => {
                let _ = write!(sql, "{column} {} ?", operator.as_sql());
                params.push(value.clone());
            }
        }
    }
}

/// Right-hand side of an UPDATE assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Value(SqlValue),
    Increment(SqlValue),
    Decrement { amount: SqlValue, floor_zero: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
}

impl AggregateFn {
    /// Alias the aggregate is selected under.
    pub fn alias(self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `SELECT`; an empty column list selects every column.
    Select { columns: Vec<String> },
    Insert {
        values: Vec<(String, SqlValue)>,
        or_ignore: bool,
    },
    Update { assignments: Vec<(String, Assignment)> },
    Delete,
    Aggregate {
        function: AggregateFn,
        column: Option<String>,
        distinct: bool,
    },
}

/// A single-table query, composed step by step and compiled with
/// [`Query::to_sql`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub statement: Statement,
    pub conditions: Vec<Condition>,
    pub group_by: Vec<String>,
    pub order: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    shape: ResponseShape,
}

impl Query {
    fn new(table: impl Into<String>, statement: Statement, shape: ResponseShape) -> Self {
        Self {
            table: table.into(),
            statement,
            conditions: Vec::new(),
            group_by: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            shape,
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Self::new(table, Statement::Select { columns: Vec::new() }, ResponseShape::Rows)
    }

    pub fn select_columns<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        Self::new(table, Statement::Select { columns }, ResponseShape::Rows)
    }

    /// Selects at most one row.
    pub fn first(table: impl Into<String>) -> Self {
        Self::select(table).limit(1)
    }

    pub fn insert(table: impl Into<String>, values: Vec<(String, SqlValue)>, or_ignore: bool) -> Self {
        Self::new(table, Statement::Insert { values, or_ignore }, ResponseShape::Affected)
    }

    pub fn update(table: impl Into<String>, assignments: Vec<(String, Assignment)>) -> Self {
        Self::new(table, Statement::Update { assignments }, ResponseShape::Affected)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(table, Statement::Delete, ResponseShape::Affected)
    }

    pub fn aggregate(
        table: impl Into<String>,
        function: AggregateFn,
        column: Option<String>,
        distinct: bool,
    ) -> Self {
        Self::new(
            table,
            Statement::Aggregate {
                function,
                column,
                distinct,
            },
            ResponseShape::Rows,
        )
    }

    /// Turns the query into an existence check.
    pub fn exists(mut self) -> Self {
        self.shape = ResponseShape::Exists;
        self
    }

    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    pub fn push_condition(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push_condition(Condition::new(column, Operator::Equal, value.into()));
        self
    }

    pub fn where_op(
        mut self,
        column: impl Into<String>,
        operator: Operator,
        value: impl Into<SqlValue>,
    ) -> Self {
        self.push_condition(Condition::new(column, operator, value.into()));
        self
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Compiles the descriptor to SQL with `?` placeholders.
    pub fn to_sql(&self) -> SqlQuery {
        let mut sql = String::new();
        let mut params = Params::new();
        let table = quote(&self.table);

        match &self.statement {
            Statement::Select { columns } => {
                let selection = if columns.is_empty() {
                    "*".to_string()
                } else {
                    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
                };
                let _ = write!(sql, "SELECT {selection} FROM {table}");
            }
            Statement::Aggregate {
                function,
                column,
                distinct,
            } => {
                let target = match column.as_deref() {
                    None | Some("*") => "*".to_string(),
                    Some(c) => quote(c),
                };
                let distinct = if *distinct { "DISTINCT " } else { "" };
                let name = match function {
                    AggregateFn::Count => "COUNT",
                    AggregateFn::Min => "MIN",
                    AggregateFn::Max => "MAX",
                };
                let _ = write!(
                    sql,
                    "SELECT {name}({distinct}{target}) AS {} FROM {table}",
                    quote(function.alias())
                );
            }
            Statement::Insert { values, or_ignore } => {
                let verb = if *or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
                if values.is_empty() {
                    let _ = write!(sql, "{verb} INTO {table} DEFAULT VALUES");
                } else {
                    let columns: Vec<String> = values.iter().map(|(c, _)| quote(c)).collect();
                    let placeholders = vec!["?"; values.len()].join(", ");
                    let _ = write!(
                        sql,
                        "{verb} INTO {table} ({}) VALUES ({placeholders})",
                        columns.join(", ")
                    );
                    for (_, value) in values {
                        params.push(value.clone());
                    }
                }
            }
            Statement::Update { assignments } => {
                let _ = write!(sql, "UPDATE {table} SET ");
                for (i, (column, assignment)) in assignments.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    let column = quote(column);
                    match assignment {
                        Assignment::Value(value) => {
                            let _ = write!(sql, "{column} = ?");
                            params.push(value.clone());
                        }
                        Assignment::Increment(amount) => {
                            let _ = write!(sql, "{column} = {column} + ?");
                            params.push(amount.clone());
                        }
                        Assignment::Decrement {
                            amount,
                            floor_zero: true,
                        } => {
                            let _ = write!(sql, "{column} = MAX(0, {column} - ?)");
                            params.push(amount.clone());
                        }
                        Assignment::Decrement {
                            amount,
                            floor_zero: false,
                        } => {
                            let _ = write!(sql, "{column} = {column} - ?");
                            params.push(amount.clone());
                        }
                    }
                }
            }
            Statement::Delete => {
                let _ = write!(sql, "DELETE FROM {table}");
            }
        }

        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            for (i, condition) in self.conditions.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                condition.render(&mut sql, &mut params);
            }
        }

        if !self.group_by.is_empty() {
            let columns: Vec<String> = self.group_by.iter().map(|c| quote(c)).collect();
            let _ = write!(sql, " GROUP BY {}", columns.join(", "));
        }

        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|order| match order {
                    Order::Random => "RANDOM()".to_string(),
                    Order::Column(column) => format!("{} ASC", quote(column)),
                    Order::Directed(column, Direction::Asc) => format!("{} ASC", quote(column)),
                    Order::Directed(column, Direction::Desc) => format!("{} DESC", quote(column)),
                })
                .collect();
            let _ = write!(sql, " ORDER BY {}", terms.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(sql, " LIMIT {limit} OFFSET {offset}");
            }
            (Some(limit), None) => {
                let _ = write!(sql, " LIMIT {limit}");
            }
            (None, Some(offset)) => {
                let _ = write!(sql, " LIMIT -1 OFFSET {offset}");
            }
            (None, None) => {}
        }

        SqlQuery::new(&sql).with_params(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_conditions_order_and_paging() {
        let query = Query::select("people")
            .where_eq("name", "ann")
            .where_op("age", Operator::GreaterThan, 30i64)
            .order_by(Order::Directed("age".into(), Direction::Desc))
            .limit(10)
            .offset(5);
        let sql = query.to_sql();
        assert_eq!(
            sql.statement,
            "SELECT * FROM \"people\" WHERE \"name\" = ? AND \"age\" > ? ORDER BY \"age\" DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(
            sql.params.values,
            vec![SqlValue::Text("ann".into()), SqlValue::Integer(30)]
        );
    }

    #[test]
    fn offset_without_limit() {
        let sql = Query::select("t").offset(3).order_by(Order::Random).to_sql();
        assert_eq!(sql.statement, "SELECT * FROM \"t\" ORDER BY RANDOM() LIMIT -1 OFFSET 3");
    }

    #[test]
    fn null_equality_uses_is_null() {
        let sql = Query::first("t")
            .where_eq("a", SqlValue::Null)
            .where_op("b", Operator::NotEqual, SqlValue::Null)
            .to_sql();
        assert_eq!(
            sql.statement,
            "SELECT * FROM \"t\" WHERE \"a\" IS NULL AND \"b\" IS NOT NULL LIMIT 1"
        );
        assert!(sql.params.is_empty());
    }

    #[test]
    fn insert_or_ignore() {
        let sql = Query::insert(
            "t",
            vec![("a".into(), SqlValue::Integer(1)), ("b".into(), "x".into())],
            true,
        )
        .to_sql();
        assert_eq!(sql.statement, "INSERT OR IGNORE INTO \"t\" (\"a\", \"b\") VALUES (?, ?)");
        assert_eq!(sql.params.len(), 2);
        assert!(sql.is_mutation());

        let empty = Query::insert("t", Vec::new(), true).to_sql();
        assert_eq!(empty.statement, "INSERT OR IGNORE INTO \"t\" DEFAULT VALUES");
    }

    #[test]
    fn update_params_precede_where_params() {
        let sql = Query::update(
            "t",
            vec![
                ("a".into(), Assignment::Value("x".into())),
                ("n".into(), Assignment::Increment(SqlValue::Integer(2))),
                (
                    "m".into(),
                    Assignment::Decrement {
                        amount: SqlValue::Integer(3),
                        floor_zero: true,
                    },
                ),
            ],
        )
        .where_eq("id", 9i64)
        .to_sql();
        assert_eq!(
            sql.statement,
            "UPDATE \"t\" SET \"a\" = ?, \"n\" = \"n\" + ?, \"m\" = MAX(0, \"m\" - ?) WHERE \"id\" = ?"
        );
        assert_eq!(
            sql.params.values,
            vec![
                SqlValue::Text("x".into()),
                SqlValue::Integer(2),
                SqlValue::Integer(3),
                SqlValue::Integer(9)
            ]
        );
    }

    #[test]
    fn aggregates() {
        let sql = Query::aggregate("t", AggregateFn::Count, None, false)
            .group_by(["kind"])
            .to_sql();
        assert_eq!(
            sql.statement,
            "SELECT COUNT(*) AS \"count\" FROM \"t\" GROUP BY \"kind\""
        );
        let sql = Query::aggregate("t", AggregateFn::Count, Some("kind".into()), true).to_sql();
        assert_eq!(sql.statement, "SELECT COUNT(DISTINCT \"kind\") AS \"count\" FROM \"t\"");
        let sql = Query::aggregate("t", AggregateFn::Max, Some("n".into()), false).to_sql();
        assert_eq!(sql.statement, "SELECT MAX(\"n\") AS \"max\" FROM \"t\"");
    }

    #[test]
    fn operators_parse_case_insensitively() {
        assert_eq!("LIKE".parse::<Operator>().unwrap(), Operator::Like);
        assert_eq!("not   like".parse::<Operator>().unwrap(), Operator::NotLike);
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::NotEqual);
        assert!("; drop table t".parse::<Operator>().is_err());
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
