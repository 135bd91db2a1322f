use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical column types a table schema can declare.
///
/// Each type maps to a SQLite column definition and to a storage class used by
/// the codec:
/// - `Increments` -> INTEGER PRIMARY KEY AUTOINCREMENT
/// - `Array`, `Object`, `Json` -> TEXT (JSON encoded)
/// - `String` -> TEXT
/// - `Number` -> INTEGER (affinity; non-integral values stay REAL)
/// - `Boolean` -> INTEGER (0 or 1)
/// - `Date` -> DATETIME (epoch milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    Increments,
    Array,
    Object,
    Json,
    String,
    Number,
    Boolean,
    Date,
}

/// How a logical type is physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// Auto-incrementing integer row id.
    RowId,
    /// Free text.
    Text,
    /// JSON document serialized to text.
    JsonText,
    /// Integer or real number.
    Numeric,
    /// Integer 0 / 1.
    Flag,
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

impl LogicalType {
    pub const ALL: [LogicalType; 8] = [
        LogicalType::Increments,
        LogicalType::Array,
        LogicalType::Object,
        LogicalType::Json,
        LogicalType::String,
        LogicalType::Number,
        LogicalType::Boolean,
        LogicalType::Date,
    ];

    /// Looks a type up by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Like [`LogicalType::from_name`], but unknown names degrade to `String`.
    pub fn parse_lossy(name: &str) -> Self {
        Self::from_name(name).unwrap_or(LogicalType::String)
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicalType::Increments => "increments",
            LogicalType::Array => "array",
            LogicalType::Object => "object",
            LogicalType::Json => "json",
            LogicalType::String => "string",
            LogicalType::Number => "number",
            LogicalType::Boolean => "boolean",
            LogicalType::Date => "date",
        }
    }

    /// Column definition fragment used in `CREATE TABLE`.
    pub fn to_sqlite_type(self) -> &'static str {
        match self {
            LogicalType::Increments => "INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT",
            LogicalType::String
            | LogicalType::Array
            | LogicalType::Object
            | LogicalType::Json => "TEXT",
            LogicalType::Number | LogicalType::Boolean => "INTEGER",
            LogicalType::Date => "DATETIME",
        }
    }

    pub fn storage(self) -> StorageClass {
        match self {
            LogicalType::Increments => StorageClass::RowId,
            LogicalType::String => StorageClass::Text,
            LogicalType::Array | LogicalType::Object | LogicalType::Json => StorageClass::JsonText,
            LogicalType::Number => StorageClass::Numeric,
            LogicalType::Boolean => StorageClass::Flag,
            LogicalType::Date => StorageClass::Timestamp,
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(LogicalType::from_name("Increments"), Some(LogicalType::Increments));
        assert_eq!(LogicalType::from_name("JSON"), Some(LogicalType::Json));
        assert_eq!(LogicalType::from_name(" date "), Some(LogicalType::Date));
        assert_eq!(LogicalType::from_name("uuid"), None);
    }

    #[test]
    fn unknown_names_fall_back_to_string() {
        assert_eq!(LogicalType::parse_lossy("varchar"), LogicalType::String);
        assert_eq!(LogicalType::parse_lossy("boolean"), LogicalType::Boolean);
    }

    #[test]
    fn every_type_has_a_column_definition() {
        for ty in LogicalType::ALL {
            assert!(!ty.to_sqlite_type().is_empty(), "{ty} has no DDL");
            assert_eq!(LogicalType::from_name(ty.name()), Some(ty));
        }
        assert!(LogicalType::Increments.to_sqlite_type().contains("AUTOINCREMENT"));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let ty: LogicalType = serde_json::from_str("\"number\"").unwrap();
        assert_eq!(ty, LogicalType::Number);
        assert_eq!(serde_json::to_string(&LogicalType::Array).unwrap(), "\"array\"");
    }
}
