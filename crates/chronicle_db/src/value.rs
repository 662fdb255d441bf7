//! Values, rows and records exchanged with the database.

use crate::error::DbError;

/// Timestamp wrapper for database values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbTimestamp {
    inner: chrono::DateTime<chrono::Utc>,
}

/// Errors that can occur when parsing or constructing timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTimestampError {
    message: String,
}

impl DbTimestampError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DbTimestampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DbTimestampError {}

impl DbTimestamp {
    /// Current timestamp in UTC, truncated to the microsecond precision
    /// DuckDB stores.
    pub fn now() -> Self {
        let micros = chrono::Utc::now().timestamp_micros();
        Self::from_unix_micros(micros).unwrap_or_else(|_| Self {
            inner: chrono::Utc::now(),
        })
    }

    /// Parse an RFC3339 timestamp string.
    pub fn from_rfc3339(value: &str) -> Result<Self, DbTimestampError> {
        chrono::DateTime::parse_from_rfc3339(value)
            .map(|dt| Self {
                inner: dt.with_timezone(&chrono::Utc),
            })
            .map_err(|e| DbTimestampError::new(format!("Invalid timestamp: {}", e)))
    }

    /// Construct from Unix milliseconds.
    pub fn from_unix_millis(ms: i64) -> Result<Self, DbTimestampError> {
        chrono::DateTime::from_timestamp_millis(ms)
            .map(|dt| Self { inner: dt })
            .ok_or_else(|| DbTimestampError::new("Invalid Unix milliseconds"))
    }

    /// Construct from Unix microseconds.
    pub fn from_unix_micros(micros: i64) -> Result<Self, DbTimestampError> {
        chrono::DateTime::from_timestamp_micros(micros)
            .map(|dt| Self { inner: dt })
            .ok_or_else(|| DbTimestampError::new("Invalid Unix microseconds"))
    }

    /// RFC3339 string representation.
    pub fn to_rfc3339(&self) -> String {
        self.inner.to_rfc3339()
    }

    /// Unix milliseconds since epoch.
    pub fn unix_millis(&self) -> i64 {
        self.inner.timestamp_millis()
    }

    /// Unix microseconds since epoch.
    pub fn unix_micros(&self) -> i64 {
        self.inner.timestamp_micros()
    }
}

impl serde::Serialize for DbTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> serde::Deserialize<'de> for DbTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
        DbTimestamp::from_rfc3339(&raw).map_err(serde::de::Error::custom)
    }
}

/// Value type for query parameters and record fields.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(DbTimestamp),
}

impl DbValue {
    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }

    /// JSON rendering used by [`Record::to_json`].
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DbValue::Null => serde_json::Value::Null,
            DbValue::Integer(v) => serde_json::Value::from(*v),
            DbValue::Real(v) => serde_json::Value::from(*v),
            DbValue::Text(v) => serde_json::Value::from(v.as_str()),
            DbValue::Blob(v) => serde_json::Value::from(v.clone()),
            DbValue::Boolean(v) => serde_json::Value::from(*v),
            DbValue::Timestamp(v) => serde_json::Value::from(v.to_rfc3339()),
        }
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        DbValue::Integer(v as i64)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<DbTimestamp> for DbValue {
    fn from(v: DbTimestamp) -> Self {
        DbValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Blob(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DbValue::Null,
        }
    }
}

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct DbRow {
    columns: Vec<String>,
    values: Vec<DbValue>,
}

impl DbRow {
    /// Create a new row with column names and values.
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column index.
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, DbError> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::type_conversion(format!("Column index {} out of bounds", index)))
            .and_then(|v| T::from_db_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromDbValue>(&self, name: &str) -> Result<T, DbError> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::type_conversion(format!("Column '{}' not found", name)))?;
        self.get(index)
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column names.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Get the raw DbValue at an index.
    pub fn get_raw(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    /// Consume the row into (column, value) pairs.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, DbValue)> {
        self.columns.into_iter().zip(self.values)
    }
}

/// Trait for converting from DbValue.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError>;
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            DbValue::Null => Err(DbError::type_conversion(
                "i64 field is NULL - use Option<i64> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected integer")),
        }
    }
}

impl FromDbValue for i32 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Integer(v) => {
                i32::try_from(*v).map_err(|_| DbError::type_conversion("Expected i32"))
            }
            DbValue::Null => Err(DbError::type_conversion(
                "i32 field is NULL - use Option<i32> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected integer")),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            DbValue::Null => Err(DbError::type_conversion(
                "f64 field is NULL - use Option<f64> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected real")),
        }
    }
}

impl FromDbValue for DbTimestamp {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Timestamp(v) => Ok(v.clone()),
            DbValue::Text(v) => {
                DbTimestamp::from_rfc3339(v).map_err(|e| DbError::type_conversion(e.to_string()))
            }
            DbValue::Null => Err(DbError::type_conversion(
                "DbTimestamp field is NULL - use Option<DbTimestamp> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected timestamp")),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            DbValue::Null => Err(DbError::type_conversion(
                "String field is NULL - use Option<String> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected text")),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v != 0),
            DbValue::Null => Err(DbError::type_conversion(
                "bool field is NULL - use Option<bool> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected boolean")),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

impl FromDbValue for Vec<u8> {
    fn from_db_value(value: &DbValue) -> Result<Self, DbError> {
        match value {
            DbValue::Blob(v) => Ok(v.clone()),
            DbValue::Null => Err(DbError::type_conversion(
                "Vec<u8> field is NULL - use Option<Vec<u8>> for nullable columns",
            )),
            _ => Err(DbError::type_conversion("Expected blob")),
        }
    }
}

/// Ordered field-name → value map.
///
/// Records are the unit of data passed into model mutations and carried by
/// instances. Inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, DbValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<DbValue>) -> Self {
        self.insert(field, value);
        self
    }

    /// Insert or replace a value, returning the previous one.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<DbValue>) -> Option<DbValue> {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((field, value));
                None
            }
        }
    }

    pub fn get(&self, field: &str) -> Option<&DbValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Typed read of a field.
    pub fn get_as<T: FromDbValue>(&self, field: &str) -> Result<T, DbError> {
        let value = self
            .get(field)
            .ok_or_else(|| DbError::type_conversion(format!("Field '{}' not present", field)))?;
        T::from_db_value(value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn remove(&mut self, field: &str) -> Option<DbValue> {
        let index = self.entries.iter().position(|(name, _)| name == field)?;
        Some(self.entries.remove(index).1)
    }

    /// Overlay `other` on top of this record; keys in `other` win.
    pub fn merge(&mut self, other: &Record) {
        for (field, value) in other.iter() {
            self.insert(field, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a JSON object (timestamps as RFC3339 strings).
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .entries
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<DbValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (field, value) in iter {
            record.insert(field, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, DbValue);
    type IntoIter = std::vec::IntoIter<(String, DbValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
