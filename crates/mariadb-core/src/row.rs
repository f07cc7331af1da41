//! Materialized result rows.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::temporal::{Date, DateTime, Time};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Column metadata shared across all rows in a result set.
///
/// Labels resolve case-insensitively, either as the bare column alias or as
/// `table.alias`. When two columns share a label the first one wins.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column aliases in order
    names: Vec<String>,
    /// Lowercased label -> index
    labels: HashMap<String, usize>,
    /// Labels in insertion order, for error messages
    label_order: Vec<String>,
}

impl ColumnInfo {
    /// Create column info from bare column names.
    pub fn new(names: Vec<String>) -> Self {
        let tables = vec![None; names.len()];
        Self::with_tables(names, tables)
    }

    /// Create column info where each column may carry a table (or table alias)
    /// qualifier usable as `table.column`.
    pub fn with_tables(names: Vec<String>, tables: Vec<Option<String>>) -> Self {
        let mut labels = HashMap::with_capacity(names.len() * 2);
        let mut label_order = Vec::with_capacity(names.len() * 2);
        let mut add = |label: String, index: usize| {
            if !labels.contains_key(&label) {
                labels.insert(label.clone(), index);
                label_order.push(label);
            }
        };
        for (i, name) in names.iter().enumerate() {
            let alias = name.to_lowercase();
            add(alias.clone(), i);
            if let Some(Some(table)) = tables.get(i) {
                add(format!("{}.{}", table.to_lowercase(), alias), i);
            }
        }
        Self {
            names,
            labels,
            label_order,
        }
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get the index of a column by label.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.get(&label.to_lowercase()).copied()
    }

    /// Get the index of a column by label, failing with the list of known labels.
    pub fn find(&self, label: &str) -> Result<usize> {
        self.index_of(label).ok_or_else(|| {
            Error::Custom(format!(
                "Unknown label '{}'. Possible value {}",
                label,
                self.label_order.join(",")
            ))
        })
    }

    /// Get the name of a column by index.
    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Check if a column exists.
    pub fn contains(&self, label: &str) -> bool {
        self.index_of(label).is_some()
    }

    /// Get all column names.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// Create a new row with its own column metadata.
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        let columns = Arc::new(ColumnInfo::new(column_names));
        Self { values, columns }
    }

    /// Create a new row with shared column metadata.
    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    /// Get the shared column metadata.
    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Get the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if this row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value by column index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column label.
    pub fn get_by_name(&self, label: &str) -> Option<&Value> {
        self.columns.index_of(label).and_then(|i| self.values.get(i))
    }

    /// Get a typed value by column index.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        let value = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                column: None,
            })
        })?;
        T::from_value(value)
    }

    /// Get a typed value by column label.
    pub fn get_named<T: FromValue>(&self, label: &str) -> Result<T> {
        let index = self.columns.find(label)?;
        T::from_value(&self.values[index]).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(label.to_string());
                Error::Type(te)
            }
            e => e,
        })
    }

    /// Iterate over all values.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

/// Trait for converting from a `Value` to a typed value.
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if the conversion fails.
    fn from_value(value: &Value) -> Result<Self>;
}

macro_rules! from_value_via_try_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromValue for $t {
                fn from_value(value: &Value) -> Result<Self> {
                    <$t>::try_from(value.clone())
                }
            }
        )*
    };
}

from_value_via_try_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    Vec<u8>,
    Date,
    Time,
    DateTime,
    [u8; 16],
    serde_json::Value,
);

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        let columns = Arc::new(ColumnInfo::with_tables(
            vec!["id".to_string(), "Name".to_string()],
            vec![Some("users".to_string()), Some("u".to_string())],
        ));
        Row::with_columns(
            columns,
            vec![Value::Int(7), Value::Text("alice".to_string())],
        )
    }

    #[test]
    fn test_row_basic_access() {
        let row = sample();
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("NAME"), Some(&Value::Text("alice".into())));
        assert_eq!(row.get_by_name("users.id"), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("u.name"), Some(&Value::Text("alice".into())));
    }

    #[test]
    fn test_row_typed_access() {
        let row = sample();
        let id: i64 = row.get_as(0).unwrap();
        assert_eq!(id, 7);
        let name: String = row.get_named("name").unwrap();
        assert_eq!(name, "alice");
        let missing: Result<i32> = row.get_as(5);
        assert!(missing.is_err());
    }

    #[test]
    fn test_unknown_label_lists_known_labels() {
        let row = sample();
        let err = row.get_named::<i32>("nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown label 'nope'. Possible value id,users.id,name,u.name"
        );
    }

    #[test]
    fn test_type_error_carries_column() {
        let row = sample();
        match row.get_named::<i32>("name").unwrap_err() {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("name")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_row_null_handling() {
        let row = Row::new(vec!["a".into()], vec![Value::Null]);
        let v: Option<i32> = row.get_as(0).unwrap();
        assert_eq!(v, None);
        assert!(row.get_as::<i32>(0).is_err());
    }

    #[test]
    fn test_duplicate_labels_keep_first() {
        let info = ColumnInfo::new(vec!["a".into(), "A".into()]);
        assert_eq!(info.index_of("a"), Some(0));
        assert_eq!(info.len(), 2);
        assert_eq!(info.name_at(1), Some("A"));
    }
}
