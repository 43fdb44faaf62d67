use std::collections::BTreeMap;

/// A single result row, keyed by column name. Cells are carried in the
/// warehouse's wire encoding: every non-null scalar is a string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(BTreeMap<String, Option<String>>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.0.insert(column.into(), value.map(Into::into));
        self
    }

    /// Returns `None` if the column is absent, and `Some(None)` if it's present but null.
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.0.get(column).map(Option::as_deref)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl FromIterator<(String, Option<String>)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Option<String>)>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}

/// Query execution capability required of the data warehouse.
pub trait Warehouse: std::fmt::Debug + Send + Sync {
    type Cursor: RowCursor;

    /// Executes a statement which produces no result rows, such as DDL.
    fn execute<'s>(
        &'s self,
        sql: &'s str,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;

    /// Executes a query and returns a cursor over its result rows.
    /// Rows are not read until the cursor is advanced.
    fn query<'s>(
        &'s self,
        sql: &'s str,
    ) -> impl std::future::Future<Output = anyhow::Result<Self::Cursor>> + Send + 's;
}

/// A lazy sequence of result rows.
pub trait RowCursor: Send {
    /// Returns the next row, or `None` once all rows have been read.
    fn next<'s>(
        &'s mut self,
    ) -> impl std::future::Future<Output = anyhow::Result<Option<Row>>> + Send + 's;
}
