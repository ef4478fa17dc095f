use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ColumnType, Cursor, Receiver};
use crate::error::SqlDaoError;
use crate::types::RowValues;

/// Fully fetched query result, as drivers that read eagerly produce it.
///
/// ```rust
/// use sql_dao::prelude::*;
///
/// let mut rs = ResultSet::new(vec![ColumnType::new("id", "INTEGER")]);
/// rs.add_row_values(vec![RowValues::Int(7)]);
/// assert_eq!(rs.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Column metadata shared by all rows
    columns: Arc<Vec<ColumnType>>,
    /// The rows returned by the query
    rows: Vec<Vec<RowValues>>,
}

impl ResultSet {
    #[must_use]
    pub fn new(columns: Vec<ColumnType>) -> Self {
        Self {
            columns: Arc::new(columns),
            rows: Vec::new(),
        }
    }

    /// Create a result set with room for `capacity` rows.
    ///
    /// # Arguments
    ///
    /// * `columns` - Column metadata in result order
    /// * `capacity` - The initial capacity for the result rows
    #[must_use]
    pub fn with_capacity(columns: Vec<ColumnType>, capacity: usize) -> Self {
        Self {
            columns: Arc::new(columns),
            rows: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnType] {
        &self.columns
    }

    /// Add a row to the result set
    ///
    /// # Arguments
    ///
    /// * `row_values` - The values for this row, one per column
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.rows.push(row_values);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Turn the result set into a cursor positioned before the first row.
    #[must_use]
    pub fn into_cursor(self) -> BufferedCursor {
        BufferedCursor {
            columns: self.columns,
            pending: self.rows.into(),
            current: None,
        }
    }
}

/// [`Cursor`] over rows already held in memory.
#[derive(Debug)]
pub struct BufferedCursor {
    columns: Arc<Vec<ColumnType>>,
    pending: VecDeque<Vec<RowValues>>,
    current: Option<Vec<RowValues>>,
}

impl BufferedCursor {
    fn current(&self) -> Result<&Vec<RowValues>, SqlDaoError> {
        self.current
            .as_ref()
            .ok_or_else(|| SqlDaoError::InvalidUsage("cursor is not positioned on a row".into()))
    }
}

#[async_trait]
impl Cursor for BufferedCursor {
    fn column_types(&self) -> &[ColumnType] {
        &self.columns
    }

    async fn next(&mut self) -> Result<bool, SqlDaoError> {
        self.current = self.pending.pop_front();
        Ok(self.current.is_some())
    }

    fn is_null(&self, idx: usize) -> Result<bool, SqlDaoError> {
        self.current()?
            .get(idx)
            .map(RowValues::is_null)
            .ok_or_else(|| SqlDaoError::InvalidUsage(format!("column index {idx} out of range")))
    }

    fn scan(&mut self, receivers: &mut [Box<dyn Receiver>]) -> Result<(), SqlDaoError> {
        let row = self.current()?;
        if receivers.len() != row.len() {
            return Err(SqlDaoError::InvalidUsage(format!(
                "scan expected {} destinations, got {}",
                row.len(),
                receivers.len()
            )));
        }
        for (receiver, value) in receivers.iter_mut().zip(row.iter()) {
            receiver.receive(value.clone())?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlDaoError> {
        self.pending.clear();
        self.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_walks_rows_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let mut rs = ResultSet::new(vec![ColumnType::new("a", "INTEGER")]);
            rs.add_row_values(vec![RowValues::Int(1)]);
            rs.add_row_values(vec![RowValues::Null]);
            let mut cursor = rs.into_cursor();

            assert!(cursor.is_null(0).is_err());
            assert!(cursor.next().await?);
            assert!(!cursor.is_null(0)?);
            let mut slots: Vec<Box<dyn Receiver>> = vec![Box::new(RowValues::Null)];
            cursor.scan(&mut slots)?;
            assert!(cursor.next().await?);
            assert!(cursor.is_null(0)?);
            assert!(!cursor.next().await?);
            cursor.close().await?;
            Ok::<(), SqlDaoError>(())
        })?;
        Ok(())
    }

    #[test]
    fn scan_rejects_wrong_arity() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let mut rs = ResultSet::new(vec![ColumnType::new("a", "TEXT")]);
            rs.add_row_values(vec![RowValues::Text("x".into())]);
            let mut cursor = rs.into_cursor();
            cursor.next().await?;
            let mut slots: Vec<Box<dyn Receiver>> = Vec::new();
            assert!(matches!(cursor.scan(&mut slots), Err(SqlDaoError::InvalidUsage(_))));
            Ok::<(), SqlDaoError>(())
        })?;
        Ok(())
    }
}
