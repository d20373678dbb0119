use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::value::{CellValue, Row};

/// Columns a single search may fan out over.
pub const MAX_SEARCH_COLUMNS: usize = 4;

/// Equality filter: every listed column must equal the given value.
pub type RowFilter = BTreeMap<String, CellValue>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    code: Option<String>,
    message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDirection,
}

impl SortSpec {
    #[must_use]
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    #[must_use]
    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Case-insensitive substring search, OR-combined across `columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpec {
    pub pattern: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageRequest {
    pub filter: RowFilter,
    pub sort: Option<SortSpec>,
    pub search: Option<SearchSpec>,
    pub range_start: u64,
    /// Inclusive.
    pub range_end: u64,
}

impl PageRequest {
    #[must_use]
    pub fn limit(&self) -> u64 {
        self.range_end.saturating_sub(self.range_start) + 1
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub rows: Vec<Row>,
    pub total_count: u64,
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn count(&self, table: &str, filter: &RowFilter) -> Result<u64, StoreError>;

    async fn select_page(&self, table: &str, request: &PageRequest) -> Result<Page, StoreError>;

    /// Rows used for shape inference only, never for display.
    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>, StoreError>;

    async fn update(&self, table: &str, id: &CellValue, patch: &Row) -> Result<(), StoreError>;

    async fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError>;

    async fn delete(&self, table: &str, id: &CellValue) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: RowStore + ?Sized> RowStore for Arc<T> {
    async fn count(&self, table: &str, filter: &RowFilter) -> Result<u64, StoreError> {
        (**self).count(table, filter).await
    }

    async fn select_page(&self, table: &str, request: &PageRequest) -> Result<Page, StoreError> {
        (**self).select_page(table, request).await
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>, StoreError> {
        (**self).sample_rows(table, limit).await
    }

    async fn update(&self, table: &str, id: &CellValue, patch: &Row) -> Result<(), StoreError> {
        (**self).update(table, id, patch).await
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        (**self).insert(table, row).await
    }

    async fn delete(&self, table: &str, id: &CellValue) -> Result<(), StoreError> {
        (**self).delete(table, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::{PageRequest, StoreError};

    #[test]
    fn page_limit_counts_inclusive_range() {
        let request = PageRequest {
            range_start: 50,
            range_end: 99,
            ..PageRequest::default()
        };
        assert_eq!(request.limit(), 50);
    }

    #[test]
    fn store_error_keeps_code_and_message() {
        let error = StoreError::with_code("23505", "duplicate key");
        assert_eq!(error.code(), Some("23505"));
        assert_eq!(error.to_string(), "duplicate key");
        assert_eq!(StoreError::new("boom").code(), None);
    }
}
