use std::time::Duration;

use crate::inference::{ColumnMeta, ColumnType};
use crate::row_store::{PageRequest, RowFilter, SearchSpec, SortSpec, MAX_SEARCH_COLUMNS};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageState {
    pub page: usize,
    pub page_size: usize,
    pub sort: Option<SortSpec>,
    pub search: Option<String>,
    pub filter: RowFilter,
}

impl PageState {
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 0,
            page_size: page_size.max(1),
            sort: None,
            search: None,
            filter: RowFilter::new(),
        }
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

/// Up to four string-typed columns, in name order, that a search fans out over.
#[must_use]
pub fn search_columns(columns: &[ColumnMeta]) -> Vec<String> {
    columns
        .iter()
        .filter(|column| column.column_type == ColumnType::String)
        .take(MAX_SEARCH_COLUMNS)
        .map(|column| column.name.clone())
        .collect()
}

#[must_use]
pub fn build_page_request(state: &PageState, columns: &[ColumnMeta]) -> PageRequest {
    let page_size = state.page_size.max(1) as u64;
    let range_start = state.page as u64 * page_size;

    let search = state
        .search
        .as_deref()
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .and_then(|pattern| {
            let columns = search_columns(columns);
            (!columns.is_empty()).then(|| SearchSpec {
                pattern: pattern.to_string(),
                columns,
            })
        });

    PageRequest {
        filter: state.filter.clone(),
        sort: state.sort.clone(),
        search,
        range_start,
        range_end: range_start + page_size - 1,
    }
}

#[must_use]
pub fn page_count(total: u64, page_size: usize) -> u64 {
    total.div_ceil(page_size.max(1) as u64)
}

/// Delays a search until typing has paused for `delay`.
///
/// Timestamps are plain milliseconds handed in by the caller.
#[derive(Debug, Clone)]
pub struct SearchDebouncer {
    delay_ms: u64,
    pending: Option<(String, u64)>,
}

impl SearchDebouncer {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            pending: None,
        }
    }

    pub fn input(&mut self, text: impl Into<String>, now_ms: u64) {
        self.pending = Some((text.into(), now_ms));
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Yields the latest text once it has been stable long enough.
    pub fn poll(&mut self, now_ms: u64) -> Option<String> {
        let (_, typed_at) = self.pending.as_ref()?;
        if now_ms.saturating_sub(*typed_at) < self.delay_ms {
            return None;
        }
        self.pending.take().map(|(text, _)| text)
    }
}

impl Default for SearchDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEBOUNCE)
    }
}
