use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};
use std::time::Duration;

use async_trait::async_trait;

use crate::row_store::{Page, PageRequest, RowFilter, RowStore, SortDirection, StoreError};
use crate::value::{row_from_json, row_id, CellValue, Row};

/// Scriptable row store shared by the engine's unit tests.
#[derive(Debug, Default)]
pub(crate) struct FakeRowStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    sample_calls: AtomicUsize,
    count_calls: AtomicUsize,
    select_calls: AtomicUsize,
    update_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    sample_failure: Mutex<Option<StoreError>>,
    select_failure: Mutex<Option<StoreError>>,
    write_failure: Mutex<Option<StoreError>>,
    count_failures: Mutex<HashMap<String, usize>>,
    count_delays: Mutex<HashMap<String, Duration>>,
    sample_delay: Mutex<Option<Duration>>,
    select_delay: Mutex<Option<Duration>>,
}

impl FakeRowStore {
    pub(crate) fn with_rows(table: &str, rows: serde_json::Value) -> Self {
        let store = Self::default();
        store.set_rows(table, rows);
        store
    }

    pub(crate) fn set_rows(&self, table: &str, rows: serde_json::Value) {
        let rows = rows
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .cloned()
                    .filter_map(row_from_json)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        self.tables
            .lock()
            .expect("tables lock")
            .insert(table.to_string(), rows);
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .expect("tables lock")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn fail_sampling(&self, error: StoreError) {
        *self.sample_failure.lock().expect("failure lock") = Some(error);
    }

    pub(crate) fn fail_selects(&self, error: Option<StoreError>) {
        *self.select_failure.lock().expect("failure lock") = error;
    }

    pub(crate) fn fail_writes(&self, error: Option<StoreError>) {
        *self.write_failure.lock().expect("failure lock") = error;
    }

    pub(crate) fn fail_counts(&self, table: &str, times: usize) {
        self.count_failures
            .lock()
            .expect("failure lock")
            .insert(table.to_string(), times);
    }

    pub(crate) fn delay_counts(&self, table: &str, delay: Duration) {
        self.count_delays
            .lock()
            .expect("delay lock")
            .insert(table.to_string(), delay);
    }

    pub(crate) fn delay_sampling(&self, delay: Duration) {
        *self.sample_delay.lock().expect("delay lock") = Some(delay);
    }

    pub(crate) fn delay_selects(&self, delay: Duration) {
        *self.select_delay.lock().expect("delay lock") = Some(delay);
    }

    pub(crate) fn sample_calls(&self) -> usize {
        self.sample_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::Relaxed)
    }

    fn write_failure(&self) -> Option<StoreError> {
        self.write_failure.lock().expect("failure lock").clone()
    }
}

fn matches_filter(row: &Row, filter: &RowFilter) -> bool {
    filter
        .iter()
        .all(|(column, expected)| row.get(column).unwrap_or(&CellValue::Null) == expected)
}

#[async_trait]
impl RowStore for FakeRowStore {
    async fn count(&self, table: &str, filter: &RowFilter) -> Result<u64, StoreError> {
        self.count_calls.fetch_add(1, Ordering::Relaxed);
        let delay = self
            .count_delays
            .lock()
            .expect("delay lock")
            .get(table)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.count_failures.lock().expect("failure lock");
            if let Some(remaining) = failures.get_mut(table) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::new(format!("count of {table} failed")));
                }
            }
        }

        let total = self
            .rows(table)
            .iter()
            .filter(|row| matches_filter(row, filter))
            .count();
        Ok(total as u64)
    }

    async fn select_page(&self, table: &str, request: &PageRequest) -> Result<Page, StoreError> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.select_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.select_failure.lock().expect("failure lock").clone() {
            return Err(error);
        }

        let mut rows = self
            .rows(table)
            .into_iter()
            .filter(|row| matches_filter(row, &request.filter))
            .filter(|row| {
                request.search.as_ref().is_none_or(|search| {
                    let needle = search.pattern.to_lowercase();
                    search.columns.iter().any(|column| {
                        row.get(column)
                            .and_then(CellValue::search_text)
                            .is_some_and(|text| text.to_lowercase().contains(&needle))
                    })
                })
            })
            .collect::<Vec<_>>();

        if let Some(sort) = &request.sort {
            rows.sort_by(|left, right| {
                let left = left.get(&sort.column).map(ToString::to_string);
                let right = right.get(&sort.column).map(ToString::to_string);
                let ordering = left.cmp(&right);
                match sort.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        let total_count = rows.len() as u64;
        let start = usize::try_from(request.range_start).unwrap_or(usize::MAX);
        let limit = usize::try_from(request.limit()).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(start).take(limit).collect();
        Ok(Page { rows, total_count })
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>, StoreError> {
        self.sample_calls.fetch_add(1, Ordering::Relaxed);
        let delay = *self.sample_delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.sample_failure.lock().expect("failure lock").clone() {
            return Err(error);
        }
        Ok(self.rows(table).into_iter().take(limit).collect())
    }

    async fn update(&self, table: &str, id: &CellValue, patch: &Row) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.write_failure() {
            return Err(error);
        }
        let mut tables = self.tables.lock().expect("tables lock");
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| StoreError::new("row not found"))?;
        row.extend(patch.iter().map(|(key, value)| (key.clone(), value.clone())));
        Ok(())
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.write_failure() {
            return Err(error);
        }
        self.tables
            .lock()
            .expect("tables lock")
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(())
    }

    async fn delete(&self, table: &str, id: &CellValue) -> Result<(), StoreError> {
        self.delete_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.write_failure() {
            return Err(error);
        }
        let mut tables = self.tables.lock().expect("tables lock");
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| row_id(row) != Some(id));
        }
        Ok(())
    }
}
