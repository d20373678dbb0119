use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use rowscope_core::row_store::{
    Page, PageRequest, RowFilter, RowStore, SearchSpec, SortDirection, SortSpec, StoreError,
};
use rowscope_core::value::{row_from_json, row_id, CellValue, Row, ID_COLUMN};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("dataset must be a JSON object mapping table names to row arrays")]
    NotAnObject,
    #[error("table `{table}` must be an array of rows")]
    NotAnArray { table: String },
    #[error("row {index} of table `{table}` is not a JSON object")]
    NotARow { table: String, index: usize },
}

/// Row store backed by plain vectors, one per table.
#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
}

impl InMemoryRowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(table: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            tables: Mutex::new(BTreeMap::from([(table.into(), rows)])),
        }
    }

    /// Loads `{"table": [{...}, ...], ...}`.
    pub fn from_json(dataset: serde_json::Value) -> Result<Self, MemoryStoreError> {
        let serde_json::Value::Object(tables) = dataset else {
            return Err(MemoryStoreError::NotAnObject);
        };

        let mut loaded = BTreeMap::new();
        for (table, rows) in tables {
            let serde_json::Value::Array(rows) = rows else {
                return Err(MemoryStoreError::NotAnArray { table });
            };
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(index, row)| {
                    row_from_json(row).ok_or_else(|| MemoryStoreError::NotARow {
                        table: table.clone(),
                        index,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            loaded.insert(table, rows);
        }

        Ok(Self {
            tables: Mutex::new(loaded),
        })
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.tables.lock().await.keys().cloned().collect()
    }

    pub async fn snapshot(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn matches_filter(row: &Row, filter: &RowFilter) -> bool {
    filter.iter().all(|(column, expected)| {
        let actual = row.get(column).unwrap_or(&CellValue::Null);
        actual == expected
    })
}

fn matches_search(row: &Row, search: Option<&SearchSpec>) -> bool {
    let Some(search) = search else {
        return true;
    };
    let needle = search.pattern.to_lowercase();
    search.columns.iter().any(|column| {
        row.get(column)
            .and_then(CellValue::search_text)
            .is_some_and(|text| text.to_lowercase().contains(&needle))
    })
}

// Nulls sort first; numbers compare numerically, everything else by text.
fn compare_cells(left: Option<&CellValue>, right: Option<&CellValue>) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a.total_cmp(&b),
            _ => left.to_string().cmp(&right.to_string()),
        },
    }
}

fn sort_rows(rows: &mut [Row], sort: &SortSpec) {
    rows.sort_by(|left, right| {
        let ordering = compare_cells(left.get(&sort.column), right.get(&sort.column));
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

fn next_id(rows: &[Row]) -> i64 {
    rows.iter()
        .filter_map(row_id)
        .filter_map(CellValue::as_i64)
        .max()
        .map_or(1, |max| max + 1)
}

fn missing_row(table: &str, id: &CellValue) -> StoreError {
    StoreError::new(format!("no row with id {id} in table `{table}`"))
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn count(&self, table: &str, filter: &RowFilter) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        let count = tables
            .get(table)
            .map_or(0, |rows| rows.iter().filter(|row| matches_filter(row, filter)).count());
        Ok(count as u64)
    }

    async fn select_page(&self, table: &str, request: &PageRequest) -> Result<Page, StoreError> {
        let mut rows = {
            let tables = self.tables.lock().await;
            tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| matches_filter(row, &request.filter))
                        .filter(|row| matches_search(row, request.search.as_ref()))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        if let Some(sort) = &request.sort {
            sort_rows(&mut rows, sort);
        }

        let total_count = rows.len() as u64;
        let start = usize::try_from(request.range_start).unwrap_or(usize::MAX);
        let limit = usize::try_from(request.limit()).unwrap_or(usize::MAX);
        let rows = rows.into_iter().skip(start).take(limit).collect();
        Ok(Page { rows, total_count })
    }

    async fn sample_rows(&self, table: &str, limit: usize) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn update(&self, table: &str, id: &CellValue, patch: &Row) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| missing_row(table, id))?;
        for (column, value) in patch {
            row.insert(column.clone(), value.clone());
        }
        Ok(())
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();

        let mut row = row.clone();
        match row_id(&row) {
            Some(id) if rows.iter().any(|existing| row_id(existing) == Some(id)) => {
                return Err(StoreError::with_code(
                    "23505",
                    format!("duplicate key value violates unique constraint \"{table}_pkey\""),
                ));
            }
            Some(_) => {}
            None => {
                row.insert(ID_COLUMN.to_string(), CellValue::from(next_id(rows)));
            }
        }
        rows.push(row);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &CellValue) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| missing_row(table, id))?;
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        if rows.len() == before {
            return Err(missing_row(table, id));
        }
        Ok(())
    }
}
