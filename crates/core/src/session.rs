//! Per-table browsing state and the orchestration around it.

use std::sync::Arc;

use thiserror::Error;

use crate::data_quality::{compute_data_quality_issues, DataQualityIssue};
use crate::durable_store::DurableMetadataStore;
use crate::inference::{extract_foreign_keys, ColumnMeta, ForeignKeyLink};
use crate::metadata_cache::{Clock, MetadataCache};
use crate::mutation::{DeletedRow, MutationController, MutationError};
use crate::page_query::{build_page_request, page_count, PageState, SearchDebouncer};
use crate::probe::{probe_row_counts, with_retry, ProbeOptions, TableProbe};
use crate::row_store::{Page, PageRequest, RowStore, SortSpec, StoreError};
use crate::settings::BrowserSettings;
use crate::value::{CellValue, Row};
use crate::virtual_window::{VirtualScroller, VirtualWindow};

/// Identifies one in-flight load. A result is applied only while its token
/// is still the newest one for its kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken {
    table_generation: u64,
    page_generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct BrowserState {
    table: Option<String>,
    table_generation: u64,
    page_generation: u64,
    status: LoadStatus,
    columns: Arc<Vec<ColumnMeta>>,
    issues: Vec<DataQualityIssue>,
    rows: Vec<Row>,
    total_count: u64,
    page: PageState,
    scroller: VirtualScroller,
    last_error: Option<String>,
}

impl BrowserState {
    #[must_use]
    pub fn new(page_size: usize, row_height: f64, overscan: usize) -> Self {
        Self {
            table: None,
            table_generation: 0,
            page_generation: 0,
            status: LoadStatus::Idle,
            columns: Arc::new(Vec::new()),
            issues: Vec::new(),
            rows: Vec::new(),
            total_count: 0,
            page: PageState::new(page_size),
            scroller: VirtualScroller::new(row_height, overscan),
            last_error: None,
        }
    }

    /// Switches tables. Every token issued before this call goes stale.
    pub fn select_table(&mut self, table: &str) -> RequestToken {
        self.table_generation += 1;
        self.page_generation += 1;
        self.table = Some(table.to_string());
        self.status = LoadStatus::Loading;
        self.columns = Arc::new(Vec::new());
        self.issues.clear();
        self.rows.clear();
        self.total_count = 0;
        self.page = PageState::new(self.page.page_size);
        self.scroller.reset(0);
        self.last_error = None;
        self.current_token()
    }

    /// Starts a page load for the current table, superseding earlier ones.
    pub fn begin_page_request(&mut self) -> RequestToken {
        self.page_generation += 1;
        self.status = LoadStatus::Loading;
        self.current_token()
    }

    fn current_token(&self) -> RequestToken {
        RequestToken {
            table_generation: self.table_generation,
            page_generation: self.page_generation,
        }
    }

    #[must_use]
    pub fn is_current(&self, token: RequestToken) -> bool {
        token == self.current_token()
    }

    /// Returns false, changing nothing, if `token` belongs to another table.
    pub fn apply_metadata(&mut self, token: RequestToken, columns: Arc<Vec<ColumnMeta>>) -> bool {
        if token.table_generation != self.table_generation {
            tracing::debug!("discarding metadata for a table no longer selected");
            return false;
        }
        self.issues = compute_data_quality_issues(&columns);
        self.columns = columns;
        true
    }

    /// Returns false, changing nothing, if a newer load has been started.
    ///
    /// A failed load keeps the rows already on screen and records the
    /// store's own message instead.
    pub fn apply_page(&mut self, token: RequestToken, result: Result<Page, StoreError>) -> bool {
        if !self.is_current(token) {
            tracing::debug!("discarding stale page result");
            return false;
        }
        match result {
            Ok(page) => {
                self.total_count = page.total_count;
                self.rows = page.rows;
                self.scroller.reset(self.rows.len());
                self.status = LoadStatus::Ready;
                self.last_error = None;
            }
            Err(error) => {
                tracing::warn!(%error, "page load failed, keeping previous rows");
                self.status = LoadStatus::Failed;
                self.last_error = Some(error.message().to_string());
            }
        }
        true
    }

    #[must_use]
    pub fn page_request(&self) -> PageRequest {
        build_page_request(&self.page, &self.columns)
    }

    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    #[must_use]
    pub fn status(&self) -> LoadStatus {
        self.status
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    #[must_use]
    pub fn foreign_keys(&self) -> Vec<ForeignKeyLink> {
        extract_foreign_keys(&self.columns)
    }

    #[must_use]
    pub fn issues(&self) -> &[DataQualityIssue] {
        &self.issues
    }

    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    #[must_use]
    pub fn page_state(&self) -> &PageState {
        &self.page
    }

    #[must_use]
    pub fn page_count(&self) -> u64 {
        page_count(self.total_count, self.page.page_size)
    }

    #[must_use]
    pub fn window(&self) -> VirtualWindow {
        self.scroller.window()
    }

    #[must_use]
    pub fn visible_rows(&self) -> &[Row] {
        self.scroller.window().slice(&self.rows)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn scroll(&mut self, scroll_offset: f64) -> VirtualWindow {
        self.scroller.scroll_to(scroll_offset)
    }

    pub fn resize(&mut self, viewport_height: f64) -> VirtualWindow {
        self.scroller.resize(viewport_height)
    }

    fn record_error(&mut self, message: String) {
        self.last_error = Some(message);
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no table is selected")]
    NoTableSelected,
    #[error(transparent)]
    Mutation(#[from] MutationError),
}

/// Drives one browsing session: metadata, paging, search and edits for the
/// selected table.
pub struct TableBrowser<S: RowStore + Clone, D: DurableMetadataStore, C: Clock> {
    cache: MetadataCache<S, D, C>,
    mutations: MutationController<S>,
    state: BrowserState,
    debouncer: SearchDebouncer,
    probe_options: ProbeOptions,
}

impl<S: RowStore + Clone, D: DurableMetadataStore, C: Clock> TableBrowser<S, D, C> {
    #[must_use]
    pub fn new(store: S, durable: D, clock: C, settings: &BrowserSettings) -> Self {
        Self {
            mutations: MutationController::new(store.clone()),
            cache: MetadataCache::new(store, durable, clock, settings.cache_options()),
            state: BrowserState::new(settings.page_size, settings.row_height, settings.overscan),
            debouncer: SearchDebouncer::new(settings.search_debounce()),
            probe_options: settings.probe_options(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &BrowserState {
        &self.state
    }

    #[must_use]
    pub fn last_deleted(&self) -> Option<&DeletedRow> {
        self.mutations.last_deleted()
    }

    /// Selects `table`, loads its metadata and the first page.
    #[tracing::instrument(skip(self))]
    pub async fn open_table(&mut self, table: &str) {
        let token = self.state.select_table(table);
        self.load_metadata(token, table, false).await;
        self.reload_page().await;
        tracing::info!(
            table,
            columns = self.state.columns().len(),
            rows = self.state.total_count(),
            "table opened"
        );
    }

    async fn load_metadata(&mut self, token: RequestToken, table: &str, force: bool) {
        let result = if force {
            self.cache.refresh(table).await
        } else {
            self.cache.columns(table).await
        };
        let columns = result.unwrap_or_else(|error| {
            tracing::warn!(table, %error, "column inference failed, continuing without metadata");
            Arc::new(Vec::new())
        });
        self.state.apply_metadata(token, columns);
    }

    /// Fetches the current page; on failure the previous rows stay put.
    #[tracing::instrument(skip(self))]
    pub async fn reload_page(&mut self) {
        let Some(table) = self.state.table().map(str::to_string) else {
            return;
        };
        let token = self.state.begin_page_request();
        let request = self.state.page_request();
        tracing::debug!(
            table = %table,
            range_start = request.range_start,
            range_end = request.range_end,
            "loading page"
        );
        let store = self.cache.store();
        let (result, attempts) =
            with_retry(self.probe_options, || store.select_page(&table, &request)).await;
        if attempts > 1 {
            tracing::debug!(table = %table, attempts, "page load needed retries");
        }
        self.state.apply_page(token, result.map_err(|error| error.to_store_error()));
    }

    pub async fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.state.page.sort = sort;
        self.state.page.page = 0;
        self.reload_page().await;
    }

    pub async fn set_search(&mut self, search: &str) {
        let search = search.trim();
        self.state.page.search = (!search.is_empty()).then(|| search.to_string());
        self.state.page.page = 0;
        self.reload_page().await;
    }

    /// Records a keystroke; nothing is fetched until [`Self::poll_search`].
    pub fn input_search(&mut self, text: impl Into<String>, now_ms: u64) {
        self.debouncer.input(text, now_ms);
    }

    /// Runs the debounced search once typing has paused. Returns whether a
    /// search was issued.
    pub async fn poll_search(&mut self, now_ms: u64) -> bool {
        match self.debouncer.poll(now_ms) {
            Some(text) => {
                self.set_search(&text).await;
                true
            }
            None => false,
        }
    }

    /// Moves to `page`, clamped to the last page that has rows.
    pub async fn go_to_page(&mut self, page: usize) {
        let last_page = usize::try_from(self.state.page_count().saturating_sub(1))
            .unwrap_or(usize::MAX);
        self.state.page.page = page.min(last_page);
        self.reload_page().await;
    }

    pub fn scroll(&mut self, scroll_offset: f64) -> VirtualWindow {
        self.state.scroll(scroll_offset)
    }

    pub fn resize(&mut self, viewport_height: f64) -> VirtualWindow {
        self.state.resize(viewport_height)
    }

    /// Optimistically edits a loaded row. A rejected write is already rolled
    /// back on return, with its message in [`BrowserState::last_error`].
    pub async fn edit_cell(
        &mut self,
        row_index: usize,
        column: &str,
        new_value: CellValue,
    ) -> Result<(), SessionError> {
        let table = self.selected_table()?;
        let result = self
            .mutations
            .edit_cell(&table, &mut self.state.rows, row_index, column, new_value)
            .await;
        self.finish_mutation(result)
    }

    pub async fn delete_row(&mut self, row_index: usize) -> Result<(), SessionError> {
        let table = self.selected_table()?;
        let result = self
            .mutations
            .delete_row(&table, &mut self.state.rows, row_index)
            .await;
        if result.is_ok() {
            self.state.total_count = self.state.total_count.saturating_sub(1);
            self.state.scroller.set_total(self.state.rows.len());
        }
        self.finish_mutation(result)
    }

    /// Restores the last deleted row and reloads if it belongs to the open table.
    pub async fn undo_delete(&mut self) -> Result<DeletedRow, SessionError> {
        let result = self.mutations.undo_delete().await;
        let restored = self.finish_mutation(result)?;
        if self.state.table() == Some(restored.table.as_str()) {
            self.reload_page().await;
        }
        Ok(restored)
    }

    /// Drops cached metadata for the open table and infers it again.
    pub async fn invalidate_metadata(&mut self) {
        let Some(table) = self.state.table().map(str::to_string) else {
            return;
        };
        self.cache.invalidate(&table);
        let token = self.state.current_token();
        self.load_metadata(token, &table, true).await;
        self.reload_page().await;
    }

    /// Counts rows of several tables at once, each with its own timeout.
    pub async fn probe_row_counts(&self, tables: &[String]) -> Vec<TableProbe<u64>> {
        probe_row_counts(self.cache.store(), tables, self.probe_options).await
    }

    fn selected_table(&self) -> Result<String, SessionError> {
        self.state
            .table()
            .map(str::to_string)
            .ok_or(SessionError::NoTableSelected)
    }

    fn finish_mutation<T>(&mut self, result: Result<T, MutationError>) -> Result<T, SessionError> {
        match result {
            Ok(value) => {
                self.state.last_error = None;
                Ok(value)
            }
            Err(error) => {
                self.state.record_error(error.to_string());
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::{BrowserState, LoadStatus, SessionError, TableBrowser};
    use crate::durable_store::MemoryMetadataStore;
    use crate::inference::ColumnType;
    use crate::metadata_cache::SystemClock;
    use crate::mutation::MutationError;
    use crate::row_store::{Page, SortSpec, StoreError};
    use crate::settings::BrowserSettings;
    use crate::test_support::FakeRowStore;
    use crate::value::{row_from_json, CellValue};

    type Browser = TableBrowser<Arc<FakeRowStore>, MemoryMetadataStore, SystemClock>;

    fn people_store() -> Arc<FakeRowStore> {
        let rows = (1..=12)
            .map(|id| {
                json!({
                    "id": id,
                    "name": format!("person {id:02}"),
                    "team_id": id % 3,
                    "email": if id % 2 == 0 { json!(null) } else { json!(format!("p{id}@example.com")) },
                })
            })
            .collect::<Vec<_>>();
        let store = FakeRowStore::with_rows("people", json!(rows));
        store.set_rows("teams", json!([{"id": 0, "label": "core"}]));
        Arc::new(store)
    }

    fn browser(store: &Arc<FakeRowStore>) -> Browser {
        let settings = BrowserSettings {
            page_size: 5,
            row_height: 10.0,
            overscan: 0,
            ..BrowserSettings::default()
        };
        TableBrowser::new(
            Arc::clone(store),
            MemoryMetadataStore::new(),
            SystemClock,
            &settings,
        )
    }

    fn page(values: serde_json::Value) -> Page {
        let rows = values
            .as_array()
            .expect("fixture is an array")
            .iter()
            .cloned()
            .filter_map(row_from_json)
            .collect::<Vec<_>>();
        Page {
            total_count: rows.len() as u64,
            rows,
        }
    }

    #[test]
    fn results_for_a_previous_table_are_ignored() {
        let mut state = BrowserState::new(50, 20.0, 2);
        let first = state.select_table("people");
        let second = state.select_table("teams");

        assert!(!state.apply_page(first, Ok(page(json!([{"id": 1}])))));
        assert!(!state.apply_metadata(first, Arc::new(Vec::new())));
        assert!(state.rows().is_empty());

        assert!(state.apply_page(second, Ok(page(json!([{"id": 9}, {"id": 10}])))));
        assert_eq!(state.rows().len(), 2);
        assert_eq!(state.status(), LoadStatus::Ready);
    }

    #[test]
    fn newer_page_request_supersedes_older_one() {
        let mut state = BrowserState::new(50, 20.0, 2);
        let table_token = state.select_table("people");
        let older = state.begin_page_request();
        let newer = state.begin_page_request();

        assert!(!state.apply_page(older, Ok(page(json!([{"id": 1}])))));
        assert!(state.apply_page(newer, Ok(page(json!([{"id": 2}])))));
        // Metadata only cares about the table, not the page generation.
        assert!(state.apply_metadata(table_token, Arc::new(Vec::new())));
    }

    #[test]
    fn failed_fetch_keeps_previous_rows() {
        let mut state = BrowserState::new(50, 20.0, 2);
        state.select_table("people");
        let token = state.begin_page_request();
        state.apply_page(token, Ok(page(json!([{"id": 1}, {"id": 2}]))));

        let token = state.begin_page_request();
        state.apply_page(
            token,
            Err(StoreError::new("TypeError: Failed to fetch")),
        );

        assert_eq!(state.rows().len(), 2);
        assert_eq!(state.status(), LoadStatus::Failed);
        assert_eq!(state.last_error(), Some("TypeError: Failed to fetch"));
    }

    #[tokio::test]
    async fn opening_a_table_loads_metadata_issues_and_first_page() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;

        let state = browser.state();
        assert_eq!(state.table(), Some("people"));
        assert_eq!(state.total_count(), 12);
        assert_eq!(state.rows().len(), 5);
        assert_eq!(state.page_count(), 3);
        assert_eq!(state.columns().len(), 4);
        assert_eq!(state.foreign_keys().len(), 1);
        assert_eq!(state.foreign_keys()[0].referenced_table, "teams");
        assert_eq!(state.issues().len(), 1);
        assert_eq!(state.issues()[0].column, "email");
        assert!(state.last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reload_keeps_rows_and_reports_the_store_message() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;
        store.fail_selects(Some(StoreError::new("Lost connection to MySQL server")));

        browser.go_to_page(1).await;
        let state = browser.state();
        assert_eq!(state.status(), LoadStatus::Failed);
        assert_eq!(state.rows().len(), 5);
        assert_eq!(state.rows()[0]["name"], CellValue::from("person 01"));
        assert_eq!(state.last_error(), Some("Lost connection to MySQL server"));

        store.fail_selects(None);
        browser.reload_page().await;
        assert_eq!(browser.state().status(), LoadStatus::Ready);
        assert_eq!(browser.state().rows()[0]["name"], CellValue::from("person 06"));
        assert!(browser.state().last_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_page_fetch_times_out_after_retrying() {
        let store = people_store();
        store.delay_selects(Duration::from_secs(3_600));
        let mut browser = browser(&store);

        let started = tokio::time::Instant::now();
        browser.open_table("people").await;

        assert!(started.elapsed() < Duration::from_secs(13));
        assert_eq!(store.select_calls(), 2);
        let state = browser.state();
        assert_eq!(state.status(), LoadStatus::Failed);
        assert!(state.rows().is_empty());
        assert_eq!(state.columns().len(), 4);
        assert_eq!(state.last_error(), Some("timed out after 6s"));
    }

    #[tokio::test]
    async fn metadata_is_inferred_once_per_table_until_invalidated() {
        let store = people_store();
        let mut browser = browser(&store);

        browser.open_table("people").await;
        browser.open_table("teams").await;
        browser.open_table("people").await;
        assert_eq!(store.sample_calls(), 2);

        browser.invalidate_metadata().await;
        assert_eq!(store.sample_calls(), 3);
    }

    #[tokio::test]
    async fn inference_failure_degrades_to_no_columns() {
        let store = people_store();
        store.fail_sampling(StoreError::new("permission denied"));
        let mut browser = browser(&store);
        browser.open_table("people").await;

        assert!(browser.state().columns().is_empty());
        assert_eq!(browser.state().rows().len(), 5);
    }

    #[tokio::test]
    async fn paging_sorting_and_search_reload_rows() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;

        browser.go_to_page(10).await;
        assert_eq!(browser.state().page_state().page, 2);
        assert_eq!(browser.state().rows().len(), 2);

        browser.set_sort(Some(SortSpec::descending("name"))).await;
        assert_eq!(browser.state().page_state().page, 0);
        assert_eq!(
            browser.state().rows()[0]["name"],
            CellValue::from("person 12")
        );

        assert_eq!(browser.state().columns()[2].column_type, ColumnType::String);
        browser.set_search("PERSON 1").await;
        assert_eq!(browser.state().total_count(), 3);
        assert!(browser.state().page_request().search.is_some());
    }

    #[tokio::test]
    async fn search_waits_for_typing_to_pause() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;
        let selects = store.select_calls();

        browser.input_search("pers", 1_000);
        browser.input_search("person 0", 1_200);
        assert!(!browser.poll_search(1_500).await);
        assert_eq!(store.select_calls(), selects);

        assert!(browser.poll_search(1_600).await);
        assert_eq!(store.select_calls(), selects + 1);
        assert_eq!(browser.state().total_count(), 9);
    }

    #[tokio::test]
    async fn scrolling_windows_the_loaded_rows() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;

        browser.resize(20.0);
        let window = browser.scroll(20.0);
        assert_eq!((window.start, window.end), (2, 4));
        assert_eq!(browser.state().visible_rows().len(), 2);
    }

    #[tokio::test]
    async fn rejected_edit_rolls_back_and_reports() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;
        store.fail_writes(Some(StoreError::with_code("23505", "duplicate key")));

        let err = browser
            .edit_cell(0, "name", CellValue::from("dup"))
            .await
            .expect_err("store rejects");
        assert!(matches!(
            err,
            SessionError::Mutation(MutationError::Store { .. })
        ));
        assert_eq!(
            browser.state().rows()[0]["name"],
            CellValue::from("person 01")
        );
        assert_eq!(
            browser.state().last_error(),
            Some("A record with this value already exists.")
        );

        store.fail_writes(None);
        browser
            .edit_cell(0, "name", CellValue::from("renamed"))
            .await
            .expect("edit commits");
        assert_eq!(browser.state().rows()[0]["name"], CellValue::from("renamed"));
        assert!(browser.state().last_error().is_none());
    }

    #[tokio::test]
    async fn delete_then_undo_round_trips_through_the_store() {
        let store = people_store();
        let mut browser = browser(&store);
        browser.open_table("people").await;

        browser.delete_row(0).await.expect("delete succeeds");
        assert_eq!(browser.state().rows().len(), 4);
        assert_eq!(browser.state().total_count(), 11);

        let restored = browser.undo_delete().await.expect("undo succeeds");
        assert_eq!(restored.row["id"], CellValue::from(1_i64));
        assert_eq!(browser.state().total_count(), 12);
    }

    #[tokio::test]
    async fn mutations_need_a_selected_table() {
        let store = people_store();
        let mut browser = browser(&store);
        let err = browser
            .delete_row(0)
            .await
            .expect_err("nothing selected");
        assert!(matches!(err, SessionError::NoTableSelected));
    }

    #[tokio::test]
    async fn probes_every_requested_table() {
        let store = people_store();
        let browser = browser(&store);
        let probes = browser
            .probe_row_counts(&["people".to_string(), "teams".to_string()])
            .await;
        assert_eq!(probes[0].result, Ok(12));
        assert_eq!(probes[1].result, Ok(1));
        assert_eq!(store.count_calls(), 2);
    }
}
