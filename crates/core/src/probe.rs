//! Concurrent per-table probes with independent timeouts and retries.

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;

use crate::inference::{infer_columns_with, ColumnMeta};
use crate::row_store::{RowFilter, RowStore, StoreError};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 2;
pub const DEFAULT_PROBE_BACKOFF: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOptions {
    pub timeout: Duration,
    pub attempts: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
            attempts: DEFAULT_PROBE_ATTEMPTS,
            backoff: DEFAULT_PROBE_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Store(StoreError),
}

impl ProbeError {
    /// Store-shaped view of the failure, for the error classifier.
    #[must_use]
    pub fn to_store_error(&self) -> StoreError {
        match self {
            Self::TimedOut(_) => StoreError::new(self.to_string()),
            Self::Store(error) => error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableProbe<T> {
    pub table: String,
    pub result: Result<T, ProbeError>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds or `options.attempts` is used up.
/// Timeouts count as retryable failures.
pub async fn with_retry<T, F, Fut>(
    options: ProbeOptions,
    mut operation: F,
) -> (Result<T, ProbeError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = options.attempts.max(1);
    let mut last_error = ProbeError::TimedOut(options.timeout);

    for attempt in 1..=attempts {
        match tokio::time::timeout(options.timeout, operation()).await {
            Ok(Ok(value)) => return (Ok(value), attempt),
            Ok(Err(error)) => last_error = ProbeError::Store(error),
            Err(_) => last_error = ProbeError::TimedOut(options.timeout),
        }
        tracing::debug!(attempt, error = %last_error, "attempt failed");

        if attempt < attempts {
            tokio::time::sleep(options.backoff * attempt).await;
        }
    }

    (Err(last_error), attempts)
}

/// Probes every table concurrently; one table failing never affects another.
pub async fn probe_tables<'a, T, F, Fut>(
    tables: &'a [String],
    options: ProbeOptions,
    probe: F,
) -> Vec<TableProbe<T>>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let probe = &probe;
    join_all(tables.iter().map(|table| async move {
        let (result, attempts) = with_retry(options, || probe(table.as_str())).await;
        if let Err(error) = &result {
            tracing::warn!(table = %table, attempts, %error, "table probe failed");
        }
        TableProbe {
            table: table.clone(),
            result,
            attempts,
        }
    }))
    .await
}

#[tracing::instrument(skip(store, tables), fields(tables = tables.len()))]
pub async fn probe_row_counts<S: RowStore>(
    store: &S,
    tables: &[String],
    options: ProbeOptions,
) -> Vec<TableProbe<u64>> {
    let filter = RowFilter::new();
    let filter = &filter;
    probe_tables(tables, options, move |table| store.count(table, filter)).await
}

/// Samples and infers each table's columns without touching the metadata cache.
#[tracing::instrument(skip(store, tables), fields(tables = tables.len()))]
pub async fn probe_columns<S: RowStore>(
    store: &S,
    tables: &[String],
    sample_size: usize,
    type_sample_values: usize,
    options: ProbeOptions,
) -> Vec<TableProbe<Vec<ColumnMeta>>> {
    probe_tables(tables, options, move |table| async move {
        let sample = store.sample_rows(table, sample_size).await?;
        Ok::<_, StoreError>(infer_columns_with(&sample, type_sample_values))
    })
    .await
}
