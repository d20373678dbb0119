use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::durable_store::{metadata_key, DurableMetadataStore};
use crate::inference::{
    infer_columns_with, schema_signature, ColumnMeta, DEFAULT_TYPE_SAMPLE_VALUES,
};
use crate::probe::{with_retry, ProbeOptions};
use crate::row_store::{RowStore, StoreError};

/// Bumping this silently invalidates every durable entry written before.
pub const METADATA_FORMAT_VERSION: u32 = 2;
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SAMPLE_SIZE: usize = 50;

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

#[derive(Debug, Error)]
pub enum MetadataCacheError {
    #[error("failed to sample rows of `{table}` after {attempts} attempt(s): {source}")]
    Sample {
        table: String,
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataCacheOptions {
    pub ttl: Duration,
    pub sample_size: usize,
    pub type_sample_values: usize,
    /// Timeout and retries around each sampling query.
    pub fetch: ProbeOptions,
}

impl Default for MetadataCacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_METADATA_TTL,
            sample_size: DEFAULT_SAMPLE_SIZE,
            type_sample_values: DEFAULT_TYPE_SAMPLE_VALUES,
            fetch: ProbeOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub columns: Arc<Vec<ColumnMeta>>,
    pub fetched_at_ms: u64,
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DurableEntry {
    version: u32,
    table: String,
    fetched_at_ms: u64,
    #[serde(default)]
    signature: Option<String>,
    columns: Vec<ColumnMeta>,
}

/// Two-tier memo of inferred column metadata, keyed by table name.
///
/// The in-process tier answers repeated reads; the durable tier survives
/// restarts. Durable entries that are missing, expired or unreadable count
/// as misses, as do entries written by another format version or for
/// another table.
#[derive(Debug)]
pub struct MetadataCache<S: RowStore, D: DurableMetadataStore, C: Clock> {
    store: S,
    durable: D,
    clock: C,
    options: MetadataCacheOptions,
    entries: HashMap<String, CacheEntry>,
}

impl<S: RowStore, D: DurableMetadataStore, C: Clock> MetadataCache<S, D, C> {
    #[must_use]
    pub fn new(store: S, durable: D, clock: C, options: MetadataCacheOptions) -> Self {
        Self {
            store,
            durable,
            clock,
            options,
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> MetadataCacheOptions {
        self.options
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn entry(&self, table: &str) -> Option<&CacheEntry> {
        self.entries.get(table)
    }

    #[tracing::instrument(skip(self))]
    pub async fn columns(&mut self, table: &str) -> Result<Arc<Vec<ColumnMeta>>, MetadataCacheError> {
        let now = self.clock.now_millis();

        if let Some(entry) = self.entries.get(table) {
            if self.is_fresh(entry.fetched_at_ms, now) {
                tracing::debug!("metadata cache hit");
                return Ok(Arc::clone(&entry.columns));
            }
        }

        if let Some(entry) = self.load_durable(table, now) {
            tracing::debug!("metadata promoted from durable tier");
            let columns = Arc::clone(&entry.columns);
            self.entries.insert(table.to_string(), entry);
            return Ok(columns);
        }

        self.refresh_at(table, now).await
    }

    /// Re-infers regardless of what either tier holds.
    pub async fn refresh(&mut self, table: &str) -> Result<Arc<Vec<ColumnMeta>>, MetadataCacheError> {
        let now = self.clock.now_millis();
        self.refresh_at(table, now).await
    }

    pub fn invalidate(&mut self, table: &str) {
        self.entries.remove(table);
        if let Err(error) = self.durable.remove(&metadata_key(table)) {
            tracing::warn!(table, %error, "failed to drop durable metadata entry");
        }
    }

    fn is_fresh(&self, fetched_at_ms: u64, now: u64) -> bool {
        u128::from(now.saturating_sub(fetched_at_ms)) < self.options.ttl.as_millis()
    }

    fn load_durable(&self, table: &str, now: u64) -> Option<CacheEntry> {
        let raw = match self.durable.get(&metadata_key(table)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(table, %error, "durable metadata unreadable, treating as miss");
                return None;
            }
        };

        let stored: DurableEntry = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(table, %error, "durable metadata corrupt, treating as miss");
                return None;
            }
        };

        if stored.version != METADATA_FORMAT_VERSION {
            tracing::debug!(
                table,
                stored_version = stored.version,
                "durable metadata from another format version"
            );
            return None;
        }
        if stored.table != table {
            tracing::warn!(
                table,
                stored_table = %stored.table,
                "durable metadata belongs to another table, treating as miss"
            );
            return None;
        }
        if !self.is_fresh(stored.fetched_at_ms, now) {
            return None;
        }

        let signature = stored
            .signature
            .unwrap_or_else(|| schema_signature(&stored.columns));
        Some(CacheEntry {
            columns: Arc::new(stored.columns),
            fetched_at_ms: stored.fetched_at_ms,
            signature,
        })
    }

    async fn refresh_at(
        &mut self,
        table: &str,
        now: u64,
    ) -> Result<Arc<Vec<ColumnMeta>>, MetadataCacheError> {
        let store = &self.store;
        let sample_size = self.options.sample_size;
        let (sample, attempts) =
            with_retry(self.options.fetch, || store.sample_rows(table, sample_size)).await;
        let sample = sample.map_err(|error| MetadataCacheError::Sample {
            table: table.to_string(),
            attempts,
            source: error.to_store_error(),
        })?;

        let columns = infer_columns_with(&sample, self.options.type_sample_values);
        let signature = schema_signature(&columns);
        tracing::info!(
            table,
            sampled_rows = sample.len(),
            columns = columns.len(),
            %signature,
            "inferred table metadata"
        );

        self.persist_durable(table, now, &signature, &columns);

        let columns = Arc::new(columns);
        self.entries.insert(
            table.to_string(),
            CacheEntry {
                columns: Arc::clone(&columns),
                fetched_at_ms: now,
                signature,
            },
        );
        Ok(columns)
    }

    fn persist_durable(&self, table: &str, now: u64, signature: &str, columns: &[ColumnMeta]) {
        let entry = DurableEntry {
            version: METADATA_FORMAT_VERSION,
            table: table.to_string(),
            fetched_at_ms: now,
            signature: Some(signature.to_string()),
            columns: columns.to_vec(),
        };
        let rendered = match serde_json::to_string(&entry) {
            Ok(rendered) => rendered,
            Err(error) => {
                tracing::warn!(table, %error, "failed to serialize durable metadata");
                return;
            }
        };
        if let Err(error) = self.durable.put(&metadata_key(table), &rendered) {
            tracing::warn!(table, %error, "failed to persist durable metadata");
        }
    }
}
