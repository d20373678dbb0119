use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rowscope_adapters::memory::{InMemoryRowStore, MemoryStoreError};
use rowscope_adapters::mysql::MysqlRowStore;
use rowscope_core::data_quality::summarize_issues;
use rowscope_core::durable_store::FileMetadataStore;
use rowscope_core::metadata_cache::SystemClock;
use rowscope_core::row_store::{RowStore, SortSpec, StoreError};
use rowscope_core::session::{BrowserState, TableBrowser};
use rowscope_core::settings::{BrowserSettings, FileSettingsStore, SettingsError};
use rowscope_core::value::row_to_json;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,rowscope=debug";

#[derive(Debug, Parser)]
#[command(
    name = "rowscope",
    about = "Open a table and show its inferred columns, data quality and first page"
)]
struct Cli {
    /// Table to open.
    table: String,
    /// JSON file mapping table names to row arrays, browsed in memory.
    #[arg(long, conflicts_with = "profile")]
    data: Option<PathBuf>,
    /// Named connection from the settings file.
    #[arg(long)]
    profile: Option<String>,
    /// Settings file to use instead of the default location.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, requires = "sort")]
    desc: bool,
    /// Zero-based page number.
    #[arg(long, default_value_t = 0)]
    page: usize,
    /// Extra tables whose row counts are probed concurrently.
    #[arg(long = "probe")]
    probe: Vec<String>,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("failed to read dataset at {path}: {source}")]
    ReadData {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse dataset at {path}: {source}")]
    ParseData {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Dataset(#[from] MemoryStoreError),
    #[error("no connection named `{0}` in the settings file")]
    UnknownProfile(String),
    #[error("pass --data <file> or --profile <name>")]
    MissingSource,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app(cli: Cli) -> Result<String, AppError> {
    let settings_store = match &cli.config {
        Some(path) => FileSettingsStore::load_from_path(path)?,
        None => FileSettingsStore::load_default()?,
    };
    let durable = FileMetadataStore::new(settings_store.metadata_dir());
    let settings = settings_store.browser().clone();

    if let Some(path) = &cli.data {
        let raw = std::fs::read_to_string(path).map_err(|source| AppError::ReadData {
            path: path.clone(),
            source,
        })?;
        let dataset = serde_json::from_str(&raw).map_err(|source| AppError::ParseData {
            path: path.clone(),
            source,
        })?;
        let store = Arc::new(InMemoryRowStore::from_json(dataset)?);
        return Ok(browse(store, durable, &settings, &cli).await);
    }

    let name = cli.profile.as_deref().ok_or(AppError::MissingSource)?;
    let profile = settings_store
        .connection(name)
        .ok_or_else(|| AppError::UnknownProfile(name.to_string()))?;
    let store = MysqlRowStore::from_profile(profile);
    let report = browse(store.clone(), durable, &settings, &cli).await;
    store.disconnect().await?;
    Ok(report)
}

async fn browse<S: RowStore + Clone>(
    store: S,
    durable: FileMetadataStore,
    settings: &BrowserSettings,
    cli: &Cli,
) -> String {
    let mut browser = TableBrowser::new(store, durable, SystemClock, settings);
    browser.open_table(&cli.table).await;

    if let Some(column) = &cli.sort {
        let sort = if cli.desc {
            SortSpec::descending(column.as_str())
        } else {
            SortSpec::ascending(column.as_str())
        };
        browser.set_sort(Some(sort)).await;
    }
    if let Some(search) = &cli.search {
        browser.set_search(search).await;
    }
    if cli.page > 0 {
        browser.go_to_page(cli.page).await;
    }

    // Tall enough to show the whole page.
    #[allow(clippy::cast_precision_loss)]
    let viewport_height = settings.page_size as f64 * settings.row_height;
    browser.resize(viewport_height);

    let mut report = render_state(browser.state());
    if !cli.probe.is_empty() {
        for probe in browser.probe_row_counts(&cli.probe).await {
            let _ = match probe.result {
                Ok(count) => writeln!(report, "probe {}: {count} rows", probe.table),
                Err(error) => writeln!(
                    report,
                    "probe {}: failed after {} attempt(s): {}",
                    probe.table,
                    probe.attempts,
                    rowscope_core::error_classifier::classify(&error.to_store_error())
                ),
            };
        }
    }
    report
}

fn render_state(state: &BrowserState) -> String {
    let mut out = String::new();
    let table = state.table().unwrap_or("-");
    let _ = writeln!(out, "table {table}");

    for column in state.columns() {
        let nullable = if column.nullable { "null" } else { "not null" };
        let _ = write!(out, "  {} {} {nullable}", column.name, column.column_type);
        if let Some(hint) = &column.foreign_key {
            let _ = write!(out, " -> {}?", hint.referenced_table);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "quality: {}", summarize_issues(state.issues()));
    for issue in state.issues() {
        let _ = writeln!(out, "  [{}] {}", issue.severity, issue.message);
    }

    let page = state.page_state().page;
    let _ = writeln!(
        out,
        "page {} of {} ({} rows total)",
        page + 1,
        state.page_count().max(1),
        state.total_count()
    );
    for row in state.visible_rows() {
        let _ = writeln!(out, "{}", row_to_json(row));
    }

    if let Some(error) = state.last_error() {
        let _ = writeln!(out, "error: {error}");
    }
    out
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let report = run_app(Cli::parse()).await?;
    print!("{report}");
    Ok(())
}
