pub mod data_quality;
pub mod durable_store;
pub mod error_classifier;
pub mod inference;
pub mod metadata_cache;
pub mod mutation;
pub mod page_query;
pub mod probe;
pub mod row_store;
pub mod session;
pub mod settings;
pub mod sql_generator;
pub mod value;
pub mod virtual_window;

#[cfg(test)]
mod test_support;
