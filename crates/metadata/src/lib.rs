//! Durable summary store for logward.
//!
//! Each accepted upload owns one encounter summary row. The row is created
//! in the `processing` state at admission and moved exactly once to
//! `success` or `failed` by the background worker.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::SummaryRow;
pub use repos::SummaryRepo;
pub use store::{MetadataStore, SqliteStore};

use logward_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
