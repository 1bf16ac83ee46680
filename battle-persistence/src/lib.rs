pub mod connection;
pub mod entities;
pub mod feed;
pub mod memory;
pub mod repositories;
pub mod store;

pub use feed::ChangeFeed;
pub use memory::InMemoryMatchStore;
pub use repositories::SqlMatchStore;
pub use store::{MatchStore, Subscription};

use std::sync::Arc;

/// Open the store selected by `database_url`, or an in-memory one when unset.
pub async fn open_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn MatchStore>> {
    match database_url {
        Some(url) => {
            let db = connection::connect_and_migrate(url).await?;
            tracing::info!("Using SQL match store at {}", url);
            Ok(Arc::new(SqlMatchStore::new(db)))
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory match store");
            Ok(Arc::new(InMemoryMatchStore::new()))
        }
    }
}
