use crate::config::{RealtimeConfig, StoreBackend, StoreConfig};
use crate::database::kv::KvStore;
use crate::database::memory_store::MemoryStore;
use crate::database::redis_store::RedisStore;
use crate::database::repository::Repository;
use crate::error::app_error::AppError;
use crate::realtime::RealtimeHub;
use rocket::fairing::AdHoc;
use std::sync::Arc;

async fn init_store(store_config: &StoreConfig) -> Result<Arc<dyn KvStore>, AppError> {
    match store_config.backend {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(&store_config.redis_url).await?)),
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Connects the key-value store and manages the [`Repository`] and the realtime hub built on it.
pub fn stage_store(store_config: StoreConfig, realtime_config: RealtimeConfig) -> AdHoc {
    AdHoc::try_on_ignite("Key-value store", |rocket| async move {
        match init_store(&store_config).await {
            Ok(store) => {
                tracing::info!(backend = ?store_config.backend, "key-value store initialized successfully");
                let repo = Repository::new(store);
                let hub = Arc::new(RealtimeHub::new(repo.clone(), realtime_config));
                Ok(rocket.manage(repo).manage(hub))
            }
            Err(e) => {
                tracing::error!(error = ?e, backend = ?store_config.backend, "failed to initialize key-value store");
                Err(rocket)
            }
        }
    })
}
