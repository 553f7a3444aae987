use crate::database::kv::KvStore;
use crate::error::app_error::AppError;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Upper bound on read-modify-write retries before giving up with a conflict.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Records stored as whole JSON documents and rewritten through [`Repository::modify`].
pub trait Versioned {
    /// Advances the version counter and the modification timestamp.
    fn bump(&mut self);
}

macro_rules! versioned {
    ($($record:ty),+ $(,)?) => {
        $(
            impl $crate::database::repository::Versioned for $record {
                fn bump(&mut self) {
                    self.version += 1;
                    self.updated_at = chrono::Utc::now();
                }
            }
        )+
    };
}

pub(crate) use versioned;

#[derive(Clone)]
pub struct Repository {
    pub store: Arc<dyn KvStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Loads every key in order, skipping ids whose record has disappeared.
    pub async fn load_many<T: DeserializeOwned>(&self, keys: impl IntoIterator<Item = String>) -> Result<Vec<T>, AppError> {
        let mut records = Vec::new();
        for key in keys {
            match self.load(&key).await? {
                Some(record) => records.push(record),
                None => tracing::debug!(key = %key, "index points at a missing record"),
            }
        }
        Ok(records)
    }

    pub async fn save<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(record)?;
        self.store.set(key, &raw).await
    }

    /// Writes a brand-new record. Fails with a conflict if the key is already taken.
    pub async fn insert<T: Serialize + Sync>(&self, key: &str, record: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(record)?;
        if self.store.set_if_absent(key, &raw).await? {
            Ok(())
        } else {
            Err(AppError::Conflict(format!("Record {} already exists", key)))
        }
    }

    /// Read-modify-write guarded by compare-and-swap on the serialized record.
    ///
    /// Returns `None` when the key does not exist. The closure may run several times
    /// if concurrent writers race; an error from the closure aborts without writing.
    pub async fn modify_with<T, R, F>(&self, key: &str, mut apply: F) -> Result<Option<(T, R)>, AppError>
    where
        T: Versioned + Serialize + DeserializeOwned + Send + Sync,
        R: Send,
        F: FnMut(&mut T) -> Result<R, AppError> + Send,
    {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.store.get(key).await? else {
                return Ok(None);
            };

            let mut record: T = serde_json::from_str(&current)?;
            let output = apply(&mut record)?;
            record.bump();

            let next = serde_json::to_string(&record)?;
            if self.store.compare_and_swap(key, &current, &next).await? {
                return Ok(Some((record, output)));
            }

            tracing::debug!(key = %key, attempt = attempt + 1, "concurrent update detected, retrying");
        }

        tracing::warn!(key = %key, "giving up after repeated concurrent updates");
        Err(AppError::Conflict("The record was modified concurrently, please retry".to_string()))
    }

    pub async fn modify<T, F>(&self, key: &str, mut apply: F) -> Result<Option<T>, AppError>
    where
        T: Versioned + Serialize + DeserializeOwned + Send + Sync,
        F: FnMut(&mut T) -> Result<(), AppError> + Send,
    {
        Ok(self.modify_with(key, |record: &mut T| apply(record)).await?.map(|(record, _)| record))
    }
}

/// Sorted-set score for "now". Microsecond resolution keeps insertion order for rapid writes.
pub fn now_score() -> i64 {
    Utc::now().timestamp_micros()
}
