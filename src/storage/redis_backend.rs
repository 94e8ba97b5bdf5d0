//! Redis storage backend: pushes the local archive path onto a `pastes`
//! list for downstream consumers, mirroring [`crate::storage::file`]'s
//! directory layout decision so both backends agree on where a pastie lives.
//!
//! Grounded on `original_source/pystemon/storage/redisstorage.py`: on save,
//! compute the same `<dir>/<site>/<YYYY>/<MM>/<DD>/<filename>` path the file
//! backend would use (whether or not a file backend is actually configured)
//! and `LPUSH` it. Redis here is a notification queue, not the archive
//! itself, so there is no lookup support — `seen_pastie` always reports
//! unseen.

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::pastie::Pastie;
use crate::storage::file::dated_relative_path;
use crate::storage::{Storage, StorageError};

/// Pushes archive paths for matched (or all, if `save_all`) pasties onto a
/// Redis list for another process to consume.
pub struct RedisStorage {
    name: String,
    client: redis::Client,
    save_dir: Option<String>,
    archive_dir: Option<String>,
    save_all: bool,
}

impl RedisStorage {
    pub fn new(
        name: impl Into<String>,
        host: &str,
        port: u16,
        database: i64,
        save_dir: Option<String>,
        archive_dir: Option<String>,
        save_all: bool,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        let url = format!("redis://{host}:{port}/{database}");
        let client = redis::Client::open(url).map_err(|source| StorageError::Redis {
            backend: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            client,
            save_dir,
            archive_dir,
            save_all,
        })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_pastie(&self, pastie: &Pastie) -> Result<(), StorageError> {
        if !pastie.matched() && !self.save_all {
            return Ok(());
        }
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|source| StorageError::Redis {
                backend: self.name.clone(),
                source,
            })?;
        for dir in [&self.archive_dir, &self.save_dir].into_iter().flatten() {
            let path = dated_relative_path(dir, &pastie.site_name, &pastie.filename);
            conn.lpush::<_, _, ()>("pastes", path)
                .await
                .map_err(|source| StorageError::Redis {
                    backend: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn seen_pastie(&self, _site: &str, _pastie_id: &str) -> Result<bool, StorageError> {
        Ok(false)
    }
}
