//! SQLite storage backend: one `pasties` row per (site, id).
//!
//! Grounded on `original_source/pystemon/storage/sqlite3storage.py`: a
//! single `pasties` table keyed by `(site, id)`, insert-or-update on save,
//! `SELECT count(id)` for lookups. The Rust version uses `sqlx::SqlitePool`
//! with WAL and a busy timeout the way `db.rs` configures its own pool,
//! instead of one connection per thread.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::pastie::Pastie;
use crate::storage::{Storage, StorageError};

/// SQLite-backed pastie archive and dedup lookup.
pub struct Sqlite3Storage {
    name: String,
    pool: SqlitePool,
    lookup: bool,
}

impl Sqlite3Storage {
    /// Connects (or creates) the database at `path` and ensures the
    /// `pasties` table exists.
    pub async fn connect(
        name: impl Into<String>,
        path: &std::path::Path,
        lookup: bool,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|source| StorageError::Database {
                backend: name.clone(),
                source,
            })?;
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .map_err(|source| StorageError::Database {
                backend: name.clone(),
                source,
            })?;
        sqlx::query("PRAGMA busy_timeout=5000")
            .execute(&pool)
            .await
            .map_err(|source| StorageError::Database {
                backend: name.clone(),
                source,
            })?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pasties (
                site TEXT NOT NULL,
                id TEXT NOT NULL,
                md5 TEXT NOT NULL,
                url TEXT NOT NULL,
                local_path TEXT,
                timestamp DATETIME NOT NULL,
                matches TEXT,
                PRIMARY KEY (site, id)
            )",
        )
        .execute(&pool)
        .await
        .map_err(|source| StorageError::Database {
            backend: name.clone(),
            source,
        })?;
        Ok(Self { name, pool, lookup })
    }
}

#[async_trait]
impl Storage for Sqlite3Storage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_pastie(&self, pastie: &Pastie) -> Result<(), StorageError> {
        let now = chrono::Local::now().naive_local();
        sqlx::query(
            "INSERT INTO pasties (site, id, md5, url, local_path, timestamp, matches)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(site, id) DO UPDATE SET
                md5 = excluded.md5,
                url = excluded.url,
                local_path = excluded.local_path,
                timestamp = excluded.timestamp,
                matches = excluded.matches",
        )
        .bind(&pastie.site_name)
        .bind(&pastie.id)
        .bind(pastie.md5.as_deref().unwrap_or_default())
        .bind(&pastie.url)
        .bind(&pastie.filename)
        .bind(now)
        .bind(pastie.matches_to_text())
        .execute(&self.pool)
        .await
        .map_err(|source| StorageError::Database {
            backend: self.name.clone(),
            source,
        })?;
        Ok(())
    }

    async fn seen_pastie(&self, site: &str, pastie_id: &str) -> Result<bool, StorageError> {
        if !self.lookup {
            return Ok(false);
        }
        let count: i64 = sqlx::query_scalar(
            "SELECT count(id) FROM pasties WHERE site = ? AND id = ?",
        )
        .bind(site)
        .bind(pastie_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|source| StorageError::Database {
            backend: self.name.clone(),
            source,
        })?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pastie(site: &str, id: &str) -> Pastie {
        let mut p = Pastie::new(
            site,
            id,
            "https://example.com/raw/{id}",
            "https://example.com/{id}",
            None,
            id,
        );
        p.content = Some(b"hit".to_vec());
        p.md5 = Some("deadbeef".to_string());
        p
    }

    #[tokio::test]
    async fn test_save_then_seen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Sqlite3Storage::connect("sqlite", &dir.path().join("p.db"), true)
            .await
            .unwrap();
        let p = pastie("pastebin", "abc");
        storage.save_pastie(&p).await.unwrap();
        assert!(storage.seen_pastie("pastebin", "abc").await.unwrap());
        assert!(!storage.seen_pastie("pastebin", "other").await.unwrap());
    }

    #[tokio::test]
    async fn test_seen_pastie_false_when_lookup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Sqlite3Storage::connect("sqlite", &dir.path().join("p.db"), false)
            .await
            .unwrap();
        let p = pastie("pastebin", "abc");
        storage.save_pastie(&p).await.unwrap();
        assert!(!storage.seen_pastie("pastebin", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_upserts_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Sqlite3Storage::connect("sqlite", &dir.path().join("p.db"), true)
            .await
            .unwrap();
        let mut p = pastie("pastebin", "abc");
        storage.save_pastie(&p).await.unwrap();
        p.md5 = Some("updated".to_string());
        storage.save_pastie(&p).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM pasties")
            .fetch_one(&storage.pool)
            .await
            .unwrap();
        assert_eq!(count, 1, "upsert must not duplicate the row");
    }
}
