//! Filesystem storage: writes pasties under `<dir>/<site>/<YYYY>/<MM>/<DD>/`.
//!
//! Grounded on `original_source/pystemon/storage/filestorage.py`: an
//! `archive_dir` (config's `dir-all`) receives every pastie unconditionally,
//! a `save_dir` (config's `dir`) receives only matched ones, both writes are
//! gated by whether the respective directory is configured, and optional
//! gzip compression applies to both.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Datelike;
use tracing::debug;

use crate::pastie::Pastie;
use crate::storage::{Storage, StorageError};

/// The `<dir>/<site>/<YYYY>/<MM>/<DD>/<filename>` path a pastie would live
/// at under `dir`, without touching the filesystem. Shared with
/// [`crate::storage::redis_backend`], which announces this same path
/// without writing it itself.
#[must_use]
pub fn dated_relative_path(dir: &str, site: &str, filename: &str) -> String {
    let now = chrono::Local::now();
    format!(
        "{dir}/{site}/{:04}/{:02}/{:02}/{filename}",
        now.year(),
        now.month(),
        now.day()
    )
}

/// Writes pasties to dated directories on local disk, optionally gzipped.
pub struct FileStorage {
    name: String,
    save_dir: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
    compress: bool,
}

impl FileStorage {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        save_dir: Option<PathBuf>,
        archive_dir: Option<PathBuf>,
        compress: bool,
    ) -> Self {
        Self {
            name: name.into(),
            save_dir,
            archive_dir,
            compress,
        }
    }

    fn dated_dir(root: &Path, site: &str) -> PathBuf {
        let now = chrono::Local::now();
        root.join(site)
            .join(format!("{:04}", now.year()))
            .join(format!("{:02}", now.month()))
            .join(format!("{:02}", now.day()))
    }

    fn write_one(&self, root: &Path, pastie: &Pastie) -> Result<PathBuf, StorageError> {
        let dir = Self::dated_dir(root, &pastie.site_name);
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            backend: self.name.clone(),
            source,
        })?;
        let filename = if self.compress {
            format!("{}.gz", pastie.filename)
        } else {
            pastie.filename.clone()
        };
        let full_path = dir.join(filename);
        let content = pastie.content.as_deref().unwrap_or_default();
        debug!(site = %pastie.site_name, id = %pastie.id, path = %full_path.display(), "writing pastie to disk");
        if self.compress {
            let file = std::fs::File::create(&full_path).map_err(|source| StorageError::Io {
                backend: self.name.clone(),
                source,
            })?;
            let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            std::io::Write::write_all(&mut encoder, content).map_err(|source| StorageError::Io {
                backend: self.name.clone(),
                source,
            })?;
            encoder.finish().map_err(|source| StorageError::Io {
                backend: self.name.clone(),
                source,
            })?;
        } else {
            std::fs::write(&full_path, content).map_err(|source| StorageError::Io {
                backend: self.name.clone(),
                source,
            })?;
        }
        if let Some(metadata) = &pastie.metadata {
            let metadata_path = PathBuf::from(format!("{}.metadata", full_path.display()));
            std::fs::write(&metadata_path, metadata).map_err(|source| StorageError::Io {
                backend: self.name.clone(),
                source,
            })?;
        }
        Ok(full_path)
    }

    fn path_exists_for(&self, root: &Path, site: &str, filename: &str) -> bool {
        let dir = Self::dated_dir(root, site);
        let filename = if self.compress {
            format!("{filename}.gz")
        } else {
            filename.to_string()
        };
        dir.join(filename).exists()
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save_pastie(&self, pastie: &Pastie) -> Result<(), StorageError> {
        if let Some(archive_dir) = &self.archive_dir {
            self.write_one(archive_dir, pastie)?;
        }
        if pastie.matched()
            && let Some(save_dir) = &self.save_dir
        {
            self.write_one(save_dir, pastie)?;
        }
        Ok(())
    }

    async fn seen_pastie(&self, site: &str, pastie_id: &str) -> Result<bool, StorageError> {
        let filename = pastie_id.replace('/', "_");
        for dir in [self.save_dir.as_deref(), self.archive_dir.as_deref()]
            .into_iter()
            .flatten()
        {
            if self.path_exists_for(dir, site, &filename) {
                return Ok(true);
            }
        }
        Ok(false)
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
        p.content = Some(b"leaked secret".to_vec());
        p
    }

    #[tokio::test]
    async fn test_save_writes_to_archive_dir_unconditionally() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("file", None, Some(dir.path().to_path_buf()), false);
        let p = pastie("pastebin", "abc");
        storage.save_pastie(&p).await.unwrap();
        assert!(storage.seen_pastie("pastebin", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_skips_save_dir_when_not_matched() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("file", Some(dir.path().to_path_buf()), None, false);
        let p = pastie("pastebin", "abc");
        storage.save_pastie(&p).await.unwrap();
        assert!(!storage.seen_pastie("pastebin", "abc").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_writes_metadata_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("file", None, Some(dir.path().to_path_buf()), false);
        let mut p = pastie("pastebin", "xyz");
        p.metadata = Some(b"meta".to_vec());
        storage.save_pastie(&p).await.unwrap();
        let dated = FileStorage::dated_dir(dir.path(), "pastebin");
        assert!(dated.join("xyz.metadata").exists());
    }

    #[tokio::test]
    async fn test_compressed_save_uses_gz_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new("file", None, Some(dir.path().to_path_buf()), true);
        let p = pastie("pastebin", "zzz");
        storage.save_pastie(&p).await.unwrap();
        let dated = FileStorage::dated_dir(dir.path(), "pastebin");
        assert!(dated.join("zzz.gz").exists());
    }
}
