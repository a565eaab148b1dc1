//! Cache storage.
//!
//! [`CacheBackend`] is the narrow interface the orchestrator and
//! invalidation engine talk to. [`FsStore`] implements it on local disk:
//! one flat file per entry under `html/`, written to a temporary sibling and
//! renamed into place so readers only ever see complete files.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::CacheKey;

const HTML_DIR: &str = "html";
const CSS_DIR: &str = "css";
const JS_DIR: &str = "js";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache entry not found")]
    NotFound,
    #[error("cache storage i/o failed: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(err)
        }
    }
}

/// Result of deleting a single entry. Both outcomes are success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deleted {
    Removed,
    NotFound,
}

/// Listing record for one stored entry.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: CacheKey,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

/// Key to artifact mapping used by the page cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn exists(&self, key: &CacheKey) -> bool;

    async fn read(&self, key: &CacheKey) -> Result<Bytes, StoreError>;

    /// Replace the entry atomically; readers see the old or the new body.
    async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError>;

    /// Idempotent: deleting an absent key reports [`Deleted::NotFound`].
    async fn delete(&self, key: &CacheKey) -> Result<Deleted, StoreError>;

    /// Remove every stored artifact and return how many were removed.
    async fn delete_all(&self) -> Result<usize, StoreError>;

    async fn age_seconds(&self, key: &CacheKey) -> Result<u64, StoreError>;

    async fn list(&self) -> Result<Vec<EntryInfo>, StoreError>;
}

/// Fixed directory layout under the cache root.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Page bodies, one flat file per key.
    pub fn html_dir(&self) -> PathBuf {
        self.root.join(HTML_DIR)
    }

    /// Combined stylesheets produced by the transform pipeline.
    pub fn css_dir(&self) -> PathBuf {
        self.root.join(CSS_DIR)
    }

    /// Combined scripts produced by the transform pipeline.
    pub fn js_dir(&self) -> PathBuf {
        self.root.join(JS_DIR)
    }

    pub fn subdirectories(&self) -> [PathBuf; 3] {
        [self.html_dir(), self.css_dir(), self.js_dir()]
    }

    /// Create the root and its fixed subdirectories.
    pub async fn ensure(&self) -> Result<(), StoreError> {
        for dir in self.subdirectories() {
            fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Filesystem-backed [`CacheBackend`].
#[derive(Debug, Clone)]
pub struct FsStore {
    layout: CacheLayout,
}

impl FsStore {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }

    /// Open a store rooted at `root`, creating the directory layout.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let layout = CacheLayout::new(root);
        layout.ensure().await?;
        Ok(Self::new(layout))
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.layout.html_dir().join(key.file_name())
    }
}

#[async_trait]
impl CacheBackend for FsStore {
    async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(self.entry_path(key))
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    async fn read(&self, key: &CacheKey) -> Result<Bytes, StoreError> {
        let data = fs::read(self.entry_path(key))
            .await
            .map_err(StoreError::from_io)?;
        Ok(Bytes::from(data))
    }

    async fn write(&self, key: &CacheKey, body: &[u8]) -> Result<(), StoreError> {
        let dir = self.layout.html_dir();
        fs::create_dir_all(&dir).await?;

        let target = dir.join(key.file_name());
        let temp = dir.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));

        if let Err(err) = write_file(&temp, body).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(StoreError::Io(err));
        }

        debug!(key = %key, bytes = body.len(), "cache entry written");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<Deleted, StoreError> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(Deleted::Removed),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Deleted::NotFound),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn delete_all(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for dir in self.layout.subdirectories() {
            removed += clear_directory(&dir).await?;
        }
        Ok(removed)
    }

    async fn age_seconds(&self, key: &CacheKey) -> Result<u64, StoreError> {
        let meta = fs::metadata(self.entry_path(key))
            .await
            .map_err(StoreError::from_io)?;
        Ok(age_since(meta.modified()?))
    }

    async fn list(&self) -> Result<Vec<EntryInfo>, StoreError> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(self.layout.html_dir()).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(StoreError::Io(err)),
        };

        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name();
            let Some(key) = name.to_str().and_then(CacheKey::from_file_name) else {
                continue;
            };
            let meta = item.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            entries.push(EntryInfo {
                key,
                size_bytes: meta.len(),
                modified: meta.modified()?,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

/// Whole seconds elapsed since `modified`; clock skew into the future reads as zero.
pub(crate) fn age_since(modified: SystemTime) -> u64 {
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age.as_secs())
        .unwrap_or(0)
}

async fn write_file(path: &Path, body: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(body).await?;
    file.sync_all().await?;
    Ok(())
}

/// Remove everything below `dir`, keeping `dir` itself. Missing directories count as empty.
async fn clear_directory(dir: &Path) -> Result<usize, StoreError> {
    let mut removed = 0;
    let mut pending = vec![dir.to_path_buf()];
    let mut nested_dirs = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(StoreError::Io(err)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path.clone());
                nested_dirs.push(path);
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to remove cache file");
                }
            }
        }
    }

    // Deepest first so parents are empty by the time they are removed.
    nested_dirs.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
    for nested in nested_dirs {
        if let Err(err) = fs::remove_dir(&nested).await
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %nested.display(), error = %err, "failed to remove cache directory");
        }
    }

    Ok(removed)
}
