//! Cache statistics and the storage self-test.

use std::io;
use std::path::Path;

use serde::Serialize;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use super::store::{CacheLayout, StoreError};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const SELF_TEST_CONTENT: &[u8] = b"presto cache self-test";

/// File counts and total size under the cache root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub files: u64,
    pub size_bytes: u64,
    pub html_files: u64,
    pub css_files: u64,
    pub js_files: u64,
}

impl CacheStats {
    pub async fn collect(layout: &CacheLayout) -> Result<Self, StoreError> {
        let mut stats = Self::default();
        stats.tally(&layout.html_dir(), Kind::Html).await?;
        stats.tally(&layout.css_dir(), Kind::Css).await?;
        stats.tally(&layout.js_dir(), Kind::Js).await?;
        Ok(stats)
    }

    pub fn size_human(&self) -> String {
        format_bytes(self.size_bytes)
    }

    async fn tally(&mut self, dir: &Path, kind: Kind) -> Result<(), StoreError> {
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                let matches = entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(kind.extension()));
                if matches {
                    self.files += 1;
                    self.size_bytes += meta.len();
                    match kind {
                        Kind::Html => self.html_files += 1,
                        Kind::Css => self.css_files += 1,
                        Kind::Js => self.js_files += 1,
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Html,
    Css,
    Js,
}

impl Kind {
    fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Js => "js",
        }
    }
}

/// Human-readable size: whole bytes below 1 KB, two decimals above.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Write, read back and delete a scratch file under the cache root.
pub async fn is_cache_working(layout: &CacheLayout) -> bool {
    let scratch = layout
        .root()
        .join(format!(".presto-selftest-{}", Uuid::new_v4()));

    if let Err(err) = fs::create_dir_all(layout.root()).await {
        warn!(error = %err, "cache root not creatable");
        return false;
    }
    if let Err(err) = fs::write(&scratch, SELF_TEST_CONTENT).await {
        warn!(error = %err, "cache root not writable");
        return false;
    }
    let readable = matches!(fs::read(&scratch).await, Ok(data) if data == SELF_TEST_CONTENT);
    let removed = fs::remove_file(&scratch).await.is_ok();
    readable && removed
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn formats_sizes_with_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
        assert_eq!(format_bytes(2 * 1024_u64.pow(5)), "2048.00 TB");
    }

    #[tokio::test]
    async fn counts_files_per_directory() {
        let dir = TempDir::new().expect("tempdir");
        let layout = CacheLayout::new(dir.path());
        layout.ensure().await.expect("layout");

        fs::write(layout.html_dir().join("a-1.html"), vec![b'x'; 100])
            .await
            .expect("write");
        fs::write(layout.html_dir().join("b-2.html"), vec![b'x'; 50])
            .await
            .expect("write");
        fs::write(layout.css_dir().join("site.css"), vec![b'x'; 10])
            .await
            .expect("write");
        fs::write(layout.js_dir().join("app.js"), vec![b'x'; 5])
            .await
            .expect("write");

        let stats = CacheStats::collect(&layout).await.expect("stats");
        assert_eq!(
            stats,
            CacheStats {
                files: 4,
                size_bytes: 165,
                html_files: 2,
                css_files: 1,
                js_files: 1,
            }
        );
        assert_eq!(stats.size_human(), "165 B");
    }

    #[tokio::test]
    async fn skips_temp_and_foreign_files() {
        let dir = TempDir::new().expect("tempdir");
        let layout = CacheLayout::new(dir.path());
        layout.ensure().await.expect("layout");

        fs::write(layout.html_dir().join("a-1.html"), vec![b'x'; 40])
            .await
            .expect("write");
        fs::write(layout.html_dir().join(".tmp-3f2a"), vec![b'x'; 4096])
            .await
            .expect("write");
        fs::write(layout.html_dir().join("notes.txt"), vec![b'x'; 7])
            .await
            .expect("write");
        fs::write(layout.css_dir().join("stray.js"), vec![b'x'; 9])
            .await
            .expect("write");

        let stats = CacheStats::collect(&layout).await.expect("stats");
        assert_eq!(
            stats,
            CacheStats {
                files: 1,
                size_bytes: 40,
                html_files: 1,
                css_files: 0,
                js_files: 0,
            }
        );
    }

    #[tokio::test]
    async fn missing_root_counts_as_empty() {
        let dir = TempDir::new().expect("tempdir");
        let layout = CacheLayout::new(dir.path().join("absent"));
        assert_eq!(
            CacheStats::collect(&layout).await.expect("stats"),
            CacheStats::default()
        );
    }

    #[tokio::test]
    async fn self_test_passes_on_writable_root() {
        let dir = TempDir::new().expect("tempdir");
        let layout = CacheLayout::new(dir.path().join("cache"));
        assert!(is_cache_working(&layout).await);

        let mut leftovers = fs::read_dir(layout.root()).await.expect("read root");
        assert!(leftovers.next_entry().await.expect("entry").is_none());
    }
}
