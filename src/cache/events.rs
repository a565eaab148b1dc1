//! Cache event system.
//!
//! Inbound [`ContentEvent`]s describe content changes reported by the
//! content-management side; they are queued in an [`EventQueue`] and consumed
//! by the invalidation engine. Outbound [`CacheNotice`]s are broadcast to
//! anyone observing the cache (statistics, logs, the admin surface).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const NOTICE_CAPACITY: usize = 64;

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Identity and URL set of one changed content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    pub content_id: u64,
    /// The item's own permanent URL.
    pub permalink: String,
    /// Listing pages that aggregate the item: categories, tags, the posts index.
    #[serde(default)]
    pub archive_urls: Vec<String>,
    /// Revisions and autosaves never invalidate anything.
    #[serde(default)]
    pub revision: bool,
}

impl ContentChange {
    pub fn new(content_id: u64, permalink: impl Into<String>) -> Self {
        Self {
            content_id,
            permalink: permalink.into(),
            archive_urls: Vec::new(),
            revision: false,
        }
    }

    pub fn with_archives<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn as_revision(mut self) -> Self {
        self.revision = true;
        self
    }

    /// Permalink, home page, then archives, without duplicates.
    pub fn affected_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(self.archive_urls.len() + 2);
        let candidates = [self.permalink.as_str(), "/"]
            .into_iter()
            .chain(self.archive_urls.iter().map(String::as_str));
        for url in candidates {
            let url = url.trim();
            if !url.is_empty() && !urls.iter().any(|seen| seen == url) {
                urls.push(url.to_string());
            }
        }
        urls
    }
}

/// Content lifecycle events consumed by the invalidation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentEvent {
    Published(ContentChange),
    Updated(ContentChange),
    /// A comment was posted on the content item.
    CommentPosted {
        comment_id: u64,
        content: ContentChange,
    },
}

impl ContentEvent {
    pub fn change(&self) -> &ContentChange {
        match self {
            Self::Published(change) | Self::Updated(change) => change,
            Self::CommentPosted { content, .. } => content,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Published(_) => "published",
            Self::Updated(_) => "updated",
            Self::CommentPosted { .. } => "comment_posted",
        }
    }
}

/// Queued content event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: ContentEvent,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: ContentEvent, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// In-memory FIFO of pending content events.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: ContentEvent) {
        let event = CacheEvent::new(kind, self.next_epoch());

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = event.kind.label(),
            content_id = event.kind.change().content_id,
            "Content event enqueued"
        );

        mutex_lock(&self.queue, SOURCE, "publish").push_back(event);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Emitted by the cache after state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheNotice {
    EntryWritten { key: CacheKey, size_bytes: usize },
    ClearedAll { removed: usize },
    Invalidated { removed: usize, failed: usize },
}

/// Broadcast channel for [`CacheNotice`]s. Sending never blocks and never fails
/// the caller; notices without subscribers are dropped.
#[derive(Clone)]
pub struct NoticeBus {
    sender: broadcast::Sender<CacheNotice>,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheNotice> {
        self.sender.subscribe()
    }

    pub fn emit(&self, notice: CacheNotice) {
        let _ = self.sender.send(notice);
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
