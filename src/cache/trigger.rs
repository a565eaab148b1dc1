//! Cache trigger service.
//!
//! Entry point for the content-management side: publish a content event and,
//! unless the caller batches, consume the queue right away.

use std::sync::Arc;

use tracing::debug;

use super::events::{ContentChange, ContentEvent, EventQueue};
use super::invalidation::{InvalidationEngine, InvalidationReport};

/// Upper bound on events handled per consume call.
const CONSUME_BATCH: usize = 256;

pub struct CacheTrigger {
    queue: Arc<EventQueue>,
    engine: Arc<InvalidationEngine>,
}

impl CacheTrigger {
    pub fn new(queue: Arc<EventQueue>, engine: Arc<InvalidationEngine>) -> Self {
        Self { queue, engine }
    }

    /// Publish an event, consuming the queue when `consume_now` is set.
    pub async fn trigger(&self, event: ContentEvent, consume_now: bool) -> InvalidationReport {
        if !self.engine.cache().policy().page_cache_enabled {
            debug!(event_kind = event.label(), "cache trigger skipped: cache disabled");
            return InvalidationReport::default();
        }

        self.queue.publish(event);

        if consume_now {
            self.consume().await
        } else {
            InvalidationReport::default()
        }
    }

    /// Handle every pending event in FIFO order.
    pub async fn consume(&self) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        loop {
            let batch = self.queue.drain(CONSUME_BATCH);
            if batch.is_empty() {
                break;
            }
            for event in batch {
                debug!(event_id = %event.id, event_epoch = event.epoch, "consuming content event");
                report.merge(self.engine.handle(&event.kind).await);
            }
        }
        report
    }

    pub async fn content_published(&self, change: ContentChange) -> InvalidationReport {
        self.trigger(ContentEvent::Published(change), true).await
    }

    pub async fn content_updated(&self, change: ContentChange) -> InvalidationReport {
        self.trigger(ContentEvent::Updated(change), true).await
    }

    pub async fn comment_posted(&self, comment_id: u64, content: ContentChange) -> InvalidationReport {
        self.trigger(
            ContentEvent::CommentPosted {
                comment_id,
                content,
            },
            true,
        )
        .await
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<InvalidationEngine> {
        &self.engine
    }
}
