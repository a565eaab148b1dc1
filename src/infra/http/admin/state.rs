use std::sync::Arc;

use crate::cache::{CacheLayout, CacheTrigger, PageCache};

#[derive(Clone)]
pub struct AdminState {
    pub cache: Arc<PageCache>,
    pub trigger: Arc<CacheTrigger>,
    /// Directory tree inspected by stats and the self-test.
    pub layout: CacheLayout,
}

impl AdminState {
    pub fn new(cache: Arc<PageCache>, trigger: Arc<CacheTrigger>, layout: CacheLayout) -> Self {
        Self {
            cache,
            trigger,
            layout,
        }
    }
}
