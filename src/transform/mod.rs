//! HTML content transforms applied to live-rendered pages.
//!
//! A [`TransformPipeline`] runs its transforms in order. A failing transform
//! is logged and skipped; the page continues with the HTML it had before.

mod cdn;
mod comments;
mod defer_scripts;
mod delay_scripts;
mod lazy_load;
mod minify;
mod resource_hints;

use thiserror::Error;
use tracing::warn;

use crate::config::OptimizeSettings;

pub use cdn::CdnRewrite;
pub use comments::StripComments;
pub use defer_scripts::DeferScripts;
pub use delay_scripts::DelayScripts;
pub use lazy_load::LazyLoadMedia;
pub use minify::MinifyHtml;
pub use resource_hints::ResourceHints;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("html rewrite failed in `{transform}`: {message}")]
    Rewrite {
        transform: &'static str,
        message: String,
    },
}

impl TransformError {
    pub(crate) fn rewrite(transform: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Rewrite {
            transform,
            message: err.to_string(),
        }
    }
}

/// One rewrite step over a complete HTML document.
pub trait ContentTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, html: &str) -> Result<String, TransformError>;
}

#[derive(Default)]
pub struct TransformPipeline {
    transforms: Vec<Box<dyn ContentTransform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline for the configured optimizations.
    pub fn from_settings(settings: &OptimizeSettings) -> Self {
        let mut pipeline = Self::new();
        if settings.strip_comments {
            pipeline = pipeline.with(StripComments);
        }
        if settings.lazy_load_images || settings.lazy_load_iframes {
            pipeline = pipeline.with(LazyLoadMedia {
                images: settings.lazy_load_images,
                iframes: settings.lazy_load_iframes,
                eager_images: settings.eager_images,
            });
        }
        if let Some(cdn_url) = settings.cdn_url.clone() {
            pipeline = pipeline.with(CdnRewrite {
                cdn_url,
                site_url: settings.site_url.clone(),
                exclude: settings.cdn_exclude.clone(),
            });
        }
        if !settings.delay_scripts.is_empty() {
            pipeline = pipeline.with(DelayScripts {
                patterns: settings.delay_scripts.clone(),
                timeout_secs: settings.delay_timeout_secs,
            });
        }
        if settings.defer_scripts {
            pipeline = pipeline.with(DeferScripts {
                exclude: settings.defer_exclude.clone(),
            });
        }
        if !settings.dns_prefetch.is_empty() || !settings.preload_fonts.is_empty() {
            pipeline = pipeline.with(ResourceHints {
                dns_prefetch: settings.dns_prefetch.clone(),
                preload_fonts: settings.preload_fonts.clone(),
            });
        }
        // Last, so whitespace around injected markup is collapsed too.
        if settings.minify_html {
            pipeline = pipeline.with(MinifyHtml);
        }
        pipeline
    }

    pub fn with(mut self, transform: impl ContentTransform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn apply(&self, html: &str) -> String {
        let mut current = html.to_string();
        for transform in &self.transforms {
            match transform.apply(&current) {
                Ok(next) => current = next,
                Err(err) => warn!(transform = transform.name(), error = %err, "transform skipped"),
            }
        }
        current
    }
}
