use lol_html::html_content::Element;
use lol_html::{HandlerResult, RewriteStrSettings, element, rewrite_str};

use super::{ContentTransform, TransformError};

/// Serve scripts, stylesheets and images from a CDN origin.
///
/// Root-relative URLs and URLs under `site_url` are moved onto `cdn_url`.
/// Protocol-relative and foreign URLs, and any URL containing an `exclude`
/// fragment, keep their value.
#[derive(Debug, Clone)]
pub struct CdnRewrite {
    pub cdn_url: String,
    pub site_url: Option<String>,
    pub exclude: Vec<String>,
}

impl CdnRewrite {
    fn rewrite(&self, url: &str) -> Option<String> {
        let cdn = self.cdn_url.trim().trim_end_matches('/');
        if cdn.is_empty() || self.exclude.iter().any(|fragment| url.contains(fragment.as_str())) {
            return None;
        }
        if url.starts_with('/') && !url.starts_with("//") {
            return Some(format!("{cdn}{url}"));
        }
        let site = self.site_url.as_deref()?.trim().trim_end_matches('/');
        if site.is_empty() {
            return None;
        }
        let rest = url.strip_prefix(site)?;
        (rest.is_empty() || rest.starts_with(['/', '?'])).then(|| format!("{cdn}{rest}"))
    }

    fn rewrite_attribute(&self, el: &mut Element<'_, '_>, name: &str) -> HandlerResult {
        if let Some(rewritten) = el.get_attribute(name).and_then(|url| self.rewrite(&url)) {
            el.set_attribute(name, &rewritten)?;
        }
        Ok(())
    }
}

impl ContentTransform for CdnRewrite {
    fn name(&self) -> &'static str {
        "cdn_rewrite"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("script[src], img[src]", |el| self.rewrite_attribute(el, "src")),
                    element!("link[rel~=stylesheet][href]", |el| {
                        self.rewrite_attribute(el, "href")
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}
