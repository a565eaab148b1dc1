use std::cell::Cell;

use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, rewrite_str};

use super::{ContentTransform, TransformError};

/// Append DNS-prefetch and font-preload links to the document `<head>`.
///
/// Only the first `<head>` receives the links. Pages without one pass
/// through unchanged.
#[derive(Debug, Clone, Default)]
pub struct ResourceHints {
    pub dns_prefetch: Vec<String>,
    pub preload_fonts: Vec<String>,
}

impl ResourceHints {
    fn markup(&self) -> String {
        let mut links = String::new();
        for host in self.dns_prefetch.iter().map(|h| h.trim()).filter(|h| !h.is_empty()) {
            links.push_str(&format!(
                r#"<link rel="dns-prefetch" href="{}">"#,
                escape_attribute(host)
            ));
        }
        for font in self.preload_fonts.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            let font_type = font_mime(font)
                .map(|mime| format!(r#" type="{mime}""#))
                .unwrap_or_default();
            links.push_str(&format!(
                r#"<link rel="preload" href="{}" as="font"{font_type} crossorigin>"#,
                escape_attribute(font)
            ));
        }
        links
    }
}

impl ContentTransform for ResourceHints {
    fn name(&self) -> &'static str {
        "resource_hints"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        let links = self.markup();
        if links.is_empty() {
            return Ok(html.to_string());
        }

        let done = Cell::new(false);
        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("head", |el| {
                    if !done.replace(true) {
                        el.append(&links, ContentType::Html);
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}

fn font_mime(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    match extension.as_str() {
        "woff2" => Some("font/woff2"),
        "woff" => Some("font/woff"),
        "ttf" => Some("font/ttf"),
        "otf" => Some("font/otf"),
        _ => None,
    }
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
