use lol_html::{RewriteStrSettings, element, rewrite_str};

use super::{ContentTransform, TransformError};

/// Add `defer` to external classic scripts.
///
/// Scripts that already carry `async` or `defer`, module and `nomodule`
/// scripts, and sources containing any `exclude` fragment keep their
/// original loading behavior.
#[derive(Debug, Clone, Default)]
pub struct DeferScripts {
    pub exclude: Vec<String>,
}

impl DeferScripts {
    fn is_excluded(&self, src: &str) -> bool {
        let src = src.to_ascii_lowercase();
        self.exclude
            .iter()
            .any(|fragment| src.contains(&fragment.to_ascii_lowercase()))
    }
}

impl ContentTransform for DeferScripts {
    fn name(&self) -> &'static str {
        "defer_scripts"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![element!("script[src]", |el| {
                    let Some(src) = el.get_attribute("src") else {
                        return Ok(());
                    };
                    let is_module = el
                        .get_attribute("type")
                        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("module"));
                    if el.has_attribute("defer")
                        || el.has_attribute("async")
                        || el.has_attribute("nomodule")
                        || is_module
                        || self.is_excluded(&src)
                    {
                        return Ok(());
                    }
                    el.set_attribute("defer", "")?;
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defer(exclude: &[&str]) -> DeferScripts {
        DeferScripts {
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn defers_external_scripts() {
        let html = r#"<script src="/js/app.js"></script><script>inline()</script>"#;
        assert_eq!(
            defer(&[]).apply(html).expect("rewrite"),
            r#"<script src="/js/app.js" defer=""></script><script>inline()</script>"#
        );
    }

    #[test]
    fn keeps_declared_loading_behavior() {
        let html = concat!(
            r#"<script src="a.js" async></script>"#,
            r#"<script src="b.js" defer></script>"#,
            r#"<script type="module" src="c.js"></script>"#,
            r#"<script nomodule src="d.js"></script>"#,
        );
        assert_eq!(defer(&[]).apply(html).expect("rewrite"), html);
    }

    #[test]
    fn excluded_sources_are_skipped() {
        let html = r#"<script src="/lib/jQuery.min.js"></script><script src="/js/site.js"></script>"#;
        assert_eq!(
            defer(&["jquery"]).apply(html).expect("rewrite"),
            r#"<script src="/lib/jQuery.min.js"></script><script src="/js/site.js" defer=""></script>"#
        );
    }
}
