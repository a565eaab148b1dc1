use std::cell::Cell;
use std::rc::Rc;

use lol_html::html_content::ContentType;
use lol_html::{RewriteStrSettings, element, end, end_tag, rewrite_str};

use super::{ContentTransform, TransformError};

const DELAYED_TYPE: &str = "presto-delayed";

/// Hold back matching scripts until the visitor interacts with the page.
///
/// A classic script whose `src` contains one of `patterns` is retyped so the
/// browser skips it, and a small loader is placed before `</body>`. The loader
/// restores the scripts on the first pointer, key, touch or wheel event, or
/// after `timeout_secs` at the latest.
#[derive(Debug, Clone)]
pub struct DelayScripts {
    pub patterns: Vec<String>,
    pub timeout_secs: u64,
}

impl DelayScripts {
    fn matches(&self, src: &str) -> bool {
        let src = src.to_ascii_lowercase();
        self.patterns
            .iter()
            .any(|pattern| src.contains(&pattern.to_ascii_lowercase()))
    }

    fn loader(&self) -> String {
        format!(
            concat!(
                r#"<script id="presto-delay-js">(function(){{var done=false;"#,
                r#"function run(){{if(done)return;done=true;"#,
                r#"document.querySelectorAll('script[type="{kind}"]').forEach(function(old){{"#,
                r#"var s=document.createElement("script");"#,
                r#"for(var i=0;i<old.attributes.length;i++){{var a=old.attributes[i];if(a.name!=="type")s.setAttribute(a.name,a.value);}}"#,
                r#"s.text=old.text;old.parentNode.replaceChild(s,old);}});}}"#,
                r#"["mouseover","keydown","touchstart","touchmove","wheel"].forEach(function(e){{window.addEventListener(e,run,{{passive:true,once:true}});}});"#,
                r#"setTimeout(run,{timeout_ms});}})();</script>"#,
            ),
            kind = DELAYED_TYPE,
            timeout_ms = self.timeout_secs.saturating_mul(1000),
        )
    }
}

impl ContentTransform for DelayScripts {
    fn name(&self) -> &'static str {
        "delay_scripts"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        if self.patterns.is_empty() {
            return Ok(html.to_string());
        }

        let loader = self.loader();
        let delayed = Rc::new(Cell::new(false));
        let placed = Rc::new(Cell::new(false));

        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("script[src]", {
                        let delayed = Rc::clone(&delayed);
                        move |el| {
                            let classic = el.get_attribute("type").is_none_or(|kind| {
                                let kind = kind.trim().to_ascii_lowercase();
                                kind.is_empty()
                                    || kind == "text/javascript"
                                    || kind == "application/javascript"
                            });
                            let src = el.get_attribute("src").unwrap_or_default();
                            if classic && self.matches(&src) {
                                el.set_attribute("type", DELAYED_TYPE)?;
                                delayed.set(true);
                            }
                            Ok(())
                        }
                    }),
                    element!("body", {
                        let delayed = Rc::clone(&delayed);
                        let placed = Rc::clone(&placed);
                        let loader = loader.clone();
                        move |el| {
                            if placed.get() {
                                return Ok(());
                            }
                            let delayed = Rc::clone(&delayed);
                            let placed = Rc::clone(&placed);
                            let loader = loader.clone();
                            el.on_end_tag(end_tag!(move |end| {
                                if delayed.get() && !placed.replace(true) {
                                    end.before(&loader, ContentType::Html);
                                }
                                Ok(())
                            }))
                        }
                    }),
                ],
                document_content_handlers: vec![end!({
                    let delayed = Rc::clone(&delayed);
                    let placed = Rc::clone(&placed);
                    move |end| {
                        if delayed.get() && !placed.get() {
                            end.append(&loader, ContentType::Html);
                        }
                        Ok(())
                    }
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}
