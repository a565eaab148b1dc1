use lol_html::html_content::TextType;
use lol_html::{RewriteStrSettings, doc_comments, doc_text, rewrite_str};

use super::comments::is_conditional;
use super::{ContentTransform, TransformError};

/// Collapse markup whitespace and drop plain comments.
///
/// Whitespace-only text between tags is removed and other runs shrink to a
/// single space. Script, style and other raw-text content is not touched.
/// Documents with `<pre>` or `<textarea>` are returned unchanged.
pub struct MinifyHtml;

impl ContentTransform for MinifyHtml {
    fn name(&self) -> &'static str {
        "minify_html"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        let lowered = html.to_ascii_lowercase();
        if lowered.contains("<pre") || lowered.contains("<textarea") {
            return Ok(html.to_string());
        }

        let minified = rewrite_str(
            html,
            RewriteStrSettings {
                document_content_handlers: vec![
                    doc_comments!(|comment| {
                        if !is_conditional(&comment.text()) {
                            comment.remove();
                        }
                        Ok(())
                    }),
                    doc_text!(|chunk| {
                        if chunk.text_type() != TextType::Data {
                            return Ok(());
                        }
                        let text = chunk.as_str();
                        if text.is_empty() {
                            return Ok(());
                        }
                        if text.chars().all(char::is_whitespace) {
                            chunk.remove();
                        } else {
                            let collapsed = collapse_whitespace(text);
                            if collapsed != text {
                                chunk.set_str(collapsed);
                            }
                        }
                        Ok(())
                    }),
                ],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))?;

        Ok(minified.trim().to_string())
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_run {
                out.push(' ');
            }
            in_run = true;
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}
