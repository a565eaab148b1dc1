use lol_html::{RewriteStrSettings, doc_comments, rewrite_str};

use super::{ContentTransform, TransformError};

/// Remove HTML comments, keeping conditional comments.
///
/// Documents with `<pre>` or `<textarea>` are left alone since comment-like
/// text inside them is content.
pub struct StripComments;

impl ContentTransform for StripComments {
    fn name(&self) -> &'static str {
        "strip_comments"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        let lowered = html.to_ascii_lowercase();
        if lowered.contains("<pre") || lowered.contains("<textarea") {
            return Ok(html.to_string());
        }

        rewrite_str(
            html,
            RewriteStrSettings {
                document_content_handlers: vec![doc_comments!(|comment| {
                    if !is_conditional(&comment.text()) {
                        comment.remove();
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}

pub(super) fn is_conditional(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with("[if") || text.starts_with("<![endif]") || text.ends_with("<![endif]")
}
