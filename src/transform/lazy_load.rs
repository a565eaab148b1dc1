use std::cell::Cell;
use std::rc::Rc;

use lol_html::{RewriteStrSettings, element, rewrite_str};

use super::{ContentTransform, TransformError};

/// Defer offscreen media.
///
/// The first `eager_images` images are treated as above the fold and get
/// `fetchpriority="high"`; later images and all iframes get `loading="lazy"`.
/// Elements that already declare these attributes are left as they are.
#[derive(Debug, Clone)]
pub struct LazyLoadMedia {
    pub images: bool,
    pub iframes: bool,
    pub eager_images: usize,
}

impl ContentTransform for LazyLoadMedia {
    fn name(&self) -> &'static str {
        "lazy_load_media"
    }

    fn apply(&self, html: &str) -> Result<String, TransformError> {
        let seen = Rc::new(Cell::new(0_usize));
        let mut handlers = Vec::new();

        if self.images {
            let eager = self.eager_images;
            handlers.push(element!("img", {
                let seen = Rc::clone(&seen);
                move |el| {
                    let index = seen.get();
                    seen.set(index + 1);
                    if el.get_attribute("loading").is_some() {
                        return Ok(());
                    }
                    if index < eager {
                        if el.get_attribute("fetchpriority").is_none() {
                            el.set_attribute("fetchpriority", "high")?;
                        }
                    } else {
                        el.set_attribute("loading", "lazy")?;
                    }
                    Ok(())
                }
            }));
        }

        if self.iframes {
            handlers.push(element!("iframe", |el| {
                if el.get_attribute("loading").is_none() {
                    el.set_attribute("loading", "lazy")?;
                }
                Ok(())
            }));
        }

        if handlers.is_empty() {
            return Ok(html.to_string());
        }

        rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| TransformError::rewrite(self.name(), err))
    }
}
