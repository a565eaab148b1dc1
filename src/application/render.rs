//! Page rendering behind the cache.
//!
//! [`PageRenderer`] is what the public router calls on a cache miss.
//! [`FileRenderer`] serves pre-rendered `.html` pages and static assets from
//! a content directory.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use mime_guess::MimeGuess;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no page at `{0}`")]
    NotFound(String),
    #[error("rejected path `{0}`")]
    InvalidPath(String),
    #[error("failed to read page: {0}")]
    Io(#[from] io::Error),
}

/// Output of one render.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub body: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, path: &str) -> Result<RenderedPage, RenderError>;
}

/// Renders by reading files from a content root.
///
/// `/` maps to `index.html`, `/blog/post-1` to `blog/post-1.html` or
/// `blog/post-1/index.html`, and paths with an extension to the file itself.
#[derive(Debug, Clone)]
pub struct FileRenderer {
    root: PathBuf,
}

impl FileRenderer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, path: &str) -> Result<Vec<PathBuf>, RenderError> {
        let relative = sanitize(path).ok_or_else(|| RenderError::InvalidPath(path.to_string()))?;

        if relative.as_os_str().is_empty() {
            return Ok(vec![self.root.join("index.html")]);
        }
        if relative.extension().is_some() {
            return Ok(vec![self.root.join(&relative)]);
        }
        Ok(vec![
            self.root.join(relative.with_extension("html")),
            self.root.join(&relative).join("index.html"),
        ])
    }
}

#[async_trait]
impl PageRenderer for FileRenderer {
    async fn render(&self, path: &str) -> Result<RenderedPage, RenderError> {
        for candidate in self.candidates(path)? {
            match fs::read(&candidate).await {
                Ok(body) => {
                    return Ok(RenderedPage {
                        content_type: content_type_for(&candidate),
                        body: Bytes::from(body),
                    });
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::IsADirectory
                    ) => {}
                Err(err) => return Err(RenderError::Io(err)),
            }
        }
        Err(RenderError::NotFound(path.to_string()))
    }
}

/// Relative path made of normal components only.
fn sanitize(path: &str) -> Option<PathBuf> {
    let trimmed = path.trim_start_matches('/');
    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(relative)
}

fn content_type_for(path: &Path) -> String {
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn site() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        fs::create_dir_all(root.join("blog/series")).await.expect("dirs");
        fs::write(root.join("index.html"), "<html>home</html>").await.expect("write");
        fs::write(root.join("blog/post-1.html"), "<html>post</html>").await.expect("write");
        fs::write(root.join("blog/series/index.html"), "<html>series</html>")
            .await
            .expect("write");
        fs::write(root.join("site.css"), "body{}").await.expect("write");
        dir
    }

    #[tokio::test]
    async fn resolves_pages_and_indexes() {
        let dir = site().await;
        let renderer = FileRenderer::new(dir.path());

        let home = renderer.render("/").await.expect("home");
        assert_eq!(&home.body[..], b"<html>home</html>");
        assert_eq!(home.content_type, "text/html; charset=utf-8");

        let post = renderer.render("/blog/post-1").await.expect("post");
        assert_eq!(&post.body[..], b"<html>post</html>");

        let series = renderer.render("/blog/series/").await.expect("series");
        assert_eq!(&series.body[..], b"<html>series</html>");
    }

    #[tokio::test]
    async fn serves_assets_with_their_type() {
        let dir = site().await;
        let css = FileRenderer::new(dir.path())
            .render("/site.css")
            .await
            .expect("css");
        assert_eq!(css.content_type, "text/css; charset=utf-8");
    }

    #[tokio::test]
    async fn rejects_traversal_and_reports_missing() {
        let dir = site().await;
        let renderer = FileRenderer::new(dir.path());

        assert!(matches!(
            renderer.render("/../etc/passwd").await,
            Err(RenderError::InvalidPath(_))
        ));
        assert!(matches!(
            renderer.render("/nope").await,
            Err(RenderError::NotFound(_))
        ));
    }
}
