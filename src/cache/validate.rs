//! Write-path checks on rendered output and the provenance trailer.

use std::fmt;

use time::{OffsetDateTime, macros::format_description};

/// Markers, any of which identifies a body as an HTML document.
const HTML_MARKERS: &[&str] = &["<html", "<!doctype", "<body"];

/// Markers of a rendered fatal-error page.
const FATAL_ERROR_MARKERS: &[&str] = &["<html><body><h1>fatal error", "<b>fatal error</b>:"];

const SERVED_MARKER: &str = "<!-- Served from Presto Cache -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    TooSmall { len: usize, min: usize },
    NotHtml,
    FatalError,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TooSmall { .. } => "too_small",
            Self::NotHtml => "not_html",
            Self::FatalError => "fatal_error",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall { len, min } => write!(f, "body of {len} bytes is under {min}"),
            Self::NotHtml => f.write_str("body lacks html structure"),
            Self::FatalError => f.write_str("body is a fatal error page"),
        }
    }
}

/// Accept only complete-looking HTML documents.
pub fn validate_body(body: &[u8], min_len: usize) -> Result<(), Rejection> {
    if body.is_empty() || body.len() < min_len {
        return Err(Rejection::TooSmall {
            len: body.len(),
            min: min_len,
        });
    }

    let lowered = String::from_utf8_lossy(body).to_ascii_lowercase();

    if !HTML_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Err(Rejection::NotHtml);
    }

    if FATAL_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return Err(Rejection::FatalError);
    }

    Ok(())
}

/// Two comment lines recording when the body was stored and that it comes from cache.
pub fn provenance_trailer(stored_at: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let stamp = stored_at
        .format(&format)
        .unwrap_or_else(|_| stored_at.unix_timestamp().to_string());
    format!("\n<!-- Cached by Presto on {stamp} -->\n{SERVED_MARKER}")
}

/// Body with the trailer appended, ready for the store.
pub fn with_trailer(body: &[u8], stored_at: OffsetDateTime) -> Vec<u8> {
    let trailer = provenance_trailer(stored_at);
    let mut out = Vec::with_capacity(body.len() + trailer.len());
    out.extend_from_slice(body);
    out.extend_from_slice(trailer.as_bytes());
    out
}

/// Whether a served body carries the cache provenance marker.
pub fn is_served_from_cache(body: &[u8]) -> bool {
    String::from_utf8_lossy(body).contains(SERVED_MARKER)
}
