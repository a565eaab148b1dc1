//! Device classification for separate mobile cache variants.

use serde::{Deserialize, Serialize};

/// User-agent fragments that mark a mobile client.
const MOBILE_UA_MARKERS: &[&str] = &[
    "Mobile",
    "Android",
    "Silk/",
    "Kindle",
    "BlackBerry",
    "Opera Mini",
    "Opera Mobi",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    /// Classify a client from its `Sec-CH-UA-Mobile` hint and user agent.
    ///
    /// Always `Desktop` unless `mobile_separate` is enabled, so a single
    /// variant is stored per path when the split is off.
    pub fn detect(mobile_hint: Option<bool>, user_agent: Option<&str>, mobile_separate: bool) -> Self {
        if !mobile_separate {
            return Self::Desktop;
        }

        let is_mobile = match mobile_hint {
            Some(hint) => hint,
            None => user_agent.is_some_and(is_mobile_user_agent),
        };

        if is_mobile { Self::Mobile } else { Self::Desktop }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        }
    }
}

/// Parse a structured `Sec-CH-UA-Mobile` header value (`?1` / `?0`).
pub fn parse_mobile_hint(value: &str) -> Option<bool> {
    match value.trim() {
        "?1" => Some(true),
        "?0" => Some(false),
        _ => None,
    }
}

fn is_mobile_user_agent(user_agent: &str) -> bool {
    MOBILE_UA_MARKERS
        .iter()
        .any(|marker| user_agent.contains(marker))
}
