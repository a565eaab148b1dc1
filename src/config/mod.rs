//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_LIFETIME_SECS, DEFAULT_MIN_BODY_BYTES, DEFAULT_SESSION_COOKIE_PREFIX};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "presto";
const ENV_PREFIX: &str = "PRESTO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_CONTENT_DIR: &str = "site";
const DEFAULT_EAGER_IMAGES: usize = 2;
const DEFAULT_DEFER_EXCLUDE: &[&str] = &["jquery"];
const DEFAULT_DELAY_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BROWSER_CACHE_MAX_AGE_SECS: u64 = 31_536_000;

/// Command-line arguments for the Presto binary.
#[derive(Debug, Parser)]
#[command(name = "presto", version, about = "Presto page cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESTO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and administrative HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Remove every cached page.
    Clear(CacheArgs),
    /// Print cache statistics.
    Stats(CacheArgs),
    /// Verify the cache directory is writable and readable.
    Check(CacheArgs),
    /// Invalidate the cached variants of the given URLs.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverride {
    /// Override the cache root directory.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub cache: CacheOverride,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub cache: CacheOverride,

    /// Absolute or site-relative URLs to invalidate.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverride,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle the page cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the page cache lifetime.
    #[arg(long = "cache-lifetime-seconds", value_name = "SECONDS")]
    pub cache_lifetime_seconds: Option<u64>,

    /// Toggle separate cache entries for mobile clients.
    #[arg(
        long = "cache-mobile-separate",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_mobile_separate: Option<bool>,

    /// Override the directory pages are rendered from.
    #[arg(long = "content-directory", value_name = "PATH")]
    pub content_directory: Option<PathBuf>,
}

/// Fully validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub content: ContentSettings,
    pub optimize: OptimizeSettings,
    pub browser_cache: BrowserCacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub mobile_separate: bool,
    pub lifetime: Duration,
    /// User exclusion patterns, trimmed, blanks dropped.
    pub exclude_urls: Vec<String>,
    pub cache_logged_in: bool,
    pub session_cookie_prefixes: Vec<String>,
    pub min_body_bytes: usize,
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeSettings {
    pub strip_comments: bool,
    pub lazy_load_images: bool,
    pub lazy_load_iframes: bool,
    /// Images before this index are left eager.
    pub eager_images: usize,
    pub minify_html: bool,
    pub defer_scripts: bool,
    /// Script sources containing any of these fragments are never deferred.
    pub defer_exclude: Vec<String>,
    /// Script sources matching any of these wait for the first interaction.
    pub delay_scripts: Vec<String>,
    pub delay_timeout_secs: u64,
    pub dns_prefetch: Vec<String>,
    pub preload_fonts: Vec<String>,
    pub cdn_url: Option<String>,
    /// Absolute URLs under this origin are also moved to the CDN.
    pub site_url: Option<String>,
    pub cdn_exclude: Vec<String>,
}

impl Default for OptimizeSettings {
    fn default() -> Self {
        Self {
            strip_comments: false,
            lazy_load_images: false,
            lazy_load_iframes: false,
            eager_images: DEFAULT_EAGER_IMAGES,
            minify_html: false,
            defer_scripts: false,
            defer_exclude: default_defer_exclude(),
            delay_scripts: Vec::new(),
            delay_timeout_secs: DEFAULT_DELAY_TIMEOUT_SECS,
            dns_prefetch: Vec::new(),
            preload_fonts: Vec::new(),
            cdn_url: None,
            site_url: None,
            cdn_exclude: Vec::new(),
        }
    }
}

fn default_defer_exclude() -> Vec<String> {
    DEFAULT_DEFER_EXCLUDE.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCacheSettings {
    pub enabled: bool,
    pub max_age: Duration,
}

impl Default for BrowserCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age: Duration::from_secs(DEFAULT_BROWSER_CACHE_MAX_AGE_SECS),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.exclude_urls")
            .with_list_parse_key("cache.session_cookie_prefixes")
            .with_list_parse_key("optimize.defer_exclude")
            .with_list_parse_key("optimize.delay_scripts")
            .with_list_parse_key("optimize.dns_prefetch")
            .with_list_parse_key("optimize.preload_fonts")
            .with_list_parse_key("optimize.cdn_exclude")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Clear(args) | Command::Stats(args) | Command::Check(args)) => {
            raw.apply_cache_override(&args.cache)
        }
        Some(Command::Invalidate(args)) => raw.apply_cache_override(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    content: RawContentSettings,
    optimize: RawOptimizeSettings,
    browser_cache: RawBrowserCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_lifetime_seconds {
            self.cache.lifetime_seconds = Some(seconds);
        }
        if let Some(separate) = overrides.cache_mobile_separate {
            self.cache.mobile_separate = Some(separate);
        }
        if let Some(directory) = overrides.content_directory.as_ref() {
            self.content.directory = Some(directory.clone());
        }

        self.apply_cache_override(&overrides.cache);
    }

    fn apply_cache_override(&mut self, overrides: &CacheOverride) {
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            content,
            optimize,
            browser_cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            content: build_content_settings(content)?,
            optimize: build_optimize_settings(optimize)?,
            browser_cache: build_browser_cache_settings(browser_cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let lifetime_seconds = cache
        .lifetime_seconds
        .unwrap_or(DEFAULT_LIFETIME_SECS);
    if lifetime_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.lifetime_seconds",
            "must be greater than zero",
        ));
    }

    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.directory", "path must not be empty"));
    }

    let session_cookie_prefixes = cache
        .session_cookie_prefixes
        .map(trimmed_non_empty)
        .unwrap_or_else(|| vec![DEFAULT_SESSION_COOKIE_PREFIX.to_string()]);

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        mobile_separate: cache.mobile_separate.unwrap_or(false),
        lifetime: Duration::from_secs(lifetime_seconds),
        exclude_urls: trimmed_non_empty(cache.exclude_urls.unwrap_or_default()),
        cache_logged_in: cache.cache_logged_in.unwrap_or(false),
        session_cookie_prefixes,
        min_body_bytes: cache.min_body_bytes.unwrap_or(DEFAULT_MIN_BODY_BYTES),
        directory,
    })
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let directory = content
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTENT_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "content.directory",
            "path must not be empty",
        ));
    }
    Ok(ContentSettings { directory })
}

fn build_optimize_settings(optimize: RawOptimizeSettings) -> Result<OptimizeSettings, LoadError> {
    let delay_timeout_secs = optimize
        .delay_timeout_seconds
        .unwrap_or(DEFAULT_DELAY_TIMEOUT_SECS);
    if delay_timeout_secs == 0 {
        return Err(LoadError::invalid(
            "optimize.delay_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let cdn_url = non_blank(optimize.cdn_url);
    if let Some(url) = cdn_url.as_deref() {
        if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with("//")) {
            return Err(LoadError::invalid(
                "optimize.cdn_url",
                format!("`{url}` is not an absolute URL"),
            ));
        }
    }

    Ok(OptimizeSettings {
        strip_comments: optimize.strip_comments.unwrap_or(false),
        lazy_load_images: optimize.lazy_load_images.unwrap_or(false),
        lazy_load_iframes: optimize.lazy_load_iframes.unwrap_or(false),
        eager_images: optimize.eager_images.unwrap_or(DEFAULT_EAGER_IMAGES),
        minify_html: optimize.minify_html.unwrap_or(false),
        defer_scripts: optimize.defer_scripts.unwrap_or(false),
        defer_exclude: optimize
            .defer_exclude
            .map(trimmed_non_empty)
            .unwrap_or_else(default_defer_exclude),
        delay_scripts: trimmed_non_empty(optimize.delay_scripts.unwrap_or_default()),
        delay_timeout_secs,
        dns_prefetch: trimmed_non_empty(optimize.dns_prefetch.unwrap_or_default()),
        preload_fonts: trimmed_non_empty(optimize.preload_fonts.unwrap_or_default()),
        cdn_url,
        site_url: non_blank(optimize.site_url),
        cdn_exclude: trimmed_non_empty(optimize.cdn_exclude.unwrap_or_default()),
    })
}

fn build_browser_cache_settings(
    browser_cache: RawBrowserCacheSettings,
) -> Result<BrowserCacheSettings, LoadError> {
    let max_age_seconds = browser_cache
        .max_age_seconds
        .unwrap_or(DEFAULT_BROWSER_CACHE_MAX_AGE_SECS);
    if max_age_seconds == 0 {
        return Err(LoadError::invalid(
            "browser_cache.max_age_seconds",
            "must be greater than zero",
        ));
    }

    Ok(BrowserCacheSettings {
        enabled: browser_cache.enabled.unwrap_or(false),
        max_age: Duration::from_secs(max_age_seconds),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    mobile_separate: Option<bool>,
    lifetime_seconds: Option<u64>,
    exclude_urls: Option<Vec<String>>,
    cache_logged_in: Option<bool>,
    session_cookie_prefixes: Option<Vec<String>>,
    min_body_bytes: Option<usize>,
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOptimizeSettings {
    strip_comments: Option<bool>,
    lazy_load_images: Option<bool>,
    lazy_load_iframes: Option<bool>,
    eager_images: Option<usize>,
    minify_html: Option<bool>,
    defer_scripts: Option<bool>,
    defer_exclude: Option<Vec<String>>,
    delay_scripts: Option<Vec<String>>,
    delay_timeout_seconds: Option<u64>,
    dns_prefetch: Option<Vec<String>>,
    preload_fonts: Option<Vec<String>>,
    cdn_url: Option<String>,
    site_url: Option<String>,
    cdn_exclude: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrowserCacheSettings {
    enabled: Option<bool>,
    max_age_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn trimmed_non_empty(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePolicy;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
        assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.lifetime, Duration::from_secs(3600));
        assert_eq!(settings.cache.min_body_bytes, 255);
        assert_eq!(settings.cache.directory, PathBuf::from("cache"));
        assert_eq!(settings.cache.session_cookie_prefixes, vec!["logged_in"]);
        assert_eq!(settings.content.directory, PathBuf::from("site"));
        assert_eq!(settings.optimize, OptimizeSettings::default());
        assert_eq!(settings.browser_cache, BrowserCacheSettings::default());
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.public_port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.cache.lifetime_seconds = Some(60);

        let overrides = ServeOverrides {
            public_port: Some(4321),
            log_level: Some("debug".to_string()),
            cache_lifetime_seconds: Some(120),
            cache: CacheOverride {
                cache_directory: Some(PathBuf::from("/var/cache/presto")),
            },
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.public_addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.lifetime, Duration::from_secs(120));
        assert_eq!(
            settings.cache.directory,
            PathBuf::from("/var/cache/presto")
        );
    }

    #[test]
    fn zero_lifetime_is_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.lifetime_seconds = Some(0);

        let err = Settings::from_raw(raw).expect_err("zero lifetime");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.lifetime_seconds",
                ..
            }
        ));
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut raw = RawSettings::default();
        raw.server.admin_port = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn exclusion_patterns_are_trimmed() {
        let mut raw = RawSettings::default();
        raw.cache.exclude_urls = Some(vec![
            " /members ".to_string(),
            "   ".to_string(),
            "/shop".to_string(),
        ]);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert_eq!(settings.cache.exclude_urls, vec!["/members", "/shop"]);
    }

    #[test]
    fn optimize_lists_are_trimmed() {
        let mut raw = RawSettings::default();
        raw.optimize.minify_html = Some(true);
        raw.optimize.dns_prefetch = Some(vec![" //cdn.example ".to_string(), "".to_string()]);
        raw.optimize.preload_fonts = Some(vec!["/fonts/inter.woff2".to_string()]);

        let settings = Settings::from_raw(raw).expect("valid settings");
        assert!(settings.optimize.minify_html);
        assert!(!settings.optimize.defer_scripts);
        assert_eq!(settings.optimize.defer_exclude, vec!["jquery"]);
        assert_eq!(settings.optimize.dns_prefetch, vec!["//cdn.example"]);
        assert_eq!(settings.optimize.preload_fonts, vec!["/fonts/inter.woff2"]);
    }

    #[test]
    fn cdn_url_must_be_absolute() {
        let mut raw = RawSettings::default();
        raw.optimize.cdn_url = Some("cdn.example.net".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "optimize.cdn_url",
                ..
            })
        ));

        let mut raw = RawSettings::default();
        raw.optimize.cdn_url = Some("  ".to_string());
        let settings = Settings::from_raw(raw).expect("blank cdn url is unset");
        assert_eq!(settings.optimize.cdn_url, None);
    }

    #[test]
    fn zero_delay_timeout_is_rejected() {
        let mut raw = RawSettings::default();
        raw.optimize.delay_timeout_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cache_policy_follows_settings() {
        let mut raw = RawSettings::default();
        raw.cache.mobile_separate = Some(true);
        raw.cache.cache_logged_in = Some(true);
        raw.cache.lifetime_seconds = Some(900);

        let settings = Settings::from_raw(raw).expect("valid settings");
        let policy = CachePolicy::from(&settings.cache);
        assert!(policy.page_cache_enabled);
        assert!(policy.mobile_separate);
        assert!(policy.cache_logged_in_users);
        assert_eq!(policy.lifetime_seconds, 900);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());
        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid {
                key: "logging.level",
                ..
            })
        ));
    }

    #[test]
    fn cli_parses_invalidate_command() {
        let args = CliArgs::try_parse_from([
            "presto",
            "invalidate",
            "--cache-directory",
            "/tmp/c",
            "/blog/post-1",
            "https://example.com/",
        ])
        .expect("valid args");

        let Some(Command::Invalidate(invalidate)) = args.command else {
            panic!("expected invalidate command");
        };
        assert_eq!(invalidate.urls, vec!["/blog/post-1", "https://example.com/"]);
        assert_eq!(
            invalidate.cache.cache_directory,
            Some(PathBuf::from("/tmp/c"))
        );
    }
}
