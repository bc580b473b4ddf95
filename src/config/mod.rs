//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashSet,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::valid_family_id;
use crate::http::ValidatorScheme;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "viewcache";
const ENV_PREFIX: &str = "VIEWCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;

const DEFAULT_MAX_ITEMS: u64 = 500;
const DEFAULT_PRUNE_TARGET_RATIO: f64 = 0.8;
const DEFAULT_PREFETCH_THRESHOLD: f64 = 0.1;
const DEFAULT_PRIORITY_PREFETCH_THRESHOLD: f64 = 0.2;
const DEFAULT_SLOW_FETCH_THRESHOLD_MS: u64 = 1_000;
const DEFAULT_SLOW_FETCH_TTL_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_ADAPTIVE_TTL_SECS: u64 = 3_600;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STATS_WINDOW_SECS: u64 = 60;

const DEFAULT_WARM_BATCH_SIZE: u64 = 4;
const DEFAULT_WARM_BATCH_PAUSE_MS: u64 = 100;
const DEFAULT_INVALIDATE_DEBOUNCE_MS: u64 = 500;
const DEFAULT_FAMILY_WARM_LIMIT: u64 = 10;

const DEFAULT_CACHE_CONTROL_MARGIN_SECS: u64 = 10;
const DEFAULT_STALE_WHILE_REVALIDATE_SECS: u64 = 60;
const STALE_WHILE_REVALIDATE_RANGE: (u64, u64) = (30, 60);
const DEFAULT_COMPRESSION_MIN_BYTES: u64 = 1_024;

const DEFAULT_VIEW_TTL_SECS: u64 = 300;
const RESERVED_PATH_PREFIXES: [&str; 2] = ["/_cache", "/_health"];
const FAMILY_PLACEHOLDER: &str = "{id}";

/// Command-line arguments for the viewcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "viewcache",
    version,
    about = "Read-through view cache for dashboard endpoints"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VIEWCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching HTTP server.
    Serve(Box<ServeArgs>),
    /// Load and validate configuration, then print a summary.
    #[command(name = "check-config")]
    CheckConfig,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Override the cache capacity.
    #[arg(long = "cache-max-items", value_name = "COUNT")]
    pub cache_max_items: Option<u64>,

    /// Override the fetch timeout; 0 disables it.
    #[arg(long = "cache-fetch-timeout-ms", value_name = "MILLIS")]
    pub cache_fetch_timeout_ms: Option<u64>,

    /// Toggle coalescing of concurrent misses for one key.
    #[arg(
        long = "cache-coalesce-misses",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_coalesce_misses: Option<bool>,

    /// Toggle warming the cache at startup.
    #[arg(
        long = "warm-on-startup",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub warm_on_startup: Option<bool>,

    /// Override the validator scheme (content_hash|time_bucket).
    #[arg(long = "http-validator", value_name = "SCHEME")]
    pub http_validator: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub warming: WarmingSettings,
    pub http: HttpSettings,
    pub views: Vec<ViewSettings>,
    pub families: Vec<FamilySettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_items: NonZeroUsize,
    pub prune_target_ratio: f64,
    pub prefetch_threshold: f64,
    pub priority_prefetch_threshold: f64,
    pub slow_fetch_threshold: Duration,
    pub slow_fetch_ttl_multiplier: f64,
    pub max_adaptive_ttl: Duration,
    /// `None` when disabled.
    pub fetch_timeout: Option<Duration>,
    pub coalesce_misses: bool,
    pub stats_window: Duration,
}

#[derive(Debug, Clone)]
pub struct WarmingSettings {
    pub on_startup: bool,
    pub batch_size: NonZeroUsize,
    pub batch_pause: Duration,
    pub invalidate_debounce: Duration,
    pub family_warm_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub cache_control_margin: Duration,
    pub stale_while_revalidate: Duration,
    pub compression_min_bytes: usize,
    pub validator: ValidatorScheme,
    pub build_tag: String,
}

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub key: String,
    pub path: String,
    pub upstream_url: String,
    pub ttl: Duration,
    pub priority: bool,
    pub critical: bool,
}

#[derive(Debug, Clone)]
pub struct FamilySettings {
    pub name: String,
    pub path: String,
    /// Contains `{id}`, substituted per parameter value.
    pub upstream_url: String,
    pub ttl: Duration,
    pub priority: bool,
    pub warm_ids: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig) | None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
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
    warming: RawWarmingSettings,
    http: RawHttpSettings,
    views: Vec<RawViewSettings>,
    families: Vec<RawFamilySettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
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
        if let Some(max_items) = overrides.cache_max_items {
            self.cache.max_items = Some(max_items);
        }
        if let Some(timeout) = overrides.cache_fetch_timeout_ms {
            self.cache.fetch_timeout_ms = Some(timeout);
        }
        if let Some(coalesce) = overrides.cache_coalesce_misses {
            self.cache.coalesce_misses = Some(coalesce);
        }
        if let Some(on_startup) = overrides.warm_on_startup {
            self.warming.on_startup = Some(on_startup);
        }
        if let Some(validator) = overrides.http_validator.as_ref() {
            self.http.validator = Some(validator.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            warming,
            http,
            views,
            families,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let warming = build_warming_settings(warming)?;
        let http = build_http_settings(http)?;
        let views = build_view_settings(views)?;
        let families = build_family_settings(families)?;
        check_paths(&views, &families)?;

        Ok(Self {
            server,
            logging,
            cache,
            warming,
            http,
            views,
            families,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

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
        addr,
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
    let max_items = non_zero_usize(
        cache.max_items.unwrap_or(DEFAULT_MAX_ITEMS),
        "cache.max_items",
    )?;

    let prune_target_ratio = cache
        .prune_target_ratio
        .unwrap_or(DEFAULT_PRUNE_TARGET_RATIO);
    if !(prune_target_ratio > 0.0 && prune_target_ratio <= 1.0) {
        return Err(LoadError::invalid(
            "cache.prune_target_ratio",
            "must be in (0, 1]",
        ));
    }

    let prefetch_threshold = unit_fraction(
        cache.prefetch_threshold.unwrap_or(DEFAULT_PREFETCH_THRESHOLD),
        "cache.prefetch_threshold",
    )?;
    let priority_prefetch_threshold = unit_fraction(
        cache
            .priority_prefetch_threshold
            .unwrap_or(DEFAULT_PRIORITY_PREFETCH_THRESHOLD),
        "cache.priority_prefetch_threshold",
    )?;

    let slow_fetch_ttl_multiplier = cache
        .slow_fetch_ttl_multiplier
        .unwrap_or(DEFAULT_SLOW_FETCH_TTL_MULTIPLIER);
    if !(slow_fetch_ttl_multiplier >= 1.0 && slow_fetch_ttl_multiplier.is_finite()) {
        return Err(LoadError::invalid(
            "cache.slow_fetch_ttl_multiplier",
            "must be a finite value of at least 1.0",
        ));
    }

    let max_adaptive_ttl_secs = cache
        .max_adaptive_ttl_secs
        .unwrap_or(DEFAULT_MAX_ADAPTIVE_TTL_SECS);
    if max_adaptive_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.max_adaptive_ttl_secs",
            "must be greater than zero",
        ));
    }

    let stats_window_secs = cache.stats_window_secs.unwrap_or(DEFAULT_STATS_WINDOW_SECS);
    if stats_window_secs == 0 {
        return Err(LoadError::invalid(
            "cache.stats_window_secs",
            "must be greater than zero",
        ));
    }

    let fetch_timeout_ms = cache.fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);

    Ok(CacheSettings {
        max_items,
        prune_target_ratio,
        prefetch_threshold,
        priority_prefetch_threshold,
        slow_fetch_threshold: Duration::from_millis(
            cache
                .slow_fetch_threshold_ms
                .unwrap_or(DEFAULT_SLOW_FETCH_THRESHOLD_MS),
        ),
        slow_fetch_ttl_multiplier,
        max_adaptive_ttl: Duration::from_secs(max_adaptive_ttl_secs),
        fetch_timeout: (fetch_timeout_ms > 0).then(|| Duration::from_millis(fetch_timeout_ms)),
        coalesce_misses: cache.coalesce_misses.unwrap_or(true),
        stats_window: Duration::from_secs(stats_window_secs),
    })
}

fn build_warming_settings(warming: RawWarmingSettings) -> Result<WarmingSettings, LoadError> {
    Ok(WarmingSettings {
        on_startup: warming.on_startup.unwrap_or(true),
        batch_size: non_zero_usize(
            warming.batch_size.unwrap_or(DEFAULT_WARM_BATCH_SIZE),
            "warming.batch_size",
        )?,
        batch_pause: Duration::from_millis(
            warming.batch_pause_ms.unwrap_or(DEFAULT_WARM_BATCH_PAUSE_MS),
        ),
        invalidate_debounce: Duration::from_millis(
            warming
                .invalidate_debounce_ms
                .unwrap_or(DEFAULT_INVALIDATE_DEBOUNCE_MS),
        ),
        family_warm_limit: non_zero_usize(
            warming
                .family_warm_limit
                .unwrap_or(DEFAULT_FAMILY_WARM_LIMIT),
            "warming.family_warm_limit",
        )?,
    })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let (min_swr, max_swr) = STALE_WHILE_REVALIDATE_RANGE;
    let stale_while_revalidate = http
        .stale_while_revalidate_secs
        .unwrap_or(DEFAULT_STALE_WHILE_REVALIDATE_SECS)
        .clamp(min_swr, max_swr);

    let validator = match http.validator {
        Some(value) => ValidatorScheme::from_str(&value)
            .map_err(|reason| LoadError::invalid("http.validator", reason))?,
        None => ValidatorScheme::default(),
    };

    let compression_min_bytes = usize::try_from(
        http.compression_min_bytes
            .unwrap_or(DEFAULT_COMPRESSION_MIN_BYTES),
    )
    .map_err(|_| {
        LoadError::invalid(
            "http.compression_min_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    let build_tag = http
        .build_tag
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    Ok(HttpSettings {
        cache_control_margin: Duration::from_secs(
            http.cache_control_margin_secs
                .unwrap_or(DEFAULT_CACHE_CONTROL_MARGIN_SECS),
        ),
        stale_while_revalidate: Duration::from_secs(stale_while_revalidate),
        compression_min_bytes,
        validator,
        build_tag,
    })
}

fn build_view_settings(views: Vec<RawViewSettings>) -> Result<Vec<ViewSettings>, LoadError> {
    let mut keys = HashSet::new();
    views
        .into_iter()
        .enumerate()
        .map(|(index, view)| {
            let field = |name: &str| format!("views[{index}].{name}");

            let key = required(view.key, &field("key"))?;
            if key.contains(':') {
                return Err(LoadError::invalid(field("key"), "must not contain `:`"));
            }
            if !keys.insert(key.clone()) {
                return Err(LoadError::invalid(
                    field("key"),
                    format!("duplicate view key `{key}`"),
                ));
            }

            Ok(ViewSettings {
                path: required(view.path, &field("path"))?,
                upstream_url: upstream_url(view.upstream_url, &field("upstream_url"), false)?,
                ttl: ttl(view.ttl_secs, &field("ttl_secs"))?,
                priority: view.priority.unwrap_or(false),
                critical: view.critical.unwrap_or(false),
                key,
            })
        })
        .collect()
}

fn build_family_settings(
    families: Vec<RawFamilySettings>,
) -> Result<Vec<FamilySettings>, LoadError> {
    let mut names = HashSet::new();
    families
        .into_iter()
        .enumerate()
        .map(|(index, family)| {
            let field = |name: &str| format!("families[{index}].{name}");

            let name = required(family.name, &field("name"))?;
            if name.contains(':') {
                return Err(LoadError::invalid(field("name"), "must not contain `:`"));
            }
            if !names.insert(name.clone()) {
                return Err(LoadError::invalid(
                    field("name"),
                    format!("duplicate family `{name}`"),
                ));
            }

            let path = required(family.path, &field("path"))?;
            if !path.contains(FAMILY_PLACEHOLDER) {
                return Err(LoadError::invalid(
                    field("path"),
                    format!("must contain `{FAMILY_PLACEHOLDER}`"),
                ));
            }

            if let Some(bad) = family.warm_ids.iter().find(|id| !valid_family_id(id)) {
                return Err(LoadError::invalid(
                    field("warm_ids"),
                    format!("`{bad}` is not a URL-safe id"),
                ));
            }

            Ok(FamilySettings {
                path,
                upstream_url: upstream_url(family.upstream_url, &field("upstream_url"), true)?,
                ttl: ttl(family.ttl_secs, &field("ttl_secs"))?,
                priority: family.priority.unwrap_or(false),
                warm_ids: family.warm_ids,
                name,
            })
        })
        .collect()
}

fn check_paths(views: &[ViewSettings], families: &[FamilySettings]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    let paths = views
        .iter()
        .map(|view| (format!("views.{}.path", view.key), &view.path))
        .chain(
            families
                .iter()
                .map(|family| (format!("families.{}.path", family.name), &family.path)),
        );

    for (field, path) in paths {
        if !path.starts_with('/') {
            return Err(LoadError::invalid(field, "must start with `/`"));
        }
        if RESERVED_PATH_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
        {
            return Err(LoadError::invalid(field, "path is reserved for control routes"));
        }
        if !seen.insert(path.as_str()) {
            return Err(LoadError::invalid(field, format!("duplicate path `{path}`")));
        }
    }
    Ok(())
}

fn required(value: Option<String>, field: &str) -> Result<String, LoadError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid(field, "must be set"))
}

fn upstream_url(
    value: Option<String>,
    field: &str,
    needs_placeholder: bool,
) -> Result<String, LoadError> {
    let url = required(value, field)?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(LoadError::invalid(field, "must be an http(s) URL"));
    }
    if needs_placeholder && !url.contains(FAMILY_PLACEHOLDER) {
        return Err(LoadError::invalid(
            field,
            format!("must contain `{FAMILY_PLACEHOLDER}`"),
        ));
    }
    Ok(url)
}

fn ttl(value: Option<u64>, field: &str) -> Result<Duration, LoadError> {
    let secs = value.unwrap_or(DEFAULT_VIEW_TTL_SECS);
    if secs == 0 {
        return Err(LoadError::invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

fn unit_fraction(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(LoadError::invalid(key, "must be between 0 and 1"))
    }
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
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
    max_items: Option<u64>,
    prune_target_ratio: Option<f64>,
    prefetch_threshold: Option<f64>,
    priority_prefetch_threshold: Option<f64>,
    slow_fetch_threshold_ms: Option<u64>,
    slow_fetch_ttl_multiplier: Option<f64>,
    max_adaptive_ttl_secs: Option<u64>,
    fetch_timeout_ms: Option<u64>,
    coalesce_misses: Option<bool>,
    stats_window_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmingSettings {
    on_startup: Option<bool>,
    batch_size: Option<u64>,
    batch_pause_ms: Option<u64>,
    invalidate_debounce_ms: Option<u64>,
    family_warm_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    cache_control_margin_secs: Option<u64>,
    stale_while_revalidate_secs: Option<u64>,
    compression_min_bytes: Option<u64>,
    validator: Option<String>,
    build_tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawViewSettings {
    key: Option<String>,
    path: Option<String>,
    upstream_url: Option<String>,
    ttl_secs: Option<u64>,
    priority: Option<bool>,
    critical: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFamilySettings {
    name: Option<String>,
    path: Option<String>,
    upstream_url: Option<String>,
    ttl_secs: Option<u64>,
    priority: Option<bool>,
    warm_ids: Vec<String>,
}
