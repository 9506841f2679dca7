//! Application configuration for imageset.
//!
//! User config lives at `~/.imageset/imageset.toml`.
//! CLI flags override config file values, which override defaults.
//! Everything is merged into an immutable [`BuildConfig`] that is handed to
//! each pipeline component when it is constructed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DatasetError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "imageset.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".imageset";

/// Accepted range for `max_images_per_query`.
pub const MAX_IMAGES_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

/// Accepted range for `max_concurrent_downloads`.
pub const CONCURRENCY_RANGE: std::ops::RangeInclusive<usize> = 1..=10;

// ---------------------------------------------------------------------------
// Config structs (matching imageset.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Dataset defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Image search provider settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Page and image download settings.
    #[serde(default)]
    pub http: HttpConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Dataset output root.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Maximum search hits kept per query.
    #[serde(default = "default_max_images")]
    pub max_images_per_query: usize,

    /// Worker count of the per-query fan-out.
    #[serde(default = "default_concurrency")]
    pub max_concurrent_downloads: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_images_per_query: default_max_images(),
            max_concurrent_downloads: default_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "dataset".into()
}
fn default_max_images() -> usize {
    10
}
fn default_concurrency() -> usize {
    5
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Name of the env var holding the search API key (never store the key itself).
    #[serde(default = "default_serp_key_env")]
    pub api_key_env: String,

    /// Search endpoint.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Calls allowed per rate-limit window.
    #[serde(default = "default_rate_limit_calls")]
    pub rate_limit_calls: u32,

    /// Length of the rate-limit window in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Request timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_serp_key_env(),
            endpoint: default_search_endpoint(),
            rate_limit_calls: default_rate_limit_calls(),
            rate_limit_window_secs: default_rate_limit_window(),
            timeout_secs: default_search_timeout(),
        }
    }
}

fn default_serp_key_env() -> String {
    "SERP_API_KEY".into()
}
fn default_search_endpoint() -> String {
    "https://serpapi.com/search.json".into()
}
fn default_rate_limit_calls() -> u32 {
    100
}
fn default_rate_limit_window() -> u64 {
    60
}
fn default_search_timeout() -> u64 {
    30
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the LLM API key.
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model used to expand prompts into domains.
    #[serde(default = "default_model")]
    pub analysis_model: String,

    /// Vision model used for captions.
    #[serde(default = "default_model")]
    pub caption_model: String,

    /// Request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_llm_key_env(),
            base_url: default_llm_base_url(),
            analysis_model: default_model(),
            caption_model: default_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "chatgpt-4o-latest".into()
}
fn default_llm_timeout() -> u64 {
    60
}

/// `[http]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Timeout for page scrapes and image downloads, in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// User-Agent sent with page and image requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// JPEG quality (1-100) of stored images.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Allow downloads from loopback/private hosts.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            user_agent: default_user_agent(),
            jpeg_quality: default_jpeg_quality(),
            allow_private_hosts: false,
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into()
}
fn default_jpeg_quality() -> u8 {
    75
}

// ---------------------------------------------------------------------------
// Build config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Values supplied on the command line; `None` falls back to the config file.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    pub output_dir: Option<PathBuf>,
    pub max_images_per_query: Option<usize>,
    pub max_concurrent_downloads: Option<usize>,
    pub serp_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

/// Resolved search settings.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub api_key: ApiKey,
    pub endpoint: Url,
    pub max_results: usize,
    pub rate_limit_calls: u32,
    pub rate_limit_window: Duration,
    pub timeout: Duration,
}

/// Resolved LLM settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: ApiKey,
    pub base_url: Url,
    pub analysis_model: String,
    pub caption_model: String,
    pub timeout: Duration,
}

/// Resolved download settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub jpeg_quality: u8,
    pub allow_private_hosts: bool,
}

/// Immutable runtime configuration of one dataset builder.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Root directory; images go to `<root>/images`, metadata to `<root>/metadata.json`.
    pub output_root: PathBuf,
    /// Worker count of the per-query fan-out.
    pub max_concurrent_downloads: usize,
    pub search: SearchSettings,
    pub llm: LlmSettings,
    pub http: HttpSettings,
}

impl BuildConfig {
    /// Merge the config file with CLI overrides, reading credentials from the
    /// process environment.
    pub fn resolve(app: &AppConfig, overrides: &BuildOverrides) -> Result<Self> {
        Self::resolve_with_env(app, overrides, |name| std::env::var(name).ok())
    }

    /// Like [`BuildConfig::resolve`], with an explicit environment lookup.
    pub fn resolve_with_env(
        app: &AppConfig,
        overrides: &BuildOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let max_images = overrides
            .max_images_per_query
            .unwrap_or(app.defaults.max_images_per_query);
        if !MAX_IMAGES_RANGE.contains(&max_images) {
            return Err(DatasetError::config(format!(
                "max_images_per_query must be within {}..={}, got {max_images}",
                MAX_IMAGES_RANGE.start(),
                MAX_IMAGES_RANGE.end()
            )));
        }

        let concurrency = overrides
            .max_concurrent_downloads
            .unwrap_or(app.defaults.max_concurrent_downloads);
        if !CONCURRENCY_RANGE.contains(&concurrency) {
            return Err(DatasetError::config(format!(
                "max_concurrent_downloads must be within {}..={}, got {concurrency}",
                CONCURRENCY_RANGE.start(),
                CONCURRENCY_RANGE.end()
            )));
        }

        if app.search.rate_limit_calls == 0 || app.search.rate_limit_window_secs == 0 {
            return Err(DatasetError::config(
                "search rate limit calls and window must both be positive",
            ));
        }

        if app.search.timeout_secs == 0 {
            return Err(DatasetError::config("search timeout_secs must be positive"));
        }

        if !(1..=100).contains(&app.http.jpeg_quality) {
            return Err(DatasetError::config(format!(
                "jpeg_quality must be within 1..=100, got {}",
                app.http.jpeg_quality
            )));
        }

        let output_root = app.output_root(overrides.output_dir.as_deref());

        let serp_key = resolve_key(
            overrides.serp_api_key.as_deref(),
            &app.search.api_key_env,
            "search",
            &env,
        )?;
        let openai_key = resolve_key(
            overrides.openai_api_key.as_deref(),
            &app.llm.api_key_env,
            "LLM",
            &env,
        )?;

        Ok(Self {
            output_root,
            max_concurrent_downloads: concurrency,
            search: SearchSettings {
                api_key: serp_key,
                endpoint: parse_url(&app.search.endpoint, "search.endpoint")?,
                max_results: max_images,
                rate_limit_calls: app.search.rate_limit_calls,
                rate_limit_window: Duration::from_secs(app.search.rate_limit_window_secs),
                timeout: Duration::from_secs(app.search.timeout_secs),
            },
            llm: LlmSettings {
                api_key: openai_key,
                base_url: parse_url(&app.llm.base_url, "llm.base_url")?,
                analysis_model: app.llm.analysis_model.clone(),
                caption_model: app.llm.caption_model.clone(),
                timeout: Duration::from_secs(app.llm.timeout_secs),
            },
            http: HttpSettings {
                timeout: Duration::from_secs(app.http.timeout_secs),
                user_agent: app.http.user_agent.clone(),
                jpeg_quality: app.http.jpeg_quality,
                allow_private_hosts: app.http.allow_private_hosts,
            },
        })
    }

    /// Directory holding the normalized images.
    pub fn images_dir(&self) -> PathBuf {
        self.output_root.join("images")
    }

    /// Path of the persisted dataset snapshot.
    pub fn metadata_path(&self) -> PathBuf {
        metadata_path(&self.output_root)
    }
}

/// Path of the dataset snapshot under an output root.
pub fn metadata_path(output_root: &Path) -> PathBuf {
    output_root.join("metadata.json")
}

impl AppConfig {
    /// Dataset root: the explicit directory if given, else `defaults.output_dir`
    /// with `~/` expanded.
    pub fn output_root(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(dir) => dir.to_path_buf(),
            None => expand_home(&self.defaults.output_dir),
        }
    }
}

/// Pick the CLI value, else the named env var; blank values count as missing.
fn resolve_key(
    flag: Option<&str>,
    env_name: &str,
    label: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<ApiKey> {
    let value = flag
        .map(str::to_string)
        .filter(|v| !v.trim().is_empty())
        .or_else(|| env(env_name).filter(|v| !v.trim().is_empty()));

    value.map(ApiKey::new).ok_or_else(|| {
        DatasetError::config(format!(
            "{label} API key not found. Pass it as a flag or set the {env_name} environment variable."
        ))
    })
}

fn parse_url(raw: &str, field: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| DatasetError::config(format!("invalid {field} '{raw}': {e}")))
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.imageset/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| DatasetError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.imageset/imageset.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| DatasetError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DatasetError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DatasetError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DatasetError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
