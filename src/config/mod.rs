//! Configuration types for sync operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowest accepted number of concurrent transfers.
pub const MIN_THREADS: usize = 1;
/// Highest accepted number of concurrent transfers.
pub const MAX_THREADS: usize = 6;

/// Default listing API endpoint.
pub const DEFAULT_API_BASE: &str = "https://www.premiumize.me/api";
/// Default egress IP echo endpoint.
pub const DEFAULT_IP_CHECK_URL: &str = "https://httpbin.org/get";

/// Engine configuration for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of files transferred concurrently (clamped to 1..=6).
    pub threads: usize,
    /// Whether to descend into remote sub-folders.
    pub recursive: bool,
    /// Seconds between progress ticks.
    pub progress_interval: u64,
    /// Seconds without any received byte before the run is considered stalled.
    pub idle_timeout: u64,
    /// Size in bytes of each streamed write increment.
    pub chunk_size: usize,
    /// Compare local against remote and delete size-mismatched local files.
    pub repair: bool,
    /// Compare local against remote and only report.
    pub analysis: bool,
    /// Emit machine-readable (JSON) progress instead of text.
    pub daemon: bool,
    /// Skip the per-folder lockfile.
    pub ignore_parallel: bool,
    /// Endpoint used to discover the egress IP, `None` disables polling.
    pub ip_check_url: Option<String>,
    /// Seconds between egress IP refreshes.
    pub ip_refresh: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            recursive: false,
            progress_interval: 5,
            idle_timeout: 300,
            chunk_size: 1024,
            repair: false,
            analysis: false,
            daemon: false,
            ignore_parallel: false,
            ip_check_url: Some(DEFAULT_IP_CHECK_URL.to_string()),
            ip_refresh: 60,
        }
    }
}

impl SyncConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of concurrent transfers, clamped to the accepted range.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.clamp(MIN_THREADS, MAX_THREADS);
        self
    }

    /// Sets whether remote sub-folders are crawled.
    #[must_use]
    pub const fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Sets the progress tick interval in seconds.
    #[must_use]
    pub const fn with_progress_interval(mut self, secs: u64) -> Self {
        self.progress_interval = secs;
        self
    }

    /// Sets the idle timeout in seconds.
    #[must_use]
    pub const fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout = secs;
        self
    }

    /// Sets the streamed write increment.
    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Enables repair mode.
    #[must_use]
    pub const fn with_repair(mut self, repair: bool) -> Self {
        self.repair = repair;
        self
    }

    /// Enables analysis-only mode.
    #[must_use]
    pub const fn with_analysis(mut self, analysis: bool) -> Self {
        self.analysis = analysis;
        self
    }

    /// Enables JSON progress output.
    #[must_use]
    pub const fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Number of concurrent transfers after clamping.
    #[must_use]
    pub fn clamped_threads(&self) -> usize {
        self.threads.clamp(MIN_THREADS, MAX_THREADS)
    }

    /// Tick interval, never shorter than one second.
    #[must_use]
    pub fn progress_interval_duration(&self) -> Duration {
        Duration::from_secs(self.progress_interval.max(1))
    }

    /// Idle timeout as a duration.
    #[must_use]
    pub const fn idle_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Egress IP refresh period, never shorter than one second.
    #[must_use]
    pub fn ip_refresh_duration(&self) -> Duration {
        Duration::from_secs(self.ip_refresh.max(1))
    }

    /// Whether the run compares trees instead of downloading.
    #[must_use]
    pub const fn is_diff_mode(&self) -> bool {
        self.repair || self.analysis
    }
}

/// Path configuration for downloads, locks and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory the remote tree is mirrored into.
    pub download_dir: PathBuf,
    /// Directory where configuration files are read from.
    pub config_dir: PathBuf,
    /// Directory holding per-folder lockfiles.
    pub lock_dir: PathBuf,
    /// Log file written by the CLI.
    pub log_file: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            download_dir: PathBuf::from("."),
            config_dir: config_dir.join("mirror-dl"),
            lock_dir: PathBuf::from("."),
            log_file: PathBuf::from("mirror-dl.log"),
        }
    }
}

/// Remote listing API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the listing API.
    pub base_url: String,
    /// API key, usually supplied through `MIRROR_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Proxy for every outgoing request (`proto://host:port`).
    pub proxy: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            api_key: None,
            proxy: None,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine configuration.
    pub sync: SyncConfig,
    /// Path configuration.
    pub paths: PathConfig,
    /// API configuration.
    pub api: ApiConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the configuration file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathConfig::default().config_dir.join("config.toml")
    }

    /// Loads configuration from `path` (or the default location).
    ///
    /// A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        if !path.exists() {
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration TOML.
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.sync.threads = config.sync.clamped_threads();
        Ok(config)
    }
}
