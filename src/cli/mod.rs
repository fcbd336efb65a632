//! Command-line front end: argument parsing, logging and the run flow.

mod progress;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::api::ListingClient;
use crate::config::AppConfig;
use crate::crawl::{build_local_tree, crawl_remote, locate_folder};
use crate::diff::diff_trees;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::lock::FolderLock;
use crate::net::spawn_ip_poller;
use crate::stats::Statistics;
use crate::sync::Syncer;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use progress::{TerminalProgress, print_diff_report, print_summary};

/// Environment variable holding the listing API key.
pub const API_KEY_ENV: &str = "MIRROR_API_KEY";

/// Parsed command-line flags. Unset options leave the config file value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub api_key: Option<String>,
    pub threads: Option<usize>,
    pub folder: Option<String>,
    pub recursive: bool,
    pub progress_interval: Option<u64>,
    pub proxy: Option<String>,
    pub debug: bool,
    pub daemon: bool,
    pub version: bool,
    pub repair: bool,
    pub analysis: bool,
    pub ignore_parallel: bool,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub help: bool,
}

fn value_for(flag: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| Error::Config(format!("{flag} requires a value")))
}

fn number_for<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T> {
    let raw = value_for(flag, value)?;
    raw.parse()
        .map_err(|_| Error::Config(format!("{flag} expects a number, got '{raw}'")))
}

impl CliArgs {
    /// Parses arguments, excluding the program name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unknown options, missing values and
    /// malformed numbers.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--apikey" => parsed.api_key = Some(value_for(&arg, args.next())?),
                "--threads" => parsed.threads = Some(number_for(&arg, args.next())?),
                "--folder" => parsed.folder = Some(value_for(&arg, args.next())?),
                "--recursive" => parsed.recursive = true,
                "--pinterval" => parsed.progress_interval = Some(number_for(&arg, args.next())?),
                "--proxy" => parsed.proxy = Some(value_for(&arg, args.next())?),
                "--debug" => parsed.debug = true,
                "--daemon" => parsed.daemon = true,
                "--version" => parsed.version = true,
                "--repair" => parsed.repair = true,
                "--analysis" => parsed.analysis = true,
                "--ignore-parallel" => parsed.ignore_parallel = true,
                "--output" => parsed.output = Some(value_for(&arg, args.next())?.into()),
                "--config" => parsed.config = Some(value_for(&arg, args.next())?.into()),
                "-h" | "--help" => parsed.help = true,
                other => return Err(Error::Config(format!("Unknown option: {other}"))),
            }
        }
        Ok(parsed)
    }

    /// Overlays the flags onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        let sync = &mut config.sync;
        if let Some(threads) = self.threads {
            *sync = sync.clone().with_threads(threads);
        }
        if let Some(secs) = self.progress_interval {
            sync.progress_interval = secs;
        }
        sync.recursive |= self.recursive;
        sync.daemon |= self.daemon;
        sync.repair |= self.repair;
        sync.analysis |= self.analysis;
        sync.ignore_parallel |= self.ignore_parallel;

        if let Some(dir) = &self.output {
            config.paths.download_dir.clone_from(dir);
        }
        if self.proxy.is_some() {
            config.api.proxy.clone_from(&self.proxy);
        }
        if let Some(key) = self
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
        {
            config.api.api_key = Some(key);
        }
    }

    /// Remote folder to sync; the account root when unset.
    #[must_use]
    pub fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or("")
    }
}

pub fn print_usage() {
    eprintln!("Usage: mirror [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --apikey <KEY>      Listing API key (or {API_KEY_ENV})");
    eprintln!("  --folder <PATH>     Remote folder, e.g. \"My Files/Movies\" (default: root)");
    eprintln!("  --threads <N>       Concurrent downloads, 1-6 (default: 1)");
    eprintln!("  --recursive         Descend into sub-folders");
    eprintln!("  --pinterval <SECS>  Progress interval (default: 5)");
    eprintln!("  --output <DIR>      Local download directory (default: .)");
    eprintln!("  --proxy <URL>       Proxy for all HTTP traffic");
    eprintln!("  --analysis          Compare local and remote trees, download nothing");
    eprintln!("  --repair            Like --analysis, deleting size-mismatched local files");
    eprintln!("  --daemon            JSON progress lines instead of a redrawn screen");
    eprintln!("  --ignore-parallel   Skip the per-folder lock file");
    eprintln!("  --config <FILE>     Config file (default: {})", AppConfig::default_path().display());
    eprintln!("  --debug             Verbose log file");
    eprintln!("  --version           Print the version");
    eprintln!("  -h, --help          Show this help");
}

/// Sends log records to `log_file`: `Debug` with `debug`, `Warn` otherwise.
/// `RUST_LOG` takes precedence.
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init_logging(log_file: &Path, debug: bool) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(log_file)?;
    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| Error::Config(format!("logger already initialised: {e}")))
}

/// Builds the HTTP client shared by listing, probing and transfers.
///
/// # Errors
///
/// Returns an error if the proxy URL is invalid.
pub fn build_http_client(proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30));
    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url)?);
    }
    Ok(builder.build()?)
}

/// Resolves on the next SIGINT.
async fn sigint() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("SIGINT handler unavailable: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Received SIGINT");
}

/// Resolves on the next SIGINT or SIGTERM (systemd sends SIGTERM).
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                () = sigint() => {}
                _ = sigterm.recv() => log::info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            log::warn!("SIGTERM handler unavailable: {e}");
            sigint().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    sigint().await;
}

/// The first signal raises graceful stop; a second one cancels `abort` so
/// the caller can return without waiting for running transfers.
pub fn spawn_signal_handler(stats: Arc<Statistics>, abort: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        stats.graceful_stop();
        shutdown_signal().await;
        log::warn!("Second shutdown signal, abandoning running transfers");
        abort.cancel();
    })
}

/// Runs one invocation of the command.
///
/// # Errors
///
/// Configuration, lock, crawl and transfer failures are returned to `main`.
pub async fn run(args: &CliArgs) -> Result<()> {
    if args.help {
        print_usage();
        return Ok(());
    }
    if args.version {
        println!("mirror-dl {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    init_logging(&config.paths.log_file, args.debug)?;

    let folder = args.folder().to_string();
    let _lock = if config.sync.ignore_parallel {
        None
    } else {
        let Some(lock) = FolderLock::acquire(&config.paths.lock_dir, &folder)? else {
            println!("Another instance is already syncing '{folder}', exiting.");
            return Ok(());
        };
        Some(lock)
    };

    let http = build_http_client(config.api.proxy.as_deref())?;
    let lister = ListingClient::new(http.clone(), &config.api.base_url, config.api.api_key.clone());
    let stats = Arc::new(Statistics::new(config.sync.idle_timeout_duration()));
    let abort = CancellationToken::new();
    spawn_signal_handler(Arc::clone(&stats), abort.clone());

    if let Some(url) = config.sync.ip_check_url.clone() {
        spawn_ip_poller(
            http.clone(),
            url,
            Arc::clone(&stats),
            config.sync.ip_refresh_duration(),
        );
    }

    let stop = stats.stop_token();
    let crawl = async {
        let folder_id = locate_folder(&lister, &folder).await?;
        crawl_remote(&lister, "", &folder_id, config.sync.recursive).await
    };
    let remote = tokio::select! {
        remote = crawl => remote?,
        () = stop.cancelled() => {
            println!("Interrupted while listing '{folder}'.");
            return Ok(());
        }
    };
    log::info!(
        "Remote tree {}: {} files, {} bytes",
        remote.path(),
        remote.file_count(),
        remote.total_size()
    );

    if config.sync.is_diff_mode() {
        let local = build_local_tree(&config.paths.download_dir.join(remote.path()))?;
        let report = diff_trees(&local, &remote, config.sync.repair);
        print_diff_report(&report);
        stats.graceful_stop();
        return Ok(());
    }

    let syncer = Syncer::new(
        Downloader::new(http, config.sync.chunk_size),
        Arc::clone(&stats),
        &config.sync,
        &config.paths.download_dir,
    );
    let progress = Arc::new(TerminalProgress::new(config.sync.daemon));
    let session = tokio::select! {
        session = syncer.run(&remote, progress) => session?,
        () = abort.cancelled() => {
            eprintln!("Interrupted again, abandoning running transfers; rerun to resume.");
            return Ok(());
        }
    };
    stats.graceful_stop();
    print_summary(&session);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        CliArgs::parse(args.iter().map(ToString::to_string))
    }

    #[test]
    fn parses_all_flags() {
        let args = parse(&[
            "--apikey", "k", "--threads", "4", "--folder", "My Files/Movies", "--recursive",
            "--pinterval", "2", "--proxy", "http://proxy:3128", "--debug", "--daemon",
            "--repair", "--analysis", "--ignore-parallel", "--output", "/srv/media",
            "--config", "/etc/mirror.toml",
        ])
        .unwrap();

        assert_eq!(args.api_key.as_deref(), Some("k"));
        assert_eq!(args.threads, Some(4));
        assert_eq!(args.folder(), "My Files/Movies");
        assert!(args.recursive && args.debug && args.daemon);
        assert!(args.repair && args.analysis && args.ignore_parallel);
        assert_eq!(args.progress_interval, Some(2));
        assert_eq!(args.proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(args.output, Some(PathBuf::from("/srv/media")));
        assert_eq!(args.config, Some(PathBuf::from("/etc/mirror.toml")));
        assert!(!args.help && !args.version);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(parse(&["--bogus"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["--threads"]), Err(Error::Config(_))));
        assert!(matches!(parse(&["--threads", "many"]), Err(Error::Config(_))));
    }

    #[test]
    fn empty_folder_means_root() {
        assert_eq!(parse(&[]).unwrap().folder(), "");
    }

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::new();
        let args = parse(&[
            "--threads", "12", "--pinterval", "3", "--output", "/data", "--daemon", "--apikey", "x",
        ])
        .unwrap();
        args.apply(&mut config);

        assert_eq!(config.sync.threads, 6);
        assert_eq!(config.sync.progress_interval, 3);
        assert!(config.sync.daemon);
        assert_eq!(config.paths.download_dir, PathBuf::from("/data"));
        assert_eq!(config.api.api_key.as_deref(), Some("x"));
        assert!(!config.sync.recursive);
    }

    #[test]
    fn builds_client_with_and_without_proxy() {
        assert!(build_http_client(None).is_ok());
        assert!(build_http_client(Some("http://127.0.0.1:3128")).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_stops_then_aborts() {
        fn send_sigterm() {
            let status = std::process::Command::new("kill")
                .args(["-TERM", &std::process::id().to_string()])
                .status()
                .unwrap();
            assert!(status.success());
        }

        let stats = Arc::new(Statistics::new(Duration::from_secs(60)));
        let abort = CancellationToken::new();
        let handle = spawn_signal_handler(Arc::clone(&stats), abort.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        send_sigterm();
        tokio::time::timeout(Duration::from_secs(5), stats.stop_token().cancelled())
            .await
            .unwrap();
        assert!(stats.is_stopped());
        assert!(!abort.is_cancelled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        send_sigterm();
        tokio::time::timeout(Duration::from_secs(5), abort.cancelled())
            .await
            .unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn logging_writes_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mirror-dl.log");
        // Another test may have installed the logger already.
        let _ = init_logging(&path, true);
        assert!(path.exists());
    }
}
