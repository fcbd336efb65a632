//! Bounded-concurrency sync of a remote tree into a local directory.
//!
//! Three actors share one [`Statistics`]:
//!
//! - a producer that walks the tree in dispatch order and admits a file
//!   only while fewer than `threads` tasks are active,
//! - a pool of `threads` workers pulling tasks from a bounded channel,
//! - a reporter that ticks the tracker on a fixed interval.
//!
//! Tasks leave the active set only when a tick retires them, so a slot is
//! freed at the reporter's pace rather than the moment a transfer ends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::download::Downloader;
use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::stats::{DownloadTask, SessionStats, Statistics};
use crate::tree::DirectoryNode;

/// Why the reporter stopped before the run drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Graceful stop was requested (signal or fatal worker error).
    Graceful,
    /// No byte arrived within the idle timeout.
    IdleTimeout,
}

/// Receives rendered ticks; the presentation layer owns the terminal.
pub trait ProgressReporter: Send + Sync {
    /// Called with every rendered tick, including the final one.
    fn on_tick(&self, _report: &str) {}

    /// Called at most once, when the run is first stopped early.
    fn on_stop(&self, _reason: StopReason) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}

/// One file as the producer sees it.
struct Pending {
    name: String,
    destination: PathBuf,
    link: Option<String>,
    size: u64,
}

/// Runs a sync of one remote tree.
pub struct Syncer<F: FileSystem = TokioFileSystem> {
    downloader: Arc<Downloader<F>>,
    stats: Arc<Statistics>,
    threads: usize,
    tick_every: Duration,
    human_readable: bool,
    download_dir: PathBuf,
}

impl<F: FileSystem + 'static> Syncer<F> {
    /// Creates a syncer writing below `download_dir`.
    #[must_use]
    pub fn new(
        downloader: Downloader<F>,
        stats: Arc<Statistics>,
        config: &SyncConfig,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader: Arc::new(downloader),
            stats,
            threads: config.clamped_threads(),
            tick_every: config.progress_interval_duration(),
            human_readable: !config.daemon,
            download_dir: download_dir.into(),
        }
    }

    /// Overrides the reporter interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, every: Duration) -> Self {
        self.tick_every = every;
        self
    }

    #[must_use]
    pub const fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Downloads every file of `tree` that is not already complete on disk.
    ///
    /// Returns when the producer has dispatched everything and the workers
    /// have drained, or earlier on graceful stop.
    ///
    /// # Errors
    ///
    /// The first failed transfer stops the run and is returned as
    /// [`Error::Worker`].
    pub async fn run(
        &self,
        tree: &DirectoryNode,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<SessionStats> {
        let started = Instant::now();
        let stats = &self.stats;
        stats.set_directory(tree.path());
        stats.set_totals(tree.file_count(), tree.total_size());
        stats.touch();

        log::info!(
            "Syncing {} ({} files) with {} worker(s)",
            tree.path(),
            tree.file_count(),
            self.threads
        );

        let reporter_done = CancellationToken::new();
        let idle = CancellationToken::new();
        let reporter = self.spawn_reporter(Arc::clone(&progress), reporter_done.clone(), idle.clone());

        let (tx, rx) = mpsc::channel(self.threads);
        let producer = self.spawn_producer(self.pending_files(tree), tx);
        let mut workers = self.spawn_workers(rx);

        let mut failure = None;
        let mut aborted = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        if failure.is_none() {
                            stats.graceful_stop();
                            workers.abort_all();
                            aborted = true;
                            failure = Some(e);
                        }
                    }
                    Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Some(Err(_)) => {}
                },
                () = idle.cancelled(), if !aborted => {
                    log::warn!("Abandoning in-flight transfers after idle timeout");
                    workers.abort_all();
                    aborted = true;
                }
            }
        }

        match producer.await {
            Ok(dispatched) => log::debug!("Producer finished after {dispatched} file(s)"),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => {}
        }

        reporter_done.cancel();
        if let Err(e) = reporter.await
            && e.is_panic()
        {
            std::panic::resume_unwind(e.into_panic());
        }
        progress.on_tick(&stats.tick(self.human_readable));

        if let Some(e) = failure {
            return Err(e);
        }
        Ok(stats.session_stats(started.elapsed()))
    }

    fn pending_files(&self, tree: &DirectoryNode) -> Vec<Pending> {
        tree.dispatch_order()
            .into_iter()
            .map(|file| Pending {
                name: file.name.clone(),
                destination: self.download_dir.join(file.full_path()),
                link: file.link.clone(),
                size: file.size,
            })
            .collect()
    }

    fn spawn_reporter(
        &self,
        progress: Arc<dyn ProgressReporter>,
        done: CancellationToken,
        idle: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(&self.stats);
        let stop = stats.stop_token();
        let human = self.human_readable;
        let mut interval = tokio::time::interval(self.tick_every.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            interval.tick().await;
            let mut stop_reported = false;
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled(), if !stop_reported => {
                        stop_reported = true;
                        let reason = if stats.stopped_by_idle() {
                            StopReason::IdleTimeout
                        } else {
                            StopReason::Graceful
                        };
                        progress.on_stop(reason);
                    }
                    () = done.cancelled() => break,
                    _ = interval.tick() => {
                        // Stalls are watched after a graceful stop too.
                        if !idle.is_cancelled() && stats.idle_timeout_exceeded() {
                            log::warn!("No data received within the idle timeout, stopping");
                            stats.idle_stop();
                            idle.cancel();
                        }
                        progress.on_tick(&stats.tick(human));
                    }
                }
            }
        })
    }

    fn spawn_producer(
        &self,
        files: Vec<Pending>,
        tx: mpsc::Sender<Arc<DownloadTask>>,
    ) -> tokio::task::JoinHandle<u64> {
        let stats = Arc::clone(&self.stats);
        let threads = self.threads;
        let stop = stats.stop_token();

        tokio::spawn(async move {
            let mut dispatched = 0;
            for file in files {
                if !stats.wait_for_slot(threads).await {
                    log::info!("Stop requested, no further files dispatched");
                    break;
                }
                let Some(link) = file.link else {
                    log::warn!("{} has no download link, skipping", file.destination.display());
                    stats.skip_file(file.size);
                    continue;
                };

                let task = Arc::new(DownloadTask::new(
                    file.name,
                    file.destination.to_string_lossy(),
                    link,
                    file.size,
                ));
                stats.register_task(Arc::clone(&task));
                stats.mark_dispatched(file.size);
                log::info!("Dispatching {}", task.location());

                tokio::select! {
                    sent = tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    () = stop.cancelled() => break,
                }
                dispatched += 1;
            }
            dispatched
        })
    }

    fn spawn_workers(&self, rx: mpsc::Receiver<Arc<DownloadTask>>) -> JoinSet<Result<()>> {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();

        for worker in 1..=self.threads {
            let rx = Arc::clone(&rx);
            let stats = Arc::clone(&self.stats);
            let downloader = Arc::clone(&self.downloader);

            workers.spawn(async move {
                log::debug!("Worker {worker} started");
                loop {
                    if stats.is_stopped() {
                        break;
                    }
                    let next = rx.lock().await.recv().await;
                    let Some(task) = next else { break };
                    if stats.is_stopped() {
                        break;
                    }

                    log::debug!("Worker {worker} took {}", task.location());
                    if let Err(e) = downloader.download(&task, &stats).await {
                        log::error!("Worker {worker} failed on {}: {e}", task.location());
                        if let Ok(state) = serde_json::to_string(&task.snapshot()) {
                            log::debug!("Task state: {state}");
                        }
                        return Err(Error::Worker {
                            worker,
                            source: Box::new(e),
                        });
                    }
                }
                log::debug!("Worker {worker} exiting");
                Ok(())
            });
        }
        workers
    }
}
