//! Shared download statistics.
//!
//! [`Statistics`] is the only structure mutated by several actors at once:
//! the scheduler registers tasks, workers add bytes, and the reporter ticks.
//! Counters are atomics; the active-task map sits behind a mutex so that a
//! tick can reset deltas, snapshot and retire tasks as one step.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::format::{format_bytes, progress_line, rate, truncate_left};

/// Longest destination path shown in human-readable ticks.
const MAX_LOCATION_WIDTH: usize = 128;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scheduled transfer.
///
/// Created when a file is dispatched, not when it is discovered.
#[derive(Debug)]
pub struct DownloadTask {
    name: String,
    location: String,
    url: String,
    size: u64,
    downloaded: AtomicU64,
    delta: AtomicU64,
}

impl DownloadTask {
    /// Creates a task with no bytes transferred yet.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        url: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            url: url.into(),
            size,
            downloaded: AtomicU64::new(0),
            delta: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full destination path; also the key in the active set.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Acquire)
    }

    /// Bytes received since the last tick.
    #[must_use]
    pub fn delta(&self) -> u64 {
        self.delta.load(Ordering::Acquire)
    }

    /// Whether every expected byte has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.downloaded() >= self.size
    }

    /// Sets the resume offset. Does not count as tick traffic.
    pub fn set_downloaded(&self, bytes: u64) {
        self.downloaded.store(bytes, Ordering::Release);
    }

    fn add_bytes(&self, bytes: u64) {
        self.delta.fetch_add(bytes, Ordering::AcqRel);
        self.downloaded.fetch_add(bytes, Ordering::AcqRel);
    }

    fn take_delta(&self) -> u64 {
        self.delta.swap(0, Ordering::AcqRel)
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            file_name: self.name.clone(),
            file_location: self.location.clone(),
            file_url: self.url.clone(),
            file_size: self.size,
            downloaded: self.downloaded(),
            delta: self.delta(),
        }
    }
}

/// Process-wide counters.
#[derive(Debug)]
pub struct GlobalStats {
    last_tick: Mutex<(DateTime<Utc>, Instant)>,
    current_ip: Mutex<String>,
    directory: Mutex<String>,
    run_files: AtomicU64,
    run_bytes: AtomicU64,
    pending_files: AtomicU64,
    pending_bytes: AtomicU64,
    completed_files: AtomicU64,
    downloaded: AtomicU64,
    delta: AtomicU64,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            last_tick: Mutex::new((Utc::now(), Instant::now())),
            current_ip: Mutex::new(String::new()),
            directory: Mutex::new(String::new()),
            run_files: AtomicU64::new(0),
            run_bytes: AtomicU64::new(0),
            pending_files: AtomicU64::new(0),
            pending_bytes: AtomicU64::new(0),
            completed_files: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            delta: AtomicU64::new(0),
        }
    }
}

/// Serializable copy of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub file_name: String,
    pub file_location: String,
    pub file_url: String,
    pub file_size: u64,
    pub downloaded: u64,
    pub delta: u64,
}

/// Serializable copy of the global counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSnapshot {
    pub last_tick: DateTime<Utc>,
    #[serde(rename = "currentIP")]
    pub current_ip: String,
    pub directory: String,
    pub total_files: u64,
    pub total_size: u64,
    pub pending_files: u64,
    pub pending_size: u64,
    pub downloaded_files: u64,
    pub downloaded: u64,
    pub delta: u64,
    /// Bytes per second over the interval that just ended.
    pub speed: u64,
}

/// Serializable copy of the whole tracker as seen by one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub global: GlobalSnapshot,
    pub tasks: Vec<TaskSnapshot>,
}

/// Summary of a finished (or stopped) run.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Number of files retired as complete.
    pub files_downloaded: u64,
    /// Number of files handed to workers.
    pub files_dispatched: u64,
    /// Bytes counted as downloaded, including bytes resumed from disk.
    pub total_bytes: u64,
    /// Total elapsed time for the session.
    pub elapsed: Duration,
    /// Whether the run ended through graceful stop.
    pub stopped: bool,
}

impl SessionStats {
    /// Returns the average download speed in bytes per second.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.total_bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Global counters, the active-task set and the stop conditions.
#[derive(Debug)]
pub struct Statistics {
    global: GlobalStats,
    tasks: Mutex<BTreeMap<String, Arc<DownloadTask>>>,
    retired: Notify,
    stop: CancellationToken,
    started: Instant,
    idle_timeout: Duration,
    last_activity_ms: AtomicU64,
    dispatched: AtomicU64,
    stopped_by_idle: AtomicBool,
}

impl Statistics {
    /// Creates an empty tracker that considers the run stalled after
    /// `idle_timeout` without traffic.
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            global: GlobalStats::default(),
            tasks: Mutex::new(BTreeMap::new()),
            retired: Notify::new(),
            stop: CancellationToken::new(),
            started: Instant::now(),
            idle_timeout,
            last_activity_ms: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            stopped_by_idle: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Run setup
    // ------------------------------------------------------------------

    /// Sets the file and byte totals of the run.
    pub fn set_totals(&self, files: u64, bytes: u64) {
        let g = &self.global;
        g.run_files.store(files, Ordering::Release);
        g.run_bytes.store(bytes, Ordering::Release);
        g.pending_files.store(files, Ordering::Release);
        g.pending_bytes.store(bytes, Ordering::Release);
    }

    /// Sets the root directory shown in reports.
    pub fn set_directory(&self, directory: impl Into<String>) {
        *lock(&self.global.directory) = directory.into();
    }

    /// Records the latest egress IP.
    pub fn set_current_ip(&self, ip: impl Into<String>) {
        *lock(&self.global.current_ip) = ip.into();
    }

    #[must_use]
    pub fn current_ip(&self) -> String {
        lock(&self.global.current_ip).clone()
    }

    // ------------------------------------------------------------------
    // Scheduler side
    // ------------------------------------------------------------------

    /// Waits until the active set holds fewer than `limit` tasks.
    ///
    /// Returns `false` if graceful stop is raised while waiting.
    pub async fn wait_for_slot(&self, limit: usize) -> bool {
        loop {
            if self.is_stopped() {
                return false;
            }
            let retired = self.retired.notified();
            if self.active_count() < limit {
                return true;
            }
            tokio::select! {
                () = retired => {}
                () = self.stop.cancelled() => return false,
            }
        }
    }

    /// Adds a dispatched task to the active set.
    pub fn register_task(&self, task: Arc<DownloadTask>) {
        let mut tasks = lock(&self.tasks);
        tasks.insert(task.location().to_string(), task);
    }

    /// Removes a file of `size` bytes from the run entirely, e.g. when it
    /// cannot be dispatched.
    pub fn skip_file(&self, size: u64) {
        let g = &self.global;
        for (counter, amount) in [
            (&g.run_files, 1),
            (&g.pending_files, 1),
            (&g.run_bytes, size),
            (&g.pending_bytes, size),
        ] {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(amount))
            });
        }
    }

    /// Moves a file of `size` bytes out of the pending totals.
    pub fn mark_dispatched(&self, size: u64) {
        let g = &self.global;
        let _ = g
            .pending_files
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
        let _ = g
            .pending_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(size))
            });
        self.dispatched.fetch_add(1, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    /// Records `bytes` received for `task` on both task and global counters.
    pub fn add_bytes(&self, task: &DownloadTask, bytes: u64) {
        task.add_bytes(bytes);
        self.global.downloaded.fetch_add(bytes, Ordering::AcqRel);
        self.global.delta.fetch_add(bytes, Ordering::AcqRel);
        self.touch();
    }

    /// Counts bytes already on disk from an earlier run.
    pub fn add_resumed(&self, bytes: u64) {
        self.global.downloaded.fetch_add(bytes, Ordering::AcqRel);
        self.touch();
    }

    /// Takes back bytes previously counted by [`Self::add_resumed`].
    pub fn rewind(&self, bytes: u64) {
        let _ = self
            .global
            .downloaded
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(bytes))
            });
    }

    // ------------------------------------------------------------------
    // Stop conditions
    // ------------------------------------------------------------------

    /// Marks the present instant as the last moment of activity.
    #[allow(clippy::cast_possible_truncation)]
    pub fn touch(&self) {
        let ms = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(ms, Ordering::AcqRel);
    }

    /// Raises the cooperative stop flag.
    pub fn graceful_stop(&self) {
        self.stop.cancel();
    }

    /// Raises the stop flag because the run went idle.
    pub fn idle_stop(&self) {
        self.stopped_by_idle.store(true, Ordering::Release);
        self.stop.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Whether the stop was caused by the idle timeout.
    #[must_use]
    pub fn stopped_by_idle(&self) -> bool {
        self.stopped_by_idle.load(Ordering::Acquire)
    }

    /// Token cancelled on graceful stop.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// True when no byte has been added for longer than the idle timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn idle_timeout_exceeded(&self) -> bool {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Acquire);
        now.saturating_sub(last) > self.idle_timeout.as_millis() as u64
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    /// Number of tasks currently counted against the concurrency limit.
    #[must_use]
    pub fn active_count(&self) -> usize {
        lock(&self.tasks).len()
    }

    /// Whether a task for `location` is in the active set.
    #[must_use]
    pub fn is_active(&self, location: &str) -> bool {
        lock(&self.tasks).contains_key(location)
    }

    #[must_use]
    pub fn completed_files(&self) -> u64 {
        self.global.completed_files.load(Ordering::Acquire)
    }

    /// Cumulative bytes counted as downloaded.
    #[must_use]
    pub fn downloaded(&self) -> u64 {
        self.global.downloaded.load(Ordering::Acquire)
    }

    /// Global bytes since the last tick.
    #[must_use]
    pub fn delta(&self) -> u64 {
        self.global.delta.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending_files(&self) -> u64 {
        self.global.pending_files.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.global.pending_bytes.load(Ordering::Acquire)
    }

    /// Builds the end-of-run summary.
    #[must_use]
    pub fn session_stats(&self, elapsed: Duration) -> SessionStats {
        SessionStats {
            files_downloaded: self.completed_files(),
            files_dispatched: self.dispatched.load(Ordering::Acquire),
            total_bytes: self.downloaded(),
            elapsed,
            stopped: self.is_stopped(),
        }
    }

    /// Current state without side effects.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let tasks = lock(&self.tasks);
        let last_tick = lock(&self.global.last_tick);
        let delta = self.delta();
        StatsSnapshot {
            global: self.global_snapshot(last_tick.0, delta, rate(delta, last_tick.1.elapsed())),
            tasks: tasks.values().map(|t| t.snapshot()).collect(),
        }
    }

    fn global_snapshot(&self, last_tick: DateTime<Utc>, delta: u64, speed: u64) -> GlobalSnapshot {
        let g = &self.global;
        GlobalSnapshot {
            last_tick,
            current_ip: lock(&g.current_ip).clone(),
            directory: lock(&g.directory).clone(),
            total_files: g.run_files.load(Ordering::Acquire),
            total_size: g.run_bytes.load(Ordering::Acquire),
            pending_files: g.pending_files.load(Ordering::Acquire),
            pending_size: g.pending_bytes.load(Ordering::Acquire),
            downloaded_files: g.completed_files.load(Ordering::Acquire),
            downloaded: g.downloaded.load(Ordering::Acquire),
            delta,
            speed,
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Samples the tracker and retires finished tasks.
    ///
    /// Every delta is reset to zero and attributed to the interval that just
    /// ended. Tasks with `downloaded >= size` leave the active set, bump the
    /// completed-file counter and free one slot for the scheduler. Returns the
    /// rendered snapshot, JSON unless `human_readable` is set.
    pub fn tick(&self, human_readable: bool) -> String {
        let (snapshot, retired, interval) = {
            let mut tasks = lock(&self.tasks);
            let mut last_tick = lock(&self.global.last_tick);
            let interval = last_tick.1.elapsed();

            let global_delta = self.global.delta.swap(0, Ordering::AcqRel);
            let mut task_snapshots = Vec::with_capacity(tasks.len());
            let mut finished = Vec::new();
            for (location, task) in tasks.iter() {
                let delta = task.take_delta();
                let mut snap = task.snapshot();
                snap.delta = delta;
                if snap.downloaded >= snap.file_size {
                    finished.push(location.clone());
                }
                task_snapshots.push(snap);
            }
            for location in &finished {
                tasks.remove(location);
                self.global.completed_files.fetch_add(1, Ordering::AcqRel);
            }

            let previous = last_tick.0;
            *last_tick = (Utc::now(), Instant::now());
            let snapshot = StatsSnapshot {
                global: self.global_snapshot(previous, global_delta, rate(global_delta, interval)),
                tasks: task_snapshots,
            };
            (snapshot, finished.len(), interval)
        };

        for _ in 0..retired {
            self.retired.notify_one();
        }
        if retired > 0 {
            log::debug!("Tick retired {retired} task(s)");
        }

        if human_readable {
            render_human(&snapshot, interval)
        } else {
            serde_json::to_string(&snapshot).unwrap_or_default()
        }
    }
}

/// Human-readable rendering of a tick snapshot.
#[must_use]
pub fn render_human(snapshot: &StatsSnapshot, interval: Duration) -> String {
    let g = &snapshot.global;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Current IP: {} and last tick {}",
        if g.current_ip.is_empty() { "unknown" } else { &g.current_ip },
        g.last_tick.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "Current directory: {}", g.directory);
    let _ = writeln!(
        out,
        "Download statistics: {} ({}) out of {} ({}), {} queued",
        g.downloaded_files,
        format_bytes(g.downloaded),
        g.total_files,
        format_bytes(g.total_size),
        g.pending_files
    );
    let _ = writeln!(out, "{}", progress_line(g.downloaded, g.total_size, g.speed));
    let _ = writeln!(out, "Downloading {} files:", snapshot.tasks.len());

    for task in &snapshot.tasks {
        let _ = writeln!(out, "{}", truncate_left(&task.file_location, MAX_LOCATION_WIDTH));
        let _ = writeln!(
            out,
            "Download statistic: {} out of {}",
            format_bytes(task.downloaded),
            format_bytes(task.file_size)
        );
        let _ = writeln!(
            out,
            "{}",
            progress_line(task.downloaded, task.file_size, rate(task.delta, interval))
        );
    }
    out
}
