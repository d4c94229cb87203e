//! Inbox watcher and worker pool.
//!
//! The watcher polls the inbox directory, dispatches each newly seen file to
//! a bounded pool of pipeline tasks, and runs retention purges at most once
//! per configured interval. Purges are triggered both by file arrivals and
//! by a dedicated timer, so an idle inbox does not stall them.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use walkdir::WalkDir;

use crate::archive::PurgeReport;
use crate::config::Config;
use crate::db;
use crate::ingest::{FileOutcome, Pipeline};
use crate::migrate;
use crate::store::MeasurementStore;

/// Throttle for retention sweeps, owned by one watcher instance.
#[derive(Debug, Clone)]
pub struct MaintenanceSchedule {
    interval: Duration,
    last_run: Option<Instant>,
}

impl MaintenanceSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` (and records `now`) when a sweep is due.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        let due = match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_run = Some(now);
        }
        due
    }
}

/// Running totals of file outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub archived: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub purged: u64,
}

pub struct Watcher {
    pipeline: Arc<Pipeline>,
    inbox: PathBuf,
    extension: String,
    poll_interval: Duration,
    retention: Duration,
    maintenance: MaintenanceSchedule,
    permits: Arc<Semaphore>,
    in_flight: HashSet<PathBuf>,
    /// Rejected files that could not be moved aside; skipped until restart.
    stuck: HashSet<PathBuf>,
    tasks: JoinSet<FileOutcome>,
    task_paths: HashMap<Id, PathBuf>,
    stats: WatcherStats,
}

impl Watcher {
    pub fn new(pipeline: Arc<Pipeline>, config: &Config) -> Self {
        Self {
            pipeline,
            inbox: config.inbox.path.clone(),
            extension: config.inbox.extension().to_string(),
            poll_interval: config.poll_interval(),
            retention: config.retention(),
            maintenance: MaintenanceSchedule::new(config.purge_interval()),
            permits: Arc::new(Semaphore::new(config.pipeline.workers)),
            in_flight: HashSet::new(),
            stuck: HashSet::new(),
            tasks: JoinSet::new(),
            task_paths: HashMap::new(),
            stats: WatcherStats::default(),
        }
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs until `shutdown` resolves, then lets in-flight files finish.
    pub async fn run<F>(mut self, shutdown: F) -> Result<WatcherStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut purge = tokio::time::interval(self.maintenance.interval());
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            inbox = %self.inbox.display(),
            extension = %self.extension,
            poll_ms = self.poll_interval.as_millis() as u64,
            "watching inbox"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.tick().await;
                }
                _ = purge.tick() => {
                    self.maybe_purge().await;
                }
                _ = &mut shutdown => {
                    tracing::info!(in_flight = self.in_flight.len(), "shutdown requested; draining");
                    break;
                }
            }
        }

        self.drain().await;
        tracing::info!(
            archived = self.stats.archived,
            rejected = self.stats.rejected,
            deferred = self.stats.deferred,
            purged = self.stats.purged,
            "watcher stopped"
        );
        Ok(self.stats)
    }

    /// One scan: reaps finished tasks, dispatches new arrivals, and runs a
    /// purge if arrivals were seen and one is due. Returns the number of
    /// files dispatched.
    pub async fn tick(&mut self) -> usize {
        self.reap();

        let mut dispatched = 0;
        for path in self.scan() {
            if self.in_flight.contains(&path) || self.stuck.contains(&path) {
                continue;
            }
            self.dispatch(path);
            dispatched += 1;
        }

        if dispatched > 0 {
            self.maybe_purge().await;
        }
        dispatched
    }

    /// Waits for every in-flight file to finish.
    pub async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.record(joined);
        }
    }

    /// Runs a purge sweep if the schedule allows it.
    pub async fn maybe_purge(&mut self) -> Option<PurgeReport> {
        if !self.maintenance.try_begin(Instant::now()) {
            return None;
        }

        let archiver = self.pipeline.archiver().clone();
        let retention = self.retention;
        match tokio::task::spawn_blocking(move || archiver.purge_older_than(retention)).await {
            Ok(report) => {
                tracing::info!(
                    scanned = report.scanned,
                    removed = report.removed.len(),
                    failed = report.failed,
                    "retention purge finished"
                );
                self.stats.purged += report.removed.len() as u64;
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "retention purge task failed");
                None
            }
        }
    }

    fn dispatch(&mut self, path: PathBuf) {
        self.in_flight.insert(path.clone());
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();

        let task_path = path.clone();
        let handle = self.tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await;
            pipeline.process(&task_path).await
        });
        self.task_paths.insert(handle.id(), path);
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            self.record(joined);
        }
    }

    fn record(&mut self, joined: Result<(Id, FileOutcome), JoinError>) {
        let (id, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                self.record_crash(e);
                return;
            }
        };
        let Some(path) = self.task_paths.remove(&id) else {
            tracing::error!(task = %id, "finished task has no recorded path");
            return;
        };
        self.in_flight.remove(&path);

        match outcome {
            FileOutcome::Archived { .. } => self.stats.archived += 1,
            FileOutcome::Deferred { .. } => self.stats.deferred += 1,
            FileOutcome::Rejected { moved_to, .. } => {
                self.stats.rejected += 1;
                if moved_to.is_none() {
                    self.stuck.insert(path);
                }
            }
        }
    }

    /// A task that died without an outcome: its file is moved aside like
    /// any other rejection.
    fn record_crash(&mut self, error: JoinError) {
        let Some(path) = self.task_paths.remove(&error.id()) else {
            tracing::error!(task = %error.id(), error = %error, "pipeline task failed");
            return;
        };
        self.in_flight.remove(&path);
        self.stats.rejected += 1;

        match self.pipeline.archiver().reject(&path) {
            Ok(dest) => tracing::error!(
                path = %path.display(),
                error = %error,
                moved_to = %dest.display(),
                "pipeline task failed; file rejected"
            ),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %error,
                    move_error = %e,
                    "pipeline task failed; file could not be moved aside"
                );
                self.stuck.insert(path);
            }
        }
    }

    /// Files in the inbox (non-recursive) with the configured extension.
    fn scan(&self) -> Vec<PathBuf> {
        if !self.inbox.is_dir() {
            tracing::warn!(inbox = %self.inbox.display(), "inbox directory missing");
            return Vec::new();
        }

        let mut paths: Vec<PathBuf> = WalkDir::new(&self.inbox)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "could not list inbox entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| matches_extension(path, &self.extension))
            .collect();
        paths.sort();
        paths
    }
}

fn matches_extension(path: &Path, extension: &str) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    !hidden
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false)
}

/// Creates the working directories named in the configuration.
pub fn ensure_directories(config: &Config) -> Result<()> {
    for dir in [
        &config.inbox.path,
        &config.archive.path,
        &config.archive.rejected_path,
    ] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// CLI entry point for `srwatch watch`: runs until Ctrl+C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    ensure_directories(config)?;

    let store = Arc::new(MeasurementStore::new(pool.clone()));
    let pipeline = Arc::new(Pipeline::from_config(config, store));
    let watcher = Watcher::new(pipeline, config);

    let stats = watcher
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    println!("watch stopped");
    println!("  archived: {}", stats.archived);
    println!("  rejected: {}", stats.rejected);
    println!("  deferred: {}", stats.deferred);
    println!("  purged: {}", stats.purged);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_throttles() {
        let mut schedule = MaintenanceSchedule::new(Duration::from_secs(3600));
        let start = Instant::now();

        assert!(schedule.try_begin(start));
        assert!(!schedule.try_begin(start + Duration::from_secs(10)));
        assert!(!schedule.try_begin(start + Duration::from_secs(3599)));
        assert!(schedule.try_begin(start + Duration::from_secs(3600)));
        assert!(!schedule.try_begin(start + Duration::from_secs(3601)));
    }

    #[test]
    fn test_schedules_are_independent() {
        let now = Instant::now();
        let mut a = MaintenanceSchedule::new(Duration::from_secs(60));
        let mut b = MaintenanceSchedule::new(Duration::from_secs(60));
        assert!(a.try_begin(now));
        assert!(b.try_begin(now));
    }

    #[test]
    fn test_matches_extension() {
        assert!(matches_extension(Path::new("/in/a.json"), "json"));
        assert!(matches_extension(Path::new("/in/A.JSON"), "json"));
        assert!(!matches_extension(Path::new("/in/a.json.tmp"), "json"));
        assert!(!matches_extension(Path::new("/in/.a.json"), "json"));
        assert!(!matches_extension(Path::new("/in/noext"), "json"));
    }
}
