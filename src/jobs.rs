//! Background job runner.
//!
//! Long operations (content generation, builds, deploys) run on a
//! `rayon::ThreadPool` off the caller's path. [`JobRunner::enqueue`] returns a
//! [`JobHandle`] immediately; progress lives in a persisted [`JobRecord`] that
//! any process can read cheaply and repeatedly.
//!
//! ## One job per site
//!
//! `enqueue` takes the site's lock *before* anything else. A held lock means
//! the request is rejected with [`JobError::SiteBusy`] and no record is
//! written. The lock moves into the worker and is released just before the
//! record turns terminal, so a caller that observes a terminal record can
//! enqueue the next job immediately.
//!
//! ## Records
//!
//! ```text
//! data/jobs/{job_id}.json     # JobRecord, rewritten atomically on progress
//! data/jobs/{job_id}.cancel   # present once cancellation was requested
//! ```
//!
//! The cancel marker is a separate file so a worker's progress writes can
//! never clobber a cancellation request. Workers poll it between units only.

use crate::lock::{self, LockError, SiteLock};
use crate::store::{Store, StoreError, read_json, write_json_atomic};
use crate::types::{PageId, SiteId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("site {site} is busy with job {holder}")]
    SiteBusy { site: SiteId, holder: String },
    #[error("job {0} not found")]
    NotFound(String),
    #[error("thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("timed out waiting for job {0}")]
    WaitTimeout(String),
}

impl From<LockError> for JobError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy { site, holder } => JobError::SiteBusy { site, holder },
            LockError::Io(e) => JobError::Io(e),
        }
    }
}

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Content,
    Build,
    Deploy,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Content => "content",
            Self::Build => "build",
            Self::Deploy => "deploy",
        })
    }
}

/// Which pages a content job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentScope {
    /// Every page of the site.
    Site,
    /// Only pages without content; keeps a built/deployed status.
    NewPagesOnly,
    /// One page; all-or-nothing.
    Page(PageId),
}

/// What a job does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum JobPayload {
    Generate {
        scope: ContentScope,
        #[serde(default)]
        force: bool,
        /// Stored on the page once the job holds the site lock; `Page` scope
        /// only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directive: Option<String>,
    },
    Build,
    Deploy {
        #[serde(default)]
        version: Option<u32>,
    },
    Rollback,
}

impl JobPayload {
    pub fn stage(&self) -> StageKind {
        match self {
            Self::Generate { .. } => StageKind::Content,
            Self::Build => StageKind::Build,
            Self::Deploy { .. } | Self::Rollback => StageKind::Deploy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Persisted progress of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub site_id: SiteId,
    pub stage: StageKind,
    pub payload: JobPayload,
    pub total_units: u32,
    pub completed_units: u32,
    pub state: JobState,
    #[serde(default)]
    pub cause: Option<String>,
    /// Derived from the cancel marker on load; not authoritative on disk.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: Timestamp,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub finished_at: Option<Timestamp>,
}

fn record_path(store: &Store, id: &str) -> PathBuf {
    store.jobs_dir().join(format!("{id}.json"))
}

fn cancel_path(store: &Store, id: &str) -> PathBuf {
    store.jobs_dir().join(format!("{id}.cancel"))
}

/// Read a job record.
pub fn load_job(store: &Store, id: &str) -> Result<JobRecord, JobError> {
    let mut record: JobRecord =
        read_json(&record_path(store, id))?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
    record.cancel_requested = cancel_path(store, id).exists();
    Ok(record)
}

fn save_job(store: &Store, record: &JobRecord) -> Result<(), JobError> {
    write_json_atomic(&record_path(store, &record.id), record)?;
    Ok(())
}

/// All job records for a site, newest first.
pub fn list_jobs(store: &Store, site: SiteId) -> Result<Vec<JobRecord>, JobError> {
    let mut jobs = Vec::new();
    for entry in fs::read_dir(store.jobs_dir())? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(id) = path.file_stem().and_then(|s| s.to_str())
        {
            let record = load_job(store, id)?;
            if record.site_id == site {
                jobs.push(record);
            }
        }
    }
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(jobs)
}

/// Ask a job to stop at its next unit boundary.
///
/// Returns the record as it stands; a job that already finished is left as is.
pub fn request_cancel(store: &Store, id: &str) -> Result<JobRecord, JobError> {
    let record = load_job(store, id)?;
    if !record.state.is_terminal() {
        fs::write(cancel_path(store, id), Utc::now().to_rfc3339())?;
        info!(job = %id, site = %record.site_id, "cancellation requested");
    }
    load_job(store, id)
}

/// Fail queued or running records whose site lock is no longer held by them.
///
/// These are jobs from a process that died mid-run. Returns how many were
/// marked.
pub fn recover_orphans(store: &Store) -> Result<usize, JobError> {
    let mut recovered = 0;
    for entry in fs::read_dir(store.jobs_dir())? {
        let path = entry?.path();
        if !path.extension().is_some_and(|e| e == "json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let mut record = load_job(store, id)?;
        if record.state.is_terminal() {
            continue;
        }
        let held = lock::holder(&store.locks_dir(), record.site_id)?
            .is_some_and(|h| h.job_id == record.id);
        if !held {
            record.state = JobState::Failed;
            record.cause = Some("interrupted: worker process exited".to_string());
            record.finished_at = Some(Utc::now());
            save_job(store, &record)?;
            warn!(job = %record.id, site = %record.site_id, "marked orphaned job failed");
            recovered += 1;
        }
    }
    Ok(recovered)
}

// ============================================================================
// Worker-side context
// ============================================================================

/// How a handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Progress and cancellation hooks handed to a running job.
///
/// Shared by reference across the handler's own parallel units, so every
/// update goes through a mutex.
pub struct JobContext {
    store: Store,
    record: Mutex<JobRecord>,
}

impl JobContext {
    pub(crate) fn new(store: Store, record: JobRecord) -> Self {
        Self {
            store,
            record: Mutex::new(record),
        }
    }

    pub fn job_id(&self) -> String {
        self.snapshot().id
    }

    pub fn site_id(&self) -> SiteId {
        self.snapshot().site_id
    }

    pub fn snapshot(&self) -> JobRecord {
        match self.record.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update<F: FnOnce(&mut JobRecord)>(&self, f: F) {
        let mut guard = match self.record.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard);
        if let Err(e) = save_job(&self.store, &guard) {
            warn!(job = %guard.id, error = %e, "failed to persist job progress");
        }
    }

    /// Declare how many units this job will process.
    pub fn set_total(&self, total: u32) {
        self.update(|r| r.total_units = total);
    }

    /// Mark one more unit done.
    pub fn advance(&self) {
        self.update(|r| r.completed_units = (r.completed_units + 1).min(r.total_units.max(1)));
    }

    /// Whether cancellation was requested. Check between units only.
    pub fn cancel_requested(&self) -> bool {
        let id = self.snapshot().id;
        cancel_path(&self.store, &id).exists()
    }
}

/// Executes job payloads. Implemented by the pipeline; tests plug in fakes.
pub trait JobHandler: Send + Sync {
    fn run(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Outcome, HandlerError>;

    /// Called after a job fails, before its record turns terminal, while the
    /// site lock is still held.
    fn on_failure(&self, _site: SiteId, _payload: &JobPayload, _cause: &str) {}
}

// ============================================================================
// Runner
// ============================================================================

/// Owns the worker pool and dispatches jobs to a [`JobHandler`].
pub struct JobRunner {
    store: Store,
    pool: Arc<rayon::ThreadPool>,
    handler: Arc<dyn JobHandler>,
}

impl JobRunner {
    pub fn new(store: Store, workers: usize, handler: Arc<dyn JobHandler>) -> Result<Self, JobError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("job-worker-{i}"))
            .build()?;
        Ok(Self {
            store,
            pool: Arc::new(pool),
            handler,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Start a job for `site`. Never blocks on the job itself.
    ///
    /// Fails with [`JobError::SiteBusy`] when the site already has a job.
    pub fn enqueue(&self, site: SiteId, payload: JobPayload) -> Result<JobHandle, JobError> {
        let id = Uuid::new_v4().to_string();
        let lock = lock::acquire(&self.store.locks_dir(), site, &id)?;
        let record = JobRecord {
            id: id.clone(),
            site_id: site,
            stage: payload.stage(),
            payload,
            total_units: 0,
            completed_units: 0,
            state: JobState::Queued,
            cause: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        save_job(&self.store, &record)?;
        info!(job = %id, site = %site, stage = %record.stage, "enqueued job");

        let store = self.store.clone();
        let handler = Arc::clone(&self.handler);
        self.pool
            .spawn(move || execute(store, handler, record, lock));
        Ok(JobHandle {
            id,
            store: self.store.clone(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn execute(store: Store, handler: Arc<dyn JobHandler>, mut record: JobRecord, lock: SiteLock) {
    let site = record.site_id;
    let payload = record.payload.clone();
    record.state = JobState::Running;
    record.started_at = Some(Utc::now());
    if let Err(e) = save_job(&store, &record) {
        warn!(job = %record.id, error = %e, "failed to persist running state");
    }

    let ctx = JobContext::new(store.clone(), record);
    let result = if ctx.cancel_requested() {
        Ok(Ok(Outcome::Cancelled))
    } else {
        panic::catch_unwind(AssertUnwindSafe(|| handler.run(&ctx, &payload)))
    };

    let (state, cause) = match result {
        Ok(Ok(Outcome::Completed)) => (JobState::Succeeded, None),
        Ok(Ok(Outcome::Cancelled)) => (JobState::Cancelled, None),
        Ok(Err(e)) => (JobState::Failed, Some(e.to_string())),
        Err(panic) => (
            JobState::Failed,
            Some(format!("job panicked: {}", panic_message(panic.as_ref()))),
        ),
    };
    if let Some(cause) = &cause {
        handler.on_failure(site, &payload, cause);
    }

    let mut record = ctx.snapshot();
    record.state = state;
    record.cause = cause;
    record.finished_at = Some(Utc::now());
    drop(lock);
    match &record.cause {
        Some(cause) => error!(job = %record.id, site = %site, cause = %cause, "job failed"),
        None => info!(job = %record.id, site = %site, state = %record.state, "job finished"),
    }
    if let Err(e) = save_job(&store, &record) {
        error!(job = %record.id, error = %e, "failed to persist terminal state");
    }
}

/// Caller-side handle on an enqueued job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: String,
    store: Store,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current persisted record.
    pub fn status(&self) -> Result<JobRecord, JobError> {
        load_job(&self.store, &self.id)
    }

    /// Poll until the job is terminal. Used by the CLI and tests.
    pub fn wait(&self) -> Result<JobRecord, JobError> {
        self.wait_timeout(Duration::from_secs(60 * 60))
    }

    pub fn wait_timeout(&self, limit: Duration) -> Result<JobRecord, JobError> {
        let deadline = std::time::Instant::now() + limit;
        loop {
            let record = self.status()?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            if std::time::Instant::now() >= deadline {
                return Err(JobError::WaitTimeout(self.id.clone()));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}
