//! Periodic trigger (`site-factory tick`).
//!
//! For every site, in order, each step only when there is work:
//!
//! 1. generate content for pages that have none or carry a directive
//! 2. build when a page changed after the last build
//! 3. deploy when the site was deployed before and its newest build has
//!    never been pushed (a rolled-back site stays rolled back)
//!
//! Each step runs as a job and is waited on before the next. A busy site is
//! skipped, a failed step ends that site's run. Running it twice in a row
//! does nothing the second time.

use crate::jobs::{ContentScope, JobError, JobPayload, JobRunner, JobState};
use crate::pipeline::Pipeline;
use crate::status::{self, StatusError};
use crate::store::StoreError;
use crate::types::SiteId;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// What happened to one site during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStep {
    Generated,
    Built,
    Deployed,
    /// A step's job ended in a non-success state.
    Stopped { step: &'static str, state: JobState, cause: Option<String> },
    Busy,
    NoSynthesizer,
}

impl fmt::Display for TickStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated => f.write_str("generated"),
            Self::Built => f.write_str("built"),
            Self::Deployed => f.write_str("deployed"),
            Self::Stopped { step, state, cause } => {
                write!(f, "{step} {state}")?;
                if let Some(cause) = cause {
                    write!(f, ": {cause}")?;
                }
                Ok(())
            }
            Self::Busy => f.write_str("busy, skipped"),
            Self::NoSynthesizer => f.write_str("content pending, synthesis not configured"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub site: SiteId,
    pub steps: Vec<TickStep>,
}

enum StepResult {
    Done,
    Stop(TickStep),
}

fn run_step(
    runner: &JobRunner,
    site: SiteId,
    step: &'static str,
    payload: JobPayload,
) -> Result<StepResult, TriggerError> {
    let handle = match runner.enqueue(site, payload) {
        Ok(handle) => handle,
        Err(JobError::SiteBusy { .. }) => return Ok(StepResult::Stop(TickStep::Busy)),
        Err(e) => return Err(e.into()),
    };
    let record = handle.wait()?;
    if record.state == JobState::Succeeded {
        Ok(StepResult::Done)
    } else {
        warn!(site = %site, step, state = %record.state, "tick step did not succeed");
        Ok(StepResult::Stop(TickStep::Stopped {
            step,
            state: record.state,
            cause: record.cause,
        }))
    }
}

fn tick_site(runner: &JobRunner, pipeline: &Pipeline, site: SiteId) -> Result<TickReport, TriggerError> {
    let store = runner.store();
    let mut steps = Vec::new();
    let report = |steps: Vec<TickStep>| TickReport { site, steps };

    let summary = status::summarize(store, site)?;
    if summary.active_job.is_some() {
        return Ok(report(vec![TickStep::Busy]));
    }

    let pending = summary.pages_total - summary.pages_generated + summary.pending_directives;
    if pending > 0 {
        if !pipeline.can_synthesize() {
            steps.push(TickStep::NoSynthesizer);
        } else {
            let payload = JobPayload::Generate {
                scope: ContentScope::Site,
                force: false,
                directive: None,
            };
            match run_step(runner, site, "generate", payload)? {
                StepResult::Done => steps.push(TickStep::Generated),
                StepResult::Stop(stop) => {
                    steps.push(stop);
                    return Ok(report(steps));
                }
            }
        }
    }

    let summary = status::summarize(store, site)?;
    if summary.needs_rebuild && summary.pages_generated > 0 {
        match run_step(runner, site, "build", JobPayload::Build)? {
            StepResult::Done => steps.push(TickStep::Built),
            StepResult::Stop(stop) => {
                steps.push(stop);
                return Ok(report(steps));
            }
        }
    }

    let site_record = store.load_site(site)?;
    let remote = store.load_remote_state(site)?;
    let newest_pushed = remote.retained_versions.iter().max().copied();
    let behind = site_record
        .last_built_version
        .is_some_and(|built| newest_pushed.is_none_or(|pushed| built > pushed));
    if site_record.deployed_at.is_some() && behind && pipeline.can_deploy() {
        match run_step(runner, site, "deploy", JobPayload::Deploy { version: None })? {
            StepResult::Done => steps.push(TickStep::Deployed),
            StepResult::Stop(stop) => steps.push(stop),
        }
    }
    Ok(report(steps))
}

/// Run one trigger pass over every site.
pub fn tick(runner: &JobRunner, pipeline: &Pipeline) -> Result<Vec<TickReport>, TriggerError> {
    let mut reports = Vec::new();
    for site in runner.store().site_ids()? {
        let report = tick_site(runner, pipeline, site)?;
        if !report.steps.is_empty() {
            info!(site = %site, steps = report.steps.len(), "tick");
        }
        reports.push(report);
    }
    Ok(reports)
}
