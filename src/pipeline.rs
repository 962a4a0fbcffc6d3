//! Wires the stages into the job runner.
//!
//! [`Pipeline`] is the [`JobHandler`] every job runs through: it dispatches a
//! payload to the content, build, or deploy stage and moves the site to
//! `failed` when a stage gives up. [`precheck`] rejects requests that cannot
//! succeed before a job is created.

use crate::builder::Builder;
use crate::config::FactoryConfig;
use crate::content::ContentStage;
use crate::deploy::{self, DeployError, Deployer};
use crate::jobs::{ContentScope, HandlerError, JobContext, JobHandler, JobPayload, Outcome};
use crate::release::ReleaseStore;
use crate::remote::Remote;
use crate::status;
use crate::store::{Store, StoreError};
use crate::synth::Synthesizer;
use crate::types::SiteId;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum PrecheckError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error("content synthesis is not configured: {0}")]
    NoSynthesizer(String),
    #[error("deploy target is not configured: {0}")]
    NoRemote(String),
    #[error("a directive applies to a single page")]
    DirectiveScope,
}

pub struct Pipeline {
    store: Store,
    releases: ReleaseStore,
    /// `Err` holds why the collaborator is unavailable. Only deploy jobs
    /// need a remote and only content jobs need a synthesizer.
    remote: Result<Arc<dyn Remote>, String>,
    synth: Result<Arc<dyn Synthesizer>, String>,
    concurrency: usize,
    retention: usize,
    tls_email: Option<String>,
}

impl Pipeline {
    pub fn new(
        store: Store,
        releases: ReleaseStore,
        remote: Result<Arc<dyn Remote>, String>,
        synth: Result<Arc<dyn Synthesizer>, String>,
    ) -> Self {
        Self {
            store,
            releases,
            remote,
            synth,
            concurrency: 5,
            retention: 3,
            tls_email: None,
        }
    }

    /// Apply the `[content]` and `[deploy]` settings.
    pub fn configure(mut self, config: &FactoryConfig) -> Self {
        self.concurrency = config.content.concurrency;
        self.retention = config.deploy.retention;
        self.tls_email = config.deploy.tls_email.clone();
        self
    }

    pub fn can_synthesize(&self) -> bool {
        self.synth.is_ok()
    }

    pub fn can_deploy(&self) -> bool {
        self.remote.is_ok()
    }

    fn deployer(&self) -> Result<Deployer<'_>, PrecheckError> {
        let remote = self
            .remote
            .as_ref()
            .map_err(|reason| PrecheckError::NoRemote(reason.clone()))?;
        Ok(Deployer::new(&self.store, &self.releases, remote.as_ref())
            .with_retention(self.retention)
            .with_tls_email(self.tls_email.clone()))
    }

    /// Reject a request up front when it is bound to fail.
    pub fn precheck(&self, site: SiteId, payload: &JobPayload) -> Result<(), PrecheckError> {
        self.store.load_site(site)?;
        match payload {
            JobPayload::Generate {
                scope, directive, ..
            } => {
                if let Err(reason) = &self.synth {
                    return Err(PrecheckError::NoSynthesizer(reason.clone()));
                }
                if directive.is_some() && !matches!(scope, ContentScope::Page(_)) {
                    return Err(PrecheckError::DirectiveScope);
                }
                if let ContentScope::Page(page) = scope {
                    self.store.load_page(site, *page)?;
                }
            }
            JobPayload::Deploy { .. } => {
                self.deployer()?;
            }
            JobPayload::Rollback => {
                self.deployer()?;
                deploy::check_rollback(&self.store, site)?;
            }
            JobPayload::Build => {}
        }
        Ok(())
    }
}

impl JobHandler for Pipeline {
    fn run(&self, ctx: &JobContext, payload: &JobPayload) -> Result<Outcome, HandlerError> {
        match payload {
            JobPayload::Generate {
                scope,
                force,
                directive,
            } => {
                let synth = self
                    .synth
                    .as_ref()
                    .map_err(|reason| PrecheckError::NoSynthesizer(reason.clone()))?;
                Ok(ContentStage::new(&self.store, synth.as_ref(), self.concurrency)
                    .run(ctx, scope, *force, directive.as_deref())?)
            }
            JobPayload::Build => Ok(Builder::new(&self.store, &self.releases).run(ctx)?),
            JobPayload::Deploy { version } => Ok(self.deployer()?.run(ctx, *version)?),
            JobPayload::Rollback => {
                self.deployer()?.rollback(ctx)?;
                Ok(Outcome::Completed)
            }
        }
    }

    fn on_failure(&self, site: SiteId, _payload: &JobPayload, cause: &str) {
        if let Err(e) = status::fail(&self.store, site, cause) {
            error!(site = %site, error = %e, "could not record site failure");
        }
    }
}
