//! Deploy stage: promote a built release to the remote host, or roll back.
//!
//! ## Deploy order
//!
//! 1. Verify the local release against its manifest (no side effects yet).
//! 2. Transfer it to `releases/v{n}` unless the host already has it.
//! 3. Swing `current` to it and record the new alias target.
//! 4. Prune releases beyond the retention bound, never the live one.
//! 5. Regenerate the proxy config and reload.
//! 6. First deploy only: bootstrap a certificate. Failure is a warning; on
//!    success the config is regenerated with HTTPS and reloaded again.
//!
//! A transfer failure leaves the remote untouched apart from a partial
//! upload, which the next attempt deletes. Rollback repoints `current` at the
//! previous retained release with no transfer.

use crate::jobs::{JobContext, Outcome};
use crate::proxy::{ProxySite, render_config};
use crate::release::{ReleaseError, ReleaseStore};
use crate::remote::{Remote, RemoteError};
use crate::status::{self, StatusError};
use crate::store::{Store, StoreError};
use crate::types::{RemoteState, Site, SiteId, SiteStatus};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error("remote operation failed: {0}")]
    Transfer(#[from] RemoteError),
    #[error("site {0} has no domain")]
    NoDomain(SiteId),
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),
    #[error("site {0} has never been built")]
    NotBuilt(SiteId),
    #[error("site {0} has no previous release to roll back to")]
    NoPrevious(SiteId),
}

/// Hostname check applied before a domain reaches a remote command.
pub fn valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.len() <= 253
        && domain.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn domain_of(site: &Site) -> Result<String, DeployError> {
    let domain = site
        .domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(DeployError::NoDomain(site.id))?
        .to_ascii_lowercase();
    if !valid_domain(&domain) {
        return Err(DeployError::InvalidDomain(domain));
    }
    Ok(domain)
}

/// Versions to keep: the newest `retention`, always including `live`.
///
/// `present` may be in any order; the result is most recent first.
pub fn retained(present: &[u32], live: u32, retention: usize) -> Vec<u32> {
    let mut newest: Vec<u32> = present.to_vec();
    newest.sort_unstable_by(|a, b| b.cmp(a));
    newest.dedup();
    let mut keep: Vec<u32> = newest.iter().copied().take(retention.max(1)).collect();
    if !keep.contains(&live) {
        keep.pop();
        keep.push(live);
        keep.sort_unstable_by(|a, b| b.cmp(a));
    }
    keep
}

/// Check that a rollback is possible. Returns the version it would restore.
pub fn check_rollback(store: &Store, site: SiteId) -> Result<u32, DeployError> {
    store
        .load_remote_state(site)?
        .previous_version()
        .ok_or(DeployError::NoPrevious(site))
}

/// Result of a deploy or rollback.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployReport {
    pub version: u32,
    pub transferred: bool,
    pub pruned: Vec<u32>,
    pub state: RemoteState,
}

pub struct Deployer<'a> {
    store: &'a Store,
    releases: &'a ReleaseStore,
    remote: &'a dyn Remote,
    retention: usize,
    tls_email: Option<String>,
}

impl<'a> Deployer<'a> {
    pub fn new(store: &'a Store, releases: &'a ReleaseStore, remote: &'a dyn Remote) -> Self {
        Self {
            store,
            releases,
            remote,
            retention: 3,
            tls_email: None,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn with_tls_email(mut self, email: Option<String>) -> Self {
        self.tls_email = email;
        self
    }

    fn install_proxy(&self, domain: &str, tls: bool) -> Result<(), RemoteError> {
        let config = render_config(&ProxySite::new(domain, &self.remote.web_root(), tls));
        self.remote.install_proxy_config(domain, &config)?;
        self.remote.reload_proxy()
    }

    pub fn run(&self, ctx: &JobContext, version: Option<u32>) -> Result<Outcome, DeployError> {
        Ok(match self.deploy(ctx, version)? {
            Some(_) => Outcome::Completed,
            None => Outcome::Cancelled,
        })
    }

    /// Deploy `version`, or the last built release. `None` when cancelled
    /// before the swing.
    pub fn deploy(&self, ctx: &JobContext, version: Option<u32>) -> Result<Option<DeployReport>, DeployError> {
        let site_id = ctx.site_id();
        let site = self.store.load_site(site_id)?;
        let domain = domain_of(&site)?;
        let version = version
            .or(site.last_built_version)
            .ok_or(DeployError::NotBuilt(site_id))?;
        self.releases.verify(&site, version)?;

        let previous = status::begin(self.store, site_id, SiteStatus::Deploying)?;
        ctx.set_total(4);
        info!(site = %site_id, domain = %domain, version, "deploying");

        let already_there = self.remote.list_releases(&domain)?.contains(&version);
        if !already_there {
            self.remote
                .upload(&domain, version, &self.releases.release_dir(&site, version))?;
        }
        ctx.advance();
        if ctx.cancel_requested() {
            status::finish(self.store, site_id, previous)?;
            info!(site = %site_id, version, "deploy cancelled before swing");
            return Ok(None);
        }

        self.remote.point_current(&domain, version)?;
        let mut state = self.store.load_remote_state(site_id)?;
        state.alias_target = Some(version);
        let present = self.remote.list_releases(&domain)?;
        state.retained_versions = retained(&present, version, self.retention);
        self.store.save_remote_state(site_id, &state)?;
        ctx.advance();

        let mut pruned = Vec::new();
        for old in present.iter().filter(|v| !state.retained_versions.contains(v)) {
            self.remote.remove_release(&domain, *old)?;
            info!(site = %site_id, version = old, "pruned release");
            pruned.push(*old);
        }
        ctx.advance();

        self.install_proxy(&domain, state.tls_provisioned)?;
        if !state.tls_provisioned {
            match self.remote.provision_tls(&domain, self.tls_email.as_deref()) {
                Ok(()) => {
                    state.tls_provisioned = true;
                    self.store.save_remote_state(site_id, &state)?;
                    self.install_proxy(&domain, true)?;
                    info!(site = %site_id, domain = %domain, "certificate provisioned");
                }
                Err(e) => {
                    warn!(site = %site_id, domain = %domain, error = %e, "certificate bootstrap failed, serving plain HTTP");
                }
            }
        }
        ctx.advance();

        self.store
            .update_site(site_id, |s| s.deployed_at = Some(Utc::now()))?;
        status::complete(self.store, site_id)?;
        info!(site = %site_id, version, transferred = !already_there, "deployed");
        Ok(Some(DeployReport {
            version,
            transferred: !already_there,
            pruned,
            state,
        }))
    }

    /// Repoint `current` at the previous retained release.
    pub fn rollback(&self, ctx: &JobContext) -> Result<DeployReport, DeployError> {
        let site_id = ctx.site_id();
        let site = self.store.load_site(site_id)?;
        let domain = domain_of(&site)?;
        let target = check_rollback(self.store, site_id)?;

        status::begin(self.store, site_id, SiteStatus::Deploying)?;
        ctx.set_total(1);
        self.remote.point_current(&domain, target)?;
        let mut state = self.store.load_remote_state(site_id)?;
        state.alias_target = Some(target);
        self.store.save_remote_state(site_id, &state)?;
        if let Err(e) = self.remote.reload_proxy() {
            warn!(site = %site_id, error = %e, "proxy reload after rollback failed");
        }
        ctx.advance();

        self.store
            .update_site(site_id, |s| s.deployed_at = Some(Utc::now()))?;
        status::complete(self.store, site_id)?;
        info!(site = %site_id, version = target, "rolled back");
        Ok(DeployReport {
            version: target,
            transferred: false,
            pruned: Vec::new(),
            state,
        })
    }
}
