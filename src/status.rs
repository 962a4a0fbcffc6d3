//! Site lifecycle state machine and staleness.
//!
//! ```text
//! draft → generating → generated → building → built → deploying → deployed
//!              ↘            ↘            ↘
//!                          failed
//! ```
//!
//! Stages enter their in-flight state with [`begin`] and leave it with
//! [`finish`] or [`fail`]. Entering `generating` or `building` is allowed
//! from any settled state: the site lock, not the status, decides whether a
//! stage may run. Entering `deploying` needs a settled build (`built`,
//! `deployed`, or `failed` after one).
//!
//! Staleness is derived, never stored: a site needs a rebuild when any page
//! changed after `built_at`.

use crate::lock::{self, LockInfo};
use crate::store::{Store, StoreError};
use crate::types::{Page, RemoteState, Site, SiteId, SiteStatus, Timestamp};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum StatusError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lock(#[from] lock::LockError),
    #[error("site {site} cannot go from {from} to {to}")]
    Transition {
        site: SiteId,
        from: SiteStatus,
        to: SiteStatus,
    },
}

/// Whether a site in `from` may enter the in-flight state `to`.
pub fn can_begin(from: SiteStatus, to: SiteStatus) -> bool {
    match to {
        SiteStatus::Generating | SiteStatus::Building => !from.is_in_flight(),
        SiteStatus::Deploying => matches!(
            from,
            SiteStatus::Built | SiteStatus::Deployed | SiteStatus::Failed
        ),
        _ => false,
    }
}

/// Settled state reached when the in-flight state `from` completes.
fn settles_to(from: SiteStatus) -> Option<SiteStatus> {
    match from {
        SiteStatus::Generating => Some(SiteStatus::Generated),
        SiteStatus::Building => Some(SiteStatus::Built),
        SiteStatus::Deploying => Some(SiteStatus::Deployed),
        _ => None,
    }
}

/// Enter an in-flight state. Returns the status the site had before.
///
/// Clears any previous failure cause.
pub fn begin(store: &Store, site: SiteId, to: SiteStatus) -> Result<SiteStatus, StatusError> {
    let current = store.load_site(site)?;
    if !can_begin(current.status, to) {
        return Err(StatusError::Transition {
            site,
            from: current.status,
            to,
        });
    }
    let previous = current.status;
    store.update_site(site, |s| {
        s.status = to;
        s.failure = None;
    })?;
    info!(site = %site, from = %previous, to = %to, "site status");
    Ok(previous)
}

/// Leave an in-flight state for `to`.
///
/// `to` is normally the state the in-flight one settles to, but a stage may
/// also hand back the status the site had before it started (new-pages-only
/// generation, cancelled runs).
pub fn finish(store: &Store, site: SiteId, to: SiteStatus) -> Result<Site, StatusError> {
    let current = store.load_site(site)?;
    if !current.status.is_in_flight() || to.is_in_flight() {
        return Err(StatusError::Transition {
            site,
            from: current.status,
            to,
        });
    }
    let updated = store.update_site(site, |s| s.status = to)?;
    info!(site = %site, from = %current.status, to = %to, "site status");
    Ok(updated)
}

/// Settle an in-flight state to its natural successor.
pub fn complete(store: &Store, site: SiteId) -> Result<Site, StatusError> {
    let current = store.load_site(site)?;
    let to = settles_to(current.status).ok_or(StatusError::Transition {
        site,
        from: current.status,
        to: current.status,
    })?;
    finish(store, site, to)
}

/// Record a stage failure.
///
/// A site in flight moves to `failed` with the cause. A failure before the
/// stage got going (a rejected precondition) leaves the status alone.
pub fn fail(store: &Store, site: SiteId, cause: &str) -> Result<Site, StatusError> {
    let updated = store.update_site(site, |s| {
        if s.status.is_in_flight() {
            s.status = SiteStatus::Failed;
            s.failure = Some(cause.to_string());
        }
    })?;
    if updated.status == SiteStatus::Failed {
        warn!(site = %site, cause = %cause, "site failed");
    }
    Ok(updated)
}

/// Fail sites left in flight by a process that died, i.e. sites whose
/// status is in flight while nobody holds their lock.
pub fn recover_interrupted(store: &Store) -> Result<usize, StatusError> {
    let mut recovered = 0;
    for site in store.list_sites()? {
        if site.status.is_in_flight() && lock::holder(&store.locks_dir(), site.id)?.is_none() {
            fail(store, site.id, "interrupted: worker process exited")?;
            recovered += 1;
        }
    }
    Ok(recovered)
}

/// Latest content or menu change across pages.
pub fn last_page_change(pages: &[Page]) -> Option<Timestamp> {
    pages.iter().filter_map(Page::last_changed).max()
}

/// Whether the site's pages changed after its last build.
///
/// A never-built site needs a rebuild as soon as any page has a timestamp.
pub fn needs_rebuild(site: &Site, pages: &[Page]) -> bool {
    match (last_page_change(pages), site.built_at) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(changed), Some(built)) => changed > built,
    }
}

/// Everything `site-factory status` shows for one site.
#[derive(Debug, Clone)]
pub struct SiteSummary {
    pub site: Site,
    pub pages_total: usize,
    pub pages_generated: usize,
    pub pending_directives: usize,
    pub needs_rebuild: bool,
    pub remote: RemoteState,
    pub active_job: Option<LockInfo>,
}

pub fn summarize(store: &Store, id: SiteId) -> Result<SiteSummary, StatusError> {
    let site = store.load_site(id)?;
    let pages = store.list_pages(id)?;
    Ok(SiteSummary {
        pages_total: pages.len(),
        pages_generated: pages.iter().filter(|p| p.is_generated()).count(),
        pending_directives: pages.iter().filter(|p| p.directive.is_some()).count(),
        needs_rebuild: needs_rebuild(&site, &pages),
        remote: store.load_remote_state(id)?,
        active_job: lock::holder(&store.locks_dir(), id)?,
        site,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{bundle, make_page, make_site, ts};
    use tempfile::TempDir;

    #[test]
    fn generating_and_building_from_any_settled_state() {
        for from in [
            SiteStatus::Draft,
            SiteStatus::Generated,
            SiteStatus::Built,
            SiteStatus::Deployed,
            SiteStatus::Failed,
        ] {
            assert!(can_begin(from, SiteStatus::Generating), "{from}");
            assert!(can_begin(from, SiteStatus::Building), "{from}");
        }
        assert!(!can_begin(SiteStatus::Building, SiteStatus::Generating));
    }

    #[test]
    fn deploying_needs_a_build() {
        assert!(can_begin(SiteStatus::Built, SiteStatus::Deploying));
        assert!(can_begin(SiteStatus::Deployed, SiteStatus::Deploying));
        assert!(can_begin(SiteStatus::Failed, SiteStatus::Deploying));
        assert!(!can_begin(SiteStatus::Draft, SiteStatus::Deploying));
        assert!(!can_begin(SiteStatus::Generated, SiteStatus::Deploying));
    }

    #[test]
    fn settled_states_cannot_be_begun() {
        assert!(!can_begin(SiteStatus::Draft, SiteStatus::Built));
        assert!(!can_begin(SiteStatus::Built, SiteStatus::Deployed));
    }

    #[test]
    fn begin_complete_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let id = store.import_site(bundle("Roundtrip")).unwrap();

        let previous = begin(&store, id, SiteStatus::Building).unwrap();
        assert_eq!(previous, SiteStatus::Draft);
        let site = complete(&store, id).unwrap();
        assert_eq!(site.status, SiteStatus::Built);
    }

    #[test]
    fn begin_rejects_invalid_transition() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let id = store.import_site(bundle("Draft Site")).unwrap();
        let err = begin(&store, id, SiteStatus::Deploying).unwrap_err();
        assert!(matches!(err, StatusError::Transition { .. }));
        assert_eq!(store.load_site(id).unwrap().status, SiteStatus::Draft);
    }

    #[test]
    fn fail_records_cause_only_when_in_flight() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let id = store.import_site(bundle("Failing")).unwrap();

        let site = fail(&store, id, "precondition").unwrap();
        assert_eq!(site.status, SiteStatus::Draft);
        assert!(site.failure.is_none());

        begin(&store, id, SiteStatus::Generating).unwrap();
        let site = fail(&store, id, "synthesis timed out").unwrap();
        assert_eq!(site.status, SiteStatus::Failed);
        assert_eq!(site.failure.as_deref(), Some("synthesis timed out"));

        // Re-entering clears the cause.
        begin(&store, id, SiteStatus::Building).unwrap();
        assert!(store.load_site(id).unwrap().failure.is_none());
    }

    #[test]
    fn recover_interrupted_fails_unlocked_in_flight_sites() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let id = store.import_site(bundle("Stuck")).unwrap();
        begin(&store, id, SiteStatus::Building).unwrap();

        assert_eq!(recover_interrupted(&store).unwrap(), 1);
        let site = store.load_site(id).unwrap();
        assert_eq!(site.status, SiteStatus::Failed);
        assert!(site.failure.unwrap().contains("interrupted"));
    }

    #[test]
    fn needs_rebuild_cases() {
        let mut site = make_site(1, "Stale");
        let mut page = make_page(1, "home");

        // Nothing ever happened.
        assert!(!needs_rebuild(&site, std::slice::from_ref(&page)));

        // Never built, but content exists.
        page.content_timestamp = Some(ts(100));
        assert!(needs_rebuild(&site, std::slice::from_ref(&page)));

        site.built_at = Some(ts(200));
        assert!(!needs_rebuild(&site, std::slice::from_ref(&page)));

        // A menu change alone makes it stale.
        page.menu_timestamp = Some(ts(300));
        assert!(needs_rebuild(&site, std::slice::from_ref(&page)));
    }

    #[test]
    fn summarize_counts_pages() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(tmp.path()).unwrap();
        let id = store.import_site(bundle("Summary")).unwrap();
        store
            .set_directive(id, crate::types::PageId(1), Some("shorter".into()))
            .unwrap();

        let summary = summarize(&store, id).unwrap();
        assert_eq!(summary.pages_total, 3);
        assert_eq!(summary.pages_generated, 0);
        assert_eq!(summary.pending_directives, 1);
        assert!(!summary.needs_rebuild);
        assert!(summary.active_job.is_none());
        assert_eq!(summary.remote, RemoteState::default());
    }
}
