//! End-to-end runs of the content → build → deploy pipeline against a
//! filesystem remote.

use serde_json::{Map, Value};
use site_factory::brand::Brand;
use site_factory::jobs::{ContentScope, JobError, JobPayload, JobRecord, JobRunner, JobState};
use site_factory::lock;
use site_factory::pipeline::Pipeline;
use site_factory::release::{ReleaseStore, hash_tree};
use site_factory::remote::{LocalRemote, Remote};
use site_factory::store::{NewPage, SiteBundle, Store};
use site_factory::synth::{SynthError, Synthesizer};
use site_factory::trigger::{self, TickStep};
use site_factory::types::{BrandFields, PageKind, SiteBrand, SiteId, SiteStatus};
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

const DOMAIN: &str = "bets.example";

/// Answers every prompt with a headline taken from its first line.
#[derive(Default)]
struct EchoSynth {
    calls: AtomicUsize,
}

impl Synthesizer for EchoSynth {
    fn synthesize(&self, prompt: &str) -> Result<Map<String, Value>, SynthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut map = Map::new();
        let headline = prompt.lines().next().unwrap_or_default().to_string();
        map.insert("hero_title".into(), Value::String(headline));
        map.insert("intro".into(), Value::String("Fresh copy.".into()));
        Ok(map)
    }
}

fn page(kind: PageKind, title: &str, brand: Option<&str>) -> NewPage {
    NewPage {
        kind,
        title: title.to_string(),
        slug: None,
        meta_title: None,
        meta_description: None,
        brand: brand.map(str::to_string),
        topic: None,
        cta_table: None,
        hero_image: None,
        custom_head: None,
        published_at: None,
        menu: None,
        nav_parent: None,
        directive: None,
    }
}

fn brand(slug: &str, name: &str) -> Brand {
    Brand {
        slug: slug.to_string(),
        name: name.to_string(),
        fields: BrandFields {
            affiliate_link: Some(format!("https://{slug}.example/join")),
            ..Default::default()
        },
    }
}

fn site_bundle() -> SiteBundle {
    SiteBundle {
        name: "Bet Guide".to_string(),
        slug: None,
        region: "gb".to_string(),
        language: "en".to_string(),
        domain: Some(DOMAIN.to_string()),
        brands: vec![SiteBrand {
            brand: "alpha".to_string(),
            rank: 1,
            overrides: BrandFields::default(),
        }],
        cta_tables: Vec::new(),
        custom_robots_txt: None,
        custom_head: None,
        pages: vec![
            page(PageKind::Homepage, "Home", None),
            page(PageKind::Comparison, "Best Betting Sites", None),
            page(PageKind::BrandReview, "Alpha Review", Some("alpha")),
        ],
        registry_brands: vec![brand("alpha", "Alpha Bet")],
        registry_regions: BTreeMap::new(),
    }
}

struct Harness {
    tmp: TempDir,
    store: Store,
    releases: ReleaseStore,
    remote: Arc<LocalRemote>,
    synth: Arc<EchoSynth>,
    pipeline: Arc<Pipeline>,
    runner: JobRunner,
    site: SiteId,
}

fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let store = Store::open(tmp.path().join("data")).unwrap();
    let releases = ReleaseStore::new(tmp.path().join("output"));
    let remote = Arc::new(LocalRemote::new(
        tmp.path().join("www"),
        tmp.path().join("available"),
        tmp.path().join("enabled"),
    ));
    let synth = Arc::new(EchoSynth::default());
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        releases.clone(),
        Ok(remote.clone() as Arc<dyn Remote>),
        Ok(synth.clone() as Arc<dyn Synthesizer>),
    ));
    let runner = JobRunner::new(store.clone(), 2, pipeline.clone()).unwrap();
    let site = store.import_site(site_bundle()).unwrap();
    Harness {
        tmp,
        store,
        releases,
        remote,
        synth,
        pipeline,
        runner,
        site,
    }
}

impl Harness {
    fn run(&self, payload: JobPayload) -> JobRecord {
        self.pipeline.precheck(self.site, &payload).unwrap();
        self.runner
            .enqueue(self.site, payload)
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap()
    }

    fn run_ok(&self, payload: JobPayload) {
        let record = self.run(payload);
        assert_eq!(record.state, JobState::Succeeded, "{:?}", record.cause);
    }

    fn generate_all(&self) {
        self.run_ok(JobPayload::Generate {
            scope: ContentScope::Site,
            force: false,
            directive: None,
        });
    }

    fn uploads(&self) -> usize {
        self.remote
            .events()
            .iter()
            .filter(|e| e.starts_with("upload"))
            .count()
    }

    fn tick(&self) -> Vec<TickStep> {
        let reports = trigger::tick(&self.runner, &self.pipeline).unwrap();
        assert_eq!(reports.len(), 1);
        reports.into_iter().next().unwrap().steps
    }
}

#[test]
fn four_deploys_then_rollback() {
    let h = harness();
    h.generate_all();
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), 3);

    for expected in 1..=4 {
        h.run_ok(JobPayload::Build);
        assert_eq!(h.store.load_site(h.site).unwrap().last_built_version, Some(expected));
        h.run_ok(JobPayload::Deploy { version: None });
        assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(expected));
    }

    let state = h.store.load_remote_state(h.site).unwrap();
    assert_eq!(state.alias_target, Some(4));
    assert_eq!(state.retained_versions, vec![4, 3, 2]);
    assert!(state.tls_provisioned);
    assert_eq!(h.remote.list_releases(DOMAIN).unwrap(), vec![2, 3, 4]);
    assert_eq!(h.uploads(), 4);

    h.run_ok(JobPayload::Rollback);
    assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(3));
    assert_eq!(h.uploads(), 4, "rollback transfers nothing");
    let state = h.store.load_remote_state(h.site).unwrap();
    assert_eq!(state.alias_target, Some(3));
    assert_eq!(state.retained_versions, vec![4, 3, 2]);
    assert_eq!(h.store.load_site(h.site).unwrap().status, SiteStatus::Deployed);

    let live = h.remote.site_dir(DOMAIN).join("current/index.html");
    assert!(fs::read_to_string(live).unwrap().contains("Home"));
}

#[test]
fn rebuild_of_unchanged_site_is_identical() {
    let h = harness();
    h.generate_all();
    h.run_ok(JobPayload::Build);
    h.run_ok(JobPayload::Build);

    let site = h.store.load_site(h.site).unwrap();
    let first = hash_tree(&h.releases.release_dir(&site, 1)).unwrap();
    let second = hash_tree(&h.releases.release_dir(&site, 2)).unwrap();
    assert!(first.contains_key("index.html"));
    assert_eq!(first, second);
    assert_eq!(h.releases.versions(&site).unwrap(), vec![1, 2]);
}

#[test]
fn tick_follows_the_site_lifecycle() {
    let h = harness();

    assert_eq!(h.tick(), vec![TickStep::Generated, TickStep::Built]);
    assert_eq!(h.tick(), Vec::<TickStep>::new(), "second tick has no work");
    assert_eq!(h.uploads(), 0, "never-deployed sites are not deployed");

    h.run_ok(JobPayload::Deploy { version: None });
    let home = h
        .store
        .list_pages(h.site)
        .unwrap()
        .into_iter()
        .find(|p| p.slug == "home")
        .unwrap();
    h.store
        .set_directive(h.site, home.id, Some("mention the new app".into()))
        .unwrap();
    let calls = h.synth.calls.load(Ordering::SeqCst);

    assert_eq!(
        h.tick(),
        vec![TickStep::Generated, TickStep::Built, TickStep::Deployed]
    );
    assert_eq!(h.synth.calls.load(Ordering::SeqCst), calls + 1, "only the directed page");
    assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(2));
    assert!(h.store.load_page(h.site, home.id).unwrap().directive.is_none());

    h.run_ok(JobPayload::Rollback);
    assert_eq!(h.tick(), Vec::<TickStep>::new(), "rollback is not undone");
    assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(1));
}

#[test]
fn busy_site_rejects_second_job() {
    let h = harness();
    let _held = lock::acquire(&h.store.locks_dir(), h.site, "someone-else").unwrap();

    let err = h.runner.enqueue(h.site, JobPayload::Build).unwrap_err();
    assert!(matches!(err, JobError::SiteBusy { .. }), "{err}");
    assert_eq!(h.tick(), vec![TickStep::Busy]);
    assert!(h.releases.versions(&h.store.load_site(h.site).unwrap()).unwrap().is_empty());
}

#[test]
fn failed_deploy_keeps_live_release() {
    let h = harness();
    h.generate_all();
    h.run_ok(JobPayload::Build);
    h.run_ok(JobPayload::Deploy { version: None });

    let record = h.run(JobPayload::Deploy { version: Some(9) });
    assert_eq!(record.state, JobState::Failed);
    assert!(record.cause.is_some());
    assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(1));
    assert!(h.tmp.path().join("www").join(DOMAIN).join("releases/v1").is_dir());
}

#[test]
fn failed_transfer_and_swing_jobs_leave_remote_state_alone() {
    let h = harness();
    h.generate_all();
    h.run_ok(JobPayload::Build);
    h.run_ok(JobPayload::Deploy { version: None });
    h.run_ok(JobPayload::Build);
    let state = h.store.load_remote_state(h.site).unwrap();
    assert_eq!(state.alias_target, Some(1));

    let www = h.tmp.path().join("www");
    let cases: [(&str, fn(LocalRemote) -> LocalRemote); 2] = [
        ("transfer release", LocalRemote::with_upload_failure),
        ("swing alias", LocalRemote::with_swing_failure),
    ];
    for (op, failing) in cases {
        let remote = Arc::new(failing(LocalRemote::new(
            &www,
            h.tmp.path().join("available"),
            h.tmp.path().join("enabled"),
        )));
        let pipeline = Arc::new(Pipeline::new(
            h.store.clone(),
            h.releases.clone(),
            Ok(remote.clone() as Arc<dyn Remote>),
            Ok(h.synth.clone() as Arc<dyn Synthesizer>),
        ));
        let runner = JobRunner::new(h.store.clone(), 1, pipeline).unwrap();
        let record = runner
            .enqueue(h.site, JobPayload::Deploy { version: None })
            .unwrap()
            .wait_timeout(Duration::from_secs(60))
            .unwrap();

        assert_eq!(record.state, JobState::Failed);
        assert!(record.cause.as_deref().unwrap_or_default().contains(op), "{:?}", record.cause);
        assert_eq!(h.store.load_remote_state(h.site).unwrap(), state, "{op}");
        assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(1), "{op}");
        assert!(!remote.events().iter().any(|e| e.starts_with("point") || e.starts_with("prune")));
        assert_eq!(h.store.load_site(h.site).unwrap().status, SiteStatus::Failed);
    }

    h.run_ok(JobPayload::Deploy { version: None });
    assert_eq!(h.remote.current(DOMAIN).unwrap(), Some(2));
    assert!(www.join(DOMAIN).join("releases/v1").is_dir());
}
