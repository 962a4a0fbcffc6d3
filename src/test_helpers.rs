//! Shared test utilities for the site-factory test suite.
//!
//! Builders for in-memory records, a standard three-page import bundle, a
//! job context that is persisted like a real one, and a scripted
//! synthesizer.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let store = Store::open(tmp.path()).unwrap();
//! let site = store.import_site(bundle("Odds Hub")).unwrap();
//! let ctx = job_context(&store, site);
//! let synth = ScriptedSynth::echo();
//! ```

use crate::brand::{Brand, BrandRegistry};
use crate::jobs::{JobContext, JobPayload, JobRecord, JobState, StageKind};
use crate::naming::slugify;
use crate::store::{NewPage, SiteBundle, Store, write_json_atomic};
use crate::synth::{SynthError, Synthesizer};
use crate::types::{
    BrandFields, MenuPlacement, Page, PageId, PageKind, Site, SiteBrand, SiteId, SiteStatus,
    Timestamp,
};
use chrono::DateTime;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

// =========================================================================
// Records
// =========================================================================

/// Timestamp `secs` seconds after the epoch.
pub fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap()
}

/// A draft site with no brands, pages, or domain.
pub fn make_site(id: u32, name: &str) -> Site {
    Site {
        id: SiteId(id),
        name: name.to_string(),
        slug: slugify(name),
        region: "gb".to_string(),
        language: "en".to_string(),
        domain: None,
        status: SiteStatus::Draft,
        current_version: 1,
        last_built_version: None,
        built_at: None,
        deployed_at: None,
        brands: Vec::new(),
        cta_tables: Vec::new(),
        custom_robots_txt: None,
        custom_head: None,
        failure: None,
        created_at: ts(0),
    }
}

/// An ungenerated homepage of site 1, titled by its slug.
pub fn make_page(id: u32, slug: &str) -> Page {
    Page {
        id: PageId(id),
        site_id: SiteId(1),
        kind: PageKind::Homepage,
        slug: slug.to_string(),
        title: slug.to_string(),
        meta_title: None,
        meta_description: None,
        brand: None,
        topic: None,
        cta_table: None,
        hero_image: None,
        custom_head: None,
        published_at: None,
        menu: MenuPlacement::default(),
        content: None,
        content_timestamp: None,
        menu_timestamp: None,
        directive: None,
    }
}

fn brand(slug: &str) -> Brand {
    let mut name = slug.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    Brand {
        slug: slug.to_string(),
        name,
        fields: BrandFields {
            affiliate_link: Some(format!("https://{slug}.example/join")),
            ..Default::default()
        },
    }
}

/// Registry holding one brand per slug, named by the capitalized slug.
pub fn registry_with(slugs: &[&str]) -> BrandRegistry {
    BrandRegistry {
        brands: slugs.iter().map(|s| brand(s)).collect(),
        regions: BTreeMap::new(),
    }
}

/// A bundle page with kind defaults and nothing else set.
pub fn new_page(kind: PageKind, title: &str) -> NewPage {
    NewPage {
        kind,
        title: title.to_string(),
        slug: None,
        meta_title: None,
        meta_description: None,
        brand: None,
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

/// Region `gb`, brands alpha (rank 1) and beta (rank 2), and three pages:
/// a homepage, a comparison, and a review of alpha. No directives.
pub fn bundle(name: &str) -> SiteBundle {
    let mut review = new_page(PageKind::BrandReview, "Alpha Review");
    review.brand = Some("alpha".to_string());
    SiteBundle {
        name: name.to_string(),
        slug: None,
        region: "gb".to_string(),
        language: "en".to_string(),
        domain: None,
        brands: vec![
            SiteBrand {
                brand: "alpha".to_string(),
                rank: 1,
                overrides: BrandFields::default(),
            },
            SiteBrand {
                brand: "beta".to_string(),
                rank: 2,
                overrides: BrandFields::default(),
            },
        ],
        cta_tables: Vec::new(),
        custom_robots_txt: None,
        custom_head: None,
        pages: vec![
            new_page(PageKind::Homepage, "Home"),
            new_page(PageKind::Comparison, "Best Betting Sites"),
            review,
        ],
        registry_brands: vec![brand("alpha"), brand("beta")],
        registry_regions: BTreeMap::new(),
    }
}

// =========================================================================
// Jobs
// =========================================================================

/// A running job context for `site`, persisted so cancellation works.
pub fn job_context(store: &Store, site: SiteId) -> JobContext {
    let record = JobRecord {
        id: uuid::Uuid::new_v4().to_string(),
        site_id: site,
        stage: StageKind::Build,
        payload: JobPayload::Build,
        total_units: 0,
        completed_units: 0,
        state: JobState::Running,
        cause: None,
        cancel_requested: false,
        created_at: ts(0),
        started_at: Some(ts(0)),
        finished_at: None,
    };
    write_json_atomic(&store.jobs_dir().join(format!("{}.json", record.id)), &record).unwrap();
    JobContext::new(store.clone(), record)
}

// =========================================================================
// Synthesis
// =========================================================================

enum Script {
    Echo,
    Fail,
    FailWhen(String),
}

/// Synthesizer with canned behavior that counts its calls.
pub struct ScriptedSynth {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedSynth {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns `{"hero_title": <first prompt line>, "intro": <prompt>}`.
    pub fn echo() -> Self {
        Self::new(Script::Echo)
    }

    /// Every call fails with malformed output.
    pub fn failing() -> Self {
        Self::new(Script::Fail)
    }

    /// Fails prompts containing `needle`, echoes the rest.
    pub fn failing_when(needle: &str) -> Self {
        Self::new(Script::FailWhen(needle.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Synthesizer for ScriptedSynth {
    fn synthesize(&self, prompt: &str) -> Result<Map<String, Value>, SynthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = match &self.script {
            Script::Echo => false,
            Script::Fail => true,
            Script::FailWhen(needle) => prompt.contains(needle.as_str()),
        };
        if fail {
            return Err(SynthError::Malformed("scripted failure".to_string()));
        }
        let mut map = Map::new();
        let headline = prompt.lines().next().unwrap_or_default();
        map.insert("hero_title".to_string(), Value::String(headline.to_string()));
        map.insert("intro".to_string(), Value::String(prompt.to_string()));
        Ok(map)
    }
}
