//! Content stage: fill and refresh page content through a [`Synthesizer`].
//!
//! ## Scopes
//!
//! | Scope | Pages targeted | Site status afterwards |
//! |-------|----------------|------------------------|
//! | `Site` | missing content or a pending directive (all when forced) | `generated` |
//! | `NewPagesOnly` | missing content | previous `built`/`deployed`, else `generated` |
//! | `Page(id)` | that page, unless already generated with no directive | as `NewPagesOnly` |
//!
//! Any page failure fails the job, and the runner's failure hook moves the
//! site to `failed`. Pages that succeeded keep their new content.
//!
//! ## Committing a page
//!
//! ```text
//! prior content exists? ── yes ──▶ append history/{page}/{n}.json
//!                                         │
//! replace content, clear directive, ◀─────┘
//! stamp content_timestamp (one atomic page write)
//! ```
//!
//! If the page write fails, the history entry just appended is discarded,
//! so history never claims a change that did not happen. Malformed
//! synthesis output is rejected by the synthesizer and never reaches this
//! point.

use crate::brand::{BrandError, ResolvedBrand, resolve_site_brands};
use crate::jobs::{ContentScope, JobContext, Outcome};
use crate::lock::{self, LockError};
use crate::status::{self, StatusError};
use crate::store::{Store, StoreError};
use crate::synth::{SynthError, Synthesizer};
use crate::types::{ContentVersion, Page, PageId, PageKind, Site, SiteId, SiteStatus};
use chrono::Utc;
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Brand(#[from] BrandError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("page {page}: synthesis failed: {source}")]
    Synthesis {
        page: PageId,
        #[source]
        source: SynthError,
    },
    #[error("page {page}: {reason}")]
    Input { page: PageId, reason: String },
    #[error("a directive applies to a single page")]
    DirectiveScope,
    #[error("{failed} of {total} pages failed: {detail}")]
    PagesFailed {
        failed: usize,
        total: usize,
        detail: String,
    },
}

// ============================================================================
// Prompts
// ============================================================================

/// Keys the model must return for each page kind, with a short brief each.
/// The renderer reads the same keys.
pub fn schema(kind: PageKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        PageKind::Homepage => &[
            ("hero_title", "compelling H1 headline"),
            ("hero_subtitle", "one-sentence value proposition"),
            ("hero_stats", "array of 3 objects {value, label}"),
            ("trust_items", "array of 3 short trust signals"),
            ("section_title", "heading above the brand list"),
            ("section_subtitle", "one sentence under that heading"),
            ("top_brands", "array of objects {brand, summary}, one per featured brand"),
            ("why_trust_us", "2 paragraphs in markdown"),
            ("faq", "array of 5 objects {question, answer}"),
            ("closing_paragraph", "final paragraph in markdown"),
        ],
        PageKind::Comparison => &[
            ("hero_title", "H1 headline"),
            ("hero_subtitle", "one sentence"),
            ("intro", "introductory paragraph in markdown"),
            (
                "comparison_rows",
                "array of objects {brand, slug, bonus, rating, pros, cons, verdict}, one per brand",
            ),
            ("verdict", "overall recommendation in markdown"),
            ("faq", "array of 4 objects {question, answer}"),
        ],
        PageKind::BrandReview => &[
            ("hero_title", "H1 headline naming the brand"),
            ("hero_subtitle", "one sentence"),
            ("intro_paragraphs", "array of 2 paragraphs"),
            ("pros", "array of 4 strings"),
            ("cons", "array of 3 strings"),
            ("features_sections", "array of 3 objects {heading, content}"),
            ("verdict", "closing verdict in markdown"),
            ("faq", "array of 4 objects {question, answer}"),
        ],
        PageKind::BonusReview => &[
            ("hero_title", "H1 headline naming the offer"),
            ("hero_subtitle", "one sentence"),
            ("bonus_overview", "overview of the offer in markdown"),
            ("how_to_claim", "array of step strings"),
            ("terms_summary", "key terms in markdown"),
            ("similar_offers", "array of objects {brand, offer}"),
            ("verdict", "closing verdict in markdown"),
        ],
        PageKind::Evergreen => &[
            ("hero_title", "H1 headline"),
            ("hero_subtitle", "one sentence"),
            ("intro", "introductory paragraph in markdown"),
            ("sections", "array of 4 objects {heading, content}"),
            ("key_takeaways", "array of 4 strings"),
            ("faq", "array of 3 objects {question, answer}"),
        ],
        PageKind::News => &[
            ("hero_title", "H1 headline for the news hub"),
            ("hero_subtitle", "one sentence"),
            ("intro", "short paragraph in markdown"),
        ],
        PageKind::NewsArticle => &[
            ("hero_title", "H1 headline"),
            ("hero_subtitle", "standfirst sentence"),
            ("sections", "array of 3 objects {heading, content}"),
            ("key_takeaways", "array of 3 strings"),
        ],
    }
}

fn brand_line(out: &mut String, brand: &ResolvedBrand) {
    let _ = write!(out, "{}. {}", brand.rank, brand.name);
    if let Some(bonus) = &brand.fields.welcome_bonus {
        let _ = write!(out, " | bonus: {bonus}");
    }
    if let Some(rating) = brand.fields.rating {
        let _ = write!(out, " | rating: {rating:.1}/5");
    }
    if let Some(desc) = &brand.fields.description {
        let _ = write!(out, " | {desc}");
    }
    out.push('\n');
}

fn page_brand<'a>(page: &Page, brands: &'a [ResolvedBrand]) -> Result<&'a ResolvedBrand, ContentError> {
    let slug = page.brand.as_deref().ok_or_else(|| ContentError::Input {
        page: page.id,
        reason: format!("{} page has no brand", page.kind),
    })?;
    brands
        .iter()
        .find(|b| b.slug == slug)
        .ok_or_else(|| ContentError::Input {
            page: page.id,
            reason: format!("brand '{slug}' is not on this site"),
        })
}

/// Compose the synthesis prompt for one page.
pub fn build_prompt(
    site: &Site,
    page: &Page,
    brands: &[ResolvedBrand],
) -> Result<String, ContentError> {
    let region = site.region.to_uppercase();
    let mut prompt = match page.kind {
        PageKind::Homepage => format!(
            "You are writing the homepage of {}, a comparison site for readers in {region}.",
            site.name
        ),
        PageKind::Comparison => format!(
            "You are writing a comparison page titled \"{}\" for readers in {region}.",
            page.title
        ),
        PageKind::BrandReview => {
            let brand = page_brand(page, brands)?;
            format!(
                "You are writing an in-depth review of {} for readers in {region}.",
                brand.name
            )
        }
        PageKind::BonusReview => {
            let brand = page_brand(page, brands)?;
            format!(
                "You are reviewing the welcome offer of {} for readers in {region}. The offer is: {}.",
                brand.name,
                brand.fields.welcome_bonus.as_deref().unwrap_or("not yet published")
            )
        }
        PageKind::Evergreen => format!(
            "You are writing a guide about {} for readers in {region}.",
            page.topic.as_deref().unwrap_or(&page.title)
        ),
        PageKind::News => format!(
            "You are writing the news hub introduction for {}, for readers in {region}.",
            site.name
        ),
        PageKind::NewsArticle => format!(
            "You are writing a news article titled \"{}\" for readers in {region}.",
            page.title
        ),
    };
    let _ = write!(prompt, " Language: {}.", site.language);

    if matches!(page.kind, PageKind::Homepage | PageKind::Comparison) && !brands.is_empty() {
        prompt.push_str("\n\nFeatured brands, in rank order:\n");
        for brand in brands {
            brand_line(&mut prompt, brand);
        }
    }
    if let PageKind::BrandReview = page.kind {
        let brand = page_brand(page, brands)?;
        prompt.push_str("\n\nKnown facts:\n");
        brand_line(&mut prompt, brand);
        for (label, value) in [
            ("license", &brand.fields.license_info),
            ("payment methods", &brand.fields.payment_methods),
            ("withdrawals", &brand.fields.withdrawal_timeframe),
        ] {
            if let Some(value) = value {
                let _ = writeln!(prompt, "- {label}: {value}");
            }
        }
    }

    prompt.push_str("\n\nReturn a JSON object with these keys:\n");
    for (key, brief) in schema(page.kind) {
        let _ = writeln!(prompt, "- {key}: {brief}");
    }

    if let Some(directive) = &page.directive {
        let _ = write!(prompt, "\n\nAdditional instructions:\n{directive}");
    }
    Ok(prompt)
}

// ============================================================================
// Committing
// ============================================================================

/// Replace a page's content, snapshotting the prior content first.
///
/// `applied` is the directive the prompt was built with. It is stored with
/// the snapshot, and cleared from the page only if the page still carries
/// that same directive; one set during synthesis stays pending.
pub fn commit_content(
    store: &Store,
    site: SiteId,
    page: PageId,
    content: Map<String, Value>,
    applied: Option<&str>,
) -> Result<Page, ContentError> {
    let mut current = store.load_page(site, page)?;
    if current.directive.as_deref() == applied {
        current.directive = None;
    }
    let snapshot = match current.content.take() {
        Some(prior) => Some(ContentVersion {
            page_id: page,
            version: store.next_history_version(site, page)?,
            content: prior,
            generated_at: current.content_timestamp,
            directive: applied.map(str::to_string),
            recorded_at: Utc::now(),
        }),
        None => None,
    };
    replace_with_snapshot(store, site, current, Value::Object(content), snapshot)
}

fn replace_with_snapshot(
    store: &Store,
    site: SiteId,
    mut page: Page,
    content: Value,
    snapshot: Option<ContentVersion>,
) -> Result<Page, ContentError> {
    if let Some(entry) = &snapshot {
        store.append_history(site, entry)?;
    }
    page.content = Some(content);
    page.content_timestamp = Some(Utc::now());
    if let Err(e) = store.save_page(&page) {
        if let Some(entry) = &snapshot
            && let Err(undo) = store.discard_history(site, entry)
        {
            warn!(site = %site, page = %page.id, error = %undo, "could not discard history entry");
        }
        return Err(e.into());
    }
    debug!(
        site = %site,
        page = %page.id,
        history = snapshot.as_ref().map(|e| e.version),
        "committed content"
    );
    Ok(page)
}

/// Bring back a history entry as the live content.
///
/// The content being replaced is snapshotted first, so history stays
/// append-only and a restore can itself be undone. Takes the site lock.
pub fn restore(
    store: &Store,
    site: SiteId,
    page: PageId,
    version: u32,
) -> Result<Page, ContentError> {
    let _lock = lock::acquire(&store.locks_dir(), site, &format!("restore-{}", Uuid::new_v4()))?;
    let entry = store.load_history(site, page, version)?;
    let mut current = store.load_page(site, page)?;
    let snapshot = match current.content.take() {
        Some(prior) => Some(ContentVersion {
            page_id: page,
            version: store.next_history_version(site, page)?,
            content: prior,
            generated_at: current.content_timestamp,
            directive: Some(format!("restored version {version}")),
            recorded_at: Utc::now(),
        }),
        None => None,
    };
    let restored = replace_with_snapshot(store, site, current, entry.content, snapshot)?;
    info!(site = %site, page = %page, version, "restored page content");
    Ok(restored)
}

// ============================================================================
// Stage
// ============================================================================

/// Pages a scope targets.
pub fn select_targets(
    site: SiteId,
    pages: &[Page],
    scope: &ContentScope,
    force: bool,
) -> Result<Vec<Page>, ContentError> {
    let wanted = |p: &&Page| force || !p.is_generated() || p.directive.is_some();
    Ok(match scope {
        ContentScope::Site => pages.iter().filter(wanted).cloned().collect(),
        ContentScope::NewPagesOnly => pages.iter().filter(|p| !p.is_generated()).cloned().collect(),
        ContentScope::Page(id) => {
            let page = pages
                .iter()
                .find(|p| p.id == *id)
                .ok_or(StoreError::PageNotFound(site, *id))?;
            if wanted(&page) {
                vec![page.clone()]
            } else {
                Vec::new()
            }
        }
    })
}

enum Unit {
    Done,
    /// Carries the error text, which names the page.
    Failed(String),
    Skipped,
}

/// Runs content jobs.
pub struct ContentStage<'a> {
    store: &'a Store,
    synth: &'a dyn Synthesizer,
    concurrency: usize,
}

impl<'a> ContentStage<'a> {
    pub fn new(store: &'a Store, synth: &'a dyn Synthesizer, concurrency: usize) -> Self {
        Self {
            store,
            synth,
            concurrency: concurrency.max(1),
        }
    }

    /// Synthesize and commit one page.
    pub fn generate_page(
        &self,
        site: &Site,
        brands: &[ResolvedBrand],
        page: &Page,
    ) -> Result<Page, ContentError> {
        let prompt = build_prompt(site, page, brands)?;
        let content = self
            .synth
            .synthesize(&prompt)
            .map_err(|source| ContentError::Synthesis {
                page: page.id,
                source,
            })?;
        commit_content(self.store, site.id, page.id, content, page.directive.as_deref())
    }

    /// Run a content job. A `directive` is stored on the scoped page first,
    /// under the lock the job already holds.
    pub fn run(
        &self,
        ctx: &JobContext,
        scope: &ContentScope,
        force: bool,
        directive: Option<&str>,
    ) -> Result<Outcome, ContentError> {
        let site_id = ctx.site_id();
        if let Some(directive) = directive {
            let ContentScope::Page(page) = scope else {
                return Err(ContentError::DirectiveScope);
            };
            self.store
                .set_directive(site_id, *page, Some(directive.to_string()))?;
        }
        let site = self.store.load_site(site_id)?;
        let brands = resolve_site_brands(&site, &self.store.load_brands()?)?;
        let targets = select_targets(site_id, &self.store.list_pages(site_id)?, scope, force)?;
        ctx.set_total(targets.len() as u32);
        if targets.is_empty() {
            info!(site = %site_id, "no pages to generate");
            return Ok(Outcome::Completed);
        }

        let previous = status::begin(self.store, site_id, SiteStatus::Generating)?;
        info!(site = %site_id, pages = targets.len(), "generating content");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("synth-{i}"))
            .build()?;
        let units: Vec<Unit> = pool.install(|| {
            targets
                .par_iter()
                .map(|page| {
                    if ctx.cancel_requested() {
                        return Unit::Skipped;
                    }
                    let unit = match self.generate_page(&site, &brands, page) {
                        Ok(_) => Unit::Done,
                        Err(e) => {
                            warn!(site = %site_id, page = %page.id, error = %e, "page generation failed");
                            Unit::Failed(e.to_string())
                        }
                    };
                    ctx.advance();
                    unit
                })
                .collect()
        });

        let failures: Vec<&str> = units
            .iter()
            .filter_map(|u| match u {
                Unit::Failed(cause) => Some(cause.as_str()),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            return Err(ContentError::PagesFailed {
                failed: failures.len(),
                total: targets.len(),
                detail: failures.join("; "),
            });
        }

        if units.iter().any(|u| matches!(u, Unit::Skipped)) {
            status::finish(self.store, site_id, previous)?;
            info!(site = %site_id, "content generation cancelled");
            return Ok(Outcome::Cancelled);
        }

        let settled = match scope {
            ContentScope::Site => SiteStatus::Generated,
            ContentScope::NewPagesOnly | ContentScope::Page(_) => match previous {
                SiteStatus::Built | SiteStatus::Deployed => previous,
                _ => SiteStatus::Generated,
            },
        };
        status::finish(self.store, site_id, settled)?;
        info!(site = %site_id, pages = targets.len(), "content generated");
        Ok(Outcome::Completed)
    }
}
