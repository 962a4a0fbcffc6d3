//! Build stage: assemble every page of a site into a new immutable release.
//!
//! ## Steps
//!
//! 1. Refuse to start unless some page has content (no side effects).
//! 2. Enter `building`, allocate `current_version` and persist the bump
//!    before rendering. A failed build still consumes its number.
//! 3. Render the site in memory ([`render_site`]): merged brand layers,
//!    nav and footer, cluster links, CTA tables, sitemap, robots and
//!    favicon. Any input problem aborts here with [`BuildError::Input`].
//! 4. Write the files and referenced media into a fresh staging directory,
//!    digest them into `manifest.json`, and publish with one rename.
//! 5. Record `last_built_version` and `built_at`, settle to `built`.
//!
//! [`render_site`] reads neither the clock nor the filesystem, so the same
//! inputs always give the same bytes.

use crate::brand::{BrandRegistry, ResolvedBrand, merge_layers, resolve_site_brands};
use crate::jobs::{JobContext, Outcome};
use crate::nav::{self, Link};
use crate::release::{MANIFEST_FILENAME, ReleaseError, ReleaseManifest, ReleaseStore, hash_tree};
use crate::render::{self, CtaRowView, CtaView, HeroImage, PageView, SiteContext};
use crate::sitemap;
use crate::status::{self, StatusError};
use crate::store::{Store, StoreError};
use crate::types::{BrandFields, CtaTable, Page, PageKind, Site, SiteId, SiteStatus};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error("invalid build input: {0}")]
    Input(String),
    #[error("site {0} has no generated content to build")]
    NoContent(SiteId),
}

/// Files of a rendered site, keyed by release-relative path.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSite {
    pub files: BTreeMap<String, String>,
    /// Media file names to copy into `assets/`.
    pub assets: BTreeSet<String>,
    /// Media file names to copy into `assets/logos/`.
    pub logos: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub version: u32,
    pub path: PathBuf,
    pub files: usize,
}

fn input(msg: impl Into<String>) -> BuildError {
    BuildError::Input(msg.into())
}

/// Resolve a CTA table against the site's brands.
///
/// Rows for brands the site does not list fall back to the registry's
/// global and regional layers.
pub fn cta_view(
    table: &CtaTable,
    site: &Site,
    brands: &[ResolvedBrand],
    registry: &BrandRegistry,
) -> Result<CtaView, BuildError> {
    let mut rows: Vec<_> = table.rows.iter().filter(|r| r.visible).collect();
    rows.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.brand.cmp(&b.brand)));
    let rows = rows
        .into_iter()
        .map(|row| {
            let brand = match brands.iter().find(|b| b.slug == row.brand) {
                Some(b) => b.clone(),
                None => {
                    let global = registry.find(&row.brand).ok_or_else(|| {
                        input(format!(
                            "CTA table '{}' names unknown brand '{}'",
                            table.slug, row.brand
                        ))
                    })?;
                    ResolvedBrand {
                        slug: global.slug.clone(),
                        name: global.name.clone(),
                        rank: row.rank,
                        fields: merge_layers(
                            &global.fields,
                            registry.regional(&site.region, &global.slug),
                            &BrandFields::default(),
                        ),
                    }
                }
            };
            let non_empty = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
            Ok(CtaRowView {
                rank: row.rank,
                link: brand.link().to_string(),
                rating: brand.fields.rating,
                bonus_text: non_empty(&row.bonus_text).or(brand.fields.welcome_bonus.clone()),
                cta_text: non_empty(&row.cta_text).unwrap_or_else(|| "Visit Site".to_string()),
                badge: non_empty(&row.badge),
                logo: brand.fields.logo,
                brand_name: brand.name,
            })
        })
        .collect::<Result<Vec<_>, BuildError>>()?;
    Ok(CtaView {
        name: table.name.clone(),
        rows,
    })
}

fn check_media_name(owner: &str, name: &str) -> Result<(), BuildError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\']);
    if plain {
        Ok(())
    } else {
        Err(input(format!("{owner} '{name}' is not a plain file name")))
    }
}

/// Keep a brand logo only when the media directory has it, recording it for
/// the release. Missing logos render as the brand name alone.
fn usable_logo(
    site: SiteId,
    brand: &str,
    logo: Option<String>,
    media: &BTreeSet<String>,
    logos: &mut BTreeSet<String>,
) -> Result<Option<String>, BuildError> {
    let Some(name) = logo else {
        return Ok(None);
    };
    check_media_name(&format!("logo of brand {brand}"), &name)?;
    if media.contains(&name) {
        logos.insert(name.clone());
        Ok(Some(name))
    } else {
        warn!(site = %site, brand, asset = %name, "brand logo missing, showing name only");
        Ok(None)
    }
}

fn news_articles(pages: &[Page], routes: &nav::Routes) -> Vec<Link> {
    let mut articles: Vec<&Page> = pages
        .iter()
        .filter(|p| p.kind == PageKind::NewsArticle)
        .collect();
    articles.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    articles
        .into_iter()
        .map(|p| Link {
            label: nav::display_title(p).to_string(),
            url: routes.url(p.id).to_string(),
        })
        .collect()
}

/// Render a whole site in memory.
///
/// `media` lists the file names available in the site's media directory;
/// hero images and brand logos not in it render a text fallback.
pub fn render_site(
    site: &Site,
    pages: &[Page],
    registry: &BrandRegistry,
    media: &BTreeSet<String>,
) -> Result<RenderedSite, BuildError> {
    let mut logos = BTreeSet::new();
    let mut brands = resolve_site_brands(site, registry).map_err(|e| input(e.to_string()))?;
    for brand in &mut brands {
        brand.fields.logo = usable_logo(site.id, &brand.slug, brand.fields.logo.take(), media, &mut logos)?;
    }
    let routes = nav::routes(pages).map_err(|e| input(e.to_string()))?;
    let nav_entries = nav::nav_entries(pages, &routes);
    let footer = nav::footer(pages, &routes);
    let ctx = SiteContext {
        site,
        brands: &brands,
        nav: &nav_entries,
        footer: &footer,
    };

    let mut files = BTreeMap::new();
    let mut assets = BTreeSet::new();
    for page in pages {
        if page.kind.needs_brand() {
            let slug = page
                .brand
                .as_deref()
                .ok_or_else(|| input(format!("{} page {} names no brand", page.kind, page.id)))?;
            if !brands.iter().any(|b| b.slug == slug) {
                return Err(input(format!(
                    "page {} reviews brand '{slug}', which is not on the site",
                    page.id
                )));
            }
        }
        let cta = match &page.cta_table {
            Some(slug) => {
                let table = site
                    .cta_tables
                    .iter()
                    .find(|t| &t.slug == slug)
                    .ok_or_else(|| {
                        input(format!("page {} names unknown CTA table '{slug}'", page.id))
                    })?;
                let mut view = cta_view(table, site, &brands, registry)?;
                for row in &mut view.rows {
                    row.logo = usable_logo(site.id, &row.brand_name, row.logo.take(), media, &mut logos)?;
                }
                Some(view)
            }
            None => None,
        };
        let hero = match &page.hero_image {
            Some(name) => {
                check_media_name(&format!("page {} hero image", page.id), name)?;
                if media.contains(name) {
                    assets.insert(name.clone());
                    Some(HeroImage::Asset(name.clone()))
                } else {
                    warn!(site = %site.id, page = %page.id, asset = %name, "hero image missing, using text fallback");
                    Some(HeroImage::Missing)
                }
            }
            None => None,
        };
        let route = routes
            .get(page.id)
            .ok_or_else(|| input(format!("page {} has no route", page.id)))?;
        let view = PageView {
            page,
            url: &route.url,
            cluster: nav::cluster_links(page, pages, &routes),
            cta,
            hero,
            articles: if page.kind == PageKind::News {
                news_articles(pages, &routes)
            } else {
                Vec::new()
            },
        };
        files.insert(
            route.path.clone(),
            render::render_page(&ctx, &view).into_string(),
        );
    }

    files.insert(
        "sitemap.xml".to_string(),
        sitemap::render_sitemap(sitemap::site_domain(site), pages, &routes),
    );
    files.insert("robots.txt".to_string(), sitemap::robots_txt(site));
    files.insert("favicon.svg".to_string(), render::favicon_svg(&site.name));
    Ok(RenderedSite {
        files,
        assets,
        logos,
    })
}

/// Names of plain files in a media directory.
pub fn media_index(dir: &Path) -> Result<BTreeSet<String>, BuildError> {
    let mut names = BTreeSet::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && let Some(name) = entry.file_name().to_str()
        {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

fn write_release(
    staging: &Path,
    rendered: &RenderedSite,
    media_dir: &Path,
    ctx: &JobContext,
) -> Result<Option<usize>, BuildError> {
    for (rel, body) in &rendered.files {
        if ctx.cancel_requested() {
            return Ok(None);
        }
        let path = staging.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, body)?;
        ctx.advance();
    }
    for (names, dir) in [
        (&rendered.assets, staging.join("assets")),
        (&rendered.logos, staging.join("assets").join("logos")),
    ] {
        if names.is_empty() {
            continue;
        }
        fs::create_dir_all(&dir)?;
        for name in names {
            fs::copy(media_dir.join(name), dir.join(name))?;
        }
    }
    Ok(Some(
        rendered.files.len() + rendered.assets.len() + rendered.logos.len(),
    ))
}

/// Runs build jobs.
pub struct Builder<'a> {
    store: &'a Store,
    releases: &'a ReleaseStore,
}

impl<'a> Builder<'a> {
    pub fn new(store: &'a Store, releases: &'a ReleaseStore) -> Self {
        Self { store, releases }
    }

    pub fn run(&self, ctx: &JobContext) -> Result<Outcome, BuildError> {
        Ok(match self.build(ctx)? {
            Some(_) => Outcome::Completed,
            None => Outcome::Cancelled,
        })
    }

    /// Build the next release. `None` when the job was cancelled; the
    /// allocated version is then skipped and the status restored.
    pub fn build(&self, ctx: &JobContext) -> Result<Option<BuildReport>, BuildError> {
        let site_id = ctx.site_id();
        let started = Utc::now();
        let pages = self.store.list_pages(site_id)?;
        if !pages.iter().any(Page::is_generated) {
            return Err(BuildError::NoContent(site_id));
        }

        let previous = status::begin(self.store, site_id, SiteStatus::Building)?;
        let site = self
            .store
            .update_site(site_id, |s| s.current_version += 1)?;
        let version = site.current_version - 1;
        info!(site = %site_id, version, pages = pages.len(), "building release");

        let registry = self.store.load_brands()?;
        let media_dir = self.store.media_dir(site_id);
        let rendered = render_site(&site, &pages, &registry, &media_index(&media_dir)?)?;
        ctx.set_total(rendered.files.len() as u32);

        let staging = self.releases.create_staging(&site, version)?;
        let published = write_release(&staging, &rendered, &media_dir, ctx)
            .and_then(|written| {
                let Some(files) = written else {
                    return Ok(None);
                };
                let manifest = ReleaseManifest::new(site_id, version, Utc::now(), hash_tree(&staging)?);
                fs::write(
                    staging.join(MANIFEST_FILENAME),
                    serde_json::to_string_pretty(&manifest)?,
                )?;
                let path = self.releases.publish(&staging, &site, version)?;
                Ok(Some((files, path)))
            });
        let (files, path) = match published {
            Ok(Some(done)) => done,
            Ok(None) => {
                discard_staging(&staging);
                status::finish(self.store, site_id, previous)?;
                info!(site = %site_id, version, "build cancelled");
                return Ok(None);
            }
            Err(e) => {
                discard_staging(&staging);
                return Err(e);
            }
        };

        self.store.update_site(site_id, |s| {
            s.last_built_version = Some(version);
            s.built_at = Some(started);
        })?;
        status::complete(self.store, site_id)?;
        info!(site = %site_id, version, files, path = %path.display(), "release built");
        Ok(Some(BuildReport {
            version,
            path,
            files,
        }))
    }
}

fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        warn!(path = %staging.display(), error = %e, "could not remove staging directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{bundle, job_context, make_page, make_site, registry_with};
    use crate::types::{CtaRow, SiteBrand};
    use serde_json::json;
    use tempfile::TempDir;

    fn generated(store: &Store, site: SiteId) {
        for mut page in store.list_pages(site).unwrap() {
            page.content = Some(json!({"hero_title": format!("Page {}", page.id)}));
            page.content_timestamp = Some(crate::test_helpers::ts(1_000));
            store.save_page(&page).unwrap();
        }
    }

    fn cta_site() -> (Site, BrandRegistry) {
        let mut registry = registry_with(&["alpha", "beta", "gamma"]);
        registry.brands[0].fields.welcome_bonus = Some("£10".into());
        registry.brands[2].fields.welcome_bonus = Some("£5".into());
        let mut site = make_site(1, "CTA Site");
        site.brands = vec![SiteBrand {
            brand: "alpha".into(),
            rank: 1,
            overrides: BrandFields {
                welcome_bonus: Some("£20".into()),
                ..Default::default()
            },
        }];
        (site, registry)
    }

    fn row(brand: &str, rank: u32) -> CtaRow {
        CtaRow {
            brand: brand.into(),
            rank,
            bonus_text: None,
            cta_text: None,
            badge: None,
            visible: true,
        }
    }

    #[test]
    fn cta_rows_visible_in_rank_order_with_fallbacks() {
        let (site, registry) = cta_site();
        let brands = resolve_site_brands(&site, &registry).unwrap();
        let mut hidden = row("beta", 1);
        hidden.visible = false;
        let mut custom = row("alpha", 3);
        custom.bonus_text = Some("Exclusive £50".into());
        custom.cta_text = Some("Claim".into());
        let table = CtaTable {
            slug: "top".into(),
            name: "Top".into(),
            rows: vec![custom, hidden, row("gamma", 2)],
        };

        let view = cta_view(&table, &site, &brands, &registry).unwrap();
        let names: Vec<&str> = view.rows.iter().map(|r| r.brand_name.as_str()).collect();
        assert_eq!(names, vec!["Gamma", "Alpha"]);
        // gamma is not a site brand: registry layer, default button text.
        assert_eq!(view.rows[0].bonus_text.as_deref(), Some("£5"));
        assert_eq!(view.rows[0].cta_text, "Visit Site");
        assert_eq!(view.rows[1].bonus_text.as_deref(), Some("Exclusive £50"));
        assert_eq!(view.rows[1].cta_text, "Claim");
    }

    #[test]
    fn cta_row_bonus_falls_back_to_merged_brand() {
        let (site, registry) = cta_site();
        let brands = resolve_site_brands(&site, &registry).unwrap();
        let table = CtaTable {
            slug: "top".into(),
            name: "Top".into(),
            rows: vec![row("alpha", 1)],
        };
        let view = cta_view(&table, &site, &brands, &registry).unwrap();
        assert_eq!(view.rows[0].bonus_text.as_deref(), Some("£20"));
    }

    #[test]
    fn cta_unknown_brand_is_input_error() {
        let (site, registry) = cta_site();
        let table = CtaTable {
            slug: "top".into(),
            name: "Top".into(),
            rows: vec![row("ghost", 1)],
        };
        assert!(matches!(
            cta_view(&table, &site, &[], &registry),
            Err(BuildError::Input(msg)) if msg.contains("ghost")
        ));
    }

    #[test]
    fn render_site_is_deterministic() {
        let (site, registry) = cta_site();
        let mut home = make_page(1, "home");
        home.content = Some(json!({"hero_title": "Hello"}));
        let pages = vec![home];
        let a = render_site(&site, &pages, &registry, &BTreeSet::new()).unwrap();
        let b = render_site(&site, &pages, &registry, &BTreeSet::new()).unwrap();
        assert_eq!(a, b);
        let keys: Vec<&str> = a.files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["favicon.svg", "index.html", "robots.txt", "sitemap.xml"]);
    }

    #[test]
    fn render_site_input_errors() {
        let (site, registry) = cta_site();

        let mut review = make_page(2, "beta");
        review.kind = PageKind::BrandReview;
        review.brand = Some("beta".into());
        let err = render_site(&site, &[review], &registry, &BTreeSet::new()).unwrap_err();
        assert!(err.to_string().contains("not on the site"));

        let mut home = make_page(1, "home");
        home.cta_table = Some("missing".into());
        let err = render_site(&site, &[home], &registry, &BTreeSet::new()).unwrap_err();
        assert!(err.to_string().contains("unknown CTA table"));

        let mut home = make_page(1, "home");
        home.hero_image = Some("../etc/passwd".into());
        assert!(matches!(
            render_site(&site, &[home], &registry, &BTreeSet::new()),
            Err(BuildError::Input(_))
        ));
    }

    #[test]
    fn missing_hero_asset_uses_fallback() {
        let (site, registry) = cta_site();
        let mut home = make_page(1, "home");
        home.content = Some(json!({"hero_title": "Hello"}));
        home.hero_image = Some("hero.jpg".into());

        let rendered = render_site(&site, &[home.clone()], &registry, &BTreeSet::new()).unwrap();
        assert!(rendered.assets.is_empty());
        assert!(rendered.files["index.html"].contains("hero-fallback"));

        let media = BTreeSet::from(["hero.jpg".to_string()]);
        let rendered = render_site(&site, &[home], &registry, &media).unwrap();
        assert!(rendered.assets.contains("hero.jpg"));
        assert!(rendered.files["index.html"].contains(r#"src="/assets/hero.jpg""#));
    }

    #[test]
    fn brand_logos_need_a_media_file() {
        let (mut site, mut registry) = cta_site();
        registry.brands[0].fields.logo = Some("alpha.png".into());
        registry.brands[2].fields.logo = Some("gamma.png".into());
        let mut home = make_page(1, "home");
        home.content = Some(json!({"hero_title": "Hello"}));
        home.cta_table = Some("top".into());
        site.cta_tables = vec![CtaTable {
            slug: "top".into(),
            name: "Top".into(),
            rows: vec![row("alpha", 1), row("gamma", 2)],
        }];

        let media = BTreeSet::from(["alpha.png".to_string()]);
        let rendered = render_site(&site, &[home.clone()], &registry, &media).unwrap();
        assert_eq!(rendered.logos, BTreeSet::from(["alpha.png".to_string()]));
        let html = &rendered.files["index.html"];
        assert!(html.contains(r#"src="/assets/logos/alpha.png""#));
        assert!(!html.contains("gamma.png"));
        assert!(html.contains("Gamma"));

        registry.brands[0].fields.logo = Some("../alpha.png".into());
        assert!(matches!(
            render_site(&site, &[home], &registry, &media),
            Err(BuildError::Input(msg)) if msg.contains("logo of brand alpha")
        ));
    }

    #[test]
    fn build_copies_brand_logos_into_release() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let mut site_bundle = bundle("Logo Site");
        site_bundle.registry_brands[0].fields.logo = Some("alpha.png".into());
        site_bundle.registry_brands[1].fields.logo = Some("beta.png".into());
        let site_id = store.import_site(site_bundle).unwrap();
        fs::write(store.media_dir(site_id).join("alpha.png"), b"png").unwrap();
        generated(&store, site_id);

        let report = Builder::new(&store, &releases)
            .build(&job_context(&store, site_id))
            .unwrap()
            .unwrap();

        assert_eq!(fs::read(report.path.join("assets/logos/alpha.png")).unwrap(), b"png");
        assert!(!report.path.join("assets/logos/beta.png").exists());
        let review = fs::read_to_string(report.path.join("reviews/alpha-review.html")).unwrap();
        assert!(review.contains(r#"src="/assets/logos/alpha.png""#));
        let site = store.load_site(site_id).unwrap();
        let manifest = releases.verify(&site, 1).unwrap();
        assert!(manifest.files.contains_key("assets/logos/alpha.png"));
    }

    #[test]
    fn build_publishes_release_and_bumps_version() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let site_id = store.import_site(bundle("Build Me")).unwrap();
        generated(&store, site_id);

        let report = Builder::new(&store, &releases)
            .build(&job_context(&store, site_id))
            .unwrap()
            .unwrap();

        assert_eq!(report.version, 1);
        let site = store.load_site(site_id).unwrap();
        assert_eq!(site.current_version, 2);
        assert_eq!(site.last_built_version, Some(1));
        assert_eq!(site.status, SiteStatus::Built);
        assert!(site.built_at.is_some());
        let manifest = releases.verify(&site, 1).unwrap();
        assert!(manifest.files.contains_key("index.html"));
        assert!(manifest.files.contains_key("reviews/alpha-review.html"));
    }

    #[test]
    fn build_without_content_has_no_side_effects() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let site_id = store.import_site(bundle("Empty")).unwrap();

        let err = Builder::new(&store, &releases)
            .build(&job_context(&store, site_id))
            .unwrap_err();
        assert!(matches!(err, BuildError::NoContent(_)));
        let site = store.load_site(site_id).unwrap();
        assert_eq!(site.current_version, 1);
        assert_eq!(site.status, SiteStatus::Draft);
    }

    #[test]
    fn failed_build_consumes_version_and_leaves_no_staging() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let site_id = store.import_site(bundle("Broken")).unwrap();
        generated(&store, site_id);
        let mut page = store.load_page(site_id, crate::types::PageId(1)).unwrap();
        page.cta_table = Some("nope".into());
        store.save_page(&page).unwrap();

        let err = Builder::new(&store, &releases)
            .build(&job_context(&store, site_id))
            .unwrap_err();
        assert!(matches!(err, BuildError::Input(_)));
        let site = store.load_site(site_id).unwrap();
        assert_eq!(site.current_version, 2, "number is consumed");
        assert_eq!(site.last_built_version, None);
        assert!(releases.versions(&site).unwrap().is_empty());
    }

    #[test]
    fn rebuild_of_unchanged_site_differs_only_in_manifest_time() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let site_id = store.import_site(bundle("Twice")).unwrap();
        generated(&store, site_id);
        let builder = Builder::new(&store, &releases);

        builder.build(&job_context(&store, site_id)).unwrap().unwrap();
        builder.build(&job_context(&store, site_id)).unwrap().unwrap();

        let site = store.load_site(site_id).unwrap();
        let first = releases.load_manifest(&site, 1).unwrap();
        let second = releases.load_manifest(&site, 2).unwrap();
        assert_eq!(first.files, second.files);
        assert_eq!(releases.versions(&site).unwrap(), vec![1, 2]);
    }

    #[test]
    fn cancelled_build_restores_status() {
        let data = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Store::open(data.path()).unwrap();
        let releases = ReleaseStore::new(out.path());
        let site_id = store.import_site(bundle("Cancel")).unwrap();
        generated(&store, site_id);
        let ctx = job_context(&store, site_id);
        crate::jobs::request_cancel(&store, &ctx.job_id()).unwrap();

        let report = Builder::new(&store, &releases).build(&ctx).unwrap();
        assert!(report.is_none());
        let site = store.load_site(site_id).unwrap();
        assert_eq!(site.status, SiteStatus::Draft);
        assert_eq!(site.current_version, 2);
        assert!(releases.versions(&site).unwrap().is_empty());
        let leftovers = fs::read_dir(releases.site_dir(&site)).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
