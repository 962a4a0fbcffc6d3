//! Persisted JSON records for sites, pages, content history, and remote state.
//!
//! ## Layout
//!
//! ```text
//! data/
//! ├── brands.json                      # Global brands + regional layers
//! ├── sites/
//! │   └── {site_id}/
//! │       ├── site.json
//! │       ├── remote.json              # Created on first deploy
//! │       ├── media/                   # Hero images and other assets
//! │       ├── pages/{page_id}.json
//! │       └── history/{page_id}/{n:04}.json
//! ├── jobs/{job_id}.json               # See crate::jobs
//! └── locks/{site_id}.lock, .holder    # See crate::lock
//! ```
//!
//! Every write goes through [`write_json_atomic`]: serialize to a sibling temp
//! file, fsync, rename over the target. A reader therefore sees either the old
//! record or the new one, never a torn write. History entries are created with
//! `create_new`, so an existing version can never be overwritten.

use crate::brand::{Brand, BrandRegistry};
use crate::naming::slugify;
use crate::types::{
    BrandFields, ContentVersion, CtaTable, MenuPlacement, Page, PageId, PageKind, RemoteState,
    Site, SiteBrand, SiteId, SiteStatus, Timestamp,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("site {0} not found")]
    SiteNotFound(SiteId),
    #[error("page {1} not found in site {0}")]
    PageNotFound(SiteId, PageId),
    #[error("history version {1} not found for page {0}")]
    VersionNotFound(PageId, u32),
    #[error("already exists: {0}")]
    Uniqueness(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

// ============================================================================
// Atomic JSON files
// ============================================================================

/// Write `value` as pretty JSON to `path` via temp file + fsync + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Read a JSON record, `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Numeric stems of `*.json` files in a directory, ascending.
fn numbered_entries(dir: &Path) -> Result<Vec<u32>, StoreError> {
    let mut ids = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "json")
            && let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

// ============================================================================
// Import bundles
// ============================================================================

/// A page as supplied by an import bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPage {
    pub kind: PageKind,
    pub title: String,
    /// Derived from the title when absent.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub cta_table: Option<String>,
    #[serde(default)]
    pub hero_image: Option<String>,
    #[serde(default)]
    pub custom_head: Option<String>,
    #[serde(default)]
    pub published_at: Option<Timestamp>,
    /// Kind defaults apply when absent.
    #[serde(default)]
    pub menu: Option<MenuPlacement>,
    /// Slug of the nav parent page within the same bundle.
    #[serde(default)]
    pub nav_parent: Option<String>,
    #[serde(default)]
    pub directive: Option<String>,
}

/// A complete site definition for `site-factory import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteBundle {
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
    pub region: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub brands: Vec<SiteBrand>,
    #[serde(default)]
    pub cta_tables: Vec<CtaTable>,
    #[serde(default)]
    pub custom_robots_txt: Option<String>,
    #[serde(default)]
    pub custom_head: Option<String>,
    #[serde(default)]
    pub pages: Vec<NewPage>,
    /// Global brand records to add to the registry.
    #[serde(default)]
    pub registry_brands: Vec<Brand>,
    /// Regional layers to merge into the registry.
    #[serde(default)]
    pub registry_regions: BTreeMap<String, BTreeMap<String, BrandFields>>,
}

fn default_language() -> String {
    "en".to_string()
}

// ============================================================================
// Store
// ============================================================================

/// Handle on the data directory. Cheap to clone; holds no open files.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open (and create if needed) a data directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("sites"))?;
        fs::create_dir_all(root.join("jobs"))?;
        fs::create_dir_all(root.join("locks"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn site_dir(&self, id: SiteId) -> PathBuf {
        self.root.join("sites").join(id.to_string())
    }

    fn site_path(&self, id: SiteId) -> PathBuf {
        self.site_dir(id).join("site.json")
    }

    fn page_path(&self, site: SiteId, page: PageId) -> PathBuf {
        self.site_dir(site)
            .join("pages")
            .join(format!("{page}.json"))
    }

    fn history_dir(&self, site: SiteId, page: PageId) -> PathBuf {
        self.site_dir(site).join("history").join(page.to_string())
    }

    /// Directory holding media assets referenced by pages.
    pub fn media_dir(&self, id: SiteId) -> PathBuf {
        self.site_dir(id).join("media")
    }

    // --- brands -----------------------------------------------------------

    pub fn load_brands(&self) -> Result<BrandRegistry, StoreError> {
        Ok(read_json(&self.root.join("brands.json"))?.unwrap_or_default())
    }

    pub fn save_brands(&self, registry: &BrandRegistry) -> Result<(), StoreError> {
        write_json_atomic(&self.root.join("brands.json"), registry)
    }

    /// Add a global brand. Re-adding an identical record is a no-op.
    pub fn add_brand(&self, brand: Brand) -> Result<(), StoreError> {
        let mut registry = self.load_brands()?;
        match registry.find(&brand.slug) {
            Some(existing) if *existing == brand => return Ok(()),
            Some(_) => {
                return Err(StoreError::Uniqueness(format!(
                    "brand '{}' is already registered with different fields",
                    brand.slug
                )));
            }
            None => registry.brands.push(brand),
        }
        self.save_brands(&registry)
    }

    // --- sites ------------------------------------------------------------

    pub fn site_ids(&self) -> Result<Vec<SiteId>, StoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join("sites"))? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                ids.push(SiteId(id));
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        self.site_ids()?
            .into_iter()
            .map(|id| self.load_site(id))
            .collect()
    }

    pub fn load_site(&self, id: SiteId) -> Result<Site, StoreError> {
        read_json(&self.site_path(id))?.ok_or(StoreError::SiteNotFound(id))
    }

    pub fn save_site(&self, site: &Site) -> Result<(), StoreError> {
        write_json_atomic(&self.site_path(site.id), site)
    }

    /// Read-modify-write a site record.
    pub fn update_site<F>(&self, id: SiteId, f: F) -> Result<Site, StoreError>
    where
        F: FnOnce(&mut Site),
    {
        let mut site = self.load_site(id)?;
        f(&mut site);
        self.save_site(&site)?;
        Ok(site)
    }

    /// Create a site and its pages from a bundle.
    ///
    /// Rejects a slug already used by another site, duplicate page slugs
    /// within a kind, and nav parents that are missing or nested.
    pub fn import_site(&self, bundle: SiteBundle) -> Result<SiteId, StoreError> {
        for brand in &bundle.registry_brands {
            self.add_brand(brand.clone())?;
        }
        if !bundle.registry_regions.is_empty() {
            let mut registry = self.load_brands()?;
            for (region, layer) in &bundle.registry_regions {
                let target = registry.regions.entry(region.clone()).or_default();
                for (brand, fields) in layer {
                    target.insert(brand.clone(), fields.clone());
                }
            }
            self.save_brands(&registry)?;
        }

        let slug = bundle
            .slug
            .clone()
            .unwrap_or_else(|| slugify(&bundle.name));
        if slug.is_empty() {
            return Err(StoreError::Invalid(format!(
                "site '{}' has no usable slug",
                bundle.name
            )));
        }
        let existing = self.list_sites()?;
        if existing.iter().any(|s| s.slug == slug) {
            return Err(StoreError::Uniqueness(format!("site slug '{slug}'")));
        }
        let id = SiteId(existing.iter().map(|s| s.id.0).max().unwrap_or(0) + 1);

        let site = Site {
            id,
            name: bundle.name,
            slug,
            region: bundle.region,
            language: bundle.language,
            domain: bundle.domain,
            status: SiteStatus::Draft,
            current_version: 1,
            last_built_version: None,
            built_at: None,
            deployed_at: None,
            brands: bundle.brands,
            cta_tables: bundle.cta_tables,
            custom_robots_txt: bundle.custom_robots_txt,
            custom_head: bundle.custom_head,
            failure: None,
            created_at: Utc::now(),
        };
        let pages = pages_from_bundle(id, bundle.pages)?;
        self.save_site(&site)?;
        for page in &pages {
            self.save_page(page)?;
        }
        fs::create_dir_all(self.media_dir(id))?;
        info!(site = %id, slug = %site.slug, pages = pages.len(), "imported site");
        Ok(id)
    }

    // --- pages ------------------------------------------------------------

    pub fn list_pages(&self, site: SiteId) -> Result<Vec<Page>, StoreError> {
        numbered_entries(&self.site_dir(site).join("pages"))?
            .into_iter()
            .map(|id| self.load_page(site, PageId(id)))
            .collect()
    }

    pub fn load_page(&self, site: SiteId, page: PageId) -> Result<Page, StoreError> {
        read_json(&self.page_path(site, page))?.ok_or(StoreError::PageNotFound(site, page))
    }

    pub fn save_page(&self, page: &Page) -> Result<(), StoreError> {
        write_json_atomic(&self.page_path(page.site_id, page.id), page)
    }

    /// Add a page to an existing site, with kind menu defaults.
    pub fn add_page(&self, site: SiteId, new: NewPage) -> Result<Page, StoreError> {
        self.load_site(site)?;
        let pages = self.list_pages(site)?;
        let slug = new.slug.clone().unwrap_or_else(|| slugify(&new.title));
        if pages.iter().any(|p| p.kind == new.kind && p.slug == slug) {
            return Err(StoreError::Uniqueness(format!(
                "{} page slug '{slug}' in site {site}",
                new.kind
            )));
        }
        let id = PageId(pages.iter().map(|p| p.id.0).max().unwrap_or(0) + 1);
        let page = page_from_new(site, id, slug, new);
        if let Some(parent) = page.menu.parent {
            validate_parent(&pages, &page, parent)?;
        }
        self.save_page(&page)?;
        debug!(site = %site, page = %id, "added page");
        Ok(page)
    }

    /// Replace a page's menu placement and stamp `menu_timestamp`.
    ///
    /// The nav tree is one level deep: a page cannot be its own parent, a
    /// parent cannot itself have a parent, and a page with children cannot
    /// become a child.
    pub fn set_menu(
        &self,
        site: SiteId,
        page: PageId,
        menu: MenuPlacement,
    ) -> Result<Page, StoreError> {
        let pages = self.list_pages(site)?;
        let mut target = pages
            .iter()
            .find(|p| p.id == page)
            .cloned()
            .ok_or(StoreError::PageNotFound(site, page))?;
        if let Some(parent) = menu.parent {
            validate_parent(&pages, &target, parent)?;
        }
        if target.menu != menu {
            target.menu = menu;
            target.menu_timestamp = Some(Utc::now());
            self.save_page(&target)?;
        }
        Ok(target)
    }

    /// Store an operator instruction for the next generation of a page.
    pub fn set_directive(
        &self,
        site: SiteId,
        page: PageId,
        directive: Option<String>,
    ) -> Result<Page, StoreError> {
        let mut target = self.load_page(site, page)?;
        target.directive = directive.filter(|d| !d.trim().is_empty());
        self.save_page(&target)?;
        Ok(target)
    }

    // --- history ----------------------------------------------------------

    /// All snapshots of a page, oldest first.
    pub fn list_history(
        &self,
        site: SiteId,
        page: PageId,
    ) -> Result<Vec<ContentVersion>, StoreError> {
        let dir = self.history_dir(site, page);
        numbered_entries(&dir)?
            .into_iter()
            .map(|n| {
                read_json(&dir.join(format!("{n:04}.json")))?
                    .ok_or(StoreError::VersionNotFound(page, n))
            })
            .collect()
    }

    pub fn load_history(
        &self,
        site: SiteId,
        page: PageId,
        version: u32,
    ) -> Result<ContentVersion, StoreError> {
        read_json(&self.history_dir(site, page).join(format!("{version:04}.json")))?
            .ok_or(StoreError::VersionNotFound(page, version))
    }

    pub fn next_history_version(&self, site: SiteId, page: PageId) -> Result<u32, StoreError> {
        Ok(numbered_entries(&self.history_dir(site, page))?
            .last()
            .map_or(1, |n| n + 1))
    }

    /// Append a snapshot. Fails with `Uniqueness` if the version exists.
    pub fn append_history(&self, site: SiteId, entry: &ContentVersion) -> Result<(), StoreError> {
        let dir = self.history_dir(site, entry.page_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{:04}.json", entry.version));
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Uniqueness(format!(
                    "history version {} of page {}",
                    entry.version, entry.page_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(entry)?.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Undo an append whose page write failed. Only the newest entry may go.
    pub fn discard_history(&self, site: SiteId, entry: &ContentVersion) -> Result<(), StoreError> {
        let path = self
            .history_dir(site, entry.page_id)
            .join(format!("{:04}.json", entry.version));
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // --- remote state -----------------------------------------------------

    pub fn load_remote_state(&self, site: SiteId) -> Result<RemoteState, StoreError> {
        Ok(read_json(&self.site_dir(site).join("remote.json"))?.unwrap_or_default())
    }

    pub fn save_remote_state(&self, site: SiteId, state: &RemoteState) -> Result<(), StoreError> {
        write_json_atomic(&self.site_dir(site).join("remote.json"), state)
    }
}

fn page_from_new(site: SiteId, id: PageId, slug: String, new: NewPage) -> Page {
    let menu = new.menu.unwrap_or_else(|| new.kind.default_menu());
    Page {
        id,
        site_id: site,
        kind: new.kind,
        slug,
        title: new.title,
        meta_title: new.meta_title,
        meta_description: new.meta_description,
        brand: new.brand,
        topic: new.topic,
        cta_table: new.cta_table,
        hero_image: new.hero_image,
        custom_head: new.custom_head,
        published_at: new.published_at,
        menu,
        content: None,
        content_timestamp: None,
        menu_timestamp: None,
        directive: new.directive,
    }
}

fn pages_from_bundle(site: SiteId, new_pages: Vec<NewPage>) -> Result<Vec<Page>, StoreError> {
    let mut pages: Vec<Page> = Vec::with_capacity(new_pages.len());
    let mut parents: Vec<(PageId, String)> = Vec::new();
    for (idx, new) in new_pages.into_iter().enumerate() {
        let id = PageId(idx as u32 + 1);
        let slug = new.slug.clone().unwrap_or_else(|| slugify(&new.title));
        if slug.is_empty() && new.kind != PageKind::Homepage {
            return Err(StoreError::Invalid(format!(
                "page '{}' has no usable slug",
                new.title
            )));
        }
        if pages.iter().any(|p| p.kind == new.kind && p.slug == slug) {
            return Err(StoreError::Uniqueness(format!(
                "{} page slug '{slug}'",
                new.kind
            )));
        }
        if let Some(parent_slug) = &new.nav_parent {
            parents.push((id, parent_slug.clone()));
        }
        pages.push(page_from_new(site, id, slug, new));
    }
    for (child, parent_slug) in parents {
        let parent = pages
            .iter()
            .find(|p| p.slug == *parent_slug)
            .map(|p| p.id)
            .ok_or_else(|| {
                StoreError::Invalid(format!("nav parent '{parent_slug}' is not in the bundle"))
            })?;
        if let Some(page) = pages.iter_mut().find(|p| p.id == child) {
            page.menu.parent = Some(parent);
        }
    }
    for page in &pages {
        if let Some(parent) = page.menu.parent {
            validate_parent(&pages, page, parent)?;
        }
    }
    Ok(pages)
}

fn validate_parent(pages: &[Page], child: &Page, parent: PageId) -> Result<(), StoreError> {
    if parent == child.id {
        return Err(StoreError::Invalid(format!(
            "page {} cannot be its own nav parent",
            child.id
        )));
    }
    let parent_page = pages
        .iter()
        .find(|p| p.id == parent)
        .ok_or_else(|| StoreError::Invalid(format!("nav parent {parent} does not exist")))?;
    if parent_page.menu.parent.is_some() {
        return Err(StoreError::Invalid(format!(
            "nav parent {parent} is itself a child; only one level of nesting is allowed"
        )));
    }
    if pages
        .iter()
        .any(|p| p.id != child.id && p.menu.parent == Some(child.id))
    {
        return Err(StoreError::Invalid(format!(
            "page {} has children and cannot be nested; only one level of nesting is allowed",
            child.id
        )));
    }
    Ok(())
}
