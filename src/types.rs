//! Shared record types used across all pipeline stages.
//!
//! These types are persisted as JSON by [`crate::store`] and read by the
//! content, build, and deploy stages. Field names are part of the on-disk
//! format; add new fields with `#[serde(default)]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Timestamp = DateTime<Utc>;

/// Numeric identifier of a site. Assigned by the store on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u32);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric identifier of a page, unique within its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u32);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a site.
///
/// ```text
/// draft → generating → generated → building → built → deploying → deployed
///              ↘            ↘            ↘            ↘
///                              failed
/// ```
///
/// Transitions are checked by [`crate::status::begin`]; the site lock,
/// not the status, is what guarantees a single in-flight job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    #[default]
    Draft,
    Generating,
    Generated,
    Building,
    Built,
    Deploying,
    Deployed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Building => "building",
            Self::Built => "built",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
        }
    }

    /// States that only exist while a job holds the site lock.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Generating | Self::Building | Self::Deploying)
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Page kinds, each with its own prompt, template, and URL shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageKind {
    Homepage,
    Comparison,
    BrandReview,
    BonusReview,
    Evergreen,
    News,
    NewsArticle,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Homepage => "homepage",
            Self::Comparison => "comparison",
            Self::BrandReview => "brand-review",
            Self::BonusReview => "bonus-review",
            Self::Evergreen => "evergreen",
            Self::News => "news",
            Self::NewsArticle => "news-article",
        }
    }

    /// Review pages must name one of the site's brands.
    pub fn needs_brand(&self) -> bool {
        matches!(self, Self::BrandReview | Self::BonusReview)
    }

    /// Menu placement applied when a page is added without one.
    pub fn default_menu(&self) -> MenuPlacement {
        let (show_in_nav, show_in_footer, order, label) = match self {
            Self::Homepage => (false, false, 0, None),
            Self::Comparison => (true, true, 10, Some("Compare")),
            Self::Evergreen => (true, true, 50, None),
            Self::News => (true, false, 60, Some("News")),
            Self::BrandReview | Self::BonusReview => (false, true, 100, None),
            Self::NewsArticle => (false, false, 200, None),
        };
        MenuPlacement {
            show_in_nav,
            show_in_footer,
            order,
            label: label.map(str::to_string),
            parent: None,
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Brand fields that can be layered global → regional → per-site.
///
/// Every field is optional so that a layer only overrides what it sets.
/// See [`crate::brand::merge_layers`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandFields {
    pub affiliate_link: Option<String>,
    pub website_url: Option<String>,
    pub welcome_bonus: Option<String>,
    pub bonus_code: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f32>,
    pub logo: Option<String>,
    pub license_info: Option<String>,
    pub payment_methods: Option<String>,
    pub withdrawal_timeframe: Option<String>,
}

/// A brand selected for a site, with its rank and site-specific overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteBrand {
    /// Slug of the global brand record.
    pub brand: String,
    pub rank: u32,
    #[serde(default)]
    pub overrides: BrandFields,
}

/// A reusable ranked call-to-action table shared by pages of one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtaTable {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub rows: Vec<CtaRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtaRow {
    pub brand: String,
    pub rank: u32,
    #[serde(default)]
    pub bonus_text: Option<String>,
    #[serde(default)]
    pub cta_text: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

/// Aggregate root: one generated website.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub slug: String,
    /// Region code selecting the regional brand layer (e.g. `gb`).
    pub region: String,
    pub language: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub status: SiteStatus,
    /// Next version number to allocate. Starts at 1, never decreases.
    pub current_version: u32,
    #[serde(default)]
    pub last_built_version: Option<u32>,
    #[serde(default)]
    pub built_at: Option<Timestamp>,
    #[serde(default)]
    pub deployed_at: Option<Timestamp>,
    #[serde(default)]
    pub brands: Vec<SiteBrand>,
    #[serde(default)]
    pub cta_tables: Vec<CtaTable>,
    #[serde(default)]
    pub custom_robots_txt: Option<String>,
    #[serde(default)]
    pub custom_head: Option<String>,
    /// Cause of the last transition into `failed`.
    #[serde(default)]
    pub failure: Option<String>,
    pub created_at: Timestamp,
}

impl Site {
    /// Output directory name, `{id}_{slug}`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.id, self.slug)
    }
}

/// Menu placement of a page. Changing any of these stamps `menu_timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuPlacement {
    pub show_in_nav: bool,
    pub show_in_footer: bool,
    pub order: i32,
    pub label: Option<String>,
    pub parent: Option<PageId>,
}

/// One page of a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub kind: PageKind,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub meta_title: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    /// Brand slug, for review pages.
    #[serde(default)]
    pub brand: Option<String>,
    /// Topic of an evergreen article.
    #[serde(default)]
    pub topic: Option<String>,
    /// CTA table slug rendered on this page.
    #[serde(default)]
    pub cta_table: Option<String>,
    /// Media file name under the site's `media/` directory.
    #[serde(default)]
    pub hero_image: Option<String>,
    #[serde(default)]
    pub custom_head: Option<String>,
    #[serde(default)]
    pub published_at: Option<Timestamp>,
    #[serde(default)]
    pub menu: MenuPlacement,
    /// Generated content; always a JSON object when present.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub content_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub menu_timestamp: Option<Timestamp>,
    /// Operator instruction consumed by the next generation.
    #[serde(default)]
    pub directive: Option<String>,
}

impl Page {
    pub fn is_generated(&self) -> bool {
        self.content.is_some()
    }

    /// Latest change relevant to a build: content or menu placement.
    pub fn last_changed(&self) -> Option<Timestamp> {
        self.content_timestamp.max(self.menu_timestamp)
    }

    /// Label used in nav and footer links.
    pub fn nav_label(&self) -> &str {
        self.menu.label.as_deref().unwrap_or(&self.title)
    }
}

/// Immutable snapshot of a page's prior content.
///
/// `directive` is the instruction that produced the content which *replaced*
/// this snapshot, so history reads as "what it was, and why it changed".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentVersion {
    pub page_id: PageId,
    /// 1-based, strictly increasing per page.
    pub version: u32,
    pub content: serde_json::Value,
    #[serde(default)]
    pub generated_at: Option<Timestamp>,
    #[serde(default)]
    pub directive: Option<String>,
    pub recorded_at: Timestamp,
}

/// Per-site view of the remote host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    /// Version the `current` alias points at.
    pub alias_target: Option<u32>,
    /// Releases present on the remote, most recent first.
    pub retained_versions: Vec<u32>,
    /// Becomes true once, after the first successful certificate bootstrap.
    pub tls_provisioned: bool,
}

impl RemoteState {
    /// The retained version immediately older than the alias target.
    pub fn previous_version(&self) -> Option<u32> {
        let current = self.alias_target?;
        let pos = self.retained_versions.iter().position(|v| *v == current)?;
        self.retained_versions.get(pos + 1).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&SiteStatus::Deploying).unwrap();
        assert_eq!(json, "\"deploying\"");
    }

    #[test]
    fn page_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&PageKind::NewsArticle).unwrap();
        assert_eq!(json, "\"news-article\"");
        let back: PageKind = serde_json::from_str("\"bonus-review\"").unwrap();
        assert_eq!(back, PageKind::BonusReview);
    }

    #[test]
    fn cta_row_visible_defaults_true() {
        let row: CtaRow = serde_json::from_str(r#"{"brand":"a","rank":1}"#).unwrap();
        assert!(row.visible);
    }

    #[test]
    fn default_menu_per_kind() {
        let compare = PageKind::Comparison.default_menu();
        assert!(compare.show_in_nav && compare.show_in_footer);
        assert_eq!(compare.order, 10);
        assert_eq!(compare.label.as_deref(), Some("Compare"));

        let review = PageKind::BrandReview.default_menu();
        assert!(!review.show_in_nav);
        assert!(review.show_in_footer);
        assert_eq!(review.order, 100);

        let home = PageKind::Homepage.default_menu();
        assert!(!home.show_in_nav && !home.show_in_footer);
    }

    #[test]
    fn previous_version_follows_retained_order() {
        let state = RemoteState {
            alias_target: Some(4),
            retained_versions: vec![4, 3, 2],
            tls_provisioned: true,
        };
        assert_eq!(state.previous_version(), Some(3));
    }

    #[test]
    fn previous_version_none_at_oldest() {
        let state = RemoteState {
            alias_target: Some(2),
            retained_versions: vec![4, 3, 2],
            tls_provisioned: true,
        };
        assert_eq!(state.previous_version(), None);
    }

    #[test]
    fn previous_version_none_when_unset() {
        assert_eq!(RemoteState::default().previous_version(), None);
    }

    #[test]
    fn last_changed_takes_max() {
        let t1 = "2024-01-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let t2 = "2024-02-01T00:00:00Z".parse::<Timestamp>().unwrap();
        let page = Page {
            id: PageId(1),
            site_id: SiteId(1),
            kind: PageKind::Evergreen,
            slug: "guide".into(),
            title: "Guide".into(),
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
            content_timestamp: Some(t1),
            menu_timestamp: Some(t2),
            directive: None,
        };
        assert_eq!(page.last_changed(), Some(t2));
    }
}
