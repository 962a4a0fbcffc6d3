//! Routes, navigation, footer and cluster links.
//!
//! Everything here is derived from the flat page list; nothing is stored.
//!
//! ## URL scheme
//!
//! | Kind | URL | Output file |
//! |------|-----|-------------|
//! | homepage | `/` | `index.html` |
//! | comparison | `/{slug}` | `{slug}.html` |
//! | evergreen | `/{slug}` or `/{parent}/{slug}` | `{slug}.html` or `{parent}/{slug}.html` |
//! | brand-review | `/reviews/{slug}` | `reviews/{slug}.html` |
//! | bonus-review | `/bonuses/{slug}` | `bonuses/{slug}.html` |
//! | news | `/news` | `news.html` |
//! | news-article | `/news/{slug}` | `news/{slug}.html` |
//!
//! The proxy config resolves extensionless URLs to the `.html` files.
//!
//! ## Nav tree
//!
//! One level deep. `Home` always comes first; top-level entries are pages
//! with `show_in_nav` and no parent, ordered by `(order, id)`; children
//! hang under their parent in the same order.

use crate::types::{Page, PageId, PageKind};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NavError {
    #[error("page {page} names itself as its nav parent")]
    SelfParent { page: PageId },
    #[error("page {page} names nav parent {parent}, which does not exist")]
    MissingParent { page: PageId, parent: PageId },
    #[error("page {page} nests under page {parent}, which is itself nested")]
    TooDeep { page: PageId, parent: PageId },
    #[error("pages {first} and {second} both render to {path}")]
    DuplicatePath {
        first: PageId,
        second: PageId,
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavEntry {
    pub link: Link,
    pub children: Vec<Link>,
}

/// Footer columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Footer {
    pub brand_reviews: Vec<Link>,
    pub guides: Vec<Link>,
    pub bonuses: Vec<Link>,
}

impl Footer {
    pub fn is_empty(&self) -> bool {
        self.brand_reviews.is_empty() && self.guides.is_empty() && self.bonuses.is_empty()
    }
}

/// Where one page lives.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Output file relative to the release root.
    pub path: String,
    pub url: String,
}

/// Routes for every page of a site, validated.
#[derive(Debug, Clone)]
pub struct Routes {
    by_id: BTreeMap<PageId, Route>,
}

impl Routes {
    pub fn get(&self, id: PageId) -> Option<&Route> {
        self.by_id.get(&id)
    }

    pub fn url(&self, id: PageId) -> &str {
        self.by_id.get(&id).map_or("/", |r| r.url.as_str())
    }
}

/// Check the one-level nav tree.
pub fn validate_tree(pages: &[Page]) -> Result<(), NavError> {
    let by_id: BTreeMap<PageId, &Page> = pages.iter().map(|p| (p.id, p)).collect();
    for page in pages {
        let Some(parent_id) = page.menu.parent else {
            continue;
        };
        if parent_id == page.id {
            return Err(NavError::SelfParent { page: page.id });
        }
        let parent = by_id.get(&parent_id).ok_or(NavError::MissingParent {
            page: page.id,
            parent: parent_id,
        })?;
        if parent.menu.parent.is_some() {
            return Err(NavError::TooDeep {
                page: page.id,
                parent: parent_id,
            });
        }
    }
    Ok(())
}

/// URL path of a page without leading slash or extension; empty for home.
fn stem(page: &Page, parent: Option<&Page>) -> String {
    match page.kind {
        PageKind::Homepage => String::new(),
        PageKind::Comparison => page.slug.clone(),
        PageKind::Evergreen => match parent {
            Some(parent) => format!("{}/{}", parent.slug, page.slug),
            None => page.slug.clone(),
        },
        PageKind::BrandReview => format!("reviews/{}", page.slug),
        PageKind::BonusReview => format!("bonuses/{}", page.slug),
        PageKind::News => "news".to_string(),
        PageKind::NewsArticle => format!("news/{}", page.slug),
    }
}

/// Route of a single page given its nav parent.
pub fn route(page: &Page, parent: Option<&Page>) -> Route {
    let stem = stem(page, parent);
    if stem.is_empty() {
        Route {
            path: "index.html".to_string(),
            url: "/".to_string(),
        }
    } else {
        Route {
            path: format!("{stem}.html"),
            url: format!("/{stem}"),
        }
    }
}

/// Validate the nav tree and compute every page's route.
///
/// Two pages landing on the same output file is an error, as is any
/// violation of the nav tree.
pub fn routes(pages: &[Page]) -> Result<Routes, NavError> {
    validate_tree(pages)?;
    let by_id: BTreeMap<PageId, &Page> = pages.iter().map(|p| (p.id, p)).collect();
    let mut taken: BTreeMap<String, PageId> = BTreeMap::new();
    let mut routes = BTreeMap::new();
    for page in pages {
        let parent = page.menu.parent.and_then(|id| by_id.get(&id).copied());
        let route = route(page, parent);
        if let Some(first) = taken.insert(route.path.clone(), page.id) {
            return Err(NavError::DuplicatePath {
                first,
                second: page.id,
                path: route.path,
            });
        }
        routes.insert(page.id, route);
    }
    Ok(Routes { by_id: routes })
}

fn sorted_by_order<'a>(mut pages: Vec<&'a Page>) -> Vec<&'a Page> {
    pages.sort_by_key(|p| (p.menu.order, p.id));
    pages
}

fn link(page: &Page, routes: &Routes) -> Link {
    Link {
        label: page.nav_label().to_string(),
        url: routes.url(page.id).to_string(),
    }
}

/// Header navigation, `Home` first.
pub fn nav_entries(pages: &[Page], routes: &Routes) -> Vec<NavEntry> {
    let mut entries = vec![NavEntry {
        link: Link {
            label: "Home".to_string(),
            url: "/".to_string(),
        },
        children: Vec::new(),
    }];
    let top = sorted_by_order(
        pages
            .iter()
            .filter(|p| p.menu.show_in_nav && p.menu.parent.is_none())
            .collect(),
    );
    for page in top {
        let children = sorted_by_order(
            pages
                .iter()
                .filter(|c| c.menu.show_in_nav && c.menu.parent == Some(page.id))
                .collect(),
        );
        entries.push(NavEntry {
            link: link(page, routes),
            children: children.into_iter().map(|c| link(c, routes)).collect(),
        });
    }
    entries
}

/// Footer links grouped by kind.
pub fn footer(pages: &[Page], routes: &Routes) -> Footer {
    let mut footer = Footer::default();
    for page in sorted_by_order(pages.iter().filter(|p| p.menu.show_in_footer).collect()) {
        let column = match page.kind {
            PageKind::BrandReview => &mut footer.brand_reviews,
            PageKind::BonusReview => &mut footer.bonuses,
            _ => &mut footer.guides,
        };
        column.push(link(page, routes));
    }
    footer
}

/// Title shown for a page in cluster links: nav label, then the generated
/// headline, then the page title.
pub fn display_title(page: &Page) -> &str {
    if let Some(label) = &page.menu.label {
        return label;
    }
    page.content
        .as_ref()
        .and_then(|c| c.get("hero_title"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&page.title)
}

/// Related pages in the same nav group: the parent, then siblings, never
/// the page itself. A parent sees its children.
pub fn cluster_links(page: &Page, pages: &[Page], routes: &Routes) -> Vec<Link> {
    let group = page.menu.parent.or_else(|| {
        pages
            .iter()
            .any(|p| p.menu.parent == Some(page.id))
            .then_some(page.id)
    });
    let Some(group) = group else {
        return Vec::new();
    };
    let mut links = Vec::new();
    if group != page.id
        && let Some(parent) = pages.iter().find(|p| p.id == group)
    {
        links.push(Link {
            label: display_title(parent).to_string(),
            url: routes.url(parent.id).to_string(),
        });
    }
    let members = sorted_by_order(
        pages
            .iter()
            .filter(|p| p.menu.parent == Some(group) && p.id != page.id)
            .collect(),
    );
    links.extend(members.into_iter().map(|p| Link {
        label: display_title(p).to_string(),
        url: routes.url(p.id).to_string(),
    }));
    links
}
