//! HTML rendering of site pages.
//!
//! Every page shares one document shell: head (meta, favicon, canonical
//! link, embedded CSS, custom head snippets), a header with the nav tree,
//! and a footer with link columns. The body depends on the page kind and
//! walks the kind's content keys in a fixed order, so key order in the
//! stored JSON never changes the output.
//!
//! Free text fields are Markdown, converted with pulldown-cmark. A page
//! that was never generated renders its title only.
//!
//! Uses [maud](https://maud.lambda.xyz/) for compile-time HTML templating
//! with automatic escaping.
//!
//! Nothing here reads the clock or the filesystem: identical inputs give
//! identical bytes.

use crate::brand::ResolvedBrand;
use crate::content::schema;
use crate::nav::{Footer, Link, NavEntry};
use crate::sitemap::site_domain;
use crate::types::{Page, PageKind, Site};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Parser, html as md_html};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const CSS: &str = include_str!("../static/style.css");

/// Site-wide inputs shared by every page.
pub struct SiteContext<'a> {
    pub site: &'a Site,
    pub brands: &'a [ResolvedBrand],
    pub nav: &'a [NavEntry],
    pub footer: &'a Footer,
}

/// Hero image slot: a copied asset, or a text fallback when the file is
/// missing from the media directory.
#[derive(Debug, Clone, PartialEq)]
pub enum HeroImage {
    Asset(String),
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CtaRowView {
    pub rank: u32,
    pub brand_name: String,
    /// Logo file under `assets/logos/`, when one was copied.
    pub logo: Option<String>,
    pub link: String,
    pub rating: Option<f32>,
    pub bonus_text: Option<String>,
    pub cta_text: String,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CtaView {
    pub name: String,
    pub rows: Vec<CtaRowView>,
}

/// Per-page inputs.
pub struct PageView<'a> {
    pub page: &'a Page,
    pub url: &'a str,
    pub cluster: Vec<Link>,
    pub cta: Option<CtaView>,
    pub hero: Option<HeroImage>,
    /// Article links, for the news hub.
    pub articles: Vec<Link>,
}

// ============================================================================
// Favicon
// ============================================================================

/// Initials of a site name: first letters of the first two words, or the
/// first two letters of a single word.
pub fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let picked: String = match words.as_slice() {
        [first, second, ..] => first.chars().take(1).chain(second.chars().take(1)).collect(),
        [only] => only.chars().take(2).collect(),
        [] => "?".to_string(),
    };
    picked.to_uppercase()
}

/// Hue in degrees derived from a SHA-256 of the name.
pub fn hue(name: &str) -> u16 {
    let digest = Sha256::digest(name.as_bytes());
    u16::from_be_bytes([digest[0], digest[1]]) % 360
}

pub fn favicon_svg(name: &str) -> String {
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 32 32">
<rect width="32" height="32" rx="6" fill="hsl({hue}, 55%, 45%)"/>
<text x="16" y="22" text-anchor="middle" font-size="15" font-weight="700" font-family="system-ui, sans-serif" fill="#fff">{initials}</text>
</svg>
"##,
        hue = hue(name),
        initials = crate::sitemap::escape_xml(&initials(name)),
    )
}

// ============================================================================
// Value helpers
// ============================================================================

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// String form of a scalar field; numbers are formatted, other types dropped.
fn scalar(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn strings<'a>(value: &'a Value, key: &str) -> Vec<&'a str> {
    items(value, key)
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .collect()
}

pub fn markdown(source: &str) -> Markup {
    let parser = Parser::new(source);
    let mut out = String::new();
    md_html::push_html(&mut out, parser);
    PreEscaped(out)
}

// ============================================================================
// HTML Components
// ============================================================================

fn base_document(ctx: &SiteContext, view: &PageView, content: Markup) -> Markup {
    let page = view.page;
    let title = page.meta_title.as_deref().unwrap_or(&page.title);
    let canonical = format!("https://{}{}", site_domain(ctx.site), view.url);
    html! {
        (DOCTYPE)
        html lang=(ctx.site.language) {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (title) }
                @if let Some(description) = &page.meta_description {
                    meta name="description" content=(description);
                }
                link rel="canonical" href=(canonical);
                link rel="icon" type="image/svg+xml" href="/favicon.svg";
                style { (PreEscaped(CSS)) }
                @if let Some(head) = &ctx.site.custom_head {
                    (PreEscaped(head))
                }
                @if let Some(head) = &page.custom_head {
                    (PreEscaped(head))
                }
            }
            body class=(format!("page-{}", page.kind)) {
                (site_header(ctx.site, ctx.nav, view.url))
                (content)
                (site_footer(ctx.site, ctx.footer))
            }
        }
    }
}

fn site_header(site: &Site, nav: &[NavEntry], current_url: &str) -> Markup {
    html! {
        header.site-header {
            div.site-header-inner {
                a.site-name href="/" { (site.name) }
                nav.site-nav {
                    (render_nav(nav, current_url))
                }
            }
        }
    }
}

/// Renders the nav tree, marking the entry for `current_url`.
pub fn render_nav(entries: &[NavEntry], current_url: &str) -> Markup {
    html! {
        ul {
            @for entry in entries {
                @let is_current = entry.link.url == current_url
                    || entry.children.iter().any(|c| c.url == current_url);
                li class=[is_current.then_some("current")] {
                    a href=(entry.link.url) { (entry.link.label) }
                    @if !entry.children.is_empty() {
                        ul {
                            @for child in &entry.children {
                                li class=[(child.url == current_url).then_some("current")] {
                                    a href=(child.url) { (child.label) }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

fn footer_column(heading: &str, links: &[Link]) -> Markup {
    html! {
        @if !links.is_empty() {
            div {
                h4 { (heading) }
                ul {
                    @for link in links {
                        li { a href=(link.url) { (link.label) } }
                    }
                }
            }
        }
    }
}

fn site_footer(site: &Site, footer: &Footer) -> Markup {
    html! {
        footer.site-footer {
            div.site-footer-inner {
                @if !footer.is_empty() {
                    div.footer-columns {
                        (footer_column("Reviews", &footer.brand_reviews))
                        (footer_column("Guides", &footer.guides))
                        (footer_column("Bonuses", &footer.bonuses))
                    }
                }
                p.copyright { "© " (site.name) }
            }
        }
    }
}

fn hero(page: &Page, content: Option<&Value>, image: Option<&HeroImage>) -> Markup {
    let headline = content
        .and_then(|c| text(c, "hero_title"))
        .unwrap_or(&page.title);
    html! {
        section.hero {
            h1 { (headline) }
            @if let Some(subtitle) = content.and_then(|c| text(c, "hero_subtitle")) {
                p.subtitle { (subtitle) }
            }
            @match image {
                Some(HeroImage::Asset(path)) => {
                    figure.hero-image {
                        img src={ "/assets/" (path) } alt=(headline);
                    }
                }
                Some(HeroImage::Missing) => {
                    div.hero-fallback { (headline) }
                }
                None => {}
            }
        }
    }
}

fn rating(value: Option<f32>) -> Markup {
    html! {
        @if let Some(r) = value {
            span.rating { (format!("{r:.1}")) "/5" }
        }
    }
}

fn cta_table(cta: &CtaView) -> Markup {
    html! {
        section.cta-table {
            h2 { (cta.name) }
            table {
                thead {
                    tr { th { "#" } th { "Brand" } th { "Offer" } th { "Rating" } th {} }
                }
                tbody {
                    @for row in &cta.rows {
                        tr {
                            td { (row.rank) }
                            td {
                                (brand_logo(&row.brand_name, row.logo.as_deref()))
                                (row.brand_name)
                                @if let Some(badge) = &row.badge {
                                    " " span.badge { (badge) }
                                }
                            }
                            td { @if let Some(bonus) = &row.bonus_text { (bonus) } }
                            td { (rating(row.rating)) }
                            td {
                                a.cta-button href=(row.link) rel="nofollow sponsored noopener" target="_blank" {
                                    (row.cta_text)
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// A brand's logo image, or nothing; callers always print the name beside it.
fn brand_logo(name: &str, logo: Option<&str>) -> Markup {
    html! {
        @if let Some(logo) = logo {
            img.brand-logo src={ "/assets/logos/" (logo) } alt=(name);
        }
    }
}

fn brand_cards(brands: &[ResolvedBrand], summaries: &[Value]) -> Markup {
    let summary_for = |slug: &str, name: &str| {
        summaries.iter().find_map(|s| {
            let brand = text(s, "brand")?;
            (brand.eq_ignore_ascii_case(slug) || brand.eq_ignore_ascii_case(name))
                .then(|| text(s, "summary"))
                .flatten()
        })
    };
    html! {
        div.brand-cards {
            @for brand in brands {
                div.brand-card {
                    (brand_logo(&brand.name, brand.fields.logo.as_deref()))
                    h3 { (brand.rank) ". " (brand.name) }
                    (rating(brand.fields.rating))
                    @if let Some(bonus) = &brand.fields.welcome_bonus {
                        p.bonus { (bonus) }
                    }
                    @if let Some(summary) = summary_for(&brand.slug, &brand.name) {
                        (markdown(summary))
                    }
                    a.cta-button href=(brand.link()) rel="nofollow sponsored noopener" target="_blank" {
                        "Visit Site"
                    }
                }
            }
        }
    }
}

fn brand_box(brand: &ResolvedBrand) -> Markup {
    let facts = [
        ("Welcome bonus", &brand.fields.welcome_bonus),
        ("Bonus code", &brand.fields.bonus_code),
        ("Licence", &brand.fields.license_info),
        ("Payment methods", &brand.fields.payment_methods),
        ("Withdrawals", &brand.fields.withdrawal_timeframe),
    ];
    html! {
        aside.brand-box {
            (brand_logo(&brand.name, brand.fields.logo.as_deref()))
            h2 { (brand.name) " " (rating(brand.fields.rating)) }
            dl {
                @for (label, value) in facts {
                    @if let Some(value) = value {
                        dt { (label) }
                        dd { (value) }
                    }
                }
            }
            a.cta-button href=(brand.link()) rel="nofollow sponsored noopener" target="_blank" {
                "Visit " (brand.name)
            }
        }
    }
}

fn list_block(heading: &str, class: &str, entries: &[&str], ordered: bool) -> Markup {
    html! {
        @if !entries.is_empty() {
            section class=(class) {
                h2 { (heading) }
                @if ordered {
                    ol { @for e in entries { li { (e) } } }
                } @else {
                    ul { @for e in entries { li { (e) } } }
                }
            }
        }
    }
}

fn prose_block(heading: Option<&str>, source: Option<&str>) -> Markup {
    html! {
        @if let Some(source) = source {
            section.prose {
                @if let Some(heading) = heading {
                    h2 { (heading) }
                }
                (markdown(source))
            }
        }
    }
}

fn sections_block(entries: &[Value]) -> Markup {
    html! {
        @for entry in entries {
            @if let Some(body) = text(entry, "content") {
                section.prose {
                    @if let Some(heading) = text(entry, "heading") {
                        h2 { (heading) }
                    }
                    (markdown(body))
                }
            }
        }
    }
}

fn faq_block(entries: &[Value]) -> Markup {
    html! {
        @if !entries.is_empty() {
            section.faq {
                h2 { "Frequently asked questions" }
                @for entry in entries {
                    @if let (Some(q), Some(a)) = (text(entry, "question"), text(entry, "answer")) {
                        details {
                            summary { (q) }
                            (markdown(a))
                        }
                    }
                }
            }
        }
    }
}

fn comparison_block(rows: &[Value]) -> Markup {
    html! {
        @if !rows.is_empty() {
            section.comparison {
                table {
                    thead {
                        tr { th { "Brand" } th { "Bonus" } th { "Rating" } th { "Pros" } th { "Cons" } th { "Verdict" } }
                    }
                    tbody {
                        @for row in rows {
                            tr {
                                td {
                                    @match (text(row, "brand"), text(row, "slug")) {
                                        (Some(name), Some(slug)) => { a href={ "/reviews/" (slug) } { (name) } }
                                        (Some(name), None) => { (name) }
                                        _ => {}
                                    }
                                }
                                td { @if let Some(b) = scalar(row, "bonus") { (b) } }
                                td { @if let Some(r) = scalar(row, "rating") { (r) } }
                                td { ul.pros { @for p in strings(row, "pros") { li { (p) } } } }
                                td { ul.cons { @for c in strings(row, "cons") { li { (c) } } } }
                                td { @if let Some(v) = text(row, "verdict") { (v) } }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Body block for one content key. Hero keys are rendered by [`hero`].
fn block(key: &str, content: &Value, ctx: &SiteContext, page: &Page) -> Markup {
    match key {
        "hero_title" | "hero_subtitle" => html! {},
        "hero_stats" => html! {
            @let stats = items(content, key);
            @if !stats.is_empty() {
                ul.hero-stats {
                    @for stat in stats {
                        li {
                            @if let Some(value) = scalar(stat, "value") { strong { (value) } }
                            @if let Some(label) = text(stat, "label") { (label) }
                        }
                    }
                }
            }
        },
        "trust_items" => html! {
            @let entries = strings(content, key);
            @if !entries.is_empty() {
                ul.trust-items { @for e in entries { li { (e) } } }
            }
        },
        "section_title" => html! {
            @if let Some(title) = text(content, key) { h2 { (title) } }
        },
        "section_subtitle" => html! {
            @if let Some(sub) = text(content, key) { p.subtitle { (sub) } }
        },
        "top_brands" => brand_cards(ctx.brands, items(content, key)),
        "why_trust_us" => prose_block(Some("Why trust us"), text(content, key)),
        "verdict" => prose_block(Some("Our verdict"), text(content, key)),
        "terms_summary" => prose_block(Some("Key terms"), text(content, key)),
        "intro" | "bonus_overview" | "closing_paragraph" => prose_block(None, text(content, key)),
        "intro_paragraphs" => html! {
            @for paragraph in strings(content, key) {
                section.prose { (markdown(paragraph)) }
            }
        },
        "pros" => list_block("Pros", "pros", &strings(content, key), false),
        "cons" => list_block("Cons", "cons", &strings(content, key), false),
        "key_takeaways" => list_block("Key takeaways", "takeaways", &strings(content, key), false),
        "how_to_claim" => list_block("How to claim", "how-to-claim", &strings(content, key), true),
        "sections" | "features_sections" => sections_block(items(content, key)),
        "faq" => faq_block(items(content, key)),
        "comparison_rows" => comparison_block(items(content, key)),
        "similar_offers" => html! {
            @let offers = items(content, key);
            @if !offers.is_empty() {
                section.similar-offers {
                    h2 { "Similar offers" }
                    ul {
                        @for offer in offers {
                            @if let (Some(brand), Some(terms)) = (text(offer, "brand"), text(offer, "offer")) {
                                li { strong { (brand) } ": " (terms) }
                            }
                        }
                    }
                }
            }
        },
        other => {
            tracing::debug!(page = %page.id, key = other, "no renderer for content key");
            html! {}
        }
    }
}

fn review_brand<'a>(ctx: &'a SiteContext, page: &Page) -> Option<&'a ResolvedBrand> {
    let slug = page.brand.as_deref()?;
    ctx.brands.iter().find(|b| b.slug == slug)
}

fn cluster_block(links: &[Link]) -> Markup {
    html! {
        @if !links.is_empty() {
            nav.cluster {
                h2 { "Related" }
                ul {
                    @for link in links {
                        li { a href=(link.url) { (link.label) } }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Page Renderer
// ============================================================================

/// Renders one page to a complete HTML document.
pub fn render_page(ctx: &SiteContext, view: &PageView) -> Markup {
    let page = view.page;
    let content = page.content.as_ref().filter(|c| c.is_object());
    let body = match content {
        None => html! {
            main {
                section.hero { h1 { (page.title) } }
            }
        },
        Some(content) => html! {
            main {
                (hero(page, Some(content), view.hero.as_ref()))
                @if matches!(page.kind, PageKind::BrandReview | PageKind::BonusReview) {
                    @if let Some(brand) = review_brand(ctx, page) {
                        (brand_box(brand))
                    }
                }
                @if let Some(cta) = &view.cta {
                    (cta_table(cta))
                }
                @for (key, _) in schema(page.kind) {
                    (block(key, content, ctx, page))
                }
                @if page.kind == PageKind::News && !view.articles.is_empty() {
                    section.news {
                        h2 { "Latest news" }
                        ul.news-list {
                            @for article in &view.articles {
                                li { a href=(article.url) { (article.label) } }
                            }
                        }
                    }
                }
                (cluster_block(&view.cluster))
            }
        },
    };
    base_document(ctx, view, body)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_page, make_site};
    use crate::types::BrandFields;
    use serde_json::json;

    fn brands() -> Vec<ResolvedBrand> {
        vec![ResolvedBrand {
            slug: "alpha".into(),
            name: "Alpha Bet".into(),
            rank: 1,
            fields: BrandFields {
                affiliate_link: Some("https://alpha.example/go".into()),
                welcome_bonus: Some("£30 free bet".into()),
                rating: Some(4.5),
                ..Default::default()
            },
        }]
    }

    fn nav() -> Vec<NavEntry> {
        vec![
            NavEntry {
                link: Link { label: "Home".into(), url: "/".into() },
                children: vec![],
            },
            NavEntry {
                link: Link { label: "Guides".into(), url: "/guides".into() },
                children: vec![Link { label: "Odds".into(), url: "/guides/odds".into() }],
            },
        ]
    }

    fn render(site: &Site, page: &Page, url: &str) -> String {
        let brands = brands();
        let nav = nav();
        let footer = Footer::default();
        let ctx = SiteContext { site, brands: &brands, nav: &nav, footer: &footer };
        let view = PageView {
            page,
            url,
            cluster: vec![],
            cta: None,
            hero: None,
            articles: vec![],
        };
        render_page(&ctx, &view).into_string()
    }

    #[test]
    fn initials_two_words_or_two_letters() {
        assert_eq!(initials("Bet Guide UK"), "BG");
        assert_eq!(initials("odds"), "OD");
        assert_eq!(initials(""), "?");
    }

    #[test]
    fn favicon_is_deterministic() {
        let a = favicon_svg("Bet Guide");
        assert_eq!(a, favicon_svg("Bet Guide"));
        assert!(a.contains(">BG</text>"));
        assert!(a.contains(r#"rx="6""#));
        assert!(a.contains(&format!("hsl({}, 55%, 45%)", hue("Bet Guide"))));
        assert!(hue("Bet Guide") < 360);
    }

    #[test]
    fn nav_marks_current_and_nests_children() {
        let html = render_nav(&nav(), "/guides/odds").into_string();
        assert!(html.contains(r#"<li class="current"><a href="/guides">Guides</a>"#));
        assert!(html.contains(r#"<li class="current"><a href="/guides/odds">Odds</a>"#));
    }

    #[test]
    fn ungenerated_page_renders_title_only() {
        let site = make_site(1, "Bet Guide");
        let mut page = make_page(1, "home");
        page.title = "Welcome".into();
        let html = render(&site, &page, "/");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Welcome</h1>"));
        assert!(!html.contains(r#"class="brand-card""#));
    }

    #[test]
    fn homepage_renders_blocks_in_schema_order() {
        let site = make_site(1, "Bet Guide");
        let mut page = make_page(1, "home");
        page.content = Some(json!({
            "closing_paragraph": "Bet **responsibly**.",
            "hero_title": "Best Bets",
            "faq": [{"question": "Is it safe?", "answer": "Yes."}],
            "top_brands": [{"brand": "alpha", "summary": "Great odds."}],
        }));
        let html = render(&site, &page, "/");
        assert!(html.contains("<h1>Best Bets</h1>"));
        assert!(html.contains("<strong>responsibly</strong>"));
        assert!(html.contains("Great odds."));
        assert!(html.contains("https://alpha.example/go"));
        let brands_at = html.find(r#"<div class="brand-cards">"#).unwrap();
        let faq_at = html.find("Is it safe?").unwrap();
        let closing_at = html.find("responsibly").unwrap();
        assert!(brands_at < faq_at && faq_at < closing_at);
    }

    #[test]
    fn content_key_order_does_not_change_output() {
        let site = make_site(1, "Bet Guide");
        let mut a = make_page(1, "home");
        a.content = Some(json!({"hero_title": "T", "faq": [], "closing_paragraph": "x"}));
        let mut b = a.clone();
        b.content = Some(json!({"closing_paragraph": "x", "faq": [], "hero_title": "T"}));
        assert_eq!(render(&site, &a, "/"), render(&site, &b, "/"));
    }

    #[test]
    fn review_page_shows_brand_box() {
        let site = make_site(1, "Bet Guide");
        let mut page = make_page(2, "alpha");
        page.kind = PageKind::BrandReview;
        page.brand = Some("alpha".into());
        page.content = Some(json!({"hero_title": "Alpha Review", "pros": ["Fast payouts"]}));
        let html = render(&site, &page, "/reviews/alpha");
        assert!(html.contains(r#"class="brand-box""#));
        assert!(html.contains("£30 free bet"));
        assert!(html.contains("<li>Fast payouts</li>"));
        assert!(html.contains("page-brand-review"));
    }

    #[test]
    fn brand_logo_or_name_alone() {
        let site = make_site(1, "Bet Guide");
        let mut page = make_page(2, "alpha");
        page.kind = PageKind::BrandReview;
        page.brand = Some("alpha".into());

        let html = render(&site, &page, "/reviews/alpha");
        assert!(!html.contains("brand-logo"));
        assert!(html.contains("Alpha Bet"));

        let mut brands = brands();
        brands[0].fields.logo = Some("alpha.svg".into());
        let nav = nav();
        let footer = Footer::default();
        let ctx = SiteContext { site: &site, brands: &brands, nav: &nav, footer: &footer };
        let view = PageView {
            page: &page,
            url: "/reviews/alpha",
            cluster: vec![],
            cta: None,
            hero: None,
            articles: vec![],
        };
        let html = render_page(&ctx, &view).into_string();
        assert!(html.contains(r#"src="/assets/logos/alpha.svg""#));
        assert!(html.contains(r#"alt="Alpha Bet""#));
    }

    #[test]
    fn head_carries_meta_and_canonical() {
        let mut site = make_site(1, "Bet Guide");
        site.domain = Some("bets.example".into());
        site.custom_head = Some(r#"<meta name="x" content="y">"#.into());
        let mut page = make_page(1, "home");
        page.meta_title = Some("Meta Title".into());
        page.meta_description = Some("Desc & more".into());
        let html = render(&site, &page, "/");
        assert!(html.contains("<title>Meta Title</title>"));
        assert!(html.contains(r#"content="Desc &amp; more""#));
        assert!(html.contains(r#"href="https://bets.example/""#));
        assert!(html.contains(r#"<meta name="x" content="y">"#));
    }

    #[test]
    fn cta_table_and_hero_fallback() {
        let site = make_site(1, "Bet Guide");
        let mut page = make_page(1, "home");
        page.content = Some(json!({"hero_title": "Top"}));
        let brands = brands();
        let nav = nav();
        let footer = Footer::default();
        let ctx = SiteContext { site: &site, brands: &brands, nav: &nav, footer: &footer };
        let view = PageView {
            page: &page,
            url: "/",
            cluster: vec![Link { label: "Odds".into(), url: "/guides/odds".into() }],
            cta: Some(CtaView {
                name: "Top Picks".into(),
                rows: vec![CtaRowView {
                    rank: 1,
                    brand_name: "Alpha Bet".into(),
                    logo: Some("alpha.png".into()),
                    link: "https://alpha.example/go".into(),
                    rating: Some(4.5),
                    bonus_text: Some("£30".into()),
                    cta_text: "Claim".into(),
                    badge: Some("Best".into()),
                }],
            }),
            hero: Some(HeroImage::Missing),
            articles: vec![],
        };
        let html = render_page(&ctx, &view).into_string();
        assert!(html.contains("<h2>Top Picks</h2>"));
        assert!(html.contains(">Claim</a>"));
        assert!(html.contains(r#"<span class="badge">Best</span>"#));
        assert!(html.contains(r#"src="/assets/logos/alpha.png""#));
        assert!(html.contains(r#"<div class="hero-fallback">Top</div>"#));
        assert!(html.contains("Related"));
    }

    #[test]
    fn site_name_is_escaped() {
        let site = make_site(1, "<Bet>");
        let page = make_page(1, "home");
        let html = render(&site, &page, "/");
        assert!(html.contains("&lt;Bet&gt;"));
    }
}
