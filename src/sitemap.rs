//! `sitemap.xml` and `robots.txt`.
//!
//! Both are functions of page state only, so rebuilding an unchanged site
//! yields identical files. `lastmod` comes from the page's content
//! timestamp and is omitted for pages that were never generated.

use crate::nav::Routes;
use crate::types::{Page, Site};
use std::fmt::Write as _;

/// Domain used in absolute URLs when the site has none yet.
pub const FALLBACK_DOMAIN: &str = "example.com";

pub fn site_domain(site: &Site) -> &str {
    site.domain
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(FALLBACK_DOMAIN)
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render the sitemap, pages in id order.
pub fn render_sitemap(domain: &str, pages: &[Page], routes: &Routes) -> String {
    let mut ordered: Vec<&Page> = pages.iter().collect();
    ordered.sort_by_key(|p| p.id);

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for page in ordered {
        let loc = format!("https://{domain}{}", routes.url(page.id));
        let _ = writeln!(xml, "  <url>");
        let _ = writeln!(xml, "    <loc>{}</loc>", escape_xml(&loc));
        if let Some(ts) = page.content_timestamp {
            let _ = writeln!(xml, "    <lastmod>{}</lastmod>", ts.format("%Y-%m-%d"));
        }
        let _ = writeln!(xml, "  </url>");
    }
    xml.push_str("</urlset>\n");
    xml
}

/// The site's custom robots text, or a permissive default.
pub fn robots_txt(site: &Site) -> String {
    match site
        .custom_robots_txt
        .as_deref()
        .filter(|r| !r.trim().is_empty())
    {
        Some(custom) => custom.to_string(),
        None => format!(
            "User-agent: *\nAllow: /\nSitemap: https://{}/sitemap.xml\n",
            site_domain(site)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav::routes;
    use crate::test_helpers::{make_page, make_site, ts};
    use crate::types::PageKind;

    #[test]
    fn escape_xml_entities() {
        assert_eq!(escape_xml("a&b<c>\"'"), "a&amp;b&lt;c&gt;&quot;&apos;");
    }

    #[test]
    fn sitemap_lists_pages_with_lastmod_when_generated() {
        let home = make_page(1, "home");
        let mut review = make_page(2, "alpha");
        review.kind = PageKind::BrandReview;
        review.content_timestamp = Some(ts(1_700_000_000));
        let pages = vec![review, home];
        let routes = routes(&pages).unwrap();

        let xml = render_sitemap("bets.example", &pages, &routes);
        assert!(xml.starts_with("<?xml"));
        let home_at = xml.find("<loc>https://bets.example/</loc>").unwrap();
        let review_at = xml.find("<loc>https://bets.example/reviews/alpha</loc>").unwrap();
        assert!(home_at < review_at, "pages in id order");
        assert_eq!(xml.matches("<lastmod>").count(), 1);
        assert!(xml.contains("<lastmod>2023-11-14</lastmod>"));
    }

    #[test]
    fn robots_default_and_custom() {
        let mut site = make_site(1, "Robots");
        assert_eq!(
            robots_txt(&site),
            "User-agent: *\nAllow: /\nSitemap: https://example.com/sitemap.xml\n"
        );
        site.domain = Some("bets.example".into());
        assert!(robots_txt(&site).contains("https://bets.example/sitemap.xml"));
        site.custom_robots_txt = Some("User-agent: *\nDisallow: /\n".into());
        assert_eq!(robots_txt(&site), "User-agent: *\nDisallow: /\n");
    }

    #[test]
    fn blank_domain_falls_back() {
        let mut site = make_site(1, "Blank");
        site.domain = Some("  ".into());
        assert_eq!(site_domain(&site), FALLBACK_DOMAIN);
    }
}
