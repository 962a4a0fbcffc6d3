//! nginx server blocks for deployed sites.
//!
//! The config is regenerated on every deploy from the domain, the web root
//! and whether a certificate has been provisioned, so it never drifts from
//! what the pipeline believes about the remote.
//!
//! Pages are published without extensions (`/reviews/alpha` is
//! `reviews/alpha.html` on disk), hence `$uri.html` in `try_files`.

/// Inputs of one server block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySite<'a> {
    pub domain: &'a str,
    /// `{web_root}/{domain}/current`
    pub root: String,
    pub tls: bool,
}

impl<'a> ProxySite<'a> {
    pub fn new(domain: &'a str, web_root: &str, tls: bool) -> Self {
        Self {
            domain,
            root: format!("{}/{domain}/current", web_root.trim_end_matches('/')),
            tls,
        }
    }
}

const LOCATIONS: &str = r#"    index index.html;

    location / {
        try_files $uri $uri.html $uri/ =404;
    }

    location ~* \.(css|js|png|jpg|jpeg|gif|webp|avif|ico|svg|woff|woff2|ttf|eot)$ {
        expires 30d;
        add_header Cache-Control "public, immutable";
    }
"#;

/// Render the server block(s) for a site.
pub fn render_config(site: &ProxySite) -> String {
    let ProxySite { domain, root, tls } = site;
    if *tls {
        format!(
            "server {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n    return 301 https://$host$request_uri;\n}}\n\n\
             server {{\n    listen 443 ssl;\n    listen [::]:443 ssl;\n    server_name {domain};\n\n\
             \x20   ssl_certificate /etc/letsencrypt/live/{domain}/fullchain.pem;\n\
             \x20   ssl_certificate_key /etc/letsencrypt/live/{domain}/privkey.pem;\n\
             \x20   include /etc/letsencrypt/options-ssl-nginx.conf;\n\n\
             \x20   root {root};\n{LOCATIONS}}}\n"
        )
    } else {
        format!(
            "server {{\n    listen 80;\n    listen [::]:80;\n    server_name {domain};\n    root {root};\n{LOCATIONS}}}\n"
        )
    }
}
