//! Centralized naming rules for slugs and release directories.
//!
//! Every on-disk and remote name the pipeline produces goes through this
//! module, so local releases, remote releases, and partial uploads always
//! agree on the same shapes:
//!
//! - `"Best Betting Sites!"` → slug `best-betting-sites`
//! - version 12 → release dir `v12`, partial upload `v12.partial`
//! - `.staging-v12-<uuid>` is never a published release

/// Convert free text to a URL-safe slug.
///
/// Lowercases, drops anything that is not alphanumeric, whitespace, `-` or
/// `_`, folds whitespace and underscores into single dashes, and trims dashes
/// from both ends.
///
/// - `"Best Betting Sites!"` → `"best-betting-sites"`
/// - `"  under_score  name "` → `"under-score-name"`
/// - `"--a---b--"` → `"a-b"`
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.trim().to_lowercase().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_dash = true;
        }
    }
    slug
}

/// Published release directory name for a version.
pub fn release_dir_name(version: u32) -> String {
    format!("v{version}")
}

/// Remote upload target before the final rename.
pub fn partial_dir_name(version: u32) -> String {
    format!("v{version}.partial")
}

/// Parse a published release directory name (`v12` → `12`).
///
/// Staging and partial directories do not parse, so listings can treat
/// anything that returns `None` as not-a-release.
pub fn parse_release_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
