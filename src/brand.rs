//! Brand registry and layered field resolution.
//!
//! A brand's displayed data comes from three layers, merged in order:
//!
//! ```text
//! global brand record   (brands.json → brands[])
//!   ↓ overridden by
//! regional layer        (brands.json → regions[site.region][brand])
//!   ↓ overridden by
//! per-site overrides    (site.json → brands[].overrides)
//! ```
//!
//! Each layer overrides only the fields it sets. Empty or whitespace-only
//! strings count as unset, so clearing a field in an editing surface falls
//! back to the layer below instead of blanking the value.

use crate::types::{BrandFields, Site};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum BrandError {
    #[error("site lists brand '{0}' which is not in the registry")]
    Unknown(String),
}

/// Global brand record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub slug: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: BrandFields,
}

/// Contents of `brands.json`: global records plus per-region layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandRegistry {
    pub brands: Vec<Brand>,
    /// region code → brand slug → regional fields
    pub regions: BTreeMap<String, BTreeMap<String, BrandFields>>,
}

impl BrandRegistry {
    pub fn find(&self, slug: &str) -> Option<&Brand> {
        self.brands.iter().find(|b| b.slug == slug)
    }

    pub fn regional(&self, region: &str, slug: &str) -> Option<&BrandFields> {
        self.regions.get(region).and_then(|layer| layer.get(slug))
    }
}

/// A site brand with all three layers merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBrand {
    pub slug: String,
    pub name: String,
    pub rank: u32,
    pub fields: BrandFields,
}

impl ResolvedBrand {
    /// Outbound link, `#` when no layer supplies one.
    pub fn link(&self) -> &str {
        self.fields
            .affiliate_link
            .as_deref()
            .or(self.fields.website_url.as_deref())
            .unwrap_or("#")
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl BrandFields {
    /// Copy with empty strings treated as unset.
    pub fn normalized(&self) -> BrandFields {
        BrandFields {
            affiliate_link: non_empty(&self.affiliate_link),
            website_url: non_empty(&self.website_url),
            welcome_bonus: non_empty(&self.welcome_bonus),
            bonus_code: non_empty(&self.bonus_code),
            description: non_empty(&self.description),
            rating: self.rating,
            logo: non_empty(&self.logo),
            license_info: non_empty(&self.license_info),
            payment_methods: non_empty(&self.payment_methods),
            withdrawal_timeframe: non_empty(&self.withdrawal_timeframe),
        }
    }

    /// Fields of `self` overridden by every field `upper` sets.
    pub fn overlay(&self, upper: &BrandFields) -> BrandFields {
        let base = self.normalized();
        let upper = upper.normalized();
        BrandFields {
            affiliate_link: upper.affiliate_link.or(base.affiliate_link),
            website_url: upper.website_url.or(base.website_url),
            welcome_bonus: upper.welcome_bonus.or(base.welcome_bonus),
            bonus_code: upper.bonus_code.or(base.bonus_code),
            description: upper.description.or(base.description),
            rating: upper.rating.or(base.rating),
            logo: upper.logo.or(base.logo),
            license_info: upper.license_info.or(base.license_info),
            payment_methods: upper.payment_methods.or(base.payment_methods),
            withdrawal_timeframe: upper.withdrawal_timeframe.or(base.withdrawal_timeframe),
        }
    }
}

/// Merge global → regional → site layers.
pub fn merge_layers(
    global: &BrandFields,
    regional: Option<&BrandFields>,
    site: &BrandFields,
) -> BrandFields {
    let with_region = match regional {
        Some(layer) => global.overlay(layer),
        None => global.normalized(),
    };
    with_region.overlay(site)
}

/// Resolve every brand selected by a site, ordered by rank then slug.
pub fn resolve_site_brands(
    site: &Site,
    registry: &BrandRegistry,
) -> Result<Vec<ResolvedBrand>, BrandError> {
    let mut resolved = site
        .brands
        .iter()
        .map(|sb| {
            let brand = registry
                .find(&sb.brand)
                .ok_or_else(|| BrandError::Unknown(sb.brand.clone()))?;
            Ok(ResolvedBrand {
                slug: brand.slug.clone(),
                name: brand.name.clone(),
                rank: sb.rank,
                fields: merge_layers(
                    &brand.fields,
                    registry.regional(&site.region, &brand.slug),
                    &sb.overrides,
                ),
            })
        })
        .collect::<Result<Vec<_>, BrandError>>()?;
    resolved.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.slug.cmp(&b.slug)));
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_site, registry_with};

    fn fields(bonus: Option<&str>, code: Option<&str>) -> BrandFields {
        BrandFields {
            welcome_bonus: bonus.map(str::to_string),
            bonus_code: code.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn overlay_overrides_only_set_fields() {
        let base = fields(Some("£10"), Some("BASE"));
        let upper = fields(Some("£20"), None);
        let merged = base.overlay(&upper);
        assert_eq!(merged.welcome_bonus.as_deref(), Some("£20"));
        assert_eq!(merged.bonus_code.as_deref(), Some("BASE"));
    }

    #[test]
    fn empty_string_counts_as_unset() {
        let base = fields(Some("£10"), None);
        let upper = fields(Some("   "), None);
        assert_eq!(base.overlay(&upper).welcome_bonus.as_deref(), Some("£10"));
    }

    #[test]
    fn merge_layers_site_beats_region_beats_global() {
        let global = BrandFields {
            welcome_bonus: Some("global".into()),
            bonus_code: Some("G".into()),
            description: Some("global desc".into()),
            ..Default::default()
        };
        let region = fields(Some("region"), Some("R"));
        let site = fields(Some("site"), None);
        let merged = merge_layers(&global, Some(&region), &site);
        assert_eq!(merged.welcome_bonus.as_deref(), Some("site"));
        assert_eq!(merged.bonus_code.as_deref(), Some("R"));
        assert_eq!(merged.description.as_deref(), Some("global desc"));
    }

    #[test]
    fn merge_layers_without_region() {
        let global = fields(Some("global"), Some("G"));
        let merged = merge_layers(&global, None, &BrandFields::default());
        assert_eq!(merged, global);
    }

    #[test]
    fn resolve_site_brands_sorted_by_rank() {
        let registry = registry_with(&["alpha", "beta"]);
        let mut site = make_site(1, "Test Site");
        site.brands = vec![
            crate::types::SiteBrand {
                brand: "beta".into(),
                rank: 1,
                overrides: BrandFields::default(),
            },
            crate::types::SiteBrand {
                brand: "alpha".into(),
                rank: 2,
                overrides: BrandFields::default(),
            },
        ];
        let resolved = resolve_site_brands(&site, &registry).unwrap();
        let slugs: Vec<&str> = resolved.iter().map(|b| b.slug.as_str()).collect();
        assert_eq!(slugs, vec!["beta", "alpha"]);
    }

    #[test]
    fn resolve_site_brands_applies_region_layer() {
        let mut registry = registry_with(&["alpha"]);
        registry
            .regions
            .entry("gb".into())
            .or_default()
            .insert("alpha".into(), fields(Some("£50"), None));
        let mut site = make_site(1, "Test Site");
        site.region = "gb".into();
        site.brands = vec![crate::types::SiteBrand {
            brand: "alpha".into(),
            rank: 1,
            overrides: BrandFields::default(),
        }];
        let resolved = resolve_site_brands(&site, &registry).unwrap();
        assert_eq!(resolved[0].fields.welcome_bonus.as_deref(), Some("£50"));
    }

    #[test]
    fn resolve_site_brands_unknown_brand() {
        let registry = registry_with(&["alpha"]);
        let mut site = make_site(1, "Test Site");
        site.brands = vec![crate::types::SiteBrand {
            brand: "ghost".into(),
            rank: 1,
            overrides: BrandFields::default(),
        }];
        assert_eq!(
            resolve_site_brands(&site, &registry),
            Err(BrandError::Unknown("ghost".into()))
        );
    }

    #[test]
    fn link_falls_back_to_hash() {
        let brand = ResolvedBrand {
            slug: "a".into(),
            name: "A".into(),
            rank: 1,
            fields: BrandFields::default(),
        };
        assert_eq!(brand.link(), "#");
    }

    #[test]
    fn registry_roundtrips_flattened_fields() {
        let json = r#"{"brands":[{"slug":"a","name":"A","welcome_bonus":"£5"}]}"#;
        let registry: BrandRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(
            registry.find("a").unwrap().fields.welcome_bonus.as_deref(),
            Some("£5")
        );
    }
}
