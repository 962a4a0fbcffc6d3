//! Local release store.
//!
//! Each successful build publishes one immutable directory:
//!
//! ```text
//! output/
//! └── 3_bet-guide/
//!     ├── v1/
//!     │   ├── index.html
//!     │   ├── reviews/alpha.html
//!     │   ├── sitemap.xml
//!     │   ├── robots.txt
//!     │   ├── favicon.svg
//!     │   ├── assets/…
//!     │   └── manifest.json
//!     ├── v2/
//!     └── .staging-v3-5f0c…/      # in-progress build, never deployed
//! ```
//!
//! A release is written in a staging directory and published with a single
//! rename, which refuses to replace an existing version. Releases are never
//! edited or deleted afterwards.
//!
//! `manifest.json` lists every other file with its SHA-256. Its `created_at`
//! is the only wall-clock value in a release, so two builds of unchanged
//! inputs differ in that field alone.

use crate::naming::{parse_release_dir, release_dir_name};
use crate::store::StoreError;
use crate::types::{Site, SiteId, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Bump when the manifest layout changes.
const MANIFEST_FORMAT: u32 = 1;

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("release v{version} of site {site} does not exist")]
    NotFound { site: SiteId, version: u32 },
    #[error("release directory {0} already exists")]
    Exists(PathBuf),
    #[error("release v{version} is incomplete: {reason}")]
    Incomplete { version: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub format: u32,
    pub site_id: SiteId,
    pub version: u32,
    pub created_at: Timestamp,
    /// Relative path (forward slashes) → digest, sorted.
    pub files: BTreeMap<String, FileEntry>,
}

impl ReleaseManifest {
    pub fn new(site_id: SiteId, version: u32, created_at: Timestamp, files: BTreeMap<String, FileEntry>) -> Self {
        Self {
            format: MANIFEST_FORMAT,
            site_id,
            version,
            created_at,
            files,
        }
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// Digest every file under `root` except the manifest itself.
pub fn hash_tree(root: &Path) -> Result<BTreeMap<String, FileEntry>, ReleaseError> {
    let mut files = BTreeMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if key == MANIFEST_FILENAME {
            continue;
        }
        files.insert(
            key,
            FileEntry {
                sha256: hash_file(entry.path())?,
                size: entry.metadata()?.len(),
            },
        );
    }
    Ok(files)
}

/// Handle on the output directory.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
}

impl ReleaseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn site_dir(&self, site: &Site) -> PathBuf {
        self.root.join(site.dir_name())
    }

    pub fn release_dir(&self, site: &Site, version: u32) -> PathBuf {
        self.site_dir(site).join(release_dir_name(version))
    }

    /// Fresh staging directory for building `version`.
    pub fn create_staging(&self, site: &Site, version: u32) -> Result<PathBuf, ReleaseError> {
        let dir = self.site_dir(site).join(format!(
            ".staging-v{version}-{}",
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Publish a staging directory as `v{version}` with one rename.
    pub fn publish(&self, staging: &Path, site: &Site, version: u32) -> Result<PathBuf, ReleaseError> {
        let target = self.release_dir(site, version);
        if target.exists() {
            return Err(ReleaseError::Exists(target));
        }
        fs::rename(staging, &target)?;
        debug!(site = %site.id, version, path = %target.display(), "published release");
        Ok(target)
    }

    /// Published versions of a site, ascending.
    pub fn versions(&self, site: &Site) -> Result<Vec<u32>, ReleaseError> {
        let dir = self.site_dir(site);
        let mut versions = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(v) = entry.file_name().to_str().and_then(parse_release_dir)
            {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn load_manifest(&self, site: &Site, version: u32) -> Result<ReleaseManifest, ReleaseError> {
        let path = self.release_dir(site, version).join(MANIFEST_FILENAME);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ReleaseError::NotFound {
                site: site.id,
                version,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Check that a release is present with every file its manifest lists.
    pub fn verify(&self, site: &Site, version: u32) -> Result<ReleaseManifest, ReleaseError> {
        let manifest = self.load_manifest(site, version)?;
        let on_disk = hash_tree(&self.release_dir(site, version))?;
        if on_disk != manifest.files {
            let missing = manifest
                .files
                .keys()
                .find(|k| on_disk.get(*k) != manifest.files.get(*k))
                .or_else(|| on_disk.keys().find(|k| !manifest.files.contains_key(*k)))
                .cloned()
                .unwrap_or_default();
            return Err(ReleaseError::Incomplete {
                version,
                reason: format!("{missing} does not match the manifest"),
            });
        }
        Ok(manifest)
    }
}
