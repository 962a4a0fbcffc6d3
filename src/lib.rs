//! # Site Factory
//!
//! A content pipeline for fleets of affiliate websites. Each site is a set of
//! typed pages whose content is synthesized from prompts, rendered into an
//! immutable versioned release, and promoted to a web host with an atomic
//! alias swing that can be rolled back.
//!
//! # Architecture: Three-Stage Pipeline
//!
//! ```text
//! 1. Content   prompts      →  page content + history   (data/sites/{id}/…)
//! 2. Build     page content →  output/{id}_{slug}/v{n}/ (immutable release)
//! 3. Deploy    release      →  {web_root}/{domain}/releases/v{n} + current
//! ```
//!
//! Every stage runs as a background job. A job takes the site's lock when it
//! is enqueued; a second request for a busy site is rejected instead of
//! queued. Progress is a persisted record that any process can poll.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | Records shared by every stage (`Site`, `Page`, `RemoteState`, …) |
//! | [`store`] | JSON record store with atomic writes, imports and validation |
//! | [`brand`] | Brand registry and global → regional → site field layering |
//! | [`lock`] | Per-site lock files with stale-holder detection |
//! | [`jobs`] | Job runner, persisted job records, cancellation markers |
//! | [`status`] | Site lifecycle state machine and staleness |
//! | [`synth`] | Synthesizer trait and the HTTP chat-completions client |
//! | [`content`] | Stage 1: prompts, scoped generation, history and restore |
//! | [`nav`] | Routes, header nav, footer groups and cluster links |
//! | [`render`] | Page templates (Maud), favicon, markdown |
//! | [`sitemap`] | `sitemap.xml` and `robots.txt` |
//! | [`builder`] | Stage 2: renders a site into a staged release and publishes it |
//! | [`release`] | Local release store and file manifests |
//! | [`proxy`] | nginx server blocks |
//! | [`remote`] | Remote host operations over ssh/rsync or the local filesystem |
//! | [`deploy`] | Stage 3: transfer, alias swing, retention, TLS bootstrap, rollback |
//! | [`pipeline`] | Job handler that dispatches payloads to the stages |
//! | [`trigger`] | Periodic pass: content → build → deploy for every site |
//! | [`config`] | `site-factory.toml` loading, merging and validation |
//! | [`naming`] | Slugs and release directory names |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Immutable Releases
//!
//! A build never edits an earlier release. It renders into a staging
//! directory and publishes with one rename, so a half-written build is never
//! visible under a version number. Version numbers are allocated before
//! rendering and never reused, even when the build fails.
//!
//! ## Deterministic Rendering
//!
//! Rendering is a pure function of pages, brands, and media. It reads no
//! clock, and maps and key orders are fixed, so rebuilding unchanged inputs
//! yields byte-identical pages. Only `manifest.json` records when it was
//! built.
//!
//! ## Swing, Then Prune
//!
//! The remote `current` link moves only after the full release has landed,
//! and old releases are pruned only after it moved. At every moment the live
//! alias points at a complete release, and rollback needs no transfer.
//!
//! ## Files, Not a Database
//!
//! Records are small JSON files written via temp file and rename. Job
//! records, locks and cancel markers are plain files too, so a status query
//! from another process is a couple of file reads.

pub mod brand;
pub mod builder;
pub mod config;
pub mod content;
pub mod deploy;
pub mod jobs;
pub mod lock;
pub mod naming;
pub mod nav;
pub mod output;
pub mod pipeline;
pub mod proxy;
pub mod release;
pub mod remote;
pub mod render;
pub mod sitemap;
pub mod status;
pub mod store;
pub mod synth;
pub mod trigger;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
