use clap::{Parser, Subcommand};
use site_factory::config::{self, FactoryConfig, RemoteConfig, RemoteKind};
use site_factory::jobs::{self, ContentScope, JobPayload, JobRunner, JobState};
use site_factory::pipeline::Pipeline;
use site_factory::release::ReleaseStore;
use site_factory::remote::{LocalRemote, Remote, SshRemote};
use site_factory::store::{SiteBundle, Store};
use site_factory::synth::{HttpSynthesizer, Synthesizer};
use site_factory::types::{PageId, SiteId};
use site_factory::{content, output, status, trigger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Called once per process.
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "site-factory")]
#[command(about = "Content pipeline for fleets of affiliate sites")]
#[command(long_about = "\
Content pipeline for fleets of affiliate sites

Every site moves through three stages, each run as a background job:

  generate   synthesize page content from prompts (history kept per page)
  build      render all pages into an immutable release output/{id}_{slug}/v{n}
  deploy     upload a release, swing the live alias, prune, configure nginx

A site runs at most one job at a time; a request for a busy site is
rejected. 'rollback' swings the alias back to the previous retained release
without a transfer. 'tick' runs whatever each site needs, in order.

Data layout:

  data/
  ├── brands.json                  # Brand registry and regional overrides
  ├── sites/{id}/site.json         # Site record, status, version counter
  ├── sites/{id}/pages/{id}.json   # Page record and live content
  ├── sites/{id}/history/{page}/   # Replaced content, append-only
  ├── sites/{id}/media/            # Hero images copied into each release
  ├── jobs/{job}.json              # Job records, readable from any process
  └── locks/{site}.lock, .holder   # Held while a job runs, and by whom

Run 'site-factory gen-config' to print a documented site-factory.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file; stock defaults apply when it is missing
    #[arg(long, default_value = "site-factory.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a site, its pages and brands from a JSON bundle
    Import { bundle: PathBuf },
    /// Generate content for every page of a site
    Generate {
        #[arg(long)]
        site: u32,
        /// Only pages that have no content yet
        #[arg(long)]
        new_only: bool,
        /// Regenerate pages that already have content
        #[arg(long)]
        force: bool,
    },
    /// Generate content for one page
    Regenerate {
        #[arg(long)]
        site: u32,
        #[arg(long)]
        page: u32,
        #[arg(long)]
        force: bool,
        /// Instruction folded into the prompt, cleared once applied
        #[arg(long)]
        directive: Option<String>,
    },
    /// Render the site into a new immutable release
    Build {
        #[arg(long)]
        site: u32,
    },
    /// Promote a release to the remote host
    Deploy {
        #[arg(long)]
        site: u32,
        /// Release to deploy; defaults to the last build
        #[arg(long)]
        version: Option<u32>,
    },
    /// Point the live alias back at the previous retained release
    Rollback {
        #[arg(long)]
        site: u32,
    },
    /// Show site status
    Status {
        #[arg(long)]
        site: Option<u32>,
    },
    /// Show a job record
    Job { id: String },
    /// Request cancellation of a running job
    Cancel { id: String },
    /// List earlier content versions of a page
    History {
        #[arg(long)]
        site: u32,
        #[arg(long)]
        page: u32,
    },
    /// Make an earlier content version live again
    Restore {
        #[arg(long)]
        site: u32,
        #[arg(long)]
        page: u32,
        #[arg(long)]
        version: u32,
    },
    /// Run pending content, build and deploy work for every site
    Tick,
    /// Print a stock site-factory.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    let store = Store::open(&config.paths.data_dir)?;
    recover(&store)?;

    match cli.command {
        Command::Import { bundle } => {
            let text = std::fs::read_to_string(&bundle)?;
            let bundle: SiteBundle = serde_json::from_str(&text)?;
            let id = store.import_site(bundle)?;
            let site = store.load_site(id)?;
            println!("Imported site {} {} ({} pages)", id, site.name, store.list_pages(id)?.len());
        }
        Command::Generate {
            site,
            new_only,
            force,
        } => {
            let scope = if new_only {
                ContentScope::NewPagesOnly
            } else {
                ContentScope::Site
            };
            let payload = JobPayload::Generate {
                scope,
                force,
                directive: None,
            };
            run_job(&store, &config, SiteId(site), payload)?;
        }
        Command::Regenerate {
            site,
            page,
            force,
            directive,
        } => {
            let payload = JobPayload::Generate {
                scope: ContentScope::Page(PageId(page)),
                force,
                directive,
            };
            run_job(&store, &config, SiteId(site), payload)?;
        }
        Command::Build { site } => run_job(&store, &config, SiteId(site), JobPayload::Build)?,
        Command::Deploy { site, version } => {
            run_job(&store, &config, SiteId(site), JobPayload::Deploy { version })?
        }
        Command::Rollback { site } => run_job(&store, &config, SiteId(site), JobPayload::Rollback)?,
        Command::Status { site } => {
            let ids = match site {
                Some(id) => vec![SiteId(id)],
                None => store.site_ids()?,
            };
            let summaries = ids
                .into_iter()
                .map(|id| status::summarize(&store, id))
                .collect::<Result<Vec<_>, _>>()?;
            output::print_status(&summaries);
        }
        Command::Job { id } => output::print_job(&jobs::load_job(&store, &id)?),
        Command::Cancel { id } => output::print_job(&jobs::request_cancel(&store, &id)?),
        Command::History { site, page } => {
            let (site, page) = (SiteId(site), PageId(page));
            let record = store.load_page(site, page)?;
            let entries = store.list_history(site, page)?;
            output::print_history(&record, &entries);
        }
        Command::Restore {
            site,
            page,
            version,
        } => {
            let restored = content::restore(&store, SiteId(site), PageId(page), version)?;
            println!("Restored page {} {} to v{version}", restored.id, restored.title);
        }
        Command::Tick => {
            let (runner, pipeline) = start(&store, &config)?;
            let reports = trigger::tick(&runner, &pipeline)?;
            output::print_tick(&reports);
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Pipeline diagnostics on stderr, filtered by `RUST_LOG`.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("site_factory=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settle records left behind by a process that died mid-job.
fn recover(store: &Store) -> Result<(), Box<dyn std::error::Error>> {
    let orphans = jobs::recover_orphans(store)?;
    let sites = status::recover_interrupted(store)?;
    if orphans + sites > 0 {
        info!(jobs = orphans, sites, "recovered interrupted work");
    }
    Ok(())
}

fn remote_from(config: &RemoteConfig) -> Result<Arc<dyn Remote>, String> {
    match config.kind {
        RemoteKind::Local => Ok(Arc::new(LocalRemote::from_config(config))),
        RemoteKind::Ssh => SshRemote::from_config(config)
            .map(|remote| Arc::new(remote) as Arc<dyn Remote>)
            .map_err(|e| e.to_string()),
    }
}

fn synth_from(config: &FactoryConfig) -> Result<Arc<dyn Synthesizer>, String> {
    HttpSynthesizer::from_config(&config.content)
        .map(|synth| Arc::new(synth) as Arc<dyn Synthesizer>)
        .map_err(|e| e.to_string())
}

fn start(
    store: &Store,
    config: &FactoryConfig,
) -> Result<(JobRunner, Arc<Pipeline>), Box<dyn std::error::Error>> {
    let pipeline = Arc::new(
        Pipeline::new(
            store.clone(),
            ReleaseStore::new(&config.paths.output_dir),
            remote_from(&config.remote),
            synth_from(config),
        )
        .configure(config),
    );
    let workers = config::effective_threads(&config.jobs);
    let runner = JobRunner::new(store.clone(), workers, pipeline.clone())?;
    Ok((runner, pipeline))
}

fn run_job(
    store: &Store,
    config: &FactoryConfig,
    site: SiteId,
    payload: JobPayload,
) -> Result<(), Box<dyn std::error::Error>> {
    let (runner, pipeline) = start(store, config)?;
    pipeline.precheck(site, &payload)?;
    wait_for(&runner, site, payload)
}

/// Enqueue and wait: workers do not outlive the process.
fn wait_for(
    runner: &JobRunner,
    site: SiteId,
    payload: JobPayload,
) -> Result<(), Box<dyn std::error::Error>> {
    let handle = runner.enqueue(site, payload)?;
    info!(site = %site, job = handle.id(), "job started");
    let record = handle.wait()?;
    output::print_job(&record);
    match record.state {
        JobState::Failed => Err(format!("job {} failed", record.id).into()),
        _ => Ok(()),
    }
}
