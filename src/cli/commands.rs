//! CLI command implementations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ScanSettings;
use crate::models::RepresentativeRole;
use crate::pipeline::Pipeline;
use crate::repository::{open_store, ClusterRepository, PageRepository, ScanRepository};

#[derive(Parser)]
#[command(name = "aeo")]
#[command(about = "Answer-engine readiness scanner")]
#[command(version)]
pub struct Cli {
    /// Data directory holding aeoscan.db (overrides config file).
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (default: ./aeoscan.toml when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database.
    Init,

    /// Scan a domain end to end and report the outcome.
    Scan {
        /// Target domain, e.g. example.com.
        domain: String,

        /// Page budget override for this scan.
        #[arg(long)]
        max_pages: Option<u64>,

        /// Disable the headless render fallback.
        #[arg(long)]
        no_render: bool,
    },

    /// Show one scan's status and counters.
    Status {
        /// Scan ID.
        scan_id: String,
    },

    /// List recent scans.
    List {
        /// Maximum scans to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show a scan's clusters and their representatives.
    Clusters {
        /// Scan ID.
        scan_id: String,
    },
}

/// Parse arguments and dispatch.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = ScanSettings::load(cli.config.as_deref())?;
    if let Some(target) = cli.target {
        settings.data_dir = target;
    }

    match cli.command {
        Commands::Init => init(&settings),
        Commands::Scan {
            domain,
            max_pages,
            no_render,
        } => {
            if let Some(max_pages) = max_pages {
                settings.budget.max_pages = max_pages;
            }
            if no_render {
                settings.render.enabled = false;
            }
            scan(settings, &domain).await
        }
        Commands::Status { scan_id } => status(&settings, &scan_id),
        Commands::List { limit } => list(&settings, limit),
        Commands::Clusters { scan_id } => clusters(&settings, &scan_id),
    }
}

fn init(settings: &ScanSettings) -> anyhow::Result<()> {
    let db_path = settings.db_path();
    open_store(&db_path)?;
    println!("Initialized store at {}", db_path.display());
    Ok(())
}

async fn scan(settings: ScanSettings, domain: &str) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(settings)?;
    let scan = pipeline.start_scan(domain)?;
    println!("Scan {} started for {}", scan.id, domain);

    let finished = pipeline.clone().run_until_complete(&scan.id).await?;

    println!();
    println!("Scan {}", finished.id);
    println!("  domain:   {}", finished.domain);
    println!("  status:   {}", finished.status.as_str());
    println!("  fetched:  {}", finished.pages_fetched);
    println!("  rendered: {}", finished.pages_rendered);
    if finished.limits_hit.any() {
        let mut hit = Vec::new();
        if finished.limits_hit.pages {
            hit.push("pages");
        }
        if finished.limits_hit.renders {
            hit.push("renders");
        }
        if finished.limits_hit.llm_calls {
            hit.push("llm_calls");
        }
        if finished.limits_hit.tokens {
            hit.push("tokens");
        }
        println!("  limits:   {}", hit.join(", "));
    }
    if let Some(error) = &finished.last_error {
        println!("  error:    {}", error);
    }
    Ok(())
}

fn status(settings: &ScanSettings, scan_id: &str) -> anyhow::Result<()> {
    let db_path = settings.db_path();
    let scans = ScanRepository::new(&db_path)?;
    let pages = PageRepository::new(&db_path)?;

    let Some(scan) = scans.get(scan_id)? else {
        anyhow::bail!("scan {} not found", scan_id);
    };
    let counts = pages.counts(scan_id)?;

    println!("Scan {} ({})", scan.id, scan.domain);
    println!("  status:    {}", scan.status.as_str());
    println!(
        "  pages:     {} total, {} extracted, {} skipped, {} failed",
        counts.total, counts.extracted, counts.skipped, counts.failed
    );
    println!(
        "  budget:    {} fetched, {} rendered, {} llm calls, {} tokens",
        scan.pages_fetched, scan.pages_rendered, scan.llm_calls, scan.tokens_used
    );
    if let Some(error) = &scan.last_error {
        println!("  error:     {}", error);
    }
    Ok(())
}

fn list(settings: &ScanSettings, limit: u32) -> anyhow::Result<()> {
    let scans = ScanRepository::new(&settings.db_path())?;
    for scan in scans.list(limit)? {
        println!(
            "{}  {:24}  {:22}  {}",
            scan.created_at.format("%Y-%m-%d %H:%M"),
            scan.domain,
            scan.status.as_str(),
            scan.id
        );
    }
    Ok(())
}

fn clusters(settings: &ScanSettings, scan_id: &str) -> anyhow::Result<()> {
    let repo = ClusterRepository::new(&settings.db_path())?;
    let clusters = repo.list_for_scan(scan_id)?;
    if clusters.is_empty() {
        println!("No clusters for scan {}", scan_id);
        return Ok(());
    }

    for cluster in clusters {
        println!(
            "{} ({} pages)  [{}]",
            cluster.name, cluster.member_count, cluster.pattern
        );
        let pages = repo.pages_for_cluster(scan_id, &cluster.key)?;
        for role in [
            RepresentativeRole::Best,
            RepresentativeRole::Typical,
            RepresentativeRole::Worst,
        ] {
            if let Some(page) = pages.iter().find(|p| p.role == role) {
                println!("  {:8} {}", role.as_str(), page.page_url);
            }
        }
    }
    Ok(())
}
