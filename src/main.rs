use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use portfolio_catalog::ingest::seed;
use portfolio_catalog::{CatalogConfig, CatalogWriter, ProjectAggregate, ProjectId, Store};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite file holding the catalog
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Key file with CATALOG_* settings
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Milliseconds to wait for the writer before giving up on a request
    #[arg(long)]
    request_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the catalog tables if they are missing
    Init,
    /// Insert one project from a JSON file
    Add { file: PathBuf },
    /// Print one project as JSON
    Show { id: i64 },
    /// Print every project as a JSON array
    List,
    /// Print project and tag counts
    Stats,
    /// Import every JSON file under a directory
    Import { dir: Option<PathBuf> },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = CatalogConfig::load(&args.env_file)?;
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }
    if let Some(millis) = args.request_timeout_ms {
        config.set_request_timeout_ms(millis)?;
    }

    info!("Catalog: {:?}", config.db_path);
    let store = Store::from_config(&config);

    // Provisioning failures are fatal: nothing runs against a half-ready catalog.
    let repo = match store.initialize() {
        Ok(repo) => repo,
        Err(e) => {
            error!("Catalog is not usable: {}", e);
            return Err(e).context("Failed to initialize catalog");
        }
    };

    match args.command {
        Command::Init => {
            info!("Catalog schema is ready");
        }
        Command::Add { file } => {
            let body = fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let project: ProjectAggregate =
                serde_json::from_slice(&body).context("Invalid project JSON")?;

            let writer = CatalogWriter::spawn(repo, config.request_timeout)?;
            let id = writer.handle().insert_project(project)?;
            writer.shutdown();
            println!("{}", id);
        }
        Command::Show { id } => match repo.get_project(ProjectId(id))? {
            Some(project) => println!("{}", serde_json::to_string_pretty(&project)?),
            None => return Err(anyhow!("No project with id {}", id)),
        },
        Command::List => {
            let projects = repo.get_all_projects()?;
            println!("{}", serde_json::to_string_pretty(&projects)?);
        }
        Command::Stats => {
            println!("projects: {}", repo.count_projects()?);
            let tags = repo.list_tags()?;
            println!("tags: {}", tags.len());
            for tag in tags {
                println!("  {:>4}  {}", tag.id, tag.category);
            }
        }
        Command::Import { dir } => {
            let dir = dir
                .or_else(|| config.seed_dir.clone())
                .ok_or_else(|| anyhow!("No seed directory given and CATALOG_SEED_DIR is unset"))?;

            let progress = ProgressBar::new_spinner();
            progress.set_style(
                ProgressStyle::with_template("{spinner} [{pos} files] {wide_msg}")
                    .context("Invalid progress template")?,
            );
            progress.enable_steady_tick(Duration::from_millis(120));

            let writer = CatalogWriter::spawn(repo, config.request_timeout)?;
            let handle = writer.handle();
            let summary = seed::import_directory(&dir, &handle, &progress);
            drop(handle);
            writer.shutdown();
            progress.finish_and_clear();

            let summary = summary?;
            info!(
                seen = summary.files_seen,
                imported = summary.files_imported,
                skipped = summary.files_skipped,
                failed = summary.files_failed,
                projects = summary.projects_inserted,
                "Seed import finished"
            );
            if summary.files_failed > 0 {
                return Err(anyhow!("{} seed file(s) failed to import", summary.files_failed));
            }
        }
    }

    Ok(())
}
