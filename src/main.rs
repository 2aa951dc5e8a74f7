//! # Labelizer CLI (`labelizer`)
//!
//! Runs the labeling backend's HTTP server and exposes its operations for
//! administrators working directly on a host.
//!
//! ## Usage
//!
//! ```bash
//! labelizer --config ./config/labelizer.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `labelizer init` | Create the SQLite database and storage directories |
//! | `labelizer serve` | Start the HTTP API |
//! | `labelizer upload <zip>` | Ingest an upload archive in the foreground |
//! | `labelizer status` | Show upload progress |
//! | `labelizer stats` | Item and triplet counts |
//! | `labelizer export` | Write labeled triplets as CSV |
//! | `labelizer delete` | Delete every triplet of a collection |
//! | `labelizer similarity <a> <b>` | Cosine similarity of two items |
//! | `labelizer neighbors <id>` | Nearest items to one item |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use labelizer::{config, export, migrate, server, similarity, triplets, upload};

/// Labelizer: triplet labeling backend for image similarity datasets.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/labelizer.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "labelizer",
    about = "Labelizer: triplet labeling backend for image similarity datasets",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/labelizer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage directories.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Ingest a zip archive (data/images, data/triplets.csv, ...).
    Upload {
        /// Path to the archive.
        archive: PathBuf,
    },

    /// Show upload progress (latest upload unless --id is given).
    Status {
        #[arg(long)]
        id: Option<i64>,
    },

    /// Show item and triplet counts.
    Stats,

    /// Export labeled triplets as CSV.
    Export {
        /// Export validation triplets instead of triplets.
        #[arg(long)]
        validation: bool,

        /// Output file (defaults to stdout).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Delete every triplet of a collection.
    Delete {
        /// Delete validation triplets instead of triplets.
        #[arg(long)]
        validation: bool,
    },

    /// Cosine similarity between two items.
    Similarity { item1_id: String, item2_id: String },

    /// Nearest neighbours of an item.
    Neighbors {
        item_id: String,

        /// Number of neighbours to return.
        #[arg(short, long, default_value = "10")]
        k: usize,
    },
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("labelizer=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.images_dir)?;
            std::fs::create_dir_all(&cfg.storage.scratch_dir)?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload { archive } => {
            upload::run_upload(&cfg, &archive).await?;
        }
        Commands::Status { id } => {
            upload::run_status(&cfg, id).await?;
        }
        Commands::Stats => {
            triplets::run_stats(&cfg).await?;
        }
        Commands::Export { validation, output } => {
            export::run_export(&cfg, validation, output.as_deref()).await?;
        }
        Commands::Delete { validation } => {
            triplets::run_delete(&cfg, validation).await?;
        }
        Commands::Similarity { item1_id, item2_id } => {
            similarity::run_similarity(&cfg, &item1_id, &item2_id).await?;
        }
        Commands::Neighbors { item_id, k } => {
            similarity::run_neighbors(&cfg, &item_id, k).await?;
        }
    }

    Ok(())
}
