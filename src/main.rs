//! # SE Letters CLI (`sel`)
//!
//! Processes Schneider Electric obsolescence letters: extracts their
//! metadata with an LLM, finds the withdrawn products in the IBcatalogue and
//! stores confirmed matches.
//!
//! ## Usage
//!
//! ```bash
//! sel --config ./config/sel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sel init` | Create the SQLite database and schema |
//! | `sel catalogue import <file.xlsx>` | Load or refresh the IBcatalogue |
//! | `sel catalogue stats` | Catalogue row counts |
//! | `sel process [path]` | Extract, match and store letters |
//! | `sel candidates --range <r>` | Ranked catalogue candidates, no LLM |
//! | `sel letters list\|show\|delete` | Inspect stored letters |
//! | `sel stats` | Database overview |
//! | `sel export` | Letters, products and matches as JSON |
//! | `sel serve` | Start the read-only HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! sel init
//! sel catalogue import ./data/IBcatalogue.xlsx
//! XAI_API_KEY=... sel process ./data/letters --progress human
//! sel candidates --range "TeSys D" --description "contactor 9A"
//! sel letters show 7f1c...
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use se_letters::models::LetterProduct;
use se_letters::pipeline::{self, ProcessOptions};
use se_letters::progress::ProgressMode;
use se_letters::{catalogue, config, export, letters_cmd, migrate, server, stats};

/// SE Letters: obsolescence letter ingestion and IBcatalogue matching.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sel.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sel",
    about = "SE Letters — obsolescence letter extraction and IBcatalogue product matching",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Safe to run repeatedly.
    Init,

    /// Manage the IBcatalogue product table.
    Catalogue {
        #[command(subcommand)]
        action: CatalogueAction,
    },

    /// Process obsolescence letters.
    ///
    /// Extracts text, asks the LLM for document and product metadata, finds
    /// catalogue candidates, arbitrates them and stores confirmed matches.
    /// Letters already processed (same file hash) are skipped unless `--force`.
    Process {
        /// Letter file or directory. Defaults to `[letters].root`.
        path: Option<PathBuf>,

        /// Reprocess letters that were already processed.
        #[arg(long)]
        force: bool,

        /// List the letters that would be processed without calling the LLM.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of letters to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr: `off`, `human` or `json`.
        /// Defaults to `human` on a terminal, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Rank catalogue candidates for a product without calling the LLM.
    Candidates {
        /// Commercial reference.
        #[arg(long = "id")]
        product_identifier: Option<String>,

        #[arg(long = "range")]
        range_label: Option<String>,

        #[arg(long = "subrange")]
        subrange_label: Option<String>,

        /// Product line, e.g. `PSIBS - Power Systems`.
        #[arg(long)]
        product_line: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored letters.
    Letters {
        #[command(subcommand)]
        action: LettersAction,
    },

    /// Show database statistics.
    Stats,

    /// Export letters, products and matches as JSON.
    Export {
        /// Output file. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the read-only HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CatalogueAction {
    /// Import an IBcatalogue XLSX export. Existing products are updated in place.
    Import {
        /// Path to the `.xlsx` workbook.
        path: PathBuf,
    },
    /// Show catalogue row counts.
    Stats,
}

#[derive(Subcommand)]
enum LettersAction {
    /// List letters, newest first.
    List,
    /// Show a letter with its products and matches.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a letter and everything extracted from it.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Catalogue { action } => match action {
            CatalogueAction::Import { path } => catalogue::run_import(&cfg, &path).await?,
            CatalogueAction::Stats => catalogue::run_stats(&cfg).await?,
        },
        Commands::Process {
            path,
            force,
            dry_run,
            limit,
            progress,
        } => {
            let progress = ProgressMode::from_flag(progress.as_deref())?;
            let options = ProcessOptions {
                target: path,
                force,
                dry_run,
                limit,
            };
            pipeline::run_process(&cfg, options, progress).await?;
        }
        Commands::Candidates {
            product_identifier,
            range_label,
            subrange_label,
            product_line,
            description,
            limit,
            json,
        } => {
            let product = LetterProduct {
                product_identifier,
                range_label,
                subrange_label,
                product_line,
                product_description: description,
                ..Default::default()
            };
            pipeline::run_candidates(&cfg, product, limit, json).await?;
        }
        Commands::Letters { action } => match action {
            LettersAction::List => letters_cmd::run_list(&cfg).await?,
            LettersAction::Show { id, json } => letters_cmd::run_show(&cfg, &id, json).await?,
            LettersAction::Delete { id } => letters_cmd::run_delete(&cfg, &id).await?,
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
