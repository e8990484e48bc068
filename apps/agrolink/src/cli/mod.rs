//! # AgroLink CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Create the database and seed the stage catalog
//! - `stages` - List pipeline stages and their checklist items
//! - `status` - Show dashboard counters
//! - `project` - Show one project with its stage history
//! - `alerts` - List proposals left open too long

mod commands;

use agrolink_core::PipelineError;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// AgroLink - rural credit stage pipeline
///
/// Tracks loan applications through an ordered, configurable sequence of
/// processing stages.
#[derive(Parser, Debug)]
#[command(name = "agrolink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the pipeline database
    #[arg(short = 'D', long, global = true, default_value = "agrolink.db")]
    pub database: PathBuf,

    /// Storage backend
    #[arg(short = 'B', long, global = true, value_enum, default_value_t = Backend::Redb)]
    pub backend: Backend,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where the pipeline keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Process memory; lost on exit. Seeded with the default catalog.
    Memory,
    /// ACID redb database file.
    Redb,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Redb => write!(f, "redb"),
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Initialize the database and seed the stage catalog
    Init {
        /// Stage catalog in TOML (default: built-in seven-stage catalog)
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Recreate the database even if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// List pipeline stages
    Stages {
        /// Include deactivated stages
        #[arg(short, long)]
        all: bool,
    },

    /// Show dashboard counters
    Status,

    /// Show a project with its stage history (`--verbose` adds pendencies and notes)
    Project {
        /// Project id
        id: u64,
    },

    /// List open proposals waiting longer than the threshold
    Alerts {
        /// Threshold in days (default: AGROLINK_PROPOSAL_ALERT_DAYS or 7)
        #[arg(short, long)]
        days: Option<u32>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), PipelineError> {
    let backend = cli.backend;
    let json_mode = cli.json_mode;
    let verbose = cli.verbose;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            cmd_server(&cli.database, backend, &host, port).await
        }
        Some(Commands::Init { catalog, force }) => {
            cmd_init(&cli.database, backend, catalog.as_deref(), force)
        }
        Some(Commands::Stages { all }) => cmd_stages(&cli.database, backend, json_mode, all),
        Some(Commands::Status) => cmd_status(&cli.database, backend, json_mode),
        Some(Commands::Project { id }) => cmd_project(&cli.database, backend, json_mode, verbose, id),
        Some(Commands::Alerts { days }) => cmd_alerts(&cli.database, backend, json_mode, days),
        // No subcommand: show status
        None => cmd_status(&cli.database, backend, json_mode),
    }
}
