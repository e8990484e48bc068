//! # AgroLink - Rural Credit Pipeline Server
//!
//! The main binary for the AgroLink stage pipeline.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for pipeline administration
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                apps/agrolink (THE BINARY)                 │
//! │                                                           │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────┐  │
//! │  │   CLI       │    │   HTTP API  │    │  Document    │  │
//! │  │  (clap)     │    │   (axum)    │    │  purger (fs) │  │
//! │  └──────┬──────┘    └──────┬──────┘    └──────┬───────┘  │
//! │         │                  │                  │          │
//! │         └──────────────────┼──────────────────┘          │
//! │                            ▼                             │
//! │                  ┌──────────────────┐                    │
//! │                  │  agrolink-core   │                    │
//! │                  │   (THE LOGIC)    │                    │
//! │                  └──────────────────┘                    │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Create the database with the default stage catalog
//! agrolink init
//!
//! # Start the HTTP server
//! agrolink server --host 0.0.0.0 --port 8080
//!
//! # Inspect
//! agrolink stages
//! agrolink project 12
//! ```

use agrolink::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // AGROLINK_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("AGROLINK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agrolink=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the AgroLink startup banner.
fn print_banner() {
    println!(
        r#"
   █████╗  ██████╗ ██████╗  ██████╗ ██╗     ██╗███╗   ██╗██╗  ██╗
  ██╔══██╗██╔════╝ ██╔══██╗██╔═══██╗██║     ██║████╗  ██║██║ ██╔╝
  ███████║██║  ███╗██████╔╝██║   ██║██║     ██║██╔██╗ ██║█████╔╝
  ██╔══██║██║   ██║██╔══██╗██║   ██║██║     ██║██║╚██╗██║██╔═██╗
  ██║  ██║╚██████╔╝██║  ██║╚██████╔╝███████╗██║██║ ╚████║██║  ██╗
  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚═╝╚═╝  ╚═══╝╚═╝  ╚═╝

  Rural Credit Pipeline v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
