//! # diggy - Schema and Mutation Tooling
//!
//! The binary front end for diggy-core.
//!
//! This application provides:
//! - Schema generation from a TOML type declaration file
//! - A listing of the declared node types
//! - Hydration of stored query results into an instance dump
//! - Mutation statements regenerated from a query result
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             apps/diggy (THE BINARY)          │
//! │                                              │
//! │   ┌─────────────┐      ┌─────────────────┐   │
//! │   │    CLI      │ ───▶ │   diggy-core    │   │
//! │   │   (clap)    │      │   (THE LOGIC)   │   │
//! │   └─────────────┘      └─────────────────┘   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! diggy --types types.toml generate
//! diggy --types types.toml hydrate -i result.json -d 2
//! diggy --types types.toml mutate -i result.json
//! ```

use clap::Parser;
use diggy::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // DIGGY_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("DIGGY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "diggy=debug,diggy_core=debug"
    } else {
        "diggy=info,diggy_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    // Output goes to stdout, so the banner goes to stderr.
    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the diggy startup banner.
fn print_banner() {
    eprintln!(
        r#"
       ___
  ____/ (_)___ _____ ___  __
 / __  / / __ `/ __ `/ / / /
/ /_/ / / /_/ / /_/ / /_/ /
\__,_/_/\__, /\__, /\__, /
       /____//____//____/

  diggy v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
