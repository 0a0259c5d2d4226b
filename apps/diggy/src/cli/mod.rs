//! # diggy CLI Module
//!
//! ## Available Commands
//!
//! - `generate` - Print the store schema for the declared types
//! - `types` - List the declared node types
//! - `hydrate` - Hydrate a query result file and dump the instances
//! - `mutate` - Hydrate a query result file and print its mutation

mod commands;

use clap::{Parser, Subcommand};
use diggy_core::DiggyError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// diggy - schema and mutation tooling for declared node types
///
/// Node types are read from a TOML declaration file.
#[derive(Parser, Debug)]
#[command(name = "diggy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the type declaration file
    #[arg(short = 'T', long, global = true, default_value = "types.toml")]
    pub types: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the schema for the declared types
    Generate {
        /// Write the schema to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the declared node types
    Types,

    /// Hydrate a query result and dump the instances
    Hydrate {
        /// Path to the query result (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Reference expansion depth of the dump
        #[arg(short, long, default_value = "1")]
        depth: usize,
    },

    /// Hydrate a query result and print the mutation that would store it
    Mutate {
        /// Path to the query result (JSON)
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), DiggyError> {
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Generate { output }) => {
            cmd_generate(&cli.types, json_mode, output.as_deref())
        }
        Some(Commands::Types) | None => cmd_types(&cli.types, json_mode),
        Some(Commands::Hydrate { input, depth }) => {
            cmd_hydrate(&cli.types, json_mode, &input, depth)
        }
        Some(Commands::Mutate { input }) => cmd_mutate(&cli.types, json_mode, &input),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["diggy", "hydrate", "-i", "r.json", "--types", "t.toml", "-q"])
            .expect("parse");
        assert!(cli.quiet);
        assert_eq!(cli.types, PathBuf::from("t.toml"));
        match cli.command {
            Some(Commands::Hydrate { input, depth }) => {
                assert_eq!(input, PathBuf::from("r.json"));
                assert_eq!(depth, 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn no_subcommand_is_accepted() {
        let cli = Cli::try_parse_from(["diggy"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.types, PathBuf::from("types.toml"));
    }
}
