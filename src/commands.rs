//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use secure_support::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Search { query, .. } = cli.command {
//!     println!("searching for {query}");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Configuration file. Defaults to `<config_dir>/config.yaml`.
    #[arg(long, short = 'c', global = true, env = "SECSUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration and answer template.
    Init,

    /// Generate a synthetic ticket document.
    #[clap(name = "generate", alias = "g")]
    Generate {
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,

        #[arg(short, long, default_value = "tickets.json")]
        output: PathBuf,

        /// Seed for reproducible output.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Embed and upsert a ticket document. Defaults to the configured `tickets_path`.
    #[clap(name = "index")]
    Index { path: Option<PathBuf> },

    /// Return the tickets most similar to a query.
    #[clap(name = "search", alias = "s")]
    Search {
        query: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Answer a question from the most similar tickets.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Replace the encryption key and rebuild the index under the new one.
    ///
    /// Everything encrypted under the old key becomes unreadable.
    Reset {
        #[arg(long)]
        yes: bool,
    },

    /// Show the key fingerprint and whether it opens the remote index. Changes nothing.
    Status,
}
