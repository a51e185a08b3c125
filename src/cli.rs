//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incrementally sync one author's articles into a Markdown archive.
///
/// Articlesync walks the author's article timeline newest first, saves every
/// article it has not seen before, and records progress in a manifest so an
/// interrupted run resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "articlesync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to ./articlesync.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Account cookie header sent with every request
    #[arg(long, global = true, value_name = "COOKIE")]
    pub cookie: Option<String>,

    /// Directory holding the manifest and article files
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Numeric id of the author to sync
    #[arg(long, global = true, value_name = "ID")]
    pub user_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch articles not yet in the manifest
    Sync {
        /// Stop after this many list pages (0 for no limit)
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(0..=10000))]
        max_pages: Option<u32>,

        /// Save articles without fetching comments; run backfill-comments later
        #[arg(long)]
        skip_comments: bool,
    },

    /// Retry the comments fetch for articles marked as pending
    BackfillComments,

    /// Show manifest counts without contacting the upstream
    Status,

    /// Verify the configured cookie is accepted
    CheckAuth,
}
