//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download books from online sources and assemble them into local
/// container files.
#[derive(Parser, Debug)]
#[command(name = "bindery")]
#[command(author, version, about)]
pub struct Args {
    /// Links to books or series
    pub urls: Vec<String>,

    /// File with links (one link per line)
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Username for login
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password for login
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Library for login, where the source requires one
    #[arg(long)]
    pub library: Option<String>,

    /// Path to a Netscape-format cookie file
    #[arg(short = 'c', long)]
    pub cookies: Option<PathBuf>,

    /// Output path template, e.g. "{series}/{title}.{ext}"
    #[arg(short = 'o', long)]
    pub output: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
