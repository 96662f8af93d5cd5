//! CLI entry point for the bindery tool.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bindery::source::cookies::load_cookie_file;
use bindery::{
    Book, DownloadOptions, FileConfig, FormatRegistry, Outcome, Source, SourceCache,
    SourceOutput, download_book, download_series,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Resolution of one progress bar; fractions are scaled onto this.
const PROGRESS_TICKS: u64 = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = match bindery::load_config() {
        Ok(config) => config,
        Err(error) => {
            warn!(error = %error, "ignoring unreadable config file");
            FileConfig::default()
        }
    };

    let urls = collect_urls(&args)?;
    if urls.is_empty() {
        info!("No input provided. Pass book URLs as arguments or via --file.");
        return Ok(());
    }

    let options = DownloadOptions {
        output_template: args
            .output
            .clone()
            .or_else(|| config.output.clone())
            .unwrap_or_else(|| DownloadOptions::default().output_template),
    };
    let registry = FormatRegistry::with_default_formats();

    // One adapter instance per source, alive for this run only. Site
    // adapters register here; an empty cache reports every URL as unmatched.
    let mut sources = SourceCache::new();

    let mut failures = 0usize;
    for url in &urls {
        if let Err(error) = process_url(url, &mut sources, &config, &args, &options, &registry).await
        {
            warn!(url = %url, error = %error, "download failed");
            failures += 1;
        }
    }

    if failures > 0 {
        bail!("{failures} of {} download(s) failed", urls.len());
    }
    Ok(())
}

/// Positional URLs plus the optional links file, one link per line.
fn collect_urls(args: &Args) -> Result<Vec<String>> {
    let mut urls = args.urls.clone();
    if let Some(path) = &args.file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read links file '{}'", path.display()))?;
        urls.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(urls)
}

async fn process_url(
    url: &str,
    sources: &mut SourceCache,
    config: &FileConfig,
    args: &Args,
    options: &DownloadOptions,
    registry: &FormatRegistry,
) -> Result<()> {
    let source = sources.find_by_url(url)?;
    if source.requires_authentication() {
        authenticate(source.as_mut(), config, args).await?;
    }

    match source.download(url).await? {
        SourceOutput::Book(book) => {
            info!(title = %book.metadata.title, source = source.name(), "downloading book");
            let bar = book_progress_bar(&book);
            let callback = progress_callback(&bar);
            let outcome = download_book(&book, options, registry, Some(&callback)).await?;
            finish_bar(&bar, &outcome);
        }
        SourceOutput::Series(series) => {
            info!(
                title = %series.title,
                books = series.book_ids.len(),
                source = source.name(),
                "downloading series"
            );
            let bar = series_progress_bar(series.book_ids.len());
            let callback = progress_callback(&bar);
            let outcome =
                download_series(source.as_ref(), &series, options, registry, Some(&callback))
                    .await?;
            bar.finish_and_clear();
            info!(
                written = outcome.written(),
                denied = outcome.denied.len(),
                "series finished"
            );
        }
    }
    Ok(())
}

/// Authenticates with whichever declared mechanism the invocation can feed.
async fn authenticate(source: &mut dyn Source, config: &FileConfig, args: &Args) -> Result<()> {
    if let Some(cookie_file) = &args.cookies
        && source.supports_cookies()
    {
        // Parse once up front so an unreadable file fails with a useful
        // message before the source touches it.
        load_cookie_file(cookie_file)?;
        source.load_cookies(cookie_file)?;
        return Ok(());
    }

    if source.supports_login() {
        let stored = config.source(source.name());
        let username = args
            .username
            .clone()
            .or_else(|| stored.and_then(|s| s.username.clone()))
            .with_context(|| format!("no username for '{}'", source.name()))?;
        let password = args
            .password
            .clone()
            .or_else(|| stored.and_then(|s| s.password.clone()))
            .with_context(|| format!("no password for '{}'", source.name()))?;

        let mut extra = HashMap::new();
        if let Some(library) = args
            .library
            .clone()
            .or_else(|| stored.and_then(|s| s.library.clone()))
        {
            extra.insert("library".to_string(), library);
        }

        source.login(&username, &password, &extra).await?;
        return Ok(());
    }

    bail!(
        "source '{}' requires authentication this invocation cannot provide",
        source.name()
    );
}

fn book_progress_bar(book: &Book) -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_TICKS);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {percent:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(book.metadata.title.clone());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn series_progress_bar(book_count: usize) -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_TICKS * book_count.max(1) as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Adapts accumulated progress fractions onto an indicatif bar.
fn progress_callback(bar: &ProgressBar) -> impl Fn(f64) + Send + Sync + use<> {
    let bar = bar.clone();
    move |fraction: f64| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        bar.inc((fraction * PROGRESS_TICKS as f64).round() as u64);
    }
}

fn finish_bar(bar: &ProgressBar, outcome: &Outcome) {
    bar.finish_and_clear();
    match outcome {
        Outcome::Written(path) => info!(path = %path.display(), "saved"),
        Outcome::Skipped(path) => info!(path = %path.display(), "already exists, skipped"),
    }
}
