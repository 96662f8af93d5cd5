//! Download orchestration: from a resolved book to one file on disk.
//!
//! Each book moves through resolving (pick an assembler), formatting
//! (expand and sanitize the output path), and writing (assemble the
//! container), with an early skip when the output already exists and the
//! book does not allow overwriting. The assembler's `close()` runs on every
//! exit path.
//!
//! Series expand one id at a time through the owning source; an
//! access-denied failure on a single item is logged and skipped, anything
//! else aborts the run.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::book::{Book, Series};
use crate::output::{FormatRegistry, OutputError};
use crate::fetch::ProgressFn;
use crate::source::{Source, SourceError};
use crate::template;

/// Options for one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Output path template with `{field}` placeholders.
    pub output_template: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_template: "{title}.{ext}".to_string(),
        }
    }
}

/// How one book ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The container was assembled and written.
    Written(PathBuf),
    /// The output already existed and the book forbids overwriting. Not a
    /// failure.
    Skipped(PathBuf),
}

impl Outcome {
    /// The path the outcome refers to.
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Written(path) | Self::Skipped(path) => path,
        }
    }
}

/// Result of expanding a whole series.
#[derive(Debug, Default)]
pub struct SeriesOutcome {
    /// Per-book outcomes in series order (written or skipped-existing).
    pub outcomes: Vec<Outcome>,
    /// Ids the service refused; logged and skipped.
    pub denied: Vec<String>,
}

impl SeriesOutcome {
    /// Number of books actually written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Outcome::Written(_)))
            .count()
    }
}

/// Errors that abort one book (or one series run).
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No assembler matches the book's content and the requested extension.
    #[error("no output format for '{title}': {source}")]
    Resolve {
        /// Book title, for the human-facing message.
        title: String,
        /// The registry failure.
        #[source]
        source: OutputError,
    },

    /// The output location could not be prepared.
    #[error("could not prepare output location '{path}': {source}")]
    Prepare {
        /// The path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Assembly failed after resolution.
    #[error("failed to assemble '{title}': {source}")]
    Assemble {
        /// Book title, for the human-facing message.
        title: String,
        /// The assembler failure.
        #[source]
        source: OutputError,
    },

    /// The source failed while a series was being expanded.
    #[error("source failed while expanding series '{series}': {source}")]
    Series {
        /// Series title.
        series: String,
        /// The source failure.
        #[source]
        source: SourceError,
    },
}

impl DownloadError {
    /// Returns true if the failure is the access-denied kind that series
    /// expansion may skip.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::Assemble {
                source: OutputError::Fetch(fetch),
                ..
            } => fetch.is_access_denied(),
            Self::Series { source, .. } => source.is_access_denied(),
            _ => false,
        }
    }
}

/// Downloads one book to disk.
///
/// Progress fractions passed to `on_progress` sum to ≈1.0 for the book.
///
/// # Errors
///
/// Returns [`DownloadError`] when no assembler matches, the output location
/// cannot be prepared, or assembly fails. A skip because the output already
/// exists is a success, not an error.
#[instrument(level = "debug", skip_all, fields(title = %book.metadata.title))]
pub async fn download_book(
    book: &Book,
    options: &DownloadOptions,
    registry: &FormatRegistry,
    on_progress: Option<&ProgressFn>,
) -> Result<Outcome, DownloadError> {
    let title = book.metadata.title.clone();

    // Resolving: a literal extension in the template overrides the
    // content-derived default, but only when it names a registered format.
    let requested = template::requested_extension(&options.output_template)
        .filter(|extension| registry.is_registered(extension));
    let assembler = registry
        .resolve(book, requested)
        .map_err(|source| DownloadError::Resolve {
            title: title.clone(),
            source,
        })?;
    debug!(stage = "resolving", format = assembler.extension(), "assembler selected");

    // Formatting: expand the template and sanitize the path.
    let location = template::render(&options.output_template, &book.metadata, assembler.extension());
    debug!(stage = "formatting", path = %location.display(), "output location resolved");

    if location.exists() && !book.overwrite {
        info!(path = %location.display(), "output already exists, skipping");
        assembler.close().await;
        return Ok(Outcome::Skipped(location));
    }

    // Writing: make room, assemble, and release the assembler's resources
    // whether or not assembly succeeded.
    if let Some(parent) = location.parent()
        && !parent.as_os_str().is_empty()
        && let Err(source) = std::fs::create_dir_all(parent)
    {
        assembler.close().await;
        return Err(DownloadError::Prepare {
            path: parent.to_path_buf(),
            source,
        });
    }

    let result = assembler.assemble(book, &location, on_progress).await;
    assembler.close().await;
    result.map_err(|source| DownloadError::Assemble {
        title: title.clone(),
        source,
    })?;

    info!(path = %location.display(), "book written");
    Ok(Outcome::Written(location))
}

/// Expands a series by resolving each id through the owning source and
/// downloading the resulting books in order.
///
/// An access-denied failure for a single id is reported as a skip and the
/// remaining items continue; any other failure aborts the run.
///
/// # Errors
///
/// Returns [`DownloadError`] for the first non-access-denied failure.
#[instrument(level = "debug", skip_all, fields(series = %series.title, books = series.book_ids.len()))]
pub async fn download_series(
    source: &dyn Source,
    series: &Series,
    options: &DownloadOptions,
    registry: &FormatRegistry,
    on_progress: Option<&ProgressFn>,
) -> Result<SeriesOutcome, DownloadError> {
    let mut outcome = SeriesOutcome::default();

    for book_id in &series.book_ids {
        let book = match source.download_book_from_id(book_id).await {
            Ok(book) => book,
            Err(error) if error.is_access_denied() => {
                warn!(book_id = %book_id, "access denied, skipping series item");
                outcome.denied.push(book_id.clone());
                continue;
            }
            Err(source_error) => {
                return Err(DownloadError::Series {
                    series: series.title.clone(),
                    source: source_error,
                });
            }
        };

        match download_book(&book, options, registry, on_progress).await {
            Ok(book_outcome) => outcome.outcomes.push(book_outcome),
            Err(error) if error.is_access_denied() => {
                warn!(book_id = %book_id, "access denied, skipping series item");
                outcome.denied.push(book_id.clone());
            }
            Err(error) => return Err(error),
        }
    }

    info!(
        written = outcome.written(),
        denied = outcome.denied.len(),
        "series expansion complete"
    );
    Ok(outcome)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::book::{BookContent, FileRef, LocalFile, Metadata};

    fn local_book(title: &str, bytes: &[u8]) -> Book {
        Book::new(
            Metadata::new(title),
            BookContent::SingleFile(FileRef::Local(LocalFile::new(bytes.to_vec(), "epub"))),
        )
    }

    #[tokio::test]
    async fn test_download_book_writes_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let options = DownloadOptions {
            output_template: format!("{}/{{title}}.{{ext}}", dir.path().display()),
        };
        let registry = FormatRegistry::with_default_formats();
        let book = local_book("My Book", b"contents");

        let outcome = download_book(&book, &options, &registry, None).await.unwrap();
        match outcome {
            Outcome::Written(path) => {
                assert_eq!(path, dir.path().join("My Book.epub"));
                assert_eq!(std::fs::read(path).unwrap(), b"contents");
            }
            Outcome::Skipped(path) => panic!("unexpected skip of {}", path.display()),
        }
    }

    #[tokio::test]
    async fn test_download_book_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let options = DownloadOptions {
            output_template: format!("{}/{{series}}/{{title}}.{{ext}}", dir.path().display()),
        };
        let registry = FormatRegistry::with_default_formats();
        let book = local_book("Nested", b"x");

        let outcome = download_book(&book, &options, &registry, None).await.unwrap();
        assert_eq!(
            outcome.path(),
            &dir.path().join("UNKNOWN").join("Nested.epub")
        );
        assert!(outcome.path().exists());
    }

    #[tokio::test]
    async fn test_unresolvable_content_fails_with_resolve_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = DownloadOptions {
            output_template: format!("{}/{{title}}.{{ext}}", dir.path().display()),
        };
        let registry = FormatRegistry::with_default_formats();
        let book = Book::new(
            Metadata::new("Odd"),
            BookContent::SingleFile(FileRef::Local(LocalFile::new(Vec::new(), "mobi"))),
        );

        let result = download_book(&book, &options, &registry, None).await;
        assert!(matches!(result, Err(DownloadError::Resolve { .. })));
    }
}
