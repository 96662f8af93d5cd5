//! Output formats: turning a book's content into one on-disk container file.
//!
//! # Architecture
//!
//! - [`Assembler`] - Async trait each output format implements
//! - [`FormatRegistry`] - Maps a requested extension and content variant to
//!   a compatible assembler
//! - [`Cbz`] - Paginated image archive (comics)
//! - [`Epub`] - E-book assembler: compiles HTML chapters, merges multi-part
//!   containers, and passes single `.epub` payloads through
//! - [`Passthrough`] - Single-file formats (`pdf`, `acsm`)
//!
//! Every assembler owns its own network client and is constructed fresh per
//! download; the orchestrator calls [`Assembler::close`] on every exit path.

mod cbz;
mod comicinfo;
mod epub;
mod epub_parts;
mod passthrough;

pub use cbz::Cbz;
pub use epub::Epub;
pub use passthrough::Passthrough;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::book::{Book, BookContent};
use crate::fetch::{FetchError, Fetcher, ProgressFn};

/// Fixed limit on simultaneous in-flight fetches inside one assembler
/// invocation, so batch downloads do not overwhelm the remote service or
/// local memory.
pub(crate) const MAX_CONCURRENT_FETCHES: usize = 10;

/// Errors that can occur while resolving a format or assembling a container.
#[derive(Debug, Error)]
pub enum OutputError {
    /// No assembler matches the requested extension and content variant.
    #[error("no output format for {variant} content{}", requested_suffix(.requested))]
    UnsupportedFormat {
        /// The extension the caller asked for, if any.
        requested: Option<String>,
        /// The content variant that had no match.
        variant: &'static str,
    },

    /// A file could not be fetched or decrypted.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// File system error while writing the container.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a zip-based container failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// The EPUB builder rejected the container structure.
    #[error("epub error: {message}")]
    Epub {
        /// Description from the builder.
        message: String,
    },

    /// A chapter's content selector could not be parsed.
    #[error("invalid content selector '{selector}'")]
    Selector {
        /// The selector that failed to parse.
        selector: String,
    },

    /// A concurrent fetch task failed outside its own error path
    /// (panicked or was cancelled).
    #[error("download task failed: {detail}")]
    TaskFailure {
        /// What happened to the task.
        detail: String,
    },
}

fn requested_suffix(requested: &Option<String>) -> String {
    requested
        .as_ref()
        .map(|extension| format!(" with extension '{extension}'"))
        .unwrap_or_default()
}

impl OutputError {
    /// Creates an unsupported-format error.
    #[must_use]
    pub fn unsupported(requested: Option<&str>, variant: &'static str) -> Self {
        Self::UnsupportedFormat {
            requested: requested.map(std::string::ToString::to_string),
            variant,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an EPUB builder error from any displayable failure.
    pub fn epub(message: impl ToString) -> Self {
        Self::Epub {
            message: message.to_string(),
        }
    }

    /// Creates an invalid-selector error.
    pub fn selector(selector: impl Into<String>) -> Self {
        Self::Selector {
            selector: selector.into(),
        }
    }

    /// Creates a task-failure error.
    pub fn task_failure(detail: impl Into<String>) -> Self {
        Self::TaskFailure {
            detail: detail.into(),
        }
    }
}

/// A component that turns a [`Book`]'s content into one on-disk container.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn Assembler>`. Rust 2024 native async traits are not object-safe,
/// so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// The file extension this assembler produces, without the leading dot.
    fn extension(&self) -> &'static str;

    /// Returns true if this assembler can handle the given content variant.
    fn supports(&self, content: &BookContent) -> bool;

    /// Downloads the book's content and writes the finished container to
    /// `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] when fetching, decrypting, or container
    /// writing fails, or when the content variant is not supported.
    async fn assemble(
        &self,
        book: &Book,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError>;

    /// Releases resources held for assembly. Called by the orchestrator on
    /// every exit path, success or failure.
    async fn close(&self) {
        // Network clients release their pools on drop; nothing else is held.
    }
}

/// Downloads a single-file payload after validating its extension against the
/// assembler's own.
///
/// Shared by every format that accepts `SingleFile` content.
pub(crate) async fn write_single_file(
    fetcher: &Fetcher,
    extension: &'static str,
    book: &Book,
    destination: &Path,
    on_progress: Option<&ProgressFn>,
) -> Result<(), OutputError> {
    match &book.content {
        BookContent::SingleFile(file) if file.extension() == extension => {
            fetcher.write(file, destination, on_progress).await?;
            Ok(())
        }
        other => Err(OutputError::unsupported(Some(extension), other.variant_name())),
    }
}

/// Media type for a file extension or archive entry name, for container
/// manifests and cover images.
pub(crate) fn media_type_for(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match extension.as_str() {
        "xhtml" | "html" | "htm" => "application/xhtml+xml",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "js" => "text/javascript",
        "ncx" => "application/x-dtbncx+xml",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

type AssemblerFactory = fn() -> Box<dyn Assembler>;

struct RegisteredFormat {
    extension: &'static str,
    build: AssemblerFactory,
}

/// Maps a requested file extension and a book's content variant to a
/// compatible assembler.
///
/// Assemblers are built fresh per resolution so each download owns its own
/// network client.
pub struct FormatRegistry {
    formats: Vec<RegisteredFormat>,
}

impl FormatRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    /// Creates a registry with all built-in formats: `cbz`, `epub`, `pdf`,
    /// `acsm`.
    #[must_use]
    pub fn with_default_formats() -> Self {
        let mut registry = Self::new();
        registry.register("cbz", || Box::new(Cbz::new()));
        registry.register("epub", || Box::new(Epub::new()));
        registry.register("pdf", || Box::new(Passthrough::pdf()));
        registry.register("acsm", || Box::new(Passthrough::acsm()));
        registry
    }

    /// Registers an output format under its extension.
    pub fn register(&mut self, extension: &'static str, build: AssemblerFactory) {
        debug!(extension, "registering output format");
        self.formats.push(RegisteredFormat { extension, build });
    }

    /// Returns true if a format with this extension is registered.
    #[must_use]
    pub fn is_registered(&self, extension: &str) -> bool {
        self.formats.iter().any(|f| f.extension == extension)
    }

    /// Picks an assembler for the book.
    ///
    /// When the caller supplied an explicit extension and a registered
    /// assembler both matches it and supports the book's content variant,
    /// that assembler wins. Otherwise the default for the content variant is
    /// chosen: a `SingleFile` maps to the format matching its own extension,
    /// an `ImageList` to the image archive, and `HtmlChapters` or
    /// `ContainerParts` to the e-book assembler.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::UnsupportedFormat`] when neither path yields a
    /// compatible assembler.
    pub fn resolve(
        &self,
        book: &Book,
        requested_extension: Option<&str>,
    ) -> Result<Box<dyn Assembler>, OutputError> {
        if let Some(extension) = requested_extension
            && let Some(format) = self.formats.iter().find(|f| f.extension == extension)
        {
            let assembler = (format.build)();
            if assembler.supports(&book.content) {
                debug!(extension, "resolved explicitly requested format");
                return Ok(assembler);
            }
            debug!(
                extension,
                variant = book.content.variant_name(),
                "requested format does not support content variant, falling back to default"
            );
        }

        let default_extension = match &book.content {
            BookContent::SingleFile(file) => file.extension(),
            BookContent::ImageList(_) => "cbz",
            BookContent::HtmlChapters { .. } | BookContent::ContainerParts { .. } => "epub",
        };

        let format = self
            .formats
            .iter()
            .find(|f| f.extension == default_extension)
            .ok_or_else(|| {
                OutputError::unsupported(requested_extension, book.content.variant_name())
            })?;
        let assembler = (format.build)();
        if assembler.supports(&book.content) {
            Ok(assembler)
        } else {
            Err(OutputError::unsupported(
                requested_extension,
                book.content.variant_name(),
            ))
        }
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_default_formats()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extensions: Vec<&str> = self.formats.iter().map(|e| e.extension).collect();
        f.debug_struct("FormatRegistry")
            .field("formats", &extensions)
            .finish()
    }
}
