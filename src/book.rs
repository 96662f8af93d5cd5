//! Core data model for books, their payloads, and series.
//!
//! A [`Book`] pairs descriptive [`Metadata`] with a [`BookContent`] payload
//! describing how the actual bytes are delivered. Content shapes are a closed
//! tagged union so that every consumer matches exhaustively; a payload is
//! never reinterpreted as another variant after creation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;

use crate::encryption::EncryptionScheme;

/// Descriptive metadata about a book.
///
/// Only the title is required. Everything else feeds output-path templating
/// and embedded container metadata when present.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Book title.
    pub title: String,
    /// Series the book belongs to, if any.
    pub series: Option<String>,
    /// Position within the series.
    pub series_index: Option<u32>,
    /// Authors in source order; may be empty.
    pub authors: Vec<String>,
    /// Language code (e.g., `en`).
    pub language: Option<String>,
    /// Publisher name.
    pub publisher: Option<String>,
    /// External identifier (ISBN or source-specific id).
    pub identifier: Option<String>,
    /// Long-form description or summary.
    pub description: Option<String>,
    /// Original release date.
    pub release_date: Option<time::Date>,
}

impl Metadata {
    /// Creates metadata with only a title set.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Instructions for downloading one remote resource.
///
/// Never mutated after creation; the attached [`EncryptionScheme`] is applied
/// exactly once, after the complete ciphertext has been accumulated.
#[derive(Clone)]
pub struct RemoteFile {
    /// Resource URL.
    pub url: String,
    /// File extension without the leading dot (e.g., `epub`, `jpg`).
    pub extension: String,
    /// Decryption instructions, if the payload is encrypted.
    pub scheme: Option<EncryptionScheme>,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    /// Cookies to attach to the request, if the source requires them.
    pub cookies: Option<Arc<Jar>>,
}

impl RemoteFile {
    /// Creates a plain remote file with no encryption, headers, or cookies.
    #[must_use]
    pub fn new(url: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extension: extension.into(),
            scheme: None,
            headers: HashMap::new(),
            cookies: None,
        }
    }
}

// Manual Debug: the cookie jar has no useful Debug output and header values
// may carry credentials.
impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("url", &self.url)
            .field("extension", &self.extension)
            .field("scheme", &self.scheme)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("cookies", &self.cookies.is_some())
            .finish()
    }
}

/// An already-retrieved payload awaiting the same decryption treatment as a
/// [`RemoteFile`] (e.g., obtained through a non-HTTP loan flow).
#[derive(Clone)]
pub struct LocalFile {
    /// Raw (possibly encrypted) payload bytes.
    pub content: Vec<u8>,
    /// File extension without the leading dot.
    pub extension: String,
    /// Decryption instructions, if the payload is encrypted.
    pub scheme: Option<EncryptionScheme>,
}

impl LocalFile {
    /// Creates an unencrypted local payload.
    #[must_use]
    pub fn new(content: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            content,
            extension: extension.into(),
            scheme: None,
        }
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile")
            .field("content_len", &self.content.len())
            .field("extension", &self.extension)
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// A fetchable resource: either remote or already in memory.
#[derive(Debug, Clone)]
pub enum FileRef {
    /// Resource that must be downloaded.
    Remote(RemoteFile),
    /// Resource already retrieved by the source.
    Local(LocalFile),
}

impl FileRef {
    /// Returns the file extension without the leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        match self {
            Self::Remote(file) => &file.extension,
            Self::Local(file) => &file.extension,
        }
    }
}

/// One chapter of an HTML-delivered book.
#[derive(Debug, Clone)]
pub struct HtmlChapter {
    /// Chapter display title.
    pub title: String,
    /// Where to fetch the chapter document.
    pub file: RemoteFile,
    /// CSS-style selector for the element holding the chapter body.
    pub content_selector: String,
}

/// One entry of a multi-part container's table of contents.
///
/// The href is `path#fragment`; matching against archive entries uses only
/// the path component. Entries are kept as an ordered sequence because their
/// iteration order defines the generated table-of-contents order.
#[derive(Debug, Clone)]
pub struct TocEntry {
    /// Target document, optionally with a fragment (`chapter1.xhtml#s2`).
    pub href: String,
    /// Display title.
    pub title: String,
}

impl TocEntry {
    /// Creates a table-of-contents entry.
    #[must_use]
    pub fn new(href: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: title.into(),
        }
    }

    /// Returns the path component of the href (everything before `#`).
    #[must_use]
    pub fn path(&self) -> &str {
        self.href.split('#').next().unwrap_or(&self.href)
    }
}

/// The shape of a book's payload.
#[derive(Debug, Clone)]
pub enum BookContent {
    /// One opaque payload already in the target container format.
    SingleFile(FileRef),
    /// Ordered pages of raster content (comics).
    ImageList(Vec<RemoteFile>),
    /// Per-chapter HTML fragments to compile into an e-book.
    HtmlChapters {
        /// Chapters in reading order.
        chapters: Vec<HtmlChapter>,
        /// Optional cover image.
        cover: Option<RemoteFile>,
    },
    /// A book shipped as several partial containers that must be merged.
    ContainerParts {
        /// Partial containers in delivery order.
        parts: Vec<RemoteFile>,
        /// Table-of-contents entries in display order.
        toc_entries: Vec<TocEntry>,
    },
}

impl BookContent {
    /// Returns a short name for the content variant, for error messages.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::SingleFile(_) => "single file",
            Self::ImageList(_) => "image list",
            Self::HtmlChapters { .. } => "html chapters",
            Self::ContainerParts { .. } => "container parts",
        }
    }
}

/// A downloadable book: metadata plus payload description.
///
/// Created by a source per request and consumed exactly once.
#[derive(Debug, Clone)]
pub struct Book {
    /// Descriptive metadata.
    pub metadata: Metadata,
    /// Payload description.
    pub content: BookContent,
    /// Whether an existing output file may be replaced.
    pub overwrite: bool,
}

impl Book {
    /// Creates a book that will not overwrite existing output.
    #[must_use]
    pub fn new(metadata: Metadata, content: BookContent) -> Self {
        Self {
            metadata,
            content,
            overwrite: false,
        }
    }
}

/// An ordered collection of books, resolved lazily through the owning source.
///
/// Ids are opaque to the pipeline; only the source that produced the series
/// can turn them back into books.
#[derive(Debug, Clone)]
pub struct Series {
    /// Series display title.
    pub title: String,
    /// Opaque book ids in series order.
    pub book_ids: Vec<String>,
}

/// What a source produces for a URL: one book or a whole series.
#[derive(Debug, Clone)]
pub enum SourceOutput {
    /// A single downloadable book.
    Book(Box<Book>),
    /// A series of book ids to resolve one at a time.
    Series(Series),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_new_sets_only_title() {
        let metadata = Metadata::new("The Test Book");
        assert_eq!(metadata.title, "The Test Book");
        assert!(metadata.series.is_none());
        assert!(metadata.authors.is_empty());
        assert!(metadata.release_date.is_none());
    }

    #[test]
    fn test_file_ref_extension_for_both_variants() {
        let remote = FileRef::Remote(RemoteFile::new("https://example.com/b.epub", "epub"));
        assert_eq!(remote.extension(), "epub");

        let local = FileRef::Local(LocalFile::new(vec![1, 2, 3], "pdf"));
        assert_eq!(local.extension(), "pdf");
    }

    #[test]
    fn test_toc_entry_path_strips_fragment() {
        let entry = TocEntry::new("chapter1.xhtml#section-2", "Chapter 1");
        assert_eq!(entry.path(), "chapter1.xhtml");

        let plain = TocEntry::new("chapter2.xhtml", "Chapter 2");
        assert_eq!(plain.path(), "chapter2.xhtml");
    }

    #[test]
    fn test_remote_file_debug_redacts_header_values() {
        let mut file = RemoteFile::new("https://example.com/b.epub", "epub");
        file.headers
            .insert("Authorization".to_string(), "Bearer secret-token".to_string());
        let output = format!("{file:?}");
        assert!(output.contains("Authorization"));
        assert!(!output.contains("secret-token"));
    }

    #[test]
    fn test_book_new_defaults_to_no_overwrite() {
        let book = Book::new(
            Metadata::new("T"),
            BookContent::SingleFile(FileRef::Local(LocalFile::new(vec![], "epub"))),
        );
        assert!(!book.overwrite);
    }

    #[test]
    fn test_content_variant_names() {
        let content = BookContent::ImageList(Vec::new());
        assert_eq!(content.variant_name(), "image list");
        let content = BookContent::ContainerParts {
            parts: Vec::new(),
            toc_entries: Vec::new(),
        };
        assert_eq!(content.variant_name(), "container parts");
    }
}
