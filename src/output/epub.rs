//! E-book assembler.
//!
//! Handles the three content shapes that end in an `.epub` container:
//! ready-made single files are passed through, per-chapter HTML fragments
//! are compiled into a fresh container, and multi-part deliveries are merged
//! by the [`super::epub_parts`] module.
//!
//! Chapters download concurrently, but the finished container always lists
//! them in source order: results are buffered by index and appended
//! sequentially before the spine and navigation structures are finalized.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use epub_builder::{EpubBuilder, EpubContent, EpubVersion, ReferenceType, ZipLibrary};
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::epub_parts::merge_parts;
use super::{Assembler, MAX_CONCURRENT_FETCHES, OutputError, media_type_for, write_single_file};
use crate::book::{Book, BookContent, HtmlChapter, RemoteFile};
use crate::fetch::{Fetcher, ProgressFn};

/// Index of the cover in the shared fetch pool; chapters use their own index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchSlot {
    Cover,
    Chapter(usize),
}

/// EPUB e-book container.
#[derive(Debug, Clone, Default)]
pub struct Epub {
    fetcher: Fetcher,
}

impl Epub {
    /// Creates the assembler with its own network client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fetcher: Fetcher::new(),
        }
    }

    #[instrument(level = "debug", skip_all, fields(title = %book.metadata.title, chapters = chapters.len()))]
    async fn compile_chapters(
        &self,
        book: &Book,
        chapters: &[HtmlChapter],
        cover: Option<&RemoteFile>,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError> {
        // Chapters plus the cover, when there is one, are the progress units.
        let unit_count = chapters.len() + usize::from(cover.is_some());
        let (cover_bytes, documents) =
            self.fetch_units(chapters, cover, unit_count, on_progress).await?;

        let mut builder = EpubBuilder::new(ZipLibrary::new().map_err(OutputError::epub)?)
            .map_err(OutputError::epub)?;
        builder.epub_version(EpubVersion::V30);
        apply_metadata(&mut builder, book)?;

        if let (Some(bytes), Some(cover_file)) = (cover_bytes, cover) {
            let name = format!("cover.{}", cover_file.extension);
            let media_type = media_type_for(&name);
            builder
                .add_cover_image(name, Cursor::new(bytes), media_type)
                .map_err(OutputError::epub)?;
        }

        // Buffered per-index results are appended strictly in source order.
        for (index, (chapter, raw)) in chapters.iter().zip(documents).enumerate() {
            let text = String::from_utf8_lossy(&raw);
            let fragment = extract_fragment(&text, &chapter.content_selector)?;
            let body = match fragment {
                Some(body) => body,
                None => {
                    warn!(
                        chapter = %chapter.title,
                        selector = %chapter.content_selector,
                        "content selector matched nothing; embedding empty chapter"
                    );
                    String::new()
                }
            };
            let document = chapter_document(&chapter.title, &body);
            builder
                .add_content(
                    EpubContent::new(
                        format!("chapter_{index:04}.xhtml"),
                        Cursor::new(document.into_bytes()),
                    )
                    .title(chapter.title.as_str())
                    .reftype(ReferenceType::Text),
                )
                .map_err(OutputError::epub)?;
        }

        let mut buffer = Vec::new();
        builder.generate(&mut buffer).map_err(OutputError::epub)?;
        std::fs::write(destination, buffer).map_err(|e| OutputError::io(destination, e))?;
        debug!(path = %destination.display(), "epub finished");
        Ok(())
    }

    /// Downloads the cover and every chapter with bounded concurrency.
    /// Returns the cover bytes (when requested) and the raw chapter
    /// documents in chapter order.
    async fn fetch_units(
        &self,
        chapters: &[HtmlChapter],
        cover: Option<&RemoteFile>,
        unit_count: usize,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(Option<Vec<u8>>, Vec<Vec<u8>>), OutputError> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut tasks: JoinSet<Result<(FetchSlot, Vec<u8>), OutputError>> = JoinSet::new();

        let mut spawn = |slot: FetchSlot, file: RemoteFile| {
            let fetcher = self.fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| OutputError::task_failure("fetch pool closed"))?;
                let bytes = fetcher.fetch(&file, None).await?;
                Ok((slot, bytes))
            });
        };

        if let Some(cover_file) = cover {
            spawn(FetchSlot::Cover, cover_file.clone());
        }
        for (index, chapter) in chapters.iter().enumerate() {
            spawn(FetchSlot::Chapter(index), chapter.file.clone());
        }

        let mut cover_bytes = None;
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; chapters.len()];
        let mut first_error: Option<OutputError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((slot, bytes))) => {
                    match slot {
                        FetchSlot::Cover => cover_bytes = Some(bytes),
                        FetchSlot::Chapter(index) => slots[index] = Some(bytes),
                    }
                    if let Some(callback) = on_progress {
                        #[allow(clippy::cast_precision_loss)]
                        callback(1.0 / unit_count as f64);
                    }
                }
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                }
                Err(join_error) => {
                    first_error.get_or_insert(OutputError::task_failure(join_error.to_string()));
                }
            }
        }
        if let Some(error) = first_error {
            return Err(error);
        }

        let mut documents = Vec::with_capacity(chapters.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(bytes) => documents.push(bytes),
                None => {
                    return Err(OutputError::task_failure(format!(
                        "chapter {index} never completed"
                    )));
                }
            }
        }
        Ok((cover_bytes, documents))
    }
}

#[async_trait]
impl Assembler for Epub {
    fn extension(&self) -> &'static str {
        "epub"
    }

    fn supports(&self, content: &BookContent) -> bool {
        match content {
            BookContent::HtmlChapters { .. } | BookContent::ContainerParts { .. } => true,
            BookContent::SingleFile(file) => file.extension() == self.extension(),
            BookContent::ImageList(_) => false,
        }
    }

    async fn assemble(
        &self,
        book: &Book,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError> {
        match &book.content {
            BookContent::HtmlChapters { chapters, cover } => {
                self.compile_chapters(book, chapters, cover.as_ref(), destination, on_progress)
                    .await
            }
            BookContent::ContainerParts { parts, toc_entries } => {
                merge_parts(&self.fetcher, book, parts, toc_entries, destination, on_progress)
                    .await
            }
            BookContent::SingleFile(_) => {
                write_single_file(&self.fetcher, self.extension(), book, destination, on_progress)
                    .await
            }
            other => Err(OutputError::unsupported(
                Some(self.extension()),
                other.variant_name(),
            )),
        }
    }
}

fn apply_metadata(
    builder: &mut EpubBuilder<ZipLibrary>,
    book: &Book,
) -> Result<(), OutputError> {
    let metadata = &book.metadata;
    builder
        .metadata("title", metadata.title.as_str())
        .map_err(OutputError::epub)?;
    for author in &metadata.authors {
        builder
            .metadata("author", author.as_str())
            .map_err(OutputError::epub)?;
    }
    if let Some(language) = &metadata.language {
        builder
            .metadata("lang", language.as_str())
            .map_err(OutputError::epub)?;
    }
    if let Some(description) = &metadata.description {
        builder
            .metadata("description", description.as_str())
            .map_err(OutputError::epub)?;
    }
    Ok(())
}

/// Extracts the subtree matching the chapter's selector as serialized HTML.
///
/// Returns `Ok(None)` when the document has no matching element.
fn extract_fragment(document: &str, selector: &str) -> Result<Option<String>, OutputError> {
    let parsed = Selector::parse(selector).map_err(|_| OutputError::selector(selector))?;
    let html = Html::parse_document(document);
    Ok(html.select(&parsed).next().map(|element| element.html()))
}

/// Wraps an extracted fragment in a minimal XHTML chapter document.
fn chapter_document(title: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head><title>{title}</title></head>\n\
         <body>{body}</body>\n\
         </html>",
        title = escape_text(title),
        body = body
    )
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
