//! Comic book zip assembler.
//!
//! Downloads every page of an [`BookContent::ImageList`] with bounded
//! concurrency and writes them into a zip archive under zero-padded names,
//! so that lexicographic entry order always equals page order no matter in
//! which order the fetches complete. A ComicInfo metadata entry is appended
//! after the last page.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};
use zip::ZipWriter;
use zip::write::FileOptions;

use super::comicinfo::comic_info_xml;
use super::{Assembler, MAX_CONCURRENT_FETCHES, OutputError, write_single_file};
use crate::book::{Book, BookContent, RemoteFile};
use crate::fetch::{Fetcher, ProgressFn};

/// Comic book zip file.
#[derive(Debug, Clone, Default)]
pub struct Cbz {
    fetcher: Fetcher,
}

impl Cbz {
    /// Creates the assembler with its own network client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fetcher: Fetcher::new(),
        }
    }

    #[instrument(level = "debug", skip_all, fields(title = %book.metadata.title, pages = images.len()))]
    async fn assemble_images(
        &self,
        book: &Book,
        images: &[RemoteFile],
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError> {
        let image_count = images.len();
        let pages = self.fetch_all(images, on_progress).await?;

        let file = std::fs::File::create(destination)
            .map_err(|e| OutputError::io(destination, e))?;
        let mut writer = ZipWriter::new(file);
        let options = FileOptions::default();
        let width = pad_width(image_count);

        for (index, (image, bytes)) in images.iter().zip(pages).enumerate() {
            let name = format!("page-{index:0width$}.{}", image.extension);
            writer.start_file(name, options)?;
            writer
                .write_all(&bytes)
                .map_err(|e| OutputError::io(destination, e))?;
        }

        writer.start_file("ComicInfo.xml", options)?;
        writer
            .write_all(comic_info_xml(&book.metadata).as_bytes())
            .map_err(|e| OutputError::io(destination, e))?;
        writer.finish()?;
        debug!(path = %destination.display(), "archive finished");
        Ok(())
    }

    /// Downloads all pages with bounded concurrency, returning them in page
    /// order. Progress fires as each page completes, not in index order —
    /// only the aggregate has to reach 1.0.
    async fn fetch_all(
        &self,
        images: &[RemoteFile],
        on_progress: Option<&ProgressFn>,
    ) -> Result<Vec<Vec<u8>>, OutputError> {
        let image_count = images.len();
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_FETCHES));
        let mut tasks: JoinSet<Result<(usize, Vec<u8>), OutputError>> = JoinSet::new();

        for (index, image) in images.iter().cloned().enumerate() {
            let fetcher = self.fetcher.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| OutputError::task_failure("fetch pool closed"))?;
                let bytes = fetcher.fetch(&image, None).await?;
                Ok((index, bytes))
            });
        }

        // A failing page aborts the batch, but in-flight fetches are drained
        // rather than cancelled; the transport has no native cancel.
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; image_count];
        let mut first_error: Option<OutputError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, bytes))) => {
                    slots[index] = Some(bytes);
                    if let Some(callback) = on_progress {
                        #[allow(clippy::cast_precision_loss)]
                        callback(1.0 / image_count as f64);
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

        let mut pages = Vec::with_capacity(image_count);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(bytes) => pages.push(bytes),
                None => {
                    return Err(OutputError::task_failure(format!(
                        "page {index} never completed"
                    )));
                }
            }
        }
        Ok(pages)
    }
}

#[async_trait]
impl Assembler for Cbz {
    fn extension(&self) -> &'static str {
        "cbz"
    }

    fn supports(&self, content: &BookContent) -> bool {
        match content {
            BookContent::ImageList(_) => true,
            BookContent::SingleFile(file) => file.extension() == self.extension(),
            _ => false,
        }
    }

    async fn assemble(
        &self,
        book: &Book,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError> {
        match &book.content {
            BookContent::ImageList(images) => {
                self.assemble_images(book, images, destination, on_progress)
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

/// Digits needed to zero-pad every zero-based page index of an archive with
/// `count` pages, so entry names sort numerically.
fn pad_width(count: usize) -> usize {
    let mut width = 1;
    let mut limit = 10usize;
    while limit < count {
        width += 1;
        limit = limit.saturating_mul(10);
    }
    width
}
