//! Single-file passthrough formats.
//!
//! Some sources deliver a payload that is already a finished container (a
//! PDF, or an Adobe `.acsm` license ticket); these formats validate the
//! extension and hand the bytes straight to disk. Progress granularity is
//! whatever the fetcher reports while streaming.

use std::path::Path;

use async_trait::async_trait;

use super::{Assembler, OutputError, write_single_file};
use crate::book::{Book, BookContent};
use crate::fetch::{Fetcher, ProgressFn};

/// A format that accepts exactly one ready-made payload.
#[derive(Debug, Clone)]
pub struct Passthrough {
    extension: &'static str,
    fetcher: Fetcher,
}

impl Passthrough {
    /// Creates a passthrough format for the given extension.
    #[must_use]
    pub fn new(extension: &'static str) -> Self {
        Self {
            extension,
            fetcher: Fetcher::new(),
        }
    }

    /// PDF document format.
    #[must_use]
    pub fn pdf() -> Self {
        Self::new("pdf")
    }

    /// Adobe Content Server message format.
    #[must_use]
    pub fn acsm() -> Self {
        Self::new("acsm")
    }
}

#[async_trait]
impl Assembler for Passthrough {
    fn extension(&self) -> &'static str {
        self.extension
    }

    fn supports(&self, content: &BookContent) -> bool {
        matches!(content, BookContent::SingleFile(file) if file.extension() == self.extension)
    }

    async fn assemble(
        &self,
        book: &Book,
        destination: &Path,
        on_progress: Option<&ProgressFn>,
    ) -> Result<(), OutputError> {
        write_single_file(&self.fetcher, self.extension, book, destination, on_progress).await
    }
}
