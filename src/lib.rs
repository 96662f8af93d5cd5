//! Bindery Core Library
//!
//! This library acquires remotely hosted, often DRM-wrapped, book content
//! and assembles it into a single local file in a chosen container format
//! (EPUB, CBZ, PDF, ACSM).
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`book`] - Data model: metadata, file references, content shapes
//! - [`encryption`] - Stateless decryption of named symmetric schemes
//! - [`fetch`] - Streaming downloader with progress reporting
//! - [`output`] - Format registry and container assemblers
//! - [`orchestrator`] - Per-book download flow and series expansion
//! - [`source`] - The contract per-website adapters implement
//! - [`template`] - Output-path templating and sanitization
//! - [`config`] - TOML file configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod book;
pub mod config;
pub mod encryption;
pub mod fetch;
pub mod orchestrator;
pub mod output;
pub mod source;
pub mod template;

// Re-export commonly used types
pub use book::{
    Book, BookContent, FileRef, HtmlChapter, LocalFile, Metadata, RemoteFile, Series,
    SourceOutput, TocEntry,
};
pub use config::{ConfigError, FileConfig, load_config};
pub use encryption::{Decrypter, DecryptionError, EncryptionScheme, SizePrefixedAesCbc, decrypt};
pub use fetch::{FetchError, Fetcher, ProgressFn};
pub use orchestrator::{
    DownloadError, DownloadOptions, Outcome, SeriesOutcome, download_book, download_series,
};
pub use output::{Assembler, Cbz, Epub, FormatRegistry, OutputError, Passthrough};
pub use source::{AuthMethod, Source, SourceCache, SourceError};
