//! Source adapters: the boundary to per-website services.
//!
//! A [`Source`] knows how to log in to one service and turn its URLs into
//! [`Book`]/[`Series`] values; the pipeline never inspects a source's
//! internals. Capabilities are declared explicitly via
//! [`Source::auth_methods`], and the `requires_authentication` /
//! `supports_login` / `supports_cookies` booleans are derived from that set —
//! callers gate on the declared capabilities before invoking an optional
//! operation.
//!
//! Instantiated adapters live in a [`SourceCache`] scoped to one run and
//! passed explicitly to whoever needs it; there is no process-global cache.

pub mod cookies;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::book::{Book, SourceOutput};
use crate::fetch::FetchError;

/// An authentication mechanism a source declares support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Username/password login, possibly with extra parameters.
    Login,
    /// A user-supplied cookie file.
    Cookies,
}

/// Errors produced by source adapters.
#[derive(Debug, Error)]
pub enum SourceError {
    /// No registered source matches the URL.
    #[error("no source matches {url}")]
    NoSourceFound {
        /// The unmatched URL.
        url: String,
    },

    /// The operation is not part of this source's declared capabilities.
    #[error("source '{source_name}' does not support {operation}")]
    Unsupported {
        /// Source display name.
        source_name: String,
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The source requires authentication that has not happened yet.
    #[error("not authenticated with '{source_name}'")]
    NotAuthenticated {
        /// Source display name.
        source_name: String,
    },

    /// A credential the source needs was not provided.
    #[error("missing credential '{name}' for '{source_name}'")]
    MissingCredential {
        /// Source display name.
        source_name: String,
        /// Name of the missing credential.
        name: &'static str,
    },

    /// The remote service refused this specific item.
    #[error("access denied for {item}")]
    AccessDenied {
        /// The refused URL or book id.
        item: String,
    },

    /// The source could not find data it expected in a response.
    #[error("required data not found: {detail}")]
    DataNotFound {
        /// What was missing.
        detail: String,
    },

    /// The URL does not belong to this source or is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// An underlying fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Reading or parsing a cookie file failed.
    #[error(transparent)]
    Cookies(#[from] cookies::CookieFileError),
}

impl SourceError {
    /// Creates a no-source-found error.
    #[must_use]
    pub fn no_source_found(url: impl Into<String>) -> Self {
        Self::NoSourceFound { url: url.into() }
    }

    /// Creates an unsupported-operation error.
    #[must_use]
    pub fn unsupported(source_name: impl Into<String>, operation: &'static str) -> Self {
        Self::Unsupported {
            source_name: source_name.into(),
            operation,
        }
    }

    /// Creates a not-authenticated error.
    #[must_use]
    pub fn not_authenticated(source_name: impl Into<String>) -> Self {
        Self::NotAuthenticated {
            source_name: source_name.into(),
        }
    }

    /// Creates a missing-credential error.
    #[must_use]
    pub fn missing_credential(source_name: impl Into<String>, name: &'static str) -> Self {
        Self::MissingCredential {
            source_name: source_name.into(),
            name,
        }
    }

    /// Creates an access-denied error.
    #[must_use]
    pub fn access_denied(item: impl Into<String>) -> Self {
        Self::AccessDenied { item: item.into() }
    }

    /// Creates a data-not-found error.
    #[must_use]
    pub fn data_not_found(detail: impl Into<String>) -> Self {
        Self::DataNotFound {
            detail: detail.into(),
        }
    }

    /// Creates an invalid-URL error.
    #[must_use]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Returns true if the remote service refused a specific item, the one
    /// failure kind that series expansion skips instead of aborting.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        match self {
            Self::AccessDenied { .. } => true,
            Self::Fetch(fetch) => fetch.is_access_denied(),
            _ => false,
        }
    }
}

/// A per-website adapter producing books and series for the pipeline.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn Source>`. Rust 2024 native async traits are not object-safe.
#[async_trait]
pub trait Source: Send + Sync {
    /// Display name of the source (e.g., "Example Books").
    fn name(&self) -> &'static str;

    /// URL patterns this source claims.
    fn url_patterns(&self) -> &[Regex];

    /// Authentication mechanisms this source supports. Empty means the
    /// source is open.
    fn auth_methods(&self) -> &[AuthMethod] {
        &[]
    }

    /// Whether any authentication is needed before downloading.
    fn requires_authentication(&self) -> bool {
        !self.auth_methods().is_empty()
    }

    /// Whether username/password login is supported.
    fn supports_login(&self) -> bool {
        self.auth_methods().contains(&AuthMethod::Login)
    }

    /// Whether cookie-file authentication is supported.
    fn supports_cookies(&self) -> bool {
        self.auth_methods().contains(&AuthMethod::Cookies)
    }

    /// Returns true if this source claims the URL.
    fn matches(&self, url: &str) -> bool {
        self.url_patterns().iter().any(|pattern| pattern.is_match(url))
    }

    /// Logs in with username and password. `extra` carries additional
    /// source-specific parameters (e.g., a library name).
    ///
    /// Only called when [`supports_login`](Self::supports_login) is true.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] by default; sources declaring
    /// [`AuthMethod::Login`] override this.
    async fn login(
        &mut self,
        username: &str,
        password: &str,
        extra: &HashMap<String, String>,
    ) -> Result<(), SourceError> {
        let _ = (username, password, extra);
        Err(SourceError::unsupported(self.name(), "login"))
    }

    /// Loads cookies from a Netscape-format cookie file.
    ///
    /// Only called when [`supports_cookies`](Self::supports_cookies) is true.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] by default; sources declaring
    /// [`AuthMethod::Cookies`] override this.
    fn load_cookies(&mut self, cookie_file: &Path) -> Result<(), SourceError> {
        let _ = cookie_file;
        Err(SourceError::unsupported(self.name(), "cookie authentication"))
    }

    /// Resolves a URL into a book or a series of book ids.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the URL is invalid for this source or
    /// the service request fails.
    async fn download(&self, url: &str) -> Result<SourceOutput, SourceError>;

    /// Resolves one opaque series id into a book.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the id cannot be resolved;
    /// [`SourceError::AccessDenied`] marks items the service refused.
    async fn download_book_from_id(&self, book_id: &str) -> Result<Book, SourceError>;
}

/// Instantiated source adapters for one run.
///
/// Keyed lookups hand out mutable references so authentication state stays
/// inside the adapter; the cache itself is created by the caller and dies
/// with the run.
#[derive(Default)]
pub struct SourceCache {
    sources: Vec<Box<dyn Source>>,
}

impl SourceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an instantiated adapter to the cache.
    pub fn register(&mut self, source: Box<dyn Source>) {
        debug!(source = source.name(), "registering source");
        self.sources.push(source);
    }

    /// Returns the number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Finds the source claiming the URL.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoSourceFound`] when nothing matches.
    pub fn find_by_url(&mut self, url: &str) -> Result<&mut Box<dyn Source>, SourceError> {
        let index = self
            .sources
            .iter()
            .position(|source| source.matches(url))
            .ok_or_else(|| SourceError::no_source_found(url))?;
        Ok(&mut self.sources[index])
    }

    /// Finds a source by display name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoSourceFound`] when no source carries the
    /// name.
    pub fn find_by_name(&mut self, name: &str) -> Result<&mut Box<dyn Source>, SourceError> {
        let index = self
            .sources
            .iter()
            .position(|source| source.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| SourceError::no_source_found(name))?;
        Ok(&mut self.sources[index])
    }
}

impl fmt::Debug for SourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("SourceCache")
            .field("sources", &names)
            .finish()
    }
}
