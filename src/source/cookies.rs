//! Netscape cookie file parser and reqwest jar loader.
//!
//! Parses the Netscape HTTP cookie file format (7 TAB-separated fields per
//! line) and loads the cookies into a `reqwest::cookie::Jar` that sources
//! attach to their requests.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use reqwest::cookie::Jar;
use tracing::{debug, warn};

/// A single parsed cookie.
///
/// The value is redacted in Debug output so it never leaks into logs.
#[derive(Clone)]
pub struct CookieRecord {
    /// Domain the cookie belongs to (e.g., `.example.com`).
    pub domain: String,
    /// Whether subdomains match.
    pub include_subdomains: bool,
    /// URL path scope.
    pub path: String,
    /// Whether the cookie is HTTPS-only.
    pub secure: bool,
    /// Unix expiry timestamp (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl CookieRecord {
    /// Returns the cookie value. Sensitive — avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors that can occur while loading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieFileError {
    /// The cookie file could not be read.
    #[error("cannot read cookie file '{path}': {source}")]
    Io {
        /// Path that failed to open.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A non-empty file yielded zero valid cookies.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Loads a Netscape cookie file into a jar ready for a `reqwest` client.
///
/// Malformed lines are logged and skipped; the file only fails as a whole
/// when it contains no valid cookie at all.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] when the file cannot be read and
/// [`CookieFileError::NoCookiesFound`] when nothing parsed.
pub fn load_cookie_file(path: &Path) -> Result<Arc<Jar>, CookieFileError> {
    let file = std::fs::File::open(path).map_err(|source| CookieFileError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let records = parse_netscape_cookies(std::io::BufReader::new(file))?;
    debug!(count = records.len(), path = %path.display(), "loaded cookies");
    Ok(build_jar(&records))
}

/// Parses Netscape-format cookie lines from a buffered reader.
///
/// Each non-comment, non-blank line must contain exactly 7 TAB-separated
/// fields: `domain`, `subdomains`, `path`, `secure`, `expires`, `name`,
/// `value`. Lines starting with `#` are comments, except the `#HttpOnly_`
/// prefix some exporters write, which marks a regular cookie line.
///
/// # Errors
///
/// Returns [`CookieFileError::NoCookiesFound`] when a non-empty file yields
/// zero valid cookies. Malformed lines are skipped with a warning.
pub fn parse_netscape_cookies(
    reader: impl BufRead,
) -> Result<Vec<CookieRecord>, CookieFileError> {
    let mut records = Vec::new();
    let mut malformed = 0usize;
    let mut saw_content = false;

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(source) => {
                return Err(CookieFileError::Io {
                    path: "<reader>".to_string(),
                    source,
                });
            }
        };
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        // curl writes HttpOnly cookies with a comment-looking prefix.
        let line = if let Some(rest) = line.strip_prefix("#HttpOnly_") {
            rest
        } else if line.starts_with('#') {
            continue;
        } else {
            line
        };
        saw_content = true;

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 7 {
            warn!(
                line = line_number,
                fields = fields.len(),
                "skipping malformed cookie line"
            );
            malformed += 1;
            continue;
        }

        records.push(CookieRecord {
            domain: fields[0].to_string(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_string(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            expires: fields[4].parse().unwrap_or(0),
            name: fields[5].to_string(),
            value: fields[6].to_string(),
        });
    }

    if records.is_empty() && saw_content {
        return Err(CookieFileError::NoCookiesFound {
            malformed_count: malformed,
        });
    }
    Ok(records)
}

/// Builds a reqwest jar from parsed records.
#[must_use]
pub fn build_jar(records: &[CookieRecord]) -> Arc<Jar> {
    let jar = Jar::default();
    for record in records {
        let scheme = if record.secure { "https" } else { "http" };
        let host = record.domain.trim_start_matches('.');
        let url_text = format!("{scheme}://{host}/");
        let Ok(url) = url::Url::parse(&url_text) else {
            warn!(domain = %record.domain, "skipping cookie with unusable domain");
            continue;
        };
        let cookie = format!(
            "{}={}; Domain={}; Path={}",
            record.name,
            record.value(),
            record.domain,
            record.path
        );
        jar.add_cookie_str(&cookie, &url);
    }
    Arc::new(jar)
}
