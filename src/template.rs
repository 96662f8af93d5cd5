//! Output-path templating and filesystem sanitization.
//!
//! A template is a user-supplied string with `{field}` placeholders for the
//! metadata attributes plus `{ext}`. Substituted values are sanitized for
//! filesystem safety before they enter the path; template literals are left
//! alone so directory structure stays under the user's control. Missing or
//! unrecognized fields render as a literal `UNKNOWN`.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::book::Metadata;

/// Placeholder rendered for absent metadata fields.
pub const UNKNOWN_FIELD: &str = "UNKNOWN";

/// Byte budget for one substituted path component, respecting UTF-8
/// boundaries.
const MAX_COMPONENT_BYTES: usize = 120;

/// Device names Windows reserves regardless of extension.
const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("static regex is valid"))
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("static regex is valid")
    })
}

/// Returns the template's literal trailing extension, if it has one.
///
/// `"{title}.{ext}"` has no literal extension; `"books/{title}.epub"`
/// requests `epub`. The caller decides whether the extension names a
/// registered format.
#[must_use]
pub fn requested_extension(template: &str) -> Option<&str> {
    let file_name = template
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(template);
    let (_, extension) = file_name.rsplit_once('.')?;
    if extension.is_empty() || extension.contains(['{', '}']) {
        return None;
    }
    Some(extension)
}

/// Expands the template into a concrete output path.
///
/// Substitutes sanitized metadata fields and the chosen extension, expands a
/// leading `~` and `$VAR`/`${VAR}` references, and normalizes `\` separators
/// to `/`.
#[must_use]
pub fn render(template: &str, metadata: &Metadata, extension: &str) -> PathBuf {
    let substituted = placeholder_pattern().replace_all(template, |caps: &regex::Captures<'_>| {
        let field = &caps[1];
        if field == "ext" {
            return extension.to_string();
        }
        let value = field_value(metadata, field);
        match value {
            Some(value) if !value.is_empty() => sanitize_component(&value),
            _ => UNKNOWN_FIELD.to_string(),
        }
    });

    let expanded = expand_env(&expand_home(&substituted), |name| {
        std::env::var(name).ok()
    });
    PathBuf::from(expanded.replace('\\', "/"))
}

fn field_value(metadata: &Metadata, field: &str) -> Option<String> {
    match field {
        "title" => Some(metadata.title.clone()),
        "series" => metadata.series.clone(),
        "series_index" => metadata.series_index.map(|index| index.to_string()),
        "authors" => {
            if metadata.authors.is_empty() {
                None
            } else {
                Some(metadata.authors.join(", "))
            }
        }
        "language" => metadata.language.clone(),
        "publisher" => metadata.publisher.clone(),
        "identifier" => metadata.identifier.clone(),
        "description" => metadata.description.clone(),
        "release_date" => metadata.release_date.map(|date| {
            format!(
                "{:04}-{:02}-{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            )
        }),
        _ => None,
    }
}

/// Makes one substituted value safe as (part of) a path component.
///
/// Strips control characters, replaces characters forbidden on common
/// filesystems, strips trailing dots and spaces, sidesteps reserved device
/// names, and truncates to the byte budget at a valid UTF-8 boundary. Never
/// returns an empty string.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mapped: String = value
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();

    let truncated = truncate_to_boundary(&mapped, MAX_COMPONENT_BYTES);
    let trimmed = truncated.trim().trim_end_matches(['.', ' ']);

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    let reserved = RESERVED_NAMES
        .iter()
        .any(|name| stem.eq_ignore_ascii_case(name));

    if trimmed.is_empty() {
        "_".to_string()
    } else if reserved {
        format!("{trimmed}_")
    } else {
        trimmed.to_string()
    }
}

/// Truncates to at most `max_bytes`, never splitting a UTF-8 sequence.
fn truncate_to_boundary(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Expands a leading `~` to the user's home directory when known.
fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };
    if !rest.is_empty() && !rest.starts_with('/') && !rest.starts_with('\\') {
        // ~otheruser syntax is not supported; leave it alone.
        return path.to_string();
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok();
    match home {
        Some(home) if !home.is_empty() => format!("{home}{rest}"),
        _ => path.to_string(),
    }
}

/// Expands `$VAR` and `${VAR}` references; unknown variables are left as-is.
fn expand_env(path: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    env_var_pattern()
        .replace_all(path, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
