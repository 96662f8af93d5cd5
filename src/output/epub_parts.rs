//! Merging a book delivered as several partial EPUB containers.
//!
//! Parts are processed strictly in order — each step depends on which entry
//! names the merged output already holds. Every part is fetched to a scratch
//! file, opened as an archive, and its entries copied unless the name was
//! already taken by an earlier part or belongs to the package descriptor /
//! navigation layer, which is regenerated from scratch once all parts are in.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{debug, instrument};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{OutputError, media_type_for};
use crate::book::{Book, RemoteFile, TocEntry};
use crate::fetch::{Fetcher, ProgressFn};

const CONTAINER_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
    <container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
      <rootfiles>\n\
        <rootfile full-path=\"content.opf\" media-type=\"application/oebps-package+xml\"/>\n\
      </rootfiles>\n\
    </container>";

/// Merges all parts into one container at `destination`.
///
/// `on_progress` fires `1/part_count` once per completed part.
#[instrument(level = "debug", skip_all, fields(title = %book.metadata.title, parts = parts.len()))]
pub(crate) async fn merge_parts(
    fetcher: &Fetcher,
    book: &Book,
    parts: &[RemoteFile],
    toc_entries: &[TocEntry],
    destination: &Path,
    on_progress: Option<&ProgressFn>,
) -> Result<(), OutputError> {
    let part_count = parts.len();
    let output = std::fs::File::create(destination)
        .map_err(|e| OutputError::io(destination, e))?;
    let mut writer = ZipWriter::new(output);

    // The container spec wants the mimetype first and uncompressed.
    writer.start_file(
        "mimetype",
        FileOptions::default().compression_method(CompressionMethod::Stored),
    )?;
    writer
        .write_all(b"application/epub+zip")
        .map_err(|e| OutputError::io(destination, e))?;
    writer.start_file("META-INF/container.xml", FileOptions::default())?;
    writer
        .write_all(CONTAINER_XML.as_bytes())
        .map_err(|e| OutputError::io(destination, e))?;

    let mut copied: HashSet<String> = HashSet::new();
    let mut manifest: Vec<String> = Vec::new();
    let mut spine: Vec<String> = Vec::new();

    for (part_index, part) in parts.iter().enumerate() {
        let payload = fetcher.fetch(part, None).await?;

        // Scratch file per part; removed as soon as its entries are copied.
        let scratch = tempfile::NamedTempFile::new()
            .map_err(|e| OutputError::io("part scratch file", e))?;
        std::fs::write(scratch.path(), &payload)
            .map_err(|e| OutputError::io(scratch.path(), e))?;
        let part_file = std::fs::File::open(scratch.path())
            .map_err(|e| OutputError::io(scratch.path(), e))?;
        let mut archive = ZipArchive::new(part_file)?;

        let mut copied_from_part = 0usize;
        for entry_index in 0..archive.len() {
            let mut entry = archive.by_index(entry_index)?;
            if !entry.is_file() {
                continue;
            }
            let name = entry.name().to_string();
            if is_package_entry(&name) || copied.contains(&name) {
                continue;
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| OutputError::io(destination, e))?;
            let options = FileOptions::default().compression_method(entry.compression());
            writer.start_file(name.as_str(), options)?;
            writer
                .write_all(&data)
                .map_err(|e| OutputError::io(destination, e))?;

            if is_document_entry(&name) {
                spine.push(name.clone());
            }
            manifest.push(name.clone());
            copied.insert(name);
            copied_from_part += 1;
        }
        debug!(part = part_index, entries = copied_from_part, "part merged");

        drop(archive);
        drop(scratch);
        if let Some(callback) = on_progress {
            #[allow(clippy::cast_precision_loss)]
            callback(1.0 / part_count as f64);
        }
    }

    // Regenerate the navigation and package descriptor over the merged set.
    let nav = navigation_document(book, toc_entries, &copied);
    writer.start_file("nav.xhtml", FileOptions::default())?;
    writer
        .write_all(nav.as_bytes())
        .map_err(|e| OutputError::io(destination, e))?;

    let opf = package_document(book, &manifest, &spine);
    writer.start_file("content.opf", FileOptions::default())?;
    writer
        .write_all(opf.as_bytes())
        .map_err(|e| OutputError::io(destination, e))?;

    writer.finish()?;
    debug!(path = %destination.display(), entries = manifest.len(), "merged container finished");
    Ok(())
}

/// Package-descriptor and navigation entries are never copied from parts;
/// they describe a single part, not the merged whole.
fn is_package_entry(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    name == "mimetype"
        || name.starts_with("META-INF/")
        || name.ends_with(".opf")
        || name.ends_with(".ncx")
        || file_name == "nav.xhtml"
}

fn is_document_entry(name: &str) -> bool {
    name.ends_with(".xhtml") || name.ends_with(".html") || name.ends_with(".htm")
}

/// EPUB 3 navigation document listing the matched table-of-contents entries
/// in `toc_entries` order.
fn navigation_document(book: &Book, toc_entries: &[TocEntry], copied: &HashSet<String>) -> String {
    let mut items = String::new();
    for entry in toc_entries {
        if !copied.contains(entry.path()) {
            continue;
        }
        items.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            escape_attribute(&entry.href),
            escape_text(&entry.title)
        ));
    }
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head><title>{title}</title></head>\n\
         <body>\n\
           <nav epub:type=\"toc\">\n\
             <ol>\n{items}    </ol>\n\
           </nav>\n\
         </body>\n\
         </html>",
        title = escape_text(&book.metadata.title),
        items = items
    )
}

/// Package descriptor over the merged manifest, with the spine in the order
/// entries were first copied.
fn package_document(book: &Book, manifest: &[String], spine: &[String]) -> String {
    let metadata = &book.metadata;
    let identifier = metadata
        .identifier
        .clone()
        .unwrap_or_else(|| format!("urn:bindery:{}", metadata.title));
    let language = metadata.language.as_deref().unwrap_or("en");

    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"book-id\">\n",
    );
    xml.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    xml.push_str(&format!(
        "    <dc:identifier id=\"book-id\">{}</dc:identifier>\n",
        escape_text(&identifier)
    ));
    xml.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_text(&metadata.title)
    ));
    xml.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_text(language)
    ));
    for author in &metadata.authors {
        xml.push_str(&format!(
            "    <dc:creator>{}</dc:creator>\n",
            escape_text(author)
        ));
    }
    if let Some(publisher) = &metadata.publisher {
        xml.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            escape_text(publisher)
        ));
    }
    if let Some(description) = &metadata.description {
        xml.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_text(description)
        ));
    }
    xml.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        modified_timestamp()
    ));
    xml.push_str("  </metadata>\n  <manifest>\n");

    xml.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    let mut ids = std::collections::HashMap::new();
    for (index, href) in manifest.iter().enumerate() {
        let id = format!("item-{index:04}");
        xml.push_str(&format!(
            "    <item id=\"{id}\" href=\"{}\" media-type=\"{}\"/>\n",
            escape_attribute(href),
            media_type_for(href)
        ));
        ids.insert(href.as_str(), id);
    }
    xml.push_str("  </manifest>\n  <spine>\n");
    for href in spine {
        if let Some(id) = ids.get(href.as_str()) {
            xml.push_str(&format!("    <itemref idref=\"{id}\"/>\n"));
        }
    }
    xml.push_str("  </spine>\n</package>\n");
    xml
}

fn modified_timestamp() -> String {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::book::Metadata;

    #[test]
    fn test_package_entries_are_skipped() {
        assert!(is_package_entry("mimetype"));
        assert!(is_package_entry("META-INF/container.xml"));
        assert!(is_package_entry("content.opf"));
        assert!(is_package_entry("OEBPS/package.opf"));
        assert!(is_package_entry("toc.ncx"));
        assert!(is_package_entry("OEBPS/nav.xhtml"));
        assert!(!is_package_entry("OEBPS/chapter1.xhtml"));
        assert!(!is_package_entry("style.css"));
    }

    #[test]
    fn test_document_entries_enter_the_spine() {
        assert!(is_document_entry("chapter1.xhtml"));
        assert!(is_document_entry("old/page.htm"));
        assert!(!is_document_entry("style.css"));
        assert!(!is_document_entry("cover.jpg"));
    }

    #[test]
    fn test_navigation_lists_only_copied_matches_in_toc_order() {
        let book = Book::new(
            Metadata::new("Merged"),
            crate::book::BookContent::ContainerParts {
                parts: Vec::new(),
                toc_entries: Vec::new(),
            },
        );
        let toc = vec![
            TocEntry::new("ch2.xhtml", "Second"),
            TocEntry::new("ch1.xhtml#top", "First"),
            TocEntry::new("missing.xhtml", "Ghost"),
        ];
        let copied: HashSet<String> =
            ["ch1.xhtml".to_string(), "ch2.xhtml".to_string()].into();

        let nav = navigation_document(&book, &toc, &copied);
        let second = nav.find("Second").unwrap();
        let first = nav.find("First").unwrap();
        assert!(second < first, "toc order must follow entry order");
        assert!(!nav.contains("Ghost"));
        assert!(nav.contains("href=\"ch1.xhtml#top\""));
    }

    #[test]
    fn test_package_document_spine_preserves_order() {
        let book = Book::new(
            Metadata::new("Merged"),
            crate::book::BookContent::ContainerParts {
                parts: Vec::new(),
                toc_entries: Vec::new(),
            },
        );
        let manifest = vec![
            "ch1.xhtml".to_string(),
            "style.css".to_string(),
            "ch2.xhtml".to_string(),
        ];
        let spine = vec!["ch1.xhtml".to_string(), "ch2.xhtml".to_string()];
        let opf = package_document(&book, &manifest, &spine);

        assert!(opf.contains("<dc:title>Merged</dc:title>"));
        let ch1 = opf.find("<itemref idref=\"item-0000\"/>").unwrap();
        let ch2 = opf.find("<itemref idref=\"item-0002\"/>").unwrap();
        assert!(ch1 < ch2);
        assert!(opf.contains("media-type=\"text/css\""));
        assert!(opf.contains("properties=\"nav\""));
    }
}
