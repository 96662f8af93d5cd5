//! ComicInfo metadata sidecar synthesis.
//!
//! Produces the ComicRack `ComicInfo.xml` format embedded into image
//! archives. Documentation: <https://anansi-project.github.io/docs/comicinfo>

use crate::book::Metadata;

/// Renders book metadata as a ComicInfo XML document.
#[must_use]
pub(crate) fn comic_info_xml(metadata: &Metadata) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ComicInfo>");
    add_value(&mut xml, "Title", Some(&metadata.title));
    add_value(&mut xml, "Series", metadata.series.as_deref());
    add_value(
        &mut xml,
        "Number",
        metadata.series_index.map(|n| n.to_string()).as_deref(),
    );
    add_value(&mut xml, "Summary", metadata.description.as_deref());
    add_value(&mut xml, "Publisher", metadata.publisher.as_deref());
    if let Some(date) = metadata.release_date {
        add_value(&mut xml, "Year", Some(&date.year().to_string()));
        add_value(&mut xml, "Month", Some(&u8::from(date.month()).to_string()));
        add_value(&mut xml, "Day", Some(&date.day().to_string()));
    }
    add_value(&mut xml, "Format", Some("Web"));
    xml.push_str("</ComicInfo>");
    xml
}

/// Appends `<name>value</name>` when a value is present and non-empty.
fn add_value(xml: &mut String, name: &str, value: Option<&str>) {
    let Some(value) = value else { return };
    if value.is_empty() {
        return;
    }
    xml.push_str("\n  <");
    xml.push_str(name);
    xml.push('>');
    xml.push_str(&escape_xml(value));
    xml.push_str("</");
    xml.push_str(name);
    xml.push('>');
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}
