//! Integration tests for the container assemblers against a mock HTTP
//! server: entry ordering, duplicate suppression, and progress accounting.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bindery::{
    Assembler, Book, BookContent, Cbz, Epub, HtmlChapter, Metadata, RemoteFile, TocEntry,
};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::ZipArchive;

fn archive_names(file: &std::path::Path) -> Vec<String> {
    let reader = std::fs::File::open(file).unwrap();
    let mut archive = ZipArchive::new(reader).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

fn archive_entry(file: &std::path::Path, suffix: &str) -> Option<String> {
    let reader = std::fs::File::open(file).unwrap();
    let mut archive = ZipArchive::new(reader).unwrap();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        if entry.name().ends_with(suffix) {
            let mut text = String::new();
            entry.read_to_string(&mut text).unwrap();
            return Some(text);
        }
    }
    None
}

#[tokio::test]
async fn cbz_contains_n_images_plus_metadata_sorted_by_page_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/\d+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes"))
        .mount(&server)
        .await;

    for image_count in [1usize, 9, 10, 11, 100] {
        let images: Vec<RemoteFile> = (0..image_count)
            .map(|i| RemoteFile::new(format!("{}/img/{i}.png", server.uri()), "png"))
            .collect();
        let book = Book::new(
            Metadata::new("Paginated"),
            BookContent::ImageList(images),
        );

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.cbz");
        Cbz::new()
            .assemble(&book, &destination, None)
            .await
            .unwrap();

        let names = archive_names(&destination);
        assert_eq!(
            names.len(),
            image_count + 1,
            "{image_count} pages plus one metadata entry"
        );
        assert_eq!(names.last().map(String::as_str), Some("ComicInfo.xml"));

        let pages = &names[..image_count];
        let mut sorted = pages.to_vec();
        sorted.sort();
        assert_eq!(
            pages,
            &sorted[..],
            "entry names must sort in page order for {image_count} pages"
        );
    }
}

#[tokio::test]
async fn cbz_progress_fires_once_per_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/\d+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"p"))
        .mount(&server)
        .await;

    let images: Vec<RemoteFile> = (0..4)
        .map(|i| RemoteFile::new(format!("{}/img/{i}.png", server.uri()), "png"))
        .collect();
    let book = Book::new(Metadata::new("P"), BookContent::ImageList(images));

    let dir = tempfile::tempdir().unwrap();
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fractions);
    let callback = move |fraction: f64| sink.lock().unwrap().push(fraction);

    Cbz::new()
        .assemble(&book, &dir.path().join("p.cbz"), Some(&callback))
        .await
        .unwrap();

    let fractions = fractions.lock().unwrap();
    assert_eq!(fractions.len(), 4);
    let sum: f64 = fractions.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9, "fractions must sum to 1.0, got {sum}");
}

#[tokio::test]
async fn cbz_aborts_when_a_page_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/0.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"p"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/1.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let images = vec![
        RemoteFile::new(format!("{}/img/0.png", server.uri()), "png"),
        RemoteFile::new(format!("{}/img/1.png", server.uri()), "png"),
    ];
    let book = Book::new(Metadata::new("B"), BookContent::ImageList(images));

    let dir = tempfile::tempdir().unwrap();
    let result = Cbz::new()
        .assemble(&book, &dir.path().join("b.cbz"), None)
        .await;
    assert!(result.is_err(), "one failing page must abort the batch");
}

#[tokio::test]
async fn epub_chapters_land_in_source_order_despite_completion_order() {
    let server = MockServer::start().await;
    // Chapter 0 responds last; chapters 1 and 2 complete first.
    Mock::given(method("GET"))
        .and(path("/ch/0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><div id="c">First chapter text</div></body></html>"#)
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;
    for (index, text) in [(1, "Second chapter text"), (2, "Third chapter text")] {
        Mock::given(method("GET"))
            .and(path(format!("/ch/{index}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><body><div id="c">{text}</div></body></html>"#
            )))
            .mount(&server)
            .await;
    }

    let chapters: Vec<HtmlChapter> = ["One", "Two", "Three"]
        .iter()
        .enumerate()
        .map(|(index, title)| HtmlChapter {
            title: (*title).to_string(),
            file: RemoteFile::new(format!("{}/ch/{index}", server.uri()), "html"),
            content_selector: "#c".to_string(),
        })
        .collect();
    let book = Book::new(
        Metadata::new("Ordered"),
        BookContent::HtmlChapters {
            chapters,
            cover: None,
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("ordered.epub");
    Epub::new()
        .assemble(&book, &destination, None)
        .await
        .unwrap();

    let first = archive_entry(&destination, "chapter_0000.xhtml").unwrap();
    let second = archive_entry(&destination, "chapter_0001.xhtml").unwrap();
    let third = archive_entry(&destination, "chapter_0002.xhtml").unwrap();
    assert!(first.contains("First chapter text"), "slow chapter 0 must still land first");
    assert!(second.contains("Second chapter text"));
    assert!(third.contains("Third chapter text"));
}

#[tokio::test]
async fn epub_progress_counts_chapters_plus_cover() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/ch/\d+$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><div id="c">text</div></body></html>"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cover.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpg"))
        .mount(&server)
        .await;

    let chapters: Vec<HtmlChapter> = (0..3)
        .map(|index| HtmlChapter {
            title: format!("Chapter {index}"),
            file: RemoteFile::new(format!("{}/ch/{index}", server.uri()), "html"),
            content_selector: "#c".to_string(),
        })
        .collect();
    let book = Book::new(
        Metadata::new("Covered"),
        BookContent::HtmlChapters {
            chapters,
            cover: Some(RemoteFile::new(
                format!("{}/cover.jpg", server.uri()),
                "jpg",
            )),
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fractions);
    let callback = move |fraction: f64| sink.lock().unwrap().push(fraction);

    Epub::new()
        .assemble(&book, &dir.path().join("c.epub"), Some(&callback))
        .await
        .unwrap();

    let fractions = fractions.lock().unwrap();
    assert_eq!(fractions.len(), 4, "three chapters plus the cover");
    let sum: f64 = fractions.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9, "fractions must sum to 1.0, got {sum}");
}

#[tokio::test]
async fn epub_missing_selector_embeds_empty_chapter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ch/0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body><p>unmarked text</p></body></html>"),
        )
        .mount(&server)
        .await;

    let book = Book::new(
        Metadata::new("Empty"),
        BookContent::HtmlChapters {
            chapters: vec![HtmlChapter {
                title: "Only".to_string(),
                file: RemoteFile::new(format!("{}/ch/0", server.uri()), "html"),
                content_selector: "#does-not-exist".to_string(),
            }],
            cover: None,
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("empty.epub");
    Epub::new()
        .assemble(&book, &destination, None)
        .await
        .unwrap();

    let chapter = archive_entry(&destination, "chapter_0000.xhtml").unwrap();
    assert!(!chapter.contains("unmarked text"), "unselected content must not leak in");
}

fn part_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        for (name, content) in entries {
            writer
                .start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn merged_parts_keep_first_copy_and_regenerate_navigation() {
    let part1 = part_zip(&[
        ("mimetype", "application/epub+zip"),
        ("content.opf", "<package>part one descriptor</package>"),
        ("ch1.xhtml", "<html><body>From part one</body></html>"),
        ("style/shared.css", "body {}"),
    ]);
    let part2 = part_zip(&[
        ("ch1.xhtml", "<html><body>From part two</body></html>"),
        ("ch2.xhtml", "<html><body>Second chapter</body></html>"),
        ("toc.ncx", "<ncx/>"),
        ("nav.xhtml", "<html>old nav</html>"),
    ]);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/part1.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(part1))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/part2.epub"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(part2))
        .mount(&server)
        .await;

    let mut metadata = Metadata::new("Merged Book");
    metadata.authors = vec!["Writer".to_string()];
    let book = Book::new(
        metadata,
        BookContent::ContainerParts {
            parts: vec![
                RemoteFile::new(format!("{}/part1.epub", server.uri()), "epub"),
                RemoteFile::new(format!("{}/part2.epub", server.uri()), "epub"),
            ],
            toc_entries: vec![
                TocEntry::new("ch1.xhtml#start", "Opening"),
                TocEntry::new("ch2.xhtml", "Closing"),
            ],
        },
    );

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("merged.epub");
    let fractions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fractions);
    let callback = move |fraction: f64| sink.lock().unwrap().push(fraction);
    Epub::new()
        .assemble(&book, &destination, Some(&callback))
        .await
        .unwrap();

    let names = archive_names(&destination);
    assert_eq!(names[0], "mimetype", "mimetype must be the first entry");
    assert_eq!(
        names.iter().filter(|name| *name == "ch1.xhtml").count(),
        1,
        "duplicate entry must be copied exactly once"
    );
    assert!(!names.contains(&"toc.ncx".to_string()), "part navigation must not be copied");

    let ch1 = archive_entry(&destination, "ch1.xhtml").unwrap();
    assert!(
        ch1.contains("From part one"),
        "the first part to introduce a name wins"
    );

    let nav = archive_entry(&destination, "nav.xhtml").unwrap();
    assert!(!nav.contains("old nav"), "navigation must be regenerated");
    let opening = nav.find("Opening").unwrap();
    let closing = nav.find("Closing").unwrap();
    assert!(opening < closing, "toc order must follow toc_entries order");
    assert!(nav.contains("href=\"ch1.xhtml#start\""));

    let opf = archive_entry(&destination, "content.opf").unwrap();
    assert!(!opf.contains("part one descriptor"), "descriptor must be regenerated");
    assert!(opf.contains("<dc:title>Merged Book</dc:title>"));
    assert!(opf.contains("media-type=\"text/css\""));

    let fractions = fractions.lock().unwrap();
    assert_eq!(fractions.len(), 2, "one progress call per part");
    let sum: f64 = fractions.iter().sum();
    assert!((sum - 1.0).abs() < 1e-9);
}
