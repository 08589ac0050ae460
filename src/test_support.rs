//! Synthetic dumps for tests.

use chrono::{DateTime, Duration, TimeZone, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

use crate::{
    byte_source::{ChunkedSource, SourceConfig},
    dump_parser::{RevisionScanner, ScanOptions},
    fields::TIMESTAMP_FORMAT,
    split::SplitGovernor,
};

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{dump_to_xml, sample_page, scanner_over, scanner_over_range, TestPage};
    pub(crate) use proptest::prelude::*;
}

#[derive(Debug, Clone)]
pub struct TestRevision {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    /// Anonymous edit (`<ip>`) if `None`.
    pub username: Option<String>,
    pub comment: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TestPage {
    pub id: u64,
    pub title: String,
    pub namespace: i32,
    /// Written instead of `id` if set.
    pub raw_id: Option<String>,
    pub revisions: Vec<TestRevision>,
}

/// A page with `revisions` well-formed revisions: every optional element present, texts of
/// at least 150 bytes, timestamps three hours apart.
pub fn sample_page(id: u64, title: &str, namespace: i32, revisions: usize) -> TestPage {
    let first = id * 1000 + 1;
    let start = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap() + Duration::days(id as i64);

    let revisions = (0..revisions as u64)
        .map(|i| TestRevision {
            id: first + i,
            parent_id: Some(first + i - 1),
            timestamp: start + Duration::hours(3 * i as i64),
            username: Some(format!("Editor {}", i % 3)),
            comment: Some(format!("edit #{i} of {title}")),
            text: format!(
                "'''{title}''' is a page used for testing.\n\n== Section {i} ==\n{}",
                "Some more prose about the subject, revised again. ".repeat(i as usize + 3)
            ),
        })
        .collect();

    TestPage {
        id,
        title: title.into(),
        namespace,
        raw_id: None,
        revisions,
    }
}

fn text_element<W: std::io::Write>(writer: &mut quick_xml::Writer<W>, name: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .unwrap();
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .unwrap();
    writer.write_event(Event::End(BytesEnd::new(name))).unwrap();
}

/// One `<page>` element in the element order of MediaWiki export files.
pub fn page_to_xml(page: &TestPage) -> Vec<u8> {
    let mut xml = Vec::new();
    let mut writer = quick_xml::Writer::new_with_indent(Cursor::new(&mut xml), b' ', 2);
    writer
        .write_event(Event::Start(BytesStart::new("page")))
        .unwrap();

    text_element(&mut writer, "title", &page.title);
    text_element(&mut writer, "ns", &page.namespace.to_string());
    let id = page.raw_id.clone().unwrap_or_else(|| page.id.to_string());
    text_element(&mut writer, "id", &id);

    for revision in &page.revisions {
        writer
            .write_event(Event::Start(BytesStart::new("revision")))
            .unwrap();
        text_element(&mut writer, "id", &revision.id.to_string());
        if let Some(parent_id) = revision.parent_id {
            text_element(&mut writer, "parentid", &parent_id.to_string());
        }
        text_element(
            &mut writer,
            "timestamp",
            &revision.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        );

        writer
            .write_event(Event::Start(BytesStart::new("contributor")))
            .unwrap();
        match &revision.username {
            Some(username) => {
                text_element(&mut writer, "username", username);
                text_element(&mut writer, "id", &(revision.id % 97).to_string());
            }
            None => text_element(&mut writer, "ip", "192.0.2.1"),
        }
        writer
            .write_event(Event::End(BytesEnd::new("contributor")))
            .unwrap();

        if let Some(comment) = &revision.comment {
            text_element(&mut writer, "comment", comment);
        }
        text_element(&mut writer, "model", "wikitext");
        text_element(&mut writer, "format", "text/x-wiki");

        let bytes = revision.text.len().to_string();
        writer
            .write_event(Event::Start(BytesStart::new("text").with_attributes([
                ("bytes", bytes.as_str()),
                ("xml:space", "preserve"),
            ])))
            .unwrap();
        writer
            .write_event(Event::Text(BytesText::new(&revision.text)))
            .unwrap();
        writer
            .write_event(Event::End(BytesEnd::new("text")))
            .unwrap();

        // any hash will do, it is never checked
        let hash = blake3::hash(revision.text.as_bytes());
        text_element(&mut writer, "sha1", &hex::encode(&hash.as_bytes()[..20]));

        writer
            .write_event(Event::End(BytesEnd::new("revision")))
            .unwrap();
    }

    writer
        .write_event(Event::End(BytesEnd::new("page")))
        .unwrap();
    xml.push(b'\n');
    xml
}

/// A complete export file holding `pages`.
pub fn dump_to_xml(pages: &[TestPage]) -> Vec<u8> {
    const HEADER: &str = r#"<mediawiki xmlns="http://www.mediawiki.org/xml/export-0.11/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" version="0.11" xml:lang="en">
  <siteinfo>
    <sitename>Wikipedia</sitename>
    <dbname>testwiki</dbname>
    <generator>MediaWiki 1.43.0-wmf.20</generator>
    <case>first-letter</case>
    <namespaces>
      <namespace key="0" case="first-letter" />
      <namespace key="1" case="first-letter">Talk</namespace>
    </namespaces>
  </siteinfo>
"#;
    const FOOTER: &str = "</mediawiki>\n";

    let mut xml = HEADER.as_bytes().to_vec();
    for page in pages {
        xml.extend_from_slice(&page_to_xml(page));
    }
    xml.extend_from_slice(FOOTER.as_bytes());
    xml
}

fn small_buffers() -> SourceConfig {
    SourceConfig {
        buffer_bytes: 61,
        cooperative_yield: None,
        ..SourceConfig::default()
    }
}

/// Scans all of `bytes`, refilling often.
pub fn scanner_over(bytes: Vec<u8>, options: ScanOptions) -> RevisionScanner<Cursor<Vec<u8>>> {
    let source = ChunkedSource::new(Cursor::new(bytes), 0, small_buffers());
    RevisionScanner::new(source, SplitGovernor::unbounded(), options)
}

/// Scans the split `[start, end)` of `bytes`.
pub fn scanner_over_range(
    bytes: Vec<u8>,
    start: u64,
    end: u64,
    options: ScanOptions,
) -> RevisionScanner<Cursor<Vec<u8>>> {
    let source = ChunkedSource::seeking(Cursor::new(bytes), start, small_buffers()).unwrap();
    RevisionScanner::new(source, SplitGovernor::new(start, end), options)
}

pub mod proptest {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use proptest::strategy::Strategy;

    use super::{TestPage, TestRevision};

    pub fn maybe_comment() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            3 => Just(None),
            5 => "[ -~]{0,40}".prop_map(Some),
            1 => "\\PC{0,20}".prop_map(Some),
        ]
    }

    pub fn maybe_username() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            1 => Just(None),
            4 => "[A-Za-z0-9 _&<>]{1,16}".prop_map(Some),
        ]
    }

    pub fn revision_text() -> impl Strategy<Value = String> {
        prop_oneof![
            1 => Just(String::new()),
            2 => "[a-z \n]{0,30}",
            6 => "[ -~\n]{10,400}",
            2 => "\\PC{0,200}",
        ]
    }

    prop_compose! {
        pub fn revision(id: u64, parent_id: Option<u64>, minutes: i64)
                (username in maybe_username(), comment in maybe_comment(), text in revision_text())
        -> TestRevision {
            TestRevision {
                id,
                parent_id,
                timestamp: Utc.with_ymd_and_hms(2015, 6, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes),
                username,
                comment,
                text,
            }
        }
    }

    /// Revisions with increasing ids and timestamps.
    pub fn revisions(first_id: u64, max_revisions: usize) -> impl Strategy<Value = Vec<TestRevision>> {
        prop::collection::vec((1i64..5000, any::<bool>()), 0..max_revisions).prop_flat_map(
            move |steps| {
                let mut minutes = 0;
                steps
                    .into_iter()
                    .enumerate()
                    .map(|(i, (step, has_parent))| {
                        minutes += step;
                        let id = first_id + i as u64;
                        let parent_id = (i > 0 && has_parent).then(|| id - 1);
                        revision(id, parent_id, minutes)
                    })
                    .collect::<Vec<_>>()
            },
        )
    }

    prop_compose! {
        pub fn page(id: u64, max_revisions: usize)
                (title in "[A-Za-z0-9 &'()]{1,24}", namespace in prop_oneof![4 => Just(0), 1 => Just(1), 1 => Just(-1)], revisions in revisions(id * 1000, max_revisions))
        -> TestPage {
            TestPage {
                id,
                title,
                namespace,
                raw_id: None,
                revisions,
            }
        }
    }

    /// Pages with unique ids.
    pub fn pages(max_pages: usize, max_revisions: usize) -> impl Strategy<Value = Vec<TestPage>> {
        (1..=max_pages).prop_flat_map(move |count| {
            (1..=count as u64)
                .map(|id| page(id, max_revisions))
                .collect::<Vec<_>>()
        })
    }
}
