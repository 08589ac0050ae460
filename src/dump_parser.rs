//! Split-aware extraction of pages and revisions from a MediaWiki XML dump.
//!
//! [`RevisionScanner`] walks a byte stream through an explicit state machine. Each state
//! knows the one, two or three structural markers that may legally come next and races
//! them against the input with a [`TagRace`]. Field contents are buffered between an
//! opening and a closing marker and converted when the field closes.
//!
//! The scanner never validates the XML. Everything that is not one of the expected
//! markers (`<sha1>`, `<model>`, `<minor />`, attributes, ...) is skipped, and elements
//! carrying attributes (e.g. `<comment deleted="deleted" />`) simply never match.

use std::{
    fmt::Debug,
    io::{self, Read},
    mem,
};

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use rustc_hash::FxHashMap;

use crate::{
    byte_source::{ChunkedSource, CloseHandle},
    fields::{
        parse_contributor, parse_id, parse_namespace, parse_timestamp, unescape_lossy, utf8,
        FieldBuffer, Reason, TimestampWindow,
    },
    split::SplitGovernor,
    tag_matcher::{self as tags, Step, TagRace},
};

pub use crate::fields::{Contributor, Field, MalformedField};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("I/O error")]
    Io(#[from] io::Error),
    /// The stream ended inside a page.
    #[error("dump truncated in state {state:?} at offset {offset}")]
    TruncatedRecord { state: ScanState, offset: u64 },
    /// Only surfaced with the `strict` feature, otherwise the page or revision is skipped.
    #[error(transparent)]
    MalformedField(#[from] MalformedField),
    #[error("internal buffer invariant violated: {0}")]
    InternalBufferInvariant(&'static str),
}

/// Position of the scanner within the page structure.
///
/// `*Open` states wait for a field's opening marker, `*Body` states buffer a field until its
/// closing marker. `XOrY` states race several markers because the format allows either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanState {
    PageOuter,
    PageTitleOpen,
    PageTitleBody,
    NamespaceOpen,
    NamespaceBody,
    PageIdOpen,
    PageIdBody,
    /// `<revision>` or, for pages without revisions, `</page>`
    RevisionOuter,
    RevisionIdOpen,
    RevisionIdBody,
    ParentIdOrTimestamp,
    ParentIdBody,
    TimestampOpen,
    TimestampBody,
    /// `<contributor>`, `<comment>` or `<text`
    ContributorOrComment,
    ContributorBody,
    CommentOrText,
    CommentBody,
    TextOpen,
    /// between `<text` and `>`
    TextAttributes,
    TextBody,
    RevisionClose,
    RevisionOrPageClose,
    /// Just saw `</page>`.
    PageClose,
    /// Ignores everything up to `</page>` of a page that will be discarded.
    SkipToPageClose,
}

impl ScanState {
    fn candidates(self) -> &'static [&'static [u8]] {
        use ScanState::*;

        match self {
            PageOuter => &[tags::PAGE_OPEN],
            PageTitleOpen => &[tags::TITLE_OPEN],
            PageTitleBody => &[tags::TITLE_CLOSE],
            NamespaceOpen => &[tags::NS_OPEN],
            NamespaceBody => &[tags::NS_CLOSE],
            PageIdOpen | RevisionIdOpen => &[tags::ID_OPEN],
            PageIdBody | RevisionIdBody => &[tags::ID_CLOSE],
            RevisionOuter | RevisionOrPageClose => &[tags::REVISION_OPEN, tags::PAGE_CLOSE],
            ParentIdOrTimestamp => &[tags::PARENT_ID_OPEN, tags::TIMESTAMP_OPEN],
            ParentIdBody => &[tags::PARENT_ID_CLOSE],
            TimestampOpen => &[tags::TIMESTAMP_OPEN],
            TimestampBody => &[tags::TIMESTAMP_CLOSE],
            ContributorOrComment => &[tags::CONTRIBUTOR_OPEN, tags::COMMENT_OPEN, tags::TEXT_OPEN],
            ContributorBody => &[tags::CONTRIBUTOR_CLOSE],
            CommentOrText => &[tags::COMMENT_OPEN, tags::TEXT_OPEN],
            CommentBody => &[tags::COMMENT_CLOSE],
            TextOpen => &[tags::TEXT_OPEN],
            TextAttributes | PageClose => &[],
            TextBody => &[tags::TEXT_CLOSE],
            RevisionClose => &[tags::REVISION_CLOSE],
            SkipToPageClose => &[tags::PAGE_CLOSE],
        }
    }

    fn buffers_field(self) -> bool {
        use ScanState::*;

        matches!(
            self,
            PageTitleBody
                | NamespaceBody
                | PageIdBody
                | RevisionIdBody
                | ParentIdBody
                | TimestampBody
                | ContributorBody
                | CommentBody
                | TextBody
        )
    }

    fn in_page_header(self) -> bool {
        use ScanState::*;

        matches!(
            self,
            PageTitleOpen
                | PageTitleBody
                | NamespaceOpen
                | NamespaceBody
                | PageIdOpen
                | PageIdBody
                | RevisionOuter
        )
    }

    fn in_revision(self) -> bool {
        use ScanState::*;

        matches!(
            self,
            RevisionIdOpen
                | RevisionIdBody
                | ParentIdOrTimestamp
                | ParentIdBody
                | TimestampOpen
                | TimestampBody
                | ContributorOrComment
                | ContributorBody
                | CommentOrText
                | CommentBody
                | TextOpen
                | TextAttributes
                | TextBody
                | RevisionClose
        )
    }

    /// States in which the end of the stream falls between pages.
    fn is_between_pages(self) -> bool {
        matches!(self, ScanState::PageOuter | ScanState::PageClose)
    }
}

/// Pause points of [`RevisionScanner::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    PageOpened,
    RevisionOpened,
    FieldReady(Field),
    RevisionComplete,
    PageClosed,
    /// No further page starts inside the split, or the stream ended between pages.
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Keep the raw bytes of the page header and of each revision.
    pub capture_raw: bool,
    /// Decode revision text into [`RevisionRecord::text`].
    pub retain_text: bool,
    pub skip_non_article_namespaces: bool,
    pub timestamp_window: TimestampWindow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PageMeta {
    pub page_id: u64,
    pub title: CompactString,
    pub namespace: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RevisionRecord {
    pub page_id: u64,
    pub revision_id: u64,
    pub parent_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub namespace: i32,
    pub page_title: CompactString,
    pub contributor: Option<Contributor>,
    pub comment: Option<CompactString>,
    /// Empty unless [`ScanOptions::retain_text`] is set.
    pub text: String,
    /// Length of the (still escaped) text payload in bytes.
    pub text_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RevisionStatus {
    #[default]
    Usable,
    /// Outside the configured timestamp window.
    Filtered,
    /// A field failed to convert.
    Malformed,
}

/// The page a revision belongs to.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader<'a> {
    pub meta: &'a PageMeta,
    /// From `<page>` up to the first `<revision>`, if raw capture is enabled.
    pub raw: &'a [u8],
}

/// The most recently completed revision.
#[derive(Debug, Clone, Copy)]
pub struct RevisionView<'a> {
    pub record: &'a RevisionRecord,
    /// From `<revision>` through `</revision>`, if raw capture is enabled.
    pub raw: &'a [u8],
    /// The escaped text payload.
    pub text: &'a [u8],
    pub status: RevisionStatus,
}

/// Counters for data defects that were recovered from.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub pages: u64,
    pub revisions: u64,
    pub malformed_fields: FxHashMap<Field, u64>,
    pub malformed_pages: u64,
    pub malformed_revisions: u64,
    pub skipped_pages: u64,
    pub filtered_revisions: u64,
    pub unescape_failures: u64,
}

impl Diagnostics {
    pub fn malformed(&self, field: Field) -> u64 {
        self.malformed_fields.get(&field).copied().unwrap_or(0)
    }

    fn register_malformed(&mut self, field: Field) {
        *self.malformed_fields.entry(field).or_default() += 1;
    }

    fn register_unescape_failure(&mut self, field: Field, position: u64) {
        self.unescape_failures += 1;

        if self.unescape_failures == 1 {
            tracing::warn!(message = "Field with invalid XML entities detected. Keeping its text unchanged. Further occurrences will not be reported.", field = ?field, position);
        }
    }
}

#[derive(Debug, Default)]
struct RevisionSlot {
    record: RevisionRecord,
    raw: Vec<u8>,
    text: Vec<u8>,
    status: RevisionStatus,
}

impl RevisionSlot {
    fn mark(&mut self, status: RevisionStatus) {
        match (self.status, status) {
            (_, RevisionStatus::Malformed) | (RevisionStatus::Usable, _) => self.status = status,
            _ => {}
        }
    }
}

pub struct RevisionScanner<R> {
    source: ChunkedSource<R>,
    governor: SplitGovernor,
    options: ScanOptions,
    state: ScanState,
    race: TagRace,
    field: FieldBuffer,
    page: PageMeta,
    header_raw: Vec<u8>,
    /// revision being scanned
    current: RevisionSlot,
    /// last completed revision; survives the lookahead into the next one
    completed: RevisionSlot,
    text_tag_self_closing: bool,
    finished: bool,
    diagnostics: Diagnostics,
}

impl<R> Debug for RevisionScanner<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevisionScanner")
            .field("source", &self.source)
            .field("governor", &self.governor)
            .field("state", &self.state)
            .field("page", &self.page)
            .field("field.len", &self.field.len())
            .field("finished", &self.finished)
            .finish()
    }
}

fn payload<'a>(field: &'a FieldBuffer, closing: &[u8]) -> Result<&'a [u8], ExtractionError> {
    field.payload(closing).ok_or(ExtractionError::InternalBufferInvariant(
        "field buffer does not end with its closing marker",
    ))
}

impl<R: Read> RevisionScanner<R> {
    /// `source` must be positioned at the split start.
    #[tracing::instrument(level = "debug", skip(source, options))]
    pub fn new(source: ChunkedSource<R>, governor: SplitGovernor, options: ScanOptions) -> Self {
        Self {
            source,
            governor,
            options,
            state: ScanState::PageOuter,
            race: TagRace::new(ScanState::PageOuter.candidates()),
            field: FieldBuffer::with_capacity(1024 * 1024),
            page: PageMeta::default(),
            header_raw: Vec::new(),
            current: RevisionSlot::default(),
            completed: RevisionSlot::default(),
            text_tag_self_closing: false,
            finished: false,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Logical offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    pub fn governor(&self) -> &SplitGovernor {
        &self.governor
    }

    pub fn progress(&self) -> f32 {
        self.governor.progress(self.source.position())
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn page(&self) -> PageHeader<'_> {
        PageHeader {
            meta: &self.page,
            raw: &self.header_raw,
        }
    }

    pub fn completed(&self) -> RevisionView<'_> {
        RevisionView {
            record: &self.completed.record,
            raw: &self.completed.raw,
            text: &self.completed.text,
            status: self.completed.status,
        }
    }

    /// Whether the scanner is currently inside a `<page>` element.
    pub fn in_page(&self) -> bool {
        !self.state.is_between_pages()
    }

    /// Abandons the split. Partially scanned data is dropped and the next call to
    /// [`RevisionScanner::advance`] reports [`ScanEvent::Exhausted`].
    pub fn close(&mut self) {
        self.source.close();
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.source.close_handle()
    }

    /// Consumes input until the next pause point.
    pub fn advance(&mut self) -> Result<ScanEvent, ExtractionError> {
        if self.finished {
            return Ok(ScanEvent::Exhausted);
        }

        loop {
            match self.state {
                ScanState::PageClose => self.enter(ScanState::PageOuter),
                ScanState::PageOuter if self.race.is_idle() => {
                    // no page may start at or after the split end
                    let end = self.governor.end();
                    if !self.governor.has_more_input(self.source.position()) {
                        return Ok(self.finish());
                    }
                    self.source.skip_to(b'<', end)?;
                    if !self.governor.has_more_input(self.source.position()) {
                        return Ok(self.finish());
                    }
                }
                ScanState::SkipToPageClose if self.race.is_idle() => {
                    self.source.skip_to(b'<', u64::MAX)?;
                }
                _ => {}
            }

            let Some(byte) = self.source.next_byte()? else {
                return self.end_of_stream();
            };
            if let Some(event) = self.consume(byte)? {
                return Ok(event);
            }
        }
    }

    fn finish(&mut self) -> ScanEvent {
        if !self.finished {
            tracing::debug!(
                message = "split exhausted",
                position = self.source.position(),
                pages = self.diagnostics.pages,
                revisions = self.diagnostics.revisions
            );
        }
        self.finished = true;
        self.field.reset();
        self.current = RevisionSlot::default();
        self.source.close();
        ScanEvent::Exhausted
    }

    fn end_of_stream(&mut self) -> Result<ScanEvent, ExtractionError> {
        if self.source.is_closed() || self.state.is_between_pages() {
            return Ok(self.finish());
        }

        let error = ExtractionError::TruncatedRecord {
            state: self.state,
            offset: self.source.position(),
        };
        tracing::error!(message = "dump ends inside a page", state = ?self.state, offset = self.source.position(), page = ?self.page);
        self.finish();
        Err(error)
    }

    fn enter(&mut self, state: ScanState) {
        self.state = state;
        self.race.rearm(state.candidates());
    }

    fn open_field(&mut self, body: ScanState) -> Option<ScanEvent> {
        self.field.reset();
        self.enter(body);
        None
    }

    #[inline]
    fn consume(&mut self, byte: u8) -> Result<Option<ScanEvent>, ExtractionError> {
        let state = self.state;

        if self.options.capture_raw {
            if state.in_revision() {
                self.current.raw.push(byte);
            } else if state.in_page_header() {
                self.header_raw.push(byte);
            }
        }
        if state.buffers_field() {
            self.field.push(byte);
        }

        if state == ScanState::TextAttributes {
            return Ok(self.text_attributes(byte));
        }

        match self.race.feed(byte) {
            Step::Matched(index) => self.on_marker(state, index),
            Step::Partial | Step::Reset => Ok(None),
        }
    }

    fn text_attributes(&mut self, byte: u8) -> Option<ScanEvent> {
        if byte != b'>' {
            self.text_tag_self_closing = byte == b'/';
            return None;
        }

        if self.text_tag_self_closing {
            // <text ... /> has no content
            self.current.text.clear();
            self.current.record.text.clear();
            self.current.record.text_len = 0;
            self.enter(ScanState::RevisionClose);
            Some(ScanEvent::FieldReady(Field::Text))
        } else {
            self.open_field(ScanState::TextBody)
        }
    }

    fn on_marker(
        &mut self,
        state: ScanState,
        index: usize,
    ) -> Result<Option<ScanEvent>, ExtractionError> {
        use ScanState::*;

        let event = match (state, index) {
            (PageOuter, _) => {
                let marker_start = self.source.position() - tags::PAGE_OPEN.len() as u64;
                if !self.governor.admits_page_at(marker_start) {
                    return Ok(Some(self.finish()));
                }
                self.begin_page();
                Some(ScanEvent::PageOpened)
            }
            (PageTitleOpen, _) => self.open_field(PageTitleBody),
            (PageTitleBody, _) => self.close_title()?,
            (NamespaceOpen, _) => self.open_field(NamespaceBody),
            (NamespaceBody, _) => self.close_namespace()?,
            (PageIdOpen, _) => self.open_field(PageIdBody),
            (PageIdBody, _) => self.close_page_id()?,

            // <revision>
            (RevisionOuter | RevisionOrPageClose, 0) => {
                if state == RevisionOuter && self.options.capture_raw {
                    let header_len = self.header_raw.len() - tags::REVISION_OPEN.len();
                    self.header_raw.truncate(header_len);
                }
                self.begin_revision();
                Some(ScanEvent::RevisionOpened)
            }
            // </page>
            (RevisionOuter | RevisionOrPageClose | SkipToPageClose, _) => {
                self.enter(PageClose);
                Some(ScanEvent::PageClosed)
            }

            (RevisionIdOpen, _) => self.open_field(RevisionIdBody),
            (RevisionIdBody, _) => self.close_revision_id()?,
            (ParentIdOrTimestamp, 0) => self.open_field(ParentIdBody),
            (ParentIdOrTimestamp, _) => self.open_field(TimestampBody),
            (ParentIdBody, _) => self.close_parent_id()?,
            (TimestampOpen, _) => self.open_field(TimestampBody),
            (TimestampBody, _) => self.close_timestamp()?,
            (ContributorOrComment, 0) => self.open_field(ContributorBody),
            (ContributorOrComment, 1) | (CommentOrText, 0) => self.open_field(CommentBody),
            // <text
            (ContributorOrComment | CommentOrText | TextOpen, _) => {
                self.text_tag_self_closing = false;
                self.enter(TextAttributes);
                None
            }
            (ContributorBody, _) => self.close_contributor()?,
            (CommentBody, _) => self.close_comment()?,
            (TextBody, _) => self.close_text()?,
            (RevisionClose, _) => Some(self.complete_revision()),

            (TextAttributes | PageClose, _) => {
                return Err(ExtractionError::InternalBufferInvariant(
                    "marker matched in a state without markers",
                ))
            }
        };
        Ok(event)
    }

    fn begin_page(&mut self) {
        self.diagnostics.pages += 1;
        self.page = PageMeta::default();
        self.header_raw.clear();
        if self.options.capture_raw {
            self.header_raw.extend_from_slice(tags::PAGE_OPEN);
        }
        self.enter(ScanState::PageTitleOpen);
    }

    /// Gives up on the current page after a malformed header field.
    fn malformed_page(
        &mut self,
        field: Field,
        reason: Reason,
    ) -> Result<Option<ScanEvent>, ExtractionError> {
        self.report_malformed(field, reason)?;
        self.diagnostics.malformed_pages += 1;
        self.enter(ScanState::SkipToPageClose);
        Ok(Some(ScanEvent::FieldReady(field)))
    }

    fn malformed_revision(&mut self, field: Field, reason: Reason) -> Result<(), ExtractionError> {
        self.report_malformed(field, reason)?;
        self.current.mark(RevisionStatus::Malformed);
        Ok(())
    }

    fn report_malformed(&mut self, field: Field, reason: Reason) -> Result<(), ExtractionError> {
        let error = MalformedField {
            field,
            offset: self.source.position(),
            reason,
        };
        self.diagnostics.register_malformed(field);
        tracing::warn!(
            message = "Found malformed field, skipping the enclosing record",
            field = ?error.field,
            offset = error.offset,
            page_id = self.page.page_id,
            reason = %error.reason
        );

        if cfg!(feature = "strict") {
            return Err(error.into());
        }
        Ok(())
    }

    fn close_title(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        let decoded = utf8(payload(&self.field, tags::TITLE_CLOSE)?).map(|title| {
            let (title, ok) = unescape_lossy(title);
            (CompactString::from(title), ok)
        });
        match decoded {
            Ok((title, ok)) => {
                if !ok {
                    self.diagnostics
                        .register_unescape_failure(Field::PageTitle, self.source.position());
                }
                self.page.title = title;
                self.enter(ScanState::NamespaceOpen);
                Ok(Some(ScanEvent::FieldReady(Field::PageTitle)))
            }
            Err(reason) => self.malformed_page(Field::PageTitle, reason),
        }
    }

    fn close_namespace(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        match parse_namespace(payload(&self.field, tags::NS_CLOSE)?) {
            Ok(namespace) => {
                self.page.namespace = namespace;
                if namespace != 0 && self.options.skip_non_article_namespaces {
                    tracing::debug!(
                        message = "skipping non-article page",
                        title = self.page.title.as_str(),
                        namespace
                    );
                    self.diagnostics.skipped_pages += 1;
                    self.enter(ScanState::SkipToPageClose);
                } else {
                    self.enter(ScanState::PageIdOpen);
                }
                Ok(Some(ScanEvent::FieldReady(Field::Namespace)))
            }
            Err(reason) => self.malformed_page(Field::Namespace, reason),
        }
    }

    fn close_page_id(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        match parse_id(payload(&self.field, tags::ID_CLOSE)?) {
            Ok(page_id) => {
                self.page.page_id = page_id;
                self.enter(ScanState::RevisionOuter);
                Ok(Some(ScanEvent::FieldReady(Field::PageId)))
            }
            Err(reason) => self.malformed_page(Field::PageId, reason),
        }
    }

    fn begin_revision(&mut self) {
        let slot = &mut self.current;
        slot.status = RevisionStatus::Usable;
        slot.raw.clear();
        if self.options.capture_raw {
            slot.raw.extend_from_slice(tags::REVISION_OPEN);
        }
        slot.text.clear();

        let record = &mut slot.record;
        record.page_id = self.page.page_id;
        record.namespace = self.page.namespace;
        record.page_title.clone_from(&self.page.title);
        record.revision_id = 0;
        record.parent_id = None;
        record.timestamp = DateTime::default();
        record.contributor = None;
        record.comment = None;
        record.text.clear();
        record.text_len = 0;

        self.enter(ScanState::RevisionIdOpen);
    }

    fn close_revision_id(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        match parse_id(payload(&self.field, tags::ID_CLOSE)?) {
            Ok(id) => self.current.record.revision_id = id,
            Err(reason) => self.malformed_revision(Field::RevisionId, reason)?,
        }
        self.enter(ScanState::ParentIdOrTimestamp);
        Ok(Some(ScanEvent::FieldReady(Field::RevisionId)))
    }

    fn close_parent_id(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        match parse_id(payload(&self.field, tags::PARENT_ID_CLOSE)?) {
            Ok(id) => self.current.record.parent_id = Some(id),
            Err(reason) => self.malformed_revision(Field::ParentId, reason)?,
        }
        self.enter(ScanState::TimestampOpen);
        Ok(Some(ScanEvent::FieldReady(Field::ParentId)))
    }

    fn close_timestamp(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        match parse_timestamp(payload(&self.field, tags::TIMESTAMP_CLOSE)?) {
            Ok(timestamp) => {
                self.current.record.timestamp = timestamp;
                if !self.options.timestamp_window.contains(&timestamp) {
                    self.current.mark(RevisionStatus::Filtered);
                }
            }
            Err(reason) => self.malformed_revision(Field::Timestamp, reason)?,
        }
        self.enter(ScanState::ContributorOrComment);
        Ok(Some(ScanEvent::FieldReady(Field::Timestamp)))
    }

    fn close_contributor(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        let contributor = parse_contributor(payload(&self.field, tags::CONTRIBUTOR_CLOSE)?);
        self.current.record.contributor = Some(contributor);
        self.enter(ScanState::CommentOrText);
        Ok(Some(ScanEvent::FieldReady(Field::Contributor)))
    }

    fn close_comment(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        let decoded = utf8(payload(&self.field, tags::COMMENT_CLOSE)?).map(|comment| {
            let (comment, ok) = unescape_lossy(comment);
            (CompactString::from(comment), ok)
        });
        match decoded {
            Ok((comment, ok)) => {
                if !ok {
                    self.diagnostics
                        .register_unescape_failure(Field::Comment, self.source.position());
                }
                self.current.record.comment = Some(comment);
            }
            Err(reason) => self.malformed_revision(Field::Comment, reason)?,
        }
        self.enter(ScanState::TextOpen);
        Ok(Some(ScanEvent::FieldReady(Field::Comment)))
    }

    fn close_text(&mut self) -> Result<Option<ScanEvent>, ExtractionError> {
        if !self.field.swap_payload(tags::TEXT_CLOSE, &mut self.current.text) {
            return Err(ExtractionError::InternalBufferInvariant(
                "text buffer does not end with its closing marker",
            ));
        }
        self.current.record.text_len = self.current.text.len();

        if self.options.retain_text {
            match utf8(&self.current.text) {
                Ok(text) => {
                    let (text, ok) = unescape_lossy(text);
                    self.current.record.text.push_str(&text);
                    if !ok {
                        self.diagnostics
                            .register_unescape_failure(Field::Text, self.source.position());
                    }
                }
                Err(reason) => self.malformed_revision(Field::Text, reason)?,
            }
        }

        self.enter(ScanState::RevisionClose);
        Ok(Some(ScanEvent::FieldReady(Field::Text)))
    }

    fn complete_revision(&mut self) -> ScanEvent {
        self.diagnostics.revisions += 1;
        match self.current.status {
            RevisionStatus::Usable => {}
            RevisionStatus::Filtered => self.diagnostics.filtered_revisions += 1,
            RevisionStatus::Malformed => self.diagnostics.malformed_revisions += 1,
        }

        // keep both allocations alive, the next revision reuses the older one
        mem::swap(&mut self.current, &mut self.completed);
        self.enter(ScanState::RevisionOrPageClose);
        ScanEvent::RevisionComplete
    }
}
