//! The dump variants: what a [`SplitReader`](crate::reader::SplitReader) emits per page.
//!
//! | variant | key | value |
//! |---|---|---|
//! | [`FullRevisions`] | page id | every revision as a [`RevisionRecord`] |
//! | [`RevisionFragments`] | page id | every revision as a single-revision page fragment |
//! | [`AllPairs`] | page id | every revision paired with its predecessor |
//! | [`SampledPairs`] | page id | the last revisions of consecutive time buckets, paired |
//! | [`DiffPairs`] | page id | revisions that changed enough, paired (see [`crate::pairing`]) |
//!
//! Fragments are `<page>` elements holding the header bytes and revision bytes of the source
//! page, so they can be scanned again like a dump.

use std::mem;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use compact_str::CompactString;

use crate::{
    dump_parser::{RevisionRecord, ScanOptions},
    pairing::{
        Decision, LengthRatioScorer, PairPolicy, PairWindow, RevisionMeta, RevisionSlot,
        SimilarityScorer, SlotMeta,
    },
    reader::{DumpVariant, PageHeader, RevisionView},
    tag_matcher::PAGE_CLOSE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    /// Two revisions to be compared.
    Pair,
    /// One revision on its own.
    Single,
}

/// A synthetic page holding the header of the source page and one or two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageFragment {
    pub page_id: u64,
    pub title: CompactString,
    pub namespace: i32,
    pub kind: FragmentKind,
    /// In document order.
    pub revisions: Vec<RevisionMeta>,
    pub xml: Vec<u8>,
}

impl PageFragment {
    fn new(page: PageHeader<'_>, kind: FragmentKind) -> Self {
        Self {
            page_id: page.meta.page_id,
            title: page.meta.title.clone(),
            namespace: page.meta.namespace,
            kind,
            revisions: Vec::with_capacity(2),
            xml: page.raw.to_vec(),
        }
    }

    fn push(mut self, meta: RevisionMeta, raw: &[u8]) -> Self {
        self.revisions.push(meta);
        self.xml.extend_from_slice(raw);
        if !raw.ends_with(b"\n") {
            self.xml.push(b'\n');
        }
        self
    }

    fn push_slot(self, slot: &RevisionSlot<RevisionMeta>) -> Self {
        self.push(slot.meta.clone(), &slot.raw)
    }

    fn push_view(self, page: PageHeader<'_>, revision: RevisionView<'_>) -> Self {
        let mut meta = RevisionMeta::default();
        meta.load(page.meta, revision.record);
        self.push(meta, revision.raw)
    }

    fn close(mut self) -> (u64, PageFragment) {
        self.xml.extend_from_slice(PAGE_CLOSE);
        self.xml.push(b'\n');
        (self.page_id, self)
    }
}

fn capture_raw(options: &mut ScanOptions) {
    options.capture_raw = true;
}

/// Every revision with its parsed fields and decoded text.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullRevisions;

impl DumpVariant for FullRevisions {
    type Key = u64;
    type Value = RevisionRecord;

    fn configure(&self, options: &mut ScanOptions) {
        options.retain_text = true;
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(u64, RevisionRecord)> {
        Some((page.meta.page_id, revision.record.clone()))
    }
}

/// Every revision wrapped in its own page fragment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevisionFragments;

impl DumpVariant for RevisionFragments {
    type Key = u64;
    type Value = PageFragment;

    fn configure(&self, options: &mut ScanOptions) {
        capture_raw(options);
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(u64, PageFragment)> {
        Some(
            PageFragment::new(page, FragmentKind::Single)
                .push_view(page, revision)
                .close(),
        )
    }
}

/// Every revision paired with its predecessor. The first revision of a page is paired
/// with the beginning-of-page placeholder.
#[derive(Debug, Clone, Default)]
pub struct AllPairs {
    previous: RevisionSlot<RevisionMeta>,
}

impl DumpVariant for AllPairs {
    type Key = u64;
    type Value = PageFragment;

    fn configure(&self, options: &mut ScanOptions) {
        capture_raw(options);
    }

    fn begin_page(&mut self, page: PageHeader<'_>) {
        self.previous.load_beginning_of_page(page);
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(u64, PageFragment)> {
        let fragment = PageFragment::new(page, FragmentKind::Pair)
            .push_slot(&self.previous)
            .push_view(page, revision)
            .close();
        self.previous.load(page, revision);
        Some(fragment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeScale {
    Hour,
    Day,
    /// Weeks start on Monday.
    Week,
    Month,
}

impl TimeScale {
    /// Start of the bucket following the one `timestamp` falls into.
    pub fn bucket_end(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let date = timestamp.date_naive();
        let end = match self {
            TimeScale::Hour => date
                .and_hms_opt(timestamp.hour(), 0, 0)
                .and_then(|hour| hour.checked_add_signed(Duration::hours(1))),
            TimeScale::Day => date.succ_opt().and_then(midnight),
            TimeScale::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .and_then(|monday| monday.checked_add_days(Days::new(7)))
                .and_then(midnight),
            TimeScale::Month => {
                let (year, month) = match date.month() {
                    12 => (date.year() + 1, 1),
                    month => (date.year(), month + 1),
                };
                NaiveDate::from_ymd_opt(year, month, 1).and_then(midnight)
            }
        };
        end.map_or(DateTime::<Utc>::MAX_UTC, |end| end.and_utc())
    }
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

/// One pair per time bucket a page's history moves through: the last revision of the
/// previous bucket with the last revision of the current one.
#[derive(Debug, Clone)]
pub struct SampledPairs {
    scale: TimeScale,
    previous: RevisionSlot<RevisionMeta>,
    latest: RevisionSlot<RevisionMeta>,
    bucket_end: Option<DateTime<Utc>>,
}

impl SampledPairs {
    pub fn new(scale: TimeScale) -> Self {
        Self {
            scale,
            previous: RevisionSlot::default(),
            latest: RevisionSlot::default(),
            bucket_end: None,
        }
    }

    fn pair(&self, page: PageHeader<'_>) -> (u64, PageFragment) {
        PageFragment::new(page, FragmentKind::Pair)
            .push_slot(&self.previous)
            .push_slot(&self.latest)
            .close()
    }
}

impl DumpVariant for SampledPairs {
    type Key = u64;
    type Value = PageFragment;

    fn configure(&self, options: &mut ScanOptions) {
        capture_raw(options);
    }

    fn begin_page(&mut self, page: PageHeader<'_>) {
        self.previous.load_beginning_of_page(page);
        self.latest.reset();
        self.bucket_end = None;
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(u64, PageFragment)> {
        let bucket_end = self.scale.bucket_end(revision.record.timestamp);
        match self.bucket_end {
            Some(current) if bucket_end > current => {
                let fragment = self.pair(page);
                mem::swap(&mut self.previous, &mut self.latest);
                self.latest.load(page, revision);
                self.bucket_end = Some(bucket_end);
                Some(fragment)
            }
            Some(_) => {
                self.latest.load(page, revision);
                None
            }
            None => {
                self.latest.load(page, revision);
                self.bucket_end = Some(bucket_end);
                None
            }
        }
    }

    fn finish_page(&mut self, page: PageHeader<'_>) -> Option<(u64, PageFragment)> {
        self.bucket_end.take()?;
        Some(self.pair(page))
    }
}

/// Pairs of revisions that differ enough, as decided by a [`PairPolicy`]. The revision
/// left in the window at the end of a page is emitted on its own.
#[derive(Debug, Clone)]
pub struct DiffPairs<S = LengthRatioScorer> {
    policy: PairPolicy<S>,
    window: PairWindow<RevisionMeta>,
}

impl<S: SimilarityScorer> DiffPairs<S> {
    pub fn new(policy: PairPolicy<S>) -> Self {
        Self {
            policy,
            window: PairWindow::new(),
        }
    }
}

impl<S: SimilarityScorer> DumpVariant for DiffPairs<S> {
    type Key = u64;
    type Value = PageFragment;

    fn configure(&self, options: &mut ScanOptions) {
        capture_raw(options);
    }

    fn begin_page(&mut self, _page: PageHeader<'_>) {
        self.window.reset();
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(u64, PageFragment)> {
        let decision = self.window.decide(&self.policy, revision.text);
        tracing::trace!(
            message = "pairing decision",
            revision_id = revision.record.revision_id,
            decision = ?decision
        );

        let fragment = (decision == Decision::EmitPair).then(|| {
            PageFragment::new(page, FragmentKind::Pair)
                .push_slot(self.window.anchor())
                .push_view(page, revision)
                .close()
        });
        self.window.commit(decision, page, revision);
        fragment
    }

    fn finish_page(&mut self, page: PageHeader<'_>) -> Option<(u64, PageFragment)> {
        let last = self.window.finish()?;
        Some(
            PageFragment::new(page, FragmentKind::Single)
                .push_slot(last)
                .close(),
        )
    }
}
