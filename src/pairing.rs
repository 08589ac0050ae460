//! Selection of revision pairs worth materializing.
//!
//! Consecutive revisions of a page are compared with a [`SimilarityScorer`]. Revisions that
//! barely differ from their predecessor are merged into it, revisions that differ a lot are
//! paired with the last revision that was kept, and everything in between just moves the
//! window forward. Whatever the window still holds when the page ends is flushed as a
//! single revision, so every page with at least one meaningful revision yields output.

use std::ops::Range;

use chrono::{DateTime, Utc};
use imara_diff::{intern::InternedInput, sources, Algorithm};

use crate::dump_parser::{PageHeader, PageMeta, RevisionRecord, RevisionView};

/// Placeholder revision that opens the pairing window of every page.
pub const BEGINNING_OF_PAGE: &[u8] = b"<revision beginningofpage=\"true\"><timestamp>1970-01-01T00:00:00Z</timestamp><text xml:space=\"preserve\"></text></revision>\n";

/// How different two revision texts are, from `0.0` (identical) upwards.
pub trait SimilarityScorer {
    fn score(&self, previous: &[u8], current: &[u8]) -> f32;
}

/// `|len(current) - len(previous)| / (len(current) + len(previous))`
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthRatioScorer;

impl SimilarityScorer for LengthRatioScorer {
    fn score(&self, previous: &[u8], current: &[u8]) -> f32 {
        let total = previous.len() + current.len();
        if total == 0 {
            return 0.0;
        }
        (previous.len().abs_diff(current.len()) as f64 / total as f64) as f32
    }
}

/// Fraction of lines touched by a histogram diff of the two texts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineDiffScorer;

impl SimilarityScorer for LineDiffScorer {
    fn score(&self, previous: &[u8], current: &[u8]) -> f32 {
        let input = InternedInput::new(sources::byte_lines(previous), sources::byte_lines(current));
        let total = input.before.len() + input.after.len();
        if total == 0 {
            return 0.0;
        }

        let mut changed = 0usize;
        imara_diff::diff(
            Algorithm::Histogram,
            &input,
            |before: Range<u32>, after: Range<u32>| {
                changed += (before.end - before.start) as usize + (after.end - after.start) as usize;
            },
        );
        (changed as f64 / total as f64) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Scores below are merged into the previous revision.
    pub lower: f32,
    /// Scores above are emitted as a pair.
    pub upper: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lower: 0.01,
            upper: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PairPolicy<S> {
    pub scorer: S,
    pub thresholds: Thresholds,
    /// Revisions after the first with a shorter (escaped) text are ignored.
    pub min_meaningful_bytes: usize,
}

impl<S: SimilarityScorer> PairPolicy<S> {
    pub fn new(scorer: S, thresholds: Thresholds, min_meaningful_bytes: usize) -> Self {
        Self {
            scorer,
            thresholds,
            min_meaningful_bytes,
        }
    }
}

/// Per-revision metadata kept alongside the buffered bytes of a window slot.
pub trait SlotMeta: Clone + Default {
    fn load(&mut self, page: &PageMeta, revision: &RevisionRecord);

    /// Metadata of the [`BEGINNING_OF_PAGE`] placeholder.
    fn beginning_of_page(page: &PageMeta) -> Self;

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RevisionMeta {
    pub page_id: u64,
    pub revision_id: u64,
    pub parent_id: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub text_len: usize,
    pub beginning_of_page: bool,
}

impl SlotMeta for RevisionMeta {
    fn load(&mut self, page: &PageMeta, revision: &RevisionRecord) {
        *self = RevisionMeta {
            page_id: page.page_id,
            revision_id: revision.revision_id,
            parent_id: revision.parent_id,
            timestamp: revision.timestamp,
            text_len: revision.text_len,
            beginning_of_page: false,
        };
    }

    fn beginning_of_page(page: &PageMeta) -> Self {
        RevisionMeta {
            page_id: page.page_id,
            beginning_of_page: true,
            ..RevisionMeta::default()
        }
    }
}

/// A buffered copy of one revision. Reloading a slot reuses its allocations.
#[derive(Debug, Clone, Default)]
pub struct RevisionSlot<M> {
    pub meta: M,
    /// `<revision>` through `</revision>`
    pub raw: Vec<u8>,
    /// escaped text payload
    pub text: Vec<u8>,
}

impl<M: SlotMeta> RevisionSlot<M> {
    pub fn load(&mut self, page: PageHeader<'_>, revision: RevisionView<'_>) {
        self.meta.load(page.meta, revision.record);
        self.raw.clear();
        self.raw.extend_from_slice(revision.raw);
        self.text.clear();
        self.text.extend_from_slice(revision.text);
    }

    pub fn load_beginning_of_page(&mut self, page: PageHeader<'_>) {
        self.meta = M::beginning_of_page(page.meta);
        self.raw.clear();
        self.raw.extend_from_slice(BEGINNING_OF_PAGE);
        self.text.clear();
    }

    pub fn reset(&mut self) {
        self.meta.reset();
        self.raw.clear();
        self.text.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Text shorter than the meaningful minimum, after the first revision.
    SkipSmall,
    /// First revision of the page.
    Seed,
    /// Too similar to the previous revision, replaces it.
    Merge,
    /// Neither similar nor different enough. Moves the window without output.
    Advance,
    /// Different enough: pair the anchor with this revision.
    EmitPair,
}

/// The two slots of one page's pairing state.
///
/// `anchor` is the last revision kept on its own merit and the left side of any emitted
/// pair. `baseline` is the revision the next one is scored against; it only differs from
/// the anchor after a merge.
#[derive(Debug, Clone, Default)]
pub struct PairWindow<M> {
    anchor: RevisionSlot<M>,
    baseline: RevisionSlot<M>,
    merged: bool,
    seeded: bool,
}

impl<M: SlotMeta> PairWindow<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the state of the previous page. Buffers are kept for reuse.
    pub fn reset(&mut self) {
        self.merged = false;
        self.seeded = false;
        self.anchor.reset();
        self.baseline.reset();
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn anchor(&self) -> &RevisionSlot<M> {
        &self.anchor
    }

    /// The slot the next revision is scored against.
    pub fn previous(&self) -> &RevisionSlot<M> {
        if self.merged {
            &self.baseline
        } else {
            &self.anchor
        }
    }

    /// Classifies a completed revision. Does not change the window, see
    /// [`PairWindow::commit`].
    pub fn decide<S: SimilarityScorer>(&self, policy: &PairPolicy<S>, text: &[u8]) -> Decision {
        // the first revision seeds the window whatever its size, so every page flushes one
        if !self.seeded {
            return Decision::Seed;
        }
        if text.len() < policy.min_meaningful_bytes {
            return Decision::SkipSmall;
        }

        let score = policy.scorer.score(&self.previous().text, text);
        if score < policy.thresholds.lower {
            Decision::Merge
        } else if score > policy.thresholds.upper {
            Decision::EmitPair
        } else {
            Decision::Advance
        }
    }

    pub fn commit(&mut self, decision: Decision, page: PageHeader<'_>, revision: RevisionView<'_>) {
        match decision {
            Decision::SkipSmall => {}
            Decision::Merge => {
                self.baseline.load(page, revision);
                self.merged = true;
            }
            Decision::Seed | Decision::Advance | Decision::EmitPair => {
                self.anchor.load(page, revision);
                self.merged = false;
                self.seeded = true;
            }
        }
    }

    /// Ends the page: returns the revision to flush on its own, if any.
    pub fn finish(&mut self) -> Option<&RevisionSlot<M>> {
        if !self.seeded {
            return None;
        }
        self.seeded = false;
        Some(if self.merged {
            &self.baseline
        } else {
            &self.anchor
        })
    }
}
