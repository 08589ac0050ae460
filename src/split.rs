//! Byte-range splits of a dump and the rules deciding which split owns which page.
//!
//! A page belongs to the split whose `[start, end)` range contains the offset of the first
//! byte of its `<page>` marker. The owning split reads the page to its end, however far
//! past `end` that is, and no other split ever starts it. Hence every page of a dump is
//! extracted by exactly one of a set of contiguous, non-overlapping splits covering it.

use std::{io::Read, path::PathBuf};

use crate::dump_parser::{ExtractionError, RevisionScanner, ScanEvent};

/// A contiguous byte range of one source file, in logical (decompressed) offsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Split {
    pub path: PathBuf,
    pub start: u64,
    pub end: u64,
    /// Compressed sources cannot seek and are positioned by skipping.
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("split start {start} lies after its end {end}")]
pub struct InvalidSplit {
    pub start: u64,
    pub end: u64,
}

impl Split {
    pub fn new(
        path: impl Into<PathBuf>,
        start: u64,
        end: u64,
        compressed: bool,
    ) -> Result<Self, InvalidSplit> {
        if start > end {
            return Err(InvalidSplit { start, end });
        }
        Ok(Self {
            path: path.into(),
            start,
            end,
            compressed,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Cuts `[0, total_len)` into `parts` contiguous splits of (almost) equal length.
    pub fn partition(
        path: impl Into<PathBuf>,
        total_len: u64,
        parts: u64,
        compressed: bool,
    ) -> Vec<Split> {
        let path = path.into();
        let parts = parts.max(1);
        let base = total_len / parts;
        let remainder = total_len % parts;

        let mut start = 0;
        (0..parts)
            .map(|index| {
                let len = base + u64::from(index < remainder);
                let split = Split {
                    path: path.clone(),
                    start,
                    end: start + len,
                    compressed,
                };
                start += len;
                split
            })
            .collect()
    }
}

/// Decides, from the cursor position, whether a split still has work to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitGovernor {
    start: u64,
    end: u64,
}

impl SplitGovernor {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Governs an entire stream.
    pub fn unbounded() -> Self {
        Self::new(0, u64::MAX)
    }

    pub fn for_split(split: &Split) -> Self {
        Self::new(split.start, split.end)
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn has_more_input(&self, cursor: u64) -> bool {
        cursor < self.end
    }

    /// Whether a page whose `<page>` marker starts at `marker_start` belongs to this split.
    pub fn admits_page_at(&self, marker_start: u64) -> bool {
        marker_start < self.end
    }

    pub fn progress(&self, cursor: u64) -> f32 {
        if self.end <= self.start {
            return 1.0;
        }
        let done = cursor.saturating_sub(self.start) as f64 / (self.end - self.start) as f64;
        done.clamp(0.0, 1.0) as f32
    }
}

/// Result of looking ahead for the next page or revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookahead {
    Next,
    /// The enclosing page closed first.
    PageEnd,
    Exhausted,
}

impl<R: Read> RevisionScanner<R> {
    /// Scans forward to the next page owned by this split. Events of a page that is still
    /// open are discarded.
    pub fn has_next_page(&mut self) -> Result<bool, ExtractionError> {
        loop {
            match self.advance()? {
                ScanEvent::PageOpened => return Ok(true),
                ScanEvent::Exhausted => return Ok(false),
                _ => {}
            }
        }
    }

    /// Called after [`ScanEvent::RevisionComplete`]: scans up to the next `<revision>` or
    /// `</page>` to tell whether the completed revision was the last one of its page.
    ///
    /// The completed revision stays available through [`RevisionScanner::completed`].
    pub fn has_next_revision(&mut self) -> Result<Lookahead, ExtractionError> {
        match self.advance()? {
            ScanEvent::RevisionOpened => Ok(Lookahead::Next),
            ScanEvent::PageClosed => Ok(Lookahead::PageEnd),
            ScanEvent::Exhausted => Ok(Lookahead::Exhausted),
            _ => Err(ExtractionError::InternalBufferInvariant(
                "revision lookahead started inside a revision",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dump_parser::ScanOptions, test_support::prelude::*};

    #[test]
    fn rejects_inverted_range() {
        assert_eq!(
            Split::new("dump.xml", 10, 5, false),
            Err(InvalidSplit { start: 10, end: 5 })
        );
        assert!(Split::new("dump.xml", 5, 5, false).unwrap().is_empty());
    }

    #[test]
    fn progress_is_clamped() {
        let governor = SplitGovernor::new(100, 200);
        assert_eq!(governor.progress(0), 0.0);
        assert_eq!(governor.progress(150), 0.5);
        assert_eq!(governor.progress(400), 1.0);
        assert_eq!(SplitGovernor::new(5, 5).progress(5), 1.0);
    }

    #[test]
    fn page_marker_straddling_end_belongs_to_split() {
        let governor = SplitGovernor::new(0, 10);
        assert!(governor.admits_page_at(9));
        assert!(!governor.admits_page_at(10));
        assert!(!governor.has_more_input(10));
    }

    #[test]
    fn lookahead_reports_last_revision() {
        let dump = dump_to_xml(&[sample_page(1, "Alpha", 0, 2), sample_page(2, "Beta", 0, 1)]);
        let mut scanner = scanner_over(dump, ScanOptions::default());

        assert!(scanner.has_next_page().unwrap());
        let mut lookaheads = Vec::new();
        loop {
            match scanner.advance().unwrap() {
                ScanEvent::RevisionComplete => {
                    let revision_id = scanner.completed().record.revision_id;
                    let lookahead = scanner.has_next_revision().unwrap();
                    // the completed revision survives the lookahead
                    assert_eq!(scanner.completed().record.revision_id, revision_id);
                    lookaheads.push(lookahead);
                }
                ScanEvent::Exhausted => break,
                _ => {}
            }
        }
        assert_eq!(
            lookaheads,
            vec![Lookahead::Next, Lookahead::PageEnd, Lookahead::PageEnd]
        );
    }

    #[test]
    fn has_next_page_stops_at_split_end() {
        let dump = dump_to_xml(&[sample_page(1, "Alpha", 0, 1), sample_page(2, "Beta", 0, 1)]);
        let second_page = memchr::memmem::rfind(&dump, b"<page>").unwrap() as u64;

        let mut scanner = scanner_over_range(dump.clone(), 0, second_page, ScanOptions::default());
        assert!(scanner.has_next_page().unwrap());
        assert_eq!(scanner.page().meta.page_id, 0);
        assert!(!scanner.has_next_page().unwrap());

        let mut scanner =
            scanner_over_range(dump, second_page, second_page + 1, ScanOptions::default());
        assert!(scanner.has_next_page().unwrap());
        assert!(!scanner.has_next_page().unwrap());
    }

    proptest! {
        #[test]
        fn partition_covers_range(total_len in 0u64..10_000, parts in 1u64..50) {
            let splits = Split::partition("dump.xml", total_len, parts, false);
            prop_assert_eq!(splits.len() as u64, parts);
            prop_assert_eq!(splits[0].start, 0);
            prop_assert_eq!(splits.last().unwrap().end, total_len);
            for pair in splits.windows(2) {
                prop_assert_eq!(pair[0].end, pair[1].start);
                prop_assert!(pair[0].len() >= pair[1].len());
            }
        }
    }
}
