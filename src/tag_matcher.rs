//! Incremental matching of structural markers.
//!
//! The dump format only ever needs to distinguish a handful of fixed byte literals at any
//! given point of a page, so instead of tokenizing XML we race the few literals that may
//! legally come next against the byte stream, one byte at a time.

pub const PAGE_OPEN: &[u8] = b"<page>";
pub const PAGE_CLOSE: &[u8] = b"</page>";
pub const TITLE_OPEN: &[u8] = b"<title>";
pub const TITLE_CLOSE: &[u8] = b"</title>";
pub const NS_OPEN: &[u8] = b"<ns>";
pub const NS_CLOSE: &[u8] = b"</ns>";
pub const ID_OPEN: &[u8] = b"<id>";
pub const ID_CLOSE: &[u8] = b"</id>";
pub const REVISION_OPEN: &[u8] = b"<revision>";
pub const REVISION_CLOSE: &[u8] = b"</revision>";
pub const PARENT_ID_OPEN: &[u8] = b"<parentid>";
pub const PARENT_ID_CLOSE: &[u8] = b"</parentid>";
pub const TIMESTAMP_OPEN: &[u8] = b"<timestamp>";
pub const TIMESTAMP_CLOSE: &[u8] = b"</timestamp>";
pub const CONTRIBUTOR_OPEN: &[u8] = b"<contributor>";
pub const CONTRIBUTOR_CLOSE: &[u8] = b"</contributor>";
pub const COMMENT_OPEN: &[u8] = b"<comment>";
pub const COMMENT_CLOSE: &[u8] = b"</comment>";
/// Only the tag name: `<text>` carries attributes in real dumps, which are skipped up to `>`.
pub const TEXT_OPEN: &[u8] = b"<text";
pub const TEXT_CLOSE: &[u8] = b"</text>";

/// Outcome of feeding one byte into a [`TagRace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// At least one candidate is partially matched.
    Partial,
    /// The candidate with this index completed on this byte. The race is idle again.
    Matched(usize),
    /// No candidate is in progress.
    Reset,
}

/// Races up to 32 byte literals against a byte stream.
///
/// All candidates share a single progress counter; a bit mask records which candidates
/// are still consistent with the bytes seen since the current partial match started.
/// Candidates sharing a prefix therefore advance together and only separate on the first
/// byte where they differ.
///
/// The candidate set must be prefix-free and the first byte of a literal must not occur
/// anywhere else inside any literal of the set. Under these conditions a mismatch can only
/// ever restart a match at the mismatching byte itself, so no input is ever re-scanned.
#[derive(Debug, Clone)]
pub struct TagRace {
    candidates: &'static [&'static [u8]],
    progress: usize,
    live: u32,
}

impl TagRace {
    pub fn new(candidates: &'static [&'static [u8]]) -> Self {
        debug_assert!(candidates.len() <= 32);
        debug_assert!(is_well_formed(candidates), "ambiguous candidate set");

        Self {
            candidates,
            progress: 0,
            live: 0,
        }
    }

    /// Replaces the candidate set and forgets any partial match.
    pub fn rearm(&mut self, candidates: &'static [&'static [u8]]) {
        *self = Self::new(candidates);
    }

    pub fn candidates(&self) -> &'static [&'static [u8]] {
        self.candidates
    }

    /// Number of bytes of the current partial match.
    pub fn progress(&self) -> usize {
        self.progress
    }

    pub fn is_idle(&self) -> bool {
        self.progress == 0
    }

    #[inline]
    pub fn feed(&mut self, byte: u8) -> Step {
        if self.progress > 0 {
            let mut still_live = 0;
            for (index, literal) in self.candidates.iter().enumerate() {
                if self.live & (1 << index) != 0 && literal[self.progress] == byte {
                    still_live |= 1 << index;
                }
            }

            if still_live != 0 {
                self.live = still_live;
                self.progress += 1;
                return self.check_completion();
            }

            self.progress = 0;
            self.live = 0;
        }

        // idle or just reset: the current byte may start a new match
        for (index, literal) in self.candidates.iter().enumerate() {
            if literal[0] == byte {
                self.live |= 1 << index;
            }
        }
        if self.live == 0 {
            return Step::Reset;
        }
        self.progress = 1;
        self.check_completion()
    }

    fn check_completion(&mut self) -> Step {
        for (index, literal) in self.candidates.iter().enumerate() {
            if self.live & (1 << index) != 0 && literal.len() == self.progress {
                self.progress = 0;
                self.live = 0;
                return Step::Matched(index);
            }
        }
        Step::Partial
    }
}

fn is_well_formed(candidates: &[&[u8]]) -> bool {
    candidates.iter().enumerate().all(|(i, a)| {
        !a.is_empty()
            && candidates
                .iter()
                .all(|b| a[1..].iter().all(|byte| *byte != b[0]))
            && candidates
                .iter()
                .enumerate()
                .all(|(j, b)| i == j || !b.starts_with(a))
    })
}
