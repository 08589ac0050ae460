//! The pull loop that turns scanner events into records of a dump variant.

use std::io::{self, Cursor, Read};

use crate::{
    byte_source::{ChunkedSource, CloseHandle},
    config::ExtractionConfig,
    dump_parser::{
        Diagnostics, ExtractionError, RevisionScanner, RevisionStatus, ScanEvent, ScanOptions,
        ScanState,
    },
    input::open_split,
    split::{Lookahead, Split, SplitGovernor},
};

pub use crate::dump_parser::{PageHeader, RevisionView};

/// What a reader makes of the pages and revisions it scans.
///
/// The reader calls [`DumpVariant::begin_page`] once a page header is complete,
/// [`DumpVariant::revision`] for every usable revision, and [`DumpVariant::finish_page`]
/// after the page closed. Views are only valid for the duration of the call.
pub trait DumpVariant {
    type Key;
    type Value;

    /// Requests the scanner features the variant relies on.
    fn configure(&self, options: &mut ScanOptions) {
        let _ = options;
    }

    fn begin_page(&mut self, page: PageHeader<'_>) {
        let _ = page;
    }

    fn revision(
        &mut self,
        page: PageHeader<'_>,
        revision: RevisionView<'_>,
    ) -> Option<(Self::Key, Self::Value)>;

    fn finish_page(&mut self, page: PageHeader<'_>) -> Option<(Self::Key, Self::Value)> {
        let _ = page;
        None
    }
}

/// Extracts the records of one split.
///
/// Iteration ends when no further page starts inside the split. An error ends it as well;
/// the error itself is the last item.
#[derive(Debug)]
pub struct SplitReader<R, V> {
    scanner: RevisionScanner<R>,
    variant: V,
    /// header of the current page is complete
    page_open: bool,
    /// the current page closed and still has to be finished
    closing_page: bool,
    done: bool,
}

impl<V: DumpVariant> SplitReader<Box<dyn Read + Send>, V> {
    /// Opens `split` and reads it with `variant`.
    #[tracing::instrument(level = "debug", skip(config, variant))]
    pub fn open(split: &Split, config: &ExtractionConfig, variant: V) -> io::Result<Self> {
        let source = open_split(split, config.source_config())?;
        Ok(Self::from_source(
            source,
            SplitGovernor::for_split(split),
            config,
            variant,
        ))
    }
}

impl<V: DumpVariant> SplitReader<Cursor<Vec<u8>>, V> {
    /// Reads an in-memory dump as one split.
    pub fn from_bytes(bytes: Vec<u8>, config: &ExtractionConfig, variant: V) -> Self {
        let source = ChunkedSource::new(Cursor::new(bytes), 0, config.source_config());
        Self::from_source(source, SplitGovernor::unbounded(), config, variant)
    }
}

impl<R: Read, V: DumpVariant> SplitReader<R, V> {
    /// `source` must be positioned at `governor.start()`.
    pub fn from_source(
        source: ChunkedSource<R>,
        governor: SplitGovernor,
        config: &ExtractionConfig,
        variant: V,
    ) -> Self {
        let mut options = config.scan_options();
        variant.configure(&mut options);
        Self {
            scanner: RevisionScanner::new(source, governor, options),
            variant,
            page_open: false,
            closing_page: false,
            done: false,
        }
    }

    pub fn progress(&self) -> f32 {
        if self.done {
            return 1.0;
        }
        self.scanner.progress()
    }

    pub fn position(&self) -> u64 {
        self.scanner.position()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.scanner.diagnostics()
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Stops the reader. Records of the page in progress are not produced.
    pub fn close(&mut self) {
        self.scanner.close();
        self.closing_page = false;
    }

    /// A handle that stops the reader from another thread at the next buffer refill.
    pub fn close_handle(&self) -> CloseHandle {
        self.scanner.close_handle()
    }

    /// Produces the next record, `Ok(None)` once the split is exhausted.
    pub fn next_record(&mut self) -> Result<Option<(V::Key, V::Value)>, ExtractionError> {
        loop {
            if self.closing_page {
                // the page ended on the previous call, possibly right after a record
                self.closing_page = false;
                if let Some(record) = self.variant.finish_page(self.scanner.page()) {
                    return Ok(Some(record));
                }
                continue;
            }

            match self.scanner.advance()? {
                ScanEvent::FieldReady(_) if !self.page_open => {
                    if self.scanner.state() == ScanState::RevisionOuter {
                        self.page_open = true;
                        self.variant.begin_page(self.scanner.page());
                    }
                }
                ScanEvent::RevisionComplete => {
                    match self.scanner.has_next_revision()? {
                        Lookahead::Next => {}
                        Lookahead::PageEnd => self.end_page(),
                        // only after close()
                        Lookahead::Exhausted => return Ok(None),
                    }

                    let revision = self.scanner.completed();
                    if revision.status != RevisionStatus::Usable {
                        continue;
                    }
                    if let Some(record) = self.variant.revision(self.scanner.page(), revision) {
                        return Ok(Some(record));
                    }
                }
                ScanEvent::PageClosed => self.end_page(),
                ScanEvent::Exhausted => return Ok(None),
                ScanEvent::PageOpened | ScanEvent::RevisionOpened | ScanEvent::FieldReady(_) => {}
            }
        }
    }

    fn end_page(&mut self) {
        // pages skipped or broken before their header completed are not finished
        self.closing_page = self.page_open;
        self.page_open = false;
    }
}

impl<R: Read, V: DumpVariant> Iterator for SplitReader<R, V> {
    type Item = Result<(V::Key, V::Value), ExtractionError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl<R: Read, V: DumpVariant> std::iter::FusedIterator for SplitReader<R, V> {}
