//! Pull-based byte access over a large read-ahead buffer.

use std::{
    fmt::Debug,
    io::{self, Read, Seek, SeekFrom},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    time::Duration,
};

/// Something that must hear from us regularly while a read blocks, e.g. a job supervisor.
pub trait Liveness: Send + Sync {
    fn ping(&self);
}

impl<F: Fn() + Send + Sync> Liveness for F {
    fn ping(&self) {
        self()
    }
}

/// Liveness target that only writes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLiveness;

impl Liveness for LogLiveness {
    fn ping(&self) {
        tracing::info!(message = "still waiting for input");
    }
}

/// Sleep for `pause` after every `every_refills` buffer refills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooperativeYield {
    pub every_refills: u64,
    pub pause: Duration,
}

#[derive(Clone)]
pub struct SourceConfig {
    pub buffer_bytes: usize,
    pub liveness: Option<Arc<dyn Liveness>>,
    pub ping_interval: Duration,
    pub cooperative_yield: Option<CooperativeYield>,
}

impl Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("buffer_bytes", &self.buffer_bytes)
            .field("liveness", &self.liveness.is_some())
            .field("ping_interval", &self.ping_interval)
            .field("cooperative_yield", &self.cooperative_yield)
            .finish()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 128 * 1024 * 1024,
            liveness: None,
            ping_interval: Duration::from_secs(300),
            cooperative_yield: Some(CooperativeYield {
                every_refills: 10,
                pause: Duration::from_millis(500),
            }),
        }
    }
}

/// Cancels a [`ChunkedSource`] from anywhere, including other threads.
///
/// The source notices the request the next time its buffer runs dry.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct ChunkedSource<R> {
    inner: Option<R>,
    buf: Vec<u8>,
    head: usize,
    tail: usize,
    /// logical offset of `buf[head]` in the (decompressed) stream
    position: u64,
    refills: u64,
    config: SourceConfig,
    close_handle: CloseHandle,
}

impl<R> Debug for ChunkedSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedSource")
            .field("inner", &std::any::type_name::<R>())
            .field("buf.len", &self.buf.len())
            .field("buffered", &(self.tail - self.head))
            .field("position", &self.position)
            .field("refills", &self.refills)
            .field("closed", &self.close_handle.is_closed())
            .finish()
    }
}

impl<R: Read> ChunkedSource<R> {
    /// Wraps a stream whose next byte sits at logical offset `position`.
    pub fn new(inner: R, position: u64, config: SourceConfig) -> Self {
        let buffer_bytes = config.buffer_bytes.max(1);
        Self {
            inner: Some(inner),
            buf: vec![0; buffer_bytes],
            head: 0,
            tail: 0,
            position,
            refills: 0,
            config,
            close_handle: CloseHandle::default(),
        }
    }

    /// Positions a non-seekable (compressed) stream at `start` by reading and discarding
    /// exactly `start` bytes. Liveness pings continue while discarding.
    ///
    /// A stream shorter than `start` leaves the source exhausted at its end.
    #[tracing::instrument(level = "debug", skip(inner, config))]
    pub fn skipping(inner: R, start: u64, config: SourceConfig) -> io::Result<Self> {
        let mut source = Self::new(inner, 0, config);
        while source.position < start {
            if source.head == source.tail && !source.refill()? {
                tracing::debug!(
                    message = "stream ended before split start",
                    position = source.position,
                    start
                );
                break;
            }
            let discard = (source.tail - source.head).min((start - source.position) as usize);
            source.head += discard;
            source.position += discard as u64;
        }
        Ok(source)
    }

    /// Logical offset of the next byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn refills(&self) -> u64 {
        self.refills
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Discards buffered data and releases the underlying stream. Every later read reports
    /// end of stream.
    pub fn close(&mut self) {
        self.close_handle.close();
        self.release();
    }

    pub fn is_closed(&self) -> bool {
        self.close_handle.is_closed()
    }

    fn release(&mut self) {
        self.head = self.tail;
        self.inner = None;
    }

    /// Returns the next byte, or `None` at end of stream.
    #[inline]
    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.head < self.tail {
            let byte = self.buf[self.head];
            self.head += 1;
            self.position += 1;
            return Ok(Some(byte));
        }
        self.next_byte_slow()
    }

    #[cold]
    fn next_byte_slow(&mut self) -> io::Result<Option<u8>> {
        if !self.refill()? {
            return Ok(None);
        }
        self.next_byte()
    }

    /// Consumes bytes up to (not including) the next occurrence of `needle`, without
    /// consuming anything at or beyond offset `limit`.
    ///
    /// Returns `true` if the next byte is `needle`, `false` if `limit` or the end of the
    /// stream was reached first.
    pub fn skip_to(&mut self, needle: u8, limit: u64) -> io::Result<bool> {
        loop {
            if self.position >= limit {
                return Ok(false);
            }
            if self.head == self.tail && !self.refill()? {
                return Ok(false);
            }

            let until_limit = usize::try_from(limit - self.position).unwrap_or(usize::MAX);
            let window_end = self.tail.min(self.head.saturating_add(until_limit));
            match memchr::memchr(needle, &self.buf[self.head..window_end]) {
                Some(offset) => {
                    self.head += offset;
                    self.position += offset as u64;
                    return Ok(true);
                }
                None => {
                    self.position += (window_end - self.head) as u64;
                    self.head = window_end;
                }
            }
        }
    }

    /// Refills the buffer. Returns `false` at end of stream or once closed.
    fn refill(&mut self) -> io::Result<bool> {
        if self.close_handle.is_closed() {
            self.release();
            return Ok(false);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(false);
        };

        self.refills += 1;
        if let Some(cooperative) = self.config.cooperative_yield {
            if cooperative.every_refills > 0 && self.refills % cooperative.every_refills == 0 {
                std::thread::sleep(cooperative.pause);
            }
        }

        let read = read_with_liveness(
            inner,
            &mut self.buf,
            self.config.liveness.as_deref(),
            self.config.ping_interval,
        )?;
        tracing::debug!(message = "buffer refilled", bytes = read, position = self.position);

        self.head = 0;
        self.tail = read;
        if read == 0 {
            self.inner = None;
            return Ok(false);
        }
        Ok(true)
    }
}

impl<R: Read + Seek> ChunkedSource<R> {
    /// Seeks an uncompressed stream directly to `start`.
    pub fn seeking(mut inner: R, start: u64, config: SourceConfig) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self::new(inner, start, config))
    }
}

impl<R: Read + Send + 'static> ChunkedSource<R> {
    /// Erases the stream type, keeping position and buffered bytes.
    pub fn boxed(self) -> ChunkedSource<Box<dyn Read + Send>> {
        ChunkedSource {
            inner: self
                .inner
                .map(|inner| Box::new(inner) as Box<dyn Read + Send>),
            buf: self.buf,
            head: self.head,
            tail: self.tail,
            position: self.position,
            refills: self.refills,
            config: self.config,
            close_handle: self.close_handle,
        }
    }
}

fn read_retrying<R: Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match inner.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Reads once. While the read blocks, a scoped thread pings `liveness` every `interval`;
/// the thread is stopped and joined before this function returns, on every path.
fn read_with_liveness<R: Read>(
    inner: &mut R,
    buf: &mut [u8],
    liveness: Option<&dyn Liveness>,
    interval: Duration,
) -> io::Result<usize> {
    let Some(liveness) = liveness else {
        return read_retrying(inner, buf);
    };

    std::thread::scope(|scope| {
        let (done, finished) = mpsc::channel::<()>();
        scope.spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(interval) {
                liveness.ping();
            }
        });

        // `done` is dropped when this closure returns or unwinds, which ends the pinger
        let _done = done;
        read_retrying(inner, buf)
    })
}
