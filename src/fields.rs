//! Field buffers and the conversion of buffered field bytes into typed values.

use std::borrow::Cow;

use chrono::{DateTime, NaiveDateTime, Utc};
use compact_str::CompactString;
use memchr::memmem;

// Source: https://github.com/mediawiki-utilities/python-mwtypes/blob/523a93f98fe1372938fc15872b5abb1f267cc643/mwtypes/timestamp.py#L12
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    PageTitle,
    Namespace,
    PageId,
    RevisionId,
    ParentId,
    Timestamp,
    Contributor,
    Comment,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Reason {
    #[error("field is empty")]
    Empty,
    #[error("unexpected byte {0:#04x}")]
    UnexpectedByte(u8),
    #[error("number out of range")]
    OutOfRange,
    #[error("invalid UTF-8")]
    NonUtf8,
    #[error("invalid timestamp")]
    Timestamp(#[from] chrono::ParseError),
}

/// A field whose bytes could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {field:?} field at offset {offset}: {reason}")]
pub struct MalformedField {
    pub field: Field,
    /// Offset of the field's closing marker.
    pub offset: u64,
    #[source]
    pub reason: Reason,
}

/// Collects the bytes of one field.
///
/// Every byte consumed while the field is open is pushed, including the bytes of the
/// closing marker, because the marker is only recognized once its last byte has been
/// seen. [`FieldBuffer::payload`] strips the marker again.
#[derive(Debug, Default)]
pub struct FieldBuffer {
    bytes: Vec<u8>,
}

impl FieldBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    #[inline]
    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Moves the field content without the trailing `closing` marker into `out`, handing
    /// `out`'s previous allocation to this buffer. Returns `false` (and leaves both
    /// untouched) if the buffer does not end with the marker.
    pub fn swap_payload(&mut self, closing: &[u8], out: &mut Vec<u8>) -> bool {
        if !self.bytes.ends_with(closing) {
            return false;
        }
        self.bytes.truncate(self.bytes.len() - closing.len());
        std::mem::swap(&mut self.bytes, out);
        self.bytes.clear();
        true
    }

    /// The field content without the trailing `closing` marker. `None` if the buffer does
    /// not end with the marker.
    pub fn payload(&self, closing: &[u8]) -> Option<&[u8]> {
        self.bytes.strip_suffix(closing)
    }
}

pub fn parse_id(bytes: &[u8]) -> Result<u64, Reason> {
    if bytes.is_empty() {
        return Err(Reason::Empty);
    }
    bytes.iter().try_fold(0u64, |acc, byte| {
        if !byte.is_ascii_digit() {
            return Err(Reason::UnexpectedByte(*byte));
        }
        acc.checked_mul(10)
            .and_then(|acc| acc.checked_add(u64::from(byte - b'0')))
            .ok_or(Reason::OutOfRange)
    })
}

pub fn parse_namespace(bytes: &[u8]) -> Result<i32, Reason> {
    let (negative, digits) = match bytes.split_first() {
        Some((&b'-', rest)) => (true, rest),
        _ => (false, bytes),
    };
    let magnitude = parse_id(digits)?;
    let value = if negative {
        -i64::try_from(magnitude).map_err(|_| Reason::OutOfRange)?
    } else {
        i64::try_from(magnitude).map_err(|_| Reason::OutOfRange)?
    };
    i32::try_from(value).map_err(|_| Reason::OutOfRange)
}

pub fn parse_timestamp(bytes: &[u8]) -> Result<DateTime<Utc>, Reason> {
    let text = utf8(bytes)?;
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)?;
    Ok(naive.and_utc())
}

pub fn utf8(bytes: &[u8]) -> Result<&str, Reason> {
    std::str::from_utf8(bytes).map_err(|_| Reason::NonUtf8)
}

/// Resolves XML entities. Text with broken entities is returned unchanged together with
/// `false`.
pub fn unescape_lossy(text: &str) -> (Cow<'_, str>, bool) {
    match quick_xml::escape::unescape(text) {
        Ok(unescaped) => (unescaped, true),
        Err(_) => (Cow::Borrowed(text), false),
    }
}

/// Half-open `[start, end)` range of accepted revision timestamps. Missing bounds are
/// unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampWindow {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimestampWindow {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| *timestamp >= start)
            && self.end.map_or(true, |end| *timestamp < end)
    }
}

// aka. user
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Contributor {
    pub username: Option<CompactString>,
    pub id: Option<u64>,
    /// set for anonymous edits instead of username and id
    pub ip: Option<CompactString>,
}

fn element<'a>(body: &'a [u8], open: &[u8], close: &[u8]) -> Option<&'a [u8]> {
    let start = memmem::find(body, open)? + open.len();
    let len = memmem::find(&body[start..], close)?;
    Some(&body[start..start + len])
}

fn element_text(body: &[u8], open: &[u8], close: &[u8]) -> Option<CompactString> {
    let text = utf8(element(body, open, close)?).ok()?;
    Some(CompactString::from(unescape_lossy(text).0))
}

/// Reads the children of a `<contributor>` element. Unknown or broken children are ignored.
pub fn parse_contributor(body: &[u8]) -> Contributor {
    let id = element(body, b"<id>", b"</id>").and_then(|id| match parse_id(id) {
        Ok(id) => Some(id),
        Err(reason) => {
            tracing::warn!(
                message = "Found invalid contributor id",
                id = String::from_utf8_lossy(id).as_ref(),
                %reason
            );
            None
        }
    });

    Contributor {
        username: element_text(body, b"<username>", b"</username>"),
        id,
        ip: element_text(body, b"<ip>", b"</ip>"),
    }
}
