//! # Byte Ranges
//!
//! Half-open byte intervals used throughout the cache, plus the HTTP
//! `Range` / `Content-Range` helpers needed to talk to an origin.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// A half-open, non-empty byte interval `[offset, offset + length)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRange {
    pub offset: u64,
    pub length: u64,
}

impl ContentRange {
    /// Create a range, rejecting zero-length and overflowing intervals.
    pub fn new(offset: u64, length: u64) -> Result<Self> {
        if length == 0 {
            return Err(CacheError::InvalidRange(format!(
                "zero-length range at offset {offset}"
            )));
        }
        if offset.checked_add(length).is_none() {
            return Err(CacheError::InvalidRange(format!(
                "range {offset}+{length} overflows"
            )));
        }
        Ok(Self { offset, length })
    }

    /// Create a range from its half-open bounds.
    pub fn from_bounds(start: u64, end: u64) -> Result<Self> {
        if end <= start {
            return Err(CacheError::InvalidRange(format!(
                "empty range [{start}, {end})"
            )));
        }
        Ok(Self {
            offset: start,
            length: end - start,
        })
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    #[inline]
    pub fn contains(&self, position: u64) -> bool {
        position >= self.offset && position < self.end()
    }

    /// True when the two ranges share at least one byte.
    pub fn overlaps(&self, other: &ContentRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// True when the two ranges overlap or are directly adjacent.
    pub fn touches(&self, other: &ContentRange) -> bool {
        self.offset <= other.end() && other.offset <= self.end()
    }

    pub fn intersection(&self, other: &ContentRange) -> Option<ContentRange> {
        let start = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        (start < end).then(|| ContentRange {
            offset: start,
            length: end - start,
        })
    }
}

/// A requested span whose tail may be open-ended (read-to-end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteSpan {
    pub offset: u64,
    /// `None` means "until the end of the resource"
    pub length: Option<u64>,
}

impl ByteSpan {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    pub fn bounded(range: ContentRange) -> Self {
        Self {
            offset: range.offset,
            length: Some(range.length),
        }
    }

    pub fn open(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Exclusive end, if the span is bounded
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.offset.saturating_add(len))
    }

    pub fn is_open(&self) -> bool {
        self.length.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    /// Clamp the span to a now-known total length.
    pub fn clamp_to(&self, total_length: u64) -> ByteSpan {
        let end = self
            .end()
            .map_or(total_length, |end| end.min(total_length));
        ByteSpan {
            offset: self.offset,
            length: Some(end.saturating_sub(self.offset)),
        }
    }

    pub fn as_range(&self) -> Option<ContentRange> {
        match self.length {
            Some(len) if len > 0 => Some(ContentRange {
                offset: self.offset,
                length: len,
            }),
            _ => None,
        }
    }
}

/// Build an HTTP `Range` header value for a span.
pub fn range_header(span: &ByteSpan) -> String {
    match span.end() {
        Some(end) if end > span.offset => format!("bytes={}-{}", span.offset, end - 1),
        _ => format!("bytes={}-", span.offset),
    }
}

/// A parsed `Content-Range: bytes start-end/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRangeHeader {
    pub start: u64,
    /// Inclusive end
    pub end: u64,
    /// `None` when the origin answered `*`
    pub total: Option<u64>,
}

/// Parse a `Content-Range` response header.
pub fn parse_content_range(header: &str) -> Option<ContentRangeHeader> {
    let rest = header.trim().strip_prefix("bytes")?.trim_start();
    let (range_part, total_part) = rest.split_once('/')?;
    let (start, end) = range_part.trim().split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total_part.trim() {
        "*" => None,
        size => Some(size.parse().ok()?),
    };
    if let Some(total) = total {
        if end >= total {
            return None;
        }
    }
    Some(ContentRangeHeader { start, end, total })
}

/// Build a `Content-Range` header value for an outbound response.
pub fn build_content_range(start: u64, end_inclusive: u64, total: Option<u64>) -> String {
    match total {
        Some(total) => format!("bytes {start}-{end_inclusive}/{total}"),
        None => format!("bytes {start}-{end_inclusive}/*"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(
            ContentRange::new(10, 0),
            Err(CacheError::InvalidRange(_))
        ));
        assert!(ContentRange::from_bounds(5, 5).is_err());
        assert!(ContentRange::new(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_overlap_and_touch() {
        let a = ContentRange::new(0, 10).unwrap();
        let b = ContentRange::new(10, 5).unwrap();
        let c = ContentRange::new(5, 10).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
        assert!(a.overlaps(&c));
        assert_eq!(a.intersection(&c), Some(ContentRange::new(5, 5).unwrap()));
        assert_eq!(a.intersection(&b), None);
    }

    #[test]
    fn test_span_clamp() {
        let span = ByteSpan::open(100);
        assert_eq!(span.clamp_to(1000), ByteSpan::new(100, Some(900)));
        let span = ByteSpan::new(900, Some(500));
        assert_eq!(span.clamp_to(1000), ByteSpan::new(900, Some(100)));
        let span = ByteSpan::new(2000, Some(10));
        assert!(span.clamp_to(1000).is_empty());
    }

    #[test]
    fn test_range_header() {
        assert_eq!(range_header(&ByteSpan::new(0, Some(500))), "bytes=0-499");
        assert_eq!(range_header(&ByteSpan::open(500)), "bytes=500-");
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 0-499/1000"),
            Some(ContentRangeHeader {
                start: 0,
                end: 499,
                total: Some(1000)
            })
        );
        assert_eq!(
            parse_content_range("bytes 10-19/*"),
            Some(ContentRangeHeader {
                start: 10,
                end: 19,
                total: None
            })
        );
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("bytes 0-1000/1000"), None);
        assert_eq!(parse_content_range("items 0-1/2"), None);
    }

    #[test]
    fn test_build_content_range() {
        assert_eq!(build_content_range(0, 499, Some(1000)), "bytes 0-499/1000");
        assert_eq!(build_content_range(5, 9, None), "bytes 5-9/*");
    }
}
