//! # Content Index
//!
//! The per-resource bookkeeping of which byte ranges are present in the
//! content store. Pure data structure: no I/O and no locking, the owning
//! [`Resource`](crate::Resource) serializes access to it.
//!
//! Stored ranges are kept sorted by offset, non-overlapping, and maximally
//! merged: two ranges that touch are always collapsed into one.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::range::{ByteSpan, ContentRange};

/// One entry of a read plan: a sub-span of a request and where its bytes
/// come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSpan {
    pub span: ByteSpan,
    pub cached: bool,
}

/// Ordered set of cached ranges for one resource plus the origin facts that
/// qualify them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentIndex {
    ranges: Vec<ContentRange>,
    /// Total content length reported by the origin, once known
    total_length: Option<u64>,
    /// ETag or Last-Modified value the cached bytes were fetched under
    validator: Option<String>,
    /// Content type reported by the origin
    content_type: Option<String>,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ranges(&self) -> &[ContentRange] {
        &self.ranges
    }

    pub fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    pub fn validator(&self) -> Option<&str> {
        self.validator.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of bytes covered by stored ranges
    pub fn cached_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    /// True when every byte of the resource is cached
    pub fn is_complete(&self) -> bool {
        match self.total_length {
            Some(0) => true,
            Some(total) => {
                self.ranges.len() == 1 && self.ranges[0].offset == 0 && self.ranges[0].end() == total
            }
            None => false,
        }
    }

    /// Record the total length reported by the origin.
    ///
    /// A different length than the one already recorded means the origin
    /// content changed underneath us.
    pub fn set_total_length(&mut self, total: u64) -> Result<()> {
        match self.total_length {
            Some(known) if known != total => Err(CacheError::protocol(format!(
                "content length changed from {known} to {total}"
            ))),
            _ => {
                if let Some(last) = self.ranges.last() {
                    if last.end() > total {
                        return Err(CacheError::protocol(format!(
                            "cached range ends at {} beyond reported length {total}",
                            last.end()
                        )));
                    }
                }
                self.total_length = Some(total);
                Ok(())
            }
        }
    }

    pub fn set_validator(&mut self, validator: Option<String>) {
        self.validator = validator;
    }

    pub fn set_content_type(&mut self, content_type: Option<String>) {
        if content_type.is_some() {
            self.content_type = content_type;
        }
    }

    /// Partition `request` against the stored ranges.
    ///
    /// The returned spans alternate between cached and uncovered, are in
    /// ascending order, and cover the (length-clamped) request exactly. When
    /// the total length is unknown and the request is open-ended, the final
    /// uncovered span is left open-ended as well.
    pub fn covered_spans(&self, request: ByteSpan) -> Vec<PlannedSpan> {
        let request = match self.total_length {
            Some(total) => request.clamp_to(total),
            None => request,
        };
        if request.is_empty() {
            return Vec::new();
        }

        let mut plan = Vec::new();
        let mut cursor = request.offset;
        let end = request.end();

        let first = self.ranges.partition_point(|r| r.end() <= cursor);
        for range in &self.ranges[first..] {
            if end.is_some_and(|end| range.offset >= end) {
                break;
            }
            if range.offset > cursor {
                plan.push(PlannedSpan {
                    span: ByteSpan::new(cursor, Some(range.offset - cursor)),
                    cached: false,
                });
                cursor = range.offset;
            }
            let cached_end = end.map_or(range.end(), |end| end.min(range.end()));
            plan.push(PlannedSpan {
                span: ByteSpan::new(cursor, Some(cached_end - cursor)),
                cached: true,
            });
            cursor = cached_end;
        }

        match end {
            Some(end) if cursor < end => plan.push(PlannedSpan {
                span: ByteSpan::new(cursor, Some(end - cursor)),
                cached: false,
            }),
            Some(_) => {}
            None => plan.push(PlannedSpan {
                span: ByteSpan::open(cursor),
                cached: false,
            }),
        }

        plan
    }

    /// The stored range containing `position`, if any.
    pub fn cached_extent(&self, position: u64) -> Option<ContentRange> {
        let idx = self.ranges.partition_point(|r| r.end() <= position);
        self.ranges
            .get(idx)
            .filter(|r| r.contains(position))
            .copied()
    }

    /// Start of the first stored range beginning after `position`.
    pub fn next_cached_start(&self, position: u64) -> Option<u64> {
        let idx = self.ranges.partition_point(|r| r.offset <= position);
        self.ranges.get(idx).map(|r| r.offset)
    }

    /// True when `range` is entirely covered by a single stored range.
    pub fn covers(&self, range: &ContentRange) -> bool {
        self.cached_extent(range.offset)
            .is_some_and(|extent| extent.end() >= range.end())
    }

    /// The parts of `range` that are already stored.
    pub fn overlapping(&self, range: &ContentRange) -> Vec<ContentRange> {
        let first = self.ranges.partition_point(|r| r.end() <= range.offset);
        self.ranges[first..]
            .iter()
            .take_while(|r| r.offset < range.end())
            .filter_map(|r| r.intersection(range))
            .collect()
    }

    /// Insert a newly stored range, merging with every range it overlaps or
    /// touches.
    ///
    /// Byte equality of overlapping parts is checked by the caller, which
    /// owns the bytes; the index only refuses ranges that cannot belong to
    /// the resource.
    pub fn insert(&mut self, range: ContentRange) -> Result<()> {
        if range.length == 0 {
            return Err(CacheError::InvalidRange(format!(
                "zero-length range at offset {}",
                range.offset
            )));
        }
        if let Some(total) = self.total_length {
            if range.end() > total {
                return Err(CacheError::protocol(format!(
                    "range [{}, {}) exceeds content length {total}",
                    range.offset,
                    range.end()
                )));
            }
        }

        let first = self.ranges.partition_point(|r| r.end() < range.offset);
        let last = self.ranges.partition_point(|r| r.offset <= range.end());

        let mut start = range.offset;
        let mut end = range.end();
        if first < last {
            start = start.min(self.ranges[first].offset);
            end = end.max(self.ranges[last - 1].end());
        }

        self.ranges.splice(
            first..last,
            std::iter::once(ContentRange {
                offset: start,
                length: end - start,
            }),
        );
        Ok(())
    }

    /// Drop every stored range and the origin facts qualifying them.
    pub fn invalidate(&mut self) {
        self.ranges.clear();
        self.total_length = None;
        self.validator = None;
        self.content_type = None;
    }

    /// Rebuild the sort and merge invariants of a deserialized index,
    /// dropping anything past `physical_len` bytes of stored data.
    pub(crate) fn normalized(self, physical_len: u64) -> Self {
        let mut index = ContentIndex {
            ranges: Vec::with_capacity(self.ranges.len()),
            total_length: self.total_length,
            validator: self.validator,
            content_type: self.content_type,
        };
        for range in self.ranges {
            let end = range.end().min(physical_len);
            if let Some(total) = index.total_length {
                if end > total {
                    continue;
                }
            }
            if let Ok(clipped) = ContentRange::from_bounds(range.offset, end) {
                // bounds already checked against total_length
                let _ = index.insert(clipped);
            }
        }
        index
    }
}
