//! # Data Request
//!
//! What a player asked the local listener for: a resource and an optional
//! byte range taken from its `Range` header.

use url::Url;

use crate::error::{CacheError, Result};
use crate::identity::UrlConvertor;
use crate::range::ByteSpan;

/// A single-range `Range: bytes=...` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRange {
    /// `bytes=start-end` (inclusive end) or `bytes=start-`
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes
    Suffix(u64),
}

impl RequestRange {
    /// Parse a `Range` header value. Multi-range requests are not supported.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = || CacheError::InvalidRange(format!("unsupported Range header: {header}"));

        let set = header
            .trim()
            .strip_prefix("bytes=")
            .ok_or_else(invalid)?
            .trim();
        if set.contains(',') {
            return Err(invalid());
        }
        let (start, end) = set.split_once('-').ok_or_else(invalid)?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            let suffix: u64 = end.parse().map_err(|_| invalid())?;
            if suffix == 0 {
                return Err(invalid());
            }
            return Ok(Self::Suffix(suffix));
        }

        let start: u64 = start.parse().map_err(|_| invalid())?;
        let end = match end {
            "" => None,
            end => {
                let end: u64 = end.parse().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                Some(end)
            }
        };
        Ok(Self::From { start, end })
    }

    /// The span this range selects, given the resource length when known.
    ///
    /// Suffix ranges need the length; `None` is returned without it.
    pub fn to_span(self, total_length: Option<u64>) -> Option<ByteSpan> {
        match self {
            // a last-byte-pos may lie past the end of the resource
            Self::From { start, end } => Some(ByteSpan::new(
                start,
                end.map(|end| end.saturating_add(1) - start),
            )),
            Self::Suffix(n) => {
                let total = total_length?;
                let n = n.min(total);
                Some(ByteSpan::new(total - n, Some(n)))
            }
        }
    }
}

/// A player's request for (part of) a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    pub origin: Url,
    pub range: Option<RequestRange>,
}

impl DataRequest {
    pub fn new(origin: Url, range: Option<RequestRange>) -> Self {
        Self { origin, range }
    }

    /// Request for the whole resource.
    pub fn whole(origin: Url) -> Self {
        Self::new(origin, None)
    }

    /// Build a request from a proxy URL and the player's `Range` header.
    pub fn from_proxy(
        convertor: &dyn UrlConvertor,
        proxy: &Url,
        range_header: Option<&str>,
    ) -> Result<Self> {
        let origin = convertor
            .origin_url(proxy)
            .ok_or_else(|| CacheError::InvalidUrl(proxy.to_string()))?;
        let range = range_header.map(RequestRange::parse).transpose()?;
        Ok(Self { origin, range })
    }

    /// True when the player asked for a byte range.
    pub fn is_partial(&self) -> bool {
        self.range.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DefaultUrlConvertor;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(
            RequestRange::parse("bytes=0-499").unwrap(),
            RequestRange::From {
                start: 0,
                end: Some(499)
            }
        );
        assert_eq!(
            RequestRange::parse("bytes=500-").unwrap(),
            RequestRange::From {
                start: 500,
                end: None
            }
        );
        assert_eq!(
            RequestRange::parse(" bytes=-200 ").unwrap(),
            RequestRange::Suffix(200)
        );
    }

    #[test]
    fn test_parse_rejects_unsupported() {
        for header in [
            "items=0-1",
            "bytes=0-1,5-6",
            "bytes=9-3",
            "bytes=-0",
            "bytes=abc-",
            "bytes=-",
        ] {
            assert!(
                matches!(RequestRange::parse(header), Err(CacheError::InvalidRange(_))),
                "{header} should be rejected"
            );
        }
    }

    #[test]
    fn test_to_span() {
        let range = RequestRange::From {
            start: 10,
            end: Some(19),
        };
        assert_eq!(range.to_span(None), Some(ByteSpan::new(10, Some(10))));

        let suffix = RequestRange::Suffix(100);
        assert_eq!(suffix.to_span(None), None);
        assert_eq!(suffix.to_span(Some(1000)), Some(ByteSpan::new(900, Some(100))));
        assert_eq!(suffix.to_span(Some(50)), Some(ByteSpan::new(0, Some(50))));
    }

    #[test]
    fn test_huge_last_byte_pos_is_clamped() {
        let range = RequestRange::parse("bytes=0-18446744073709551615").unwrap();
        let span = range.to_span(None).unwrap();
        assert_eq!(span, ByteSpan::new(0, Some(u64::MAX)));
        assert_eq!(span.clamp_to(1000), ByteSpan::new(0, Some(1000)));

        let range = RequestRange::parse("bytes=10-18446744073709551615").unwrap();
        assert_eq!(
            range.to_span(Some(1000)).unwrap().clamp_to(1000),
            ByteSpan::new(10, Some(990))
        );
    }

    #[test]
    fn test_from_proxy() {
        let convertor = DefaultUrlConvertor::new();
        let origin = Url::parse("https://cdn.test/v/movie.mp4?sig=abc").unwrap();
        let server = Url::parse("http://127.0.0.1:8080/").unwrap();
        let proxy = convertor.proxy_url(&origin, &server).unwrap();

        let request = DataRequest::from_proxy(&convertor, &proxy, Some("bytes=5-")).unwrap();
        assert_eq!(request.origin, origin);
        assert!(request.is_partial());

        let bare = Url::parse("http://127.0.0.1:8080/movie.mp4").unwrap();
        assert!(matches!(
            DataRequest::from_proxy(&convertor, &bare, None),
            Err(CacheError::InvalidUrl(_))
        ));
    }
}
