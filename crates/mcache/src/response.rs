//! # Data Response
//!
//! The answer to a [`DataRequest`]: a prepared reader plus the status line
//! and headers a listener sends before the body.

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{
    ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::range::{ByteSpan, build_content_range};
use crate::reader::{Prepared, Reader};
use crate::registry::ResourceRegistry;
use crate::request::DataRequest;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct DataResponse {
    reader: Reader,
    prepared: Prepared,
    partial: bool,
    delivered: u64,
}

impl std::fmt::Debug for DataResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataResponse")
            .field("prepared", &self.prepared)
            .field("partial", &self.partial)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

impl DataResponse {
    /// Open and prepare a reader for `request`.
    pub async fn prepare(registry: &ResourceRegistry, request: &DataRequest) -> Result<Self> {
        let handle = registry.get_or_create(&request.origin).await?;

        let span = match request.range {
            None => ByteSpan::open(0),
            Some(range) => match range.to_span(handle.resource().total_length()) {
                Some(span) => span,
                None => {
                    // Suffix range on a resource of unknown length: learn the
                    // length from the first byte.
                    let mut head = handle.read(ByteSpan::new(0, Some(1)));
                    let prepared = head.prepare().await;
                    head.close().await;
                    let total = prepared?.content_length;
                    range.to_span(total).ok_or_else(|| {
                        CacheError::protocol("origin did not report the content length")
                    })?
                }
            },
        };

        let mut reader = handle.read(span);
        handle.release().await;
        let prepared = reader.prepare().await?;
        debug!(origin = %request.origin, span = ?span, prepared = ?prepared, "Data response prepared");

        Ok(Self {
            reader,
            prepared,
            partial: request.range.is_some(),
            delivered: 0,
        })
    }

    /// Number of body bytes, when known.
    pub fn content_length(&self) -> Option<u64> {
        self.prepared.length
    }

    /// Total length of the resource, when known.
    pub fn total_length(&self) -> Option<u64> {
        self.prepared.content_length
    }

    /// Offset of the first body byte.
    pub fn offset(&self) -> u64 {
        self.prepared.offset
    }

    /// Body bytes handed out so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn is_done(&self) -> bool {
        self.reader.state().is_terminal()
    }

    /// Next chunk of at most `max_len` body bytes; `None` once the body is
    /// complete.
    pub async fn read_data(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        let chunk = self.reader.read(max_len).await?;
        if let Some(bytes) = &chunk {
            self.delivered += bytes.len() as u64;
        }
        Ok(chunk)
    }

    pub async fn close(&mut self) {
        self.reader.close().await;
    }

    pub fn status(&self) -> StatusCode {
        if self.partial && self.prepared.length.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    /// Status and headers for the outbound response.
    pub fn response_headers(&self) -> (StatusCode, HeaderMap) {
        let status = self.status();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let content_type = self
            .prepared
            .content_type
            .as_deref()
            .and_then(|ct| HeaderValue::from_str(ct).ok())
            .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, content_type);

        if let Some(length) = self.prepared.length {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            if status == StatusCode::PARTIAL_CONTENT && length > 0 {
                let start = self.prepared.offset;
                let value = build_content_range(
                    start,
                    start + length - 1,
                    self.prepared.content_length,
                );
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(CONTENT_RANGE, value);
                }
            }
        }

        (status, headers)
    }
}
