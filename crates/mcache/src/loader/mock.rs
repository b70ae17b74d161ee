//! In-memory origin used by the engine's tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;

use super::http::check_validator;
use super::{LoadRequest, LoadResponse, Loader};
use crate::error::{CacheError, Result};
use crate::range::ByteSpan;

struct Origin {
    content: Bytes,
    validator: Option<String>,
}

/// Scripted origin: fixed content, switchable validator, optional delays.
pub(crate) struct MockLoader {
    origin: Mutex<Origin>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
    /// Fail the stream with a network error after this many bytes
    fail_after: Mutex<Option<u64>>,
    loads: AtomicUsize,
    fetched_bytes: Arc<AtomicUsize>,
    requests: Mutex<Vec<ByteSpan>>,
}

impl MockLoader {
    pub(crate) fn new(content: impl Into<Bytes>) -> Self {
        Self {
            origin: Mutex::new(Origin {
                content: content.into(),
                validator: Some("\"v1\"".to_string()),
            }),
            chunk_size: 100,
            chunk_delay: None,
            fail_after: Mutex::new(None),
            loads: AtomicUsize::new(0),
            fetched_bytes: Arc::new(AtomicUsize::new(0)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Content of `len` bytes where byte `i` is `i % 251`.
    pub(crate) fn patterned(len: usize) -> Self {
        Self::new(pattern(len))
    }

    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub(crate) fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub(crate) fn fail_after(&self, bytes: Option<u64>) {
        *self.fail_after.lock() = bytes;
    }

    /// Replace the origin content and its validator.
    pub(crate) fn change_content(&self, content: impl Into<Bytes>, validator: &str) {
        let mut origin = self.origin.lock();
        origin.content = content.into();
        origin.validator = Some(validator.to_string());
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn fetched_bytes(&self) -> usize {
        self.fetched_bytes.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ByteSpan> {
        self.requests.lock().clone()
    }
}

pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[async_trait]
impl Loader for MockLoader {
    async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.span);

        let (content, validator) = {
            let origin = self.origin.lock();
            (origin.content.clone(), origin.validator.clone())
        };
        check_validator(request.validator.as_deref(), validator.as_deref())?;

        let total = content.len() as u64;
        // an empty resource only answers a read from its start
        if request.span.offset > total || (request.span.offset == total && total > 0) {
            return Err(CacheError::OutOfRange {
                offset: request.span.offset,
                content_length: total,
            });
        }
        let end = request.span.end().map_or(total, |end| end.min(total));
        let body = content.slice(request.span.offset as usize..end as usize);

        let chunk_size = self.chunk_size;
        let chunk_delay = self.chunk_delay;
        let fail_after = *self.fail_after.lock();
        let fetched_bytes = Arc::clone(&self.fetched_bytes);
        let chunks = futures::stream::iter((0..body.len()).step_by(chunk_size))
            .then(move |start| {
                let body = body.clone();
                let fetched_bytes = Arc::clone(&fetched_bytes);
                async move {
                    if let Some(delay) = chunk_delay {
                        tokio::time::sleep(delay).await;
                    }
                    if fail_after.is_some_and(|limit| start as u64 >= limit) {
                        return Err(CacheError::Network("connection reset".into()));
                    }
                    let chunk = body.slice(start..(start + chunk_size).min(body.len()));
                    fetched_bytes.fetch_add(chunk.len(), Ordering::SeqCst);
                    Ok(chunk)
                }
            })
            .boxed();

        Ok(LoadResponse {
            offset: request.span.offset,
            total_length: Some(total),
            validator,
            content_type: Some("video/mp4".to_string()),
            chunks,
        })
    }
}
