//! # Loader
//!
//! The network collaborator that fetches an uncovered span from the origin.
//!
//! A load delivers the origin's answer as a [`LoadResponse`]: the facts the
//! cache needs to validate the response (total length, validator, content
//! type) and a lazy, finite stream of chunks in ascending offset order.
//! Cancellation is by drop: dropping the response (or the future returned
//! by [`Loader::load`]) stops delivery and releases the connection.

mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpLoader;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use url::Url;

use crate::error::Result;
use crate::range::ByteSpan;

/// Stream of chunks for one load, starting at [`LoadResponse::offset`].
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// What to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub url: Url,
    pub span: ByteSpan,
    /// Validator the cached bytes were fetched under, if any
    pub validator: Option<String>,
}

/// The origin's answer to a [`LoadRequest`].
pub struct LoadResponse {
    /// Offset of the first byte of the first chunk
    pub offset: u64,
    /// Total length of the resource, when the origin reported it
    pub total_length: Option<u64>,
    pub validator: Option<String>,
    pub content_type: Option<String>,
    pub chunks: ChunkStream,
}

impl std::fmt::Debug for LoadResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadResponse")
            .field("offset", &self.offset)
            .field("total_length", &self.total_length)
            .field("validator", &self.validator)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Fetches byte spans of a resource from its origin.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Start fetching `request.span`.
    ///
    /// Fails with a network error when the origin cannot be reached, a
    /// protocol error when its answer cannot satisfy the span, and
    /// [`CacheError::ValidatorMismatch`](crate::CacheError::ValidatorMismatch)
    /// when the origin content no longer matches `request.validator`.
    async fn load(&self, request: LoadRequest) -> Result<LoadResponse>;
}
