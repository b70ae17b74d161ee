//! # Mcache Engine
//!
//! Partial-content cache for media served over HTTP range requests.
//!
//! A player asks for a byte span of a remote resource; the engine answers
//! with the bytes already on disk and fetches only the gaps from the origin,
//! storing them as they stream through so the next reader finds them
//! cached.
//!
//! ## Pieces
//!
//! - [`ContentIndex`]: which byte ranges of a resource are stored
//! - [`ContentStore`]: the on-disk bytes and the persisted index descriptor
//! - [`Loader`]: fetches an uncovered span from the origin ([`HttpLoader`])
//! - [`Resource`]: one index + store shared by every reader of a resource
//! - [`Reader`]: serves one request, cache first, network for the gaps
//! - [`ResourceRegistry`]: maps origin URLs to shared resources
//! - [`DataRequest`] / [`DataResponse`]: the seam a local HTTP listener uses

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod loader;
pub mod range;
pub mod reader;
pub mod registry;
pub mod request;
pub mod resource;
pub mod response;
pub mod store;

pub use builder::CacheConfigBuilder;
pub use client::create_client;
pub use config::CacheConfig;
pub use error::{CacheError, ErrorKind, Result};

pub use identity::{DefaultUrlConvertor, ResourceIdentity, UrlConvertor};
pub use index::{ContentIndex, PlannedSpan};
pub use range::{ByteSpan, ContentRange};
pub use store::ContentStore;

pub use loader::{ChunkStream, HttpLoader, LoadRequest, LoadResponse, Loader};

pub use reader::{Prepared, Reader, ReaderEvent, ReaderEvents, ReaderState};
pub use registry::{ResourceHandle, ResourceRegistry};
pub use resource::Resource;

pub use request::{DataRequest, RequestRange};
pub use response::DataResponse;
