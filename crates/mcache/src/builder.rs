//! # Builder for CacheConfig
//!
//! Fluent construction of [`CacheConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mcache_engine::CacheConfig;
//!
//! let config = CacheConfig::builder()
//!     .with_root_dir("/tmp/media-cache")
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyPlayer/1.0")
//!     .with_header("Referer", "https://example.com/")
//!     .with_read_chunk_size(32 * 1024)
//!     .build();
//!
//! assert_eq!(config.read_chunk_size, 32 * 1024);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::CacheConfig;

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set the directory resources are stored in
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = root_dir.into();
        self
    }

    /// Set the overall timeout for a single origin request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (maximum time between receiving data chunks)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge custom HTTP headers over the defaults
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set the maximum size of a single cached read
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size.max(1);
        self
    }

    /// Set how many committed bytes trigger a descriptor flush
    pub fn with_index_flush_bytes(mut self, bytes: u64) -> Self {
        self.config.index_flush_bytes = bytes;
        self
    }

    /// Set how far a reader may trail another reader's fetch and still
    /// wait for it
    pub fn with_max_wait_distance(mut self, distance: u64) -> Self {
        self.config.max_wait_distance = distance;
        self
    }

    /// Set how long a reader waits on a fetch that makes no progress
    pub fn with_fetch_stall_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_stall_timeout = timeout;
        self
    }

    /// Set how many released resources are kept in memory
    pub fn with_idle_resource_capacity(mut self, capacity: u64) -> Self {
        self.config.idle_resource_capacity = capacity;
        self
    }

    /// Set how long released resources are kept in memory
    pub fn with_idle_resource_ttl(mut self, ttl: Duration) -> Self {
        self.config.idle_resource_ttl = ttl;
        self
    }

    /// Build the final configuration
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let config = CacheConfigBuilder::new()
            .with_root_dir("/var/cache/media")
            .with_read_timeout(Duration::from_secs(5))
            .with_header("X-Token", "abc")
            .with_read_chunk_size(0)
            .build();

        assert_eq!(config.root_dir, PathBuf::from("/var/cache/media"));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.headers.get("X-Token").unwrap(), "abc");
        // chunk size is clamped so cached reads always make progress
        assert_eq!(config.read_chunk_size, 1);
        assert_eq!(
            config.headers.get(reqwest::header::ACCEPT_ENCODING).unwrap(),
            "identity"
        );
    }

    #[test]
    fn test_invalid_header_is_ignored() {
        let config = CacheConfigBuilder::new()
            .with_header("Bad Header", "value")
            .build();
        assert!(config.headers.get("Bad Header").is_none());
    }
}
