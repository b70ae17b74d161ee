use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Configurable options for the media cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one sub-directory per cached resource
    pub root_dir: PathBuf,

    /// Overall timeout for a single origin request
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for origin requests
    pub headers: HeaderMap,

    /// Maximum number of bytes handed out by a single cached read
    pub read_chunk_size: usize,

    /// Committed bytes after which a resource persists its index descriptor
    pub index_flush_bytes: u64,

    /// How far ahead of another reader's in-flight fetch a reader may be
    /// and still wait for it instead of fetching the tail itself
    pub max_wait_distance: u64,

    /// How long a fetch being waited on may go without progress before a
    /// waiting reader takes over the rest of it
    pub fetch_stall_timeout: Duration,

    /// How many released resources the registry keeps in memory
    pub idle_resource_capacity: u64,

    /// How long a released resource stays in memory without being reopened
    pub idle_resource_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("mcache"),
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: CacheConfig::get_default_headers(),
            read_chunk_size: 64 * 1024,
            index_flush_bytes: 1024 * 1024,
            max_wait_distance: 1024 * 1024,
            fetch_stall_timeout: Duration::from_secs(3),
            idle_resource_capacity: 16,
            idle_resource_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    /// Create a configuration that stores resources below `root_dir`
    pub fn with_root_dir(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        // Range offsets must refer to the identity encoding.
        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers
    }
}
