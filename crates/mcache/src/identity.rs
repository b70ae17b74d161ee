//! # Resource Identity
//!
//! A resource is keyed by a normalized form of its origin URL. The
//! [`UrlConvertor`] trait is the seam through which the local listener maps
//! between player-facing proxy URLs and origin URLs; the cache itself only
//! ever calls [`UrlConvertor::resource_name`].

use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

/// Cache key and on-disk directory name of one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// Wrap an already-normalized name.
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps between origin URLs, proxy URLs and resource names.
pub trait UrlConvertor: Send + Sync {
    /// The URL a player should use to reach `origin` through the local server.
    fn proxy_url(&self, origin: &Url, local_server: &Url) -> Option<Url>;

    /// The origin URL encoded in a proxy URL.
    fn origin_url(&self, proxy: &Url) -> Option<Url>;

    /// The cache identity of an origin URL.
    fn resource_name(&self, origin: &Url) -> Option<ResourceIdentity>;
}

/// Query parameter of a proxy URL carrying the origin URL
const ORIGIN_PARAM: &str = "url";

/// Default convertor.
///
/// Proxy URLs look like `http://127.0.0.1:port/<file-name>?url=<origin>`;
/// keeping the origin's last path segment lets players sniff the container
/// format from the extension. Resource names are the SHA-256 of the
/// normalized origin URL.
#[derive(Debug, Clone, Default)]
pub struct DefaultUrlConvertor {
    /// Query keys that do not change the content (signatures, tokens...)
    ignored_query_keys: Vec<String>,
}

impl DefaultUrlConvertor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore `key` when deriving resource names.
    pub fn ignore_query_key(mut self, key: impl Into<String>) -> Self {
        self.ignored_query_keys.push(key.into());
        self
    }

    /// Normalized string form of `origin`: lower-case scheme and host,
    /// default port dropped, fragment dropped, query pairs sorted and
    /// filtered.
    pub fn normalize(&self, origin: &Url) -> Option<String> {
        let host = origin.host_str()?.to_ascii_lowercase();
        let mut normalized = format!("{}://{}", origin.scheme().to_ascii_lowercase(), host);
        // port() is None for the scheme's default port
        if let Some(port) = origin.port() {
            normalized.push_str(&format!(":{port}"));
        }
        normalized.push_str(origin.path());

        let mut pairs: Vec<(String, String)> = origin
            .query_pairs()
            .filter(|(k, _)| !self.ignored_query_keys.iter().any(|ignored| ignored == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if !pairs.is_empty() {
            pairs.sort();
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish();
            normalized.push('?');
            normalized.push_str(&query);
        }
        Some(normalized)
    }
}

impl UrlConvertor for DefaultUrlConvertor {
    fn proxy_url(&self, origin: &Url, local_server: &Url) -> Option<Url> {
        if !matches!(origin.scheme(), "http" | "https") {
            return None;
        }
        let file_name = origin
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or("resource");

        let mut proxy = local_server.join(file_name).ok()?;
        proxy
            .query_pairs_mut()
            .clear()
            .append_pair(ORIGIN_PARAM, origin.as_str());
        Some(proxy)
    }

    fn origin_url(&self, proxy: &Url) -> Option<Url> {
        let (_, origin) = proxy.query_pairs().find(|(k, _)| k == ORIGIN_PARAM)?;
        Url::parse(&origin).ok()
    }

    fn resource_name(&self, origin: &Url) -> Option<ResourceIdentity> {
        let normalized = self.normalize(origin)?;
        let hash = Sha256::digest(normalized.as_bytes());
        Some(ResourceIdentity(format!("{hash:x}")))
    }
}
