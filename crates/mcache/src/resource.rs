//! # Resource
//!
//! One remote resource: its [`ContentIndex`], its [`ContentStore`] and the
//! bookkeeping that lets concurrent readers share them.
//!
//! All index mutation and the "is this span already covered" re-check run
//! under the resource's state mutex. Readers that need an uncovered span
//! register a *fetch claim* before going to the network; a second reader
//! that reaches a claimed position waits for the claim's progress and then
//! reads the committed bytes from the store instead of fetching them again.
//!
//! Invalidation bumps an epoch. Fetches and cached reads started under an
//! older epoch are rejected, so bytes of the old content never mix with
//! bytes of the new one. A shared/exclusive write gate keeps invalidation
//! from racing with in-flight store writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{RwLock, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::identity::ResourceIdentity;
use crate::index::{ContentIndex, PlannedSpan};
use crate::loader::{ChunkStream, LoadRequest, LoadResponse, Loader};
use crate::range::{ByteSpan, ContentRange};
use crate::store::ContentStore;
use crate::CacheConfig;

/// A span some reader is currently fetching from the origin.
struct FetchClaim {
    id: u64,
    start: u64,
    /// Exclusive end; `None` while the resource length is unknown
    end: Option<u64>,
    /// End of the bytes committed so far by this fetch
    progress: watch::Sender<u64>,
    /// When the claim was made or last advanced
    advanced_at: Instant,
}

impl FetchClaim {
    fn covers(&self, position: u64) -> bool {
        position >= self.start && self.end.is_none_or(|end| position < end)
    }

    fn is_stalled(&self, stall_timeout: Duration) -> bool {
        self.advanced_at.elapsed() >= stall_timeout
    }
}

struct ResourceState {
    index: ContentIndex,
    epoch: u64,
    claims: Vec<FetchClaim>,
    next_claim_id: u64,
    /// Bytes committed since the descriptor was last persisted
    unflushed: u64,
}

impl ResourceState {
    fn claim_mut(&mut self, id: u64) -> Option<&mut FetchClaim> {
        self.claims.iter_mut().find(|c| c.id == id)
    }
}

/// Where the bytes at a reader's cursor come from.
pub(crate) enum Source {
    /// Committed bytes, readable from the store
    Cached { range: ContentRange, epoch: u64 },
    /// Another reader is fetching this position; wait for its progress
    Wait(watch::Receiver<u64>),
    /// Nobody has these bytes; the caller owns the claim and must fetch
    Fetch(FetchTicket),
    /// The cursor is at the end of the resource
    End,
}

/// Ownership of a fetch claim. Dropping it withdraws the claim and wakes
/// every reader waiting on it.
pub(crate) struct FetchTicket {
    resource: Arc<Resource>,
    claim_id: u64,
    pub(crate) span: ByteSpan,
    pub(crate) epoch: u64,
    validator: Option<String>,
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        let mut state = self.resource.state.lock();
        state.claims.retain(|c| c.id != self.claim_id);
    }
}

/// Why an origin response was refused.
enum Rejection {
    /// The origin now serves different content than what is cached
    ContentChanged(CacheError),
    /// The response cannot serve this fetch; the cache is still valid
    Unusable(CacheError),
}

/// A fetch whose origin response has been accepted.
pub(crate) struct ActiveFetch {
    pub(crate) ticket: FetchTicket,
    pub(crate) chunks: ChunkStream,
    /// Offset of the next byte the stream will deliver
    pub(crate) position: u64,
}

pub struct Resource {
    identity: ResourceIdentity,
    origin: Url,
    store: ContentStore,
    loader: Arc<dyn Loader>,
    state: Mutex<ResourceState>,
    write_gate: RwLock<()>,
    refcount: AtomicUsize,
    read_chunk_size: u64,
    index_flush_bytes: u64,
    max_wait_distance: u64,
    fetch_stall_timeout: Duration,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("identity", &self.identity)
            .field("origin", &self.origin.as_str())
            .field("refcount", &self.refcount())
            .finish_non_exhaustive()
    }
}

impl Resource {
    /// Open the resource, restoring its persisted index.
    pub async fn open(
        identity: ResourceIdentity,
        origin: Url,
        loader: Arc<dyn Loader>,
        config: &CacheConfig,
    ) -> Result<Self> {
        let store = ContentStore::open(&config.root_dir, &identity).await?;
        let index = store.load_index().await?;
        info!(
            identity = %identity,
            origin = %origin,
            cached_bytes = index.cached_bytes(),
            total_length = ?index.total_length(),
            "Opened resource"
        );

        Ok(Self {
            identity,
            origin,
            store,
            loader,
            state: Mutex::new(ResourceState {
                index,
                epoch: 0,
                claims: Vec::new(),
                next_claim_id: 0,
                unflushed: 0,
            }),
            write_gate: RwLock::new(()),
            refcount: AtomicUsize::new(0),
            read_chunk_size: config.read_chunk_size.max(1) as u64,
            index_flush_bytes: config.index_flush_bytes,
            max_wait_distance: config.max_wait_distance,
            fetch_stall_timeout: config.fetch_stall_timeout,
        })
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn total_length(&self) -> Option<u64> {
        self.state.lock().index.total_length()
    }

    pub fn content_type(&self) -> Option<String> {
        self.state.lock().index.content_type().map(str::to_string)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub(crate) fn read_chunk_size(&self) -> usize {
        self.read_chunk_size as usize
    }

    /// Longest a reader waits on another reader's fetch that makes no
    /// progress.
    pub(crate) fn fetch_stall_timeout(&self) -> Duration {
        self.fetch_stall_timeout
    }

    /// Point-in-time copy of the index.
    pub fn snapshot(&self) -> ContentIndex {
        self.state.lock().index.clone()
    }

    /// Number of live handles (readers and registry users).
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn release(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Read plan for `span` against the current index.
    pub fn plan(&self, span: ByteSpan) -> Vec<PlannedSpan> {
        self.state.lock().index.covered_spans(span)
    }

    /// Decide where the bytes at `position` come from, never reading past
    /// `limit` (nor past the end of the resource).
    ///
    /// This is the mandatory re-check before any origin request: a span
    /// planned as uncovered may have been committed, or claimed, by another
    /// reader since the plan was made.
    pub(crate) fn next_source(self: &Arc<Self>, position: u64, limit: Option<u64>) -> Source {
        let mut state = self.state.lock();
        let limit = match (limit, state.index.total_length()) {
            (Some(limit), Some(total)) => Some(limit.min(total)),
            (limit, total) => limit.or(total),
        };
        if limit.is_some_and(|limit| position >= limit) {
            return Source::End;
        }

        if let Some(extent) = state.index.cached_extent(position) {
            let mut end = extent.end().min(position.saturating_add(self.read_chunk_size));
            if let Some(limit) = limit {
                end = end.min(limit);
            }
            return Source::Cached {
                range: ContentRange {
                    offset: position,
                    length: end - position,
                },
                epoch: state.epoch,
            };
        }

        let max_wait_distance = self.max_wait_distance;
        let stall_timeout = self.fetch_stall_timeout;
        if let Some(claim) = state.claims.iter_mut().find(|c| c.covers(position)) {
            let progress = *claim.progress.borrow();
            let stalled = claim.is_stalled(stall_timeout);
            if position < progress.saturating_add(max_wait_distance) && !stalled {
                return Source::Wait(claim.progress.subscribe());
            }
            // Too far ahead of the other fetch, or the other fetch stopped
            // moving: take over the tail of its claim.
            debug!(
                identity = %self.identity,
                claim = claim.id,
                progress,
                position,
                stalled,
                "Splitting fetch claim"
            );
            claim.end = Some(position);
        }

        let mut gap_end = limit;
        let next_cached = state.index.next_cached_start(position);
        let next_claimed = state
            .claims
            .iter()
            .filter(|c| c.start > position)
            .map(|c| c.start)
            .min();
        for boundary in [next_cached, next_claimed].into_iter().flatten() {
            gap_end = Some(gap_end.map_or(boundary, |end| end.min(boundary)));
        }

        let claim_id = state.next_claim_id;
        state.next_claim_id += 1;
        let (progress, _) = watch::channel(position);
        state.claims.push(FetchClaim {
            id: claim_id,
            start: position,
            end: gap_end,
            progress,
            advanced_at: Instant::now(),
        });

        Source::Fetch(FetchTicket {
            resource: Arc::clone(self),
            claim_id,
            span: ByteSpan::new(position, gap_end.map(|end| end - position)),
            epoch: state.epoch,
            validator: state.index.validator().map(str::to_string),
        })
    }

    /// Issue the origin request for a claimed span and validate the answer.
    pub(crate) async fn fetch(&self, ticket: FetchTicket) -> Result<ActiveFetch> {
        let request = LoadRequest {
            url: self.origin.clone(),
            span: ticket.span,
            validator: ticket.validator.clone(),
        };
        debug!(identity = %self.identity, span = ?ticket.span, "Fetching uncovered span");

        let response = match self.loader.load(request).await {
            Ok(response) => response,
            Err(e @ CacheError::ValidatorMismatch { .. }) => {
                warn!(identity = %self.identity, error = %e, "Origin content changed, invalidating cache");
                drop(ticket);
                self.invalidate().await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Err(rejection) = self.accept_response(&ticket, &response) {
            return Err(match rejection {
                Rejection::ContentChanged(e) => {
                    warn!(identity = %self.identity, error = %e, "Origin content changed, invalidating cache");
                    drop(ticket);
                    self.invalidate().await;
                    e
                }
                Rejection::Unusable(e) => e,
            });
        }

        Ok(ActiveFetch {
            position: response.offset,
            chunks: response.chunks,
            ticket,
        })
    }

    fn accept_response(
        &self,
        ticket: &FetchTicket,
        response: &LoadResponse,
    ) -> std::result::Result<(), Rejection> {
        let mut state = self.state.lock();
        if state.epoch != ticket.epoch {
            return Err(Rejection::Unusable(CacheError::protocol(
                "resource was invalidated while the request was in flight",
            )));
        }
        if response.offset != ticket.span.offset {
            return Err(Rejection::Unusable(CacheError::protocol(format!(
                "origin answered at offset {} for a request at {}",
                response.offset, ticket.span.offset
            ))));
        }

        let known = state.index.validator().map(str::to_string);
        match (known, response.validator.as_deref()) {
            (Some(expected), Some(actual)) if expected != actual => {
                return Err(Rejection::ContentChanged(CacheError::ValidatorMismatch {
                    expected,
                    actual: actual.to_string(),
                }));
            }
            (None, Some(actual)) => state.index.set_validator(Some(actual.to_string())),
            _ => {}
        }

        if let Some(total) = response.total_length {
            state
                .index
                .set_total_length(total)
                .map_err(Rejection::ContentChanged)?;
            if let Some(claim) = state.claim_mut(ticket.claim_id) {
                claim.end = Some(claim.end.map_or(total, |end| end.min(total)));
            }
        }
        state.index.set_content_type(response.content_type.clone());
        Ok(())
    }

    /// Read committed bytes.
    ///
    /// Fails with a protocol error if the resource was invalidated since the
    /// range was handed out.
    pub(crate) async fn read_cached(&self, range: ContentRange, epoch: u64) -> Result<Bytes> {
        let _gate = self.write_gate.read().await;
        {
            let state = self.state.lock();
            if state.epoch != epoch || !state.index.covers(&range) {
                return Err(CacheError::protocol(
                    "cached span was invalidated while being read",
                ));
            }
        }
        self.store.read(range).await
    }

    /// Persist and commit the part of `bytes` at `offset` that belongs to
    /// the ticket's claim. Returns how many bytes were committed; fewer than
    /// `bytes.len()` means the claim is exhausted.
    pub(crate) async fn commit(
        &self,
        ticket: &FetchTicket,
        offset: u64,
        bytes: &Bytes,
    ) -> Result<usize> {
        let gate = self.write_gate.read().await;

        let (range, overlapping) = {
            let state = self.state.lock();
            if state.epoch != ticket.epoch {
                return Err(CacheError::protocol(
                    "resource was invalidated while fetching",
                ));
            }
            let claim_end = state
                .claims
                .iter()
                .find(|c| c.id == ticket.claim_id)
                .map(|c| c.end)
                .ok_or_else(|| CacheError::protocol("fetch claim was withdrawn"))?;

            let mut len = bytes.len() as u64;
            if let Some(end) = claim_end {
                len = len.min(end.saturating_sub(offset));
            }
            if let Some(total) = state.index.total_length() {
                len = len.min(total.saturating_sub(offset));
            }
            if len == 0 {
                return Ok(0);
            }
            let range = ContentRange::new(offset, len)?;
            (range, state.index.overlapping(&range))
        };

        let bytes = bytes.slice(..range.length as usize);
        for existing in overlapping {
            let stored = self.store.read(existing).await?;
            let start = (existing.offset - offset) as usize;
            if stored[..] != bytes[start..start + existing.length as usize] {
                drop(gate);
                warn!(
                    identity = %self.identity,
                    offset = existing.offset,
                    length = existing.length,
                    "Fetched bytes differ from cached bytes, invalidating cache"
                );
                self.invalidate().await;
                return Err(CacheError::protocol(format!(
                    "bytes at [{}, {}) differ from the cached copy",
                    existing.offset,
                    existing.end()
                )));
            }
        }

        self.store.write(offset, &bytes).await?;

        let flush = {
            let mut state = self.state.lock();
            state.index.insert(range)?;
            if let Some(claim) = state.claim_mut(ticket.claim_id) {
                claim.progress.send_replace(range.end());
                claim.advanced_at = Instant::now();
            }
            state.unflushed += range.length;
            if state.unflushed >= self.index_flush_bytes {
                state.unflushed = 0;
                true
            } else {
                false
            }
        };
        drop(gate);

        debug!(identity = %self.identity, offset, length = range.length, "Committed fetched bytes");
        if flush {
            if let Err(e) = self.flush().await {
                warn!(identity = %self.identity, error = %e, "Failed to persist index descriptor");
            }
        }
        Ok(range.length as usize)
    }

    /// Record that an open-ended fetch hit the end of the resource.
    pub(crate) fn mark_end(&self, total: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.index.set_total_length(total)
    }

    /// Drop every cached range; subsequent readers start from scratch.
    pub async fn invalidate(&self) {
        let _gate = self.write_gate.write().await;
        {
            let mut state = self.state.lock();
            state.index.invalidate();
            state.epoch += 1;
            // dropping the senders wakes every waiter
            state.claims.clear();
            state.unflushed = 0;
        }
        if let Err(e) = self.store.discard().await {
            warn!(identity = %self.identity, error = %e, "Failed to discard stored content");
        }
        info!(identity = %self.identity, "Invalidated resource");
    }

    /// Persist the index descriptor.
    pub async fn flush(&self) -> Result<()> {
        self.store
            .persist_with(|| self.state.lock().index.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::mock::{MockLoader, pattern};
    use futures::StreamExt;

    async fn open(loader: Arc<MockLoader>, root: &std::path::Path) -> Arc<Resource> {
        let config = CacheConfig::builder()
            .with_root_dir(root)
            .with_index_flush_bytes(1)
            .build();
        Arc::new(
            Resource::open(
                ResourceIdentity::from_raw("resource-test"),
                Url::parse("http://origin.test/video.mp4").unwrap(),
                loader,
                &config,
            )
            .await
            .unwrap(),
        )
    }

    async fn drain(resource: &Resource, mut fetch: ActiveFetch) -> Result<u64> {
        while let Some(chunk) = fetch.chunks.next().await {
            let chunk = chunk?;
            let n = resource.commit(&fetch.ticket, fetch.position, &chunk).await?;
            fetch.position += n as u64;
            if n < chunk.len() {
                break;
            }
        }
        Ok(fetch.position)
    }

    #[tokio::test]
    async fn test_fetch_commits_and_sets_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader.clone(), tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(0, Some(500)) else {
            panic!("expected a fetch for an empty cache");
        };
        assert_eq!(ticket.span, ByteSpan::new(0, Some(500)));
        let fetch = resource.fetch(ticket).await.unwrap();
        assert_eq!(drain(&resource, fetch).await.unwrap(), 500);

        let index = resource.snapshot();
        assert_eq!(index.ranges(), &[ContentRange::new(0, 500).unwrap()]);
        assert_eq!(index.total_length(), Some(1000));
        assert_eq!(index.validator(), Some("\"v1\""));
        assert_eq!(resource.content_type().as_deref(), Some("video/mp4"));

        let Source::Cached { range, epoch } = resource.next_source(0, Some(500)) else {
            panic!("expected cached bytes");
        };
        let bytes = resource.read_cached(range, epoch).await.unwrap();
        assert_eq!(&bytes[..], &pattern(1000)[..range.length as usize]);
    }

    #[tokio::test]
    async fn test_claimed_span_makes_second_reader_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(0, Some(1000)) else {
            panic!("expected a fetch");
        };
        assert!(matches!(
            resource.next_source(200, Some(1000)),
            Source::Wait(_)
        ));

        // withdrawing the claim hands the span to whoever asks next
        drop(ticket);
        assert!(matches!(
            resource.next_source(200, Some(1000)),
            Source::Fetch(_)
        ));
    }

    #[tokio::test]
    async fn test_gap_stops_at_next_cached_range() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(500, Some(600)) else {
            panic!("expected a fetch");
        };
        let fetch = resource.fetch(ticket).await.unwrap();
        drain(&resource, fetch).await.unwrap();

        let Source::Fetch(ticket) = resource.next_source(0, None) else {
            panic!("expected a fetch");
        };
        assert_eq!(ticket.span, ByteSpan::new(0, Some(500)));
    }

    #[tokio::test]
    async fn test_far_position_splits_claim() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(4 * 1024 * 1024));
        let resource = open(loader, tmp.path()).await;

        let Source::Fetch(first) = resource.next_source(0, None) else {
            panic!("expected a fetch");
        };
        let far = 3 * 1024 * 1024;
        let Source::Fetch(second) = resource.next_source(far, None) else {
            panic!("expected the far position to be fetched independently");
        };
        assert_eq!(second.span.offset, far);
        {
            let state = resource.state.lock();
            let claim = state.claims.iter().find(|c| c.id == first.claim_id).unwrap();
            assert_eq!(claim.end, Some(far));
        }
    }

    #[tokio::test]
    async fn test_validator_change_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader.clone(), tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(0, Some(100)) else {
            panic!("expected a fetch");
        };
        let fetch = resource.fetch(ticket).await.unwrap();
        drain(&resource, fetch).await.unwrap();
        assert!(!resource.snapshot().is_empty());

        loader.change_content(vec![9u8; 1000], "\"v2\"");
        let Source::Fetch(ticket) = resource.next_source(100, Some(200)) else {
            panic!("expected a fetch");
        };
        let Err(err) = resource.fetch(ticket).await else {
            panic!("expected the changed validator to be rejected");
        };
        assert!(matches!(err, CacheError::ValidatorMismatch { .. }));
        assert!(resource.snapshot().is_empty());
        assert_eq!(resource.total_length(), None);
    }

    #[tokio::test]
    async fn test_stale_cached_read_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(0, Some(100)) else {
            panic!("expected a fetch");
        };
        let fetch = resource.fetch(ticket).await.unwrap();
        drain(&resource, fetch).await.unwrap();

        let Source::Cached { range, epoch } = resource.next_source(0, Some(100)) else {
            panic!("expected cached bytes");
        };
        resource.invalidate().await;
        assert!(matches!(
            resource.read_cached(range, epoch).await,
            Err(CacheError::Protocol(_))
        ));
    }

    /// Store `bytes` at `offset` as if another fetch had committed them.
    async fn seed(resource: &Resource, offset: u64, bytes: &[u8]) {
        resource.store.write(offset, bytes).await.unwrap();
        let range = ContentRange::new(offset, bytes.len() as u64).unwrap();
        resource.state.lock().index.insert(range).unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_commit_with_same_bytes_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;
        let content = pattern(1000);

        let Source::Fetch(ticket) = resource.next_source(0, Some(300)) else {
            panic!("expected a fetch");
        };
        seed(&resource, 0, &content[..300]).await;

        let chunk = Bytes::copy_from_slice(&content[100..200]);
        assert_eq!(resource.commit(&ticket, 100, &chunk).await.unwrap(), 100);
        assert_eq!(
            resource.snapshot().ranges(),
            &[ContentRange::new(0, 300).unwrap()]
        );
        let stored = resource
            .read_cached(ContentRange::new(0, 300).unwrap(), ticket.epoch)
            .await
            .unwrap();
        assert_eq!(&stored[..], &content[..300]);
    }

    #[tokio::test]
    async fn test_overlapping_commit_with_different_bytes_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;
        let content = pattern(1000);

        let Source::Fetch(ticket) = resource.next_source(0, Some(300)) else {
            panic!("expected a fetch");
        };
        seed(&resource, 0, &content[..300]).await;

        // disagrees with the stored copy of [250, 300)
        let chunk = Bytes::from(vec![0xAA; 100]);
        assert!(matches!(
            resource.commit(&ticket, 250, &chunk).await,
            Err(CacheError::Protocol(_))
        ));
        assert!(resource.snapshot().is_empty());
        assert_ne!(resource.epoch(), ticket.epoch);
    }

    #[tokio::test]
    async fn test_commit_after_invalidation_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        let resource = open(loader, tmp.path()).await;

        let Source::Fetch(ticket) = resource.next_source(0, Some(300)) else {
            panic!("expected a fetch");
        };
        let mut fetch = resource.fetch(ticket).await.unwrap();
        let chunk = fetch.chunks.next().await.unwrap().unwrap();
        resource.invalidate().await;

        assert!(matches!(
            resource.commit(&fetch.ticket, fetch.position, &chunk).await,
            Err(CacheError::Protocol(_))
        ));
        assert!(resource.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_index_is_persisted_on_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = Arc::new(MockLoader::patterned(1000));
        {
            let resource = open(loader.clone(), tmp.path()).await;
            let Source::Fetch(ticket) = resource.next_source(0, Some(250)) else {
                panic!("expected a fetch");
            };
            let fetch = resource.fetch(ticket).await.unwrap();
            drain(&resource, fetch).await.unwrap();
        }

        let reopened = open(loader, tmp.path()).await;
        assert_eq!(
            reopened.snapshot().ranges(),
            &[ContentRange::new(0, 250).unwrap()]
        );
    }
}
