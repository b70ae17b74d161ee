//! # Reader
//!
//! Serves one read request by stitching cached and freshly fetched bytes
//! together, in ascending offset order.
//!
//! A reader is pulled: [`Reader::prepare`] resolves the content length and
//! plans the request against the index, then every [`Reader::read`] returns
//! the next chunk. [`Reader::spawn`] drives the same state machine on a task
//! and publishes [`ReaderEvent`]s instead.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::index::PlannedSpan;
use crate::range::{ByteSpan, ContentRange};
use crate::registry::ResourceHandle;
use crate::resource::{ActiveFetch, Resource, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Preparing,
    Delivering,
    Done,
    Failed,
    Closed,
}

impl ReaderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Closed)
    }
}

/// Outcome of [`Reader::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    /// Total length of the resource, when known
    pub content_length: Option<u64>,
    /// First byte the reader delivers
    pub offset: u64,
    /// Number of bytes the reader delivers, when known
    pub length: Option<u64>,
    pub content_type: Option<String>,
}

/// Notifications published by a spawned reader.
///
/// `Prepared` comes first, then any number of `Ready` in ascending offset
/// order, then exactly one of `Completed` or `Failed`.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    Prepared(Prepared),
    Ready(Bytes),
    Completed,
    Failed(CacheError),
}

/// Receiving side of a spawned reader.
#[derive(Debug)]
pub struct ReaderEvents {
    events: mpsc::Receiver<ReaderEvent>,
    cancel: CancellationToken,
}

impl ReaderEvents {
    /// Next event, or `None` once the reader finished or was closed.
    pub async fn recv(&mut self) -> Option<ReaderEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Stop the reader. No event is delivered after this returns.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }
}

impl Drop for ReaderEvents {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Byte counters for one reader.
#[derive(Debug, Default, Clone, Copy)]
struct DeliveryStats {
    cached: u64,
    network: u64,
}

pub struct Reader {
    handle: Option<ResourceHandle>,
    resource: Arc<Resource>,
    request: ByteSpan,
    state: ReaderState,
    prepared: Option<Prepared>,
    /// Next byte to source; bytes in `pending` come before it
    position: u64,
    plan: VecDeque<PlannedSpan>,
    active: Option<ActiveFetch>,
    pending: Bytes,
    /// Resource epoch the delivered bytes belong to
    epoch: Option<u64>,
    error: Option<CacheError>,
    cancel: CancellationToken,
    stats: DeliveryStats,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("identity", self.resource.identity())
            .field("request", &self.request)
            .field("state", &self.state)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl Reader {
    pub(crate) fn new(handle: ResourceHandle, request: ByteSpan) -> Self {
        let resource = Arc::clone(handle.resource());
        Self {
            handle: Some(handle),
            resource,
            request,
            state: ReaderState::Idle,
            prepared: None,
            position: request.offset,
            plan: VecDeque::new(),
            active: None,
            pending: Bytes::new(),
            epoch: None,
            error: None,
            cancel: CancellationToken::new(),
            stats: DeliveryStats::default(),
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn request(&self) -> ByteSpan {
        self.request
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Offset of the next byte [`Reader::read`] returns.
    pub fn offset(&self) -> u64 {
        self.position - self.pending.len() as u64
    }

    /// Total length of the resource, once known.
    pub fn content_length(&self) -> Option<u64> {
        self.resource.total_length()
    }

    pub fn prepared(&self) -> Option<&Prepared> {
        self.prepared.as_ref()
    }

    /// Resolve the content length and plan the request.
    ///
    /// When the length is not known yet the first uncovered byte is fetched
    /// right away (or awaited from another reader's fetch) so the answer
    /// carries it.
    pub async fn prepare(&mut self) -> Result<Prepared> {
        match self.state {
            ReaderState::Idle => {}
            ReaderState::Closed => return Err(CacheError::Closed),
            ReaderState::Failed => return Err(self.failure()),
            _ => {
                if let Some(prepared) = &self.prepared {
                    return Ok(prepared.clone());
                }
            }
        }
        self.state = ReaderState::Preparing;

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            result = self.plan_request() => result,
        };
        match result {
            Ok(prepared) => {
                self.prepared = Some(prepared.clone());
                self.state = ReaderState::Delivering;
                Ok(prepared)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn plan_request(&mut self) -> Result<Prepared> {
        if self.request.is_empty() {
            return Err(CacheError::InvalidRange(format!(
                "zero-length request at offset {}",
                self.request.offset
            )));
        }

        while self.resource.total_length().is_none() {
            match self.resource.next_source(self.position, self.request.end()) {
                Source::Fetch(ticket) => {
                    self.active = Some(self.resource.fetch(ticket).await?);
                    break;
                }
                Source::Wait(progress) => wait_for(&self.resource, self.position, progress).await,
                Source::Cached { .. } | Source::End => break,
            }
        }

        let total = self.resource.total_length();
        if let Some(total) = total {
            // an empty resource still answers a whole-resource read
            let empty_whole = total == 0 && self.request.offset == 0 && self.request.is_open();
            if self.request.offset >= total && !empty_whole {
                return Err(CacheError::OutOfRange {
                    offset: self.request.offset,
                    content_length: total,
                });
            }
        }

        let span = match total {
            Some(total) => self.request.clamp_to(total),
            None => self.request,
        };
        let plan = self.resource.plan(span);
        debug!(
            identity = %self.resource.identity(),
            request = ?self.request,
            plan = ?plan,
            "Planned read"
        );
        self.plan = plan.into();
        self.epoch = Some(self.resource.epoch());

        Ok(Prepared {
            content_length: total,
            offset: self.request.offset,
            length: span.length,
            content_type: self.resource.content_type(),
        })
    }

    /// Next chunk of at most `max_len` bytes, or `None` at the end of the
    /// request. Prepares the reader first if needed.
    pub async fn read(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        match self.state {
            ReaderState::Idle => {
                self.prepare().await?;
            }
            ReaderState::Preparing | ReaderState::Delivering => {}
            ReaderState::Done => return Ok(None),
            ReaderState::Failed => return Err(self.failure()),
            ReaderState::Closed => return Err(CacheError::Closed),
        }

        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
            result = self.next_chunk(max_len.max(1)) => result,
        };
        match result {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => {
                self.state = ReaderState::Done;
                self.release().await;
                Ok(None)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.take_pending(max_len)));
        }

        loop {
            if let Some(fetch) = self.active.as_mut() {
                match fetch.chunks.next().await {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        let committed = self
                            .resource
                            .commit(&fetch.ticket, fetch.position, &chunk)
                            .await?;
                        fetch.position += committed as u64;
                        if committed < chunk.len() {
                            // the claim is exhausted; the rest belongs to someone else
                            self.active = None;
                        }
                        if committed == 0 {
                            continue;
                        }
                        self.position += committed as u64;
                        self.stats.network += committed as u64;
                        self.pending = chunk.slice(..committed);
                        return Ok(Some(self.take_pending(max_len)));
                    }
                    Some(Err(e)) => {
                        self.active = None;
                        return Err(e);
                    }
                    None => {
                        if let Some(fetch) = self.active.take() {
                            self.finish_fetch(fetch)?;
                        }
                        continue;
                    }
                }
            }

            let Some(planned) = self.current_span() else {
                return Ok(None);
            };

            match self.resource.next_source(self.position, planned.span.end()) {
                Source::End => return Ok(None),
                Source::Cached { range, epoch } => {
                    self.check_epoch(epoch)?;
                    let length = range.length.min(max_len as u64);
                    let bytes = self
                        .resource
                        .read_cached(ContentRange { offset: range.offset, length }, epoch)
                        .await?;
                    self.position += length;
                    self.stats.cached += length;
                    return Ok(Some(bytes));
                }
                Source::Wait(progress) => wait_for(&self.resource, self.position, progress).await,
                Source::Fetch(ticket) => {
                    self.check_epoch(ticket.epoch)?;
                    self.active = Some(self.resource.fetch(ticket).await?);
                }
            }
        }
    }

    /// Check how a fetch stream ended.
    fn finish_fetch(&mut self, fetch: ActiveFetch) -> Result<()> {
        let expected = match (fetch.ticket.span.end(), self.resource.total_length()) {
            (Some(end), Some(total)) => Some(end.min(total)),
            (end, total) => end.or(total),
        };
        match expected {
            Some(end) if fetch.position < end => Err(CacheError::Network(format!(
                "origin closed the stream at {} before {}",
                fetch.position, end
            ))),
            Some(_) => Ok(()),
            None => {
                // open-ended fetch without a reported length: this is the end
                debug!(
                    identity = %self.resource.identity(),
                    total = fetch.position,
                    "Resource length discovered at end of stream"
                );
                self.resource.mark_end(fetch.position)
            }
        }
    }

    /// The planned span holding the cursor, re-planning the remainder of
    /// the request when the plan ran out.
    fn current_span(&mut self) -> Option<PlannedSpan> {
        while let Some(front) = self.plan.front() {
            if front.span.end().is_some_and(|end| end <= self.position) {
                self.plan.pop_front();
            } else {
                return Some(*front);
            }
        }

        let remaining = ByteSpan::new(
            self.position,
            self.request
                .end()
                .map(|end| end.saturating_sub(self.position)),
        );
        let plan = self.resource.plan(remaining);
        self.plan = plan.into();
        self.plan.front().copied()
    }

    fn check_epoch(&self, epoch: u64) -> Result<()> {
        match self.epoch {
            Some(expected) if expected != epoch => Err(CacheError::protocol(
                "resource content changed during the read",
            )),
            _ => Ok(()),
        }
    }

    fn take_pending(&mut self, max_len: usize) -> Bytes {
        let n = max_len.min(self.pending.len());
        self.pending.split_to(n)
    }

    fn failure(&self) -> CacheError {
        self.error.clone().unwrap_or(CacheError::Closed)
    }

    async fn fail(&mut self, error: CacheError) -> CacheError {
        if matches!(error, CacheError::Cancelled) && self.cancel.is_cancelled() {
            self.close().await;
            return error;
        }
        warn!(
            identity = %self.resource.identity(),
            offset = self.offset(),
            error = %error,
            "Reader failed"
        );
        self.state = ReaderState::Failed;
        self.error = Some(error.clone());
        self.active = None;
        self.pending = Bytes::new();
        self.release().await;
        error
    }

    /// Stop the reader, cancelling its fetch. Bytes already committed stay
    /// cached.
    pub async fn close(&mut self) {
        if self.state == ReaderState::Closed {
            return;
        }
        self.cancel.cancel();
        self.active = None;
        self.pending = Bytes::new();
        self.plan.clear();
        if !self.state.is_terminal() {
            debug!(identity = %self.resource.identity(), offset = self.offset(), "Reader closed");
        }
        self.state = ReaderState::Closed;
        self.release().await;
    }

    async fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            info!(
                identity = %self.resource.identity(),
                cached_bytes = self.stats.cached,
                network_bytes = self.stats.network,
                state = ?self.state,
                "Reader finished"
            );
            handle.release().await;
        }
    }

    /// Drive the reader on a task, publishing its progress as events.
    ///
    /// `buffer` bounds how many events may be queued ahead of the consumer.
    pub fn spawn(mut self, buffer: usize) -> ReaderEvents {
        let (tx, events) = mpsc::channel(buffer.max(1));
        // closing the events stops the reader, not the other way around
        let cancel = CancellationToken::new();
        self.cancel = cancel.child_token();
        let chunk_size = self.resource.read_chunk_size();

        tokio::spawn(async move {
            let mut reader = self;
            match reader.prepare().await {
                Ok(prepared) => {
                    if tx.send(ReaderEvent::Prepared(prepared)).await.is_err() {
                        reader.close().await;
                        return;
                    }
                }
                Err(e) => {
                    if !reader.cancel.is_cancelled() {
                        let _ = tx.send(ReaderEvent::Failed(e)).await;
                    }
                    reader.close().await;
                    return;
                }
            }

            loop {
                let event = match reader.read(chunk_size).await {
                    Ok(Some(bytes)) => ReaderEvent::Ready(bytes),
                    Ok(None) => ReaderEvent::Completed,
                    Err(_) if reader.cancel.is_cancelled() => break,
                    Err(e) => ReaderEvent::Failed(e),
                };
                let terminal = !matches!(event, ReaderEvent::Ready(_));
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
            reader.close().await;
        });

        ReaderEvents { events, cancel }
    }
}

/// Wait for another reader's fetch to move. Withdrawn claims and stalled
/// fetches both end the wait; the caller looks again.
async fn wait_for(resource: &Resource, position: u64, mut progress: watch::Receiver<u64>) {
    let stall_timeout = resource.fetch_stall_timeout();
    if tokio::time::timeout(stall_timeout, progress.changed())
        .await
        .is_err()
    {
        debug!(
            identity = %resource.identity(),
            position,
            "Fetch being waited on is stalled"
        );
    }
}
