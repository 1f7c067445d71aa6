//! Capability traits the OSD core consumes but does not implement: the
//! cluster-map view, the monitor client, the framed messenger, and the page
//! allocator. Production wiring (`server.rs`) adapts `monclient::MonClient`
//! and `msgr2`'s `MessageBus` to these traits; tests substitute fakes rather
//! than a real TCP connection.

use crate::cursor::Page;
use crate::error::Result;
use async_trait::async_trait;
use denc::UuidD;
use std::time::Duration;

/// Read-only view of the cluster's current membership epoch, queried by the
/// dispatcher (to stamp replies) and by the shutdown sequence (to poll for
/// this node going down).
pub trait ClusterMap: Send + Sync {
    /// The epoch of the map this view currently reflects.
    fn epoch(&self) -> u32;

    /// Whether `osd_id` is present in the map bound to `addr`.
    fn contains(&self, osd_id: u32, addr: &str) -> bool;

    /// Whether the map marks `osd_id` down.
    fn is_down(&self, osd_id: u32) -> bool;
}

/// The monitor-facing half of the shutdown/startup sequence: mark down,
/// boot, CRUSH registration, and blocking until a fresher map arrives.
#[async_trait]
pub trait MonitorClient: Send + Sync {
    async fn mark_me_down(&self, osd_id: u32) -> Result<()>;
    async fn boot(&self, osd_id: u32, fsid: UuidD) -> Result<()>;
    async fn add_to_crush(&self, osd_id: u32, weight: f64) -> Result<()>;
    /// Blocks (subject to `timeout`) until a map newer than the view the
    /// caller currently holds is observed, returning the new epoch.
    async fn wait_for_latest_map(&self, timeout: Duration) -> Result<u32>;
}

/// One fully assembled reply, ready to be handed back over the connection
/// the originating request arrived on.
pub struct OutboundReply {
    pub tid: u64,
    pub front: bytes::Bytes,
    pub data: bytes::Bytes,
}

/// The subset of messenger behaviour the OSD core needs: sending a reply
/// back down the connection a request came in on. Connection lifecycle
/// (accept, fault, refcounting) lives entirely in `ServerSession`/`server.rs`,
/// which is the thing that implements this trait against `msgr2`.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: OutboundReply) -> Result<()>;
}

/// Allocates the zeroed, block-sized (or reply-buffer-sized) pages the store
/// and the codec both hand out. The in-memory store never actually fails to
/// allocate in this implementation (host memory stands in for a real page
/// allocator), but the trait boundary is kept so a future revision can plug
/// in a real arena with a hard ceiling.
pub trait PageAllocator: Send + Sync {
    fn alloc(&self, len: usize) -> Result<Page>;
}

/// The allocator this daemon actually runs with: every allocation is a fresh
/// zeroed heap buffer, and `alloc` never fails. Named explicitly (rather than
/// folding into `Page::zeroed` call sites) so swapping in a bounded allocator
/// later is a one-place change.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPageAllocator;

impl PageAllocator for HeapPageAllocator {
    fn alloc(&self, len: usize) -> Result<Page> {
        Ok(Page::zeroed(len))
    }
}
