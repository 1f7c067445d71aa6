//! In-memory RADOS object storage daemon core.
//!
//! Five components compose leaves-first: [`cursor::BufferCursor`] (scatter/
//! gather iteration), [`wire::WireCodec`] (request/reply encode-decode),
//! [`store::ObjectStore`] (the sparse block table), [`dispatch::OpDispatcher`]
//! (the per-request op loop), and [`session::ServerSession`] (binds a framed
//! message to the dispatcher). [`capabilities`] defines the traits the core
//! consumes from its collaborators (cluster map, monitor client, messenger,
//! page allocator); [`server`] and [`config`] wire those traits to this
//! workspace's `monclient`/`msgr2`/`cephconfig` crates for the daemon binary.

pub mod capabilities;
pub mod config;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod session;
pub mod store;
pub mod wire;

pub use capabilities::{ClusterMap, HeapPageAllocator, MonitorClient, OutboundReply, PageAllocator, ReplySink};
pub use config::{OsdCli, OsdOptions};
pub use cursor::{BufferCursor, CursorKind, Direction, Page};
pub use dispatch::{DispatchedReply, OpDispatcher};
pub use error::{OsdError, Result};
pub use server::{create_osd_server, MonClientAdapter, MonClusterMap, Server};
pub use session::ServerSession;
pub use store::{Block, ObjectIdentity, ObjectStore, StoredObject, Timestamp, BLOCK_SHIFT, BLOCK_SIZE};
pub use wire::{Op, OpCode, OpPayload, OpRequest, Spg, WireCodec};
