//! `ServerSession` binds an inbound framed `OSD_OP` message to the dispatcher
//! and hands the assembled reply back to the messenger.
//!
//! Implements `msgr2::Dispatcher`, registered for `CEPH_MSG_OSD_OP` only.
//! Every other message type is logged and dropped.

use crate::capabilities::{OutboundReply, ReplySink};
use crate::cursor::{BufferCursor, Direction};
use crate::dispatch::OpDispatcher;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::wire::WireCodec;
use async_trait::async_trait;
use msgr2::message::Message;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Message type for a composite object request, numerically identical to
/// the protocol's `CEPH_MSG_OSD_OP`.
pub const CEPH_MSG_OSD_OP: u16 = 42;
/// Reply counterpart, `CEPH_MSG_OSD_OPREPLY`.
pub const CEPH_MSG_OSD_OPREPLY: u16 = 43;

/// Owns the in-memory object table for one daemon and the current epoch
/// stamped into replies. `store` is behind a `tokio::sync::Mutex` rather than
/// bare ownership only because `Dispatcher::dispatch` takes `&self` (the
/// `MessageBus` calls handlers through a shared `Arc`); there is never
/// contention on this lock, since the single executor never runs two
/// requests concurrently.
pub struct ServerSession<R: ReplySink> {
    store: Mutex<ObjectStore>,
    epoch: std::sync::atomic::AtomicU32,
    reply_sink: Arc<R>,
}

impl<R: ReplySink> ServerSession<R> {
    pub fn new(noop_write: bool, epoch: u32, reply_sink: Arc<R>) -> Self {
        ServerSession {
            store: Mutex::new(ObjectStore::new(noop_write)),
            epoch: std::sync::atomic::AtomicU32::new(epoch),
            reply_sink,
        }
    }

    pub fn set_epoch(&self, epoch: u32) {
        self.epoch.store(epoch, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn epoch(&self) -> u32 {
        self.epoch.load(std::sync::atomic::Ordering::Relaxed)
    }

    #[cfg(test)]
    pub async fn object_count(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Final shutdown step: frees every object and block.
    pub async fn destroy_all(&self) {
        self.store.lock().await.destroy_all();
    }

    /// Decodes `msg` as an `OSD_OP` request, runs the dispatcher, and hands
    /// the encoded reply to the reply sink. Codec failures (`Truncated`/
    /// `Corrupted`/`UnsupportedVersion`) log and return without replying;
    /// the connection stays open and the client is expected to retry.
    pub async fn handle_osd_op(&self, tid: u64, front: &[u8], data: bytes::Bytes) -> Result<()> {
        let request = match WireCodec::decode_request(front, tid) {
            Ok(r) => r,
            Err(e) => {
                warn!(tid, error = %e, "dropping malformed OSD_OP");
                return Ok(());
            }
        };

        let mut cursor = BufferCursor::from_kernel_bytes(data, Direction::Read);
        let epoch = self.epoch();
        let reply = {
            let mut store = self.store.lock().await;
            OpDispatcher::dispatch(&mut store, &request, epoch, &mut cursor)
        };

        trace!(tid, num_ops = request.ops.len(), "dispatched OSD_OP");

        self.reply_sink
            .send_reply(OutboundReply {
                tid,
                front: reply.front.freeze(),
                data: reply.data,
            })
            .await
    }
}

#[async_trait]
impl<R: ReplySink> msgr2::Dispatcher for ServerSession<R> {
    async fn dispatch(&self, msg: Message) -> std::result::Result<(), denc::RadosError> {
        if msg.msg_type() != CEPH_MSG_OSD_OP {
            debug!(msg_type = msg.msg_type(), "ignoring non-OSD_OP message");
            return Ok(());
        }
        let tid = msg.tid();
        self.handle_osd_op(tid, &msg.front, msg.data)
            .await
            .map_err(|e| denc::RadosError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::OpCode;
    use bytes::{BufMut, Bytes, BytesMut};
    use denc::Denc;
    use std::sync::Mutex as StdMutex;

    struct CapturingSink {
        replies: StdMutex<Vec<OutboundReply>>,
    }

    impl CapturingSink {
        fn new() -> Self {
            CapturingSink {
                replies: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReplySink for CapturingSink {
        async fn send_reply(&self, reply: OutboundReply) -> Result<()> {
            self.replies.lock().unwrap().push(reply);
            Ok(())
        }
    }

    fn encode_write_request(name: &str, offset: u64, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(1); // spg version
        buf.put_u64_le(1); // pool
        buf.put_u32_le(0); // seed
        buf.put_i32_le(-1);
        buf.put_i8(0); // shard

        buf.put_u32_le(0); // raw_hash
        buf.put_u32_le(1); // epoch
        buf.put_u32_le(0); // flags

        buf.put_u8(2);
        buf.put_u8(2);
        buf.put_u32_le(0); // reqid

        buf.put_slice(&[0u8; 24]); // trace
        buf.put_u32_le(0); // client_inc

        buf.put_u32_le(5); // mtime seconds
        buf.put_u32_le(0); // mtime nanos

        buf.put_i64_le(1); // locator pool
        buf.put_i32_le(-1);
        let _ = <String as Denc>::encode(&String::new(), &mut buf, 0);
        let _ = <String as Denc>::encode(&String::new(), &mut buf, 0);
        buf.put_i64_le(0);

        let _ = <String as Denc>::encode(&name.to_string(), &mut buf, 0);

        buf.put_u16_le(1); // num_ops
        buf.put_u16_le(OpCode::Write as u16);
        buf.put_u32_le(0); // op flags
        buf.put_u32_le(payload.len() as u32);
        let mut union = [0u8; 54];
        {
            let mut u = &mut union[..];
            u.put_u64_le(offset);
            u.put_u64_le(payload.len() as u64);
            u.put_u64_le(0); // truncate_size
            u.put_u32_le(0); // truncate_seq
        }
        buf.put_slice(&union);

        buf.put_u64_le(u64::MAX - 1);
        buf.put_u64_le(0);
        buf.put_u32_le(0);

        buf.put_i32_le(0);
        buf.put_u64_le(0);

        buf
    }

    #[tokio::test]
    async fn handles_a_write_and_sends_one_reply() {
        let sink = Arc::new(CapturingSink::new());
        let session = ServerSession::new(false, 3, sink.clone());

        let front = encode_write_request("obj", 0, b"hi");
        session
            .handle_osd_op(1, &front, Bytes::from_static(b"hi"))
            .await
            .unwrap();

        assert_eq!(session.object_count().await, 1);
        assert_eq!(sink.replies.lock().unwrap().len(), 1);
        assert_eq!(sink.replies.lock().unwrap()[0].tid, 1);
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_without_a_reply() {
        let sink = Arc::new(CapturingSink::new());
        let session = ServerSession::new(false, 3, sink.clone());

        session
            .handle_osd_op(1, &[0x01], Bytes::new())
            .await
            .unwrap();

        assert!(sink.replies.lock().unwrap().is_empty());
    }
}
