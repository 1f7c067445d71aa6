//! End-to-end request/reply scenarios driving `ServerSession` the way a real
//! connection would: encode a wire-format `OSD_OP` request, hand it to the
//! session, and inspect the captured reply. Mirrors the fake-dispatcher
//! style `monclient`'s integration tests use in place of a real TCP peer.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use denc::Denc;
use osd::capabilities::{OutboundReply, ReplySink};
use osd::wire::{OpCode, OP_FLAG_FAILOK};
use osd::ServerSession;
use std::sync::{Arc, Mutex};

struct CapturingSink {
    replies: Mutex<Vec<OutboundReply>>,
}

impl CapturingSink {
    fn new() -> Arc<Self> {
        Arc::new(CapturingSink {
            replies: Mutex::new(Vec::new()),
        })
    }

    fn last_rvals(&self) -> Vec<i32> {
        let replies = self.replies.lock().unwrap();
        let reply = replies.last().expect("no reply captured");
        decode_rvals(&reply.front)
    }
}

#[async_trait]
impl ReplySink for CapturingSink {
    async fn send_reply(&self, reply: OutboundReply) -> osd::Result<()> {
        self.replies.lock().unwrap().push(reply);
        Ok(())
    }
}

/// Minimal reply-front decoder: walks just far enough to pull out
/// `num_ops` and the trailing `rval` array, skipping everything this test
/// doesn't need to assert on.
fn decode_rvals(front: &Bytes) -> Vec<i32> {
    use bytes::Buf;
    let mut buf = &front[..];
    let _name = <String as Denc>::decode(&mut buf, 0).unwrap();
    buf.advance(1 + 8 + 4 + 4); // packed pg id
    buf.advance(8); // flags
    buf.advance(4); // result
    buf.advance(4 + 8); // bad_replay_version + zero u64
    buf.advance(4); // epoch
    let num_ops = buf.get_u32_le() as usize;
    for _ in 0..num_ops {
        buf.advance(2 + 4 + 4 + 54); // op struct
    }
    buf.advance(4); // attempts
    let mut rvals = Vec::with_capacity(num_ops);
    for _ in 0..num_ops {
        rvals.push(buf.get_i32_le());
    }
    rvals
}

struct OpSpec {
    opcode: u16,
    flags: u32,
    offset: u64,
    length: u64,
}

fn encode_request(name: &str, ops: &[OpSpec], payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(1); // spg version
    buf.put_u64_le(1); // pool
    buf.put_u32_le(0); // seed
    buf.put_i32_le(-1);
    buf.put_i8(0); // shard

    buf.put_u32_le(0); // raw_hash
    buf.put_u32_le(9); // epoch
    buf.put_u32_le(0); // flags

    buf.put_u8(2);
    buf.put_u8(2);
    buf.put_u32_le(0); // reqid

    buf.put_slice(&[0u8; 24]); // trace
    buf.put_u32_le(0); // client_inc

    buf.put_u32_le(42); // mtime seconds
    buf.put_u32_le(0); // mtime nanos

    buf.put_i64_le(1); // locator pool
    buf.put_i32_le(-1);
    let _ = <String as Denc>::encode(&String::new(), &mut buf, 0);
    let _ = <String as Denc>::encode(&String::new(), &mut buf, 0);
    buf.put_i64_le(0);

    let _ = <String as Denc>::encode(&name.to_string(), &mut buf, 0);

    buf.put_u16_le(ops.len() as u16);
    for op in ops {
        buf.put_u16_le(op.opcode);
        buf.put_u32_le(op.flags);
        buf.put_u32_le(op.length as u32);
        let mut union = [0u8; 54];
        {
            let mut u = &mut union[..];
            u.put_u64_le(op.offset);
            u.put_u64_le(op.length);
            u.put_u64_le(0);
            u.put_u32_le(0);
        }
        buf.put_slice(&union);
    }

    buf.put_u64_le(u64::MAX - 1); // snapshot_id
    buf.put_u64_le(0); // snap_seq
    buf.put_u32_le(0); // num_snaps

    buf.put_i32_le(0); // attempts
    buf.put_u64_le(0); // features

    let _ = payload;
    buf
}

#[tokio::test]
async fn sparse_write_then_read_spanning_hole() {
    const BLOCK_SIZE: u64 = 64 * 1024;
    let sink = CapturingSink::new();
    let session = ServerSession::new(false, 1, sink.clone());

    let a = vec![b'A'; 100];
    let front = encode_request(
        "obj",
        &[OpSpec {
            opcode: OpCode::Write as u16,
            flags: 0,
            offset: 0,
            length: 100,
        }],
        &a,
    );
    session
        .handle_osd_op(1, &front, Bytes::from(a.clone()))
        .await
        .unwrap();

    let b = vec![b'B'; 100];
    let front = encode_request(
        "obj",
        &[OpSpec {
            opcode: OpCode::Write as u16,
            flags: 0,
            offset: 2 * BLOCK_SIZE,
            length: 100,
        }],
        &b,
    );
    session
        .handle_osd_op(2, &front, Bytes::from(b.clone()))
        .await
        .unwrap();

    let front = encode_request(
        "obj",
        &[OpSpec {
            opcode: OpCode::Read as u16,
            flags: 0,
            offset: 0,
            length: 200000,
        }],
        &[],
    );
    session.handle_osd_op(3, &front, Bytes::new()).await.unwrap();

    let replies = sink.replies.lock().unwrap();
    let reply = replies.last().unwrap();
    assert_eq!(reply.data.len(), 131172);
    assert!(reply.data[..100].iter().all(|&b| b == b'A'));
    assert!(reply.data[100..131072].iter().all(|&b| b == 0));
    assert!(reply.data[131072..131172].iter().all(|&b| b == b'B'));
}

#[tokio::test]
async fn read_past_eof_yields_empty_outdata() {
    let sink = CapturingSink::new();
    let session = ServerSession::new(false, 1, sink.clone());

    let data = vec![b'X'; 10];
    let front = encode_request(
        "obj",
        &[OpSpec {
            opcode: OpCode::Write as u16,
            flags: 0,
            offset: 0,
            length: 10,
        }],
        &data,
    );
    session
        .handle_osd_op(1, &front, Bytes::from(data))
        .await
        .unwrap();

    let front = encode_request(
        "obj",
        &[OpSpec {
            opcode: OpCode::Read as u16,
            flags: 0,
            offset: 20,
            length: 50,
        }],
        &[],
    );
    session.handle_osd_op(2, &front, Bytes::new()).await.unwrap();

    let replies = sink.replies.lock().unwrap();
    assert_eq!(replies.last().unwrap().data.len(), 0);
}

#[tokio::test]
async fn composite_request_with_failok_read_then_write() {
    let sink = CapturingSink::new();
    let session = ServerSession::new(false, 1, sink.clone());

    let payload = b"hi".to_vec();
    let front = encode_request(
        "obj_x",
        &[
            OpSpec {
                opcode: OpCode::Read as u16,
                flags: OP_FLAG_FAILOK,
                offset: 0,
                length: 10,
            },
            OpSpec {
                opcode: OpCode::Write as u16,
                flags: 0,
                offset: 0,
                length: payload.len() as u64,
            },
        ],
        &payload,
    );
    session
        .handle_osd_op(1, &front, Bytes::from(payload))
        .await
        .unwrap();

    let rvals = sink.last_rvals();
    assert_eq!(rvals.len(), 2);
    assert_eq!(rvals[0], -2); // ENOENT, swallowed by FAILOK
    assert_eq!(rvals[1], 0);

    let front = encode_request(
        "obj_x",
        &[OpSpec {
            opcode: OpCode::Stat as u16,
            flags: 0,
            offset: 0,
            length: 0,
        }],
        &[],
    );
    session.handle_osd_op(2, &front, Bytes::new()).await.unwrap();
    let replies = sink.replies.lock().unwrap();
    let stat_reply = replies.last().unwrap();
    assert_eq!(stat_reply.data.len(), 16);
}

#[tokio::test]
async fn decode_rejection_sends_no_reply() {
    let sink = CapturingSink::new();
    let session = ServerSession::new(false, 1, sink.clone());

    // A single byte of front matter can't even satisfy the spg header.
    session.handle_osd_op(1, &[0x01], Bytes::new()).await.unwrap();

    assert!(sink.replies.lock().unwrap().is_empty());
}
