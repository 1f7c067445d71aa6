//! `ObjectStore` — the in-memory, sparsely-allocated block store.
//!
//! Object identity ordering follows the same bitwise-hash tie-break that
//! `denc::hobject::HObject` uses for the real `hobject_t` comparator: objects
//! with the same `(pool, namespace)` are bucketed by a bit-reversed hash
//! before falling back to name and snapshot, which is what gives CRUSH-style
//! object tables good locality under scrub/split. Blocks are kept in a
//! `BTreeMap`, whose `range` query gives the right-neighbour lookup the read
//! path needs for free.

use crate::cursor::{BufferCursor, Page};
use crate::error::{OsdError, Result};
use std::collections::BTreeMap;

/// Fixed block size: 64 KiB, a power of two and a multiple of any real page size.
pub const BLOCK_SIZE: u64 = 64 * 1024;
pub const BLOCK_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: u32,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp {
        seconds: 0,
        nanoseconds: 0,
    };
}

/// The addressable name of an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    pub pool: i64,
    pub hash: u32,
    pub name: Vec<u8>,
    pub key: Option<Vec<u8>>,
    pub namespace: Option<Vec<u8>>,
    pub snapshot_id: u64,
}

impl ObjectIdentity {
    fn sort_key(&self) -> (i64, &[u8], u32, &[u8], &[u8], u64) {
        let namespace = self.namespace.as_deref().unwrap_or(&[]);
        let key = self.key.as_deref().unwrap_or(&[]);
        (
            self.pool,
            namespace,
            self.hash.reverse_bits(),
            &self.name,
            key,
            self.snapshot_id,
        )
    }
}

impl PartialOrd for ObjectIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectIdentity {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// A single 64 KiB allocation unit within an object.
#[derive(Debug)]
pub struct Block {
    pub offset: u64,
    pub page: Page,
}

impl Block {
    fn new_zeroed(offset: u64) -> Self {
        Block {
            offset,
            page: Page::zeroed(BLOCK_SIZE as usize),
        }
    }
}

/// One logical object in the store.
#[derive(Debug)]
pub struct StoredObject {
    pub identity: ObjectIdentity,
    pub size: u64,
    pub mtime: Timestamp,
    pub blocks: BTreeMap<u64, Block>,
}

impl StoredObject {
    fn new(identity: ObjectIdentity) -> Self {
        StoredObject {
            identity,
            size: 0,
            mtime: Timestamp::ZERO,
            blocks: BTreeMap::new(),
        }
    }
}

/// The server's object index: an ordered map from identity to exclusive
/// ownership of a `StoredObject`.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: BTreeMap<ObjectIdentity, StoredObject>,
    /// `noop_write` short-circuits writes of >= 4096 bytes with no effect,
    /// per the configuration option of the same name.
    noop_write: bool,
}

impl ObjectStore {
    pub fn new(noop_write: bool) -> Self {
        ObjectStore {
            objects: BTreeMap::new(),
            noop_write,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    /// Drops every object and block, releasing all resident memory. Called
    /// during the shutdown sequence once the node is observed down.
    pub fn destroy_all(&mut self) {
        self.objects.clear();
    }

    /// WRITE: copies `length` bytes from `cursor` starting at `offset`,
    /// extending the object and allocating blocks as needed.
    pub fn write(
        &mut self,
        identity: &ObjectIdentity,
        offset: u64,
        length: u64,
        mtime: Timestamp,
        cursor: &mut BufferCursor,
    ) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        if self.noop_write && length >= 4096 {
            // Benchmarking fast path: acknowledge without touching storage.
            // Whether shorter writes should also take this path is left to
            // the caller; this store only implements the >= 4096 case named
            // in the configuration option.
            cursor.advance(length);
            return Ok(());
        }

        let object = self
            .objects
            .entry(identity.clone())
            .or_insert_with(|| StoredObject::new(identity.clone()));

        let mut dst_off = offset;
        let mut remaining = length;
        let mut modified = false;

        while remaining > 0 {
            let block_base = (dst_off / BLOCK_SIZE) * BLOCK_SIZE;
            let block = object
                .blocks
                .entry(block_base)
                .or_insert_with(|| Block::new_zeroed(block_base));

            let in_block_off = (dst_off - block_base) as usize;
            let chunk_len = remaining
                .min(BLOCK_SIZE - in_block_off as u64)
                .min(cursor.remaining()) as usize;
            if chunk_len == 0 {
                break;
            }

            let copied = cursor.copy_from(
                &mut block.page.as_mut_slice()[in_block_off..in_block_off + chunk_len],
                chunk_len,
            );
            if copied > 0 {
                modified = true;
            }
            if copied < chunk_len {
                // Partial copy-in fault: bytes already landed stay landed,
                // per the "writes are not transactional" rule.
                if modified {
                    object.mtime = mtime;
                    object.size = object.size.max(dst_off + copied as u64);
                }
                return Err(OsdError::BadAddress(
                    "copy-in fault while writing object data".into(),
                ));
            }

            dst_off += chunk_len as u64;
            remaining -= chunk_len as u64;
        }

        if modified {
            object.mtime = mtime;
            object.size = object.size.max(dst_off);
        }

        Ok(())
    }

    /// WRITEFULL: replaces the object's entire contents with `length` bytes
    /// from `cursor`, discarding anything resident past `length` — unlike
    /// `write`, which only ever extends an object, this one also shrinks it.
    pub fn write_full(
        &mut self,
        identity: &ObjectIdentity,
        length: u64,
        mtime: Timestamp,
        cursor: &mut BufferCursor,
    ) -> Result<()> {
        if self.noop_write && length >= 4096 {
            cursor.advance(length);
            return Ok(());
        }

        self.objects
            .entry(identity.clone())
            .or_insert_with(|| StoredObject::new(identity.clone()));

        self.write(identity, 0, length, mtime, cursor)?;

        let object = self
            .objects
            .get_mut(identity)
            .expect("write_full: object inserted above");
        Self::truncate_tail(object, length);
        object.size = length;
        object.mtime = mtime;

        Ok(())
    }

    /// Drops every block at or past `length` and zeroes the tail of the
    /// block straddling it, leaving the object exactly `length` bytes long.
    fn truncate_tail(object: &mut StoredObject, length: u64) {
        let stale: Vec<u64> = object.blocks.range(length..).map(|(&off, _)| off).collect();
        for off in stale {
            object.blocks.remove(&off);
        }

        let straddling_base = (length / BLOCK_SIZE) * BLOCK_SIZE;
        if let Some(block) = object.blocks.get_mut(&straddling_base) {
            let keep = (length - straddling_base) as usize;
            block.page.as_mut_slice()[keep..].fill(0);
        }
    }

    /// READ: returns up to `length` bytes starting at `offset`, zero-filling
    /// any holes and the tail past the object's resident blocks.
    pub fn read(&self, identity: &ObjectIdentity, offset: u64, length: u64) -> Result<Vec<u8>> {
        let object = self.objects.get(identity).ok_or(OsdError::NotFound)?;

        if offset >= object.size {
            return Ok(Vec::new());
        }

        let l = length.min(object.size - offset);
        let mut out = vec![0u8; l as usize];

        let mut read_off = offset;
        let mut out_off = 0usize;
        let mut remaining = l;

        let block_floor = (offset / BLOCK_SIZE) * BLOCK_SIZE;
        let mut blocks = object.blocks.range(block_floor..);

        let mut current = blocks.next();
        while remaining > 0 {
            let Some((&b_off, blk)) = current else {
                // No more resident blocks: the rest is a trailing hole.
                break;
            };

            if b_off > read_off {
                let hole = (b_off - read_off).min(remaining);
                out_off += hole as usize;
                read_off += hole;
                remaining -= hole;
                if remaining == 0 {
                    break;
                }
            }

            if b_off <= read_off && read_off < b_off + BLOCK_SIZE {
                let in_block_off = (read_off - b_off) as usize;
                let chunk = (BLOCK_SIZE - in_block_off as u64).min(remaining) as usize;
                out[out_off..out_off + chunk]
                    .copy_from_slice(&blk.page.as_slice()[in_block_off..in_block_off + chunk]);
                out_off += chunk;
                read_off += chunk as u64;
                remaining -= chunk as u64;
                current = blocks.next();
            } else {
                current = blocks.next();
            }
        }
        // Any remaining bytes (tail past the last resident block) are
        // already zero from the initial allocation.
        let _ = out_off;

        Ok(out)
    }

    /// STAT: `size` followed by `mtime`.
    pub fn stat(&self, identity: &ObjectIdentity) -> Result<(u64, Timestamp)> {
        let object = self.objects.get(identity).ok_or(OsdError::NotFound)?;
        Ok((object.size, object.mtime))
    }

    /// DELETE: drops the object and all of its blocks.
    pub fn delete(&mut self, identity: &ObjectIdentity) -> Result<()> {
        self.objects.remove(identity).ok_or(OsdError::NotFound)?;
        Ok(())
    }

    /// CREATE: lazily creates an empty object; no-ops if it already exists.
    pub fn create(&mut self, identity: &ObjectIdentity) -> Result<()> {
        self.objects
            .entry(identity.clone())
            .or_insert_with(|| StoredObject::new(identity.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Direction;
    use bytes::Bytes;

    fn id(name: &str) -> ObjectIdentity {
        ObjectIdentity {
            pool: 1,
            hash: 0,
            name: name.as_bytes().to_vec(),
            key: None,
            namespace: None,
            snapshot_id: u64::MAX - 1,
        }
    }

    fn write_pattern(store: &mut ObjectStore, identity: &ObjectIdentity, off: u64, data: &[u8]) {
        let mut cur = BufferCursor::from_kernel_bytes(Bytes::copy_from_slice(data), Direction::Read);
        store
            .write(identity, off, data.len() as u64, Timestamp::ZERO, &mut cur)
            .unwrap();
    }

    #[test]
    fn sparse_write_then_read_spans_hole() {
        // A read's effective length is capped at `object.size - offset` (step
        // 3 of the read algorithm / invariant I5), so a request for 200000
        // bytes against a 131172-byte object yields 131172 bytes, not 200000.
        let mut store = ObjectStore::new(false);
        let oid = id("obj");
        write_pattern(&mut store, &oid, 0, &[b'A'; 100]);
        write_pattern(&mut store, &oid, 2 * BLOCK_SIZE, &[b'B'; 100]);

        let out = store.read(&oid, 0, 200000).unwrap();
        assert_eq!(out.len(), 131172);
        assert!(out[..100].iter().all(|&b| b == b'A'));
        assert!(out[100..131072].iter().all(|&b| b == 0));
        assert!(out[131072..131172].iter().all(|&b| b == b'B'));

        let (size, _) = store.stat(&oid).unwrap();
        assert_eq!(size, 131172);
    }

    #[test]
    fn read_past_eof_is_empty() {
        let mut store = ObjectStore::new(false);
        let oid = id("obj");
        write_pattern(&mut store, &oid, 0, &[b'X'; 10]);
        let out = store.read(&oid, 20, 50).unwrap();
        assert_eq!(out.len(), 0);
    }

    #[test]
    fn stat_after_write_reports_size_and_mtime() {
        let mut store = ObjectStore::new(false);
        let oid = id("obj");
        let mtime = Timestamp {
            seconds: 42,
            nanoseconds: 0,
        };
        let mut cur = BufferCursor::from_kernel_bytes(Bytes::from_static(b"x"), Direction::Read);
        store
            .write(&oid, 5 * BLOCK_SIZE + 7, 1, mtime, &mut cur)
            .unwrap();

        let (size, stamp) = store.stat(&oid).unwrap();
        assert_eq!(size, 5 * BLOCK_SIZE + 8);
        assert_eq!(stamp, mtime);
    }

    #[test]
    fn write_full_truncates_stale_tail_from_a_larger_object() {
        let mut store = ObjectStore::new(false);
        let oid = id("obj");
        write_pattern(&mut store, &oid, 0, &[b'A'; BLOCK_SIZE as usize + 100]);

        let mut cur = BufferCursor::from_kernel_bytes(Bytes::from_static(b"hi"), Direction::Read);
        store
            .write_full(&oid, 2, Timestamp::ZERO, &mut cur)
            .unwrap();

        let (size, _) = store.stat(&oid).unwrap();
        assert_eq!(size, 2);
        let out = store.read(&oid, 0, 10).unwrap();
        assert_eq!(out.as_slice(), b"hi");

        let object = store.objects.get(&oid).unwrap();
        assert!(!object.blocks.contains_key(&BLOCK_SIZE));
    }

    #[test]
    fn write_full_on_missing_object_creates_it() {
        let mut store = ObjectStore::new(false);
        let oid = id("fresh");
        let mut cur = BufferCursor::from_kernel_bytes(Bytes::from_static(b"yo"), Direction::Read);
        store
            .write_full(&oid, 2, Timestamp::ZERO, &mut cur)
            .unwrap();
        let (size, _) = store.stat(&oid).unwrap();
        assert_eq!(size, 2);
    }

    #[test]
    fn write_across_two_blocks_allocates_both() {
        let mut store = ObjectStore::new(false);
        let oid = id("obj");
        let data = vec![0xABu8; (BLOCK_SIZE + 1) as usize];
        write_pattern(&mut store, &oid, BLOCK_SIZE - 1, &data);

        let object = store.objects.get(&oid).unwrap();
        assert_eq!(object.blocks.len(), 2);
        assert!(object.blocks.contains_key(&0));
        assert!(object.blocks.contains_key(&BLOCK_SIZE));
        assert_eq!(object.size, 2 * BLOCK_SIZE);
    }

    #[test]
    fn stat_on_missing_object_is_not_found() {
        let store = ObjectStore::new(false);
        let oid = id("missing");
        assert!(matches!(store.stat(&oid), Err(OsdError::NotFound)));
    }

    #[test]
    fn noop_write_skips_large_writes() {
        let mut store = ObjectStore::new(true);
        let oid = id("obj");
        let data = vec![0x11u8; 4096];
        write_pattern(&mut store, &oid, 0, &data);
        assert!(!store.contains(&oid));
    }

    #[test]
    fn object_identity_orders_by_pool_then_namespace_then_hash() {
        let a = ObjectIdentity {
            pool: 1,
            hash: 1,
            name: b"a".to_vec(),
            key: None,
            namespace: None,
            snapshot_id: 0,
        };
        let b = ObjectIdentity {
            pool: 2,
            hash: 0,
            name: b"a".to_vec(),
            key: None,
            namespace: None,
            snapshot_id: 0,
        };
        assert!(a < b);
    }
}
