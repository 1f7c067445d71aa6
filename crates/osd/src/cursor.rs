//! `BufferCursor` — a scatter/gather iterator over mixed backing memory.
//!
//! Three real backing kinds (`UserSegments`, `KernelSegments`, `PageVector`)
//! plus a `Discard` sink are expressed as one tagged union (`Segment`), with
//! the hot loop (`for_each_chunk`) doing a single dynamic dispatch per chunk
//! rather than per byte. Every segment is owned by the cursor itself
//! (`bytes::BytesMut` / an owned page), which sidesteps the lifetime
//! bookkeeping the borrowed-foreign-memory version of this design would need
//! while keeping the same external contract: callers hand the cursor their
//! own destination/source slice and the cursor copies across the boundary.

use crate::error::{OsdError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// One block-sized (or smaller, for the final chunk of a reply buffer) page.
#[derive(Debug)]
pub struct Page(Box<[u8]>);

impl Page {
    pub fn zeroed(len: usize) -> Self {
        Page(vec![0u8; len].into_boxed_slice())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    UserSegments,
    KernelSegments,
    PageVector,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A single backing chunk. `User` additionally carries an optional simulated
/// fault point: real foreign-memory faults aren't reachable from a pure-Rust
/// process, so tests exercise `BadAddress` by asking a `User` segment to stop
/// copying after a given offset.
#[derive(Debug)]
enum Segment {
    User(BytesMut, Option<usize>),
    Kernel(BytesMut),
    Page(Page),
}

impl Segment {
    fn len(&self) -> usize {
        match self {
            Segment::User(b, _) => b.len(),
            Segment::Kernel(b) => b.len(),
            Segment::Page(p) => p.len(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Segment::User(b, _) => b.as_mut(),
            Segment::Kernel(b) => b.as_mut(),
            Segment::Page(p) => p.as_mut_slice(),
        }
    }

    fn fault_point(&self) -> Option<usize> {
        match self {
            Segment::User(_, fault) => *fault,
            _ => None,
        }
    }
}

/// A chunk of cursor-owned memory handed to a `for_each_chunk` callback.
pub struct ChunkMut<'a> {
    pub bytes: &'a mut [u8],
}

/// Unified scatter/gather iterator. See module docs.
pub struct BufferCursor {
    kind: CursorKind,
    segments: Vec<Segment>,
    seg_idx: usize,
    seg_offset: usize,
    count: u64,
    direction: Direction,
}

impl BufferCursor {
    /// Builds a cursor over owned, already in-process byte ranges
    /// (`KernelSegments`).
    pub fn from_kernel_bytes(data: Bytes, direction: Direction) -> Self {
        let total = data.len() as u64;
        let seg = Segment::Kernel(BytesMut::from(&data[..]));
        Self {
            kind: CursorKind::KernelSegments,
            segments: vec![seg],
            seg_idx: 0,
            seg_offset: 0,
            count: total,
            direction,
        }
    }

    /// Builds a cursor over a vector of freshly allocated or reused pages
    /// (`PageVector`). Used both for reply-buffer assembly and, internally,
    /// for walking an object's block map.
    pub fn from_pages(pages: Vec<Page>, direction: Direction) -> Self {
        let total: u64 = pages.iter().map(|p| p.len() as u64).sum();
        Self {
            kind: CursorKind::PageVector,
            segments: pages.into_iter().map(Segment::Page).collect(),
            seg_idx: 0,
            seg_offset: 0,
            count: total,
            direction,
        }
    }

    /// Builds a cursor over simulated foreign ("userspace") memory. `faults`
    /// marks, per segment index, an offset at which a copy should report
    /// `BadAddress` instead of completing — the Rust stand-in for a real
    /// checked copy-in/copy-out primitive.
    pub fn from_user_segments(
        segments: Vec<(Bytes, Option<usize>)>,
        direction: Direction,
    ) -> Self {
        let total: u64 = segments.iter().map(|(b, _)| b.len() as u64).sum();
        Self {
            kind: CursorKind::UserSegments,
            segments: segments
                .into_iter()
                .map(|(b, fault)| Segment::User(BytesMut::from(&b[..]), fault))
                .collect(),
            seg_idx: 0,
            seg_offset: 0,
            count: total,
            direction,
        }
    }

    /// A sink/source that silently advances without touching memory.
    pub fn discard(total_len: u64, direction: Direction) -> Self {
        Self {
            kind: CursorKind::Discard,
            segments: Vec::new(),
            seg_idx: 0,
            seg_offset: 0,
            count: total_len,
            direction,
        }
    }

    pub fn kind(&self) -> CursorKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remaining(&self) -> u64 {
        self.count
    }

    /// Skips `min(n, count)` bytes without copying.
    pub fn advance(&mut self, n: u64) -> u64 {
        let mut left = n.min(self.count);
        let advanced = left;
        if self.kind == CursorKind::Discard {
            self.count -= left;
            return advanced;
        }
        while left > 0 && self.seg_idx < self.segments.len() {
            let seg_len = self.segments[self.seg_idx].len() as u64;
            let seg_remaining = seg_len - self.seg_offset as u64;
            let step = left.min(seg_remaining);
            self.seg_offset += step as usize;
            left -= step;
            self.count -= step;
            if self.seg_offset as u64 == seg_len {
                self.seg_idx += 1;
                self.seg_offset = 0;
            }
        }
        advanced
    }

    /// Copies up to `n` bytes from the cursor into `dst`, advancing by the
    /// number actually copied. For `UserSegments` a simulated fault stops the
    /// copy early and the shortfall is reported via the return value, not an
    /// `Err` (matching `copy_from`'s `actually_copied` contract); the caller
    /// is expected to turn a short copy on a `UserSegments` cursor into
    /// `BadAddress` if it cares.
    pub fn copy_from(&mut self, dst: &mut [u8], n: usize) -> usize {
        let mut copied = 0usize;
        let want = n.min(dst.len()).min(self.count as usize);
        if self.kind == CursorKind::Discard {
            for b in dst.iter_mut().take(want) {
                *b = 0;
            }
            self.count -= want as u64;
            return want;
        }
        while copied < want && self.seg_idx < self.segments.len() {
            let seg = &self.segments[self.seg_idx];
            let seg_len = seg.len();
            let avail = seg_len - self.seg_offset;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_offset = 0;
                continue;
            }
            if let Some(fault_at) = seg.fault_point() {
                if self.seg_offset >= fault_at {
                    break;
                }
            }
            let mut step = avail.min(want - copied);
            if let Some(fault_at) = seg.fault_point() {
                step = step.min(fault_at - self.seg_offset);
            }
            if step == 0 {
                break;
            }
            let seg = &self.segments[self.seg_idx];
            let src = match seg {
                Segment::User(b, _) => &b[self.seg_offset..self.seg_offset + step],
                Segment::Kernel(b) => &b[self.seg_offset..self.seg_offset + step],
                Segment::Page(p) => &p.as_slice()[self.seg_offset..self.seg_offset + step],
            };
            dst[copied..copied + step].copy_from_slice(src);
            copied += step;
            self.seg_offset += step;
            self.count -= step as u64;
            if self.seg_offset == seg_len {
                self.seg_idx += 1;
                self.seg_offset = 0;
            }
        }
        copied
    }

    /// Symmetric to `copy_from`: copies up to `n` bytes from `src` into the
    /// cursor's own backing memory.
    pub fn copy_to(&mut self, src: &[u8], n: usize) -> usize {
        let mut copied = 0usize;
        let want = n.min(src.len()).min(self.count as usize);
        if self.kind == CursorKind::Discard {
            self.count -= want as u64;
            return want;
        }
        while copied < want && self.seg_idx < self.segments.len() {
            let seg_len = self.segments[self.seg_idx].len();
            let avail = seg_len - self.seg_offset;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_offset = 0;
                continue;
            }
            let fault_at = self.segments[self.seg_idx].fault_point();
            if let Some(fault_at) = fault_at {
                if self.seg_offset >= fault_at {
                    break;
                }
            }
            let mut step = avail.min(want - copied);
            if let Some(fault_at) = fault_at {
                step = step.min(fault_at - self.seg_offset);
            }
            if step == 0 {
                break;
            }
            let off = self.seg_offset;
            self.segments[self.seg_idx].as_mut_slice()[off..off + step]
                .copy_from_slice(&src[copied..copied + step]);
            copied += step;
            self.seg_offset += step;
            self.count -= step as u64;
            if self.seg_offset == seg_len {
                self.seg_idx += 1;
                self.seg_offset = 0;
            }
        }
        copied
    }

    /// Invokes `f` over consecutive non-empty chunks until `n` bytes have
    /// been consumed, or `f` returns an error. Returns the total number of
    /// bytes the callback was given.
    pub fn for_each_chunk(
        &mut self,
        n: usize,
        mut f: impl FnMut(ChunkMut<'_>) -> Result<()>,
    ) -> Result<usize> {
        let want = n.min(self.count as usize);
        let mut done = 0usize;
        if self.kind == CursorKind::Discard {
            self.count -= want as u64;
            return Ok(want);
        }
        while done < want && self.seg_idx < self.segments.len() {
            let seg_len = self.segments[self.seg_idx].len();
            let avail = seg_len - self.seg_offset;
            if avail == 0 {
                self.seg_idx += 1;
                self.seg_offset = 0;
                continue;
            }
            let step = avail.min(want - done);
            let off = self.seg_offset;
            let chunk = &mut self.segments[self.seg_idx].as_mut_slice()[off..off + step];
            f(ChunkMut { bytes: chunk })?;
            done += step;
            self.seg_offset += step;
            self.count -= step as u64;
            if self.seg_offset == seg_len {
                self.seg_idx += 1;
                self.seg_offset = 0;
            }
        }
        Ok(done)
    }
}

/// Appends `data` to `buf`, used by callers assembling a reply's `Bytes` from
/// cursor-owned pages without an extra round trip through `Vec<u8>`.
pub fn append_page(buf: &mut BytesMut, page: &Page) {
    buf.put_slice(page.as_slice());
}

pub fn bad_address(context: &str) -> OsdError {
    OsdError::BadAddress(context.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_segment_copy_from_advances_count() {
        let data = Bytes::from_static(b"hello world");
        let mut cur = BufferCursor::from_kernel_bytes(data, Direction::Read);
        assert_eq!(cur.remaining(), 11);
        let mut dst = [0u8; 5];
        let n = cur.copy_from(&mut dst, 5);
        assert_eq!(n, 5);
        assert_eq!(&dst, b"hello");
        assert_eq!(cur.remaining(), 6);
    }

    #[test]
    fn advance_skips_without_copy() {
        let data = Bytes::from_static(b"0123456789");
        let mut cur = BufferCursor::from_kernel_bytes(data, Direction::Read);
        let advanced = cur.advance(4);
        assert_eq!(advanced, 4);
        assert_eq!(cur.remaining(), 6);
        let mut dst = [0u8; 6];
        cur.copy_from(&mut dst, 6);
        assert_eq!(&dst, b"456789");
    }

    #[test]
    fn advance_clamps_to_remaining() {
        let data = Bytes::from_static(b"ab");
        let mut cur = BufferCursor::from_kernel_bytes(data, Direction::Read);
        let advanced = cur.advance(100);
        assert_eq!(advanced, 2);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn copy_to_writes_into_page_vector() {
        let pages = vec![Page::zeroed(4), Page::zeroed(4)];
        let mut cur = BufferCursor::from_pages(pages, Direction::Write);
        let copied = cur.copy_to(b"abcdefgh", 8);
        assert_eq!(copied, 8);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn copy_crosses_segment_boundary() {
        let pages = vec![Page::zeroed(3), Page::zeroed(3)];
        let mut cur = BufferCursor::from_pages(pages, Direction::Write);
        let copied = cur.copy_to(b"abcdef", 6);
        assert_eq!(copied, 6);
    }

    #[test]
    fn user_segment_fault_stops_copy_early() {
        let segments = vec![(Bytes::from_static(b"0123456789"), Some(4))];
        let mut cur = BufferCursor::from_user_segments(segments, Direction::Read);
        let mut dst = [0u8; 10];
        let copied = cur.copy_from(&mut dst, 10);
        assert_eq!(copied, 4);
        assert_eq!(&dst[..4], b"0123");
    }

    #[test]
    fn discard_sink_advances_without_storing() {
        let mut cur = BufferCursor::discard(10, Direction::Write);
        let copied = cur.copy_to(b"0123456789", 10);
        assert_eq!(copied, 10);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn for_each_chunk_sees_every_byte_once() {
        let pages = vec![Page::zeroed(2), Page::zeroed(2), Page::zeroed(2)];
        let mut cur = BufferCursor::from_pages(pages, Direction::Write);
        let mut total = 0usize;
        cur.for_each_chunk(6, |chunk| {
            total += chunk.bytes.len();
            chunk.bytes.fill(0xAB);
            Ok(())
        })
        .unwrap();
        assert_eq!(total, 6);
        assert_eq!(cur.remaining(), 0);
    }
}
