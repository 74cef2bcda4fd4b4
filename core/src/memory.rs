//! Offset arena for tensor memory planning.
//!
//! The arena works in two stages. While planning, [`ArenaAllocator::alloc`]
//! and [`ArenaAllocator::free`] move byte offsets around without any backing
//! storage; [`ArenaAllocator::realize`] then performs the one real
//! allocation, sized by the high-water mark, and freezes the plan. A graph
//! can therefore discover its whole working set before committing a single
//! byte of host memory.

use crate::internal::*;
use crate::runtime::{Buffer, Runtime, BUFFER_ALIGNMENT};
use std::collections::BTreeMap;

/// A first-fit free-list arena handing out byte offsets.
#[derive(Debug)]
pub struct ArenaAllocator {
    runtime: Arc<dyn Runtime>,
    /// Bytes currently planned live.
    used: usize,
    /// High-water mark; the size `realize` will request.
    peak: usize,
    alignment: usize,
    /// Free blocks keyed by start offset. Never holds two touching blocks.
    free_blocks: BTreeMap<usize, usize>,
    buffer: Option<Arc<Buffer>>,
}

impl ArenaAllocator {
    pub fn new(runtime: Arc<dyn Runtime>) -> ArenaAllocator {
        ArenaAllocator {
            runtime,
            used: 0,
            peak: 0,
            alignment: BUFFER_ALIGNMENT,
            free_blocks: BTreeMap::new(),
            buffer: None,
        }
    }

    /// Plan `size` bytes and return their offset in the arena.
    ///
    /// First fit: the lowest-offset free block large enough wins and is
    /// split if oversized. With no candidate, the arena grows at the tail,
    /// swallowing the highest free block when it touches the high-water
    /// mark.
    pub fn alloc(&mut self, size: usize) -> CulvertResult<usize> {
        ensure!(self.buffer.is_none(), "allocation in a realized arena");
        let size = self.aligned(size);
        let fit = self
            .free_blocks
            .iter()
            .find(|(_, &len)| len >= size)
            .map(|(&offset, &len)| (offset, len));
        if let Some((offset, len)) = fit {
            self.free_blocks.remove(&offset);
            if len > size {
                self.free_blocks.insert(offset + size, len - size);
            }
            self.used += size;
            self.peak = self.peak.max(offset + size);
            trace!("arena: {} bytes at {} (first fit)", size, offset);
            return Ok(offset);
        }
        let last = self.free_blocks.iter().next_back().map(|(&offset, &len)| (offset, len));
        let offset = match last {
            Some((last, len)) if last + len == self.peak => {
                self.free_blocks.remove(&last);
                last
            }
            _ => self.peak,
        };
        self.peak = offset + size;
        self.used += size;
        trace!("arena: {} bytes at {} (tail)", size, offset);
        Ok(offset)
    }

    /// Return a planned block to the free list, coalescing with both
    /// neighbours when they touch.
    pub fn free(&mut self, offset: usize, size: usize) -> CulvertResult<()> {
        ensure!(self.buffer.is_none(), "free in a realized arena");
        let size = self.aligned(size);
        self.used -= size;
        let (mut start, mut len) = (offset, size);
        let prev = self.free_blocks.range(..start).next_back().map(|(&o, &l)| (o, l));
        if let Some((prev, prev_len)) = prev {
            if prev + prev_len == start {
                self.free_blocks.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        if let Some(next_len) = self.free_blocks.get(&(start + len)).copied() {
            self.free_blocks.remove(&(start + len));
            len += next_len;
        }
        trace!("arena: freed {} bytes at {}, block now {}+{}", size, offset, start, len);
        self.free_blocks.insert(start, len);
        Ok(())
    }

    /// Perform the single backing allocation, sized by the high-water mark.
    ///
    /// Idempotent: later calls return the same buffer. Afterwards the plan
    /// is frozen and `alloc`/`free` are refused.
    pub fn realize(&mut self) -> CulvertResult<Arc<Buffer>> {
        if let Some(buffer) = &self.buffer {
            return Ok(buffer.clone());
        }
        ensure!(self.peak > 0, "realizing an arena with no planned allocation");
        let buffer = Arc::new(Buffer::realize(self.runtime.clone(), self.peak)?);
        debug!("arena: realized, used {} bytes, peak {} bytes", self.used, self.peak);
        self.buffer = Some(buffer.clone());
        Ok(buffer)
    }

    /// Bytes currently planned live.
    pub fn used(&self) -> usize {
        self.used
    }

    /// High-water mark of the plan so far.
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn is_realized(&self) -> bool {
        self.buffer.is_some()
    }

    fn aligned(&self, size: usize) -> usize {
        size.div_ceil(self.alignment) * self.alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuRuntime;
    use proptest::prelude::*;

    fn arena() -> ArenaAllocator {
        ArenaAllocator::new(Arc::new(CpuRuntime))
    }

    /// Free bytes plus live bytes account for the whole arena, and no two
    /// free blocks touch.
    fn check_consistent(arena: &ArenaAllocator) {
        let free: usize = arena.free_blocks.values().sum();
        assert_eq!(free + arena.used, arena.peak);
        let mut last_end = None;
        for (&offset, &len) in &arena.free_blocks {
            if let Some(last_end) = last_end {
                assert!(offset > last_end, "touching free blocks at {}", offset);
            }
            last_end = Some(offset + len);
        }
    }

    #[test]
    fn first_fit_and_coalescing() {
        let mut arena = arena();
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(24).unwrap();
        let c = arena.alloc(8).unwrap();
        assert_eq!((a, b, c), (0, 16, 40));
        arena.free(b, 24).unwrap();
        // first fit reuses b's slot and leaves the 8-byte remainder free
        let d = arena.alloc(16).unwrap();
        assert_eq!(d, 16);
        assert_eq!(arena.free_blocks.get(&32), Some(&8));
        arena.free(a, 16).unwrap();
        // freeing c merges with the remainder block
        arena.free(c, 8).unwrap();
        assert_eq!(arena.free_blocks.get(&32), Some(&16));
        assert_eq!(arena.peak(), 48);
        assert_eq!(arena.used(), 16);
        check_consistent(&arena);
    }

    #[test]
    fn sizes_are_aligned_up() {
        let mut arena = arena();
        assert_eq!(arena.alloc(13).unwrap(), 0);
        assert_eq!(arena.alloc(1).unwrap(), 16);
        assert_eq!(arena.alloc(40).unwrap(), 24);
        assert_eq!(arena.peak(), 64);
        check_consistent(&arena);
    }

    #[test]
    fn tail_extends_through_last_free_block() {
        let mut arena = arena();
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(16).unwrap();
        arena.free(a, 16).unwrap();
        arena.free(b, 16).unwrap();
        // one coalesced block [0, 32) abutting the peak: a large request
        // extends it instead of growing past it
        assert_eq!(arena.alloc(48).unwrap(), 0);
        assert_eq!(arena.peak(), 48);
        check_consistent(&arena);
    }

    #[test]
    fn tail_extension_checks_highest_block_not_lowest() {
        let mut arena = arena();
        let a = arena.alloc(8).unwrap();
        let b = arena.alloc(8).unwrap();
        let c = arena.alloc(8).unwrap();
        assert_eq!((a, b, c), (0, 8, 16));
        arena.free(a, 8).unwrap();
        arena.free(c, 8).unwrap();
        // free blocks: (0,8) and (16,8); only the highest abuts the peak
        assert_eq!(arena.alloc(24).unwrap(), 16);
        assert_eq!(arena.peak(), 40);
        assert_eq!(arena.used(), 32);
        check_consistent(&arena);
    }

    #[test]
    fn realize_freezes_the_plan() {
        let mut arena = arena();
        let offset = arena.alloc(24).unwrap();
        let buffer = arena.realize().unwrap();
        assert_eq!(buffer.len(), arena.peak());
        // idempotent
        let again = arena.realize().unwrap();
        assert_eq!(buffer.base(), again.base());
        assert!(arena.alloc(8).is_err());
        assert!(arena.free(offset, 24).is_err());
    }

    #[test]
    fn realize_without_plan_is_refused() {
        assert!(arena().realize().is_err());
    }

    proptest! {
        #[test]
        fn plan_stays_consistent(sizes in proptest::collection::vec(1usize..200, 1..32)) {
            let mut arena = arena();
            let mut live: Vec<(usize, usize)> = vec![];
            for (ix, &size) in sizes.iter().enumerate() {
                let offset = arena.alloc(size).unwrap();
                // live allocations never overlap
                let end = offset + size;
                for &(lo, ls) in &live {
                    prop_assert!(end <= lo || lo + ls <= offset,
                        "[{}, {}) overlaps [{}, {})", offset, end, lo, lo + ls);
                }
                live.push((offset, size));
                // free every other allocation as we go
                if ix % 2 == 1 {
                    let (o, s) = live.swap_remove(ix % live.len());
                    arena.free(o, s).unwrap();
                }
                check_consistent(&arena);
            }
            for (o, s) in live.drain(..) {
                arena.free(o, s).unwrap();
                check_consistent(&arena);
            }
            prop_assert_eq!(arena.used(), 0);
        }
    }
}
