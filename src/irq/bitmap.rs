// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Fixed-capacity bitmap allocator.
//!
//! A set bit means "in use". Capacity is `WORDS * 64`; the interrupt vector
//! space uses four words. Searches are linear, which is fine at this size.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitAlloc<const WORDS: usize> {
    bits: [u64; WORDS],
}

impl<const WORDS: usize> Default for BitAlloc<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> BitAlloc<WORDS> {
    pub const CAPACITY: usize = WORDS * 64;

    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    pub fn is_set(&self, bit: usize) -> bool {
        bit < Self::CAPACITY && self.bits[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    fn set(&mut self, bit: usize) {
        self.bits[bit / 64] |= 1u64 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.bits[bit / 64] &= !(1u64 << (bit % 64));
    }

    pub fn count_free(&self) -> usize {
        Self::CAPACITY - self.bits.iter().map(|w| w.count_ones() as usize).sum::<usize>()
    }

    /// Lowest start of `count` contiguous free bits at or above `floor`,
    /// with the start a multiple of `1 << align_log2`.
    fn find(&self, floor: usize, align_log2: u32, count: usize) -> Option<usize> {
        if count == 0 || count > Self::CAPACITY {
            return None;
        }
        let step = 1usize.checked_shl(align_log2)?;
        let mut start = floor.checked_next_multiple_of(step)?;
        while start.checked_add(count).is_some_and(|end| end <= Self::CAPACITY) {
            // jump past the highest used bit of the candidate run
            match (start..start + count).rev().find(|&b| self.is_set(b)) {
                None => return Some(start),
                Some(used) => start = (used + 1).checked_next_multiple_of(step)?,
            }
        }
        None
    }

    fn mark(&mut self, start: usize, count: usize) {
        for b in start..start + count {
            self.set(b);
        }
    }

    /// Allocate `count` contiguous bits; lowest fit wins.
    pub fn alloc(&mut self, count: usize) -> Option<usize> {
        let start = self.find(0, 0, count)?;
        self.mark(start, count);
        Some(start)
    }

    /// Allocate `1 << log2n` bits starting on a `1 << log2n` boundary.
    pub fn alloc_aligned(&mut self, log2n: u32) -> Option<usize> {
        self.alloc_aligned_from(log2n, 0)
    }

    /// Like [`alloc_aligned`](Self::alloc_aligned) but never below `floor`.
    pub fn alloc_aligned_from(&mut self, log2n: u32, floor: usize) -> Option<usize> {
        let count = 1usize.checked_shl(log2n)?;
        let start = self.find(floor, log2n, count)?;
        self.mark(start, count);
        Some(start)
    }

    /// Claim a specific range. Returns `false` without touching anything if
    /// the range is out of bounds or any bit in it is already taken.
    pub fn take(&mut self, start: usize, count: usize) -> bool {
        let Some(end) = start.checked_add(count) else {
            return false;
        };
        if end > Self::CAPACITY || (start..end).any(|b| self.is_set(b)) {
            return false;
        }
        self.mark(start, count);
        true
    }

    /// Release a range. Bits past the capacity are ignored.
    pub fn free(&mut self, start: usize, count: usize) {
        let end = start.saturating_add(count).min(Self::CAPACITY);
        for b in start..end {
            self.clear(b);
        }
    }
}
