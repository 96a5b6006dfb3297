// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use x86_64::{
    PhysAddr,
    structures::paging::{FrameAllocator, PhysFrame, Size4KiB},
};

/// Hands out page-table frames for the MMIO window. Never frees.
pub struct TinyBump {
    next: u64,
    end: u64,
}

impl TinyBump {
    /// `[start, end)` is rounded inward to whole pages.
    pub const fn new(start: u64, end: u64) -> Self {
        Self { next: (start + 0xFFF) & !0xFFF, end: end & !0xFFF }
    }

    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.next) / 0x1000
    }
}

unsafe impl FrameAllocator<Size4KiB> for TinyBump {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        if self.next + 0x1000 > self.end {
            return None;
        }
        let frame = PhysFrame::containing_address(PhysAddr::new(self.next));
        self.next += 0x1000;
        Some(frame)
    }
}
