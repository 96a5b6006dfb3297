// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Uncached device windows outside the HHDM.
//!
//! LAPIC and IOAPIC registers must not be reached through the direct map,
//! which is write-back. Every device window gets fresh 4 KiB pages in a
//! dedicated VA range, carved with a bump pointer.

use core::ptr::NonNull;

use x86_64::structures::paging::{
    Mapper, OffsetPageTable, Page, PageTableFlags as F, PhysFrame, Size4KiB,
    mapper::MapToError,
};
use x86_64::{PhysAddr, VirtAddr};

use crate::mem::simple_alloc::TinyBump;
use crate::platform::MapFlags;

pub const MMIO_BASE: u64 = 0xffff_d000_0000_0000;
pub const MMIO_SIZE: u64 = 1 << 30;

const PAGE: u64 = 0x1000;

const fn pa_mask_52(x: u64) -> u64 {
    x & 0x000F_FFFF_FFFF_FFFF
}

/// Page-aligned span covering `[phys, phys + len)`: (first page, offset into
/// it, page count).
pub fn page_span(phys: u64, len: usize) -> (u64, u64, u64) {
    let pa0 = pa_mask_52(phys) & !(PAGE - 1);
    let end = pa_mask_52(phys).saturating_add(len.max(1) as u64);
    let pages = end.div_ceil(PAGE) - pa0 / PAGE;
    (pa0, pa_mask_52(phys) - pa0, pages)
}

pub fn page_flags(flags: MapFlags) -> F {
    let mut f = F::PRESENT | F::NO_EXECUTE | F::GLOBAL;
    if flags.contains(MapFlags::WRITE) {
        f |= F::WRITABLE;
    }
    if flags.contains(MapFlags::NO_CACHE) {
        f |= F::NO_CACHE;
    }
    if flags.contains(MapFlags::WRITE_THROUGH) {
        f |= F::WRITE_THROUGH;
    }
    f
}

pub struct MmioWindow {
    mapper: OffsetPageTable<'static>,
    frames: TinyBump,
    next_va: u64,
}

impl MmioWindow {
    pub fn new(mapper: OffsetPageTable<'static>, frames: TinyBump) -> Self {
        Self { mapper, frames, next_va: MMIO_BASE }
    }

    pub fn contains(&self, va: u64) -> bool {
        (MMIO_BASE..MMIO_BASE + MMIO_SIZE).contains(&va)
    }

    /// Map a device range. VA space is never reused.
    pub fn map(&mut self, phys: u64, len: usize, flags: MapFlags) -> Option<NonNull<u8>> {
        let (pa0, off, pages) = page_span(phys, len);
        let size = pages * PAGE;
        if self.next_va + size > MMIO_BASE + MMIO_SIZE {
            log::error!(target: "mmio", "window exhausted mapping {:#x}+{:#x}", phys, len);
            return None;
        }
        let va0 = self.next_va;
        self.next_va += size;

        let flags = page_flags(flags);
        for i in 0..pages {
            let frame = PhysFrame::<Size4KiB>::containing_address(PhysAddr::new(pa0 + i * PAGE));
            let page = Page::<Size4KiB>::containing_address(VirtAddr::new(va0 + i * PAGE));
            // SAFETY: the page lies in the MMIO range, which nothing else maps.
            match unsafe { self.mapper.map_to(page, frame, flags, &mut self.frames) } {
                Ok(flush) => flush.flush(),
                Err(MapToError::FrameAllocationFailed) => {
                    log::error!(target: "mmio", "out of page-table frames");
                    return None;
                }
                Err(e) => {
                    log::error!(target: "mmio", "map {:#x} failed: {:?}", pa0 + i * PAGE, e);
                    return None;
                }
            }
        }
        log::trace!(target: "mmio", "{:#x}+{:#x} at {:#x}", phys, len, va0 + off);
        NonNull::new((va0 + off) as *mut u8)
    }

    pub fn unmap(&mut self, virt: NonNull<u8>, len: usize) {
        let (va0, _, pages) = page_span(virt.as_ptr() as u64, len);
        for i in 0..pages {
            let page = Page::<Size4KiB>::containing_address(VirtAddr::new(va0 + i * PAGE));
            match self.mapper.unmap(page) {
                Ok((_, flush)) => flush.flush(),
                Err(e) => log::warn!(target: "mmio", "unmap {:#x}: {:?}", va0 + i * PAGE, e),
            }
        }
    }
}
