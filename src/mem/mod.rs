// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod mapper;
pub mod simple_alloc;

use linked_list_allocator::LockedHeap;

use crate::bootinfo::BootInfo;

/// Hand the loader's early heap, seen through the HHDM, to `heap`.
///
/// # Safety
/// The early heap range must be free RAM covered by the HHDM and must not be
/// handed out twice.
pub unsafe fn init_heap(heap: &LockedHeap, boot: &BootInfo) -> Result<(), &'static str> {
    mapper::check_hhdm(boot.hhdm_base)?;
    if boot.early_heap_len < 0x1000 {
        return Err("early heap too small");
    }
    let start = (boot.hhdm_base + boot.early_heap_paddr) as *mut u8;
    unsafe { heap.lock().init(start, boot.early_heap_len as usize) };
    Ok(())
}
