// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use x86_64::{
    VirtAddr,
    registers::control::Cr3,
    structures::paging::{OffsetPageTable, PageTable},
};

/// Reject HHDM offsets that cannot be a direct map base.
pub fn check_hhdm(hhdm: u64) -> Result<(), &'static str> {
    if hhdm == 0 || (hhdm & 0xfff) != 0 {
        return Err("hhdm must be nonzero and 4KiB-aligned");
    }
    Ok(())
}

/// # Safety
/// - `hhdm` must be the physical→virtual offset for a valid direct map
///   (i.e., VA = PA + hhdm), 4 KiB aligned, and already mapped.
/// - CR3 must point to a valid L4 table.
/// - Only one mapper may exist at a time.
pub unsafe fn active_offset_mapper(hhdm: u64) -> Result<OffsetPageTable<'static>, &'static str> {
    check_hhdm(hhdm)?;

    let hhdm_va = VirtAddr::new(hhdm);
    let (l4_frame, _flags) = Cr3::read();
    let l4_virt = hhdm_va + l4_frame.start_address().as_u64();

    // SAFETY: caller guarantees HHDM is mapped and CR3 points to a valid L4.
    let l4_ptr: *mut PageTable = l4_virt.as_mut_ptr();
    let l4_ref: &mut PageTable = unsafe { &mut *l4_ptr };

    Ok(unsafe { OffsetPageTable::new(l4_ref, hhdm_va) })
}
