// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use bitflags::bitflags;

bitflags! {
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct BootFlags: u32 {
        /// Firmware is legacy BIOS; search for MP tables too.
        const LEGACY_MPS = 1 << 0;
        /// Trace-level logging.
        const VERBOSE    = 1 << 1;
    }
}

/// Hand-off block from the loader.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BootInfo {
    pub rsdp_addr: u64, // 0 when the loader found none
    pub hhdm_base: u64, // VA = PA + hhdm_base
    pub early_heap_paddr: u64,
    pub early_heap_len: u64,
    /// Free physical range for page-table frames of the MMIO window.
    pub pt_scratch_paddr: u64,
    pub pt_scratch_len: u64,
    /// 4 KiB page below 1 MiB already holding the AP trampoline.
    pub ap_trampoline_phys: u32,
    pub flags: BootFlags,
}

impl BootInfo {
    pub const fn empty() -> Self {
        Self {
            rsdp_addr: 0,
            hhdm_base: 0,
            early_heap_paddr: 0,
            early_heap_len: 0,
            pt_scratch_paddr: 0,
            pt_scratch_len: 0,
            ap_trampoline_phys: 0,
            flags: BootFlags::empty(),
        }
    }
}
