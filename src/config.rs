// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Bring-up tunables and fixed platform constants.

use log::LevelFilter;

use crate::bootinfo::BootInfo;

// ───────────────────── firmware scan regions ─────────────────────

/// BIOS data area word holding the EBDA segment.
pub const BDA_EBDA_SEG: u64 = 0x40E;
pub const EBDA_SCAN_LEN: usize = 0x400;
/// Top KiB of conventional memory, where old BIOSes park the MP pointer.
pub const BASE_MEM_TOP: u64 = 0x9FC00;
pub const BASE_MEM_TOP_LEN: usize = 0x400;
/// BIOS ROM shadow searched for the RSDP.
pub const BIOS_ROM_ACPI: u64 = 0xE0000;
pub const BIOS_ROM_ACPI_LEN: usize = 0x20000;
/// BIOS ROM searched for the MP floating pointer.
pub const BIOS_ROM_MP: u64 = 0xF0000;
pub const BIOS_ROM_MP_LEN: usize = 0x10000;
/// Root pointers sit on 16-byte boundaries.
pub const SCAN_STEP: usize = 16;

/// Speculative mapping size for an SDT before its length is known.
pub const TABLE_MAP_GUESS: usize = 64 << 10;
/// Speculative mapping size for an MP configuration table.
pub const MP_TABLE_MAP_GUESS: usize = 64 << 10;

// ───────────────────────── clocks ─────────────────────────

/// ACPI PM timer input clock.
pub const PM_TIMER_HZ: u64 = 3_579_545;
/// Raw PM ticks in roughly one millisecond.
pub const CALIBRATION_PM_TICKS: u32 = 3579;
/// Fallback calibration window when no PM timer exists.
pub const CALIBRATION_FALLBACK_NS: u64 = 1_000_000;
/// SIPI stagger budget, split across all CPUs (one 60Hz frame).
pub const SIPI_STAGGER_BUDGET_NS: u64 = 16_666_666;

/// Knobs for one bring-up run.
#[derive(Debug, Clone, Copy)]
pub struct SmpConfig {
    pub enable_acpi: bool,
    /// Legacy MP tables; compiled in, off unless asked for.
    pub enable_mps: bool,
    /// RSDP handed over by the UEFI loader, tried before the BIOS scan.
    pub rsdp_hint: Option<u64>,
    pub timer_hz: u32,
    /// Physical address of the real-mode AP trampoline page.
    pub trampoline_phys: u32,
    pub init_settle_ms: u64,
    /// Per-AP wait for the started-counter to move.
    pub ap_start_timeout_ns: u64,
    pub ap_poll_interval_ns: u64,
    pub log_level: LevelFilter,
}

impl Default for SmpConfig {
    fn default() -> Self {
        Self {
            enable_acpi: true,
            enable_mps: false,
            rsdp_hint: None,
            timer_hz: 60,
            trampoline_phys: 0x8000,
            init_settle_ms: 10,
            ap_start_timeout_ns: 100_000_000,
            ap_poll_interval_ns: 10_000,
            log_level: LevelFilter::Info,
        }
    }
}

impl SmpConfig {
    pub fn from_bootinfo(boot: &BootInfo) -> Self {
        let mut cfg = Self::default();
        if boot.rsdp_addr != 0 {
            cfg.rsdp_hint = Some(boot.rsdp_addr);
        }
        if boot.ap_trampoline_phys != 0 {
            cfg.trampoline_phys = boot.ap_trampoline_phys;
        }
        if boot.flags.contains(crate::bootinfo::BootFlags::LEGACY_MPS) {
            cfg.enable_mps = true;
        }
        if boot.flags.contains(crate::bootinfo::BootFlags::VERBOSE) {
            cfg.log_level = LevelFilter::Trace;
        }
        cfg
    }

    /// SIPI vector: the trampoline's 4 KiB page number below 1 MiB.
    pub fn trampoline_page(&self) -> u8 {
        ((self.trampoline_phys >> 12) & 0xFF) as u8
    }
}
