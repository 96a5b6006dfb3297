// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Bit-exact ACPI structures. Pure data, no behaviour beyond field decoding.

use core::mem::size_of;

use bitflags::bitflags;

/// Plain little-endian firmware data: any byte pattern is a valid value.
///
/// # Safety
/// Implementors must be `repr(C, packed)` with integer/array fields only.
pub unsafe trait Plain: Copy {}

/// Copy a `T` out of `bytes` at `off`, if it fits.
pub fn read<T: Plain>(bytes: &[u8], off: usize) -> Option<T> {
    let end = off.checked_add(size_of::<T>())?;
    let src = bytes.get(off..end)?;
    // SAFETY: bounds checked above; T is Plain so every bit pattern is valid.
    Some(unsafe { core::ptr::read_unaligned(src.as_ptr() as *const T) })
}

/// Copy up to `size_of::<T>()` bytes, zero-filling a short tail.
pub fn read_prefix<T: Plain>(bytes: &[u8]) -> T {
    let mut buf = [0u8; 512];
    let n = bytes.len().min(size_of::<T>()).min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    // SAFETY: buf holds at least size_of::<T>() bytes for every table here.
    unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const T) }
}

pub fn checksum_ok(bytes: &[u8]) -> bool {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) == 0
}

pub const RSDP_SIG: &[u8; 8] = b"RSD PTR ";
pub const SIG_RSDT: &[u8; 4] = b"RSDT";
pub const SIG_XSDT: &[u8; 4] = b"XSDT";
pub const SIG_FADT: &[u8; 4] = b"FACP";
pub const SIG_MADT: &[u8; 4] = b"APIC";
pub const SIG_HPET: &[u8; 4] = b"HPET";

// ───────────────────── RSDP/RSDT/XSDT headers ─────────────────────

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Rsdp10 {
    pub sig: [u8; 8],  // "RSD PTR "
    pub checksum: u8,  // sum of first 20 bytes == 0
    pub oem_id: [u8; 6],
    pub rev: u8,       // 0 for ACPI 1.0
    pub rsdt_addr: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Rsdp20 {
    pub v1: Rsdp10,
    pub length: u32,
    pub xsdt_addr: u64,
    pub ext_checksum: u8, // over all 36 bytes
    pub _reserved: [u8; 3],
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct SdtHeader {
    pub sig: [u8; 4],
    pub len: u32,
    pub rev: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_table_id: [u8; 8],
    pub oem_rev: u32,
    pub creator_id: u32,
    pub creator_rev: u32,
}

// ───────────────────── Generic Address Structure ─────────────────────

pub const GAS_SYSMEM: u8 = 0;
pub const GAS_SYSIO: u8 = 1;
pub const GAS_PCICFG: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C, packed)]
pub struct Gas {
    pub addr_space: u8,
    pub bit_width: u8,
    pub bit_offset: u8,
    /// 0 undefined, 1 byte, 2 word, 3 dword, 4 qword.
    pub access_size: u8,
    pub addr: u64,
}

// ─────────────────────────────── FADT ───────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FadtFlags: u32 {
        const WBINVD          = 1 << 0;
        const PROC_C1         = 1 << 2;
        /// PM timer counts 32 bits instead of 24.
        const TMR_VAL_EXT     = 1 << 8;
        const RESET_REG_SUP   = 1 << 10;
        const FORCE_PHYS_DEST = 1 << 19;
        const HW_REDUCED_ACPI = 1 << 20;
        const _ = !0;
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Fadt {
    pub hdr: SdtHeader,
    pub fw_ctl: u32,
    pub dsdt: u32,
    pub _reserved: u8,
    pub preferred_pm_profile: u8,
    pub sci_irq: u16,
    pub smi_cmd_port: u32,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub s4_bios_req: u8,
    pub pstate_ctl: u8,
    pub pm1a_event_block: u32,
    pub pm1b_event_block: u32,
    pub pm1a_ctl_block: u32,
    pub pm1b_ctl_block: u32,
    pub pm2_ctl_block: u32,
    pub pm_timer_block: u32,
    pub gpe0_block: u32,
    pub gpe1_block: u32,
    pub pm1_event_len: u8,
    pub pm1_ctl_len: u8,
    pub pm2_ctl_len: u8,
    pub pm_timer_len: u8,
    pub gpe0_len: u8,
    pub gpe1_len: u8,
    pub gpe1_base: u8,
    pub cstate_ctl: u8,
    pub worst_c2_lat: u16,
    pub worst_c3_lat: u16,
    pub flush_size: u16,
    pub flush_stride: u16,
    pub duty_ofs: u8,
    pub duty_width: u8,
    pub day_alarm: u8,
    pub month_alarm: u8,
    pub century: u8,
    pub boot_arch_flags: u16, // ACPI 2.0+
    pub _reserved2: u8,
    pub flags: u32,
    pub reset_reg: Gas,
    pub reset_value: u8,
    pub _reserved3: [u8; 3],
    pub x_fw_ctl: u64,
    pub x_dsdt: u64,
    pub x_pm1a_event_block: Gas,
    pub x_pm1b_event_block: Gas,
    pub x_pm1a_ctl_block: Gas,
    pub x_pm1b_ctl_block: Gas,
    pub x_pm2_ctl_block: Gas,
    pub x_pm_timer_block: Gas,
    pub x_gpe0_block: Gas,
    pub x_gpe1_block: Gas,
}

impl Fadt {
    pub fn flags(&self) -> FadtFlags {
        FadtFlags::from_bits_retain(self.flags)
    }
}

// ─────────────────────────────── MADT ───────────────────────────────

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtHeader {
    pub hdr: SdtHeader, // "APIC"
    pub lapic_address: u32,
    pub flags: u32, // bit 0: dual 8259 present
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtRecordHeader {
    pub typ: u8,
    pub len: u8,
}

pub const MADT_LAPIC: u8 = 0;
pub const MADT_IOAPIC: u8 = 1;
pub const MADT_IRQ_OVERRIDE: u8 = 2;
pub const MADT_NMI_SOURCE: u8 = 3;
pub const MADT_LAPIC_NMI: u8 = 4;
pub const MADT_LAPIC_ADDR_OVERRIDE: u8 = 5;
pub const MADT_X2APIC: u8 = 9;

pub const MADT_CPU_ENABLED: u32 = 1 << 0;

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtLapic {
    pub hdr: MadtRecordHeader,
    pub cpu_id: u8,
    pub apic_id: u8,
    pub flags: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtIoApic {
    pub hdr: MadtRecordHeader,
    pub apic_id: u8,
    pub _reserved: u8,
    pub addr: u32,
    pub irq_base: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtIrqOverride {
    pub hdr: MadtRecordHeader,
    pub bus: u8,
    pub irq_src: u8,
    pub gsi: u32,
    pub flags: u16,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtLapicNmi {
    pub hdr: MadtRecordHeader,
    pub cpu_id: u8, // 0xFF = all
    pub flags: u16,
    pub lint: u8,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtLapicAddrOverride {
    pub hdr: MadtRecordHeader,
    pub _reserved: u16,
    pub addr: u64,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct MadtX2Apic {
    pub hdr: MadtRecordHeader,
    pub _reserved: u16,
    pub x2apic_id: u32,
    pub flags: u32,
    pub uid: u32,
}

// ─────────────────────────────── HPET ───────────────────────────────

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Hpet {
    pub hdr: SdtHeader,
    pub blk_id: u32,
    pub addr: Gas,
    pub number: u8,
    pub min_tick_count: u16,
    pub page_prot: u8,
}

unsafe impl Plain for Rsdp10 {}
unsafe impl Plain for Rsdp20 {}
unsafe impl Plain for SdtHeader {}
unsafe impl Plain for Gas {}
unsafe impl Plain for Fadt {}
unsafe impl Plain for MadtHeader {}
unsafe impl Plain for MadtRecordHeader {}
unsafe impl Plain for MadtLapic {}
unsafe impl Plain for MadtIoApic {}
unsafe impl Plain for MadtIrqOverride {}
unsafe impl Plain for MadtLapicNmi {}
unsafe impl Plain for MadtLapicAddrOverride {}
unsafe impl Plain for MadtX2Apic {}
unsafe impl Plain for Hpet {}

const _: () = assert!(size_of::<Rsdp10>() == 20);
const _: () = assert!(size_of::<Rsdp20>() == 36);
const _: () = assert!(size_of::<SdtHeader>() == 36);
const _: () = assert!(size_of::<Gas>() == 12);
const _: () = assert!(size_of::<Fadt>() == 244);
const _: () = assert!(size_of::<MadtHeader>() == 44);
const _: () = assert!(size_of::<MadtLapic>() == 8);
const _: () = assert!(size_of::<MadtIoApic>() == 12);
const _: () = assert!(size_of::<MadtIrqOverride>() == 10);
const _: () = assert!(size_of::<MadtLapicNmi>() == 6);
const _: () = assert!(size_of::<MadtLapicAddrOverride>() == 12);
const _: () = assert!(size_of::<MadtX2Apic>() == 16);
const _: () = assert!(size_of::<Hpet>() == 56);
