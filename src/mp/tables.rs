// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! MultiProcessor Specification 1.4 structures.

use core::mem::size_of;

use crate::acpi::tables::Plain;

pub const FPS_SIG: &[u8; 4] = b"_MP_";
pub const CONFIG_SIG: &[u8; 4] = b"PCMP";

pub const ENTRY_CPU: u8 = 0;
pub const ENTRY_BUS: u8 = 1;
pub const ENTRY_IOAPIC: u8 = 2;
pub const ENTRY_IOINTR: u8 = 3;
pub const ENTRY_LINTR: u8 = 4;
pub const ENTRY_ADDR_MAP: u8 = 128;
pub const ENTRY_BUS_HIERARCHY: u8 = 129;
pub const ENTRY_BUS_COMPAT: u8 = 130;

pub const CPU_ENABLED: u8 = 1 << 0;
pub const CPU_BSP: u8 = 1 << 1;
pub const IOAPIC_ENABLED: u8 = 1 << 0;

pub const BUS_PCI: &[u8; 6] = b"PCI   ";
pub const BUS_ISA: &[u8; 6] = b"ISA   ";

/// Floating pointer structure, found by scanning low memory.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct FloatingPointer {
    pub sig: [u8; 4],
    pub config_addr: u32,
    pub length: u8,
    pub spec_rev: u8,
    pub checksum: u8,
    pub features: [u8; 5],
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ConfigHeader {
    pub sig: [u8; 4],
    pub base_len: u16,
    pub spec_rev: u8,
    pub checksum: u8,
    pub oem_id: [u8; 8],
    pub product_id: [u8; 12],
    pub oem_table_addr: u32,
    pub oem_table_len: u16,
    pub entry_count: u16,
    pub lapic_addr: u32,
    pub ext_len: u16,
    pub ext_checksum: u8,
    pub _reserved: u8,
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct CpuEntry {
    pub typ: u8,
    pub apic_id: u8,
    pub apic_ver: u8,
    pub flags: u8,
    pub signature: u32,
    pub features: u32,
    pub _reserved: [u32; 2],
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct BusEntry {
    pub typ: u8,
    pub bus_id: u8,
    pub name: [u8; 6],
}

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct IoApicEntry {
    pub typ: u8,
    pub id: u8,
    pub ver: u8,
    pub flags: u8,
    pub addr: u32,
}

/// I/O and local interrupt assignments share one layout.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct IntrEntry {
    pub typ: u8,
    pub intr_type: u8,
    pub flags: u16,
    pub src_bus: u8,
    pub src_irq: u8,
    pub dest_id: u8,
    pub dest_pin: u8,
}

/// Common prefix of the self-sized extended entries.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ExtEntryHeader {
    pub typ: u8,
    pub len: u8,
    pub bus_id: u8,
}

unsafe impl Plain for FloatingPointer {}
unsafe impl Plain for ConfigHeader {}
unsafe impl Plain for CpuEntry {}
unsafe impl Plain for BusEntry {}
unsafe impl Plain for IoApicEntry {}
unsafe impl Plain for IntrEntry {}
unsafe impl Plain for ExtEntryHeader {}

const _: () = assert!(size_of::<FloatingPointer>() == 16);
const _: () = assert!(size_of::<ConfigHeader>() == 44);
const _: () = assert!(size_of::<CpuEntry>() == 20);
const _: () = assert!(size_of::<BusEntry>() == 8);
const _: () = assert!(size_of::<IoApicEntry>() == 8);
const _: () = assert!(size_of::<IntrEntry>() == 8);
