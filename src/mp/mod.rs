// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Legacy MP tables, used when a BIOS has no ACPI.
//!
//! Fills the same routing model as the ACPI path, with two differences:
//! mapping records are in table order rather than GSI order, and CPU slot 0
//! is held for the boot processor.

pub mod tables;

use core::mem::size_of;

use crate::acpi::tables::{checksum_ok, read};
use crate::config::{MP_TABLE_MAP_GUESS, SCAN_STEP};
use crate::error::{Error, Result};
use crate::platform::{MapFlags, PhysMapper, PhysWindow};
use crate::routing::{IoApicDesc, IrqFlags, IrqMapping, ISA_IRQ_COUNT, RoutingModel, TableSource};

use tables::{
    BUS_ISA, BUS_PCI, BusEntry, CONFIG_SIG, CPU_BSP, CPU_ENABLED, ConfigHeader, CpuEntry,
    ENTRY_ADDR_MAP, ENTRY_BUS, ENTRY_BUS_COMPAT, ENTRY_BUS_HIERARCHY, ENTRY_CPU, ENTRY_IOAPIC,
    ENTRY_IOINTR, ENTRY_LINTR, ExtEntryHeader, FPS_SIG, FloatingPointer, IOAPIC_ENABLED,
    IntrEntry, IoApicEntry,
};

/// Scan `region` for a valid floating pointer. Returns its offset and the
/// physical address of the configuration table.
pub fn find_fps(region: &[u8]) -> Option<(usize, u64)> {
    let len = size_of::<FloatingPointer>();
    let mut off = 0;
    while off + len <= region.len() {
        let cand = &region[off..off + len];
        if &cand[..4] == FPS_SIG && checksum_ok(cand) {
            let fps: FloatingPointer = read(cand, 0)?;
            if fps.config_addr != 0 {
                log::info!(target: "mp", "MP floating pointer, config table at {:#x}", { fps.config_addr });
                return Some((off, fps.config_addr as u64));
            }
            // default configurations are not supported
            log::warn!(target: "mp", "MP floating pointer without a config table, feature byte {}", fps.features[0]);
        }
        off += SCAN_STEP;
    }
    None
}

/// Walk the configuration table at `phys` into `model`.
pub fn parse<P: PhysMapper + ?Sized>(p: &P, phys: u64, model: &mut RoutingModel) -> Result<()> {
    let mut window = PhysWindow::new(p, phys, MP_TABLE_MAP_GUESS, MapFlags::TABLE)?;
    let hdr: ConfigHeader =
        read(window.bytes(), 0).ok_or(Error::Truncated { what: "MP config header" })?;
    if &hdr.sig != CONFIG_SIG {
        log::error!(target: "mp", "config table at {:#x} has no PCMP signature", phys);
        return Err(Error::NoFirmwareTables);
    }
    let base_len = hdr.base_len as usize;
    let total = base_len + hdr.ext_len as usize;
    if total > window.len() {
        drop(window);
        window = PhysWindow::new(p, phys, total, MapFlags::TABLE)?;
    }
    let bytes = window.bytes();
    if base_len < size_of::<ConfigHeader>() || base_len > bytes.len() {
        return Err(Error::Truncated { what: "MP config table" });
    }
    if !checksum_ok(&bytes[..base_len]) {
        log::warn!(target: "mp", "config table checksum mismatch, continuing");
    }

    model.lapic_phys = hdr.lapic_addr as u64;
    // slot 0 is the boot processor's, whatever order the table lists it in
    model.apic_id_list.clear();
    model.apic_id_list.push(0);
    let mut have_bsp = false;

    let mut off = size_of::<ConfigHeader>();
    for _ in 0..hdr.entry_count {
        let Some(&typ) = bytes.get(off) else {
            log::warn!(target: "mp", "entry list runs past the table end");
            break;
        };
        let size = match typ {
            ENTRY_CPU => {
                let e: CpuEntry = read(bytes, off).ok_or(Error::Truncated { what: "MP CPU entry" })?;
                log::trace!(target: "mp", "CPU APIC ID {} ver {:#x} flags {:#x}", e.apic_id, e.apic_ver, e.flags);
                if e.flags & CPU_ENABLED == 0 {
                    log::debug!(target: "mp", "CPU APIC ID {} disabled", e.apic_id);
                } else if e.flags & CPU_BSP != 0 {
                    model.apic_id_list[0] = e.apic_id as u32;
                    have_bsp = true;
                } else {
                    model.apic_id_list.push(e.apic_id as u32);
                }
                size_of::<CpuEntry>()
            }
            ENTRY_BUS => {
                let e: BusEntry = read(bytes, off).ok_or(Error::Truncated { what: "MP bus entry" })?;
                if &e.name == BUS_PCI {
                    model.pci_bus_ids.push(e.bus_id);
                } else if &e.name == BUS_ISA {
                    if model.isa_bus_id.is_none() {
                        model.isa_bus_id = Some(e.bus_id);
                    } else {
                        log::error!(target: "mp", "second ISA bus {} ignored", e.bus_id);
                    }
                } else {
                    log::debug!(target: "mp", "bus {} of unsupported type dropped", e.bus_id);
                }
                size_of::<BusEntry>()
            }
            ENTRY_IOAPIC => {
                let e: IoApicEntry = read(bytes, off).ok_or(Error::Truncated { what: "MP IOAPIC entry" })?;
                if e.flags & IOAPIC_ENABLED != 0 {
                    log::trace!(target: "mp", "IOAPIC ID {} at {:#x}", e.id, { e.addr });
                    model.ioapics.push(IoApicDesc { id: e.id, addr: e.addr, irq_base: 0 });
                }
                size_of::<IoApicEntry>()
            }
            ENTRY_IOINTR => {
                let e: IntrEntry = read(bytes, off).ok_or(Error::Truncated { what: "MP interrupt entry" })?;
                io_interrupt(&e, model);
                size_of::<IntrEntry>()
            }
            ENTRY_LINTR => {
                let e: IntrEntry = read(bytes, off).ok_or(Error::Truncated { what: "MP interrupt entry" })?;
                log::trace!(
                    target: "mp",
                    "bus {} IRQ {} -> LAPIC {} LINT{}",
                    e.src_bus,
                    e.src_irq,
                    e.dest_id,
                    e.dest_pin
                );
                size_of::<IntrEntry>()
            }
            ENTRY_ADDR_MAP | ENTRY_BUS_HIERARCHY | ENTRY_BUS_COMPAT => {
                let e: ExtEntryHeader = read(bytes, off).ok_or(Error::Truncated { what: "MP extended entry" })?;
                log::trace!(target: "mp", "extended entry type {} for bus {}", e.typ, e.bus_id);
                (e.len as usize).max(size_of::<ExtEntryHeader>())
            }
            other => {
                log::error!(target: "mp", "unknown entry type {}, assuming 8 bytes", other);
                8
            }
        };
        off += size;
    }

    if !have_bsp {
        log::warn!(target: "mp", "no CPU entry flagged as boot processor");
    }
    model.source = TableSource::Mps;
    log::info!(
        target: "mp",
        "{} CPUs, {} IOAPICs, {} IRQ mappings, {} PCI buses",
        model.apic_id_list.len(),
        model.ioapics.len(),
        model.bus_irq_list.len(),
        model.pci_bus_ids.len()
    );
    Ok(())
}

fn io_interrupt(e: &IntrEntry, model: &mut RoutingModel) {
    let flags = IrqFlags(e.flags);
    if model.pci_bus_ids.contains(&e.src_bus) {
        let device = e.src_irq >> 2;
        let pin = e.src_irq & 3;
        log::trace!(
            target: "mp",
            "PCI device {} INT{}# -> IOAPIC {} pin {}",
            device,
            (b'A' + pin) as char,
            e.dest_id,
            e.dest_pin
        );
        model.bus_irq_list.push(IrqMapping {
            bus: e.src_bus,
            intr_type: e.intr_type,
            flags,
            device,
            irq: pin,
            ioapic_id: e.dest_id,
            intin: e.dest_pin,
        });
    } else if model.is_isa_bus(e.src_bus) {
        log::trace!(target: "mp", "ISA IRQ {} -> IOAPIC {} pin {}", e.src_irq, e.dest_id, e.dest_pin);
        if (e.src_irq as usize) < ISA_IRQ_COUNT {
            model.isa_irq_lookup[e.src_irq as usize] = model.bus_irq_list.len() as u8;
        }
        model.bus_irq_list.push(IrqMapping {
            bus: e.src_bus,
            intr_type: e.intr_type,
            flags,
            device: 0,
            irq: e.src_irq,
            ioapic_id: e.dest_id,
            intin: e.dest_pin,
        });
    } else {
        log::error!(
            target: "mp",
            "IRQ {} on unknown bus {} -> IOAPIC {} pin {}",
            e.src_irq,
            e.src_bus,
            e.dest_id,
            e.dest_pin
        );
    }
}
