// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! MADT record walk: processors, IOAPICs, interrupt source overrides.

use core::mem::size_of;

use crate::acpi::tables::{
    self, MADT_CPU_ENABLED, MADT_IOAPIC, MADT_IRQ_OVERRIDE, MADT_LAPIC, MADT_LAPIC_ADDR_OVERRIDE,
    MADT_LAPIC_NMI, MADT_NMI_SOURCE, MADT_X2APIC, MadtHeader, MadtIoApic, MadtIrqOverride,
    MadtLapic, MadtLapicAddrOverride, MadtLapicNmi, MadtRecordHeader, MadtX2Apic,
};
use crate::error::{Error, Result};
use crate::routing::{IoApicDesc, IrqFlags, RoutingModel};

/// Fold a checksum-validated MADT into the routing model.
pub fn process(bytes: &[u8], model: &mut RoutingModel) -> Result<()> {
    let mh: MadtHeader = tables::read(bytes, 0).ok_or(Error::Truncated { what: "MADT" })?;
    model.lapic_phys = mh.lapic_address as u64;
    model.madt_flags = mh.flags;
    log::debug!(
        target: "acpi",
        "MADT: LAPIC at {:#x}, flags {:#x}",
        { mh.lapic_address },
        { mh.flags }
    );

    // ISA 0-15 are identity until an override says otherwise
    model.seed_isa_identity();

    let mut p = size_of::<MadtHeader>();
    while p + size_of::<MadtRecordHeader>() <= bytes.len() {
        let Some(hdr) = tables::read::<MadtRecordHeader>(bytes, p) else {
            break;
        };
        let len = hdr.len as usize;
        if len < size_of::<MadtRecordHeader>() || p + len > bytes.len() {
            log::warn!(target: "acpi", "MADT record type {} at +{} has bad length {}", hdr.typ, p, len);
            break;
        }
        let rec = &bytes[p..p + len];

        match hdr.typ {
            MADT_LAPIC => {
                if let Some(r) = tables::read::<MadtLapic>(rec, 0) {
                    if r.flags & MADT_CPU_ENABLED != 0 {
                        log::trace!(target: "acpi", "CPU {} APIC ID {}", r.cpu_id, r.apic_id);
                        model.apic_id_list.push(r.apic_id as u32);
                    } else {
                        log::trace!(target: "acpi", "CPU {} APIC ID {} disabled, skipped", r.cpu_id, r.apic_id);
                    }
                }
            }
            MADT_IOAPIC => {
                if let Some(r) = tables::read::<MadtIoApic>(rec, 0) {
                    let desc = IoApicDesc { id: r.apic_id, addr: r.addr, irq_base: r.irq_base };
                    log::trace!(
                        target: "acpi",
                        "IOAPIC ID {} at {:#x}, GSI base {}",
                        desc.id,
                        desc.addr,
                        desc.irq_base
                    );
                    model.ioapics.push(desc);
                }
            }
            MADT_IRQ_OVERRIDE => {
                if let Some(r) = tables::read::<MadtIrqOverride>(rec, 0) {
                    let flags = IrqFlags(r.flags);
                    log::trace!(
                        target: "acpi",
                        "IRQ override bus {} IRQ {} -> GSI {} ({:?}, {:?})",
                        r.bus,
                        r.irq_src,
                        { r.gsi },
                        flags.polarity(),
                        flags.trigger()
                    );
                    model.apply_isa_override(r.bus, r.irq_src, r.gsi, flags);
                }
            }
            MADT_LAPIC_ADDR_OVERRIDE => {
                if let Some(r) = tables::read::<MadtLapicAddrOverride>(rec, 0) {
                    model.lapic_phys = r.addr;
                    log::debug!(target: "acpi", "LAPIC address override {:#x}", { r.addr });
                }
            }
            MADT_X2APIC => {
                if let Some(r) = tables::read::<MadtX2Apic>(rec, 0) {
                    if r.flags & MADT_CPU_ENABLED != 0 {
                        log::trace!(target: "acpi", "x2APIC ID {}", { r.x2apic_id });
                        model.apic_id_list.push(r.x2apic_id);
                    } else {
                        log::trace!(target: "acpi", "x2APIC ID {} disabled, skipped", { r.x2apic_id });
                    }
                }
            }
            MADT_LAPIC_NMI => {
                if let Some(r) = tables::read::<MadtLapicNmi>(rec, 0) {
                    log::trace!(target: "acpi", "LAPIC NMI cpu {} LINT{}", r.cpu_id, r.lint);
                }
            }
            MADT_NMI_SOURCE => log::trace!(target: "acpi", "NMI source record skipped"),
            other => log::trace!(target: "acpi", "MADT record type {} ignored", other),
        }

        p += len;
    }
    Ok(())
}
