// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! ACPI table discovery: RSDP → RSDT/XSDT → FADT, MADT, HPET.

pub mod madt;
pub mod pm_timer;
pub mod rsdp;
pub mod rsdt;
pub mod tables;

use crate::platform::PhysMapper;
use crate::routing::{RootTable, RoutingModel, TableSource};

/// Walk everything reachable from a validated root pointer into `model`.
///
/// Returns `false` when the root table itself is unusable; individual bad
/// sub-tables are skipped and do not fail the walk.
pub fn parse_root<P: PhysMapper + ?Sized>(p: &P, root: RootTable, model: &mut RoutingModel) -> bool {
    match rsdt::walk(p, root, model) {
        Ok(()) => {
            model.source = TableSource::Acpi;
            // ACPI speaks GSIs; ISA is bus 0 by convention
            model.isa_bus_id = Some(0);
            model.resolve_gsi_targets();
            log::info!(
                target: "acpi",
                "{} CPUs, {} IOAPICs, {} IRQ mappings, {} HPETs",
                model.apic_id_list.len(),
                model.ioapics.len(),
                model.bus_irq_list.len(),
                model.hpet_list.len()
            );
            true
        }
        Err(e) => {
            log::error!(target: "acpi", "root table at {:#x}: {}", root.addr, e);
            false
        }
    }
}
