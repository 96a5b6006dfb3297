// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Interrupt routing model.
//!
//! Filled once by the ACPI or MP-table parser on the boot CPU, read by the
//! IOAPIC layer and the bring-up orchestrator afterwards.

extern crate alloc;
use alloc::vec::Vec;

use crate::acpi::tables::{Fadt, Gas};

pub const ISA_IRQ_COUNT: usize = 16;

/// Interrupt type of a routing record (MPS and ACPI share the encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IntrType {
    Apic = 0,
    Nmi = 1,
    Smi = 2,
    ExtInt = 3,
}

impl IntrType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Apic),
            1 => Some(Self::Nmi),
            2 => Some(Self::Smi),
            3 => Some(Self::ExtInt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    BusDefault,
    ActiveHigh,
    ActiveLow,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    BusDefault,
    Edge,
    Level,
    Reserved,
}

/// MPS/MADT interrupt flags: polarity in bits 0-1, trigger mode in bits 2-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IrqFlags(pub u16);

impl IrqFlags {
    const POLARITY_SHIFT: u16 = 0;
    const TRIGGER_SHIFT: u16 = 2;
    const FIELD_MASK: u16 = 0b11;

    pub const fn new(polarity: Polarity, trigger: Trigger) -> Self {
        let p = match polarity {
            Polarity::BusDefault => 0,
            Polarity::ActiveHigh => 1,
            Polarity::Reserved => 2,
            Polarity::ActiveLow => 3,
        };
        let t = match trigger {
            Trigger::BusDefault => 0,
            Trigger::Edge => 1,
            Trigger::Reserved => 2,
            Trigger::Level => 3,
        };
        Self((p << Self::POLARITY_SHIFT) | (t << Self::TRIGGER_SHIFT))
    }

    /// Legacy ISA lines: edge-triggered, active-high.
    pub const ISA: Self = Self::new(Polarity::ActiveHigh, Trigger::Edge);

    pub const fn polarity(self) -> Polarity {
        match (self.0 >> Self::POLARITY_SHIFT) & Self::FIELD_MASK {
            0 => Polarity::BusDefault,
            1 => Polarity::ActiveHigh,
            3 => Polarity::ActiveLow,
            _ => Polarity::Reserved,
        }
    }

    pub const fn trigger(self) -> Trigger {
        match (self.0 >> Self::TRIGGER_SHIFT) & Self::FIELD_MASK {
            0 => Trigger::BusDefault,
            1 => Trigger::Edge,
            3 => Trigger::Level,
            _ => Trigger::Reserved,
        }
    }
}

/// One device interrupt line and where it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqMapping {
    pub bus: u8,
    pub intr_type: u8,
    pub flags: IrqFlags,
    /// PCI device number (MP tables only).
    pub device: u8,
    /// Bus-relative IRQ (ISA IRQ, or PCI INTx pin).
    pub irq: u8,
    pub ioapic_id: u8,
    pub intin: u8,
}

impl IrqMapping {
    /// Identity placeholder for ISA IRQ / GSI `n`.
    pub const fn isa_identity(n: u8) -> Self {
        Self {
            bus: 0,
            intr_type: IntrType::Apic as u8,
            flags: IrqFlags::ISA,
            device: 0,
            irq: n,
            ioapic_id: 0,
            intin: n,
        }
    }
}

/// An IOAPIC as described by firmware, before it is brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicDesc {
    pub id: u8,
    pub addr: u32,
    /// First GSI (ACPI) or logical IRQ (MP tables) served by pin 0.
    pub irq_base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpetInfo {
    pub block_id: u32,
    pub base: Gas,
    pub number: u8,
    pub min_tick: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdtWidth {
    Rsdt32,
    Xsdt64,
}

impl SdtWidth {
    pub const fn stride(self) -> usize {
        match self {
            SdtWidth::Rsdt32 => 4,
            SdtWidth::Xsdt64 => 8,
        }
    }

    pub const fn bits(self) -> u32 {
        self.stride() as u32 * 8
    }
}

/// Where the root table lives. `len == 0` means "read it from the header".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootTable {
    pub addr: u64,
    pub len: u32,
    pub width: SdtWidth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSource {
    None,
    Acpi,
    Mps,
}

pub const MADT_FLAG_PCAT_COMPAT: u32 = 1 << 0;

#[derive(Debug, Clone)]
pub struct RoutingModel {
    pub source: TableSource,
    pub pci_bus_ids: Vec<u8>,
    pub isa_bus_id: Option<u8>,
    /// Indexed by GSI on ACPI systems, by discovery order on MP systems.
    pub bus_irq_list: Vec<IrqMapping>,
    /// ISA IRQ → index into `bus_irq_list`.
    pub isa_irq_lookup: [u8; ISA_IRQ_COUNT],
    /// Slot 0 is the BSP on MP systems; MADT order otherwise.
    pub apic_id_list: Vec<u32>,
    pub ioapics: Vec<IoApicDesc>,
    pub lapic_phys: u64,
    pub madt_flags: u32,
    pub hpet_list: Vec<HpetInfo>,
    pub fadt: Option<Fadt>,
    pub root: Option<RootTable>,
}

impl Default for RoutingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingModel {
    pub fn new() -> Self {
        let mut isa_irq_lookup = [0u8; ISA_IRQ_COUNT];
        for (i, slot) in isa_irq_lookup.iter_mut().enumerate() {
            *slot = i as u8;
        }
        Self {
            source: TableSource::None,
            pci_bus_ids: Vec::new(),
            isa_bus_id: None,
            bus_irq_list: Vec::new(),
            isa_irq_lookup,
            apic_id_list: Vec::new(),
            ioapics: Vec::new(),
            lapic_phys: 0,
            madt_flags: 0,
            hpet_list: Vec::new(),
            fadt: None,
            root: None,
        }
    }

    /// Seed GSIs 0-15 as identity ISA mappings, once.
    pub fn seed_isa_identity(&mut self) {
        if !self.bus_irq_list.is_empty() {
            return;
        }
        for n in 0..ISA_IRQ_COUNT as u8 {
            self.bus_irq_list.push(IrqMapping::isa_identity(n));
            self.isa_irq_lookup[n as usize] = n;
        }
    }

    /// Apply an ACPI interrupt source override: ISA `src` arrives on `gsi`.
    pub fn apply_isa_override(&mut self, bus: u8, src: u8, gsi: u32, flags: IrqFlags) -> bool {
        self.seed_isa_identity();
        let Ok(gsi) = u8::try_from(gsi) else {
            log::warn!(target: "acpi", "override of IRQ {} to GSI {} out of range, ignored", src, gsi);
            return false;
        };
        while self.bus_irq_list.len() <= gsi as usize {
            let n = self.bus_irq_list.len() as u8;
            self.bus_irq_list.push(IrqMapping::isa_identity(n));
        }
        let m = &mut self.bus_irq_list[gsi as usize];
        m.bus = bus;
        m.irq = src;
        m.flags = flags;
        if (src as usize) < ISA_IRQ_COUNT {
            self.isa_irq_lookup[src as usize] = gsi;
        } else {
            log::warn!(target: "acpi", "override source IRQ {} is not an ISA IRQ", src);
        }
        true
    }

    pub fn have_acpi(&self) -> bool {
        self.source == TableSource::Acpi
    }

    /// Dual 8259s present: always assumed without ACPI.
    pub fn have_8259_pic(&self) -> bool {
        !self.have_acpi() || self.madt_flags & MADT_FLAG_PCAT_COMPAT != 0
    }

    pub fn is_isa_bus(&self, bus: u8) -> bool {
        self.isa_bus_id == Some(bus)
    }

    /// Mapping record for ISA IRQ `irq`, following overrides.
    pub fn isa_mapping(&self, irq: u8) -> Option<&IrqMapping> {
        let idx = *self.isa_irq_lookup.get(irq as usize)?;
        self.bus_irq_list.get(idx as usize)
    }

    /// Fill in target IOAPIC and pin for GSI-indexed (ACPI) records.
    pub fn resolve_gsi_targets(&mut self) {
        if !self.have_acpi() {
            return;
        }
        for (gsi, m) in self.bus_irq_list.iter_mut().enumerate() {
            let gsi = gsi as u32;
            // highest base not above the GSI owns it
            let owner = self
                .ioapics
                .iter()
                .filter(|io| gsi >= io.irq_base)
                .max_by_key(|io| io.irq_base);
            match owner {
                Some(io) => {
                    m.ioapic_id = io.id;
                    m.intin = (gsi - io.irq_base) as u8;
                }
                None => log::warn!(target: "acpi", "GSI {} has no IOAPIC", gsi),
            }
        }
    }
}
