// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! IOAPIC redirection: one vector window per chip, logical IRQ ↔ pin mapping,
//! and decoding of incoming vectors back to logical IRQs.

use alloc::vec::Vec;
use core::ptr::NonNull;

use spin::Mutex;

use crate::arch::x86_64::apic::LocalApic;
use crate::error::{Error, Result};
use crate::irq::{INTR_APIC_TIMER, VectorMap};
use crate::platform::{CpuOps, IsrContext, KernelServices, MapFlags, Mmio, PhysMapper, Width};
use crate::routing::{
    ISA_IRQ_COUNT, IntrType, IoApicDesc, IrqMapping, Polarity, RoutingModel, TableSource, Trigger,
};

const IOREGSEL: usize = 0x00;
const IOWIN: usize = 0x10;
const WINDOW_LEN: usize = 0x20;

const REG_ID: u32 = 0x00;
const REG_VER: u32 = 0x01;
const REG_RED_TBL: u32 = 0x10;

const RED_DELIVERY_SHIFT: u32 = 8;
const RED_ACTIVE_LOW: u32 = 1 << 13;
const RED_LEVEL: u32 = 1 << 15;
const RED_MASKED: u32 = 1 << 16;
const RED_DEST_SHIFT: u32 = 24;

const DELIVERY_FIXED: u32 = 0;
const DELIVERY_SMI: u32 = 2;
const DELIVERY_NMI: u32 = 4;
const DELIVERY_EXTINT: u32 = 7;

const fn red_lo(pin: u8) -> u32 {
    REG_RED_TBL + 2 * pin as u32
}

const fn red_hi(pin: u8) -> u32 {
    REG_RED_TBL + 2 * pin as u32 + 1
}

pub struct IoApic {
    id: u8,
    phys: u64,
    window: NonNull<u8>,
    irq_base: u32,
    base_intr: u8,
    entries: u16,
    lock: Mutex<()>,
}

// SAFETY: the register window is mapped for the kernel's lifetime and every
// select/data pair runs under `lock`.
unsafe impl Send for IoApic {}
unsafe impl Sync for IoApic {}

impl IoApic {
    /// Map the chip, size its redirection table and claim a vector per pin.
    /// Every pin is left masked, already pointing at its own vector.
    pub fn init<P: PhysMapper + Mmio + ?Sized>(
        p: &P,
        desc: &IoApicDesc,
        vectors: &mut VectorMap,
    ) -> Result<Self> {
        let phys = desc.addr as u64;
        let window = p
            .map_phys(phys, WINDOW_LEN, MapFlags::DEVICE)
            .ok_or(Error::MapFailed { phys, len: WINDOW_LEN })?;
        let mut chip = Self {
            id: desc.id,
            phys,
            window,
            irq_base: desc.irq_base,
            base_intr: 0,
            entries: 0,
            lock: Mutex::new(()),
        };

        let ver = chip.read(p, REG_VER);
        let entries = ((ver >> 16) & 0xFF) as usize + 1;
        let Some(base) = vectors.alloc(entries) else {
            p.unmap_phys(window, WINDOW_LEN);
            return Err(Error::VectorsExhausted { count: entries });
        };
        chip.base_intr = base as u8;
        chip.entries = entries as u16;

        // fixed, edge, active-high toward APIC 0 until a mapping says otherwise
        for pin in 0..entries as u8 {
            chip.program(p, pin, RED_MASKED | chip.vector_for(pin) as u32, 0);
        }
        log::info!(
            target: "ioapic",
            "IOAPIC {} at {:#x}: {} pins, GSI {}.., vectors {:#x}..",
            chip.id,
            phys,
            entries,
            chip.irq_base,
            chip.base_intr
        );
        Ok(chip)
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn irq_base(&self) -> u32 {
        self.irq_base
    }

    pub fn base_intr(&self) -> u8 {
        self.base_intr
    }

    pub fn irq_count(&self) -> usize {
        self.entries as usize
    }

    fn owns_intr(&self, intr: u8) -> bool {
        let intr = intr as u32;
        let base = self.base_intr as u32;
        intr >= base && intr < base + self.entries as u32
    }

    fn owns_gsi(&self, gsi: u32) -> bool {
        gsi >= self.irq_base && gsi - self.irq_base < self.entries as u32
    }

    fn vector_for(&self, pin: u8) -> u8 {
        self.base_intr.wrapping_add(pin)
    }

    /// Raw select/data access; the caller holds `lock`.
    fn access<P: Mmio + ?Sized>(&self, p: &P, reg: u32, write: Option<u32>) -> u32 {
        // SAFETY: both registers sit inside the mapped window.
        unsafe {
            let sel = self.window.add(IOREGSEL);
            let win = self.window.add(IOWIN);
            p.mmio_write(sel, Width::W32, reg as u64);
            match write {
                Some(val) => {
                    p.mmio_write(win, Width::W32, val as u64);
                    val
                }
                None => p.mmio_read(win, Width::W32) as u32,
            }
        }
    }

    pub fn read<P: Mmio + ?Sized>(&self, p: &P, reg: u32) -> u32 {
        let _guard = self.lock.lock();
        self.access(p, reg, None)
    }

    pub fn write<P: Mmio + ?Sized>(&self, p: &P, reg: u32, val: u32) {
        let _guard = self.lock.lock();
        self.access(p, reg, Some(val));
    }

    fn modify_lo<P: Mmio + ?Sized>(&self, p: &P, pin: u8, f: impl FnOnce(u32) -> u32) {
        let _guard = self.lock.lock();
        let lo = self.access(p, red_lo(pin), None);
        self.access(p, red_lo(pin), Some(f(lo)));
    }

    /// Program one entry without ever leaving it live with a stale destination.
    fn program<P: Mmio + ?Sized>(&self, p: &P, pin: u8, lo: u32, hi: u32) {
        let _guard = self.lock.lock();
        self.access(p, red_lo(pin), Some(lo | RED_MASKED));
        self.access(p, red_hi(pin), Some(hi));
        self.access(p, red_lo(pin), Some(lo));
    }

    pub fn hardware_id<P: Mmio + ?Sized>(&self, p: &P) -> u8 {
        (self.read(p, REG_ID) >> 24) as u8 & 0x0F
    }
}

/// Redirection low word for a mapping, vector excluded.
fn redirection_flags(m: &IrqMapping, isa: bool) -> u32 {
    let delivery = match IntrType::from_raw(m.intr_type) {
        Some(IntrType::Apic) => DELIVERY_FIXED,
        Some(IntrType::Nmi) => DELIVERY_NMI,
        Some(IntrType::Smi) => DELIVERY_SMI,
        Some(IntrType::ExtInt) => DELIVERY_EXTINT,
        None => {
            log::warn!(target: "ioapic", "IRQ {}: interrupt type {} unknown, using fixed", m.irq, m.intr_type);
            DELIVERY_FIXED
        }
    };
    let low = match m.flags.polarity() {
        Polarity::ActiveHigh => false,
        Polarity::ActiveLow => true,
        Polarity::BusDefault => !isa,
        Polarity::Reserved => {
            log::warn!(target: "ioapic", "IRQ {}: reserved polarity, using active-high", m.irq);
            false
        }
    };
    let level = match m.flags.trigger() {
        Trigger::Edge => false,
        Trigger::Level => true,
        Trigger::BusDefault => !isa,
        Trigger::Reserved => {
            log::warn!(target: "ioapic", "IRQ {}: reserved trigger mode, using edge", m.irq);
            false
        }
    };
    delivery << RED_DELIVERY_SHIFT
        | if low { RED_ACTIVE_LOW } else { 0 }
        | if level { RED_LEVEL } else { 0 }
}

/// Whether mapping record `idx` is the one ISA lookups resolve to.
fn is_isa_line(model: &RoutingModel, idx: usize, m: &IrqMapping) -> bool {
    model.is_isa_bus(m.bus)
        && (m.irq as usize) < ISA_IRQ_COUNT
        && model.isa_irq_lookup[m.irq as usize] as usize == idx
}

/// First vector and logical IRQ after the last chip. `(0, 0)` means no
/// MSI window.
fn msi_window(last: &IoApic) -> (u8, u8) {
    let intr = last.base_intr as u32 + last.entries as u32;
    let irq = last.irq_base + last.entries as u32;
    match (u8::try_from(intr), u8::try_from(irq)) {
        (Ok(intr), Ok(irq)) if intr < INTR_APIC_TIMER => (intr, irq),
        _ => {
            log::warn!(target: "ioapic", "no room for MSI after vector {:#x}, IRQ {}", intr, irq);
            (0, 0)
        }
    }
}

/// All IOAPICs plus the MSI window that follows their vectors.
pub struct IoApicSet {
    chips: Vec<IoApic>,
    msi_base_intr: u8,
    msi_base_irq: u8,
    /// Logical IRQ → index into the routing model's mapping list.
    irq_to_mapping: Vec<Option<usize>>,
}

impl IoApicSet {
    pub fn init<P: PhysMapper + Mmio + ?Sized>(
        p: &P,
        model: &RoutingModel,
        vectors: &mut VectorMap,
    ) -> Result<Self> {
        let mut chips: Vec<IoApic> = Vec::with_capacity(model.ioapics.len());
        let mut next_irq_base = ISA_IRQ_COUNT as u32;
        for desc in &model.ioapics {
            let mut chip = IoApic::init(p, desc, vectors)?;
            if model.source == TableSource::Mps {
                // MP tables carry no GSI bases; number pins after the ISA range
                chip.irq_base = next_irq_base;
            }
            next_irq_base = chip.irq_base + chip.entries as u32;
            chips.push(chip);
        }
        let (msi_base_intr, msi_base_irq) = chips.last().map_or((0, 0), msi_window);
        let mut set = Self { chips, msi_base_intr, msi_base_irq, irq_to_mapping: Vec::new() };
        set.build_irq_map(model);
        Ok(set)
    }

    #[cfg(test)]
    pub(crate) fn with_msi_window(msi_base_intr: u8, msi_base_irq: u8) -> Self {
        Self { chips: Vec::new(), msi_base_intr, msi_base_irq, irq_to_mapping: Vec::new() }
    }

    fn build_irq_map(&mut self, model: &RoutingModel) {
        let gsi_end = self
            .chips
            .iter()
            .map(|c| (c.irq_base + c.entries as u32) as usize)
            .max()
            .unwrap_or(0);
        let count = gsi_end.max(ISA_IRQ_COUNT).min(256);
        let mut map = alloc::vec![None; count];
        for (irq, slot) in map.iter_mut().take(ISA_IRQ_COUNT).enumerate() {
            let idx = model.isa_irq_lookup[irq] as usize;
            *slot = model.bus_irq_list.get(idx).filter(|m| is_isa_line(model, idx, m)).map(|_| idx);
        }
        // everything else is numbered by the pin it arrives on
        for (idx, m) in model.bus_irq_list.iter().enumerate() {
            if is_isa_line(model, idx, m) {
                continue;
            }
            let Some(chip) = self.chips.iter().find(|c| c.id == m.ioapic_id) else {
                continue;
            };
            match map.get_mut((chip.irq_base + m.intin as u32) as usize) {
                Some(slot) if slot.is_none() => *slot = Some(idx),
                _ => {}
            }
        }
        self.irq_to_mapping = map;
    }

    pub fn chips(&self) -> &[IoApic] {
        &self.chips
    }

    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    pub fn msi_base_intr(&self) -> u8 {
        self.msi_base_intr
    }

    pub fn msi_base_irq(&self) -> u8 {
        self.msi_base_irq
    }

    pub fn has_msi_window(&self) -> bool {
        self.msi_base_intr != 0
    }

    /// Chip with hardware id `id`. Routing cannot continue without it.
    pub fn by_id(&self, id: u8) -> &IoApic {
        match self.chips.iter().find(|c| c.id == id) {
            Some(chip) => chip,
            None => {
                let known: Vec<u8> = self.chips.iter().map(|c| c.id).collect();
                panic!("IOAPIC id {} not found, have {:?}", id, known);
            }
        }
    }

    /// Program every mapping toward the boot CPU.
    pub fn map_all<P: Mmio + ?Sized>(&self, p: &P, model: &RoutingModel) {
        if self.chips.is_empty() {
            log::warn!(target: "ioapic", "no IOAPICs, nothing to route");
            return;
        }
        let dest = model.apic_id_list.first().copied().unwrap_or(0);
        let hi = (dest & 0xFF) << RED_DEST_SHIFT;
        for (idx, m) in model.bus_irq_list.iter().enumerate() {
            let chip = self.by_id(m.ioapic_id);
            if m.intin as usize >= chip.irq_count() {
                log::warn!(target: "ioapic", "mapping {} names pin {} past the end of IOAPIC {}", idx, m.intin, chip.id);
                continue;
            }
            let lo = redirection_flags(m, model.is_isa_bus(m.bus)) | chip.vector_for(m.intin) as u32;
            log::trace!(target: "ioapic", "IRQ {} -> IOAPIC {} pin {}: {:#x}:{:#x}", idx, chip.id, m.intin, hi, lo);
            chip.program(p, m.intin, lo, hi);
        }
    }

    /// Chip and pin behind logical `irq`.
    pub fn pin_for_irq(&self, model: &RoutingModel, irq: u8) -> Option<(&IoApic, u8)> {
        if let Some(Some(idx)) = self.irq_to_mapping.get(irq as usize) {
            let m = &model.bus_irq_list[*idx];
            return Some((self.by_id(m.ioapic_id), m.intin));
        }
        let gsi = irq as u32;
        self.chips
            .iter()
            .find(|c| c.owns_gsi(gsi))
            .map(|c| (c, (gsi - c.irq_base) as u8))
    }

    pub fn irq_vector(&self, model: &RoutingModel, irq: u8) -> Option<u8> {
        self.pin_for_irq(model, irq).map(|(chip, pin)| chip.vector_for(pin))
    }

    /// Logical IRQ for an incoming vector.
    pub fn translate_intr(&self, model: &RoutingModel, intr: u8) -> Option<u8> {
        if self.has_msi_window() && intr >= self.msi_base_intr && intr < INTR_APIC_TIMER {
            let irq = (intr - self.msi_base_intr).checked_add(self.msi_base_irq);
            if irq.is_none() {
                log::warn!(target: "ioapic", "MSI vector {:#x} has no logical IRQ", intr);
            }
            return irq;
        }
        let chip = self.chips.iter().find(|c| c.owns_intr(intr))?;
        let pin = intr - chip.base_intr;
        // legacy ISA lines keep their well-known numbers
        let isa = model
            .bus_irq_list
            .iter()
            .enumerate()
            .find(|&(idx, m)| m.ioapic_id == chip.id && m.intin == pin && is_isa_line(model, idx, m));
        if let Some((_, m)) = isa {
            return Some(m.irq);
        }
        u8::try_from(chip.irq_base + pin as u32).ok()
    }

    /// Acknowledge `intr` and run whatever the IRQ layer hooked on it.
    pub fn dispatch<P: CpuOps + Mmio + KernelServices + ?Sized>(
        &self,
        p: &P,
        lapic: &LocalApic,
        model: &RoutingModel,
        intr: u8,
        ctx: *mut IsrContext,
    ) -> *mut IsrContext {
        let irq = self.translate_intr(model, intr);
        lapic.eoi(p);
        let Some(irq) = irq else {
            log::warn!(target: "ioapic", "stray vector {:#x}", intr);
            return ctx;
        };
        let next = p.invoke_irq(intr, irq, ctx);
        if next == ctx { p.schedule_if_idle(ctx) } else { next }
    }

    pub fn set_mask<P: Mmio + ?Sized>(&self, p: &P, model: &RoutingModel, irq: u8, unmask: bool) -> bool {
        let Some((chip, pin)) = self.pin_for_irq(model, irq) else {
            log::warn!(target: "ioapic", "mask of unrouted IRQ {}", irq);
            return false;
        };
        chip.modify_lo(p, pin, |lo| if unmask { lo & !RED_MASKED } else { lo | RED_MASKED });
        true
    }

    /// Point `irq` at logical CPU `cpu`. `None` asks whether routing is possible.
    pub fn route_to_cpu<P: Mmio + ?Sized>(
        &self,
        p: &P,
        model: &RoutingModel,
        irq: u8,
        cpu: Option<usize>,
    ) -> bool {
        let Some(cpu) = cpu else {
            return !self.chips.is_empty();
        };
        let Some(&apic_id) = model.apic_id_list.get(cpu) else {
            return false;
        };
        let Some((chip, pin)) = self.pin_for_irq(model, irq) else {
            return false;
        };
        chip.write(p, red_hi(pin), (apic_id & 0xFF) << RED_DEST_SHIFT);
        log::debug!(target: "ioapic", "IRQ {} routed to CPU {} (APIC {})", irq, cpu, apic_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::reserved_vector_map;
    use crate::routing::IrqFlags;
    use crate::testing::MockPlatform;

    const IOAPIC_PHYS: u64 = 0xFEC0_0000;

    fn acpi_model(ioapic_id: u8) -> RoutingModel {
        let mut model = RoutingModel::new();
        model.source = TableSource::Acpi;
        model.isa_bus_id = Some(0);
        model.apic_id_list = alloc::vec![0, 1];
        model.ioapics.push(IoApicDesc { id: ioapic_id, addr: IOAPIC_PHYS as u32, irq_base: 0 });
        model.seed_isa_identity();
        model
    }

    fn bring_up(m: &MockPlatform, model: &mut RoutingModel) -> (IoApicSet, VectorMap) {
        model.resolve_gsi_targets();
        let mut vectors = reserved_vector_map();
        let set = IoApicSet::init(m, model, &mut vectors).unwrap();
        (set, vectors)
    }

    #[test]
    fn test_init_sizes_and_claims_vectors() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 2, 24);
        let mut model = acpi_model(2);
        let (set, vectors) = bring_up(&m, &mut model);
        let chip = set.by_id(2);
        assert_eq!(chip.irq_count(), 24);
        assert_eq!(chip.base_intr(), 0x30);
        assert_eq!(chip.hardware_id(&m), 2);
        for v in 0x30..0x48 {
            assert!(vectors.is_set(v));
        }
        assert!(!vectors.is_set(0x48));
        assert_eq!(set.msi_base_intr(), 0x48);
        assert_eq!(set.msi_base_irq(), 24);
        // everything starts masked
        for pin in 0..24 {
            assert_ne!(m.ioapic_reg(IOAPIC_PHYS, red_lo(pin)) & RED_MASKED, 0);
        }
    }

    #[test]
    fn test_map_all_write_order() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        model.apic_id_list = alloc::vec![3, 1];
        let (set, _) = bring_up(&m, &mut model);
        m.clear_ioapic_log();
        set.map_all(&m, &model);
        let log = m.ioapic_log(IOAPIC_PHYS);
        assert_eq!(log.len(), 16 * 3);
        let lo = 0x30 + 4;
        assert_eq!(log[12], (red_lo(4), lo | RED_MASKED));
        assert_eq!(log[13], (red_hi(4), 3 << 24));
        assert_eq!(log[14], (red_lo(4), lo));
    }

    #[test]
    fn test_level_low_override_programmed() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        model.apply_isa_override(0, 9, 20, IrqFlags::new(Polarity::ActiveLow, Trigger::Level));
        let (set, _) = bring_up(&m, &mut model);
        set.map_all(&m, &model);
        let lo = m.ioapic_reg(IOAPIC_PHYS, red_lo(20));
        assert_eq!(lo & 0xFF, 0x30 + 20);
        assert_ne!(lo & RED_ACTIVE_LOW, 0);
        assert_ne!(lo & RED_LEVEL, 0);
        // ISA IRQ 9 now rides pin 20
        assert_eq!(set.pin_for_irq(&model, 9).map(|(c, pin)| (c.id(), pin)), Some((0, 20)));
        assert_eq!(set.translate_intr(&model, 0x30 + 20), Some(9));
    }

    #[test]
    fn test_set_mask_and_route() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        let (set, _) = bring_up(&m, &mut model);
        set.map_all(&m, &model);
        assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_lo(4)) & RED_MASKED, 0);
        assert!(set.set_mask(&m, &model, 4, false));
        assert_ne!(m.ioapic_reg(IOAPIC_PHYS, red_lo(4)) & RED_MASKED, 0);
        assert!(set.set_mask(&m, &model, 4, true));
        assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_lo(4)), 0x34);

        assert!(set.route_to_cpu(&m, &model, 0, None));
        assert!(set.route_to_cpu(&m, &model, 4, Some(1)));
        assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_hi(4)), 1 << 24);
        assert!(!set.route_to_cpu(&m, &model, 4, Some(2)));
        // GSI past the ISA range, no mapping record
        assert_eq!(set.pin_for_irq(&model, 19).map(|(_, pin)| pin), Some(19));
        assert!(set.pin_for_irq(&model, 30).is_none());
    }

    #[test]
    fn test_route_query_without_ioapics() {
        let m = MockPlatform::new();
        let model = RoutingModel::new();
        let set = IoApicSet::init(&m, &model, &mut reserved_vector_map()).unwrap();
        assert!(!set.route_to_cpu(&m, &model, 0, None));
        assert!(set.translate_intr(&model, 0x40).is_none());
    }

    #[test]
    fn test_msi_translation() {
        let set = IoApicSet::with_msi_window(200, 90);
        let model = RoutingModel::new();
        assert_eq!(set.translate_intr(&model, 205), Some(95));
        assert_eq!(set.translate_intr(&model, 200), Some(90));
        assert_eq!(set.translate_intr(&model, 0xFF), None);
    }

    #[test]
    fn test_dispatch_eoi_and_fallthrough() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        let (set, _) = bring_up(&m, &mut model);
        m.set_x2apic_capable(true);
        let lapic = LocalApic::init(&m, 0).unwrap();
        let ctx = 0x1000 as *mut IsrContext;
        let out = set.dispatch(&m, &lapic, &model, 0x31, ctx);
        assert_eq!(out, ctx);
        assert_eq!(m.invoked(), [(0x31, 1)]);
        assert_eq!(m.eoi_count(), 1);
        assert_eq!(m.schedule_calls(), 1);
    }

    #[test]
    fn test_mp_bases_back_to_back() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 1, 24);
        m.add_ioapic(IOAPIC_PHYS + 0x1000, 2, 16);
        let mut model = RoutingModel::new();
        model.source = TableSource::Mps;
        model.ioapics.push(IoApicDesc { id: 1, addr: IOAPIC_PHYS as u32, irq_base: 0 });
        model.ioapics.push(IoApicDesc { id: 2, addr: IOAPIC_PHYS as u32 + 0x1000, irq_base: 0 });
        let set = IoApicSet::init(&m, &model, &mut reserved_vector_map()).unwrap();
        assert_eq!(set.by_id(1).irq_base(), 16);
        assert_eq!(set.by_id(2).irq_base(), 40);
        assert_eq!(set.by_id(2).base_intr(), 0x48);
        assert_eq!(set.msi_base_intr(), 0x58);
        assert_eq!(set.msi_base_irq(), 56);
        assert_eq!(set.pin_for_irq(&model, 30).map(|(c, pin)| (c.id(), pin)), Some((1, 14)));
        assert_eq!(set.pin_for_irq(&model, 45).map(|(c, pin)| (c.id(), pin)), Some((2, 5)));
    }

    fn mp_model() -> RoutingModel {
        let mut model = RoutingModel::new();
        model.source = TableSource::Mps;
        model.isa_bus_id = Some(0);
        model.pci_bus_ids.push(1);
        model.apic_id_list = alloc::vec![0];
        model.ioapics.push(IoApicDesc { id: 1, addr: IOAPIC_PHYS as u32, irq_base: 0 });
        // PCI INTA of device 2 listed ahead of the ISA lines
        model.bus_irq_list.push(IrqMapping {
            bus: 1,
            intr_type: IntrType::Apic as u8,
            flags: IrqFlags::new(Polarity::BusDefault, Trigger::BusDefault),
            device: 2,
            irq: 0,
            ioapic_id: 1,
            intin: 17,
        });
        model.bus_irq_list.push(IrqMapping {
            bus: 0,
            intr_type: IntrType::Apic as u8,
            flags: IrqFlags::ISA,
            device: 0,
            irq: 4,
            ioapic_id: 1,
            intin: 4,
        });
        model.isa_irq_lookup[4] = 1;
        model
    }

    #[test]
    fn test_mp_pci_line_numbered_by_pin() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 1, 24);
        let model = mp_model();
        let set = IoApicSet::init(&m, &model, &mut reserved_vector_map()).unwrap();
        assert_eq!(set.by_id(1).irq_base(), 16);
        assert_eq!(set.translate_intr(&model, 0x30 + 17), Some(33));
        assert_eq!(set.pin_for_irq(&model, 33).map(|(c, pin)| (c.id(), pin)), Some((1, 17)));
        assert_eq!(set.irq_vector(&model, 33), Some(0x30 + 17));
        // ISA lines keep their numbers, and the PCI record does not stand in for IRQ 0
        assert_eq!(set.translate_intr(&model, 0x30 + 4), Some(4));
        assert_eq!(set.pin_for_irq(&model, 4).map(|(c, pin)| (c.id(), pin)), Some((1, 4)));
        assert!(set.pin_for_irq(&model, 0).is_none());

        set.map_all(&m, &model);
        let lo = m.ioapic_reg(IOAPIC_PHYS, red_lo(17));
        assert_eq!(lo, 0x30 + 17 | RED_ACTIVE_LOW | RED_LEVEL);
    }

    #[test]
    fn test_mp_pci_dispatch() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 1, 24);
        let model = mp_model();
        let set = IoApicSet::init(&m, &model, &mut reserved_vector_map()).unwrap();
        m.set_x2apic_capable(true);
        let lapic = LocalApic::init(&m, 0).unwrap();
        set.dispatch(&m, &lapic, &model, 0x30 + 17, core::ptr::null_mut());
        assert_eq!(m.invoked(), [(0x30 + 17, 33)]);
        assert_eq!(m.eoi_count(), 1);
    }

    #[test]
    fn test_acpi_gsi_above_isa_range() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        let (set, _) = bring_up(&m, &mut model);
        assert_eq!(set.translate_intr(&model, 0x30 + 19), Some(19));
        assert_eq!(set.pin_for_irq(&model, 19).map(|(c, pin)| (c.id(), pin)), Some((0, 19)));
        m.set_x2apic_capable(true);
        let lapic = LocalApic::init(&m, 0).unwrap();
        set.dispatch(&m, &lapic, &model, 0x30 + 19, core::ptr::null_mut());
        assert_eq!(m.invoked(), [(0x30 + 19, 19)]);
    }

    #[test]
    fn test_unmapped_pin_unmasks_onto_own_vector() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        let (set, _) = bring_up(&m, &mut model);
        for pin in 0..24u8 {
            assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_lo(pin)) & 0xFF, 0x30 + pin as u32);
        }
        set.map_all(&m, &model);
        assert!(set.set_mask(&m, &model, 19, true));
        assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_lo(19)), 0x30 + 19);
        assert_eq!(m.ioapic_reg(IOAPIC_PHYS, red_hi(19)), 0);
    }

    #[test]
    fn test_msi_window_stops_at_fixed_vectors() {
        let set = IoApicSet::with_msi_window(0x48, 24);
        let model = RoutingModel::new();
        assert_eq!(set.translate_intr(&model, 0xFB), Some(0xFB - 0x48 + 24));
        assert_eq!(set.translate_intr(&model, INTR_APIC_TIMER), None);
        assert_eq!(set.translate_intr(&model, 0xFE), None);
    }

    #[test]
    fn test_msi_irq_past_255_is_dropped() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        model.ioapics[0].irq_base = 200;
        let (set, _) = bring_up(&m, &mut model);
        assert_eq!(set.msi_base_intr(), 0x48);
        assert_eq!(set.msi_base_irq(), 224);
        assert_eq!(set.translate_intr(&model, 0x48 + 31), Some(255));
        assert_eq!(set.translate_intr(&model, 0x80), None);
    }

    #[test]
    fn test_no_msi_window_when_irqs_run_out() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        model.ioapics[0].irq_base = 240;
        let (set, _) = bring_up(&m, &mut model);
        assert!(!set.has_msi_window());
        assert_eq!(set.translate_intr(&model, 0x60), None);
    }

    #[test]
    #[should_panic(expected = "IOAPIC id 7 not found")]
    fn test_unknown_ioapic_is_fatal() {
        let m = MockPlatform::new();
        m.add_ioapic(IOAPIC_PHYS, 0, 24);
        let mut model = acpi_model(0);
        let (set, _) = bring_up(&m, &mut model);
        model.bus_irq_list[3].ioapic_id = 7;
        set.map_all(&m, &model);
    }
}
