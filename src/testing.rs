// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! In-memory machine for unit tests.
//!
//! Low memory is a 2 MiB arena addressed by physical address. Anything above
//! it is a device page: the local APIC and registered IOAPICs are emulated,
//! other pages are plain backing memory. One virtual nanosecond clock drives
//! `nsleep`, the TSC (3 GHz), the PM timer port and the APIC timer (1 GHz
//! before the divider).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use crate::arch::x86_64::apic::{
    APIC_BASE_BSP, IA32_APIC_BASE, ICR_DELIVERY_SIPI, ICR_PENDING, REG_EOI, REG_ICR_HI, REG_ICR_LO,
    REG_TIMER_CCR, REG_TIMER_DCR, REG_TIMER_ICR,
};
use crate::config::PM_TIMER_HZ;
use crate::irq::IrqController;
use crate::platform::{
    ClockSource, CpuOps, CpuidRegs, IntrHandler, IsrContext, KernelServices, MapFlags, Mmio,
    PciAddress, PciConfig, PhysMapper, Timing, Width,
};

pub const ARENA_SIZE: usize = 2 << 20;
pub const LAPIC_PHYS: u64 = 0xFEE0_0000;
pub const PM_TIMER_PORT: u16 = 0xB008;

const PAGE: u64 = 4096;
const IOAPIC_WINDOW: u64 = 0x20;
const TSC_PER_NS: u64 = 3;

struct IoApicModel {
    phys: u64,
    sel: u32,
    regs: Vec<u32>,
    log: Vec<(u32, u32)>,
}

impl IoApicModel {
    fn new(phys: u64, id: u8, entries: u8) -> Self {
        let mut regs = vec![0u32; 0x10 + 2 * entries as usize];
        regs[0] = (id as u32) << 24;
        regs[1] = (entries as u32 - 1) << 16 | 0x11;
        for pin in 0..entries as usize {
            regs[0x10 + 2 * pin] = 1 << 16;
        }
        Self { phys, sel: 0, regs, log: Vec::new() }
    }
}

struct LapicModel {
    regs: [u32; 0x40],
    armed_at: u64,
}

impl Default for LapicModel {
    fn default() -> Self {
        Self { regs: [0; 0x40], armed_at: 0 }
    }
}

impl LapicModel {
    fn divisor(&self) -> u64 {
        let dcr = self.regs[REG_TIMER_DCR as usize];
        let code = (dcr & 3) | (dcr & 8) >> 1;
        if code == 7 { 1 } else { 2 << code }
    }
}

#[derive(Default)]
struct State {
    maps: Vec<(usize, u64, usize)>,
    map_log: Vec<(u64, usize)>,
    pages: BTreeMap<u64, Box<[u8]>>,
    ioapics: Vec<IoApicModel>,
    lapic: LapicModel,
    msrs: BTreeMap<u32, u64>,
    msr_reads: Vec<u32>,
    msr_writes: Vec<(u32, u64)>,
    cpuid: BTreeMap<u32, CpuidRegs>,
    icr_log: Vec<(u32, u32)>,
    port_writes: Vec<(u16, u32)>,
    dead_cpus: Vec<u32>,
    hooked: Vec<u8>,
    unhooked: Vec<u8>,
    invoked: Vec<(u8, u8)>,
    tss: Vec<usize>,
    clocks: Vec<ClockSource>,
}

pub struct MockPlatform {
    arena: NonNull<u8>,
    state: RefCell<State>,
    now: Cell<u64>,
    irqs: Cell<bool>,
    started: Cell<u32>,
    eois: Cell<usize>,
    schedules: Cell<usize>,
    controllers: Cell<usize>,
    online: Cell<usize>,
}

impl Drop for MockPlatform {
    fn drop(&mut self) {
        let slice = core::ptr::slice_from_raw_parts_mut(self.arena.as_ptr(), ARENA_SIZE);
        // SAFETY: allocated in `new` by leaking a boxed slice of this length.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        let arena = Box::leak(vec![0u8; ARENA_SIZE].into_boxed_slice());
        let mut state = State::default();
        state.msrs.insert(IA32_APIC_BASE, LAPIC_PHYS | APIC_BASE_BSP);
        state.cpuid.insert(0, CpuidRegs { eax: 1, ..Default::default() });
        state.cpuid.insert(1, CpuidRegs { edx: 1 << 9, ..Default::default() });
        Self {
            arena: NonNull::from(arena).cast(),
            state: RefCell::new(state),
            now: Cell::new(0),
            irqs: Cell::new(true),
            started: Cell::new(0),
            eois: Cell::new(0),
            schedules: Cell::new(0),
            controllers: Cell::new(0),
            online: Cell::new(0),
        }
    }

    // ───────────────────────── memory ─────────────────────────

    fn arena_ptr(&self, phys: u64) -> *mut u8 {
        assert!(phys < ARENA_SIZE as u64, "phys {:#x} outside the arena", phys);
        // SAFETY: bounds checked above.
        unsafe { self.arena.as_ptr().add(phys as usize) }
    }

    pub fn peek(&self, phys: u64) -> u8 {
        // SAFETY: arena_ptr checks the bounds.
        unsafe { *self.arena_ptr(phys) }
    }

    pub fn poke(&self, phys: u64, val: u8) {
        // SAFETY: arena_ptr checks the bounds.
        unsafe { *self.arena_ptr(phys) = val }
    }

    pub fn write(&self, phys: u64, bytes: &[u8]) {
        for (i, &b) in bytes.iter().enumerate() {
            self.poke(phys + i as u64, b);
        }
    }

    pub fn map_log(&self) -> Vec<(u64, usize)> {
        self.state.borrow().map_log.clone()
    }

    pub fn live_mappings(&self) -> usize {
        self.state.borrow().maps.len()
    }

    fn virt_to_phys(&self, virt: NonNull<u8>) -> u64 {
        let v = virt.as_ptr() as usize;
        let base = self.arena.as_ptr() as usize;
        if v >= base && v < base + ARENA_SIZE {
            return (v - base) as u64;
        }
        let st = self.state.borrow();
        for (page, backing) in &st.pages {
            let start = backing.as_ptr() as usize;
            if v >= start && v < start + backing.len() {
                return page + (v - start) as u64;
            }
        }
        panic!("access to unmapped address {:#x}", v);
    }

    // ───────────────────────── devices ─────────────────────────

    pub fn add_ioapic(&self, phys: u64, id: u8, entries: u8) {
        self.state.borrow_mut().ioapics.push(IoApicModel::new(phys, id, entries));
    }

    pub fn ioapic_reg(&self, phys: u64, reg: u32) -> u32 {
        let st = self.state.borrow();
        let chip = st.ioapics.iter().find(|c| c.phys == phys).expect("no such IOAPIC");
        chip.regs[reg as usize]
    }

    /// Window writes as (selected register, value).
    pub fn ioapic_log(&self, phys: u64) -> Vec<(u32, u32)> {
        let st = self.state.borrow();
        st.ioapics.iter().find(|c| c.phys == phys).map(|c| c.log.clone()).unwrap_or_default()
    }

    pub fn clear_ioapic_log(&self) {
        for chip in self.state.borrow_mut().ioapics.iter_mut() {
            chip.log.clear();
        }
    }

    pub fn lapic_reg(&self, reg: u32) -> u32 {
        self.state.borrow().lapic.regs[reg as usize]
    }

    pub fn set_lapic_reg(&self, reg: u32, val: u32) {
        self.state.borrow_mut().lapic.regs[reg as usize] = val;
    }

    fn lapic_read(&self, reg: u32) -> u32 {
        let st = self.state.borrow();
        let lapic = &st.lapic;
        if reg == REG_TIMER_CCR {
            let elapsed = (self.now.get() - lapic.armed_at) / lapic.divisor();
            let initial = lapic.regs[REG_TIMER_ICR as usize] as u64;
            return initial.saturating_sub(elapsed) as u32;
        }
        lapic.regs[reg as usize]
    }

    fn lapic_write(&self, reg: u32, val: u32) {
        match reg {
            REG_EOI => self.eois.set(self.eois.get() + 1),
            REG_TIMER_CCR => {}
            REG_ICR_LO => {
                let dest = self.lapic_reg(REG_ICR_HI) >> 24;
                self.icr(dest, val);
                self.set_lapic_reg(REG_ICR_LO, val & !ICR_PENDING);
            }
            REG_TIMER_ICR => {
                let mut st = self.state.borrow_mut();
                st.lapic.regs[reg as usize] = val;
                st.lapic.armed_at = self.now.get();
            }
            _ => self.set_lapic_reg(reg, val),
        }
    }

    fn icr(&self, dest: u32, lo: u32) {
        let mut st = self.state.borrow_mut();
        st.icr_log.push((dest, lo));
        if lo & (7 << 8) == ICR_DELIVERY_SIPI && !st.dead_cpus.contains(&dest) {
            self.started.set(self.started.get() + 1);
        }
    }

    pub fn icr_log(&self) -> Vec<(u32, u32)> {
        self.state.borrow().icr_log.clone()
    }

    pub fn eoi_count(&self) -> usize {
        self.eois.get()
    }

    /// APIC ids that never answer a SIPI.
    pub fn set_dead_cpus(&self, ids: &[u32]) {
        self.state.borrow_mut().dead_cpus = ids.to_vec();
    }

    // ───────────────────────── CPU ─────────────────────────

    pub fn set_cpuid(&self, leaf: u32, regs: CpuidRegs) {
        self.state.borrow_mut().cpuid.insert(leaf, regs);
    }

    pub fn set_x2apic_capable(&self, on: bool) {
        let mut st = self.state.borrow_mut();
        let r = st.cpuid.entry(1).or_default();
        if on {
            r.ecx |= 1 << 21;
        } else {
            r.ecx &= !(1 << 21);
        }
    }

    pub fn msr_reads(&self) -> Vec<u32> {
        self.state.borrow().msr_reads.clone()
    }

    pub fn msr_writes(&self) -> Vec<(u32, u64)> {
        self.state.borrow().msr_writes.clone()
    }

    pub fn port_writes(&self) -> Vec<(u16, u32)> {
        self.state.borrow().port_writes.clone()
    }

    pub fn irqs_enabled(&self) -> bool {
        self.irqs.get()
    }

    pub fn now_ns(&self) -> u64 {
        self.now.get()
    }

    // ───────────────────────── kernel services ─────────────────────────

    pub fn hooked(&self) -> Vec<u8> {
        self.state.borrow().hooked.clone()
    }

    pub fn unhooked(&self) -> Vec<u8> {
        self.state.borrow().unhooked.clone()
    }

    pub fn invoked(&self) -> Vec<(u8, u8)> {
        self.state.borrow().invoked.clone()
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedules.get()
    }

    pub fn controllers(&self) -> usize {
        self.controllers.get()
    }

    pub fn tss_counts(&self) -> Vec<usize> {
        self.state.borrow().tss.clone()
    }

    pub fn online_calls(&self) -> usize {
        self.online.get()
    }

    pub fn clocks(&self) -> Vec<ClockSource> {
        self.state.borrow().clocks.clone()
    }
}

impl PhysMapper for MockPlatform {
    fn map_phys(&self, phys: u64, len: usize, _flags: MapFlags) -> Option<NonNull<u8>> {
        let end = phys.checked_add(len as u64)?;
        let virt = if end <= ARENA_SIZE as u64 {
            NonNull::new(self.arena_ptr(phys))?
        } else if phys >= ARENA_SIZE as u64 {
            let page = phys & !(PAGE - 1);
            if end > page + PAGE {
                return None;
            }
            let mut st = self.state.borrow_mut();
            let backing = st.pages.entry(page).or_insert_with(|| vec![0u8; PAGE as usize].into_boxed_slice());
            // SAFETY: offset is inside the page.
            NonNull::new(unsafe { backing.as_mut_ptr().add((phys - page) as usize) })?
        } else {
            return None;
        };
        let mut st = self.state.borrow_mut();
        st.map_log.push((phys, len));
        st.maps.push((virt.as_ptr() as usize, phys, len));
        Some(virt)
    }

    fn unmap_phys(&self, virt: NonNull<u8>, len: usize) {
        let mut st = self.state.borrow_mut();
        let at = st
            .maps
            .iter()
            .position(|&(v, _, l)| v == virt.as_ptr() as usize && l == len)
            .expect("unmap of a window that was never mapped");
        st.maps.remove(at);
    }
}

impl Mmio for MockPlatform {
    unsafe fn mmio_read(&self, addr: NonNull<u8>, width: Width) -> u64 {
        let phys = self.virt_to_phys(addr);
        if (LAPIC_PHYS..LAPIC_PHYS + PAGE).contains(&phys) {
            return self.lapic_read(((phys - LAPIC_PHYS) >> 4) as u32) as u64;
        }
        {
            let st = self.state.borrow();
            if let Some(chip) = st.ioapics.iter().find(|c| (c.phys..c.phys + IOAPIC_WINDOW).contains(&phys)) {
                return match phys - chip.phys {
                    0x00 => chip.sel as u64,
                    0x10 => chip.regs.get(chip.sel as usize).copied().unwrap_or(0) as u64,
                    _ => 0,
                };
            }
        }
        let mut raw = [0u8; 8];
        // SAFETY: the caller promises a live mapping of `width` bytes.
        unsafe { core::ptr::copy_nonoverlapping(addr.as_ptr(), raw.as_mut_ptr(), width.bytes()) };
        u64::from_le_bytes(raw)
    }

    unsafe fn mmio_write(&self, addr: NonNull<u8>, width: Width, val: u64) {
        let phys = self.virt_to_phys(addr);
        if (LAPIC_PHYS..LAPIC_PHYS + PAGE).contains(&phys) {
            self.lapic_write(((phys - LAPIC_PHYS) >> 4) as u32, val as u32);
            return;
        }
        {
            let mut st = self.state.borrow_mut();
            if let Some(chip) = st.ioapics.iter_mut().find(|c| (c.phys..c.phys + IOAPIC_WINDOW).contains(&phys)) {
                match phys - chip.phys {
                    0x00 => chip.sel = val as u32,
                    0x10 => {
                        let sel = chip.sel;
                        chip.log.push((sel, val as u32));
                        // id and version are read-only here
                        if sel >= 0x10 && (sel as usize) < chip.regs.len() {
                            chip.regs[sel as usize] = val as u32;
                        }
                    }
                    _ => {}
                }
                return;
            }
        }
        let raw = val.to_le_bytes();
        // SAFETY: the caller promises a live mapping of `width` bytes.
        unsafe { core::ptr::copy_nonoverlapping(raw.as_ptr(), addr.as_ptr(), width.bytes()) };
    }
}

impl CpuOps for MockPlatform {
    fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuidRegs {
        self.state.borrow().cpuid.get(&leaf).copied().unwrap_or_default()
    }

    fn read_msr(&self, msr: u32) -> u64 {
        self.state.borrow_mut().msr_reads.push(msr);
        match msr {
            0x830 => (self.lapic_reg(REG_ICR_HI) as u64) << 32 | self.lapic_reg(REG_ICR_LO) as u64,
            0x800..0x840 => self.lapic_read(msr - 0x800) as u64,
            _ => self.state.borrow().msrs.get(&msr).copied().unwrap_or(0),
        }
    }

    fn write_msr(&self, msr: u32, val: u64) {
        self.state.borrow_mut().msr_writes.push((msr, val));
        match msr {
            0x830 => {
                self.icr((val >> 32) as u32, val as u32);
                self.set_lapic_reg(REG_ICR_HI, (val >> 32) as u32);
                self.set_lapic_reg(REG_ICR_LO, val as u32);
            }
            0x800..0x840 => self.lapic_write(msr - 0x800, val as u32),
            _ => {
                self.state.borrow_mut().msrs.insert(msr, val);
            }
        }
    }

    fn rdtsc(&self) -> u64 {
        self.now.get() * TSC_PER_NS
    }

    fn pause(&self) {
        self.now.set(self.now.get() + 1_000);
    }

    fn port_read(&self, port: u16, width: Width) -> u32 {
        if port == PM_TIMER_PORT {
            let ticks = self.now.get() as u128 * PM_TIMER_HZ as u128 / 1_000_000_000;
            return (ticks as u64 & width.mask()) as u32;
        }
        0
    }

    fn port_write(&self, port: u16, _width: Width, val: u32) {
        self.state.borrow_mut().port_writes.push((port, val));
    }

    fn irq_save(&self) -> bool {
        self.irqs.replace(false)
    }

    fn irq_restore(&self, was_enabled: bool) {
        self.irqs.set(was_enabled);
    }
}

impl Timing for MockPlatform {
    fn nsleep(&self, ns: u64) -> u64 {
        self.now.set(self.now.get() + ns);
        ns
    }
}

impl PciConfig for MockPlatform {
    fn pci_config_read(&self, _addr: PciAddress, _offset: u16, _width: Width) -> u64 {
        0
    }
}

impl KernelServices for MockPlatform {
    fn hook_intr(&self, intr: u8, _handler: IntrHandler) {
        self.state.borrow_mut().hooked.push(intr);
    }

    fn unhook_intr(&self, intr: u8, _handler: IntrHandler) {
        self.state.borrow_mut().unhooked.push(intr);
    }

    fn invoke_irq(&self, intr: u8, irq: u8, ctx: *mut IsrContext) -> *mut IsrContext {
        self.state.borrow_mut().invoked.push((intr, irq));
        ctx
    }

    fn schedule_if_idle(&self, ctx: *mut IsrContext) -> *mut IsrContext {
        self.schedules.set(self.schedules.get() + 1);
        ctx
    }

    fn register_irq_controller(&self, _controller: &'static dyn IrqController) {
        self.controllers.set(self.controllers.get() + 1);
    }

    fn init_tss(&self, cpu_count: usize) {
        self.state.borrow_mut().tss.push(cpu_count);
    }

    fn cpus_started(&self) -> u32 {
        self.started.get()
    }

    fn smp_online(&self) {
        self.online.set(self.online.get() + 1);
    }

    fn install_clock(&self, source: ClockSource) {
        self.state.borrow_mut().clocks.push(source);
    }
}

/// Firmware image builders. Every structure comes out with a valid checksum.
pub mod fw {
    use alloc::vec;
    use alloc::vec::Vec;
    use core::mem::size_of;

    use super::MockPlatform;
    use crate::acpi::tables::{Fadt, Gas, SdtHeader};
    use crate::mp::tables::{ConfigHeader, ENTRY_BUS, ENTRY_CPU, ENTRY_IOAPIC};
    use crate::routing::{RootTable, SdtWidth};

    const TABLE_BASE: u64 = 0x10_0000;

    fn fix_checksum(bytes: &mut [u8], at: usize) {
        bytes[at] = 0;
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        bytes[at] = 0u8.wrapping_sub(sum);
    }

    pub fn rsdp_v1(rsdt: u32) -> [u8; 20] {
        let mut r = [0u8; 20];
        r[..8].copy_from_slice(b"RSD PTR ");
        r[9..15].copy_from_slice(b"JOTUN ");
        r[16..20].copy_from_slice(&rsdt.to_le_bytes());
        fix_checksum(&mut r, 8);
        r
    }

    pub fn rsdp_v2(rsdt: u32, xsdt: u64) -> [u8; 36] {
        let mut r = [0u8; 36];
        r[..8].copy_from_slice(b"RSD PTR ");
        r[9..15].copy_from_slice(b"JOTUN ");
        r[15] = 2;
        r[16..20].copy_from_slice(&rsdt.to_le_bytes());
        r[20..24].copy_from_slice(&36u32.to_le_bytes());
        r[24..32].copy_from_slice(&xsdt.to_le_bytes());
        fix_checksum(&mut r[..20], 8);
        fix_checksum(&mut r, 32);
        r
    }

    pub fn sdt(sig: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let len = size_of::<SdtHeader>() + body.len();
        let mut t = vec![0u8; size_of::<SdtHeader>()];
        t[..4].copy_from_slice(sig);
        t[4..8].copy_from_slice(&(len as u32).to_le_bytes());
        t[8] = 1;
        t[10..16].copy_from_slice(b"JOTUN ");
        t[16..24].copy_from_slice(b"SYNTHTBL");
        t.extend_from_slice(body);
        fix_checksum(&mut t, 9);
        t
    }

    pub fn madt(lapic: u32, flags: u32, records: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&lapic.to_le_bytes());
        body.extend_from_slice(&flags.to_le_bytes());
        for r in records {
            body.extend_from_slice(r);
        }
        sdt(b"APIC", &body)
    }

    pub fn lapic(cpu: u8, apic: u8, enabled: bool) -> Vec<u8> {
        let mut r = vec![0, 8, cpu, apic];
        r.extend_from_slice(&(enabled as u32).to_le_bytes());
        r
    }

    pub fn x2apic(id: u32, enabled: bool) -> Vec<u8> {
        let mut r = vec![9, 16, 0, 0];
        r.extend_from_slice(&id.to_le_bytes());
        r.extend_from_slice(&(enabled as u32).to_le_bytes());
        r.extend_from_slice(&id.to_le_bytes());
        r
    }

    pub fn ioapic(id: u8, addr: u32, gsi_base: u32) -> Vec<u8> {
        let mut r = vec![1, 12, id, 0];
        r.extend_from_slice(&addr.to_le_bytes());
        r.extend_from_slice(&gsi_base.to_le_bytes());
        r
    }

    pub fn irq_override(bus: u8, src: u8, gsi: u32, flags: u16) -> Vec<u8> {
        let mut r = vec![2, 10, bus, src];
        r.extend_from_slice(&gsi.to_le_bytes());
        r.extend_from_slice(&flags.to_le_bytes());
        r
    }

    pub fn lapic_addr_override(addr: u64) -> Vec<u8> {
        let mut r = vec![5, 12, 0, 0];
        r.extend_from_slice(&addr.to_le_bytes());
        r
    }

    pub fn gas(space: u8, access: u8, addr: u64) -> Gas {
        Gas { addr_space: space, bit_width: 32, bit_offset: 0, access_size: access, addr }
    }

    fn gas_bytes(g: Gas) -> [u8; 12] {
        let mut b = [0u8; 12];
        b[0] = g.addr_space;
        b[1] = g.bit_width;
        b[2] = g.bit_offset;
        b[3] = g.access_size;
        let addr = g.addr;
        b[4..].copy_from_slice(&addr.to_le_bytes());
        b
    }

    pub fn fadt(pm_port: u32, ext: bool) -> Vec<u8> {
        fadt_with_gas(pm_port, ext, Gas::default())
    }

    pub fn fadt_with_gas(pm_port: u32, ext: bool, pm_gas: Gas) -> Vec<u8> {
        const PM_TMR_BLK: usize = 76;
        const PM_TMR_LEN: usize = 91;
        const FLAGS: usize = 112;
        const X_PM_TMR_BLK: usize = 208;
        let hdr = size_of::<SdtHeader>();
        let mut body = vec![0u8; size_of::<Fadt>() - hdr];
        body[PM_TMR_BLK - hdr..PM_TMR_BLK - hdr + 4].copy_from_slice(&pm_port.to_le_bytes());
        if pm_port != 0 {
            body[PM_TMR_LEN - hdr] = 4;
        }
        let flags: u32 = if ext { 1 << 8 } else { 0 };
        body[FLAGS - hdr..FLAGS - hdr + 4].copy_from_slice(&flags.to_le_bytes());
        body[X_PM_TMR_BLK - hdr..X_PM_TMR_BLK - hdr + 12].copy_from_slice(&gas_bytes(pm_gas));
        sdt(b"FACP", &body)
    }

    pub fn hpet(addr: u64, number: u8) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0x8086_A201u32.to_le_bytes());
        body.extend_from_slice(&gas_bytes(gas(0, 0, addr)));
        body.push(number);
        body.extend_from_slice(&0x80u16.to_le_bytes());
        body.push(0);
        sdt(b"HPET", &body)
    }

    /// Lays tables out from 1 MiB upward and finishes with a root table.
    pub struct FirmwareImage<'m> {
        m: &'m MockPlatform,
        next: u64,
        entries: Vec<u64>,
    }

    impl<'m> FirmwareImage<'m> {
        pub fn new(m: &'m MockPlatform) -> Self {
            Self { m, next: TABLE_BASE, entries: Vec::new() }
        }

        fn place(&mut self, bytes: &[u8]) -> u64 {
            let at = self.next;
            self.m.write(at, bytes);
            self.next = (at + bytes.len() as u64).next_multiple_of(16);
            at
        }

        pub fn table(mut self, bytes: &[u8]) -> Self {
            let at = self.place(bytes);
            self.entries.push(at);
            self
        }

        pub fn madt(self, bytes: &[u8]) -> Self {
            self.table(bytes)
        }

        pub fn fadt(self, bytes: &[u8]) -> Self {
            self.table(bytes)
        }

        pub fn install_xsdt(mut self) -> RootTable {
            let body: Vec<u8> = self.entries.iter().flat_map(|a| a.to_le_bytes()).collect();
            let addr = self.place(&sdt(b"XSDT", &body));
            RootTable { addr, len: 0, width: SdtWidth::Xsdt64 }
        }

        pub fn install_rsdt(mut self) -> RootTable {
            let body: Vec<u8> = self.entries.iter().flat_map(|&a| (a as u32).to_le_bytes()).collect();
            let addr = self.place(&sdt(b"RSDT", &body));
            RootTable { addr, len: 0, width: SdtWidth::Rsdt32 }
        }
    }

    // ───────────────────────── MP tables ─────────────────────────

    pub fn mp_fps(config: u32) -> [u8; 16] {
        let mut f = [0u8; 16];
        f[..4].copy_from_slice(b"_MP_");
        f[4..8].copy_from_slice(&config.to_le_bytes());
        f[8] = 1;
        f[9] = 4;
        fix_checksum(&mut f, 10);
        f
    }

    pub fn mp_config(lapic: u32, entries: &[Vec<u8>]) -> Vec<u8> {
        let hdr = size_of::<ConfigHeader>();
        let base_len = hdr + entries.iter().map(Vec::len).sum::<usize>();
        let mut t = vec![0u8; hdr];
        t[..4].copy_from_slice(b"PCMP");
        t[4..6].copy_from_slice(&(base_len as u16).to_le_bytes());
        t[6] = 4;
        t[8..16].copy_from_slice(b"JOTUNHEI");
        t[16..28].copy_from_slice(b"SYNTHETIC   ");
        t[34..36].copy_from_slice(&(entries.len() as u16).to_le_bytes());
        t[36..40].copy_from_slice(&lapic.to_le_bytes());
        for e in entries {
            t.extend_from_slice(e);
        }
        fix_checksum(&mut t, 7);
        t
    }

    pub fn mp_cpu(apic: u8, enabled: bool, bsp: bool) -> Vec<u8> {
        let flags = enabled as u8 | (bsp as u8) << 1;
        let mut e = vec![ENTRY_CPU, apic, 0x14, flags];
        e.extend_from_slice(&0x0006_06A0u32.to_le_bytes());
        e.extend_from_slice(&0x0000_0201u32.to_le_bytes());
        e.extend_from_slice(&[0u8; 8]);
        e
    }

    pub fn mp_bus(id: u8, name: &[u8; 6]) -> Vec<u8> {
        let mut e = vec![ENTRY_BUS, id];
        e.extend_from_slice(name);
        e
    }

    pub fn mp_ioapic(id: u8, addr: u32, enabled: bool) -> Vec<u8> {
        let mut e = vec![ENTRY_IOAPIC, id, 0x11, enabled as u8];
        e.extend_from_slice(&addr.to_le_bytes());
        e
    }

    /// I/O (type 3) or local (type 4) interrupt assignment.
    pub fn mp_iointr(typ: u8, intr_type: u8, flags: u16, bus: u8, irq: u8, dest: u8, pin: u8) -> Vec<u8> {
        let [lo, hi] = flags.to_le_bytes();
        vec![typ, intr_type, lo, hi, bus, irq, dest, pin]
    }

    pub fn mp_ext(typ: u8, bus: u8, len: u8) -> Vec<u8> {
        let mut e = vec![0u8; len as usize];
        e[0] = typ;
        e[1] = len;
        e[2] = bus;
        e
    }
}
