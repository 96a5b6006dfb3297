// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Local APIC / x2APIC: register access, IPIs, timer and calibration.
//!
//! Registers are addressed by index (the xAPIC MMIO offset shifted right by
//! four). xAPIC mode reaches them at `base + (idx << 4)`, x2APIC mode at MSR
//! `0x800 + idx`. Everything above that split is mode-agnostic.

use core::fmt::Write as _;
use core::ptr::NonNull;

use crate::acpi::pm_timer::PmTimer;
use crate::arch::x86_64::cpuid;
use crate::arch::x86_64::tsc::ClockScale;
use crate::config::{CALIBRATION_FALLBACK_NS, CALIBRATION_PM_TICKS};
use crate::error::{Error, Result};
use crate::platform::{CpuOps, MapFlags, Mmio, PciConfig, PhysMapper, Timing, Width};

// MSRs
pub const IA32_APIC_BASE: u32 = 0x1B;
const X2APIC_MSR_BASE: u32 = 0x800;

// IA32_APIC_BASE bits
pub const APIC_BASE_BSP: u64 = 1 << 8;
pub const APIC_BASE_X2_ENABLE: u64 = 1 << 10;
pub const APIC_BASE_GLOBAL_ENABLE: u64 = 1 << 11;
pub const APIC_BASE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

// Register indices
pub const REG_ID: u32 = 0x02;
pub const REG_VER: u32 = 0x03;
pub const REG_TPR: u32 = 0x08;
pub const REG_APR: u32 = 0x09;
pub const REG_PPR: u32 = 0x0A;
pub const REG_EOI: u32 = 0x0B;
pub const REG_LDR: u32 = 0x0D;
pub const REG_DFR: u32 = 0x0E;
pub const REG_SIR: u32 = 0x0F;
pub const REG_ISR: u32 = 0x10;
pub const REG_TMR: u32 = 0x18;
pub const REG_IRR: u32 = 0x20;
pub const REG_ESR: u32 = 0x28;
pub const REG_LVT_CMCI: u32 = 0x2F;
pub const REG_ICR_LO: u32 = 0x30;
pub const REG_ICR_HI: u32 = 0x31;
pub const REG_LVT_TR: u32 = 0x32;
pub const REG_LVT_TSR: u32 = 0x33;
pub const REG_LVT_PMCR: u32 = 0x34;
pub const REG_LVT_LINT0: u32 = 0x35;
pub const REG_LVT_LINT1: u32 = 0x36;
pub const REG_LVT_ERR: u32 = 0x37;
pub const REG_TIMER_ICR: u32 = 0x38;
pub const REG_TIMER_CCR: u32 = 0x39;
pub const REG_TIMER_DCR: u32 = 0x3E;
pub const REG_SELF_IPI: u32 = 0x3F;
pub const REG_COUNT: u32 = 0x40;

// SIR bits
pub const SIR_APIC_ENABLE: u32 = 1 << 8;

// ICR bits
pub const ICR_DELIVERY_FIXED: u32 = 0 << 8;
pub const ICR_DELIVERY_LOWPRI: u32 = 1 << 8;
pub const ICR_DELIVERY_SMI: u32 = 2 << 8;
pub const ICR_DELIVERY_NMI: u32 = 4 << 8;
pub const ICR_DELIVERY_INIT: u32 = 5 << 8;
pub const ICR_DELIVERY_SIPI: u32 = 6 << 8;
pub const ICR_DEST_LOGICAL: u32 = 1 << 11;
pub const ICR_PENDING: u32 = 1 << 12;
pub const ICR_LEVEL_ASSERT: u32 = 1 << 14;
pub const ICR_TRIGGER_LEVEL: u32 = 1 << 15;
pub const ICR_DEST_BYID: u32 = 0 << 18;
pub const ICR_DEST_SELF: u32 = 1 << 18;
pub const ICR_DEST_ALL: u32 = 2 << 18;
pub const ICR_DEST_OTHER: u32 = 3 << 18;

// LVT bits
pub const LVT_MASKED: u32 = 1 << 16;
const LVT_TIMER_MODE_SHIFT: u32 = 17;

/// Divide configuration encodings for divide-by 1, 2, 4 .. 128.
const DCR_BY_LOG2: [u32; 8] = [0xB, 0x0, 0x1, 0x2, 0x3, 0x8, 0x9, 0xA];

const NMI_VECTOR: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    OneShot = 0,
    Periodic = 1,
    Deadline = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpiTarget {
    Cpu(u32),
    SelfOnly,
    All,
    Others,
}

/// Result of timing the APIC timer and TSC against a reference clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calibration {
    pub apic_timer_freq: u64,
    pub rdtsc_mhz: u64,
    pub clock: Option<ClockScale>,
}

/// Index could name a register on some APIC implementation.
pub const fn reg_maybe_exists(reg: u32) -> bool {
    !matches!(reg, 0x00..=0x01 | 0x04..=0x07 | 0x0C | 0x29..=0x2E | 0x3A..=0x3D | 0x3F)
        && reg < REG_COUNT
}

pub const fn reg_maybe_readable(reg: u32) -> bool {
    reg_maybe_exists(reg) && reg != REG_EOI && reg != REG_SELF_IPI
}

/// Per-CPU local APIC handle, xAPIC through a mapped page or x2APIC through MSRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalApic {
    XApic { base: NonNull<u8> },
    X2Apic,
}

// SAFETY: the xAPIC page is mapped once for the kernel's lifetime and every
// CPU sees its own APIC at the same address.
unsafe impl Send for LocalApic {}
unsafe impl Sync for LocalApic {}

impl LocalApic {
    /// Globally enable the BSP's APIC, x2APIC mode when the CPU has it.
    ///
    /// `phys_hint` is the MADT's LAPIC address; zero falls back to the base MSR.
    pub fn init<P: PhysMapper + CpuOps + ?Sized>(p: &P, phys_hint: u64) -> Result<Self> {
        if !cpuid::has_apic(p) {
            return Err(Error::NoLocalApic);
        }
        let mut base = p.read_msr(IA32_APIC_BASE);
        if base & APIC_BASE_GLOBAL_ENABLE == 0 {
            base |= APIC_BASE_GLOBAL_ENABLE;
            p.write_msr(IA32_APIC_BASE, base);
        }

        if cpuid::has_x2apic(p) {
            // x2 can only be set once the APIC is globally enabled
            p.write_msr(IA32_APIC_BASE, base | APIC_BASE_X2_ENABLE);
            log::info!(target: "lapic", "x2APIC mode");
            return Ok(LocalApic::X2Apic);
        }

        let phys = if phys_hint != 0 { phys_hint } else { base & APIC_BASE_ADDR_MASK };
        let virt = p
            .map_phys(phys, 4096, MapFlags::DEVICE)
            .ok_or(Error::MapFailed { phys, len: 4096 })?;
        log::info!(target: "lapic", "xAPIC mode at {:#x}", phys);
        Ok(LocalApic::XApic { base: virt })
    }

    /// Bring an AP's APIC into the mode the BSP picked.
    pub fn init_ap<P: CpuOps + ?Sized>(&self, p: &P) {
        let mut base = p.read_msr(IA32_APIC_BASE) | APIC_BASE_GLOBAL_ENABLE;
        p.write_msr(IA32_APIC_BASE, base);
        if self.is_x2apic() {
            base |= APIC_BASE_X2_ENABLE;
            p.write_msr(IA32_APIC_BASE, base);
        }
    }

    pub fn is_x2apic(&self) -> bool {
        matches!(self, LocalApic::X2Apic)
    }

    pub fn reg_exists(&self, reg: u32) -> bool {
        match self {
            LocalApic::XApic { .. } => reg_maybe_readable(reg),
            LocalApic::X2Apic => reg != REG_DFR && reg != REG_APR && reg_maybe_exists(reg),
        }
    }

    pub fn reg_readable(&self, reg: u32) -> bool {
        match self {
            LocalApic::XApic { .. } => reg_maybe_readable(reg),
            LocalApic::X2Apic => {
                reg != REG_LVT_CMCI
                    && reg != REG_ICR_HI
                    && self.reg_exists(reg)
                    && reg_maybe_readable(reg)
            }
        }
    }

    fn mmio(base: NonNull<u8>, reg: u32) -> NonNull<u8> {
        // SAFETY: reg < 0x40 keeps the offset inside the mapped page.
        unsafe { base.add((reg as usize) << 4) }
    }

    pub fn read32<P: CpuOps + Mmio + ?Sized>(&self, p: &P, reg: u32) -> u32 {
        match *self {
            // SAFETY: 16-byte aligned register in the live APIC page.
            LocalApic::XApic { base } => unsafe { p.mmio_read(Self::mmio(base, reg), Width::W32) as u32 },
            LocalApic::X2Apic => p.read_msr(X2APIC_MSR_BASE + reg) as u32,
        }
    }

    pub fn write32<P: CpuOps + Mmio + ?Sized>(&self, p: &P, reg: u32, val: u32) {
        match *self {
            // SAFETY: see read32.
            LocalApic::XApic { base } => unsafe {
                p.mmio_write(Self::mmio(base, reg), Width::W32, val as u64)
            },
            LocalApic::X2Apic => p.write_msr(X2APIC_MSR_BASE + reg, val as u64),
        }
    }

    /// 64-bit view of a register pair (ICR); xAPIC splits it at `reg + 1`.
    pub fn read64<P: CpuOps + Mmio + ?Sized>(&self, p: &P, reg: u32) -> u64 {
        match self {
            LocalApic::XApic { .. } => {
                self.read32(p, reg) as u64 | (self.read32(p, reg + 1) as u64) << 32
            }
            LocalApic::X2Apic => p.read_msr(X2APIC_MSR_BASE + reg),
        }
    }

    pub fn write64<P: CpuOps + Mmio + ?Sized>(&self, p: &P, reg: u32, val: u64) {
        match self {
            LocalApic::XApic { .. } => {
                self.write32(p, reg + 1, (val >> 32) as u32);
                self.write32(p, reg, val as u32);
            }
            LocalApic::X2Apic => p.write_msr(X2APIC_MSR_BASE + reg, val),
        }
    }

    /// Send one interrupt command and wait for it to leave the APIC.
    pub fn command<P: CpuOps + Mmio + ?Sized>(&self, p: &P, dest: u32, cmd: u32) {
        match self {
            LocalApic::XApic { .. } => {
                let was = p.irq_save();
                self.write32(p, REG_ICR_HI, (dest & 0xFF) << 24);
                self.write32(p, REG_ICR_LO, cmd);
                p.irq_restore(was);
                while self.read32(p, REG_ICR_LO) & ICR_PENDING != 0 {
                    p.pause();
                }
            }
            LocalApic::X2Apic => self.write64(p, REG_ICR_LO, (dest as u64) << 32 | cmd as u64),
        }
    }

    /// Logical destination; x2APIC derives it from the ID and ignores writes.
    pub fn write_ldr<P: CpuOps + Mmio + ?Sized>(&self, p: &P, val: u32) {
        if !self.is_x2apic() {
            self.write32(p, REG_LDR, val);
        }
    }

    pub fn eoi<P: CpuOps + Mmio + ?Sized>(&self, p: &P) {
        self.write32(p, REG_EOI, 0);
    }

    /// Software-enable (or disable) the APIC and set the spurious vector.
    pub fn online<P: CpuOps + Mmio + ?Sized>(&self, p: &P, enabled: bool, spurious: u8) {
        let mut sir = self.read32(p, REG_SIR);
        if enabled {
            sir |= SIR_APIC_ENABLE;
        } else {
            sir &= !SIR_APIC_ENABLE;
        }
        if spurious >= 32 {
            sir = (sir & !0xFF) | spurious as u32;
        }
        self.write_ldr(p, 0xFFFF_FFFF);
        self.write32(p, REG_SIR, sir);
    }

    /// Accept every interrupt priority.
    pub fn open_all_irqs<P: CpuOps + Mmio + ?Sized>(&self, p: &P) {
        self.write32(p, REG_TPR, 0);
    }

    /// INIT assert then de-assert to every other CPU.
    pub fn broadcast_init<P: CpuOps + Mmio + ?Sized>(&self, p: &P) {
        let init = ICR_DELIVERY_INIT | ICR_DEST_LOGICAL | ICR_TRIGGER_LEVEL | ICR_DEST_OTHER;
        self.command(p, 0xFFFF_FFFF, init | ICR_LEVEL_ASSERT);
        self.command(p, 0xFFFF_FFFF, init);
    }

    /// Start-up IPI; the AP begins executing at `page << 12` in real mode.
    pub fn send_sipi<P: CpuOps + Mmio + ?Sized>(&self, p: &P, dest: u32, page: u8) {
        self.command(p, dest, page as u32 | ICR_DELIVERY_SIPI | ICR_DEST_BYID);
    }

    pub fn send_ipi<P: CpuOps + Mmio + ?Sized>(&self, p: &P, target: IpiTarget, vector: u8) {
        let delivery = if vector == NMI_VECTOR { ICR_DELIVERY_NMI } else { ICR_DELIVERY_FIXED };
        let (dest, shorthand) = match target {
            IpiTarget::Cpu(id) => (id, ICR_DEST_BYID),
            IpiTarget::SelfOnly => (0, ICR_DEST_SELF),
            IpiTarget::All => (0, ICR_DEST_ALL),
            IpiTarget::Others => (0, ICR_DEST_OTHER),
        };
        self.command(p, dest, vector as u32 | delivery | shorthand);
    }

    pub fn id<P: CpuOps + Mmio + ?Sized>(&self, p: &P) -> u32 {
        let raw = self.read32(p, REG_ID);
        match self {
            LocalApic::XApic { .. } => raw >> 24,
            LocalApic::X2Apic => raw,
        }
    }

    pub fn timer_count<P: CpuOps + Mmio + ?Sized>(&self, p: &P) -> u32 {
        self.read32(p, REG_TIMER_CCR)
    }

    /// Program the timer. `divide` is a power of two from 1 to 128.
    pub fn configure_timer<P: CpuOps + Mmio + ?Sized>(
        &self,
        p: &P,
        vector: u8,
        count: u32,
        mode: TimerMode,
        divide: u8,
        mask: bool,
    ) {
        debug_assert!(divide.is_power_of_two());
        let dcr = DCR_BY_LOG2[(divide.max(1).trailing_zeros() as usize).min(7)];
        self.write32(p, REG_TIMER_DCR, dcr);
        let lvt = vector as u32
            | (mode as u32) << LVT_TIMER_MODE_SHIFT
            | if mask { LVT_MASKED } else { 0 };
        self.write32(p, REG_LVT_TR, lvt);
        // writing the initial count arms the timer
        self.write32(p, REG_TIMER_ICR, count);
    }

    /// Program a 64-bit tick count, trading divider for range.
    pub fn configure_timer_auto<P: CpuOps + Mmio + ?Sized>(
        &self,
        p: &P,
        vector: u8,
        ticks: u64,
        mode: TimerMode,
        mask: bool,
    ) {
        let (count, log2) = Self::auto_divide(ticks);
        self.configure_timer(p, vector, count, mode, 1 << log2, mask);
    }

    fn auto_divide(mut ticks: u64) -> (u32, u32) {
        let mut log2 = 0;
        while log2 < 7 && (ticks > u32::MAX as u64 || ticks & 1 == 0) {
            ticks >>= 1;
            log2 += 1;
        }
        (ticks.min(u32::MAX as u64) as u32, log2)
    }

    /// Log every readable register, four per line.
    pub fn dump_regs<P: CpuOps + Mmio + ?Sized>(&self, p: &P) {
        let mut line: heapless::String<96> = heapless::String::new();
        let mut n = 0;
        for reg in 0..REG_COUNT {
            if !self.reg_readable(reg) {
                continue;
            }
            let _ = write!(line, " {:02x}={:08x}", reg, self.read32(p, reg));
            n += 1;
            if n % 4 == 0 {
                log::debug!(target: "lapic", "{}", line);
                line.clear();
            }
        }
        if !line.is_empty() {
            log::debug!(target: "lapic", "{}", line);
        }
    }

    /// Time the APIC timer and TSC against the PM timer, or against
    /// `nsleep` when the platform has none.
    pub fn calibrate<P: CpuOps + Mmio + PciConfig + Timing + ?Sized>(
        &self,
        p: &P,
        pm: Option<&PmTimer>,
    ) -> Calibration {
        const START: u32 = 0xFFFF_FFF0;
        self.configure_timer(p, 0, START, TimerMode::OneShot, 1, true);

        let tsc_before = p.rdtsc();
        let ns = match pm {
            Some(pm) => {
                let before = pm.read(p);
                let ticks = loop {
                    p.pause();
                    let ticks = pm.diff(before, pm.read(p));
                    if ticks >= CALIBRATION_PM_TICKS {
                        break ticks;
                    }
                };
                PmTimer::ticks_to_ns(ticks as u64)
            }
            None => p.nsleep(CALIBRATION_FALLBACK_NS),
        };
        let tsc_elapsed = p.rdtsc().wrapping_sub(tsc_before);
        let apic_elapsed = START.wrapping_sub(self.timer_count(p));
        self.configure_timer(p, 0, 0, TimerMode::OneShot, 1, true);

        if ns == 0 {
            log::warn!(target: "lapic", "calibration window was empty");
            return Calibration::default();
        }
        let per_sec = |n: u64| (n as u128 * 1_000_000_000 / ns as u128) as u64;
        let mut cpu_freq = per_sec(tsc_elapsed);
        let mut apic_freq = per_sec(apic_elapsed as u64);
        if pm.is_some() {
            // snap to 16.67 MHz and 100 MHz steps
            cpu_freq += 8_333_333;
            cpu_freq -= cpu_freq % 16_666_666;
            apic_freq += 50_000_000;
            apic_freq -= apic_freq % 100_000_000;
        }
        let rdtsc_mhz = (cpu_freq + 500_000) / 1_000_000;
        log::info!(target: "lapic", "APIC timer {} Hz, TSC {} MHz", apic_freq, rdtsc_mhz);
        Calibration { apic_timer_freq: apic_freq, rdtsc_mhz, clock: ClockScale::from_mhz(rdtsc_mhz) }
    }
}
