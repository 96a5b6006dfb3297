// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Seams between the SMP subsystem and the rest of the kernel.
//!
//! Everything bring-up needs from outside goes through these traits:
//! physical windows, register access, privileged CPU instructions, delays
//! and the generic IRQ layer. The kernel image implements them on bare metal
//! (`arch::x86_64::hw`), tests implement them on an in-memory machine.

use core::ptr::NonNull;

use bitflags::bitflags;

use crate::arch::x86_64::tsc::ClockScale;
use crate::irq::IrqController;

bitflags! {
    /// Protection and cacheability of a physical window.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const READ          = 1 << 0;
        const WRITE         = 1 << 1;
        const NO_CACHE      = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
    }
}

impl MapFlags {
    /// Firmware tables: read-only, normal caching.
    pub const TABLE: Self = Self::READ;
    /// Device registers: read/write, uncached.
    pub const DEVICE: Self = Self::READ
        .union(Self::WRITE)
        .union(Self::NO_CACHE)
        .union(Self::WRITE_THROUGH);
}

/// Access width of a single register read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    pub const fn mask(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }
}

pub trait PhysMapper {
    /// Map `len` bytes at `phys`. The window stays valid until `unmap_phys`.
    fn map_phys(&self, phys: u64, len: usize, flags: MapFlags) -> Option<NonNull<u8>>;
    fn unmap_phys(&self, virt: NonNull<u8>, len: usize);
}

pub trait Mmio {
    /// # Safety
    /// `addr` must lie inside a live device mapping and be aligned for `width`.
    unsafe fn mmio_read(&self, addr: NonNull<u8>, width: Width) -> u64;
    /// # Safety
    /// Same as [`Mmio::mmio_read`].
    unsafe fn mmio_write(&self, addr: NonNull<u8>, width: Width, val: u64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

/// Privileged instructions of the executing CPU.
pub trait CpuOps {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegs;
    fn read_msr(&self, msr: u32) -> u64;
    fn write_msr(&self, msr: u32, val: u64);
    fn rdtsc(&self) -> u64;
    fn pause(&self);
    fn port_read(&self, port: u16, width: Width) -> u32;
    fn port_write(&self, port: u16, width: Width, val: u32);
    /// Disable interrupts; returns whether they were enabled.
    fn irq_save(&self) -> bool;
    fn irq_restore(&self, was_enabled: bool);
}

pub trait Timing {
    /// Busy-wait at least `ns` nanoseconds and return how long it really took.
    fn nsleep(&self, ns: u64) -> u64;

    fn sleep_ms(&self, ms: u64) {
        self.nsleep(ms.saturating_mul(1_000_000));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddress {
    pub segment: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

pub trait PciConfig {
    fn pci_config_read(&self, addr: PciAddress, offset: u16, width: Width) -> u64;
}

/// Interrupt frame as seen by the generic IRQ layer. Never dereferenced here.
#[repr(C)]
pub struct IsrContext {
    _opaque: [u8; 0],
}

/// Raw vector handler, as stored in the IDT dispatch table.
pub type IntrHandler = fn(intr: u8, ctx: *mut IsrContext) -> *mut IsrContext;

/// A time source that became usable during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// The ACPI PM timer backs `nsleep` (see `Smp::pm_nsleep`).
    PmTimer,
    /// Invariant TSC: `ns = cycles * numer / denom`.
    Tsc(ClockScale),
}

/// Late-bound kernel services consumed during and after bring-up.
pub trait KernelServices {
    fn hook_intr(&self, intr: u8, handler: IntrHandler);
    fn unhook_intr(&self, intr: u8, handler: IntrHandler);
    /// Run the generic IRQ layer's handlers for logical `irq`.
    fn invoke_irq(&self, intr: u8, irq: u8, ctx: *mut IsrContext) -> *mut IsrContext;
    fn schedule_if_idle(&self, ctx: *mut IsrContext) -> *mut IsrContext;
    fn register_irq_controller(&self, controller: &'static dyn IrqController);
    /// Allocate one TSS (and its stacks) per logical CPU slot.
    fn init_tss(&self, cpu_count: usize);
    /// Number of APs that have reached the scheduler.
    fn cpus_started(&self) -> u32;
    /// "SMP online" callout.
    fn smp_online(&self);
    fn install_clock(&self, source: ClockSource);
}

/// Everything bring-up needs, in one bound.
pub trait Platform: PhysMapper + Mmio + CpuOps + Timing + PciConfig + KernelServices {}

impl<T> Platform for T where T: PhysMapper + Mmio + CpuOps + Timing + PciConfig + KernelServices {}

/// A physical window that unmaps itself when dropped.
pub struct PhysWindow<'p, P: PhysMapper + ?Sized> {
    mapper: &'p P,
    virt: NonNull<u8>,
    len: usize,
}

impl<'p, P: PhysMapper + ?Sized> PhysWindow<'p, P> {
    pub fn new(mapper: &'p P, phys: u64, len: usize, flags: MapFlags) -> crate::Result<Self> {
        let virt = mapper
            .map_phys(phys, len, flags)
            .ok_or(crate::Error::MapFailed { phys, len })?;
        Ok(Self { mapper, virt, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.virt
    }

    /// View the window as bytes.
    ///
    /// Only valid for memory-backed windows (firmware tables), never for
    /// device registers.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the mapper handed out `len` readable bytes that live until unmap.
        unsafe { core::slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }
}

impl<P: PhysMapper + ?Sized> Drop for PhysWindow<'_, P> {
    fn drop(&mut self) {
        self.mapper.unmap_phys(self.virt, self.len);
    }
}
