// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Bare-metal [`Platform`](crate::platform::Platform): real instructions,
//! the HHDM for firmware tables and the uncached MMIO window for device
//! registers.

use core::arch::x86_64::__cpuid_count;
use core::ptr::NonNull;

use spin::Mutex;
use volatile::VolatilePtr;
use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;
use x86_64::registers::model_specific::Msr;

use crate::arch::x86_64::mmio_map::MmioWindow;
use crate::arch::x86_64::tsc::{self, ClockScale};
use crate::irq::IrqController;
use crate::platform::{
    ClockSource, CpuOps, CpuidRegs, IntrHandler, IsrContext, KernelServices, MapFlags, Mmio,
    PciAddress, PciConfig, PhysMapper, Timing, Width,
};

const PCI_CONFIG_ADDRESS: u16 = 0xCF8;
const PCI_CONFIG_DATA: u16 = 0xCFC;

const PIT_HZ: u128 = 1_193_182;
const PIT_CH2_DATA: u16 = 0x42;
const PIT_COMMAND: u16 = 0x43;
const PIT_GATE: u16 = 0x61;
/// Channel 2, lobyte/hibyte, mode 0, binary.
const PIT_CH2_ONESHOT: u32 = 0b1011_0000;
const PIT_GATE_ON: u32 = 1 << 0;
const PIT_SPEAKER: u32 = 1 << 1;
const PIT_OUT2: u32 = 1 << 5;

pub struct HwPlatform<S: KernelServices> {
    hhdm: u64,
    window: Mutex<MmioWindow>,
    tsc: Mutex<Option<ClockScale>>,
    services: S,
}

impl<S: KernelServices> HwPlatform<S> {
    pub fn new(hhdm: u64, window: MmioWindow, services: S) -> Self {
        let hw = Self { hhdm, window: Mutex::new(window), tsc: Mutex::new(None), services };
        // an advertised TSC rate is good enough until calibration runs
        if let Some(hz) = tsc::tsc_hz_from_cpuid(&hw) {
            *hw.tsc.lock() = ClockScale::from_mhz(hz / 1_000_000);
        }
        hw
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    fn tsc_wait(&self, scale: ClockScale, ns: u64) -> u64 {
        let start = self.rdtsc();
        loop {
            let elapsed = scale.cycles_to_ns(self.rdtsc().wrapping_sub(start));
            if elapsed >= ns {
                return elapsed;
            }
            core::hint::spin_loop();
        }
    }

    /// PIT channel 2 one-shot, in chunks of at most 65535 ticks.
    fn pit_wait(&self, ns: u64) -> u64 {
        let mut waited = 0u64;
        while waited < ns {
            let left = (ns - waited) as u128;
            let ticks = (left * PIT_HZ / 1_000_000_000).clamp(1, 0xFFFF) as u32;
            let gate = self.port_read(PIT_GATE, Width::W8) & !(PIT_SPEAKER | PIT_GATE_ON);
            self.port_write(PIT_GATE, Width::W8, gate);
            self.port_write(PIT_COMMAND, Width::W8, PIT_CH2_ONESHOT);
            self.port_write(PIT_CH2_DATA, Width::W8, ticks & 0xFF);
            self.port_write(PIT_CH2_DATA, Width::W8, ticks >> 8);
            // rising gate starts the count
            self.port_write(PIT_GATE, Width::W8, gate | PIT_GATE_ON);
            while self.port_read(PIT_GATE, Width::W8) & PIT_OUT2 == 0 {
                core::hint::spin_loop();
            }
            waited += (ticks as u128 * 1_000_000_000 / PIT_HZ).max(1) as u64;
        }
        waited
    }
}

impl<S: KernelServices> PhysMapper for HwPlatform<S> {
    fn map_phys(&self, phys: u64, len: usize, flags: MapFlags) -> Option<NonNull<u8>> {
        if flags.contains(MapFlags::NO_CACHE) {
            return self.window.lock().map(phys, len, flags);
        }
        NonNull::new(self.hhdm.checked_add(phys)? as *mut u8)
    }

    fn unmap_phys(&self, virt: NonNull<u8>, len: usize) {
        let mut window = self.window.lock();
        if window.contains(virt.as_ptr() as u64) {
            window.unmap(virt, len);
        }
    }
}

impl<S: KernelServices> Mmio for HwPlatform<S> {
    unsafe fn mmio_read(&self, addr: NonNull<u8>, width: Width) -> u64 {
        // SAFETY: the caller guarantees a live, aligned device mapping.
        unsafe {
            match width {
                Width::W8 => VolatilePtr::new(addr).read() as u64,
                Width::W16 => VolatilePtr::new(addr.cast::<u16>()).read() as u64,
                Width::W32 => VolatilePtr::new(addr.cast::<u32>()).read() as u64,
                Width::W64 => VolatilePtr::new(addr.cast::<u64>()).read(),
            }
        }
    }

    unsafe fn mmio_write(&self, addr: NonNull<u8>, width: Width, val: u64) {
        // SAFETY: as above.
        unsafe {
            match width {
                Width::W8 => VolatilePtr::new(addr).write(val as u8),
                Width::W16 => VolatilePtr::new(addr.cast::<u16>()).write(val as u16),
                Width::W32 => VolatilePtr::new(addr.cast::<u32>()).write(val as u32),
                Width::W64 => VolatilePtr::new(addr.cast::<u64>()).write(val),
            }
        }
    }
}

impl<S: KernelServices> CpuOps for HwPlatform<S> {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidRegs {
        // SAFETY: CPUID exists on every x86_64 CPU. Newer toolchains treat
        // the intrinsic as safe.
        #[allow(unused_unsafe)]
        let r = unsafe { __cpuid_count(leaf, subleaf) };
        CpuidRegs { eax: r.eax, ebx: r.ebx, ecx: r.ecx, edx: r.edx }
    }

    fn read_msr(&self, msr: u32) -> u64 {
        unsafe { Msr::new(msr).read() }
    }

    fn write_msr(&self, msr: u32, val: u64) {
        let mut reg = Msr::new(msr);
        unsafe { reg.write(val) }
    }

    fn rdtsc(&self) -> u64 {
        tsc::rdtsc()
    }

    fn pause(&self) {
        core::hint::spin_loop();
    }

    fn port_read(&self, port: u16, width: Width) -> u32 {
        unsafe {
            match width {
                Width::W8 => Port::<u8>::new(port).read() as u32,
                Width::W16 => Port::<u16>::new(port).read() as u32,
                Width::W32 | Width::W64 => Port::<u32>::new(port).read(),
            }
        }
    }

    fn port_write(&self, port: u16, width: Width, val: u32) {
        unsafe {
            match width {
                Width::W8 => Port::<u8>::new(port).write(val as u8),
                Width::W16 => Port::<u16>::new(port).write(val as u16),
                Width::W32 | Width::W64 => Port::<u32>::new(port).write(val),
            }
        }
    }

    fn irq_save(&self) -> bool {
        let was = interrupts::are_enabled();
        interrupts::disable();
        was
    }

    fn irq_restore(&self, was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }
}

impl<S: KernelServices> Timing for HwPlatform<S> {
    fn nsleep(&self, ns: u64) -> u64 {
        let scale = *self.tsc.lock();
        match scale {
            Some(scale) => self.tsc_wait(scale, ns),
            None => self.pit_wait(ns),
        }
    }
}

impl<S: KernelServices> PciConfig for HwPlatform<S> {
    /// Configuration mechanism #1; segment 0 only.
    fn pci_config_read(&self, addr: PciAddress, offset: u16, width: Width) -> u64 {
        if addr.segment != 0 || offset > 0xFF {
            log::warn!(target: "pci", "{:?}+{:#x} not reachable through port I/O", addr, offset);
            return 0;
        }
        let sel = 1u32 << 31
            | (addr.bus as u32) << 16
            | (addr.device as u32 & 0x1F) << 11
            | (addr.function as u32 & 0x7) << 8
            | (offset as u32 & 0xFC);
        let was = self.irq_save();
        self.port_write(PCI_CONFIG_ADDRESS, Width::W32, sel);
        let val = match width {
            Width::W64 => {
                let lo = self.port_read(PCI_CONFIG_DATA, Width::W32) as u64;
                self.port_write(PCI_CONFIG_ADDRESS, Width::W32, sel + 4);
                lo | (self.port_read(PCI_CONFIG_DATA, Width::W32) as u64) << 32
            }
            w => self.port_read(PCI_CONFIG_DATA + (offset & 3), w) as u64,
        };
        self.irq_restore(was);
        val
    }
}

impl<S: KernelServices> KernelServices for HwPlatform<S> {
    fn hook_intr(&self, intr: u8, handler: IntrHandler) {
        self.services.hook_intr(intr, handler)
    }

    fn unhook_intr(&self, intr: u8, handler: IntrHandler) {
        self.services.unhook_intr(intr, handler)
    }

    fn invoke_irq(&self, intr: u8, irq: u8, ctx: *mut IsrContext) -> *mut IsrContext {
        self.services.invoke_irq(intr, irq, ctx)
    }

    fn schedule_if_idle(&self, ctx: *mut IsrContext) -> *mut IsrContext {
        self.services.schedule_if_idle(ctx)
    }

    fn register_irq_controller(&self, controller: &'static dyn IrqController) {
        self.services.register_irq_controller(controller)
    }

    fn init_tss(&self, cpu_count: usize) {
        self.services.init_tss(cpu_count)
    }

    fn cpus_started(&self) -> u32 {
        self.services.cpus_started()
    }

    fn smp_online(&self) {
        self.services.smp_online()
    }

    fn install_clock(&self, source: ClockSource) {
        if let ClockSource::Tsc(scale) = source {
            // calibrated rate replaces the advertised one
            *self.tsc.lock() = Some(scale);
        }
        self.services.install_clock(source)
    }
}
