// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! ACPI power-management timer: a free-running 3.579545 MHz counter,
//! 24 or 32 bits wide, reachable through port I/O, MMIO or PCI config space.

use core::ptr::NonNull;

use crate::acpi::tables::{Fadt, FadtFlags, GAS_PCICFG, GAS_SYSIO, GAS_SYSMEM, Gas};
use crate::config::PM_TIMER_HZ;
use crate::platform::{CpuOps, MapFlags, Mmio, PciAddress, PciConfig, PhysMapper, Width};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmTimerAccess {
    Port { port: u16, width: Width },
    Mem { virt: NonNull<u8>, width: Width },
    Pci { addr: PciAddress, offset: u16, width: Width },
}

#[derive(Debug)]
pub struct PmTimer {
    access: PmTimerAccess,
    extended: bool,
}

// SAFETY: the MMIO variant points at a device register mapped for the
// kernel's lifetime; reads have no side effects.
unsafe impl Send for PmTimer {}
unsafe impl Sync for PmTimer {}

/// GAS access-size code to register width.
fn gas_width(access_size: u8) -> Option<Width> {
    match access_size {
        1 => Some(Width::W8),
        2 => Some(Width::W16),
        3 => Some(Width::W32),
        4 => Some(Width::W64),
        _ => None,
    }
}

impl PmTimer {
    /// Locate the timer from the FADT. The legacy port block wins; the
    /// extended GAS is only consulted when it carries an access size.
    pub fn from_fadt<P: PhysMapper + ?Sized>(p: &P, fadt: &Fadt) -> Option<Self> {
        let extended = fadt.flags().contains(FadtFlags::TMR_VAL_EXT);
        let port = fadt.pm_timer_block;
        if port != 0 {
            let Ok(port) = u16::try_from(port) else {
                log::warn!(target: "acpi", "PM timer port {:#x} out of range", port);
                return None;
            };
            log::debug!(target: "acpi", "PM timer on I/O port {:#x}", port);
            return Some(Self { access: PmTimerAccess::Port { port, width: Width::W32 }, extended });
        }

        let gas: Gas = fadt.x_pm_timer_block;
        if gas.access_size == 0 {
            log::info!(target: "acpi", "no PM timer");
            return None;
        }
        Self::from_gas(p, &gas).map(|access| Self { access, extended })
    }

    fn from_gas<P: PhysMapper + ?Sized>(p: &P, gas: &Gas) -> Option<PmTimerAccess> {
        let addr = gas.addr;
        let space = gas.addr_space;
        let Some(width) = gas_width(gas.access_size) else {
            log::warn!(target: "acpi", "PM timer GAS access size {} unsupported", { gas.access_size });
            return None;
        };
        match space {
            GAS_SYSMEM => {
                log::debug!(target: "acpi", "PM timer in MMIO space at {:#x}", addr);
                let virt = p.map_phys(addr, width.bytes(), MapFlags::DEVICE)?;
                Some(PmTimerAccess::Mem { virt, width })
            }
            GAS_SYSIO if width != Width::W64 => {
                log::debug!(target: "acpi", "PM timer in I/O space at {:#x}", addr);
                let port = u16::try_from(addr).ok()?;
                Some(PmTimerAccess::Port { port, width })
            }
            GAS_PCICFG => {
                log::debug!(target: "acpi", "PM timer in PCI config space at {:#x}", addr);
                Some(PmTimerAccess::Pci {
                    addr: PciAddress {
                        segment: 0,
                        bus: 0,
                        device: ((addr >> 32) & 0xFF) as u8,
                        function: ((addr >> 16) & 0xFF) as u8,
                    },
                    offset: (addr & 0xFFFF) as u16,
                    width,
                })
            }
            _ => {
                log::warn!(target: "acpi", "PM timer address space {} unsupported", space);
                None
            }
        }
    }

    pub fn access(&self) -> PmTimerAccess {
        self.access
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Raw counter value.
    pub fn read<P: CpuOps + Mmio + PciConfig + ?Sized>(&self, p: &P) -> u32 {
        match self.access {
            PmTimerAccess::Port { port, width } => p.port_read(port, width),
            // SAFETY: mapped in from_gas for `width` bytes and never unmapped.
            PmTimerAccess::Mem { virt, width } => unsafe { p.mmio_read(virt, width) as u32 },
            PmTimerAccess::Pci { addr, offset, width } => p.pci_config_read(addr, offset, width) as u32,
        }
    }

    /// Ticks from `before` to `after`, honouring the 24-bit wrap.
    pub fn diff(&self, before: u32, after: u32) -> u32 {
        if self.extended {
            after.wrapping_sub(before)
        } else {
            (after << 8).wrapping_sub(before << 8) >> 8
        }
    }

    pub const fn ticks_to_ns(ticks: u64) -> u64 {
        ticks * 1_000_000_000 / PM_TIMER_HZ
    }

    /// Spin on the counter for at least `ns`; returns the elapsed time.
    pub fn nsleep<P: CpuOps + Mmio + PciConfig + ?Sized>(&self, p: &P, ns: u64) -> u64 {
        let mut last = self.read(p);
        let mut ticks: u64 = 0;
        loop {
            let now = self.read(p);
            ticks += self.diff(last, now) as u64;
            last = now;
            let elapsed = Self::ticks_to_ns(ticks);
            if elapsed >= ns {
                return elapsed;
            }
            p.pause();
        }
    }
}
