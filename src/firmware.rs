// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Firmware table discovery: ACPI first, legacy MP tables as a fallback.

use core::mem::size_of;

use crate::acpi::{self, rsdp, tables::Rsdp20};
use crate::config::{
    BASE_MEM_TOP, BASE_MEM_TOP_LEN, BDA_EBDA_SEG, BIOS_ROM_ACPI, BIOS_ROM_ACPI_LEN, BIOS_ROM_MP,
    BIOS_ROM_MP_LEN, EBDA_SCAN_LEN, SmpConfig,
};
use crate::mp;
use crate::platform::{MapFlags, PhysMapper, PhysWindow};
use crate::routing::{RootTable, RoutingModel};

/// Physical address of the extended BIOS data area, if the BDA names one.
pub fn ebda_base<P: PhysMapper + ?Sized>(p: &P) -> Option<u64> {
    let bda = PhysWindow::new(p, BDA_EBDA_SEG, 2, MapFlags::TABLE).ok()?;
    let b = bda.bytes();
    let seg = u16::from_le_bytes([b[0], b[1]]) as u64;
    (seg != 0).then_some(seg << 4)
}

/// Map `len` bytes at `phys` and run `f` over them.
fn scan_region<P, T>(p: &P, phys: u64, len: usize, f: impl FnOnce(&[u8]) -> Option<T>) -> Option<T>
where
    P: PhysMapper + ?Sized,
{
    match PhysWindow::new(p, phys, len, MapFlags::TABLE) {
        Ok(window) => f(window.bytes()),
        Err(e) => {
            log::warn!(target: "fw", "scan of {:#x}: {}", phys, e);
            None
        }
    }
}

/// Find a valid RSDP: loader hint, then the EBDA, then the BIOS ROM.
pub fn find_rsdp<P: PhysMapper + ?Sized>(p: &P, hint: Option<u64>) -> Option<RootTable> {
    if let Some(addr) = hint {
        match scan_region(p, addr, size_of::<Rsdp20>(), rsdp::parse) {
            Some(root) => {
                log::info!(target: "acpi", "RSDP at {:#x} (loader)", addr);
                return Some(root);
            }
            None => log::warn!(target: "acpi", "loader RSDP at {:#x} is invalid", addr),
        }
    }
    let mut regions: heapless::Vec<(u64, usize), 2> = heapless::Vec::new();
    if let Some(ebda) = ebda_base(p) {
        let _ = regions.push((ebda, EBDA_SCAN_LEN));
    }
    let _ = regions.push((BIOS_ROM_ACPI, BIOS_ROM_ACPI_LEN));
    regions.into_iter().find_map(|(base, len)| {
        let (off, root) = scan_region(p, base, len, rsdp::scan)?;
        log::info!(target: "acpi", "RSDP at {:#x}", base + off as u64);
        Some(root)
    })
}

/// Find the MP configuration table: EBDA, top of base memory, BIOS ROM.
pub fn find_mp_config<P: PhysMapper + ?Sized>(p: &P) -> Option<u64> {
    let mut regions: heapless::Vec<(u64, usize), 3> = heapless::Vec::new();
    if let Some(ebda) = ebda_base(p) {
        let _ = regions.push((ebda, EBDA_SCAN_LEN));
    }
    let _ = regions.push((BASE_MEM_TOP, BASE_MEM_TOP_LEN));
    let _ = regions.push((BIOS_ROM_MP, BIOS_ROM_MP_LEN));
    regions
        .into_iter()
        .find_map(|(base, len)| scan_region(p, base, len, mp::find_fps).map(|(_, cfg)| cfg))
}

/// Fill `model` from whichever firmware tables the configuration allows.
/// Returns `false` when nothing usable was found.
pub fn locate_and_parse<P: PhysMapper + ?Sized>(
    p: &P,
    cfg: &SmpConfig,
    model: &mut RoutingModel,
) -> bool {
    if cfg.enable_acpi {
        match find_rsdp(p, cfg.rsdp_hint) {
            Some(root) => {
                if acpi::parse_root(p, root, model) {
                    return true;
                }
                // a half-filled model is worse than none
                *model = RoutingModel::new();
            }
            None => log::info!(target: "acpi", "no RSDP found"),
        }
    }
    if cfg.enable_mps {
        if let Some(cfg_phys) = find_mp_config(p) {
            match mp::parse(p, cfg_phys, model) {
                Ok(()) => return true,
                Err(e) => {
                    log::error!(target: "mp", "config table at {:#x}: {}", cfg_phys, e);
                    *model = RoutingModel::new();
                }
            }
        } else {
            log::info!(target: "mp", "no MP floating pointer found");
        }
    }
    log::error!(target: "fw", "no usable ACPI or MP tables");
    false
}
