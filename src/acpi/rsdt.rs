// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! RSDT/XSDT walk and per-signature dispatch.

use core::mem::size_of;

use crate::acpi::madt;
use crate::acpi::tables::{
    self, Fadt, Hpet, SIG_FADT, SIG_HPET, SIG_MADT, SIG_RSDT, SIG_XSDT, SdtHeader, checksum_ok,
};
use crate::config::TABLE_MAP_GUESS;
use crate::error::{Error, Result, SigDisplay};
use crate::platform::{MapFlags, PhysMapper, PhysWindow};
use crate::routing::{HpetInfo, RootTable, RoutingModel, SdtWidth};

const HDR_LEN: usize = size_of::<SdtHeader>();

/// A mapped SDT trimmed to its declared length.
pub struct MappedTable<'p, P: PhysMapper + ?Sized> {
    window: PhysWindow<'p, P>,
    len: usize,
    pub hdr: SdtHeader,
}

impl<P: PhysMapper + ?Sized> MappedTable<'_, P> {
    pub fn bytes(&self) -> &[u8] {
        &self.window.bytes()[..self.len]
    }
}

/// Map an SDT with a size guess, then re-map if the header says it is bigger.
pub fn map_table<P: PhysMapper + ?Sized>(
    p: &P,
    phys: u64,
    guess: usize,
) -> Result<MappedTable<'_, P>> {
    let guess = guess.max(HDR_LEN);
    let mut window = PhysWindow::new(p, phys, guess, MapFlags::TABLE)?;
    let hdr: SdtHeader =
        tables::read(window.bytes(), 0).ok_or(Error::Truncated { what: "SDT header" })?;
    let len = hdr.len as usize;
    if len < HDR_LEN {
        return Err(Error::Truncated { what: "SDT" });
    }
    if len > window.len() {
        drop(window);
        window = PhysWindow::new(p, phys, len, MapFlags::TABLE)?;
    }
    Ok(MappedTable { window, len, hdr })
}

/// Walk the root table and every table it points at.
pub fn walk<P: PhysMapper + ?Sized>(p: &P, root: RootTable, model: &mut RoutingModel) -> Result<()> {
    let guess = if root.len == 0 { HDR_LEN } else { root.len as usize };
    let table = map_table(p, root.addr, guess)?;
    let sig = table.hdr.sig;
    if !checksum_ok(table.bytes()) {
        return Err(Error::BadChecksum { sig });
    }
    let want = match root.width {
        SdtWidth::Rsdt32 => SIG_RSDT,
        SdtWidth::Xsdt64 => SIG_XSDT,
    };
    if &sig != want {
        log::warn!(target: "acpi", "root table signature {}, expected {}", SigDisplay(&sig), SigDisplay(want));
    }
    model.root = Some(RootTable { len: table.len as u32, ..root });

    let bytes = table.bytes();
    let stride = root.width.stride();
    let mut off = HDR_LEN;
    while off + stride <= bytes.len() {
        let entry = &bytes[off..off + stride];
        let addr = match root.width {
            SdtWidth::Rsdt32 => u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as u64,
            SdtWidth::Xsdt64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(entry);
                u64::from_le_bytes(raw)
            }
        };
        off += stride;
        if addr == 0 {
            continue;
        }
        if let Err(e) = process_table(p, addr, model) {
            log::error!(target: "acpi", "table at {:#x}: {}", addr, e);
        }
    }
    Ok(())
}

fn process_table<P: PhysMapper + ?Sized>(p: &P, phys: u64, model: &mut RoutingModel) -> Result<()> {
    let table = map_table(p, phys, TABLE_MAP_GUESS)?;
    let sig = table.hdr.sig;
    let bytes = table.bytes();
    log::trace!(target: "acpi", "{} at {:#x}, {} bytes", SigDisplay(&sig), phys, bytes.len());

    let known = [SIG_FADT, SIG_MADT, SIG_HPET];
    if !known.contains(&&sig) {
        log::debug!(target: "acpi", "ignoring table {}", SigDisplay(&sig));
        return Ok(());
    }
    if !checksum_ok(bytes) {
        return Err(Error::BadChecksum { sig });
    }

    if &sig == SIG_FADT {
        if model.fadt.is_some() {
            log::warn!(target: "acpi", "duplicate FADT ignored");
            return Ok(());
        }
        // ACPI 1.0 FADTs stop after the flags word; the rest reads as zero
        let fadt: Fadt = tables::read_prefix(bytes);
        log::debug!(
            target: "acpi",
            "FADT rev {}: pm_timer port {:#x}, flags {:#x}",
            { fadt.hdr.rev },
            { fadt.pm_timer_block },
            { fadt.flags }
        );
        model.fadt = Some(fadt);
    } else if &sig == SIG_MADT {
        madt::process(bytes, model)?;
    } else {
        let hpet: Hpet = tables::read(bytes, 0).ok_or(Error::Truncated { what: "HPET" })?;
        let info = HpetInfo {
            block_id: hpet.blk_id,
            base: hpet.addr,
            number: hpet.number,
            min_tick: hpet.min_tick_count,
        };
        let base = info.base.addr;
        log::debug!(target: "acpi", "HPET #{} at {:#x}", info.number, base);
        model.hpet_list.push(info);
    }
    Ok(())
}
