// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Root System Description Pointer validation and search.

use core::mem::size_of;

use crate::acpi::tables::{self, RSDP_SIG, Rsdp10, Rsdp20, checksum_ok};
use crate::config::SCAN_STEP;
use crate::routing::{RootTable, SdtWidth};

/// Validate an RSDP at the start of `bytes`.
///
/// ACPI 2.0+ pointers need both the extended and the legacy checksum; the
/// XSDT wins over the RSDT whenever its address is non-zero.
pub fn parse(bytes: &[u8]) -> Option<RootTable> {
    let v1: Rsdp10 = tables::read(bytes, 0)?;
    if &v1.sig != RSDP_SIG {
        return None;
    }
    let legacy_ok = checksum_ok(&bytes[..size_of::<Rsdp10>()]);

    let root = if v1.rev != 0 {
        let v2: Rsdp20 = tables::read(bytes, 0)?;
        if !legacy_ok || !checksum_ok(&bytes[..size_of::<Rsdp20>()]) {
            return None;
        }
        let xsdt = v2.xsdt_addr;
        if xsdt != 0 {
            RootTable { addr: xsdt, len: 0, width: SdtWidth::Xsdt64 }
        } else {
            RootTable { addr: v1.rsdt_addr as u64, len: 0, width: SdtWidth::Rsdt32 }
        }
    } else {
        if !legacy_ok {
            return None;
        }
        RootTable { addr: v1.rsdt_addr as u64, len: 0, width: SdtWidth::Rsdt32 }
    };

    if root.addr == 0 {
        log::warn!(target: "acpi", "RSDP rev {} has no root table address", { v1.rev });
        return None;
    }
    Some(root)
}

/// Scan `region` on 16-byte boundaries. Returns the hit's offset and root.
pub fn scan(region: &[u8]) -> Option<(usize, RootTable)> {
    (0..region.len())
        .step_by(SCAN_STEP)
        .find_map(|off| parse(&region[off..]).map(|root| (off, root)))
}
