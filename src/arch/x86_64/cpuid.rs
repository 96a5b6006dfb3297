// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! CPUID feature probes used during bring-up.

use crate::platform::{CpuOps, CpuidRegs};

pub const LEAF_FEATURES: u32 = 0x01;
pub const LEAF_CACHE_TOPOLOGY: u32 = 0x04;
pub const LEAF_EXT_MAX: u32 = 0x8000_0000;
pub const LEAF_APM: u32 = 0x8000_0007;

const FEAT_EDX_APIC: u32 = 1 << 9;
const FEAT_EDX_HTT: u32 = 1 << 28;
const FEAT_ECX_X2APIC: u32 = 1 << 21;
const APM_EDX_INVARIANT_TSC: u32 = 1 << 8;

/// `leaf` if the CPU implements it.
pub fn leaf<P: CpuOps + ?Sized>(p: &P, leaf: u32, subleaf: u32) -> Option<CpuidRegs> {
    let max = if leaf >= LEAF_EXT_MAX {
        p.cpuid(LEAF_EXT_MAX, 0).eax
    } else {
        p.cpuid(0, 0).eax
    };
    (leaf <= max).then(|| p.cpuid(leaf, subleaf))
}

pub fn has_apic<P: CpuOps + ?Sized>(p: &P) -> bool {
    leaf(p, LEAF_FEATURES, 0).is_some_and(|r| r.edx & FEAT_EDX_APIC != 0)
}

pub fn has_x2apic<P: CpuOps + ?Sized>(p: &P) -> bool {
    leaf(p, LEAF_FEATURES, 0).is_some_and(|r| r.ecx & FEAT_ECX_X2APIC != 0)
}

pub fn has_invariant_tsc<P: CpuOps + ?Sized>(p: &P) -> bool {
    leaf(p, LEAF_APM, 0).is_some_and(|r| r.edx & APM_EDX_INVARIANT_TSC != 0)
}

/// Logical processors per package, if hyperthreading is advertised.
pub fn logical_per_package<P: CpuOps + ?Sized>(p: &P) -> Option<u32> {
    let r = leaf(p, LEAF_FEATURES, 0)?;
    (r.edx & FEAT_EDX_HTT != 0).then_some((r.ebx >> 16) & 0xFF)
}

/// Cores per package from the deterministic cache leaf.
pub fn cores_per_package<P: CpuOps + ?Sized>(p: &P) -> Option<u32> {
    leaf(p, LEAF_CACHE_TOPOLOGY, 0).map(|r| ((r.eax >> 26) & 0x3F) + 1)
}

/// Initial APIC ID of the executing CPU.
pub fn initial_apic_id<P: CpuOps + ?Sized>(p: &P) -> u32 {
    p.cpuid(LEAF_FEATURES, 0).ebx >> 24
}
