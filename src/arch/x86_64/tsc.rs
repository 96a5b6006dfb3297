// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::arch::x86_64::_rdtsc;

use crate::arch::x86_64::cpuid;
use crate::platform::CpuOps;

#[inline]
pub fn rdtsc() -> u64 {
    // Safe to call on x86_64; serializing/ordering handled by callers.
    unsafe { _rdtsc() }
}

pub const fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Cycle → nanosecond ratio, reduced so the hot path is one mul and one div.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockScale {
    pub numer: u64,
    pub denom: u64,
}

impl ClockScale {
    /// e.g. 2500 MHz: gcd(1000, 2500) = 500, so ns = cycles * 2 / 5.
    pub const fn from_mhz(mhz: u64) -> Option<Self> {
        if mhz == 0 {
            return None;
        }
        let g = gcd(1000, mhz);
        Some(Self { numer: 1000 / g, denom: mhz / g })
    }

    pub const fn cycles_to_ns(&self, cycles: u64) -> u64 {
        (cycles as u128 * self.numer as u128 / self.denom as u128) as u64
    }
}

/// TSC rate the CPU advertises, if any (leaf 15H crystal ratio, then 16H).
pub fn tsc_hz_from_cpuid<P: CpuOps + ?Sized>(p: &P) -> Option<u64> {
    if let Some(leaf15) = cpuid::leaf(p, 0x15, 0) {
        let (den, num, crystal) = (leaf15.eax, leaf15.ebx, leaf15.ecx);
        if den != 0 && num != 0 && crystal != 0 {
            return Some(crystal as u64 * num as u64 / den as u64);
        }
    }
    let mhz = cpuid::leaf(p, 0x16, 0)?.eax & 0xFFFF;
    (mhz != 0).then(|| mhz as u64 * 1_000_000)
}
