// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
pub mod apic;
pub mod cpuid;
pub mod hw;
#[cfg(feature = "kernel-image")]
pub mod idt;
pub mod ioapic;
pub mod mmio_map;
pub mod msi;
pub mod serial;
pub mod smp;
pub mod tsc;
