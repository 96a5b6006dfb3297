// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Jotunheim SMP bring-up.
//!
//! Firmware table discovery (ACPI, legacy MP tables), the interrupt routing
//! model built from it, IOAPIC programming, the local APIC in both xAPIC and
//! x2APIC flavours, timer calibration and the INIT/SIPI dance that wakes the
//! application processors.
//!
//! Boot order:
//! 1. [`arch::x86_64::smp::Smp::bootstrap`] parses tables, brings up the BSP's
//!    local APIC, initializes every IOAPIC and calibrates the clocks.
//! 2. [`arch::x86_64::smp::Smp::enable`] programs all redirection entries and
//!    registers the IOAPIC layer as the kernel's IRQ controller.
//! 3. [`arch::x86_64::smp::Smp::start_smp`] starts the APs once interrupts are on.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "kernel-image", feature(abi_x86_interrupt))]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod acpi;
pub mod arch;
pub mod bootinfo;
pub mod config;
pub mod error;
pub mod firmware;
pub mod irq;
pub mod logger;
pub mod mem;
pub mod mp;
pub mod platform;
pub mod routing;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
