// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Interrupt vector map and the IRQ-controller seam.

pub mod bitmap;

pub use bitmap::BitAlloc;

use crate::platform::{IntrHandler, IsrContext};

// ───────────────────────── vector map ─────────────────────────
//   00-1F  CPU exceptions
//   20-2F  legacy 8259 (kept out of the pool)
//   30-FB  dynamically allocated (IOAPIC pins, MSI)
//   80     system call gate
//   FC-FF  APIC timer, TLB shootdown, yield, spurious

pub const INTR_EXCEPTION_COUNT: u8 = 0x20;
pub const INTR_PIC1_BASE: u8 = 0x20;
pub const INTR_PIC2_BASE: u8 = 0x28;
pub const INTR_DYNAMIC_BASE: u8 = 0x30;
pub const INTR_SYSCALL: u8 = 0x80;
pub const INTR_APIC_TIMER: u8 = 0xFC;
pub const INTR_TLB_SHOOTDOWN: u8 = 0xFD;
pub const INTR_THREAD_YIELD: u8 = 0xFE;
pub const INTR_APIC_SPURIOUS: u8 = 0xFF;

/// 256-entry interrupt vector bitmap.
pub type VectorMap = BitAlloc<4>;

/// A vector map with every fixed vector already claimed.
pub fn reserved_vector_map() -> VectorMap {
    let mut map = VectorMap::new();
    let fixed: [(u8, usize); 3] = [
        (0, INTR_DYNAMIC_BASE as usize),
        (INTR_SYSCALL, 1),
        (INTR_APIC_TIMER, 4),
    ];
    for (start, count) in fixed {
        let fresh = map.take(start as usize, count);
        debug_assert!(fresh);
    }
    map
}

/// What the generic IRQ layer needs from whatever routes device lines.
pub trait IrqController {
    fn set_mask(&self, irq: u8, unmask: bool);
    fn hook(&self, irq: u8, handler: IntrHandler);
    fn unhook(&self, irq: u8, handler: IntrHandler);
    /// Route `irq` to logical CPU `cpu`; `None` only asks whether routing
    /// is possible at all.
    fn set_cpu(&self, irq: u8, cpu: Option<usize>) -> bool;
    fn dispatch(&self, intr: u8, ctx: *mut IsrContext) -> *mut IsrContext;
}
