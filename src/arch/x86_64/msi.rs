// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! MSI vector blocks, carved from the space above the IOAPIC windows.

use spin::Mutex;

use crate::arch::x86_64::ioapic::IoApicSet;
use crate::irq::VectorMap;
use crate::platform::{IntrHandler, KernelServices};

pub const MSI_ADDR_BASE: u64 = 0xFEE0_0000;
const MSI_ADDR_DEST_SHIFT: u32 = 12;

/// What a device writes to raise one interrupt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsiMessage {
    pub addr: u64,
    pub data: u32,
}

/// Allocate `msgs.len()` contiguous, naturally aligned vectors, hook them and
/// fill in the device messages. Returns the first logical IRQ.
///
/// `distribute` spreads the messages round-robin starting at `cpu_hint`;
/// otherwise all of them target `cpu_hint`.
#[allow(clippy::too_many_arguments)]
pub fn msi_irq_alloc<P: KernelServices + ?Sized>(
    p: &P,
    vectors: &Mutex<VectorMap>,
    ioapics: &IoApicSet,
    apic_ids: &[u32],
    msgs: &mut [MsiMessage],
    cpu_hint: usize,
    distribute: bool,
    handler: IntrHandler,
) -> Option<u8> {
    let count = msgs.len();
    if count == 0 || !ioapics.has_msi_window() || apic_ids.is_empty() {
        return None;
    }
    let cpu = if cpu_hint < apic_ids.len() { cpu_hint } else { 0 };
    let log2 = count.checked_next_power_of_two()?.trailing_zeros();

    let base_intr = ioapics.msi_base_intr();
    let vector = {
        let mut map = vectors.lock();
        let vector = map.alloc_aligned_from(log2, base_intr as usize);
        let Some(vector) = vector else {
            log::warn!(target: "msi", "no block of {} vectors left", 1usize << log2);
            return None;
        };
        let irq = (vector - base_intr as usize)
            .checked_add(ioapics.msi_base_irq() as usize)
            .filter(|irq| irq + count <= 0x100);
        if irq.is_none() {
            map.free(vector, 1 << log2);
            log::warn!(target: "msi", "vector {:#x} has no logical IRQ", vector);
            return None;
        }
        vector
    };

    for (i, msg) in msgs.iter_mut().enumerate() {
        let target = if distribute { (cpu + i) % apic_ids.len() } else { cpu };
        let apic_id = (apic_ids[target] & 0xFF) as u64;
        let intr = (vector + i) as u8;
        *msg = MsiMessage { addr: MSI_ADDR_BASE | apic_id << MSI_ADDR_DEST_SHIFT, data: intr as u32 };
        p.hook_intr(intr, handler);
    }
    let irq = (vector - base_intr as usize + ioapics.msi_base_irq() as usize) as u8;
    log::debug!(target: "msi", "{} vectors at {:#x}, IRQ {}", count, vector, irq);
    Some(irq)
}
