// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! Kernel-image IDT. Every vector funnels into one general handler, which
//! hands device vectors to the registered IRQ controller.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, Once};
use x86_64::set_general_handler;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame};

use crate::irq::{INTR_APIC_SPURIOUS, INTR_APIC_TIMER, INTR_DYNAMIC_BASE, INTR_EXCEPTION_COUNT, IrqController};
use crate::platform::{IntrHandler, IsrContext};

static IDT: Once<InterruptDescriptorTable> = Once::new();
static HANDLERS: Mutex<[Option<IntrHandler>; 256]> = Mutex::new([None; 256]);
static CONTROLLER: Once<&'static dyn IrqController> = Once::new();
static EOI: Once<fn()> = Once::new();
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Build the table once, load it on the calling CPU.
pub fn load() {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        set_general_handler!(&mut idt, general);
        idt
    })
    .load();
}

pub fn set_eoi(eoi: fn()) {
    EOI.call_once(|| eoi);
}

pub fn set_controller(controller: &'static dyn IrqController) {
    if CONTROLLER.is_completed() {
        log::warn!(target: "idt", "IRQ controller already registered");
        return;
    }
    CONTROLLER.call_once(|| controller);
}

pub fn hook(intr: u8, handler: IntrHandler) {
    let mut table = HANDLERS.lock();
    if table[intr as usize].is_some() {
        log::warn!(target: "idt", "vector {:#x} rehooked", intr);
    }
    table[intr as usize] = Some(handler);
}

pub fn unhook(intr: u8, handler: IntrHandler) {
    let mut table = HANDLERS.lock();
    if table[intr as usize].is_some_and(|h| core::ptr::fn_addr_eq(h, handler)) {
        table[intr as usize] = None;
    }
}

/// Run the handler hooked on `intr`, if any.
pub fn invoke(intr: u8, ctx: *mut IsrContext) -> *mut IsrContext {
    let handler = HANDLERS.lock()[intr as usize];
    match handler {
        Some(h) => h(intr, ctx),
        None => ctx,
    }
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

fn eoi() {
    if let Some(eoi) = EOI.get() {
        eoi();
    }
}

fn general(frame: InterruptStackFrame, index: u8, error: Option<u64>) {
    match index {
        i if i < INTR_EXCEPTION_COUNT => {
            log::error!(
                target: "idt",
                "exception {} (error {:?}) at {:#x}",
                i,
                error,
                frame.instruction_pointer.as_u64()
            );
            loop {
                x86_64::instructions::hlt();
            }
        }
        INTR_APIC_SPURIOUS => {}
        INTR_APIC_TIMER => {
            TICKS.fetch_add(1, Ordering::Relaxed);
            eoi();
        }
        // masked 8259 lines can still raise spurious IRQ 7/15
        i if i < INTR_DYNAMIC_BASE => {}
        i => match CONTROLLER.get() {
            Some(controller) => {
                controller.dispatch(i, core::ptr::null_mut());
            }
            None => {
                invoke(i, core::ptr::null_mut());
                eoi();
            }
        },
    }
}
