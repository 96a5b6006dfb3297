// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use jotunheim_smp::arch::x86_64::hw::HwPlatform;
use jotunheim_smp::arch::x86_64::mmio_map::MmioWindow;
use jotunheim_smp::arch::x86_64::smp::Smp;
use jotunheim_smp::arch::x86_64::{idt, serial};
use jotunheim_smp::bootinfo::BootInfo;
use jotunheim_smp::config::SmpConfig;
use jotunheim_smp::irq::IrqController;
use jotunheim_smp::mem::{self, mapper, simple_alloc::TinyBump};
use jotunheim_smp::platform::{ClockSource, IntrHandler, IsrContext, KernelServices};
use linked_list_allocator::LockedHeap;
use spin::Once;
use x86_64::instructions::interrupts;

#[global_allocator]
static HEAP: LockedHeap = LockedHeap::empty();

type Machine = HwPlatform<KernelHooks>;

static PLATFORM: Once<Machine> = Once::new();
static SMP: Once<Smp<'static, Machine>> = Once::new();
static AP_STARTED: AtomicU32 = AtomicU32::new(0);
static TSS_SLOTS: AtomicUsize = AtomicUsize::new(0);

/// What the rest of the kernel offers bring-up.
struct KernelHooks;

impl KernelServices for KernelHooks {
    fn hook_intr(&self, intr: u8, handler: IntrHandler) {
        idt::hook(intr, handler);
    }

    fn unhook_intr(&self, intr: u8, handler: IntrHandler) {
        idt::unhook(intr, handler);
    }

    fn invoke_irq(&self, intr: u8, _irq: u8, ctx: *mut IsrContext) -> *mut IsrContext {
        idt::invoke(intr, ctx)
    }

    fn schedule_if_idle(&self, ctx: *mut IsrContext) -> *mut IsrContext {
        ctx
    }

    fn register_irq_controller(&self, controller: &'static dyn IrqController) {
        idt::set_controller(controller);
    }

    fn init_tss(&self, cpu_count: usize) {
        TSS_SLOTS.store(cpu_count, Ordering::SeqCst);
        log::debug!(target: "smp", "TSS slots for {} CPUs", cpu_count);
    }

    fn cpus_started(&self) -> u32 {
        AP_STARTED.load(Ordering::SeqCst)
    }

    fn smp_online(&self) {
        log::info!(target: "smp", "SMP online");
    }

    fn install_clock(&self, source: ClockSource) {
        log::info!(target: "smp", "clock source {:?}", source);
    }
}

fn halt() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

fn lapic_eoi() {
    if let (Some(p), Some(smp)) = (PLATFORM.get(), SMP.get()) {
        smp.lapic().eoi(p);
    }
}

#[unsafe(no_mangle)]
#[unsafe(link_section = ".text._start")]
pub extern "C" fn _start(boot: &'static BootInfo) -> ! {
    interrupts::disable();
    unsafe {
        serial::init_com1();
    }
    let config = SmpConfig::from_bootinfo(boot);
    let _ = jotunheim_smp::logger::init(config.log_level);
    log::info!(target: "smp", "Jotunheim kernel starts");

    if let Err(e) = unsafe { mem::init_heap(&HEAP, boot) } {
        log::error!(target: "smp", "heap: {}", e);
        halt();
    }
    let mapper = match unsafe { mapper::active_offset_mapper(boot.hhdm_base) } {
        Ok(m) => m,
        Err(e) => {
            log::error!(target: "smp", "page tables: {}", e);
            halt();
        }
    };
    let frames = TinyBump::new(boot.pt_scratch_paddr, boot.pt_scratch_paddr + boot.pt_scratch_len);
    let platform =
        PLATFORM.call_once(|| HwPlatform::new(boot.hhdm_base, MmioWindow::new(mapper, frames), KernelHooks));

    idt::load();
    let smp = match Smp::bootstrap(platform, config) {
        Ok(smp) => SMP.call_once(|| smp),
        Err(e) => {
            log::error!(target: "smp", "bring-up failed: {}", e);
            halt();
        }
    };
    idt::set_eoi(lapic_eoi);
    smp.enable();

    interrupts::enable();
    let report = smp.start_smp();
    if !report.failed.is_empty() {
        log::warn!(target: "smp", "APs that never started: {:?}", report.failed);
    }
    log::info!(target: "smp", "{} timer ticks so far", idt::ticks());
    halt()
}

/// Entered from the real-mode trampoline on each AP, on its own stack.
#[unsafe(no_mangle)]
pub extern "C" fn ap_main() -> ! {
    idt::load();
    if let Some(smp) = SMP.get() {
        smp.ap_init();
    }
    AP_STARTED.fetch_add(1, Ordering::SeqCst);
    interrupts::enable();
    halt()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    jotunheim_smp::kprintln!("\n*** KERNEL PANIC ***\n{}", info);
    halt()
}
