// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! SMP bring-up: firmware tables, interrupt routing, clocks, then INIT/SIPI.
//!
//! [`Smp`] owns everything the boot CPU discovers. It is built once with
//! [`Smp::bootstrap`] while interrupts are still off, registered as the IRQ
//! controller with [`Smp::enable`], and finally wakes the application
//! processors with [`Smp::start_smp`] once interrupts are on.

use spin::{Mutex, Once};

use crate::acpi::pm_timer::PmTimer;
use crate::arch::x86_64::apic::{Calibration, LocalApic, TimerMode};
use crate::arch::x86_64::cpuid;
use crate::arch::x86_64::ioapic::IoApicSet;
use crate::arch::x86_64::msi::{self, MsiMessage};
use crate::config::{SIPI_STAGGER_BUDGET_NS, SmpConfig};
use crate::error::Result;
use crate::firmware;
use crate::irq::{INTR_APIC_SPURIOUS, INTR_APIC_TIMER, IrqController, VectorMap, reserved_vector_map};
use crate::platform::{ClockSource, CpuOps, IntrHandler, IsrContext, Platform, Width};
use crate::routing::RoutingModel;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

const IA32_MISC_ENABLE: u32 = 0x1A0;
const MISC_ENABLE_LIMIT_CPUID: u64 = 1 << 22;

/// Most APs a single start report lists as failed.
pub const MAX_REPORTED_FAILURES: usize = 16;

/// How APIC ids are laid out below each package's base id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub packages: usize,
    pub thread_bits: u32,
    pub core_bits: u32,
    pub thread_count: u32,
    pub core_count: u32,
}

fn bits_for(count: u32) -> u32 {
    count.max(1).next_power_of_two().trailing_zeros()
}

impl Topology {
    /// Every listed APIC id is its own single-core, single-thread package.
    pub const fn flat(packages: usize) -> Self {
        Self { packages, thread_bits: 0, core_bits: 0, thread_count: 1, core_count: 1 }
    }

    /// Threads and cores per package from CPUID, for MP-table systems that
    /// only list one id per package.
    pub fn detect<P: CpuOps + ?Sized>(p: &P, packages: usize) -> Self {
        if cpuid::leaf(p, cpuid::LEAF_CACHE_TOPOLOGY, 0).is_none() {
            // firmware may cap the reported max leaf; lift the cap
            let misc = p.read_msr(IA32_MISC_ENABLE);
            if misc & MISC_ENABLE_LIMIT_CPUID != 0 {
                p.write_msr(IA32_MISC_ENABLE, misc & !MISC_ENABLE_LIMIT_CPUID);
            }
        }

        let mut thread_count = cpuid::logical_per_package(p).unwrap_or(1).max(1);
        let mut thread_bits = bits_for(thread_count);
        let core_count = cpuid::cores_per_package(p).unwrap_or(1).max(1);
        let core_bits = bits_for(core_count);

        thread_bits = thread_bits.saturating_sub(core_bits);
        thread_count /= core_count;
        if thread_count == 0 {
            log::warn!(target: "smp", "CPUID reports no threads per core, assuming one");
            thread_count = 1;
        }
        Self { packages, thread_bits, core_bits, thread_count, core_count }
    }

    pub fn per_package(&self) -> usize {
        (self.thread_count * self.core_count) as usize
    }

    pub fn cpu_count(&self) -> usize {
        self.packages * self.per_package()
    }

    /// APIC id offsets within a package: thread-major, core varies fastest.
    pub fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.thread_count)
            .flat_map(move |thread| (0..self.core_count).map(move |core| thread | core << self.thread_bits))
    }
}

/// Outcome of [`Smp::start_smp`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartReport {
    /// APs a SIPI was sent to.
    pub expected: u32,
    /// Value of the started-CPU counter at the end.
    pub started: u32,
    /// APIC ids that never checked in.
    pub failed: heapless::Vec<u32, MAX_REPORTED_FAILURES>,
}

/// Everything the boot CPU learned during bring-up.
pub struct Smp<'p, P: Platform + ?Sized> {
    platform: &'p P,
    config: SmpConfig,
    model: RoutingModel,
    vectors: Mutex<VectorMap>,
    ioapics: IoApicSet,
    lapic: LocalApic,
    calibration: Calibration,
    pm_timer: Option<PmTimer>,
    topology: Once<Topology>,
}

impl<'p, P: Platform + ?Sized> Smp<'p, P> {
    /// Parse firmware tables, bring up the boot CPU's local APIC and every
    /// IOAPIC, and calibrate the clocks. All IOAPIC pins are left masked.
    pub fn bootstrap(platform: &'p P, config: SmpConfig) -> Result<Self> {
        let p = platform;
        let mut model = RoutingModel::new();
        if !firmware::locate_and_parse(p, &config, &mut model) {
            log::warn!(target: "smp", "continuing uniprocessor");
        }

        if model.have_8259_pic() {
            p.port_write(PIC1_DATA, Width::W8, 0xFF);
            p.port_write(PIC2_DATA, Width::W8, 0xFF);
            log::debug!(target: "smp", "legacy PICs masked");
        }

        let lapic = LocalApic::init(p, model.lapic_phys)?;
        lapic.online(p, true, INTR_APIC_SPURIOUS);
        lapic.open_all_irqs(p);
        if model.apic_id_list.is_empty() {
            model.apic_id_list.push(lapic.id(p));
        }

        let mut vectors = reserved_vector_map();
        let ioapics = IoApicSet::init(p, &model, &mut vectors)?;

        let pm_timer = model.fadt.as_ref().and_then(|fadt| PmTimer::from_fadt(p, fadt));
        if pm_timer.is_some() {
            p.install_clock(ClockSource::PmTimer);
        }
        let calibration = lapic.calibrate(p, pm_timer.as_ref());
        if cpuid::has_invariant_tsc(p) {
            if let Some(scale) = calibration.clock {
                log::info!(target: "smp", "invariant TSC is the time source");
                p.install_clock(ClockSource::Tsc(scale));
            }
        }

        log::info!(
            target: "smp",
            "{} CPUs listed, {} IOAPICs, {} IRQ mappings",
            model.apic_id_list.len(),
            ioapics.chips().len(),
            model.bus_irq_list.len()
        );
        Ok(Self {
            platform,
            config,
            model,
            vectors: Mutex::new(vectors),
            ioapics,
            lapic,
            calibration,
            pm_timer,
            topology: Once::new(),
        })
    }

    pub fn model(&self) -> &RoutingModel {
        &self.model
    }

    pub fn ioapics(&self) -> &IoApicSet {
        &self.ioapics
    }

    pub fn lapic(&self) -> &LocalApic {
        &self.lapic
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topology.get()
    }

    /// Busy-wait on the PM timer. `None` when the platform has none.
    pub fn pm_nsleep(&self, ns: u64) -> Option<u64> {
        self.pm_timer.as_ref().map(|pm| pm.nsleep(self.platform, ns))
    }

    /// Nanoseconds from the TSC, once calibration produced a scale.
    pub fn time_ns(&self) -> Option<u64> {
        let scale = self.calibration.clock?;
        Some(scale.cycles_to_ns(self.platform.rdtsc()))
    }

    fn start_periodic_timer(&self) {
        let hz = self.config.timer_hz.max(1) as u64;
        let ticks = self.calibration.apic_timer_freq / hz;
        self.lapic.configure_timer_auto(self.platform, INTR_APIC_TIMER, ticks, TimerMode::Periodic, false);
    }

    /// Per-AP setup, run on the AP once the trampoline hands over.
    pub fn ap_init(&self) {
        let p = self.platform;
        self.lapic.init_ap(p);
        self.lapic.online(p, true, INTR_APIC_SPURIOUS);
        self.lapic.open_all_irqs(p);
        self.start_periodic_timer();
    }

    /// Wake every AP. Interrupts must already be enabled.
    pub fn start_smp(&self) -> StartReport {
        let p = self.platform;
        let mut report = StartReport::default();
        self.start_periodic_timer();

        let ids = &self.model.apic_id_list;
        let topo = *self.topology.call_once(|| {
            if self.model.have_acpi() {
                Topology::flat(ids.len())
            } else {
                Topology::detect(p, ids.len())
            }
        });
        log::info!(
            target: "smp",
            "{} packages, {} cores x {} threads each",
            topo.packages,
            topo.core_count,
            topo.thread_count
        );

        p.init_tss(topo.cpu_count());
        if topo.cpu_count() <= 1 {
            log::info!(target: "smp", "uniprocessor, nothing to start");
            return report;
        }

        self.lapic.broadcast_init(p);
        p.sleep_ms(self.config.init_settle_ms);

        let page = self.config.trampoline_page();
        let stagger = SIPI_STAGGER_BUDGET_NS / topo.cpu_count().max(1) as u64;
        // MADT order need not put the boot CPU first
        let bsp = self.lapic.id(p);
        let mut expect = 0u32;
        for &base in ids.iter() {
            log::debug!(target: "smp", "package base APIC ID {}", base);
            for offset in topo.offsets() {
                let target = base + offset;
                if target == bsp {
                    continue;
                }
                log::trace!(target: "smp", "SIPI to APIC ID {}", target);
                self.lapic.send_sipi(p, target, page);
                p.nsleep(stagger);
                report.expected += 1;
                expect += 1;
                if !self.wait_started(expect) {
                    log::error!(target: "smp", "APIC ID {} did not start", target);
                    if report.failed.push(target).is_err() {
                        log::warn!(target: "smp", "too many failed CPUs to list");
                    }
                    // an AP that shows up late must not satisfy the next wait
                    expect = p.cpus_started();
                }
            }
        }

        p.smp_online();
        if ids.len() > 1 {
            self.ioapics.route_to_cpu(p, &self.model, 0, Some(1));
        }
        report.started = p.cpus_started();
        log::info!(
            target: "smp",
            "{} of {} APs started",
            report.started,
            report.expected
        );
        report
    }

    fn wait_started(&self, expect: u32) -> bool {
        let p = self.platform;
        let mut waited = 0;
        while p.cpus_started() < expect {
            if waited >= self.config.ap_start_timeout_ns {
                return false;
            }
            waited += p.nsleep(self.config.ap_poll_interval_ns);
        }
        true
    }

    /// Contiguous MSI vectors for a device; see [`msi::msi_irq_alloc`].
    pub fn msi_irq_alloc(
        &self,
        msgs: &mut [MsiMessage],
        cpu_hint: usize,
        distribute: bool,
        handler: IntrHandler,
    ) -> Option<u8> {
        msi::msi_irq_alloc(
            self.platform,
            &self.vectors,
            &self.ioapics,
            &self.model.apic_id_list,
            msgs,
            cpu_hint,
            distribute,
            handler,
        )
    }

    fn vector_for_irq(&self, irq: u8) -> Option<u8> {
        let msi_irq = self.ioapics.msi_base_irq();
        if self.ioapics.has_msi_window() && irq >= msi_irq {
            return self
                .ioapics
                .msi_base_intr()
                .checked_add(irq - msi_irq)
                .filter(|&intr| intr < INTR_APIC_TIMER);
        }
        self.ioapics.irq_vector(&self.model, irq)
    }
}

impl<P: Platform + ?Sized + 'static> Smp<'static, P> {
    /// Program every redirection entry and take over IRQ routing. Returns
    /// `false` when there is no IOAPIC to route through.
    pub fn enable(&'static self) -> bool {
        if self.ioapics.is_empty() {
            log::warn!(target: "smp", "no IOAPIC, IRQ routing stays with the PIC");
            return false;
        }
        self.ioapics.map_all(self.platform, &self.model);
        self.platform.register_irq_controller(self);
        true
    }
}

impl<P: Platform + ?Sized> IrqController for Smp<'_, P> {
    fn set_mask(&self, irq: u8, unmask: bool) {
        self.ioapics.set_mask(self.platform, &self.model, irq, unmask);
    }

    fn hook(&self, irq: u8, handler: IntrHandler) {
        match self.vector_for_irq(irq) {
            Some(intr) => self.platform.hook_intr(intr, handler),
            None => log::warn!(target: "smp", "hook of unrouted IRQ {}", irq),
        }
    }

    fn unhook(&self, irq: u8, handler: IntrHandler) {
        if let Some(intr) = self.vector_for_irq(irq) {
            self.platform.unhook_intr(intr, handler);
        }
    }

    fn set_cpu(&self, irq: u8, cpu: Option<usize>) -> bool {
        self.ioapics.route_to_cpu(self.platform, &self.model, irq, cpu)
    }

    fn dispatch(&self, intr: u8, ctx: *mut IsrContext) -> *mut IsrContext {
        self.ioapics.dispatch(self.platform, &self.lapic, &self.model, intr, ctx)
    }
}
