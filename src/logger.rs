// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
//! `log` backend on COM1.
//!
//! Records print as `[LEVEL target] message`, colored per level. Until COM1
//! is initialized they are dropped.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::arch::x86_64::serial::{self, Serial};

pub struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

const fn color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[1;31m",
        Level::Warn => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Debug => "\x1b[36m",
        Level::Trace => "\x1b[90m",
    }
}

const RESET: &str = "\x1b[0m";

/// Render one record; split out so it can be checked without a UART.
pub fn format_record(out: &mut impl Write, record: &Record<'_>) -> core::fmt::Result {
    writeln!(
        out,
        "{}[{:<5} {}]{} {}",
        color(record.level()),
        record.level(),
        record.target(),
        RESET,
        record.args()
    )
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) || !serial::is_ready() {
            return;
        }
        let _ = format_record(&mut Serial, record);
    }

    fn flush(&self) {}
}

/// Install the logger. Fails if another logger got there first.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
