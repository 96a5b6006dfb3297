// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::fmt::Write;
use spin::Mutex;
use uart_16550::SerialPort;

pub const COM1_PORT: u16 = 0x3F8;

static COM1: Mutex<Option<SerialPort>> = Mutex::new(None);

/// # Safety
/// COM1 must exist at the standard port; nothing else may drive it.
pub unsafe fn init_com1() {
    let mut port = unsafe { SerialPort::new(COM1_PORT) };
    port.init();
    *COM1.lock() = Some(port);
}

pub fn is_ready() -> bool {
    COM1.lock().is_some()
}

fn write_bytes(s: &str) {
    if let Some(ref mut port) = *COM1.lock() {
        for &b in s.as_bytes() {
            if b == b'\n' {
                let _ = port.send(b'\r');
            }
            let _ = port.send(b);
        }
    }
}

pub struct Serial;
impl Write for Serial {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_bytes(s);
        Ok(())
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!(&mut $crate::arch::x86_64::serial::Serial, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        $crate::kprint!(concat!($fmt, "\n") $(, $($arg)+)?);
    }};
}
