// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project
use core::fmt;

/// Failures inside the SMP bring-up path.
///
/// None of these are fatal on their own; callers decide whether to fall back
/// (uniprocessor, no MSI, no PM timer) or give up on a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The physical mapper refused a window.
    MapFailed { phys: u64, len: usize },
    /// No contiguous run of free interrupt vectors.
    VectorsExhausted { count: usize },
    /// A firmware table failed its byte-sum check.
    BadChecksum { sig: [u8; 4] },
    /// Neither an RSDP nor an MP floating pointer was found.
    NoFirmwareTables,
    /// The CPU reports no local APIC.
    NoLocalApic,
    /// A structure ended before its fixed-size part.
    Truncated { what: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MapFailed { phys, len } => {
                write!(f, "cannot map {:#x} bytes at phys {:#x}", len, phys)
            }
            Error::VectorsExhausted { count } => {
                write!(f, "no run of {} free interrupt vectors", count)
            }
            Error::BadChecksum { sig } => {
                write!(f, "bad checksum on table {}", SigDisplay(sig))
            }
            Error::NoFirmwareTables => write!(f, "no ACPI or MP tables found"),
            Error::NoLocalApic => write!(f, "no local APIC present"),
            Error::Truncated { what } => write!(f, "truncated {}", what),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Prints a 4-byte table signature, escaping anything non-printable.
pub struct SigDisplay<'a>(pub &'a [u8; 4]);

impl fmt::Display for SigDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}
