// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Serial console behind the default log sink on the QEMU `virt` machine.

use core::fmt::{self, Arguments, Write};
use spin::Mutex;

use crate::diag::log::Level;

/// MMIO window of the first 16550 on `virt`.
const CONSOLE_MMIO: usize = 0x1000_0000;
const REG_THR: usize = 0x0;
const REG_LSR: usize = 0x5;
const LSR_THR_EMPTY: u8 = 1 << 5;

/// Serializes whole records so lines from different CPUs never interleave.
static CONSOLE: Mutex<Console> = Mutex::new(Console { mmio: CONSOLE_MMIO });

struct Console {
    mmio: usize,
}

impl Console {
    fn transmit(&mut self, byte: u8) {
        let lsr = (self.mmio + REG_LSR) as *const u8;
        let thr = (self.mmio + REG_THR) as *mut u8;
        // SAFETY: `mmio` is the console's register window; LSR and THR are byte registers.
        unsafe {
            while core::ptr::read_volatile(lsr) & LSR_THR_EMPTY == 0 {}
            core::ptr::write_volatile(thr, byte);
        }
    }
}

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|byte| {
            if byte == b'\n' {
                self.transmit(b'\r');
            }
            self.transmit(byte);
        });
        Ok(())
    }
}

/// Writes one `[LEVEL target] message` line.
pub(crate) fn write_record(level: Level, target: &'static str, args: Arguments<'_>) {
    let mut console = CONSOLE.lock();
    let _ = write!(console, "[{} {}] ", level.tag(), target);
    let _ = console.write_fmt(args);
    let _ = console.write_char('\n');
}
