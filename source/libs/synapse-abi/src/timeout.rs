// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! 16-bit IPC timeout encoding.
//!
//! `0x0000` is `Never`. Relative values carry a 10-bit mantissa `m` and a
//! 5-bit exponent `e` and mean `m << e` microseconds from now; a zero
//! mantissa means `Zero` (do not block). Bit 15 selects an absolute timeout
//! stored in the message buffer, which the IPC path does not accept.

/// A single send or receive timeout.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Timeout(u16);

/// Result of resolving a timeout against the current time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Deadline {
    /// Block without bound.
    Never,
    /// Do not block at all.
    Expired,
    /// Absolute deadline in microseconds of the monotonic clock.
    At(u64),
}

impl Timeout {
    const MANTISSA_MASK: u16 = 0x3ff;
    const EXPONENT_SHIFT: u16 = 10;
    const EXPONENT_MASK: u16 = 0x1f;
    const ABSOLUTE: u16 = 0x8000;
    const MAX_EXPONENT: u32 = 31;

    /// Unbounded wait.
    pub const NEVER: Self = Self(0);
    /// Non-blocking.
    pub const ZERO: Self = Self(1 << Self::EXPONENT_SHIFT);

    /// Reinterprets a raw 16-bit encoding.
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Returns the raw encoding.
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Builds a relative timeout of `mantissa << exponent` microseconds.
    pub const fn relative(mantissa: u16, exponent: u8) -> Self {
        let m = mantissa & Self::MANTISSA_MASK;
        let e = (exponent as u16) & Self::EXPONENT_MASK;
        if m == 0 {
            return Self::ZERO;
        }
        Self(m | (e << Self::EXPONENT_SHIFT))
    }

    /// Encodes `us` microseconds, rounding up to the next representable
    /// value and saturating at the largest one.
    pub fn from_micros(us: u64) -> Self {
        if us == 0 {
            return Self::ZERO;
        }
        let max_m = u64::from(Self::MANTISSA_MASK);
        for e in 0..=Self::MAX_EXPONENT {
            let unit = 1u64 << e;
            let m = us.div_ceil(unit);
            if m <= max_m {
                return Self::relative(m as u16, e as u8);
            }
        }
        Self::relative(Self::MANTISSA_MASK, Self::MAX_EXPONENT as u8)
    }

    /// True for the unbounded timeout.
    pub const fn is_never(self) -> bool {
        self.0 == 0
    }

    /// True for timeouts that must not block.
    pub const fn is_zero(self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 & Self::ABSOLUTE != 0 || self.0 & Self::MANTISSA_MASK == 0
    }

    /// True for bounded, blocking timeouts.
    pub const fn is_finite(self) -> bool {
        !self.is_never() && !self.is_zero()
    }

    /// Relative length in microseconds; `None` for `Never`.
    pub const fn micros(self) -> Option<u64> {
        if self.is_never() {
            return None;
        }
        if self.is_zero() {
            return Some(0);
        }
        let m = (self.0 & Self::MANTISSA_MASK) as u64;
        let e = (self.0 >> Self::EXPONENT_SHIFT) & Self::EXPONENT_MASK;
        Some(m << e)
    }

    /// Resolves the timeout against `now_us`.
    pub const fn deadline(self, now_us: u64) -> Deadline {
        match self.micros() {
            None => Deadline::Never,
            Some(0) => Deadline::Expired,
            Some(us) => Deadline::At(now_us.saturating_add(us)),
        }
    }
}

/// Send and receive timeouts of one IPC, packed as `rcv << 16 | snd`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TimeoutPair {
    /// Bound on the send phase.
    pub snd: Timeout,
    /// Bound on the receive phase.
    pub rcv: Timeout,
}

impl TimeoutPair {
    /// Both phases unbounded.
    pub const NEVER: Self = Self { snd: Timeout::NEVER, rcv: Timeout::NEVER };

    /// Builds a pair.
    pub const fn new(snd: Timeout, rcv: Timeout) -> Self {
        Self { snd, rcv }
    }

    /// Unpacks a register value.
    pub const fn from_raw(raw: u32) -> Self {
        Self { snd: Timeout::from_raw(raw as u16), rcv: Timeout::from_raw((raw >> 16) as u16) }
    }

    /// Packs into a register value.
    pub const fn raw(self) -> u32 {
        ((self.rcv.raw() as u32) << 16) | self.snd.raw() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_values() {
        assert!(Timeout::NEVER.is_never());
        assert!(!Timeout::NEVER.is_zero());
        assert!(Timeout::ZERO.is_zero());
        assert_eq!(Timeout::ZERO.raw(), 0x400);
        assert_eq!(Timeout::relative(0, 9), Timeout::ZERO);
        assert!(Timeout::from_raw(0x8005).is_zero());
    }

    #[test]
    fn mantissa_exponent_value() {
        let t = Timeout::relative(1000, 3);
        assert_eq!(t.micros(), Some(8000));
        assert_eq!(t.deadline(10), Deadline::At(8010));
        assert_eq!(Timeout::ZERO.deadline(10), Deadline::Expired);
        assert_eq!(Timeout::NEVER.deadline(10), Deadline::Never);
    }

    #[test]
    fn from_micros_rounds_up() {
        assert_eq!(Timeout::from_micros(1023).micros(), Some(1023));
        let t = Timeout::from_micros(1025);
        assert!(t.micros().unwrap_or(0) >= 1025);
        assert_eq!(t.micros(), Some(1026));
        let huge = Timeout::from_micros(u64::MAX);
        assert_eq!(huge.micros(), Some(1023u64 << 31));
    }

    #[test]
    fn pair_packing() {
        let pair = TimeoutPair::new(Timeout::ZERO, Timeout::relative(5, 1));
        assert_eq!(TimeoutPair::from_raw(pair.raw()), pair);
        assert_eq!(pair.raw() & 0xffff, 0x400);
    }
}
