// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC error word written into the message buffer.
//!
//! Bit 0 tells which phase failed (set = receive phase); bits 1..5 carry
//! the error code.

/// IPC error codes (even values; bit 0 is the phase bit).
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorCode {
    /// The deadline elapsed before the rendezvous.
    Timeout = 2,
    /// The destination does not exist or has no binding.
    NotExistent = 4,
    /// The operation was canceled from outside.
    Canceled = 6,
    /// The receiver offered no matching buffer, or the message was malformed.
    Overflow = 8,
    /// A timeout hit during the transfer phase.
    XferTimeout = 10,
    /// The partner vanished in the middle of a transfer.
    Aborted = 12,
    /// The mapping subsystem refused a mapping.
    MapFailed = 14,
}

impl ErrorCode {
    const MASK: u64 = 0x1e;

    /// Decodes the code part of a raw error word.
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw & Self::MASK {
            2 => Some(Self::Timeout),
            4 => Some(Self::NotExistent),
            6 => Some(Self::Canceled),
            8 => Some(Self::Overflow),
            10 => Some(Self::XferTimeout),
            12 => Some(Self::Aborted),
            14 => Some(Self::MapFailed),
            _ => None,
        }
    }
}

/// IPC phase an error belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// The send phase failed.
    Send,
    /// The receive phase failed.
    Receive,
}

/// Error word of a message buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(transparent)]
pub struct IpcErrorWord(u64);

impl IpcErrorWord {
    const RECEIVE: u64 = 1;

    /// No error.
    pub const NONE: Self = Self(0);

    /// Builds an error word.
    pub const fn new(code: ErrorCode, phase: Phase) -> Self {
        let phase_bit = match phase {
            Phase::Send => 0,
            Phase::Receive => Self::RECEIVE,
        };
        Self(code as u64 | phase_bit)
    }

    /// Reinterprets a raw word.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The error code, if any.
    pub const fn code(self) -> Option<ErrorCode> {
        ErrorCode::from_raw(self.0)
    }

    /// Phase discriminator.
    pub const fn phase(self) -> Phase {
        if self.0 & Self::RECEIVE != 0 {
            Phase::Receive
        } else {
            Phase::Send
        }
    }

    /// True when no error is recorded.
    pub const fn is_ok(self) -> bool {
        self.code().is_none()
    }

    /// Same code, receive phase (what the receiver sees for a transfer error).
    pub const fn for_receiver(self) -> Self {
        Self(self.0 | Self::RECEIVE)
    }
}
