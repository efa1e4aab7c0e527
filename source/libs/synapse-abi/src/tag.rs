// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Message tag: the first register of every IPC.
//!
//! Layout (LSB first):
//! - bits 0..6: untyped word count
//! - bits 6..12: typed item count
//! - bits 12..16: [`MsgTagFlags`]
//! - bits 16..64: signed protocol / label

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// Flags carried in bits 12..16 of a message tag.
    pub struct MsgTagFlags: u64 {
        /// Hand the sender's FPU state to the receiver.
        const TRANSFER_FPU = 1 << 12;
        /// Do not switch directly to the partner; leave the decision to the scheduler.
        const SCHEDULE = 1 << 13;
        /// Propagate the reply capability instead of consuming it.
        const PROPAGATE = 1 << 14;
        /// Set by the kernel when the IPC failed; details are in the error word.
        const ERROR = 1 << 15;
    }
}

/// Well-known protocol identifiers stored in the label field.
pub mod proto {
    /// Page fault reflected to a pager.
    pub const PAGE_FAULT: i64 = -2;
    /// Preemption notification.
    pub const PREEMPTION: i64 = -3;
    /// System exception.
    pub const SYS_EXCEPTION: i64 = -4;
    /// Architectural exception reflected to an exception handler.
    pub const EXCEPTION: i64 = -5;
    /// Administrative protocol of kernel objects (gate bind / get-info).
    pub const KOBJECT: i64 = -10;
    /// Exception-handler reply: let the faulting system call proceed.
    pub const ALLOW_SYSCALL: i64 = 1;
}

/// A message tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(transparent)]
pub struct MsgTag(u64);

impl MsgTag {
    const WORDS_MASK: u64 = 0x3f;
    const ITEMS_SHIFT: u32 = 6;
    const ITEMS_MASK: u64 = 0x3f;
    const FLAGS_MASK: u64 = 0xf000;
    const LABEL_SHIFT: u32 = 16;

    /// Builds a tag from its fields. Counts are truncated to six bits.
    pub const fn new(words: u8, items: u8, flags: MsgTagFlags, label: i64) -> Self {
        let raw = (words as u64 & Self::WORDS_MASK)
            | ((items as u64 & Self::ITEMS_MASK) << Self::ITEMS_SHIFT)
            | (flags.bits() & Self::FLAGS_MASK)
            | ((label as u64) << Self::LABEL_SHIFT);
        Self(raw)
    }

    /// Reinterprets a raw register value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw register value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Number of untyped words.
    pub const fn words(self) -> usize {
        (self.0 & Self::WORDS_MASK) as usize
    }

    /// Number of typed items following the words.
    pub const fn items(self) -> usize {
        ((self.0 >> Self::ITEMS_SHIFT) & Self::ITEMS_MASK) as usize
    }

    /// Flag bits.
    pub const fn flags(self) -> MsgTagFlags {
        MsgTagFlags::from_bits_truncate(self.0 & Self::FLAGS_MASK)
    }

    /// Signed label / protocol id.
    pub const fn label(self) -> i64 {
        (self.0 as i64) >> Self::LABEL_SHIFT
    }

    /// Alias of [`MsgTag::label`] for protocol dispatch.
    pub const fn proto(self) -> i64 {
        self.label()
    }

    /// True when the kernel flagged the IPC as failed.
    pub const fn has_error(self) -> bool {
        self.0 & MsgTagFlags::ERROR.bits() != 0
    }

    /// True when FPU state should follow the message.
    pub const fn transfer_fpu(self) -> bool {
        self.0 & MsgTagFlags::TRANSFER_FPU.bits() != 0
    }

    /// True unless the sender asked the scheduler to decide who runs next.
    pub const fn do_switch(self) -> bool {
        self.0 & MsgTagFlags::SCHEDULE.bits() == 0
    }

    /// Returns a copy with the error flag set or cleared.
    pub const fn with_error(self, error: bool) -> Self {
        if error {
            Self(self.0 | MsgTagFlags::ERROR.bits())
        } else {
            Self(self.0 & !MsgTagFlags::ERROR.bits())
        }
    }

    /// Tag handed back when a phase fails before any payload was delivered.
    pub const fn error_tag() -> Self {
        Self::new(0, 0, MsgTagFlags::ERROR, 0)
    }

    /// Reply tag used by kernel objects: `result` is `0` or a negative errno.
    pub const fn result(result: i64, words: u8) -> Self {
        Self::new(words, 0, MsgTagFlags::empty(), result)
    }
}
