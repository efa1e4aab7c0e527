// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Object references used by the capability invocation entry point, and
//! the administrative protocol of IPC gates.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// IPC phases requested by an invocation.
    pub struct IpcOps: u64 {
        /// Send a message to the referenced object.
        const SEND = 1 << 0;
        /// Receive after (or instead of) sending.
        const RECV = 1 << 1;
        /// Receive from any sender instead of the referenced one.
        const OPEN_WAIT = 1 << 2;
        /// Address the reply capability instead of a capability slot.
        const REPLY = 1 << 3;
    }
}

impl IpcOps {
    /// Send, then receive from the same partner.
    pub const CALL: Self = Self::from_bits_truncate(Self::SEND.bits() | Self::RECV.bits());
    /// Open wait.
    pub const WAIT: Self = Self::from_bits_truncate(Self::RECV.bits() | Self::OPEN_WAIT.bits());
    /// Reply to the caller, then wait for the next request.
    pub const REPLY_AND_WAIT: Self = Self::all();
}

/// Object reference register: capability index plus requested operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct ObjRef(u64);

impl ObjRef {
    const CAP_SHIFT: u32 = 12;
    const OPS_MASK: u64 = 0xf;

    /// Index that never names a capability.
    pub const INVALID_CAP: u64 = u64::MAX >> Self::CAP_SHIFT;

    /// Builds a reference.
    pub const fn new(cap: u64, ops: IpcOps) -> Self {
        Self((cap << Self::CAP_SHIFT) | (ops.bits() & Self::OPS_MASK))
    }

    /// Reference to the reply capability.
    pub const fn reply(ops: IpcOps) -> Self {
        Self::new(Self::INVALID_CAP, IpcOps::from_bits_truncate(ops.bits() | IpcOps::REPLY.bits()))
    }

    /// Reinterprets a raw register.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw register value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Capability index.
    pub const fn cap(self) -> u64 {
        self.0 >> Self::CAP_SHIFT
    }

    /// Requested operation.
    pub const fn ops(self) -> IpcOps {
        IpcOps::from_bits_truncate(self.0 & Self::OPS_MASK)
    }

    /// True when the index is the invalid capability.
    pub const fn is_invalid_cap(self) -> bool {
        self.cap() == Self::INVALID_CAP
    }
}

/// Opcodes of the gate administrative protocol (word 0 of a
/// [`crate::proto::KOBJECT`] message).
pub mod gate_op {
    /// Install the first destination: word 1 = label, item 0 = thread capability.
    pub const BIND: u64 = 0x10;
    /// Read back the label into word 0.
    pub const GET_INFO: u64 = 0x11;
    /// Replace the destination of a bound gate; same layout as `BIND`.
    pub const REBIND: u64 = 0x12;
}

/// Errno values carried (negated) in the label of kernel-object replies.
#[repr(i64)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Errno {
    /// Missing rights.
    Perm = 1,
    /// Object already in the requested state.
    Busy = 16,
    /// Malformed request.
    Inval = 22,
    /// Unknown opcode.
    NoSys = 38,
    /// Wrong protocol for this object.
    BadProto = 71,
}

impl Errno {
    /// Value placed in the reply label.
    pub const fn reply_label(self) -> i64 {
        -(self as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_ref_layout() {
        let r = ObjRef::new(7, IpcOps::CALL);
        assert_eq!(r.cap(), 7);
        assert_eq!(r.ops(), IpcOps::SEND | IpcOps::RECV);
        assert_eq!(r.raw(), (7 << 12) | 3);
    }

    #[test]
    fn reply_reference() {
        let r = ObjRef::reply(IpcOps::SEND | IpcOps::RECV | IpcOps::OPEN_WAIT);
        assert!(r.is_invalid_cap());
        assert_eq!(r.ops(), IpcOps::REPLY_AND_WAIT);
    }

    #[test]
    fn errno_labels_are_negative() {
        assert_eq!(Errno::Busy.reply_label(), -16);
        assert_eq!(Errno::Perm.reply_label(), -1);
    }
}
