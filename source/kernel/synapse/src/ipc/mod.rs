// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous IPC engine (rendezvous, transfer, gates, fault IPC)
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: unit tests per submodule + proptest (tests_prop.rs) + integration scenarios (tests/)
//! PUBLIC API: IpcResult, IpcStatus, gate::Gate, fault::{FaultOutcome, FaultReport, ExceptionFrame},
//!             trace::TraceEvent, utcb::Utcb, timeout::TimeoutQueue, wait_queue::WaitQueue
//! DEPENDS_ON: synapse_abi (wire types), sync::{cpu_lock, switch_lock, rcu}, mm::Mapper, smp::Drq
//! INVARIANTS: IPC failures are reported through error words, never as Rust errors;
//!             a queued sender is owned by exactly one wait queue; timeout and claim are exclusive
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

pub mod fault;
pub mod gate;
pub(crate) mod remote;
pub(crate) mod rendezvous;
pub mod timeout;
pub mod trace;
pub(crate) mod transfer;
pub mod utcb;
pub mod wait_queue;

#[cfg(test)]
mod tests_prop;

use synapse_abi::{ErrorCode, FpageRights, IpcErrorWord, MsgTag, TimeoutPair};

use crate::types::{ActorId, GateId};

/// What an IPC handed back to its initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcResult {
    /// Received tag (receive phase) or the sent tag (send only); `ERROR` flagged on failure.
    pub tag: MsgTag,
    /// Label the sender was known by (gate label or'ed with the invoker's rights).
    pub label: u64,
    /// Error word of the failing phase, `NONE` on success.
    pub error: IpcErrorWord,
}

impl IpcResult {
    pub const fn is_ok(&self) -> bool {
        self.error.is_ok()
    }

    pub const fn code(&self) -> Option<ErrorCode> {
        self.error.code()
    }

    pub(crate) const fn failed(error: IpcErrorWord) -> Self {
        Self { tag: MsgTag::error_tag(), label: 0, error }
    }
}

/// Immediate outcome of an IPC system call.
#[must_use = "a blocked IPC completes later through Kernel::take_result"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcStatus {
    Completed(IpcResult),
    /// The caller is suspended; its result is published when it resumes.
    Blocked,
}

impl IpcStatus {
    pub fn completed(self) -> Option<IpcResult> {
        match self {
            IpcStatus::Completed(result) => Some(result),
            IpcStatus::Blocked => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, IpcStatus::Blocked)
    }
}

/// Whom a receive phase accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecvFrom {
    /// Open wait.
    Any,
    /// Closed wait on one actor.
    Actor(ActorId),
    /// Closed wait on whoever the send phase resolves to (call semantics).
    Partner,
}

/// Progress of the send phase as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Pending,
    Delivered,
    Failed(ErrorCode),
}

/// Why the kernel runs this IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IpcPurpose {
    User,
    PageFault,
    Exception,
}

/// Gate binding a send was resolved through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GateRef {
    pub gate: GateId,
    pub generation: u64,
}

/// In-flight IPC operation of one actor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingIpc {
    pub tag: MsgTag,
    pub send_to: Option<ActorId>,
    pub recv: Option<RecvFrom>,
    pub timeouts: TimeoutPair,
    /// Rights of the capability the IPC was invoked through.
    pub rights: FpageRights,
    /// Label delivered to the receiver.
    pub label: u64,
    pub via_gate: Option<GateRef>,
    pub purpose: IpcPurpose,
    pub outcome: SendOutcome,
}

impl PendingIpc {
    pub fn new(tag: MsgTag, timeouts: TimeoutPair) -> Self {
        Self {
            tag,
            send_to: None,
            recv: None,
            timeouts,
            rights: FpageRights::RWX,
            label: 0,
            via_gate: None,
            purpose: IpcPurpose::User,
            outcome: SendOutcome::Pending,
        }
    }

    pub fn sending_to(mut self, dest: Option<ActorId>) -> Self {
        self.send_to = dest;
        self
    }

    pub fn receiving(mut self, from: Option<RecvFrom>) -> Self {
        self.recv = from;
        self
    }

    pub fn with_rights(mut self, rights: FpageRights) -> Self {
        self.rights = rights;
        self
    }

    pub fn with_label(mut self, label: u64) -> Self {
        self.label = label;
        self
    }

    pub fn for_purpose(mut self, purpose: IpcPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn through_gate(mut self, via: GateRef) -> Self {
        self.via_gate = Some(via);
        self
    }

    /// Receive phase with `Partner` resolved against the send destination.
    pub fn receive(&self) -> Option<RecvFrom> {
        match self.recv {
            Some(RecvFrom::Partner) => self.send_to.map(RecvFrom::Actor),
            other => other,
        }
    }

    /// True when the receiver of this send is also the one we wait for.
    pub fn is_call_to(&self, dest: ActorId) -> bool {
        self.send_to == Some(dest) && self.receive() == Some(RecvFrom::Actor(dest))
    }

    /// Whether a receive phase accepts `sender`.
    pub fn accepts(&self, sender: ActorId) -> bool {
        match self.receive() {
            Some(RecvFrom::Any) => true,
            Some(RecvFrom::Actor(partner)) => partner == sender,
            Some(RecvFrom::Partner) | None => false,
        }
    }
}

/// Message delivered into an actor's UTCB by a completed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Incoming {
    pub tag: MsgTag,
    pub label: u64,
    pub from: ActorId,
}
