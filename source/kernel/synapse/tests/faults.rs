//! CONTEXT: Page faults and exceptions reflected to handlers reached through gates
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 4 integration tests
//!
//! TEST_SCOPE:
//!   - Fault IPC addressed to a gate-bound pager
//!   - Fault parked on an unbound gate until the pager is bound
//!   - Nested fault preserving the faulting actor's message registers
//!   - Fault hitting an actor that waits for a reply
//!
//! TEST_SCENARIOS:
//!   - page_fault_through_gate_carries_label(): pager sees gate label | rights and resolves with a mapping
//!   - fault_waits_for_pager_binding(): unbound gate parks the fault, BIND moves it to the pager's queue
//!   - exception_reply_through_gate_rewrites_frame(): plain reply -> Resolved, frame rewritten, registers restored
//!   - fault_during_call_keeps_the_reply(): answer sent during the fault is queued and received afterwards
//!
//! DEPENDENCIES:
//!   - synapse::Kernel with MapDb + ManualClock
//!   - synapse_abi: proto, gate_op, wire types
//!
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
use synapse::{
    ActorId, ActorSpec, Capability, ExceptionFrame, FaultOutcome, GateId, IpcStatus, KObject, Kernel, KernelConfig,
    ManualClock, MapDb, Rights, SpaceId, SyscallFrame,
};
use synapse_abi::{
    gate_op, proto, Fpage, FpageRights, IpcOps, MsgItem, MsgTag, MsgTagFlags, ObjRef, TimeoutPair,
};

const TASK: SpaceId = SpaceId::from_raw(1);
const PAGER: SpaceId = SpaceId::from_raw(2);
const SERVER: SpaceId = SpaceId::from_raw(3);

type TestKernel = Kernel<MapDb, ManualClock>;

struct Setup {
    k: TestKernel,
    pager: ActorId,
    task: ActorId,
    gate: GateId,
}

/// Task whose pager and exception handler slots name a gate.
fn setup() -> Setup {
    let k = Kernel::new(KernelConfig::default(), MapDb::new(), ManualClock::new());
    let pager = k.create_actor(ActorSpec::new(PAGER)).unwrap();
    let gate = k.create_gate().unwrap();
    let slot = k.mapper().grant(TASK, Capability { object: KObject::Gate(gate), rights: Rights::R }).unwrap();
    let task = k.create_actor(ActorSpec::new(TASK).with_pager(slot).with_exc_handler(slot)).unwrap();
    Setup { k, pager, task, gate }
}

/// The pager binds the gate to itself.
fn bind_to_pager(s: &Setup, label: u64) {
    let k = &s.k;
    let gate_slot = k.mapper().grant(PAGER, Capability { object: KObject::Gate(s.gate), rights: Rights::all() }).unwrap();
    let self_slot =
        k.mapper().grant(PAGER, Capability { object: KObject::Thread(s.pager), rights: Rights::all() }).unwrap();
    k.with_utcb(s.pager, |u| {
        u.values[0] = gate_op::BIND;
        u.values[1] = label;
        u.set_item(2, 0, MsgItem::map(0), Fpage::obj(self_slot, 0, FpageRights::RWX));
    })
    .unwrap();
    let tag = MsgTag::new(2, 1, MsgTagFlags::empty(), proto::KOBJECT);
    let frame = SyscallFrame::new(tag, ObjRef::new(gate_slot, IpcOps::CALL), TimeoutPair::NEVER);
    assert_eq!(k.invoke(s.pager, frame).unwrap().completed().unwrap().tag.label(), 0);
}

fn wait(k: &TestKernel, actor: ActorId) {
    let frame = SyscallFrame::new(MsgTag::default(), ObjRef::new(0, IpcOps::WAIT), TimeoutPair::NEVER);
    assert_eq!(k.invoke(actor, frame), Ok(IpcStatus::Blocked));
}

fn reply(k: &TestKernel, actor: ActorId, tag: MsgTag) {
    let frame = SyscallFrame::new(tag, ObjRef::reply(IpcOps::SEND), TimeoutPair::NEVER);
    assert!(k.invoke(actor, frame).unwrap().completed().unwrap().is_ok());
}

#[test]
fn page_fault_through_gate_carries_label() {
    let s = setup();
    bind_to_pager(&s, 0x40);
    wait(&s.k, s.pager);

    assert_eq!(s.k.page_fault(s.task, 0x7000, 0x1, 0x200), Ok(None));
    let request = s.k.take_result(s.pager).unwrap();
    assert_eq!(request.tag.proto(), proto::PAGE_FAULT);
    assert_eq!(request.label, 0x40 | u64::from(Rights::R.bits()));
    assert_eq!(s.k.with_utcb(s.pager, |u| (u.values[0], u.values[1])).unwrap(), (0x7001, 0x200));

    s.k.mapper().install_page(PAGER, 0x7, FpageRights::RWX);
    s.k.with_utcb(s.pager, |u| u.set_item(0, 0, MsgItem::map(0), Fpage::mem(0x7, 0, FpageRights::R | FpageRights::W))).unwrap();
    reply(&s.k, s.pager, MsgTag::new(0, 1, MsgTagFlags::empty(), 0));

    assert_eq!(s.k.take_fault(s.task).unwrap().outcome, FaultOutcome::Resolved);
    assert!(s.k.mapper().page(TASK, 0x7).is_some());
}

#[test]
fn fault_waits_for_pager_binding() {
    let s = setup();
    assert_eq!(s.k.page_fault(s.task, 0x9000, 0, 0x10), Ok(None));
    assert_eq!(s.k.gate_waiters(s.gate), 1);

    bind_to_pager(&s, 0x80);
    assert_eq!(s.k.gate_waiters(s.gate), 0);
    assert_eq!(s.k.queued_senders(s.pager), vec![s.task]);

    // The fault is already queued, so the open wait completes at once.
    let frame = SyscallFrame::new(MsgTag::default(), ObjRef::new(0, IpcOps::WAIT), TimeoutPair::NEVER);
    let request = s.k.invoke(s.pager, frame).unwrap().completed().unwrap();
    assert_eq!(request.tag.proto(), proto::PAGE_FAULT);
    assert_eq!(request.label, 0x80 | u64::from(Rights::R.bits()));

    reply(&s.k, s.pager, MsgTag::default());
    assert_eq!(s.k.take_fault(s.task).unwrap().outcome, FaultOutcome::Resolved);
}

#[test]
fn exception_reply_through_gate_rewrites_frame() {
    let s = setup();
    bind_to_pager(&s, 0x0);
    wait(&s.k, s.pager);
    s.k.with_utcb(s.task, |u| u.values[..2].copy_from_slice(&[0x11, 0x22])).unwrap();

    let frame = ExceptionFrame { words: [9, 8, 7, 6, 5, 4, 3, 2] };
    assert_eq!(s.k.exception(s.task, frame), Ok(None));
    assert_eq!(s.k.take_result(s.pager).unwrap().tag.proto(), proto::EXCEPTION);
    assert_eq!(s.k.with_utcb(s.pager, |u| u.values[0]).unwrap(), 9);

    s.k.with_utcb(s.pager, |u| u.values[..2].copy_from_slice(&[1, 1])).unwrap();
    reply(&s.k, s.pager, MsgTag::new(2, 0, MsgTagFlags::empty(), 0));

    let report = s.k.take_fault(s.task).unwrap();
    assert_eq!(report.outcome, FaultOutcome::Resolved);
    assert_eq!(report.frame.unwrap().words, [1, 1, 7, 6, 5, 4, 3, 2]);
    assert_eq!(s.k.with_utcb(s.task, |u| [u.values[0], u.values[1]]).unwrap(), [0x11, 0x22]);
}

#[test]
fn fault_during_call_keeps_the_reply() {
    let s = setup();
    bind_to_pager(&s, 0x20);
    wait(&s.k, s.pager);
    let server = s.k.create_actor(ActorSpec::new(SERVER)).unwrap();
    wait(&s.k, server);

    let server_slot =
        s.k.mapper().grant(TASK, Capability { object: KObject::Thread(server), rights: Rights::all() }).unwrap();
    s.k.with_utcb(s.task, |u| u.values[0] = 7).unwrap();
    let call = SyscallFrame::new(
        MsgTag::new(1, 0, MsgTagFlags::empty(), 0),
        ObjRef::new(server_slot, IpcOps::CALL),
        TimeoutPair::NEVER,
    );
    assert_eq!(s.k.invoke(s.task, call), Ok(IpcStatus::Blocked));
    assert!(s.k.take_result(server).unwrap().is_ok());

    // The task faults while it waits for the server's answer.
    assert_eq!(s.k.page_fault(s.task, 0x5000, 0, 0), Ok(None));
    assert_eq!(s.k.take_result(s.pager).unwrap().tag.proto(), proto::PAGE_FAULT);

    // The answer arrives during the fault and has to queue.
    let to_task =
        s.k.mapper().grant(SERVER, Capability { object: KObject::Thread(s.task), rights: Rights::all() }).unwrap();
    s.k.with_utcb(server, |u| u.values[0] = 99).unwrap();
    let answer = SyscallFrame::new(
        MsgTag::new(1, 0, MsgTagFlags::empty(), 0),
        ObjRef::new(to_task, IpcOps::SEND),
        TimeoutPair::NEVER,
    );
    assert_eq!(s.k.invoke(server, answer), Ok(IpcStatus::Blocked));
    assert_eq!(s.k.queued_senders(s.task), vec![server]);

    reply(&s.k, s.pager, MsgTag::default());
    assert_eq!(s.k.take_fault(s.task).unwrap().outcome, FaultOutcome::Resolved);

    let answer = s.k.take_result(s.task).unwrap();
    assert!(answer.is_ok());
    assert_eq!(answer.tag.words(), 1);
    assert_eq!(s.k.with_utcb(s.task, |u| u.values[0]).unwrap(), 99);
    assert!(s.k.take_result(server).unwrap().is_ok());
    assert!(s.k.queued_senders(s.task).is_empty());
}
