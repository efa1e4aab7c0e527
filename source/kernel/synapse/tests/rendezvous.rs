//! CONTEXT: End-to-end rendezvous scenarios on a single CPU
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 10 integration tests
//!
//! TEST_SCOPE:
//!   - Word and capability transfer into a waiting receiver
//!   - Send timeouts (zero and bounded) and the timeout/claim race
//!   - Teardown and cancellation of queued partners
//!   - Priority service order of queued senders
//!   - Direct switch to the callee versus a scheduler deblock
//!
//! TEST_SCENARIOS:
//!   - words_and_capability_reach_the_receiver(): 3 words + 1 object item, cap lands in the receive window
//!   - zero_send_timeout_never_queues(): receiver not waiting, snd Zero -> Timeout, queue stays empty
//!   - bounded_send_timeout_fires_on_tick(): queued sender fails with Timeout once the deadline passes
//!   - claim_before_tick_wins_the_race(): receiver claims a sender whose deadline already passed
//!   - destroyed_receiver_fails_queued_sender(): NotExistent in the send phase
//!   - cancel_dequeues_sender(): Canceled, queue empty
//!   - open_wait_serves_highest_priority_first(): priority then FIFO
//!   - denied_map_fails_both_sides(): map failure reported to sender and receiver
//!   - call_switches_directly_unless_disabled(): callee runs on the caller's time only with direct switch on
//!   - donated_priority_orders_the_queue(): callee running on a caller's time queues at the caller's priority
//!
//! DEPENDENCIES:
//!   - synapse::Kernel with MapDb + ManualClock
//!   - synapse_abi: wire types
//!
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md
use synapse::ipc::utcb::Utcb;
use synapse::mm::failpoints;
use synapse::{
    ActorId, ActorSpec, Capability, CpuId, IpcStatus, KObject, Kernel, KernelConfig, ManualClock, MapDb, Prio, Rights,
    SpaceId, SyscallFrame,
};
use synapse_abi::{
    BufDesc, ErrorCode, Fpage, FpageRights, IpcOps, MsgItem, MsgTag, MsgTagFlags, ObjRef, Phase, Timeout,
    TimeoutPair,
};

const CLIENT: SpaceId = SpaceId::from_raw(1);
const SERVER: SpaceId = SpaceId::from_raw(2);

type TestKernel = Kernel<MapDb, ManualClock>;

fn kernel() -> TestKernel {
    Kernel::new(KernelConfig::default(), MapDb::new(), ManualClock::new())
}

fn thread_cap(k: &TestKernel, space: SpaceId, target: ActorId) -> u64 {
    k.mapper().grant(space, Capability { object: KObject::Thread(target), rights: Rights::all() }).unwrap()
}

fn open_wait(k: &TestKernel, actor: ActorId) -> IpcStatus {
    let frame = SyscallFrame::new(MsgTag::default(), ObjRef::new(0, IpcOps::WAIT), TimeoutPair::NEVER);
    k.invoke(actor, frame).unwrap()
}

fn send(k: &TestKernel, actor: ActorId, cap: u64, tag: MsgTag, snd: Timeout) -> IpcStatus {
    let frame = SyscallFrame::new(tag, ObjRef::new(cap, IpcOps::SEND), TimeoutPair::new(snd, Timeout::NEVER));
    k.invoke(actor, frame).unwrap()
}

#[test]
fn words_and_capability_reach_the_receiver() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let to_server = thread_cap(&k, CLIENT, server);
    let gate = k.create_gate().unwrap();
    let gate_slot = k.mapper().grant(CLIENT, Capability { object: KObject::Gate(gate), rights: Rights::all() }).unwrap();

    k.with_utcb(server, |u: &mut Utcb| {
        u.buf_desc = BufDesc::new(0, 0, 0, 0);
        u.set_buffer(0, MsgItem::map(0), Fpage::obj(40, 0, FpageRights::RWX));
    })
    .unwrap();
    assert_eq!(open_wait(&k, server), IpcStatus::Blocked);

    k.with_utcb(client, |u| {
        u.values[..3].copy_from_slice(&[7, 8, 9]);
        u.set_item(3, 0, MsgItem::map(0), Fpage::obj(gate_slot, 0, FpageRights::RWX));
    })
    .unwrap();
    let sent = send(&k, client, to_server, MsgTag::new(3, 1, MsgTagFlags::empty(), 5), Timeout::NEVER);
    assert!(sent.completed().unwrap().is_ok());

    let received = k.take_result(server).unwrap();
    assert!(received.is_ok());
    assert_eq!(received.tag.words(), 3);
    assert_eq!(received.tag.items(), 1);
    assert_eq!(received.tag.label(), 5);
    assert_eq!(k.with_utcb(server, |u| [u.values[0], u.values[1], u.values[2]]).unwrap(), [7, 8, 9]);
    let installed = k.mapper().cap(SERVER, 40).unwrap();
    assert_eq!(installed.object, KObject::Gate(gate));
}

#[test]
fn zero_send_timeout_never_queues() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    let result = send(&k, client, cap, MsgTag::default(), Timeout::ZERO).completed().unwrap();
    assert_eq!(result.code(), Some(ErrorCode::Timeout));
    assert_eq!(result.error.phase(), Phase::Send);
    assert!(k.queued_senders(server).is_empty());
}

#[test]
fn bounded_send_timeout_fires_on_tick() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    assert_eq!(send(&k, client, cap, MsgTag::default(), Timeout::from_micros(100)), IpcStatus::Blocked);
    assert_eq!(k.queued_senders(server), vec![client]);
    assert_eq!(k.armed_timeouts(CpuId::BOOT), 1);
    assert_eq!(k.timer().wakeup(), u64::MAX);

    k.timer().advance_us(50);
    assert_eq!(k.tick(CpuId::BOOT), Ok(0));
    assert_eq!(k.timer().wakeup(), 100_000);
    assert!(k.take_result(client).is_none());

    k.timer().advance_us(60);
    assert_eq!(k.tick(CpuId::BOOT), Ok(1));
    assert_eq!(k.take_result(client).unwrap().code(), Some(ErrorCode::Timeout));
    assert!(k.queued_senders(server).is_empty());
}

#[test]
fn claim_before_tick_wins_the_race() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    k.with_utcb(client, |u| u.values[0] = 11).unwrap();
    let tag = MsgTag::new(1, 0, MsgTagFlags::empty(), 0);
    assert_eq!(send(&k, client, cap, tag, Timeout::from_micros(100)), IpcStatus::Blocked);
    k.timer().advance_us(500);

    // The deadline has passed but the tick has not run: the claim is first.
    let received = open_wait(&k, server).completed().unwrap();
    assert!(received.is_ok());
    assert_eq!(k.with_utcb(server, |u| u.values[0]).unwrap(), 11);
    assert!(k.take_result(client).unwrap().is_ok());
    assert_eq!(k.tick(CpuId::BOOT), Ok(0));
}

#[test]
fn destroyed_receiver_fails_queued_sender() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    let call = SyscallFrame::new(MsgTag::default(), ObjRef::new(cap, IpcOps::CALL), TimeoutPair::NEVER);
    assert_eq!(k.invoke(client, call), Ok(IpcStatus::Blocked));
    k.destroy_actor(server).unwrap();

    let result = k.take_result(client).unwrap();
    assert_eq!(result.code(), Some(ErrorCode::NotExistent));
    assert_eq!(result.error.phase(), Phase::Send);
    assert_eq!(k.armed_timeouts(CpuId::BOOT), 0);
}

#[test]
fn cancel_dequeues_sender() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    assert_eq!(send(&k, client, cap, MsgTag::default(), Timeout::from_micros(1_000)), IpcStatus::Blocked);
    k.cancel(client).unwrap();
    assert_eq!(k.take_result(client).unwrap().code(), Some(ErrorCode::Canceled));
    assert!(k.queued_senders(server).is_empty());
    assert_eq!(k.armed_timeouts(CpuId::BOOT), 0);
}

#[test]
fn open_wait_serves_highest_priority_first() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let low = k.create_actor(ActorSpec::new(CLIENT).with_prio(Prio::new(10))).unwrap();
    let high = k.create_actor(ActorSpec::new(CLIENT).with_prio(Prio::new(20))).unwrap();
    let cap = thread_cap(&k, CLIENT, server);

    assert_eq!(send(&k, low, cap, MsgTag::default(), Timeout::NEVER), IpcStatus::Blocked);
    assert_eq!(send(&k, high, cap, MsgTag::default(), Timeout::NEVER), IpcStatus::Blocked);
    assert_eq!(k.queued_senders(server), vec![high, low]);

    assert!(open_wait(&k, server).completed().unwrap().is_ok());
    assert!(k.take_result(high).unwrap().is_ok());
    assert!(k.take_result(low).is_none());
    assert_eq!(k.queued_senders(server), vec![low]);
}

#[test]
fn denied_map_fails_both_sides() {
    let k = kernel();
    let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
    let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
    let cap = thread_cap(&k, CLIENT, server);
    k.mapper().install_page(CLIENT, 0x10, FpageRights::RWX);

    k.with_utcb(server, |u| u.set_buffer(0, MsgItem::map(0), Fpage::all_spaces())).unwrap();
    assert_eq!(open_wait(&k, server), IpcStatus::Blocked);

    k.with_utcb(client, |u| u.set_item(0, 0, MsgItem::map(0), Fpage::mem(0x10, 0, FpageRights::R))).unwrap();
    failpoints::deny_next_map(k.mapper());
    let result = send(&k, client, cap, MsgTag::new(0, 1, MsgTagFlags::empty(), 0), Timeout::NEVER);
    let result = result.completed().unwrap();
    assert_eq!(result.error.phase(), Phase::Send);
    assert!(result.code().is_some());

    let received = k.take_result(server).unwrap();
    assert_eq!(received.error.phase(), Phase::Receive);
    assert!(received.tag.has_error());
    assert!(k.mapper().page(SERVER, 0x10).is_none());
}

#[test]
fn call_switches_directly_unless_disabled() {
    for direct in [true, false] {
        let k = Kernel::new(KernelConfig::default().with_direct_switch(direct), MapDb::new(), ManualClock::new());
        let server = k.create_actor(ActorSpec::new(SERVER)).unwrap();
        let client = k.create_actor(ActorSpec::new(CLIENT)).unwrap();
        let to_server = thread_cap(&k, CLIENT, server);
        assert_eq!(open_wait(&k, server), IpcStatus::Blocked);

        let before = k.sched_stats(CpuId::BOOT);
        let call = SyscallFrame::new(MsgTag::default(), ObjRef::new(to_server, IpcOps::CALL), TimeoutPair::NEVER);
        assert_eq!(k.invoke(client, call), Ok(IpcStatus::Blocked));
        let after = k.sched_stats(CpuId::BOOT);

        if direct {
            assert_eq!(after.direct_switches, before.direct_switches + 1);
        } else {
            assert_eq!(after.direct_switches, before.direct_switches);
            assert!(after.deblocks > before.deblocks);
        }
        assert!(k.take_result(server).unwrap().is_ok());
    }
}

#[test]
fn donated_priority_orders_the_queue() {
    let k = kernel();
    let worker = k.create_actor(ActorSpec::new(SERVER).with_prio(Prio::new(1))).unwrap();
    let backend = k.create_actor(ActorSpec::new(SERVER).with_prio(Prio::new(1))).unwrap();
    let high = k.create_actor(ActorSpec::new(CLIENT).with_prio(Prio::new(20))).unwrap();
    let low = k.create_actor(ActorSpec::new(CLIENT).with_prio(Prio::new(10))).unwrap();
    let to_worker = thread_cap(&k, CLIENT, worker);
    let low_to_backend = thread_cap(&k, CLIENT, backend);
    let worker_to_backend = thread_cap(&k, SERVER, backend);

    assert_eq!(open_wait(&k, worker), IpcStatus::Blocked);
    let call = SyscallFrame::new(MsgTag::default(), ObjRef::new(to_worker, IpcOps::CALL), TimeoutPair::NEVER);
    assert_eq!(k.invoke(high, call), Ok(IpcStatus::Blocked));
    assert!(k.take_result(worker).unwrap().is_ok());

    assert_eq!(send(&k, low, low_to_backend, MsgTag::default(), Timeout::NEVER), IpcStatus::Blocked);
    assert_eq!(send(&k, worker, worker_to_backend, MsgTag::default(), Timeout::NEVER), IpcStatus::Blocked);
    assert_eq!(k.queued_senders(backend), vec![worker, low]);
}
