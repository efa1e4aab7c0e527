//! CONTEXT: Wire-layout checks for the synchronous IPC ABI
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 5 integration tests
//!
//! TEST_SCOPE:
//!   - Bit positions user code depends on (tag, timeout, error word, items)
//!   - Receive-side item word composition
//!
//! TEST_SCENARIOS:
//!   - tag_bit_positions(): word/item counts and label land where user code reads them
//!   - page_fault_tag_shape(): the tag a pager receives for a page fault
//!   - timeout_wire_values(): Never/Zero and a relative value have fixed encodings
//!   - error_word_codes(): codes are even, phase bit is bit 0
//!   - received_item_word(): the receiver-visible item word keeps base and fpage type/order
//!
//! DEPENDENCIES:
//!   - synapse_abi: public encodings only
//!
//! ADR: docs/adr/0016-kernel-libs-architecture.md
use synapse_abi::{
    proto, ErrorCode, Fpage, FpageRights, FpageType, IpcErrorWord, MsgItem, MsgTag, MsgTagFlags,
    Phase, Timeout,
};

#[test]
fn tag_bit_positions() {
    let tag = MsgTag::new(3, 1, MsgTagFlags::TRANSFER_FPU, 0x55);
    assert_eq!(tag.raw() & 0x3f, 3);
    assert_eq!((tag.raw() >> 6) & 0x3f, 1);
    assert_eq!(tag.raw() & 0xf000, 0x1000);
    assert_eq!(tag.raw() >> 16, 0x55);
}

#[test]
fn page_fault_tag_shape() {
    let tag = MsgTag::new(2, 0, MsgTagFlags::empty(), proto::PAGE_FAULT);
    assert_eq!(tag.words(), 2);
    assert_eq!(tag.items(), 0);
    assert_eq!(MsgTag::from_raw(tag.raw()).proto(), -2);
}

#[test]
fn timeout_wire_values() {
    assert_eq!(Timeout::NEVER.raw(), 0);
    assert_eq!(Timeout::ZERO.raw(), 0x400);
    assert_eq!(Timeout::relative(100, 2).raw(), 100 | (2 << 10));
}

#[test]
fn error_word_codes() {
    let codes = [
        (ErrorCode::Timeout, 2),
        (ErrorCode::NotExistent, 4),
        (ErrorCode::Canceled, 6),
        (ErrorCode::Overflow, 8),
        (ErrorCode::XferTimeout, 10),
        (ErrorCode::Aborted, 12),
        (ErrorCode::MapFailed, 14),
    ];
    for (code, raw) in codes {
        assert_eq!(IpcErrorWord::new(code, Phase::Send).raw(), raw);
        assert_eq!(IpcErrorWord::new(code, Phase::Receive).raw(), raw | 1);
        assert_eq!(IpcErrorWord::from_raw(raw | 1).code(), Some(code));
    }
}

#[test]
fn received_item_word() {
    let item = MsgItem::map(0x7000);
    let fp = Fpage::obj(9, 2, FpageRights::RWX);
    let received = (item.raw() & !0x0ff7) | (fp.raw() & 0x0ff0);
    let as_fpage = Fpage::from_raw(received);
    assert_eq!(as_fpage.ty(), FpageType::Obj);
    assert_eq!(as_fpage.order(), 2);
    assert_eq!(received & !0xfff, 0x7000);
    assert_eq!(received & 0x7, 0);
    assert!(MsgItem::from_raw(received).is_map());
}
