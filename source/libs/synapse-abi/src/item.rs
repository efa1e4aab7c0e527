// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed message items, flexpages and the buffer descriptor.
//!
//! A typed item occupies two words: an item word ([`MsgItem`]) and a
//! flexpage ([`Fpage`]) naming the memory, I/O or object range. Receive
//! buffers use the same two-word layout, where the flexpage is the window
//! the received item may land in.

use bitflags::bitflags;

/// Marker or-ed into a received item word: sender and receiver share the
/// address space; the raw send flexpage follows.
pub const LOCAL_ID_SAME_SPACE: u64 = 6;

/// Marker or-ed into a received item word: the object is already local to
/// the receiver; `object id | rights` follows.
pub const LOCAL_ID_OBJECT: u64 = 4;

/// Item word of a typed message item or receive buffer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(transparent)]
pub struct MsgItem(u64);

impl MsgItem {
    /// Compound item: shares the current receive buffer with the next item.
    pub const COMPOUND: u64 = 1 << 0;
    /// Receive buffer accepts a local id instead of a mapping.
    pub const RCV_ID: u64 = 1 << 1;
    /// Map item type.
    pub const MAP: u64 = 1 << 3;

    const BASE_MASK: u64 = !0xfff;

    /// Map item with a send base (hot spot); the low 12 bits of `base` are ignored.
    pub const fn map(base: u64) -> Self {
        Self(Self::MAP | (base & Self::BASE_MASK))
    }

    /// Reinterprets a raw word.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns a copy with `flags` (any of the associated constants) or-ed in.
    pub const fn with(self, flags: u64) -> Self {
        Self(self.0 | flags)
    }

    /// Void items are skipped by the transfer engine.
    pub const fn is_void(self) -> bool {
        self.0 == 0
    }

    /// True for map items.
    pub const fn is_map(self) -> bool {
        self.0 & Self::MAP != 0
    }

    /// True for compound items.
    pub const fn is_compound(self) -> bool {
        self.0 & Self::COMPOUND != 0
    }

    /// True when a receive buffer accepts local ids.
    pub const fn is_rcv_id(self) -> bool {
        self.0 & Self::RCV_ID != 0
    }

    /// Send base (hot spot).
    pub const fn base(self) -> u64 {
        self.0 & Self::BASE_MASK
    }
}

/// Kind of resource a flexpage names.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FpageType {
    /// Special pages (the all-spaces window).
    Special = 0,
    /// Memory pages.
    Memory = 1,
    /// I/O ports.
    Io = 2,
    /// Kernel-object capabilities.
    Obj = 3,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// Access rights of a flexpage. Object pages reuse the bits as
    /// `S` (control, = `X`), `W` and `R`.
    pub struct FpageRights: u64 {
        /// Execute (memory) / control (objects).
        const X = 1 << 0;
        /// Write.
        const W = 1 << 1;
        /// Read.
        const R = 1 << 2;
    }
}

impl FpageRights {
    /// Control right on object pages.
    pub const S: Self = Self::X;
    /// Read + execute.
    pub const RX: Self = Self::from_bits_truncate(Self::R.bits() | Self::X.bits());
    /// Read + write + execute.
    pub const RWX: Self = Self::all();
}

/// Flexpage: a naturally aligned range of `2^order` memory pages, I/O
/// ports or capability slots.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(transparent)]
pub struct Fpage(u64);

impl Fpage {
    const RIGHTS_MASK: u64 = 0xf;
    const TYPE_SHIFT: u32 = 4;
    const TYPE_MASK: u64 = 0x3;
    const ORDER_SHIFT: u32 = 6;
    const ORDER_MASK: u64 = 0x3f;
    const INDEX_SHIFT: u32 = 12;
    const WHOLE_SPACE: u8 = 63;

    /// Builds a flexpage.
    pub const fn new(ty: FpageType, index: u64, order: u8, rights: FpageRights) -> Self {
        Self(
            (rights.bits() & Self::RIGHTS_MASK)
                | ((ty as u64 & Self::TYPE_MASK) << Self::TYPE_SHIFT)
                | ((order as u64 & Self::ORDER_MASK) << Self::ORDER_SHIFT)
                | (index << Self::INDEX_SHIFT),
        )
    }

    /// Memory flexpage starting at page `page`.
    pub const fn mem(page: u64, order: u8, rights: FpageRights) -> Self {
        Self::new(FpageType::Memory, page, order, rights)
    }

    /// I/O flexpage starting at port `port`.
    pub const fn io(port: u64, order: u8, rights: FpageRights) -> Self {
        Self::new(FpageType::Io, port, order, rights)
    }

    /// Object flexpage starting at capability index `index`.
    pub const fn obj(index: u64, order: u8, rights: FpageRights) -> Self {
        Self::new(FpageType::Obj, index, order, rights)
    }

    /// Receive window accepting any kind of item at its send position.
    pub const fn all_spaces() -> Self {
        Self::new(FpageType::Special, 0, Self::WHOLE_SPACE, FpageRights::RWX)
    }

    /// Reinterprets a raw word.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Resource kind.
    pub const fn ty(self) -> FpageType {
        match (self.0 >> Self::TYPE_SHIFT) & Self::TYPE_MASK {
            1 => FpageType::Memory,
            2 => FpageType::Io,
            3 => FpageType::Obj,
            _ => FpageType::Special,
        }
    }

    /// Log2 of the number of units covered.
    pub const fn order(self) -> u8 {
        ((self.0 >> Self::ORDER_SHIFT) & Self::ORDER_MASK) as u8
    }

    /// First page / port / capability index.
    pub const fn index(self) -> u64 {
        self.0 >> Self::INDEX_SHIFT
    }

    /// Access rights.
    pub const fn rights(self) -> FpageRights {
        FpageRights::from_bits_truncate(self.0 & Self::RIGHTS_MASK)
    }

    /// True for the all-spaces receive window.
    pub const fn is_all_spaces(self) -> bool {
        matches!(self.ty(), FpageType::Special) && self.order() == Self::WHOLE_SPACE
    }

    /// Restricts the rights to `mask`.
    pub const fn mask_rights(self, mask: FpageRights) -> Self {
        Self(self.0 & !(Self::RIGHTS_MASK & !mask.bits()))
    }
}

/// Buffer descriptor: where the first memory, I/O and object receive
/// buffers start in the buffer array, plus receive-side flags.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(transparent)]
pub struct BufDesc(u64);

impl BufDesc {
    const FIELD_MASK: u64 = 0x1f;
    const IO_SHIFT: u32 = 5;
    const OBJ_SHIFT: u32 = 10;

    /// Accept FPU state handed over by the sender.
    pub const INHERIT_FPU: u64 = 1 << 24;

    /// Builds a descriptor.
    pub const fn new(mem: u8, io: u8, obj: u8, flags: u64) -> Self {
        Self(
            (mem as u64 & Self::FIELD_MASK)
                | ((io as u64 & Self::FIELD_MASK) << Self::IO_SHIFT)
                | ((obj as u64 & Self::FIELD_MASK) << Self::OBJ_SHIFT)
                | (flags & Self::INHERIT_FPU),
        )
    }

    /// Reinterprets a raw word.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw word.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Index of the first memory buffer word.
    pub const fn mem(self) -> usize {
        (self.0 & Self::FIELD_MASK) as usize
    }

    /// Index of the first I/O buffer word.
    pub const fn io(self) -> usize {
        ((self.0 >> Self::IO_SHIFT) & Self::FIELD_MASK) as usize
    }

    /// Index of the first object buffer word.
    pub const fn obj(self) -> usize {
        ((self.0 >> Self::OBJ_SHIFT) & Self::FIELD_MASK) as usize
    }

    /// True when the receiver accepts inherited FPU state.
    pub const fn inherit_fpu(self) -> bool {
        self.0 & Self::INHERIT_FPU != 0
    }
}
