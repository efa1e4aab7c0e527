// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-actor message buffer (UTCB): message words, receive buffers, error word.

use synapse_abi::{BufDesc, Fpage, IpcErrorWord, MsgItem, UTCB_MAX_BUFFERS, UTCB_MAX_WORDS};

/// Message buffer of one actor.
#[derive(Clone)]
pub struct Utcb {
    /// Message words; items follow the untyped words.
    pub values: [u64; UTCB_MAX_WORDS],
    /// Where the receive buffer iterators start.
    pub buf_desc: BufDesc,
    /// Receive buffers as `(MsgItem, Fpage)` word pairs.
    pub buffers: [u64; UTCB_MAX_BUFFERS],
    /// Outcome of the last IPC phase.
    pub error: IpcErrorWord,
}

impl Default for Utcb {
    fn default() -> Self {
        Self {
            values: [0; UTCB_MAX_WORDS],
            buf_desc: BufDesc::from_raw(0),
            buffers: [0; UTCB_MAX_BUFFERS],
            error: IpcErrorWord::NONE,
        }
    }
}

impl Utcb {
    /// Installs receive buffer pair `slot` (0-based pair index).
    pub fn set_buffer(&mut self, slot: usize, item: MsgItem, window: Fpage) {
        let idx = slot * 2;
        if idx + 1 < UTCB_MAX_BUFFERS {
            self.buffers[idx] = item.raw();
            self.buffers[idx + 1] = window.raw();
        }
    }

    /// Writes item pair `slot` behind `words` untyped words.
    pub fn set_item(&mut self, words: usize, slot: usize, item: MsgItem, fpage: Fpage) {
        let idx = words + slot * 2;
        if idx + 1 < UTCB_MAX_WORDS {
            self.values[idx] = item.raw();
            self.values[idx + 1] = fpage.raw();
        }
    }
}

/// Cursor over the receive buffers of one item kind.
#[derive(Debug, Clone, Copy)]
pub struct BufIter {
    idx: usize,
}

impl BufIter {
    pub const fn at(start: usize) -> Self {
        Self { idx: start }
    }

    /// Buffer item at the cursor; void past the end.
    pub fn item(&self, buffers: &[u64; UTCB_MAX_BUFFERS]) -> MsgItem {
        match buffers.get(self.idx) {
            Some(&raw) if self.idx + 1 < UTCB_MAX_BUFFERS => MsgItem::from_raw(raw),
            _ => MsgItem::from_raw(0),
        }
    }

    /// Receive window at the cursor.
    pub fn window(&self, buffers: &[u64; UTCB_MAX_BUFFERS]) -> Fpage {
        Fpage::from_raw(buffers.get(self.idx + 1).copied().unwrap_or(0))
    }

    pub fn advance(&mut self) {
        self.idx += 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_abi::FpageRights;

    #[test]
    fn iterator_walks_pairs_and_ends_void() {
        let mut utcb = Utcb::default();
        utcb.set_buffer(0, MsgItem::map(0), Fpage::obj(4, 0, FpageRights::RWX));
        let mut iter = BufIter::at(0);
        assert!(iter.item(&utcb.buffers).is_map());
        assert_eq!(iter.window(&utcb.buffers).index(), 4);
        iter.advance();
        assert!(iter.item(&utcb.buffers).is_void());
        assert!(BufIter::at(UTCB_MAX_BUFFERS).item(&utcb.buffers).is_void());
    }
}
