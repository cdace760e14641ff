// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Event Queue descriptor: eight 32-bit words (`w0..w7`) describing a
//! guest-resident circular buffer and how the Router should push into it.
//!
//! `w0`, `w1` and `w6` pack several sub-fields each and are modeled with this
//! crate's `#[bitfield]` attribute, the same way `IoapicRedirectionTableEntry`
//! packs its fields in `hypervisor::x86_64`. `w2`/`w3` are a plain split
//! address and `w7` is a two-way union selected by `w6`'s `FORMAT_BIT`, so
//! both are kept as plain integers with accessor methods instead.

use bit_field::bitfield;
use serde::Deserialize;
use serde::Serialize;

use crate::xive::esb::EsbState;

/// `VALID | ENQUEUE | UCOND_NOTIFY | BACKLOG | ESCALATE_CTL | reserved(24) | QSIZE(3b)`.
#[bitfield]
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqW0 {
    pub valid: bool,
    pub enqueue: bool,
    pub ucond_notify: bool,
    pub backlog: bool,
    pub escalate_ctl: bool,
    pub reserved: BitField24,
    pub qsize: BitField3,
}

/// `GENERATION | PAGE_OFF(17b) | ESn(2b) | ESe(2b) | reserved(10b)`.
#[bitfield]
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqW1 {
    pub generation: bool,
    pub page_off: BitField17,
    pub esn: BitField2,
    pub ese: BitField2,
    pub reserved: BitField10,
}

/// `FORMAT_BIT | NVT_BLOCK(4b) | NVT_INDEX(24b) | reserved(3b)`.
#[bitfield]
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqW6 {
    pub format_bit: bool,
    pub nvt_block: BitField4,
    pub nvt_index: BitField24,
    pub reserved: BitField3,
}

/// The full 8-word descriptor. `w4`/`w5` carry no XIVE-core semantics in this
/// crate's scope (escalation/backlog bookkeeping, a non-goal) and are kept
/// only as opaque storage so a round trip through `get_eq`/`set_eq` is lossless.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Eq {
    pub w0: EqW0,
    pub w1: EqW1,
    /// High 28 bits of the 60-bit guest-physical queue base address.
    pub w2_addr_hi: u32,
    /// Low 32 bits of the queue base address.
    pub w3_addr_lo: u32,
    pub w4: u32,
    pub w5: u32,
    pub w6: EqW6,
    /// Format-0: `PRIORITY(8b)` in bits 0..8, `IGNORE` at bit 8.
    /// Format-1: the full word is `LOG_SERVER_ID`.
    pub w7: u32,
}

impl Eq {
    pub fn queue_len(&self) -> u32 {
        1u32 << (self.w0.get_qsize() + 10)
    }

    pub fn qaddr_base(&self) -> u64 {
        (u64::from(self.w2_addr_hi) << 32) | u64::from(self.w3_addr_lo)
    }

    pub fn qindex(&self) -> u32 {
        self.w1.get_page_off()
    }

    pub fn generation(&self) -> bool {
        self.w1.get_generation()
    }

    pub fn esn(&self) -> EsbState {
        EsbState::from_bits(self.w1.get_esn() as u8)
    }

    pub fn set_esn(&mut self, state: EsbState) {
        self.w1.set_esn(u32::from(state.bits()));
    }

    pub fn format(&self) -> u8 {
        self.w6.get_format_bit() as u8
    }

    pub fn nvt_block(&self) -> u8 {
        self.w6.get_nvt_block() as u8
    }

    pub fn nvt_index(&self) -> u32 {
        self.w6.get_nvt_index()
    }

    pub fn priority(&self) -> u8 {
        (self.w7 & 0xff) as u8
    }

    pub fn ignore(&self) -> bool {
        (self.w7 >> 8) & 1 != 0
    }

    pub fn log_server_id(&self) -> u32 {
        self.w7
    }

    /// Advance the queue index by one entry, flipping the generation bit on
    /// wraparound. Returns the offset the just-advanced entry was written at.
    pub fn advance(&mut self) -> u64 {
        let len = self.queue_len();
        let idx = self.w1.get_page_off();
        let offset = u64::from(idx) << 2;
        let next = (idx + 1) % len;
        if next == 0 {
            self.w1.set_generation(!self.w1.get_generation());
        }
        self.w1.set_page_off(next);
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_len_from_qsize() {
        let mut eq = Eq::default();
        eq.w0.set_qsize(0);
        assert_eq!(eq.queue_len(), 1024);
        eq.w0.set_qsize(3);
        assert_eq!(eq.queue_len(), 8192);
    }

    #[test]
    fn advance_wraps_and_flips_generation() {
        let mut eq = Eq::default();
        eq.w0.set_qsize(0); // 1024 entries
        eq.w1.set_page_off(1023);
        eq.w1.set_generation(false);

        let offset = eq.advance();
        assert_eq!(offset, 1023 * 4);
        assert_eq!(eq.qindex(), 0);
        assert!(eq.generation());

        let offset2 = eq.advance();
        assert_eq!(offset2, 0);
        assert_eq!(eq.qindex(), 1);
        assert!(eq.generation(), "generation only flips on wrap");
    }

    #[test]
    fn addr_split_roundtrips() {
        let mut eq = Eq::default();
        eq.w2_addr_hi = 0x1234_5678 & 0x0fff_ffff;
        eq.w3_addr_lo = 0xdead_beef;
        assert_eq!(
            eq.qaddr_base(),
            (u64::from(eq.w2_addr_hi) << 32) | u64::from(eq.w3_addr_lo)
        );
    }
}
