// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The 2-bit Event State Buffer (P/Q) state machine shared by every ESB-backed
//! byte in the XIVE core: per-IRQ source bytes and each EQ's ESn/ESe pair.

use serde::Deserialize;
use serde::Serialize;

/// One ESB byte's low two bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EsbState {
    Reset = 0b00,
    Off = 0b01,
    Pending = 0b10,
    Queued = 0b11,
}

impl EsbState {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => EsbState::Reset,
            0b01 => EsbState::Off,
            0b10 => EsbState::Pending,
            0b11 => EsbState::Queued,
            _ => unreachable!("masked by & 0b11"),
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// A hardware or software trigger arrives. Returns the new state and
    /// whether the caller must forward a fresh notification.
    pub fn trigger(self) -> (EsbState, bool) {
        match self {
            EsbState::Reset => (EsbState::Pending, true),
            EsbState::Pending => (EsbState::Queued, false),
            EsbState::Queued => (EsbState::Queued, false),
            EsbState::Off => (EsbState::Off, false),
        }
    }

    /// The guest EOIs (accepts) the current notification. Returns the new
    /// state and whether a queued trigger must be re-forwarded.
    pub fn eoi(self) -> (EsbState, bool) {
        match self {
            EsbState::Reset => (EsbState::Reset, false),
            EsbState::Pending => (EsbState::Reset, false),
            EsbState::Queued => (EsbState::Pending, true),
            EsbState::Off => (EsbState::Off, false),
        }
    }
}

/// Unconditionally overwrite the P/Q bits, returning the value they held
/// before the write. Used by the explicit MMIO `SET_PQ_xx` pokes, which never
/// forward a notification themselves.
///
/// Returns `(old_state, new_state)`; the caller is responsible for storing
/// `new_state` back into the ESB byte.
pub fn set_pq(current: EsbState, new_bits: u8) -> (EsbState, EsbState) {
    (current, EsbState::from_bits(new_bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_from_reset_forwards() {
        let (s, fwd) = EsbState::Reset.trigger();
        assert_eq!(s, EsbState::Pending);
        assert!(fwd);
    }

    #[test]
    fn trigger_coalesces_into_queued() {
        let (s, fwd) = EsbState::Pending.trigger();
        assert_eq!(s, EsbState::Queued);
        assert!(!fwd);

        let (s, fwd) = EsbState::Queued.trigger();
        assert_eq!(s, EsbState::Queued);
        assert!(!fwd);
    }

    #[test]
    fn trigger_off_is_inert() {
        let (s, fwd) = EsbState::Off.trigger();
        assert_eq!(s, EsbState::Off);
        assert!(!fwd);
    }

    #[test]
    fn eoi_queued_forwards_retrigger() {
        let (s, fwd) = EsbState::Queued.eoi();
        assert_eq!(s, EsbState::Pending);
        assert!(fwd);
    }

    #[test]
    fn eoi_pending_clears_without_forward() {
        let (s, fwd) = EsbState::Pending.eoi();
        assert_eq!(s, EsbState::Reset);
        assert!(!fwd);
    }

    #[test]
    fn trigger_eoi_roundtrip() {
        for start in [EsbState::Reset, EsbState::Pending] {
            let (s1, _) = start.trigger();
            let (s2, _) = s1.eoi();
            let (s3, _) = s2.eoi();
            let (s4, _) = s3.trigger();
            assert_eq!(s4, start, "trigger(eoi(eoi(trigger(s)))) == s for {start:?}");
        }
    }

    #[test]
    fn set_pq_returns_old_value() {
        let (old, new) = set_pq(EsbState::Queued, 0b00);
        assert_eq!(old, EsbState::Queued);
        assert_eq!(new, EsbState::Reset);
    }

    #[test]
    fn bits_roundtrip() {
        for bits in 0u8..4 {
            assert_eq!(EsbState::from_bits(bits).bits(), bits);
        }
    }
}
