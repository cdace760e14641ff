// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Error taxonomy for the XIVE core.
//!
//! Only construction-time misconfiguration is ever surfaced as a `Result`.
//! Everything a guest can trigger at runtime (bad offset, bad size, unknown
//! LISN, ...) is logged through [`guest_error`] and resolved to a defined
//! fallback at the call site; see the crate-level invariants in `xive/mod.rs`.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use thiserror::Error;

/// Construction-time configuration error. A component either constructs
/// fully and correctly, or returns one of these with no partially
/// initialized state left reachable.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum XiveConfigError {
    #[error("esb_shift {0} is not one of the supported values (12, 13, 16, 17)")]
    InvalidEsbShift(u32),

    #[error("nr_irqs must be nonzero")]
    ZeroIrqs,

    #[error("nr_eqs must be nonzero")]
    ZeroEqs,

    #[error("block id {0} does not fit in 4 bits")]
    BlockOutOfRange(u8),
}

/// Rate limiter keyed by call site, via `AtomicU64` counters declared next to
/// each call. Logs on the first occurrence and every 1000th one after that,
/// so a guest that spins on a programming error cannot flood the host log.
pub struct GuestErrorLimiter(AtomicU64);

impl GuestErrorLimiter {
    pub const fn new() -> Self {
        GuestErrorLimiter(AtomicU64::new(0))
    }

    /// Returns true if this occurrence should be logged.
    pub fn should_log(&self) -> bool {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        n == 0 || n % 1000 == 0
    }
}

impl Default for GuestErrorLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs a rate-limited guest programming error via `base::warn!`.
///
/// Usage: `guest_error!("bad offset {:#x}", offset);` — each call site gets
/// its own limiter, so a hot loop of guest errors collapses to an occasional
/// log line instead of one per access.
macro_rules! guest_error {
    ($($arg:tt)*) => {{
        static LIMITER: $crate::xive::error::GuestErrorLimiter =
            $crate::xive::error::GuestErrorLimiter::new();
        if LIMITER.should_log() {
            base::warn!("xive: guest error: {}", format_args!($($arg)*));
        }
    }};
}

pub(crate) use guest_error;
