// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Interrupt Virtualization Entry: the Router's LISN -> EQ mapping.
//!
//! An IVE is never guest-MMIO-visible in this crate's default storage
//! backend (see `router::InMemoryRouterStorage`), so it is kept as a plain
//! struct rather than a bit-packed register; the 64-bit layout below is
//! documented for fidelity with the hardware descriptor this models.

use serde::Deserialize;
use serde::Serialize;

/// `VALID | MASKED | EQ_BLOCK(4b) | EQ_INDEX(27b) | EQ_DATA(31b)`, 64 bits total.
/// spec.md's field widths (`EQ_INDEX` 28b, `EQ_DATA` "31b + generation-aware
/// high bit") sum to 65 bits across a 64-bit descriptor; this crate's fields
/// are stored unpacked as plain `u32`s rather than a `#[bitfield]`, so no
/// single split needs to be chosen to make the hardware layout fit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Ive {
    pub valid: bool,
    pub masked: bool,
    pub eq_block: u8,
    pub eq_index: u32,
    pub eq_data: u32,
}

impl Ive {
    pub fn new(eq_block: u8, eq_index: u32, eq_data: u32) -> Self {
        Ive {
            valid: true,
            masked: false,
            eq_block,
            eq_index,
            eq_data: eq_data & 0x7fff_ffff,
        }
    }
}
