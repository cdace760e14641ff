// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-packed register support: the `#[bitfield]` attribute turns a struct of
//! `bool`/`BitFieldN` fields into a single-integer newtype with `get_`/`set_`
//! accessors, matching the declared field order from most- to
//! least-significant bit.
//!
//! ```ignore
//! #[bitfield]
//! #[derive(Clone, Copy, Default)]
//! pub struct Example {
//!     pub valid: bool,
//!     pub kind: BitField3,
//!     pub reserved: BitField28,
//! }
//! ```
//!
//! `BitFieldN` is a pseudo-type: the macro reads its width out of the
//! identifier and discards the field list entirely, so these names never need
//! to resolve to anything at the value level. They are defined below purely
//! so code that names them (for documentation, or that matches on them in a
//! non-macro context) still type-checks.

pub use bit_field_derive::bitfield;

macro_rules! bitfield_marker {
    ($($name:ident),* $(,)?) => {
        $(
            /// Marker type consumed by `#[bitfield]`; never instantiated.
            #[allow(non_camel_case_types)]
            pub enum $name {}
        )*
    };
}

bitfield_marker!(
    BitField1, BitField2, BitField3, BitField4, BitField5, BitField6, BitField7, BitField8,
    BitField9, BitField10, BitField11, BitField12, BitField13, BitField14, BitField15,
    BitField16, BitField17, BitField18, BitField19, BitField20, BitField21, BitField22,
    BitField23, BitField24, BitField25, BitField26, BitField27, BitField28, BitField29,
    BitField30, BitField31, BitField32, BitField33, BitField34, BitField35, BitField36,
    BitField37, BitField38, BitField39, BitField40, BitField41, BitField42, BitField43,
    BitField44, BitField45, BitField46, BitField47, BitField48, BitField49, BitField50,
    BitField51, BitField52, BitField53, BitField54, BitField55, BitField56, BitField57,
    BitField58, BitField59, BitField60, BitField61, BitField62, BitField63, BitField64,
);
