// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Endian-aware integer wrappers used for values that cross a guest/host
//! DMA boundary, where the wire representation's byte order is fixed by
//! the emulated hardware regardless of the host's native endianness.
//!
//! Each wrapper stores its value pre-converted to the target byte order, so
//! reading or writing one through raw bytes (`vm_memory::GuestMemory`,
//! `zerocopy`) never needs a conversion step at the call site: the
//! conversion happens once, in `From`, at construction.

use std::fmt;

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

macro_rules! endian_type {
    ($name:ident, $native:ty, $to_bytes:ident, $from_bytes:ident) => {
        #[derive(
            Copy,
            Clone,
            Default,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            FromBytes,
            IntoBytes,
            Immutable,
            KnownLayout,
            Unaligned,
        )]
        #[repr(transparent)]
        pub struct $name($native);

        impl $name {
            /// Returns the value converted to the host's native byte order.
            pub fn to_native(self) -> $native {
                <$native>::$from_bytes(self.0)
            }
        }

        impl From<$native> for $name {
            fn from(value: $native) -> Self {
                $name(<$native>::$to_bytes(value))
            }
        }

        impl From<$name> for $native {
            fn from(value: $name) -> Self {
                value.to_native()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.to_native())
            }
        }
    };
}

endian_type!(Le16, u16, to_le, from_le);
endian_type!(Le32, u32, to_le, from_le);
endian_type!(Le64, u64, to_le, from_le);
endian_type!(Be16, u16, to_be, from_be);
endian_type!(Be32, u32, to_be, from_be);
endian_type!(Be64, u64, to_be, from_be);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn be32_round_trips_through_raw_bytes() {
        let value = Be32::from(0x8000_ABCDu32);
        let bytes = value.as_bytes();
        assert_eq!(bytes, &0x8000_ABCDu32.to_be_bytes());

        let reloaded = Be32::read_from_bytes(bytes).unwrap();
        assert_eq!(reloaded.to_native(), 0x8000_ABCD);
    }

    #[test]
    fn native_u32_reinterpreted_from_be_bytes_needs_from_be() {
        let value = Be32::from(0x8000_ABCDu32);
        let raw = u32::from_ne_bytes(value.as_bytes().try_into().unwrap());
        assert_eq!(u32::from_be(raw), 0x8000_ABCD);
    }
}
