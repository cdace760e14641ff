// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use sync::Mutex;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use crate::guest_address::GuestAddress;

#[derive(Error, Debug)]
pub enum Error {
    #[error("memory region [{base}, {base}+{size:#x}) overlaps an existing region")]
    OverlappingRegion { base: GuestAddress, size: u64 },

    #[error("address {0} is not backed by any guest memory region")]
    InvalidGuestAddress(GuestAddress),

    #[error("access at {addr} of size {size} runs past the end of its region")]
    OutOfBounds { addr: GuestAddress, size: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

struct Region {
    base: GuestAddress,
    // Guarded by a lock rather than requiring `&mut self` on every access:
    // real guest memory is mapped pages any number of vCPU/device threads
    // can write into concurrently, and callers throughout this crate only
    // ever hold a shared `&GuestMemory`.
    data: Mutex<Vec<u8>>,
}

impl Region {
    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

/// A flat model of guest physical memory: a set of non-overlapping,
/// byte-addressable regions that DMA-capable devices read and write
/// through a `GuestAddress`.
///
/// Cloning a `GuestMemory` is cheap and yields another handle to the same
/// underlying storage (it is reference-counted), matching how this
/// codebase passes guest memory around: by value, to every device that
/// needs it, all sharing the one real mapping.
#[derive(Clone)]
pub struct GuestMemory {
    regions: Arc<Vec<Region>>,
}

impl GuestMemory {
    /// Builds a `GuestMemory` from a list of `(base, size)` ranges, each
    /// backed by a zeroed buffer. Ranges must be sorted and non-overlapping.
    pub fn new(ranges: &[(GuestAddress, u64)]) -> Result<GuestMemory> {
        let mut regions = Vec::with_capacity(ranges.len());
        let mut prev_end: Option<u64> = None;
        for &(base, size) in ranges {
            if let Some(prev_end) = prev_end {
                if base.0 < prev_end {
                    return Err(Error::OverlappingRegion { base, size });
                }
            }
            prev_end = Some(base.0.saturating_add(size));
            regions.push(Region {
                base,
                data: Mutex::new(vec![0u8; size as usize]),
            });
        }
        Ok(GuestMemory {
            regions: Arc::new(regions),
        })
    }

    fn region_for(&self, addr: GuestAddress, size: usize) -> Result<(&Region, usize)> {
        for region in self.regions.iter() {
            if let Some(offset) = addr.offset_from(region.base) {
                if offset < region.len() {
                    if offset.saturating_add(size as u64) > region.len() {
                        return Err(Error::OutOfBounds { addr, size });
                    }
                    return Ok((region, offset as usize));
                }
            }
        }
        Err(Error::InvalidGuestAddress(addr))
    }

    /// Writes `val`'s raw bytes at `addr`, DMA-style.
    pub fn write_obj_at_addr<T: IntoBytes + Immutable>(
        &self,
        val: T,
        addr: GuestAddress,
    ) -> Result<()> {
        let bytes = val.as_bytes();
        let (region, offset) = self.region_for(addr, bytes.len())?;
        let mut data = region.data.lock();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads `size_of::<T>()` raw bytes at `addr` and reinterprets them as
    /// `T`, with no byte-order conversion: if the bytes were written
    /// through an endian-aware wrapper (`data_model::Be32`, ...), reading
    /// them back as the bare native type returns the wire-order bytes
    /// unconverted, same as the real hardware would hand a host CPU.
    pub fn read_obj_from_addr<T: FromBytes>(&self, addr: GuestAddress) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let (region, offset) = self.region_for(addr, size)?;
        let data = region.data.lock();
        T::read_from_bytes(&data[offset..offset + size])
            .map_err(|_| Error::OutOfBounds { addr, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlapping_ranges() {
        let err = GuestMemory::new(&[
            (GuestAddress(0x1000), 0x1000),
            (GuestAddress(0x1800), 0x1000),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::OverlappingRegion { .. }));
    }

    #[test]
    fn write_then_read_round_trips() {
        let memory = GuestMemory::new(&[(GuestAddress(0x1000), 0x1000)]).unwrap();
        memory.write_obj_at_addr(0x1234_5678u32, GuestAddress(0x1010)).unwrap();
        let value: u32 = memory.read_obj_from_addr(GuestAddress(0x1010)).unwrap();
        assert_eq!(value, 0x1234_5678);
    }

    #[test]
    fn out_of_bounds_access_is_rejected() {
        let memory = GuestMemory::new(&[(GuestAddress(0x1000), 0x10)]).unwrap();
        let err = memory
            .write_obj_at_addr(0u64, GuestAddress(0x1008))
            .unwrap_err();
        assert!(matches!(err, Error::OutOfBounds { .. }));
    }

    #[test]
    fn unmapped_address_is_rejected() {
        let memory = GuestMemory::new(&[(GuestAddress(0x1000), 0x10)]).unwrap();
        let err = memory
            .write_obj_at_addr(0u8, GuestAddress(0x2000))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGuestAddress(_)));
    }

    #[test]
    fn clone_shares_the_same_backing_storage() {
        let memory = GuestMemory::new(&[(GuestAddress(0x1000), 0x10)]).unwrap();
        let other = memory.clone();
        other.write_obj_at_addr(0xAAu8, GuestAddress(0x1000)).unwrap();
        let value: u8 = memory.read_obj_from_addr(GuestAddress(0x1000)).unwrap();
        assert_eq!(value, 0xAA);
    }
}
