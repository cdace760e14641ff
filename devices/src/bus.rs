// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Minimal MMIO registration surface consumed by the devices in this crate.
//!
//! The actual `Bus` that owns address ranges and dispatches accesses to the
//! right device lives in the surrounding machine model and is out of scope
//! here; this module only defines the trait boundary a device must implement
//! to be registered onto one, plus the bits devices need to identify
//! themselves for metrics and snapshotting.

use std::fmt;

/// Identifies the accessing/target address for a single MMIO or PIO access.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct BusAccessInfo {
    /// Address the bus was asked to access, before the device's base is subtracted.
    pub address: u64,
    /// Offset of this access within the device's registered range.
    pub offset: u64,
    /// Opaque id of the range that matched, for devices that register more than one.
    pub id: usize,
}

/// Stable identifier for a device instance, used in logs and snapshots.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A device that can be attached to an MMIO (or PIO) bus.
///
/// `read`/`write` never fail: a guest access to an unsupported offset or size
/// is a guest programming error, which this crate always resolves to a
/// defined fallback (zero-fill on read, no-op on write) rather than an `Err`.
pub trait BusDevice: Send {
    /// Human-readable label used in log messages.
    fn debug_label(&self) -> String;

    /// Identifier reported to metrics/snapshots.
    fn device_id(&self) -> DeviceId;

    /// Handle a read of `data.len()` bytes at `info`.
    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]);

    /// Handle a write of `data.len()` bytes at `info`.
    fn write(&mut self, info: BusAccessInfo, data: &[u8]);
}

/// Devices that can snapshot and restore their state, and be quiesced across
/// a host-side suspend. Every device in this crate implements it, even ones
/// with no meaningful sleep/wake behavior, for consistency with the rest of
/// this codebase's device model.
pub trait Suspendable {
    /// Called before the VM is suspended. Devices with no background activity
    /// can leave this as a no-op.
    fn sleep(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the VM resumes from suspend.
    fn wake(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Serialize device state for snapshotting.
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value>;

    /// Restore device state from a value previously returned by `snapshot`.
    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()>;
}
