// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The EQ ESB source: a second MMIO region exposing each EQ's `ESn`/`ESe`
//! fields as ordinary ESB bytes, backed by the EQ descriptor itself rather
//! than a standalone byte array.

use sync::Mutex;

use crate::bus::BusAccessInfo;
use crate::bus::BusDevice;
use crate::bus::DeviceId;
use crate::bus::Suspendable;
use crate::xive::error::guest_error;
use crate::xive::error::XiveConfigError;
use crate::xive::esb::set_pq;
use crate::xive::esb::EsbState;
use crate::xive::router::Router;

use std::sync::Arc;

pub struct EqEsbSourceConfig {
    pub nr_eqs: u32,
    pub esb_shift: u32,
    pub eq_block: u8,
}

/// Which half of an EQ's pair of pages was addressed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Half {
    Esn,
    Ese,
}

pub struct EqEsbSource {
    nr_eqs: u32,
    esb_shift: u32,
    eq_block: u8,
    router: Arc<Router>,
    // Guards nothing of its own; present so sleep/wake/snapshot share this
    // device's discipline with the rest of the crate even though all real
    // state lives inside the EQ descriptors the Router owns.
    _lock: Mutex<()>,
}

impl EqEsbSource {
    pub fn new(cfg: EqEsbSourceConfig, router: Arc<Router>) -> Result<Self, XiveConfigError> {
        if !matches!(cfg.esb_shift, 12 | 13 | 16 | 17) {
            return Err(XiveConfigError::InvalidEsbShift(cfg.esb_shift));
        }
        if cfg.nr_eqs == 0 {
            return Err(XiveConfigError::ZeroEqs);
        }
        Ok(EqEsbSource {
            nr_eqs: cfg.nr_eqs,
            esb_shift: cfg.esb_shift,
            eq_block: cfg.eq_block,
            router,
            _lock: Mutex::new(()),
        })
    }

    /// Guest reset: this source has no state of its own (every `ESn`/`ESe`
    /// bit it exposes lives in the Router's EQ storage), so reset just
    /// forwards to it; see `Router::reset`.
    pub fn reset(&self) {
        self.router.reset();
    }

    fn decode(&self, info: &BusAccessInfo) -> (u32, Half, u16) {
        let page_size = 1u64 << self.esb_shift;
        let stride = page_size * 2;
        let idx = (info.offset / stride) as u32;
        let rem = info.offset % stride;
        let half = if rem < page_size { Half::Esn } else { Half::Ese };
        (idx, half, (rem % page_size) as u16)
    }

    fn apply(&mut self, idx: u32, half: Half, op: u8, sub: u16) -> Option<u64> {
        let mut eq = self.router.with_storage(|s| s.get_eq(self.eq_block, idx))?;
        let before = match half {
            Half::Esn => eq.esn(),
            Half::Ese => EsbState::from_bits(((eq.w1.get_ese()) as u8) & 0b11),
        };

        let (after, result) = match op {
            OP_EOI => {
                let (after, fwd) = before.eoi();
                (after, fwd as u64)
            }
            OP_GET_PQ => (before, u64::from(before.bits())),
            OP_GET_SET_PQ => {
                let new_bits = ((sub >> 8) & 0b11) as u8;
                let (old, new) = set_pq(before, new_bits);
                (new, u64::from(old.bits()))
            }
            _ => return None,
        };

        if after != before {
            match half {
                Half::Esn => eq.set_esn(after),
                Half::Ese => eq.w1.set_ese(u32::from(after.bits())),
            }
            self.router.with_storage(|s| s.set_eq(self.eq_block, idx, eq));
        }
        Some(result)
    }
}

const OP_EOI: u8 = 1;
const OP_GET_PQ: u8 = 2;
const OP_GET_SET_PQ: u8 = 3;

fn op_kind(sub: u16) -> u8 {
    ((sub & 0xc00) >> 10) as u8
}

fn fail_load(data: &mut [u8]) {
    for b in data.iter_mut() {
        *b = 0xff;
    }
}

impl BusDevice for EqEsbSource {
    fn debug_label(&self) -> String {
        "XIVE EQ ESB Source".to_owned()
    }

    fn device_id(&self) -> DeviceId {
        DeviceId(0x5845_5153) // "XEQS"
    }

    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]) {
        if data.len() != 8 {
            guest_error!("eq esb: load size {} unsupported", data.len());
            fail_load(data);
            return;
        }
        let (idx, half, sub) = self.decode(&info);
        if idx >= self.nr_eqs {
            guest_error!("eq esb: eq index {} out of range", idx);
            fail_load(data);
            return;
        }
        let op = op_kind(sub);
        if op == 0 {
            guest_error!("eq esb: load on trigger range is invalid");
            fail_load(data);
            return;
        }
        match self.apply(idx, half, op, sub) {
            Some(v) => data.copy_from_slice(&v.to_be_bytes()),
            None => {
                guest_error!("eq esb: no EQ at index {}", idx);
                fail_load(data);
            }
        }
    }

    fn write(&mut self, _info: BusAccessInfo, _data: &[u8]) {
        // Stores to this region are invalid: the EQ ESB is load-only.
        guest_error!("eq esb: stores are not supported");
    }
}

impl Suspendable for EqEsbSource {
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value> {
        // No state of its own; the EQ descriptors it reflects are
        // snapshotted by the Router's storage.
        Ok(serde_json::Value::Null)
    }

    fn restore(&mut self, _data: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
}
