// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Event Source (IVSE): an array of ESB bytes behind an MMIO region, plus
//! the `set_irq` entry point the rest of the machine model drives.

use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;

use crate::bus::BusAccessInfo;
use crate::bus::BusDevice;
use crate::bus::DeviceId;
use crate::bus::Suspendable;
use crate::xive::error::guest_error;
use crate::xive::error::XiveConfigError;
use crate::xive::esb::set_pq;
use crate::xive::esb::EsbState;
use crate::xive::fabric::FabricHandle;

pub struct EventSourceConfig {
    pub nr_irqs: u32,
    pub esb_shift: u32,
    pub two_page: bool,
    pub store_eoi: bool,
    /// The global LISN the first source in this block maps to.
    pub base_lisn: u32,
}

#[derive(Default, Serialize, Deserialize)]
struct EventSourceState {
    esb: Vec<EsbState>,
    lsi: Vec<bool>,
    asserted: Vec<bool>,
}

/// One IVSE block. MMIO-reachable through `mmio`, which shares the same
/// locked state and is what actually gets registered on a `Bus`.
pub struct EventSource {
    state: Mutex<EventSourceState>,
    esb_shift: u32,
    two_page: bool,
    store_eoi: bool,
    base_lisn: u32,
    fabric: FabricHandle,
}

impl EventSource {
    pub fn new(cfg: EventSourceConfig, fabric: FabricHandle) -> Result<Self, XiveConfigError> {
        if !matches!(cfg.esb_shift, 12 | 13 | 16 | 17) {
            return Err(XiveConfigError::InvalidEsbShift(cfg.esb_shift));
        }
        if cfg.nr_irqs == 0 {
            return Err(XiveConfigError::ZeroIrqs);
        }
        let n = cfg.nr_irqs as usize;
        Ok(EventSource {
            state: Mutex::new(EventSourceState {
                esb: vec![EsbState::Off; n],
                lsi: vec![false; n],
                asserted: vec![false; n],
            }),
            esb_shift: cfg.esb_shift,
            two_page: cfg.two_page,
            store_eoi: cfg.store_eoi,
            base_lisn: cfg.base_lisn,
        })
    }

    pub fn set_source_type(&self, srcno: u32, lsi: bool) {
        if let Some(v) = self.state.lock().lsi.get_mut(srcno as usize) {
            *v = lsi;
        }
    }

    /// Guest reset: every ESB byte returns to `OFF` and the asserted-level
    /// bitmap clears, but the LSI/MSI source-type map is preserved (§3
    /// Lifecycle).
    pub fn reset(&self) {
        let mut st = self.state.lock();
        st.esb.iter_mut().for_each(|s| *s = EsbState::Off);
        st.asserted.iter_mut().for_each(|a| *a = false);
    }

    pub fn esb_state(&self, srcno: u32) -> Option<EsbState> {
        self.state.lock().esb.get(srcno as usize).copied()
    }

    fn notify(&self, srcno: u32) {
        if let Some(f) = self.fabric.upgrade() {
            f.notify(self.base_lisn + srcno);
        }
    }

    fn do_trigger(&self, idx: usize) {
        let mut st = self.state.lock();
        let (new, fwd) = st.esb[idx].trigger();
        st.esb[idx] = new;
        drop(st);
        if fwd {
            self.notify(idx as u32);
        }
    }

    fn do_eoi(&self, idx: usize) -> bool {
        let mut st = self.state.lock();
        let (mut new_state, mut fwd) = st.esb[idx].eoi();
        if st.lsi[idx] && st.asserted[idx] {
            new_state = EsbState::Pending;
            fwd = true;
        }
        st.esb[idx] = new_state;
        drop(st);
        if fwd {
            self.notify(idx as u32);
        }
        fwd
    }

    /// External interrupt-line input: the device-model-facing entry point,
    /// distinct from the guest-facing MMIO trigger store.
    pub fn set_irq(&self, srcno: u32, level: bool) {
        let idx = srcno as usize;
        let is_lsi = match self.state.lock().lsi.get(idx).copied() {
            Some(v) => v,
            None => {
                guest_error!("set_irq: srcno {} out of range", srcno);
                return;
            }
        };
        if is_lsi {
            let mut st = self.state.lock();
            st.asserted[idx] = level;
            if level && st.esb[idx] == EsbState::Reset {
                st.esb[idx] = EsbState::Pending;
                drop(st);
                self.notify(srcno);
            }
        } else if level {
            self.do_trigger(idx);
        }
    }

    fn decode(&self, info: &BusAccessInfo) -> (usize, usize, u16) {
        let page_size = 1u64 << self.esb_shift;
        if self.two_page {
            let stride = page_size * 2;
            let idx = (info.offset / stride) as usize;
            let rem = info.offset % stride;
            (idx, (rem / page_size) as usize, (rem % page_size) as u16)
        } else {
            (
                (info.offset / page_size) as usize,
                0,
                (info.offset % page_size) as u16,
            )
        }
    }

    fn nr_irqs(&self) -> usize {
        self.state.lock().esb.len()
    }
}

const OP_TRIGGER: u8 = 0;
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

impl BusDevice for EventSource {
    fn debug_label(&self) -> String {
        "XIVE Event Source".to_owned()
    }

    fn device_id(&self) -> DeviceId {
        DeviceId(0x5856_4553) // "XVES"
    }

    fn read(&mut self, info: BusAccessInfo, data: &mut [u8]) {
        if data.len() != 8 {
            guest_error!("esb: load size {} unsupported", data.len());
            fail_load(data);
            return;
        }
        let (idx, page, sub) = self.decode(&info);
        if idx >= self.nr_irqs() {
            guest_error!("esb: srcno {} out of range", idx);
            fail_load(data);
            return;
        }
        if self.two_page && page == 0 {
            guest_error!("esb: load on trigger page is invalid");
            fail_load(data);
            return;
        }
        match op_kind(sub) {
            OP_TRIGGER => {
                guest_error!("esb: load on trigger range is invalid");
                fail_load(data);
            }
            OP_EOI => {
                let fwd = self.do_eoi(idx);
                data.copy_from_slice(&(fwd as u64).to_be_bytes());
            }
            OP_GET_PQ => {
                let v = self.state.lock().esb[idx].bits();
                data.copy_from_slice(&(u64::from(v)).to_be_bytes());
            }
            OP_GET_SET_PQ => {
                let new_bits = ((sub >> 8) & 0b11) as u8;
                let mut st = self.state.lock();
                let (old, new) = set_pq(st.esb[idx], new_bits);
                st.esb[idx] = new;
                data.copy_from_slice(&(u64::from(old.bits())).to_be_bytes());
            }
            _ => unreachable!("op_kind masked to 2 bits"),
        }
    }

    fn write(&mut self, info: BusAccessInfo, data: &[u8]) {
        if data.len() != 8 {
            guest_error!("esb: store size {} unsupported", data.len());
            return;
        }
        let (idx, page, sub) = self.decode(&info);
        if idx >= self.nr_irqs() {
            guest_error!("esb: srcno {} out of range", idx);
            return;
        }
        if self.two_page && page == 0 {
            self.do_trigger(idx);
            return;
        }
        match op_kind(sub) {
            OP_TRIGGER => self.do_trigger(idx),
            OP_EOI => {
                if self.two_page {
                    if !self.store_eoi {
                        guest_error!("esb: STORE_EOI not enabled for srcno {}", idx);
                        return;
                    }
                    self.do_eoi(idx);
                } else {
                    self.do_trigger(idx);
                }
            }
            OP_GET_PQ => guest_error!("esb: store to get-PQ range is undefined"),
            OP_GET_SET_PQ => {
                let new_bits = ((sub >> 8) & 0b11) as u8;
                let mut st = self.state.lock();
                let (_old, new) = set_pq(st.esb[idx], new_bits);
                st.esb[idx] = new;
            }
            _ => unreachable!("op_kind masked to 2 bits"),
        }
    }
}

impl Suspendable for EventSource {
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(&*self.state.lock())?)
    }

    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()> {
        *self.state.lock() = serde_json::from_value(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::xive::fabric::Fabric;

    struct RecordingFabric(StdMutex<Vec<u32>>);
    impl Fabric for RecordingFabric {
        fn notify(&self, lisn: u32) {
            self.0.lock().unwrap().push(lisn);
        }
    }

    fn new_source(two_page: bool, store_eoi: bool) -> (Arc<RecordingFabric>, EventSource) {
        let fabric = Arc::new(RecordingFabric(StdMutex::new(Vec::new())));
        let handle = Arc::downgrade(&(fabric.clone() as Arc<dyn Fabric>));
        let src = EventSource::new(
            EventSourceConfig {
                nr_irqs: 16,
                esb_shift: 12,
                two_page,
                store_eoi,
                base_lisn: 0,
            },
            handle,
        )
        .unwrap();
        (fabric, src)
    }

    fn access(offset: u64) -> BusAccessInfo {
        BusAccessInfo {
            address: offset,
            offset,
            id: 0,
        }
    }

    #[test]
    fn msi_edge_single_shot() {
        let (fabric, mut src) = new_source(false, false);
        // set PQ = 00 (reset) first.
        let mut buf = 0u64.to_be_bytes();
        src.write(access(7 * 4096 + 0xc00), &buf);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Reset);

        src.set_irq(7, true);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Pending);
        assert_eq!(fabric.0.lock().unwrap().as_slice(), &[7]);

        // coalescing: trigger again without EOI.
        src.set_irq(7, true);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Queued);
        assert_eq!(fabric.0.lock().unwrap().len(), 1, "no second forward");

        // EOI: queued -> pending, forwards.
        src.read(access(7 * 4096 + 0x400), &mut buf);
        assert_eq!(u64::from_be_bytes(buf), 1);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Pending);
        assert_eq!(fabric.0.lock().unwrap().as_slice(), &[7, 7]);
    }

    #[test]
    fn lsi_reassert_cycle() {
        let (fabric, mut src) = new_source(false, false);
        src.set_source_type(2, true);

        src.set_irq(2, true);
        assert_eq!(src.esb_state(2).unwrap(), EsbState::Pending);
        assert_eq!(fabric.0.lock().unwrap().as_slice(), &[2]);

        src.set_irq(2, false);
        let mut buf = [0u8; 8];
        src.read(access(2 * 4096 + 0x400), &mut buf);
        assert_eq!(src.esb_state(2).unwrap(), EsbState::Reset, "deasserted, no re-forward");
        assert_eq!(fabric.0.lock().unwrap().len(), 1);

        src.set_irq(2, true);
        assert_eq!(fabric.0.lock().unwrap().as_slice(), &[2, 2]);

        // still asserted: EOI keeps cycling through PENDING and forwarding.
        src.read(access(2 * 4096 + 0x400), &mut buf);
        assert_eq!(src.esb_state(2).unwrap(), EsbState::Pending);
        assert_eq!(fabric.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn load_on_trigger_range_is_invalid() {
        let (_fabric, mut src) = new_source(false, false);
        let mut buf = [0u8; 8];
        src.read(access(0), &mut buf);
        assert_eq!(buf, [0xff; 8]);
    }

    #[test]
    fn two_page_trigger_page_rejects_loads() {
        let (_fabric, mut src) = new_source(true, true);
        let mut buf = [0u8; 8];
        src.read(access(0), &mut buf);
        assert_eq!(buf, [0xff; 8]);
        src.write(access(0x400), &buf); // still the trigger page at stride 2*4096
        assert_eq!(src.esb_state(0).unwrap(), EsbState::Pending);
    }

    #[test]
    fn reset_clears_esb_but_keeps_lsi_map() {
        let (_fabric, mut src) = new_source(false, false);
        src.set_source_type(2, true);
        src.set_irq(2, true);
        assert_eq!(src.esb_state(2).unwrap(), EsbState::Pending);

        src.set_irq(7, true);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Pending);

        src.reset();

        assert_eq!(src.esb_state(2).unwrap(), EsbState::Off);
        assert_eq!(src.esb_state(7).unwrap(), EsbState::Off);
        // LSI map survives the reset: re-asserting srcno 2 still behaves as
        // an LSI source rather than falling back to edge semantics.
        assert!(src.state.lock().lsi[2]);
        assert!(!src.state.lock().lsi[7]);
    }
}
