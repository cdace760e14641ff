// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Router (IVRE): LISN -> IVE -> EQ dispatch, with pluggable descriptor
//! storage so a platform can back the three tables however it likes.

use std::sync::Arc;
use std::sync::Weak;

use data_model::Be32;
use serde::Deserialize;
use serde::Serialize;
use sync::Mutex;
use vm_memory::GuestAddress;
use vm_memory::GuestMemory;

use crate::bus::Suspendable;
use crate::xive::error::guest_error;
use crate::xive::eq::Eq;
use crate::xive::esb::EsbState;
use crate::xive::fabric::Fabric;
use crate::xive::ive::Ive;
use crate::xive::presenter::DispatchOutcome;
use crate::xive::presenter::Presenter;
use crate::xive::tctx::bit_for_priority;
use crate::xive::vp::Vp;

/// Pluggable backing store for the three descriptor tables. The core only
/// defines dispatch; a concrete platform can walk guest-resident tables via
/// DMA, keep cached mirrors, or (as `InMemoryRouterStorage` does) just hold
/// plain in-process arrays.
pub trait RouterStorage: Send {
    fn get_ive(&self, lisn: u32) -> Option<Ive>;
    fn get_eq(&self, eq_blk: u8, eq_idx: u32) -> Option<Eq>;
    fn set_eq(&mut self, eq_blk: u8, eq_idx: u32, eq: Eq);
    fn get_vp(&self, vp_blk: u8, vp_idx: u32) -> Option<Vp>;
    fn set_vp(&mut self, vp_blk: u8, vp_idx: u32, vp: Vp);

    /// Guest reset: every EQ's `ESn`/`ESe` ESB pair returns to `OFF` (§3
    /// Lifecycle); nothing else about the IVE/EQ/VP tables is touched. The
    /// default is a no-op for storage backends with nothing ESB-shaped to
    /// reset (e.g. a guest-resident table the Router only ever reads via DMA).
    fn reset_esb(&mut self) {}
}

/// Default storage: flat in-memory arrays indexed by `(block, index)`,
/// addressed through a single block (`block == 0`) unless constructed wider.
#[derive(Default)]
pub struct InMemoryRouterStorage {
    ive: Vec<Option<Ive>>,
    eq: std::collections::HashMap<(u8, u32), Eq>,
    vp: std::collections::HashMap<(u8, u32), Vp>,
}

impl InMemoryRouterStorage {
    pub fn new(nr_lisns: u32) -> Self {
        InMemoryRouterStorage {
            ive: vec![None; nr_lisns as usize],
            eq: Default::default(),
            vp: Default::default(),
        }
    }

    pub fn set_ive(&mut self, lisn: u32, ive: Ive) {
        if let Some(slot) = self.ive.get_mut(lisn as usize) {
            *slot = Some(ive);
        }
    }
}

impl RouterStorage for InMemoryRouterStorage {
    fn get_ive(&self, lisn: u32) -> Option<Ive> {
        self.ive.get(lisn as usize).copied().flatten()
    }

    fn get_eq(&self, eq_blk: u8, eq_idx: u32) -> Option<Eq> {
        self.eq.get(&(eq_blk, eq_idx)).copied()
    }

    fn set_eq(&mut self, eq_blk: u8, eq_idx: u32, eq: Eq) {
        self.eq.insert((eq_blk, eq_idx), eq);
    }

    fn get_vp(&self, vp_blk: u8, vp_idx: u32) -> Option<Vp> {
        self.vp.get(&(vp_blk, vp_idx)).copied()
    }

    fn set_vp(&mut self, vp_blk: u8, vp_idx: u32, vp: Vp) {
        self.vp.insert((vp_blk, vp_idx), vp);
    }

    fn reset_esb(&mut self) {
        for eq in self.eq.values_mut() {
            eq.w1.set_esn(u32::from(EsbState::Off.bits()));
            eq.w1.set_ese(u32::from(EsbState::Off.bits()));
        }
    }
}

/// Plain-data mirror of `InMemoryRouterStorage` for snapshotting. The real
/// struct's `HashMap<(u8, u32), _>` keys don't serialize to JSON object keys
/// (serde_json requires string keys), so the snapshot flattens each map to a
/// `Vec` of entries instead.
#[derive(Serialize, Deserialize)]
struct InMemoryRouterStorageSnapshot {
    ive: Vec<Option<Ive>>,
    eq: Vec<((u8, u32), Eq)>,
    vp: Vec<((u8, u32), Vp)>,
}

impl Suspendable for InMemoryRouterStorage {
    fn snapshot(&mut self) -> anyhow::Result<serde_json::Value> {
        let snap = InMemoryRouterStorageSnapshot {
            ive: self.ive.clone(),
            eq: self.eq.iter().map(|(k, v)| (*k, *v)).collect(),
            vp: self.vp.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        Ok(serde_json::to_value(snap)?)
    }

    fn restore(&mut self, data: serde_json::Value) -> anyhow::Result<()> {
        let snap: InMemoryRouterStorageSnapshot = serde_json::from_value(data)?;
        self.ive = snap.ive;
        self.eq = snap.eq.into_iter().collect();
        self.vp = snap.vp.into_iter().collect();
        Ok(())
    }
}

pub struct Router {
    storage: Mutex<Box<dyn RouterStorage>>,
    memory: GuestMemory,
    presenter: Arc<Presenter>,
}

impl Router {
    pub fn new(
        storage: Box<dyn RouterStorage>,
        memory: GuestMemory,
        presenter: Arc<Presenter>,
    ) -> Self {
        Router {
            storage: Mutex::new(storage),
            memory,
            presenter,
        }
    }

    pub fn with_storage<R>(&self, f: impl FnOnce(&mut dyn RouterStorage) -> R) -> R {
        f(&mut **self.storage.lock())
    }

    /// Guest reset: every EQ's `ESn`/`ESe` pair returns to `OFF` (§3
    /// Lifecycle), via the storage backend's own `reset_esb`.
    pub fn reset(&self) {
        self.with_storage(|s| s.reset_esb());
    }

    pub fn eq_notify(&self, eq_blk: u8, eq_idx: u32, data: u32) {
        let mut eq = match self.with_storage(|s| s.get_eq(eq_blk, eq_idx)) {
            Some(eq) if eq.w0.get_valid() => eq,
            _ => {
                guest_error!("router: eq_notify to invalid EQ ({}, {})", eq_blk, eq_idx);
                return;
            }
        };

        if eq.w0.get_enqueue() {
            let entry: u32 = (u32::from(eq.generation()) << 31) | (data & 0x7fff_ffff);
            let offset = eq.advance();
            let addr = GuestAddress(eq.qaddr_base().wrapping_add(offset));
            if let Err(e) = self.memory.write_obj_at_addr(Be32::from(entry), addr) {
                guest_error!("router: EQ push DMA failed at {:#x}: {}", addr.0, e);
                return;
            }
            self.with_storage(|s| s.set_eq(eq_blk, eq_idx, eq));
        }

        if !eq.w0.get_ucond_notify() {
            let (new_esn, fwd) = eq.esn().trigger();
            eq.set_esn(new_esn);
            self.with_storage(|s| s.set_eq(eq_blk, eq_idx, eq));
            if !fwd {
                return;
            }
        }

        let format = eq.format();
        let priority = eq.priority();
        if format == 0 && priority == 0xff {
            return; // EQ masked.
        }

        let vp_blk = eq.nvt_block();
        let vp_idx = eq.nvt_index();
        let outcome = self.presenter.dispatch(
            format,
            vp_blk,
            vp_idx,
            eq.ignore(),
            priority,
            eq.log_server_id(),
        );
        if let DispatchOutcome::Backlog { priority } = outcome {
            self.with_storage(|s| {
                let mut vp = s.get_vp(vp_blk, vp_idx).unwrap_or_default();
                vp.w4_backlog_ipb |= bit_for_priority(priority);
                s.set_vp(vp_blk, vp_idx, vp);
            });
        }
    }
}

impl Fabric for Router {
    fn notify(&self, lisn: u32) {
        let ive = match self.with_storage(|s| s.get_ive(lisn)) {
            Some(ive) if ive.valid => ive,
            _ => {
                guest_error!("router: notify on invalid/unconfigured LISN {}", lisn);
                return;
            }
        };
        if ive.masked {
            return;
        }
        self.eq_notify(ive.eq_block, ive.eq_index, ive.eq_data);
    }
}

/// Weak handle to a `Router`, for an `EventSource` to hold as its `Fabric`.
pub type RouterHandle = Weak<Router>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xive::fabric::ThreadContextRegistry;
    use crate::xive::tctx::ThreadContext;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    struct TestLine(AtomicBool);
    impl crate::xive::fabric::IrqLine for TestLine {
        fn set_level(&self, asserted: bool) {
            self.0.store(asserted, Ordering::SeqCst);
        }
    }

    #[test]
    fn msi_edge_pushes_queue_entry_and_dispatches() {
        let memory = GuestMemory::new(&[(GuestAddress(0x1000_0000), 0x10000)]).unwrap();

        let registry = Arc::new(ThreadContextRegistry::new());
        let line = Arc::new(TestLine(AtomicBool::new(false)));
        let tctx = Arc::new(Mutex::new(ThreadContext::new(line.clone())));
        tctx.lock().reset(0, 5);
        registry.register(tctx.clone());

        let presenter = Arc::new(Presenter::new(registry));

        let mut storage = InMemoryRouterStorage::new(16);
        storage.set_ive(7, Ive::new(0, 3, 0xABCD));
        let mut eq = Eq::default();
        eq.w0.set_valid(true);
        eq.w0.set_enqueue(true);
        eq.w0.set_ucond_notify(true);
        eq.w0.set_qsize(0);
        eq.w2_addr_hi = 0;
        eq.w3_addr_lo = 0x1000_0000;
        eq.w6.set_nvt_index(5);
        eq.w7 = 4; // priority 4, ignore=0
        storage.set_eq(0, 3, eq);

        let router = Arc::new(Router::new(Box::new(storage), memory.clone(), presenter));
        let fabric: Arc<dyn Fabric> = router.clone();
        fabric.notify(7);

        let word: u32 = memory.read_obj_from_addr(GuestAddress(0x1000_0000)).unwrap();
        assert_eq!(u32::from_be(word), 0x8000_ABCD);

        let eq_after = router.with_storage(|s| s.get_eq(0, 3)).unwrap();
        assert_eq!(eq_after.qindex(), 1);
        assert!(!eq_after.generation());

        let os = tctx.lock();
        assert_eq!(os.ring(crate::xive::tctx::Ring::Os).ipb, 0x08);
        assert_eq!(os.ring(crate::xive::tctx::Ring::Os).pipr, 4);
        assert!(line.0.load(Ordering::SeqCst));
    }

    #[test]
    fn in_memory_storage_snapshot_round_trips() {
        let mut storage = InMemoryRouterStorage::new(4);
        storage.set_ive(2, Ive::new(1, 9, 0x42));
        storage.set_eq(1, 9, {
            let mut eq = Eq::default();
            eq.w7 = 3;
            eq
        });
        storage.set_vp(1, 9, Vp::new());

        let snap = storage.snapshot().unwrap();

        let mut restored = InMemoryRouterStorage::new(4);
        restored.restore(snap).unwrap();

        assert_eq!(restored.get_ive(2), storage.get_ive(2));
        assert_eq!(restored.get_eq(1, 9).unwrap().w7, 3);
        assert_eq!(restored.get_vp(1, 9), storage.get_vp(1, 9));
    }

    #[test]
    fn reset_clears_eq_esb_pair_but_keeps_other_eq_state() {
        let mut storage = InMemoryRouterStorage::new(1);
        let mut eq = Eq::default();
        eq.w7 = 9;
        eq.set_esn(EsbState::Queued);
        eq.w1.set_ese(u32::from(EsbState::Pending.bits()));
        storage.set_eq(0, 0, eq);

        let registry = Arc::new(ThreadContextRegistry::new());
        let presenter = Arc::new(Presenter::new(registry));
        let memory = GuestMemory::new(&[]).unwrap();
        let router = Router::new(Box::new(storage), memory, presenter);
        router.reset();

        let after = router.with_storage(|s| s.get_eq(0, 0)).unwrap();
        assert_eq!(after.esn(), EsbState::Off);
        assert_eq!(EsbState::from_bits(after.w1.get_ese() as u8), EsbState::Off);
        assert_eq!(after.w7, 9, "reset only touches the ESn/ESe ESB pair");
    }
}
