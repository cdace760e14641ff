// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The collaborator interfaces the XIVE core consumes but does not own: the
//! notification sink every `EventSource` forwards into, the per-CPU IRQ
//! output line, and the registry the Presenter uses to enumerate thread
//! contexts. All three are owned by the surrounding machine model, which is
//! out of scope here (see `SPEC_FULL.md` section 1).

use std::sync::Arc;
use std::sync::Weak;

use sync::Mutex;

use crate::xive::tctx::ThreadContext;

/// The process-wide notification sink shared by every `EventSource`. In this
/// crate, `Router` is the only implementation: an `EventSource` forwarding a
/// LISN is exactly the Router's `notify` entry point from spec section 4.4.
pub trait Fabric: Send + Sync {
    fn notify(&self, lisn: u32);
}

/// A reference to the shared `Fabric`, held non-owning as spec section 5
/// requires ("each IVSE holds a weak reference to it").
pub type FabricHandle = Weak<dyn Fabric>;

/// The per-CPU output line a `ThreadContext` raises and lowers. Asserting is
/// idempotent; the surrounding CPU model owns the actual signal (an irqfd, a
/// KVM IRQ line, ...) and is reached only through this trait.
pub trait IrqLine: Send + Sync {
    fn set_level(&self, asserted: bool);
}

/// Registry CPUs use to publish their `ThreadContext` so the Presenter can
/// enumerate it during a match. Registration/removal happen at CPU
/// construction/teardown; the Presenter never owns what it scans.
#[derive(Default)]
pub struct ThreadContextRegistry {
    contexts: Mutex<Vec<Arc<Mutex<ThreadContext>>>>,
}

impl ThreadContextRegistry {
    pub fn new() -> Self {
        ThreadContextRegistry::default()
    }

    pub fn register(&self, tctx: Arc<Mutex<ThreadContext>>) {
        self.contexts.lock().push(tctx);
    }

    pub fn unregister(&self, tctx: &Arc<Mutex<ThreadContext>>) {
        self.contexts.lock().retain(|t| !Arc::ptr_eq(t, tctx));
    }

    /// Snapshot of the currently registered contexts, for the Presenter to
    /// scan. Cloning the `Arc`s keeps this call outside the registry's own
    /// lock for the duration of the scan, matching the fixed lock order
    /// documented in `SPEC_FULL.md` section 5.
    pub fn snapshot(&self) -> Vec<Arc<Mutex<ThreadContext>>> {
        self.contexts.lock().clone()
    }
}
