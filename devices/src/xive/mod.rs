// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! XIVE: the POWER9-class external interrupt virtualization engine.
//!
//! Four collaborating pieces, each an independently lockable device in this
//! codebase's usual sense (see `sync::Mutex` discipline in each module):
//! [`event_source`] (IVSE) turns IRQ lines into ESB transitions and Fabric
//! notifications, [`router`] (IVRE) walks LISN -> IVE -> EQ and pushes queue
//! entries, [`presenter`] (IVPE) matches a notification against dispatched
//! thread contexts, and [`tctx`] holds the per-CPU register bank the guest
//! reaches through the TIMA. [`eq_esb`] is a second, smaller MMIO-facing
//! device exposing each EQ's own ESB pair.
//!
//! Locking order across a single notification chain is always
//! source -> router -> presenter -> thread-context; see the module docs on
//! `fabric` for the collaborator interfaces this crate consumes but does not
//! own.

pub mod eq;
pub mod eq_esb;
pub mod error;
pub mod esb;
pub mod event_source;
pub mod fabric;
pub mod ive;
pub mod presenter;
pub mod router;
pub mod tctx;
pub mod vp;

pub use eq::Eq;
pub use eq_esb::EqEsbSource;
pub use eq_esb::EqEsbSourceConfig;
pub use error::XiveConfigError;
pub use esb::EsbState;
pub use event_source::EventSource;
pub use event_source::EventSourceConfig;
pub use fabric::Fabric;
pub use fabric::FabricHandle;
pub use fabric::IrqLine;
pub use fabric::ThreadContextRegistry;
pub use ive::Ive;
pub use presenter::DispatchOutcome;
pub use presenter::Presenter;
pub use router::InMemoryRouterStorage;
pub use router::Router;
pub use router::RouterStorage;
pub use tctx::ipb_to_pipr;
pub use tctx::Ring;
pub use tctx::Tima;
pub use tctx::ThreadContext;
pub use tctx::MAX_PRIORITY;
pub use vp::Vp;
