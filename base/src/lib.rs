// Copyright 2020 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Thin facade crate that every device crate in this codebase depends on
//! for operational diagnostics.
//!
//! The full `base` crate also wraps platform descriptors, event objects,
//! shared memory and the like; none of that surface is exercised here, so
//! this build only carries the one thing every device actually reaches for:
//! the `log` crate's macros, re-exported so call sites write `base::warn!`
//! rather than depending on `log` directly.

pub use log::*;
