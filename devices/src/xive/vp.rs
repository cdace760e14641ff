// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Virtual Processor descriptor. Only `w0.VALID` and the `w4` backlog
//! IPB are in scope; everything else a real VP descriptor carries (escalation
//! targets, priority masks) belongs to the escalation-delivery non-goal.

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Vp {
    pub valid: bool,
    /// Backlog IPB, set when the Presenter finds no dispatched thread to
    /// deliver to and must remember the pending priority on the VP itself.
    pub w4_backlog_ipb: u8,
}

impl Vp {
    pub fn new() -> Self {
        Vp {
            valid: true,
            w4_backlog_ipb: 0,
        }
    }
}
