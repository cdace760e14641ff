// Copyright 2017 The Chromium OS Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest physical memory: addresses and the byte storage they resolve to.

mod guest_address;
mod guest_memory;

pub use guest_address::GuestAddress;
pub use guest_memory::Error;
pub use guest_memory::GuestMemory;
pub use guest_memory::Result;
