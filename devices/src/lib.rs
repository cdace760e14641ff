// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Emulates the POWER9-class XIVE external interrupt virtualization engine.

pub mod bus;
pub mod xive;

pub use self::bus::BusAccessInfo;
pub use self::bus::BusDevice;
pub use self::bus::DeviceId;
pub use self::bus::Suspendable;
