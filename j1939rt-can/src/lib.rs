// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! CAN port abstraction and the in-memory virtual bus.
//!
//! The native, platform-specific raw CAN driver (SocketCAN) is out of
//! scope for this crate: only the [`CanPort`] trait and the
//! [`VirtualBus`]/[`VirtualPort`] loopback implementation used for
//! simulation and testing are provided. A real deployment would select a
//! backend (virtual vs. native) behind a small dispatch enum at the
//! runtime layer; see `j1939rt-runtime`.

pub mod bus;
pub mod error;
pub mod filter;
pub mod port;

pub use bus::{VirtualBus, VirtualPort};
pub use error::Error;
pub use filter::CANFilter;
pub use port::{CanPort, FrameHandler};
