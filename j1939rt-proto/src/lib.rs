// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! J1939 frame type, 29-bit identifier codec and PGN dictionary.
//!
//! This crate implements the wire-level building blocks: the [`CANFrame`]
//! record, the bidirectional mapping between a 29-bit extended CAN
//! identifier and its J1939 fields, and a small static dictionary of known
//! Parameter Groups.

pub mod error;
pub mod frame;
pub mod id;
pub mod pgn;

pub use error::Error;
pub use frame::CANFrame;
pub use id::{build, parse, BuildJ1939Id, ParsedJ1939Id, ADDRESS_GLOBAL, PGN_MAX};
pub use pgn::{decode, lookup, DecodedMessage, PGNInfo};

/// PGN of the Request message.
pub const PGN_REQUEST: u32 = 0xEA00;
/// PGN of the Transport Protocol connection-management frame.
pub const PGN_TP_CM: u32 = 0xEC00;
/// PGN of the Transport Protocol data-transfer frame.
pub const PGN_TP_DT: u32 = 0xEB00;
/// PGN of the Address Claimed message.
pub const PGN_ADDRESS_CLAIMED: u32 = 0xEE00;
