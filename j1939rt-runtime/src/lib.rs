// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

//! Module lifecycle and runtime orchestrator.
//!
//! [`Runtime`] owns the message bus, the scheduler, the virtual CAN port
//! and the Transport Protocol engine, and drives the [`Module`] lifecycle
//! (`on_init` → `on_start` → `on_stop`) over whatever modules are
//! registered with it. Modules never see the port or the TP engine
//! directly — only the bus topics [`bridge::wire`] publishes to and
//! consumes from.

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod module;
pub mod runtime;

pub use bridge::J1939Tx;
pub use config::{CanConfig, Config, Configurable, GlobalConfig, J1939Config, SimulatorConfig};
pub use error::Error;
pub use health::{Health, Heartbeat};
pub use module::{Module, ModuleContext};
pub use runtime::Runtime;
