// Board-independent core of inkmate (e-paper companion, ESP32-C3)
//
// Everything here is generic over embedded-hal traits and takes time as
// millisecond ticks, so it builds and tests on the host. The firmware
// crate at the workspace root wires it to esp-hal and embassy tasks.

#![cfg_attr(not(test), no_std)]

pub mod apps;
pub mod config;
pub mod display;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod retained;
pub mod ui;
pub mod wake;

pub use error::{Error, Result};
