// inkmate firmware (ESP32-C3 + SSD1681 e-paper)
//
// Board support, the orchestrator's platform services and the embassy
// tasks. Everything board-independent lives in inkmate-kernel.

#![no_std]

pub mod board;
pub mod platform;
pub mod tasks;
