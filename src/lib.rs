// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Bare-metal USB Full-Speed device core for microcontrollers whose USB
//! peripheral exposes a per-endpoint register (`EPnR`) and a dedicated
//! Packet Memory Area SRAM addressed through a buffer-descriptor table
//! (the STM32F0/F1/F3-family USB peripheral, among others).
//!
//! This crate owns PMA layout, the endpoint-0 control transfer protocol,
//! and the toggle-write register discipline those peripherals require; it
//! does not own clocking, interrupt wiring, or descriptor content, all of
//! which are supplied by the application through [`callbacks::UsbCallbacks`]
//! and a concrete [`regs::UsbRegs`] implementation.

#![cfg_attr(not(test), no_std)]

pub mod callbacks;
pub mod config;
pub mod control;
pub mod device;
pub mod endpoint;
pub mod event;
pub mod packets;
pub mod pma;
pub mod regs;
pub mod serial;

pub use callbacks::{ControlRequest, UsbCallbacks};
pub use control::DeviceState;
pub use device::UsbDevice;
pub use regs::UsbRegs;
