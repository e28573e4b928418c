// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Application capability table.
//!
//! A trait with default no-op/`None` implementations lets the core call
//! every hook unconditionally, with no runtime presence checks needed.
//! Descriptor accessors are required (no sensible device omits them);
//! everything else defaults to absent.

use crate::packets::{ConfigurationDescriptor, DeviceDescriptor, StringDescriptor};

/// A standard, class, or vendor control request forwarded to the
/// application by the control engine when it cannot be handled internally.
#[derive(Clone, Copy)]
pub struct ControlRequest {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

/// Application-supplied descriptors and event hooks.
///
/// Only [`device_descriptor`](UsbCallbacks::device_descriptor),
/// [`config_descriptor`](UsbCallbacks::config_descriptor),
/// [`interface_descriptor`](UsbCallbacks::interface_descriptor), and
/// [`string_descriptor`](UsbCallbacks::string_descriptor) must be
/// implemented; every other method is optional and defaults to a no-op or
/// `None`/`false`.
pub trait UsbCallbacks {
    /// The device descriptor. Always present.
    fn device_descriptor(&self) -> &DeviceDescriptor;

    /// The (sole) configuration descriptor. Always present.
    fn config_descriptor(&self) -> &ConfigurationDescriptor;

    /// Bytes of the interface descriptor block for interface `itf`, or
    /// `None` if `itf` does not exist.
    fn interface_descriptor(&self, itf: u8) -> Option<&[u8]>;

    /// A string descriptor for language `lang` and index `idx`, or `None`.
    fn string_descriptor(&self, lang: u16, idx: u8) -> Option<StringDescriptor>;

    /// Invoked around a bus reset, once with `before = true` before internal
    /// state is cleared and once with `before = false` after EP0 is
    /// re-armed.
    fn reset_hook(&mut self, _before: bool) {}

    /// Invoked when a SET_ADDRESS request stashes a new pending address.
    fn set_address_hook(&mut self, _addr: u8) {}

    /// Invoked when the peripheral is placed into low-power suspend.
    fn suspend_hook(&mut self) {}

    /// Invoked on wakeup from suspend.
    fn resume_hook(&mut self) {}

    /// Invoked when endpoint `ept`'s OUT direction completes a reception;
    /// the application is expected to call `ep_read` to drain it.
    fn out_cb(&mut self, _ept: u8) {}

    /// Invoked from the SOF round-robin when endpoint `ept`'s IN direction
    /// is ready to accept new data (`STAT_TX == NAK`). Returning `true`
    /// unmasks SOF interrupts in `init`; if this is never overridden SOF
    /// stays masked.
    fn in_cb(&mut self, _ept: u8) {}

    /// Whether an IN callback is meaningfully implemented; decides whether
    /// `init` unmasks SOF. Override alongside [`in_cb`](Self::in_cb).
    fn has_in_cb(&self) -> bool {
        false
    }

    /// Class request (`bmRequestType` type field == Class); returns `true`
    /// if handled (status stage should proceed) or `false` to STALL.
    fn class_request(&mut self, _req: ControlRequest) -> bool {
        false
    }

    /// Vendor request (`bmRequestType` type field == Vendor); same contract
    /// as [`class_request`](Self::class_request).
    fn vendor_request(&mut self, _req: ControlRequest) -> bool {
        false
    }

    /// GET_DESCRIPTOR with Interface recipient; returns `true` if the
    /// application wrote a reply via `control_in` itself.
    fn get_descriptor_interface(&mut self, _req: ControlRequest) -> bool {
        false
    }
}
