// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Top-level driver struct tying the endpoint table, control engine, and
//! event loop to a concrete [`UsbRegs`] implementation.
//!
//! The single object an integrator instantiates: generic over the register
//! backend and the application's callback set, so the same driver runs
//! against real silicon or a host-side mock.

use crate::callbacks::UsbCallbacks;
use crate::control::ControlEngine;
use crate::endpoint::EndpointTable;
use crate::packets::StringDescriptor;
use crate::regs::UsbRegs;

/// Owns everything this crate needs beyond the register backend itself:
/// the endpoint table, control engine state, and the cached serial string
/// descriptor.
pub struct UsbDevice<R> {
    regs: R,
    endpoints: EndpointTable,
    control: ControlEngine,
    serial: Option<StringDescriptor>,
}

impl<R: UsbRegs> UsbDevice<R> {
    /// Builds a device driver around a register backend. Does not touch
    /// hardware; call [`init`](Self::init) once before use.
    pub fn new(regs: R) -> Self {
        UsbDevice {
            regs,
            endpoints: EndpointTable::new(),
            control: ControlEngine::new(),
            serial: None,
        }
    }

    /// One-shot bring-up: powers on the transceiver, lays out the PMA,
    /// clears pending interrupts, unmasks CTR/WKUP/SUSP/RESET (and SOF if
    /// `callbacks.has_in_cb()`), and connects the D+ pull-up (§6).
    pub fn init<C: UsbCallbacks>(&mut self, callbacks: &C) {
        self.regs.power_on();
        self.regs.clear_istr();
        unsafe {
            self.endpoints.write_btable();
        }
        self.regs.set_btable_offset(0);
        self.regs
            .enable_interrupts(true, true, true, true, callbacks.has_in_cb());
        self.regs.set_pullup(true);
    }

    /// One step of the event loop (§4.5). Call from the idle loop or the
    /// USB ISR, never both concurrently.
    pub fn task<C: UsbCallbacks>(&mut self, callbacks: &mut C) {
        crate::event::task(&self.regs, &mut self.endpoints, &mut self.control, callbacks);
    }

    /// Writes `data` to endpoint `ept`'s IN buffer and arms transmission.
    pub fn ep_write(&self, ept: usize, data: &[u8]) -> bool {
        self.endpoints.ep_write(&self.regs, ept, data)
    }

    /// Reads up to `buf.len()` bytes from endpoint `ept`'s OUT buffer.
    pub fn ep_read(&self, ept: usize, buf: &mut [u8]) -> u16 {
        self.endpoints.ep_read(&self.regs, ept, buf)
    }

    /// Stages a multi-packet EP0 IN reply (§4.2).
    pub fn control_in(&mut self, data: &[u8], reqlen: u16) {
        self.control.control_in(&self.regs, &self.endpoints, data, reqlen);
    }

    /// Returns the cached factory-unique-ID serial string descriptor,
    /// computing and caching it on first call.
    pub fn serial_string_descriptor(&mut self) -> &StringDescriptor {
        if self.serial.is_none() {
            self.serial = Some(unsafe { crate::serial::build_serial_descriptor() });
        }
        self.serial.as_ref().unwrap()
    }

    /// Current device state (`Default`/`Address`/`Configured`).
    pub fn state(&self) -> crate::control::DeviceState {
        self.control.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ConfigurationDescriptor, DeviceDescriptor};
    use crate::regs::mock::MockRegs;

    struct NullCallbacks {
        device: DeviceDescriptor,
        config: ConfigurationDescriptor,
    }

    impl UsbCallbacks for NullCallbacks {
        fn device_descriptor(&self) -> &DeviceDescriptor {
            &self.device
        }
        fn config_descriptor(&self) -> &ConfigurationDescriptor {
            &self.config
        }
        fn interface_descriptor(&self, _itf: u8) -> Option<&[u8]> {
            None
        }
        fn string_descriptor(&self, _lang: u16, _idx: u8) -> Option<StringDescriptor> {
            None
        }
    }

    #[test]
    fn init_powers_on_and_connects_pullup() {
        let regs = MockRegs::new();
        let mut device = UsbDevice::new(regs);
        let cb = NullCallbacks {
            device: unsafe { core::mem::zeroed() },
            config: unsafe { core::mem::zeroed() },
        };
        device.init(&cb);
        assert!(device.regs.powered_on.get());
        assert!(device.regs.pullup.get());
    }

    #[test]
    fn disabled_endpoint_write_fails_through_device() {
        let regs = MockRegs::new();
        let device = UsbDevice::new(regs);
        assert!(!device.ep_write(5, &[1, 2, 3]));
    }
}
