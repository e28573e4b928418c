// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Control Engine: SETUP parsing, standard request dispatch, device state.
//!
//! Owns the full standard-request table and the multi-packet control-IN
//! staging buffer, driven against the application-supplied descriptor
//! callbacks of [`crate::callbacks::UsbCallbacks`].

use crate::callbacks::{ControlRequest, UsbCallbacks};
use crate::endpoint::EndpointTable;
use crate::packets::{
    DescriptorType, SetupDirection, SetupPacket, SetupRecipient, SetupType, StandardRequest,
    ToBytes, FEATURE_ENDPOINT_HALT,
};
use crate::regs::UsbRegs;

/// Capacity of the owned control-IN staging buffer. Large enough for every
/// descriptor this crate assembles (device, or configuration + one
/// interface's worth of endpoint descriptors); GET_DESCRIPTOR replies longer
/// than this are truncated to this length before the requested/available
/// length clamp is applied.
const CONTROL_IN_BUF_SIZE: usize = 256;

/// Device state machine (§4.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceState {
    Default,
    Address,
    Configured,
}

struct ControlInContinuation {
    offset: usize,
    remaining: usize,
}

/// Owns device state, the pending-address latch, and the control-IN
/// continuation. One instance per device; reset on every bus reset.
pub struct ControlEngine {
    state: DeviceState,
    pending_address: Option<u8>,
    continuation: Option<ControlInContinuation>,
    buf: [u8; CONTROL_IN_BUF_SIZE],
    config_value: u8,
}

impl ControlEngine {
    pub fn new() -> Self {
        ControlEngine {
            state: DeviceState::Default,
            pending_address: None,
            continuation: None,
            buf: [0u8; CONTROL_IN_BUF_SIZE],
            config_value: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Resets device state to its power-on values. Called by the event loop
    /// on BUS_RESET, between the `before`/`after` reset hooks.
    pub fn reset(&mut self) {
        self.state = DeviceState::Default;
        self.pending_address = None;
        self.continuation = None;
        self.config_value = 0;
    }

    /// Stages `total = min(reqlen, data.len())` bytes of `data` for
    /// transmission on EP0, sending the first packet immediately and
    /// keeping the remainder (if any) in the owned continuation buffer.
    pub fn control_in<R: UsbRegs>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        data: &[u8],
        reqlen: u16,
    ) {
        let total = (reqlen as usize).min(data.len()).min(CONTROL_IN_BUF_SIZE);
        self.buf[..total].copy_from_slice(&data[..total]);

        let first = total.min(64);
        endpoints.ep_write(regs, 0, &self.buf[..first]);

        if total > first {
            self.continuation = Some(ControlInContinuation {
                offset: first,
                remaining: total - first,
            });
        } else {
            self.continuation = None;
        }
    }

    /// Drains the next 64-byte chunk of a pending control-IN continuation,
    /// if any. No-op if there is nothing pending.
    fn control_in_resume<R: UsbRegs>(&mut self, regs: &R, endpoints: &EndpointTable) {
        if let Some(cont) = &self.continuation {
            let offset = cont.offset;
            let chunk = cont.remaining.min(64);
            endpoints.ep_write(regs, 0, &self.buf[offset..offset + chunk]);
            if cont.remaining == chunk {
                self.continuation = None;
            } else {
                self.continuation = Some(ControlInContinuation {
                    offset: offset + chunk,
                    remaining: cont.remaining - chunk,
                });
            }
        }
    }

    /// Called on every EP0 CTR_TX (an IN transaction on EP0 completed):
    /// applies a deferred SET_ADDRESS, then resumes any pending multi-packet
    /// reply (§4.4 "Address latch rule").
    pub fn on_ep0_tx_complete<R: UsbRegs>(&mut self, regs: &R, endpoints: &EndpointTable) {
        if let Some(addr) = self.pending_address.take() {
            regs.set_address(true, addr);
            if self.state == DeviceState::Default {
                self.state = DeviceState::Address;
            }
        }
        self.control_in_resume(regs, endpoints);
    }

    /// Called on EP0 CTR_RX+SETUP: parses the 8-byte SETUP packet and
    /// dispatches it (§4.4).
    pub fn on_setup<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &mut C,
        raw: &[u8; 8],
    ) {
        let setup = SetupPacket::parse(raw);
        let handled = match setup.setup_type() {
            SetupType::Class => {
                let req = to_control_request(&setup);
                callbacks.class_request(req)
            }
            SetupType::Vendor => {
                let req = to_control_request(&setup);
                callbacks.vendor_request(req)
            }
            SetupType::Standard => self.dispatch_standard(regs, endpoints, callbacks, &setup),
            SetupType::Reserved => false,
        };

        if handled {
            if setup.direction() == SetupDirection::HostToDevice {
                endpoints.ep_write(regs, 0, &[]);
            }
        } else {
            endpoints.stall(regs, 0, true);
            endpoints.stall(regs, 0, false);
        }
    }

    fn dispatch_standard<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &mut C,
        setup: &SetupPacket,
    ) -> bool {
        let request = match setup.standard_request() {
            Some(r) => r,
            None => return false,
        };
        let recipient = setup.recipient();

        match request {
            StandardRequest::GetStatus => self.get_status(regs, endpoints, callbacks, setup, recipient),
            StandardRequest::ClearFeature => {
                self.set_feature(regs, endpoints, setup, recipient, false)
            }
            StandardRequest::SetFeature => {
                self.set_feature(regs, endpoints, setup, recipient, true)
            }
            StandardRequest::SetAddress => self.set_address(setup, recipient),
            StandardRequest::GetDescriptor => {
                self.get_descriptor(regs, endpoints, callbacks, setup, recipient)
            }
            StandardRequest::GetConfiguration => {
                self.get_configuration(regs, endpoints, setup, recipient)
            }
            StandardRequest::SetConfiguration => {
                self.set_configuration(regs, endpoints, callbacks, setup, recipient)
            }
            StandardRequest::GetInterface => {
                self.get_interface(regs, endpoints, callbacks, setup, recipient)
            }
            StandardRequest::SetInterface => self.set_interface(setup, recipient, callbacks),
            StandardRequest::SetDescriptor | StandardRequest::SynchFrame => false,
        }
    }

    fn get_status<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &C,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
    ) -> bool {
        if setup.direction() != SetupDirection::DeviceToHost {
            return false;
        }
        if self.state != DeviceState::Configured {
            return false;
        }
        match recipient {
            Some(SetupRecipient::Device) => {
                let self_powered = callbacks.config_descriptor().bmAttributes & 0x40 != 0;
                let data = [self_powered as u8, 0u8];
                self.control_in(regs, endpoints, &data, setup.wLength);
                true
            }
            Some(SetupRecipient::Interface) => {
                if callbacks.interface_descriptor(setup.wIndex as u8).is_none() {
                    return false;
                }
                let data = [0u8, 0u8];
                self.control_in(regs, endpoints, &data, setup.wLength);
                true
            }
            Some(SetupRecipient::Endpoint) => {
                let ep = setup.endpoint_number() as usize;
                if ep >= 8 {
                    return false;
                }
                let halted = endpoints.is_halted(regs, ep, setup.endpoint_is_in());
                let data = [halted as u8, 0u8];
                self.control_in(regs, endpoints, &data, setup.wLength);
                true
            }
            _ => false,
        }
    }

    fn set_feature<R: UsbRegs>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
        stall_on: bool,
    ) -> bool {
        if setup.direction() != SetupDirection::HostToDevice {
            return false;
        }
        if self.state != DeviceState::Configured {
            return false;
        }
        if recipient != Some(SetupRecipient::Endpoint) {
            return false;
        }
        if setup.wValue != FEATURE_ENDPOINT_HALT {
            return false;
        }
        let ep = setup.endpoint_number() as usize;
        if ep == 0 || ep >= 8 {
            return false;
        }
        let slot = endpoints.slot(ep);
        let is_in = setup.endpoint_is_in();
        if (is_in && slot.size_in == 0) || (!is_in && slot.size_out == 0) {
            return false;
        }
        if stall_on {
            endpoints.stall(regs, ep, is_in);
        } else {
            endpoints.clear_halt(regs, ep, is_in);
        }
        true
    }

    fn set_address(&mut self, setup: &SetupPacket, recipient: Option<SetupRecipient>) -> bool {
        if setup.direction() != SetupDirection::HostToDevice {
            return false;
        }
        if recipient != Some(SetupRecipient::Device) {
            return false;
        }
        let addr = (setup.wValue & 0x7f) as u8;
        if addr == 0 && self.state == DeviceState::Default {
            return true;
        }
        self.pending_address = Some(addr);
        true
    }

    fn get_descriptor<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &mut C,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
    ) -> bool {
        if setup.direction() != SetupDirection::DeviceToHost {
            return false;
        }
        match recipient {
            Some(SetupRecipient::Interface) => {
                let req = to_control_request(setup);
                return callbacks.get_descriptor_interface(req);
            }
            Some(SetupRecipient::Device) => {}
            _ => return false,
        }

        match setup.descriptor_type() {
            Some(DescriptorType::Device) => {
                let desc = callbacks.device_descriptor();
                let n = (desc.bLength as u16).min(setup.wLength) as usize;
                let bytes = desc.to_bytes();
                self.control_in(regs, endpoints, &bytes[..n], setup.wLength);
                true
            }
            Some(DescriptorType::Configuration) => {
                let mut buf = [0u8; CONTROL_IN_BUF_SIZE];
                let mut n = 0;
                let cfg = callbacks.config_descriptor();
                let cfg_bytes = cfg.to_bytes();
                buf[n..n + cfg_bytes.len()].copy_from_slice(cfg_bytes);
                n += cfg_bytes.len();
                if let Some(itf) = callbacks.interface_descriptor(0) {
                    let take = itf.len().min(CONTROL_IN_BUF_SIZE - n);
                    buf[n..n + take].copy_from_slice(&itf[..take]);
                    n += take;
                }
                let total = (cfg.wTotalLength as usize).min(n);
                self.control_in(regs, endpoints, &buf[..total], setup.wLength);
                true
            }
            Some(DescriptorType::String) => {
                let lang = setup.wIndex;
                let idx = setup.descriptor_index();
                match callbacks.string_descriptor(lang, idx) {
                    Some(desc) => {
                        let bytes = desc.as_bytes();
                        self.control_in(regs, endpoints, bytes, setup.wLength);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn get_configuration<R: UsbRegs>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
    ) -> bool {
        if setup.direction() != SetupDirection::DeviceToHost {
            return false;
        }
        if recipient != Some(SetupRecipient::Device) {
            return false;
        }
        let value = if self.state == DeviceState::Configured {
            self.config_value
        } else {
            0
        };
        self.control_in(regs, endpoints, &[value], setup.wLength);
        true
    }

    fn set_configuration<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &C,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
    ) -> bool {
        if setup.direction() != SetupDirection::HostToDevice {
            return false;
        }
        if recipient != Some(SetupRecipient::Device) {
            return false;
        }
        if self.state == DeviceState::Default {
            return false;
        }
        let value = (setup.wValue & 0xff) as u8;
        let configured_value = callbacks.config_descriptor().bConfigurationValue;
        if value == 0 {
            for ep in 1..8 {
                endpoints.disable(regs, ep);
            }
            self.state = DeviceState::Address;
            self.config_value = 0;
            true
        } else if value == configured_value {
            for ep in 1..8 {
                if endpoints.slot(ep).size_in > 0 || endpoints.slot(ep).size_out > 0 {
                    endpoints.configure(regs, ep);
                }
            }
            self.state = DeviceState::Configured;
            self.config_value = value;
            true
        } else {
            false
        }
    }

    fn get_interface<R: UsbRegs, C: UsbCallbacks>(
        &mut self,
        regs: &R,
        endpoints: &EndpointTable,
        callbacks: &C,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
    ) -> bool {
        if setup.direction() != SetupDirection::DeviceToHost {
            return false;
        }
        if recipient != Some(SetupRecipient::Interface) {
            return false;
        }
        if self.state != DeviceState::Configured {
            return false;
        }
        if callbacks.interface_descriptor(setup.wIndex as u8).is_none() {
            return false;
        }
        // Only one alternate setting (0) is ever offered, per Non-goals.
        self.control_in(regs, endpoints, &[0u8], setup.wLength);
        true
    }

    fn set_interface<C: UsbCallbacks>(
        &mut self,
        setup: &SetupPacket,
        recipient: Option<SetupRecipient>,
        callbacks: &mut C,
    ) -> bool {
        if setup.direction() != SetupDirection::HostToDevice {
            return false;
        }
        if recipient != Some(SetupRecipient::Interface) {
            return false;
        }
        if self.state != DeviceState::Configured {
            return false;
        }
        if callbacks.interface_descriptor(setup.wIndex as u8).is_none() {
            return false;
        }
        // Exactly one alternate setting exists; only re-asserting it is ever
        // valid (§9 design note).
        setup.wValue == 0
    }
}

fn to_control_request(setup: &SetupPacket) -> ControlRequest {
    ControlRequest {
        bm_request_type: setup.bmRequestType,
        b_request: setup.bRequest,
        w_value: setup.wValue,
        w_index: setup.wIndex,
        w_length: setup.wLength,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointTable;
    use crate::packets::{ConfigurationDescriptor, DeviceDescriptor, StringDescriptor};
    use crate::regs::mock::MockRegs;

    struct TestCallbacks {
        device: DeviceDescriptor,
        config: ConfigurationDescriptor,
    }

    impl UsbCallbacks for TestCallbacks {
        fn device_descriptor(&self) -> &DeviceDescriptor {
            &self.device
        }
        fn config_descriptor(&self) -> &ConfigurationDescriptor {
            &self.config
        }
        fn interface_descriptor(&self, itf: u8) -> Option<&[u8]> {
            if itf == 0 {
                Some(&[])
            } else {
                None
            }
        }
        fn string_descriptor(&self, _lang: u16, _idx: u8) -> Option<StringDescriptor> {
            None
        }
    }

    fn test_callbacks() -> TestCallbacks {
        TestCallbacks {
            device: DeviceDescriptor {
                bLength: 18,
                bDescriptorType: 1,
                bcdUSB: 0x0200,
                bDeviceClass: 0,
                bDeviceSubClass: 0,
                bDeviceProtocol: 0,
                bMaxPacketSize0: 64,
                idVendor: 0x1234,
                idProduct: 0x5678,
                bcdDevice: 0x0100,
                iManufacturer: 0,
                iProduct: 0,
                iSerialNumber: 0,
                bNumConfigurations: 1,
            },
            config: ConfigurationDescriptor {
                bLength: 9,
                bDescriptorType: 2,
                wTotalLength: 9,
                bNumInterfaces: 1,
                bConfigurationValue: 1,
                iConfiguration: 0,
                bmAttributes: 0x80,
                bMaxPower: 50,
            },
        }
    }

    fn setup_bytes(bm: u8, req: u8, val: u16, idx: u16, len: u16) -> [u8; 8] {
        let v = val.to_le_bytes();
        let i = idx.to_le_bytes();
        let l = len.to_le_bytes();
        [bm, req, v[0], v[1], i[0], i[1], l[0], l[1]]
    }

    #[test]
    fn get_device_descriptor_enqueues_tx() {
        let regs = MockRegs::new();
        let endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = test_callbacks();

        let raw = setup_bytes(0x80, 6, 0x0100, 0, 64);
        engine.on_setup(&regs, &endpoints, &mut cb, &raw);

        assert_eq!(engine.state(), DeviceState::Default);
    }

    #[test]
    fn set_address_is_deferred_until_tx_complete() {
        let regs = MockRegs::new();
        let endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = test_callbacks();

        let raw = setup_bytes(0x00, 5, 0x0042, 0, 0);
        engine.on_setup(&regs, &endpoints, &mut cb, &raw);

        assert_eq!(regs.daddr.get(), (false, 0));
        engine.on_ep0_tx_complete(&regs, &endpoints);
        assert_eq!(regs.daddr.get(), (true, 0x42));
        assert_eq!(engine.state(), DeviceState::Address);
    }

    #[test]
    fn set_address_zero_in_default_is_noop_ack() {
        let regs = MockRegs::new();
        let endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = test_callbacks();

        let raw = setup_bytes(0x00, 5, 0, 0, 0);
        engine.on_setup(&regs, &endpoints, &mut cb, &raw);
        engine.on_ep0_tx_complete(&regs, &endpoints);
        assert_eq!(regs.daddr.get(), (false, 0));
        assert_eq!(engine.state(), DeviceState::Default);
    }

    #[test]
    fn set_configuration_rejected_in_default() {
        let regs = MockRegs::new();
        let endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = test_callbacks();

        let raw = setup_bytes(0x00, 9, 1, 0, 0);
        engine.on_setup(&regs, &endpoints, &mut cb, &raw);
        // Rejected: both EP0 directions should now read STALL.
        assert!(endpoints.is_halted(&regs, 0, true));
        assert!(endpoints.is_halted(&regs, 0, false));
    }

    #[test]
    fn bus_reset_clears_continuation_and_state() {
        let regs = MockRegs::new();
        let endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        engine.control_in(&regs, &endpoints, &[0u8; 100], 0xffff);
        assert!(engine.continuation.is_some());
        engine.reset();
        assert!(engine.continuation.is_none());
        assert_eq!(engine.state(), DeviceState::Default);
    }
}
