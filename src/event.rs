// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Event Loop: `task`, the single entry point driving the whole stack.
//!
//! A priority-ordered dispatcher over the full 8-endpoint table, including
//! the SOF round-robin that lets several IN endpoints share the frame tick.

use crate::callbacks::UsbCallbacks;
use crate::control::ControlEngine;
use crate::endpoint::EndpointTable;
use crate::regs::{dtog_reset, stat_nak, stat_valid, EndpointType, EpWrite, UsbRegs};

/// Runs one step of the event loop: at most one event class is processed
/// per call, in strict priority order WKUP > SUSP > RESET > SOF > CTR
/// (§4.5).
pub fn task<R: UsbRegs, C: UsbCallbacks>(
    regs: &R,
    endpoints: &mut EndpointTable,
    engine: &mut ControlEngine,
    callbacks: &mut C,
) {
    let istr = regs.istr();

    if istr.wkup {
        regs.ack_wkup();
        regs.set_suspend(false);
        callbacks.resume_hook();
        return;
    }

    if istr.susp {
        regs.ack_susp();
        regs.set_suspend(true);
        callbacks.suspend_hook();
        return;
    }

    if istr.reset {
        regs.ack_reset();
        callbacks.reset_hook(true);

        for ep in 0..8u8 {
            let snap = regs.ep_read(ep);
            regs.ep_write(
                ep,
                EpWrite {
                    ep_type: EndpointType::Bulk,
                    ea: 0,
                    ctr_tx: 1,
                    ctr_rx: 1,
                    stat_tx: crate::regs::stat_disabled(snap.stat_tx),
                    stat_rx: crate::regs::stat_disabled(snap.stat_rx),
                    dtog_tx: 0,
                    dtog_rx: 0,
                },
            );
        }

        engine.reset();
        regs.set_address(true, 0);

        let snap0 = regs.ep_read(0);
        regs.ep_write(
            0,
            EpWrite {
                ep_type: EndpointType::Control,
                ea: 0,
                ctr_tx: 1,
                ctr_rx: 1,
                stat_tx: stat_nak(snap0.stat_tx),
                stat_rx: stat_valid(snap0.stat_rx),
                dtog_tx: dtog_reset(snap0.dtog_tx),
                dtog_rx: dtog_reset(snap0.dtog_rx),
            },
        );

        callbacks.reset_hook(false);
        return;
    }

    if istr.sof && callbacks.has_in_cb() {
        regs.ack_sof();
        if let Some(ep) = endpoints.sof_round_robin(regs) {
            callbacks.in_cb(ep);
        }
        return;
    }

    if istr.ctr {
        let ep = istr.ep_id;
        if ep == 0 {
            let snap = regs.ep_read(0);
            if snap.ctr_rx == 1 {
                if snap.setup == 1 {
                    let mut raw = [0u8; 8];
                    endpoints.ep_read(regs, 0, &mut raw);
                    endpoints.ack_rx(regs, 0);
                    engine.on_setup(regs, endpoints, callbacks, &raw);
                } else {
                    endpoints.ack_rx(regs, 0);
                }
            }
            if snap.ctr_tx == 1 {
                endpoints.ack_tx(regs, 0);
                engine.on_ep0_tx_complete(regs, endpoints);
            }
        } else {
            let snap = regs.ep_read(ep);
            if snap.ctr_rx == 1 {
                endpoints.ack_rx(regs, ep as usize);
                callbacks.out_cb(ep);
            }
            if snap.ctr_tx == 1 {
                endpoints.ack_tx(regs, ep as usize);
            }
        }
        regs.ack_ctr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::ControlRequest;
    use crate::packets::{ConfigurationDescriptor, DeviceDescriptor, StringDescriptor};
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

    fn callbacks() -> NullCallbacks {
        NullCallbacks {
            device: unsafe { core::mem::zeroed() },
            config: unsafe { core::mem::zeroed() },
        }
    }

    #[test]
    fn reset_event_reinitialises_ep0_and_clears_state() {
        let regs = MockRegs::new();
        let mut endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = callbacks();

        regs.set_istr(false, false, false, true, false, 0);
        task(&regs, &mut endpoints, &mut engine, &mut cb);

        assert_eq!(engine.state(), crate::control::DeviceState::Default);
        assert_eq!(regs.daddr.get(), (true, 0));
        assert!(!regs.istr.get().3);
    }

    #[test]
    fn wkup_takes_priority_and_returns_immediately() {
        let regs = MockRegs::new();
        let mut endpoints = EndpointTable::new();
        let mut engine = ControlEngine::new();
        let mut cb = callbacks();

        regs.set_istr(true, true, true, true, true, 0);
        task(&regs, &mut endpoints, &mut engine, &mut cb);

        assert!(!regs.istr.get().2);
        assert!(regs.istr.get().0);
        let _ = ControlRequest {
            bm_request_type: 0,
            b_request: 0,
            w_value: 0,
            w_index: 0,
            w_length: 0,
        };
    }
}
