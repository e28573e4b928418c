// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Hardware register access.
//!
//! Every `EPnR`/`ISTR`/`CNTR`/`DADDR`/`BTABLE`/`BCDR` touch in this crate goes
//! through the [`UsbRegs`] trait, not directly through `stm32ral`, so the
//! control engine, PMA allocator, and endpoint I/O can run against real
//! silicon (`Stm32UsbRegs`) or the `Cell`-backed mock used by this crate's
//! own tests.

/// Transfer type written into `EP_TYPE`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EndpointType {
    Bulk,
    Control,
    Interrupt,
}

/// Readable fields of one `EPnR`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct EpSnapshot {
    pub stat_tx: u8,
    pub stat_rx: u8,
    pub dtog_tx: u8,
    pub dtog_rx: u8,
    pub ctr_tx: u8,
    pub ctr_rx: u8,
    pub setup: u8,
    pub ea: u8,
}

/// The full set of fields written back on every `EPnR` update.
///
/// `stat_tx`/`stat_rx`/`dtog_tx`/`dtog_rx` are the values to be XORed onto
/// the current register contents by hardware (see [`stat_valid`] and
/// friends); `ctr_tx`/`ctr_rx` are plain 1-keeps/0-clears values, matching
/// the sticky clear-by-writing-0 semantics of those two bits.
#[derive(Clone, Copy, Debug)]
pub struct EpWrite {
    pub ep_type: EndpointType,
    pub ea: u8,
    pub ctr_tx: u8,
    pub ctr_rx: u8,
    pub stat_tx: u8,
    pub stat_rx: u8,
    pub dtog_tx: u8,
    pub dtog_rx: u8,
}

/// Interrupt status, as decoded from `ISTR`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Istr {
    pub ctr: bool,
    pub susp: bool,
    pub wkup: bool,
    pub reset: bool,
    pub sof: bool,
    pub ep_id: u8,
}

/// Hardware access seam between the pure control/PMA/endpoint logic in this
/// crate and the concrete peripheral.
pub trait UsbRegs {
    /// Read the current contents of `EPnR` for endpoint `ep` (0..=7).
    fn ep_read(&self, ep: u8) -> EpSnapshot;

    /// Perform one read-modify-write of `EPnR` for endpoint `ep`. Callers
    /// must have derived `write`'s toggle fields from a snapshot taken
    /// immediately before (see [`crate::endpoint::EndpointState::toggle`]);
    /// this trait does not itself serialise read-then-write.
    fn ep_write(&self, ep: u8, write: EpWrite);

    /// Decode the current `ISTR` contents.
    fn istr(&self) -> Istr;
    /// Clear every bit of `ISTR` in one write. Used once during bring-up to
    /// discard whatever the power-on/reset sequence may have left pending,
    /// before any mask is unmasked.
    fn clear_istr(&self);
    /// Acknowledge (clear) the RESET bit in `ISTR`.
    fn ack_reset(&self);
    /// Acknowledge the SUSP bit in `ISTR`.
    fn ack_susp(&self);
    /// Acknowledge the WKUP bit in `ISTR`.
    fn ack_wkup(&self);
    /// Acknowledge the SOF bit in `ISTR`.
    fn ack_sof(&self);
    /// Acknowledge the CTR bit in `ISTR` (only meaningful after every
    /// endpoint's own CTR_TX/CTR_RX has been cleared via [`ep_write`]).
    fn ack_ctr(&self);

    /// Enter or leave peripheral low-power suspend mode (`CNTR.LPMODE`/`FSUSP`).
    fn set_suspend(&self, suspended: bool);
    /// Unmask the given set of peripheral interrupts.
    fn enable_interrupts(&self, ctrm: bool, resetm: bool, suspm: bool, wkupm: bool, sofm: bool);
    /// Bring the transceiver out of power-down and reset (`CNTR.PDWN`/`FRES`).
    fn power_on(&self);

    /// Write `DADDR`: `ef` is the enable-function bit, `addr` the 7-bit address.
    fn set_address(&self, ef: bool, addr: u8);
    /// Set the buffer-descriptor table's base offset within the PMA.
    fn set_btable_offset(&self, offset: u16);
    /// Connect (`true`) or disconnect (`false`) the D+ pull-up.
    fn set_pullup(&self, enabled: bool);
}

/// Bit pattern to XOR onto a STAT field to drive it to DISABLED.
///
/// Per the peripheral's toggle-write semantics, writing the *current* value
/// of a toggle field leaves it unchanged; `stat_disabled` therefore simply
/// echoes the bits back. Counter-intuitive but correct: see the worked XOR
/// derivation in the control engine module docs.
pub fn stat_disabled(stat: u8) -> u8 {
    stat & 0b11
}

/// Bit pattern to XOR onto a STAT field to drive it to STALL.
pub fn stat_stall(stat: u8) -> u8 {
    (stat & 0b10) | (!stat & 0b01)
}

/// Bit pattern to XOR onto a STAT field to drive it to NAK.
pub fn stat_nak(stat: u8) -> u8 {
    (!stat & 0b10) | (stat & 0b01)
}

/// Bit pattern to XOR onto a STAT field to drive it to VALID.
pub fn stat_valid(stat: u8) -> u8 {
    (!stat & 0b10) | (!stat & 0b01)
}

/// Bit pattern to XOR onto DTOG_TX/DTOG_RX to force the toggle to 0.
///
/// Writing a 1 to these fields flips the hardware's current value; writing
/// the value already there therefore cancels out to 0. Always use this
/// instead of a literal 0 or 1 — the right-hand side depends on what was
/// just read.
pub fn dtog_reset(dtog: u8) -> u8 {
    dtog & 0b1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_helpers_produce_correct_xor_targets() {
        for current in 0u8..4 {
            assert_eq!(current ^ stat_disabled(current), 0b00);
            assert_eq!(current ^ stat_stall(current), 0b01);
            assert_eq!(current ^ stat_nak(current), 0b10);
            assert_eq!(current ^ stat_valid(current), 0b11);
        }
    }

    #[test]
    fn dtog_reset_always_clears() {
        assert_eq!(0 ^ dtog_reset(0), 0);
        assert_eq!(1 ^ dtog_reset(1), 0);
    }
}

pub mod stm32 {
    //! Real-silicon implementation of [`UsbRegs`] backed by `stm32ral`.

    use super::{EndpointType, EpSnapshot, EpWrite, Istr, UsbRegs};
    use stm32ral::{modify_reg, read_reg, usb, write_reg};

    /// Borrowed handle to the peripheral instance, implementing [`UsbRegs`].
    pub struct Stm32UsbRegs<'a>(pub &'a usb::Instance);

    // EPnR is 8 independently-named registers (EP0R..EP7R) rather than an
    // array in stm32ral's generated API; this macro is the single place that
    // turns a runtime endpoint index back into the right field name, instead
    // of repeating the dispatch at every call site.
    macro_rules! with_epnr {
        ($usb:expr, $ep:expr, |$reg:ident| $body:expr) => {
            match $ep {
                0 => { let $reg = &$usb.EP0R; $body },
                1 => { let $reg = &$usb.EP1R; $body },
                2 => { let $reg = &$usb.EP2R; $body },
                3 => { let $reg = &$usb.EP3R; $body },
                4 => { let $reg = &$usb.EP4R; $body },
                5 => { let $reg = &$usb.EP5R; $body },
                6 => { let $reg = &$usb.EP6R; $body },
                7 => { let $reg = &$usb.EP7R; $body },
                _ => unreachable!("endpoint index out of range"),
            }
        };
    }

    impl<'a> UsbRegs for Stm32UsbRegs<'a> {
        fn ep_read(&self, ep: u8) -> EpSnapshot {
            with_epnr!(self.0, ep, |r| {
                let (stat_tx, stat_rx, dtog_tx, dtog_rx, ctr_tx, ctr_rx, setup, ea) =
                    read_reg!(usb, r, EP0R, STAT_TX, STAT_RX, DTOG_TX, DTOG_RX,
                              CTR_TX, CTR_RX, SETUP, EA);
                EpSnapshot {
                    stat_tx: stat_tx as u8,
                    stat_rx: stat_rx as u8,
                    dtog_tx: dtog_tx as u8,
                    dtog_rx: dtog_rx as u8,
                    ctr_tx: ctr_tx as u8,
                    ctr_rx: ctr_rx as u8,
                    setup: setup as u8,
                    ea: ea as u8,
                }
            })
        }

        fn ep_write(&self, ep: u8, w: EpWrite) {
            let ep_type = w.ep_type;
            with_epnr!(self.0, ep, |r| {
                match ep_type {
                    EndpointType::Bulk => write_reg!(
                        usb, r, EP0R, EP_TYPE: Bulk, EP_KIND: 0, EA: w.ea as u32,
                        CTR_TX: w.ctr_tx as u32, CTR_RX: w.ctr_rx as u32,
                        STAT_TX: w.stat_tx as u32, STAT_RX: w.stat_rx as u32,
                        DTOG_TX: w.dtog_tx as u32, DTOG_RX: w.dtog_rx as u32),
                    EndpointType::Control => write_reg!(
                        usb, r, EP0R, EP_TYPE: Control, EP_KIND: 0, EA: w.ea as u32,
                        CTR_TX: w.ctr_tx as u32, CTR_RX: w.ctr_rx as u32,
                        STAT_TX: w.stat_tx as u32, STAT_RX: w.stat_rx as u32,
                        DTOG_TX: w.dtog_tx as u32, DTOG_RX: w.dtog_rx as u32),
                    EndpointType::Interrupt => write_reg!(
                        usb, r, EP0R, EP_TYPE: Interrupt, EP_KIND: 0, EA: w.ea as u32,
                        CTR_TX: w.ctr_tx as u32, CTR_RX: w.ctr_rx as u32,
                        STAT_TX: w.stat_tx as u32, STAT_RX: w.stat_rx as u32,
                        DTOG_TX: w.dtog_tx as u32, DTOG_RX: w.dtog_rx as u32),
                }
            })
        }

        fn istr(&self) -> Istr {
            let (ctr, susp, wkup, reset, sof, ep_id) =
                read_reg!(usb, self.0, ISTR, CTR, SUSP, WKUP, RESET, SOF, EP_ID);
            Istr {
                ctr: ctr == 1,
                susp: susp == 1,
                wkup: wkup == 1,
                reset: reset == 1,
                sof: sof == 1,
                ep_id: ep_id as u8,
            }
        }

        fn clear_istr(&self) {
            write_reg!(usb, self.0, ISTR, 0);
        }

        fn ack_reset(&self) {
            write_reg!(usb, self.0, ISTR, CTR: 1, SUSP: 1, WKUP: 1, SOF: 1, RESET: 0);
        }

        fn ack_susp(&self) {
            write_reg!(usb, self.0, ISTR, CTR: 1, SUSP: 0, WKUP: 1, SOF: 1, RESET: 1);
        }

        fn ack_wkup(&self) {
            write_reg!(usb, self.0, ISTR, CTR: 1, SUSP: 1, WKUP: 0, SOF: 1, RESET: 1);
        }

        fn ack_sof(&self) {
            write_reg!(usb, self.0, ISTR, CTR: 1, SUSP: 1, WKUP: 1, SOF: 0, RESET: 1);
        }

        fn ack_ctr(&self) {
            write_reg!(usb, self.0, ISTR, CTR: 0, SUSP: 1, WKUP: 1, SOF: 1, RESET: 1);
        }

        fn set_suspend(&self, suspended: bool) {
            if suspended {
                modify_reg!(usb, self.0, CNTR, FSUSP: Suspend, LPMODE: Enabled);
            } else {
                modify_reg!(usb, self.0, CNTR, FSUSP: 0, LPMODE: Disabled);
            }
        }

        fn enable_interrupts(&self, ctrm: bool, resetm: bool, suspm: bool, wkupm: bool, sofm: bool) {
            modify_reg!(usb, self.0, CNTR,
                        CTRM: ctrm as u32, RESETM: resetm as u32,
                        SUSPM: suspm as u32, WKUPM: wkupm as u32, SOFM: sofm as u32);
        }

        fn power_on(&self) {
            modify_reg!(usb, self.0, CNTR, PDWN: Disabled, FRES: Reset);
            cortex_m::asm::delay(48);
            modify_reg!(usb, self.0, CNTR, PDWN: Disabled, FRES: NoReset);
        }

        fn set_address(&self, ef: bool, addr: u8) {
            write_reg!(usb, self.0, DADDR, ADD: addr as u32, EF: ef as u32);
        }

        fn set_btable_offset(&self, offset: u16) {
            write_reg!(usb, self.0, BTABLE, offset as u32);
        }

        fn set_pullup(&self, enabled: bool) {
            if enabled {
                modify_reg!(usb, self.0, BCDR, DPPU: Enabled);
            } else {
                modify_reg!(usb, self.0, BCDR, DPPU: Disabled);
            }
        }
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory [`UsbRegs`] mock used by this crate's own unit tests: plain
    //! `Cell`-backed fields, no mocking framework, one struct per peripheral
    //! under test.

    use core::cell::Cell;
    use super::{EndpointType, EpSnapshot, EpWrite, Istr, UsbRegs};

    #[derive(Clone, Copy, Default)]
    struct EpCell {
        stat_tx: u8,
        stat_rx: u8,
        dtog_tx: u8,
        dtog_rx: u8,
        ctr_tx: u8,
        ctr_rx: u8,
        setup: u8,
        ea: u8,
        ep_type: u8,
    }

    pub struct MockRegs {
        ep: [Cell<EpCell>; 8],
        pub istr: Cell<(bool, bool, bool, bool, bool, u8)>,
        pub suspended: Cell<bool>,
        pub masks: Cell<(bool, bool, bool, bool, bool)>,
        pub powered_on: Cell<bool>,
        pub daddr: Cell<(bool, u8)>,
        pub btable_offset: Cell<u16>,
        pub pullup: Cell<bool>,
    }

    impl MockRegs {
        pub fn new() -> Self {
            MockRegs {
                ep: Default::default(),
                istr: Cell::new((false, false, false, false, false, 0)),
                suspended: Cell::new(false),
                masks: Cell::new((false, false, false, false, false)),
                powered_on: Cell::new(false),
                daddr: Cell::new((false, 0)),
                btable_offset: Cell::new(0),
                pullup: Cell::new(false),
            }
        }

        /// Test helper: inject a SETUP/CTR condition as the hardware would.
        pub fn set_istr(&self, ctr: bool, susp: bool, wkup: bool, reset: bool, sof: bool, ep_id: u8) {
            self.istr.set((ctr, susp, wkup, reset, sof, ep_id));
        }

        /// Test helper: mark endpoint `ep`'s CTR_RX (and, if `setup`, SETUP)
        /// asserted, as if hardware had just completed a reception.
        pub fn complete_rx(&self, ep: u8, setup: bool) {
            let mut c = self.ep[ep as usize].get();
            c.ctr_rx = 1;
            c.setup = setup as u8;
            self.ep[ep as usize].set(c);
        }

        /// Test helper: mark endpoint `ep`'s CTR_TX asserted, as if hardware
        /// had just completed a transmission.
        pub fn complete_tx(&self, ep: u8) {
            let mut c = self.ep[ep as usize].get();
            c.ctr_tx = 1;
            self.ep[ep as usize].set(c);
        }
    }

    impl UsbRegs for MockRegs {
        fn ep_read(&self, ep: u8) -> EpSnapshot {
            let c = self.ep[ep as usize].get();
            EpSnapshot {
                stat_tx: c.stat_tx,
                stat_rx: c.stat_rx,
                dtog_tx: c.dtog_tx,
                dtog_rx: c.dtog_rx,
                ctr_tx: c.ctr_tx,
                ctr_rx: c.ctr_rx,
                setup: c.setup,
                ea: c.ea,
            }
        }

        fn ep_write(&self, ep: u8, w: EpWrite) {
            let mut c = self.ep[ep as usize].get();
            c.stat_tx ^= w.stat_tx & 0b11;
            c.stat_rx ^= w.stat_rx & 0b11;
            c.dtog_tx ^= w.dtog_tx & 0b1;
            c.dtog_rx ^= w.dtog_rx & 0b1;
            // CTR_* are sticky clear-by-writing-0: a 1 preserves, a 0 clears.
            c.ctr_tx &= w.ctr_tx;
            c.ctr_rx &= w.ctr_rx;
            c.ea = w.ea;
            c.ep_type = match w.ep_type {
                EndpointType::Bulk => 0,
                EndpointType::Control => 1,
                EndpointType::Interrupt => 3,
            };
            self.ep[ep as usize].set(c);
        }

        fn istr(&self) -> Istr {
            let (ctr, susp, wkup, reset, sof, ep_id) = self.istr.get();
            Istr { ctr, susp, wkup, reset, sof, ep_id }
        }

        fn clear_istr(&self) {
            self.istr.set((false, false, false, false, false, 0));
        }

        fn ack_reset(&self) {
            let (ctr, susp, wkup, _, sof, ep_id) = self.istr.get();
            self.istr.set((ctr, susp, wkup, false, sof, ep_id));
        }

        fn ack_susp(&self) {
            let (ctr, _, wkup, reset, sof, ep_id) = self.istr.get();
            self.istr.set((ctr, false, wkup, reset, sof, ep_id));
        }

        fn ack_wkup(&self) {
            let (ctr, susp, _, reset, sof, ep_id) = self.istr.get();
            self.istr.set((ctr, susp, false, reset, sof, ep_id));
        }

        fn ack_sof(&self) {
            let (ctr, susp, wkup, reset, _, ep_id) = self.istr.get();
            self.istr.set((ctr, susp, wkup, reset, false, ep_id));
        }

        fn ack_ctr(&self) {
            let (_, susp, wkup, reset, sof, ep_id) = self.istr.get();
            self.istr.set((false, susp, wkup, reset, sof, ep_id));
        }

        fn set_suspend(&self, suspended: bool) {
            self.suspended.set(suspended);
        }

        fn enable_interrupts(&self, ctrm: bool, resetm: bool, suspm: bool, wkupm: bool, sofm: bool) {
            self.masks.set((ctrm, resetm, suspm, wkupm, sofm));
        }

        fn power_on(&self) {
            self.powered_on.set(true);
        }

        fn set_address(&self, ef: bool, addr: u8) {
            self.daddr.set((ef, addr));
        }

        fn set_btable_offset(&self, offset: u16) {
            self.btable_offset.set(offset);
        }

        fn set_pullup(&self, enabled: bool) {
            self.pullup.set(enabled);
        }
    }
}
