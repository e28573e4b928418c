// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Endpoint table and byte-granular endpoint I/O.
//!
//! A single table indexed at runtime over all 8 `EPnR`s, driven through
//! [`crate::regs::UsbRegs`] rather than one hardcoded register per endpoint.

use crate::config::{self, EndpointKind};
use crate::pma::{self, EpLayout};
use crate::regs::{dtog_reset, stat_nak, stat_stall, stat_valid, EndpointType, EpWrite, UsbRegs};

/// One endpoint slot: transfer type, configured sizes, and its computed PMA
/// layout. Immutable after [`EndpointTable::new`].
#[derive(Clone, Copy, Debug)]
pub struct EndpointSlot {
    pub kind: EndpointType,
    pub size_in: usize,
    pub size_out: usize,
    pub layout: EpLayout,
}

/// The full 8-entry endpoint table, laid out once at init.
pub struct EndpointTable {
    slots: [EndpointSlot; 8],
    sof_cursor: u8,
}

impl EndpointTable {
    /// Builds the table from the crate's compile-time endpoint
    /// configuration, computing the PMA layout for all 8 endpoints.
    pub fn new() -> Self {
        let mut sizes_in = [0usize; 8];
        let mut sizes_out = [0usize; 8];
        let mut kinds = [EndpointType::Bulk; 8];

        sizes_in[0] = config::EP0_MAX_PACKET_SIZE;
        sizes_out[0] = config::EP0_MAX_PACKET_SIZE;
        kinds[0] = EndpointType::Control;

        for ep in 1..8 {
            sizes_in[ep] = config::ep_in_size(ep);
            sizes_out[ep] = config::ep_out_size(ep);
            kinds[ep] = match config::ep_kind(ep) {
                EndpointKind::Bulk => EndpointType::Bulk,
                EndpointKind::Interrupt => EndpointType::Interrupt,
            };
        }

        let mut layouts = [EpLayout::default(); 8];
        pma::layout(&sizes_in, &sizes_out, &mut layouts);

        let mut slots = [EndpointSlot {
            kind: EndpointType::Bulk,
            size_in: 0,
            size_out: 0,
            layout: EpLayout::default(),
        }; 8];
        for ep in 0..8 {
            slots[ep] = EndpointSlot {
                kind: kinds[ep],
                size_in: sizes_in[ep],
                size_out: sizes_out[ep],
                layout: layouts[ep],
            };
        }

        EndpointTable { slots, sof_cursor: 1 }
    }

    pub fn slot(&self, ep: usize) -> &EndpointSlot {
        &self.slots[ep]
    }

    /// Writes the buffer-descriptor table entries for every endpoint from
    /// the computed layout. Called once by `init`.
    ///
    /// # Safety
    /// Must run before any interrupt can touch `BTABLE`/`EP_BUF`, i.e. from
    /// `init` only.
    pub unsafe fn write_btable(&self) {
        for ep in 0..8 {
            let slot = &self.slots[ep];
            pma::BTABLE[ep].ADDR_TX = slot.layout.addr_tx;
            pma::BTABLE[ep].COUNT_TX = 0;
            pma::BTABLE[ep].ADDR_RX = slot.layout.addr_rx;
            pma::BTABLE[ep].COUNT_RX = slot.layout.count_rx;
        }
    }

    /// Copies `data` into endpoint `ept`'s TX buffer, sets its COUNT_TX, and
    /// arms TX (`STAT_TX = VALID`). Returns `false` if `ept` is out of range
    /// or its IN direction is disabled.
    pub fn ep_write<R: UsbRegs>(&self, regs: &R, ept: usize, data: &[u8]) -> bool {
        if ept >= 8 {
            return false;
        }
        let slot = &self.slots[ept];
        if slot.size_in == 0 {
            return false;
        }
        debug_assert!(data.len() <= slot.size_in, "ep_write: caller exceeded size_in");

        let word_offset = slot.layout.addr_tx as usize / 2;
        unsafe {
            pma::write_bytes(word_offset, data);
            pma::BTABLE[ept].COUNT_TX = data.len() as u16;
        }

        let snap = regs.ep_read(ept as u8);
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
                ea: snap.ea,
                ctr_tx: 1,
                ctr_rx: 1,
                stat_tx: stat_valid(snap.stat_tx),
                stat_rx: 0,
                dtog_tx: 0,
                dtog_rx: 0,
            },
        );
        true
    }

    /// Reads up to `cap` bytes from endpoint `ept`'s RX buffer into `buf`,
    /// re-arms RX (`STAT_RX = VALID`), and returns the number of bytes
    /// copied (the host's packet size, clamped to `cap`). Returns 0 if
    /// `ept` is out of range or its OUT direction is disabled.
    ///
    /// Preserves (does not clear) CTR_RX; callers that need CTR_RX cleared
    /// after draining the buffer must follow up with [`Self::ack_rx`].
    pub fn ep_read<R: UsbRegs>(&self, regs: &R, ept: usize, buf: &mut [u8]) -> u16 {
        if ept >= 8 {
            return 0;
        }
        let slot = &self.slots[ept];
        if slot.size_out == 0 {
            return 0;
        }

        let count = unsafe { (pma::BTABLE[ept].COUNT_RX & 0x3ff) as usize };
        let n = count.min(buf.len());
        let word_offset = slot.layout.addr_rx as usize / 2;
        unsafe {
            pma::read_bytes(word_offset, &mut buf[..n]);
        }

        let snap = regs.ep_read(ept as u8);
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
                ea: snap.ea,
                ctr_tx: 1,
                ctr_rx: 1,
                stat_tx: 0,
                stat_rx: stat_valid(snap.stat_rx),
                dtog_tx: 0,
                dtog_rx: 0,
            },
        );
        n as u16
    }

    /// Sets endpoint `ept`'s TX or RX (per `is_in`) to STALL, per
    /// SET_FEATURE(ENDPOINT_HALT).
    pub fn stall<R: UsbRegs>(&self, regs: &R, ept: usize, is_in: bool) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        if is_in {
            regs.ep_write(
                ept as u8,
                EpWrite {
                    ep_type: slot.kind,
                    ea: snap.ea,
                    ctr_tx: 1,
                    ctr_rx: 1,
                    stat_tx: stat_stall(snap.stat_tx),
                    stat_rx: 0,
                    dtog_tx: 0,
                    dtog_rx: 0,
                },
            );
        } else {
            regs.ep_write(
                ept as u8,
                EpWrite {
                    ep_type: slot.kind,
                    ea: snap.ea,
                    ctr_tx: 1,
                    ctr_rx: 1,
                    stat_tx: 0,
                    stat_rx: stat_stall(snap.stat_rx),
                    dtog_tx: 0,
                    dtog_rx: 0,
                },
            );
        }
    }

    /// Clears STALL on endpoint `ept`'s TX or RX, per
    /// CLEAR_FEATURE(ENDPOINT_HALT): IN goes to NAK with DTOG_TX reset, OUT
    /// goes to VALID with DTOG_RX reset.
    pub fn clear_halt<R: UsbRegs>(&self, regs: &R, ept: usize, is_in: bool) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        if is_in {
            regs.ep_write(
                ept as u8,
                EpWrite {
                    ep_type: slot.kind,
                    ea: snap.ea,
                    ctr_tx: 1,
                    ctr_rx: 1,
                    stat_tx: stat_nak(snap.stat_tx),
                    stat_rx: 0,
                    dtog_tx: dtog_reset(snap.dtog_tx),
                    dtog_rx: 0,
                },
            );
        } else {
            regs.ep_write(
                ept as u8,
                EpWrite {
                    ep_type: slot.kind,
                    ea: snap.ea,
                    ctr_tx: 1,
                    ctr_rx: 1,
                    stat_tx: 0,
                    stat_rx: stat_valid(snap.stat_rx),
                    dtog_tx: 0,
                    dtog_rx: dtog_reset(snap.dtog_rx),
                },
            );
        }
    }

    /// Returns whether endpoint `ept`'s given direction currently reads
    /// STALL, for GET_STATUS.
    pub fn is_halted<R: UsbRegs>(&self, regs: &R, ept: usize, is_in: bool) -> bool {
        let snap = regs.ep_read(ept as u8);
        let stat = if is_in { snap.stat_tx } else { snap.stat_rx };
        stat == 0b01
    }

    /// Programs endpoint `ept` into Configured state: writes type+address,
    /// then (if IN enabled) sets TX=NAK/DTOG_TX=0, and (if OUT enabled)
    /// sets RX=VALID/DTOG_RX=0.
    pub fn configure<R: UsbRegs>(&self, regs: &R, ept: usize) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        let stat_tx = if slot.size_in > 0 { stat_nak(snap.stat_tx) } else { 0 };
        let stat_rx = if slot.size_out > 0 { stat_valid(snap.stat_rx) } else { 0 };
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
                ea: ept as u8,
                ctr_tx: 1,
                ctr_rx: 1,
                stat_tx,
                stat_rx,
                dtog_tx: dtog_reset(snap.dtog_tx),
                dtog_rx: dtog_reset(snap.dtog_rx),
            },
        );
    }

    /// Disables endpoint `ept`: STAT_TX/STAT_RX → DISABLED, address cleared.
    pub fn disable<R: UsbRegs>(&self, regs: &R, ept: usize) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
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

    /// Clears CTR_RX on endpoint `ept`, leaving STAT_TX/STAT_RX/DTOG
    /// untouched (echoes their current value back, which XORs to no
    /// change). Used by the event loop to acknowledge an OUT/SETUP
    /// completion without disturbing endpoint state.
    pub fn ack_rx<R: UsbRegs>(&self, regs: &R, ept: usize) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
                ea: snap.ea,
                ctr_tx: 1,
                ctr_rx: 0,
                stat_tx: 0,
                stat_rx: 0,
                dtog_tx: 0,
                dtog_rx: 0,
            },
        );
    }

    /// Clears CTR_TX on endpoint `ept`, leaving other fields untouched.
    pub fn ack_tx<R: UsbRegs>(&self, regs: &R, ept: usize) {
        let slot = &self.slots[ept];
        let snap = regs.ep_read(ept as u8);
        regs.ep_write(
            ept as u8,
            EpWrite {
                ep_type: slot.kind,
                ea: snap.ea,
                ctr_tx: 0,
                ctr_rx: 1,
                stat_tx: 0,
                stat_rx: 0,
                dtog_tx: 0,
                dtog_rx: 0,
            },
        );
    }

    /// Advances the SOF round-robin cursor over endpoints 1..=7, returning
    /// the next endpoint whose IN is configured and currently NAK (ready
    /// for the application to fill), or `None` if none qualify this frame.
    pub fn sof_round_robin<R: UsbRegs>(&mut self, regs: &R) -> Option<u8> {
        for _ in 0..7 {
            let ep = self.sof_cursor;
            self.sof_cursor = if self.sof_cursor == 7 { 1 } else { self.sof_cursor + 1 };

            let slot = &self.slots[ep as usize];
            if slot.size_in == 0 {
                continue;
            }
            let snap = regs.ep_read(ep);
            if snap.stat_tx == 0b10 && snap.ea == ep {
                return Some(ep);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::mock::MockRegs;

    #[test]
    fn disabled_endpoint_rejects_write_and_read() {
        let table = EndpointTable::new();
        let regs = MockRegs::new();
        let mut buf = [0u8; 8];
        assert!(!table.ep_write(&regs, 3, &[1, 2, 3]));
        assert_eq!(table.ep_read(&regs, 3, &mut buf), 0);
    }

    #[test]
    fn out_of_range_endpoint_is_rejected() {
        let table = EndpointTable::new();
        let regs = MockRegs::new();
        assert!(!table.ep_write(&regs, 9, &[1]));
    }

    #[test]
    fn sof_round_robin_skips_disabled_endpoints() {
        let mut table = EndpointTable::new();
        let regs = MockRegs::new();
        // No endpoints are enabled by default configuration, so the
        // round-robin should never report a candidate.
        assert_eq!(table.sof_round_robin(&regs), None);
    }
}
