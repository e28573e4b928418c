// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! Compile-time endpoint configuration.
//!
//! Endpoint sizes and types are plain `const`s rather than a runtime-built
//! table: the PMA layout in [`crate::pma`] is computed once from these values
//! and the whole crate leans on the compiler to catch an over-budget
//! configuration (see [`PMA_BUDGET_ASSERT`]) instead of discovering it on
//! target.

use static_assertions::const_assert;

/// Bytes of Packet Memory Area available on the target chip.
///
/// STM32F0/F1/F3-family USB peripherals in the `stm32ral::usb` family expose
/// 1024 bytes of PMA (512 16-bit words accessed at a 2-byte stride). Retarget
/// this constant if porting to a family member with a different PMA size.
pub const PMA_SIZE: usize = 1024;

/// Size in bytes of the fixed buffer-descriptor table (8 endpoints * 2
/// directions * 4 bytes per descriptor).
pub const BTABLE_SIZE: usize = 64;

/// Number of endpoint slots the peripheral exposes (index 0..=7, EP0 is
/// always control).
pub const NUM_ENDPOINTS: usize = 8;

/// EP0's fixed max packet size in both directions, per the USB 2.0 spec.
pub const EP0_MAX_PACKET_SIZE: usize = 64;

/// Transfer type assigned to a non-control endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EndpointKind {
    Bulk,
    Interrupt,
}

macro_rules! ep_size_const {
    ($name:ident, $default:expr) => {
        #[allow(non_upper_case_globals)]
        pub const $name: usize = $default;
    };
}

// Endpoint 0 is fixed at EP0_MAX_PACKET_SIZE in both directions (see
// invariant in the data model); endpoints 1..=7 default to disabled (size 0)
// and are enabled by the integrator overriding these constants in a small
// wrapper crate or via a future `cfg` surface. Kept as plain consts, a
// compile-time-fixed layout rather than a runtime builder.
ep_size_const!(USBD_EP1_IN_SIZE, 0);
ep_size_const!(USBD_EP1_OUT_SIZE, 0);
ep_size_const!(USBD_EP2_IN_SIZE, 0);
ep_size_const!(USBD_EP2_OUT_SIZE, 0);
ep_size_const!(USBD_EP3_IN_SIZE, 0);
ep_size_const!(USBD_EP3_OUT_SIZE, 0);
ep_size_const!(USBD_EP4_IN_SIZE, 0);
ep_size_const!(USBD_EP4_OUT_SIZE, 0);
ep_size_const!(USBD_EP5_IN_SIZE, 0);
ep_size_const!(USBD_EP5_OUT_SIZE, 0);
ep_size_const!(USBD_EP6_IN_SIZE, 0);
ep_size_const!(USBD_EP6_OUT_SIZE, 0);
ep_size_const!(USBD_EP7_IN_SIZE, 0);
ep_size_const!(USBD_EP7_OUT_SIZE, 0);

pub const USBD_EP1_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP2_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP3_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP4_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP5_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP6_TYPE: EndpointKind = EndpointKind::Bulk;
pub const USBD_EP7_TYPE: EndpointKind = EndpointKind::Bulk;

/// IN sizes for endpoints 1..=7, in index order.
pub const EP_IN_SIZES: [usize; 7] = [
    USBD_EP1_IN_SIZE, USBD_EP2_IN_SIZE, USBD_EP3_IN_SIZE, USBD_EP4_IN_SIZE,
    USBD_EP5_IN_SIZE, USBD_EP6_IN_SIZE, USBD_EP7_IN_SIZE,
];

/// OUT sizes for endpoints 1..=7, in index order.
pub const EP_OUT_SIZES: [usize; 7] = [
    USBD_EP1_OUT_SIZE, USBD_EP2_OUT_SIZE, USBD_EP3_OUT_SIZE, USBD_EP4_OUT_SIZE,
    USBD_EP5_OUT_SIZE, USBD_EP6_OUT_SIZE, USBD_EP7_OUT_SIZE,
];

pub const EP_TYPES: [EndpointKind; 7] = [
    USBD_EP1_TYPE, USBD_EP2_TYPE, USBD_EP3_TYPE, USBD_EP4_TYPE,
    USBD_EP5_TYPE, USBD_EP6_TYPE, USBD_EP7_TYPE,
];

/// Total bytes consumed by configured endpoint buffers (excludes the
/// buffer-descriptor table).
const fn total_buffer_bytes() -> usize {
    let mut total = EP0_MAX_PACKET_SIZE * 2;
    let mut i = 0;
    while i < 7 {
        total += EP_IN_SIZES[i] + EP_OUT_SIZES[i];
        i += 1;
    }
    total
}

pub const TOTAL_BUFFER_BYTES: usize = total_buffer_bytes();

// PMA overflow is a build error, not a runtime one: the sum of the
// descriptor table and every configured endpoint buffer must fit the
// target's PMA.
const_assert!(BTABLE_SIZE + TOTAL_BUFFER_BYTES <= PMA_SIZE);

/// Returns the configured IN size for endpoint `ep` (1..=7), or 0 for EP0
/// (handled separately) and out-of-range indices.
pub const fn ep_in_size(ep: usize) -> usize {
    if ep == 0 || ep > 7 { 0 } else { EP_IN_SIZES[ep - 1] }
}

/// Returns the configured OUT size for endpoint `ep` (1..=7).
pub const fn ep_out_size(ep: usize) -> usize {
    if ep == 0 || ep > 7 { 0 } else { EP_OUT_SIZES[ep - 1] }
}

/// Returns the configured transfer type for endpoint `ep` (1..=7).
pub const fn ep_kind(ep: usize) -> EndpointKind {
    if ep == 0 || ep > 7 {
        EndpointKind::Bulk
    } else {
        EP_TYPES[ep - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_fits_budget() {
        assert!(BTABLE_SIZE + TOTAL_BUFFER_BYTES <= PMA_SIZE);
    }

    #[test]
    fn ep0_size_fixed() {
        assert_eq!(EP0_MAX_PACKET_SIZE, 64);
    }

    #[test]
    fn out_of_range_endpoints_report_disabled() {
        assert_eq!(ep_in_size(0), 0);
        assert_eq!(ep_in_size(8), 0);
        assert_eq!(ep_out_size(9), 0);
    }
}
