// Copyright 2019-2020 Adam Greig
// Dual licensed under the Apache 2.0 and MIT licenses.

//! SETUP packet parsing and standard USB 2.0 descriptor wire formats.
//!
//! Parses directly from a plain 8-byte slice rather than an in-place PMA
//! view, so the same code runs against real hardware or a test buffer.

use core::convert::TryFrom;
use num_enum::TryFromPrimitive;

/// An 8-byte SETUP packet, as received on EP0.
#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
#[derive(Clone, Copy)]
pub struct SetupPacket {
    pub bmRequestType: u8,
    pub bRequest: u8,
    pub wValue: u16,
    pub wIndex: u16,
    pub wLength: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    SetFeature = 3,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SetupDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SetupType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum SetupRecipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// `wValue` of FEATURE requests naming the endpoint-halt feature.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

impl SetupPacket {
    /// Parses a SETUP packet from the 8 bytes `ep_read` returned for EP0.
    pub fn parse(buf: &[u8; 8]) -> Self {
        SetupPacket {
            bmRequestType: buf[0],
            bRequest: buf[1],
            wValue: u16::from_le_bytes([buf[2], buf[3]]),
            wIndex: u16::from_le_bytes([buf[4], buf[5]]),
            wLength: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }

    pub fn direction(&self) -> SetupDirection {
        SetupDirection::try_from((self.bmRequestType >> 7) & 0b1).unwrap()
    }

    pub fn setup_type(&self) -> SetupType {
        SetupType::try_from((self.bmRequestType >> 5) & 0b11).unwrap()
    }

    pub fn recipient(&self) -> Option<SetupRecipient> {
        SetupRecipient::try_from(self.bmRequestType & 0b1_1111).ok()
    }

    pub fn standard_request(&self) -> Option<StandardRequest> {
        StandardRequest::try_from(self.bRequest).ok()
    }

    /// High byte of `wValue`, the descriptor type index for GET_DESCRIPTOR.
    pub fn descriptor_type(&self) -> Option<DescriptorType> {
        DescriptorType::try_from((self.wValue >> 8) as u8).ok()
    }

    /// Low byte of `wValue`, the descriptor index for GET_DESCRIPTOR.
    pub fn descriptor_index(&self) -> u8 {
        (self.wValue & 0xff) as u8
    }

    /// Endpoint number addressed by an Endpoint-recipient request, taken
    /// from the low 4 bits of `wIndex` (bit 7 is the IN/OUT direction,
    /// handled separately by the caller via [`Self::endpoint_is_in`]).
    pub fn endpoint_number(&self) -> u8 {
        (self.wIndex & 0x0f) as u8
    }

    pub fn endpoint_is_in(&self) -> bool {
        self.wIndex & 0x80 != 0
    }
}

#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
#[derive(Clone, Copy)]
pub struct DeviceDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bcdUSB: u16,
    pub bDeviceClass: u8,
    pub bDeviceSubClass: u8,
    pub bDeviceProtocol: u8,
    pub bMaxPacketSize0: u8,
    pub idVendor: u16,
    pub idProduct: u16,
    pub bcdDevice: u16,
    pub iManufacturer: u8,
    pub iProduct: u8,
    pub iSerialNumber: u8,
    pub bNumConfigurations: u8,
}

#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
#[derive(Clone, Copy)]
pub struct ConfigurationDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub wTotalLength: u16,
    pub bNumInterfaces: u8,
    pub bConfigurationValue: u8,
    pub iConfiguration: u8,
    pub bmAttributes: u8,
    pub bMaxPower: u8,
}

#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
#[derive(Clone, Copy)]
pub struct InterfaceDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bInterfaceNumber: u8,
    pub bAlternateSetting: u8,
    pub bNumEndpoints: u8,
    pub bInterfaceClass: u8,
    pub bInterfaceSubClass: u8,
    pub bInterfaceProtocol: u8,
    pub iInterface: u8,
}

#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
#[derive(Clone, Copy)]
pub struct EndpointDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bEndpointAddress: u8,
    pub bmAttributes: u8,
    pub wMaxPacketSize: u16,
    pub bInterval: u8,
}

#[allow(non_snake_case)]
#[repr(C)]
#[repr(packed)]
pub struct StringDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bString: [u8; 62],
}

/// Trait for structs that can be safely viewed as `&[u8]`.
///
/// Implementors must be `repr(packed)` with no padding.
pub unsafe trait ToBytes: Sized {
    fn to_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(self as *const _ as *const u8, core::mem::size_of::<Self>())
        }
    }
}

unsafe impl ToBytes for DeviceDescriptor {}
unsafe impl ToBytes for ConfigurationDescriptor {}
unsafe impl ToBytes for InterfaceDescriptor {}
unsafe impl ToBytes for EndpointDescriptor {}
unsafe impl ToBytes for StringDescriptor {}

impl StringDescriptor {
    /// Builds a string descriptor from UTF-16LE code units, clamping to the
    /// 62-byte payload capacity (31 code units).
    pub fn from_utf16(units: &[u16]) -> Self {
        let mut bString = [0u8; 62];
        let n = units.len().min(31);
        for (i, unit) in units.iter().take(n).enumerate() {
            let bytes = unit.to_le_bytes();
            bString[2 * i] = bytes[0];
            bString[2 * i + 1] = bytes[1];
        }
        StringDescriptor {
            bLength: 2 + (n * 2) as u8,
            bDescriptorType: DescriptorType::String as u8,
            bString,
        }
    }

    /// The descriptor's byte length, honouring `bLength` rather than the
    /// full fixed-size backing array.
    pub fn as_bytes(&self) -> &[u8] {
        &self.to_bytes()[..self.bLength as usize]
    }
}
