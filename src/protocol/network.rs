//! Network identifiers for adapter-attached buses.
//!
//! Every de-framed packet begins with a network tag byte naming the bus (or
//! internal endpoint) the payload belongs to.

/// Networks an adapter device can bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NetId {
    /// The adapter device itself (report/status traffic).
    Device = 0x00,
    /// High-speed CAN.
    Hscan = 0x01,
    /// Medium-speed CAN.
    Mscan = 0x02,
    /// Single-wire CAN.
    Swcan = 0x03,
    /// LIN bus.
    Lin = 0x04,
    /// Internal diagnostic endpoint (command responses, settings, serial).
    Main51 = 0x0B,
}

impl NetId {
    /// Attempts to parse a network tag from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Device),
            0x01 => Some(Self::Hscan),
            0x02 => Some(Self::Mscan),
            0x03 => Some(Self::Swcan),
            0x04 => Some(Self::Lin),
            0x0B => Some(Self::Main51),
            _ => None,
        }
    }

    /// Returns true if this network carries bus frames (CAN/LIN traffic).
    #[must_use]
    pub const fn is_bus(&self) -> bool {
        matches!(self, Self::Hscan | Self::Mscan | Self::Swcan | Self::Lin)
    }
}

impl From<NetId> for u8 {
    fn from(net: NetId) -> Self {
        net as Self
    }
}
