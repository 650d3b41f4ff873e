//! Command opcodes for adapter devices.
//!
//! Commands are sent to the device on the Main51 endpoint as an opcode byte
//! optionally followed by argument bytes. The device echoes the opcode as the
//! first payload byte of its response, so the same enum doubles as the
//! Main51 response subtype.

/// Command opcodes sent to (and echoed by) the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Update the state of the device status LED.
    UpdateLedState = 0x06,
    /// Enable or disable bus traffic reception (1-byte boolean argument).
    EnableNetworkCommunication = 0x07,
    /// Extended enable with per-network mask arguments.
    EnableNetworkCommunicationEx = 0x08,
    /// Request the device serial number.
    RequestSerialNumber = 0xA1,
    /// Write a settings blob to the device.
    SetSettings = 0xA4,
    /// Read the device settings blob.
    ReadSettings = 0xA6,
    /// Commit the current settings to nonvolatile storage.
    SaveSettings = 0xA7,
    /// Soft-reset the device.
    SoftwareReset = 0xDF,
}

impl Command {
    /// Attempts to parse a command opcode from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x06 => Some(Self::UpdateLedState),
            0x07 => Some(Self::EnableNetworkCommunication),
            0x08 => Some(Self::EnableNetworkCommunicationEx),
            0xA1 => Some(Self::RequestSerialNumber),
            0xA4 => Some(Self::SetSettings),
            0xA6 => Some(Self::ReadSettings),
            0xA7 => Some(Self::SaveSettings),
            0xDF => Some(Self::SoftwareReset),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd as Self
    }
}
