//! Control-transfer frames.
//!
//! Besides the bulk pipe the scope is driven through a handful of vendor
//! control requests: every bulk command is announced with `BEGINCOMMAND`,
//! channel/trigger DAC levels go through `SETOFFSET`, the input relays
//! through `SETRELAYS`, and `VALUE` reads expose device data such as the
//! calibration table.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::DsoError;

/// Vendor control request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlRequest {
    Value = 0xa2,
    GetSpeed = 0xb2,
    BeginCommand = 0xb3,
    SetOffset = 0xb4,
    SetRelays = 0xb5,
}

/// Sub-ids for `ControlRequest::Value` reads, each with a fixed payload
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlValue {
    /// Per-channel, per-gain-step offset calibration levels.
    ChannelLevel = 0x08,
    /// One byte, the device address.
    DeviceAddress = 0x0a,
    /// Four opaque bytes; meaning unknown.
    CalibrationData = 0x60,
    /// Six opaque bytes used by the DSO-5200 family; meaning unknown.
    Unknown70 = 0x70,
}

impl ControlValue {
    /// The fixed payload length of this value id.
    pub fn len(self) -> usize {
        match self {
            ControlValue::ChannelLevel => 72,
            ControlValue::DeviceAddress => 1,
            ControlValue::CalibrationData => 4,
            ControlValue::Unknown70 => 6,
        }
    }
}

/// Index values accepted by `BEGINCOMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandIndex {
    /// Used for almost every command.
    Index0 = 0x03,
    Index1 = 0x0a,
    Index2 = 0x09,
    /// Occasionally used for SETTRIGGERANDSAMPLERATE.
    Index3 = 0x01,
    Index4 = 0x02,
    Index5 = 0x08,
}

/// The `BEGINCOMMAND` control frame (10 bytes), sent before every bulk
/// command. The index byte is repeated three times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginCommand {
    pub index: CommandIndex,
}

impl Default for BeginCommand {
    fn default() -> Self {
        BeginCommand {
            index: CommandIndex::Index0,
        }
    }
}

impl BeginCommand {
    pub const LEN: usize = 10;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = 0x0f;
        let index = self.index.into();
        frame[1] = index;
        frame[2] = index;
        frame[3] = index;
        frame
    }
}

/// The `SETOFFSET` control frame (17 bytes): channel 1, channel 2 and
/// trigger DAC levels as big-endian 16-bit values, rest zero-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOffset {
    pub channel: [u16; 2],
    pub trigger: u16,
}

impl SetOffset {
    pub const LEN: usize = 17;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0..2].copy_from_slice(&self.channel[0].to_be_bytes());
        frame[2..4].copy_from_slice(&self.channel[1].to_be_bytes());
        frame[4..6].copy_from_slice(&self.trigger.to_be_bytes());
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        if bytes.len() < Self::LEN {
            return Err(DsoError::FrameTooShort {
                expected: Self::LEN,
                actual: bytes.len(),
            });
        }
        Ok(SetOffset {
            channel: [
                u16::from_be_bytes([bytes[0], bytes[1]]),
                u16::from_be_bytes([bytes[2], bytes[3]]),
            ],
            trigger: u16::from_be_bytes([bytes[4], bytes[5]]),
        })
    }
}

/// The `SETRELAYS` control frame (17 bytes). Each relay byte is a fixed
/// magic value when its condition holds and the bitwise complement of that
/// value otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetRelays {
    pub below_1v: [bool; 2],
    pub below_100mv: [bool; 2],
    pub coupling_dc: [bool; 2],
    pub trigger_ext: bool,
}

impl SetRelays {
    pub const LEN: usize = 17;

    pub fn encode(&self) -> [u8; Self::LEN] {
        fn relay(magic: u8, on: bool) -> u8 {
            if on { magic } else { !magic }
        }
        let mut frame = [0u8; Self::LEN];
        frame[1] = relay(0x04, self.below_1v[0]);
        frame[2] = relay(0x08, self.below_100mv[0]);
        frame[3] = relay(0x02, self.coupling_dc[0]);
        frame[4] = relay(0x20, self.below_1v[1]);
        frame[5] = relay(0x40, self.below_100mv[1]);
        frame[6] = relay(0x10, self.coupling_dc[1]);
        frame[7] = relay(0x01, self.trigger_ext);
        frame
    }
}

/// USB connection speed reported by `GETSPEED`, which determines the bulk
/// packet size the device uses when splitting sample data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ConnectionSpeed {
    Full = 0,
    High = 1,
}

impl ConnectionSpeed {
    pub fn bulk_packet_len(self) -> usize {
        match self {
            ConnectionSpeed::Full => 64,
            ConnectionSpeed::High => 512,
        }
    }

    /// Parses the 10-byte `GETSPEED` response; only byte 0 carries data.
    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        let first = *bytes.first().ok_or(DsoError::FrameTooShort {
            expected: 1,
            actual: 0,
        })?;
        ConnectionSpeed::try_from(first)
            .map_err(|_| DsoError::Protocol(format!("unknown connection speed {first:#04x}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_command_repeats_index() {
        let frame = BeginCommand::default().encode();
        assert_eq!(frame, [0x0f, 0x03, 0x03, 0x03, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn set_offset_is_big_endian() {
        let frame = SetOffset {
            channel: [0x1234, 0xabcd],
            trigger: 0x0102,
        }
        .encode();
        assert_eq!(frame[..6], [0x12, 0x34, 0xab, 0xcd, 0x01, 0x02]);
        assert_eq!(frame[6..], [0u8; 11]);
    }

    #[test]
    fn set_relays_uses_complement_for_off() {
        let frame = SetRelays {
            below_1v: [true, false],
            below_100mv: [false, true],
            coupling_dc: [true, true],
            trigger_ext: false,
        }
        .encode();
        assert_eq!(frame[0], 0x00);
        assert_eq!(frame[1], 0x04);
        assert_eq!(frame[2], !0x08);
        assert_eq!(frame[3], 0x02);
        assert_eq!(frame[4], !0x20);
        assert_eq!(frame[5], 0x40);
        assert_eq!(frame[6], 0x10);
        assert_eq!(frame[7], !0x01);
    }

    #[test]
    fn connection_speed_decodes_first_byte() {
        let mut bytes = [0u8; 10];
        bytes[0] = 1;
        assert_eq!(
            ConnectionSpeed::decode(&bytes).unwrap(),
            ConnectionSpeed::High
        );
        assert!(ConnectionSpeed::decode(&[]).is_err());
    }
}
