//! Bulk command frames.
//!
//! Every command is a fixed-length byte frame whose first byte is the opcode
//! and whose unused payload bytes are zero-filled. The bit-packed payload
//! bytes are described with `modular_bitfield` structs so the layout is
//! explicit instead of relying on compiler bitfield packing.

use modular_bitfield::prelude::*;
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::error::DsoError;

/// All bulk command opcodes. The opcode equals the enumeration position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandCode {
    SetFilter = 0x00,
    SetTriggerAndSamplerate = 0x01,
    ForceTrigger = 0x02,
    StartSampling = 0x03,
    EnableTrigger = 0x04,
    GetData = 0x05,
    GetCaptureState = 0x06,
    SetGain = 0x07,
    SetLogicalData = 0x08,
    GetLogicalData = 0x09,
    // 0x0a and 0x0b exist on other firmware revisions; purpose unknown,
    // never transmitted by this driver.
    Unknown0A = 0x0a,
    Unknown0B = 0x0b,
    SetSamplerate5200 = 0x0c,
    SetBuffer5200 = 0x0d,
    SetTrigger5200 = 0x0e,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Number of bulk command slots in the pending table.
pub const COMMAND_COUNT: usize = 15;

/// Builds one of the payload-less two-byte commands (force-trigger,
/// start-sampling, enable-trigger, get-data, get-capture-state,
/// get-logical-data).
pub fn plain_command(code: CommandCode) -> [u8; 2] {
    [code.into(), 0x00]
}

/// Channel/trigger filter bits for `SETFILTER`. A set bit disables the
/// source.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterBits {
    pub channel1: bool,
    pub channel2: bool,
    pub trigger: bool,
    #[skip]
    reserved: B5,
}

/// The `SETFILTER` frame (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetFilter {
    pub bits: FilterBits,
}

impl SetFilter {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetFilter.into();
        frame[1] = 0x0f;
        frame[2] = self.bits.into_bytes()[0];
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetFilter {
            bits: FilterBits::from_bytes([bytes[2]]),
        })
    }
}

/// Trigger and samplerate bits, byte 2 of `SETTRIGGERANDSAMPLERATE`.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tsr1Bits {
    pub trigger_source: B2,
    pub buffer_size: B3,
    pub samplerate_fast: B3,
}

/// Trigger and samplerate bits, byte 3 of `SETTRIGGERANDSAMPLERATE`.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tsr2Bits {
    pub used_channels: B2,
    pub fast_rate: bool,
    pub trigger_slope: bool,
    #[skip]
    reserved: B4,
}

/// The `SETTRIGGERANDSAMPLERATE` frame (12 bytes).
///
/// The 24-bit trigger position register is split across the frame: the low
/// word sits at bytes 6-7 and the high byte at byte 10, with zero bytes in
/// between. The hardware expects exactly this placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetTriggerAndSamplerate {
    pub tsr1: Tsr1Bits,
    pub tsr2: Tsr2Bits,
    pub samplerate_slow: u16,
    pub trigger_position: u32,
}

impl SetTriggerAndSamplerate {
    pub const LEN: usize = 12;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetTriggerAndSamplerate.into();
        frame[2] = self.tsr1.into_bytes()[0];
        frame[3] = self.tsr2.into_bytes()[0];
        frame[4..6].copy_from_slice(&self.samplerate_slow.to_le_bytes());
        frame[6] = self.trigger_position as u8;
        frame[7] = (self.trigger_position >> 8) as u8;
        frame[10] = (self.trigger_position >> 16) as u8;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetTriggerAndSamplerate {
            tsr1: Tsr1Bits::from_bytes([bytes[2]]),
            tsr2: Tsr2Bits::from_bytes([bytes[3]]),
            samplerate_slow: u16::from_le_bytes([bytes[4], bytes[5]]),
            trigger_position: bytes[6] as u32
                | (bytes[7] as u32) << 8
                | (bytes[10] as u32) << 16,
        })
    }
}

/// Per-channel gain bits for `SETGAIN`. Each channel carries the position
/// within the 1/2/5 ladder, 0 = 1e*, 1 = 2e*, 2 = 5e*.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GainBits {
    pub channel1: B2,
    pub channel2: B2,
    #[skip]
    reserved: B4,
}

/// The `SETGAIN` frame (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetGain {
    pub bits: GainBits,
}

impl SetGain {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetGain.into();
        frame[1] = 0x0f;
        frame[2] = self.bits.into_bytes()[0];
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetGain {
            bits: GainBits::from_bytes([bytes[2]]),
        })
    }
}

/// The `SETLOGICALDATA` frame (8 bytes). The hardware always sees bit 0 of
/// the data byte set; what the remaining bits select is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetLogicalData {
    pub data: u8,
}

impl SetLogicalData {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetLogicalData.into();
        frame[1] = 0x0f;
        frame[2] = self.data | 0x01;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetLogicalData { data: bytes[2] })
    }
}

/// The `SETSAMPLERATE5200` frame (6 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetSamplerate5200 {
    pub samplerate_slow: u16,
    pub samplerate_fast: u8,
}

impl SetSamplerate5200 {
    pub const LEN: usize = 6;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetSamplerate5200.into();
        frame[2..4].copy_from_slice(&self.samplerate_slow.to_le_bytes());
        frame[4] = self.samplerate_fast;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetSamplerate5200 {
            samplerate_slow: u16::from_le_bytes([bytes[2], bytes[3]]),
            samplerate_fast: bytes[4],
        })
    }
}

/// Trigger-position-used values for the `SETBUFFER5200` frame.
pub const DTRIGGERPOSITION_OFF: u8 = 0;
pub const DTRIGGERPOSITION_ON: u8 = 7;

/// Buffer mode bits, byte 8 of `SETBUFFER5200`.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DBufferBits {
    pub trigger_position_used: B3,
    pub buffer_size: B3,
    #[skip]
    reserved: B2,
}

/// The `SETBUFFER5200` frame (10 bytes). Bytes 5 and 9 are fixed 0xff pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetBuffer5200 {
    pub position_pre: u16,
    pub position_post: u16,
    pub used_pre: u8,
    pub used_post: u8,
    pub buffer_size: u8,
}

impl SetBuffer5200 {
    pub const LEN: usize = 10;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetBuffer5200.into();
        frame[2..4].copy_from_slice(&self.position_pre.to_le_bytes());
        frame[4] = self.used_pre;
        frame[5] = 0xff;
        frame[6..8].copy_from_slice(&self.position_post.to_le_bytes());
        frame[8] = DBufferBits::new()
            .with_trigger_position_used(self.used_post)
            .with_buffer_size(self.buffer_size)
            .into_bytes()[0];
        frame[9] = 0xff;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        let dbuffer = DBufferBits::from_bytes([bytes[8]]);
        Ok(SetBuffer5200 {
            position_pre: u16::from_le_bytes([bytes[2], bytes[3]]),
            position_post: u16::from_le_bytes([bytes[6], bytes[7]]),
            used_pre: bytes[4],
            used_post: dbuffer.trigger_position_used(),
            buffer_size: dbuffer.buffer_size(),
        })
    }
}

/// Trigger and samplerate bits, byte 2 of `SETTRIGGER5200`.
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ETsrBits {
    pub fast_rate: bool,
    pub used_channels: B2,
    pub trigger_source: B2,
    pub trigger_slope: B2,
    pub trigger_pulse: bool,
}

/// The `SETTRIGGER5200` frame (8 bytes). Byte 4 is always 0x02; its purpose
/// is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetTrigger5200 {
    pub bits: ETsrBits,
}

impl SetTrigger5200 {
    pub const LEN: usize = 8;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut frame = [0u8; Self::LEN];
        frame[0] = CommandCode::SetTrigger5200.into();
        frame[2] = self.bits.into_bytes()[0];
        frame[4] = 0x02;
        frame
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::LEN)?;
        Ok(SetTrigger5200 {
            bits: ETsrBits::from_bytes([bytes[2]]),
        })
    }
}

/// Acquisition phase reported in the `GETCAPTURESTATE` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CaptureState {
    Waiting = 0,
    Sampling = 1,
    Ready = 2,
    Ready5200 = 7,

    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Decoded `GETCAPTURESTATE` response: the capture state byte and the raw
/// trigger point register value. The hardware pads the response well past
/// these four bytes; the padding is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStateResponse {
    pub state: CaptureState,
    pub trigger_point: u16,
}

impl CaptureStateResponse {
    pub const MIN_LEN: usize = 4;

    pub fn decode(bytes: &[u8]) -> Result<Self, DsoError> {
        expect_len(bytes, Self::MIN_LEN)?;
        Ok(CaptureStateResponse {
            state: CaptureState::from_primitive(bytes[0]),
            trigger_point: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }
}

fn expect_len(bytes: &[u8], expected: usize) -> Result<(), DsoError> {
    if bytes.len() < expected {
        return Err(DsoError::FrameTooShort {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}
