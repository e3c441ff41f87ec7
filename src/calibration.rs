//! Channel offset calibration.
//!
//! The device stores, for every channel and gain step, the DAC level that
//! puts the trace at the bottom and at the top of the screen. The table is
//! fetched once per connection through the VALUE/CHANNELLEVEL control read
//! and never changes afterwards; logical offsets and trigger levels are
//! interpolated between the two levels.

use tracing::warn;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::control::{ControlRequest, ControlValue};
use crate::error::DsoError;
use crate::model::{CHANNELS, Gain};
use crate::transport::Transport;

const GAIN_COUNT: usize = 9;

/// Wire view of the calibration table: channel x gain step x {bottom, top}.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned, Debug, Clone, Copy)]
#[repr(C)]
struct ChannelLevelsRaw {
    levels: [[[U16; 2]; GAIN_COUNT]; CHANNELS],
}

/// Parsed calibration data, or the identity fallback when the device did
/// not deliver any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationTable {
    levels: [[[u16; 2]; GAIN_COUNT]; CHANNELS],
    calibrated: bool,
}

impl CalibrationTable {
    /// Reads the channel-level table from the device. A failed or truncated
    /// transfer yields `CalibrationUnavailable`; the caller decides whether
    /// to fall back to [`CalibrationTable::identity`].
    pub async fn fetch<T: Transport>(transport: &mut T) -> Result<Self, DsoError> {
        let bytes = transport
            .control_read(
                ControlRequest::Value.into(),
                u8::from(ControlValue::ChannelLevel) as u16,
                ControlValue::ChannelLevel.len(),
            )
            .await
            .map_err(|error| {
                warn!("channel level read failed: {error}");
                DsoError::CalibrationUnavailable
            })?;
        Self::parse(&bytes)
    }

    /// Parses the 72-byte little-endian table; trailing padding is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self, DsoError> {
        let (raw, _rest) = ChannelLevelsRaw::ref_from_prefix(bytes)
            .map_err(|_| DsoError::CalibrationUnavailable)?;
        let mut levels = [[[0u16; 2]; GAIN_COUNT]; CHANNELS];
        for channel in 0..CHANNELS {
            for gain in 0..GAIN_COUNT {
                levels[channel][gain][0] = raw.levels[channel][gain][0].get();
                levels[channel][gain][1] = raw.levels[channel][gain][1].get();
            }
        }
        Ok(CalibrationTable {
            levels,
            calibrated: true,
        })
    }

    /// The uncalibrated fallback mapping the logical range onto the full
    /// 16-bit DAC range.
    pub fn identity() -> Self {
        CalibrationTable {
            levels: [[[0x0000, 0xffff]; GAIN_COUNT]; CHANNELS],
            calibrated: false,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    fn limits(&self, channel: usize, gain: Gain) -> (f64, f64) {
        let pair = self.levels[channel][u8::from(gain) as usize];
        (pair[0] as f64, pair[1] as f64)
    }

    /// Maps a logical offset in [0, 1] onto the raw DAC level for the given
    /// channel and gain step. Returns the register value and the quantized
    /// offset it actually represents.
    pub fn resolve_offset(&self, channel: usize, gain: Gain, offset: f64) -> (u16, f64) {
        let offset = offset.clamp(0.0, 1.0);
        let (start, end) = self.limits(channel, gain);
        if end <= start {
            return (start as u16, offset);
        }
        let raw = (start + offset * (end - start) + 0.5).floor();
        let real = (raw - start) / (end - start);
        (raw as u16, real)
    }

    /// Maps a trigger level, given in volts relative to the channel's
    /// quantized offset, onto the raw DAC level.
    pub fn resolve_trigger_level(
        &self,
        channel: usize,
        gain: Gain,
        offset_real: f64,
        level: f64,
    ) -> u16 {
        let (start, end) = self.limits(channel, gain);
        let fraction = (offset_real + level / gain.full_screen_volts()).clamp(0.0, 1.0);
        (start + fraction * (end - start) + 0.5).floor() as u16
    }
}
