//! Cached device settings.
//!
//! The facade setters write into this cache; the capture worker reads one
//! consistent snapshot per loop iteration. Raw register encodings derived
//! from these values live in the pending command frames, not here.

use strum_macros::Display;

use crate::model::{BufferSizeId, CHANNELS, Gain, ModelSpec};

/// Input coupling of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Coupling {
    AC,
    #[default]
    DC,
}

/// Trigger mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum TriggerMode {
    /// Force a trigger when none occurs for too long.
    #[default]
    Auto,
    /// Wait for a real trigger, re-arm after every capture.
    Normal,
    /// Stop after one triggered capture.
    Single,
}

/// Edge that causes a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum Slope {
    #[default]
    Rising,
    Falling,
}

impl Slope {
    pub fn bit(self) -> bool {
        matches!(self, Slope::Falling)
    }
}

/// Wire codes for the trigger source selector.
pub const TRIGGER_SOURCE_CH2: u8 = 0;
pub const TRIGGER_SOURCE_CH1: u8 = 1;
pub const TRIGGER_SOURCE_ALT: u8 = 2;
pub const TRIGGER_SOURCE_EXT: u8 = 3;

/// Everything the driver remembers about the device configuration. Setter
/// calls update this cache and re-encode the affected command frames; the
/// cache therefore always reflects the values in effect, after clamping and
/// quantization.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSettings {
    /// The samplerate the caller asked for, kept to re-derive the divider
    /// when the buffer size or channel usage changes.
    pub samplerate_target: u32,
    /// The samplerate actually achieved by the current register values.
    pub samplerate: f64,
    pub samplerate_divider: u32,
    /// True when the single active channel uses both sample buffers.
    pub fast_rate: bool,
    pub buffer_id: BufferSizeId,
    /// Buffer length in samples per channel.
    pub buffer_size: usize,
    pub gain: [Gain; CHANNELS],
    /// Raw sample value at the top of the screen, per channel.
    pub sample_range: [u16; CHANNELS],
    /// Logical screen offset per channel, 0.0 bottom to 1.0 top.
    pub offset: [f64; CHANNELS],
    /// The offset actually in effect after DAC quantization.
    pub offset_real: [f64; CHANNELS],
    /// Trigger level per channel, in volts.
    pub trigger_level: [f64; CHANNELS],
    /// Pretrigger position, 0.0 left to 1.0 right.
    pub trigger_position: f64,
    pub trigger_mode: TriggerMode,
    pub trigger_slope: Slope,
    /// True when the trigger source is one of the special (external) inputs.
    pub trigger_special: bool,
    pub trigger_source: usize,
    pub channel_used: [bool; CHANNELS],
    pub coupling: [Coupling; CHANNELS],
}

impl DeviceSettings {
    pub fn initial(spec: &ModelSpec) -> Self {
        DeviceSettings {
            samplerate_target: spec.samplerate_channel_max,
            samplerate: spec.samplerate_channel_max as f64,
            samplerate_divider: 1,
            fast_rate: false,
            buffer_id: BufferSizeId::Small,
            buffer_size: spec.buffer_small,
            gain: [Gain::V1; CHANNELS],
            sample_range: [spec.sample_range; CHANNELS],
            offset: [0.5; CHANNELS],
            offset_real: [0.5; CHANNELS],
            trigger_level: [0.0; CHANNELS],
            trigger_position: 0.5,
            trigger_mode: TriggerMode::Auto,
            trigger_slope: Slope::Rising,
            trigger_special: false,
            trigger_source: 0,
            channel_used: [true; CHANNELS],
            coupling: [Coupling::DC; CHANNELS],
        }
    }

    /// Number of channels currently enabled.
    pub fn used_count(&self) -> usize {
        self.channel_used.iter().filter(|&&used| used).count()
    }

    /// The two-bit used-channels wire code: 0 = channel 1 alone,
    /// 1 = channel 2 alone, 2 = both.
    pub fn used_channels_code(&self) -> u8 {
        match (self.channel_used[0], self.channel_used[1]) {
            (_, false) => 0,
            (false, true) => 1,
            (true, true) => 2,
        }
    }

    /// The two-bit trigger source wire code. Channel ids are swapped on the
    /// wire (channel 1 is code 1, channel 2 is code 0); special sources all
    /// map to the external selector.
    pub fn trigger_source_code(&self) -> u8 {
        if self.trigger_special {
            TRIGGER_SOURCE_EXT
        } else {
            match self.trigger_source {
                0 => TRIGGER_SOURCE_CH1,
                1 => TRIGGER_SOURCE_CH2,
                _ => TRIGGER_SOURCE_ALT,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn used_channels_code_matches_wire_encoding() {
        let mut settings = DeviceSettings::initial(Model::Dso2090.spec());
        assert_eq!(settings.used_channels_code(), 2);
        settings.channel_used = [true, false];
        assert_eq!(settings.used_channels_code(), 0);
        settings.channel_used = [false, true];
        assert_eq!(settings.used_channels_code(), 1);
    }

    #[test]
    fn trigger_source_codes_are_swapped_on_the_wire() {
        let mut settings = DeviceSettings::initial(Model::Dso2090.spec());
        settings.trigger_source = 0;
        assert_eq!(settings.trigger_source_code(), TRIGGER_SOURCE_CH1);
        settings.trigger_source = 1;
        assert_eq!(settings.trigger_source_code(), TRIGGER_SOURCE_CH2);
        settings.trigger_special = true;
        assert_eq!(settings.trigger_source_code(), TRIGGER_SOURCE_EXT);
    }
}
