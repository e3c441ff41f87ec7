//! Per-model parameter tables.
//!
//! Everything that differs between the supported hardware variants lives
//! here: which command-set family a model speaks, its samplerate ceilings,
//! buffer sizes and sample resolution. The tables are immutable; an
//! unrecognized product id is rejected at connection time.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::Display;

/// USB vendor id shared by all supported scopes (firmware loaded).
pub const VENDOR_ID: u16 = 0x04b5;

/// Number of physical channels on every supported model.
pub const CHANNELS: usize = 2;

/// Vertical divisions of the screen; gain steps are specified per division.
pub const DIVS_VOLTAGE: f64 = 8.0;

/// The supported oscilloscope models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Model {
    #[strum(to_string = "DSO-2090")]
    Dso2090,
    #[strum(to_string = "DSO-2100")]
    Dso2100,
    #[strum(to_string = "DSO-2150")]
    Dso2150,
    #[strum(to_string = "DSO-2250")]
    Dso2250,
    #[strum(to_string = "DSO-5200")]
    Dso5200,
    #[strum(to_string = "DSO-5200A")]
    Dso5200A,
}

impl Model {
    /// Resolves a model from its USB product id.
    pub fn from_product_id(pid: u16) -> Option<Model> {
        match pid {
            0x2090 => Some(Model::Dso2090),
            0x2100 => Some(Model::Dso2100),
            0x2150 => Some(Model::Dso2150),
            0x2250 => Some(Model::Dso2250),
            0x5200 => Some(Model::Dso5200),
            0x520a => Some(Model::Dso5200A),
            _ => None,
        }
    }

    pub fn spec(self) -> &'static ModelSpec {
        match self {
            Model::Dso2090 => &DSO2090,
            Model::Dso2100 => &DSO2100,
            Model::Dso2150 => &DSO2150,
            Model::Dso2250 => &DSO2250,
            Model::Dso5200 => &DSO5200,
            Model::Dso5200A => &DSO5200A,
        }
    }
}

/// Which opcode family a model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSet {
    /// SETTRIGGERANDSAMPLERATE and friends.
    Base,
    /// The split SETSAMPLERATE5200/SETBUFFER5200/SETTRIGGER5200 opcodes.
    Dso5200,
}

/// Buffer size selector as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BufferSizeId {
    /// Continuous roll mode without a fixed window.
    Roll = 0,
    Small = 1,
    Large = 2,
}

/// The fixed per-model constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub model: Model,
    pub command_set: CommandSet,
    /// Maximum samplerate with both channels active, in S/s.
    pub samplerate_channel_max: u32,
    /// Maximum samplerate in fast-rate mode (single channel), in S/s.
    pub samplerate_fast_max: u32,
    /// Sample count of the small buffer.
    pub buffer_small: usize,
    /// Sample count of the large buffer.
    pub buffer_large: usize,
    /// Raw sample value at the top of the screen.
    pub sample_range: u16,
    /// True when samples are 9 bits wide and GETDATA appends an MSB block.
    pub high_resolution: bool,
}

impl ModelSpec {
    pub fn buffer_len(&self, id: BufferSizeId) -> Option<usize> {
        match id {
            BufferSizeId::Roll => None,
            BufferSizeId::Small => Some(self.buffer_small),
            BufferSizeId::Large => Some(self.buffer_large),
        }
    }

    /// The ordered gain ladder; identical across the family.
    pub fn gain_steps(&self) -> &'static [Gain] {
        &Gain::ALL
    }
}

const DSO2090: ModelSpec = ModelSpec {
    model: Model::Dso2090,
    command_set: CommandSet::Base,
    samplerate_channel_max: 50_000_000,
    samplerate_fast_max: 100_000_000,
    buffer_small: 10240,
    buffer_large: 32768,
    sample_range: 255,
    high_resolution: false,
};

const DSO2100: ModelSpec = ModelSpec {
    model: Model::Dso2100,
    ..DSO2090
};

// The DSO-2150 triples instead of doubling the rate in fast-rate mode.
const DSO2150: ModelSpec = ModelSpec {
    model: Model::Dso2150,
    samplerate_fast_max: 150_000_000,
    ..DSO2090
};

const DSO2250: ModelSpec = ModelSpec {
    model: Model::Dso2250,
    samplerate_channel_max: 100_000_000,
    samplerate_fast_max: 200_000_000,
    ..DSO2090
};

const DSO5200: ModelSpec = ModelSpec {
    model: Model::Dso5200,
    command_set: CommandSet::Dso5200,
    samplerate_channel_max: 100_000_000,
    samplerate_fast_max: 250_000_000,
    buffer_small: 10240,
    buffer_large: 14336,
    sample_range: 512,
    high_resolution: true,
};

const DSO5200A: ModelSpec = ModelSpec {
    model: Model::Dso5200A,
    ..DSO5200
};

/// One step of the front-end attenuation ladder, named by volts per
/// division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Gain {
    #[strum(to_string = "10 mV/div")]
    Mv10 = 0,
    #[strum(to_string = "20 mV/div")]
    Mv20 = 1,
    #[strum(to_string = "50 mV/div")]
    Mv50 = 2,
    #[strum(to_string = "100 mV/div")]
    Mv100 = 3,
    #[strum(to_string = "200 mV/div")]
    Mv200 = 4,
    #[strum(to_string = "500 mV/div")]
    Mv500 = 5,
    #[strum(to_string = "1 V/div")]
    V1 = 6,
    #[strum(to_string = "2 V/div")]
    V2 = 7,
    #[strum(to_string = "5 V/div")]
    V5 = 8,
}

impl Gain {
    pub const ALL: [Gain; 9] = [
        Gain::Mv10,
        Gain::Mv20,
        Gain::Mv50,
        Gain::Mv100,
        Gain::Mv200,
        Gain::Mv500,
        Gain::V1,
        Gain::V2,
        Gain::V5,
    ];

    pub fn volts_per_div(self) -> f64 {
        match self {
            Gain::Mv10 => 0.01,
            Gain::Mv20 => 0.02,
            Gain::Mv50 => 0.05,
            Gain::Mv100 => 0.1,
            Gain::Mv200 => 0.2,
            Gain::Mv500 => 0.5,
            Gain::V1 => 1.0,
            Gain::V2 => 2.0,
            Gain::V5 => 5.0,
        }
    }

    /// Voltage covered by the full screen height at this step.
    pub fn full_screen_volts(self) -> f64 {
        self.volts_per_div() * DIVS_VOLTAGE
    }

    /// Position within the 1/2/5 ladder as encoded in the SETGAIN bits.
    pub fn ladder_code(self) -> u8 {
        u8::from(self) % 3
    }

    /// Smallest step whose volts-per-division is at least `volts`, or the
    /// largest step when the request exceeds the ladder.
    pub fn snap(volts: f64) -> Gain {
        for step in Gain::ALL {
            if step.volts_per_div() >= volts {
                return step;
            }
        }
        Gain::V5
    }
}
