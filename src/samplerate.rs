//! Samplerate divider arithmetic.
//!
//! The hardware derives its samplerate from a maximum rate and a divider
//! that is split across two registers, a 16-bit slow value and a 3-bit fast
//! value. The split differs between the two command-set families:
//!
//! base:     rate = max / (ones_complement(slow) * 2 + fast)
//! DSO-5200: rate = max / (twos_complement(slow) * 2 + 4 - fast)
//!
//! Writing fast = 0 on the base family behaves like fast = 1 but is still a
//! distinct register value, so the encoder never produces it. Requested
//! rates are mapped to the closest achievable divider; the rate actually
//! selected is reported back to the caller.

use crate::model::{BufferSizeId, CommandSet, ModelSpec};

/// Maximum divider representable on the base family (slow = 0, fast = 7).
const BASE_DIVIDER_MAX: u32 = 0xffff * 2 + 7;
/// Maximum divider representable on the DSO-5200 family.
const DSO5200_DIVIDER_MAX: u32 = 0xffff * 2 + 4;

/// The register pair and effective rate picked for a requested samplerate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerateSelection {
    pub divider: u32,
    pub slow: u16,
    pub fast: u8,
    /// The rate actually achieved, max / divider.
    pub samplerate: f64,
}

/// The achievable ceiling for the current rate mode and buffer selection:
/// fast-rate mode switches to the single-channel maximum, the large buffer
/// halves the rate and roll mode divides it by 1000.
pub fn rate_ceiling(spec: &ModelSpec, fast_rate: bool, buffer: BufferSizeId) -> u32 {
    let base = if fast_rate {
        spec.samplerate_fast_max
    } else {
        spec.samplerate_channel_max
    };
    match buffer {
        BufferSizeId::Roll => base / 1000,
        BufferSizeId::Small => base,
        BufferSizeId::Large => base / 2,
    }
}

/// Picks the closest achievable samplerate below the given ceiling and
/// returns the register encoding for it.
pub fn select(command_set: CommandSet, max: u32, requested: u32) -> SamplerateSelection {
    let limit = match command_set {
        CommandSet::Base => BASE_DIVIDER_MAX,
        CommandSet::Dso5200 => DSO5200_DIVIDER_MAX,
    };
    let ideal = (max as f64 / requested.max(1) as f64).round() as u32;
    let divider = ideal.clamp(1, limit);
    let (slow, fast) = match command_set {
        CommandSet::Base => base_registers(divider),
        CommandSet::Dso5200 => dso5200_registers(divider),
    };
    SamplerateSelection {
        divider,
        slow,
        fast,
        samplerate: max as f64 / divider as f64,
    }
}

/// Picks the register encoding for fast-rate mode, where the slow register
/// does not contribute and only the fast value divides the rate. Base
/// family: divider = fast in [1, 7]; DSO-5200: divider = 4 - fast.
pub fn select_fast_rate(command_set: CommandSet, max: u32, requested: u32) -> SamplerateSelection {
    let ideal = (max as f64 / requested.max(1) as f64).round() as u32;
    match command_set {
        CommandSet::Base => {
            let divider = ideal.clamp(1, 7);
            SamplerateSelection {
                divider,
                slow: 0xffff,
                fast: divider as u8,
                samplerate: max as f64 / divider as f64,
            }
        }
        CommandSet::Dso5200 => {
            let divider = ideal.clamp(1, 4);
            SamplerateSelection {
                divider,
                slow: 0,
                fast: (4 - divider) as u8,
                samplerate: max as f64 / divider as f64,
            }
        }
    }
}

/// Splits a divider into the base-family register pair. Dividers up to 7 fit
/// entirely into the fast value; beyond that the fast value keeps the
/// divider's parity (6 or 7) and the slow value carries the rest in ones
/// complement.
pub fn base_registers(divider: u32) -> (u16, u8) {
    let divider = divider.clamp(1, BASE_DIVIDER_MAX);
    if divider <= 7 {
        (0xffff, divider as u8)
    } else {
        let fast = 6 + (divider & 1) as u8;
        let complement = (divider - fast as u32) / 2;
        (!(complement as u16), fast)
    }
}

/// The decode direction of [`base_registers`].
pub fn base_divider(slow: u16, fast: u8) -> u32 {
    (!slow) as u32 * 2 + fast as u32
}

/// Splits a divider into the DSO-5200 register pair.
pub fn dso5200_registers(divider: u32) -> (u16, u8) {
    let divider = divider.clamp(1, DSO5200_DIVIDER_MAX);
    let t = divider.saturating_sub(3) / 2;
    let fast = (2 * t + 4 - divider) as u8;
    ((t as u16).wrapping_neg(), fast)
}

/// The decode direction of [`dso5200_registers`].
pub fn dso5200_divider(slow: u16, fast: u8) -> u32 {
    slow.wrapping_neg() as u32 * 2 + 4 - fast as u32
}
