//! Byte-exact frame fixtures and round-trips for the settable frames.

use hantek_dso::command::{
    CaptureStateResponse, CaptureState, DTRIGGERPOSITION_ON, ETsrBits, FilterBits, GainBits,
    SetBuffer5200, SetFilter, SetGain, SetSamplerate5200, SetTrigger5200,
    SetTriggerAndSamplerate, Tsr1Bits, Tsr2Bits,
};
use hantek_dso::control::{BeginCommand, CommandIndex, SetOffset, SetRelays};
use hantek_dso::model::CommandSet;
use hantek_dso::samplerate;

fn fixture(hex_bytes: &str) -> Vec<u8> {
    hex::decode(hex_bytes).expect("bad fixture")
}

#[test]
fn set_filter_frame_matches_fixture() {
    let frame = SetFilter {
        bits: FilterBits::new()
            .with_channel1(false)
            .with_channel2(true)
            .with_trigger(true),
    }
    .encode();
    assert_eq!(frame.to_vec(), fixture("000f060000000000"));
}

#[test]
fn set_trigger_and_samplerate_frame_matches_fixture() {
    // Trigger source CH1 (1), small buffer (1), fast value 2, both
    // channels (2), slope bit clear, slow value 0xfffe, position 0x77660.
    let frame = SetTriggerAndSamplerate {
        tsr1: Tsr1Bits::new()
            .with_trigger_source(1)
            .with_buffer_size(1)
            .with_samplerate_fast(2),
        tsr2: Tsr2Bits::new().with_used_channels(2).with_fast_rate(false),
        samplerate_slow: 0xfffe,
        trigger_position: 0x077660,
    }
    .encode();
    // tsr1 = 1 | 1 << 2 | 2 << 5 = 0x45, tsr2 = 2
    assert_eq!(frame.to_vec(), fixture("01004502feff607600000700"));
}

#[test]
fn set_gain_frame_matches_fixture() {
    let frame = SetGain {
        bits: GainBits::new().with_channel1(2).with_channel2(1),
    }
    .encode();
    // gain bits = 2 | 1 << 2 = 0x06
    assert_eq!(frame.to_vec(), fixture("070f060000000000"));
}

#[test]
fn set_samplerate_5200_frame_matches_fixture() {
    let frame = SetSamplerate5200 {
        samplerate_slow: 0xfffe,
        samplerate_fast: 3,
    }
    .encode();
    assert_eq!(frame.to_vec(), fixture("0c00feff0300"));
}

#[test]
fn set_buffer_5200_frame_matches_fixture() {
    let frame = SetBuffer5200 {
        position_pre: 0xc7ff,
        position_post: 0xfffe,
        used_pre: DTRIGGERPOSITION_ON,
        used_post: DTRIGGERPOSITION_ON,
        buffer_size: 2,
    }
    .encode();
    // dbuffer = 7 | 2 << 3 = 0x17
    assert_eq!(frame.to_vec(), fixture("0d00ffc707fffeff17ff"));
}

#[test]
fn set_trigger_5200_frame_matches_fixture() {
    let frame = SetTrigger5200 {
        bits: ETsrBits::new()
            .with_fast_rate(true)
            .with_used_channels(2)
            .with_trigger_source(1)
            .with_trigger_slope(1)
            .with_trigger_pulse(false),
    }
    .encode();
    // bits = 1 | 2 << 1 | 1 << 3 | 1 << 5 = 0x2d
    assert_eq!(frame.to_vec(), fixture("0e002d0002000000"));
}

#[test]
fn begin_command_frame_matches_fixture() {
    let frame = BeginCommand {
        index: CommandIndex::Index3,
    }
    .encode();
    assert_eq!(frame.to_vec(), fixture("0f010101000000000000"));
}

#[test]
fn set_offset_frame_matches_fixture() {
    let frame = SetOffset {
        channel: [0x0080, 0x00c4],
        trigger: 0x0123,
    }
    .encode();
    assert_eq!(frame.to_vec(), fixture("008000c401230000000000000000000000"));
}

#[test]
fn set_relays_frame_matches_fixture() {
    let frame = SetRelays {
        below_1v: [true, true],
        below_100mv: [false, false],
        coupling_dc: [true, false],
        trigger_ext: false,
    }
    .encode();
    assert_eq!(frame.to_vec(), fixture("0004f70220bfeffe000000000000000000"));
}

#[test]
fn capture_state_fixture_decodes() {
    let mut bytes = fixture("02006077");
    bytes.resize(512, 0);
    let response = CaptureStateResponse::decode(&bytes).unwrap();
    assert_eq!(response.state, CaptureState::Ready);
    assert_eq!(response.trigger_point, 0x7760);
}

#[test]
fn samplerate_fields_round_trip_for_all_families() {
    for requested in [100u32, 5000, 1_000_000, 25_000_000, 50_000_000] {
        let selection = samplerate::select(CommandSet::Base, 50_000_000, requested);
        let frame = SetTriggerAndSamplerate {
            tsr1: Tsr1Bits::new().with_samplerate_fast(selection.fast),
            tsr2: Tsr2Bits::new(),
            samplerate_slow: selection.slow,
            trigger_position: 0,
        };
        let decoded = SetTriggerAndSamplerate::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(
            samplerate::base_divider(decoded.samplerate_slow, decoded.tsr1.samplerate_fast()),
            selection.divider
        );
    }

    for requested in [100u32, 5000, 1_000_000, 100_000_000] {
        let selection = samplerate::select(CommandSet::Dso5200, 100_000_000, requested);
        let frame = SetSamplerate5200 {
            samplerate_slow: selection.slow,
            samplerate_fast: selection.fast,
        };
        let decoded = SetSamplerate5200::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(
            samplerate::dso5200_divider(decoded.samplerate_slow, decoded.samplerate_fast),
            selection.divider
        );
    }
}
