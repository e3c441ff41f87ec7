//! Capture state machine scenarios driven through a scripted transport.

mod common;

use std::time::Duration;

use common::*;
use hantek_dso::{DsoEvent, HantekDso, Model, TriggerMode};
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut hantek_dso::EventReceiver) -> DsoEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

async fn wait_for(
    events: &mut hantek_dso::EventReceiver,
    mut predicate: impl FnMut(&DsoEvent) -> bool,
) -> DsoEvent {
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn poll_sequence_produces_exactly_one_capture() {
    let (transport, state) = MockTransport::new();
    state.lock().unwrap().capture_states.extend([
        CAPTURE_WAITING,
        CAPTURE_WAITING,
        CAPTURE_SAMPLING,
        CAPTURE_READY,
    ]);
    state.lock().unwrap().trigger_point = 0x0040;

    let (dso, mut events) = HantekDso::with_transport(transport, Model::Dso2090)
        .await
        .expect("connect failed");
    dso.set_trigger_mode(TriggerMode::Single);
    dso.start_sampling();

    wait_for(&mut events, |event| {
        matches!(event, DsoEvent::SamplesAvailable { .. })
    })
    .await;
    // Single mode stops after one capture.
    wait_for(&mut events, |event| *event == DsoEvent::SamplingStopped).await;

    {
        let state = state.lock().unwrap();
        assert_eq!(
            state.command_count(0x05),
            1,
            "exactly one GETDATA transfer expected"
        );
        assert_eq!(state.command_count(0x06), 4, "one transfer per poll");

        // The dirty configuration frames were flushed before the first
        // capture-state poll.
        let first_poll = state
            .bulk_writes
            .iter()
            .position(|frame| frame.first() == Some(&0x06))
            .expect("no GETCAPTURESTATE transfer");
        for opcode in [0x00u8, 0x01, 0x07] {
            let config = state
                .bulk_writes
                .iter()
                .position(|frame| frame.first() == Some(&opcode))
                .unwrap_or_else(|| panic!("command {opcode:#04x} never transmitted"));
            assert!(config < first_poll, "command {opcode:#04x} flushed late");
        }
    }

    dso.with_captured(|frame| {
        let frame = frame.expect("no capture frame published");
        assert_eq!(frame.samples[0].len(), 10240);
        assert_eq!(frame.samples[1].len(), 10240);
        assert!(frame.trigger_point < 10240);
    });

    dso.shutdown().await;
}

#[tokio::test]
async fn transport_failure_reports_once_and_disconnects() {
    let (transport, state) = MockTransport::new();
    // Every read fails: the GETCAPTURESTATE response never arrives.
    state.lock().unwrap().fail_bulk_reads = u32::MAX;

    let (dso, mut events) = HantekDso::with_transport(transport, Model::Dso2090)
        .await
        .expect("connect failed");
    dso.start_sampling();

    let mut status_messages = 0;
    loop {
        match next_event(&mut events).await {
            DsoEvent::StatusMessage { .. } => status_messages += 1,
            DsoEvent::Disconnected => break,
            _ => {}
        }
    }
    assert_eq!(
        status_messages, 1,
        "one status message per failed connection, not one per attempt"
    );

    dso.shutdown().await;
}

#[tokio::test]
async fn normal_mode_rearms_after_each_capture() {
    let (transport, state) = MockTransport::new();
    state
        .lock()
        .unwrap()
        .capture_states
        .extend([CAPTURE_READY, CAPTURE_WAITING, CAPTURE_WAITING]);

    let (dso, mut events) = HantekDso::with_transport(transport, Model::Dso2090)
        .await
        .expect("connect failed");
    dso.set_trigger_mode(TriggerMode::Normal);
    dso.start_sampling();

    wait_for(&mut events, |event| {
        matches!(event, DsoEvent::SamplesAvailable { .. })
    })
    .await;

    // The worker re-arms: another STARTSAMPLING/ENABLETRIGGER pair follows
    // the one from start_sampling().
    timeout(EVENT_TIMEOUT, async {
        loop {
            {
                let state = state.lock().unwrap();
                if state.command_count(0x03) >= 2 && state.command_count(0x04) >= 2 {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker never re-armed");

    dso.shutdown().await;
}

#[tokio::test]
async fn nine_bit_model_reconstructs_msb_block() {
    let (transport, state) = MockTransport::new();
    {
        let mut state = state.lock().unwrap();
        state.capture_states.push_back(7); // READY5200
        state.high_resolution = true;
        state.sample_byte = 0x34;
    }

    let (dso, mut events) = HantekDso::with_transport(transport, Model::Dso5200)
        .await
        .expect("connect failed");
    dso.set_trigger_mode(TriggerMode::Single);
    dso.start_sampling();

    wait_for(&mut events, |event| {
        matches!(event, DsoEvent::SamplesAvailable { .. })
    })
    .await;

    // MSB block is all zero: samples decode as 0x034 out of the 512 range.
    let settings = dso.settings();
    dso.with_captured(|frame| {
        let frame = frame.expect("no capture frame published");
        let expected =
            (0x34 as f64 / 512.0 - settings.offset_real[0]) * settings.gain[0].full_screen_volts();
        assert!((frame.samples[0][0] - expected).abs() < 1e-9);
    });

    dso.shutdown().await;
}

#[tokio::test]
async fn facade_clamps_and_snaps_settings() {
    let (transport, state) = MockTransport::new();
    let (dso, _events) = HantekDso::with_transport(transport, Model::Dso2090)
        .await
        .expect("connect failed");

    assert_eq!(dso.set_trigger_position(-0.5), 0.0);
    assert_eq!(dso.set_trigger_position(1.5), 1.0);

    // 30 mV requested: the 50 mV step is the nearest supported at or above.
    let resolved = dso.set_gain(0, 0.03).expect("valid channel");
    assert_eq!(resolved, 0.05);
    assert!(dso.set_gain(7, 0.03).is_err());

    // The quantized offset comes back, not the request.
    let offset = dso.set_offset(0, 0.3).expect("valid channel");
    assert!((0.0..=1.0).contains(&offset));

    // Give the worker a moment to flush, then check the gain bits on the
    // wire: channel 1 carries ladder code 2 (50 mV).
    tokio::time::sleep(Duration::from_millis(200)).await;
    {
        let state = state.lock().unwrap();
        let frame = state.last_command(0x07).expect("SETGAIN never transmitted");
        assert_eq!(frame[2] & 0x03, 2);
    }

    dso.shutdown().await;
}

#[tokio::test]
async fn samplerate_reports_achieved_value() {
    let (transport, _state) = MockTransport::new();
    let (dso, _events) = HantekDso::with_transport(transport, Model::Dso2090)
        .await
        .expect("connect failed");

    // Both channels active: 50 MS/s ceiling, divider 50.
    assert_eq!(dso.set_samplerate(1_000_000), 1_000_000.0);
    // Unachievable request resolves to the closest divider.
    assert_eq!(dso.set_samplerate(60_000_000), 50_000_000.0);

    // Disabling a channel doubles the ceiling through fast-rate mode.
    dso.set_channel_used(1, false).expect("valid channel");
    let settings = dso.settings();
    assert!(settings.fast_rate);
    assert_eq!(settings.samplerate, 100_000_000.0 / 2.0);

    dso.shutdown().await;
}
