//! The capture worker.
//!
//! One worker task per connection owns the transport for its whole
//! lifetime. Each loop iteration flushes the dirty pending commands, polls
//! the capture state and, once the hardware reports a completed
//! acquisition, fetches and decodes the sample data and publishes it under
//! the capture lock. The terminate flag is honored at the top of every
//! iteration and after every blocking call, so shutdown completes within
//! one poll cycle plus one transfer timeout.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::command::{CaptureState, CaptureStateResponse, CommandCode, plain_command};
use crate::control::{BeginCommand, ConnectionSpeed, ControlRequest};
use crate::device::{CaptureFrame, SharedState};
use crate::error::DsoError;
use crate::event::{DsoEvent, EventSender};
use crate::model::CHANNELS;
use crate::settings::{DeviceSettings, TriggerMode};
use crate::transport::{TRANSFER_ATTEMPTS, Transport};
use crate::trigger::calculate_trigger_point;

/// Delay between capture-state polls.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Consecutive WAITING polls in auto trigger mode before a trigger is
/// forced.
const AUTO_FORCE_POLLS: u32 = 40;

/// Worker-side view of the acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    ArmedWaiting,
    Sampling,
    Ready,
}

pub(crate) struct CaptureWorker<T: Transport> {
    transport: T,
    shared: Arc<SharedState>,
    events: EventSender,
    bulk_packet_len: usize,
    run_state: RunState,
    waiting_polls: u32,
}

impl<T: Transport> CaptureWorker<T> {
    pub(crate) fn new(
        transport: T,
        shared: Arc<SharedState>,
        events: EventSender,
        speed: ConnectionSpeed,
    ) -> Self {
        CaptureWorker {
            transport,
            shared,
            events,
            bulk_packet_len: speed.bulk_packet_len(),
            run_state: RunState::Idle,
            waiting_polls: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        match self.capture_loop().await {
            Ok(()) => debug!("capture worker terminated"),
            Err(error) => {
                warn!("capture worker failed: {error}");
                self.events
                    .send(DsoEvent::StatusMessage {
                        message: format!("oscilloscope communication failed: {error}"),
                        timeout_ms: 0,
                    })
                    .ok();
            }
        }
        self.events.send(DsoEvent::Disconnected).ok();
    }

    async fn capture_loop(&mut self) -> Result<(), DsoError> {
        loop {
            if self.terminated() {
                return Ok(());
            }

            self.flush_pending().await?;

            if !self.shared.sampling.load(Ordering::SeqCst) {
                self.run_state = RunState::Idle;
                self.idle_wait().await;
                continue;
            }

            let response = match self.get_capture_state().await {
                Ok(response) => response,
                Err(error @ DsoError::FrameTooShort { .. }) => {
                    warn!("discarding malformed capture state response: {error}");
                    self.events
                        .send(DsoEvent::StatusMessage {
                            message: format!("malformed capture state response: {error}"),
                            timeout_ms: 1000,
                        })
                        .ok();
                    self.idle_wait().await;
                    continue;
                }
                Err(error) => return Err(error),
            };
            if self.terminated() {
                return Ok(());
            }
            trace!(
                "capture state {:?} (worker {:?})",
                response.state, self.run_state
            );

            match response.state {
                CaptureState::Waiting | CaptureState::Unknown(_) => {
                    if let CaptureState::Unknown(value) = response.state {
                        warn!("unknown capture state {value:#04x}, treating as waiting");
                    }
                    self.run_state = RunState::ArmedWaiting;
                    self.waiting_polls += 1;
                    let auto = {
                        let state = self.shared.control.lock().unwrap();
                        state.settings.trigger_mode == TriggerMode::Auto
                    };
                    if auto && self.waiting_polls >= AUTO_FORCE_POLLS {
                        debug!("no trigger in auto mode, forcing one");
                        let mut state = self.shared.control.lock().unwrap();
                        state.pending.mark(CommandCode::ForceTrigger);
                        drop(state);
                        self.waiting_polls = 0;
                    }
                }
                CaptureState::Sampling => {
                    self.run_state = RunState::Sampling;
                    self.waiting_polls = 0;
                }
                CaptureState::Ready | CaptureState::Ready5200 => {
                    self.run_state = RunState::Ready;
                    self.waiting_polls = 0;
                    match self.fetch_samples(response.trigger_point).await {
                        Ok(()) => {}
                        Err(error @ DsoError::FrameTooShort { .. }) => {
                            warn!("discarding acquisition: {error}");
                            self.events
                                .send(DsoEvent::StatusMessage {
                                    message: format!("acquisition discarded: {error}"),
                                    timeout_ms: 1000,
                                })
                                .ok();
                        }
                        Err(error) => return Err(error),
                    }
                    self.run_state = RunState::Idle;

                    let single = {
                        let mut state = self.shared.control.lock().unwrap();
                        let single = state.settings.trigger_mode == TriggerMode::Single;
                        if !single {
                            // Re-arm for the next acquisition.
                            state.pending.mark(CommandCode::StartSampling);
                            state.pending.mark(CommandCode::EnableTrigger);
                        }
                        single
                    };
                    if single {
                        self.shared.sampling.store(false, Ordering::SeqCst);
                        self.events.send(DsoEvent::SamplingStopped).ok();
                    }
                }
            }

            self.idle_wait().await;
        }
    }

    fn terminated(&self) -> bool {
        self.shared.terminate.load(Ordering::SeqCst)
    }

    /// Sleeps one poll interval, or less when a setter wakes the worker.
    async fn idle_wait(&self) {
        tokio::select! {
            _ = self.shared.wake.notified() => {}
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    /// Transmits every dirty pending command, bulk slots first in slot
    /// order, then the dirty control transfers.
    async fn flush_pending(&mut self) -> Result<(), DsoError> {
        let (bulk, control) = {
            let mut state = self.shared.control.lock().unwrap();
            (state.pending.take_bulk(), state.pending.take_control())
        };
        for (code, frame) in bulk {
            debug!("sending pending command {code:?}");
            self.bulk_command(&frame).await?;
        }
        for (request, frame) in control {
            debug!("sending pending control transfer {request:?}");
            self.control_write_attempts(request.into(), 0, &frame)
                .await?;
        }
        Ok(())
    }

    /// Sends one bulk command, preceded by its BEGINCOMMAND announcement,
    /// retrying the pair up to the attempt bound.
    async fn bulk_command(&mut self, frame: &[u8]) -> Result<(), DsoError> {
        let begin = BeginCommand::default().encode();
        let mut last_error = None;
        for attempt in 1..=TRANSFER_ATTEMPTS {
            let result = async {
                self.transport
                    .control_write(ControlRequest::BeginCommand.into(), 0, &begin)
                    .await?;
                self.transport.bulk_write(frame).await?;
                Ok(())
            }
            .await;
            match result {
                Ok(()) => return Ok(()),
                Err(error) => {
                    debug!("bulk command attempt {attempt} failed: {error}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one attempt"))
    }

    async fn control_write_attempts(
        &mut self,
        request: u8,
        value: u16,
        frame: &[u8],
    ) -> Result<(), DsoError> {
        let mut last_error = None;
        for attempt in 1..=TRANSFER_ATTEMPTS {
            match self.transport.control_write(request, value, frame).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    debug!("control write attempt {attempt} failed: {error}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one attempt"))
    }

    async fn bulk_read_attempts(&mut self, len: usize) -> Result<Vec<u8>, DsoError> {
        let mut last_error = None;
        for attempt in 1..=TRANSFER_ATTEMPTS {
            match self.transport.bulk_read(len).await {
                Ok(data) => return Ok(data),
                Err(error) => {
                    debug!("bulk read attempt {attempt} failed: {error}");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.expect("at least one attempt"))
    }

    async fn get_capture_state(&mut self) -> Result<CaptureStateResponse, DsoError> {
        self.bulk_command(&plain_command(CommandCode::GetCaptureState))
            .await?;
        let bytes = self.bulk_read_attempts(512).await?;
        CaptureStateResponse::decode(&bytes)
    }

    /// Issues GETDATA, reads the full sample block, decodes it into
    /// per-channel voltage arrays and publishes the capture frame.
    async fn fetch_samples(&mut self, raw_trigger_point: u16) -> Result<(), DsoError> {
        // One consistent settings snapshot for the whole acquisition.
        let settings = {
            let state = self.shared.control.lock().unwrap();
            state.settings.clone()
        };

        self.bulk_command(&plain_command(CommandCode::GetData))
            .await?;

        let sample_count = settings.buffer_size * CHANNELS;
        let total = if self.shared.spec.high_resolution {
            // 9-bit models append one MSB byte per sample.
            sample_count * 2
        } else {
            sample_count
        };

        let mut data = BytesMut::with_capacity(total);
        while data.len() < total {
            let want = (total - data.len()).min(self.bulk_packet_len);
            let chunk = self.bulk_read_attempts(want).await?;
            if chunk.is_empty() {
                return Err(DsoError::FrameTooShort {
                    expected: total,
                    actual: data.len(),
                });
            }
            data.extend_from_slice(&chunk);
        }

        let frame = decode_samples(&settings, self.shared.spec.high_resolution, &data, raw_trigger_point);

        {
            let mut captured = self.shared.captured.lock().unwrap();
            *captured = Some(frame);
        }
        self.events
            .send(DsoEvent::SamplesAvailable {
                samplerate: settings.samplerate,
            })
            .ok();
        Ok(())
    }
}

/// Decodes a raw GETDATA block into a capture frame: 9-bit reassembly,
/// channel de-interleaving and scaling to volts.
fn decode_samples(
    settings: &DeviceSettings,
    high_resolution: bool,
    data: &[u8],
    raw_trigger_point: u16,
) -> CaptureFrame {
    let sample_count = settings.buffer_size * CHANNELS;

    // Rebuild the raw sample values. High-resolution models transmit the
    // low bytes first and one MSB byte per sample afterwards; each sample
    // is low8 | (msb & 1) << 8.
    let mut raw = Vec::with_capacity(sample_count);
    if high_resolution {
        let (low, msb) = data.split_at(sample_count);
        for index in 0..sample_count {
            raw.push(low[index] as u16 | ((msb[index] & 1) as u16) << 8);
        }
    } else {
        raw.extend(data[..sample_count].iter().map(|&byte| byte as u16));
    }

    let mut samples: [Vec<f64>; CHANNELS] = Default::default();
    if settings.fast_rate {
        // One channel uses the whole buffer.
        let channel = settings
            .channel_used
            .iter()
            .position(|&used| used)
            .unwrap_or(0);
        let scale = sample_scaler(settings, channel);
        samples[channel] = raw.iter().map(|&value| scale(value)).collect();
    } else {
        for channel in 0..CHANNELS {
            if !settings.channel_used[channel] {
                continue;
            }
            let scale = sample_scaler(settings, channel);
            // Samples are interleaved with the channel order reversed:
            // channel 2 comes first in every pair.
            samples[channel] = (0..settings.buffer_size)
                .map(|position| scale(raw[position * CHANNELS + (CHANNELS - 1 - channel)]))
                .collect();
        }
    }

    CaptureFrame {
        samples,
        samplerate: settings.samplerate,
        trigger_point: calculate_trigger_point(raw_trigger_point, settings.buffer_size),
    }
}

/// Raw-to-volts conversion for one channel under the current settings.
fn sample_scaler(settings: &DeviceSettings, channel: usize) -> impl Fn(u16) -> f64 {
    let range = settings.sample_range[channel] as f64;
    let offset = settings.offset_real[channel];
    let full_screen = settings.gain[channel].full_screen_volts();
    move |value| (value as f64 / range - offset) * full_screen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn settings() -> DeviceSettings {
        let mut settings = DeviceSettings::initial(Model::Dso2090.spec());
        settings.buffer_size = 4;
        settings.offset_real = [0.0; CHANNELS];
        settings.gain = [crate::model::Gain::Mv10; CHANNELS];
        settings
    }

    #[test]
    fn nine_bit_samples_reassemble_from_msb_block() {
        let mut settings = settings();
        settings.sample_range = [512; CHANNELS];
        settings.channel_used = [true, false];
        settings.fast_rate = true;
        // 8 low bytes, then 8 MSB bytes; sample 2 gets its ninth bit.
        let mut data = vec![0u8; 16];
        data[2] = 0x34;
        data[8 + 2] = 0x01;
        let frame = decode_samples(&settings, true, &data, 0);
        let expected = 0x134 as f64 / 512.0 * 0.08;
        assert!((frame.samples[0][2] - expected).abs() < 1e-12);
    }

    #[test]
    fn normal_mode_deinterleaves_with_swapped_channels() {
        let mut settings = settings();
        settings.fast_rate = false;
        settings.channel_used = [true, true];
        settings.sample_range = [255; CHANNELS];
        // Pairs of (channel 2, channel 1) bytes.
        let data = vec![10, 20, 30, 40, 50, 60, 70, 80];
        let frame = decode_samples(&settings, false, &data, 0);
        let volts = |byte: u8| byte as f64 / 255.0 * 0.08;
        assert_eq!(frame.samples[0].len(), 4);
        assert!((frame.samples[0][0] - volts(20)).abs() < 1e-12);
        assert!((frame.samples[1][0] - volts(10)).abs() < 1e-12);
        assert!((frame.samples[0][3] - volts(80)).abs() < 1e-12);
        assert!((frame.samples[1][3] - volts(70)).abs() < 1e-12);
    }

    #[test]
    fn fast_rate_gives_the_whole_buffer_to_one_channel() {
        let mut settings = settings();
        settings.fast_rate = true;
        settings.channel_used = [false, true];
        let data = vec![1u8; 8];
        let frame = decode_samples(&settings, false, &data, 0);
        assert!(frame.samples[0].is_empty());
        assert_eq!(frame.samples[1].len(), 8);
    }

    #[test]
    fn trigger_point_lands_inside_buffer() {
        let settings = settings();
        let data = vec![0u8; 8];
        let frame = decode_samples(&settings, false, &data, 0xffff);
        assert!(frame.trigger_point < settings.buffer_size);
    }
}
