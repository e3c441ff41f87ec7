//! The protocol-independent device control facade.
//!
//! [`HantekDso`] owns the cached settings and the pending command table.
//! Setters validate and clamp their input, update the cache, re-encode the
//! affected command frames and mark them dirty; the capture worker picks
//! them up on its next loop iteration. Nothing here touches the transport,
//! which keeps the worker the single writer on the USB pipes.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::calibration::CalibrationTable;
use crate::command::{
    COMMAND_COUNT, CommandCode, FilterBits, GainBits, SetBuffer5200, SetFilter, SetGain,
    SetLogicalData, SetSamplerate5200, SetTrigger5200, SetTriggerAndSamplerate, Tsr1Bits, Tsr2Bits,
    DTRIGGERPOSITION_OFF, DTRIGGERPOSITION_ON, ETsrBits, plain_command,
};
use crate::control::{ControlRequest, ControlValue, ConnectionSpeed, SetOffset, SetRelays};
use crate::error::DsoError;
use crate::event::{self, DsoEvent, EventReceiver, EventSender};
use crate::model::{BufferSizeId, CHANNELS, CommandSet, Gain, Model, ModelSpec};
use crate::samplerate;
use crate::settings::{Coupling, DeviceSettings, Slope, TriggerMode};
use crate::transport::{Transport, UsbTransport};
use crate::trigger;
use crate::worker::CaptureWorker;

/// One completed acquisition. Channels that were disabled during the
/// capture carry an empty sample vector.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrame {
    pub samples: [Vec<f64>; CHANNELS],
    /// The samplerate the capture was taken at.
    pub samplerate: f64,
    /// Buffer-relative index of the trigger event.
    pub trigger_point: usize,
}

/// Index of the SETOFFSET slot in the pending control table.
pub(crate) const CONTROL_SETOFFSET: usize = 0;
/// Index of the SETRELAYS slot in the pending control table.
pub(crate) const CONTROL_SETRELAYS: usize = 1;
pub(crate) const CONTROL_SLOTS: usize = 2;

/// The pending command table: one pre-encoded frame per settable command
/// plus the two control transfers that need retransmission. Setters rebuild
/// the frames and raise the dirty flags; the worker drains them in slot
/// order, oldest slot first.
#[derive(Debug, Clone)]
pub(crate) struct PendingCommands {
    set_filter: SetFilter,
    set_trigger_and_samplerate: SetTriggerAndSamplerate,
    set_gain: SetGain,
    set_logical_data: SetLogicalData,
    set_samplerate_5200: SetSamplerate5200,
    set_buffer_5200: SetBuffer5200,
    set_trigger_5200: SetTrigger5200,
    command_dirty: [bool; COMMAND_COUNT],
    set_offset: SetOffset,
    set_relays: SetRelays,
    control_dirty: [bool; CONTROL_SLOTS],
}

impl PendingCommands {
    fn new() -> Self {
        PendingCommands {
            set_filter: SetFilter::default(),
            set_trigger_and_samplerate: SetTriggerAndSamplerate::default(),
            set_gain: SetGain::default(),
            set_logical_data: SetLogicalData::default(),
            set_samplerate_5200: SetSamplerate5200::default(),
            set_buffer_5200: SetBuffer5200::default(),
            set_trigger_5200: SetTrigger5200::default(),
            command_dirty: [false; COMMAND_COUNT],
            set_offset: SetOffset::default(),
            set_relays: SetRelays::default(),
            control_dirty: [false; CONTROL_SLOTS],
        }
    }

    pub(crate) fn mark(&mut self, code: CommandCode) {
        self.command_dirty[u8::from(code) as usize] = true;
    }

    fn mark_control(&mut self, slot: usize) {
        self.control_dirty[slot] = true;
    }

    /// Marks every frame that programs the device, used once at connection
    /// time so the first flush applies the full configuration.
    fn mark_all(&mut self, command_set: CommandSet) {
        self.mark(CommandCode::SetFilter);
        self.mark(CommandCode::SetGain);
        match command_set {
            CommandSet::Base => self.mark(CommandCode::SetTriggerAndSamplerate),
            CommandSet::Dso5200 => {
                self.mark(CommandCode::SetSamplerate5200);
                self.mark(CommandCode::SetBuffer5200);
                self.mark(CommandCode::SetTrigger5200);
            }
        }
        self.mark_control(CONTROL_SETOFFSET);
        self.mark_control(CONTROL_SETRELAYS);
    }

    /// Drains the dirty bulk command slots in opcode order.
    pub(crate) fn take_bulk(&mut self) -> Vec<(CommandCode, Vec<u8>)> {
        let mut frames = Vec::new();
        for slot in 0..COMMAND_COUNT {
            if !self.command_dirty[slot] {
                continue;
            }
            self.command_dirty[slot] = false;
            let code = CommandCode::from(slot as u8);
            let frame = match code {
                CommandCode::SetFilter => self.set_filter.encode().to_vec(),
                CommandCode::SetTriggerAndSamplerate => {
                    self.set_trigger_and_samplerate.encode().to_vec()
                }
                CommandCode::SetGain => self.set_gain.encode().to_vec(),
                CommandCode::SetLogicalData => self.set_logical_data.encode().to_vec(),
                CommandCode::SetSamplerate5200 => self.set_samplerate_5200.encode().to_vec(),
                CommandCode::SetBuffer5200 => self.set_buffer_5200.encode().to_vec(),
                CommandCode::SetTrigger5200 => self.set_trigger_5200.encode().to_vec(),
                CommandCode::ForceTrigger
                | CommandCode::StartSampling
                | CommandCode::EnableTrigger => plain_command(code).to_vec(),
                _ => continue,
            };
            frames.push((code, frame));
        }
        frames
    }

    /// Drains the dirty control transfer slots.
    pub(crate) fn take_control(&mut self) -> Vec<(ControlRequest, Vec<u8>)> {
        let mut frames = Vec::new();
        if self.control_dirty[CONTROL_SETOFFSET] {
            self.control_dirty[CONTROL_SETOFFSET] = false;
            frames.push((ControlRequest::SetOffset, self.set_offset.encode().to_vec()));
        }
        if self.control_dirty[CONTROL_SETRELAYS] {
            self.control_dirty[CONTROL_SETRELAYS] = false;
            frames.push((ControlRequest::SetRelays, self.set_relays.encode().to_vec()));
        }
        frames
    }
}

/// State shared between the facade and the capture worker.
pub(crate) struct SharedState {
    pub(crate) spec: &'static ModelSpec,
    pub(crate) calibration: CalibrationTable,
    pub(crate) control: Mutex<ControlState>,
    /// The sample-data lock; held only to publish or consume a frame.
    pub(crate) captured: Mutex<Option<CaptureFrame>>,
    pub(crate) sampling: AtomicBool,
    pub(crate) terminate: AtomicBool,
    pub(crate) wake: Notify,
}

pub(crate) struct ControlState {
    pub(crate) settings: DeviceSettings,
    pub(crate) pending: PendingCommands,
}

/// Rebuilds every settable frame from the cached settings. Called by every
/// setter after it updated the cache, so the pending table always holds the
/// encoding of the values in effect; building all frames keeps the
/// interdependent ones (samplerate, trigger position, channel usage share
/// one frame on the base family) consistent without per-setter plumbing.
fn rebuild_frames(spec: &ModelSpec, calibration: &CalibrationTable, state: &mut ControlState) {
    let settings = &mut state.settings;
    let pending = &mut state.pending;

    // Samplerate registers. A single active channel may take both sample
    // buffers for a higher rate, but fast-rate mode only divides through
    // the fast register value, so it engages only when the requested rate
    // is out of reach of the normal encoding.
    let single_channel = settings.used_count() <= 1;
    let normal_ceiling = samplerate::rate_ceiling(spec, false, settings.buffer_id);
    settings.fast_rate = single_channel && settings.samplerate_target > normal_ceiling;
    let selection = if settings.fast_rate {
        let ceiling = samplerate::rate_ceiling(spec, true, settings.buffer_id);
        samplerate::select_fast_rate(spec.command_set, ceiling, settings.samplerate_target)
    } else {
        samplerate::select(spec.command_set, normal_ceiling, settings.samplerate_target)
    };
    settings.samplerate_divider = selection.divider;
    settings.samplerate = selection.samplerate;

    match spec.command_set {
        CommandSet::Base => {
            pending.set_trigger_and_samplerate = SetTriggerAndSamplerate {
                tsr1: Tsr1Bits::new()
                    .with_trigger_source(settings.trigger_source_code())
                    .with_buffer_size(settings.buffer_id.into())
                    .with_samplerate_fast(selection.fast),
                tsr2: Tsr2Bits::new()
                    .with_used_channels(settings.used_channels_code())
                    .with_fast_rate(settings.fast_rate)
                    // The slope bit's meaning flips when the fast samplerate
                    // value is odd.
                    .with_trigger_slope(settings.trigger_slope.bit() ^ (selection.fast & 1 == 1)),
                samplerate_slow: selection.slow,
                trigger_position: trigger::base_position(
                    settings.trigger_position,
                    settings.buffer_id,
                    settings.buffer_size,
                ),
            };
        }
        CommandSet::Dso5200 => {
            pending.set_samplerate_5200 = SetSamplerate5200 {
                samplerate_slow: selection.slow,
                samplerate_fast: selection.fast,
            };
            let (pre, post) = trigger::dso5200_position(
                settings.trigger_position,
                settings.buffer_id == BufferSizeId::Large,
            );
            let position_used = if settings.buffer_id == BufferSizeId::Roll {
                DTRIGGERPOSITION_OFF
            } else {
                DTRIGGERPOSITION_ON
            };
            pending.set_buffer_5200 = SetBuffer5200 {
                position_pre: pre,
                position_post: post,
                used_pre: position_used,
                used_post: position_used,
                buffer_size: settings.buffer_id.into(),
            };
            pending.set_trigger_5200 = SetTrigger5200 {
                // The ETsr fast-rate bit is active low.
                bits: ETsrBits::new()
                    .with_fast_rate(!settings.fast_rate)
                    .with_used_channels(settings.used_channels_code())
                    .with_trigger_source(settings.trigger_source_code())
                    .with_trigger_slope(settings.trigger_slope.bit() as u8)
                    .with_trigger_pulse(false),
            };
        }
    }

    pending.set_filter = SetFilter {
        bits: FilterBits::new()
            .with_channel1(!settings.channel_used[0])
            .with_channel2(!settings.channel_used[1])
            .with_trigger(false),
    };

    pending.set_gain = SetGain {
        bits: GainBits::new()
            .with_channel1(settings.gain[0].ladder_code())
            .with_channel2(settings.gain[1].ladder_code()),
    };

    // Channel offsets and the trigger level share the SETOFFSET transfer.
    let mut levels = [0u16; CHANNELS];
    for channel in 0..CHANNELS {
        let (raw, real) =
            calibration.resolve_offset(channel, settings.gain[channel], settings.offset[channel]);
        levels[channel] = raw;
        settings.offset_real[channel] = real;
    }
    let trigger_channel = if settings.trigger_special {
        0
    } else {
        settings.trigger_source.min(CHANNELS - 1)
    };
    pending.set_offset = SetOffset {
        channel: levels,
        trigger: calibration.resolve_trigger_level(
            trigger_channel,
            settings.gain[trigger_channel],
            settings.offset_real[trigger_channel],
            settings.trigger_level[trigger_channel],
        ),
    };

    pending.set_relays = SetRelays {
        below_1v: [settings.gain[0] < Gain::V1, settings.gain[1] < Gain::V1],
        below_100mv: [settings.gain[0] < Gain::Mv100, settings.gain[1] < Gain::Mv100],
        coupling_dc: [
            settings.coupling[0] == Coupling::DC,
            settings.coupling[1] == Coupling::DC,
        ],
        trigger_ext: settings.trigger_special,
    };
}

/// Handle to a connected oscilloscope.
///
/// All setters may be called concurrently from any task; they only touch
/// the settings cache and the pending table and return immediately with the
/// value actually in effect.
pub struct HantekDso {
    shared: Arc<SharedState>,
    events: EventSender,
    worker: Option<JoinHandle<()>>,
}

impl HantekDso {
    /// Finds the first supported scope on the bus and connects to it.
    pub async fn connect() -> Result<(Self, EventReceiver), DsoError> {
        let (transport, model) = UsbTransport::open().await?;
        Self::with_transport(transport, model).await
    }

    /// Connects through an already opened transport. This is the seam the
    /// integration tests use.
    pub async fn with_transport<T: Transport + Sync>(
        mut transport: T,
        model: Model,
    ) -> Result<(Self, EventReceiver), DsoError> {
        let spec = model.spec();
        let (events, receiver) = event::channel();

        let speed_bytes = transport
            .control_read(ControlRequest::GetSpeed.into(), 0, 10)
            .await?;
        let speed = ConnectionSpeed::decode(&speed_bytes)?;

        let address = transport
            .control_read(
                ControlRequest::Value.into(),
                u8::from(ControlValue::DeviceAddress) as u16,
                ControlValue::DeviceAddress.len(),
            )
            .await?;
        info!(
            "connected to {} (address {}, {:?} speed)",
            model,
            address.first().copied().unwrap_or(0),
            speed
        );

        let calibration = match CalibrationTable::fetch(&mut transport).await {
            Ok(table) => table,
            Err(error) => {
                warn!("falling back to uncalibrated offsets: {error}");
                events
                    .send(DsoEvent::StatusMessage {
                        message: "channel calibration unavailable, offsets are uncalibrated"
                            .into(),
                        timeout_ms: 5000,
                    })
                    .ok();
                CalibrationTable::identity()
            }
        };

        let mut state = ControlState {
            settings: DeviceSettings::initial(spec),
            pending: PendingCommands::new(),
        };
        rebuild_frames(spec, &calibration, &mut state);
        state.pending.mark_all(spec.command_set);

        let shared = Arc::new(SharedState {
            spec,
            calibration,
            control: Mutex::new(state),
            captured: Mutex::new(None),
            sampling: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let worker = CaptureWorker::new(transport, shared.clone(), events.clone(), speed);
        let handle = tokio::spawn(worker.run());

        events.send(DsoEvent::Connected { model }).ok();
        Ok((
            HantekDso {
                shared,
                events,
                worker: Some(handle),
            },
            receiver,
        ))
    }

    pub fn model(&self) -> Model {
        self.shared.spec.model
    }

    /// A snapshot of the settings currently in effect.
    pub fn settings(&self) -> DeviceSettings {
        self.shared.control.lock().unwrap().settings.clone()
    }

    fn with_state<R>(&self, f: impl FnOnce(&ModelSpec, &CalibrationTable, &mut ControlState) -> R) -> R {
        let mut state = self.shared.control.lock().unwrap();
        let result = f(self.shared.spec, &self.shared.calibration, &mut state);
        drop(state);
        self.shared.wake.notify_one();
        result
    }

    /// Requests a samplerate in S/s and returns the rate actually achieved
    /// by the closest register encoding.
    pub fn set_samplerate(&self, samplerate: u32) -> f64 {
        self.with_state(|spec, calibration, state| {
            state.settings.samplerate_target = samplerate;
            rebuild_frames(spec, calibration, state);
            mark_samplerate(spec, state);
            state.settings.samplerate
        })
    }

    /// Requests a buffer size in samples; the size is snapped to the next
    /// supported buffer and returned.
    pub fn set_buffer_size(&self, size: usize) -> usize {
        self.with_state(|spec, calibration, state| {
            let id = if size <= spec.buffer_small {
                BufferSizeId::Small
            } else {
                BufferSizeId::Large
            };
            state.settings.buffer_id = id;
            state.settings.buffer_size = spec.buffer_len(id).unwrap_or(spec.buffer_small);
            rebuild_frames(spec, calibration, state);
            mark_samplerate(spec, state);
            if spec.command_set == CommandSet::Dso5200 {
                state.pending.mark(CommandCode::SetBuffer5200);
            }
            state.settings.buffer_size
        })
    }

    /// Enables or disables a channel. Disabling down to one channel frees
    /// the second buffer for fast-rate mode.
    pub fn set_channel_used(&self, channel: usize, used: bool) -> Result<(), DsoError> {
        self.check_channel(channel)?;
        self.with_state(|spec, calibration, state| {
            state.settings.channel_used[channel] = used;
            rebuild_frames(spec, calibration, state);
            state.pending.mark(CommandCode::SetFilter);
            mark_samplerate(spec, state);
            if spec.command_set == CommandSet::Dso5200 {
                state.pending.mark(CommandCode::SetTrigger5200);
            }
        });
        Ok(())
    }

    pub fn set_coupling(&self, channel: usize, coupling: Coupling) -> Result<Coupling, DsoError> {
        self.check_channel(channel)?;
        self.with_state(|spec, calibration, state| {
            state.settings.coupling[channel] = coupling;
            rebuild_frames(spec, calibration, state);
            state.pending.mark_control(CONTROL_SETRELAYS);
        });
        Ok(coupling)
    }

    /// Requests a gain in volts per division and returns the volts per
    /// division of the step actually selected (the nearest supported step
    /// at or above the request).
    pub fn set_gain(&self, channel: usize, volts_per_div: f64) -> Result<f64, DsoError> {
        self.check_channel(channel)?;
        Ok(self.with_state(|spec, calibration, state| {
            let gain = Gain::snap(volts_per_div);
            state.settings.gain[channel] = gain;
            rebuild_frames(spec, calibration, state);
            state.pending.mark(CommandCode::SetGain);
            state.pending.mark_control(CONTROL_SETRELAYS);
            state.pending.mark_control(CONTROL_SETOFFSET);
            gain.volts_per_div()
        }))
    }

    /// Sets the logical screen offset of a channel, 0.0 bottom to 1.0 top,
    /// and returns the offset actually in effect after DAC quantization.
    pub fn set_offset(&self, channel: usize, offset: f64) -> Result<f64, DsoError> {
        self.check_channel(channel)?;
        Ok(self.with_state(|spec, calibration, state| {
            state.settings.offset[channel] = offset.clamp(0.0, 1.0);
            rebuild_frames(spec, calibration, state);
            state.pending.mark_control(CONTROL_SETOFFSET);
            state.settings.offset_real[channel]
        }))
    }

    pub fn set_trigger_mode(&self, mode: TriggerMode) -> TriggerMode {
        self.with_state(|_, _, state| {
            state.settings.trigger_mode = mode;
            mode
        })
    }

    /// Selects the trigger source: a channel id, or with `special` one of
    /// the external inputs.
    pub fn set_trigger_source(&self, special: bool, id: usize) -> Result<(), DsoError> {
        let limit = if special { 2 } else { CHANNELS };
        if id >= limit {
            return Err(DsoError::InvalidChannel(id));
        }
        self.with_state(|spec, calibration, state| {
            state.settings.trigger_special = special;
            state.settings.trigger_source = id;
            rebuild_frames(spec, calibration, state);
            mark_trigger(spec, state);
            state.pending.mark_control(CONTROL_SETOFFSET);
            state.pending.mark_control(CONTROL_SETRELAYS);
        });
        Ok(())
    }

    /// Sets the trigger level of a channel in volts; the level is clamped
    /// to the voltage window currently on screen and returned.
    pub fn set_trigger_level(&self, channel: usize, level: f64) -> Result<f64, DsoError> {
        self.check_channel(channel)?;
        Ok(self.with_state(|spec, calibration, state| {
            let full_screen = state.settings.gain[channel].full_screen_volts();
            let offset_real = state.settings.offset_real[channel];
            let clamped = level.clamp(
                -offset_real * full_screen,
                (1.0 - offset_real) * full_screen,
            );
            state.settings.trigger_level[channel] = clamped;
            rebuild_frames(spec, calibration, state);
            state.pending.mark_control(CONTROL_SETOFFSET);
            clamped
        }))
    }

    pub fn set_trigger_slope(&self, slope: Slope) -> Slope {
        self.with_state(|spec, calibration, state| {
            state.settings.trigger_slope = slope;
            rebuild_frames(spec, calibration, state);
            mark_trigger(spec, state);
            slope
        })
    }

    /// Sets the pretrigger position, 0.0 left to 1.0 right; out-of-range
    /// fractions are clamped and the resolved value returned.
    pub fn set_trigger_position(&self, position: f64) -> f64 {
        self.with_state(|spec, calibration, state| {
            state.settings.trigger_position = position.clamp(0.0, 1.0);
            rebuild_frames(spec, calibration, state);
            match spec.command_set {
                CommandSet::Base => state.pending.mark(CommandCode::SetTriggerAndSamplerate),
                CommandSet::Dso5200 => state.pending.mark(CommandCode::SetBuffer5200),
            }
            state.settings.trigger_position
        })
    }

    /// Arms the scope: the worker transmits the start and trigger-enable
    /// commands and begins polling the capture state.
    pub fn start_sampling(&self) {
        self.with_state(|_, _, state| {
            state.pending.mark(CommandCode::StartSampling);
            state.pending.mark(CommandCode::EnableTrigger);
        });
        self.shared.sampling.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        self.events.send(DsoEvent::SamplingStarted).ok();
    }

    /// Stops acquisition after the current capture cycle.
    pub fn stop_sampling(&self) {
        self.shared.sampling.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
        self.events.send(DsoEvent::SamplingStopped).ok();
    }

    /// Forces a trigger event regardless of the trigger condition.
    pub fn force_trigger(&self) {
        self.with_state(|_, _, state| {
            state.pending.mark(CommandCode::ForceTrigger);
        });
    }

    /// Gives scoped access to the most recent capture. The closure must
    /// copy out whatever it wants to keep; the frame is replaced by the
    /// next completed acquisition.
    pub fn with_captured<R>(&self, f: impl FnOnce(Option<&CaptureFrame>) -> R) -> R {
        let guard = self.shared.captured.lock().unwrap();
        f(guard.as_ref())
    }

    /// Terminates the capture worker and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        if let Some(handle) = self.worker.take() {
            handle.await.ok();
        }
    }

    fn check_channel(&self, channel: usize) -> Result<(), DsoError> {
        if channel >= CHANNELS {
            return Err(DsoError::InvalidChannel(channel));
        }
        Ok(())
    }
}

impl Drop for HantekDso {
    fn drop(&mut self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }
}

/// Marks the frame(s) that carry the samplerate for the model's command
/// set.
fn mark_samplerate(spec: &ModelSpec, state: &mut ControlState) {
    match spec.command_set {
        CommandSet::Base => state.pending.mark(CommandCode::SetTriggerAndSamplerate),
        CommandSet::Dso5200 => {
            state.pending.mark(CommandCode::SetSamplerate5200);
            state.pending.mark(CommandCode::SetBuffer5200);
        }
    }
}

/// Marks the frame(s) that carry the trigger configuration.
fn mark_trigger(spec: &ModelSpec, state: &mut ControlState) {
    match spec.command_set {
        CommandSet::Base => state.pending.mark(CommandCode::SetTriggerAndSamplerate),
        CommandSet::Dso5200 => state.pending.mark(CommandCode::SetTrigger5200),
    }
}
