//! Driver events.
//!
//! The capture worker and the facade publish lifecycle and acquisition
//! events over an unbounded channel so that subscribers can never stall the
//! worker. Sample data itself stays behind the capture lock; the
//! `SamplesAvailable` event only announces that a new frame was published.

use tokio::sync::mpsc;

use crate::model::Model;

#[derive(Debug, Clone, PartialEq)]
pub enum DsoEvent {
    Connected { model: Model },
    Disconnected,
    SamplingStarted,
    SamplingStopped,
    StatusMessage { message: String, timeout_ms: u32 },
    SamplesAvailable { samplerate: f64 },
}

pub type EventSender = mpsc::UnboundedSender<DsoEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DsoEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
