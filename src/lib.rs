pub mod calibration;
pub mod command;
pub mod control;
pub mod device;
pub mod error;
pub mod event;
pub mod model;
pub mod samplerate;
pub mod settings;
pub mod transport;
pub mod trigger;
mod worker;

pub use device::{CaptureFrame, HantekDso};
pub use error::DsoError;
pub use event::{DsoEvent, EventReceiver};
pub use model::{Gain, Model};
pub use settings::{Coupling, DeviceSettings, Slope, TriggerMode};
