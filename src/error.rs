use nusb::transfer::TransferError;
use thiserror::Error;

/// The primary error type for the `hantek-dso` library.
#[derive(Error, Debug)]
pub enum DsoError {
    #[error("no supported oscilloscope found. Is the device connected and its firmware loaded?")]
    DeviceNotFound,

    #[error("unrecognized oscilloscope model (product id {0:#06x})")]
    UnknownModel(u16),

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("timeout during USB operation: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("response too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("channel calibration data unavailable")]
    CalibrationUnavailable,

    #[error("no such channel: {0}")]
    InvalidChannel(usize),

    #[error("protocol error: {0}")]
    Protocol(String),
}
