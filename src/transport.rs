//! USB transport.
//!
//! The capture worker only ever talks to the [`Transport`] trait, which
//! carries the two bulk endpoints and the vendor control pipe. The real
//! implementation sits on top of a claimed `nusb` interface; tests drive the
//! worker with a scripted implementation instead.

use std::future::Future;
use std::time::Duration;

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, RequestBuffer};
use nusb::Interface;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::DsoError;
use crate::model::{Model, VENDOR_ID};

/// OUT endpoint for bulk commands.
pub const ENDPOINT_OUT: u8 = 0x02;
/// IN endpoint for bulk responses and sample data.
pub const ENDPOINT_IN: u8 = 0x86;
/// Default timeout for a single transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(500);
/// Default number of attempts per transfer before giving up.
pub const TRANSFER_ATTEMPTS: u32 = 3;

/// The transfer capability the driver consumes. Implementations resolve the
/// endpoint addressing and timeout handling; callers see plain byte slices.
pub trait Transport: Send + 'static {
    /// Writes a bulk frame to the OUT endpoint, returning the transmitted
    /// byte count.
    fn bulk_write(&mut self, data: &[u8]) -> impl Future<Output = Result<usize, DsoError>> + Send;

    /// Reads up to `max_len` bytes from the IN endpoint.
    fn bulk_read(&mut self, max_len: usize)
    -> impl Future<Output = Result<Vec<u8>, DsoError>> + Send;

    /// Issues a vendor control write with the given request code and value.
    fn control_write(
        &mut self,
        request: u8,
        value: u16,
        data: &[u8],
    ) -> impl Future<Output = Result<(), DsoError>> + Send;

    /// Issues a vendor control read with the given request code and value.
    fn control_read(
        &mut self,
        request: u8,
        value: u16,
        len: usize,
    ) -> impl Future<Output = Result<Vec<u8>, DsoError>> + Send;
}

/// [`Transport`] over a claimed USB interface.
pub struct UsbTransport {
    interface: Interface,
    timeout: Duration,
}

impl UsbTransport {
    /// Finds the first supported scope on the bus, claims it and resolves
    /// its model from the product id.
    pub async fn open() -> Result<(UsbTransport, Model), DsoError> {
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == VENDOR_ID)
            .ok_or(DsoError::DeviceNotFound)?;
        let model = Model::from_product_id(device_info.product_id())
            .ok_or(DsoError::UnknownModel(device_info.product_id()))?;
        info!(
            "found {} on bus {} addr {}",
            model,
            device_info.bus_number(),
            device_info.device_address()
        );

        let device = device_info.open()?;
        let interface = device.detach_and_claim_interface(0)?;
        debug!("interface claimed");

        Ok((
            UsbTransport {
                interface,
                timeout: TRANSFER_TIMEOUT,
            },
            model,
        ))
    }
}

impl Transport for UsbTransport {
    async fn bulk_write(&mut self, data: &[u8]) -> Result<usize, DsoError> {
        let completion = timeout(
            self.timeout,
            self.interface.bulk_out(ENDPOINT_OUT, data.to_vec()),
        )
        .await?;
        let buffer = completion.into_result()?;
        debug!("bulk out: {} bytes", buffer.actual_length());
        Ok(buffer.actual_length())
    }

    async fn bulk_read(&mut self, max_len: usize) -> Result<Vec<u8>, DsoError> {
        let completion = timeout(
            self.timeout,
            self.interface
                .bulk_in(ENDPOINT_IN, RequestBuffer::new(max_len)),
        )
        .await?;
        let data = completion.into_result()?;
        debug!("bulk in: {} bytes", data.len());
        Ok(data)
    }

    async fn control_write(&mut self, request: u8, value: u16, data: &[u8]) -> Result<(), DsoError> {
        let completion = timeout(
            self.timeout,
            self.interface.control_out(ControlOut {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request,
                value,
                index: 0,
                data,
            }),
        )
        .await?;
        completion.into_result()?;
        debug!("control out {request:#04x}/{value:#06x}: {} bytes", data.len());
        Ok(())
    }

    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        len: usize,
    ) -> Result<Vec<u8>, DsoError> {
        let completion = timeout(
            self.timeout,
            self.interface.control_in(ControlIn {
                control_type: ControlType::Vendor,
                recipient: Recipient::Device,
                request,
                value,
                index: 0,
                length: len as u16,
            }),
        )
        .await?;
        let data = completion.into_result()?;
        debug!("control in {request:#04x}/{value:#06x}: {} bytes", data.len());
        Ok(data)
    }
}
