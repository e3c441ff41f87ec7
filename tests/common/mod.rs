//! Shared test fixtures: a scripted transport that stands in for the USB
//! device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hantek_dso::error::DsoError;
use hantek_dso::transport::Transport;

pub const CAPTURE_WAITING: u8 = 0;
pub const CAPTURE_SAMPLING: u8 = 1;
pub const CAPTURE_READY: u8 = 2;

/// Observable state of the scripted device.
pub struct MockState {
    /// Every bulk frame the driver wrote, in order.
    pub bulk_writes: Vec<Vec<u8>>,
    /// Every control write as (request, value, payload).
    pub control_writes: Vec<(u8, u16, Vec<u8>)>,
    /// Scripted capture-state bytes, consumed one per GETCAPTURESTATE.
    /// When exhausted the device keeps reporting WAITING.
    pub capture_states: VecDeque<u8>,
    /// Raw trigger point reported with every capture state.
    pub trigger_point: u16,
    /// Byte value used to fill sample blocks.
    pub sample_byte: u8,
    /// Samples per channel served on GETDATA.
    pub buffer_size: usize,
    /// Whether GETDATA appends the 9-bit MSB block.
    pub high_resolution: bool,
    /// Remaining bulk reads that fail before the device recovers.
    pub fail_bulk_reads: u32,
    /// Pending read data, served in `max_len` chunks.
    read_queue: VecDeque<Vec<u8>>,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            bulk_writes: Vec::new(),
            control_writes: Vec::new(),
            capture_states: VecDeque::new(),
            trigger_point: 0,
            sample_byte: 0x80,
            buffer_size: 10240,
            high_resolution: false,
            fail_bulk_reads: 0,
            read_queue: VecDeque::new(),
        }
    }
}

impl MockState {
    /// Count of bulk frames with the given opcode.
    pub fn command_count(&self, opcode: u8) -> usize {
        self.bulk_writes
            .iter()
            .filter(|frame| frame.first() == Some(&opcode))
            .count()
    }

    pub fn last_command(&self, opcode: u8) -> Option<&Vec<u8>> {
        self.bulk_writes
            .iter()
            .rev()
            .find(|frame| frame.first() == Some(&opcode))
    }
}

/// A [`Transport`] implementation backed by [`MockState`]. Cloning shares
/// the state, so tests keep a handle while the worker owns the transport.
#[derive(Clone)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> (MockTransport, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            MockTransport {
                state: state.clone(),
            },
            state,
        )
    }
}

/// Calibration fixture: every gain step runs from 0x0020 to 0x00e0.
pub fn calibration_fixture() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(72);
    for _ in 0..(2 * 9) {
        bytes.extend_from_slice(&0x0020u16.to_le_bytes());
        bytes.extend_from_slice(&0x00e0u16.to_le_bytes());
    }
    bytes
}

impl Transport for MockTransport {
    async fn bulk_write(&mut self, data: &[u8]) -> Result<usize, DsoError> {
        let mut state = self.state.lock().unwrap();
        state.bulk_writes.push(data.to_vec());
        match data.first() {
            // GETCAPTURESTATE: queue the padded response.
            Some(0x06) => {
                let capture_state = state.capture_states.pop_front().unwrap_or(CAPTURE_WAITING);
                let mut response = vec![capture_state, 0x00];
                response.extend_from_slice(&state.trigger_point.to_le_bytes());
                response.resize(512, 0x00);
                state.read_queue.push_back(response);
            }
            // GETDATA: queue the sample block.
            Some(0x05) => {
                let count = state.buffer_size * 2;
                let mut block = vec![state.sample_byte; count];
                if state.high_resolution {
                    block.extend(std::iter::repeat_n(0u8, count));
                }
                state.read_queue.push_back(block);
            }
            _ => {}
        }
        Ok(data.len())
    }

    async fn bulk_read(&mut self, max_len: usize) -> Result<Vec<u8>, DsoError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_bulk_reads > 0 {
            state.fail_bulk_reads -= 1;
            return Err(DsoError::Protocol("injected transfer failure".into()));
        }
        let Some(front) = state.read_queue.front_mut() else {
            return Ok(Vec::new());
        };
        let take = front.len().min(max_len);
        let chunk: Vec<u8> = front.drain(..take).collect();
        if front.is_empty() {
            state.read_queue.pop_front();
        }
        Ok(chunk)
    }

    async fn control_write(&mut self, request: u8, value: u16, data: &[u8]) -> Result<(), DsoError> {
        let mut state = self.state.lock().unwrap();
        state.control_writes.push((request, value, data.to_vec()));
        Ok(())
    }

    async fn control_read(
        &mut self,
        request: u8,
        value: u16,
        len: usize,
    ) -> Result<Vec<u8>, DsoError> {
        match (request, value) {
            // GETSPEED: high speed, 512-byte packets.
            (0xb2, _) => Ok(vec![0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            // VALUE/DEVICEADDRESS
            (0xa2, 0x0a) => Ok(vec![0x01]),
            // VALUE/CHANNELLEVEL
            (0xa2, 0x08) => Ok(calibration_fixture()),
            _ => Ok(vec![0; len]),
        }
    }
}
