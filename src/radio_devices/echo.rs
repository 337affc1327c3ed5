//! # Radio Device Echo - Loopback Device for Testing
//!
//! The echo device hears exactly what it sent: the last transmitted packet is
//! handed back by the next receive. A node on an echo radio therefore overhears
//! its own frames, which exercises the self-origin path without a second node.
//!
//! - A transmit overwrites any packet that was not received yet
//! - A receive with nothing pending waits out the full timeout
//! - `failing_inits` makes the first inits fail, for init retry tests

use embassy_time::{Duration, Timer};
use log::{log, Level};

use crate::radio_devices::{frequency_khz, RadioChannel, RadioError};
use crate::{RadioSettings, RADIO_PACKET_SIZE};

/// RSSI reported for echoed packets
const ECHO_RSSI: i16 = -30;

/// Echo radio device - loopback implementation for testing
pub struct RadioDevice {
    pending: [u8; RADIO_PACKET_SIZE],
    pending_length: Option<usize>,
    failing_inits: u32,
    initialized: bool,
    sent_count: u32,
}

impl Default for RadioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioDevice {
    pub const fn new() -> Self {
        Self::failing_inits(0)
    }

    /// Echo device whose first `count` init attempts fail
    pub const fn failing_inits(count: u32) -> Self {
        RadioDevice {
            pending: [0; RADIO_PACKET_SIZE],
            pending_length: None,
            failing_inits: count,
            initialized: false,
            sent_count: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Number of packets put on air since creation
    pub fn sent_count(&self) -> u32 {
        self.sent_count
    }
}

impl RadioChannel for RadioDevice {
    async fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if self.failing_inits > 0 {
            self.failing_inits -= 1;
            return Err(RadioError::InitFailed);
        }
        let khz = frequency_khz(settings)?;
        log!(Level::Debug, "Echo radio tuned to {} kHz", khz);
        self.initialized = true;
        Ok(())
    }

    async fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        if packet.len() > RADIO_PACKET_SIZE {
            return Err(RadioError::TransmissionFailed);
        }
        if self.pending_length.is_some() {
            log!(Level::Trace, "Echo radio overwrote an unreceived packet");
        }
        self.pending[..packet.len()].copy_from_slice(packet);
        self.pending_length = Some(packet.len());
        self.sent_count += 1;
        Ok(())
    }

    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, RadioError> {
        if !self.initialized {
            return Err(RadioError::NotInitialized);
        }
        match self.pending_length.take() {
            Some(length) if length <= buffer.len() => {
                buffer[..length].copy_from_slice(&self.pending[..length]);
                Ok(Some(length))
            }
            Some(_) => Err(RadioError::ReceiveFailed),
            None => {
                Timer::after(timeout).await;
                Ok(None)
            }
        }
    }

    fn last_rssi(&self) -> Option<i16> {
        if self.sent_count > 0 {
            Some(ECHO_RSSI)
        } else {
            None
        }
    }
}
