//! Radio device implementations
//!
//! Every radio is driven through the [`RadioChannel`] trait: initialize once,
//! broadcast a frame, or listen for at most a given timeout. The channel is
//! half duplex, a device never sends and receives at the same time.
//!
//! - `echo`: loopback device, a sent frame is heard back on the next receive
//! - `simulator`: multi-node device attached to a simulated ether

use embassy_time::Duration;

use crate::RadioSettings;

#[cfg(feature = "radio-device-echo")]
pub mod echo;

#[cfg(feature = "radio-device-simulator")]
pub mod simulator;

/// Lowest frequency the transceiver can be tuned to, in kHz
pub const MIN_FREQUENCY_KHZ: u32 = 137_000;
/// Highest frequency the transceiver can be tuned to, in kHz
pub const MAX_FREQUENCY_KHZ: u32 = 1_020_000;

/// Radio operation errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioError {
    /// Transceiver did not answer during initialization
    InitFailed,
    /// Requested frequency is outside the transceiver range
    FrequencyRejected,
    /// Frame could not be put on air
    TransmissionFailed,
    /// Receive operation failed
    ReceiveFailed,
    /// Operation attempted before a successful init
    NotInitialized,
}

impl core::fmt::Display for RadioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RadioError::InitFailed => write!(f, "radio init failed"),
            RadioError::FrequencyRejected => write!(f, "radio frequency rejected"),
            RadioError::TransmissionFailed => write!(f, "radio transmission failed"),
            RadioError::ReceiveFailed => write!(f, "radio receive failed"),
            RadioError::NotInitialized => write!(f, "radio not initialized"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RadioError {}

/// Half-duplex packet radio
pub trait RadioChannel {
    /// Brings the transceiver up with the configured frequency and power
    async fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError>;

    /// Broadcasts one packet, returns once it is on air
    async fn send(&mut self, packet: &[u8]) -> Result<(), RadioError>;

    /// Listens for at most `timeout`
    ///
    /// # Returns
    /// * `Ok(Some(length))` - a packet of `length` bytes was copied into `buffer`
    /// * `Ok(None)` - nothing arrived before the timeout
    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, RadioError>;

    /// Signal strength of the last received packet in dBm
    fn last_rssi(&self) -> Option<i16> {
        None
    }
}

impl<R: RadioChannel + ?Sized> RadioChannel for &mut R {
    async fn init(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        (**self).init(settings).await
    }

    async fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        (**self).send(packet).await
    }

    async fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<Option<usize>, RadioError> {
        (**self).receive(buffer, timeout).await
    }

    fn last_rssi(&self) -> Option<i16> {
        (**self).last_rssi()
    }
}

/// Converts the configured frequency to kHz and checks the transceiver range
pub fn frequency_khz(settings: &RadioSettings) -> Result<u32, RadioError> {
    let khz = settings.frequency_mhz * 1000.0;
    if !(khz >= MIN_FREQUENCY_KHZ as f32 && khz <= MAX_FREQUENCY_KHZ as f32) {
        return Err(RadioError::FrequencyRejected);
    }
    // f32 has no round() in core
    Ok((khz + 0.5) as u32)
}
