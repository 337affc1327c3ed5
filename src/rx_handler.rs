//! # Receive Cycle - Randomized Listen Windows
//!
//! Nodes run the same duty cycle, so with a fixed listen time they would stay
//! in lock step and keep transmitting on top of each other. Every receive pass
//! therefore listens for a random duration drawn from a [`ListenWindow`].
//!
//! One pass handles at most one frame. What happened to it is reported as an
//! [`RxOutcome`]; no outcome stops the node.

use embassy_time::Duration;
use log::log;
use rand_core::RngCore;

use crate::{BusDevice, ConfigError, DeliveryError, DeliveryRoute, MalformedFrame, RadioChannel, RadioError, RejectReason, SensorFrame, SharedBus};

/// Bounds of the randomized listen duration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenWindow {
    min_ms: u64,
    max_ms: u64,
}

impl ListenWindow {
    /// Window drawing from `[min_ms, max_ms)`
    ///
    /// # Errors
    /// `ConfigError::InvalidListenWindow` if the range is empty
    pub const fn with(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        if min_ms >= max_ms {
            return Err(ConfigError::InvalidListenWindow { min_ms, max_ms });
        }
        Ok(ListenWindow { min_ms, max_ms })
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Draws a listen duration in milliseconds
    pub fn draw<G: RngCore + ?Sized>(&self, rng: &mut G) -> u64 {
        self.min_ms + rng.next_u64() % (self.max_ms - self.min_ms)
    }
}

/// Result of one receive pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing arrived within the listen window
    Timeout,
    /// Something arrived that is not a frame
    Malformed(MalformedFrame),
    /// Frame dropped by the relay checks
    Rejected(RejectReason),
    /// Own frame heard back from a relaying neighbour, `lost` is never negative
    Acknowledged { lost: u32 },
    /// Foreign frame accepted and passed on
    Relayed { frame: SensorFrame, route: DeliveryRoute },
    /// Foreign frame accepted but its relay broadcast failed
    RelayFailed(DeliveryError),
    /// The radio could not listen
    RadioFailed(RadioError),
}

/// What the radio delivered during one listen
pub(crate) enum Heard {
    Nothing,
    Frame(SensorFrame),
    Malformed(MalformedFrame),
}

/// Listens on the radio for `listen_ms` under a radio bus lease
pub(crate) async fn listen<R>(node_id: u8, radio: &mut R, buffer: &mut [u8], listen_ms: u64, bus: &SharedBus) -> Result<Heard, RadioError>
where
    R: RadioChannel + ?Sized,
{
    log!(log::Level::Debug, "[{}] LISTEN: {}ms", node_id, listen_ms);
    let received = {
        let _lease = bus.activate(BusDevice::Radio).await;
        radio.receive(buffer, Duration::from_millis(listen_ms)).await
    };

    let length = match received {
        Ok(Some(length)) if length <= buffer.len() => length,
        Ok(Some(length)) => {
            log!(log::Level::Error, "[{}] Radio reported {} bytes for a {} byte buffer", node_id, length, buffer.len());
            return Err(RadioError::ReceiveFailed);
        }
        Ok(None) => {
            log!(log::Level::Debug, "[{}] NO MSG REC", node_id);
            return Ok(Heard::Nothing);
        }
        Err(error) => {
            log!(log::Level::Error, "[{}] Receive failed: {}", node_id, error);
            return Err(error);
        }
    };

    match SensorFrame::decode(&buffer[..length]) {
        Ok(frame) => {
            log!(
                log::Level::Debug,
                "[{}] RX {}:{}.{} (ver: {}), rssi: {:?}",
                node_id,
                frame.sender_id,
                frame.origin_id,
                frame.sequence_id,
                frame.protocol_version,
                radio.last_rssi()
            );
            Ok(Heard::Frame(frame))
        }
        Err(malformed) => {
            log!(log::Level::Debug, "[{}] SKIP: {}", node_id, malformed);
            Ok(Heard::Malformed(malformed))
        }
    }
}
