//! # Sensor Frame
//!
//! Fixed-size wire format exchanged over the radio channel.
//!
//! ## Frame Structure
//!
//! All fields are little-endian and always present:
//! - Bytes 0-1: Protocol version (hundredths)
//! - Byte 2: Network ID
//! - Byte 3: Sender node ID (rewritten on every relay hop)
//! - Byte 4: Origin node ID (never rewritten)
//! - Bytes 5-8: Sequence ID assigned by the origin
//! - Bytes 9-10: Battery level (hundredths of a volt)
//! - Bytes 11-14: Timestamp (unix seconds at creation)
//! - Bytes 15-54: Payload, `PAYLOAD_SLOTS` signed 32-bit readings
//!
//! There is no integrity checksum. A corrupted frame of the correct length
//! decodes successfully and is only filtered by the relay decision checks.

use crate::{PAYLOAD_SLOTS, SENSOR_FRAME_SIZE};

const VERSION_OFFSET: usize = 0;
const NETWORK_ID_OFFSET: usize = 2;
const SENDER_ID_OFFSET: usize = 3;
const ORIGIN_ID_OFFSET: usize = 4;
const SEQUENCE_ID_OFFSET: usize = 5;
const BATTERY_OFFSET: usize = 9;
const TIMESTAMP_OFFSET: usize = 11;
const PAYLOAD_OFFSET: usize = 15;

const _: () = assert!(PAYLOAD_OFFSET + PAYLOAD_SLOTS * 4 == SENSOR_FRAME_SIZE, "frame layout does not match SENSOR_FRAME_SIZE");

/// Decoding failed because the byte count is not `SENSOR_FRAME_SIZE`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MalformedFrame {
    /// Number of bytes that were offered for decoding
    pub length: usize,
}

impl core::fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "malformed frame: {} bytes, expected {}", self.length, SENSOR_FRAME_SIZE)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MalformedFrame {}

/// One sensor message as carried on the wire
///
/// Field values are not range-checked here. Meaning is validated by the
/// relay manager (version, network, origin and sequence checks).
///
/// # Example
/// ```rust
/// use sensorgrid_relay::SensorFrame;
///
/// let frame = SensorFrame::new_sample(100, 1, 2, 7, 370, 1_700_000_000, [0; 10]);
/// let bytes = frame.encode();
/// assert_eq!(SensorFrame::decode(&bytes), Ok(frame));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorFrame {
    pub protocol_version: u16,
    pub network_id: u8,
    pub sender_id: u8,
    pub origin_id: u8,
    pub sequence_id: u32,
    pub battery_level: u16,
    pub timestamp: u32,
    pub payload: [i32; PAYLOAD_SLOTS],
}

impl SensorFrame {
    /// Creates a locally originated frame, sender and origin are both `node_id`
    pub const fn new_sample(
        protocol_version: u16,
        network_id: u8,
        node_id: u8,
        sequence_id: u32,
        battery_level: u16,
        timestamp: u32,
        payload: [i32; PAYLOAD_SLOTS],
    ) -> Self {
        SensorFrame {
            protocol_version,
            network_id,
            sender_id: node_id,
            origin_id: node_id,
            sequence_id,
            battery_level,
            timestamp,
            payload,
        }
    }

    /// Returns true if the last transmitter is not the creator of this frame
    pub fn is_relayed(&self) -> bool {
        self.sender_id != self.origin_id
    }

    /// Encodes the frame into its fixed wire representation
    pub fn encode(&self) -> [u8; SENSOR_FRAME_SIZE] {
        let mut bytes = [0u8; SENSOR_FRAME_SIZE];
        self.encode_into(&mut bytes);
        bytes
    }

    /// Encodes the frame into the beginning of `buffer`
    ///
    /// # Returns
    /// The number of bytes written, always `SENSOR_FRAME_SIZE`
    ///
    /// # Panics
    /// If `buffer` is shorter than `SENSOR_FRAME_SIZE`. All buffers in this
    /// crate are sized with `RADIO_PACKET_SIZE`, which is checked at compile time.
    pub fn encode_into(&self, buffer: &mut [u8]) -> usize {
        let bytes = &mut buffer[..SENSOR_FRAME_SIZE];
        bytes[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&self.protocol_version.to_le_bytes());
        bytes[NETWORK_ID_OFFSET] = self.network_id;
        bytes[SENDER_ID_OFFSET] = self.sender_id;
        bytes[ORIGIN_ID_OFFSET] = self.origin_id;
        bytes[SEQUENCE_ID_OFFSET..SEQUENCE_ID_OFFSET + 4].copy_from_slice(&self.sequence_id.to_le_bytes());
        bytes[BATTERY_OFFSET..BATTERY_OFFSET + 2].copy_from_slice(&self.battery_level.to_le_bytes());
        bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 4].copy_from_slice(&self.timestamp.to_le_bytes());
        for (slot, value) in self.payload.iter().enumerate() {
            let start = PAYLOAD_OFFSET + slot * 4;
            bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
        }
        SENSOR_FRAME_SIZE
    }

    /// Decodes a frame from raw bytes
    ///
    /// # Errors
    /// `MalformedFrame` if `bytes` is not exactly `SENSOR_FRAME_SIZE` long
    pub fn decode(bytes: &[u8]) -> Result<SensorFrame, MalformedFrame> {
        if bytes.len() != SENSOR_FRAME_SIZE {
            return Err(MalformedFrame { length: bytes.len() });
        }

        let mut payload = [0i32; PAYLOAD_SLOTS];
        for (slot, value) in payload.iter_mut().enumerate() {
            *value = i32::from_le_bytes(read_array(bytes, PAYLOAD_OFFSET + slot * 4));
        }

        Ok(SensorFrame {
            protocol_version: u16::from_le_bytes(read_array(bytes, VERSION_OFFSET)),
            network_id: bytes[NETWORK_ID_OFFSET],
            sender_id: bytes[SENDER_ID_OFFSET],
            origin_id: bytes[ORIGIN_ID_OFFSET],
            sequence_id: u32::from_le_bytes(read_array(bytes, SEQUENCE_ID_OFFSET)),
            battery_level: u16::from_le_bytes(read_array(bytes, BATTERY_OFFSET)),
            timestamp: u32::from_le_bytes(read_array(bytes, TIMESTAMP_OFFSET)),
            payload,
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut result = [0u8; N];
    result.copy_from_slice(&bytes[offset..offset + N]);
    result
}

/// Converts a measured value to the wire's fixed-point hundredths
///
/// Rounds half up and clamps to the `u16` range, so a negative or absurd
/// battery reading cannot wrap around.
pub fn hundredths_from_f32(value: f32) -> u16 {
    let scaled = value * 100.0 + 0.5;
    if scaled <= 0.0 {
        0
    } else if scaled >= u16::MAX as f32 {
        u16::MAX
    } else {
        scaled as u16
    }
}
