//! # Messages Module
//!
//! Data structures that travel over the radio channel or into the local log.
//!
//! - `SensorFrame`: fixed-size wire message with explicit little-endian codec
//! - `LogLine`: CSV rendering of a frame for the append-only local log
//!
//! Every node in a network must use the same frame layout; the size is a
//! compile-time constant (`SENSOR_FRAME_SIZE`).

// Module declarations
pub mod log_line;
pub mod sensor_frame;

// Re-export public types for convenient access
pub use log_line::LogLine;
pub use sensor_frame::{hundredths_from_f32, MalformedFrame, SensorFrame};
