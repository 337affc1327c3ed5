//! # SensorGrid Relay
//!
//! Relay protocol for battery-powered sensor nodes that share one half-duplex,
//! low-bandwidth radio channel. Every node periodically broadcasts its own
//! readings in a fixed-size [`SensorFrame`] and re-broadcasts frames it hears
//! from other nodes once, so readings reach a collector that is out of range
//! of the originating node.
//!
//! ## Duty cycle
//!
//! ```text
//! ┌──────────── SensorNode::duty_cycle ────────────┐
//! │ TX: sample → frame → [log] → uplink | radio    │
//! │ RX: listen(rand 1000..2000ms) → decode         │
//! │     → version → network → self-origin → seq    │
//! │     → relay (sender := own id) | ack | drop    │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The node is a single cooperative task. The only suspension points are the
//! bounded radio operations, the relay retransmit delay and radio init retries.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)] // We control the usage of this trait

pub mod ack_tracker;
pub mod bus;
pub mod config;
pub mod frame_log;
pub mod messages;
pub mod node;
pub mod radio_devices;
pub mod relay_manager;
pub mod rx_handler;
pub mod sensors;
pub mod sequence_table;
pub mod tx_path;
pub mod uplink;

pub use ack_tracker::AckTracker;
pub use bus::{BusDevice, BusLease, SharedBus};
pub use config::{ConfigError, ConfigSource, KeyValueConfig, NodeConfiguration, RadioSettings, UplinkSettings};
pub use frame_log::{FrameLog, FrameLogError, NoFrameLog};
pub use messages::{LogLine, MalformedFrame, SensorFrame};
pub use node::{DutyCycleReport, SensorNode};
pub use radio_devices::{RadioChannel, RadioError};
pub use relay_manager::{RejectReason, RelayManager, RelayResult};
pub use rx_handler::{ListenWindow, RxOutcome};
pub use sensors::{Board, DataRegisters, SensorDriver, SensorLookup, SensorRegistry};
pub use sequence_table::{SequenceStatus, SequenceTable};
pub use tx_path::{DeliveryError, DeliveryRoute, FrameKind, TxReport};
pub use uplink::{NoUplink, Upstream, Uplink};

//Wire constants, a node with different values cannot talk to the rest of the network
/// Compiled protocol version in hundredths (1.00)
pub const PROTOCOL_VERSION: u16 = 100;
/// Number of reading slots carried by every frame
pub const PAYLOAD_SLOTS: usize = 10;
/// Encoded frame size: version(2) net(1) snd(1) orig(1) id(4) bat(2) ts(4) payload(4 * slots)
pub const SENSOR_FRAME_SIZE: usize = 2 + 1 + 1 + 1 + 4 + 2 + 4 + PAYLOAD_SLOTS * 4;

//Hardware dependent constants
/// Largest packet the radio can hand over (RFM95 FIFO limit)
pub const RADIO_PACKET_SIZE: usize = 251;
/// Sequence table capacity, one slot for every possible node id
pub const MAX_NETWORK_SIZE: usize = 256;

const _: () = assert!(SENSOR_FRAME_SIZE <= RADIO_PACKET_SIZE, "sensor frame does not fit in a radio packet");

//Empirical tunables, all of them can be overridden from the configuration
/// Backward sequence jump that is treated as an origin reboot
pub const DEFAULT_RESET_THRESHOLD: u32 = 5;
/// Lower bound of the randomized listen window in milliseconds
pub const DEFAULT_LISTEN_WINDOW_MIN_MS: u64 = 1000;
/// Upper bound (exclusive) of the randomized listen window in milliseconds
pub const DEFAULT_LISTEN_WINDOW_MAX_MS: u64 = 2000;
/// Wait before a relayed frame goes on air
pub const DEFAULT_RETRANSMIT_DELAY_MS: u64 = 1000;
/// Wait between two radio init attempts
pub const DEFAULT_RADIO_INIT_RETRY_DELAY_MS: u64 = 1000;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn frame_size_matches_wire_layout() {
        assert_eq!(SENSOR_FRAME_SIZE, 55);
    }

    #[test]
    fn every_u8_node_id_has_a_sequence_slot() {
        assert!(MAX_NETWORK_SIZE > u8::MAX as usize);
    }

    #[test]
    fn default_listen_window_is_not_empty() {
        assert!(DEFAULT_LISTEN_WINDOW_MIN_MS < DEFAULT_LISTEN_WINDOW_MAX_MS);
    }
}
