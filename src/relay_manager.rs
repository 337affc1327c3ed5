//! # Relay Manager - Inbound Frame Validation and Forwarding Decision
//!
//! Every decoded frame runs through a fixed chain of checks. The first failing
//! check decides the outcome:
//!
//! ```text
//! RECEIVED → VERSION_CHECK → NETWORK_CHECK → SELF_ORIGIN_CHECK → SEQUENCE_CHECK
//!               │                 │                │                  │
//!             Reject            Reject            Ack        Reject | Relay
//! ```
//!
//! - **Version**: the frame's protocol version must equal the compiled one.
//! - **Network**: a non-zero network id must equal the local network id.
//! - **Self origin**: our own frame heard back feeds the ack tracker and is
//!   never relayed again.
//! - **Sequence**: the per-origin dedup table (with its reset heuristic) lets
//!   only fresh frames through. A fresh frame is recorded and handed back with
//!   the sender rewritten to this node, ready for exactly one relay attempt.
//!
//! Rejected frames never touch the sequence table.

use log::log;

use crate::ack_tracker::{clamped_loss, AckTracker};
use crate::sequence_table::{SequenceStatus, SequenceTable};
use crate::{SensorFrame, MAX_NETWORK_SIZE};

/// Why an inbound frame was dropped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Protocol version differs from the compiled one
    VersionMismatch { received: u16, expected: u16 },
    /// Frame belongs to another network
    NetworkMismatch { received: u8, expected: u8 },
    /// Duplicate or late copy of an already relayed frame
    StaleSequence { origin_id: u8, sequence_id: u32, last_seen: u32 },
    /// Origin id has no slot in the sequence table
    OriginOutOfRange { origin_id: u8 },
}

impl core::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RejectReason::VersionMismatch { received, expected } => {
                write!(f, "unknown protocol version {} (expected {})", received, expected)
            }
            RejectReason::NetworkMismatch { received, expected } => {
                write!(f, "out-of-network frame from network {} (local {})", received, expected)
            }
            RejectReason::StaleSequence {
                origin_id,
                sequence_id,
                last_seen,
            } => write!(f, "old frame {}.{} (current max {})", origin_id, sequence_id, last_seen),
            RejectReason::OriginOutOfRange { origin_id } => write!(f, "origin {} outside the sequence table", origin_id),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RejectReason {}

/// Outcome of evaluating one inbound frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayResult {
    /// Fresh foreign frame, sender already rewritten to this node
    Relay(SensorFrame),
    /// Own frame heard back; `lost` own frames were skipped since the last ack,
    /// 0 when the ack arrived out of order
    Ack { lost: u32 },
    /// Dropped
    Reject(RejectReason),
}

/// Relay decision state of one node
///
/// Owns the dedup table and the ack tracker; both are mutated only through
/// [`RelayManager::evaluate`].
///
/// # Generic Parameters
/// * `N` - Sequence table capacity
pub struct RelayManager<const N: usize = MAX_NETWORK_SIZE> {
    own_node_id: u8,
    network_id: u8,
    protocol_version: u16,
    sequence_table: SequenceTable<N>,
    ack_tracker: AckTracker,
}

impl<const N: usize> RelayManager<N> {
    /// Creates a relay manager with an empty sequence table
    ///
    /// # Arguments
    /// * `own_node_id` - This node's id, used for self-origin detection and sender rewrite
    /// * `network_id` - Local network id
    /// * `protocol_version` - Accepted protocol version in hundredths
    /// * `reset_threshold` - Backward sequence gap treated as an origin reboot
    pub const fn with(own_node_id: u8, network_id: u8, protocol_version: u16, reset_threshold: u32) -> Self {
        RelayManager {
            own_node_id,
            network_id,
            protocol_version,
            sequence_table: SequenceTable::with_reset_threshold(reset_threshold),
            ack_tracker: AckTracker::new(),
        }
    }

    pub fn sequence_table(&self) -> &SequenceTable<N> {
        &self.sequence_table
    }

    pub fn last_ack_sequence(&self) -> u32 {
        self.ack_tracker.last_ack_sequence()
    }

    /// Runs the check chain on a decoded frame
    ///
    /// # Returns
    /// * `RelayResult::Relay` - fresh foreign frame with `sender_id` set to this node
    /// * `RelayResult::Ack` - own frame overheard, ack tracker updated
    /// * `RelayResult::Reject` - dropped, the reason is logged
    pub fn evaluate(&mut self, mut frame: SensorFrame) -> RelayResult {
        if frame.protocol_version != self.protocol_version {
            return self.reject(RejectReason::VersionMismatch {
                received: frame.protocol_version,
                expected: self.protocol_version,
            });
        }

        if frame.network_id != 0 && frame.network_id != self.network_id {
            return self.reject(RejectReason::NetworkMismatch {
                received: frame.network_id,
                expected: self.network_id,
            });
        }

        if let Some(raw_lost) = self.ack_tracker.observe(frame.origin_id, frame.sequence_id, self.own_node_id) {
            if raw_lost < 0 {
                log!(
                    log::Level::Debug,
                    "[{}] Own frame {} heard out of order ({})",
                    self.own_node_id,
                    frame.sequence_id,
                    raw_lost
                );
            }
            let lost = clamped_loss(raw_lost);
            log!(
                log::Level::Info,
                "[{}] Own frame {} heard back from {}, lost acks: {}",
                self.own_node_id,
                frame.sequence_id,
                frame.sender_id,
                lost
            );
            return RelayResult::Ack { lost };
        }

        match self.sequence_table.check(frame.origin_id, frame.sequence_id) {
            SequenceStatus::Stale { last_seen } => self.reject(RejectReason::StaleSequence {
                origin_id: frame.origin_id,
                sequence_id: frame.sequence_id,
                last_seen,
            }),
            SequenceStatus::Untracked => self.reject(RejectReason::OriginOutOfRange { origin_id: frame.origin_id }),
            SequenceStatus::Fresh | SequenceStatus::OriginReset { .. } => {
                self.sequence_table.advance(frame.origin_id, frame.sequence_id);
                log!(
                    log::Level::Debug,
                    "[{}] Accepted frame {}.{} from sender {}",
                    self.own_node_id,
                    frame.origin_id,
                    frame.sequence_id,
                    frame.sender_id
                );
                frame.sender_id = self.own_node_id;
                RelayResult::Relay(frame)
            }
        }
    }

    fn reject(&self, reason: RejectReason) -> RelayResult {
        log!(log::Level::Debug, "[{}] SKIP: {}", self.own_node_id, reason);
        RelayResult::Reject(reason)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::{PAYLOAD_SLOTS, PROTOCOL_VERSION};

    const OWN_ID: u8 = 3;
    const NETWORK: u8 = 1;

    fn new_manager() -> RelayManager {
        RelayManager::with(OWN_ID, NETWORK, PROTOCOL_VERSION, 5)
    }

    fn frame_from(origin: u8, sequence: u32) -> SensorFrame {
        SensorFrame::new_sample(PROTOCOL_VERSION, NETWORK, origin, sequence, 370, 1_600_000_000, [0; PAYLOAD_SLOTS])
    }

    #[test]
    fn fresh_foreign_frame_is_relayed_with_own_sender() {
        let mut rm = new_manager();
        let frame = frame_from(2, 1);
        match rm.evaluate(frame) {
            RelayResult::Relay(relayed) => {
                assert_eq!(relayed.origin_id, 2);
                assert_eq!(relayed.sender_id, OWN_ID);
                assert_eq!(relayed.sequence_id, 1);
                assert_eq!(relayed.payload, frame.payload);
            }
            other => panic!("Expected Relay, got: {:?}", other),
        }
        assert_eq!(rm.sequence_table().last_seen(2), Some(1));
    }

    #[test]
    fn version_mismatch_is_rejected_without_table_update() {
        let mut rm = new_manager();
        let mut frame = frame_from(2, 1);
        frame.protocol_version = PROTOCOL_VERSION + 1;
        assert_eq!(
            rm.evaluate(frame),
            RelayResult::Reject(RejectReason::VersionMismatch {
                received: PROTOCOL_VERSION + 1,
                expected: PROTOCOL_VERSION
            })
        );
        assert_eq!(rm.sequence_table().last_seen(2), Some(0));
    }

    #[test]
    fn version_check_runs_before_self_origin_check() {
        let mut rm = new_manager();
        let mut frame = frame_from(OWN_ID, 4);
        frame.protocol_version = 0;
        assert!(matches!(rm.evaluate(frame), RelayResult::Reject(RejectReason::VersionMismatch { .. })));
        assert_eq!(rm.last_ack_sequence(), 0);
    }

    #[test]
    fn foreign_network_is_rejected() {
        let mut rm = new_manager();
        let mut frame = frame_from(2, 1);
        frame.network_id = 7;
        assert_eq!(
            rm.evaluate(frame),
            RelayResult::Reject(RejectReason::NetworkMismatch { received: 7, expected: NETWORK })
        );
        assert_eq!(rm.sequence_table().last_seen(2), Some(0));
    }

    #[test]
    fn network_zero_is_accepted_from_anyone() {
        let mut rm = new_manager();
        let mut frame = frame_from(2, 1);
        frame.network_id = 0;
        assert!(matches!(rm.evaluate(frame), RelayResult::Relay(_)));
    }

    #[test]
    fn own_frame_feeds_ack_tracker_and_is_not_relayed() {
        let mut rm = new_manager();
        let mut first = frame_from(OWN_ID, 4);
        first.sender_id = 5;
        assert_eq!(rm.evaluate(first), RelayResult::Ack { lost: 3 });

        let mut second = frame_from(OWN_ID, 7);
        second.sender_id = 5;
        assert_eq!(rm.evaluate(second), RelayResult::Ack { lost: 2 });
        assert_eq!(rm.last_ack_sequence(), 7);
        assert_eq!(rm.sequence_table().last_seen(OWN_ID), Some(0));
    }

    #[test]
    fn out_of_order_own_frame_reports_no_loss() {
        let mut rm = new_manager();
        assert_eq!(rm.evaluate(frame_from(OWN_ID, 10)), RelayResult::Ack { lost: 9 });
        assert_eq!(rm.evaluate(frame_from(OWN_ID, 8)), RelayResult::Ack { lost: 0 });
        assert_eq!(rm.last_ack_sequence(), 8);
    }

    #[test]
    fn duplicate_is_rejected_as_stale() {
        let mut rm = new_manager();
        assert!(matches!(rm.evaluate(frame_from(2, 8)), RelayResult::Relay(_)));
        assert_eq!(
            rm.evaluate(frame_from(2, 8)),
            RelayResult::Reject(RejectReason::StaleSequence {
                origin_id: 2,
                sequence_id: 8,
                last_seen: 8
            })
        );
    }

    #[test]
    fn rebooted_origin_is_accepted_again() {
        let mut rm = new_manager();
        assert!(matches!(rm.evaluate(frame_from(2, 100)), RelayResult::Relay(_)));
        assert!(matches!(rm.evaluate(frame_from(2, 10)), RelayResult::Relay(_)));
        assert_eq!(rm.sequence_table().last_seen(2), Some(10));
    }

    #[test]
    fn relayed_copy_from_other_sender_is_deduplicated_by_origin() {
        let mut rm = new_manager();
        assert!(matches!(rm.evaluate(frame_from(2, 1)), RelayResult::Relay(_)));

        let mut copy = frame_from(2, 1);
        copy.sender_id = 9;
        assert!(matches!(
            rm.evaluate(copy),
            RelayResult::Reject(RejectReason::StaleSequence { origin_id: 2, .. })
        ));
    }

    #[test]
    fn untracked_origin_is_rejected_in_small_tables() {
        let mut rm: RelayManager<4> = RelayManager::with(OWN_ID, NETWORK, PROTOCOL_VERSION, 5);
        assert_eq!(
            rm.evaluate(frame_from(10, 1)),
            RelayResult::Reject(RejectReason::OriginOutOfRange { origin_id: 10 })
        );
    }

    #[test]
    fn reject_reasons_render_for_logs() {
        let reason = RejectReason::StaleSequence {
            origin_id: 2,
            sequence_id: 3,
            last_seen: 5,
        };
        assert_eq!(format!("{}", reason), "old frame 2.3 (current max 5)");
        let _: &dyn std::error::Error = &reason;
    }
}
