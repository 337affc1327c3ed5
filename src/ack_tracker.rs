//! Loss estimation from self-overheard frames
//!
//! When a neighbour relays one of our own frames we hear it again. The gap
//! between two consecutive overheard sequence ids tells how many of our frames
//! were not relayed within earshot.

/// Tracks the last own sequence id heard back from the channel
#[derive(Debug, Default)]
pub struct AckTracker {
    last_ack_sequence: u32,
}

impl AckTracker {
    pub const fn new() -> Self {
        AckTracker { last_ack_sequence: 0 }
    }

    pub fn last_ack_sequence(&self) -> u32 {
        self.last_ack_sequence
    }

    /// Feeds one inbound frame into the tracker
    ///
    /// # Returns
    /// * `Some(lost)` - the frame originated here; `lost` is the number of own
    ///   frames skipped since the previous ack. Negative when frames arrive out
    ///   of order.
    /// * `None` - not an own frame, the tracker is unchanged
    pub fn observe(&mut self, origin_id: u8, sequence_id: u32, local_id: u8) -> Option<i64> {
        if origin_id != local_id {
            return None;
        }
        let lost = sequence_id as i64 - (self.last_ack_sequence as i64 + 1);
        self.last_ack_sequence = sequence_id;
        Some(lost)
    }
}

/// Loss count suitable for reporting, out-of-order acks count as no loss
pub fn clamped_loss(lost: i64) -> u32 {
    lost.clamp(0, u32::MAX as i64) as u32
}
