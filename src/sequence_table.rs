//! # Sequence Table - Per-Origin Deduplication
//!
//! Remembers the highest sequence id accepted from every origin node. A frame
//! is fresh only if its sequence id is above the remembered one; everything
//! else is a duplicate or a late copy and is not relayed again.
//!
//! ## Origin Reset Heuristic
//!
//! Sequence counters live in RAM only, so a rebooted origin starts again from 1.
//! When an incoming id lies more than `reset_threshold` below the remembered
//! one, the origin is assumed to have restarted: its slot is cleared and the
//! frame is classified fresh. Inside the threshold window genuinely stale
//! copies are still rejected; beyond it an old duplicate may be accepted once.
//!
//! ## Mutation Rules
//!
//! `check` never records a frame, the caller has to `advance` explicitly after
//! every other validation passed. The only mutation `check` performs is the
//! reset of a slot.

use log::log;

use crate::{DEFAULT_RESET_THRESHOLD, MAX_NETWORK_SIZE};

/// Classification of an incoming sequence id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceStatus {
    /// Higher than anything seen from this origin
    Fresh,
    /// Far below the remembered id, the origin slot was cleared
    OriginReset { previous: u32 },
    /// Duplicate or late copy
    Stale { last_seen: u32 },
    /// Origin id does not fit in the table
    Untracked,
}

impl SequenceStatus {
    /// Fresh frames and frames reclassified by the reset heuristic
    pub fn is_fresh(&self) -> bool {
        matches!(self, SequenceStatus::Fresh | SequenceStatus::OriginReset { .. })
    }
}

/// Last accepted sequence id for each origin node
///
/// # Generic Parameters
/// * `N` - Number of origin slots, ids `0..N` are tracked
pub struct SequenceTable<const N: usize = MAX_NETWORK_SIZE> {
    last_seen: [u32; N],
    reset_threshold: u32,
}

impl<const N: usize> Default for SequenceTable<N> {
    fn default() -> Self {
        Self::with_reset_threshold(DEFAULT_RESET_THRESHOLD)
    }
}

impl<const N: usize> SequenceTable<N> {
    /// Creates a table with every slot at 0
    pub const fn with_reset_threshold(reset_threshold: u32) -> Self {
        SequenceTable {
            last_seen: [0; N],
            reset_threshold,
        }
    }

    pub fn reset_threshold(&self) -> u32 {
        self.reset_threshold
    }

    /// Classifies `sequence_id` against the slot of `origin_id`
    ///
    /// # Returns
    /// * `Fresh` - `sequence_id` is above the remembered id
    /// * `OriginReset` - the gap exceeded the threshold, the slot is now 0
    /// * `Stale` - duplicate or late copy, the slot is unchanged
    /// * `Untracked` - `origin_id` is outside the table
    pub fn check(&mut self, origin_id: u8, sequence_id: u32) -> SequenceStatus {
        let Some(last_seen) = self.last_seen.get_mut(origin_id as usize) else {
            return SequenceStatus::Untracked;
        };

        if sequence_id > *last_seen {
            return SequenceStatus::Fresh;
        }

        // sequence_id <= last_seen, the subtraction cannot underflow
        if *last_seen - sequence_id > self.reset_threshold {
            let previous = *last_seen;
            log!(
                log::Level::Info,
                "Origin {} reset detected: sequence {} after {}, clearing slot",
                origin_id,
                sequence_id,
                previous
            );
            *last_seen = 0;
            return SequenceStatus::OriginReset { previous };
        }

        SequenceStatus::Stale { last_seen: *last_seen }
    }

    /// Records `sequence_id` as the latest accepted id of `origin_id`
    pub fn advance(&mut self, origin_id: u8, sequence_id: u32) {
        if let Some(last_seen) = self.last_seen.get_mut(origin_id as usize) {
            *last_seen = sequence_id;
        }
    }

    /// Latest accepted id of `origin_id`, `None` if the origin is untracked
    pub fn last_seen(&self, origin_id: u8) -> Option<u32> {
        self.last_seen.get(origin_id as usize).copied()
    }
}
