//! Loss accounting for consumers that receive a round-robin slice of the id space.
//!
//! A distribution group hands each consumer `n_sequential_updates` consecutive ids per
//! rotation. Seen from one consumer, its runs start `object_id_offset +
//! n_sequential_updates - 1` ids apart, and `object_id_offset` is the distance from the
//! last id of one run to the first id of the next. All arithmetic is integer-only.

use crate::config::ConfigError;
use serde::Serialize;

/// Shape of the round-robin distribution as seen by one consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    pub object_id_offset: u64,
    pub n_sequential_updates: u64,
}

impl Default for GroupAssignment {
    fn default() -> Self {
        Self {
            object_id_offset: 1,
            n_sequential_updates: 1,
        }
    }
}

impl GroupAssignment {
    pub fn new(object_id_offset: u64, n_sequential_updates: u64) -> Result<Self, ConfigError> {
        if object_id_offset == 0 {
            return Err(ConfigError::invalid(
                crate::config::KEY_OBJECT_ID_OFFSET,
                "must be at least 1",
            ));
        }
        if n_sequential_updates == 0 {
            return Err(ConfigError::invalid(
                crate::config::KEY_SEQUENTIAL_UPDATES,
                "must be at least 1",
            ));
        }
        Ok(Self {
            object_id_offset,
            n_sequential_updates,
        })
    }

    /// Assignment for one consumer in a group of `n_consumers`.
    pub fn for_consumers(n_consumers: u64, n_sequential_updates: u64) -> Result<Self, ConfigError> {
        Self::for_members(n_consumers, n_sequential_updates, "nConsumers")
    }

    /// Assignment for one consumer set among `n_sets` sets.
    pub fn for_sets(n_sets: u64, n_sequential_updates: u64) -> Result<Self, ConfigError> {
        Self::for_members(n_sets, n_sequential_updates, "nSets")
    }

    fn for_members(members: u64, updates: u64, key: &str) -> Result<Self, ConfigError> {
        if members == 0 {
            return Err(ConfigError::invalid(key, "must be at least 1"));
        }
        let offset = (members - 1).saturating_mul(updates).saturating_add(1);
        Self::new(offset, updates)
    }

    /// Whether the consumer receives anything other than the full contiguous stream.
    pub fn is_grouped(&self) -> bool {
        self.object_id_offset > 1 || self.n_sequential_updates > 1
    }

    /// Distance between the first ids of two successive runs.
    pub fn rotation_span(&self) -> u64 {
        self.object_id_offset
            .saturating_add(self.n_sequential_updates)
            .saturating_sub(1)
    }
}

/// Loss attributed to one newly delivered id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapEstimate {
    /// Ids of this consumer's own share that never arrived.
    pub missed: u64,
    /// Entire rotations skipped between the previous and the new id.
    pub missed_rotations: u64,
    /// Group-wide ids covered by the skipped rotations.
    pub rotation_span_missed: u64,
}

/// Per-consumer gap detector fed with ids in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedGapDetector {
    assignment: GroupAssignment,
    last_id: Option<u64>,
    last_expected_group_update_id: Option<u64>,
}

impl GroupedGapDetector {
    pub fn new(assignment: GroupAssignment) -> Self {
        Self {
            assignment,
            last_id: None,
            last_expected_group_update_id: None,
        }
    }

    pub fn assignment(&self) -> GroupAssignment {
        self.assignment
    }

    pub fn last_id(&self) -> Option<u64> {
        self.last_id
    }

    /// End of the run the detector currently expects ids from.
    pub fn last_expected_group_update_id(&self) -> Option<u64> {
        self.last_expected_group_update_id
    }

    /// Switches to a new distribution shape. The next id after the switch opens a new run.
    pub fn reassign(&mut self, assignment: GroupAssignment) {
        self.assignment = assignment;
        self.last_expected_group_update_id = self.last_id;
    }

    /// Forgets all history; the next id is treated as the first one.
    pub fn reset(&mut self) {
        self.last_id = None;
        self.last_expected_group_update_id = None;
    }

    /// Accounts for `id`, returning how much of this consumer's share went missing.
    /// Ids at or below the previous one are ignored.
    pub fn observe(&mut self, id: u64) -> GapEstimate {
        let Some(last_id) = self.last_id else {
            self.last_id = Some(id);
            self.last_expected_group_update_id = Some(self.run_end_from(id));
            return GapEstimate::default();
        };
        if id <= last_id {
            return GapEstimate::default();
        }
        let estimate = if self.assignment.n_sequential_updates == 1 {
            self.single_batch(last_id, id)
        } else {
            self.multi_batch(last_id, id)
        };
        self.last_id = Some(id);
        estimate
    }

    fn single_batch(&mut self, last_id: u64, id: u64) -> GapEstimate {
        let offset = self.assignment.object_id_offset.max(1);
        let delta = id - last_id;
        let missed = if delta > offset {
            (delta - offset) / offset
        } else {
            0
        };
        self.last_expected_group_update_id = Some(id);
        GapEstimate {
            missed,
            missed_rotations: missed,
            rotation_span_missed: missed.saturating_mul(offset),
        }
    }

    fn multi_batch(&mut self, last_id: u64, id: u64) -> GapEstimate {
        let updates = self.assignment.n_sequential_updates;
        let run_end = self
            .last_expected_group_update_id
            .unwrap_or_else(|| self.run_end_from(last_id));
        if id <= run_end {
            // Still inside the current run: only ids skipped within it are lost.
            return GapEstimate {
                missed: id - last_id - 1,
                ..GapEstimate::default()
            };
        }
        let span = self.assignment.rotation_span().max(1);
        // Measured from the run end, not from `last_id`.
        let n_offsets = ceil_div(id - run_end, span);
        let next_run_end = run_end.saturating_add(n_offsets.saturating_mul(span));
        let next_run_start = next_run_end.saturating_sub(updates - 1);
        let missed_rotations = n_offsets - 1;
        let finishing_old_run = run_end.saturating_sub(last_id);
        let starting_new_run = id.saturating_sub(next_run_start);
        self.last_expected_group_update_id = Some(next_run_end);
        GapEstimate {
            missed: finishing_old_run
                .saturating_add(missed_rotations.saturating_mul(updates))
                .saturating_add(starting_new_run),
            missed_rotations,
            rotation_span_missed: missed_rotations.saturating_mul(span),
        }
    }

    fn run_end_from(&self, first_id: u64) -> u64 {
        first_id.saturating_add(self.assignment.n_sequential_updates - 1)
    }
}

fn ceil_div(numerator: u64, denominator: u64) -> u64 {
    numerator / denominator + u64::from(numerator % denominator != 0)
}
