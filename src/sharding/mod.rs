//! Embedding-table sharding plans.
//!
//! A plan decides, for every embedding table, which GPUs hold it. Small tables
//! are replicated on every device; large tables live whole on a single device
//! chosen round robin. The result is expressed the way the training engine
//! consumes it: a GPU × table 0/1 matrix plus two table-id groups aligned with
//! the strategy names `["mp", "dp"]`.

pub mod plan;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use plan::{generate_plan, ShardingPlan};

/// Tables with at most this many rows are replicated on every GPU.
pub const DP_VOCAB_THRESHOLD: u64 = 6000;

/// Where a table's rows live.
///
/// The engine calls these strategies "mp" and "dp". "mp" does not split a
/// table; it places the whole table on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Placement {
    /// Whole table on exactly one GPU (engine name "mp")
    #[serde(rename = "mp")]
    SingleDevice,
    /// Full copy on every GPU (engine name "dp")
    #[serde(rename = "dp")]
    Replicated,
}

/// Strategy order of `emb_table_group_strategy` and
/// `emb_table_placement_strategy`.
pub const PLACEMENT_STRATEGIES: [Placement; 2] = [Placement::SingleDevice, Placement::Replicated];

impl Placement {
    /// Pick the placement for a table of `vocab_size` rows
    pub fn for_vocab(vocab_size: u64) -> Self {
        if vocab_size <= DP_VOCAB_THRESHOLD {
            Placement::Replicated
        } else {
            Placement::SingleDevice
        }
    }

    /// Name the engine expects in `emb_table_placement_strategy`
    pub fn wire_name(&self) -> &'static str {
        match self {
            Placement::SingleDevice => "mp",
            Placement::Replicated => "dp",
        }
    }

    /// Position of this strategy's group inside `emb_table_group_strategy`
    pub fn group_index(&self) -> usize {
        match self {
            Placement::SingleDevice => 0,
            Placement::Replicated => 1,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One embedding table as seen by the planner.
///
/// `table_id` is the column of the shard matrix. It is carried explicitly so
/// that filtering or reordering a table list cannot silently shift columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub table_id: usize,
    pub vocab_size: u64,
    pub ev_size: usize,
}

impl TableDescriptor {
    pub fn new(table_id: usize, vocab_size: u64, ev_size: usize) -> Self {
        Self {
            table_id,
            vocab_size,
            ev_size,
        }
    }

    /// Build descriptors from a slot-size list; positions become table ids.
    pub fn from_slot_sizes(slot_sizes: &[u64], ev_size: usize) -> Vec<Self> {
        slot_sizes
            .iter()
            .enumerate()
            .map(|(table_id, &vocab_size)| Self::new(table_id, vocab_size, ev_size))
            .collect()
    }

    pub fn placement(&self) -> Placement {
        Placement::for_vocab(self.vocab_size)
    }

    /// Size of the fp32 embedding weights for this table
    pub fn param_bytes(&self) -> u64 {
        self.vocab_size
            .saturating_mul(self.ev_size as u64)
            .saturating_mul(std::mem::size_of::<f32>() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive_on_replicated_side() {
        assert_eq!(Placement::for_vocab(6000), Placement::Replicated);
        assert_eq!(Placement::for_vocab(6001), Placement::SingleDevice);
        assert_eq!(Placement::for_vocab(1), Placement::Replicated);
    }

    #[test]
    fn test_wire_names_align_with_group_order() {
        for (idx, strategy) in PLACEMENT_STRATEGIES.iter().enumerate() {
            assert_eq!(strategy.group_index(), idx);
        }
        assert_eq!(PLACEMENT_STRATEGIES[0].wire_name(), "mp");
        assert_eq!(PLACEMENT_STRATEGIES[1].wire_name(), "dp");
    }

    #[test]
    fn test_placement_serializes_as_wire_name() {
        let json = serde_json::to_string(&PLACEMENT_STRATEGIES).unwrap();
        assert_eq!(json, r#"["mp","dp"]"#);
    }

    #[test]
    fn test_descriptors_from_slot_sizes() {
        let tables = TableDescriptor::from_slot_sizes(&[203931, 4], 128);
        assert_eq!(tables[1].table_id, 1);
        assert_eq!(tables[0].placement(), Placement::SingleDevice);
        assert_eq!(tables[1].param_bytes(), 4 * 128 * 4);
    }
}
