//! Sharding-plan generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::{Placement, TableDescriptor, PLACEMENT_STRATEGIES};
use crate::error::{ForgeError, ForgeResult};
use crate::invalid_arg;

/// Placement of every embedding table across the GPUs.
///
/// Field names and layout match what the engine's embedding-collection
/// builder expects, so the struct serializes directly into its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingPlan {
    /// `num_gpus` rows × `num_tables` columns of 0/1
    pub shard_matrix: Vec<Vec<u8>>,
    /// Table ids per strategy, aligned with `emb_table_placement_strategy`
    pub emb_table_group_strategy: Vec<Vec<usize>>,
    pub emb_table_placement_strategy: Vec<Placement>,
}

/// Build a plan from per-table vocabulary sizes.
///
/// Never fails. An empty size list gives empty groups; `num_gpus == 0` gives a
/// matrix without rows, and single-device tables are still listed in their
/// group but placed nowhere. Use [`ShardingPlan::try_new`] for checked input.
pub fn generate_plan(slot_size_array: &[u64], num_gpus: usize) -> ShardingPlan {
    let num_tables = slot_size_array.len();
    let mut shard_matrix = vec![vec![0u8; num_tables]; num_gpus];
    let mut groups: Vec<Vec<usize>> = vec![Vec::new(); PLACEMENT_STRATEGIES.len()];

    let (replicated, single): (Vec<usize>, Vec<usize>) = (0..num_tables)
        .partition(|&t| Placement::for_vocab(slot_size_array[t]) == Placement::Replicated);

    for table_id in replicated {
        for row in shard_matrix.iter_mut() {
            row[table_id] = 1;
        }
        groups[Placement::Replicated.group_index()].push(table_id);
    }

    // Round robin over single-device tables in index order; size plays no part.
    for (i, table_id) in single.into_iter().enumerate() {
        if let Some(gpu) = i.checked_rem(num_gpus) {
            shard_matrix[gpu][table_id] = 1;
        }
        groups[Placement::SingleDevice.group_index()].push(table_id);
    }

    ShardingPlan {
        shard_matrix,
        emb_table_group_strategy: groups,
        emb_table_placement_strategy: PLACEMENT_STRATEGIES.to_vec(),
    }
}

impl ShardingPlan {
    /// Checked variant of [`generate_plan`]: rejects zero GPUs, an empty table
    /// list and empty tables.
    pub fn try_new(slot_size_array: &[u64], num_gpus: usize) -> ForgeResult<Self> {
        if num_gpus == 0 {
            return Err(invalid_arg!("num_gpus must be >= 1"));
        }
        if slot_size_array.is_empty() {
            return Err(invalid_arg!("slot_size_array must not be empty"));
        }
        if let Some(t) = slot_size_array.iter().position(|&s| s == 0) {
            return Err(invalid_arg!("table {} has a vocabulary size of 0", t));
        }

        let plan = generate_plan(slot_size_array, num_gpus);
        debug!(
            num_gpus,
            num_tables = slot_size_array.len(),
            single_device = plan.group(Placement::SingleDevice).len(),
            replicated = plan.group(Placement::Replicated).len(),
            "generated sharding plan"
        );
        Ok(plan)
    }

    /// Plan for tables identified by their explicit `table_id`.
    ///
    /// The ids must be exactly `0..tables.len()` in any order.
    pub fn from_tables(tables: &[TableDescriptor], num_gpus: usize) -> ForgeResult<Self> {
        let mut sizes = vec![None; tables.len()];
        for table in tables {
            let slot = sizes.get_mut(table.table_id).ok_or_else(|| {
                invalid_arg!(
                    "table id {} out of range for {} tables",
                    table.table_id,
                    tables.len()
                )
            })?;
            if slot.replace(table.vocab_size).is_some() {
                return Err(invalid_arg!("table id {} listed twice", table.table_id));
            }
        }
        // Every slot is filled: n distinct ids all below n.
        let sizes: Vec<u64> = sizes.into_iter().flatten().collect();
        Self::try_new(&sizes, num_gpus)
    }

    pub fn num_gpus(&self) -> usize {
        self.shard_matrix.len()
    }

    /// Number of tables covered by the plan, including with zero GPUs
    pub fn num_tables(&self) -> usize {
        self.emb_table_group_strategy.iter().map(Vec::len).sum()
    }

    /// Table ids assigned to `strategy`, in the order they were assigned
    pub fn group(&self, strategy: Placement) -> &[usize] {
        self.emb_table_placement_strategy
            .iter()
            .position(|s| *s == strategy)
            .and_then(|idx| self.emb_table_group_strategy.get(idx))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn placement_of(&self, table_id: usize) -> Option<Placement> {
        self.emb_table_placement_strategy
            .iter()
            .zip(&self.emb_table_group_strategy)
            .find(|(_, ids)| ids.contains(&table_id))
            .map(|(strategy, _)| *strategy)
    }

    pub fn is_replicated(&self, table_id: usize) -> bool {
        self.placement_of(table_id) == Some(Placement::Replicated)
    }

    /// GPU owning a single-device table; `None` for replicated or unknown tables
    pub fn owner_of(&self, table_id: usize) -> Option<usize> {
        if self.placement_of(table_id) != Some(Placement::SingleDevice) {
            return None;
        }
        self.shard_matrix
            .iter()
            .position(|row| row.get(table_id) == Some(&1))
    }

    /// Tables held by `gpu`, ascending
    pub fn tables_on(&self, gpu: usize) -> Vec<usize> {
        self.shard_matrix
            .get(gpu)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, &flag)| flag == 1)
                    .map(|(t, _)| t)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Re-check the structural invariants of the plan.
    ///
    /// Useful for plans loaded from disk: the strategies must be
    /// `["mp", "dp"]`, groups must partition the table ids, replicated
    /// columns must be all ones and single-device columns must have exactly
    /// one owner.
    pub fn validate(&self) -> ForgeResult<()> {
        if self.emb_table_placement_strategy != PLACEMENT_STRATEGIES {
            let names: Vec<&str> = self
                .emb_table_placement_strategy
                .iter()
                .map(Placement::wire_name)
                .collect();
            return Err(ForgeError::PlanMismatch(format!(
                "placement strategies must be [\"mp\", \"dp\"], got {:?}",
                names
            )));
        }
        if self.emb_table_group_strategy.len() != PLACEMENT_STRATEGIES.len() {
            return Err(ForgeError::PlanMismatch(format!(
                "{} groups for {} strategies",
                self.emb_table_group_strategy.len(),
                PLACEMENT_STRATEGIES.len()
            )));
        }

        let num_tables = self.num_tables();
        let mut seen = vec![false; num_tables];
        for id in self.emb_table_group_strategy.iter().flatten() {
            match seen.get_mut(*id) {
                Some(flag) if !*flag => *flag = true,
                Some(_) => {
                    return Err(ForgeError::PlanMismatch(format!(
                        "table {} appears in more than one group",
                        id
                    )))
                }
                None => {
                    return Err(ForgeError::PlanMismatch(format!(
                        "table id {} out of range for {} tables",
                        id, num_tables
                    )))
                }
            }
        }

        for (gpu, row) in self.shard_matrix.iter().enumerate() {
            if row.len() != num_tables {
                return Err(ForgeError::PlanMismatch(format!(
                    "row {} has {} columns, expected {}",
                    gpu,
                    row.len(),
                    num_tables
                )));
            }
            if row.iter().any(|&flag| flag > 1) {
                return Err(ForgeError::PlanMismatch(format!(
                    "row {} holds a flag other than 0/1",
                    gpu
                )));
            }
        }

        for (strategy, ids) in self
            .emb_table_placement_strategy
            .iter()
            .zip(&self.emb_table_group_strategy)
        {
            for &table_id in ids {
                let holders = self
                    .shard_matrix
                    .iter()
                    .filter(|row| row[table_id] == 1)
                    .count();
                let expected = match strategy {
                    Placement::Replicated => self.num_gpus(),
                    Placement::SingleDevice => self.num_gpus().min(1),
                };
                if holders != expected {
                    return Err(ForgeError::PlanMismatch(format!(
                        "{} table {} is held by {} GPUs, expected {}",
                        strategy, table_id, holders, expected
                    )));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ShardingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} tables on {} GPUs",
            self.num_tables(),
            self.num_gpus()
        )?;
        for (gpu, row) in self.shard_matrix.iter().enumerate() {
            let cells: Vec<String> = row.iter().map(|flag| flag.to_string()).collect();
            writeln!(f, "gpu{:<3} [{}]", gpu, cells.join(" "))?;
        }
        for (strategy, ids) in self
            .emb_table_placement_strategy
            .iter()
            .zip(&self.emb_table_group_strategy)
        {
            writeln!(f, "{}: {:?}", strategy, ids)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_tables_two_gpus() {
        let plan = generate_plan(&[203931, 4, 14], 2);
        assert_eq!(plan.shard_matrix, vec![vec![1, 1, 1], vec![0, 1, 1]]);
        assert_eq!(plan.emb_table_group_strategy, vec![vec![0], vec![1, 2]]);
        assert_eq!(
            plan.emb_table_placement_strategy,
            vec![Placement::SingleDevice, Placement::Replicated]
        );
    }

    #[test]
    fn test_all_small_tables_fully_replicated() {
        let plan = generate_plan(&[10, 6000, 1], 4);
        assert!(plan.shard_matrix.iter().flatten().all(|&f| f == 1));
        assert!(plan.group(Placement::SingleDevice).is_empty());
        assert_eq!(plan.group(Placement::Replicated), &[0, 1, 2]);
    }

    #[test]
    fn test_all_large_tables_single_gpu() {
        let plan = generate_plan(&[7000, 80000, 6001], 1);
        assert_eq!(plan.shard_matrix, vec![vec![1, 1, 1]]);
        assert!(plan.group(Placement::Replicated).is_empty());
    }

    #[test]
    fn test_round_robin_follows_index_not_size() {
        // tables 0, 2, 3, 5 are large; table 1 and 4 are small
        let plan = generate_plan(&[9_000_000, 3, 7000, 10_000_000, 5, 6001], 3);
        assert_eq!(plan.owner_of(0), Some(0));
        assert_eq!(plan.owner_of(2), Some(1));
        assert_eq!(plan.owner_of(3), Some(2));
        assert_eq!(plan.owner_of(5), Some(0));
        assert_eq!(plan.owner_of(1), None);
        assert_eq!(plan.group(Placement::SingleDevice), &[0, 2, 3, 5]);
    }

    #[test]
    fn test_degenerate_inputs_do_not_fail() {
        let plan = generate_plan(&[], 4);
        assert_eq!(plan.shard_matrix.len(), 4);
        assert!(plan.shard_matrix.iter().all(Vec::is_empty));
        assert_eq!(plan.num_tables(), 0);

        let plan = generate_plan(&[10, 90000], 0);
        assert!(plan.shard_matrix.is_empty());
        assert_eq!(plan.group(Placement::SingleDevice), &[1]);
        assert_eq!(plan.group(Placement::Replicated), &[0]);
        assert_eq!(plan.owner_of(1), None);
    }

    #[test]
    fn test_try_new_rejects_bad_input() {
        assert!(matches!(
            ShardingPlan::try_new(&[1, 2], 0),
            Err(ForgeError::InvalidArgument(_))
        ));
        assert!(matches!(
            ShardingPlan::try_new(&[], 8),
            Err(ForgeError::InvalidArgument(_))
        ));
        assert!(ShardingPlan::try_new(&[5, 0], 2).is_err());
        assert!(ShardingPlan::try_new(&[5, 7000], 2).is_ok());
    }

    #[test]
    fn test_from_tables_uses_explicit_ids() {
        let tables = vec![
            TableDescriptor::new(2, 14, 128),
            TableDescriptor::new(0, 203931, 128),
            TableDescriptor::new(1, 4, 128),
        ];
        let plan = ShardingPlan::from_tables(&tables, 2).unwrap();
        assert_eq!(plan, generate_plan(&[203931, 4, 14], 2));

        let gap = vec![TableDescriptor::new(0, 1, 8), TableDescriptor::new(2, 1, 8)];
        assert!(ShardingPlan::from_tables(&gap, 1).is_err());

        let dup = vec![TableDescriptor::new(0, 1, 8), TableDescriptor::new(0, 1, 8)];
        assert!(ShardingPlan::from_tables(&dup, 1).is_err());
    }

    #[test]
    fn test_tables_on_and_placement_of() {
        let plan = generate_plan(&[203931, 4, 14, 70000], 2);
        assert_eq!(plan.tables_on(0), vec![0, 1, 2]);
        assert_eq!(plan.tables_on(1), vec![1, 2, 3]);
        assert!(plan.tables_on(9).is_empty());
        assert!(plan.is_replicated(1));
        assert_eq!(plan.placement_of(3), Some(Placement::SingleDevice));
        assert_eq!(plan.placement_of(42), None);
    }

    #[test]
    fn test_validate_catches_tampering() {
        let mut plan = generate_plan(&[203931, 4, 14], 2);
        assert!(plan.validate().is_ok());

        plan.shard_matrix[1][0] = 1;
        assert!(matches!(plan.validate(), Err(ForgeError::PlanMismatch(_))));

        let mut plan = generate_plan(&[203931, 4, 14], 2);
        plan.emb_table_group_strategy[0].push(1);
        assert!(plan.validate().is_err());

        let mut plan = generate_plan(&[203931, 4, 14], 2);
        plan.shard_matrix[0].pop();
        assert!(plan.validate().is_err());

        let mut plan = generate_plan(&[203931, 4, 14], 2);
        plan.emb_table_group_strategy.push(Vec::new());
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validate_requires_strategy_pair() {
        let json = r#"{
            "shard_matrix": [[1, 1, 1], [1, 1, 1]],
            "emb_table_group_strategy": [[0], [1, 2]],
            "emb_table_placement_strategy": ["dp", "dp"]
        }"#;
        let plan: ShardingPlan = serde_json::from_str(json).unwrap();
        match plan.validate() {
            Err(ForgeError::PlanMismatch(msg)) => assert!(msg.contains("\"dp\", \"dp\"")),
            other => panic!("expected plan mismatch, got {:?}", other),
        }

        let mut plan = generate_plan(&[203931, 4, 14], 2);
        plan.emb_table_placement_strategy.reverse();
        assert!(matches!(plan.validate(), Err(ForgeError::PlanMismatch(_))));
    }

    #[test]
    fn test_json_shape_matches_engine_input() {
        let plan = generate_plan(&[203931, 4, 14], 2);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["shard_matrix"], serde_json::json!([[1, 1, 1], [0, 1, 1]]));
        assert_eq!(
            value["emb_table_group_strategy"],
            serde_json::json!([[0], [1, 2]])
        );
        assert_eq!(
            value["emb_table_placement_strategy"],
            serde_json::json!(["mp", "dp"])
        );
    }

    #[test]
    fn test_display_lists_rows_and_groups() {
        let text = generate_plan(&[203931, 4], 2).to_string();
        assert!(text.contains("2 tables on 2 GPUs"));
        assert!(text.contains("gpu1   [0 1]"));
        assert!(text.contains("mp: [0]"));
    }
}
