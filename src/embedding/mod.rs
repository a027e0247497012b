//! Embedding tables, lookups and the embedding collection.
//!
//! The planner records which sparse input feeds which table and under which
//! tensor name the pooled vector comes out. Combined with a [`ShardingPlan`]
//! it yields an [`EmbeddingCollection`], the single graph layer that performs
//! every lookup.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ForgeError, ForgeResult};
use crate::invalid_arg;
use crate::sharding::{Placement, ShardingPlan, TableDescriptor};

/// Configuration of one embedding table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingTableConfig {
    pub table_id: usize,
    pub max_vocabulary_size: u64,
    pub ev_size: usize,
}

impl EmbeddingTableConfig {
    pub fn new(table_id: usize, max_vocabulary_size: u64, ev_size: usize) -> Self {
        Self {
            table_id,
            max_vocabulary_size,
            ev_size,
        }
    }

    pub fn descriptor(&self) -> TableDescriptor {
        TableDescriptor::new(self.table_id, self.max_vocabulary_size, self.ev_size)
    }
}

/// How multi-hot lookups are pooled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    #[default]
    Sum,
    Mean,
}

/// One lookup: sparse input `bottom_name` through `table` into `top_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingLookup {
    pub table: EmbeddingTableConfig,
    pub bottom_name: String,
    pub top_name: String,
    pub combiner: Combiner,
}

/// Collects lookups before the sharding plan is known.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingPlanner {
    lookups: Vec<EmbeddingLookup>,
}

impl EmbeddingPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedding_lookup(
        &mut self,
        table: EmbeddingTableConfig,
        bottom_name: impl Into<String>,
        top_name: impl Into<String>,
        combiner: Combiner,
    ) -> &mut Self {
        self.lookups.push(EmbeddingLookup {
            table,
            bottom_name: bottom_name.into(),
            top_name: top_name.into(),
            combiner,
        });
        self
    }

    pub fn lookups(&self) -> &[EmbeddingLookup] {
        &self.lookups
    }

    /// Distinct tables referenced by the lookups, ordered by table id.
    ///
    /// Fails if one table id is registered with two different configs.
    pub fn tables(&self) -> ForgeResult<Vec<EmbeddingTableConfig>> {
        let mut tables: Vec<EmbeddingTableConfig> = Vec::new();
        for lookup in &self.lookups {
            match tables.iter().find(|t| t.table_id == lookup.table.table_id) {
                Some(existing) if *existing != lookup.table => {
                    return Err(invalid_arg!(
                        "table {} registered with conflicting configs",
                        lookup.table.table_id
                    ));
                }
                Some(_) => {}
                None => tables.push(lookup.table),
            }
        }
        tables.sort_by_key(|t| t.table_id);
        Ok(tables)
    }

    /// Bind the lookups to a sharding plan.
    ///
    /// The plan must cover exactly the tables the lookups reference, with
    /// table ids matching plan columns.
    pub fn create_embedding_collection(&self, plan: ShardingPlan) -> ForgeResult<EmbeddingCollection> {
        if self.lookups.is_empty() {
            return Err(invalid_arg!("embedding collection needs at least one lookup"));
        }
        plan.validate()?;

        let tables = self.tables()?;
        if tables.len() != plan.num_tables() {
            return Err(ForgeError::PlanMismatch(format!(
                "plan covers {} tables, lookups reference {}",
                plan.num_tables(),
                tables.len()
            )));
        }
        for table in &tables {
            let expected = Placement::for_vocab(table.max_vocabulary_size);
            match plan.placement_of(table.table_id) {
                None => {
                    return Err(ForgeError::PlanMismatch(format!(
                        "table {} is not in the plan",
                        table.table_id
                    )))
                }
                Some(actual) if actual != expected => {
                    debug!(
                        table_id = table.table_id,
                        %expected,
                        %actual,
                        "plan overrides default placement"
                    );
                }
                Some(_) => {}
            }
        }

        info!(
            lookups = self.lookups.len(),
            tables = tables.len(),
            gpus = plan.num_gpus(),
            "created embedding collection"
        );
        Ok(EmbeddingCollection {
            lookups: self.lookups.clone(),
            tables,
            plan,
        })
    }
}

/// All embedding lookups of a model plus their placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCollection {
    pub lookups: Vec<EmbeddingLookup>,
    pub tables: Vec<EmbeddingTableConfig>,
    pub plan: ShardingPlan,
}

/// Per-GPU share of an embedding collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuPlacement {
    pub gpu: usize,
    pub local_table_ids: Vec<usize>,
    pub local_lookup_ids: Vec<usize>,
    pub param_bytes: u64,
}

impl EmbeddingCollection {
    pub fn bottom_names(&self) -> Vec<&str> {
        self.lookups.iter().map(|l| l.bottom_name.as_str()).collect()
    }

    pub fn top_names(&self) -> Vec<&str> {
        self.lookups.iter().map(|l| l.top_name.as_str()).collect()
    }

    fn table(&self, table_id: usize) -> Option<&EmbeddingTableConfig> {
        self.tables.iter().find(|t| t.table_id == table_id)
    }

    /// What each GPU holds: its tables, the lookups served from them and the
    /// fp32 parameter bytes.
    pub fn placement_report(&self) -> Vec<GpuPlacement> {
        (0..self.plan.num_gpus())
            .map(|gpu| {
                let local_table_ids = self.plan.tables_on(gpu);
                let local_lookup_ids = self
                    .lookups
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| local_table_ids.contains(&l.table.table_id))
                    .map(|(i, _)| i)
                    .collect();
                let param_bytes = local_table_ids
                    .iter()
                    .filter_map(|&t| self.table(t))
                    .map(|t| t.descriptor().param_bytes())
                    .sum();
                GpuPlacement {
                    gpu,
                    local_table_ids,
                    local_lookup_ids,
                    param_bytes,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::generate_plan;

    fn planner(sizes: &[u64]) -> EmbeddingPlanner {
        let mut planner = EmbeddingPlanner::new();
        for (i, &size) in sizes.iter().enumerate() {
            planner.embedding_lookup(
                EmbeddingTableConfig::new(i, size, 128),
                format!("data{}", i),
                format!("emb_vec{}", i),
                Combiner::Sum,
            );
        }
        planner
    }

    #[test]
    fn test_collection_from_matching_plan() {
        let sizes = [203931, 4, 14];
        let collection = planner(&sizes)
            .create_embedding_collection(generate_plan(&sizes, 2))
            .unwrap();
        assert_eq!(collection.tables.len(), 3);
        assert_eq!(collection.top_names(), vec!["emb_vec0", "emb_vec1", "emb_vec2"]);
    }

    #[test]
    fn test_collection_rejects_wrong_table_count() {
        let err = planner(&[203931, 4, 14])
            .create_embedding_collection(generate_plan(&[203931, 4], 2))
            .unwrap_err();
        assert!(matches!(err, ForgeError::PlanMismatch(_)));
    }

    #[test]
    fn test_collection_rejects_empty_planner() {
        let err = EmbeddingPlanner::new()
            .create_embedding_collection(generate_plan(&[1], 1))
            .unwrap_err();
        assert!(matches!(err, ForgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_shared_table_counts_once() {
        let table = EmbeddingTableConfig::new(0, 50, 16);
        let mut planner = EmbeddingPlanner::new();
        planner
            .embedding_lookup(table, "user", "user_vec", Combiner::Sum)
            .embedding_lookup(table, "item", "item_vec", Combiner::Mean);
        assert_eq!(planner.tables().unwrap().len(), 1);

        planner.embedding_lookup(
            EmbeddingTableConfig::new(0, 51, 16),
            "other",
            "other_vec",
            Combiner::Sum,
        );
        assert!(planner.tables().is_err());
    }

    #[test]
    fn test_placement_report() {
        let sizes = [203931, 4, 14, 70000];
        let collection = planner(&sizes)
            .create_embedding_collection(generate_plan(&sizes, 2))
            .unwrap();
        let report = collection.placement_report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].local_table_ids, vec![0, 1, 2]);
        assert_eq!(report[1].local_lookup_ids, vec![1, 2, 3]);
        assert_eq!(report[0].param_bytes, (203931 + 4 + 14) * 128 * 4);
        assert_eq!(report[1].param_bytes, (4 + 14 + 70000) * 128 * 4);
    }
}
