//! Per-collection and per-shard summaries consumed by the query planner.
//! Recomputed after each mutating collection operation;
//! readers receive an immutable snapshot so the planner never holds the
//! collection mutator during plan selection.

use crate::index_manager::IndexManager;
use crate::shard::FieldRange;
use crate::shard_manager::ShardManager;

#[derive(Debug, Clone)]
pub struct ShardStats {
    pub id: String,
    pub document_count: u64,
    pub field_ranges: Vec<(String, FieldRange)>,
}

#[derive(Debug, Clone)]
pub struct IndexFieldStats {
    pub field: String,
    /// `(shard id, range)` for every shard that carries a value for this
    /// field.
    pub shard_ranges: Vec<(String, FieldRange)>,
    pub key_counts: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub index_stats: Vec<IndexFieldStats>,
    pub shard_stats: Vec<ShardStats>,
}

impl CollectionStats {
    pub fn shard(&self, id: &str) -> Option<&ShardStats> {
        self.shard_stats.iter().find(|s| s.id == id)
    }

    pub fn index(&self, field: &str) -> Option<&IndexFieldStats> {
        self.index_stats.iter().find(|s| s.field == field)
    }

    /// Rough cardinality estimate for an equality lookup on `field == key`,
    /// used by the planner's selectivity comparison.
    pub fn estimated_equality_count(&self, field: &str, key: &str) -> usize {
        self.index(field)
            .and_then(|stats| stats.key_counts.iter().find(|(k, _)| k == key))
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Total document count across every shard whose `[min, max]` range for
    /// `field` could overlap `[low, high]`.
    pub fn estimated_range_count(&self, field: &str, low: &str, high: &str) -> usize {
        let Some(stats) = self.index(field) else {
            return 0;
        };
        stats
            .shard_ranges
            .iter()
            .filter(|(_, range)| ranges_overlap(&range.min, &range.max, low, high))
            .map(|(shard_id, _)| {
                self.shard(shard_id)
                    .map(|s| s.document_count as usize)
                    .unwrap_or(0)
            })
            .sum()
    }
}

pub fn ranges_overlap(shard_min: &str, shard_max: &str, query_low: &str, query_high: &str) -> bool {
    shard_min <= query_high && shard_max >= query_low
}

/// Pure computation over a collection's current shard and index state; no
/// locks are held beyond what `ShardManager`/`IndexManager` need internally.
pub async fn compute(shard_manager: &ShardManager, index_manager: &IndexManager) -> CollectionStats {
    let shard_info = shard_manager.all_shard_info().await;

    let shard_stats: Vec<ShardStats> = shard_info
        .iter()
        .map(|(id, meta)| ShardStats {
            id: id.clone(),
            document_count: meta.document_count,
            field_ranges: meta.field_stats.clone(),
        })
        .collect();

    let index_stats: Vec<IndexFieldStats> = index_manager
        .fields()
        .into_iter()
        .map(|field| {
            let shard_ranges = shard_info
                .iter()
                .filter_map(|(id, meta)| {
                    meta.field_stats
                        .iter()
                        .find(|(f, _)| f == &field)
                        .map(|(_, range)| (id.clone(), range.clone()))
                })
                .collect();
            let key_counts = index_manager.key_counts(&field);
            IndexFieldStats {
                field,
                shard_ranges,
                key_counts,
            }
        })
        .collect();

    CollectionStats {
        index_stats,
        shard_stats,
    }
}
