//! Chooses an execution strategy for a [`Query`] and streams matching
//! records.

use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;

use crate::error::DbResult;
use crate::index_manager::IndexManager;
use crate::query::{Predicate, Query};
use crate::record::Record;
use crate::serializer::{self, Format};
use crate::shard_manager::ShardManager;
use crate::stats::CollectionStats;

/// The strategy `select_plan` picked for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Probe the named field's index; `predicate_index` is the position in
    /// `query.predicates()` of the predicate that was used to choose it.
    IndexProbe {
        field: String,
        predicate_index: usize,
    },
    /// Scan only shards whose observed `[min, max]` for the partition field
    /// could contain the predicate's value/range.
    PartitionScan { shard_ids: Vec<String> },
    FullScan,
}

/// Index probe, then partition scan, then full scan, given a pre-computed
/// stats snapshot so the planner never touches the collection mutator.
pub fn select_plan(
    query: &Query,
    partition_field: Option<&str>,
    stats: &CollectionStats,
    index_manager: &IndexManager,
) -> Plan {
    if let Some(plan) = select_index_plan(query, stats, index_manager) {
        return plan;
    }
    if let Some(plan) = select_partition_plan(query, partition_field, stats) {
        return plan;
    }
    Plan::FullScan
}

fn select_index_plan(
    query: &Query,
    stats: &CollectionStats,
    index_manager: &IndexManager,
) -> Option<Plan> {
    let mut candidates: Vec<(usize, &str, &Predicate, usize)> = Vec::new();
    for (i, (field, predicate)) in query.predicates().iter().enumerate() {
        if !predicate.is_indexable() || !index_manager.has_index(field) {
            continue;
        }
        let estimate = estimate_predicate(field, predicate, stats);
        candidates.push((i, field.as_str(), predicate, estimate));
    }
    if candidates.is_empty() {
        return None;
    }
    // Tie-break: equality beats range; lower estimated count
    // wins; stable order on field name for reproducibility.
    candidates.sort_by(|a, b| {
        let equality_rank = |p: &Predicate| if p.is_equality() { 0 } else { 1 };
        equality_rank(a.2)
            .cmp(&equality_rank(b.2))
            .then(a.3.cmp(&b.3))
            .then(a.1.cmp(b.1))
    });
    let (predicate_index, field, _, _) = candidates[0];
    Some(Plan::IndexProbe {
        field: field.to_string(),
        predicate_index,
    })
}

fn estimate_predicate(field: &str, predicate: &Predicate, stats: &CollectionStats) -> usize {
    match predicate {
        Predicate::Equal(_) | Predicate::In(_) => predicate
            .canonical_bounds()
            .map(|(key, _)| stats.estimated_equality_count(field, &key))
            .unwrap_or(usize::MAX),
        _ => predicate
            .canonical_bounds()
            .map(|(low, high)| stats.estimated_range_count(field, &low, &high))
            .unwrap_or(usize::MAX),
    }
}

fn select_partition_plan(
    query: &Query,
    partition_field: Option<&str>,
    stats: &CollectionStats,
) -> Option<Plan> {
    let partition_field = partition_field?;
    let (_, predicate) = query
        .predicates()
        .iter()
        .find(|(field, _)| field == partition_field)?;
    let (low, high) = predicate.canonical_bounds()?;

    let shard_ids: Vec<String> = stats
        .shard_stats
        .iter()
        .filter(|shard| {
            shard
                .field_ranges
                .iter()
                .find(|(f, _)| f == partition_field)
                .map(|(_, range)| crate::stats::ranges_overlap(&range.min, &range.max, &low, &high))
                .unwrap_or(true)
        })
        .map(|shard| shard.id.clone())
        .collect();
    Some(Plan::PartitionScan { shard_ids })
}

/// Stream-decode every candidate and apply the full predicate set.
/// Re-checking every predicate (not just the residual
/// ones) keeps this correct even for the predicate the plan was chosen by,
/// since index/partition bounds are necessarily conservative for some
/// operators (`startsWith` range bounds, overlap checks).
///
/// Takes owned `Arc` handles (rather than borrowing) so the resulting
/// stream is `'static` and can outlive the call that built it — the shape
/// `Collection::fetch_stream`/`Engine::fetch_stream` need to hand a stream
/// back to a caller without pinning a borrow of `self`.
pub fn execute<T: Record + 'static>(
    plan: Plan,
    query: Query,
    shard_manager: Arc<ShardManager>,
    index_manager: Arc<IndexManager>,
    format: Format,
) -> impl Stream<Item = DbResult<T>> + 'static {
    try_stream! {
        match plan {
            Plan::IndexProbe { field, predicate_index } => {
                let (_, predicate) = &query.predicates()[predicate_index];
                let candidates = index_candidates(&field, predicate, &index_manager);
                for bytes in candidates {
                    let record: T = serializer::decode(&bytes, format)?;
                    if query.matches(&record) {
                        yield record;
                    }
                }
            }
            Plan::PartitionScan { shard_ids } => {
                let mut ids = shard_ids;
                ids.sort();
                for id in ids {
                    let Ok(shard) = shard_manager.get_shard(&id) else { continue };
                    let records: Vec<T> = shard.load_all().await?;
                    for record in records {
                        if query.matches(&record) {
                            yield record;
                        }
                    }
                }
            }
            Plan::FullScan => {
                let mut shards = shard_manager.all_shards();
                shards.sort_by(|a, b| a.id().cmp(b.id()));
                for shard in shards {
                    let records: Vec<T> = shard.load_all().await?;
                    for record in records {
                        if query.matches(&record) {
                            yield record;
                        }
                    }
                }
            }
        }
    }
}

fn index_candidates(field: &str, predicate: &Predicate, index_manager: &IndexManager) -> Vec<Vec<u8>> {
    match predicate {
        Predicate::Equal(_) => predicate
            .canonical_bounds()
            .map(|(key, _)| index_manager.search(field, &key))
            .unwrap_or_default(),
        Predicate::In(values) => values
            .iter()
            .filter_map(|v| v.to_canonical_string())
            .flat_map(|key| index_manager.search(field, &key))
            .collect(),
        Predicate::Between(_, _) => predicate
            .canonical_bounds()
            .map(|(low, high)| index_manager.range_search(field, &low, &high, true))
            .unwrap_or_default(),
        Predicate::GreaterThan(_) => predicate
            .canonical_bounds()
            .map(|(low, _)| index_manager.range_from(field, &low, false))
            .unwrap_or_default(),
        Predicate::GreaterOrEqual(_) => predicate
            .canonical_bounds()
            .map(|(low, _)| index_manager.range_from(field, &low, true))
            .unwrap_or_default(),
        Predicate::LessThan(_) => predicate
            .canonical_bounds()
            .map(|(_, high)| index_manager.range_to(field, &high, false))
            .unwrap_or_default(),
        Predicate::LessOrEqual(_) => predicate
            .canonical_bounds()
            .map(|(_, high)| index_manager.range_to(field, &high, true))
            .unwrap_or_default(),
        Predicate::StartsWith(prefix) => {
            index_manager.range_search(field, prefix, &format!("{prefix}\u{10FFFF}"), true)
        }
        Predicate::NotEqual(_) | Predicate::Contains(_) => Vec::new(),
    }
}
