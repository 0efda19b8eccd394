//! TTL + LRU query cache.
//!
//! Entries expire a fixed time after insertion; reads never extend their
//! life, so the staleness window is bounded by the TTL no matter how hot a
//! key is. Capacity is bounded by entry count with least-recently-used
//! eviction.
//!
//! Every entry is keyed by the clear epoch current when its computation
//! started. [`QueryCache::clear`] bumps the epoch before evicting, so a
//! result computed concurrently with a write is stored under an epoch no
//! later lookup uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::error::NoesisResult;
use crate::graph::store::TripleStore;
use crate::pattern::PatternStore;
use crate::store::now_millis;

use super::metrics::{MetricsSnapshot, QueryMetric, QueryMetrics};
use super::plan::{QueryPlan, plan_patterns, plan_triples};
use super::{Query, QueryKey, QueryOutput, QueryResponse};

/// A cached result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub output: QueryOutput,
    pub plan: QueryPlan,
    /// Milliseconds since the UNIX epoch at insertion.
    pub recorded_at: u64,
    pub cost: usize,
}

/// Planning, caching query executor.
pub struct QueryCache {
    entries: Cache<(u64, QueryKey), Arc<CacheEntry>>,
    epoch: AtomicU64,
    metrics: QueryMetrics,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(max_entries: u64, ttl: Duration, metrics_window: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self {
            entries,
            epoch: AtomicU64::new(0),
            metrics: QueryMetrics::new(metrics_window),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Answer a query from the cache, or plan, run, record, and cache it.
    pub fn execute(
        &self,
        query: &Query,
        triples: &TripleStore,
        patterns: &PatternStore,
    ) -> NoesisResult<QueryResponse> {
        let query = query.normalized();
        let key = query.key();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let slot = (epoch, key.clone());

        if let Some(entry) = self.entries.get(&slot) {
            self.metrics.record_hit(&key);
            tracing::trace!(%key, "query cache hit");
            return Ok(QueryResponse {
                output: entry.output.clone(),
                cache_hit: true,
                plan: entry.plan.clone(),
            });
        }

        let started = Instant::now();
        let (plan, output) = match &query {
            Query::Triples(q) => {
                let plan = plan_triples(triples, q)?;
                let rows = triples.query_with_driver(q, plan.driver())?;
                (plan, QueryOutput::Triples(rows))
            }
            Query::PatternsByContext { tags } => {
                let plan = plan_patterns(patterns, tags)?;
                (plan, QueryOutput::Patterns(patterns.find_by_context(tags)?))
            }
        };
        let duration = started.elapsed();

        self.metrics.record_miss(QueryMetric {
            key: key.clone(),
            duration,
            result_size: output.len(),
            plan_cost: plan.estimated_cost,
        });
        tracing::debug!(%key, plan = %plan, "query planned");

        let entry = Arc::new(CacheEntry {
            output: output.clone(),
            plan: plan.clone(),
            recorded_at: now_millis(),
            cost: plan.estimated_cost,
        });
        self.entries.insert(slot.clone(), entry);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::trace!(%key, "cache cleared during execution");
            self.entries.invalidate(&slot);
        }

        Ok(QueryResponse {
            output,
            cache_hit: false,
            plan,
        })
    }

    /// Invalidate every entry, including any insert still in flight.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
    }

    /// Live entry count after pending maintenance.
    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}
