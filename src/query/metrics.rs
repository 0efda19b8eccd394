//! Query timing metrics.
//!
//! A bounded ring of the most recent executions plus per-shape aggregates.
//! Aggregates live in a `DashMap` so concurrent queries of different shapes
//! do not contend on a single lock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::QueryKey;

/// One executed (missed) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub key: QueryKey,
    pub duration: Duration,
    pub result_size: usize,
    pub plan_cost: usize,
}

/// Aggregates for one query shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShapeStats {
    pub executions: u64,
    pub hits: u64,
    pub misses: u64,
    pub total_duration: Duration,
    pub total_rows: u64,
}

impl ShapeStats {
    /// Mean duration of executions that reached the stores.
    pub fn mean_duration(&self) -> Duration {
        if self.misses == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.misses);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn hit_rate(&self) -> f32 {
        if self.executions == 0 {
            return 0.0;
        }
        self.hits as f32 / self.executions as f32
    }
}

/// Point-in-time copy of the metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub recent: Vec<QueryMetric>,
    /// Sorted by shape.
    pub shapes: Vec<(String, ShapeStats)>,
}

impl MetricsSnapshot {
    pub fn total_hits(&self) -> u64 {
        self.shapes.iter().map(|(_, s)| s.hits).sum()
    }

    pub fn total_misses(&self) -> u64 {
        self.shapes.iter().map(|(_, s)| s.misses).sum()
    }
}

/// Recorder shared by every query.
#[derive(Debug)]
pub struct QueryMetrics {
    window: usize,
    recent: Mutex<VecDeque<QueryMetric>>,
    shapes: DashMap<String, ShapeStats>,
}

impl QueryMetrics {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent: Mutex::new(VecDeque::with_capacity(window.max(1))),
            shapes: DashMap::new(),
        }
    }

    pub fn record_hit(&self, key: &QueryKey) {
        let mut stats = self.shapes.entry(key.shape.clone()).or_default();
        stats.executions += 1;
        stats.hits += 1;
    }

    pub fn record_miss(&self, metric: QueryMetric) {
        {
            let mut stats = self.shapes.entry(metric.key.shape.clone()).or_default();
            stats.executions += 1;
            stats.misses += 1;
            stats.total_duration += metric.duration;
            stats.total_rows += metric.result_size as u64;
        }
        tracing::debug!(
            key = %metric.key,
            duration_us = metric.duration.as_micros() as u64,
            rows = metric.result_size,
            cost = metric.plan_cost,
            "query executed"
        );
        // A poisoned ring only loses history.
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.window {
                recent.pop_front();
            }
            recent.push_back(metric);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let recent = self
            .recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        let mut shapes: Vec<(String, ShapeStats)> = self
            .shapes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        shapes.sort_by(|a, b| a.0.cmp(&b.0));
        MetricsSnapshot { recent, shapes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TripleQuery;
    use crate::query::Query;

    fn metric(key: &QueryKey, micros: u64) -> QueryMetric {
        QueryMetric {
            key: key.clone(),
            duration: Duration::from_micros(micros),
            result_size: 2,
            plan_cost: 5,
        }
    }

    #[test]
    fn ring_is_bounded_and_shapes_aggregate() {
        let metrics = QueryMetrics::new(2);
        let key = Query::Triples(TripleQuery::new().subject("a")).key();
        metrics.record_miss(metric(&key, 10));
        metrics.record_miss(metric(&key, 30));
        metrics.record_miss(metric(&key, 50));
        metrics.record_hit(&key);

        let snap = metrics.snapshot();
        assert_eq!(snap.recent.len(), 2);
        assert_eq!(snap.recent[0].duration, Duration::from_micros(30));
        let (shape, stats) = &snap.shapes[0];
        assert_eq!(shape, "triples[subject]");
        assert_eq!(stats.executions, 4);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.mean_duration(), Duration::from_micros(30));
        assert!((stats.hit_rate() - 0.25).abs() < 1e-6);
        assert_eq!(snap.total_hits(), 1);
    }

    #[test]
    fn mean_duration_survives_counts_beyond_u32() {
        let stats = ShapeStats {
            executions: 1 << 33,
            hits: 0,
            misses: 1 << 33,
            total_duration: Duration::from_secs(1 << 33),
            total_rows: 0,
        };
        assert_eq!(stats.mean_duration(), Duration::from_secs(1));
    }
}
