//! Tool usage metrics.
//!
//! Each tool invocation records name, latency and outcome; the metrics
//! snapshot worker aggregates counts, p50/p95 latency and error rates.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ToolMetricAggregate {
    pub tool_name: String,
    pub calls: u64,
    pub errors: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

pub struct ToolMetricBmc;

impl ToolMetricBmc {
    /// Record one tool invocation.
    pub async fn record(
        _ctx: &Ctx,
        mm: &ModelManager,
        tool_name: &str,
        duration_ms: f64,
        success: bool,
        error_kind: Option<&str>,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT INTO tool_metrics (tool_name, duration_ms, success, error_kind) \
                 VALUES (?, ?, ?, ?)",
            )
            .await?;
        stmt.execute((tool_name, duration_ms, success, error_kind))
            .await?;
        Ok(())
    }

    /// Aggregate the last `window_seconds` of metrics per tool.
    pub async fn snapshot(
        _ctx: &Ctx,
        mm: &ModelManager,
        window_seconds: i64,
    ) -> Result<Vec<ToolMetricAggregate>> {
        let db = mm.db();
        let modifier = format!("-{} seconds", window_seconds);
        let stmt = db
            .prepare(
                "SELECT tool_name, duration_ms, success FROM tool_metrics \
                 WHERE created_ts >= datetime('now', ?) ORDER BY tool_name",
            )
            .await?;
        let mut rows = stmt.query([modifier]).await?;

        let mut per_tool: std::collections::BTreeMap<String, (Vec<f64>, u64)> =
            std::collections::BTreeMap::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            let duration: f64 = row.get(1)?;
            let success: bool = row.get(2)?;
            let entry = per_tool.entry(name).or_default();
            entry.0.push(duration);
            if !success {
                entry.1 += 1;
            }
        }

        let mut aggregates = Vec::new();
        for (tool_name, (mut durations, errors)) in per_tool {
            durations.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let calls = durations.len() as u64;
            aggregates.push(ToolMetricAggregate {
                tool_name,
                calls,
                errors,
                p50_ms: percentile(&durations, 0.50),
                p95_ms: percentile(&durations, 0.95),
            });
        }
        Ok(aggregates)
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((sorted.len() as f64) * q).ceil() as usize;
    let idx = rank.clamp(1, sorted.len()) - 1;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_nearest_rank() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&samples, 0.50), 5.0);
        assert_eq!(percentile(&samples, 0.95), 10.0);
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(percentile(&[7.5], 0.5), 7.5);
        assert_eq!(percentile(&[7.5], 0.95), 7.5);
    }
}
