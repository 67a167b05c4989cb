//! Background workers.
//!
//! Each worker is an independent tokio task with a steady tick interval
//! and cooperative cancellation through a shared watch channel. Workers
//! only observe and repair; none of them deletes history.

use crate::Ctx;
use crate::model::ModelManager;
use crate::model::agent::{AgentBmc, AgentForCreate};
use crate::model::file_reservation::FileReservationBmc;
use crate::model::message::MessageBmc;
use crate::model::project::ProjectBmc;
use crate::model::tool_metric::ToolMetricBmc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// FD headroom fractions driving the pressure response.
const FD_WARN_HEADROOM: f64 = 0.30;
const FD_EVICT_HEADROOM: f64 = 0.20;
const FD_AGGRESSIVE_HEADROOM: f64 = 0.15;

/// FD monitor cadence.
const FD_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Archive reconciliation cadence and batch size.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const RECONCILE_BATCH: i64 = 32;

/// Handles for all spawned workers; dropping without [`WorkerSet::shutdown`]
/// aborts them without draining.
pub struct WorkerSet {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    /// Spawn every enabled worker for this core.
    pub fn spawn(mm: ModelManager) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let settings = mm.settings.clone();

        if settings.reservations.cleanup_enabled {
            tasks.push(tokio::spawn(reservation_sweep_loop(
                mm.clone(),
                shutdown_rx.clone(),
            )));
        }
        if settings.acks.ttl_enabled {
            tasks.push(tokio::spawn(ack_ttl_loop(mm.clone(), shutdown_rx.clone())));
        }
        tasks.push(tokio::spawn(fd_health_loop(mm.clone(), shutdown_rx.clone())));
        if settings.retention.report_enabled {
            tasks.push(tokio::spawn(retention_report_loop(
                mm.clone(),
                shutdown_rx.clone(),
            )));
        }
        if settings.metrics.emit_enabled {
            tasks.push(tokio::spawn(metrics_snapshot_loop(
                mm.clone(),
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(archive_reconcile_loop(mm, shutdown_rx)));

        Self { shutdown_tx, tasks }
    }

    /// Signal cancellation and drain every worker before returning.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("background workers drained");
    }
}

/// Tick loop scaffold: run `body` every `period` until shutdown flips.
macro_rules! worker_loop {
    ($name:literal, $period:expr, $rx:ident, $body:block) => {{
        let mut interval = tokio::time::interval($period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => $body,
                _ = $rx.changed() => {
                    debug!(worker = $name, "worker cancelled");
                    break;
                }
            }
        }
    }};
}

/// Release expired reservations and commit their sidecar updates.
async fn reservation_sweep_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    let period = Duration::from_secs(mm.settings.reservations.cleanup_interval_seconds.max(1));
    let ctx = Ctx::root_ctx();
    worker_loop!("reservation_sweep", period, rx, {
        match FileReservationBmc::sweep_expired(&ctx, &mm).await {
            Ok(0) => {}
            Ok(released) => info!(released, "reservation sweep released expired reservations"),
            Err(e) => warn!(error = %e, "reservation sweep failed"),
        }
    });
}

/// Warn on overdue acks; in escalation mode flag the recipient's inbox
/// surface with a system-held reservation.
async fn ack_ttl_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    let period = Duration::from_secs(mm.settings.acks.scan_interval_seconds.max(1));
    let ttl = mm.settings.acks.ttl_seconds;
    let ctx = Ctx::root_ctx();
    worker_loop!("ack_ttl", period, rx, {
        match MessageBmc::list_overdue_acks(&ctx, &mm, ttl).await {
            Ok(overdue) => {
                for item in &overdue {
                    warn!(
                        message_id = item.message_id,
                        recipient = %item.recipient_name,
                        subject = %item.subject,
                        "acknowledgement overdue"
                    );
                    if mm.settings.acks.escalation_enabled
                        && mm.settings.acks.escalation_mode == "file_reservation"
                    {
                        if let Err(e) = escalate_overdue_ack(&ctx, &mm, item).await {
                            warn!(error = %e, "ack escalation failed");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "ack TTL scan failed"),
        }
    });
}

/// Grant a non-exclusive monitor-held reservation over the recipient's
/// inbox so list views surface the overdue ack.
async fn escalate_overdue_ack(
    ctx: &Ctx,
    mm: &ModelManager,
    item: &crate::model::message::OverdueAck,
) -> crate::Result<()> {
    let monitor = match AgentBmc::get_by_name(ctx, mm, item.project_id, "AckMonitor").await {
        Ok(agent) => agent,
        Err(_) => {
            let id = AgentBmc::create(
                ctx,
                mm,
                AgentForCreate {
                    project_id: item.project_id,
                    name: "AckMonitor".to_string(),
                    program: "relay".to_string(),
                    model: "system".to_string(),
                    task_description: "ACK escalation monitor".to_string(),
                    attachments_policy: None,
                    contact_policy: Some("block_all".to_string()),
                },
            )
            .await?;
            AgentBmc::get(ctx, mm, id).await?
        }
    };

    let pattern = format!("agents/{}/inbox/**", item.recipient_name);
    let already_held = FileReservationBmc::list_active_for_project(ctx, mm, item.project_id)
        .await?
        .into_iter()
        .any(|r| r.agent_id == monitor.id && r.path_pattern == pattern);
    if already_held {
        return Ok(());
    }

    FileReservationBmc::reserve_paths(
        ctx,
        mm,
        item.project_id,
        monitor.id,
        &[pattern],
        mm.settings.acks.escalation_claim_ttl_seconds,
        false,
        &format!("overdue ack on message #{}", item.message_id),
    )
    .await?;
    Ok(())
}

/// Watch process FD usage against the rlimit and relieve pressure by
/// shrinking the repo cache before EMFILE makes the server unreachable.
async fn fd_health_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    worker_loop!("fd_health", FD_CHECK_INTERVAL, rx, {
        if let Some((used, limit)) = fd_usage() {
            let headroom = 1.0 - (used as f64 / limit as f64);
            if headroom < FD_AGGRESSIVE_HEADROOM {
                error!(used, limit, "FD headroom critical; closing all cached repos");
                mm.repo_cache().clear().await;
            } else if headroom < FD_EVICT_HEADROOM {
                let cached = mm.repo_cache().len().await;
                let evicted = mm.repo_cache().evict_oldest(cached.div_ceil(2)).await;
                warn!(used, limit, evicted, "FD headroom low; evicted aged repo handles");
            } else if headroom < FD_WARN_HEADROOM {
                warn!(used, limit, "FD headroom below 30%");
            }
        }
    });
}

/// (open fds, soft limit) for this process. Linux-only; other platforms
/// report None and the monitor stays quiet.
fn fd_usage() -> Option<(u64, u64)> {
    let used = std::fs::read_dir("/proc/self/fd").ok()?.count() as u64;
    let limits = std::fs::read_to_string("/proc/self/limits").ok()?;
    let limit = limits
        .lines()
        .find(|line| line.starts_with("Max open files"))?
        .split_whitespace()
        .nth(3)?
        .parse::<u64>()
        .ok()?;
    Some((used, limit))
}

/// Per-project message counts and attachment byte totals; warns over
/// quota, never deletes.
async fn retention_report_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    let period = Duration::from_secs(mm.settings.retention.report_interval_seconds.max(1));
    let ctx = Ctx::root_ctx();
    worker_loop!("retention_report", period, rx, {
        match ProjectBmc::list_all(&ctx, &mm).await {
            Ok(projects) => {
                for project in projects {
                    let messages = ProjectBmc::count_messages(&ctx, &mm, project.id)
                        .await
                        .unwrap_or(0);
                    let attachment_bytes = dir_size(
                        &mm.storage_root
                            .join("projects")
                            .join(&project.slug)
                            .join("attachments"),
                    );
                    info!(
                        project = %project.slug,
                        messages,
                        attachment_bytes,
                        "retention report"
                    );
                    if mm.settings.retention.quota_enabled {
                        if attachment_bytes > mm.settings.retention.quota_attachments_limit_bytes {
                            warn!(project = %project.slug, attachment_bytes, "attachment quota exceeded");
                        }
                        if messages > mm.settings.retention.quota_inbox_limit_count {
                            warn!(project = %project.slug, messages, "inbox quota exceeded");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "retention report failed"),
        }
    });
}

fn dir_size(path: &std::path::Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.flatten() {
        let p = entry.path();
        if p.is_dir() {
            total += dir_size(&p);
        } else if let Ok(meta) = entry.metadata() {
            total += meta.len();
        }
    }
    total
}

/// Log aggregate per-tool metrics.
async fn metrics_snapshot_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    let period = Duration::from_secs(mm.settings.metrics.emit_interval_seconds.max(1));
    let ctx = Ctx::root_ctx();
    worker_loop!("metrics_snapshot", period, rx, {
        match ToolMetricBmc::snapshot(&ctx, &mm, period.as_secs() as i64).await {
            Ok(aggregates) => {
                for agg in aggregates {
                    info!(
                        tool = %agg.tool_name,
                        calls = agg.calls,
                        errors = agg.errors,
                        p50_ms = agg.p50_ms,
                        p95_ms = agg.p95_ms,
                        "tool metrics"
                    );
                }
            }
            Err(e) => warn!(error = %e, "metrics snapshot failed"),
        }
    });
}

/// Re-emit archive writes for catalog rows stranded by a crash between
/// the catalog commit and the archive commit. Doubles as the periodic
/// WAL checkpoint tick while the connection is idle.
async fn archive_reconcile_loop(mm: ModelManager, mut rx: watch::Receiver<bool>) {
    let ctx = Ctx::root_ctx();
    worker_loop!("archive_reconcile", RECONCILE_INTERVAL, rx, {
        match MessageBmc::reconcile_archive(&ctx, &mm, RECONCILE_BATCH).await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "archive reconciliation re-emitted commits"),
            Err(e) => warn!(error = %e, "archive reconciliation failed"),
        }
        crate::store::checkpoint_passive(&mm.db).await;
    });
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fd_usage_reports_on_linux() {
        if std::path::Path::new("/proc/self/fd").exists() {
            let (used, limit) = fd_usage().expect("fd usage readable on Linux");
            assert!(used > 0);
            assert!(limit >= used);
        }
    }

    #[test]
    fn test_dir_size_missing_dir_is_zero() {
        assert_eq!(dir_size(std::path::Path::new("/nonexistent/definitely")), 0);
    }
}
