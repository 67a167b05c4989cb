//! Advisory file reservations.
//!
//! Reservations declare intent to edit a path pattern. Grants always
//! succeed; overlapping active exclusive reservations held by other
//! agents are *reported* as conflicts, and it is the observers (the send
//! gate, repo pre-commit hooks) that refuse writes based on them.
//!
//! Every grant/release/renew writes a JSON sidecar under
//! `projects/<slug>/file_reservations/<id>.json` and commits all sidecars
//! touched by one call in a single archive commit.

use crate::Result;
use crate::model::ModelManager;
use crate::model::project::ProjectBmc;
use crate::store::git_store;
use crate::utils::pathspec;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReservation {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: i64,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: String,
    pub created_ts: NaiveDateTime,
    pub expires_ts: NaiveDateTime,
    pub released_ts: Option<NaiveDateTime>,
}

impl FileReservation {
    pub fn is_active(&self, now: NaiveDateTime) -> bool {
        self.released_ts.is_none() && self.expires_ts > now
    }
}

/// One holder of a conflicting reservation, as surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictHolder {
    pub agent: String,
    pub pattern: String,
    pub expires_ts: NaiveDateTime,
    pub id: i64,
}

/// Conflicts for one requested pattern (or one concrete target path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConflictInfo {
    pub pattern: String,
    pub holders: Vec<ConflictHolder>,
}

/// Result of a grant call: the new reservations plus advisory conflicts.
#[derive(Debug, Clone, Serialize)]
pub struct GrantOutcome {
    pub granted: Vec<FileReservation>,
    pub conflicts: Vec<ReservationConflictInfo>,
}

/// An active reservation joined with its holder's name, used for
/// conflict computation.
#[derive(Debug, Clone)]
struct ActiveReservation {
    reservation: FileReservation,
    holder_name: String,
}

const RESERVATION_COLUMNS: &str = "id, project_id, agent_id, path_pattern, exclusive, reason, \
     created_ts, expires_ts, released_ts";

fn now_naive() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Backend Model Controller for file reservation operations.
pub struct FileReservationBmc;

impl FileReservationBmc {
    /// Grant reservations for each pattern, reporting conflicts.
    ///
    /// Always grants: advisory semantics mean the caller gets its
    /// reservations even when exclusive holders overlap. K patterns in
    /// one call produce exactly one archive commit.
    #[allow(clippy::too_many_arguments)]
    pub async fn reserve_paths(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        paths: &[String],
        ttl_seconds: i64,
        exclusive: bool,
        reason: &str,
    ) -> Result<GrantOutcome> {
        crate::utils::validation::validate_ttl(ttl_seconds)?;
        if paths.is_empty() {
            return Err(crate::Error::InvalidInput(
                "at least one path pattern is required".into(),
            ));
        }

        let now = now_naive();
        let expires_ts = now + chrono::Duration::seconds(ttl_seconds);
        let active = Self::load_active_with_holders(ctx, mm, project_id).await?;

        // Conflicts: overlapping active reservation held by someone else,
        // where at least one side is exclusive.
        let mut conflicts: Vec<ReservationConflictInfo> = Vec::new();
        for pattern in paths {
            let holders: Vec<ConflictHolder> = active
                .iter()
                .filter(|a| a.reservation.agent_id != agent_id)
                .filter(|a| a.reservation.exclusive || exclusive)
                .filter(|a| {
                    pathspec::patterns_overlap(&a.reservation.path_pattern, pattern, false)
                })
                .map(|a| ConflictHolder {
                    agent: a.holder_name.clone(),
                    pattern: a.reservation.path_pattern.clone(),
                    expires_ts: a.reservation.expires_ts,
                    id: a.reservation.id,
                })
                .collect();
            if !holders.is_empty() {
                conflicts.push(ReservationConflictInfo {
                    pattern: pattern.clone(),
                    holders,
                });
            }
        }

        // Insert all grants.
        let db = mm.db();
        let expires_str = fmt_ts(expires_ts);
        let mut granted = Vec::with_capacity(paths.len());
        for pattern in paths {
            let stmt = db
                .prepare(
                    r#"
                INSERT INTO file_reservations
                    (project_id, agent_id, path_pattern, exclusive, reason, expires_ts)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
                )
                .await?;
            let mut rows = stmt
                .query((
                    project_id,
                    agent_id,
                    pattern.as_str(),
                    exclusive,
                    reason,
                    expires_str.as_str(),
                ))
                .await?;
            let id = if let Some(row) = rows.next().await? {
                row.get::<i64>(0)?
            } else {
                return Err(crate::Error::InvalidInput(
                    "Failed to create file reservation".into(),
                ));
            };
            granted.push(Self::get(ctx, mm, id).await?);
        }

        // One commit covering every sidecar granted by this call.
        let project = ProjectBmc::get(ctx, mm, project_id).await?;
        let agent_name = Self::agent_name(mm, agent_id).await?;
        Self::commit_sidecars(
            mm,
            &project.slug,
            &agent_name,
            &granted,
            &grant_commit_subject(&granted, &agent_name),
        )
        .await?;

        Ok(GrantOutcome { granted, conflicts })
    }

    /// Conflicts between concrete target paths and active exclusive
    /// reservations held by agents other than `agent_id`. This is the
    /// send gate: reservations held by the sender never block the sender.
    pub async fn conflicts_for_paths(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        concrete_paths: &[String],
    ) -> Result<Vec<ReservationConflictInfo>> {
        let active = Self::load_active_with_holders(ctx, mm, project_id).await?;
        let mut conflicts = Vec::new();

        for path in concrete_paths {
            let holders: Vec<ConflictHolder> = active
                .iter()
                .filter(|a| a.reservation.agent_id != agent_id && a.reservation.exclusive)
                .filter(|a| {
                    pathspec::pattern_matches_path(&a.reservation.path_pattern, path, false)
                })
                .map(|a| ConflictHolder {
                    agent: a.holder_name.clone(),
                    pattern: a.reservation.path_pattern.clone(),
                    expires_ts: a.reservation.expires_ts,
                    id: a.reservation.id,
                })
                .collect();
            if !holders.is_empty() {
                conflicts.push(ReservationConflictInfo {
                    pattern: path.clone(),
                    holders,
                });
            }
        }
        Ok(conflicts)
    }

    /// Release the caller's active reservations whose pattern is in
    /// `paths`. One commit for all touched sidecars.
    pub async fn release_paths(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        paths: &[String],
    ) -> Result<Vec<FileReservation>> {
        let db = mm.db();
        let now_str = fmt_ts(now_naive());
        let mut released = Vec::new();

        for pattern in paths {
            let stmt = db
                .prepare(
                    r#"
                SELECT id FROM file_reservations
                WHERE project_id = ? AND agent_id = ? AND path_pattern = ? AND released_ts IS NULL
                "#,
                )
                .await?;
            let mut rows = stmt.query((project_id, agent_id, pattern.as_str())).await?;

            while let Some(row) = rows.next().await? {
                let id: i64 = row.get(0)?;
                let stmt = db
                    .prepare("UPDATE file_reservations SET released_ts = ? WHERE id = ?")
                    .await?;
                stmt.execute((now_str.as_str(), id)).await?;
                released.push(Self::get(ctx, mm, id).await?);
            }
        }

        if !released.is_empty() {
            let project = ProjectBmc::get(ctx, mm, project_id).await?;
            let agent_name = Self::agent_name(mm, agent_id).await?;
            let subject = if released.len() == 1 {
                format!("release #{}: {}", released[0].id, released[0].path_pattern)
            } else {
                format!("release: {} reservations by {}", released.len(), agent_name)
            };
            Self::commit_sidecars(mm, &project.slug, &agent_name, &released, &subject).await?;
        }

        Ok(released)
    }

    /// Extend matching active reservations: `expires := max(expires,
    /// now + extend_seconds)`. One commit.
    pub async fn renew_paths(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        paths: &[String],
        extend_seconds: i64,
    ) -> Result<Vec<FileReservation>> {
        crate::utils::validation::validate_ttl(extend_seconds)?;
        let db = mm.db();
        let now = now_naive();
        let candidate = now + chrono::Duration::seconds(extend_seconds);
        let mut renewed = Vec::new();

        for pattern in paths {
            let stmt = db
                .prepare(&format!(
                    r#"
                SELECT {RESERVATION_COLUMNS} FROM file_reservations
                WHERE project_id = ? AND agent_id = ? AND path_pattern = ?
                  AND released_ts IS NULL AND expires_ts > ?
                "#
                ))
                .await?;
            let mut rows = stmt
                .query((project_id, agent_id, pattern.as_str(), fmt_ts(now)))
                .await?;

            while let Some(row) = rows.next().await? {
                let reservation = Self::from_row(row)?;
                let new_expires = reservation.expires_ts.max(candidate);
                let stmt = db
                    .prepare("UPDATE file_reservations SET expires_ts = ? WHERE id = ?")
                    .await?;
                stmt.execute((fmt_ts(new_expires), reservation.id)).await?;
                renewed.push(Self::get(ctx, mm, reservation.id).await?);
            }
        }

        if !renewed.is_empty() {
            let project = ProjectBmc::get(ctx, mm, project_id).await?;
            let agent_name = Self::agent_name(mm, agent_id).await?;
            let subject = format!("renew: {} reservations by {}", renewed.len(), agent_name);
            Self::commit_sidecars(mm, &project.slug, &agent_name, &renewed, &subject).await?;
        }

        Ok(renewed)
    }

    /// Force-release a reservation whose holder has gone quiet.
    ///
    /// Allowed only when the holder's `last_active_ts` is older than the
    /// inactivity threshold AND the reservation's sidecar has not been
    /// touched within the activity grace window. On success the original
    /// holder receives a system notification naming the release.
    pub async fn force_release(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
        requester_agent_id: i64,
        reservation_id: i64,
    ) -> Result<FileReservation> {
        let reservation = Self::get(ctx, mm, reservation_id).await?;
        let now = now_naive();
        if !reservation.is_active(now) {
            return Err(crate::Error::FileReservationNotFound(format!(
                "{} (already released or expired)",
                reservation_id
            )));
        }

        let holder = crate::model::agent::AgentBmc::get(ctx, mm, reservation.agent_id).await?;
        let inactivity = mm.settings.reservations.inactivity_seconds;
        let grace = mm.settings.reservations.activity_grace_seconds;

        let holder_idle = now - holder.last_active_ts >= chrono::Duration::seconds(inactivity);
        if !holder_idle {
            return Err(crate::Error::ReservationNotStale {
                id: reservation_id,
                reason: format!(
                    "holder {} active within the last {}s",
                    holder.name, inactivity
                ),
            });
        }

        let project = ProjectBmc::get(ctx, mm, project_id).await?;
        let sidecar_abs = mm
            .storage_root
            .join(Self::sidecar_rel_path(&project.slug, reservation_id));
        if let Ok(meta) = std::fs::metadata(&sidecar_abs) {
            if let Ok(modified) = meta.modified() {
                let age = std::time::SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default();
                if (age.as_secs() as i64) < grace {
                    return Err(crate::Error::ReservationNotStale {
                        id: reservation_id,
                        reason: format!("sidecar touched within the last {}s", grace),
                    });
                }
            }
        }

        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE file_reservations SET released_ts = ? WHERE id = ? AND released_ts IS NULL",
            )
            .await?;
        stmt.execute((fmt_ts(now), reservation_id)).await?;

        let released = Self::get(ctx, mm, reservation_id).await?;
        let requester = crate::model::agent::AgentBmc::get(ctx, mm, requester_agent_id).await?;
        let subject = format!(
            "force-release #{}: {}",
            reservation_id, released.path_pattern
        );
        Self::commit_sidecars(
            mm,
            &project.slug,
            &requester.name,
            std::slice::from_ref(&released),
            &subject,
        )
        .await?;

        // Notify the original holder about the takeover.
        let notice = crate::model::message::MessageForCreate {
            project_id,
            sender_id: requester_agent_id,
            recipient_ids: vec![reservation.agent_id],
            cc_ids: None,
            bcc_ids: None,
            subject: format!("Released stale lock {}", released.path_pattern),
            body_md: format!(
                "Reservation #{} on `{}` was force-released by {} after {}s of holder inactivity.",
                reservation_id, released.path_pattern, requester.name, inactivity
            ),
            thread_id: None,
            topic: Some("file_reservations".to_string()),
            importance: Some("high".to_string()),
            ack_required: false,
            attachments: Vec::new(),
        };
        crate::model::message::MessageBmc::create(ctx, mm, notice).await?;

        Ok(released)
    }

    /// Expire overdue reservations across all projects. Called by the
    /// background sweep; returns the number released.
    pub async fn sweep_expired(ctx: &crate::Ctx, mm: &ModelManager) -> Result<usize> {
        let db = mm.db();
        let now = now_naive();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {RESERVATION_COLUMNS} FROM file_reservations
            WHERE released_ts IS NULL AND expires_ts <= ?
            "#
            ))
            .await?;
        let mut rows = stmt.query([fmt_ts(now)]).await?;

        let mut expired = Vec::new();
        while let Some(row) = rows.next().await? {
            expired.push(Self::from_row(row)?);
        }
        if expired.is_empty() {
            return Ok(0);
        }

        let now_str = fmt_ts(now);
        for reservation in &expired {
            let stmt = db
                .prepare("UPDATE file_reservations SET released_ts = ? WHERE id = ?")
                .await?;
            stmt.execute((now_str.as_str(), reservation.id)).await?;
        }

        // Group sidecar updates per project so each project's archive
        // gets one sweep commit.
        let mut by_project: std::collections::HashMap<i64, Vec<FileReservation>> =
            std::collections::HashMap::new();
        for reservation in expired {
            let refreshed = Self::get(ctx, mm, reservation.id).await?;
            by_project
                .entry(refreshed.project_id)
                .or_default()
                .push(refreshed);
        }

        let mut total = 0;
        for (project_id, reservations) in by_project {
            total += reservations.len();
            let project = ProjectBmc::get(ctx, mm, project_id).await?;
            let subject = format!("sweep: release {} expired reservations", reservations.len());
            Self::commit_sidecars(mm, &project.slug, "sweeper", &reservations, &subject).await?;
        }

        Ok(total)
    }

    pub async fn list_active_for_project(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<FileReservation>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {RESERVATION_COLUMNS} FROM file_reservations
            WHERE project_id = ? AND released_ts IS NULL AND expires_ts > ?
            ORDER BY created_ts DESC
            "#
            ))
            .await?;
        let mut rows = stmt.query((project_id, fmt_ts(now_naive()))).await?;

        let mut reservations = Vec::new();
        while let Some(row) = rows.next().await? {
            reservations.push(Self::from_row(row)?);
        }
        Ok(reservations)
    }

    pub async fn list_all_for_project(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<FileReservation>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {RESERVATION_COLUMNS} FROM file_reservations
            WHERE project_id = ?
            ORDER BY created_ts DESC
            "#
            ))
            .await?;
        let mut rows = stmt.query([project_id]).await?;

        let mut reservations = Vec::new();
        while let Some(row) = rows.next().await? {
            reservations.push(Self::from_row(row)?);
        }
        Ok(reservations)
    }

    pub async fn get(_ctx: &crate::Ctx, mm: &ModelManager, id: i64) -> Result<FileReservation> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {RESERVATION_COLUMNS} FROM file_reservations WHERE id = ?"
            ))
            .await?;
        let mut rows = stmt.query([id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::FileReservationNotFound(format!("{}", id)))
        }
    }

    /// Sidecar path relative to the archive root.
    pub fn sidecar_rel_path(project_slug: &str, reservation_id: i64) -> PathBuf {
        ProjectBmc::archive_dir(project_slug)
            .join("file_reservations")
            .join(format!("{}.json", reservation_id))
    }

    async fn load_active_with_holders(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<ActiveReservation>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT fr.id, fr.project_id, fr.agent_id, fr.path_pattern, fr.exclusive,
                   fr.reason, fr.created_ts, fr.expires_ts, fr.released_ts, a.name
            FROM file_reservations fr
            JOIN agents a ON fr.agent_id = a.id
            WHERE fr.project_id = ? AND fr.released_ts IS NULL AND fr.expires_ts > ?
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id, fmt_ts(now_naive()))).await?;

        let mut active = Vec::new();
        while let Some(row) = rows.next().await? {
            let holder_name: String = row.get(9)?;
            active.push(ActiveReservation {
                reservation: Self::from_row(row)?,
                holder_name,
            });
        }
        Ok(active)
    }

    async fn agent_name(mm: &ModelManager, agent_id: i64) -> Result<String> {
        let db = mm.db();
        let stmt = db.prepare("SELECT name FROM agents WHERE id = ?").await?;
        let mut rows = stmt.query([agent_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Err(crate::Error::agent_not_found(format!("ID: {}", agent_id)))
        }
    }

    /// Write sidecars for the given reservations and commit them all at
    /// once. The single commit is what makes batched grants atomic in
    /// the journal.
    async fn commit_sidecars(
        mm: &ModelManager,
        project_slug: &str,
        agent_name: &str,
        reservations: &[FileReservation],
        commit_subject: &str,
    ) -> Result<()> {
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let workdir = repo
            .workdir()
            .ok_or_else(|| crate::Error::InvalidInput("No workdir".into()))?;

        let mut rel_paths = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            let rel = Self::sidecar_rel_path(project_slug, reservation.id);
            let payload = serde_json::json!({
                "id": reservation.id,
                "agent": agent_name,
                "path_pattern": reservation.path_pattern,
                "exclusive": reservation.exclusive,
                "reason": reservation.reason,
                "created_ts": fmt_ts(reservation.created_ts),
                "expires_ts": fmt_ts(reservation.expires_ts),
                "released_ts": reservation.released_ts.map(fmt_ts),
            });
            let full = workdir.join(&rel);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, serde_json::to_string_pretty(&payload)?)?;
            rel_paths.push(rel);
        }

        let (author, email) = mm.git_author();
        git_store::commit_paths(&repo, &rel_paths, commit_subject, author, email)?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<FileReservation> {
        let created_ts_str: String = row.get(6).unwrap_or_default();
        let expires_ts_str: String = row.get(7).unwrap_or_default();
        let released_ts_str: Option<String> = row.get(8).unwrap_or_default();

        let created_ts =
            NaiveDateTime::parse_from_str(&created_ts_str, "%Y-%m-%d %H:%M:%S").unwrap_or_default();
        let expires_ts =
            NaiveDateTime::parse_from_str(&expires_ts_str, "%Y-%m-%d %H:%M:%S").unwrap_or_default();
        let released_ts = released_ts_str
            .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok());

        Ok(FileReservation {
            id: row.get(0)?,
            project_id: row.get(1)?,
            agent_id: row.get(2)?,
            path_pattern: row.get(3)?,
            exclusive: row.get(4)?,
            reason: row.get(5)?,
            created_ts,
            expires_ts,
            released_ts,
        })
    }
}

fn grant_commit_subject(granted: &[FileReservation], agent_name: &str) -> String {
    match granted {
        [single] => format!(
            "reserve #{}: {} by {}",
            single.id, single.path_pattern, agent_name
        ),
        _ => format!(
            "reserve: {} patterns by {}",
            granted.len(),
            agent_name
        ),
    }
}
