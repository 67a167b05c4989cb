//! Window identities: persistent per-terminal-window agent bindings.
//!
//! An agent in the same terminal window keeps the same identity across
//! restarts by binding `(project, window_uuid)` to a display name with
//! a TTL refreshed on every touch.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowIdentity {
    pub id: i64,
    pub project_id: i64,
    pub window_uuid: String,
    pub display_name: String,
    pub created_ts: NaiveDateTime,
    pub last_active_ts: NaiveDateTime,
    pub expires_ts: Option<NaiveDateTime>,
}

const WINDOW_COLUMNS: &str =
    "id, project_id, window_uuid, display_name, created_ts, last_active_ts, expires_ts";

fn now_naive() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct WindowIdentityBmc;

impl WindowIdentityBmc {
    /// Bind (or rebind) a window to a display name, refreshing the TTL.
    pub async fn bind(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        window_uuid: &str,
        display_name: &str,
    ) -> Result<WindowIdentity> {
        let ttl_days = mm.settings.window_identity_ttl_days;
        let now = now_naive();
        let expires = now + chrono::Duration::days(ttl_days);
        let db = mm.db();

        if let Some(existing) = Self::find(ctx, mm, project_id, window_uuid).await? {
            let stmt = db
                .prepare(
                    "UPDATE window_identities \
                     SET display_name = ?, last_active_ts = ?, expires_ts = ? WHERE id = ?",
                )
                .await?;
            stmt.execute((display_name, fmt_ts(now), fmt_ts(expires), existing.id))
                .await?;
            return Self::get(ctx, mm, existing.id).await;
        }

        let stmt = db
            .prepare(
                r#"
            INSERT INTO window_identities (project_id, window_uuid, display_name, expires_ts)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
            )
            .await?;
        let mut rows = stmt
            .query((project_id, window_uuid, display_name, fmt_ts(expires)))
            .await?;
        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput(
                "Failed to bind window identity".into(),
            ));
        };
        Self::get(ctx, mm, id).await
    }

    /// Resolve a live binding; expired ones resolve to None.
    pub async fn resolve(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        window_uuid: &str,
    ) -> Result<Option<WindowIdentity>> {
        let identity = Self::find(ctx, mm, project_id, window_uuid).await?;
        Ok(identity.filter(|w| w.expires_ts.map(|e| e > now_naive()).unwrap_or(true)))
    }

    /// Refresh `last_active_ts` and push the expiry forward.
    pub async fn touch(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<()> {
        let ttl_days = mm.settings.window_identity_ttl_days;
        let now = now_naive();
        let expires = now + chrono::Duration::days(ttl_days);
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE window_identities SET last_active_ts = ?, expires_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((fmt_ts(now), fmt_ts(expires), id)).await?;
        Ok(())
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<WindowIdentity> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {WINDOW_COLUMNS} FROM window_identities WHERE id = ?"
            ))
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::WindowIdentityNotFound(format!("ID: {}", id)))
        }
    }

    async fn find(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        window_uuid: &str,
    ) -> Result<Option<WindowIdentity>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {WINDOW_COLUMNS} FROM window_identities \
                 WHERE project_id = ? AND window_uuid = ?"
            ))
            .await?;
        let mut rows = stmt.query((project_id, window_uuid)).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    fn from_row(row: libsql::Row) -> Result<WindowIdentity> {
        let created_ts_str: String = row.get(4)?;
        let last_active_ts_str: String = row.get(5)?;
        let expires_ts_str: Option<String> = row.get(6)?;

        Ok(WindowIdentity {
            id: row.get(0)?,
            project_id: row.get(1)?,
            window_uuid: row.get(2)?,
            display_name: row.get(3)?,
            created_ts: NaiveDateTime::parse_from_str(&created_ts_str, "%Y-%m-%d %H:%M:%S")
                .unwrap_or_default(),
            last_active_ts: NaiveDateTime::parse_from_str(
                &last_active_ts_str,
                "%Y-%m-%d %H:%M:%S",
            )
            .unwrap_or_default(),
            expires_ts: expires_ts_str
                .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
        })
    }
}
