//! Cross-project contact links.
//!
//! A link is a directed edge `(a_project, a_agent) -> (b_project,
//! b_agent)` with status pending, approved or blocked. Cross-project
//! delivery requires an approved, non-expired link in the send
//! direction unless the recipient's contact policy is `open`; revoking
//! flips the status to blocked but keeps the row for history.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::agent::Agent;
use crate::model::project::ProjectBmc;
use crate::store::git_store;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLink {
    pub id: i64,
    pub a_project_id: i64,
    pub a_agent_id: i64,
    pub b_project_id: i64,
    pub b_agent_id: i64,
    /// pending | approved | blocked
    pub status: String,
    pub reason: String,
    pub created_ts: NaiveDateTime,
    pub updated_ts: NaiveDateTime,
    pub expires_ts: Option<NaiveDateTime>,
}

impl AgentLink {
    pub fn is_approved(&self, now: NaiveDateTime) -> bool {
        self.status == "approved" && self.expires_ts.map(|e| e > now).unwrap_or(true)
    }
}

/// Whether a cross-project send may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryVerdict {
    Allowed,
    Blocked,
}

const LINK_COLUMNS: &str = "id, a_project_id, a_agent_id, b_project_id, b_agent_id, status, \
     reason, created_ts, updated_ts, expires_ts";

fn now_naive() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct AgentLinkBmc;

impl AgentLinkBmc {
    /// Create (or return) the pending link A -> B and notify the target
    /// with a system message.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_contact(
        ctx: &Ctx,
        mm: &ModelManager,
        a_project_id: i64,
        a_agent_id: i64,
        b_project_id: i64,
        b_agent_id: i64,
        reason: &str,
    ) -> Result<i64> {
        if let Some(existing) = Self::get_link(
            ctx,
            mm,
            a_project_id,
            a_agent_id,
            b_project_id,
            b_agent_id,
        )
        .await?
        {
            return Ok(existing.id);
        }

        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO agent_links
                (a_project_id, a_agent_id, b_project_id, b_agent_id, status, reason)
            VALUES (?, ?, ?, ?, 'pending', ?)
            RETURNING id
            "#,
            )
            .await?;

        let mut rows = stmt
            .query((a_project_id, a_agent_id, b_project_id, b_agent_id, reason))
            .await?;

        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput(
                "Failed to create contact request".into(),
            ));
        };

        let a_agent = crate::model::agent::AgentBmc::get(ctx, mm, a_agent_id).await?;
        let a_project = ProjectBmc::get(ctx, mm, a_project_id).await?;
        Self::commit_sidecar(ctx, mm, id).await?;

        // Notify the target through its own inbox.
        let notice = crate::model::message::MessageForCreate {
            project_id: b_project_id,
            sender_id: a_agent_id,
            recipient_ids: vec![b_agent_id],
            cc_ids: None,
            bcc_ids: None,
            subject: format!("Contact request from {}@{}", a_agent.name, a_project.slug),
            body_md: format!(
                "{} ({}) requests contact.\n\nReason: {}\n\nRespond with `respond_contact`.",
                a_agent.name, a_project.slug, reason
            ),
            thread_id: None,
            topic: Some("contacts".to_string()),
            importance: Some("normal".to_string()),
            ack_required: false,
            attachments: Vec::new(),
        };
        crate::model::message::MessageBmc::create(ctx, mm, notice).await?;

        Ok(id)
    }

    /// Approve or block the pending link A -> B. Approval carries an
    /// expiry: the provided TTL, or the configured auto TTL.
    #[allow(clippy::too_many_arguments)]
    pub async fn respond_contact(
        ctx: &Ctx,
        mm: &ModelManager,
        a_project_id: i64,
        a_agent_id: i64,
        b_project_id: i64,
        b_agent_id: i64,
        accept: bool,
        ttl_seconds: Option<i64>,
    ) -> Result<AgentLink> {
        let link = Self::get_link(ctx, mm, a_project_id, a_agent_id, b_project_id, b_agent_id)
            .await?
            .ok_or_else(|| {
                crate::Error::InvalidInput("no contact request between these agents".into())
            })?;

        let status = if accept { "approved" } else { "blocked" };
        let expires_ts = if accept {
            let ttl = ttl_seconds.unwrap_or(mm.settings.contacts.auto_ttl_seconds);
            crate::utils::validation::validate_ttl(ttl)?;
            Some(fmt_ts(now_naive() + chrono::Duration::seconds(ttl)))
        } else {
            None
        };

        let db = mm.db();
        let stmt = db
            .prepare(
                "UPDATE agent_links SET status = ?, updated_ts = ?, expires_ts = ? WHERE id = ?",
            )
            .await?;
        stmt.execute((status, fmt_ts(now_naive()), expires_ts, link.id))
            .await?;

        Self::commit_sidecar(ctx, mm, link.id).await?;
        Self::get(ctx, mm, link.id).await
    }

    /// Revoke an approved link (status -> blocked). History is retained.
    pub async fn revoke(ctx: &Ctx, mm: &ModelManager, link_id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE agent_links SET status = 'blocked', updated_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((fmt_ts(now_naive()), link_id)).await?;
        Self::commit_sidecar(ctx, mm, link_id).await?;
        Ok(())
    }

    /// Outbound approved links for an agent, with expiry.
    pub async fn list_contacts(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
    ) -> Result<Vec<AgentLink>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {LINK_COLUMNS} FROM agent_links
            WHERE status = 'approved' AND a_project_id = ? AND a_agent_id = ?
            ORDER BY updated_ts DESC
            "#
            ))
            .await?;

        let mut rows = stmt.query((project_id, agent_id)).await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(Self::from_row(row)?);
        }
        Ok(links)
    }

    /// Pending requests targeting an agent (where the agent is B).
    pub async fn list_pending_requests(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
    ) -> Result<Vec<AgentLink>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {LINK_COLUMNS} FROM agent_links
            WHERE status = 'pending' AND b_project_id = ? AND b_agent_id = ?
            ORDER BY created_ts DESC
            "#
            ))
            .await?;

        let mut rows = stmt.query((project_id, agent_id)).await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(Self::from_row(row)?);
        }
        Ok(links)
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<AgentLink> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!("SELECT {LINK_COLUMNS} FROM agent_links WHERE id = ?"))
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::NotFound)
        }
    }

    pub async fn get_link(
        _ctx: &Ctx,
        mm: &ModelManager,
        a_project_id: i64,
        a_agent_id: i64,
        b_project_id: i64,
        b_agent_id: i64,
    ) -> Result<Option<AgentLink>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {LINK_COLUMNS} FROM agent_links
            WHERE a_project_id = ? AND a_agent_id = ? AND b_project_id = ? AND b_agent_id = ?
            "#
            ))
            .await?;
        let mut rows = stmt
            .query((a_project_id, a_agent_id, b_project_id, b_agent_id))
            .await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(Self::from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// Gate for a cross-project send from `sender` to `recipient`.
    ///
    /// `open` recipients accept anyone; `block_all` recipients accept no
    /// one; everything else requires an approved, non-expired link in
    /// the send direction, checked inside the send operation itself.
    pub async fn delivery_verdict(
        ctx: &Ctx,
        mm: &ModelManager,
        sender: &Agent,
        recipient: &Agent,
    ) -> Result<DeliveryVerdict> {
        if sender.project_id == recipient.project_id {
            return Ok(DeliveryVerdict::Allowed);
        }
        match recipient.contact_policy.as_str() {
            "open" => return Ok(DeliveryVerdict::Allowed),
            "block_all" => return Ok(DeliveryVerdict::Blocked),
            _ => {}
        }

        let link = Self::get_link(
            ctx,
            mm,
            sender.project_id,
            sender.id,
            recipient.project_id,
            recipient.id,
        )
        .await?;

        match link {
            Some(link) if link.is_approved(now_naive()) => Ok(DeliveryVerdict::Allowed),
            _ => Ok(DeliveryVerdict::Blocked),
        }
    }

    /// Journal the link state under the requesting project's tree.
    async fn commit_sidecar(ctx: &Ctx, mm: &ModelManager, link_id: i64) -> Result<()> {
        let link = Self::get(ctx, mm, link_id).await?;
        let a_project = ProjectBmc::get(ctx, mm, link.a_project_id).await?;
        let a_agent = crate::model::agent::AgentBmc::get(ctx, mm, link.a_agent_id).await?;
        let b_agent = crate::model::agent::AgentBmc::get(ctx, mm, link.b_agent_id).await?;

        let rel_path = ProjectBmc::archive_dir(&a_project.slug)
            .join("contacts")
            .join(format!("{}.json", link.id));
        let payload = serde_json::to_string_pretty(&link)?;

        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let (author, email) = mm.git_author();
        git_store::commit_file(
            &repo,
            &rel_path,
            &payload,
            &format!("contact #{}: {} -> {}", link.id, a_agent.name, b_agent.name),
            author,
            email,
        )?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<AgentLink> {
        let created_ts_str: String = row.get(7).unwrap_or_default();
        let updated_ts_str: String = row.get(8).unwrap_or_default();
        let expires_ts_str: Option<String> = row.get(9).unwrap_or_default();

        let created_ts =
            NaiveDateTime::parse_from_str(&created_ts_str, "%Y-%m-%d %H:%M:%S").unwrap_or_default();
        let updated_ts =
            NaiveDateTime::parse_from_str(&updated_ts_str, "%Y-%m-%d %H:%M:%S").unwrap_or_default();
        let expires_ts = expires_ts_str
            .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok());

        Ok(AgentLink {
            id: row.get(0)?,
            a_project_id: row.get(1)?,
            a_agent_id: row.get(2)?,
            b_project_id: row.get(3)?,
            b_agent_id: row.get(4)?,
            status: row.get(5)?,
            reason: row.get(6)?,
            created_ts,
            updated_ts,
            expires_ts,
        })
    }
}
