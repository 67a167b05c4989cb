//! Messaging engine.
//!
//! Sends run through contact gating and the reservation send-gate, then
//! dual-write: a catalog transaction first (message row + recipient
//! rows), then one archive commit covering the canonical copy, the
//! sender's outbox copy, every recipient inbox copy and any new
//! content-addressed attachments. The catalog row is never rolled back
//! after commit; an archive failure leaves `archived_ts` NULL for the
//! reconciliation pass to re-emit, so archive commit order always
//! follows catalog id order.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::agent::{Agent, AgentBmc};
use crate::model::agent_link::{AgentLinkBmc, DeliveryVerdict};
use crate::model::attachment::{Attachment, AttachmentBmc, PendingArchiveFile};
use crate::model::file_reservation::FileReservationBmc;
use crate::model::project::{Project, ProjectBmc};
use crate::store::git_store;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

/// Recipient kind. Stored as metadata; bcc is not hidden by the core
/// (presentation is the adapter's concern).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub project_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub thread_id: Option<String>,
    pub topic: Option<String>,
    pub subject: String,
    pub body_md: String,
    pub importance: String,
    pub ack_required: bool,
    pub created_ts: NaiveDateTime,
    pub archived_ts: Option<NaiveDateTime>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Thread key: explicit `thread_id`, or the singleton `msg:<id>`.
    pub fn thread_key(&self) -> String {
        self.thread_id
            .clone()
            .unwrap_or_else(|| format!("msg:{}", self.id))
    }
}

/// Direct creation input (system messages, replies, tests). Recipients
/// are same-project agent ids; gating is the caller's concern.
#[derive(Deserialize, Serialize)]
pub struct MessageForCreate {
    pub project_id: i64,
    pub sender_id: i64,
    pub recipient_ids: Vec<i64>,
    pub cc_ids: Option<Vec<i64>>,
    pub bcc_ids: Option<Vec<i64>>,
    pub subject: String,
    pub body_md: String,
    pub thread_id: Option<String>,
    pub topic: Option<String>,
    pub importance: Option<String>,
    #[serde(default)]
    pub ack_required: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// A recipient resolved to a concrete agent in a concrete project.
#[derive(Debug, Clone)]
pub struct ResolvedRecipient {
    pub project: Project,
    pub agent: Agent,
    pub kind: RecipientKind,
}

/// A raw recipient string plus its kind, before resolution.
#[derive(Debug, Clone)]
pub struct RecipientSpec {
    pub raw: String,
    pub kind: RecipientKind,
}

/// Full send request after recipient resolution.
pub struct SendRequest {
    pub project: Project,
    pub sender: Agent,
    pub recipients: Vec<ResolvedRecipient>,
    pub subject: String,
    pub body_md: String,
    pub thread_id: Option<String>,
    pub topic: Option<String>,
    pub importance: Option<String>,
    pub ack_required: bool,
    pub attachment_paths: Vec<String>,
    pub convert_images: bool,
}

/// Per-project delivery summary returned by a successful send.
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub project: String,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendOutcome {
    pub message: Message,
    pub deliveries: Vec<Delivery>,
}

/// Recipient row joined with names, for message detail views.
#[derive(Debug, Clone, Serialize)]
pub struct RecipientRow {
    pub agent_id: i64,
    pub agent_name: String,
    pub kind: String,
    pub read_ts: Option<NaiveDateTime>,
    pub ack_ts: Option<NaiveDateTime>,
}

/// Inbox listing options.
#[derive(Debug, Clone, Default)]
pub struct InboxFilter {
    pub limit: i64,
    pub include_bodies: bool,
    pub urgent_only: bool,
    pub since_ts: Option<NaiveDateTime>,
    pub topic: Option<String>,
    pub thread_id: Option<String>,
}

/// One inbox entry: recipient state joined with the message.
#[derive(Debug, Clone, Serialize)]
pub struct InboxItem {
    pub message: Message,
    pub kind: String,
    pub read_ts: Option<NaiveDateTime>,
    pub ack_ts: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadListEntry {
    pub thread_id: String,
    pub subject: String,
    pub message_count: usize,
    pub last_message_ts: NaiveDateTime,
}

/// A message overdue for acknowledgement, for the ACK TTL monitor.
#[derive(Debug, Clone, Serialize)]
pub struct OverdueAck {
    pub message_id: i64,
    pub project_id: i64,
    pub subject: String,
    pub sender_name: String,
    pub recipient_id: i64,
    pub recipient_name: String,
    pub created_ts: NaiveDateTime,
}

const MESSAGE_COLUMNS: &str = "m.id, m.project_id, m.sender_id, ag.name, m.thread_id, m.topic, \
     m.subject, m.body_md, m.importance, m.ack_required, m.created_ts, m.archived_ts, m.attachments";

fn now_naive() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

fn fmt_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Backend Model Controller for message operations.
pub struct MessageBmc;

impl MessageBmc {
    /// Parse one recipient string into `(project_ref, agent_name)`.
    ///
    /// Grammar: bare `Name`; `Name@<project-slug-or-key>`;
    /// `project:<slug>#Name`. Absent project ref means the sender's
    /// project.
    pub fn parse_recipient(raw: &str) -> (Option<String>, String) {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("project:") {
            if let Some((project_ref, name)) = rest.split_once('#') {
                return (Some(project_ref.trim().to_string()), name.trim().to_string());
            }
            return (Some(rest.trim().to_string()), String::new());
        }
        if let Some((name, project_ref)) = trimmed.split_once('@') {
            return (Some(project_ref.trim().to_string()), name.trim().to_string());
        }
        (None, trimmed.to_string())
    }

    /// Resolve raw recipient specs against the catalog.
    ///
    /// Unknown target projects fail with `RecipientProjectNotFound`;
    /// unknown agents fail with `RecipientNotFound` unless
    /// `messaging_auto_register_recipients` is on, in which case a stub
    /// agent is created in the target project.
    pub async fn resolve_recipients(
        ctx: &Ctx,
        mm: &ModelManager,
        sender_project: &Project,
        specs: &[RecipientSpec],
    ) -> Result<Vec<ResolvedRecipient>> {
        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            let (project_ref, name) = Self::parse_recipient(&spec.raw);
            if name.is_empty() {
                return Err(crate::Error::InvalidInput(format!(
                    "recipient '{}' names no agent",
                    spec.raw
                )));
            }

            let project = match project_ref {
                None => sender_project.clone(),
                Some(reference) if reference == sender_project.slug => sender_project.clone(),
                Some(reference) => ProjectBmc::get_by_identifier(ctx, mm, &reference)
                    .await
                    .map_err(|_| crate::Error::RecipientProjectNotFound(reference))?,
            };

            let agent = match AgentBmc::get_by_name(ctx, mm, project.id, &name).await {
                Ok(agent) => agent,
                Err(_) if mm.settings.messaging.auto_register_recipients => {
                    let id = AgentBmc::create(
                        ctx,
                        mm,
                        crate::model::agent::AgentForCreate {
                            project_id: project.id,
                            name: name.clone(),
                            program: "unknown".to_string(),
                            model: "unknown".to_string(),
                            task_description: "auto-registered recipient".to_string(),
                            attachments_policy: None,
                            contact_policy: None,
                        },
                    )
                    .await?;
                    AgentBmc::get(ctx, mm, id).await?
                }
                Err(_) => {
                    return Err(crate::Error::RecipientNotFound {
                        recipient: name,
                        project: project.slug,
                    });
                }
            };

            resolved.push(ResolvedRecipient {
                project,
                agent,
                kind: spec.kind,
            });
        }
        Ok(resolved)
    }

    /// Full send pipeline: contact gate, reservation gate, catalog
    /// transaction, archive commit, notification signals.
    pub async fn send(ctx: &Ctx, mm: &ModelManager, req: SendRequest) -> Result<SendOutcome> {
        if req.recipients.is_empty() {
            return Err(crate::Error::InvalidInput(
                "a message needs at least one recipient".into(),
            ));
        }
        if let Some(importance) = req.importance.as_deref() {
            crate::utils::validation::validate_importance(importance)?;
        }

        // Contact gate for cross-project recipients.
        if mm.settings.contacts.enforcement_enabled {
            for recipient in &req.recipients {
                if recipient.project.id == req.project.id {
                    continue;
                }
                let verdict =
                    AgentLinkBmc::delivery_verdict(ctx, mm, &req.sender, &recipient.agent).await?;
                match verdict {
                    DeliveryVerdict::Allowed => {}
                    DeliveryVerdict::Blocked => {
                        let from = format!("{}@{}", req.sender.name, req.project.slug);
                        let to =
                            format!("{}@{}", recipient.agent.name, recipient.project.slug);
                        if mm.settings.messaging.auto_handshake_on_block {
                            let link_id = AgentLinkBmc::request_contact(
                                ctx,
                                mm,
                                req.project.id,
                                req.sender.id,
                                recipient.project.id,
                                recipient.agent.id,
                                "auto-handshake on blocked send",
                            )
                            .await?;
                            return Err(crate::Error::ContactPending { from, to, link_id });
                        }
                        return Err(crate::Error::ContactRequired { from, to });
                    }
                }
            }
        }

        // Attachments are materialized before any write so a bad path
        // fails the send cleanly (or degrades to `missing`).
        let ingested = AttachmentBmc::ingest_paths(
            mm,
            &req.project.slug,
            &req.attachment_paths,
            req.convert_images,
        )?;

        // Reservation send-gate over the concrete paths this send will
        // touch, evaluated per project against that project's active
        // exclusive reservations. The probe filename stands in for the
        // real `<id>-...` name; reservation globs match on the directory
        // surface.
        if mm.settings.reservations.enforcement_enabled {
            let probe = ArchivePlan::probe(&req);
            let mut all_conflicts = Vec::new();
            for (project_id, paths) in probe.paths_by_project() {
                let conflicts = FileReservationBmc::conflicts_for_paths(
                    ctx,
                    mm,
                    project_id,
                    req.sender.id,
                    &paths,
                )
                .await?;
                all_conflicts.extend(conflicts);
            }
            if !all_conflicts.is_empty() {
                return Err(crate::Error::ReservationConflict {
                    conflicts: all_conflicts,
                });
            }
        }

        // Catalog transaction: message row + recipient rows.
        let recipient_tuples: Vec<(i64, &'static str)> = req
            .recipients
            .iter()
            .map(|r| (r.agent.id, r.kind.as_str()))
            .collect();
        let id = Self::insert_catalog(
            mm,
            req.project.id,
            req.sender.id,
            req.thread_id.as_deref(),
            req.topic.as_deref(),
            &req.subject,
            &req.body_md,
            req.importance.as_deref().unwrap_or("normal"),
            req.ack_required,
            &ingested.entries,
            &recipient_tuples,
        )
        .await?;

        // Archive write. The catalog row is never rolled back; a failed
        // commit leaves archived_ts NULL for reconciliation.
        let plan = ArchivePlan::for_send(&req, id, &ingested.entries);
        match Self::write_archive(mm, &plan, ingested.pending_files).await {
            Ok(()) => Self::mark_archived(mm, id).await?,
            Err(e) => {
                warn!(message_id = id, error = %e, "archive write failed; message left archive-pending");
            }
        }

        Self::touch_notification_signals(mm, &req.recipients).await;
        AgentBmc::touch_last_active(ctx, mm, req.sender.id).await?;

        let message = Self::get(ctx, mm, id).await?;
        let mut by_project: HashMap<String, Vec<String>> = HashMap::new();
        for recipient in &req.recipients {
            by_project
                .entry(recipient.project.slug.clone())
                .or_default()
                .push(recipient.agent.name.clone());
        }
        let deliveries = by_project
            .into_iter()
            .map(|(project, agents)| Delivery { project, agents })
            .collect();

        Ok(SendOutcome { message, deliveries })
    }

    /// Direct same-project creation (replies, system notifications).
    /// Skips contact and reservation gates.
    pub async fn create(ctx: &Ctx, mm: &ModelManager, msg_c: MessageForCreate) -> Result<i64> {
        let mut recipient_tuples: Vec<(i64, &'static str)> = Vec::new();
        for rid in &msg_c.recipient_ids {
            recipient_tuples.push((*rid, "to"));
        }
        if let Some(cc) = &msg_c.cc_ids {
            for rid in cc {
                recipient_tuples.push((*rid, "cc"));
            }
        }
        if let Some(bcc) = &msg_c.bcc_ids {
            for rid in bcc {
                recipient_tuples.push((*rid, "bcc"));
            }
        }
        if recipient_tuples.is_empty() {
            return Err(crate::Error::InvalidInput(
                "a message needs at least one recipient".into(),
            ));
        }

        let id = Self::insert_catalog(
            mm,
            msg_c.project_id,
            msg_c.sender_id,
            msg_c.thread_id.as_deref(),
            msg_c.topic.as_deref(),
            &msg_c.subject,
            &msg_c.body_md,
            msg_c.importance.as_deref().unwrap_or("normal"),
            msg_c.ack_required,
            &msg_c.attachments,
            &recipient_tuples,
        )
        .await?;

        let project = ProjectBmc::get(ctx, mm, msg_c.project_id).await?;
        let sender = AgentBmc::get(ctx, mm, msg_c.sender_id).await?;
        let mut recipients = Vec::new();
        for (agent_id, kind) in &recipient_tuples {
            let agent = AgentBmc::get(ctx, mm, *agent_id).await?;
            // Inbox copies land in the recipient's own project tree.
            let agent_project = if agent.project_id == project.id {
                project.clone()
            } else {
                ProjectBmc::get(ctx, mm, agent.project_id).await?
            };
            recipients.push(ResolvedRecipient {
                project: agent_project,
                agent,
                kind: match *kind {
                    "cc" => RecipientKind::Cc,
                    "bcc" => RecipientKind::Bcc,
                    _ => RecipientKind::To,
                },
            });
        }

        let plan = ArchivePlan::new(
            id,
            &project,
            &sender.name,
            &recipients,
            &msg_c.subject,
            &msg_c.body_md,
            msg_c.thread_id.as_deref(),
            msg_c.topic.as_deref(),
            msg_c.importance.as_deref().unwrap_or("normal"),
            &msg_c.attachments,
        );
        match Self::write_archive(mm, &plan, Vec::new()).await {
            Ok(()) => Self::mark_archived(mm, id).await?,
            Err(e) => {
                warn!(message_id = id, error = %e, "archive write failed; message left archive-pending");
            }
        }

        Ok(id)
    }

    /// Catalog transaction for one send: message row, then the recipient
    /// batch. Each statement is atomic, and each is retried on lock
    /// contention under the shared circuit breaker.
    #[allow(clippy::too_many_arguments)]
    async fn insert_catalog(
        mm: &ModelManager,
        project_id: i64,
        sender_id: i64,
        thread_id: Option<&str>,
        topic: Option<&str>,
        subject: &str,
        body_md: &str,
        importance: &str,
        ack_required: bool,
        attachments: &[Attachment],
        recipient_tuples: &[(i64, &'static str)],
    ) -> Result<i64> {
        use crate::store::retry::{DEFAULT_MAX_ATTEMPTS, retry_on_db_lock};

        let db = mm.db();
        let attachments_json = serde_json::to_string(attachments)?;

        let id = retry_on_db_lock(mm.breaker(), "messages.insert", DEFAULT_MAX_ATTEMPTS, || async {
            let stmt = db
                .prepare(
                    r#"
                INSERT INTO messages
                    (project_id, sender_id, thread_id, topic, subject, body_md,
                     importance, ack_required, attachments)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
                )
                .await?;

            let mut rows = stmt
                .query((
                    project_id,
                    sender_id,
                    thread_id,
                    topic,
                    subject,
                    body_md,
                    importance,
                    ack_required,
                    attachments_json.as_str(),
                ))
                .await?;

            if let Some(row) = rows.next().await? {
                Ok(row.get::<i64>(0)?)
            } else {
                Err(crate::Error::InvalidInput("Failed to create message".into()))
            }
        })
        .await?;

        // Batch insert recipients: VALUES (?, ?, ?), (?, ?, ?), ...
        // Duplicate agents collapse onto their first kind.
        let mut seen = std::collections::HashSet::new();
        let unique: Vec<&(i64, &'static str)> = recipient_tuples
            .iter()
            .filter(|(agent_id, _)| seen.insert(*agent_id))
            .collect();

        let mut query = String::from(
            "INSERT INTO message_recipients (message_id, agent_id, kind) VALUES ",
        );
        let mut params: Vec<libsql::Value> = Vec::with_capacity(unique.len() * 3);
        for (i, (rid, kind)) in unique.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            query.push_str("(?, ?, ?)");
            params.push(id.into());
            params.push((*rid).into());
            params.push((*kind).to_string().into());
        }
        retry_on_db_lock(mm.breaker(), "message_recipients.insert", DEFAULT_MAX_ATTEMPTS, || {
            let query = query.clone();
            let params = params.clone();
            async move {
                let stmt = db.prepare(&query).await?;
                stmt.execute(libsql::params::Params::Positional(params))
                    .await?;
                Ok(())
            }
        })
        .await?;

        Ok(id)
    }

    async fn mark_archived(mm: &ModelManager, message_id: i64) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE messages SET archived_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((fmt_ts(now_naive()), message_id)).await?;
        Ok(())
    }

    /// Write every file of the plan and commit them in one go.
    async fn write_archive(
        mm: &ModelManager,
        plan: &ArchivePlan,
        pending_files: Vec<PendingArchiveFile>,
    ) -> Result<()> {
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let workdir = repo
            .workdir()
            .ok_or_else(|| crate::Error::InvalidInput("No workdir".into()))?;

        let mut all_paths: Vec<PathBuf> = Vec::new();

        for rel in plan.message_paths() {
            let full = workdir.join(&rel);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, &plan.content)?;
            all_paths.push(rel);
        }

        for pending in AttachmentBmc::dedupe_existing(workdir, pending_files) {
            let full = workdir.join(&pending.rel_path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, &pending.bytes)?;
            all_paths.push(pending.rel_path);
        }

        let (author, email) = mm.git_author();
        git_store::commit_paths(&repo, &all_paths, &plan.commit_subject, author, email)?;
        info!(subject = %plan.commit_subject, files = all_paths.len(), "archive commit");
        Ok(())
    }

    /// Re-emit archive writes for messages whose catalog row landed but
    /// whose archive commit did not (crash window of the dual write).
    pub async fn reconcile_archive(ctx: &Ctx, mm: &ModelManager, limit: i64) -> Result<usize> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id FROM messages WHERE archived_ts IS NULL ORDER BY id ASC LIMIT ?",
            )
            .await?;
        let mut rows = stmt.query([limit]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }

        let mut recovered = 0;
        for id in ids {
            let message = Self::get(ctx, mm, id).await?;
            let project = ProjectBmc::get(ctx, mm, message.project_id).await?;
            let recipient_rows = Self::get_recipients(ctx, mm, id).await?;

            let mut recipients = Vec::new();
            for row in &recipient_rows {
                let agent = AgentBmc::get(ctx, mm, row.agent_id).await?;
                let agent_project = ProjectBmc::get(ctx, mm, agent.project_id).await?;
                recipients.push(ResolvedRecipient {
                    project: agent_project,
                    agent,
                    kind: match row.kind.as_str() {
                        "cc" => RecipientKind::Cc,
                        "bcc" => RecipientKind::Bcc,
                        _ => RecipientKind::To,
                    },
                });
            }

            let plan = ArchivePlan::new(
                id,
                &project,
                &message.sender_name,
                &recipients,
                &message.subject,
                &message.body_md,
                message.thread_id.as_deref(),
                message.topic.as_deref(),
                &message.importance,
                &message.attachments,
            );
            match Self::write_archive(mm, &plan, Vec::new()).await {
                Ok(()) => {
                    Self::mark_archived(mm, id).await?;
                    recovered += 1;
                }
                Err(e) => {
                    warn!(message_id = id, error = %e, "archive reconciliation failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Inbox listing: recipient rows joined with messages, newest first,
    /// single round-trip. The agent id is already project-scoped, and
    /// cross-project deliveries must appear here, so there is no filter
    /// on the message's own project.
    pub async fn fetch_inbox(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
        filter: &InboxFilter,
    ) -> Result<Vec<InboxItem>> {
        let db = mm.db();

        let mut query = format!(
            r#"
            SELECT {MESSAGE_COLUMNS}, mr.kind, mr.read_ts, mr.ack_ts
            FROM messages AS m
            JOIN message_recipients AS mr ON m.id = mr.message_id
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE mr.agent_id = ?
            "#
        );
        let mut params: Vec<libsql::Value> = vec![agent_id.into()];

        if filter.urgent_only {
            query.push_str(" AND m.importance = 'urgent'");
        }
        if let Some(since) = filter.since_ts {
            query.push_str(" AND m.created_ts > ?");
            params.push(fmt_ts(since).into());
        }
        if let Some(topic) = &filter.topic {
            query.push_str(" AND m.topic = ?");
            params.push(topic.clone().into());
        }
        if let Some(thread_id) = &filter.thread_id {
            query.push_str(" AND m.thread_id = ?");
            params.push(thread_id.clone().into());
        }

        query.push_str(" ORDER BY m.created_ts DESC, m.id DESC LIMIT ?");
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        params.push(limit.into());

        let stmt = db.prepare(&query).await?;
        let mut rows = stmt
            .query(libsql::params::Params::Positional(params))
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(13)?;
            let read_ts: Option<String> = row.get(14)?;
            let ack_ts: Option<String> = row.get(15)?;
            let mut message = Self::from_row(row)?;
            if !filter.include_bodies {
                message.body_md = String::new();
            }
            items.push(InboxItem {
                message,
                kind,
                read_ts: read_ts
                    .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
                ack_ts: ack_ts
                    .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
            });
        }
        Ok(items)
    }

    /// Outbox: messages sent by the agent, newest first.
    pub async fn list_outbox(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        agent_id: i64,
        limit: i64,
        include_bodies: bool,
    ) -> Result<Vec<Message>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages AS m
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE m.sender_id = ? AND m.project_id = ?
            ORDER BY m.created_ts DESC, m.id DESC
            LIMIT ?
            "#
            ))
            .await?;

        let mut rows = stmt.query((agent_id, project_id, limit)).await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            let mut message = Self::from_row(row)?;
            if !include_bodies {
                message.body_md = String::new();
            }
            messages.push(message);
        }
        Ok(messages)
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, message_id: i64) -> Result<Message> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages AS m
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE m.id = ?
            "#
            ))
            .await?;
        let mut rows = stmt.query([message_id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::MessageNotFound(message_id))
        }
    }

    /// Recipient rows with agent names, ordered by kind then name.
    pub async fn get_recipients(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
    ) -> Result<Vec<RecipientRow>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT mr.agent_id, a.name, mr.kind, mr.read_ts, mr.ack_ts
            FROM message_recipients mr
            JOIN agents a ON mr.agent_id = a.id
            WHERE mr.message_id = ?
            ORDER BY mr.kind, a.name
            "#,
            )
            .await?;

        let mut rows = stmt.query([message_id]).await?;
        let mut recipients = Vec::new();
        while let Some(row) = rows.next().await? {
            let read_ts: Option<String> = row.get(3)?;
            let ack_ts: Option<String> = row.get(4)?;
            recipients.push(RecipientRow {
                agent_id: row.get(0)?,
                agent_name: row.get(1)?,
                kind: row.get(2)?,
                read_ts: read_ts
                    .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
                ack_ts: ack_ts
                    .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok()),
            });
        }
        Ok(recipients)
    }

    /// Messages of a thread, oldest first. `msg:<id>` keys resolve to
    /// the singleton message.
    pub async fn list_by_thread(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        thread_id: &str,
    ) -> Result<Vec<Message>> {
        if let Some(id_str) = thread_id.strip_prefix("msg:") {
            let id: i64 = id_str
                .parse()
                .map_err(|_| crate::Error::InvalidInput(format!("bad thread key: {thread_id}")))?;
            let message = Self::get(ctx, mm, id).await?;
            return Ok(vec![message]);
        }

        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages AS m
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE m.project_id = ? AND m.thread_id = ?
            ORDER BY m.created_ts ASC, m.id ASC
            "#
            ))
            .await?;

        let mut rows = stmt.query((project_id, thread_id)).await?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::from_row(row)?);
        }
        Ok(messages)
    }

    /// Mark a message as read by a recipient. Idempotent: a second read
    /// keeps the first timestamp.
    pub async fn mark_read(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
        agent_id: i64,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            UPDATE message_recipients SET read_ts = ?
            WHERE message_id = ? AND agent_id = ? AND read_ts IS NULL
            "#,
            )
            .await?;
        stmt.execute((fmt_ts(now_naive()), message_id, agent_id))
            .await?;
        Ok(())
    }

    /// Acknowledge a message. Also backfills `read_ts` so
    /// `read_ts <= ack_ts` always holds.
    pub async fn acknowledge(
        _ctx: &Ctx,
        mm: &ModelManager,
        message_id: i64,
        agent_id: i64,
    ) -> Result<()> {
        let db = mm.db();
        let now_str = fmt_ts(now_naive());
        let stmt = db
            .prepare(
                r#"
            UPDATE message_recipients
            SET ack_ts = ?, read_ts = COALESCE(read_ts, ?)
            WHERE message_id = ? AND agent_id = ?
            "#,
            )
            .await?;
        stmt.execute((now_str.as_str(), now_str.as_str(), message_id, agent_id))
            .await?;
        Ok(())
    }

    /// Distinct threads for a project, most recently active first.
    pub async fn list_threads(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        limit: i64,
    ) -> Result<Vec<ThreadListEntry>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT
                m.thread_id,
                MIN(m.subject) as subject,
                COUNT(*) as message_count,
                MAX(m.created_ts) as last_message_ts
            FROM messages AS m
            WHERE m.project_id = ? AND m.thread_id IS NOT NULL
            GROUP BY m.thread_id
            ORDER BY last_message_ts DESC
            LIMIT ?
            "#,
            )
            .await?;

        let mut rows = stmt.query((project_id, limit)).await?;
        let mut threads = Vec::new();
        while let Some(row) = rows.next().await? {
            let thread_id: String = row.get(0)?;
            let subject: String = row.get(1)?;
            let message_count: i64 = row.get(2)?;
            let last_message_ts_str: String = row.get(3)?;
            let last_message_ts =
                NaiveDateTime::parse_from_str(&last_message_ts_str, "%Y-%m-%d %H:%M:%S")
                    .unwrap_or_default();

            threads.push(ThreadListEntry {
                thread_id,
                subject,
                message_count: message_count as usize,
                last_message_ts,
            });
        }
        Ok(threads)
    }

    /// Full-text search, FTS5 first with a LIKE fallback.
    ///
    /// Query language: bare tokens, `subject:X`, `body:X`, quoted
    /// phrases. Junk queries return empty instead of erroring.
    pub async fn search(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let trimmed = query.trim();
        // FTS5-unsearchable patterns short-circuit to empty.
        if matches!(
            trimmed,
            "" | "*" | "**" | "***" | "." | ".." | "..." | "?" | "??" | "???"
        ) {
            info!(query, "search query in blocklist, returning empty");
            return Ok(Vec::new());
        }

        let fts_query = build_fts_query(trimmed);
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages AS m
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE m.project_id = ? AND m.id IN (
                SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?
            )
            ORDER BY m.created_ts DESC
            LIMIT ?
            "#
            ))
            .await?;

        let rows = stmt.query((project_id, fts_query.as_str(), limit)).await;
        match rows {
            Ok(mut rows) => {
                let mut messages = Vec::new();
                loop {
                    match rows.next().await {
                        Ok(Some(row)) => messages.push(Self::from_row(row)?),
                        Ok(None) => break,
                        Err(e) => {
                            info!(query, error = %e, "FTS iteration failed, falling back to LIKE");
                            return Self::search_like(_ctx, mm, project_id, trimmed, limit).await;
                        }
                    }
                }
                Ok(messages)
            }
            Err(e) => {
                info!(query, error = %e, "FTS search failed, falling back to LIKE");
                Self::search_like(_ctx, mm, project_id, trimmed, limit).await
            }
        }
    }

    /// Case-insensitive substring fallback when FTS rejects the query.
    async fn search_like(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let needle = strip_field_prefixes(query);
        let like = format!("%{}%", needle.replace('%', ""));
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages AS m
            JOIN agents AS ag ON m.sender_id = ag.id
            WHERE m.project_id = ?
              AND (m.subject LIKE ? COLLATE NOCASE OR m.body_md LIKE ? COLLATE NOCASE)
            ORDER BY m.created_ts DESC
            LIMIT ?
            "#
            ))
            .await?;
        let mut rows = stmt
            .query((project_id, like.as_str(), like.as_str(), limit))
            .await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::from_row(row)?);
        }
        Ok(messages)
    }

    /// Messages requiring ack with no ack past the threshold.
    pub async fn list_overdue_acks(
        _ctx: &Ctx,
        mm: &ModelManager,
        threshold_seconds: i64,
    ) -> Result<Vec<OverdueAck>> {
        let db = mm.db();
        let time_modifier = format!("-{} seconds", threshold_seconds);

        let stmt = db
            .prepare(
                r#"
            SELECT
                m.id, m.project_id, m.subject, ag_sender.name,
                mr.agent_id, ag_recipient.name, m.created_ts
            FROM messages AS m
            JOIN message_recipients AS mr ON m.id = mr.message_id
            JOIN agents AS ag_sender ON m.sender_id = ag_sender.id
            JOIN agents AS ag_recipient ON mr.agent_id = ag_recipient.id
            WHERE
                m.ack_required = 1
                AND mr.ack_ts IS NULL
                AND m.created_ts < datetime('now', ?)
            ORDER BY m.created_ts ASC
            "#,
            )
            .await?;

        let mut rows = stmt.query([time_modifier]).await?;
        let mut overdue = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_ts_str: String = row.get(6)?;
            overdue.push(OverdueAck {
                message_id: row.get(0)?,
                project_id: row.get(1)?,
                subject: row.get(2)?,
                sender_name: row.get(3)?,
                recipient_id: row.get(4)?,
                recipient_name: row.get(5)?,
                created_ts: NaiveDateTime::parse_from_str(&created_ts_str, "%Y-%m-%d %H:%M:%S")
                    .unwrap_or_default(),
            });
        }
        Ok(overdue)
    }

    /// Touch per-recipient signal files so polling agents can watch one
    /// path instead of the whole inbox. Debounced by file mtime.
    async fn touch_notification_signals(mm: &ModelManager, recipients: &[ResolvedRecipient]) {
        let settings = &mm.settings.notifications;
        if !settings.enabled {
            return;
        }
        let debounce = std::time::Duration::from_millis(settings.debounce_ms);

        for recipient in recipients {
            let dir = settings.signals_dir.join(&recipient.project.slug);
            if std::fs::create_dir_all(&dir).is_err() {
                continue;
            }
            let signal_path = dir.join(format!("{}.signal", recipient.agent.name));
            if let Ok(meta) = std::fs::metadata(&signal_path) {
                if let Ok(modified) = meta.modified() {
                    let age = std::time::SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default();
                    if age < debounce {
                        continue;
                    }
                }
            }
            let _ = std::fs::write(&signal_path, chrono::Utc::now().to_rfc3339());
        }
    }

    fn from_row(row: libsql::Row) -> Result<Message> {
        let created_ts_str: String = row.get(10)?;
        let created_ts = NaiveDateTime::parse_from_str(&created_ts_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default();
        let archived_ts_str: Option<String> = row.get(11)?;
        let archived_ts = archived_ts_str
            .and_then(|s| NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok());

        let attachments_str: String = row.get(12)?;
        let attachments: Vec<Attachment> =
            serde_json::from_str(&attachments_str).unwrap_or_default();

        Ok(Message {
            id: row.get(0)?,
            project_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            thread_id: row.get(4)?,
            topic: row.get(5)?,
            subject: row.get(6)?,
            body_md: row.get(7)?,
            importance: row.get(8)?,
            ack_required: row.get(9)?,
            created_ts,
            archived_ts,
            attachments,
        })
    }
}

/// Everything needed to materialize one message in the archive:
/// the rendered content, the canonical/outbox/inbox relative paths and
/// the commit subject.
struct ArchivePlan {
    content: String,
    canonical: PathBuf,
    outbox: PathBuf,
    /// Inbox copies, one per recipient, in the recipient's own project.
    inboxes: Vec<PathBuf>,
    commit_subject: String,
    sender_project_id: i64,
    /// (project_id, project-relative path) pairs for the send gate.
    gate_paths: Vec<(i64, String)>,
}

impl ArchivePlan {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: i64,
        project: &Project,
        sender_name: &str,
        recipients: &[ResolvedRecipient],
        subject: &str,
        body_md: &str,
        thread_id: Option<&str>,
        topic: Option<&str>,
        importance: &str,
        attachments: &[Attachment],
    ) -> Self {
        let now = chrono::Utc::now();
        let y_dir = now.format("%Y").to_string();
        let m_dir = now.format("%m").to_string();
        let filename = format!("{}-{}.md", id, crate::utils::subject_slug(subject));

        let project_root = ProjectBmc::archive_dir(&project.slug);
        let canonical_rel = format!("messages/{}/{}/{}", y_dir, m_dir, filename);
        let canonical = project_root.join(&canonical_rel);
        let outbox_rel = format!(
            "agents/{}/outbox/{}/{}/{}",
            sender_name, y_dir, m_dir, filename
        );
        let outbox = project_root.join(&outbox_rel);

        let mut inboxes = Vec::new();
        let mut gate_paths = vec![
            (project.id, canonical_rel),
            (project.id, outbox_rel),
        ];
        let mut to_names = Vec::new();
        let mut cc_names = Vec::new();
        let mut bcc_names = Vec::new();
        for recipient in recipients {
            let inbox_rel = format!(
                "agents/{}/inbox/{}/{}/{}",
                recipient.agent.name, y_dir, m_dir, filename
            );
            inboxes.push(ProjectBmc::archive_dir(&recipient.project.slug).join(&inbox_rel));
            gate_paths.push((recipient.project.id, inbox_rel));
            match recipient.kind {
                RecipientKind::To => to_names.push(recipient.agent.name.clone()),
                RecipientKind::Cc => cc_names.push(recipient.agent.name.clone()),
                RecipientKind::Bcc => bcc_names.push(recipient.agent.name.clone()),
            }
        }

        let frontmatter = serde_json::json!({
            "id": id,
            "project": project.slug,
            "from": sender_name,
            "to": to_names,
            "cc": cc_names,
            "bcc": bcc_names,
            "subject": subject,
            "thread_id": thread_id,
            "topic": topic,
            "importance": importance,
            "created": now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "attachments": attachments,
        });
        let content = format!(
            "---json\n{}\n---\n\n{}",
            serde_json::to_string_pretty(&frontmatter).unwrap_or_default(),
            body_md
        );

        Self {
            content,
            canonical,
            outbox,
            inboxes,
            commit_subject: format!("send #{}: {}", id, subject),
            sender_project_id: project.id,
            gate_paths,
        }
    }

    fn for_send(req: &SendRequest, id: i64, attachments: &[Attachment]) -> Self {
        Self::new(
            id,
            &req.project,
            &req.sender.name,
            &req.recipients,
            &req.subject,
            &req.body_md,
            req.thread_id.as_deref(),
            req.topic.as_deref(),
            req.importance.as_deref().unwrap_or("normal"),
            attachments,
        )
    }

    /// Pre-insert probe plan used only for the reservation gate.
    fn probe(req: &SendRequest) -> Self {
        Self::for_send(req, 0, &[])
    }

    fn message_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.canonical.clone(), self.outbox.clone()];
        paths.extend(self.inboxes.iter().cloned());
        paths
    }

    /// Gate paths grouped per project (reservation patterns are
    /// project-root-relative).
    fn paths_by_project(&self) -> Vec<(i64, Vec<String>)> {
        let mut by_project: HashMap<i64, Vec<String>> = HashMap::new();
        for (project_id, path) in &self.gate_paths {
            by_project.entry(*project_id).or_default().push(path.clone());
        }
        // Sender's project first for deterministic conflict ordering.
        let sender_project = self.sender_project_id;
        let mut out: Vec<(i64, Vec<String>)> = by_project.into_iter().collect();
        out.sort_by_key(|(pid, _)| (*pid != sender_project, *pid));
        out
    }
}

/// Build an FTS5 MATCH expression from the user query.
///
/// Explicit operators and balanced phrases pass through; hyphenated
/// words are quoted so FTS5 does not read them as NOT; unbalanced quotes
/// degrade to a literal phrase. `subject:`/`body:` prefixes map onto
/// FTS5 column filters (`body:` targets the `body_md` column).
fn build_fts_query(query: &str) -> String {
    let quote_count = query.chars().filter(|c| *c == '"').count();
    if quote_count % 2 != 0 {
        return format!("\"{}\"", query.replace('"', "\"\""));
    }

    let has_fts_operators = query.contains(" AND ")
        || query.contains(" OR ")
        || query.contains(" NOT ")
        || query.contains('*');
    if has_fts_operators || query.starts_with('"') {
        return query.to_string();
    }

    query
        .split_whitespace()
        .map(|word| {
            if let Some(rest) = word.strip_prefix("subject:") {
                format!("subject:\"{}\"", rest.replace('"', ""))
            } else if let Some(rest) = word.strip_prefix("body:") {
                format!("body_md:\"{}\"", rest.replace('"', ""))
            } else if word.contains('-') && !word.starts_with('"') {
                format!("\"{}\"", word)
            } else {
                word.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip `subject:`/`body:` prefixes for the LIKE fallback.
fn strip_field_prefixes(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| {
            w.strip_prefix("subject:")
                .or_else(|| w.strip_prefix("body:"))
                .unwrap_or(w)
        })
        .collect::<Vec<_>>()
        .join(" ")
        .replace('"', "")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_project() -> Project {
        Project {
            id: 1,
            slug: "backend".to_string(),
            human_key: "/backend".to_string(),
            created_at: NaiveDateTime::default(),
        }
    }

    fn sample_agent(id: i64, project_id: i64, name: &str) -> Agent {
        Agent {
            id,
            project_id,
            name: name.to_string(),
            program: "codex".to_string(),
            model: "gpt-5".to_string(),
            task_description: String::new(),
            inception_ts: NaiveDateTime::default(),
            last_active_ts: NaiveDateTime::default(),
            attachments_policy: "auto".to_string(),
            contact_policy: "auto".to_string(),
            registration_token: None,
        }
    }

    fn plan_for(subject: &str, recipients: &[ResolvedRecipient]) -> ArchivePlan {
        let project = sample_project();
        ArchivePlan::new(
            7,
            &project,
            "BlueLake",
            recipients,
            subject,
            "body",
            Some("T-1"),
            None,
            "normal",
            &[],
        )
    }

    #[test]
    fn test_archive_plan_paths() {
        let project = sample_project();
        let recipient = ResolvedRecipient {
            project: project.clone(),
            agent: sample_agent(2, 1, "GreenCastle"),
            kind: RecipientKind::To,
        };
        let plan = plan_for("Test Subject", &[recipient]);

        let canonical = plan.canonical.to_string_lossy().into_owned();
        assert!(canonical.starts_with("projects/backend/messages/"));
        assert!(canonical.ends_with("7-test-subject.md"));

        let outbox = plan.outbox.to_string_lossy().into_owned();
        assert!(outbox.contains("agents/BlueLake/outbox/"));

        assert_eq!(plan.inboxes.len(), 1);
        assert!(
            plan.inboxes[0]
                .to_string_lossy()
                .contains("agents/GreenCastle/inbox/")
        );

        assert_eq!(plan.commit_subject, "send #7: Test Subject");
    }

    #[test]
    fn test_archive_plan_cross_project_inbox_lands_in_recipient_tree() {
        let other = Project {
            id: 2,
            slug: "beta".to_string(),
            human_key: "/beta".to_string(),
            created_at: NaiveDateTime::default(),
        };
        let recipient = ResolvedRecipient {
            project: other,
            agent: sample_agent(9, 2, "PurpleBear"),
            kind: RecipientKind::To,
        };
        let plan = plan_for("Cross", &[recipient]);

        assert!(
            plan.inboxes[0]
                .to_string_lossy()
                .starts_with("projects/beta/agents/PurpleBear/inbox/")
        );

        // Gate paths carry the recipient project id with a
        // project-relative path.
        let by_project = plan.paths_by_project();
        assert_eq!(by_project[0].0, 1); // sender project first
        assert_eq!(by_project[1].0, 2);
        assert!(by_project[1].1[0].starts_with("agents/PurpleBear/inbox/"));
    }

    #[test]
    fn test_frontmatter_contains_kinds() {
        let project = sample_project();
        let recipients = vec![
            ResolvedRecipient {
                project: project.clone(),
                agent: sample_agent(2, 1, "GreenCastle"),
                kind: RecipientKind::To,
            },
            ResolvedRecipient {
                project: project.clone(),
                agent: sample_agent(3, 1, "JadePond"),
                kind: RecipientKind::Bcc,
            },
        ];
        let plan = plan_for("Kinds", &recipients);

        assert!(plan.content.starts_with("---json\n"));
        assert!(plan.content.contains("\"to\": ["));
        assert!(plan.content.contains("\"GreenCastle\""));
        assert!(plan.content.contains("\"bcc\": ["));
        assert!(plan.content.contains("\"JadePond\""));
        assert!(plan.content.ends_with("body"));
    }

    #[test]
    fn test_fts_query_escapes_hyphens() {
        assert_eq!(build_fts_query("full-text search"), "\"full-text\" search");
        assert_eq!(
            build_fts_query("real-time data-driven"),
            "\"real-time\" \"data-driven\""
        );
    }

    #[test]
    fn test_fts_query_preserves_operators_and_phrases() {
        assert_eq!(build_fts_query("full AND text"), "full AND text");
        assert_eq!(build_fts_query("search*"), "search*");
        assert_eq!(build_fts_query("\"exact phrase\""), "\"exact phrase\"");
    }

    #[test]
    fn test_fts_query_field_prefixes() {
        assert_eq!(build_fts_query("subject:plan"), "subject:\"plan\"");
        assert_eq!(build_fts_query("body:deploy"), "body_md:\"deploy\"");
    }

    #[test]
    fn test_fts_query_unbalanced_quotes_literalized() {
        let escaped = build_fts_query("\"unclosed phrase");
        assert!(escaped.starts_with('"') && escaped.ends_with('"'));
    }

    #[test]
    fn test_strip_field_prefixes() {
        assert_eq!(strip_field_prefixes("subject:plan body:x"), "plan x");
        assert_eq!(strip_field_prefixes("plain words"), "plain words");
    }

    #[test]
    fn test_parse_recipient_grammar() {
        assert_eq!(
            MessageBmc::parse_recipient("BlueLake"),
            (None, "BlueLake".to_string())
        );
        assert_eq!(
            MessageBmc::parse_recipient("PurpleBear@beta"),
            (Some("beta".to_string()), "PurpleBear".to_string())
        );
        assert_eq!(
            MessageBmc::parse_recipient("project:beta#PurpleBear"),
            (Some("beta".to_string()), "PurpleBear".to_string())
        );
        assert_eq!(
            MessageBmc::parse_recipient("  JadePond @ beta "),
            (Some("beta".to_string()), "JadePond".to_string())
        );
    }

    #[test]
    fn test_thread_key_singleton() {
        let message = Message {
            id: 42,
            project_id: 1,
            sender_id: 1,
            sender_name: "BlueLake".to_string(),
            thread_id: None,
            topic: None,
            subject: "s".to_string(),
            body_md: String::new(),
            importance: "normal".to_string(),
            ack_required: false,
            created_ts: NaiveDateTime::default(),
            archived_ts: None,
            attachments: Vec::new(),
        };
        assert_eq!(message.thread_key(), "msg:42");
    }
}
