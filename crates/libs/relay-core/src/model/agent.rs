//! Agent registration and profiles.
//!
//! Agents are the tool-using identities tied to a project working copy.
//! `(project_id, name)` is unique; lookups are case-insensitive. Every
//! successful tool call touches `last_active_ts`, which both the
//! force-release staleness gate and `whois` rely on.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::project::ProjectBmc;
use crate::store::git_store;
use crate::utils::mistake_detection::suggest_similar;
use crate::utils::names::generate_unique_name;
use crate::utils::validation::{agent_name_is_valid, validate_agent_name};
use chrono::NaiveDateTime;
use relay_common::config::NameEnforcementMode;
use serde::{Deserialize, Serialize};

/// A registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub inception_ts: NaiveDateTime,
    pub last_active_ts: NaiveDateTime,
    /// auto | inline | file | drop
    pub attachments_policy: String,
    /// open | auto | contacts_only | block_all
    pub contact_policy: String,
    pub registration_token: Option<String>,
}

/// Input data for creating a new agent.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AgentForCreate {
    pub project_id: i64,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub attachments_policy: Option<String>,
    pub contact_policy: Option<String>,
}

/// Partial update for agent profile fields.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AgentProfileUpdate {
    pub task_description: Option<String>,
    pub attachments_policy: Option<String>,
    pub contact_policy: Option<String>,
}

const AGENT_COLUMNS: &str = "id, project_id, name, program, model, task_description, \
     inception_ts, last_active_ts, attachments_policy, contact_policy, registration_token";

/// Backend Model Controller for Agent operations.
pub struct AgentBmc;

impl AgentBmc {
    /// Register an agent, applying the configured name enforcement mode.
    ///
    /// - `strict`: an invalid provided name is rejected.
    /// - `coerce`: an invalid (or missing) name is replaced by a
    ///   generated one; a valid name is honored.
    /// - `always_auto`: the provided name is ignored entirely.
    ///
    /// Registering an existing name updates the profile fields in place
    /// and returns the same identity, so `register_agent` then `whois`
    /// round-trips.
    #[allow(clippy::too_many_arguments)]
    pub async fn register(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        name: Option<&str>,
        program: &str,
        model: &str,
        task_description: &str,
        attachments_policy: Option<&str>,
        contact_policy: Option<&str>,
    ) -> Result<Agent> {
        let mode = mm.settings.messaging.agent_name_enforcement;

        let resolved_name = match (mode, name) {
            (NameEnforcementMode::AlwaysAuto, _) | (_, None) => {
                let taken = Self::list_names(ctx, mm, project_id).await?;
                generate_unique_name(&taken)
            }
            (NameEnforcementMode::Strict, Some(provided)) => {
                validate_agent_name(provided)?;
                provided.to_string()
            }
            (NameEnforcementMode::Coerce, Some(provided)) => {
                if agent_name_is_valid(provided) {
                    provided.to_string()
                } else {
                    let taken = Self::list_names(ctx, mm, project_id).await?;
                    generate_unique_name(&taken)
                }
            }
        };

        if let Ok(existing) = Self::get_by_name(ctx, mm, project_id, &resolved_name).await {
            Self::update_profile(
                ctx,
                mm,
                existing.id,
                AgentProfileUpdate {
                    task_description: Some(task_description.to_string()),
                    attachments_policy: attachments_policy.map(str::to_string),
                    contact_policy: contact_policy.map(str::to_string),
                },
            )
            .await?;
            let db = mm.db();
            let stmt = db
                .prepare("UPDATE agents SET program = ?, model = ? WHERE id = ?")
                .await?;
            stmt.execute((program, model, existing.id)).await?;
            return Self::get(ctx, mm, existing.id).await;
        }

        let agent_c = AgentForCreate {
            project_id,
            name: resolved_name,
            program: program.to_string(),
            model: model.to_string(),
            task_description: task_description.to_string(),
            attachments_policy: attachments_policy.map(str::to_string),
            contact_policy: contact_policy.map(str::to_string),
        };
        let id = Self::create(ctx, mm, agent_c).await?;
        Self::get(ctx, mm, id).await
    }

    /// Creates a new agent and commits its profile to the archive.
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, agent_c: AgentForCreate) -> Result<i64> {
        let db = mm.db();

        let registration_token = uuid::Uuid::new_v4().to_string();
        let attachments_policy = agent_c.attachments_policy.as_deref().unwrap_or("auto");
        let contact_policy = agent_c.contact_policy.as_deref().unwrap_or("auto");

        let stmt = db
            .prepare(
                r#"
            INSERT INTO agents
                (project_id, name, program, model, task_description,
                 attachments_policy, contact_policy, registration_token)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
            )
            .await?;

        let mut rows = stmt
            .query((
                agent_c.project_id,
                agent_c.name.as_str(),
                agent_c.program.as_str(),
                agent_c.model.as_str(),
                agent_c.task_description.as_str(),
                attachments_policy,
                contact_policy,
                registration_token.as_str(),
            ))
            .await?;

        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput("Failed to create agent".into()));
        };

        let project = ProjectBmc::get(_ctx, mm, agent_c.project_id).await?;

        // Git operations - serialized to prevent lock contention
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let (author, email) = mm.git_author();

        let profile_rel_path = ProjectBmc::archive_dir(&project.slug)
            .join("agents")
            .join(&agent_c.name)
            .join("profile.json");
        let profile_json = serde_json::to_string_pretty(&serde_json::json!({
            "name": agent_c.name,
            "program": agent_c.program,
            "model": agent_c.model,
            "task_description": agent_c.task_description,
            "attachments_policy": attachments_policy,
            "contact_policy": contact_policy,
        }))?;

        git_store::commit_file(
            &repo,
            &profile_rel_path,
            &profile_json,
            &format!("agent: profile {}", agent_c.name),
            author,
            email,
        )?;

        Ok(id)
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Agent> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .await?;
        let mut rows = stmt.query([id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::agent_not_found(format!("ID: {}", id)))
        }
    }

    /// Case-insensitive lookup by name within a project.
    ///
    /// A miss carries near-miss suggestions computed over the project's
    /// registered names.
    pub async fn get_by_name(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        name: &str,
    ) -> Result<Agent> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE project_id = ? AND LOWER(name) = LOWER(?)"
            ))
            .await?;
        let mut rows = stmt.query((project_id, name)).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            let all_names = Self::list_names(_ctx, mm, project_id).await?;
            let name_refs: Vec<&str> = all_names.iter().map(|s| s.as_str()).collect();
            let similar = suggest_similar(name, &name_refs, 3);
            let suggestions: Vec<String> = similar.into_iter().map(|s| s.to_string()).collect();

            Err(crate::Error::agent_not_found_with_suggestions(
                format!("Name: {} in Project ID: {}", name, project_id),
                suggestions,
            ))
        }
    }

    pub async fn list_all_for_project(
        _ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<Vec<Agent>> {
        let db = mm.db();
        let stmt = db
            .prepare(&format!(
                "SELECT {AGENT_COLUMNS} FROM agents WHERE project_id = ? ORDER BY name ASC"
            ))
            .await?;
        let mut rows = stmt.query([project_id]).await?;

        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            agents.push(Self::from_row(row)?);
        }
        Ok(agents)
    }

    async fn list_names(_ctx: &Ctx, mm: &ModelManager, project_id: i64) -> Result<Vec<String>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT name FROM agents WHERE project_id = ?")
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get(0)?);
        }
        Ok(names)
    }

    /// Touch `last_active_ts`. Called on every successful tool call by
    /// the agent; also what the force-release staleness gate reads.
    pub async fn touch_last_active(_ctx: &Ctx, mm: &ModelManager, agent_id: i64) -> Result<()> {
        let db = mm.db();
        let now_str = chrono::Utc::now()
            .naive_utc()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let stmt = db
            .prepare("UPDATE agents SET last_active_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((now_str, agent_id)).await?;
        Ok(())
    }

    pub async fn set_contact_policy(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
        policy: &str,
    ) -> Result<()> {
        crate::utils::validation::validate_contact_policy(policy)?;
        let db = mm.db();
        let stmt = db
            .prepare("UPDATE agents SET contact_policy = ? WHERE id = ?")
            .await?;
        stmt.execute((policy, agent_id)).await?;
        Ok(())
    }

    pub async fn count_messages_sent(_ctx: &Ctx, mm: &ModelManager, agent_id: i64) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT COUNT(*) FROM messages WHERE sender_id = ?")
            .await?;
        let mut rows = stmt.query([agent_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    pub async fn count_messages_received(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT COUNT(*) FROM message_recipients WHERE agent_id = ?")
            .await?;
        let mut rows = stmt.query([agent_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    /// Updates an agent's profile fields; only non-None fields change.
    pub async fn update_profile(
        _ctx: &Ctx,
        mm: &ModelManager,
        agent_id: i64,
        update: AgentProfileUpdate,
    ) -> Result<()> {
        let db = mm.db();

        if let Some(task_description) = update.task_description {
            let stmt = db
                .prepare("UPDATE agents SET task_description = ? WHERE id = ?")
                .await?;
            stmt.execute((task_description, agent_id)).await?;
        }

        if let Some(attachments_policy) = update.attachments_policy {
            crate::utils::validation::validate_attachments_policy(&attachments_policy)?;
            let stmt = db
                .prepare("UPDATE agents SET attachments_policy = ? WHERE id = ?")
                .await?;
            stmt.execute((attachments_policy, agent_id)).await?;
        }

        if let Some(contact_policy) = update.contact_policy {
            crate::utils::validation::validate_contact_policy(&contact_policy)?;
            let stmt = db
                .prepare("UPDATE agents SET contact_policy = ? WHERE id = ?")
                .await?;
            stmt.execute((contact_policy, agent_id)).await?;
        }

        Self::touch_last_active(_ctx, mm, agent_id).await
    }

    /// Recent archive commit subjects touching this agent's tree.
    /// Surfaced by `whois` on request.
    pub async fn recent_commits(
        mm: &ModelManager,
        project_slug: &str,
        agent_name: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let prefix = format!("projects/{}/agents/{}/", project_slug, agent_name);
        git_store::recent_commit_subjects(&repo, &prefix, limit)
    }

    fn from_row(row: libsql::Row) -> Result<Agent> {
        let inception_ts_str: String = row.get(6)?;
        let inception_ts = NaiveDateTime::parse_from_str(&inception_ts_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default();
        let last_active_ts_str: String = row.get(7)?;
        let last_active_ts =
            NaiveDateTime::parse_from_str(&last_active_ts_str, "%Y-%m-%d %H:%M:%S")
                .unwrap_or_default();

        Ok(Agent {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            program: row.get(3)?,
            model: row.get(4)?,
            task_description: row.get(5)?,
            inception_ts,
            last_active_ts,
            attachments_policy: row.get(8)?,
            contact_policy: row.get(9)?,
            registration_token: row.get(10)?,
        })
    }
}
