//! Project and identity tool implementations.

use relay_core::{
    ctx::Ctx,
    model::{
        ModelManager,
        agent::AgentBmc,
        project::ProjectBmc,
        window_identity::WindowIdentityBmc,
    },
};
use rmcp::{ErrorData as McpError, model::CallToolResult, model::Content};
use std::sync::Arc;

use super::helpers;
use super::{
    BindWindowIdentityParams, CreateAgentIdentityParams, EnsureProjectParams, RegisterAgentParams,
    WhoisParams,
};
use crate::tools::errors::map_core_error;

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Ensure a project exists for the given human key. Idempotent.
pub async fn ensure_project_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: EnsureProjectParams,
) -> Result<CallToolResult, McpError> {
    let project = ProjectBmc::ensure(ctx, mm, &params.human_key)
        .await
        .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "id": project.id,
        "slug": project.slug,
        "human_key": project.human_key,
    }))
}

/// Register an agent (idempotent on name; profile fields refresh).
pub async fn register_agent_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RegisterAgentParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let agent = AgentBmc::register(
        ctx,
        mm,
        project.id,
        params.name.as_deref(),
        &params.program,
        &params.model,
        params.task_description.as_deref().unwrap_or(""),
        params.attachments_policy.as_deref(),
        params.contact_policy.as_deref(),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "id": agent.id,
        "name": agent.name,
        "project": project.slug,
        "program": agent.program,
        "model": agent.model,
        "registration_token": agent.registration_token,
    }))
}

/// Mint a fresh memorable identity; any name hint only seeds the
/// generated form via the coerce path.
pub async fn create_agent_identity_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: CreateAgentIdentityParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let agent = AgentBmc::register(
        ctx,
        mm,
        project.id,
        params.name_hint.as_deref(),
        &params.program,
        &params.model,
        params.task_description.as_deref().unwrap_or(""),
        None,
        None,
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "id": agent.id,
        "name": agent.name,
        "project": project.slug,
    }))
}

/// Agent profile with message counts and, on request, recent archive
/// commit subjects.
pub async fn whois_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: WhoisParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let sent = AgentBmc::count_messages_sent(ctx, mm, agent.id)
        .await
        .map_err(map_core_error)?;
    let received = AgentBmc::count_messages_received(ctx, mm, agent.id)
        .await
        .map_err(map_core_error)?;

    let recent_commits = if params.include_recent_commits.unwrap_or(false) {
        AgentBmc::recent_commits(mm, &project.slug, &agent.name, 10)
            .await
            .map_err(map_core_error)?
    } else {
        Vec::new()
    };

    json_result(&serde_json::json!({
        "name": agent.name,
        "project": project.slug,
        "program": agent.program,
        "model": agent.model,
        "task_description": agent.task_description,
        "attachments_policy": agent.attachments_policy,
        "contact_policy": agent.contact_policy,
        "inception_ts": agent.inception_ts,
        "last_active_ts": agent.last_active_ts,
        "messages_sent": sent,
        "messages_received": received,
        "recent_commits": recent_commits,
    }))
}

/// Bind the calling terminal window to a persistent display name.
pub async fn bind_window_identity_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: BindWindowIdentityParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let identity = WindowIdentityBmc::bind(
        ctx,
        mm,
        project.id,
        &params.window_uuid,
        &params.display_name,
    )
    .await
    .map_err(map_core_error)?;

    json_result(&identity)
}
