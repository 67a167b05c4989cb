//! Contact link tool implementations.

use relay_core::{
    ctx::Ctx,
    model::{ModelManager, agent::AgentBmc, agent_link::AgentLinkBmc},
};
use rmcp::{ErrorData as McpError, model::CallToolResult, model::Content};
use std::sync::Arc;

use super::helpers;
use super::{ListContactsParams, RequestContactParams, RespondContactParams, SetContactPolicyParams};
use crate::tools::errors::map_core_error;

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Open (or return) a pending contact request toward another agent.
pub async fn request_contact_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RequestContactParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let (target_project, target_agent) =
        helpers::resolve_qualified_agent(ctx, mm, &project, &params.to).await?;

    let link_id = AgentLinkBmc::request_contact(
        ctx,
        mm,
        project.id,
        agent.id,
        target_project.id,
        target_agent.id,
        params.reason.as_deref().unwrap_or(""),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "link_id": link_id,
        "status": "pending",
        "from": format!("{}@{}", agent.name, project.slug),
        "to": format!("{}@{}", target_agent.name, target_project.slug),
    }))
}

/// Accept or refuse a pending request targeting the calling agent.
pub async fn respond_contact_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RespondContactParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;
    let (from_project, from_agent) =
        helpers::resolve_qualified_agent(ctx, mm, &project, &params.from).await?;

    let link = AgentLinkBmc::respond_contact(
        ctx,
        mm,
        from_project.id,
        from_agent.id,
        project.id,
        agent.id,
        params.accept,
        params.ttl_seconds,
    )
    .await
    .map_err(map_core_error)?;

    json_result(&link)
}

/// Outbound approved links with expiry.
pub async fn list_contacts_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ListContactsParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let contacts = AgentLinkBmc::list_contacts(ctx, mm, project.id, agent.id)
        .await
        .map_err(map_core_error)?;
    let pending = AgentLinkBmc::list_pending_requests(ctx, mm, project.id, agent.id)
        .await
        .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "agent": agent.name,
        "approved": contacts,
        "pending_incoming": pending,
    }))
}

/// Update an agent's contact acceptance policy.
pub async fn set_contact_policy_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SetContactPolicyParams,
) -> Result<CallToolResult, McpError> {
    let (_project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    AgentBmc::set_contact_policy(ctx, mm, agent.id, &params.policy)
        .await
        .map_err(map_core_error)?;

    let msg = format!(
        "Contact policy for '{}' set to '{}'",
        params.agent_name, params.policy
    );
    Ok(CallToolResult::success(vec![Content::text(msg)]))
}
