//! Common helper functions for tool handlers.

use relay_core::{
    ctx::Ctx,
    model::{
        ModelManager,
        agent::{Agent, AgentBmc},
        project::{Project, ProjectBmc},
    },
    utils::validation::{validate_agent_name, validate_project_key},
};
use rmcp::ErrorData as McpError;
use std::sync::Arc;

use crate::tools::errors::{ErrorCode, map_core_error, mcp_err};

/// Resolve a project by slug, human key, or raw path.
pub async fn resolve_project(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project_key: &str,
) -> Result<Project, McpError> {
    if let Err(e) = validate_project_key(project_key) {
        return Err(mcp_err!(
            ErrorCode::InvalidArgument,
            &e.to_string(),
            { "project_key": project_key }
        ));
    }

    ProjectBmc::get_by_identifier(ctx, mm, project_key)
        .await
        .map_err(|_| {
            mcp_err!(
                ErrorCode::ProjectNotFound,
                &format!("Project '{}' not found", project_key),
                {
                    "project_key": project_key,
                    "suggestion": "Check project exists with list_projects or create with ensure_project"
                }
            )
        })
}

/// Resolve an agent by name within a project, touching its activity
/// timestamp: a resolved caller counts as an active caller.
pub async fn resolve_agent(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project_id: i64,
    agent_name: &str,
) -> Result<Agent, McpError> {
    if let Err(e) = validate_agent_name(agent_name) {
        return Err(mcp_err!(
            ErrorCode::InvalidArgument,
            &e.to_string(),
            { "agent_name": agent_name }
        ));
    }

    let agent = AgentBmc::get_by_name(ctx, mm, project_id, agent_name)
        .await
        .map_err(map_core_error)?;
    AgentBmc::touch_last_active(ctx, mm, agent.id)
        .await
        .map_err(map_core_error)?;
    Ok(agent)
}

/// Resolve project and agent in one call.
pub async fn resolve_project_and_agent(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    project_key: &str,
    agent_name: &str,
) -> Result<(Project, Agent), McpError> {
    let project = resolve_project(ctx, mm, project_key).await?;
    let agent = resolve_agent(ctx, mm, project.id, agent_name).await?;
    Ok((project, agent))
}

/// Resolve a `Name@project` / `project:slug#Name` reference to a
/// concrete (project, agent) pair. Used by the contact tools, where the
/// counterparty always lives in another project.
pub async fn resolve_qualified_agent(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    default_project: &Project,
    reference: &str,
) -> Result<(Project, Agent), McpError> {
    let (project_ref, name) =
        relay_core::model::message::MessageBmc::parse_recipient(reference);
    if name.is_empty() {
        return Err(mcp_err!(
            ErrorCode::InvalidArgument,
            &format!("'{}' names no agent", reference)
        ));
    }

    let project = match project_ref {
        None => default_project.clone(),
        Some(reference) => ProjectBmc::get_by_identifier(ctx, mm, &reference)
            .await
            .map_err(|_| {
                mcp_err!(
                    ErrorCode::RecipientProjectNotFound,
                    &format!("Project '{}' not found", reference)
                )
            })?,
    };

    let agent = AgentBmc::get_by_name(ctx, mm, project.id, &name)
        .await
        .map_err(map_core_error)?;
    Ok((project, agent))
}

/// Parse an optional `YYYY-MM-DD HH:MM:SS` timestamp parameter.
pub fn parse_ts_param(
    value: Option<&str>,
    field: &str,
) -> Result<Option<chrono::NaiveDateTime>, McpError> {
    match value {
        None => Ok(None),
        Some(raw) => chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .map(Some)
            .map_err(|_| {
                mcp_err!(
                    ErrorCode::InvalidArgument,
                    &format!("{} must be formatted YYYY-MM-DD HH:MM:SS", field),
                    { "provided": raw }
                )
            }),
    }
}
