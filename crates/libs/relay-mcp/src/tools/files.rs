//! File reservation tool implementations.

use relay_core::{
    ctx::Ctx,
    model::{ModelManager, file_reservation::FileReservationBmc},
};
use rmcp::{ErrorData as McpError, model::CallToolResult, model::Content};
use std::sync::Arc;

use super::helpers;
use super::{
    FileReservationPathsParams, ForceReleaseFileReservationParams, ListFileReservationsParams,
    ReleaseFileReservationsParams, RenewFileReservationsParams,
};
use crate::tools::errors::map_core_error;

const DEFAULT_TTL_SECONDS: i64 = 3600;

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Reserve path patterns. Grants always succeed; overlapping exclusive
/// holders are reported in `conflicts`.
pub async fn file_reservation_paths_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: FileReservationPathsParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let outcome = FileReservationBmc::reserve_paths(
        ctx,
        mm,
        project.id,
        agent.id,
        &params.paths,
        params.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
        params.exclusive.unwrap_or(true),
        params.reason.as_deref().unwrap_or(""),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&outcome)
}

/// Release the caller's reservations on the given patterns.
pub async fn release_file_reservations_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ReleaseFileReservationsParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let released = FileReservationBmc::release_paths(ctx, mm, project.id, agent.id, &params.paths)
        .await
        .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "released": released.len(),
        "reservations": released,
    }))
}

/// Extend the caller's reservations on the given patterns.
pub async fn renew_file_reservations_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: RenewFileReservationsParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let renewed = FileReservationBmc::renew_paths(
        ctx,
        mm,
        project.id,
        agent.id,
        &params.paths,
        params.extend_seconds.unwrap_or(DEFAULT_TTL_SECONDS),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "renewed": renewed.len(),
        "reservations": renewed,
    }))
}

/// Force-release a stale holder's reservation. Gated on holder
/// inactivity and sidecar quiescence.
pub async fn force_release_file_reservation_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ForceReleaseFileReservationParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let released =
        FileReservationBmc::force_release(ctx, mm, project.id, agent.id, params.reservation_id)
            .await
            .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "released": 1,
        "reservation": released,
    }))
}

/// List a project's reservations.
pub async fn list_file_reservations_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ListFileReservationsParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let reservations = if params.active_only.unwrap_or(true) {
        FileReservationBmc::list_active_for_project(ctx, mm, project.id).await
    } else {
        FileReservationBmc::list_all_for_project(ctx, mm, project.id).await
    }
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "project": project.slug,
        "count": reservations.len(),
        "reservations": reservations,
    }))
}
