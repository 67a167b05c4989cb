//! Product grouping tool implementations.

use relay_core::{
    ctx::Ctx,
    model::{ModelManager, product::ProductBmc},
};
use rmcp::{ErrorData as McpError, model::CallToolResult, model::Content};
use std::sync::Arc;

use super::helpers;
use super::{
    CreateProductParams, LinkProjectToProductParams, ProductInboxParams, ProductSearchParams,
};
use crate::tools::errors::map_core_error;

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

pub async fn create_product_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: CreateProductParams,
) -> Result<CallToolResult, McpError> {
    let product = ProductBmc::create(ctx, mm, &params.name)
        .await
        .map_err(map_core_error)?;
    json_result(&product)
}

pub async fn link_project_to_product_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: LinkProjectToProductParams,
) -> Result<CallToolResult, McpError> {
    let product = ProductBmc::get_by_identifier(ctx, mm, &params.product)
        .await
        .map_err(map_core_error)?;
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    ProductBmc::link_project(ctx, mm, product.id, project.id)
        .await
        .map_err(map_core_error)?;

    let msg = format!("Linked project '{}' into product '{}'", project.slug, product.name);
    Ok(CallToolResult::success(vec![Content::text(msg)]))
}

/// Product-wide inbox for one agent name across linked projects.
pub async fn product_inbox_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ProductInboxParams,
) -> Result<CallToolResult, McpError> {
    let product = ProductBmc::get_by_identifier(ctx, mm, &params.product)
        .await
        .map_err(map_core_error)?;

    let messages = ProductBmc::product_inbox(
        ctx,
        mm,
        product.id,
        &params.agent_name,
        params.limit.unwrap_or(50),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "product": product.name,
        "count": messages.len(),
        "messages": messages,
    }))
}

/// Product-wide search across linked projects.
pub async fn product_search_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ProductSearchParams,
) -> Result<CallToolResult, McpError> {
    let product = ProductBmc::get_by_identifier(ctx, mm, &params.product)
        .await
        .map_err(map_core_error)?;

    let messages = ProductBmc::product_search(
        ctx,
        mm,
        product.id,
        &params.query,
        params.limit.unwrap_or(20),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "product": product.name,
        "count": messages.len(),
        "messages": messages,
    }))
}
