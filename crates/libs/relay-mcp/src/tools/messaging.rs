//! Messaging tool implementations.

use relay_core::{
    ctx::Ctx,
    model::{
        ModelManager,
        message::{
            InboxFilter, MessageBmc, MessageForCreate, RecipientKind, RecipientSpec, SendRequest,
        },
        summary::SummaryBmc,
    },
};
use rmcp::{ErrorData as McpError, model::CallToolResult, model::Content};
use std::sync::Arc;

use super::helpers;
use super::{
    AcknowledgeMessageParams, FetchInboxParams, ListOutboxParams, MarkMessageReadParams,
    ReplyMessageParams, SearchMessagesParams, SendMessageParams, SummarizeThreadParams,
};
use crate::tools::errors::map_core_error;

fn json_result(value: &impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn specs(raw: &[String], kind: RecipientKind) -> Vec<RecipientSpec> {
    raw.iter()
        .map(|r| RecipientSpec {
            raw: r.clone(),
            kind,
        })
        .collect()
}

/// Send a message through the full pipeline: recipient resolution,
/// contact gate, reservation gate, dual write.
pub async fn send_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SendMessageParams,
) -> Result<CallToolResult, McpError> {
    let (project, sender) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.sender_name)
            .await?;

    let mut recipient_specs = specs(&params.to, RecipientKind::To);
    if let Some(cc) = &params.cc {
        recipient_specs.extend(specs(cc, RecipientKind::Cc));
    }
    if let Some(bcc) = &params.bcc {
        recipient_specs.extend(specs(bcc, RecipientKind::Bcc));
    }

    let recipients = MessageBmc::resolve_recipients(ctx, mm, &project, &recipient_specs)
        .await
        .map_err(map_core_error)?;

    let outcome = MessageBmc::send(
        ctx,
        mm,
        SendRequest {
            project,
            sender,
            recipients,
            subject: params.subject,
            body_md: params.body_md,
            thread_id: params.thread_id,
            topic: params.topic,
            importance: params.importance,
            ack_required: params.ack_required.unwrap_or(false),
            attachment_paths: params.attachment_paths.unwrap_or_default(),
            convert_images: params.convert_images.unwrap_or(true),
        },
    )
    .await
    .map_err(map_core_error)?;

    let deliveries: Vec<serde_json::Value> = outcome
        .deliveries
        .iter()
        .map(|d| {
            serde_json::json!({
                "project": d.project,
                "agents": d.agents,
                "payload": {
                    "id": outcome.message.id,
                    "subject": outcome.message.subject,
                    "thread_id": outcome.message.thread_key(),
                    "importance": outcome.message.importance,
                },
            })
        })
        .collect();

    json_result(&serde_json::json!({ "deliveries": deliveries }))
}

/// Reply within the original thread; defaults to answering the sender.
pub async fn reply_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ReplyMessageParams,
) -> Result<CallToolResult, McpError> {
    let (project, sender) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.sender_name)
            .await?;

    let original = MessageBmc::get(ctx, mm, params.message_id)
        .await
        .map_err(map_core_error)?;

    let subject = if original.subject.starts_with("Re: ") {
        original.subject.clone()
    } else {
        format!("Re: {}", original.subject)
    };
    // Singleton threads materialize on first reply.
    let thread_id = original
        .thread_id
        .clone()
        .unwrap_or_else(|| original.thread_key());

    if params.to.is_some() || params.cc.is_some() || params.bcc.is_some() {
        // Explicit recipients go through the full send pipeline.
        let mut recipient_specs = specs(&params.to.unwrap_or_default(), RecipientKind::To);
        if let Some(cc) = &params.cc {
            recipient_specs.extend(specs(cc, RecipientKind::Cc));
        }
        if let Some(bcc) = &params.bcc {
            recipient_specs.extend(specs(bcc, RecipientKind::Bcc));
        }
        let recipients = MessageBmc::resolve_recipients(ctx, mm, &project, &recipient_specs)
            .await
            .map_err(map_core_error)?;
        let outcome = MessageBmc::send(
            ctx,
            mm,
            SendRequest {
                project,
                sender,
                recipients,
                subject: subject.clone(),
                body_md: params.body_md,
                thread_id: Some(thread_id),
                topic: original.topic,
                importance: Some(original.importance),
                ack_required: false,
                attachment_paths: Vec::new(),
                convert_images: true,
            },
        )
        .await
        .map_err(map_core_error)?;
        return json_result(&serde_json::json!({
            "id": outcome.message.id,
            "subject": subject,
            "thread_id": outcome.message.thread_id,
        }));
    }

    let msg_id = MessageBmc::create(
        ctx,
        mm,
        MessageForCreate {
            project_id: project.id,
            sender_id: sender.id,
            recipient_ids: vec![original.sender_id],
            cc_ids: None,
            bcc_ids: None,
            subject: subject.clone(),
            body_md: params.body_md,
            thread_id: Some(thread_id.clone()),
            topic: original.topic,
            importance: Some(original.importance),
            ack_required: false,
            attachments: Vec::new(),
        },
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "id": msg_id,
        "subject": subject,
        "thread_id": thread_id,
    }))
}

/// List an agent's inbox, newest first.
pub async fn fetch_inbox_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: FetchInboxParams,
) -> Result<CallToolResult, McpError> {
    let (_project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let filter = InboxFilter {
        limit: params.limit.unwrap_or(50),
        include_bodies: params.include_bodies.unwrap_or(false),
        urgent_only: params.urgent_only.unwrap_or(false),
        since_ts: helpers::parse_ts_param(params.since_ts.as_deref(), "since_ts")?,
        topic: params.topic,
        thread_id: params.thread_id,
    };

    let items = MessageBmc::fetch_inbox(ctx, mm, agent.id, &filter)
        .await
        .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "agent": agent.name,
        "count": items.len(),
        "messages": items,
    }))
}

/// List messages sent by an agent, newest first.
pub async fn list_outbox_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: ListOutboxParams,
) -> Result<CallToolResult, McpError> {
    let (project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    let messages = MessageBmc::list_outbox(
        ctx,
        mm,
        project.id,
        agent.id,
        params.limit.unwrap_or(50),
        params.include_bodies.unwrap_or(false),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "agent": agent.name,
        "count": messages.len(),
        "messages": messages,
    }))
}

/// Mark a message as read.
pub async fn mark_message_read_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: MarkMessageReadParams,
) -> Result<CallToolResult, McpError> {
    let (_project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    MessageBmc::mark_read(ctx, mm, params.message_id, agent.id)
        .await
        .map_err(map_core_error)?;

    let msg = format!(
        "Message {} marked as read by '{}'",
        params.message_id, params.agent_name
    );
    Ok(CallToolResult::success(vec![Content::text(msg)]))
}

/// Acknowledge a message requiring acknowledgment.
pub async fn acknowledge_message_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: AcknowledgeMessageParams,
) -> Result<CallToolResult, McpError> {
    let (_project, agent) =
        helpers::resolve_project_and_agent(ctx, mm, &params.project_key, &params.agent_name)
            .await?;

    MessageBmc::acknowledge(ctx, mm, params.message_id, agent.id)
        .await
        .map_err(map_core_error)?;

    let msg = format!(
        "Message {} acknowledged by '{}'",
        params.message_id, params.agent_name
    );
    Ok(CallToolResult::success(vec![Content::text(msg)]))
}

/// Full-text search with ranked-or-recent ordering.
pub async fn search_messages_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SearchMessagesParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let messages = MessageBmc::search(
        ctx,
        mm,
        project.id,
        &params.query,
        params.limit.unwrap_or(20),
    )
    .await
    .map_err(map_core_error)?;

    json_result(&serde_json::json!({
        "query": params.query,
        "count": messages.len(),
        "messages": messages,
    }))
}

/// Structured thread summary (participants, span, action items).
pub async fn summarize_thread_impl(
    ctx: &Ctx,
    mm: &Arc<ModelManager>,
    params: SummarizeThreadParams,
) -> Result<CallToolResult, McpError> {
    let project = helpers::resolve_project(ctx, mm, &params.project_key).await?;

    let summary = SummaryBmc::summarize_thread(ctx, mm, project.id, &params.thread_id)
        .await
        .map_err(map_core_error)?;

    json_result(&summary)
}
