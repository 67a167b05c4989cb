//! Thread summarization.
//!
//! Aggregates a thread into a structured bundle: participants, counts,
//! first/last timestamps, extracted action items and key points. LLM
//! refinement is a pluggable step that consumes the same bundle; the
//! core never makes the call itself.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::message::MessageBmc;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Structured summary bundle for one thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub participants: Vec<String>,
    pub message_count: usize,
    pub first_ts: Option<NaiveDateTime>,
    pub last_ts: Option<NaiveDateTime>,
    pub action_items: Vec<String>,
    pub key_points: Vec<String>,
}

/// Pluggable refinement seam. Implementations may call an LLM with the
/// structured bundle and return prose; the default does nothing.
pub trait LlmRefiner: Send + Sync {
    fn refine(&self, summary: &ThreadSummary) -> Result<Option<String>>;
}

/// Default refiner: no external call, no refinement.
pub struct NoopRefiner;

impl LlmRefiner for NoopRefiner {
    fn refine(&self, _summary: &ThreadSummary) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Max key points extracted from a thread.
const KEY_POINT_LIMIT: usize = 8;

pub struct SummaryBmc;

impl SummaryBmc {
    /// Summarize a thread. `thread_key` may be an explicit thread id or
    /// the singleton form `msg:<id>`.
    pub async fn summarize_thread(
        ctx: &Ctx,
        mm: &ModelManager,
        project_id: i64,
        thread_key: &str,
    ) -> Result<ThreadSummary> {
        let messages = MessageBmc::list_by_thread(ctx, mm, project_id, thread_key).await?;

        let mut participants: Vec<String> = Vec::new();
        for message in &messages {
            if !participants.contains(&message.sender_name) {
                participants.push(message.sender_name.clone());
            }
            for recipient in MessageBmc::get_recipients(ctx, mm, message.id).await? {
                if !participants.contains(&recipient.agent_name) {
                    participants.push(recipient.agent_name);
                }
            }
        }

        let mut action_items = Vec::new();
        let mut key_points = Vec::new();
        for message in &messages {
            action_items.extend(extract_action_items(&message.body_md));
            for point in extract_key_points(&message.body_md) {
                if key_points.len() < KEY_POINT_LIMIT && !key_points.contains(&point) {
                    key_points.push(point);
                }
            }
        }

        Ok(ThreadSummary {
            thread_id: thread_key.to_string(),
            participants,
            message_count: messages.len(),
            first_ts: messages.first().map(|m| m.created_ts),
            last_ts: messages.last().map(|m| m.created_ts),
            action_items,
            key_points,
        })
    }
}

/// Lines that read as open work: `- [ ]` checkboxes, `- ACTION:` and
/// `TODO:` markers.
pub fn extract_action_items(body_md: &str) -> Vec<String> {
    body_md
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("- [ ]") || line.starts_with("- ACTION:") || line.contains("TODO:")
        })
        .map(str::to_string)
        .collect()
}

/// Headings first; failing that, the leading sentence of the body.
pub fn extract_key_points(body_md: &str) -> Vec<String> {
    let headings: Vec<String> = body_md
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !headings.is_empty() {
        return headings;
    }

    body_md
        .split(['.', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| vec![s.to_string()])
        .unwrap_or_default()
}
