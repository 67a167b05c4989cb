//! Messaging engine tests: send pipeline, inbox/outbox, read/ack
//! ordering, threads, search, dual-write reconciliation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_project_and_agent};
use relay_core::model::message::{
    InboxFilter, MessageBmc, RecipientKind, RecipientSpec, ResolvedRecipient, SendRequest,
};

fn to_self(
    project: &relay_core::model::project::Project,
    agent: &relay_core::model::agent::Agent,
) -> Vec<ResolvedRecipient> {
    vec![ResolvedRecipient {
        project: project.clone(),
        agent: agent.clone(),
        kind: RecipientKind::To,
    }]
}

fn send_request(
    project: &relay_core::model::project::Project,
    sender: &relay_core::model::agent::Agent,
    recipients: Vec<ResolvedRecipient>,
    subject: &str,
    body: &str,
) -> SendRequest {
    SendRequest {
        project: project.clone(),
        sender: sender.clone(),
        recipients,
        subject: subject.to_string(),
        body_md: body.to_string(),
        thread_id: None,
        topic: None,
        importance: None,
        ack_required: false,
        attachment_paths: Vec::new(),
        convert_images: false,
    }
}

#[tokio::test]
async fn test_basic_send_and_inbox() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "Test", "hello"),
    )
    .await
    .expect("send");

    assert_eq!(outcome.message.subject, "Test");
    assert_eq!(outcome.deliveries.len(), 1);
    assert_eq!(outcome.deliveries[0].project, "backend");

    let inbox = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        agent.id,
        &InboxFilter {
            limit: 10,
            include_bodies: true,
            ..Default::default()
        },
    )
    .await
    .expect("inbox");

    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message.subject, "Test");
    assert_eq!(inbox[0].message.body_md, "hello");
}

#[tokio::test]
async fn test_send_archive_commit_touches_all_paths() {
    let tc = TestContext::new().await.expect("test context");
    let (project, sender) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let receiver = relay_core::model::agent::AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("GreenCastle"),
        "codex",
        "gpt-5",
        "receiver",
        None,
        None,
    )
    .await
    .expect("register receiver");

    let recipients = vec![ResolvedRecipient {
        project: project.clone(),
        agent: receiver.clone(),
        kind: RecipientKind::To,
    }];
    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &sender, recipients, "Refactor plan", "body"),
    )
    .await
    .expect("send");

    // One commit covering canonical + outbox + inbox.
    let subjects = tc.commit_subjects();
    assert_eq!(
        subjects[0],
        format!("send #{}: Refactor plan", outcome.message.id)
    );

    let paths = tc.head_commit_paths();
    assert!(paths.iter().any(|p| p.contains("projects/backend/messages/")));
    assert!(paths.iter().any(|p| p.contains("agents/BlueLake/outbox/")));
    assert!(paths.iter().any(|p| p.contains("agents/GreenCastle/inbox/")));

    // Dual write completed: archived_ts set.
    assert!(outcome.message.archived_ts.is_some() || {
        let refreshed = MessageBmc::get(&tc.ctx, &tc.mm, outcome.message.id)
            .await
            .expect("get");
        refreshed.archived_ts.is_some()
    });
}

#[tokio::test]
async fn test_recipients_rows_and_kinds() {
    let tc = TestContext::new().await.expect("test context");
    let (project, sender) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let cc_agent = relay_core::model::agent::AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("JadePond"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register cc agent");

    let recipients = vec![
        ResolvedRecipient {
            project: project.clone(),
            agent: sender.clone(),
            kind: RecipientKind::To,
        },
        ResolvedRecipient {
            project: project.clone(),
            agent: cc_agent.clone(),
            kind: RecipientKind::Bcc,
        },
    ];
    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &sender, recipients, "Kinds", "x"),
    )
    .await
    .expect("send");

    let rows = MessageBmc::get_recipients(&tc.ctx, &tc.mm, outcome.message.id)
        .await
        .expect("recipients");
    assert_eq!(rows.len(), 2);
    // bcc is stored and visible in the core model.
    let bcc = rows.iter().find(|r| r.agent_name == "JadePond").unwrap();
    assert_eq!(bcc.kind, "bcc");
}

#[tokio::test]
async fn test_read_then_ack_ordering() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "Ack me", "x"),
    )
    .await
    .expect("send");
    let id = outcome.message.id;

    MessageBmc::mark_read(&tc.ctx, &tc.mm, id, agent.id)
        .await
        .expect("mark read");
    MessageBmc::acknowledge(&tc.ctx, &tc.mm, id, agent.id)
        .await
        .expect("acknowledge");

    let rows = MessageBmc::get_recipients(&tc.ctx, &tc.mm, id)
        .await
        .expect("recipients");
    let row = &rows[0];
    let read_ts = row.read_ts.expect("read_ts set");
    let ack_ts = row.ack_ts.expect("ack_ts set");
    assert!(read_ts <= ack_ts, "read_ts must not exceed ack_ts");
    assert!(read_ts >= outcome.message.created_ts);
}

#[tokio::test]
async fn test_ack_without_read_backfills_read() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "Direct ack", "x"),
    )
    .await
    .expect("send");

    MessageBmc::acknowledge(&tc.ctx, &tc.mm, outcome.message.id, agent.id)
        .await
        .expect("acknowledge");

    let rows = MessageBmc::get_recipients(&tc.ctx, &tc.mm, outcome.message.id)
        .await
        .expect("recipients");
    assert!(rows[0].read_ts.is_some(), "ack backfills read_ts");
    assert_eq!(rows[0].read_ts, rows[0].ack_ts);
}

#[tokio::test]
async fn test_inbox_filters() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    for (subject, importance, topic) in [
        ("plain", "normal", None),
        ("urgent thing", "urgent", None),
        ("topical", "normal", Some("deploys")),
    ] {
        let mut req = send_request(
            &project,
            &agent,
            to_self(&project, &agent),
            subject,
            "body",
        );
        req.importance = Some(importance.to_string());
        req.topic = topic.map(str::to_string);
        MessageBmc::send(&tc.ctx, &tc.mm, req).await.expect("send");
    }

    let urgent = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        agent.id,
        &InboxFilter {
            limit: 10,
            urgent_only: true,
            ..Default::default()
        },
    )
    .await
    .expect("urgent inbox");
    assert_eq!(urgent.len(), 1);
    assert_eq!(urgent[0].message.subject, "urgent thing");

    let topical = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        agent.id,
        &InboxFilter {
            limit: 10,
            topic: Some("deploys".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("topic inbox");
    assert_eq!(topical.len(), 1);
    assert_eq!(topical[0].message.subject, "topical");

    // Bodies excluded unless requested.
    assert!(topical[0].message.body_md.is_empty());

    let all = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        agent.id,
        &InboxFilter {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .expect("all inbox");
    assert_eq!(all.len(), 3);
    // Newest first.
    assert_eq!(all[0].message.subject, "topical");
}

#[tokio::test]
async fn test_outbox_lists_sent() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "Out", "x"),
    )
    .await
    .expect("send");

    let outbox = MessageBmc::list_outbox(&tc.ctx, &tc.mm, project.id, agent.id, 10, false)
        .await
        .expect("outbox");
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].subject, "Out");
}

#[tokio::test]
async fn test_thread_listing_and_singleton() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let mut req = send_request(
        &project,
        &agent,
        to_self(&project, &agent),
        "threaded",
        "first",
    );
    req.thread_id = Some("T-1".to_string());
    MessageBmc::send(&tc.ctx, &tc.mm, req).await.expect("send 1");

    let mut req = send_request(
        &project,
        &agent,
        to_self(&project, &agent),
        "threaded again",
        "second",
    );
    req.thread_id = Some("T-1".to_string());
    MessageBmc::send(&tc.ctx, &tc.mm, req).await.expect("send 2");

    let solo = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "solo", "alone"),
    )
    .await
    .expect("send solo");

    let thread = MessageBmc::list_by_thread(&tc.ctx, &tc.mm, project.id, "T-1")
        .await
        .expect("thread");
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].body_md, "first"); // oldest first

    // Absent thread_id behaves as singleton thread msg:<id>.
    let key = format!("msg:{}", solo.message.id);
    let singleton = MessageBmc::list_by_thread(&tc.ctx, &tc.mm, project.id, &key)
        .await
        .expect("singleton thread");
    assert_eq!(singleton.len(), 1);
    assert_eq!(singleton[0].id, solo.message.id);
}

#[tokio::test]
async fn test_search_fts_and_fallback() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(
            &project,
            &agent,
            to_self(&project, &agent),
            "Deploy checklist",
            "remember the full-text index",
        ),
    )
    .await
    .expect("send");

    let hits = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "checklist", 10)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    // Every hit satisfies case-insensitive substring match.
    assert!(hits[0].subject.to_lowercase().contains("checklist"));

    let hyphenated = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "full-text", 10)
        .await
        .expect("hyphen search");
    assert_eq!(hyphenated.len(), 1);

    let field = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "subject:deploy", 10)
        .await
        .expect("field search");
    assert_eq!(field.len(), 1);

    // Junk queries return empty, never error.
    for junk in ["*", "...", "\"unbalanced", ""] {
        let result = MessageBmc::search(&tc.ctx, &tc.mm, project.id, junk, 10)
            .await
            .expect("junk query must not error");
        assert!(result.len() <= 1);
    }

    let miss = MessageBmc::search(&tc.ctx, &tc.mm, project.id, "zebra", 10)
        .await
        .expect("miss");
    assert!(miss.is_empty());
}

#[tokio::test]
async fn test_archive_reconciliation_reemits() {
    let tc = TestContext::new().await.expect("test context");
    let (project, agent) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        send_request(&project, &agent, to_self(&project, &agent), "Recover me", "x"),
    )
    .await
    .expect("send");

    // Simulate the crash window: catalog row landed, archive flag lost.
    let db = tc.mm.db_for_test();
    let stmt = db
        .prepare("UPDATE messages SET archived_ts = NULL WHERE id = ?")
        .await
        .expect("prepare");
    stmt.execute([outcome.message.id]).await.expect("reset");

    let recovered = MessageBmc::reconcile_archive(&tc.ctx, &tc.mm, 10)
        .await
        .expect("reconcile");
    assert_eq!(recovered, 1);

    let refreshed = MessageBmc::get(&tc.ctx, &tc.mm, outcome.message.id)
        .await
        .expect("get");
    assert!(refreshed.archived_ts.is_some());
}

#[tokio::test]
async fn test_auto_register_recipient_setting() {
    let mut settings = relay_common::Settings::default();
    settings.messaging.auto_register_recipients = true;
    let tc = TestContext::new_with_settings(settings)
        .await
        .expect("test context");
    let (project, _sender) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let specs = vec![RecipientSpec {
        raw: "Stranger".to_string(),
        kind: RecipientKind::To,
    }];
    let resolved = MessageBmc::resolve_recipients(&tc.ctx, &tc.mm, &project, &specs)
        .await
        .expect("auto-register resolves");
    assert_eq!(resolved[0].agent.name, "Stranger");
    assert_eq!(resolved[0].agent.program, "unknown");
}

#[tokio::test]
async fn test_unknown_recipient_without_auto_register() {
    let tc = TestContext::new().await.expect("test context");
    let (project, _sender) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let specs = vec![RecipientSpec {
        raw: "Stranger".to_string(),
        kind: RecipientKind::To,
    }];
    let result = MessageBmc::resolve_recipients(&tc.ctx, &tc.mm, &project, &specs).await;
    assert!(matches!(
        result,
        Err(relay_core::Error::RecipientNotFound { .. })
    ));

    let specs = vec![RecipientSpec {
        raw: "Anyone@ghost-project".to_string(),
        kind: RecipientKind::To,
    }];
    let result = MessageBmc::resolve_recipients(&tc.ctx, &tc.mm, &project, &specs).await;
    assert!(matches!(
        result,
        Err(relay_core::Error::RecipientProjectNotFound(_))
    ));
}
