//! Reservation send-gate tests: exclusive reservations over archive
//! surfaces block other agents' sends until release or expiry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_project_and_agent};
use relay_core::model::agent::AgentBmc;
use relay_core::model::file_reservation::FileReservationBmc;
use relay_core::model::message::{
    MessageBmc, RecipientKind, ResolvedRecipient, SendRequest,
};

fn self_send(
    project: &relay_core::model::project::Project,
    agent: &relay_core::model::agent::Agent,
    subject: &str,
) -> SendRequest {
    SendRequest {
        project: project.clone(),
        sender: agent.clone(),
        recipients: vec![ResolvedRecipient {
            project: project.clone(),
            agent: agent.clone(),
            kind: RecipientKind::To,
        }],
        subject: subject.to_string(),
        body_md: "hi".to_string(),
        thread_id: None,
        topic: None,
        importance: None,
        ack_required: false,
        attachment_paths: Vec::new(),
        convert_images: false,
    }
}

#[tokio::test]
async fn test_inbox_reservation_blocks_send() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("GreenCastle"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register GreenCastle");

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["agents/GreenCastle/inbox/*/*/*.md".to_string()],
        1800,
        true,
        "inbox maintenance",
    )
    .await
    .expect("reserve inbox surface");

    let blocked = MessageBmc::send(&tc.ctx, &tc.mm, self_send(&project, &green, "Blocked")).await;

    match blocked {
        Err(relay_core::Error::ReservationConflict { conflicts }) => {
            assert!(!conflicts.is_empty());
            let holders: Vec<&str> = conflicts
                .iter()
                .flat_map(|c| c.holders.iter().map(|h| h.agent.as_str()))
                .collect();
            assert!(holders.contains(&"BlueLake"));
            let patterns: Vec<&str> = conflicts
                .iter()
                .flat_map(|c| c.holders.iter().map(|h| h.pattern.as_str()))
                .collect();
            assert!(patterns.contains(&"agents/GreenCastle/inbox/*/*/*.md"));
        }
        other => panic!("expected ReservationConflict, got {:?}", other.err()),
    }

    // The failed send wrote nothing.
    let inbox = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        green.id,
        &relay_core::model::message::InboxFilter {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .expect("inbox");
    assert!(inbox.is_empty());
}

#[tokio::test]
async fn test_sender_own_reservation_does_not_block() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["agents/BlueLake/inbox/**".to_string()],
        1800,
        true,
        "",
    )
    .await
    .expect("reserve own inbox");

    let outcome = MessageBmc::send(&tc.ctx, &tc.mm, self_send(&project, &blue, "SelfOk"))
        .await
        .expect("own reservation never blocks the holder");
    assert_eq!(outcome.message.subject, "SelfOk");
}

#[tokio::test]
async fn test_ttl_expiry_unblocks_send() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("GreenCastle"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register GreenCastle");

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["agents/GreenCastle/inbox/*/*/*.md".to_string()],
        1,
        true,
        "short hold",
    )
    .await
    .expect("short reservation");

    let blocked = MessageBmc::send(&tc.ctx, &tc.mm, self_send(&project, &green, "TooSoon")).await;
    assert!(matches!(
        blocked,
        Err(relay_core::Error::ReservationConflict { .. })
    ));

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    let outcome = MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        self_send(&project, &green, "AllowedAfterTTL"),
    )
    .await
    .expect("send succeeds after TTL expiry");
    assert_eq!(outcome.message.subject, "AllowedAfterTTL");
}

#[tokio::test]
async fn test_non_exclusive_reservation_does_not_gate() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("GreenCastle"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register GreenCastle");

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["agents/GreenCastle/inbox/**".to_string()],
        1800,
        false,
        "shared watch",
    )
    .await
    .expect("shared reservation");

    MessageBmc::send(&tc.ctx, &tc.mm, self_send(&project, &green, "SharedOk"))
        .await
        .expect("non-exclusive reservations never gate sends");
}

#[tokio::test]
async fn test_enforcement_disabled_lets_send_through() {
    let mut settings = relay_common::Settings::default();
    settings.reservations.enforcement_enabled = false;
    let tc = TestContext::new_with_settings(settings)
        .await
        .expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some("GreenCastle"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register GreenCastle");

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["agents/GreenCastle/inbox/**".to_string()],
        1800,
        true,
        "",
    )
    .await
    .expect("reserve");

    MessageBmc::send(&tc.ctx, &tc.mm, self_send(&project, &green, "Unenforced"))
        .await
        .expect("enforcement off: conflicts are advisory only");
}
