//! Contact engine tests: gating, handshake, expiry, revocation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_project_and_agent};
use relay_core::model::agent::AgentBmc;
use relay_core::model::agent_link::AgentLinkBmc;
use relay_core::model::message::{
    InboxFilter, MessageBmc, RecipientKind, ResolvedRecipient, SendRequest,
};

fn cross_send(
    sender_project: &relay_core::model::project::Project,
    sender: &relay_core::model::agent::Agent,
    target_project: &relay_core::model::project::Project,
    target: &relay_core::model::agent::Agent,
    subject: &str,
) -> SendRequest {
    SendRequest {
        project: sender_project.clone(),
        sender: sender.clone(),
        recipients: vec![ResolvedRecipient {
            project: target_project.clone(),
            agent: target.clone(),
            kind: RecipientKind::To,
        }],
        subject: subject.to_string(),
        body_md: "x".to_string(),
        thread_id: None,
        topic: None,
        importance: None,
        ack_required: false,
        attachment_paths: Vec::new(),
        convert_images: false,
    }
}

#[tokio::test]
async fn test_cross_project_contact_flow() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let bear = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("PurpleBear"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("contacts_only"),
    )
    .await
    .expect("register PurpleBear");

    // No link yet: contact required.
    let gated =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &bear, "Cross")).await;
    assert!(matches!(
        gated,
        Err(relay_core::Error::ContactRequired { .. })
    ));

    // Request + approve, then the send goes through.
    AgentLinkBmc::request_contact(&tc.ctx, &tc.mm, alpha.id, blue.id, beta.id, bear.id, "pairing")
        .await
        .expect("request contact");

    let pending = AgentLinkBmc::list_pending_requests(&tc.ctx, &tc.mm, beta.id, bear.id)
        .await
        .expect("pending list");
    assert_eq!(pending.len(), 1);

    let link = AgentLinkBmc::respond_contact(
        &tc.ctx,
        &tc.mm,
        alpha.id,
        blue.id,
        beta.id,
        bear.id,
        true,
        Some(3600),
    )
    .await
    .expect("approve");
    assert_eq!(link.status, "approved");
    assert!(link.expires_ts.is_some());

    let outcome =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &bear, "Cross"))
            .await
            .expect("send after approval");
    assert_eq!(outcome.deliveries[0].project, "beta");

    let inbox = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        bear.id,
        &InboxFilter {
            limit: 10,
            ..Default::default()
        },
    )
    .await
    .expect("inbox query");
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].message.subject, "Cross");

    // The inbox copy landed in the recipient's own project tree.
    let subjects = tc.commit_subjects();
    assert!(subjects.iter().any(|s| s.starts_with("send #")));
    let paths = tc.head_commit_paths();
    assert!(
        paths
            .iter()
            .any(|p| p.starts_with("projects/beta/agents/PurpleBear/inbox/"))
    );
}

#[tokio::test]
async fn test_denied_contact_still_required() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let jade = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("JadePond"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("contacts_only"),
    )
    .await
    .expect("register JadePond");

    AgentLinkBmc::request_contact(&tc.ctx, &tc.mm, alpha.id, blue.id, beta.id, jade.id, "")
        .await
        .expect("request");
    AgentLinkBmc::respond_contact(
        &tc.ctx,
        &tc.mm,
        alpha.id,
        blue.id,
        beta.id,
        jade.id,
        false,
        None,
    )
    .await
    .expect("deny");

    let gated =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &jade, "Nope")).await;
    assert!(matches!(
        gated,
        Err(relay_core::Error::ContactRequired { .. })
    ));
}

#[tokio::test]
async fn test_open_policy_bypasses_gate() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let open_agent = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("OpenDoor"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("open"),
    )
    .await
    .expect("register open agent");

    MessageBmc::send(
        &tc.ctx,
        &tc.mm,
        cross_send(&alpha, &blue, &beta, &open_agent, "Walk right in"),
    )
    .await
    .expect("open policy allows cross-project sends without a link");
}

#[tokio::test]
async fn test_auto_handshake_opens_pending_link() {
    let mut settings = relay_common::Settings::default();
    settings.messaging.auto_handshake_on_block = true;
    let tc = TestContext::new_with_settings(settings)
        .await
        .expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let bear = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("PurpleBear"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("contacts_only"),
    )
    .await
    .expect("register");

    let result =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &bear, "Hi")).await;
    let link_id = match result {
        Err(relay_core::Error::ContactPending { link_id, .. }) => link_id,
        other => panic!("expected ContactPending, got {:?}", other.err()),
    };

    let link = AgentLinkBmc::get(&tc.ctx, &tc.mm, link_id)
        .await
        .expect("link exists");
    assert_eq!(link.status, "pending");
}

#[tokio::test]
async fn test_expired_link_blocks_again() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let bear = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("PurpleBear"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("contacts_only"),
    )
    .await
    .expect("register");

    AgentLinkBmc::request_contact(&tc.ctx, &tc.mm, alpha.id, blue.id, beta.id, bear.id, "")
        .await
        .expect("request");
    let link = AgentLinkBmc::respond_contact(
        &tc.ctx,
        &tc.mm,
        alpha.id,
        blue.id,
        beta.id,
        bear.id,
        true,
        Some(3600),
    )
    .await
    .expect("approve");

    // Backdate the expiry.
    let past = (chrono::Utc::now().naive_utc() - chrono::Duration::seconds(10))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let db = tc.mm.db_for_test();
    let stmt = db
        .prepare("UPDATE agent_links SET expires_ts = ? WHERE id = ?")
        .await
        .expect("prepare");
    stmt.execute((past, link.id)).await.expect("expire link");

    let gated =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &bear, "Late")).await;
    assert!(matches!(
        gated,
        Err(relay_core::Error::ContactRequired { .. })
    ));
}

#[tokio::test]
async fn test_contact_request_notifies_target() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let bear = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("PurpleBear"),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register");

    AgentLinkBmc::request_contact(&tc.ctx, &tc.mm, alpha.id, blue.id, beta.id, bear.id, "hello")
        .await
        .expect("request");

    let inbox = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        bear.id,
        &InboxFilter {
            limit: 10,
            include_bodies: true,
            ..Default::default()
        },
    )
    .await
    .expect("target inbox");
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].message.subject.starts_with("Contact request from"));
}

#[tokio::test]
async fn test_revoke_blocks_future_sends() {
    let tc = TestContext::new().await.expect("test context");
    let (alpha, blue) = setup_project_and_agent(&tc, "/alpha", "BlueLake").await;
    let (beta, _) = setup_project_and_agent(&tc, "/beta", "PlaceHolder").await;
    let bear = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        beta.id,
        Some("PurpleBear"),
        "codex",
        "gpt-5",
        "",
        None,
        Some("contacts_only"),
    )
    .await
    .expect("register");

    AgentLinkBmc::request_contact(&tc.ctx, &tc.mm, alpha.id, blue.id, beta.id, bear.id, "")
        .await
        .expect("request");
    let link = AgentLinkBmc::respond_contact(
        &tc.ctx,
        &tc.mm,
        alpha.id,
        blue.id,
        beta.id,
        bear.id,
        true,
        Some(3600),
    )
    .await
    .expect("approve");

    AgentLinkBmc::revoke(&tc.ctx, &tc.mm, link.id)
        .await
        .expect("revoke");

    let gated =
        MessageBmc::send(&tc.ctx, &tc.mm, cross_send(&alpha, &blue, &beta, &bear, "After")).await;
    assert!(matches!(
        gated,
        Err(relay_core::Error::ContactRequired { .. })
    ));

    // History retained.
    let link = AgentLinkBmc::get(&tc.ctx, &tc.mm, link.id)
        .await
        .expect("link still present");
    assert_eq!(link.status, "blocked");
}
