//! Reservation engine tests: advisory grants, conflict reporting,
//! release/renew, sweeps and the force-release staleness gates.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::{TestContext, setup_project_and_agent};
use relay_core::model::agent::AgentBmc;
use relay_core::model::file_reservation::FileReservationBmc;
use relay_core::model::message::{InboxFilter, MessageBmc};

async fn register(
    tc: &TestContext,
    project_id: i64,
    name: &str,
) -> relay_core::model::agent::Agent {
    AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project_id,
        Some(name),
        "codex",
        "gpt-5",
        "",
        None,
        None,
    )
    .await
    .expect("register agent")
}

#[tokio::test]
async fn test_exclusive_grant_then_advisory_conflict() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = register(&tc, project.id, "GreenCastle").await;

    let first = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        3600,
        true,
        "editing",
    )
    .await
    .expect("first grant");
    assert_eq!(first.granted.len(), 1);
    assert!(first.conflicts.is_empty());

    // Advisory: the second grant still succeeds, conflicts reported.
    let second = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        green.id,
        &["src/app.py".to_string()],
        3600,
        true,
        "also editing",
    )
    .await
    .expect("second grant");
    assert_eq!(second.granted.len(), 1);
    assert_eq!(second.conflicts.len(), 1);
    assert_eq!(second.conflicts[0].holders.len(), 1);
    assert_eq!(second.conflicts[0].holders[0].agent, "BlueLake");
    assert_eq!(second.conflicts[0].holders[0].pattern, "src/app.py");

    // Release BlueLake's reservation; only GreenCastle's stays active.
    let released = FileReservationBmc::release_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
    )
    .await
    .expect("release");
    assert_eq!(released.len(), 1);

    let active = FileReservationBmc::list_active_for_project(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].agent_id, green.id);
}

#[tokio::test]
async fn test_overlap_is_symmetric_between_glob_and_literal() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = register(&tc, project.id, "GreenCastle").await;

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/auth/*.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("glob grant");

    let literal_vs_glob = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        green.id,
        &["src/auth/login.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("literal grant");
    assert_eq!(literal_vs_glob.conflicts.len(), 1);

    // And the mirrored direction.
    let tc2 = TestContext::new().await.expect("test context 2");
    let (project2, blue2) = setup_project_and_agent(&tc2, "/backend", "BlueLake").await;
    let green2 = register(&tc2, project2.id, "GreenCastle").await;

    FileReservationBmc::reserve_paths(
        &tc2.ctx,
        &tc2.mm,
        project2.id,
        blue2.id,
        &["src/auth/login.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("literal grant");

    let glob_vs_literal = FileReservationBmc::reserve_paths(
        &tc2.ctx,
        &tc2.mm,
        project2.id,
        green2.id,
        &["src/auth/*.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("glob grant");
    assert_eq!(glob_vs_literal.conflicts.len(), 1);
}

#[tokio::test]
async fn test_own_reservations_never_conflict() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/**".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("grant");

    let again = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("second grant by same holder");
    assert!(again.conflicts.is_empty());
}

#[tokio::test]
async fn test_batch_grant_is_one_commit() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let before = tc.commit_subjects().len();
    let outcome = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &[
            "src/a.rs".to_string(),
            "src/b.rs".to_string(),
            "src/c.rs".to_string(),
        ],
        3600,
        true,
        "batch",
    )
    .await
    .expect("batch grant");
    assert_eq!(outcome.granted.len(), 3);

    let subjects = tc.commit_subjects();
    assert_eq!(
        subjects.len(),
        before + 1,
        "K grants must produce exactly one commit"
    );

    // The head commit stages exactly the granted sidecars.
    let paths = tc.head_commit_paths();
    assert_eq!(paths.len(), 3);
    for reservation in &outcome.granted {
        assert!(
            paths
                .iter()
                .any(|p| p.ends_with(&format!("file_reservations/{}.json", reservation.id)))
        );
    }
}

#[tokio::test]
async fn test_renew_extends_expiry() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    let granted = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        60,
        true,
        "",
    )
    .await
    .expect("grant")
    .granted;

    let renewed = FileReservationBmc::renew_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        7200,
    )
    .await
    .expect("renew");
    assert_eq!(renewed.len(), 1);
    assert!(
        renewed[0].expires_ts > granted[0].expires_ts,
        "renew must push expiry forward"
    );

    // Renewing by less than the remaining TTL keeps the max.
    let renewed_again = FileReservationBmc::renew_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        60,
    )
    .await
    .expect("renew small");
    assert_eq!(renewed_again[0].expires_ts, renewed[0].expires_ts);
}

#[tokio::test]
async fn test_sweep_releases_expired() {
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;

    FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        1,
        true,
        "",
    )
    .await
    .expect("short grant");

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    let swept = FileReservationBmc::sweep_expired(&tc.ctx, &tc.mm)
        .await
        .expect("sweep");
    assert_eq!(swept, 1);

    let active = FileReservationBmc::list_active_for_project(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active");
    assert!(active.is_empty());

    // History is never deleted.
    let all = FileReservationBmc::list_all_for_project(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("all");
    assert_eq!(all.len(), 1);
    assert!(all[0].released_ts.is_some());
}

#[tokio::test]
async fn test_force_release_requires_stale_holder() {
    let mut settings = relay_common::Settings::default();
    settings.reservations.activity_grace_seconds = 0;
    let tc = TestContext::new_with_settings(settings)
        .await
        .expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = register(&tc, project.id, "GreenLake").await;

    let reservation_id = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        3600,
        true,
        "long edit",
    )
    .await
    .expect("grant")
    .granted[0]
        .id;

    // Holder is fresh: not stale.
    let refused =
        FileReservationBmc::force_release(&tc.ctx, &tc.mm, project.id, green.id, reservation_id)
            .await;
    assert!(matches!(
        refused,
        Err(relay_core::Error::ReservationNotStale { .. })
    ));
    let active = FileReservationBmc::list_active_for_project(&tc.ctx, &tc.mm, project.id)
        .await
        .expect("active");
    assert_eq!(active.len(), 1, "refused force release keeps reservation");

    // Age the holder past the inactivity threshold.
    tc.age_agent_activity(blue.id, 3600).await.expect("age holder");

    let released =
        FileReservationBmc::force_release(&tc.ctx, &tc.mm, project.id, green.id, reservation_id)
            .await
            .expect("force release after aging");
    assert!(released.released_ts.is_some());

    // The original holder gets a system notification.
    let inbox = MessageBmc::fetch_inbox(
        &tc.ctx,
        &tc.mm,
        blue.id,
        &InboxFilter {
            limit: 10,
            include_bodies: true,
            ..Default::default()
        },
    )
    .await
    .expect("holder inbox");
    assert_eq!(inbox.len(), 1);
    assert!(
        inbox[0].message.subject.starts_with("Released stale lock"),
        "got subject: {}",
        inbox[0].message.subject
    );
}

#[tokio::test]
async fn test_force_release_blocked_by_sidecar_grace() {
    // Default grace (900s): the sidecar written at grant time is fresh,
    // so even an idle holder is protected.
    let tc = TestContext::new().await.expect("test context");
    let (project, blue) = setup_project_and_agent(&tc, "/backend", "BlueLake").await;
    let green = register(&tc, project.id, "GreenLake").await;

    let reservation_id = FileReservationBmc::reserve_paths(
        &tc.ctx,
        &tc.mm,
        project.id,
        blue.id,
        &["src/app.py".to_string()],
        3600,
        true,
        "",
    )
    .await
    .expect("grant")
    .granted[0]
        .id;

    tc.age_agent_activity(blue.id, 3600).await.expect("age holder");

    let refused =
        FileReservationBmc::force_release(&tc.ctx, &tc.mm, project.id, green.id, reservation_id)
            .await;
    assert!(matches!(
        refused,
        Err(relay_core::Error::ReservationNotStale { .. })
    ));
}
