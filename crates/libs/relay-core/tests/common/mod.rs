//! Common test utilities and fixtures.
//!
//! Each test gets an isolated database file and archive repository in
//! its own temp dir; cleanup is TempDir RAII.

#![allow(dead_code)]

use relay_common::Settings;
use relay_core::store::git_store;
use relay_core::{Ctx, ModelManager, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Global counter for unique database names
static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestContext {
    pub mm: ModelManager,
    pub ctx: Ctx,
    #[allow(dead_code)]
    temp_dir: TempDir, // keep alive for the duration of the test
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_settings(Settings::default()).await
    }

    pub async fn new_with_settings(mut settings: Settings) -> Result<Self> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let db_path = temp_dir.path().join(format!("test_db_{}.db", counter));

        let archive_root = temp_dir.path().join("archive");
        std::fs::create_dir_all(&archive_root)?;
        git_store::init_or_open_repo(&archive_root)?;

        settings.storage.root = archive_root.clone();
        settings.database.path = db_path.clone();
        settings.notifications.signals_dir = temp_dir.path().join("signals");

        let db = relay_core::store::new_db_pool(&db_path).await?;
        let mm = ModelManager::new_for_test(db, archive_root, Arc::new(settings));
        let ctx = Ctx::root_ctx();

        Ok(Self { mm, ctx, temp_dir })
    }

    pub fn storage_root(&self) -> PathBuf {
        self.mm.storage_root.clone()
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Subjects of the archive commits, newest first.
    pub fn commit_subjects(&self) -> Vec<String> {
        let repo = git2::Repository::open(self.mm.storage_root.as_path()).expect("open repo");
        let mut walk = repo.revwalk().expect("revwalk");
        if walk.push_head().is_err() {
            return Vec::new();
        }
        walk.flatten()
            .filter_map(|oid| repo.find_commit(oid).ok())
            .map(|c| c.summary().unwrap_or_default().to_string())
            .collect()
    }

    /// Relative paths touched by the archive HEAD commit.
    pub fn head_commit_paths(&self) -> Vec<String> {
        let repo = git2::Repository::open(self.mm.storage_root.as_path()).expect("open repo");
        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        let tree = head.tree().expect("tree");
        let parent_tree = head.parent(0).ok().and_then(|p| p.tree().ok());
        let diff = repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .expect("diff");
        let mut paths = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                if let Some(p) = delta.new_file().path() {
                    paths.push(p.to_string_lossy().into_owned());
                }
                true
            },
            None,
            None,
            None,
        )
        .expect("diff foreach");
        paths
    }

    /// Backdate an agent's last_active_ts by the given seconds.
    pub async fn age_agent_activity(&self, agent_id: i64, seconds: i64) -> Result<()> {
        let ts = (chrono::Utc::now().naive_utc() - chrono::Duration::seconds(seconds))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let db = self.mm.db_for_test();
        let stmt = db
            .prepare("UPDATE agents SET last_active_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((ts, agent_id)).await?;
        Ok(())
    }
}

/// Register a project + agent pair in one go.
pub async fn setup_project_and_agent(
    tc: &TestContext,
    human_key: &str,
    agent_name: &str,
) -> (relay_core::model::project::Project, relay_core::model::agent::Agent) {
    use relay_core::model::agent::AgentBmc;
    use relay_core::model::project::ProjectBmc;

    let project = ProjectBmc::ensure(&tc.ctx, &tc.mm, human_key)
        .await
        .expect("ensure project");
    let agent = AgentBmc::register(
        &tc.ctx,
        &tc.mm,
        project.id,
        Some(agent_name),
        "codex",
        "gpt-5",
        "test agent",
        None,
        None,
    )
    .await
    .expect("register agent");
    (project, agent)
}
