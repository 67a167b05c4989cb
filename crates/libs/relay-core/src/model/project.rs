use crate::Result;
use crate::model::ModelManager;
use crate::store::git_store;
use crate::utils::slugify;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub human_key: String,
    pub created_at: NaiveDateTime,
}

pub struct ProjectBmc;

impl ProjectBmc {
    /// Canonicalize a human key into its stable form.
    ///
    /// Absolute paths resolve symlinks when the path exists on this host,
    /// so two spellings of the same working copy land on the same slug.
    /// Logical names pass through trimmed.
    pub fn canonicalize_human_key(human_key: &str) -> String {
        let trimmed = human_key.trim();
        if trimmed.starts_with('/') {
            if let Ok(resolved) = std::fs::canonicalize(trimmed) {
                return resolved.to_string_lossy().into_owned();
            }
        }
        trimmed.to_string()
    }

    /// Derive the stable slug for a human key.
    pub fn slug_for(human_key: &str) -> String {
        slugify(&Self::canonicalize_human_key(human_key))
    }

    /// Ensure a project exists for `human_key`, creating it if necessary.
    ///
    /// Repeated calls with the same key (or a symlinked spelling of the
    /// same path) are idempotent and return the same slug. An existing
    /// project whose key re-canonicalizes differently is updated in
    /// place.
    pub async fn ensure(ctx: &crate::Ctx, mm: &ModelManager, human_key: &str) -> Result<Project> {
        let canonical = Self::canonicalize_human_key(human_key);
        let slug = slugify(&canonical);

        if let Ok(existing) = Self::get_by_slug(ctx, mm, &slug).await {
            if existing.human_key != canonical {
                let db = mm.db();
                let stmt = db
                    .prepare("UPDATE projects SET human_key = ? WHERE id = ?")
                    .await?;
                stmt.execute((canonical.as_str(), existing.id)).await?;
                return Self::get(ctx, mm, existing.id).await;
            }
            return Ok(existing);
        }

        let id = Self::create(ctx, mm, &slug, &canonical).await?;
        Self::get(ctx, mm, id).await
    }

    pub async fn create(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        slug: &str,
        human_key: &str,
    ) -> Result<i64> {
        let db = mm.db();

        let stmt = db
            .prepare("INSERT INTO projects (slug, human_key) VALUES (?, ?) RETURNING id")
            .await?;
        let mut rows = stmt.query([slug, human_key]).await?;

        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput("Failed to create project".into()));
        };

        Self::ensure_archive(mm, slug, human_key).await?;

        Ok(id)
    }

    pub async fn list_all(_ctx: &crate::Ctx, mm: &ModelManager) -> Result<Vec<Project>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, slug, human_key, created_at FROM projects ORDER BY created_at DESC",
            )
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(Self::from_row(row)?);
        }
        Ok(projects)
    }

    pub async fn get_by_slug(_ctx: &crate::Ctx, mm: &ModelManager, slug: &str) -> Result<Project> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE slug = ?")
            .await?;
        let mut rows = stmt.query([slug]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Self::from_row(row)?)
        } else {
            Err(crate::Error::ProjectNotFound(format!("Slug: {}", slug)))
        }
    }

    /// Resolve a project by slug, human key, or any spelling that
    /// canonicalizes to a known slug.
    pub async fn get_by_identifier(
        ctx: &crate::Ctx,
        mm: &ModelManager,
        identifier: &str,
    ) -> Result<Project> {
        if let Ok(project) = Self::get_by_slug(ctx, mm, identifier).await {
            return Ok(project);
        }
        if let Ok(project) = Self::get_by_human_key(ctx, mm, identifier).await {
            return Ok(project);
        }
        // Derived form last: lets callers pass the raw working-copy path.
        let derived = Self::slug_for(identifier);
        Self::get_by_slug(ctx, mm, &derived)
            .await
            .map_err(|_| crate::Error::ProjectNotFound(identifier.to_string()))
    }

    pub async fn get_by_human_key(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        human_key: &str,
    ) -> Result<Project> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE human_key = ?")
            .await?;
        let mut rows = stmt.query([human_key]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Self::from_row(row)?)
        } else {
            Err(crate::Error::ProjectNotFound(format!(
                "Human Key: {}",
                human_key
            )))
        }
    }

    pub async fn get(_ctx: &crate::Ctx, mm: &ModelManager, id: i64) -> Result<Project> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_at FROM projects WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Self::from_row(row)?)
        } else {
            Err(crate::Error::ProjectNotFound(format!("ID: {}", id)))
        }
    }

    /// Relative archive tree for a project slug.
    pub fn archive_dir(slug: &str) -> PathBuf {
        PathBuf::from("projects").join(slug)
    }

    /// Bootstrap the project's archive tree: `.gitattributes` once per
    /// repository, then the project profile sidecar.
    pub async fn ensure_archive(mm: &ModelManager, slug: &str, human_key: &str) -> Result<()> {
        let project_root = mm.storage_root.join("projects").join(slug);
        if !project_root.exists() {
            std::fs::create_dir_all(&project_root)?;
        }

        let _git_guard = mm.git_lock.lock().await;
        let repo_arc = mm.get_repo().await?;
        let repo = repo_arc.lock().await;
        let (author, email) = mm.git_author();

        let attributes_path = ".gitattributes";
        if git_store::read_file_content(&repo, attributes_path).is_err() {
            git_store::commit_file(
                &repo,
                Path::new(attributes_path),
                "*.json text\n*.md text\n",
                "chore: initialize archive",
                author,
                email,
            )?;
        }

        let profile = serde_json::json!({
            "slug": slug,
            "human_key": human_key,
            "created": chrono::Utc::now().to_rfc3339(),
        });
        let profile_rel = Self::archive_dir(slug).join("profile.json");
        git_store::commit_file(
            &repo,
            &profile_rel,
            &serde_json::to_string_pretty(&profile)?,
            &format!("project: ensure {}", slug),
            author,
            email,
        )?;

        Ok(())
    }

    pub async fn count_messages(
        _ctx: &crate::Ctx,
        mm: &ModelManager,
        project_id: i64,
    ) -> Result<i64> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT COUNT(*) FROM messages WHERE project_id = ?")
            .await?;
        let mut rows = stmt.query([project_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    fn from_row(row: libsql::Row) -> Result<Project> {
        let created_at_str: String = row.get(3)?;
        let created_at = NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
            .unwrap_or_default();

        Ok(Project {
            id: row.get(0)?,
            slug: row.get(1)?,
            human_key: row.get(2)?,
            created_at,
        })
    }
}
