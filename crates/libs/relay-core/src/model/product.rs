//! Products: named groupings of projects.
//!
//! Purely structural; linking projects into a product changes nothing
//! about per-project semantics, it only enables product-wide inbox and
//! search queries.

use crate::Result;
use crate::ctx::Ctx;
use crate::model::ModelManager;
use crate::model::message::{Message, MessageBmc};
use crate::model::project::Project;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub product_uid: String,
    pub name: String,
    pub created_at: NaiveDateTime,
}

pub struct ProductBmc;

impl ProductBmc {
    /// Create a product; the short uid is the stable external handle.
    pub async fn create(_ctx: &Ctx, mm: &ModelManager, name: &str) -> Result<Product> {
        let db = mm.db();
        let product_uid = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();

        let stmt = db
            .prepare(
                "INSERT INTO products (product_uid, name) VALUES (?, ?) RETURNING id",
            )
            .await?;
        let mut rows = stmt.query((product_uid.as_str(), name)).await?;
        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::InvalidInput("Failed to create product".into()));
        };

        Self::get(_ctx, mm, id).await
    }

    pub async fn get(_ctx: &Ctx, mm: &ModelManager, id: i64) -> Result<Product> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, product_uid, name, created_at FROM products WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id]).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProductNotFound(format!("ID: {}", id)))
        }
    }

    /// Resolve by uid first, then by name.
    pub async fn get_by_identifier(
        _ctx: &Ctx,
        mm: &ModelManager,
        identifier: &str,
    ) -> Result<Product> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "SELECT id, product_uid, name, created_at FROM products \
                 WHERE product_uid = ? OR name = ?",
            )
            .await?;
        let mut rows = stmt.query((identifier, identifier)).await?;
        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProductNotFound(identifier.to_string()))
        }
    }

    pub async fn list_all(_ctx: &Ctx, mm: &ModelManager) -> Result<Vec<Product>> {
        let db = mm.db();
        let stmt = db
            .prepare("SELECT id, product_uid, name, created_at FROM products ORDER BY name ASC")
            .await?;
        let mut rows = stmt.query(()).await?;
        let mut products = Vec::new();
        while let Some(row) = rows.next().await? {
            products.push(Self::from_row(row)?);
        }
        Ok(products)
    }

    /// Link a project into the product. Idempotent.
    pub async fn link_project(
        _ctx: &Ctx,
        mm: &ModelManager,
        product_id: i64,
        project_id: i64,
    ) -> Result<()> {
        let db = mm.db();
        let stmt = db
            .prepare(
                "INSERT OR IGNORE INTO product_project_links (product_id, project_id) VALUES (?, ?)",
            )
            .await?;
        stmt.execute((product_id, project_id)).await?;
        Ok(())
    }

    pub async fn list_projects(
        _ctx: &Ctx,
        mm: &ModelManager,
        product_id: i64,
    ) -> Result<Vec<Project>> {
        let db = mm.db();
        let stmt = db
            .prepare(
                r#"
            SELECT p.id, p.slug, p.human_key, p.created_at
            FROM product_project_links l
            JOIN projects p ON l.project_id = p.id
            WHERE l.product_id = ?
            ORDER BY p.slug ASC
            "#,
            )
            .await?;
        let mut rows = stmt.query([product_id]).await?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            let created_at_str: String = row.get(3)?;
            projects.push(Project {
                id: row.get(0)?,
                slug: row.get(1)?,
                human_key: row.get(2)?,
                created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
                    .unwrap_or_default(),
            });
        }
        Ok(projects)
    }

    /// Product-wide inbox for an agent name: recipient rows across every
    /// linked project, newest first.
    pub async fn product_inbox(
        ctx: &Ctx,
        mm: &ModelManager,
        product_id: i64,
        agent_name: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let projects = Self::list_projects(ctx, mm, product_id).await?;
        let mut all = Vec::new();
        for project in &projects {
            if let Ok(agent) =
                crate::model::agent::AgentBmc::get_by_name(ctx, mm, project.id, agent_name).await
            {
                let items = MessageBmc::fetch_inbox(
                    ctx,
                    mm,
                    agent.id,
                    &crate::model::message::InboxFilter {
                        limit,
                        include_bodies: false,
                        ..Default::default()
                    },
                )
                .await?;
                all.extend(items.into_iter().map(|i| i.message));
            }
        }
        all.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then(b.id.cmp(&a.id)));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    /// Product-wide search across every linked project.
    pub async fn product_search(
        ctx: &Ctx,
        mm: &ModelManager,
        product_id: i64,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let projects = Self::list_projects(ctx, mm, product_id).await?;
        let mut all = Vec::new();
        for project in &projects {
            let hits = MessageBmc::search(ctx, mm, project.id, query, limit).await?;
            all.extend(hits);
        }
        all.sort_by(|a, b| b.created_ts.cmp(&a.created_ts).then(b.id.cmp(&a.id)));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    fn from_row(row: libsql::Row) -> Result<Product> {
        let created_at_str: String = row.get(3)?;
        Ok(Product {
            id: row.get(0)?,
            product_uid: row.get(1)?,
            name: row.get(2)?,
            created_at: NaiveDateTime::parse_from_str(&created_at_str, "%Y-%m-%d %H:%M:%S")
                .unwrap_or_default(),
        })
    }
}
