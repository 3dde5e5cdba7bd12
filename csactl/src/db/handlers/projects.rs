use crate::db::errors::Result;
use crate::db::models::projects::{ProjectCreateDBRequest, ProjectDBResponse};
use crate::types::ProjectId;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
struct Project {
    pub id: ProjectId,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

impl From<Project> for ProjectDBResponse {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            name: project.name,
            slug: project.slug,
            created_at: project.created_at,
        }
    }
}

pub struct Projects<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Projects<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    pub async fn create(&mut self, request: &ProjectCreateDBRequest) -> Result<ProjectDBResponse> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (id, name, slug)
            VALUES ($1, $2, $3)
            RETURNING id, name, slug, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&request.name)
        .bind(&request.slug)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(project.into())
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_slug(&mut self, slug: &str) -> Result<Option<ProjectDBResponse>> {
        let project = sqlx::query_as::<_, Project>("SELECT id, name, slug, created_at FROM projects WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(project.map(Into::into))
    }
}
