use sqlx::PgPool;

use crate::errors::Result;
use crate::models::App;

#[derive(Clone)]
pub struct AppRepository {
    pool: PgPool,
}

impl AppRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, app_id: &str) -> Result<Option<App>> {
        let app = sqlx::query_as::<_, App>(
            r#"
            SELECT app_id, name, owner_id, is_active, description, created_at, updated_at
            FROM Apps
            WHERE app_id = $1
            "#,
        )
        .bind(app_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(app)
    }
}
