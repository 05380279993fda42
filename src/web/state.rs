use std::{env, sync::Arc};

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;
use uuid::Uuid;

use crate::config::RecommendationModel;

const SEED_ADMIN_EMAIL: &str = "admin@muraja.local";
const SEED_ADMIN_PASSWORD: &str = "change-me";

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    model: Arc<RecommendationModel>,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let model =
            RecommendationModel::from_env().context("failed to load recommendation model files")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self {
            pool,
            model: Arc::new(model),
        })
    }

    pub async fn ensure_seed_admin(&self) -> Result<()> {
        let has_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE is_admin = TRUE)")
                .fetch_one(&self.pool)
                .await
                .context("failed to verify admin presence")?;

        if !has_admin {
            let password_hash = crate::web::auth::hash_password(SEED_ADMIN_PASSWORD)
                .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

            sqlx::query(
                "INSERT INTO users (id, nama, email, password_hash, is_admin) VALUES ($1, $2, $3, $4, TRUE)",
            )
            .bind(Uuid::new_v4())
            .bind("Administrator")
            .bind(SEED_ADMIN_EMAIL)
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to insert seed admin user")?;

            info!(
                "Seeded default admin user '{SEED_ADMIN_EMAIL}' (password: '{SEED_ADMIN_PASSWORD}'). Update it promptly."
            );
        }

        Ok(())
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn model(&self) -> &RecommendationModel {
        &self.model
    }
}
