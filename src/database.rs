use sqlx::{postgres::{PgConnectOptions, PgPoolOptions}, PgPool};
use std::str::FromStr;
use tracing::{info, warn};

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let options = PgConnectOptions::from_str(database_url)?
        .application_name("taskhive-backend")
        .statement_cache_capacity(200);

    PgPoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(3))
        .idle_timeout(std::time::Duration::from_secs(60))
        .connect_with(options)
        .await
}

/// Applies `migrations/`. Failures are logged and startup continues, the
/// same way SKIP_MIGRATIONS lets an operator run them out of band.
pub async fn run_migrations(pool: &PgPool) {
    match sqlx::migrate!("./migrations").run(pool).await {
        Ok(_) => info!("✅ Migrations completed successfully"),
        Err(sqlx::migrate::MigrateError::VersionMismatch(version)) => {
            warn!("⚠️  Migration version mismatch: {}", version);
            warn!("Database has different migration state than expected");
        }
        Err(e) => {
            warn!("❌ Failed to run migrations: {}", e);
            warn!("Continuing without migrations (set SKIP_MIGRATIONS=true to suppress this warning)");
        }
    }
}
