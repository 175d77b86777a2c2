use std::env;

use anyhow::{Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use kaisen::{
    config::AppConfig,
    db, s3,
    schema::{assignments, photos, projects},
    storage::{ObjectStorage, S3Storage},
};

const USAGE: &str = "Usage: maintenance purge-projects";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("purge-projects") => purge_projects().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Deletes soft-deleted projects whose grace period has passed, together with
/// their assignments, photo rows and photo objects.
async fn purge_projects() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let s3_client = s3::build_client(&config).await?;
    let storage = S3Storage::new(s3_client, config.s3_bucket.clone());

    let mut conn = pool.get().context("failed to get database connection")?;
    let now = Utc::now().naive_utc();

    let expired: Vec<Uuid> = projects::table
        .filter(projects::is_deleted.eq(true))
        .filter(projects::deleted_at.le(now))
        .select(projects::id)
        .load(&mut conn)
        .context("failed to load expired projects")?;

    if expired.is_empty() {
        tracing::info!("no projects due for purge");
        return Ok(());
    }

    let photo_keys: Vec<String> = photos::table
        .inner_join(assignments::table)
        .filter(assignments::project_id.eq_any(&expired))
        .select(photos::s3_key)
        .load(&mut conn)
        .context("failed to load photo keys")?;

    // Rows first: a failed object delete only leaves an orphaned object behind.
    let purged = diesel::delete(projects::table.filter(projects::id.eq_any(&expired)))
        .execute(&mut conn)
        .context("failed to delete expired projects")?;

    let mut failed = 0usize;
    for key in &photo_keys {
        if let Err(err) = storage.delete_object(key).await {
            failed += 1;
            tracing::warn!(key = %key, error = %err, "failed to delete photo object");
        }
    }

    tracing::info!(
        projects = purged,
        photos = photo_keys.len(),
        failed_objects = failed,
        "expired projects purged"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
