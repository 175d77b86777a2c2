use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    import::{CustomerImportStore, UserImportStore},
    storage::ObjectStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Uploaded spreadsheets waiting for review, kept in memory per process.
pub struct ImportStores {
    pub customers: CustomerImportStore,
    pub users: UserImportStore,
}

impl ImportStores {
    fn with_ttl_minutes(minutes: i64) -> Self {
        let ttl = chrono::Duration::minutes(minutes.max(1));
        Self {
            customers: CustomerImportStore::new(ttl),
            users: UserImportStore::new(ttl),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub imports: Arc<ImportStores>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let imports = Arc::new(ImportStores::with_ttl_minutes(config.staging_ttl_minutes));
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
            imports,
        }
    }

    /// Blocking checkout from the pool; handlers call this directly.
    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool.get().map_err(|err| {
            tracing::error!(error = %err, "database pool exhausted or unreachable");
            AppError::internal(format!("database pool error: {err}"))
        })
    }
}
