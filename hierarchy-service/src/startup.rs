use crate::config::HierarchyConfig;
use crate::db;
use crate::models::EntityKind;
use crate::services::{
    AuditSink, CacheInvalidator, Hierarchies, HierarchyManager, HierarchyStore, ManagerSettings,
    NoUniqueness, NoopCacheInvalidator, PgAuditSink, PgHierarchyStore, RedisCacheInvalidator,
    ReferenceCounter, SqlReferenceCounter, UniqueAttribute, UniquenessPolicy,
};
use crate::{build_router, AppState};
use service_core::error::AppError;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Collaborators shared by the managers of every kind.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn HierarchyStore>,
    pub references: Arc<dyn ReferenceCounter>,
    pub uniqueness: Arc<dyn UniquenessPolicy>,
    pub cache: Arc<dyn CacheInvalidator>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: ManagerSettings,
}

/// One manager per entity kind, all wired to the same collaborators.
pub fn build_hierarchies(collaborators: &Collaborators) -> Hierarchies {
    EntityKind::ALL
        .into_iter()
        .fold(Hierarchies::new(), |hierarchies, kind| {
            hierarchies.with(
                HierarchyManager::new(kind, collaborators.store.clone())
                    .with_references(collaborators.references.clone())
                    .with_uniqueness(collaborators.uniqueness.clone())
                    .with_cache(collaborators.cache.clone())
                    .with_audit(collaborators.audit.clone())
                    .with_settings(collaborators.settings.clone()),
            )
        })
}

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    pub async fn build(config: HierarchyConfig) -> Result<Self, AppError> {
        let pool = db::create_pool(&config.database).await.map_err(|e| {
            tracing::error!("Failed to connect to PostgreSQL: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e))
        })?;
        db::run_migrations(&pool).await.map_err(|e| {
            tracing::error!("Failed to run migrations: {}", e);
            AppError::DatabaseError(anyhow::anyhow!(e))
        })?;

        let cache: Arc<dyn CacheInvalidator> = match &config.redis.url {
            Some(url) => {
                let redis = RedisCacheInvalidator::new(url).await.map_err(|e| {
                    tracing::error!("Failed to connect to Redis: {}", e);
                    AppError::CacheError(e)
                })?;
                redis.health_check().await.map_err(AppError::CacheError)?;
                tracing::info!("Redis cache invalidation enabled");
                Arc::new(redis)
            }
            None => {
                tracing::info!("No REDIS_URL configured, cache invalidation disabled");
                Arc::new(NoopCacheInvalidator)
            }
        };

        let uniqueness: Arc<dyn UniquenessPolicy> = if config.hierarchy.unique_field.is_empty() {
            Arc::new(NoUniqueness)
        } else {
            Arc::new(UniqueAttribute::new(config.hierarchy.unique_field.clone()))
        };

        let collaborators = Collaborators {
            store: Arc::new(PgHierarchyStore::new(
                pool.clone(),
                config.hierarchy.lock_timeout_ms,
            )),
            references: Arc::new(SqlReferenceCounter::new()),
            uniqueness,
            cache,
            audit: Arc::new(PgAuditSink::new(pool)),
            settings: config.hierarchy.manager_settings(),
        };

        let state = AppState {
            service_name: config.service_name.clone(),
            hierarchies: build_hierarchies(&collaborators),
        };
        let app = build_router(state);

        let addr: SocketAddr = config.common.bind_address().parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e))
        })?;
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .into_future();

        Ok(Self {
            port,
            server: Box::new(server),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
