//! `SQLite` connection pool for the local world store.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so no database is needed at build time. All queries are parameterized;
//! the only interpolated identifiers are the static component table names.
//!
//! An in-memory database lives exactly as long as its connection, so the
//! pool for `sqlite::memory:` is pinned to a single connection that never
//! idles out.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::StoreError;
use crate::registry::ComponentRegistry;

/// URL of a private in-memory database.
pub const MEMORY_URL: &str = "sqlite::memory:";

/// Default maximum number of connections for file-backed databases.
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Default connection acquire timeout in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Configuration for the store connection pool.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `SQLite` URL (`sqlite::memory:` or `sqlite://path/to/world.db`).
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection acquire timeout.
    pub acquire_timeout: Duration,
}

impl StoreConfig {
    /// Create a new configuration from a database URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// Configuration for a private in-memory database.
    pub fn memory() -> Self {
        Self::new(MEMORY_URL)
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Whether the URL names an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Handle to the world store.
///
/// Cheap to clone; every clone shares the same pool and component
/// registry. Mutating methods are only called by the ingestion engine while
/// it holds the write lock; read methods may be called by anyone.
#[derive(Debug, Clone)]
pub struct WorldStore {
    pub(crate) pool: SqlitePool,
    pub(crate) registry: Arc<ComponentRegistry>,
}

impl WorldStore {
    /// Open the database described by `config` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed,
    /// [`StoreError::Sqlx`] if the connection fails, and
    /// [`StoreError::Migration`] if the schema cannot be created.
    pub async fn connect(
        config: &StoreConfig,
        registry: Arc<ComponentRegistry>,
    ) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StoreError::Config(format!("invalid store URL {}: {e}", config.url)))?
            .create_if_missing(true);

        let pool = if config.is_memory() {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .acquire_timeout(config.acquire_timeout)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .acquire_timeout(config.acquire_timeout)
                .connect_with(options)
                .await?
        };

        let store = Self { pool, registry };
        store.run_migrations().await?;

        tracing::info!(url = %config.url, "Connected to world store");
        Ok(store)
    }

    /// Open a private in-memory store with the standard component mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect(&StoreConfig::memory(), Arc::new(ComponentRegistry::standard())).await
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::debug!("Store migrations completed");
        Ok(())
    }

    /// The category mapping this store applies operations with.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Return a reference to the underlying [`SqlitePool`].
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("World store closed");
    }
}
