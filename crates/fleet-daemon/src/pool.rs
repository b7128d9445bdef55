//! Persistent connection pool
//!
//! The daemon itself issues no queries; the pool is owned here so the
//! shutdown sequence can close it after the workers that use it are gone.

use async_trait::async_trait;

/// A pool of persistent connections
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    fn name(&self) -> &str;

    /// Close every connection; must not fail
    async fn close(&self);
}

#[cfg(feature = "postgres")]
pub use postgres::PgConnectionPool;

#[cfg(feature = "postgres")]
mod postgres {
    use super::ConnectionPool;
    use crate::config::DatabaseConfig;
    use crate::error::DaemonError;
    use async_trait::async_trait;
    use sqlx::postgres::{PgPool, PgPoolOptions};
    use std::time::Duration;

    /// PostgreSQL pool; connections are opened on first use
    pub struct PgConnectionPool {
        pool: PgPool,
    }

    impl PgConnectionPool {
        pub fn connect_lazy(config: &DatabaseConfig, url: &str) -> Result<Self, DaemonError> {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
                .connect_lazy(url)
                .map_err(|e| DaemonError::Config(format!("Invalid database URL: {}", e)))?;
            Ok(Self { pool })
        }
    }

    #[async_trait]
    impl ConnectionPool for PgConnectionPool {
        fn name(&self) -> &str {
            "postgres"
        }

        async fn close(&self) {
            self.pool.close().await;
        }
    }
}
