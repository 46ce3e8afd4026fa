//! Cluster connections.
//!
//! Redshift scopes most catalog views and all DDL to the connected database,
//! so the client keeps one pool per database name and opens them on first use.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// A boxed database future that can be held across `.await` in a `Send` task.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How often and how patiently transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match f().await {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient database error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                },
                result => return result,
            }
        }
    }
}

/// Connection pools and coordination state shared by all operations.
pub struct Client {
    config: ProviderConfig,
    pools: Mutex<HashMap<String, PgPool>>,
    grant_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client. No connection is made until a pool is requested.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(HashMap::new()),
            grant_lock: Mutex::new(()),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The resolved provider configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// The database named in the provider configuration.
    pub fn default_database(&self) -> &str {
        &self.config.database
    }

    /// The pool for `database`, connecting it if needed.
    pub async fn pool(&self, database: &str) -> Result<PgPool, ProviderError> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }

        debug!(database, host = %self.config.host, "Opening connection pool");
        let mut options = PgPoolOptions::new().acquire_timeout(self.config.connect_timeout);
        if self.config.max_connections > 0 {
            options = options.max_connections(self.config.max_connections);
        }
        let pool = options
            .connect_with(self.config.connect_options(database))
            .await?;
        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }

    /// The pool for the provider's default database.
    pub async fn default_pool(&self) -> Result<PgPool, ProviderError> {
        self.pool(&self.config.database).await
    }

    /// Start a transaction on `database`. Dropping it uncommitted rolls back.
    pub async fn begin(&self, database: &str) -> Result<Transaction<'static, Postgres>, ProviderError> {
        let pool = self.pool(database).await?;
        Ok(pool.begin().await?)
    }

    /// Run one statement outside any transaction.
    pub fn execute<'a>(
        &'a self,
        database: &'a str,
        statement: &'a str,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let pool = self.pool(database).await?;
            debug!(database, sql = statement, "Executing");
            sqlx::raw_sql(statement).execute(&pool).await?;
            Ok(())
        })
    }

    /// Run statements in order inside a single transaction.
    pub fn execute_in_transaction<'a>(
        &'a self,
        database: &'a str,
        statements: &'a [String],
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            if statements.is_empty() {
                return Ok(());
            }
            let mut tx = self.begin(database).await?;
            for statement in statements {
                let statement: &str = statement;
                debug!(database, sql = statement, "Executing");
                sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(statement)).await?;
            }
            tx.commit().await?;
            Ok(())
        })
    }

    /// Retry `f` on serialization failures, deadlocks and concurrent
    /// transaction conflicts.
    pub async fn retry<'a, T, F>(&self, operation: &str, f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> BoxFuture<'a, Result<T, ProviderError>>,
    {
        self.retry.run(operation, f).await
    }

    /// Serialise privilege changes made by this process.
    ///
    /// Concurrent GRANT/REVOKE on the same catalog rows fail with
    /// serialization errors far more often than they succeed.
    pub async fn grant_lock(&self) -> MutexGuard<'_, ()> {
        self.grant_lock.lock().await
    }

    /// Name of the connected user.
    pub async fn current_user(&self) -> Result<String, ProviderError> {
        let pool = self.default_pool().await?;
        Ok(sqlx::query_scalar::<_, String>("SELECT CURRENT_USER::varchar")
            .fetch_one(&pool)
            .await?)
    }

    /// Name of the database the default pool is connected to.
    pub async fn current_database(&self) -> Result<String, ProviderError> {
        let pool = self.default_pool().await?;
        Ok(sqlx::query_scalar::<_, String>("SELECT current_database()::varchar")
            .fetch_one(&pool)
            .await?)
    }

    /// Names of all databases on the cluster that accept connections.
    pub async fn databases(&self) -> Result<Vec<String>, ProviderError> {
        let pool = self.default_pool().await?;
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT datname::varchar FROM pg_database \
             WHERE datallowconn AND NOT datistemplate AND datname <> 'padb_harvest' \
             ORDER BY datname",
        )
        .fetch_all(&pool)
        .await?)
    }

    /// Close and forget the pool for `database`. Redshift refuses to rename or
    /// drop a database with open connections.
    pub async fn close_pool(&self, database: &str) {
        let pool = self.pools.lock().await.remove(database);
        if let Some(pool) = pool {
            pool.close().await;
            debug!(database, "Closed connection pool");
        }
    }

    /// Close every pool.
    pub async fn close(&self) {
        let pools: Vec<(String, PgPool)> = self.pools.lock().await.drain().collect();
        for (database, pool) in pools {
            pool.close().await;
            debug!(database, "Closed connection pool");
        }
        info!("Closed all connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn conflict() -> ProviderError {
        ProviderError::Database {
            code: Some("40001".to_string()),
            message: "serializable isolation violation on table".to_string(),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = &AtomicU32::new(0);
        let result = fast()
            .run("test", || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(assert_ok!(result), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("test", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            })
            .await;
        assert!(assert_err!(result).is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_skips_permanent_errors() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = tokio_test::block_on(fast().run("test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::PermissionDenied("nope".into()))
        }));
        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_retry_takes_boxed_futures() {
        let config = ProviderConfig::from_value_with_env(&json!({"host": "localhost"}), |_| None)
            .unwrap();
        let client = Client::new(config).with_retry_policy(fast());
        let statements = vec!["SELECT 1".to_string()];
        let calls = &AtomicU32::new(0);
        let result = client
            .retry("test", || {
                let statements = &statements;
                Box::pin(async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(conflict())
                    } else {
                        Ok(statements.len())
                    }
                })
            })
            .await;
        assert_eq!(assert_ok!(result), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_database_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let config = ProviderConfig::from_value_with_env(&json!({"host": "localhost"}), |_| None)
            .unwrap();
        let client = Client::new(config);
        let statements = vec!["SELECT 1".to_string()];
        assert_send(&client.execute_in_transaction("dev", &statements));
        assert_send(&client.execute("dev", "SELECT 1"));
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_grant_lock_is_exclusive() {
        let config = ProviderConfig::from_value_with_env(&json!({"host": "localhost"}), |_| None)
            .unwrap();
        let client = Client::new(config);
        assert_eq!(client.default_database(), "redshift");

        let guard = client.grant_lock().await;
        assert!(client.grant_lock.try_lock().is_err());
        drop(guard);
        assert!(client.grant_lock.try_lock().is_ok());
    }
}
