//! Admin connection pool and temp-database lifecycle.
//!
//! A small, hand-rolled bounded pool over `tokio-postgres`, shaped like
//! `deadpool-postgres`'s API but without the dependency: a
//! `tokio::sync::Semaphore` bounds concurrent checkouts, idle clients sit
//! in a `std::sync::Mutex<Vec<_>>`, and a [`PoolGuard`] returns its client
//! to the idle list on drop. A full pooling crate's pool abstraction
//! doesn't let `CREATE DATABASE`/`DROP DATABASE ... WITH (FORCE)` run
//! outside a transaction as cleanly as talking to `tokio-postgres`
//! directly, which is the operation this module exists for.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::config::Host;
use tokio_postgres::{Config, NoTls};
use tracing::{debug, warn};

use crate::error::{PgcovError, Result};
use crate::model::TempDatabase;

const MIN_SERVER_VERSION_NUM: i32 = 130000;

/// A bounded pool of connections to one database.
pub struct Pool {
    config: Config,
    semaphore: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<tokio_postgres::Client>>>,
}

impl Pool {
    /// Connect and verify the server is new enough for `DROP DATABASE ...
    /// WITH (FORCE)` (PostgreSQL 13+).
    pub async fn connect_admin(config: Config, max_conns: usize) -> Result<Self> {
        let pool = Pool::connect_unchecked(config, max_conns);
        let guard = pool.acquire().await?;
        let row = guard
            .query_one("SHOW server_version_num", &[])
            .await
            .map_err(PgcovError::Database)?;
        let version_num: String = row.get(0);
        let version: i32 = version_num.trim().parse().unwrap_or(0);
        drop(guard);
        if version < MIN_SERVER_VERSION_NUM {
            return Err(PgcovError::config_with_suggestion(
                "connection",
                format!("server_version_num {version} is below the required {MIN_SERVER_VERSION_NUM}"),
                "upgrade to PostgreSQL 13 or newer",
            ));
        }
        Ok(pool)
    }

    /// Connect without the version check (used for per-test temp-database
    /// pools, whose admin already verified the server version once).
    pub fn connect_unchecked(config: Config, max_conns: usize) -> Self {
        Pool {
            config,
            semaphore: Arc::new(Semaphore::new(max_conns.max(1))),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn acquire(&self) -> Result<PoolGuard> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let idle_client = self.idle.lock().expect("pool idle lock poisoned").pop();
        let client = match idle_client {
            Some(c) if !c.is_closed() => c,
            _ => self.spawn_connection().await?,
        };

        Ok(PoolGuard {
            client: Some(client),
            idle: self.idle.clone(),
            _permit: permit,
        })
    }

    async fn spawn_connection(&self) -> Result<tokio_postgres::Client> {
        let (client, connection) = self.config.connect(NoTls).await.map_err(|e| connection_error(&self.config, e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "pool connection terminated");
            }
        });
        Ok(client)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// A checked-out client. Returns to the idle list on drop rather than
/// closing, unless the underlying connection has already failed.
pub struct PoolGuard {
    client: Option<tokio_postgres::Client>,
    idle: Arc<Mutex<Vec<tokio_postgres::Client>>>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PoolGuard {
    type Target = tokio_postgres::Client;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref().expect("client taken only on drop")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !client.is_closed() {
                self.idle.lock().expect("pool idle lock poisoned").push(client);
            }
        }
    }
}

/// Map a failure to establish the initial TCP/socket connection to
/// `PgcovError::Connection`, carrying the host/port the config was
/// pointed at so the message is actionable. Errors that occur once a
/// connection is already up (a failed query, a dropped backend) are
/// classified as `PgcovError::Database` instead — see call sites that
/// use `.map_err(PgcovError::Database)` directly.
fn host_port(config: &Config) -> (String, u16) {
    let host = config
        .get_hosts()
        .first()
        .map(|h| match h {
            Host::Tcp(s) => s.clone(),
            #[cfg(unix)]
            Host::Unix(p) => p.display().to_string(),
            #[allow(unreachable_patterns)]
            _ => "unknown".to_string(),
        })
        .unwrap_or_else(|| "localhost".to_string());
    let port = config.get_ports().first().copied().unwrap_or(5432);
    (host, port)
}

fn connection_error(config: &Config, source: tokio_postgres::Error) -> PgcovError {
    let (host, port) = host_port(config);
    PgcovError::Connection {
        host,
        port,
        message: source.to_string(),
        suggestion: Some("verify the server is reachable and the connection string's credentials are correct".to_string()),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

/// A freshly created temp database plus a pool bound to it.
pub struct TempDatabaseHandle {
    pub database: TempDatabase,
    pub pool: Pool,
}

/// Create `pgcov_test_<ts>_<hex>`, then open a pool bound to it. On any
/// failure after `CREATE DATABASE` succeeds, attempts a best-effort drop.
pub async fn create_temp_database(admin: &Pool) -> Result<TempDatabaseHandle> {
    let created_at = chrono::Utc::now();
    let name = format!(
        "pgcov_test_{}_{}",
        created_at.format("%Y%m%d_%H%M%S"),
        random_hex(4)
    );

    {
        let conn = admin.acquire().await?;
        conn.batch_execute(&format!("CREATE DATABASE {}", quote_ident(&name)))
            .await
            .map_err(PgcovError::Database)?;
    }

    let mut temp_config = admin.config().clone();
    temp_config.dbname(&name);
    let connection_string = format!("dbname={name}");

    match tokio_postgres::Config::connect(&temp_config, NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!(error = %e, database = %name, "temp database connection terminated");
                }
            });
            drop(client); // probe only; the real pool below opens its own connections
            let pool = Pool::connect_unchecked(temp_config, 4);
            Ok(TempDatabaseHandle {
                database: TempDatabase {
                    name,
                    created_at,
                    connection_string,
                },
                pool,
            })
        }
        Err(e) => {
            let _ = drop_database_force(admin, &name).await;
            Err(connection_error(&temp_config, e))
        }
    }
}

/// Close the temp pool, terminate any remaining backends, force-drop the
/// database, and verify it is actually gone.
pub async fn destroy_temp_database(admin: &Pool, handle: TempDatabaseHandle) -> Result<()> {
    let name = handle.database.name.clone();
    drop(handle.pool);

    terminate_backends(admin, &name).await?;
    drop_database_force(admin, &name).await?;

    if database_exists(admin, &name).await? {
        return Err(PgcovError::Cleanup {
            database: name,
            cause: "database still present in pg_database after DROP DATABASE WITH (FORCE)".to_string(),
        });
    }
    Ok(())
}

async fn terminate_backends(admin: &Pool, name: &str) -> Result<()> {
    let conn = admin.acquire().await?;
    conn.execute(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1",
        &[&name],
    )
    .await
    .map_err(PgcovError::Database)?;
    Ok(())
}

async fn drop_database_force(admin: &Pool, name: &str) -> Result<()> {
    let conn = admin.acquire().await?;
    conn.batch_execute(&format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name)))
        .await
        .map_err(|e| PgcovError::Cleanup {
            database: name.to_string(),
            cause: e.to_string(),
        })?;
    Ok(())
}

async fn database_exists(admin: &Pool, name: &str) -> Result<bool> {
    let conn = admin.acquire().await?;
    let row = conn
        .query_one("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)", &[&name])
        .await
        .map_err(PgcovError::Database)?;
    Ok(row.get(0))
}

/// Scan `pg_database` for stale `pgcov_test_%` names older than
/// `older_than` and destroy each. Failures are collected, not propagated.
pub async fn cleanup_stale(admin: &Pool, older_than: chrono::Duration) -> Vec<(String, Result<()>)> {
    let cutoff = chrono::Utc::now() - older_than;

    let conn = match admin.acquire().await {
        Ok(c) => c,
        Err(e) => return vec![("<acquire>".to_string(), Err(e))],
    };
    let rows = conn
        .query("SELECT datname FROM pg_database WHERE datname LIKE 'pgcov_test_%'", &[])
        .await;
    drop(conn);

    let rows = match rows {
        Ok(r) => r,
        Err(e) => return vec![("<query>".to_string(), Err(PgcovError::Database(e)))],
    };

    let mut results = Vec::new();
    for row in rows {
        let name: String = row.get(0);
        if let Some(ts) = parse_created_at(&name) {
            if ts >= cutoff {
                continue;
            }
        }
        debug!(database = %name, "cleaning up stale temp database");
        let outcome = async {
            terminate_backends(admin, &name).await?;
            drop_database_force(admin, &name).await?;
            if database_exists(admin, &name).await? {
                return Err(PgcovError::Cleanup {
                    database: name.clone(),
                    cause: "still present after stale cleanup drop".to_string(),
                });
            }
            Ok(())
        }
        .await;
        results.push((name, outcome));
    }
    results
}

fn parse_created_at(name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let rest = name.strip_prefix("pgcov_test_")?;
    let (ts, _hex) = rest.rsplit_once('_')?;
    let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y%m%d_%H%M%S").ok()?;
    Some(naive.and_utc())
}
