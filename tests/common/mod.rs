//! Shared test helpers for integration tests backed by Testcontainers.

use pgcov::pool::Pool;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_postgres::Config;

/// A running PostgreSQL 16 container plus an admin [`Pool`] bound to it.
///
/// `sqlx` is used only for test-side setup/assertion ergonomics; the
/// pipeline under test always talks to the container through pgcov's own
/// `Pool`/`Executor`.
#[allow(dead_code)]
pub struct TestServer {
    pub admin: Pool,
    pub config: Config,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start() -> Self {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .expect("failed to start postgres container");

        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("failed to get mapped port");

        let mut config = Config::new();
        config
            .host("127.0.0.1")
            .port(port)
            .user("postgres")
            .password("postgres")
            .dbname("postgres")
            .application_name("pgcov-test");

        let admin = Pool::connect_unchecked(config.clone(), 8);

        TestServer {
            admin,
            config,
            _container: container,
        }
    }

    pub async fn admin_scalar_bool(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> bool {
        let conn = self.admin.acquire().await.expect("acquire admin connection");
        let row = conn.query_one(sql, params).await.expect("query failed");
        row.get(0)
    }
}
