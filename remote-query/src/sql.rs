use async_trait::async_trait;
use sgroups::config::SqlRemoteConfig;
use sgroups::{RemoteConfig, RemoteDriver, Result, SgroupsError};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::Row;
use tracing::{debug, info};

/// Runs select queries on SQL remotes
#[async_trait]
pub trait SqlSource: Send + Sync {
    /// Values of the first column of every row
    async fn execute_select(&self, remote: &RemoteConfig, query: &str) -> Result<Vec<String>>;
}

/// `SqlSource` using sqlx drivers, with one short lived connection per query
#[derive(Debug, Default)]
pub struct SqlxSource;

fn credentials(cfg: &SqlRemoteConfig) -> String {
    match (&cfg.user, &cfg.password) {
        (Some(user), Some(password)) => format!(
            "{}:{}@",
            urlencoding::encode(user),
            urlencoding::encode(password)
        ),
        (Some(user), None) => format!("{}@", urlencoding::encode(user)),
        _ => String::new(),
    }
}

fn server_url(scheme: &str, cfg: &SqlRemoteConfig) -> String {
    let host = cfg.host.as_deref().unwrap_or("localhost");
    let port = cfg.port.map(|p| format!(":{}", p)).unwrap_or_default();
    format!("{}://{}{}{}/{}", scheme, credentials(cfg), host, port, cfg.db_name)
}

/// Connection URL of a SQL remote, `None` for directory remotes
pub fn connection_url(remote: &RemoteConfig) -> Option<String> {
    match &remote.driver {
        RemoteDriver::Sqlite(cfg) => Some(format!("sqlite://{}?mode=ro", cfg.db_name)),
        RemoteDriver::Postgres(cfg) => Some(server_url("postgres", cfg)),
        RemoteDriver::Mysql(cfg) => Some(server_url("mysql", cfg)),
        RemoteDriver::Ldap(_) => None,
    }
}

fn remote_error(e: sqlx::Error) -> SgroupsError {
    SgroupsError::RemoteQuery(e.to_string())
}

#[async_trait]
impl SqlSource for SqlxSource {
    async fn execute_select(&self, remote: &RemoteConfig, query: &str) -> Result<Vec<String>> {
        let url = connection_url(remote)
            .ok_or_else(|| SgroupsError::RemoteQuery("remote is not a SQL database".to_string()))?;
        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .map_err(remote_error)?;
        debug!("sql query: {}", query);
        let rows = sqlx::query(query).fetch_all(&pool).await.map_err(remote_error);
        pool.close().await;
        let rows = rows?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value = match row.try_get::<String, _>(0) {
                Ok(value) => value,
                Err(_) => row.try_get::<i64, _>(0).map_err(remote_error)?.to_string(),
            };
            values.push(value);
        }
        info!("sql query returned {} values", values.len());
        Ok(values)
    }
}
