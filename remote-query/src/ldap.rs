use async_trait::async_trait;
use directory::{DirectoryStore, Filter, SqliteDirectory, NO_ATTRS};
use sgroups::config::LdapRemoteConfig;
use sgroups::{Result, SgroupsError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::RemoteLdapQuery;

/// Opens the directory of a remote
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, remote_cfg_name: &str, cfg: &LdapRemoteConfig) -> Result<Arc<dyn DirectoryStore>>;
}

/// Remote directories stored in SQLite, connections kept for the next queries
#[derive(Default)]
pub struct SqliteConnector {
    connections: Mutex<HashMap<String, Arc<dyn DirectoryStore>>>,
}

#[async_trait]
impl DirectoryConnector for SqliteConnector {
    async fn connect(&self, remote_cfg_name: &str, cfg: &LdapRemoteConfig) -> Result<Arc<dyn DirectoryStore>> {
        let mut connections = self.connections.lock().await;
        if let Some(store) = connections.get(remote_cfg_name) {
            return Ok(store.clone());
        }
        info!("Connecting to remote directory {}", remote_cfg_name);
        let store: Arc<dyn DirectoryStore> = Arc::new(SqliteDirectory::connect(&cfg.url).await?);
        connections.insert(remote_cfg_name.to_string(), store.clone());
        Ok(store)
    }
}

/// DNs of the matching entries, or the values of the requested attribute
pub(crate) async fn search(
    store: &dyn DirectoryStore,
    default_base: Option<&str>,
    remote: &RemoteLdapQuery,
) -> Result<Vec<String>> {
    let base = remote
        .dn
        .as_deref()
        .or(default_base)
        .ok_or_else(|| {
            SgroupsError::InvalidRemoteQuery(
                "remote config has no search_branch, and the query has no DN".to_string(),
            )
        })?;
    let filter = match &remote.filter {
        Some(filter) => Filter::parse(filter)
            .map_err(|e| SgroupsError::InvalidRemoteQuery(e.to_string()))?,
        None => Filter::And(vec![]),
    };
    debug!("remote directory search {} {}", base, filter);

    let values = match &remote.attribute {
        Some(attr) => store
            .search(base, &filter, &[attr.as_str()], None)
            .await?
            .into_iter()
            .flat_map(|e| e.attrs.into_values().flatten())
            .collect(),
        None => store
            .search(base, &filter, &[NO_ATTRS], None)
            .await?
            .into_iter()
            .map(|e| e.dn)
            .collect(),
    };
    Ok(values)
}
