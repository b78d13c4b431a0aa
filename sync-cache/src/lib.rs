//! Synchronized groups grouped by periodicity, used by the cron.
//!
//! Computed from the directory on first use, cleared whenever a remote query is modified.

use directory::{DirectoryStore, Filter};
use remote_query::RemoteQuery;
use sgroups::{Config, GroupId, Periodicity, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub type PeriodicityToGroups = BTreeMap<Periodicity, BTreeSet<GroupId>>;

#[derive(Clone)]
pub struct SyncCache {
    config: Arc<Config>,
    store: Arc<dyn DirectoryStore>,
    periodicity_to_groups: Arc<RwLock<Option<Arc<PeriodicityToGroups>>>>,
}

impl SyncCache {
    pub fn new(config: Arc<Config>, store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            config,
            store,
            periodicity_to_groups: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get(&self) -> Result<Arc<PeriodicityToGroups>> {
        if let Some(cached) = self.periodicity_to_groups.read().await.as_ref() {
            return Ok(cached.clone());
        }
        let mut cache = self.periodicity_to_groups.write().await;
        // another task may have filled it while waiting for the lock
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }
        let computed = Arc::new(self.compute().await?);
        *cache = Some(computed.clone());
        Ok(computed)
    }

    pub async fn invalidate(&self) {
        debug!("Invalidating synchronized groups cache");
        *self.periodicity_to_groups.write().await = None;
    }

    fn periodicity(&self, id: &GroupId, remote: &str, forced: Option<&str>) -> Option<Periodicity> {
        if let Some(forced) = forced {
            match forced.parse() {
                Ok(periodicity) => return Some(periodicity),
                Err(e) => warn!("{:?}: {}, using the remote periodicity", id.as_str(), e),
            }
        }
        let remote: RemoteQuery = match remote.parse() {
            Ok(remote) => remote,
            Err(e) => {
                warn!("{:?}: {}", id.as_str(), e);
                return None;
            }
        };
        let periodicity = self
            .config
            .remotes
            .get(remote.remote_cfg_name())
            .map(|remote_cfg| remote_cfg.periodicity);
        if periodicity.is_none() {
            warn!(
                "{:?}: no periodicity for remote {:?}, not synchronized",
                id.as_str(),
                remote.remote_cfg_name()
            );
        }
        periodicity
    }

    async fn compute(&self) -> Result<PeriodicityToGroups> {
        let remote_attr = self.config.remote_query_attr();
        let forced_attr = self.config.remote_forced_periodicity_attr.as_str();
        let entries = self
            .store
            .search(
                &self.config.directory.groups_dn,
                &Filter::present(remote_attr),
                &[remote_attr, forced_attr],
                None,
            )
            .await?;

        let mut map = PeriodicityToGroups::new();
        for entry in entries {
            let (Some(id), Some(remote)) = (self.config.dn_to_sgroup_id(&entry.dn), entry.first(remote_attr)) else {
                continue;
            };
            if let Some(periodicity) = self.periodicity(&id, remote, entry.first(forced_attr)) {
                map.entry(periodicity).or_default().insert(id);
            }
        }
        info!(
            "{} synchronized groups in {} periodicities",
            map.values().map(|ids| ids.len()).sum::<usize>(),
            map.len()
        );
        Ok(map)
    }
}
