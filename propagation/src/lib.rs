//! Flattened subjects of sgroups.
//!
//! Each (sgroup, mright) has a direct attribute (directory URLs, or a remote query for
//! synchronized groups) and a flattened attribute holding the DNs of every subject, sgroup
//! members included. The flattened attribute is recomputed from the direct state and only the
//! differences are written. When the members of a group change, the groups using it are
//! recomputed too.

use audit::AuditLogger;
use chrono::Utc;
use directory::{DirectoryStore, Filter, Modification, NO_ATTRS};
use remote_query::{RemoteExecutor, RemoteQuery};
use sgroups::{
    parse_direct_url, Config, DirectOptions, DnsOpts, GroupId, Mright, Result, SgroupsError,
    SubjectId,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Value stored in empty `member` attributes, never reported as a subject
pub const EMPTY_MEMBER_SENTINEL: &str = "";

/// Recomputations of one (sgroup, mright) allowed in one `propagate` call
const MAX_VISITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpResult {
    Modified,
    Unchanged,
}

pub struct Engine {
    config: Arc<Config>,
    store: Arc<dyn DirectoryStore>,
    remotes: Arc<RemoteExecutor>,
    audit: Arc<AuditLogger>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DirectoryStore>,
        remotes: Arc<RemoteExecutor>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            config,
            store,
            remotes,
            audit,
        }
    }

    /// Subjects stored in the direct attribute, ignoring any remote query
    pub async fn read_direct_mright(&self, id: &GroupId, mright: Mright) -> Result<DnsOpts> {
        let attr = self.config.direct_attr(mright);
        let entry = self
            .store
            .read(self.config.sgroup_id_to_dn(id).as_str(), &[attr.as_str()])
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;
        Ok(entry
            .values(&attr)
            .iter()
            .filter_map(|url| {
                let parsed = parse_direct_url(url);
                if parsed.is_none() {
                    warn!("ignoring invalid direct URL {:?} on {:?}", url, id.as_str());
                }
                parsed
            })
            .collect())
    }

    /// Direct subjects: result of the remote query for synchronized groups, direct URLs otherwise
    pub async fn resolve_direct(&self, id: &GroupId, mright: Mright) -> Result<DnsOpts> {
        if mright == Mright::Member {
            let attr = self.config.remote_query_attr();
            let entry = self
                .store
                .read(self.config.sgroup_id_to_dn(id).as_str(), &[attr])
                .await?
                .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;
            if let Some(remote) = entry.first(attr) {
                let remote: RemoteQuery = remote.parse()?;
                let subjects = self.remotes.query_subjects(&remote).await?;
                return Ok(subjects
                    .into_iter()
                    .map(|dn| (dn, DirectOptions::default()))
                    .collect());
            }
        }
        self.read_direct_mright(id, mright).await
    }

    async fn read_flattened_raw(&self, dn: &str, mright: Mright) -> Result<Option<Vec<String>>> {
        let attr = self.config.flattened_attr(mright);
        Ok(self
            .store
            .read(dn, &[attr])
            .await?
            .map(|entry| entry.values(attr).to_vec()))
    }

    /// Flattened members of the sgroup `dn`, empty when it does not exist
    pub async fn flattened_member_set(&self, dn: &SubjectId) -> Result<BTreeSet<SubjectId>> {
        Ok(self
            .read_flattened_raw(dn.as_str(), Mright::Member)
            .await?
            .unwrap_or_default()
            .into_iter()
            .filter(|v| v != EMPTY_MEMBER_SENTINEL)
            .map(SubjectId::from)
            .collect())
    }

    /// Update the flattened attribute of (`id`, `mright`) from its direct subjects
    pub async fn recompute_flattened(&self, id: &GroupId, mright: Mright) -> Result<UpResult> {
        debug!("recompute_flattened({:?}, {})", id.as_str(), mright);
        let group_dn = self.config.sgroup_id_to_dn(id);
        let now = Utc::now();
        let direct = self.resolve_direct(id, mright).await?;

        let mut flattened: BTreeSet<String> = BTreeSet::new();
        for (dn, opts) in direct {
            if opts.enddate.is_some_and(|enddate| enddate <= now) {
                debug!("{} expired on {:?}", dn, id.as_str());
                continue;
            }
            if self.config.dn_is_sgroup(&dn) {
                flattened.extend(
                    self.flattened_member_set(&dn)
                        .await?
                        .into_iter()
                        .map(SubjectId::into_string),
                );
            }
            flattened.insert(dn.into_string());
        }
        let new_count = flattened.len();
        if flattened.is_empty() && mright == Mright::Member {
            flattened.insert(EMPTY_MEMBER_SENTINEL.to_string());
        }

        let current: BTreeSet<String> = self
            .read_flattened_raw(group_dn.as_str(), mright)
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?
            .into_iter()
            .collect();
        let to_add: Vec<String> = flattened.difference(&current).cloned().collect();
        let to_remove: Vec<String> = current.difference(&flattened).cloned().collect();
        if to_add.is_empty() && to_remove.is_empty() {
            return Ok(UpResult::Unchanged);
        }

        let attr = self.config.flattened_attr(mright);
        let mut mods = Vec::new();
        if !to_add.is_empty() {
            mods.push(Modification::add(attr, to_add.clone()));
        }
        if !to_remove.is_empty() {
            mods.push(Modification::delete(attr, to_remove.clone()));
        }
        self.store.modify(group_dn.as_str(), &mods).await?;
        info!(
            "{:?} {}: {} added, {} removed",
            id.as_str(),
            mright,
            to_add.len(),
            to_remove.len()
        );

        let strip = |dns: Vec<String>| -> Vec<String> {
            dns.into_iter().filter(|dn| dn != EMPTY_MEMBER_SENTINEL).collect()
        };
        // the flattened attribute is written: dependents must still be recomputed
        if let Err(e) = self
            .audit
            .log_sync(id, mright, new_count, strip(to_add), strip(to_remove))
            .await
        {
            warn!("audit of {:?} {} failed: {}", id.as_str(), mright, e);
        }
        Ok(UpResult::Modified)
    }

    /// Sgroups (and the mright) whose subjects include the members of `id`
    pub async fn dependents(&self, id: &GroupId) -> Result<Vec<(GroupId, Mright)>> {
        let group_dn = self.config.sgroup_id_to_dn(id);
        let mut dependents = Vec::new();
        for mright in Mright::ALL {
            let filter = Filter::eq(self.config.flattened_attr(mright), group_dn.as_str());
            for entry in self
                .store
                .search(&self.config.directory.groups_dn, &filter, &[NO_ATTRS], None)
                .await?
            {
                match self.config.dn_to_sgroup_id(&entry.dn) {
                    Some(dependent) if &dependent != id => dependents.push((dependent, mright)),
                    _ => {}
                }
            }
        }
        Ok(dependents)
    }

    /// Recompute the seeds, then every sgroup depending on a modified member set
    pub async fn propagate(&self, seeds: Vec<(GroupId, Mright)>) -> Result<()> {
        let mut todo: VecDeque<(GroupId, Mright)> = seeds.into();
        let mut visits: HashMap<(GroupId, Mright), u32> = HashMap::new();

        while let Some(item) = todo.pop_front() {
            let count = visits.entry(item.clone()).or_insert(0);
            *count += 1;
            if *count > MAX_VISITS {
                warn!(
                    "{:?} {} recomputed {} times, probably a membership cycle, skipping",
                    item.0.as_str(),
                    item.1,
                    MAX_VISITS
                );
                continue;
            }
            let (id, mright) = &item;
            let result = self.recompute_flattened(id, *mright).await?;
            if *mright == Mright::Member && result == UpResult::Modified {
                for dependent in self.dependents(id).await? {
                    if !todo.contains(&dependent) {
                        todo.push_back(dependent);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fails when adding the sgroup `candidate` as a member of `target` would create a cycle
    pub async fn check_not_recursive(&self, target: &GroupId, candidate: &SubjectId) -> Result<()> {
        let recursive = || SgroupsError::RecursiveMembership {
            id: target.to_string(),
            subject: candidate.to_string(),
        };
        if self.config.dn_to_sgroup_id(candidate.as_str()).as_ref() == Some(target) {
            return Err(recursive());
        }
        let target_dn = self.config.sgroup_id_to_dn(target);
        if self.flattened_member_set(candidate).await?.contains(&target_dn) {
            return Err(recursive());
        }
        Ok(())
    }
}
