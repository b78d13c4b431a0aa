use audit::SgroupLogs;
use authz::SgroupAndRight;
use directory::{Filter, NO_ATTRS};
use remote_query::{RemoteQuery, TestRemoteQuery};
use sgroups::{
    parse_direct_url, DnsOpts, GroupId, LoggedUser, Mright, Result, Right, SgroupsError,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::models::{RemoteQueryDef, SgroupAndMoreOut, SgroupOutMore, SgroupsWithAttrs, Subjects, SubjectsAndCount};
use crate::SgroupsService;

impl SgroupsService {
    fn children_filter(&self, id: &GroupId) -> Filter {
        Filter::prefix("cn", id.as_str())
    }

    /// Direct children of a stem, grandchildren excluded
    pub async fn get_children(&self, id: &GroupId) -> Result<SgroupsWithAttrs> {
        debug!("get_children({:?})", id.as_str());
        let entries = self
            .store
            .search(
                &self.config.directory.groups_dn,
                &self.children_filter(id),
                &self.config.sgroup_attr_names(),
                None,
            )
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let child_id = self.config.dn_to_sgroup_id(&entry.dn)?;
                let is_child = &child_id != id && !self.config.stem.is_grandchild(id.as_str(), child_id.as_str());
                is_child.then(|| {
                    let attrs = self.config.sgroup_mono_attrs(&child_id, &entry);
                    (child_id, attrs)
                })
            })
            .collect())
    }

    pub async fn has_children(&self, id: &GroupId) -> Result<bool> {
        let self_dn = self.config.sgroup_id_to_dn(id);
        let filter = Filter::and2(
            self.children_filter(id),
            Filter::negate(Filter::eq(directory::ENTRY_DN, self_dn.into_string())),
        );
        let found = self
            .store
            .search(&self.config.directory.groups_dn, &filter, &[NO_ATTRS], Some(1))
            .await?;
        Ok(!found.is_empty())
    }

    /// Everything displayed for an sgroup
    pub async fn get_sgroup(&self, user: &LoggedUser, id: &GroupId) -> Result<SgroupAndMoreOut> {
        info!("get_sgroup({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;

        let direct_attr = self.config.direct_attr(Mright::Member);
        let remote_attr = self.config.remote_query_attr();
        let forced_attr = self.config.remote_forced_periodicity_attr.as_str();
        let mut wanted_attrs = vec![direct_attr.as_str(), remote_attr, forced_attr];
        wanted_attrs.extend(self.config.sgroup_attr_names());
        let entry = self
            .store
            .read(self.config.sgroup_id_to_dn(id).as_str(), &wanted_attrs)
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;

        let (right, parents) = self.resolver.effective_right_and_ancestors(user, id).await?;
        let attrs = self.config.sgroup_mono_attrs(id, &entry);

        let more = if self.config.stem.is_stem(id.as_str()) {
            SgroupOutMore::Stem {
                children: self.get_children(id).await?,
            }
        } else if let Some(remote) = entry.first(remote_attr) {
            SgroupOutMore::SynchronizedGroup {
                remote_query: RemoteQueryDef {
                    query: remote.parse()?,
                    forced_periodicity: entry.first(forced_attr).map(|p| p.parse()).transpose()?,
                },
            }
        } else {
            let dns: DnsOpts = entry
                .values(&direct_attr)
                .iter()
                .filter_map(|url| parse_direct_url(url))
                .collect();
            SgroupOutMore::Group {
                direct_members: self.get_subjects(&dns, None, None).await?,
            }
        };
        Ok(SgroupAndMoreOut {
            attrs,
            right,
            parents,
            more,
        })
    }

    /// Parents with the user right on each, nearest first
    pub async fn get_parents(&self, user: &LoggedUser, id: &GroupId) -> Result<Vec<SgroupAndRight>> {
        self.validate_sgroup_id(id)?;
        let (_, parents) = self.resolver.effective_right_and_ancestors(user, id).await?;
        Ok(parents)
    }

    /// Subjects having a direct right on the sgroup, per right
    pub async fn get_direct_rights(&self, user: &LoggedUser, id: &GroupId) -> Result<BTreeMap<Right, Subjects>> {
        debug!("get_direct_rights({:?})", id.as_str());
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Reader)
            .await?;

        let mut rights = BTreeMap::new();
        for right in Right::ALL {
            let dns = self.engine.read_direct_mright(id, right.to_mright()).await?;
            if !dns.is_empty() {
                rights.insert(right, self.get_subjects(&dns, None, None).await?);
            }
        }
        Ok(rights)
    }

    /// Flattened subjects of a group, optionally filtered by a search term
    ///
    /// `size_limit` applies to each subject source.
    pub async fn get_flattened_mright(
        &self,
        user: &LoggedUser,
        id: &GroupId,
        mright: Mright,
        search_token: Option<&str>,
        size_limit: Option<usize>,
    ) -> Result<SubjectsAndCount> {
        debug!("get_flattened_mright({:?}, {})", id.as_str(), mright);
        self.validate_sgroup_id(id)?;
        if self.config.stem.is_stem(id.as_str()) {
            return Err(SgroupsError::InvalidId {
                id: id.to_string(),
                reason: "flattened subjects are only available for groups".to_string(),
            });
        }
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Reader)
            .await?;

        let attr = self.config.flattened_attr(mright);
        let entry = self
            .store
            .read(self.config.sgroup_id_to_dn(id).as_str(), &[attr])
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;
        let dns: DnsOpts = entry
            .values(attr)
            .iter()
            .filter(|dn| !dn.is_empty())
            .map(|dn| (dn.as_str().into(), Default::default()))
            .collect();
        Ok(SubjectsAndCount {
            count: dns.len(),
            subjects: self.get_subjects(&dns, search_token, size_limit).await?,
        })
    }

    /// Filter of the sgroups on which the user has `right`, directly or through a stem
    async fn user_right_filter(&self, user_dn: &sgroups::SubjectId, right: Right) -> Result<Option<Filter>> {
        let stems = self.resolver.stems_with_user_right(user_dn, right).await?;
        if stems.iter().any(|stem| stem.as_str() == self.config.stem.root_id) {
            // everything is below the root
            return Ok(None);
        }
        let mut filters = vec![self.resolver.user_has_direct_right_filter(user_dn, right)];
        filters.extend(stems.iter().map(|stem| self.children_filter(stem)));
        Ok(Some(Filter::or(filters)))
    }

    async fn search_sgroups_with_attrs(&self, filter: &Filter, size_limit: Option<usize>) -> Result<SgroupsWithAttrs> {
        let entries = self
            .store
            .search(
                &self.config.directory.groups_dn,
                filter,
                &self.config.sgroup_attr_names(),
                size_limit,
            )
            .await?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let id = self.config.dn_to_sgroup_id(&entry.dn)?;
                let attrs = self.config.sgroup_mono_attrs(&id, &entry);
                Some((id, attrs))
            })
            .collect())
    }

    /// Sgroups matching the search term on which the user has `right`
    pub async fn search_sgroups(
        &self,
        user: &LoggedUser,
        right: Right,
        term: &str,
        size_limit: Option<usize>,
    ) -> Result<SgroupsWithAttrs> {
        info!("search_sgroups({:?}, {}) by {}", term, right, user);
        let mut term_filter = self.sgroup_term_filter(term)?;
        let tokens: Vec<&str> = term.split_whitespace().collect();
        if tokens.len() > 1 {
            // also match when each word matches
            let each = tokens
                .iter()
                .map(|token| self.sgroup_term_filter(token))
                .collect::<Result<Vec<_>>>()?;
            term_filter = Filter::or(vec![term_filter, Filter::and(each)]);
        }

        let filter = match self.resolver.user_dn(user) {
            None => term_filter,
            Some(user_dn) => match self.user_right_filter(&user_dn, right).await? {
                Some(right_filter) => Filter::and2(right_filter, term_filter),
                None => term_filter,
            },
        };
        self.search_sgroups_with_attrs(&filter, size_limit).await
    }

    /// Groups on which the user has a direct `updater` or `admin` right
    pub async fn mygroups(&self, user: &LoggedUser) -> Result<SgroupsWithAttrs> {
        let uid = self.require_user(user, "mygroups")?;
        let user_dn = self.config.people_id_to_dn(uid);
        let filter = self.resolver.user_has_direct_right_filter(&user_dn, Right::Updater);
        let mut groups = self.search_sgroups_with_attrs(&filter, None).await?;
        groups.retain(|id, _| !self.config.stem.is_stem(id.as_str()));
        Ok(groups)
    }

    pub async fn get_sgroup_logs(&self, user: &LoggedUser, id: &GroupId, bytes: u64, sync: bool) -> Result<SgroupLogs> {
        debug!("get_sgroup_logs({:?}, {})", id.as_str(), bytes);
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Admin)
            .await?;
        self.audit.read_logs(id, bytes, sync).await
    }

    /// Run a remote query without storing it
    pub async fn test_remote_query(&self, user: &LoggedUser, id: &GroupId, remote: &RemoteQuery) -> Result<TestRemoteQuery> {
        info!("test_remote_query({:?}, {}) by {}", id.as_str(), remote, user);
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Updater)
            .await?;
        self.remotes.test_remote_query(remote).await
    }
}
