//! Rights on sgroups, including rights inherited from ancestor stems.
//!
//! A user has a right on an sgroup when its DN is in the flattened attribute of that right (or a
//! better one) on the sgroup itself or on any of its parent stems. Rights are ordered
//! `reader < updater < admin`, so `admin` on stem `a.` gives `admin` on every sgroup below `a.`.

pub mod types;

use directory::{DirectoryStore, Entry, Filter, ENTRY_DN, NO_ATTRS};
use sgroups::{
    parse_direct_url, Config, GroupId, LoggedUser, Result, Right, SgroupsError, SubjectId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub use types::SgroupAndRight;

/// Resolves the rights of users on sgroups
pub struct RightsResolver {
    config: Arc<Config>,
    store: Arc<dyn DirectoryStore>,
}

impl RightsResolver {
    pub fn new(config: Arc<Config>, store: Arc<dyn DirectoryStore>) -> Self {
        Self { config, store }
    }

    /// `None` for trusted admins, who have every right
    pub fn user_dn(&self, user: &LoggedUser) -> Option<SubjectId> {
        match user {
            LoggedUser::TrustedAdmin => None,
            LoggedUser::User(user) => Some(self.config.people_id_to_dn(user)),
        }
    }

    /// Flattened attributes of the rights at least as strong as `right`, best first
    pub fn right_attrs(&self, right: Right) -> Vec<&str> {
        right
            .allowed_rights()
            .into_iter()
            .map(|r| self.config.flattened_attr(r.to_mright()))
            .collect()
    }

    /// Best right directly given to `user_dn` on this entry (inheritance not included)
    pub fn direct_right(&self, entry: &Entry, user_dn: &SubjectId) -> Option<Right> {
        Right::Reader.allowed_rights().into_iter().find(|right| {
            let mright = right.to_mright();
            let in_flattened = entry
                .values(self.config.flattened_attr(mright))
                .iter()
                .any(|dn| dn == user_dn.as_str());
            in_flattened
                || entry
                    .values(&self.config.direct_attr(mright))
                    .iter()
                    .filter_map(|url| parse_direct_url(url))
                    .any(|(dn, _)| &dn == user_dn)
        })
    }

    /// Sgroups on which `user_dn` has `right` (or better) without inheritance
    pub fn user_has_direct_right_filter(&self, user_dn: &SubjectId, right: Right) -> Filter {
        Filter::or(
            self.right_attrs(right)
                .into_iter()
                .map(|attr| Filter::eq(attr, user_dn.as_str()))
                .collect(),
        )
    }

    fn sgroups_filter(&self, ids: &[GroupId]) -> Filter {
        Filter::or(
            ids.iter()
                .map(|id| Filter::eq(ENTRY_DN, self.config.sgroup_id_to_dn(id).into_string()))
                .collect(),
        )
    }

    /// Parents of `id` with the user right on each, nearest parent first
    ///
    /// The right displayed for a parent is its own direct right merged with the rights found on
    /// the stems above it.
    pub async fn get_parents(&self, user: &LoggedUser, id: &GroupId) -> Result<Vec<SgroupAndRight>> {
        let parents_id: Vec<GroupId> = self
            .config
            .stem
            .parent_stems(id.as_str())
            .into_iter()
            .map(GroupId::from)
            .collect();
        if parents_id.is_empty() {
            return Ok(Vec::new());
        }

        let user_dn = self.user_dn(user);
        let mut wanted_attrs = self.config.sgroup_attr_names();
        if user_dn.is_some() {
            wanted_attrs.extend(self.right_attrs(Right::Reader));
        }
        let mut entries: HashMap<String, Entry> = self
            .store
            .search(
                &self.config.directory.groups_dn,
                &self.sgroups_filter(&parents_id),
                &wanted_attrs,
                None,
            )
            .await?
            .into_iter()
            .map(|e| (e.dn.clone(), e))
            .collect();

        let mut best: Option<Right> = None;
        let mut parents = Vec::with_capacity(parents_id.len());
        for parent_id in parents_id.into_iter().rev() {
            let dn = self.config.sgroup_id_to_dn(&parent_id);
            let Some(entry) = entries.remove(dn.as_str()) else {
                continue;
            };
            let right = match &user_dn {
                None => Some(Right::Admin),
                Some(user_dn) => self.direct_right(&entry, user_dn),
            };
            best = Right::max(best, right);
            parents.push(SgroupAndRight {
                attrs: self.config.sgroup_mono_attrs(&parent_id, &entry),
                sgroup_id: parent_id,
                right: best,
            });
        }
        parents.reverse();
        Ok(parents)
    }

    /// Effective right of the user on `id`, and its parents with the inherited rights
    ///
    /// Fails with `NoRight` when the user has no right at all.
    pub async fn effective_right_and_ancestors(
        &self,
        user: &LoggedUser,
        id: &GroupId,
    ) -> Result<(Right, Vec<SgroupAndRight>)> {
        let Some(user_dn) = self.user_dn(user) else {
            // parents are still needed for their attributes
            return Ok((Right::Admin, self.get_parents(user, id).await?));
        };
        let dn = self.config.sgroup_id_to_dn(id);
        let entry = self
            .store
            .read(dn.as_str(), &self.right_attrs(Right::Reader))
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;
        let self_right = self.direct_right(&entry, &user_dn);

        let parents = self.get_parents(user, id).await?;
        let best = parents
            .iter()
            .fold(self_right, |best, parent| Right::max(best, parent.right));
        debug!("best right of {} on {:?} => {:?}", user, id.as_str(), best);

        match best {
            Some(right) => Ok((right, parents)),
            None => Err(SgroupsError::NoRight {
                id: id.to_string(),
                right: Right::Reader,
            }),
        }
    }

    async fn has_right_on_one_of(
        &self,
        user: &LoggedUser,
        ids: Vec<GroupId>,
        right: Right,
    ) -> Result<bool> {
        let Some(user_dn) = self.user_dn(user) else {
            return Ok(true);
        };
        if ids.is_empty() {
            return Ok(false);
        }
        let filter = Filter::and2(
            self.sgroups_filter(&ids),
            self.user_has_direct_right_filter(&user_dn, right),
        );
        let found = self
            .store
            .search(&self.config.directory.groups_dn, &filter, &[NO_ATTRS], Some(1))
            .await?;
        Ok(!found.is_empty())
    }

    /// Whether the user has `right` or better on `id` or any of its parents, in one search
    pub async fn authorize(&self, user: &LoggedUser, id: &GroupId, right: Right) -> Result<bool> {
        let mut ids = vec![id.clone()];
        ids.extend(self.config.stem.parent_stems(id.as_str()).into_iter().map(GroupId::from));
        self.has_right_on_one_of(user, ids, right).await
    }

    pub async fn check_right_on_self_or_any_parents(
        &self,
        user: &LoggedUser,
        id: &GroupId,
        right: Right,
    ) -> Result<()> {
        if self.authorize(user, id, right).await? {
            Ok(())
        } else {
            Err(SgroupsError::NoRight {
                id: id.to_string(),
                right,
            })
        }
    }

    /// Used on creation, when the sgroup itself does not exist yet
    pub async fn check_right_on_any_parents(
        &self,
        user: &LoggedUser,
        id: &GroupId,
        right: Right,
    ) -> Result<()> {
        let parents = self
            .config
            .stem
            .parent_stems(id.as_str())
            .into_iter()
            .map(GroupId::from)
            .collect();
        if self.has_right_on_one_of(user, parents, right).await? {
            Ok(())
        } else {
            Err(SgroupsError::NoRight {
                id: id.to_string(),
                right,
            })
        }
    }

    /// Stems on which `user_dn` has `right` without inheritance
    pub async fn stems_with_user_right(&self, user_dn: &SubjectId, right: Right) -> Result<Vec<GroupId>> {
        let entries = self
            .store
            .search(
                &self.config.directory.groups_dn,
                &self.user_has_direct_right_filter(user_dn, right),
                &[NO_ATTRS],
                None,
            )
            .await?;
        Ok(entries
            .iter()
            .filter_map(|e| self.config.dn_to_sgroup_id(&e.dn))
            .filter(|id| self.config.stem.is_stem(id.as_str()))
            .collect())
    }
}
