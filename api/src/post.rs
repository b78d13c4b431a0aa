use directory::{Attrs, Modification};
use propagation::EMPTY_MEMBER_SENTINEL;
use remote_query::RemoteQuery;
use serde_json::{json, Value};
use sgroups::{
    to_direct_url, DnsOpts, GroupId, LoggedUser, MonoAttrs, Mright, MyMod, MyMods, Periodicity,
    Result, Right, SgroupsError,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::SgroupsService;

/// Replacements with more values are applied as additions and deletions
const MAX_REPLACE_VALUES: usize = 4;

/// Right needed to apply these modifications
pub(crate) fn my_mods_to_right(my_mods: &MyMods) -> Right {
    if my_mods.keys().any(|mright| *mright > Mright::Reader) {
        Right::Admin
    } else {
        Right::Updater
    }
}

fn difference(a: &DnsOpts, b: &DnsOpts) -> DnsOpts {
    a.iter()
        .filter(|(dn, _)| !b.contains_key(*dn))
        .map(|(dn, opts)| (dn.clone(), opts.clone()))
        .collect()
}

impl SgroupsService {
    /// Create the root stem entry if missing. Returns whether it was created.
    pub async fn init_root(&self) -> Result<bool> {
        let root_dn = self.config.sgroup_id_to_dn(&GroupId::new(self.config.stem.root_id.clone()));
        if self.store.read(root_dn.as_str(), &[]).await?.is_some() {
            return Ok(false);
        }
        let mut attrs = Attrs::new();
        attrs.insert("cn".to_string(), vec![self.config.stem.root_id.clone()]);
        attrs.insert("ou".to_string(), vec!["Racine".to_string()]);
        self.store.add(root_dn.as_str(), attrs).await?;
        info!("Created root stem {}", root_dn);
        Ok(true)
    }

    async fn log_action(&self, user: &LoggedUser, id: &GroupId, action: &str, msg: Option<&str>, data: Value) -> Result<()> {
        self.audit.log_action(id, user, action, msg, data).await
    }

    async fn current_sgroup_attrs(&self, id: &GroupId) -> Result<MonoAttrs> {
        let entry = self
            .store
            .read(self.config.sgroup_id_to_dn(id).as_str(), &self.config.sgroup_attr_names())
            .await?
            .ok_or_else(|| SgroupsError::SgroupNotFound(id.to_string()))?;
        Ok(entry
            .attrs
            .into_iter()
            .filter_map(|(name, values)| Some((name, values.into_iter().next()?)))
            .collect())
    }

    /// Create a stem or a group below an existing stem
    pub async fn create(&self, user: &LoggedUser, id: &GroupId, attrs: MonoAttrs) -> Result<()> {
        info!("create({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;
        self.validate_sgroup_attrs(&attrs)?;
        let parent = self
            .config
            .stem
            .parent_stem(id.as_str())
            .map(GroupId::from)
            .ok_or_else(|| SgroupsError::Forbidden("the root stem is created by init".to_string()))?;
        if self.store.read(self.config.sgroup_id_to_dn(&parent).as_str(), &[directory::NO_ATTRS]).await?.is_none() {
            return Err(SgroupsError::SgroupNotFound(parent.to_string()));
        }
        self.resolver.check_right_on_any_parents(user, id, Right::Admin).await?;

        let mut entry: Attrs = attrs
            .iter()
            .map(|(name, value)| (name.clone(), vec![value.clone()]))
            .collect();
        entry.insert("cn".to_string(), vec![id.to_string()]);
        if !self.config.stem.is_stem(id.as_str()) {
            entry.insert(
                self.config.flattened_attr(Mright::Member).to_string(),
                vec![EMPTY_MEMBER_SENTINEL.to_string()],
            );
        }
        self.store
            .add(self.config.sgroup_id_to_dn(id).as_str(), entry)
            .await?;
        self.log_action(user, id, "create", None, serde_json::to_value(&attrs)?).await
    }

    /// Delete a group, or a stem without children
    pub async fn delete(&self, user: &LoggedUser, id: &GroupId) -> Result<()> {
        info!("delete({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Admin)
            .await?;
        if self.config.stem.is_stem(id.as_str()) && self.has_children(id).await? {
            return Err(SgroupsError::DeleteNonEmptyStem(id.to_string()));
        }
        let current = self.current_sgroup_attrs(id).await?;
        self.store
            .delete(self.config.sgroup_id_to_dn(id).as_str())
            .await?;
        self.log_action(user, id, "delete", None, serde_json::to_value(&current)?).await
    }

    /// Modify the displayed attributes (`ou`, `description`...)
    pub async fn modify_attrs(&self, user: &LoggedUser, id: &GroupId, attrs: MonoAttrs) -> Result<()> {
        info!("modify_attrs({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;
        self.validate_sgroup_attrs(&attrs)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Updater)
            .await?;

        let current = self.current_sgroup_attrs(id).await?;
        let modified: MonoAttrs = attrs
            .into_iter()
            .filter(|(name, value)| current.get(name) != Some(value))
            .collect();
        if modified.is_empty() {
            return Ok(());
        }
        let mods: Vec<Modification> = modified
            .iter()
            .map(|(name, value)| {
                let values = if value.is_empty() { vec![] } else { vec![value.clone()] };
                Modification::replace(name.clone(), values)
            })
            .collect();
        self.store
            .modify(self.config.sgroup_id_to_dn(id).as_str(), &mods)
            .await?;
        self.log_action(user, id, "modify_attrs", None, serde_json::to_value(&modified)?).await
    }

    /// Sgroup subjects must be readable by the user, and must not include the modified group
    async fn check_group_subjects(&self, user: &LoggedUser, id: &GroupId, my_mods: &MyMods) -> Result<()> {
        for (mright, submods) in my_mods {
            for (my_mod, dns) in submods {
                if *my_mod == MyMod::Delete {
                    continue;
                }
                for dn in dns.keys().filter(|dn| self.config.dn_is_sgroup(dn)) {
                    let subject_id = self
                        .config
                        .dn_to_sgroup_id(dn.as_str())
                        .ok_or_else(|| SgroupsError::SgroupNotFound(dn.to_string()))?;
                    if *mright == Mright::Member {
                        self.engine.check_not_recursive(id, dn).await?;
                    }
                    if !self.resolver.authorize(user, &subject_id, Right::Reader).await? {
                        return Err(SgroupsError::NoRight {
                            id: subject_id.to_string(),
                            right: Right::Reader,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    async fn simplify_submods(&self, id: &GroupId, mright: Mright, mut submods: BTreeMap<MyMod, DnsOpts>) -> Result<BTreeMap<MyMod, DnsOpts>> {
        let long_replace = submods
            .get(&MyMod::Replace)
            .is_some_and(|replace| replace.len() > MAX_REPLACE_VALUES);
        if long_replace {
            if let Some(replace) = submods.remove(&MyMod::Replace) {
                let current = self.engine.read_direct_mright(id, mright).await?;
                let to_add = difference(&replace, &current);
                let to_delete = difference(&current, &replace);
                debug!("replace on {:?} {} => {} adds, {} deletes", id.as_str(), mright, to_add.len(), to_delete.len());
                submods.entry(MyMod::Add).or_default().extend(to_add);
                submods.entry(MyMod::Delete).or_default().extend(to_delete);
            }
        }
        submods.retain(|my_mod, dns| *my_mod == MyMod::Replace || !dns.is_empty());
        Ok(submods)
    }

    async fn check_and_simplify_mods(&self, id: &GroupId, my_mods: MyMods) -> Result<MyMods> {
        let is_stem = self.config.stem.is_stem(id.as_str());
        let mut simplified = MyMods::new();
        for (mright, submods) in my_mods {
            if mright == Mright::Member && is_stem {
                return Err(SgroupsError::StemNoMembers(id.to_string()));
            }
            if mright == Mright::Member && self.has_remote_query(id).await? {
                return Err(SgroupsError::SynchronizedGroupMembers(id.to_string()));
            }
            let submods = self.simplify_submods(id, mright, submods).await?;
            if !submods.is_empty() {
                simplified.insert(mright, submods);
            }
        }
        Ok(simplified)
    }

    async fn has_remote_query(&self, id: &GroupId) -> Result<bool> {
        let remote_attr = self.config.remote_query_attr();
        let entry = self
            .store
            .read(self.config.sgroup_id_to_dn(id).as_str(), &[remote_attr])
            .await?;
        Ok(entry.is_some_and(|entry| entry.has(remote_attr)))
    }

    async fn modify_direct_mrights(&self, id: &GroupId, my_mods: &MyMods) -> Result<()> {
        let mut mods = Vec::new();
        for (mright, submods) in my_mods {
            let attr = self.config.direct_attr(*mright);
            let current = self.engine.read_direct_mright(id, *mright).await?;
            let urls = |dns: &DnsOpts| -> Vec<String> {
                dns.iter().map(|(dn, opts)| to_direct_url(dn, opts)).collect()
            };
            for (my_mod, dns) in submods {
                match my_mod {
                    MyMod::Add => {
                        // a new enddate replaces the stored one
                        let outdated: DnsOpts = current
                            .iter()
                            .filter(|(dn, opts)| dns.get(*dn).is_some_and(|new| new != *opts))
                            .map(|(dn, opts)| (dn.clone(), opts.clone()))
                            .collect();
                        if !outdated.is_empty() {
                            mods.push(Modification::delete(attr.clone(), urls(&outdated)));
                        }
                        mods.push(Modification::add(attr.clone(), urls(dns)));
                    }
                    MyMod::Delete => {
                        // delete the stored values, whatever their options
                        let stored: DnsOpts = current
                            .iter()
                            .filter(|(dn, _)| dns.contains_key(*dn))
                            .map(|(dn, opts)| (dn.clone(), opts.clone()))
                            .collect();
                        if !stored.is_empty() {
                            mods.push(Modification::delete(attr.clone(), urls(&stored)));
                        }
                    }
                    MyMod::Replace => mods.push(Modification::replace(attr.clone(), urls(dns))),
                }
            }
        }
        if mods.is_empty() {
            return Ok(());
        }
        self.store
            .modify(self.config.sgroup_id_to_dn(id).as_str(), &mods)
            .await?;
        Ok(())
    }

    /// Add, delete or replace direct members or rights, then update the flattened subjects
    pub async fn modify_members_or_rights(
        &self,
        user: &LoggedUser,
        id: &GroupId,
        my_mods: MyMods,
        msg: Option<&str>,
    ) -> Result<()> {
        info!("modify_members_or_rights({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, my_mods_to_right(&my_mods))
            .await?;
        self.check_group_subjects(user, id, &my_mods).await?;
        let my_mods = self.check_and_simplify_mods(id, my_mods).await?;
        if my_mods.is_empty() {
            // a replace simplified into nothing
            return Ok(());
        }

        self.modify_direct_mrights(id, &my_mods).await?;
        self.log_action(user, id, "modify_members_or_rights", msg, serde_json::to_value(&my_mods)?)
            .await?;

        let seeds = my_mods.keys().map(|mright| (id.clone(), *mright)).collect();
        self.engine.propagate(seeds).await
    }

    /// Set (or remove with `None`) the remote query of a group, then synchronize its members
    pub async fn modify_remote_query(
        &self,
        user: &LoggedUser,
        id: &GroupId,
        remote: Option<RemoteQuery>,
        forced_periodicity: Option<Periodicity>,
        msg: Option<&str>,
    ) -> Result<()> {
        info!("modify_remote_query({:?}) by {}", id.as_str(), user);
        self.validate_sgroup_id(id)?;
        if self.config.stem.is_stem(id.as_str()) {
            return Err(SgroupsError::StemNoMembers(id.to_string()));
        }
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Admin)
            .await?;
        if let Some(remote) = &remote {
            self.remotes.validate(remote)?;
        }

        let remote_value: Vec<String> = remote.iter().map(|r| r.to_string()).collect();
        let periodicity_value: Vec<String> = match (&remote, forced_periodicity) {
            (Some(_), Some(periodicity)) => vec![periodicity.to_string()],
            _ => vec![],
        };
        self.store
            .modify(
                self.config.sgroup_id_to_dn(id).as_str(),
                &[
                    Modification::replace(self.config.remote_query_attr(), remote_value.clone()),
                    Modification::replace(
                        self.config.remote_forced_periodicity_attr.clone(),
                        periodicity_value.clone(),
                    ),
                ],
            )
            .await?;
        let data = json!({
            "remote_query": remote_value.first(),
            "forced_periodicity": periodicity_value.first(),
        });
        self.log_action(user, id, "modify_remote_query", msg, data).await?;

        let result = self.engine.propagate(vec![(id.clone(), Mright::Member)]).await;
        // new synchronized group, or another remote
        self.cache.invalidate().await;
        result
    }

    /// Recompute the flattened subjects of these mrights
    pub async fn sync(&self, user: &LoggedUser, id: &GroupId, mrights: &[Mright]) -> Result<()> {
        info!("sync({:?}, {:?}) by {}", id.as_str(), mrights, user);
        self.validate_sgroup_id(id)?;
        self.resolver
            .check_right_on_self_or_any_parents(user, id, Right::Updater)
            .await?;
        let seeds = mrights.iter().map(|mright| (id.clone(), *mright)).collect();
        self.engine.propagate(seeds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fixture, user, ADMIN};
    use crate::SgroupOutMore;
    use rstest::rstest;
    use sgroups::{DirectOptions, SubjectId};

    fn person(uid: &str) -> SubjectId {
        SubjectId::new(format!("uid={},ou=people,dc=nodomain", uid))
    }

    fn mods(mright: Mright, my_mod: MyMod, dns: &[&SubjectId]) -> MyMods {
        let mut mods = MyMods::new();
        mods.entry(mright).or_default().insert(
            my_mod,
            dns.iter().map(|dn| ((*dn).clone(), DirectOptions::default())).collect(),
        );
        mods
    }

    fn ou(value: &str) -> MonoAttrs {
        [("ou".to_string(), value.to_string())].into()
    }

    #[rstest]
    #[case(Mright::Member, MyMod::Add, Right::Updater)]
    #[case(Mright::Reader, MyMod::Add, Right::Updater)]
    #[case(Mright::Updater, MyMod::Add, Right::Admin)]
    #[case(Mright::Admin, MyMod::Delete, Right::Admin)]
    fn test_my_mods_to_right(#[case] mright: Mright, #[case] my_mod: MyMod, #[case] expected: Right) {
        assert_eq!(my_mods_to_right(&mods(mright, my_mod, &[&person("u1")])), expected);
    }

    #[tokio::test]
    async fn test_create_checks() {
        let f = fixture().await;
        let admin = user(ADMIN);
        f.service.create(&admin, &GroupId::from("a."), ou("A")).await.unwrap();

        let err = f.service.create(&user("u1"), &GroupId::from("a.b"), ou("B")).await.unwrap_err();
        assert!(matches!(err, SgroupsError::NoRight { right: Right::Admin, .. }));
        let err = f.service.create(&admin, &GroupId::from("x.y"), ou("Y")).await.unwrap_err();
        assert!(matches!(err, SgroupsError::SgroupNotFound(_)));
        let err = f.service.create(&admin, &GroupId::from("a..b"), ou("B")).await.unwrap_err();
        assert!(matches!(err, SgroupsError::InvalidId { .. }));
        let bad_attrs: MonoAttrs = [("owner".to_string(), "x".to_string())].into();
        let err = f.service.create(&admin, &GroupId::from("a.b"), bad_attrs).await.unwrap_err();
        assert!(matches!(err, SgroupsError::InvalidAttrs(_)));
    }

    #[tokio::test]
    async fn test_delete_non_empty_stem() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let stem = GroupId::from("a.");
        f.service.create(&admin, &stem, ou("A")).await.unwrap();
        f.service.create(&admin, &GroupId::from("a.b"), ou("B")).await.unwrap();

        let err = f.service.delete(&admin, &stem).await.unwrap_err();
        assert!(matches!(err, SgroupsError::DeleteNonEmptyStem(_)));

        f.service.delete(&admin, &GroupId::from("a.b")).await.unwrap();
        f.service.delete(&admin, &stem).await.unwrap();
        let children = f.service.get_children(&GroupId::from("")).await.unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn test_recursive_membership_rejected() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        let h = GroupId::from("h");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        f.service.create(&admin, &h, ou("H")).await.unwrap();
        let g_dn = f.service.config().sgroup_id_to_dn(&g);
        let h_dn = f.service.config().sgroup_id_to_dn(&h);

        let err = f
            .service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&g_dn]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::RecursiveMembership { .. }));

        f.service
            .modify_members_or_rights(&admin, &h, mods(Mright::Member, MyMod::Add, &[&g_dn]), None)
            .await
            .unwrap();
        let err = f
            .service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&h_dn]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::RecursiveMembership { .. }));
    }

    #[tokio::test]
    async fn test_members_propagate_to_including_groups() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let x = GroupId::from("x");
        let g = GroupId::from("g");
        f.service.create(&admin, &x, ou("X")).await.unwrap();
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        let x_dn = f.service.config().sgroup_id_to_dn(&x);
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&x_dn]), Some("compose"))
            .await
            .unwrap();
        f.service
            .modify_members_or_rights(&admin, &x, mods(Mright::Member, MyMod::Add, &[&person("u1"), &person("u2")]), None)
            .await
            .unwrap();

        let flattened = f
            .service
            .get_flattened_mright(&admin, &g, Mright::Member, None, None)
            .await
            .unwrap();
        assert_eq!(flattened.count, 3);
        assert!(flattened.subjects.contains_key(person("u2").as_str()));

        f.service
            .modify_members_or_rights(&admin, &x, mods(Mright::Member, MyMod::Delete, &[&person("u2")]), None)
            .await
            .unwrap();
        let flattened = f
            .service
            .get_flattened_mright(&admin, &g, Mright::Member, None, None)
            .await
            .unwrap();
        assert_eq!(flattened.count, 2);

        let logs = f.service.get_sgroup_logs(&admin, &g, 10_000, false).await.unwrap();
        assert_eq!(logs.logs[1]["msg"], "compose");
    }

    #[tokio::test]
    async fn test_stems_have_no_members() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let stem = GroupId::from("s.");
        f.service.create(&admin, &stem, ou("S")).await.unwrap();
        let err = f
            .service
            .modify_members_or_rights(&admin, &stem, mods(Mright::Member, MyMod::Add, &[&person("u1")]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::StemNoMembers(_)));
    }

    #[tokio::test]
    async fn test_rights_needed() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Updater, MyMod::Add, &[&person("u1")]), None)
            .await
            .unwrap();

        let u1 = user("u1");
        f.service
            .modify_members_or_rights(&u1, &g, mods(Mright::Member, MyMod::Add, &[&person("u2")]), None)
            .await
            .unwrap();
        let err = f
            .service
            .modify_members_or_rights(&u1, &g, mods(Mright::Admin, MyMod::Add, &[&person("u2")]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::NoRight { right: Right::Admin, .. }));
        f.service.modify_attrs(&u1, &g, ou("G2")).await.unwrap();
        let err = f.service.delete(&u1, &g).await.unwrap_err();
        assert_eq!(err.kind(), sgroups::ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_long_replace() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        let people: Vec<SubjectId> = ["admin", "u1", "u2", "u3"].iter().map(|u| person(u)).collect();
        let refs: Vec<&SubjectId> = people.iter().collect();
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &refs[..2]), None)
            .await
            .unwrap();
        let others = [person("nobody"), person("zzz")];
        let mut replace = refs[1..].to_vec();
        replace.extend(others.iter());
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Replace, &replace), None)
            .await
            .unwrap();

        let direct = f.service.engine().read_direct_mright(&g, Mright::Member).await.unwrap();
        let direct: Vec<&str> = direct.keys().map(|dn| dn.as_str()).collect();
        assert_eq!(
            direct,
            vec![
                "uid=nobody,ou=people,dc=nodomain",
                "uid=u1,ou=people,dc=nodomain",
                "uid=u2,ou=people,dc=nodomain",
                "uid=u3,ou=people,dc=nodomain",
                "uid=zzz,ou=people,dc=nodomain",
            ]
        );
        let logs = f.service.get_sgroup_logs(&admin, &g, 10_000, false).await.unwrap();
        let last = logs.logs.last().unwrap();
        assert!(last["member"].get("replace").is_none());
        assert_eq!(last["member"]["delete"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enddate_is_replaced() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        let u1 = person("u1");
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&u1]), None)
            .await
            .unwrap();
        let mut with_enddate = MyMods::new();
        let enddate = chrono::Utc::now() + chrono::Duration::days(30);
        let opts = DirectOptions {
            enddate: Some(enddate),
        };
        with_enddate
            .entry(Mright::Member)
            .or_default()
            .insert(MyMod::Add, [(u1.clone(), opts)].into());
        f.service
            .modify_members_or_rights(&admin, &g, with_enddate, None)
            .await
            .unwrap();

        let direct = f.service.engine().read_direct_mright(&g, Mright::Member).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert!(direct[&u1].enddate.is_some());
    }

    #[tokio::test]
    async fn test_remote_query_lifecycle() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        let remote: RemoteQuery = "ldap://localhost/ou=people,dc=nodomain???(|(uid=u1)(uid=u2))".parse().unwrap();
        f.service
            .modify_remote_query(&admin, &g, Some(remote.clone()), Some(Periodicity::EveryHours(1)), None)
            .await
            .unwrap();

        let sgroup = f.service.get_sgroup(&admin, &g).await.unwrap();
        let SgroupOutMore::SynchronizedGroup { remote_query } = &sgroup.more else {
            panic!("synchronized group expected")
        };
        assert_eq!(remote_query.query, remote);
        assert_eq!(remote_query.forced_periodicity, Some(Periodicity::EveryHours(1)));
        let flattened = f
            .service
            .get_flattened_mright(&admin, &g, Mright::Member, None, None)
            .await
            .unwrap();
        assert_eq!(flattened.count, 2);
        assert!(f.service.cache().get().await.unwrap()[&Periodicity::EveryHours(1)].contains("g"));

        let u3 = person("u3");
        let err = f
            .service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&u3]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::SynchronizedGroupMembers(_)));
        // rights are still managed by hand
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Reader, MyMod::Add, &[&u3]), None)
            .await
            .unwrap();

        let unknown: RemoteQuery = "sql: remote=nope : select 1".parse().unwrap();
        let err = f
            .service
            .modify_remote_query(&admin, &g, Some(unknown), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SgroupsError::UnknownRemote(_)));

        f.service.modify_remote_query(&admin, &g, None, None, None).await.unwrap();
        let flattened = f
            .service
            .get_flattened_mright(&admin, &g, Mright::Member, None, None)
            .await
            .unwrap();
        assert_eq!(flattened.count, 0);
        assert!(f.service.cache().get().await.unwrap().is_empty());
        f.service
            .modify_members_or_rights(&admin, &g, mods(Mright::Member, MyMod::Add, &[&u3]), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sync() {
        let f = fixture().await;
        let admin = user(ADMIN);
        let g = GroupId::from("g");
        f.service.create(&admin, &g, ou("G")).await.unwrap();
        f.service.sync(&admin, &g, &Mright::ALL).await.unwrap();
        let err = f.service.sync(&user("u1"), &g, &[Mright::Member]).await.unwrap_err();
        assert!(matches!(err, SgroupsError::NoRight { .. }));
    }
}
