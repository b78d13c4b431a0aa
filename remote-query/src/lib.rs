//! Remote sources of group members: SQL queries and directory searches.
//!
//! A synchronized group stores its [`RemoteQuery`] as text. The scheduler executes it
//! periodically to get the direct members of the group.

pub mod ldap;
mod parse;
pub mod sql;

use directory::{DirectoryStore, Filter, NO_ATTRS};
use serde::{Deserialize, Serialize};
use sgroups::{Config, MonoAttrs, RemoteDriver, Result, SgroupsError, SubjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

pub use ldap::{DirectoryConnector, SqliteConnector};
pub use sql::{SqlSource, SqlxSource};

/// Values are looked up in batches to keep filters small
const LOOKUP_CHUNK_SIZE: usize = 10;

/// Values returned by `test_remote_query`
const TEST_VALUES_LIMIT: usize = 10;

/// Maps values returned by a SQL query to subjects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToSubjectSource {
    /// Branch of a subject source
    pub ssdn: String,
    /// Attribute matched against the values. When `None`, the `id_attrs` of the subject source are used.
    pub id_attr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSqlQuery {
    pub remote_cfg_name: String,
    pub select_query: String,
    pub to_subject_source: Option<ToSubjectSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLdapQuery {
    /// Empty for the main directory
    pub remote_cfg_name: String,
    /// Search base, defaults to the `search_branch` of the remote
    pub dn: Option<String>,
    /// Return the values of this attribute instead of the DNs of the entries
    pub attribute: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteQuery {
    Sql(RemoteSqlQuery),
    Ldap(RemoteLdapQuery),
}

impl RemoteQuery {
    pub fn remote_cfg_name(&self) -> &str {
        match self {
            RemoteQuery::Sql(q) => &q.remote_cfg_name,
            RemoteQuery::Ldap(q) => &q.remote_cfg_name,
        }
    }
}

/// Subject source matching values returned by a query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSourceGuess {
    pub to_subject_source: ToSubjectSource,
    pub subjects: BTreeMap<SubjectId, MonoAttrs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRemoteQuery {
    pub count: usize,
    pub values: Vec<String>,
    pub values_truncated: bool,
    pub ss_guess: Option<SubjectSourceGuess>,
}

/// Executes remote queries
pub struct RemoteExecutor {
    config: Arc<Config>,
    store: Arc<dyn DirectoryStore>,
    sql: Arc<dyn SqlSource>,
    directories: Arc<dyn DirectoryConnector>,
}

impl RemoteExecutor {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DirectoryStore>,
        sql: Arc<dyn SqlSource>,
        directories: Arc<dyn DirectoryConnector>,
    ) -> Self {
        Self {
            config,
            store,
            sql,
            directories,
        }
    }

    /// Executor using sqlx for SQL remotes and SQLite for directory remotes
    pub fn with_default_drivers(config: Arc<Config>, store: Arc<dyn DirectoryStore>) -> Self {
        Self::new(
            config,
            store,
            Arc::new(SqlxSource),
            Arc::new(SqliteConnector::default()),
        )
    }

    /// Check the query refers to configured remotes and subject sources
    pub fn validate(&self, remote: &RemoteQuery) -> Result<()> {
        match remote {
            RemoteQuery::Sql(rsq) => {
                if rsq.remote_cfg_name.is_empty() {
                    return Err(SgroupsError::InvalidRemoteQuery(
                        "SQL requires a remote name".to_string(),
                    ));
                }
                let remote_cfg = self.remote_config(&rsq.remote_cfg_name)?;
                if matches!(remote_cfg.driver, RemoteDriver::Ldap(_)) {
                    return Err(SgroupsError::InvalidRemoteQuery(format!(
                        "remote {} is not a SQL database",
                        rsq.remote_cfg_name
                    )));
                }
                if let Some(tss) = &rsq.to_subject_source {
                    let sscfg = self
                        .config
                        .subject_source(&tss.ssdn)
                        .ok_or_else(|| SgroupsError::UnknownSubjectSource(tss.ssdn.clone()))?;
                    if tss.id_attr.is_none() && sscfg.id_attrs.is_empty() {
                        return Err(SgroupsError::InvalidRemoteQuery(format!(
                            "no id_attrs for {} but needed for remote query on DN {}",
                            sscfg.name, tss.ssdn
                        )));
                    }
                }
            }
            RemoteQuery::Ldap(rlq) => {
                if !rlq.remote_cfg_name.is_empty() {
                    let remote_cfg = self.remote_config(&rlq.remote_cfg_name)?;
                    if !matches!(remote_cfg.driver, RemoteDriver::Ldap(_)) {
                        return Err(SgroupsError::InvalidRemoteQuery(format!(
                            "remote {} is not a directory",
                            rlq.remote_cfg_name
                        )));
                    }
                }
                if let Some(filter) = &rlq.filter {
                    Filter::parse(filter)
                        .map_err(|e| SgroupsError::InvalidRemoteQuery(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    fn remote_config(&self, name: &str) -> Result<&sgroups::RemoteConfig> {
        self.config
            .remotes
            .get(name)
            .ok_or_else(|| SgroupsError::UnknownRemote(name.to_string()))
    }

    /// Raw values: SQL first column values, or directory DNs/attribute values
    pub async fn query_raw(&self, remote: &RemoteQuery) -> Result<Vec<String>> {
        match remote {
            RemoteQuery::Sql(rsq) => {
                let remote_cfg = self.remote_config(&rsq.remote_cfg_name)?;
                self.sql.execute_select(remote_cfg, &rsq.select_query).await
            }
            RemoteQuery::Ldap(rlq) if rlq.remote_cfg_name.is_empty() => {
                ldap::search(self.store.as_ref(), Some(&self.config.directory.base_dn), rlq).await
            }
            RemoteQuery::Ldap(rlq) => {
                let remote_cfg = self.remote_config(&rlq.remote_cfg_name)?;
                let RemoteDriver::Ldap(ldap_cfg) = &remote_cfg.driver else {
                    return Err(SgroupsError::InvalidRemoteQuery(format!(
                        "remote {} is not a directory",
                        rlq.remote_cfg_name
                    )));
                };
                let store = self.directories.connect(&rlq.remote_cfg_name, ldap_cfg).await?;
                ldap::search(store.as_ref(), ldap_cfg.search_branch.as_deref(), rlq).await
            }
        }
    }

    /// Subjects of the query, the direct members of a synchronized group
    pub async fn query_subjects(&self, remote: &RemoteQuery) -> Result<BTreeSet<SubjectId>> {
        let values = self.query_raw(remote).await?;
        let subjects = match remote {
            RemoteQuery::Sql(RemoteSqlQuery {
                to_subject_source: Some(tss),
                ..
            }) => {
                let id_attrs = self.id_attrs(tss)?;
                self.values_to_dns(&tss.ssdn, &id_attrs, &values).await?
            }
            // the values must be DNs
            _ => values.into_iter().map(SubjectId::from).collect(),
        };
        info!("remote query {} => {} subjects", remote, subjects.len());
        Ok(subjects)
    }

    fn id_attrs(&self, tss: &ToSubjectSource) -> Result<Vec<String>> {
        if let Some(id_attr) = &tss.id_attr {
            return Ok(vec![id_attr.clone()]);
        }
        let sscfg = self
            .config
            .subject_source(&tss.ssdn)
            .ok_or_else(|| SgroupsError::UnknownSubjectSource(tss.ssdn.clone()))?;
        Ok(sscfg.id_attrs.clone())
    }

    /// DNs of the entries of `ssdn` having one of `values` in one of `id_attrs`
    pub async fn values_to_dns(
        &self,
        ssdn: &str,
        id_attrs: &[String],
        values: &[String],
    ) -> Result<BTreeSet<SubjectId>> {
        let mut dns = BTreeSet::new();
        for chunk in values.chunks(LOOKUP_CHUNK_SIZE) {
            let filter = Filter::or(
                chunk
                    .iter()
                    .flat_map(|value| id_attrs.iter().map(move |attr| Filter::eq(attr.as_str(), value.as_str())))
                    .collect(),
            );
            for entry in self.store.search(ssdn, &filter, &[NO_ATTRS], None).await? {
                dns.insert(SubjectId::from(entry.dn));
            }
        }
        Ok(dns)
    }

    /// Subject source and identifying attribute matching most of `values`
    ///
    /// `None` when values are already DNs of the directory, or when nothing matches.
    pub async fn guess_subject_source(&self, values: &[String]) -> Result<Option<SubjectSourceGuess>> {
        let base_dn = &self.config.directory.base_dn;
        if values.iter().all(|v| v.ends_with(base_dn.as_str())) {
            return Ok(None);
        }
        let mut best: Option<(usize, BTreeSet<SubjectId>, ToSubjectSource)> = None;
        for sscfg in &self.config.subject_sources {
            for id_attr in &sscfg.id_attrs {
                let dns = self
                    .values_to_dns(&sscfg.dn, std::slice::from_ref(id_attr), values)
                    .await?;
                debug!("guess {}?{} => {} matches", sscfg.dn, id_attr, dns.len());
                if dns.len() > best.as_ref().map_or(0, |(count, _, _)| *count) {
                    let tss = ToSubjectSource {
                        ssdn: sscfg.dn.clone(),
                        id_attr: Some(id_attr.clone()),
                    };
                    best = Some((dns.len(), dns, tss));
                }
            }
        }
        let Some((_, dns, to_subject_source)) = best else {
            return Ok(None);
        };

        let display_attrs: Vec<&str> = self
            .config
            .subject_source(&to_subject_source.ssdn)
            .map(|sscfg| sscfg.display_attrs.iter().map(|a| a.as_str()).collect())
            .unwrap_or_default();
        let mut subjects = BTreeMap::new();
        for dn in dns {
            let attrs = match self.store.read(dn.as_str(), &display_attrs).await? {
                Some(entry) => entry
                    .attrs
                    .into_iter()
                    .filter_map(|(name, values)| Some((name, values.into_iter().next()?)))
                    .collect(),
                None => MonoAttrs::new(),
            };
            subjects.insert(dn, attrs);
        }
        Ok(Some(SubjectSourceGuess {
            to_subject_source,
            subjects,
        }))
    }

    /// Run a query without storing it, to help writing it
    pub async fn test_remote_query(&self, remote: &RemoteQuery) -> Result<TestRemoteQuery> {
        self.validate(remote)?;
        let mut values = self.query_raw(remote).await?;
        let count = values.len();
        values.truncate(TEST_VALUES_LIMIT);
        let ss_guess = match remote {
            RemoteQuery::Sql(RemoteSqlQuery {
                to_subject_source: None,
                ..
            }) => self.guess_subject_source(&values).await?,
            _ => None,
        };
        Ok(TestRemoteQuery {
            count,
            values_truncated: count > values.len(),
            values,
            ss_guess,
        })
    }
}
