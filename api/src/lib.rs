//! Operations on sgroups, as exposed to the web layer and to the command line.
//!
//! Every operation takes the [`LoggedUser`] on whose behalf it runs, checks the right it needs
//! (inherited from the parent stems or not), then reads or modifies the directory. Modifications
//! of members, rights and remote queries recompute the flattened subjects.

mod get;
pub mod models;
mod post;
mod subjects;

use audit::AuditLogger;
use authz::RightsResolver;
use directory::{escape_value, DirectoryStore, Filter, SqliteDirectory};
use propagation::Engine;
use remote_query::RemoteExecutor;
use sgroups::{Config, GroupId, LoggedUser, MonoAttrs, Result, SgroupsError};
use std::sync::Arc;
use sync_cache::SyncCache;
use tracing::info;

pub use models::{
    RemoteQueryDef, SgroupAndMoreOut, SgroupOutMore, SgroupsWithAttrs, SubjectAttrs, Subjects,
    SubjectsAndCount,
};

/// Shared services behind the operations
#[derive(Clone)]
pub struct SgroupsService {
    config: Arc<Config>,
    store: Arc<dyn DirectoryStore>,
    resolver: Arc<RightsResolver>,
    remotes: Arc<RemoteExecutor>,
    engine: Arc<Engine>,
    cache: SyncCache,
    audit: Arc<AuditLogger>,
}

impl SgroupsService {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn DirectoryStore>,
        remotes: Arc<RemoteExecutor>,
    ) -> Result<Self> {
        let audit = Arc::new(AuditLogger::new(&config.log_dir)?);
        let engine = Arc::new(Engine::new(
            config.clone(),
            store.clone(),
            remotes.clone(),
            audit.clone(),
        ));
        Ok(Self {
            resolver: Arc::new(RightsResolver::new(config.clone(), store.clone())),
            cache: SyncCache::new(config.clone(), store.clone()),
            config,
            store,
            remotes,
            engine,
            audit,
        })
    }

    /// Open the directory database of the configuration, with the default remote drivers
    pub async fn connect(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        info!("Opening directory {}", config.directory.url);
        let store: Arc<dyn DirectoryStore> =
            Arc::new(SqliteDirectory::connect(&config.directory.url).await?);
        let remotes = Arc::new(RemoteExecutor::with_default_drivers(config.clone(), store.clone()));
        Self::new(config, store, remotes)
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DirectoryStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn cache(&self) -> &SyncCache {
        &self.cache
    }

    fn validate_sgroup_id(&self, id: &GroupId) -> Result<()> {
        self.config.stem.validate_sgroup_id(id.as_str())
    }

    fn validate_sgroup_attrs(&self, attrs: &MonoAttrs) -> Result<()> {
        match attrs.keys().find(|name| !self.config.sgroup_attrs.contains_key(*name)) {
            Some(name) => Err(SgroupsError::InvalidAttrs(format!(
                "attribute {:?} is not allowed",
                name
            ))),
            None => Ok(()),
        }
    }

    fn sgroup_term_filter(&self, term: &str) -> Result<Filter> {
        let filter = self
            .config
            .sgroup_search_filter
            .replace("%TERM%", &escape_value(term));
        Ok(Filter::parse(&filter)?)
    }

    fn require_user<'a>(&self, user: &'a LoggedUser, operation: &str) -> Result<&'a str> {
        match user {
            LoggedUser::User(user) => Ok(user),
            LoggedUser::TrustedAdmin => Err(SgroupsError::Forbidden(format!(
                "{} needs a real user",
                operation
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use directory::Attrs;
    use tempfile::TempDir;

    pub const PREFIX_CONFIG: &str = r#"
directory:
  url: "sqlite::memory:"
  base_dn: dc=nodomain
  groups_dn: ou=groups,dc=nodomain
subject_sources:
  - dn: ou=people,dc=nodomain
    name: Users
    display_attrs: [uid, displayName]
    id_attrs: [uid]
    search_filter: "(|(uid=%TERM%)(displayName=*%TERM%*))"
"#;

    pub const ADMIN: &str = "admin";

    pub struct Fixture {
        pub service: SgroupsService,
        pub _logs: TempDir,
    }

    pub fn user(uid: &str) -> LoggedUser {
        LoggedUser::User(uid.to_string())
    }

    /// Root stem administered by `admin`, people u1..u3
    pub async fn fixture() -> Fixture {
        let logs = TempDir::new().unwrap();
        let yaml = format!("{}log_dir: {:?}\n", PREFIX_CONFIG, logs.path());
        let config = Arc::new(Config::from_yaml(&yaml).unwrap());
        let store: Arc<dyn DirectoryStore> = Arc::new(SqliteDirectory::in_memory().await.unwrap());
        for uid in [ADMIN, "u1", "u2", "u3"] {
            let mut attrs = Attrs::new();
            attrs.insert("uid".to_string(), vec![uid.to_string()]);
            attrs.insert("displayName".to_string(), vec![format!("User {}", uid)]);
            store
                .add(&format!("uid={},ou=people,dc=nodomain", uid), attrs)
                .await
                .unwrap();
        }
        let remotes = Arc::new(RemoteExecutor::with_default_drivers(config.clone(), store.clone()));
        let service = SgroupsService::new(config, store, remotes).unwrap();
        service.init_root().await.unwrap();
        let mut mods = sgroups::MyMods::new();
        mods.entry(sgroups::Mright::Admin).or_default().insert(
            sgroups::MyMod::Add,
            [(service.config.people_id_to_dn(ADMIN), Default::default())].into(),
        );
        service
            .modify_members_or_rights(&LoggedUser::TrustedAdmin, &GroupId::from(""), mods, None)
            .await
            .unwrap();
        Fixture {
            service,
            _logs: logs,
        }
    }
}
