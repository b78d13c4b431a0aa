use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SgroupsError};
use crate::periodicity::Periodicity;
use crate::right::Mright;
use crate::stem::StemConfig;

/// Environment variable pointing to the configuration file
pub const CONFIG_PATH_ENV: &str = "SGROUPS_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/sgroups.yaml";

/// Full configuration, usually loaded from `config/sgroups.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub stem: StemConfig,
    /// Mono-valued attributes shown for sgroups, with their labels
    #[serde(default = "default_sgroup_attrs")]
    pub sgroup_attrs: BTreeMap<String, String>,
    /// Filter used to search sgroups, `%TERM%` is replaced by the escaped search token
    #[serde(default = "default_sgroup_search_filter")]
    pub sgroup_search_filter: String,
    #[serde(default)]
    pub groups_flattened_attr: FlattenedAttrs,
    #[serde(default = "default_forced_periodicity_attr")]
    pub remote_forced_periodicity_attr: String,
    #[serde(default)]
    pub subject_sources: Vec<SubjectSourceConfig>,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
    /// Directory of the per-sgroup audit logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Time zone used for `every day at H:MM` periodicities, local time if absent
    #[serde(default)]
    pub timezone_offset_hours: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// SQLite database holding the directory entries
    pub url: String,
    pub base_dn: String,
    pub groups_dn: String,
    /// Defaults to `ou=people,<base_dn>`
    #[serde(default)]
    pub people_dn: Option<String>,
    #[serde(default = "default_people_id_attr")]
    pub people_id_attr: String,
}

/// Attribute holding the flattened subjects of each mright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedAttrs {
    pub member: String,
    pub reader: String,
    pub updater: String,
    pub admin: String,
}

impl Default for FlattenedAttrs {
    fn default() -> Self {
        Self {
            member: "member".to_string(),
            reader: "supannGroupeLecteurDN".to_string(),
            updater: "supannGroupeAdminDN".to_string(),
            admin: "owner".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectSourceConfig {
    /// Branch of the subjects, e.g. `ou=people,dc=nodomain`
    pub dn: String,
    pub name: String,
    #[serde(default)]
    pub display_attrs: Vec<String>,
    /// Attributes identifying a subject, used to map remote values to subjects
    #[serde(default)]
    pub id_attrs: Vec<String>,
    /// `%TERM%` is replaced by the escaped search token
    pub search_filter: String,
}

impl SubjectSourceConfig {
    pub fn search_filter_(&self, term: &str) -> String {
        self.search_filter
            .replace("%TERM%", &directory::escape_value(term))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Default periodicity of the groups using this remote
    pub periodicity: Periodicity,
    #[serde(flatten)]
    pub driver: RemoteDriver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum RemoteDriver {
    Sqlite(SqlRemoteConfig),
    Postgres(SqlRemoteConfig),
    Mysql(SqlRemoteConfig),
    Ldap(LdapRemoteConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlRemoteConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or file path for sqlite
    pub db_name: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapRemoteConfig {
    /// Directory database of this remote
    pub url: String,
    #[serde(default)]
    pub search_branch: Option<String>,
}

fn default_sgroup_attrs() -> BTreeMap<String, String> {
    [("ou", "Nom"), ("description", "Description")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_sgroup_search_filter() -> String {
    "(|(cn=*%TERM%*)(ou=*%TERM%*)(description=*%TERM%*))".to_string()
}

fn default_forced_periodicity_attr() -> String {
    "remoteForcedPeriodicity".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("data/logs/sgroups")
}

fn default_people_id_attr() -> String {
    "uid".to_string()
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from `SGROUPS_CONFIG`, or the default location
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.stem.separator.is_empty() {
            return Err(SgroupsError::Config("stem.separator must not be empty".to_string()));
        }
        for mright in Mright::ALL {
            if self.flattened_attr(mright).is_empty() {
                return Err(SgroupsError::Config(format!(
                    "groups_flattened_attr.{} must not be empty",
                    mright
                )));
            }
        }
        if !self.directory.groups_dn.ends_with(&self.directory.base_dn) {
            return Err(SgroupsError::Config(format!(
                "groups_dn {:?} must be below base_dn {:?}",
                self.directory.groups_dn, self.directory.base_dn
            )));
        }
        for sscfg in &self.subject_sources {
            if !sscfg.search_filter.contains("%TERM%") {
                return Err(SgroupsError::Config(format!(
                    "search_filter of subject source {:?} must contain %TERM%",
                    sscfg.dn
                )));
            }
        }
        Ok(())
    }

    pub fn people_dn(&self) -> String {
        self.directory
            .people_dn
            .clone()
            .unwrap_or_else(|| format!("ou=people,{}", self.directory.base_dn))
    }

    pub fn flattened_attr(&self, mright: Mright) -> &str {
        let attrs = &self.groups_flattened_attr;
        match mright {
            Mright::Member => &attrs.member,
            Mright::Reader => &attrs.reader,
            Mright::Updater => &attrs.updater,
            Mright::Admin => &attrs.admin,
        }
    }

    /// Attribute holding direct subjects (as directory URLs)
    pub fn direct_attr(&self, mright: Mright) -> String {
        format!("memberURL;x-{}", mright)
    }

    /// Attribute holding the remote query of a synchronized group
    pub fn remote_query_attr(&self) -> &'static str {
        "memberURL;x-member;x-remote"
    }

    pub fn subject_source(&self, dn: &str) -> Option<&SubjectSourceConfig> {
        self.subject_sources.iter().find(|sscfg| sscfg.dn == dn)
    }

    pub fn timezone(&self) -> Option<FixedOffset> {
        self.timezone_offset_hours
            .and_then(|hours| FixedOffset::east_opt(hours * 3600))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_CONFIG: &str = r#"
directory:
  url: "sqlite::memory:"
  base_dn: dc=nodomain
  groups_dn: ou=groups,dc=nodomain
subject_sources:
  - dn: ou=people,dc=nodomain
    name: Users
    display_attrs: [cn, displayName, mail]
    id_attrs: [uid, mail]
    search_filter: "(|(uid=%TERM%)(cn=*%TERM%*))"
remotes:
  foo:
    periodicity: every 5 minutes
    driver: sqlite
    db_name: /tmp/foo.db
  annuaire:
    periodicity: every day at 6h30
    driver: ldap
    url: /tmp/annuaire.db
    search_branch: ou=people,dc=annuaire
log_dir: /tmp/sgroups-logs
timezone_offset_hours: 1
"#;

    #[test]
    fn test_load_config() {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        assert_eq!(config.stem.separator, ".");
        assert_eq!(config.people_dn(), "ou=people,dc=nodomain");
        assert_eq!(config.flattened_attr(Mright::Reader), "supannGroupeLecteurDN");
        assert_eq!(config.direct_attr(Mright::Updater), "memberURL;x-updater");
        assert_eq!(config.remotes.len(), 2);

        let foo = &config.remotes["foo"];
        assert_eq!(foo.periodicity, Periodicity::EveryMinutes(5));
        assert!(matches!(&foo.driver, RemoteDriver::Sqlite(c) if c.db_name == "/tmp/foo.db"));

        let annuaire = &config.remotes["annuaire"];
        assert_eq!(annuaire.periodicity, Periodicity::DailyAt { hour: 6, minute: 30 });
        assert!(matches!(&annuaire.driver, RemoteDriver::Ldap(c) if c.search_branch.is_some()));

        assert_eq!(config.timezone(), FixedOffset::east_opt(3600));
        assert!(config.subject_source("ou=people,dc=nodomain").is_some());
    }

    #[test]
    fn test_invalid_configs() {
        let bad_periodicity = TEST_CONFIG.replace("every 5 minutes", "sometimes");
        assert!(Config::from_yaml(&bad_periodicity).is_err());

        let bad_groups_dn = TEST_CONFIG.replace("ou=groups,dc=nodomain", "ou=groups,dc=other");
        assert!(matches!(Config::from_yaml(&bad_groups_dn), Err(SgroupsError::Config(_))));

        let bad_filter = TEST_CONFIG.replace("(|(uid=%TERM%)(cn=*%TERM%*))", "(uid=*)");
        assert!(matches!(Config::from_yaml(&bad_filter), Err(SgroupsError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("sgroups.yaml");
        std::fs::write(&path, TEST_CONFIG).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.directory.groups_dn, "ou=groups,dc=nodomain");

        assert!(Config::load(&temp_dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_search_filter_escapes_term() {
        let config = Config::from_yaml(TEST_CONFIG).unwrap();
        let sscfg = &config.subject_sources[0];
        assert_eq!(sscfg.search_filter_("a*b"), "(|(uid=a\\2ab)(cn=*a\\2ab*))");
    }
}
