//! Shared domain of the sgroups workspace: identifiers and stem hierarchy, the rights lattice,
//! periodicities, configuration and errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod attrs;
pub mod config;
pub mod dn;
pub mod error;
pub mod ids;
pub mod periodicity;
pub mod right;
pub mod stem;

pub use config::{Config, RemoteConfig, RemoteDriver, SubjectSourceConfig};
pub use dn::{parse_direct_url, to_direct_url, DirectOptions};
pub use error::{ErrorKind, Result, SgroupsError};
pub use ids::{GroupId, SubjectId};
pub use periodicity::Periodicity;
pub use right::{Mright, Right};
pub use stem::StemConfig;

/// Mono-valued attributes of an sgroup (`ou`, `description`...)
pub type MonoAttrs = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MyMod {
    Add,
    Delete,
    Replace,
}

pub type DnsOpts = BTreeMap<SubjectId, DirectOptions>;

/// Requested modifications of direct members/rights, e.g. `{ member: { add: { <dn>: {} } } }`
pub type MyMods = BTreeMap<Mright, BTreeMap<MyMod, DnsOpts>>;

/// Identity on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedUser {
    /// Trusted applications, allowed everything
    TrustedAdmin,
    User(String),
}

impl fmt::Display for LoggedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoggedUser::TrustedAdmin => f.write_str("TrustedAdmin"),
            LoggedUser::User(user) => f.write_str(user),
        }
    }
}
