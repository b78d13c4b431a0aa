//! Mapping between sgroup ids, subject DNs and the directory URLs stored in direct attributes.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::ids::{GroupId, SubjectId};

const GENERALIZED_TIME: &str = "%Y%m%d%H%M%SZ";

/// Options attached to a direct subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectOptions {
    /// The subject is removed from flattened sets after this date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<DateTime<Utc>>,
}

impl Config {
    pub fn sgroup_id_to_dn(&self, id: &GroupId) -> SubjectId {
        if id.as_str() == self.stem.root_id {
            SubjectId::new(self.directory.groups_dn.clone())
        } else {
            SubjectId::new(format!("cn={},{}", id, self.directory.groups_dn))
        }
    }

    pub fn dn_to_sgroup_id(&self, dn: &str) -> Option<GroupId> {
        if dn == self.directory.groups_dn {
            return Some(GroupId::new(self.stem.root_id.clone()));
        }
        let rdn = dn.strip_suffix(&self.directory.groups_dn)?.strip_suffix(',')?;
        rdn.strip_prefix("cn=").map(GroupId::from)
    }

    pub fn dn_is_sgroup(&self, dn: &SubjectId) -> bool {
        dn.as_str().ends_with(&self.directory.groups_dn)
    }

    pub fn people_id_to_dn(&self, user: &str) -> SubjectId {
        SubjectId::new(format!(
            "{}={},{}",
            self.directory.people_id_attr,
            user,
            self.people_dn()
        ))
    }
}

/// `ldap:///<dn>` or `ldap:///<dn>???(serverTime<YYYYMMDDhhmmssZ)`
pub fn to_direct_url(dn: &SubjectId, opts: &DirectOptions) -> String {
    match opts.enddate {
        Some(enddate) => format!(
            "ldap:///{}???(serverTime<{})",
            dn,
            enddate.format(GENERALIZED_TIME)
        ),
        None => format!("ldap:///{}", dn),
    }
}

pub fn parse_direct_url(url: &str) -> Option<(SubjectId, DirectOptions)> {
    let rest = url.strip_prefix("ldap:///")?;
    match rest.split_once("???") {
        None => Some((SubjectId::from(rest), DirectOptions::default())),
        Some((dn, filter)) => {
            let time = filter
                .strip_prefix("(serverTime<")
                .and_then(|s| s.strip_suffix(')'))?;
            let enddate = NaiveDateTime::parse_from_str(time, GENERALIZED_TIME)
                .ok()?
                .and_utc();
            Some((
                SubjectId::from(dn),
                DirectOptions {
                    enddate: Some(enddate),
                },
            ))
        }
    }
}
