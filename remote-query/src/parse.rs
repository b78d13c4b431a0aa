//! Text form of remote queries, as stored in the remote query attribute of synchronized groups.
//!
//! ```text
//! sql: remote=foo : subject=ou=people,dc=nodomain?uid : select username from users
//! sql: remote=foo : select concat('uid=', username, ',ou=people,dc=nodomain') from users
//! ldap://annuaire/ou=people,dc=annuaire?uid??(eduPersonAffiliation=staff)
//! ```

use sgroups::{Result, SgroupsError};
use std::fmt;
use std::str::FromStr;

use crate::{RemoteLdapQuery, RemoteQuery, RemoteSqlQuery, ToSubjectSource};

/// Host used in directory URLs for the main directory
const LOCAL_HOST: &str = "localhost";

fn invalid(msg: String) -> SgroupsError {
    SgroupsError::InvalidRemoteQuery(msg)
}

/// `name=value : rest` => `(value, rest)`
fn get_param<'a>(param_name: &str, s: &'a str) -> Option<(&'a str, &'a str)> {
    let s = s.strip_prefix(param_name)?.strip_prefix('=')?;
    let (param, rest) = s.split_once(':')?;
    Some((param.trim_end(), rest.trim_start()))
}

fn parse_to_subject_source(s: &str) -> Result<ToSubjectSource> {
    let (ssdn, id_attr) = s
        .split_once('?')
        .ok_or_else(|| invalid(format!("expected ou=xxx,dc=xxx?uid, got {}", s)))?;
    Ok(ToSubjectSource {
        ssdn: ssdn.to_string(),
        id_attr: (id_attr != "*").then(|| id_attr.to_string()),
    })
}

fn parse_sql(url: &str, rest: &str) -> Result<RemoteSqlQuery> {
    let (remote_cfg_name, rest) =
        get_param("remote", rest).ok_or_else(|| invalid(format!("remote= is missing in {}", url)))?;
    let (to_subject_source, select) = match get_param("subject", rest) {
        Some((subject, select)) => (Some(parse_to_subject_source(subject)?), select),
        None => (None, rest),
    };
    if select.is_empty() {
        return Err(invalid(format!("select query is missing in {}", url)));
    }
    Ok(RemoteSqlQuery {
        remote_cfg_name: remote_cfg_name.to_string(),
        select_query: select.to_string(),
        to_subject_source,
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_ldap(url: &str, rest: &str) -> Result<RemoteLdapQuery> {
    let (host, rest) = rest.split_once('/').unwrap_or((rest, ""));
    let mut parts = rest.splitn(4, '?');
    let dn = parts.next().unwrap_or_default();
    let attributes = parts.next().unwrap_or_default();
    let _scope = parts.next();
    let filter = parts.next().unwrap_or_default();

    if attributes.contains(',') {
        return Err(invalid(format!(
            "only one attribute handled where multiple attributes were found in {}",
            url
        )));
    }
    let dn = urlencoding::decode(dn).map_err(|e| invalid(format!("{}: {}", url, e)))?;
    let filter = urlencoding::decode(filter).map_err(|e| invalid(format!("{}: {}", url, e)))?;
    Ok(RemoteLdapQuery {
        remote_cfg_name: if host == LOCAL_HOST { String::new() } else { host.to_string() },
        dn: non_empty(&dn),
        attribute: non_empty(attributes),
        filter: non_empty(&filter),
    })
}

/// Escapes the characters decoded by `parse_ldap` or splitting the URL
fn encode_url_part(s: &str) -> String {
    s.replace('%', "%25").replace('?', "%3F")
}

impl FromStr for RemoteQuery {
    type Err = SgroupsError;

    fn from_str(url: &str) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("sql:") {
            Ok(RemoteQuery::Sql(parse_sql(url, rest.trim_start())?))
        } else if let Some(rest) = url.strip_prefix("ldap://") {
            if rest.starts_with('/') {
                return Err(invalid(format!("{} is a plain member, not a remote query", url)));
            }
            Ok(RemoteQuery::Ldap(parse_ldap(url, rest)?))
        } else {
            Err(invalid(format!("unknown remote query {}", url)))
        }
    }
}

impl fmt::Display for ToSubjectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.ssdn, self.id_attr.as_deref().unwrap_or("*"))
    }
}

impl fmt::Display for RemoteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteQuery::Sql(rsq) => {
                write!(f, "sql: remote={}", rsq.remote_cfg_name)?;
                if let Some(tss) = &rsq.to_subject_source {
                    write!(f, " : subject={}", tss)?;
                }
                write!(f, " : {}", rsq.select_query)
            }
            RemoteQuery::Ldap(rlq) => {
                let host = if rlq.remote_cfg_name.is_empty() {
                    LOCAL_HOST
                } else {
                    &rlq.remote_cfg_name
                };
                write!(
                    f,
                    "ldap://{}/{}?{}??{}",
                    host,
                    encode_url_part(rlq.dn.as_deref().unwrap_or_default()),
                    rlq.attribute.as_deref().unwrap_or_default(),
                    encode_url_part(rlq.filter.as_deref().unwrap_or_default())
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(url: &str) -> RemoteQuery {
        let remote: RemoteQuery = url.parse().unwrap();
        assert_eq!(remote.to_string(), url);
        assert_eq!(remote.to_string().parse::<RemoteQuery>().unwrap(), remote);
        remote
    }

    #[test]
    fn test_parse_sql() {
        let remote = round_trip("sql: remote=foo : subject=ou=people,dc=nodomain?uid : select username from users");
        let RemoteQuery::Sql(rsq) = remote else {
            panic!("sql expected")
        };
        assert_eq!(rsq.remote_cfg_name, "foo");
        assert_eq!(rsq.select_query, "select username from users");
        let tss = rsq.to_subject_source.unwrap();
        assert_eq!(tss.ssdn, "ou=people,dc=nodomain");
        assert_eq!(tss.id_attr.as_deref(), Some("uid"));

        round_trip("sql: remote=foo : select concat('uid=', username, ',ou=people,dc=nodomain') from users");

        let remote = round_trip("sql: remote=foo : subject=ou=people,dc=nodomain?* : select mail from users");
        let RemoteQuery::Sql(rsq) = remote else {
            panic!("sql expected")
        };
        assert_eq!(rsq.to_subject_source.unwrap().id_attr, None);
    }

    #[test]
    fn test_parse_sql_normalizes_spaces() {
        let remote: RemoteQuery = "sql:remote=foo:select a from b".parse().unwrap();
        assert_eq!(remote.to_string(), "sql: remote=foo : select a from b");
    }

    #[test]
    fn test_parse_sql_errors() {
        let err = "sql: select username from users".parse::<RemoteQuery>().unwrap_err();
        assert!(err.to_string().contains("remote= is missing"));

        let err = "sql: remote=foo : subject=ou=people : select 1"
            .parse::<RemoteQuery>()
            .unwrap_err();
        assert!(err.to_string().contains("expected ou=xxx,dc=xxx?uid"));

        assert!("foo: bar".parse::<RemoteQuery>().is_err());
    }

    #[test]
    fn test_parse_ldap() {
        let remote = round_trip("ldap://annuaire/ou=people,dc=annuaire?uid??(eduPersonAffiliation=staff)");
        let RemoteQuery::Ldap(rlq) = remote else {
            panic!("ldap expected")
        };
        assert_eq!(rlq.remote_cfg_name, "annuaire");
        assert_eq!(rlq.dn.as_deref(), Some("ou=people,dc=annuaire"));
        assert_eq!(rlq.attribute.as_deref(), Some("uid"));
        assert_eq!(rlq.filter.as_deref(), Some("(eduPersonAffiliation=staff)"));

        let remote = round_trip("ldap://localhost/ou=people,dc=nodomain???(description=*staff*)");
        let RemoteQuery::Ldap(rlq) = remote else {
            panic!("ldap expected")
        };
        assert_eq!(rlq.remote_cfg_name, "");
        assert_eq!(rlq.attribute, None);

        round_trip("ldap://annuaire/???");
    }

    #[test]
    fn test_parse_ldap_decodes_url() {
        let remote: RemoteQuery = "ldap://localhost/ou=people,dc=nodomain???(cn=Jean%20Dupont)"
            .parse()
            .unwrap();
        let RemoteQuery::Ldap(rlq) = remote else {
            panic!("ldap expected")
        };
        assert_eq!(rlq.filter.as_deref(), Some("(cn=Jean Dupont)"));

        let remote = round_trip("ldap://localhost/ou=people,dc=nodomain???(description=100%25 sure%3F)");
        let RemoteQuery::Ldap(rlq) = remote else {
            panic!("ldap expected")
        };
        assert_eq!(rlq.filter.as_deref(), Some("(description=100% sure?)"));
    }

    #[test]
    fn test_parse_ldap_errors() {
        assert!("ldap://annuaire/ou=people?uid,mail??".parse::<RemoteQuery>().is_err());
        assert!("ldap:///uid=a,ou=people,dc=nodomain".parse::<RemoteQuery>().is_err());
    }
}
