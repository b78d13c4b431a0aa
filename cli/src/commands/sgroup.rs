use anyhow::{anyhow, Result};
use api::{SgroupAndMoreOut, SgroupOutMore, SgroupsService};
use colored::*;
use remote_query::RemoteQuery;
use serde::Serialize;
use sgroups::{Config, GroupId, LoggedUser, MonoAttrs, Mright};

fn print_structured<T: Serialize>(value: &T, format: &str) -> Result<bool> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        "yaml" => print!("{}", serde_yaml::to_string(value)?),
        "text" => return Ok(false),
        other => return Err(anyhow!("unknown format {:?}, expected json, yaml or text", other)),
    }
    Ok(true)
}

fn display_name(id: &str, attrs: &MonoAttrs) -> String {
    match attrs.get("ou") {
        Some(ou) if !ou.is_empty() => format!("{} ({})", id, ou),
        _ if id.is_empty() => "<root>".to_string(),
        _ => id.to_string(),
    }
}

fn print_sgroup_text(id: &str, sgroup: &SgroupAndMoreOut) {
    println!("{}", display_name(id, &sgroup.attrs).bold());
    for (name, value) in &sgroup.attrs {
        println!("  {}: {}", name.cyan(), value);
    }
    println!("  {}: {}", "right".cyan(), sgroup.right.to_string().yellow());
    if !sgroup.parents.is_empty() {
        let parents: Vec<String> = sgroup
            .parents
            .iter()
            .map(|parent| display_name(parent.sgroup_id.as_str(), &parent.attrs))
            .collect();
        println!("  {}: {}", "parents".cyan(), parents.join(" > "));
    }
    println!();

    match &sgroup.more {
        SgroupOutMore::Stem { children } => {
            println!("{}", format!("Children ({})", children.len()).bold());
            for (child, attrs) in children {
                println!("  {}", display_name(child.as_str(), attrs).green());
            }
        }
        SgroupOutMore::Group { direct_members } => {
            println!("{}", format!("Direct members ({})", direct_members.len()).bold());
            for (dn, subject) in direct_members {
                let enddate = subject
                    .options
                    .enddate
                    .map(|enddate| format!(" until {}", enddate.format("%Y-%m-%d")))
                    .unwrap_or_default();
                match &subject.sgroup_id {
                    Some(member) => println!("  {}{}", display_name(member.as_str(), &subject.attrs).green(), enddate),
                    None => println!("  {}{}", dn, enddate),
                }
            }
        }
        SgroupOutMore::SynchronizedGroup { remote_query } => {
            println!("{} {}", "Synchronized from".bold(), remote_query.query);
            if let Some(periodicity) = remote_query.forced_periodicity {
                println!("  {}: {}", "periodicity".cyan(), periodicity);
            }
        }
    }
}

pub async fn init(config: Config) -> Result<()> {
    let service = SgroupsService::connect(config).await?;
    if service.init_root().await? {
        println!("{}", "Root stem created".green());
    } else {
        println!("{}", "Root stem already exists".yellow());
    }
    Ok(())
}

pub async fn show(config: Config, user: &LoggedUser, id: String, format: &str) -> Result<()> {
    let service = SgroupsService::connect(config).await?;
    let sgroup = service.get_sgroup(user, &GroupId::from(id.as_str())).await?;
    if !print_structured(&sgroup, format)? {
        print_sgroup_text(&id, &sgroup);
    }
    Ok(())
}

pub async fn sync(config: Config, user: &LoggedUser, id: String, mrights: Vec<Mright>) -> Result<()> {
    let mrights = if mrights.is_empty() { Mright::ALL.to_vec() } else { mrights };
    let service = SgroupsService::connect(config).await?;
    service.sync(user, &GroupId::from(id), &mrights).await?;
    println!("{}", "Synchronized".green());
    Ok(())
}

pub async fn test_remote(config: Config, user: &LoggedUser, id: String, query: &str) -> Result<()> {
    let remote: RemoteQuery = query.parse()?;
    let service = SgroupsService::connect(config).await?;
    let result = service.test_remote_query(user, &GroupId::from(id), &remote).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn logs(config: Config, user: &LoggedUser, id: String, bytes: u64, sync: bool) -> Result<()> {
    let service = SgroupsService::connect(config).await?;
    let logs = service.get_sgroup_logs(user, &GroupId::from(id), bytes, sync).await?;
    if !logs.whole_file {
        println!("{}", "(older entries skipped)".yellow());
    }
    for entry in &logs.logs {
        println!("{}", serde_json::to_string(entry)?);
    }
    Ok(())
}

pub async fn search(config: Config, term: &str, source: Option<&str>, limit: usize) -> Result<()> {
    let service = SgroupsService::connect(config).await?;
    let found = service.search_subjects(term, Some(limit), source).await?;
    for (ssdn, subjects) in found {
        println!("{}", format!("{} ({})", ssdn, subjects.len()).bold());
        for (dn, subject) in subjects {
            let attrs: Vec<&str> = subject.attrs.values().map(|v| v.as_str()).collect();
            println!("  {} {}", dn.as_str().green(), attrs.join(" | "));
        }
    }
    Ok(())
}
