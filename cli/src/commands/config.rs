use anyhow::{anyhow, Result};
use colored::*;
use sgroups::Config;

/// Print the loaded configuration
pub fn show(config: &Config, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        "yaml" => print!("{}", serde_yaml::to_string(config)?),
        other => return Err(anyhow!("unknown format {:?}, expected json or yaml", other)),
    }
    Ok(())
}

/// Summary of a configuration that loaded and validated
pub fn check(config: &Config) {
    println!("{}", "Configuration OK".green().bold());
    println!("  {}: {}", "directory".cyan(), config.directory.url);
    println!("  {}: {}", "groups".cyan(), config.directory.groups_dn);
    println!("  {}: {}", "audit logs".cyan(), config.log_dir.display());
    println!(
        "  {}: {}",
        "subject sources".cyan(),
        config
            .subject_sources
            .iter()
            .map(|sscfg| sscfg.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let remotes: Vec<&str> = config.remotes.keys().map(|name| name.as_str()).collect();
    if remotes.is_empty() {
        println!("  {}: {}", "remotes".cyan(), "none".yellow());
    } else {
        println!("  {}: {}", "remotes".cyan(), remotes.join(", "));
    }
}
