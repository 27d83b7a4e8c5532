//! Inspect or create the config file.

use std::path::Path;

use stillreel_common::config::AppConfig;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

pub fn path(config_path: &Path) -> anyhow::Result<()> {
    println!("{}", config_path.display());
    Ok(())
}

pub fn init(config_path: &Path, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }
    AppConfig::default().save_to(config_path)?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}
