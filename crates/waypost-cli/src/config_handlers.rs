//! Handler functions for config CLI commands.
//!
//! Implements `waypost config {path,show,init}`.

use anyhow::{Context, Result, bail};
use std::path::PathBuf;

use crate::cli::ConfigAction;
use crate::config::WaypostConfig;

/// Handle a config subcommand.
///
/// Receives the raw `--config` path (not a loaded config) because `path`
/// and `init` work before a config file exists.
pub fn handle_config_command(config_path: Option<&str>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => cmd_config_path(config_path),
        ConfigAction::Show => {
            let config = WaypostConfig::load(config_path)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Init { file, force } => {
            let path = cmd_config_init(file.as_deref(), force)?;
            println!("Config file created at {}", path.display());
            Ok(())
        }
    }
}

/// Show the resolved config file path.
fn cmd_config_path(config_path: Option<&str>) -> Result<()> {
    let path = WaypostConfig::resolve_config_path(config_path)
        .context("Could not determine config directory for this platform")?;
    println!("{}", path.display());
    if !path.exists() {
        eprintln!("(file does not exist; run `waypost config init` to create it)");
    }
    Ok(())
}

/// Write a default configuration file and return its path.
fn cmd_config_init(file: Option<&str>, force: bool) -> Result<PathBuf> {
    let path = match file {
        Some(p) => PathBuf::from(p),
        None => WaypostConfig::default_config_path()
            .context("Could not determine config directory")?,
    };

    if path.exists() && !force {
        bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    let toml_str = WaypostConfig::default().to_toml_string()?;
    std::fs::write(&path, toml_str)
        .with_context(|| format!("Could not write {}", path.display()))?;
    log::info!("Wrote default configuration to {}", path.display());
    Ok(path)
}

// ============================================================================
// Tests
// ============================================================================
