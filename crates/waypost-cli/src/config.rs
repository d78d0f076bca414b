//! Configuration for the `waypost` CLI.
//!
//! [`WaypostConfig`] loads from a TOML file, environment variables and
//! defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `WAYPOST_CONFIG` environment variable
//! 3. XDG default: `~/.config/waypost/config.toml`
//! 4. Built-in defaults

use anyhow::{Context, Result, anyhow};
use confyg::{Confygery, env};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use waypost_core::MatcherFactory;
use waypost_state::{MemoryLocation, RouterConfig};

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypostConfig {
    /// Manifest used when `--manifest` is not given.
    pub manifest: Option<String>,

    /// Directory view templates are read from. Defaults to the manifest's
    /// directory.
    pub templates: Option<String>,

    /// URL matching options.
    pub matcher: MatcherOptions,

    /// Router options.
    pub router: RouterConfig,

    /// The simulated location.
    pub location: LocationConfig,
}

/// Options applied to every compiled URL pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherOptions {
    /// Match paths case-insensitively.
    pub case_insensitive: bool,

    /// Treat a trailing slash as significant.
    pub strict: bool,
}

/// Origin of the simulated location, used for absolute links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// `http` or `https`.
    pub protocol: String,

    /// Host name.
    pub host: String,

    /// Port number.
    pub port: u16,

    /// Document base.
    pub base_href: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 80,
            base_href: "/".to_string(),
        }
    }
}

impl MatcherOptions {
    /// A factory with these options.
    pub fn factory(&self) -> MatcherFactory {
        MatcherFactory::new()
            .with_case_insensitive(self.case_insensitive)
            .with_strict(self.strict)
    }
}

impl LocationConfig {
    /// An in-memory location at `url` with this origin.
    pub fn location(&self, url: &str) -> Arc<MemoryLocation> {
        Arc::new(
            MemoryLocation::new(url)
                .with_origin(&self.protocol, &self.host, self.port)
                .with_base_href(&self.base_href),
        )
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl WaypostConfig {
    /// Load configuration from file, environment, and defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Confygery::new().map_err(|e| anyhow!("config init: {e}"))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| anyhow!("config file: {e}"))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("WAYPOST");
        env_opts.add_section("matcher");
        env_opts.add_section("router");
        env_opts.add_section("location");
        builder
            .add_env(env_opts)
            .map_err(|e| anyhow!("config env: {e}"))?;

        let config: Self = builder.build().map_err(|e| anyhow!("config build: {e}"))?;
        log::debug!("Loaded configuration: {config:?}");
        Ok(config)
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("WAYPOST_CONFIG") {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("waypost").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Could not serialize configuration")
    }
}

// ============================================================================
// Tests
// ============================================================================
