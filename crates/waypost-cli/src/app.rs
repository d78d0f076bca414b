//! The `waypost` application.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};
use crate::commands;
use crate::config::WaypostConfig;
use crate::config_handlers;
use crate::manifest::Manifest;

/// The CLI application: a name, a version and a loaded configuration.
#[derive(Debug, Clone)]
pub struct WaypostCli {
    name: String,
    config: WaypostConfig,
    version: String,
}

impl WaypostCli {
    /// Create from CLI args, loading config from file and environment.
    pub fn from_args(name: impl Into<String>, args: &CliArgs) -> Result<Self> {
        let config = WaypostConfig::load(args.config.as_deref())?;
        Ok(Self::new(name, config))
    }

    /// Create a new CLI application.
    pub fn new(name: impl Into<String>, config: WaypostConfig) -> Self {
        Self {
            name: name.into(),
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Override the version string.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The loaded configuration.
    pub fn config(&self) -> &WaypostConfig {
        &self.config
    }

    /// Initialise tracing-based logging.
    ///
    /// Uses `RUST_LOG` env var if set, otherwise defaults based on verbosity flags.
    pub fn init_logging(&self, verbose: bool, quiet: bool) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if quiet {
            EnvFilter::new("warn")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        };

        // A subscriber may already be installed (tests).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Run the CLI with the given arguments.
    pub async fn run(&self, args: CliArgs) -> Result<()> {
        self.init_logging(args.verbose, args.quiet);

        let report = match args.command {
            Some(Command::Version) => format!("{} {}\n", self.name, self.version),
            Some(Command::Config(config_cmd)) => {
                return config_handlers::handle_config_command(
                    args.config.as_deref(),
                    config_cmd.command,
                );
            }
            Some(Command::Check) => {
                let manifest = self.manifest(args.manifest.as_deref())?;
                commands::check(&manifest, &self.config)?
            }
            Some(Command::Match { url }) => {
                let manifest = self.manifest(args.manifest.as_deref())?;
                commands::match_url(&manifest, &self.config, &url).await?
            }
            Some(Command::Href {
                state,
                params,
                absolute,
            }) => {
                let manifest = self.manifest(args.manifest.as_deref())?;
                let link = commands::href(&manifest, &self.config, &state, &params, absolute)?;
                format!("{link}\n")
            }
            Some(Command::Go {
                state,
                params,
                from,
            }) => {
                let manifest = self.manifest(args.manifest.as_deref())?;
                commands::go(&manifest, &self.config, &state, &params, from.as_deref()).await?
            }
            None => format!("{} {} - use --help for usage\n", self.name, self.version),
        };
        print!("{report}");
        Ok(())
    }

    /// Load the manifest named on the command line or in the config.
    fn manifest(&self, explicit: Option<&str>) -> Result<Manifest> {
        let path = explicit
            .or(self.config.manifest.as_deref())
            .map(PathBuf::from)
            .context("No manifest given; pass --manifest or set `manifest` in the config")?;
        tracing::debug!(path = %path.display(), "loading manifest");
        Manifest::load(&path)
    }
}

// ============================================================================
// Tests
// ============================================================================
