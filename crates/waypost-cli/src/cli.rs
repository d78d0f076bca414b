//! CLI argument parsing and command definitions.
//!
//! Every command except `version` and `config` works on a states manifest,
//! given with `--manifest`, through `WAYPOST_MANIFEST`, or in the config file.

use clap::{Parser, Subcommand};

// ============================================================================
// CLI argument types
// ============================================================================

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "waypost", author, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "WAYPOST_CONFIG")]
    pub config: Option<String>,

    /// Path to the states manifest.
    #[arg(short, long, env = "WAYPOST_MANIFEST")]
    pub manifest: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register every state in the manifest and list the result.
    Check,

    /// Find the state a URL leads to.
    Match {
        /// Application URL, e.g. `/contacts/42?sort=name`.
        url: String,
    },

    /// Build a link to a state.
    Href {
        /// State name.
        state: String,

        /// Parameter as `key=value`; repeatable.
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Include protocol and host.
        #[arg(long)]
        absolute: bool,
    },

    /// Transition to a state and show what was resolved.
    Go {
        /// State name.
        state: String,

        /// Parameter as `key=value`; repeatable.
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Start from this URL instead of the root state.
        #[arg(long)]
        from: Option<String>,
    },

    /// Print version information.
    Version,

    /// Configuration operations.
    Config(ConfigCommand),
}

/// Config-specific subcommands.
#[derive(Parser, Debug)]
pub struct ConfigCommand {
    /// Config subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigAction,
}

/// Available config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path.
    Path,

    /// Print the effective configuration as TOML.
    Show,

    /// Create a default configuration file.
    Init {
        /// Output file path (defaults to XDG config path).
        #[arg(short, long)]
        file: Option<String>,

        /// Overwrite existing file.
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Tests
// ============================================================================
