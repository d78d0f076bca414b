//! The `waypost` command-line tool.
//!
//! Loads a TOML states manifest into a state engine backed by an in-memory
//! location, then checks it, matches URLs against it, builds links and runs
//! transitions.
//!
//! # Modules
//!
//! - [`cli`]: Argument parsing
//! - [`config`]: `WaypostConfig` loading
//! - [`config_handlers`]: `waypost config` subcommands
//! - [`manifest`]: States manifests and file-backed templates
//! - [`commands`]: Manifest command handlers
//! - [`app`]: The application entry point

#![doc = include_str!("../README.md")]

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod config_handlers;
pub mod manifest;

pub use app::WaypostCli;
pub use cli::CliArgs;
pub use config::WaypostConfig;
pub use manifest::Manifest;
