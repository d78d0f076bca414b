//! States manifests.
//!
//! A manifest is a TOML file with a `[services]` table, exposed to resolve
//! maps and injectable defaults, and one `[[state]]` record per state:
//!
//! ```toml
//! [services]
//! greeting = "hello"
//!
//! [[state]]
//! name = "contacts"
//! url = "/contacts"
//! template_url = "contacts.html"
//! resolve = { greeting = "greeting" }
//!
//! [[state]]
//! name = "contacts.detail"
//! url = "/{id:int}"
//! ```

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use waypost_core::{Params, ServiceMap};
use waypost_resolve::Rejection;
use waypost_state::{StateDeclaration, StateEngine, TemplateLoader};

use crate::config::WaypostConfig;

/// A parsed manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    /// Named values for the injector.
    pub services: BTreeMap<String, Value>,

    /// State declarations, in file order.
    #[serde(rename = "state")]
    pub states: Vec<StateDeclaration>,

    #[serde(skip)]
    dir: Option<PathBuf>,
}

impl Manifest {
    /// Parse a manifest from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid states manifest")
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read manifest {}", path.display()))?;
        let mut manifest =
            Self::parse(&text).with_context(|| format!("In manifest {}", path.display()))?;
        manifest.dir = path.parent().map(Path::to_path_buf);
        log::debug!(
            "Loaded {} states from {}",
            manifest.states.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Directory the manifest was read from.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Build an engine at `url` and register every state.
    ///
    /// Fails if a state is invalid or a parent never appears.
    pub fn engine(&self, config: &WaypostConfig, url: &str) -> Result<StateEngine> {
        let services: ServiceMap = self.services.clone().into_iter().collect();
        let templates = config
            .templates
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| self.dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));

        let engine = StateEngine::builder()
            .factory(config.matcher.factory())
            .injector(Arc::new(services))
            .template_loader(Arc::new(FileTemplates::new(templates)))
            .location(config.location.location(url))
            .router_config(config.router.clone())
            .build()?;

        for declaration in &self.states {
            let outcome = engine
                .register(declaration.clone())
                .with_context(|| format!("Could not register state '{}'", declaration.name))?;
            if let Some((name, e)) = outcome.rejected().first() {
                bail!("Could not register state '{name}': {e}");
            }
        }
        let pending = engine.pending();
        if !pending.is_empty() {
            bail!("States waiting for a parent that never appeared: {}", pending.join(", "));
        }
        Ok(engine)
    }
}

/// Reads view templates from a directory.
#[derive(Debug, Clone)]
pub struct FileTemplates {
    root: PathBuf,
}

impl FileTemplates {
    /// Templates under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TemplateLoader for FileTemplates {
    async fn load(&self, url: &str, _params: &Params) -> Result<String, Rejection> {
        let path = self.root.join(url.trim_start_matches('/'));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Rejection::new(format!("Template {}: {e}", path.display())))
    }
}

/// Parse `key=value` arguments. Values stay strings; parameter types
/// decode them.
pub fn parse_params(args: &[String]) -> Result<Params> {
    args.iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                Ok((key.to_string(), Value::String(value.to_string())))
            }
            _ => bail!("Expected KEY=VALUE, got '{arg}'"),
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
