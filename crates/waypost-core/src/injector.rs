//! Service-locator seam.
//!
//! The navigation engine never constructs services itself. Named values are
//! fetched from an [`Injector`] supplied by the host application: resolve
//! entries that reference a service by name, dependencies that are not
//! produced by a resolve map, and injectable parameter defaults.
//!
//! The [`InjectorSlot`] models the boundary between configuration time and
//! run time: parameters are compiled before any injector exists and hold a
//! shared slot that is filled once the application starts.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Resolves named services.
pub trait Injector: Send + Sync {
    /// Fetch a service by name.
    fn get(&self, name: &str) -> Option<Value>;

    /// Whether a service with this name exists.
    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// A simple in-memory injector backed by a map.
#[derive(Debug, Clone, Default)]
pub struct ServiceMap {
    services: HashMap<String, Value>,
}

impl ServiceMap {
    /// Create an empty service map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous value under that name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.services.insert(name.into(), value.into());
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Injector for ServiceMap {
    fn get(&self, name: &str) -> Option<Value> {
        self.services.get(name).cloned()
    }

    fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ServiceMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            services: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Write-once holder for the run-time injector.
///
/// Cloning is cheap and every clone observes the same slot.
#[derive(Clone, Default)]
pub struct InjectorSlot(Arc<OnceLock<Arc<dyn Injector>>>);

impl InjectorSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the injector. Returns `false` if one was already installed.
    pub fn install(&self, injector: Arc<dyn Injector>) -> bool {
        self.0.set(injector).is_ok()
    }

    /// The installed injector, if run time has started.
    pub fn get(&self) -> Option<&Arc<dyn Injector>> {
        self.0.get()
    }

    /// Whether an injector has been installed.
    pub fn is_installed(&self) -> bool {
        self.0.get().is_some()
    }
}

impl fmt::Debug for InjectorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectorSlot")
            .field("installed", &self.is_installed())
            .finish()
    }
}
