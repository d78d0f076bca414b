//! Resolve map entries.
//!
//! An [`Invocable`] produces one named value. It is either an async function
//! whose parameter names are declared up front, or a reference to a service
//! the injector provides.

use futures::future::{BoxFuture, FutureExt};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use waypost_core::Params;

use crate::error::Rejection;

/// The future returned by a resolve function.
pub type ResolveFuture = BoxFuture<'static, std::result::Result<Value, Rejection>>;

/// A resolve function: receives its declared parameters by name.
pub type ResolveFn = Arc<dyn Fn(Params) -> ResolveFuture + Send + Sync>;

/// One entry of a resolve map.
#[derive(Clone)]
pub enum Invocable {
    /// An async function with explicitly declared parameter names.
    Fn {
        /// Parameter names, in declaration order.
        deps: Vec<String>,
        /// The function itself.
        f: ResolveFn,
    },
    /// Fetch a named service from the injector.
    Service(String),
}

impl Invocable {
    /// Wrap an async function with the given parameter names.
    pub fn func<I, S, F, Fut>(deps: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, Rejection>> + Send + 'static,
    {
        Self::Fn {
            deps: deps.into_iter().map(Into::into).collect(),
            f: Arc::new(move |params| f(params).boxed()),
        }
    }

    /// An entry that always yields `value`.
    pub fn value(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::func(Vec::<String>::new(), move |_| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    /// An entry that fetches a service by name.
    pub fn service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    /// Declared parameter names. Services declare none.
    pub fn deps(&self) -> &[String] {
        match self {
            Self::Fn { deps, .. } => deps,
            Self::Service(_) => &[],
        }
    }
}

impl fmt::Debug for Invocable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fn { deps, .. } => f.debug_struct("Fn").field("deps", deps).finish(),
            Self::Service(name) => f.debug_tuple("Service").field(name).finish(),
        }
    }
}

/// An ordered resolve map.
#[derive(Debug, Clone, Default)]
pub struct Invocables {
    entries: Vec<(String, Invocable)>,
}

impl Invocables {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing (in place) any entry with the same key.
    pub fn insert(&mut self, key: impl Into<String>, invocable: Invocable) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = invocable,
            None => self.entries.push((key, invocable)),
        }
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, invocable: Invocable) -> Self {
        self.insert(key, invocable);
        self
    }

    /// Look an entry up.
    pub fn get(&self, key: &str) -> Option<&Invocable> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether the map has an entry for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Invocable)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Invocable)> for Invocables {
    fn from_iter<I: IntoIterator<Item = (K, Invocable)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Deserializes from a `key = "service-name"` table, keeping key order.
impl<'de> Deserialize<'de> for Invocables {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ServiceTable;

        impl<'de> Visitor<'de> for ServiceTable {
            type Value = Invocables;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of resolve keys to service names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut map = Invocables::new();
                while let Some((key, service)) = access.next_entry::<String, String>()? {
                    map.insert(key, Invocable::Service(service));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(ServiceTable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_replaces_in_place() {
        let mut map = Invocables::new()
            .with("a", Invocable::value(1))
            .with("b", Invocable::value(2));
        map.insert("a", Invocable::service("api"));
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(matches!(map.get("a"), Some(Invocable::Service(s)) if s == "api"));
    }

    #[test]
    fn test_deps() {
        let f = Invocable::func(["x", "y"], |_| async { Ok(Value::Null) });
        assert_eq!(f.deps(), &["x", "y"]);
        assert!(Invocable::service("api").deps().is_empty());
    }

    #[tokio::test]
    async fn test_value_invocable() {
        let Invocable::Fn { f, .. } = Invocable::value(json!({"k": 1})) else {
            unreachable!("value() builds a function entry");
        };
        assert_eq!(f(Params::new()).await.unwrap(), json!({"k": 1}));
    }

    #[test]
    fn test_deserialize_service_table() {
        let map: Invocables = toml::from_str("user = \"users\"\nsettings = \"config\"\n").unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("user"));
        assert!(matches!(map.get("settings"), Some(Invocable::Service(s)) if s == "config"));
    }

    #[test]
    fn test_debug_hides_function() {
        let f = Invocable::func(["x"], |_| async { Ok(Value::Null) });
        assert_eq!(format!("{:?}", f), r#"Fn { deps: ["x"] }"#);
    }
}
