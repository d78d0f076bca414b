//! Layered resolved values.

use serde_json::Value;
use std::sync::Arc;
use waypost_core::Params;

/// Immutable resolved values, layered over a parent's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals {
    values: Params,
    parent: Option<Arc<Locals>>,
}

impl Locals {
    /// A root layer.
    pub fn new(values: Params) -> Self {
        Self {
            values,
            parent: None,
        }
    }

    /// A layer over `parent`.
    pub fn with_parent(values: Params, parent: Arc<Locals>) -> Self {
        Self {
            values,
            parent: Some(parent),
        }
    }

    /// Nearest-first lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values
            .get(key)
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(key)))
    }

    /// Whether any layer holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Values of this layer only.
    pub fn own(&self) -> &Params {
        &self.values
    }

    /// The parent layer.
    pub fn parent(&self) -> Option<&Arc<Locals>> {
        self.parent.as_ref()
    }

    /// All keys, parent-first, each once.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.parent.as_ref().map(|p| p.keys()).unwrap_or_default();
        for key in self.values.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    /// Collapse every layer into one map, nearest values winning.
    pub fn flatten(&self) -> Params {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.flatten())
            .unwrap_or_default();
        out.extend(self.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layered() -> Locals {
        let root = Locals::new([("a".to_string(), json!(1)), ("b".to_string(), json!(2))].into());
        Locals::with_parent([("b".to_string(), json!(20)), ("c".to_string(), json!(3))].into(), Arc::new(root))
    }

    #[test]
    fn test_nearest_first() {
        let locals = layered();
        assert_eq!(locals.get("a"), Some(&json!(1)));
        assert_eq!(locals.get("b"), Some(&json!(20)));
        assert_eq!(locals.parent().unwrap().get("b"), Some(&json!(2)));
        assert!(!locals.contains("z"));
    }

    #[test]
    fn test_keys_parent_first() {
        assert_eq!(layered().keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_flatten() {
        let flat = layered().flatten();
        assert_eq!(flat.get("b"), Some(&json!(20)));
        assert_eq!(flat.len(), 3);
    }
}
