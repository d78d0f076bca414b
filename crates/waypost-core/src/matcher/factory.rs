//! Configuration seam for compiling URL matchers.
//!
//! A [`MatcherFactory`] carries the defaults every compiled pattern shares:
//! case sensitivity, trailing-slash strictness, the default squash policy,
//! the type registry and the injector slot used by injectable defaults.

use std::any::Any;
use std::sync::Arc;

use super::{MatcherConfig, UrlMatcher};
use crate::error::Result;
use crate::injector::{Injector, InjectorSlot};
use crate::param::{ParamContext, SquashPolicy};
use crate::types::{TypeCodec, TypeRegistry};

/// Compiles [`UrlMatcher`]s with shared defaults.
#[derive(Debug, Clone)]
pub struct MatcherFactory {
    case_insensitive: bool,
    strict: bool,
    default_squash: SquashPolicy,
    registry: Arc<TypeRegistry>,
    injector: InjectorSlot,
}

impl Default for MatcherFactory {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            strict: true,
            default_squash: SquashPolicy::Off,
            registry: Arc::new(TypeRegistry::new()),
            injector: InjectorSlot::new(),
        }
    }
}

impl MatcherFactory {
    /// Create a factory with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Match case-insensitively by default.
    pub fn with_case_insensitive(mut self, value: bool) -> Self {
        self.case_insensitive = value;
        self
    }

    /// Require exact trailing slashes by default.
    pub fn with_strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }

    /// Squash policy for optional parameters that do not configure one.
    pub fn with_default_squash(mut self, policy: SquashPolicy) -> Self {
        self.default_squash = policy;
        self
    }

    /// Whether matching is case-insensitive.
    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Whether trailing slashes must match exactly.
    pub fn strict(&self) -> bool {
        self.strict
    }

    /// The default squash policy.
    pub fn default_squash(&self) -> &SquashPolicy {
        &self.default_squash
    }

    /// Change case sensitivity.
    pub fn set_case_insensitive(&mut self, value: bool) {
        self.case_insensitive = value;
    }

    /// Change strictness.
    pub fn set_strict(&mut self, value: bool) {
        self.strict = value;
    }

    /// Change the default squash policy.
    pub fn set_default_squash(&mut self, policy: SquashPolicy) {
        self.default_squash = policy;
    }

    /// The type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Register a custom parameter type.
    ///
    /// Matchers compiled earlier keep the types they were compiled with.
    pub fn register_type(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        codec: Arc<dyn TypeCodec>,
    ) -> Result<()> {
        Arc::make_mut(&mut self.registry).register(name, pattern, codec)
    }

    /// Install the run-time injector. Returns `false` if one was already set.
    pub fn set_injector(&self, injector: Arc<dyn Injector>) -> bool {
        let installed = self.injector.install(injector);
        if installed {
            log::debug!("Injector installed; injectable defaults are now available");
        }
        installed
    }

    /// The shared injector slot.
    pub fn injector(&self) -> &InjectorSlot {
        &self.injector
    }

    /// The context handed to every parameter this factory builds.
    pub fn context(&self) -> ParamContext {
        ParamContext {
            registry: Arc::clone(&self.registry),
            default_squash: self.default_squash.clone(),
            injector: self.injector.clone(),
        }
    }

    /// Compile a pattern using this factory's defaults where `config`
    /// leaves an option unset.
    pub fn compile(&self, pattern: &str, config: &MatcherConfig) -> Result<UrlMatcher> {
        let config = MatcherConfig {
            case_insensitive: Some(config.case_insensitive.unwrap_or(self.case_insensitive)),
            strict: Some(config.strict.unwrap_or(self.strict)),
            params: config.params.clone(),
        };
        UrlMatcher::new(pattern, &config, &self.context())
    }

    /// Whether `value` is a compiled matcher.
    pub fn is_matcher(value: &dyn Any) -> bool {
        value.is::<UrlMatcher>() || value.is::<Arc<UrlMatcher>>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Params;
    use crate::injector::ServiceMap;
    use crate::param::{ParamConfig, ParamDefault};
    use crate::types::StringCodec;
    use serde_json::{Value, json};

    #[test]
    fn test_factory_defaults_apply() {
        let factory = MatcherFactory::new()
            .with_case_insensitive(true)
            .with_strict(false);
        let m = factory.compile("/Home/", &MatcherConfig::default()).unwrap();
        assert!(m.exec("/home", &Params::new()).unwrap().is_some());
    }

    #[test]
    fn test_pattern_config_overrides_factory() {
        let factory = MatcherFactory::new().with_case_insensitive(true);
        let config = MatcherConfig::default().with_case_insensitive(false);
        let m = factory.compile("/Home", &config).unwrap();
        assert!(m.exec("/home", &Params::new()).unwrap().is_none());
    }

    #[test]
    fn test_default_squash_applies_to_optional() {
        let factory = MatcherFactory::new().with_default_squash(SquashPolicy::Collapse);
        let config = MatcherConfig::default().with_param("page", ParamConfig::with_default(1));
        let m = factory.compile("/list/{page:int}", &config).unwrap();
        let values: Params = [("page".to_string(), json!(1))].into_iter().collect();
        assert_eq!(m.format(&values).unwrap().as_deref(), Some("/list"));
    }

    #[test]
    fn test_register_type_used_by_patterns() {
        let mut factory = MatcherFactory::new();
        factory
            .register_type("hex", "[0-9a-f]+", Arc::new(StringCodec))
            .unwrap();
        let m = factory.compile("/c/{color:hex}", &MatcherConfig::default()).unwrap();
        assert!(m.exec("/c/ff00aa", &Params::new()).unwrap().is_some());
        assert!(m.exec("/c/zz", &Params::new()).unwrap().is_none());
    }

    #[test]
    fn test_register_type_does_not_touch_clones() {
        let original = MatcherFactory::new();
        let mut extended = original.clone();
        extended
            .register_type("hex", "[0-9a-f]+", Arc::new(StringCodec))
            .unwrap();
        assert!(!original.registry().contains("hex"));
        assert!(extended.registry().contains("hex"));
    }

    #[test]
    fn test_injector_reaches_compiled_params() {
        let factory = MatcherFactory::new();
        let config = MatcherConfig::default().with_param(
            "lang",
            ParamConfig::default().value(ParamDefault::injectable(|inj| {
                inj.get("locale").unwrap_or(Value::Null)
            })),
        );
        let m = factory.compile("/docs?lang", &config).unwrap();
        assert!(m.exec("/docs", &Params::new()).is_err());

        assert!(factory.set_injector(Arc::new(ServiceMap::new().with("locale", "fr"))));
        let values = m.exec("/docs", &Params::new()).unwrap().unwrap();
        assert_eq!(values.get("lang"), Some(&json!("fr")));
        assert!(!factory.set_injector(Arc::new(ServiceMap::new())));
    }

    #[test]
    fn test_is_matcher() {
        let m = MatcherFactory::new()
            .compile("/a", &MatcherConfig::default())
            .unwrap();
        assert!(MatcherFactory::is_matcher(&m));
        assert!(MatcherFactory::is_matcher(&Arc::new(m)));
        assert!(!MatcherFactory::is_matcher(&"/a"));
    }
}
