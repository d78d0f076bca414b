//! Parameters and layered parameter sets.
//!
//! A [`Param`] is a single named value slot declared by a URL pattern (path or
//! search placeholder) or by state configuration. It owns the rules for
//! turning a raw value into its typed form: replacement rules, type
//! normalization and defaulting.
//!
//! A [`ParamSet`] is the ordered collection of parameters a URL matcher or a
//! state declares. Sets are layered: a child set only stores its own entries
//! and keeps an `Arc` to its parent, so lookups walk the chain outward.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::Params;
use crate::error::{Error, Result};
use crate::injector::{Injector, InjectorSlot};
use crate::types::{ANY, ArrayMode, ParamType, STRING, TypeRegistry};

// ============================================================================
// Configuration types
// ============================================================================

/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// A placeholder in the URL path.
    Path,
    /// A query-string key.
    Search,
    /// Declared only in state configuration; never appears in a URL.
    Config,
}

/// What a formatted URL does with a parameter whose value equals its default.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "SquashRepr")]
pub enum SquashPolicy {
    /// Always emit the value.
    #[default]
    Off,
    /// Emit nothing and drop one adjoining slash.
    Collapse,
    /// Emit this literal instead of the value.
    Literal(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SquashRepr {
    Flag(bool),
    Literal(String),
}

impl From<SquashRepr> for SquashPolicy {
    fn from(repr: SquashRepr) -> Self {
        match repr {
            SquashRepr::Flag(true) => SquashPolicy::Collapse,
            SquashRepr::Flag(false) => SquashPolicy::Off,
            SquashRepr::Literal(s) => SquashPolicy::Literal(s),
        }
    }
}

/// Replace a raw string with another value before decoding.
///
/// A `Null` target means "absent".
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplaceRule {
    /// Raw string to match.
    pub from: String,
    /// Replacement value.
    #[serde(default)]
    pub to: Value,
}

impl ReplaceRule {
    /// Create a rule.
    pub fn new(from: impl Into<String>, to: Value) -> Self {
        Self {
            from: from.into(),
            to,
        }
    }
}

/// Computes a default value from run-time services.
pub type InjectableFn = Arc<dyn Fn(&dyn Injector) -> Value + Send + Sync>;

/// A parameter's default.
#[derive(Clone)]
pub enum ParamDefault {
    /// A fixed value.
    Value(Value),
    /// Computed at run time from the injector.
    Injectable(InjectableFn),
}

impl ParamDefault {
    /// Wrap a function evaluated against the run-time injector.
    pub fn injectable<F>(f: F) -> Self
    where
        F: Fn(&dyn Injector) -> Value + Send + Sync + 'static,
    {
        Self::Injectable(Arc::new(f))
    }
}

impl fmt::Debug for ParamDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Injectable(_) => f.write_str("Injectable(..)"),
        }
    }
}

/// How a parameter's type is given in configuration.
#[derive(Debug, Clone)]
pub enum TypeRef {
    /// A registered type name.
    Named(String),
    /// A type built in code.
    Inline(ParamType),
}

/// Per-parameter configuration.
///
/// Deserializes either from a full record
/// (`{ value, type, array, squash, replace }`) or from a bare value, which
/// is taken as the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "Value")]
pub struct ParamConfig {
    /// Default value.
    pub value: Option<ParamDefault>,
    /// Explicit type.
    pub type_ref: Option<TypeRef>,
    /// Explicit array mode.
    pub array: Option<ArrayMode>,
    /// Explicit squash policy.
    pub squash: Option<SquashPolicy>,
    /// Replacement rules applied to raw values.
    pub replace: Vec<ReplaceRule>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamConfigRecord {
    #[serde(default)]
    value: Option<Value>,
    #[serde(default, rename = "type")]
    type_name: Option<String>,
    #[serde(default)]
    array: Option<ArrayMode>,
    #[serde(default)]
    squash: Option<SquashPolicy>,
    #[serde(default)]
    replace: Vec<ReplaceRule>,
}

const CONFIG_KEYS: [&str; 5] = ["value", "type", "array", "squash", "replace"];

impl TryFrom<Value> for ParamConfig {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        let is_record = value
            .as_object()
            .is_some_and(|o| CONFIG_KEYS.iter().any(|k| o.contains_key(*k)));
        if !is_record {
            return Ok(Self::with_default(value));
        }
        let record: ParamConfigRecord =
            serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Self {
            value: record.value.map(ParamDefault::Value),
            type_ref: record.type_name.map(TypeRef::Named),
            array: record.array,
            squash: record.squash,
            replace: record.replace,
        })
    }
}

impl ParamConfig {
    /// Shorthand for a config that only sets a default.
    pub fn with_default(value: impl Into<Value>) -> Self {
        Self {
            value: Some(ParamDefault::Value(value.into())),
            ..Self::default()
        }
    }

    /// Set the default.
    pub fn value(mut self, value: ParamDefault) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the type by registered name.
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_ref = Some(TypeRef::Named(name.into()));
        self
    }

    /// Set the type directly.
    pub fn param_type(mut self, param_type: ParamType) -> Self {
        self.type_ref = Some(TypeRef::Inline(param_type));
        self
    }

    /// Set the array mode.
    pub fn array(mut self, mode: ArrayMode) -> Self {
        self.array = Some(mode);
        self
    }

    /// Set the squash policy.
    pub fn squash(mut self, policy: SquashPolicy) -> Self {
        self.squash = Some(policy);
        self
    }

    /// Add a replacement rule.
    pub fn replace(mut self, rule: ReplaceRule) -> Self {
        self.replace.push(rule);
        self
    }
}

/// Everything a parameter needs from its factory.
#[derive(Debug, Clone)]
pub struct ParamContext {
    /// Types available by name.
    pub registry: Arc<TypeRegistry>,
    /// Squash policy for optional parameters that do not set one.
    pub default_squash: SquashPolicy,
    /// Run-time injector, once installed.
    pub injector: InjectorSlot,
}

impl Default for ParamContext {
    fn default() -> Self {
        Self {
            registry: Arc::new(TypeRegistry::new()),
            default_squash: SquashPolicy::Off,
            injector: InjectorSlot::new(),
        }
    }
}

// ============================================================================
// Param
// ============================================================================

/// A declared parameter.
#[derive(Debug, Clone)]
pub struct Param {
    id: String,
    param_type: ParamType,
    location: ParamLocation,
    array: ArrayMode,
    default: Option<ParamDefault>,
    squash: SquashPolicy,
    replace: Vec<ReplaceRule>,
    injector: InjectorSlot,
}

impl Param {
    /// Build a parameter.
    ///
    /// `url_type` is the type implied by a URL placeholder, if any. Giving a
    /// type both there and in `config` is an error.
    pub fn new(
        id: impl Into<String>,
        url_type: Option<ParamType>,
        config: Option<&ParamConfig>,
        location: ParamLocation,
        ctx: &ParamContext,
    ) -> Result<Self> {
        let id = id.into();
        let empty = ParamConfig::default();
        let config = config.unwrap_or(&empty);

        let base_type = match (url_type, &config.type_ref) {
            (Some(_), Some(_)) => {
                return Err(Error::config(format!(
                    "Param '{id}' has two type configurations."
                )));
            }
            (Some(t), None) => t,
            (None, Some(TypeRef::Inline(t))) => t.clone(),
            (None, Some(TypeRef::Named(name))) => ctx.registry.require(name)?,
            (None, None) if location == ParamLocation::Config => ctx.registry.require(ANY)?,
            (None, None) => ctx.registry.require(STRING)?,
        };

        let array = config.array.unwrap_or(if id.ends_with("[]") {
            ArrayMode::On
        } else if location == ParamLocation::Search {
            ArrayMode::Auto
        } else {
            ArrayMode::Off
        });
        let param_type = match array {
            ArrayMode::Off => base_type,
            mode => base_type.as_array(mode, location == ParamLocation::Search)?,
        };

        let default = config.value.clone();
        let is_optional = default.is_some() || location == ParamLocation::Search;

        let squash = match (&config.squash, is_optional) {
            (_, false) | (Some(SquashPolicy::Off), _) => SquashPolicy::Off,
            (None, true) => ctx.default_squash.clone(),
            (Some(policy), true) => policy.clone(),
        };

        let replace = Self::replace_rules(config, array, is_optional, &squash);

        Ok(Self {
            id,
            param_type,
            location,
            array,
            default,
            squash,
            replace,
            injector: ctx.injector.clone(),
        })
    }

    fn replace_rules(
        config: &ParamConfig,
        array: ArrayMode,
        is_optional: bool,
        squash: &SquashPolicy,
    ) -> Vec<ReplaceRule> {
        let empty_to = if is_optional || array != ArrayMode::Off {
            Value::Null
        } else {
            Value::from("")
        };

        let mut configured = config.replace.clone();
        if let SquashPolicy::Literal(s) = squash {
            configured.push(ReplaceRule::new(s.clone(), Value::Null));
        }

        let mut rules = Vec::with_capacity(configured.len() + 1);
        if !configured.iter().any(|r| r.from.is_empty()) {
            rules.push(ReplaceRule::new("", empty_to));
        }
        rules.extend(configured);
        rules
    }

    /// Parameter id, as declared.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The parameter's type, with its array mode applied.
    pub fn param_type(&self) -> &ParamType {
        &self.param_type
    }

    /// Where the value comes from.
    pub fn location(&self) -> ParamLocation {
        self.location
    }

    /// Array mode.
    pub fn array(&self) -> ArrayMode {
        self.array
    }

    /// Whether the parameter may be absent.
    pub fn is_optional(&self) -> bool {
        self.default.is_some() || self.location == ParamLocation::Search
    }

    /// Whether a default is configured.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Effective squash policy.
    pub fn squash(&self) -> &SquashPolicy {
        &self.squash
    }

    /// Effective replacement rules, in application order.
    pub fn replace(&self) -> &[ReplaceRule] {
        &self.replace
    }

    /// Apply replacement rules to a raw value.
    pub fn apply_replace(&self, raw: &Value) -> Value {
        raw.as_str()
            .and_then(|s| self.replace.iter().find(|r| r.from == s))
            .map_or_else(|| raw.clone(), |r| r.to.clone())
    }

    /// Compute the default value. `Null` if none is configured.
    pub fn default_value(&self) -> Result<Value> {
        let value = match &self.default {
            None => return Ok(Value::Null),
            Some(ParamDefault::Value(v)) => v.clone(),
            Some(ParamDefault::Injectable(f)) => {
                let injector = self
                    .injector
                    .get()
                    .ok_or_else(|| Error::InjectorUnavailable(self.id.clone()))?;
                f(injector.as_ref())
            }
        };
        if !value.is_null() && !self.param_type.is(&value) {
            return Err(Error::InvalidDefault {
                id: self.id.clone(),
                type_name: self.param_type.display_name().to_string(),
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    /// Turn a raw value into the parameter's typed value.
    ///
    /// Replacement rules run first, then type normalization; an absent result
    /// falls back to the default.
    pub fn value(&self, raw: &Value) -> Result<Value> {
        let replaced = self.apply_replace(raw);
        if replaced.is_null() {
            self.default_value()
        } else {
            Ok(self.param_type.normalize(&replaced))
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{Param:{} {} squash: {:?} optional: {}}}",
            self.id,
            self.param_type,
            self.squash,
            self.is_optional()
        )
    }
}

// ============================================================================
// ParamSet
// ============================================================================

/// An ordered, layered collection of parameters.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    params: Vec<Param>,
    parent: Option<Arc<ParamSet>>,
}

impl ParamSet {
    /// Create an empty root set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set layered onto `parent`.
    pub fn child(parent: &Arc<ParamSet>) -> Self {
        Self {
            params: Vec::new(),
            parent: Some(Arc::clone(parent)),
        }
    }

    /// The parent layer.
    pub fn parent(&self) -> Option<&Arc<ParamSet>> {
        self.parent.as_ref()
    }

    /// Add a parameter to this layer.
    pub fn insert(&mut self, param: Param) -> Result<()> {
        if self.get(param.id()).is_some() {
            return Err(Error::duplicate_param(param.id(), "parameter set"));
        }
        self.params.push(param);
        Ok(())
    }

    /// Nearest-first lookup through the chain.
    pub fn get(&self, id: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.id == id)
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(id)))
    }

    /// Whether this layer itself declares `id`.
    pub fn contains_own(&self, id: &str) -> bool {
        self.params.iter().any(|p| p.id == id)
    }

    /// Parameters declared by this layer only.
    pub fn own(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    /// Ids declared by this layer only.
    pub fn own_keys(&self) -> Vec<String> {
        self.params.iter().map(|p| p.id.clone()).collect()
    }

    /// All ids in the chain, parent-first.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self.parent.as_ref().map(|p| p.keys()).unwrap_or_default();
        for id in self.own_keys() {
            if !keys.contains(&id) {
                keys.push(id);
            }
        }
        keys
    }

    /// All parameters in the chain, parent-first.
    pub fn all(&self) -> Vec<&Param> {
        self.keys().iter().filter_map(|k| self.get(k)).collect()
    }

    /// Number of parameters in the whole chain.
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether the chain declares no parameters.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.parent.as_ref().is_none_or(|p| p.is_empty())
    }

    /// Compute every parameter's value from raw input.
    ///
    /// Absent results are omitted from the output.
    pub fn values(&self, raw: &Params) -> Result<Params> {
        let mut out = Params::new();
        for param in self.all() {
            let value = param.value(raw.get(param.id()).unwrap_or(&Value::Null))?;
            if !value.is_null() {
                out.insert(param.id().to_string(), value);
            }
        }
        Ok(out)
    }

    /// Whether two value maps agree on every parameter of the chain.
    pub fn equals(&self, a: &Params, b: &Params) -> bool {
        self.all().iter().all(|param| {
            let left = a.get(param.id()).unwrap_or(&Value::Null);
            let right = b.get(param.id()).unwrap_or(&Value::Null);
            param.param_type().equals(left, right)
        })
    }

    /// Whether every parameter accepts its value.
    ///
    /// Optional parameters with an absent value are skipped.
    pub fn validates(&self, values: &Params) -> bool {
        self.all().iter().all(|param| {
            let raw = values.get(param.id()).unwrap_or(&Value::Null);
            if raw.is_null() && param.is_optional() {
                return true;
            }
            let t = param.param_type();
            let normalized = t.normalize(raw);
            if !t.is(&normalized) {
                return false;
            }
            match t.encode(&normalized) {
                Value::String(s) => t.pattern_matches(&s),
                _ => true,
            }
        })
    }

    /// Keep only entries the chain declares.
    pub fn filter(&self, values: &Params) -> Params {
        values
            .iter()
            .filter(|(k, _)| self.get(k).is_some())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::injector::ServiceMap;
    use serde_json::json;

    fn ctx() -> ParamContext {
        ParamContext::default()
    }

    fn param(id: &str, config: Option<ParamConfig>, location: ParamLocation) -> Param {
        Param::new(id, None, config.as_ref(), location, &ctx()).unwrap()
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // ParamConfig
    // ------------------------------------------------------------------------

    #[test]
    fn test_config_bare_value_is_default() {
        let config: ParamConfig = serde_json::from_value(json!(5)).unwrap();
        assert!(matches!(config.value, Some(ParamDefault::Value(ref v)) if *v == json!(5)));
        assert!(config.type_ref.is_none());
    }

    #[test]
    fn test_config_object_without_known_keys_is_default() {
        let config: ParamConfig = serde_json::from_value(json!({"a": 1})).unwrap();
        assert!(matches!(config.value, Some(ParamDefault::Value(ref v)) if *v == json!({"a": 1})));
    }

    #[test]
    fn test_config_full_record() {
        let config: ParamConfig = serde_json::from_value(json!({
            "value": 1,
            "type": "int",
            "squash": "~",
            "replace": [{"from": "none", "to": null}],
        }))
        .unwrap();
        assert!(matches!(config.type_ref, Some(TypeRef::Named(ref n)) if n == "int"));
        assert_eq!(config.squash, Some(SquashPolicy::Literal("~".into())));
        assert_eq!(config.replace.len(), 1);
    }

    #[test]
    fn test_config_record_rejects_unknown_fields() {
        let result = serde_json::from_value::<ParamConfig>(json!({"value": 1, "colour": "red"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: ParamConfig = toml::from_str("value = 3\nsquash = true\n").unwrap();
        assert_eq!(config.squash, Some(SquashPolicy::Collapse));
    }

    // ------------------------------------------------------------------------
    // Param construction
    // ------------------------------------------------------------------------

    #[test]
    fn test_two_type_sources_fail() {
        let config = ParamConfig::default().type_name("int");
        let string = ctx().registry.require("string").unwrap();
        let err = Param::new("id", Some(string), Some(&config), ParamLocation::Path, &ctx())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_types_by_location() {
        assert_eq!(param("a", None, ParamLocation::Path).param_type().name(), Some("string"));
        assert_eq!(param("a", None, ParamLocation::Config).param_type().name(), Some("any"));
    }

    #[test]
    fn test_unknown_named_type_fails() {
        let config = ParamConfig::default().type_name("uuid");
        let err = Param::new("a", None, Some(&config), ParamLocation::Path, &ctx()).unwrap_err();
        assert_eq!(err, Error::UnknownType("uuid".into()));
    }

    #[test]
    fn test_array_modes() {
        assert_eq!(param("q", None, ParamLocation::Search).array(), ArrayMode::Auto);
        assert_eq!(param("ids[]", None, ParamLocation::Path).array(), ArrayMode::On);
        assert_eq!(param("id", None, ParamLocation::Path).array(), ArrayMode::Off);
        let explicit = ParamConfig::default().array(ArrayMode::Off);
        assert_eq!(
            param("tags[]", Some(explicit), ParamLocation::Search).array(),
            ArrayMode::Off
        );
    }

    #[test]
    fn test_auto_array_on_path_fails() {
        let config = ParamConfig::default().array(ArrayMode::Auto);
        assert!(Param::new("a", None, Some(&config), ParamLocation::Path, &ctx()).is_err());
    }

    #[test]
    fn test_required_param_never_squashes() {
        let config = ParamConfig::default().squash(SquashPolicy::Collapse);
        let p = param("id", Some(config), ParamLocation::Path);
        assert_eq!(p.squash(), &SquashPolicy::Off);
        assert!(!p.is_optional());
    }

    #[test]
    fn test_optional_param_uses_factory_squash() {
        let ctx = ParamContext {
            default_squash: SquashPolicy::Collapse,
            ..ParamContext::default()
        };
        let config = ParamConfig::with_default("x");
        let p = Param::new("id", None, Some(&config), ParamLocation::Path, &ctx).unwrap();
        assert_eq!(p.squash(), &SquashPolicy::Collapse);
    }

    #[test]
    fn test_default_replace_rules() {
        let required = param("id", None, ParamLocation::Path);
        assert_eq!(required.replace(), &[ReplaceRule::new("", json!(""))]);

        let optional = param("id", Some(ParamConfig::with_default("x")), ParamLocation::Path);
        assert_eq!(optional.replace(), &[ReplaceRule::new("", Value::Null)]);
    }

    #[test]
    fn test_literal_squash_adds_replace_rule() {
        let config = ParamConfig::with_default("x").squash(SquashPolicy::Literal("~".into()));
        let p = param("id", Some(config), ParamLocation::Path);
        assert_eq!(p.apply_replace(&json!("~")), Value::Null);
        assert_eq!(p.value(&json!("~")).unwrap(), json!("x"));
    }

    #[test]
    fn test_user_replace_rule_overrides_default() {
        let config = ParamConfig::with_default("x").replace(ReplaceRule::new("", json!("blank")));
        let p = param("id", Some(config), ParamLocation::Path);
        assert_eq!(p.replace().len(), 1);
        assert_eq!(p.value(&json!("")).unwrap(), json!("blank"));
    }

    // ------------------------------------------------------------------------
    // Param values
    // ------------------------------------------------------------------------

    #[test]
    fn test_value_normalizes() {
        let config = ParamConfig::default().type_name("int");
        let p = param("page", Some(config), ParamLocation::Path);
        assert_eq!(p.value(&json!("7")).unwrap(), json!(7));
    }

    #[test]
    fn test_value_falls_back_to_default() {
        let config = ParamConfig::with_default(1).type_name("int");
        let p = param("page", Some(config), ParamLocation::Path);
        assert_eq!(p.value(&Value::Null).unwrap(), json!(1));
        assert_eq!(p.value(&json!("")).unwrap(), json!(1));
    }

    #[test]
    fn test_required_string_is_not_defaulted() {
        let p = param("name", None, ParamLocation::Path);
        assert_eq!(p.value(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_invalid_default_fails() {
        let config = ParamConfig::with_default("one").type_name("int");
        let p = param("page", Some(config), ParamLocation::Path);
        assert!(matches!(p.value(&Value::Null), Err(Error::InvalidDefault { .. })));
    }

    #[test]
    fn test_injectable_default_needs_injector() {
        let ctx = ctx();
        let config = ParamConfig::default()
            .value(ParamDefault::injectable(|inj| inj.get("page_size").unwrap_or(Value::Null)))
            .type_name("int");
        let p = Param::new("size", None, Some(&config), ParamLocation::Search, &ctx).unwrap();
        assert_eq!(
            p.default_value().unwrap_err(),
            Error::InjectorUnavailable("size".into())
        );

        ctx.injector
            .install(Arc::new(ServiceMap::new().with("page_size", 25)));
        assert_eq!(p.default_value().unwrap(), json!(25));
    }

    // ------------------------------------------------------------------------
    // ParamSet
    // ------------------------------------------------------------------------

    fn layered() -> ParamSet {
        let mut parent = ParamSet::new();
        parent.insert(param("a", None, ParamLocation::Path)).unwrap();
        let parent = Arc::new(parent);

        let mut child = ParamSet::child(&parent);
        let config = ParamConfig::with_default(1).type_name("int");
        child.insert(param("b", Some(config), ParamLocation::Path)).unwrap();
        child
    }

    #[test]
    fn test_set_keys_parent_first() {
        assert_eq!(layered().keys(), vec!["a", "b"]);
        assert_eq!(layered().own_keys(), vec!["b"]);
        assert_eq!(layered().len(), 2);
    }

    #[test]
    fn test_set_duplicate_in_chain_fails() {
        let mut set = layered();
        let err = set.insert(param("a", None, ParamLocation::Path)).unwrap_err();
        assert!(matches!(err, Error::DuplicateParam { .. }));
    }

    #[test]
    fn test_set_values_applies_defaults() {
        let values = layered().values(&params(&[("a", json!("x"))])).unwrap();
        assert_eq!(values, params(&[("a", json!("x")), ("b", json!(1))]));
    }

    #[test]
    fn test_set_values_omits_absent() {
        let values = layered().values(&Params::new()).unwrap();
        assert_eq!(values, params(&[("b", json!(1))]));
    }

    #[test]
    fn test_set_equals() {
        let set = layered();
        assert!(set.equals(
            &params(&[("a", json!("x")), ("b", json!(2))]),
            &params(&[("a", json!("x")), ("b", json!(2)), ("extra", json!(0))])
        ));
        assert!(!set.equals(&params(&[("a", json!("x"))]), &params(&[("a", json!("y"))])));
    }

    #[test]
    fn test_set_validates() {
        let set = layered();
        assert!(set.validates(&params(&[("a", json!("x"))])));
        assert!(set.validates(&params(&[("a", json!("x")), ("b", json!("3"))])));
        assert!(!set.validates(&params(&[("a", json!("x")), ("b", json!("three"))])));
    }

    #[test]
    fn test_set_validates_checks_pattern() {
        let t = ctx().registry.require("string").unwrap().with_pattern("^[a-z]+$", false).unwrap();
        let mut set = ParamSet::new();
        set.insert(
            Param::new("slug", Some(t), None, ParamLocation::Path, &ctx()).unwrap(),
        )
        .unwrap();
        assert!(set.validates(&params(&[("slug", json!("abc"))])));
        assert!(!set.validates(&params(&[("slug", json!("ABC1"))])));
    }

    #[test]
    fn test_set_filter() {
        let filtered = layered().filter(&params(&[("a", json!(1)), ("zzz", json!(2))]));
        assert_eq!(filtered, params(&[("a", json!(1))]));
    }
}
