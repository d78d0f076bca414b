//! URL pattern matching.
//!
//! A [`UrlMatcher`] is compiled from a pattern such as
//! `/users/{id:int}/posts/:slug?sort&page` and can both match a URL
//! ([`UrlMatcher::exec`]) and build one back from parameter values
//! ([`UrlMatcher::format`]).
//!
//! # Pattern syntax
//!
//! - `:name` – a path parameter matching anything except `/`
//! - `*name` – a catch-all path parameter
//! - `{name}` – same as `:name`
//! - `{name:type}` – a path parameter of a registered type (`int`, `date`, ...)
//! - `{name:regexp}` – a path parameter constrained by a regular expression
//! - `?a&b` – search (query) parameters; everything after the first `?`
//!
//! Custom regexps must not contain capture groups of their own; use `(?:...)`.

pub mod factory;
pub mod pattern;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::Params;
use crate::error::{Error, Result};
use crate::param::{Param, ParamConfig, ParamContext, ParamLocation, ParamSet, SquashPolicy};
use crate::types::{ArrayMode, ParamType, STRING, scalar_to_string};
use pattern::{Scanners, decode_path_array, decode_uri_component, encode_dashes, encode_uri_component, quote};

pub use factory::MatcherFactory;

/// Per-pattern compile options.
///
/// Unset options fall back to the factory (or the parent matcher on
/// [`UrlMatcher::concat`]).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Match case-insensitively.
    pub case_insensitive: Option<bool>,
    /// Require an exact trailing slash.
    pub strict: Option<bool>,
    /// Per-parameter configuration, keyed by id.
    pub params: BTreeMap<String, ParamConfig>,
}

impl MatcherConfig {
    /// Add a parameter config.
    pub fn with_param(mut self, id: impl Into<String>, config: ParamConfig) -> Self {
        self.params.insert(id.into(), config);
        self
    }

    /// Set case-insensitivity.
    pub fn with_case_insensitive(mut self, value: bool) -> Self {
        self.case_insensitive = Some(value);
        self
    }

    /// Set strict trailing-slash matching.
    pub fn with_strict(mut self, value: bool) -> Self {
        self.strict = Some(value);
        self
    }
}

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub struct UrlMatcher {
    source: String,
    source_path: String,
    source_search: String,
    segments: Vec<String>,
    regex: Regex,
    params: Arc<ParamSet>,
    param_names: Vec<String>,
    case_insensitive: bool,
    strict: bool,
    context: ParamContext,
}

impl UrlMatcher {
    /// Compile a pattern with the given parameter context.
    pub fn new(pattern: &str, config: &MatcherConfig, context: &ParamContext) -> Result<Self> {
        Self::compile(pattern, config, context, None)
    }

    fn compile(
        pattern: &str,
        config: &MatcherConfig,
        context: &ParamContext,
        parent: Option<&UrlMatcher>,
    ) -> Result<Self> {
        let case_insensitive = config
            .case_insensitive
            .or(parent.map(|p| p.case_insensitive))
            .unwrap_or(false);
        let strict = config.strict.or(parent.map(|p| p.strict)).unwrap_or(true);

        let scanners = Scanners::new()?;
        let mut builder = ParamBuilder {
            pattern,
            config,
            context,
            case_insensitive,
            scanners: &scanners,
            parent: parent.map(|p| &p.params),
            own: match parent {
                Some(p) => ParamSet::child(&p.params),
                None => ParamSet::new(),
            },
            names: Vec::new(),
            seen: HashSet::new(),
        };

        let mut compiled = String::from("^");
        let mut segments = Vec::new();
        let mut last = 0;

        for placeholder in scanners.path_placeholders(pattern) {
            let segment = &pattern[last..placeholder.start];
            if segment.contains('?') {
                break;
            }
            let regexp = placeholder
                .regexp
                .clone()
                .or_else(|| placeholder.catch_all.then(|| ".*".to_string()));
            let param = builder.add(&placeholder.id, regexp.as_deref(), ParamLocation::Path)?;
            let capture = match param.array() {
                ArrayMode::On => format!("(?:{p})(?:-(?:{p}))*", p = param.param_type().pattern()),
                _ => param.param_type().pattern().to_string(),
            };
            compiled.push_str(&quote(
                segment,
                Some(&capture),
                param.squash(),
                param.is_optional(),
            ));
            segments.push(segment.to_string());
            last = placeholder.end;
        }

        let rest = &pattern[last..];
        let (segment, source_path, source_search) = match rest.find('?') {
            Some(i) => {
                let search = &rest[i..];
                for placeholder in scanners.search_placeholders(search) {
                    builder.add(
                        &placeholder.id,
                        placeholder.regexp.as_deref(),
                        ParamLocation::Search,
                    )?;
                }
                (&rest[..i], &pattern[..last + i], search)
            }
            None => (rest, pattern, ""),
        };

        compiled.push_str(&quote(segment, None, &SquashPolicy::Off, false));
        if !strict {
            if compiled.ends_with('/') {
                compiled.pop();
            }
            compiled.push_str("/?");
        }
        compiled.push('$');
        segments.push(segment.to_string());

        let regex = RegexBuilder::new(&compiled)
            .case_insensitive(case_insensitive)
            .build()?;

        let expected = segments.len() - 1;
        let found = regex.captures_len() - 1;
        if expected != found {
            return Err(Error::UnbalancedCaptures {
                pattern: pattern.to_string(),
                expected,
                found,
            });
        }

        log::debug!("Compiled URL pattern '{}' as {}", pattern, compiled);

        let ParamBuilder { own, names, .. } = builder;
        Ok(Self {
            source: pattern.to_string(),
            source_path: source_path.to_string(),
            source_search: source_search.to_string(),
            segments,
            regex,
            params: Arc::new(own),
            param_names: names,
            case_insensitive,
            strict,
            context: context.clone(),
        })
    }

    /// A new matcher for `source_path + pattern + source_search` whose
    /// parameters chain onto this matcher's.
    pub fn concat(&self, pattern: &str, config: &MatcherConfig) -> Result<Self> {
        let combined = format!("{}{}{}", self.source_path, pattern, self.source_search);
        Self::compile(&combined, config, &self.context, Some(self))
    }

    /// Match a path (raw, still percent-encoded) plus decoded search values.
    ///
    /// Returns `Ok(None)` when the path does not match.
    pub fn exec(&self, path: &str, search: &Params) -> Result<Option<Params>> {
        let Some(caps) = self.regex.captures(path) else {
            return Ok(None);
        };

        let n_path = self.segments.len() - 1;
        if caps.len() - 1 != n_path {
            return Err(Error::UnbalancedCaptures {
                pattern: self.source.clone(),
                expected: n_path,
                found: caps.len() - 1,
            });
        }

        let mut values = Params::new();
        for (i, name) in self.param_names.iter().enumerate() {
            let param = self.param_for(name)?;
            let raw = if i < n_path {
                match caps.get(i + 1) {
                    None => Value::Null,
                    Some(m) => {
                        let decoded = decode_uri_component(m.as_str());
                        if param.array() == ArrayMode::On && !decoded.is_empty() {
                            Value::Array(
                                decode_path_array(&decoded)
                                    .into_iter()
                                    .map(Value::String)
                                    .collect(),
                            )
                        } else {
                            Value::String(decoded)
                        }
                    }
                }
            } else {
                search.get(name).cloned().unwrap_or(Value::Null)
            };

            let value = param.value(&raw)?;
            if !value.is_null() {
                values.insert(name.clone(), value);
            }
        }

        log::trace!("'{}' matched {}", self.source, path);
        Ok(Some(values))
    }

    /// Build a URL from parameter values.
    ///
    /// Returns `Ok(None)` if the values do not validate.
    pub fn format(&self, values: &Params) -> Result<Option<String>> {
        if !self.validates(values) {
            return Ok(None);
        }

        let n_path = self.segments.len() - 1;
        let mut result = self.segments[0].clone();
        let mut has_search = false;

        for (i, name) in self.param_names.iter().enumerate() {
            let param = self.param_for(name)?;
            let value = param.value(values.get(name).unwrap_or(&Value::Null))?;
            let is_default =
                param.is_optional() && param.param_type().equals(&param.default_value()?, &value);
            let squash = if is_default {
                param.squash().clone()
            } else {
                SquashPolicy::Off
            };
            let encoded = param.param_type().encode(&value);

            if i < n_path {
                let next = &self.segments[i + 1];
                match squash {
                    SquashPolicy::Off => {
                        match &encoded {
                            Value::Null => {}
                            Value::Array(items) => {
                                let joined: Vec<String> = items
                                    .iter()
                                    .filter_map(scalar_to_string)
                                    .map(|s| encode_dashes(&s))
                                    .collect();
                                result.push_str(&joined.join("-"));
                            }
                            other => {
                                if let Some(s) = scalar_to_string(other) {
                                    result.push_str(&encode_uri_component(&s));
                                }
                            }
                        }
                        result.push_str(next);
                    }
                    SquashPolicy::Collapse => {
                        if next.is_empty() {
                            if result.len() > 1 && result.ends_with('/') {
                                result.pop();
                            }
                        } else if result.ends_with('/') && next.starts_with('/') {
                            result.push_str(&next[1..]);
                        } else {
                            result.push_str(next);
                        }
                    }
                    SquashPolicy::Literal(s) => {
                        result.push_str(&s);
                        result.push_str(next);
                    }
                }
            } else {
                if encoded.is_null() || (is_default && squash != SquashPolicy::Off) {
                    continue;
                }
                let items = match encoded {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                for item in items.iter().filter_map(scalar_to_string) {
                    result.push(if has_search { '&' } else { '?' });
                    result.push_str(name);
                    result.push('=');
                    result.push_str(&encode_uri_component(&item));
                    has_search = true;
                }
            }
        }

        Ok(Some(result))
    }

    /// Whether every parameter accepts the given values.
    pub fn validates(&self, values: &Params) -> bool {
        self.params.validates(values)
    }

    fn param_for(&self, name: &str) -> Result<&Param> {
        self.params
            .get(name)
            .ok_or_else(|| Error::config(format!("Parameter '{name}' missing from '{}'", self.source)))
    }

    /// Parameter ids in pattern order (path first, then search).
    pub fn parameters(&self) -> &[String] {
        &self.param_names
    }

    /// Look up a parameter by id.
    pub fn parameter(&self, id: &str) -> Option<&Param> {
        self.params.get(id)
    }

    /// The full parameter set, including inherited layers.
    pub fn params(&self) -> &Arc<ParamSet> {
        &self.params
    }

    /// The original pattern.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The pattern up to (excluding) the search part.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// The search part, including its leading `?`, or empty.
    pub fn source_search(&self) -> &str {
        &self.source_search
    }

    /// Literal segments between path placeholders.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The first literal segment.
    pub fn prefix(&self) -> &str {
        &self.segments[0]
    }

    /// The compiled regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

impl fmt::Display for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Accumulates the parameters of one pattern compilation.
struct ParamBuilder<'a> {
    pattern: &'a str,
    config: &'a MatcherConfig,
    context: &'a ParamContext,
    case_insensitive: bool,
    scanners: &'a Scanners,
    parent: Option<&'a Arc<ParamSet>>,
    own: ParamSet,
    names: Vec<String>,
    seen: HashSet<String>,
}

impl ParamBuilder<'_> {
    fn add(&mut self, id: &str, regexp: Option<&str>, location: ParamLocation) -> Result<Param> {
        if !self.scanners.is_valid_name(id) {
            return Err(Error::InvalidParamName {
                id: id.to_string(),
                pattern: self.pattern.to_string(),
            });
        }
        if !self.seen.insert(id.to_string()) {
            return Err(Error::duplicate_param(id, self.pattern));
        }
        self.names.push(id.to_string());

        if let Some(inherited) = self.parent.and_then(|p| p.get(id)) {
            return Ok(inherited.clone());
        }

        let url_type = regexp.map(|r| self.url_type(r)).transpose()?;
        let param = Param::new(id, url_type, self.config.params.get(id), location, self.context)?;
        self.own.insert(param.clone())?;
        Ok(param)
    }

    fn url_type(&self, regexp: &str) -> Result<ParamType> {
        match self.context.registry.get(regexp) {
            Some(t) => Ok(t),
            None => self
                .context
                .registry
                .require(STRING)?
                .with_pattern(regexp, self.case_insensitive),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
