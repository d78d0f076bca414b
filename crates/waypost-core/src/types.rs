//! Parameter types and the type registry.
//!
//! A [`ParamType`] knows how to move a parameter value between its typed
//! form (a [`serde_json::Value`]) and the string form that appears in a URL.
//! The conversion itself lives behind the [`TypeCodec`] trait so that host
//! applications can register their own types next to the built-ins.
//!
//! # Built-in types
//!
//! | name     | capture pattern                 | typed form            |
//! |----------|---------------------------------|-----------------------|
//! | `string` | `[^/]*`                         | string                |
//! | `int`    | `\d+`                           | integer number        |
//! | `bool`   | `0\|1`                          | boolean               |
//! | `date`   | `YYYY-MM-DD`                    | normalized ISO string |
//! | `json`   | `[^/]*`                         | object or array       |
//! | `any`    | `.*`                            | anything              |
//!
//! `Null` always stands for "absent".

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

// ============================================================================
// Codec trait
// ============================================================================

/// Conversion rules for a parameter type.
///
/// `encode` produces the URL form (normally a `Value::String`), `decode`
/// turns a raw URL string back into the typed form, and `is` tells whether
/// a value is already in typed form.
pub trait TypeCodec: Send + Sync + fmt::Debug {
    /// Convert a typed value into its URL form.
    fn encode(&self, value: &Value) -> Value;

    /// Convert a raw URL value into its typed form.
    fn decode(&self, raw: &Value) -> Value;

    /// Whether the value is an instance of this type.
    fn is(&self, value: &Value) -> bool;

    /// Whether two typed values are equal.
    fn equals(&self, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// Render a scalar as the string a URL would carry.
///
/// Returns `None` for `Null`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Built-in codecs
// ============================================================================

/// Plain strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl TypeCodec for StringCodec {
    fn encode(&self, value: &Value) -> Value {
        scalar_to_string(value).map_or(Value::Null, Value::String)
    }

    fn decode(&self, raw: &Value) -> Value {
        self.encode(raw)
    }

    fn is(&self, value: &Value) -> bool {
        value.is_null() || value.is_string()
    }
}

/// Integers, carried in the URL as decimal digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntCodec;

/// Parse a leading optional sign followed by digits, ignoring the rest.
fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => ("-", &s[1..]),
        Some(b'+') => ("", &s[1..]),
        _ => ("", s),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    format!("{sign}{digits}").parse().ok()
}

impl TypeCodec for IntCodec {
    fn encode(&self, value: &Value) -> Value {
        scalar_to_string(value).map_or(Value::Null, Value::String)
    }

    fn decode(&self, raw: &Value) -> Value {
        match raw {
            Value::String(s) => parse_leading_int(s).map_or_else(|| raw.clone(), Value::from),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
                .map_or_else(|| raw.clone(), Value::from),
            other => other.clone(),
        }
    }

    fn is(&self, value: &Value) -> bool {
        match value.as_i64() {
            Some(n) => self.decode(&self.encode(value)) == Value::from(n),
            None => false,
        }
    }
}

/// Booleans, carried as `0` / `1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl TypeCodec for BoolCodec {
    fn encode(&self, value: &Value) -> Value {
        match value {
            Value::Bool(true) => Value::from("1"),
            Value::Bool(false) => Value::from("0"),
            Value::Null => Value::Null,
            other => scalar_to_string(other).map_or(Value::Null, Value::String),
        }
    }

    fn decode(&self, raw: &Value) -> Value {
        match raw {
            Value::String(s) => {
                parse_leading_int(s).map_or_else(|| raw.clone(), |n| Value::Bool(n != 0))
            }
            Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
            other => other.clone(),
        }
    }

    fn is(&self, value: &Value) -> bool {
        value.is_boolean()
    }
}

/// Calendar dates as ISO `YYYY-MM-DD` strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateCodec;

impl DateCodec {
    const FORMAT: &'static str = "%Y-%m-%d";

    fn parse(value: &Value) -> Option<NaiveDate> {
        value
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, Self::FORMAT).ok())
    }

    fn normalized(value: &Value) -> Option<String> {
        Self::parse(value).map(|d| d.format(Self::FORMAT).to_string())
    }
}

impl TypeCodec for DateCodec {
    fn encode(&self, value: &Value) -> Value {
        match Self::normalized(value) {
            Some(s) => Value::String(s),
            None => value.clone(),
        }
    }

    fn decode(&self, raw: &Value) -> Value {
        self.encode(raw)
    }

    fn is(&self, value: &Value) -> bool {
        match (value.as_str(), Self::normalized(value)) {
            (Some(s), Some(n)) => s == n,
            _ => false,
        }
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        self.is(a) && self.is(b) && a == b
    }
}

/// Arbitrary JSON objects or arrays, serialized into the URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl TypeCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        serde_json::to_string(value).map_or(Value::Null, Value::String)
    }

    fn decode(&self, raw: &Value) -> Value {
        match raw {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
            other => other.clone(),
        }
    }

    fn is(&self, value: &Value) -> bool {
        value.is_object() || value.is_array()
    }
}

/// Identity type used for non-URL parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyCodec;

impl TypeCodec for AnyCodec {
    fn encode(&self, value: &Value) -> Value {
        value.clone()
    }

    fn decode(&self, raw: &Value) -> Value {
        raw.clone()
    }

    fn is(&self, _value: &Value) -> bool {
        true
    }
}

// ============================================================================
// Array mode
// ============================================================================

/// How a parameter treats multiple values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ArrayModeRepr")]
pub enum ArrayMode {
    /// Single value.
    #[default]
    Off,
    /// Always a list.
    On,
    /// A list, except that a single element is unwrapped to a scalar.
    /// Only valid for search parameters.
    Auto,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ArrayModeRepr {
    Flag(bool),
    Word(String),
}

impl TryFrom<ArrayModeRepr> for ArrayMode {
    type Error = String;

    fn try_from(repr: ArrayModeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ArrayModeRepr::Flag(true) => Ok(ArrayMode::On),
            ArrayModeRepr::Flag(false) => Ok(ArrayMode::Off),
            ArrayModeRepr::Word(w) if w == "auto" => Ok(ArrayMode::Auto),
            ArrayModeRepr::Word(w) => Err(format!("invalid array mode '{w}'")),
        }
    }
}

fn wrap(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn unwrap(mode: ArrayMode, mut items: Vec<Value>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 if mode == ArrayMode::Auto => items.remove(0),
        _ => Value::Array(items),
    }
}

// ============================================================================
// ParamType
// ============================================================================

/// A named (or anonymous) parameter type: a capture pattern plus a codec.
#[derive(Clone)]
pub struct ParamType {
    name: Option<String>,
    pattern: String,
    regex: Arc<Regex>,
    codec: Arc<dyn TypeCodec>,
    array: ArrayMode,
}

impl ParamType {
    /// Create a named type.
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        codec: Arc<dyn TypeCodec>,
    ) -> Result<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern)?;
        Ok(Self {
            name: Some(name.into()),
            pattern,
            regex: Arc::new(regex),
            codec,
            array: ArrayMode::Off,
        })
    }

    /// An anonymous type sharing this type's codec but capturing `pattern`.
    pub fn with_pattern(&self, pattern: impl Into<String>, case_insensitive: bool) -> Result<Self> {
        let pattern = pattern.into();
        let regex = regex::RegexBuilder::new(&pattern)
            .case_insensitive(case_insensitive)
            .build()?;
        Ok(Self {
            name: None,
            pattern,
            regex: Arc::new(regex),
            codec: Arc::clone(&self.codec),
            array: self.array,
        })
    }

    /// Wrap this type for multi-valued parameters.
    ///
    /// `Auto` is only accepted for search parameters.
    pub fn as_array(&self, mode: ArrayMode, is_search: bool) -> Result<Self> {
        if mode == ArrayMode::Auto && !is_search {
            return Err(Error::config(
                "'auto' array mode is for query parameters only",
            ));
        }
        Ok(Self {
            array: mode,
            ..self.clone()
        })
    }

    /// The registered name, or `None` for anonymous types.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// A printable name.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("[anonymous]")
    }

    /// Regex source of the capture pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether a string matches the capture pattern anywhere.
    pub fn pattern_matches(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }

    /// The array mode this type was wrapped with.
    pub fn array_mode(&self) -> ArrayMode {
        self.array
    }

    /// Convert to URL form.
    pub fn encode(&self, value: &Value) -> Value {
        match self.array {
            ArrayMode::Off => self.codec.encode(value),
            mode => unwrap(mode, wrap(value).iter().map(|v| self.codec.encode(v)).collect()),
        }
    }

    /// Convert from URL form.
    pub fn decode(&self, raw: &Value) -> Value {
        match self.array {
            ArrayMode::Off => self.codec.decode(raw),
            mode => unwrap(mode, wrap(raw).iter().map(|v| self.codec.decode(v)).collect()),
        }
    }

    /// Whether the value is an instance of this type.
    pub fn is(&self, value: &Value) -> bool {
        match self.array {
            ArrayMode::Off => self.codec.is(value),
            _ => wrap(value).iter().all(|v| self.codec.is(v)),
        }
    }

    /// Type-aware equality.
    pub fn equals(&self, a: &Value, b: &Value) -> bool {
        match self.array {
            ArrayMode::Off => self.codec.equals(a, b),
            _ => {
                let (left, right) = (wrap(a), wrap(b));
                left.len() == right.len()
                    && left.iter().zip(&right).all(|(l, r)| self.codec.equals(l, r))
            }
        }
    }

    /// The value itself if already typed, otherwise its decoded form.
    pub fn normalize(&self, value: &Value) -> Value {
        let single = |v: &Value| {
            if self.codec.is(v) {
                v.clone()
            } else {
                self.codec.decode(v)
            }
        };
        match self.array {
            ArrayMode::Off => single(value),
            mode => unwrap(mode, wrap(value).iter().map(single).collect()),
        }
    }
}

impl fmt::Debug for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamType")
            .field("name", &self.display_name())
            .field("pattern", &self.pattern)
            .field("array", &self.array)
            .finish()
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{Type:{}}}", self.display_name())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name of the plain string type.
pub const STRING: &str = "string";
/// Name of the identity type.
pub const ANY: &str = "any";

/// Known parameter types, keyed by name.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, ParamType>,
}

impl TypeRegistry {
    /// Create a registry holding the built-in types.
    pub fn new() -> Self {
        let builtins: [(&str, &str, Arc<dyn TypeCodec>); 6] = [
            (STRING, "[^/]*", Arc::new(StringCodec)),
            ("int", r"\d+", Arc::new(IntCodec)),
            ("bool", "0|1", Arc::new(BoolCodec)),
            (
                "date",
                "[0-9]{4}-(?:0[1-9]|1[0-2])-(?:0[1-9]|[1-2][0-9]|3[0-1])",
                Arc::new(DateCodec),
            ),
            ("json", "[^/]*", Arc::new(JsonCodec)),
            (ANY, ".*", Arc::new(AnyCodec)),
        ];

        let mut types = BTreeMap::new();
        for (name, pattern, codec) in builtins {
            // Built-in patterns are literals known to compile.
            if let Ok(t) = ParamType::new(name, pattern, codec) {
                types.insert(name.to_string(), t);
            }
        }
        Self { types }
    }

    /// Register a custom type.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        codec: Arc<dyn TypeCodec>,
    ) -> Result<()> {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(Error::DuplicateType(name));
        }
        let param_type = ParamType::new(name.clone(), pattern, codec)?;
        log::debug!("Registered parameter type '{}'", name);
        self.types.insert(name, param_type);
        Ok(())
    }

    /// Look a type up by name.
    pub fn get(&self, name: &str) -> Option<ParamType> {
        self.types.get(name).cloned()
    }

    /// Look a type up by name, failing if it is unknown.
    pub fn require(&self, name: &str) -> Result<ParamType> {
        self.get(name)
            .ok_or_else(|| Error::UnknownType(name.to_string()))
    }

    /// Whether a type with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
