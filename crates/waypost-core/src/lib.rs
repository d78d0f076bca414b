//! Waypost Core: parameter types, parameter sets and URL matching.
//!
//! This crate is the configuration-time foundation of Waypost. It has no
//! internal Waypost dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`types`]: Parameter types and the type registry
//! - [`param`]: Parameters and layered parameter sets
//! - [`matcher`]: URL pattern compilation, matching and formatting
//! - [`injector`]: The service-locator seam

#![doc = include_str!("../README.md")]

pub mod error;
pub mod injector;
pub mod matcher;
pub mod param;
pub mod types;

use std::collections::BTreeMap;

/// Parameter values keyed by id. `Null` and missing keys both mean absent.
pub type Params = BTreeMap<String, serde_json::Value>;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
pub use injector::{Injector, InjectorSlot, ServiceMap};
pub use matcher::pattern::{decode_uri_component, encode_uri_component, parse_query};
pub use matcher::{MatcherConfig, MatcherFactory, UrlMatcher};
pub use param::{
    Param, ParamConfig, ParamContext, ParamDefault, ParamLocation, ParamSet, ReplaceRule,
    SquashPolicy, TypeRef,
};
pub use types::{ArrayMode, ParamType, TypeCodec, TypeRegistry};
