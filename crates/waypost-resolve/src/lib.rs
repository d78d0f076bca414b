//! Waypost Resolve: dependency-ordered asynchronous value resolution.
//!
//! A resolve map names values and how to produce them. This crate orders
//! the map by declared dependencies, rejects cycles up front, and runs the
//! entries concurrently while honouring their ordering constraints.
//!
//! Dependency level 1 (depends on `waypost-core`).
//!
//! # Modules
//!
//! - [`error`]: Rejections and resolution errors
//! - [`invocable`]: Resolve map entries
//! - [`locals`]: Layered resolved values
//! - [`resolver`]: Planning and execution

#![doc = include_str!("../README.md")]

pub mod error;
pub mod invocable;
pub mod locals;
pub mod resolver;

pub use error::{Rejection, ResolveError, Result};
pub use invocable::{Invocable, Invocables, ResolveFn, ResolveFuture};
pub use locals::Locals;
pub use resolver::{PlanEntry, Resolution, ResolvePlan, Resolver};
