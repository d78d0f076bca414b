//! Waypost State: hierarchical states, URL routing and transitions.
//!
//! States are registered in any order and built once their parent exists.
//! The engine moves between them: it resolves what entered states need,
//! runs enter and exit hooks, keeps the location in step, and drops the
//! result of any transition a newer one has superseded.
//!
//! Dependency level 2 (depends on `waypost-core` and `waypost-resolve`).
//!
//! # Modules
//!
//! - [`error`]: Registration and transition errors
//! - [`state`]: Declarations and built states
//! - [`builder`]: The decoratable build pipeline
//! - [`registry`]: Registration queue and lookup
//! - [`location`]: The location seam
//! - [`router`]: URL rules and link building
//! - [`view`]: View templates and view resolution
//! - [`events`]: Transition listeners
//! - [`engine`]: The transition engine

#![doc = include_str!("../README.md")]

pub mod builder;
pub mod engine;
pub mod error;
pub mod events;
mod guard;
pub mod location;
pub mod registry;
pub mod router;
pub mod state;
pub mod view;

pub use builder::{BuildContext, BuildStep, StateBuilder, StateDraft, StepFn};
pub use engine::{
    EngineBuilder, HrefOptions, LocationMode, Reload, STATE_PARAMS_KEY, StateEngine, StateLocals,
    TransitionFuture, TransitionOptions,
};
pub use error::{Error, Result, TransitionError};
pub use events::{
    CancelEvent, ErrorEvent, EventBus, ListenerId, NotFoundEvent, StartEvent, SuccessEvent,
    TransitionInfo, TransitionListener,
};
pub use location::{LocationProvider, MemoryLocation};
pub use registry::{Registration, StateRegistry};
pub use router::{RouterConfig, RuleHandler, RuleMatch, RuleMatcher, RuleOutcome, UrlRouter};
pub use state::{Hook, HookContext, State, StateDeclaration, StateId, ViewDeclaration};
pub use view::{CONTROLLER_KEY, StaticTemplates, TEMPLATE_KEY, TemplateLoader};
