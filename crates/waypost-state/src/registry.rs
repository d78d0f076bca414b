//! The state registry.
//!
//! States live in an arena indexed by [`StateId`]. A declaration whose
//! parent is not registered yet waits in a queue keyed by the parent's name
//! and is built as soon as that parent arrives.

use std::collections::HashMap;
use std::sync::Arc;
use waypost_core::MatcherFactory;

use crate::builder::{BuildContext, StateBuilder, parent_name};
use crate::error::{Error, Result};
use crate::state::{State, StateDeclaration, StateId};

/// Outcome of [`StateRegistry::register`].
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// The declaration was built.
    Registered {
        /// The registered state followed by the queued descendants it
        /// released, in build order.
        built: Vec<StateId>,
        /// Released descendants that failed to build. They are dropped and
        /// may be registered again; anything queued under them stays pending.
        rejected: Vec<(String, Error)>,
    },
    /// Waiting for the named parent.
    Queued {
        /// The missing parent.
        parent: String,
    },
}

impl Registration {
    /// Ids built by this registration.
    pub fn built(&self) -> &[StateId] {
        match self {
            Self::Registered { built, .. } => built,
            Self::Queued { .. } => &[],
        }
    }

    /// Released descendants that failed to build.
    pub fn rejected(&self) -> &[(String, Error)] {
        match self {
            Self::Registered { rejected, .. } => rejected,
            Self::Queued { .. } => &[],
        }
    }
}

/// All states known to one engine.
#[derive(Debug)]
pub struct StateRegistry {
    states: Vec<Arc<State>>,
    by_name: HashMap<String, StateId>,
    queue: HashMap<String, Vec<StateDeclaration>>,
    builder: StateBuilder,
    factory: MatcherFactory,
}

impl StateRegistry {
    /// A registry holding only the implicit root.
    pub fn new(factory: MatcherFactory) -> Result<Self> {
        Self::with_builder(factory, StateBuilder::new())
    }

    /// A registry using a customised build pipeline.
    pub fn with_builder(factory: MatcherFactory, builder: StateBuilder) -> Result<Self> {
        let mut registry = Self {
            states: Vec::new(),
            by_name: HashMap::new(),
            queue: HashMap::new(),
            builder,
            factory,
        };
        let root = StateDeclaration::new("").url("^").abstract_state();
        registry.build(root)?;
        Ok(registry)
    }

    /// Register a declaration.
    pub fn register(&mut self, declaration: StateDeclaration) -> Result<Registration> {
        let name = declaration.name.clone();
        if name.is_empty() || name.contains('@') {
            return Err(Error::InvalidName(name));
        }
        if self.by_name.contains_key(&name) || self.is_queued(&name) {
            return Err(Error::DuplicateState(name));
        }

        let parent = parent_name(&declaration);
        if !self.by_name.contains_key(&parent) {
            log::debug!("Queueing state '{name}' until '{parent}' is registered");
            self.queue.entry(parent.clone()).or_default().push(declaration);
            return Ok(Registration::Queued { parent });
        }

        let mut built = vec![self.build(declaration)?];
        let mut rejected = Vec::new();
        self.flush(&name, &mut built, &mut rejected);
        Ok(Registration::Registered { built, rejected })
    }

    fn flush(&mut self, parent: &str, built: &mut Vec<StateId>, rejected: &mut Vec<(String, Error)>) {
        let Some(waiting) = self.queue.remove(parent) else {
            return;
        };
        for declaration in waiting {
            let name = declaration.name.clone();
            match self.build(declaration) {
                Ok(id) => {
                    built.push(id);
                    self.flush(&name, built, rejected);
                }
                Err(e) => {
                    log::warn!("Queued state '{name}' failed to build: {e}");
                    rejected.push((name, e));
                }
            }
        }
    }

    fn build(&mut self, declaration: StateDeclaration) -> Result<StateId> {
        let id = StateId(self.states.len());
        let ctx = BuildContext {
            states: &self.states,
            by_name: &self.by_name,
            factory: &self.factory,
        };
        let state = self.builder.build(id, declaration, &ctx)?;
        log::debug!("Registered state '{}'", state.name());
        self.by_name.insert(state.name().to_string(), id);
        self.states.push(Arc::new(state));
        Ok(id)
    }

    fn is_queued(&self, name: &str) -> bool {
        self.queue
            .values()
            .any(|waiting| waiting.iter().any(|d| d.name == name))
    }

    /// A state by full name. The root is `""`.
    pub fn get(&self, name: &str) -> Option<Arc<State>> {
        self.by_name.get(name).and_then(|id| self.by_id(*id))
    }

    /// A state by id.
    pub fn by_id(&self, id: StateId) -> Option<Arc<State>> {
        self.states.get(id.index()).cloned()
    }

    /// The implicit root.
    pub fn root(&self) -> Arc<State> {
        Arc::clone(&self.states[StateId::ROOT.index()])
    }

    /// Find a state by absolute or relative reference.
    ///
    /// References starting with `.` or `^` are relative to `base`: a
    /// leading `.` stays at the base, each `^` climbs one level, and the rest
    /// is appended as a dotted child path (`.child`, `^`, `^.sibling`).
    pub fn get_relative(&self, reference: &str, base: Option<&str>) -> Result<Option<Arc<State>>> {
        if !is_relative(reference) {
            return Ok(self.get(reference));
        }
        let base_name =
            base.ok_or_else(|| Error::invalid_reference(reference, "no reference point given"))?;
        let Some(base) = self.get(base_name) else {
            return Ok(None);
        };

        let parts: Vec<&str> = reference.split('.').collect();
        let mut current = base;
        let mut consumed = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() && i == 0 {
                consumed = 1;
                continue;
            }
            if *part == "^" {
                let parent = current
                    .parent()
                    .and_then(|id| self.by_id(id))
                    .ok_or_else(|| {
                        Error::invalid_reference(
                            reference,
                            format!("not valid for state '{base_name}'"),
                        )
                    })?;
                current = parent;
                consumed = i + 1;
                continue;
            }
            break;
        }

        let rest = parts[consumed..].join(".");
        let name = match (current.name(), rest.as_str()) {
            (base, "") => base.to_string(),
            ("", rest) => rest.to_string(),
            (base, rest) => format!("{base}.{rest}"),
        };
        Ok(self.get(&name))
    }

    /// Every built state, root first.
    pub fn all(&self) -> &[Arc<State>] {
        &self.states
    }

    /// Names of declarations waiting for a parent.
    pub fn pending(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queue
            .values()
            .flat_map(|waiting| waiting.iter().map(|d| d.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Number of built states, root included.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false: the root is always present.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The factory URLs are compiled with.
    pub fn factory(&self) -> &MatcherFactory {
        &self.factory
    }
}

fn is_relative(reference: &str) -> bool {
    reference.starts_with('.') || reference.starts_with('^')
}
