//! Planning and executing resolve maps.
//!
//! Resolution happens in two phases:
//!
//! 1. [`Resolver::study`] walks the map depth-first and produces a
//!    [`ResolvePlan`] in dependency order. Cycles are reported here, before
//!    anything runs.
//! 2. [`ResolvePlan::resolve`] publishes one shared pending value per key
//!    and then drives every entry. An entry waits only on the parameters it
//!    declares; a parameter named like the entry itself reads the parent
//!    resolution's value (decoration).
//!
//! The outcome is a [`Resolution`]: per-key shared futures plus one future
//! that settles to the layered [`Locals`] once the parent and every entry
//! have settled.

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use waypost_core::{Injector, Params};

use crate::error::{ResolveError, Result};
use crate::invocable::{Invocable, Invocables};
use crate::locals::Locals;

type SharedValue = Shared<BoxFuture<'static, Result<Value>>>;
type SharedLocals = Shared<BoxFuture<'static, Result<Arc<Locals>>>>;

// ============================================================================
// Plan
// ============================================================================

/// One step of a plan.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    key: String,
    invocable: Invocable,
}

impl PlanEntry {
    /// The key this entry produces.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Declared parameter names.
    pub fn deps(&self) -> &[String] {
        self.invocable.deps()
    }
}

/// A resolve map in dependency order.
#[derive(Debug, Clone, Default)]
pub struct ResolvePlan {
    entries: Arc<Vec<PlanEntry>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    InProgress,
    Done,
}

struct Study<'a> {
    invocables: &'a Invocables,
    visits: HashMap<&'a str, Visit>,
    stack: Vec<&'a str>,
    plan: Vec<PlanEntry>,
}

impl<'a> Study<'a> {
    fn visit(&mut self, key: &'a str) -> Result<()> {
        match self.visits.get(key) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                let start = self.stack.iter().position(|k| *k == key).unwrap_or(0);
                let mut cycle: Vec<String> =
                    self.stack[start..].iter().map(|k| k.to_string()).collect();
                cycle.push(key.to_string());
                return Err(ResolveError::CyclicDependency { cycle });
            }
            None => {}
        }

        let Some(invocable) = self.invocables.get(key) else {
            return Ok(());
        };

        self.visits.insert(key, Visit::InProgress);
        self.stack.push(key);
        for dep in invocable.deps() {
            if dep != key && self.invocables.contains_key(dep) {
                self.visit(dep)?;
            }
        }
        self.stack.pop();
        self.visits.insert(key, Visit::Done);

        self.plan.push(PlanEntry {
            key: key.to_string(),
            invocable: invocable.clone(),
        });
        Ok(())
    }
}

impl ResolvePlan {
    /// Entries in execution order.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Keys in execution order.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Whether the plan has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Execute the plan.
    ///
    /// `locals` are overrides: keys present there are never invoked, and
    /// parameters found there are not awaited. `parent` supplies inherited
    /// values. Nothing runs until the returned resolution is polled.
    pub fn resolve(
        &self,
        locals: Params,
        parent: Option<&Resolution>,
        injector: Arc<dyn Injector>,
    ) -> Resolution {
        let parent = parent.cloned().unwrap_or_else(Resolution::empty);
        let overrides = Arc::new(locals);
        let failed: Arc<OnceLock<ResolveError>> = Arc::new(OnceLock::new());

        let mut own: Vec<(String, SharedValue)> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            let promise = match overrides.get(&entry.key) {
                Some(value) => ready(Ok(value.clone())),
                None => {
                    let waits = self.waits_for(entry, &own, &parent, &overrides);
                    run_entry(
                        entry.clone(),
                        waits,
                        Arc::clone(&overrides),
                        Arc::clone(&injector),
                        Arc::clone(&failed),
                    )
                }
            };
            own.push((entry.key.clone(), promise));
        }

        for (key, value) in overrides.iter() {
            if !own.iter().any(|(k, _)| k == key) {
                own.push((key.clone(), ready(Ok(value.clone()))));
            }
        }

        let mut promises = parent.promises.as_ref().clone();
        promises.extend(own.iter().map(|(k, p)| (k.clone(), p.clone())));

        let parent_settled = parent.settled.clone();
        let settled = async move {
            let (keys, pending): (Vec<String>, Vec<SharedValue>) = own.into_iter().unzip();
            let (parent_locals, values) =
                futures::try_join!(parent_settled, try_join_all(pending))?;
            let values: Params = keys.into_iter().zip(values).collect();
            Ok::<_, ResolveError>(Arc::new(Locals::with_parent(values, parent_locals)))
        }
        .boxed()
        .shared();

        Resolution {
            promises: Arc::new(promises),
            settled,
        }
    }

    fn waits_for(
        &self,
        entry: &PlanEntry,
        own: &[(String, SharedValue)],
        parent: &Resolution,
        overrides: &Params,
    ) -> Vec<(String, SharedValue)> {
        entry
            .deps()
            .iter()
            .filter(|dep| !overrides.contains_key(dep.as_str()))
            .filter_map(|dep| {
                let promise = if *dep == entry.key {
                    parent.promises.get(dep)
                } else {
                    own.iter()
                        .find(|(k, _)| k == dep)
                        .map(|(_, p)| p)
                        .or_else(|| parent.promises.get(dep))
                };
                promise.map(|p| (dep.clone(), p.clone()))
            })
            .collect()
    }
}

fn ready(value: Result<Value>) -> SharedValue {
    futures::future::ready(value).boxed().shared()
}

fn run_entry(
    entry: PlanEntry,
    waits: Vec<(String, SharedValue)>,
    overrides: Arc<Params>,
    injector: Arc<dyn Injector>,
    failed: Arc<OnceLock<ResolveError>>,
) -> SharedValue {
    async move {
        let result = invoke(&entry, waits, &overrides, injector.as_ref(), &failed).await;
        if let Err(err) = &result {
            let _ = failed.set(err.clone());
        }
        result
    }
    .boxed()
    .shared()
}

async fn invoke(
    entry: &PlanEntry,
    waits: Vec<(String, SharedValue)>,
    overrides: &Params,
    injector: &dyn Injector,
    failed: &OnceLock<ResolveError>,
) -> Result<Value> {
    let (names, pending): (Vec<String>, Vec<SharedValue>) = waits.into_iter().unzip();
    let awaited = try_join_all(pending).await?;

    if let Some(err) = failed.get() {
        return Err(err.clone());
    }

    let mut bag: Params = names.into_iter().zip(awaited).collect();
    for dep in entry.deps() {
        if bag.contains_key(dep) {
            continue;
        }
        let value = overrides
            .get(dep)
            .cloned()
            .or_else(|| injector.get(dep))
            .ok_or_else(|| ResolveError::UnknownDependency {
                key: entry.key.clone(),
                dependency: dep.clone(),
            })?;
        bag.insert(dep.clone(), value);
    }

    log::trace!("Invoking resolve entry '{}'", entry.key);
    match &entry.invocable {
        Invocable::Fn { f, .. } => Ok(f(bag).await?),
        Invocable::Service(name) => {
            injector
                .get(name)
                .ok_or_else(|| ResolveError::UnknownService {
                    key: entry.key.clone(),
                    service: name.clone(),
                })
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// An in-flight (or finished) resolution.
///
/// Cloning is cheap; every clone observes the same shared futures.
#[derive(Clone)]
pub struct Resolution {
    promises: Arc<HashMap<String, SharedValue>>,
    settled: SharedLocals,
}

impl Resolution {
    /// A resolution with no values.
    pub fn empty() -> Self {
        Self::settled(Arc::new(Locals::default()))
    }

    /// A resolution that is already settled to `locals`.
    pub fn settled(locals: Arc<Locals>) -> Self {
        let promises = locals
            .flatten()
            .into_iter()
            .map(|(k, v)| (k, ready(Ok(v))))
            .collect();
        Self {
            promises: Arc::new(promises),
            settled: futures::future::ready(Ok(locals)).boxed().shared(),
        }
    }

    /// The pending value for `key`, including inherited keys.
    pub async fn get(&self, key: &str) -> Option<Result<Value>> {
        match self.promises.get(key) {
            Some(promise) => Some(promise.clone().await),
            None => None,
        }
    }

    /// Whether `key` is produced by this resolution or its ancestors.
    pub fn has(&self, key: &str) -> bool {
        self.promises.contains_key(key)
    }

    /// Wait for every value.
    pub async fn settle(&self) -> Result<Arc<Locals>> {
        self.settled.clone().await
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.promises.keys().collect();
        keys.sort();
        f.debug_struct("Resolution").field("keys", &keys).finish()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Plans and executes resolve maps against an injector.
#[derive(Clone)]
pub struct Resolver {
    injector: Arc<dyn Injector>,
}

impl Resolver {
    /// Create a resolver backed by `injector`.
    pub fn new(injector: Arc<dyn Injector>) -> Self {
        Self { injector }
    }

    /// The injector.
    pub fn injector(&self) -> &Arc<dyn Injector> {
        &self.injector
    }

    /// Order a resolve map by dependency, rejecting cycles.
    pub fn study(invocables: &Invocables) -> Result<ResolvePlan> {
        let mut study = Study {
            invocables,
            visits: HashMap::new(),
            stack: Vec::new(),
            plan: Vec::with_capacity(invocables.len()),
        };
        for key in invocables.keys() {
            study.visit(key)?;
        }
        log::debug!(
            "Planned resolve order: {}",
            study.plan.iter().map(|e| e.key.as_str()).collect::<Vec<_>>().join(", ")
        );
        Ok(ResolvePlan {
            entries: Arc::new(study.plan),
        })
    }

    /// Plan and execute in one step.
    pub fn resolve(
        &self,
        invocables: &Invocables,
        locals: Params,
        parent: Option<&Resolution>,
    ) -> Result<Resolution> {
        let plan = Self::study(invocables)?;
        Ok(plan.resolve(locals, parent, Arc::clone(&self.injector)))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
