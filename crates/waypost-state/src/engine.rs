//! The transition engine.
//!
//! A [`StateEngine`] owns the registry, the URL router, the injector, the
//! template loader and the event bus of one application. Moving between
//! states goes through [`StateEngine::transition_to`]:
//!
//! 1. find the target (relative references resolve against `relative`);
//!    unknown targets fire the not-found event, whose listeners may abort,
//!    redirect or ask for one retry
//! 2. reject abstract targets
//! 3. inherit, validate and normalise parameters
//! 4. keep the longest prefix of states whose own parameters are unchanged
//! 5. short-circuit when nothing changed
//! 6. fire the cancellable start event
//! 7. resolve every entered state, then its views
//! 8. drop the result if a newer transition started meanwhile
//! 9. exit states child to parent, enter new states parent to child
//! 10. check for a newer transition again
//! 11. commit, push the URL and fire the success event
//!
//! Everything up to step 6 runs synchronously inside `transition_to`; the
//! transition id is allocated there too, so a later call always supersedes
//! an earlier one. Supersession is cooperative: a superseded transition's
//! resolve functions still run to completion, only its commit is dropped.

use futures::future::{self, BoxFuture, FutureExt, try_join_all};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::Instrument;
use waypost_core::{Injector, MatcherFactory, ParamLocation, Params, ServiceMap};
use waypost_resolve::{Locals, ResolveError, Resolution};

use crate::builder::StateBuilder;
use crate::error::{Result, TransitionError};
use crate::events::{
    CancelEvent, ErrorEvent, EventBus, ListenerId, NotFoundEvent, StartEvent, SuccessEvent,
    TransitionInfo, TransitionListener,
};
use crate::guard;
use crate::location::{LocationProvider, MemoryLocation};
use crate::registry::{Registration, StateRegistry};
use crate::router::{RouterConfig, RuleHandler, RuleMatch, RuleMatcher, RuleOutcome, UrlRouter};
use crate::state::{HookContext, State, StateDeclaration, StateId};
use crate::view::{StaticTemplates, TemplateLoader, resolve_views};

/// Resolved key holding a state's parameter values.
pub const STATE_PARAMS_KEY: &str = "$stateParams";

/// The future returned by [`StateEngine::transition_to`].
pub type TransitionFuture = BoxFuture<'static, std::result::Result<Arc<State>, TransitionError>>;

// ============================================================================
// Options
// ============================================================================

/// What a committed transition does to the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationMode {
    /// Add a history entry.
    #[default]
    Push,
    /// Overwrite the current history entry.
    Replace,
    /// Leave the location alone.
    Skip,
}

/// Which states a transition re-enters even if unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reload {
    /// Only states whose parameters changed.
    #[default]
    None,
    /// Every state on the target path.
    All,
    /// The named state and everything below it.
    From(String),
}

/// Options for [`StateEngine::transition_to`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOptions {
    /// Location update on commit.
    pub location: LocationMode,
    /// Copy current values of parameters shared with the target's ancestors.
    pub inherit: bool,
    /// Base for relative target names.
    pub relative: Option<String>,
    /// Fire start, cancel and success events.
    pub notify: bool,
    /// Force re-entry.
    pub reload: Reload,
    retry: bool,
}

impl Default for TransitionOptions {
    fn default() -> Self {
        Self {
            location: LocationMode::Push,
            inherit: false,
            relative: None,
            notify: true,
            reload: Reload::None,
            retry: false,
        }
    }
}

impl TransitionOptions {
    /// Set the location mode.
    pub fn location(mut self, mode: LocationMode) -> Self {
        self.location = mode;
        self
    }

    /// Inherit current parameters.
    pub fn inherit(mut self, value: bool) -> Self {
        self.inherit = value;
        self
    }

    /// Resolve relative names against `state`.
    pub fn relative(mut self, state: impl Into<String>) -> Self {
        self.relative = Some(state.into());
        self
    }

    /// Fire events.
    pub fn notify(mut self, value: bool) -> Self {
        self.notify = value;
        self
    }

    /// Force re-entry.
    pub fn reload(mut self, reload: Reload) -> Self {
        self.reload = reload;
        self
    }

    fn retried(mut self) -> Self {
        self.retry = true;
        self
    }
}

/// Options for [`StateEngine::href`].
#[derive(Debug, Clone, PartialEq)]
pub struct HrefOptions {
    /// Link to the nearest state with a URL when the target has none.
    pub lossy: bool,
    /// Inherit current parameters.
    pub inherit: bool,
    /// Include protocol and host.
    pub absolute: bool,
    /// Base for relative names; the current state when unset.
    pub relative: Option<String>,
}

impl Default for HrefOptions {
    fn default() -> Self {
        Self {
            lossy: true,
            inherit: true,
            absolute: false,
            relative: None,
        }
    }
}

// ============================================================================
// Current state
// ============================================================================

/// The values an entered state resolved.
#[derive(Debug, Clone)]
pub struct StateLocals {
    resolution: Resolution,
    globals: Arc<Locals>,
    views: BTreeMap<String, Arc<Locals>>,
}

impl StateLocals {
    fn root() -> Self {
        Self {
            resolution: Resolution::empty(),
            globals: Arc::new(Locals::default()),
            views: BTreeMap::new(),
        }
    }

    /// The state's resolved values, layered over its ancestors'.
    pub fn globals(&self) -> &Arc<Locals> {
        &self.globals
    }

    /// One resolved value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.globals.get(key)
    }

    /// Resolved values of one view, keyed by qualified name.
    pub fn view(&self, name: &str) -> Option<&Arc<Locals>> {
        self.views.get(name)
    }

    /// Every view's resolved values.
    pub fn views(&self) -> &BTreeMap<String, Arc<Locals>> {
        &self.views
    }
}

struct Current {
    state: StateId,
    params: Params,
    transition: Option<u64>,
    next_id: u64,
    locals: HashMap<StateId, StateLocals>,
}

struct EngineInner {
    registry: RwLock<StateRegistry>,
    router: UrlRouter,
    injector: Arc<dyn Injector>,
    loader: Arc<dyn TemplateLoader>,
    events: EventBus,
    current: Mutex<Current>,
    params_tx: watch::Sender<Params>,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`StateEngine`].
pub struct EngineBuilder {
    factory: MatcherFactory,
    builder: StateBuilder,
    injector: Option<Arc<dyn Injector>>,
    loader: Option<Arc<dyn TemplateLoader>>,
    location: Option<Arc<dyn LocationProvider>>,
    router: RouterConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            factory: MatcherFactory::new(),
            builder: StateBuilder::new(),
            injector: None,
            loader: None,
            location: None,
            router: RouterConfig::default(),
        }
    }
}

impl EngineBuilder {
    /// Start with defaults: an empty service map, no templates and an
    /// in-memory location at `/`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile URLs with this factory.
    pub fn factory(mut self, factory: MatcherFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Use a customised build pipeline.
    pub fn state_builder(mut self, builder: StateBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Services for resolve maps and injectable defaults.
    pub fn injector(mut self, injector: Arc<dyn Injector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// Where view templates come from.
    pub fn template_loader(mut self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// The location the router reads and writes.
    pub fn location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    /// Router options.
    pub fn router_config(mut self, config: RouterConfig) -> Self {
        self.router = config;
        self
    }

    /// Build the engine. The injector is installed into the factory, so
    /// injectable parameter defaults become available.
    pub fn build(self) -> Result<StateEngine> {
        let injector = self
            .injector
            .unwrap_or_else(|| Arc::new(ServiceMap::new()));
        if !self.factory.set_injector(Arc::clone(&injector)) {
            log::debug!("Factory already had an injector; keeping it");
        }
        let registry = StateRegistry::with_builder(self.factory.clone(), self.builder)?;
        let location = self
            .location
            .unwrap_or_else(|| Arc::new(MemoryLocation::default()));
        let router = UrlRouter::new(location, self.router, self.factory);
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(StaticTemplates::new()));
        let (params_tx, _) = watch::channel(Params::new());

        let mut locals = HashMap::new();
        locals.insert(StateId::ROOT, StateLocals::root());

        Ok(StateEngine {
            inner: Arc::new(EngineInner {
                registry: RwLock::new(registry),
                router,
                injector,
                loader,
                events: EventBus::new(),
                current: Mutex::new(Current {
                    state: StateId::ROOT,
                    params: Params::new(),
                    transition: None,
                    next_id: 0,
                    locals,
                }),
                params_tx,
            }),
        })
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("factory", &self.factory)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transition plan
// ============================================================================

struct Entering {
    state: Arc<State>,
    params: Params,
    resolution: Resolution,
}

struct Plan {
    id: u64,
    target: Arc<State>,
    to_params: Params,
    info: TransitionInfo,
    options: TransitionOptions,
    from_path: Vec<Arc<State>>,
    keep: usize,
    entering: Vec<Entering>,
}

enum Prepared {
    Done(Arc<State>),
    Deferred(TransitionFuture),
    Run(Box<Plan>),
}

// ============================================================================
// Engine
// ============================================================================

/// A navigation engine. Cloning shares the engine.
#[derive(Clone)]
pub struct StateEngine {
    inner: Arc<EngineInner>,
}

impl StateEngine {
    /// Start configuring an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    // ------------------------------------------------------------------------
    // Registration and queries
    // ------------------------------------------------------------------------

    /// Register a state. Non-abstract states with a URL also get a router
    /// rule that enters them when the location matches.
    pub fn register(&self, declaration: StateDeclaration) -> Result<Registration> {
        let (outcome, routed) = {
            let mut registry = guard::write(&self.inner.registry);
            let outcome = registry.register(declaration)?;
            let routed: Vec<_> = outcome
                .built()
                .iter()
                .filter_map(|id| registry.by_id(*id))
                .filter(|state| !state.is_abstract())
                .filter_map(|state| state.url().map(|url| (state.id(), Arc::clone(url))))
                .collect();
            (outcome, routed)
        };
        for (id, url) in routed {
            self.inner
                .router
                .when(RuleMatcher::Url(url), self.url_handler(id))?;
        }
        Ok(outcome)
    }

    fn url_handler(&self, id: StateId) -> RuleHandler {
        let weak = Arc::downgrade(&self.inner);
        RuleHandler::call(move |found, _| {
            let Some(inner) = weak.upgrade() else {
                return RuleOutcome::Skip;
            };
            let RuleMatch::Params(matched) = found else {
                return RuleOutcome::Skip;
            };
            let engine = StateEngine { inner };
            let (current, params) = engine.snapshot();
            if current.navigable() == Some(id) && equal_for_keys(matched, &params) {
                return RuleOutcome::Handled;
            }
            let Some(state) = engine.state(id) else {
                return RuleOutcome::Skip;
            };
            let transition = engine.transition_to(
                state.name(),
                matched.clone(),
                TransitionOptions::default()
                    .inherit(true)
                    .location(LocationMode::Skip),
            );
            RuleOutcome::Navigate(Box::pin(async move {
                if let Err(e) = transition.await {
                    tracing::debug!(error = %e, "URL-driven transition did not commit");
                }
            }))
        })
    }

    /// A state by absolute name.
    pub fn get(&self, name: &str) -> Option<Arc<State>> {
        guard::read(&self.inner.registry).get(name)
    }

    /// A state by absolute or relative name; relative names resolve against
    /// the current state.
    pub fn find(&self, reference: &str) -> Result<Option<Arc<State>>> {
        let current = self.current();
        guard::read(&self.inner.registry).get_relative(reference, Some(current.name()))
    }

    /// Every registered state, root first.
    pub fn states(&self) -> Vec<Arc<State>> {
        guard::read(&self.inner.registry).all().to_vec()
    }

    /// Names still waiting for their parent.
    pub fn pending(&self) -> Vec<String> {
        guard::read(&self.inner.registry).pending()
    }

    fn state(&self, id: StateId) -> Option<Arc<State>> {
        guard::read(&self.inner.registry).by_id(id)
    }

    fn snapshot(&self) -> (Arc<State>, Params) {
        let (id, params) = {
            let current = guard::lock(&self.inner.current);
            (current.state, current.params.clone())
        };
        let registry = guard::read(&self.inner.registry);
        let state = registry.by_id(id).unwrap_or_else(|| registry.root());
        (state, params)
    }

    /// The current state.
    pub fn current(&self) -> Arc<State> {
        self.snapshot().0
    }

    /// The current parameter values.
    pub fn params(&self) -> Params {
        guard::lock(&self.inner.current).params.clone()
    }

    /// Follow parameter changes.
    pub fn watch_params(&self) -> watch::Receiver<Params> {
        self.inner.params_tx.subscribe()
    }

    /// Resolved values of an entered state.
    pub fn locals(&self, name: &str) -> Option<StateLocals> {
        let state = self.get(name)?;
        guard::lock(&self.inner.current)
            .locals
            .get(&state.id())
            .cloned()
    }

    /// Whether a transition has started resolving and not finished.
    pub fn transition_in_flight(&self) -> bool {
        guard::lock(&self.inner.current).transition.is_some()
    }

    /// The URL router.
    pub fn router(&self) -> &UrlRouter {
        &self.inner.router
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Add a transition listener.
    pub fn subscribe(&self, listener: Arc<dyn TransitionListener>) -> ListenerId {
        self.inner.events.subscribe(listener)
    }

    /// Dispatch the current location through the router and wait for any
    /// transition it starts.
    pub async fn on_location_change(&self) -> bool {
        self.inner.router.sync().await
    }

    // ------------------------------------------------------------------------
    // Predicates and links
    // ------------------------------------------------------------------------

    /// Whether the current state is exactly `reference`, with `params`
    /// matching the current values if given.
    pub fn is(&self, reference: &str, params: Option<&Params>) -> bool {
        let (current, current_params) = self.snapshot();
        let Ok(Some(state)) =
            guard::read(&self.inner.registry).get_relative(reference, Some(current.name()))
        else {
            return false;
        };
        if state.id() != current.id() {
            return false;
        }
        let Some(params) = params else {
            return true;
        };
        match state.params().values(params) {
            Ok(values) => equal_for_keys(&values, &current_params),
            Err(_) => false,
        }
    }

    /// Whether the current state is `reference` or below it.
    ///
    /// `reference` may be a glob over name segments: `*` matches one segment
    /// and `**` any number of them.
    pub fn includes(&self, reference: &str, params: Option<&Params>) -> bool {
        let (current, current_params) = self.snapshot();
        let state = if reference.contains('*') {
            if !glob_matches(reference, current.name()) {
                return false;
            }
            Arc::clone(&current)
        } else {
            let found =
                guard::read(&self.inner.registry).get_relative(reference, Some(current.name()));
            match found {
                Ok(Some(state)) => state,
                _ => return false,
            }
        };
        if !current.includes(state.name()) {
            return false;
        }
        let Some(params) = params else {
            return true;
        };
        let Ok(values) = state.params().values(params) else {
            return false;
        };
        params.keys().all(|key| {
            values.get(key).unwrap_or(&Value::Null) == current_params.get(key).unwrap_or(&Value::Null)
        })
    }

    /// A link to `reference` with `params`.
    ///
    /// Returns `None` when the state is unknown, has no URL to link to, or
    /// the parameters do not format.
    pub fn href(&self, reference: &str, params: Params, options: &HrefOptions) -> Result<Option<String>> {
        let (current, current_params) = self.snapshot();
        let (state, params, nav) = {
            let registry = guard::read(&self.inner.registry);
            let base = options.relative.as_deref().unwrap_or(current.name());
            let Some(state) = registry.get_relative(reference, Some(base))? else {
                return Ok(None);
            };
            let params = if options.inherit {
                inherit_params(&registry, &current_params, params, &current, &state)
            } else {
                params
            };
            let nav = if options.lossy {
                state.navigable().and_then(|id| registry.by_id(id))
            } else {
                Some(Arc::clone(&state))
            };
            (state, params, nav)
        };
        let Some(url) = nav.as_ref().and_then(|n| n.url()) else {
            return Ok(None);
        };
        let mut filtered = state.params().filter(&params);
        if let Some(hash) = params.get("#") {
            filtered.insert("#".to_string(), hash.clone());
        }
        self.inner.router.href(url, &filtered, options.absolute)
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Go to `to`, inheriting parameters and resolving relative names
    /// against the current state.
    pub fn go(&self, to: &str, params: Params) -> TransitionFuture {
        let options = TransitionOptions::default()
            .inherit(true)
            .relative(self.current().name());
        self.transition_to(to, params, options)
    }

    /// Re-enter the current state with the current parameters. With `from`,
    /// only that state and its descendants are re-entered.
    pub fn reload(&self, from: Option<&str>) -> TransitionFuture {
        let (current, params) = self.snapshot();
        let reload = match from {
            Some(name) => Reload::From(name.to_string()),
            None => Reload::All,
        };
        let options = TransitionOptions::default().reload(reload);
        self.transition_to(current.name(), params, options)
    }

    /// Start a transition.
    ///
    /// Validation, events and id allocation happen before this returns; the
    /// future drives resolution and the commit.
    pub fn transition_to(&self, to: &str, params: Params, options: TransitionOptions) -> TransitionFuture {
        match self.prepare(to, params, options) {
            Ok(Prepared::Done(state)) => future::ready(Ok(state)).boxed(),
            Ok(Prepared::Deferred(transition)) => transition,
            Ok(Prepared::Run(plan)) => {
                let span = tracing::info_span!("transition", id = plan.id, to = plan.target.name());
                let engine = self.clone();
                async move { engine.run(*plan).await }
                    .instrument(span)
                    .boxed()
            }
            Err(e) => {
                tracing::debug!(to, error = %e, "Transition rejected before resolving");
                future::ready(Err(e)).boxed()
            }
        }
    }

    fn prepare(
        &self,
        to: &str,
        params: Params,
        options: TransitionOptions,
    ) -> std::result::Result<Prepared, TransitionError> {
        let (from, from_params) = self.snapshot();

        let found = guard::read(&self.inner.registry)
            .get_relative(to, options.relative.as_deref())?;
        let Some(target) = found else {
            return self.not_found(to, params, options, &from, &from_params);
        };
        if target.is_abstract() {
            return Err(TransitionError::AbstractTarget(target.name().to_string()));
        }

        let (from_path, to_path, reload_from, to_params) = {
            let registry = guard::read(&self.inner.registry);
            let mut raw = if options.inherit {
                inherit_params(&registry, &from_params, params, &from, &target)
            } else {
                params
            };
            let hash = raw.remove("#");
            if !target.params().validates(&raw) {
                return Err(TransitionError::Validation(target.name().to_string()));
            }
            let mut to_params = target.params().values(&raw)?;
            if let Some(hash) = hash.filter(|h| !h.is_null()) {
                to_params.insert("#".to_string(), hash);
            }
            let reload_from = match &options.reload {
                Reload::None => None,
                Reload::All => Some(None),
                Reload::From(name) => {
                    let state = registry
                        .get_relative(name, Some(from.name()))?
                        .ok_or_else(|| TransitionError::ReloadNotFound(name.clone()))?;
                    Some(Some(state.id()))
                }
            };
            (
                path_states(&registry, &from),
                path_states(&registry, &target),
                reload_from,
                to_params,
            )
        };

        let mut keep = 0;
        while keep < to_path.len() && keep < from_path.len() && to_path[keep].id() == from_path[keep].id() {
            let state = &to_path[keep];
            let unchanged = match reload_from {
                None => state.own_params().equals(&to_params, &from_params),
                Some(None) => false,
                Some(Some(reload)) => state.id() != reload,
            };
            if !unchanged {
                break;
            }
            keep += 1;
        }

        if reload_from.is_none() && target.id() == from.id() {
            let all_kept = keep == to_path.len();
            let search_only = !target.reload_on_search()
                && non_search_params_equal(&from, &from_params, &to_params);
            if all_kept || search_only {
                self.update_params_in_place(&target, &to_params, &options);
                return Ok(Prepared::Done(target));
            }
        }

        let info = TransitionInfo {
            to: target.name().to_string(),
            to_params: to_params.clone(),
            from: from.name().to_string(),
            from_params: from_params.clone(),
        };
        if options.notify {
            let event = StartEvent::new(info.clone());
            self.inner.events.emit(|l| l.on_start(&event));
            if event.is_prevented() {
                let cancel = CancelEvent { info: info.clone() };
                self.inner.events.emit(|l| l.on_cancel(&cancel));
                if !self.transition_in_flight() {
                    self.inner.router.update(false);
                }
                tracing::debug!(to = target.name(), "Transition prevented by a start listener");
                return Err(TransitionError::Prevented);
            }
        }

        let (id, mut parent) = {
            let mut current = guard::lock(&self.inner.current);
            current.next_id += 1;
            let id = current.next_id;
            current.transition = Some(id);
            let kept = keep
                .checked_sub(1)
                .map(|i| to_path[i].id())
                .unwrap_or(StateId::ROOT);
            let parent = current
                .locals
                .get(&kept)
                .map(|l| l.resolution.clone())
                .unwrap_or_else(Resolution::empty);
            (id, parent)
        };
        tracing::debug!(id, to = target.name(), from = from.name(), keep, "Transition started");

        let entering = to_path[keep..]
            .iter()
            .map(|state| {
                let params = if state.id() == target.id() {
                    to_params.clone()
                } else {
                    state.params().filter(&to_params)
                };
                let locals: Params = [(STATE_PARAMS_KEY.to_string(), params_value(&params))].into();
                let resolution =
                    state
                        .plan()
                        .resolve(locals, Some(&parent), Arc::clone(&self.inner.injector));
                parent = resolution.clone();
                Entering {
                    state: Arc::clone(state),
                    params,
                    resolution,
                }
            })
            .collect();

        Ok(Prepared::Run(Box::new(Plan {
            id,
            target,
            to_params,
            info,
            options,
            from_path,
            keep,
            entering,
        })))
    }

    fn not_found(
        &self,
        to: &str,
        params: Params,
        options: TransitionOptions,
        from: &State,
        from_params: &Params,
    ) -> std::result::Result<Prepared, TransitionError> {
        let event = NotFoundEvent::new(
            to.to_string(),
            params.clone(),
            from.name().to_string(),
            from_params.clone(),
        );
        self.inner.events.emit(|l| l.on_not_found(&event));
        if event.is_prevented() {
            self.inner.router.update(false);
            return Err(TransitionError::Aborted);
        }

        let redirect = event.take_redirect();
        let retry = event.take_retry();
        if redirect.is_none() && retry.is_none() {
            return Err(TransitionError::NotFound {
                to: to.to_string(),
                from: from.name().to_string(),
            });
        }
        if options.retry {
            self.inner.router.update(false);
            return Err(TransitionError::Failed);
        }

        let (to, params) = redirect.unwrap_or_else(|| (to.to_string(), params));
        let options = options.retried();
        let Some(retry) = retry else {
            return Ok(Prepared::Deferred(self.transition_to(&to, params, options)));
        };

        let id = {
            let mut current = guard::lock(&self.inner.current);
            current.next_id += 1;
            current.transition = Some(current.next_id);
            current.next_id
        };
        let engine = self.clone();
        Ok(Prepared::Deferred(
            async move {
                retry.await;
                if !engine.is_current(id) {
                    return Err(TransitionError::Superseded);
                }
                engine.transition_to(&to, params, options).await
            }
            .boxed(),
        ))
    }

    fn update_params_in_place(&self, target: &Arc<State>, params: &Params, options: &TransitionOptions) {
        {
            let mut current = guard::lock(&self.inner.current);
            current.params = params.clone();
            current.transition = None;
            if let Some(entry) = current.locals.get_mut(&target.id()) {
                let mut own = entry.globals.own().clone();
                own.insert(STATE_PARAMS_KEY.to_string(), params_value(params));
                let globals = Arc::new(match entry.globals.parent() {
                    Some(parent) => Locals::with_parent(own, Arc::clone(parent)),
                    None => Locals::new(own),
                });
                entry.resolution = Resolution::settled(Arc::clone(&globals));
                entry.globals = globals;
            }
        }
        self.inner.params_tx.send_replace(params.clone());
        self.push_location(target, params, options);
        self.inner.router.update(true);
        tracing::debug!(to = target.name(), "Parameters updated without re-entering");
    }

    fn is_current(&self, id: u64) -> bool {
        guard::lock(&self.inner.current).transition == Some(id)
    }

    async fn run(self, plan: Plan) -> std::result::Result<Arc<State>, TransitionError> {
        let resolved = self.resolve_entering(&plan).await;
        match resolved.and_then(|locals| self.commit(&plan, locals)) {
            Ok(state) => Ok(state),
            Err(TransitionError::Superseded) => {
                tracing::debug!("Transition superseded");
                Err(TransitionError::Superseded)
            }
            Err(error) => Err(self.fail(&plan, error)),
        }
    }

    async fn resolve_entering(&self, plan: &Plan) -> std::result::Result<Vec<StateLocals>, TransitionError> {
        let pending = plan.entering.iter().map(|entering| {
            let resolution = entering.resolution.clone();
            let views = resolve_views(
                entering.state.views().to_vec(),
                resolution.clone(),
                entering.params.clone(),
                Arc::clone(&self.inner.loader),
                Arc::clone(&self.inner.injector),
            );
            async move {
                let globals = resolution.settle().await?;
                let views = views.await?;
                Ok::<_, ResolveError>(StateLocals {
                    resolution,
                    globals,
                    views,
                })
            }
        });
        Ok(try_join_all(pending).await?)
    }

    fn commit(&self, plan: &Plan, entered: Vec<StateLocals>) -> std::result::Result<Arc<State>, TransitionError> {
        if !self.is_current(plan.id) {
            return Err(TransitionError::Superseded);
        }

        // Hooks see staged values; `current` only changes once they all pass.
        let exiting = &plan.from_path[plan.keep..];
        for state in exiting.iter().rev() {
            let Some(hook) = &state.declaration().on_exit else {
                continue;
            };
            let globals = guard::lock(&self.inner.current)
                .locals
                .get(&state.id())
                .map(|l| Arc::clone(&l.globals))
                .unwrap_or_default();
            let params = state.params().filter(&plan.info.from_params);
            hook(&HookContext {
                state,
                params: &params,
                locals: &globals,
            })?;
        }

        for (entering, locals) in plan.entering.iter().zip(&entered) {
            if let Some(hook) = &entering.state.declaration().on_enter {
                hook(&HookContext {
                    state: &entering.state,
                    params: &entering.params,
                    locals: &locals.globals,
                })?;
            }
        }

        {
            let mut current = guard::lock(&self.inner.current);
            if current.transition != Some(plan.id) {
                return Err(TransitionError::Superseded);
            }
            for state in exiting {
                current.locals.remove(&state.id());
            }
            for (entering, locals) in plan.entering.iter().zip(entered) {
                current.locals.insert(entering.state.id(), locals);
            }
            current.state = plan.target.id();
            current.params = plan.to_params.clone();
            current.transition = None;
        }
        self.inner.params_tx.send_replace(plan.to_params.clone());

        self.push_location(&plan.target, &plan.to_params, &plan.options);
        if plan.options.notify {
            let event = SuccessEvent {
                info: plan.info.clone(),
            };
            self.inner.events.emit(|l| l.on_success(&event));
        }
        self.inner.router.update(true);
        tracing::info!("Transition committed");
        Ok(Arc::clone(&plan.target))
    }

    fn fail(&self, plan: &Plan, error: TransitionError) -> TransitionError {
        {
            let mut current = guard::lock(&self.inner.current);
            if current.transition != Some(plan.id) {
                return TransitionError::Superseded;
            }
            current.transition = None;
        }
        tracing::warn!(error = %error, "Transition failed");
        let event = ErrorEvent::new(plan.info.clone(), error.clone());
        self.inner.events.emit(|l| l.on_error(&event));
        if !event.is_prevented() {
            self.inner.router.update(false);
        }
        error
    }

    fn push_location(&self, target: &State, params: &Params, options: &TransitionOptions) {
        if options.location == LocationMode::Skip {
            return;
        }
        let Some(nav) = target.navigable().and_then(|id| self.state(id)) else {
            return;
        };
        let Some(url) = nav.url() else {
            return;
        };
        let mut nav_params = nav.params().filter(params);
        if let Some(hash) = params.get("#") {
            nav_params.insert("#".to_string(), hash.clone());
        }
        let replace = options.location == LocationMode::Replace;
        if let Err(e) = self.inner.router.push(url, &nav_params, replace) {
            tracing::warn!(state = nav.name(), error = %e, "Could not write location");
        }
    }
}

impl fmt::Debug for StateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEngine")
            .field("current", &self.current().name().to_string())
            .field("router", &self.inner.router)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn path_states(registry: &StateRegistry, state: &State) -> Vec<Arc<State>> {
    state
        .path()
        .iter()
        .filter_map(|id| registry.by_id(*id))
        .collect()
}

/// Current values of parameters declared by the common ancestors of `from`
/// and `to`, overlaid with `params`.
fn inherit_params(
    registry: &StateRegistry,
    current: &Params,
    params: Params,
    from: &State,
    to: &State,
) -> Params {
    let mut inherited = Params::new();
    for (a, b) in from.path().iter().zip(to.path()) {
        if a != b {
            break;
        }
        let Some(state) = registry.by_id(*a) else {
            continue;
        };
        for key in state.params().keys() {
            if let Some(value) = current.get(&key) {
                inherited.entry(key).or_insert_with(|| value.clone());
            }
        }
    }
    inherited.extend(params);
    inherited
}

fn equal_for_keys(a: &Params, b: &Params) -> bool {
    a.iter()
        .all(|(key, value)| b.get(key).unwrap_or(&Value::Null) == value)
}

fn non_search_params_equal(state: &State, a: &Params, b: &Params) -> bool {
    state
        .params()
        .all()
        .into_iter()
        .filter(|p| p.location() != ParamLocation::Search)
        .all(|p| {
            p.param_type().equals(
                a.get(p.id()).unwrap_or(&Value::Null),
                b.get(p.id()).unwrap_or(&Value::Null),
            )
        })
}

fn params_value(params: &Params) -> Value {
    Value::Object(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Match a dotted name against a glob of segments.
fn glob_matches(glob: &str, name: &str) -> bool {
    fn walk(glob: &[&str], name: &[&str]) -> bool {
        match glob.split_first() {
            None => name.is_empty(),
            Some((&"**", rest)) => (0..=name.len()).any(|i| walk(rest, &name[i..])),
            Some((&"*", rest)) => !name.is_empty() && walk(rest, &name[1..]),
            Some((segment, rest)) => name.first() == Some(segment) && walk(rest, &name[1..]),
        }
    }
    let glob: Vec<&str> = glob.split('.').collect();
    let name: Vec<&str> = if name.is_empty() {
        Vec::new()
    } else {
        name.split('.').collect()
    };
    walk(&glob, &name)
}
