//! The state build pipeline.
//!
//! A declaration becomes a [`State`] by running a fixed sequence of steps
//! over a mutable [`StateDraft`]. Each step fills in one derived property
//! from the declaration and the already-built parent:
//!
//! | step | produces |
//! |------|----------|
//! | `parent` | parent id (dotted prefix wins over the explicit field) |
//! | `data` | inherited data overlaid with the state's own |
//! | `url` | `^`-prefixed patterns compile as-is, others concatenate onto the nearest ancestor URL |
//! | `navigable` | nearest state on the path with a URL |
//! | `own_params` | URL parameters plus config-only parameters |
//! | `params` | own parameters layered onto the parent's |
//! | `views` | declared views keyed `view@state`, the implicit one `@parent` |
//! | `path` | ids from the top-level ancestor down to the state |
//! | `includes` | names of the state and its ancestors |
//!
//! Any step can be swapped out with [`StateBuilder::decorate`], which hands
//! the replacement the step it replaces.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use waypost_core::{MatcherConfig, MatcherFactory, Param, ParamLocation, ParamSet, Params, UrlMatcher};
use waypost_resolve::Resolver;

use crate::error::{Error, Result};
use crate::state::{State, StateDeclaration, StateId, ViewDeclaration};

/// The steps of the pipeline, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStep {
    /// Find the parent state.
    Parent,
    /// Inherit data.
    Data,
    /// Compile the URL.
    Url,
    /// Find the nearest state with a URL.
    Navigable,
    /// Collect the state's own parameters.
    OwnParams,
    /// Layer own parameters onto the parent's.
    Params,
    /// Qualify view names.
    Views,
    /// Compute the ancestor path.
    Path,
    /// Compute the ancestor name set.
    Includes,
}

impl BuildStep {
    /// Every step, in execution order.
    pub const ORDER: [BuildStep; 9] = [
        BuildStep::Parent,
        BuildStep::Data,
        BuildStep::Url,
        BuildStep::Navigable,
        BuildStep::OwnParams,
        BuildStep::Params,
        BuildStep::Views,
        BuildStep::Path,
        BuildStep::Includes,
    ];

    /// Step name, as used in log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Data => "data",
            Self::Url => "url",
            Self::Navigable => "navigable",
            Self::OwnParams => "own_params",
            Self::Params => "params",
            Self::Views => "views",
            Self::Path => "path",
            Self::Includes => "includes",
        }
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A state under construction.
#[derive(Debug)]
pub struct StateDraft {
    /// The declaration being built.
    pub declaration: StateDeclaration,
    /// The id the state will get.
    pub id: StateId,
    /// Full name.
    pub name: String,
    /// Parent id.
    pub parent: Option<StateId>,
    /// Inherited plus own data.
    pub data: Params,
    /// Compiled URL.
    pub url: Option<Arc<UrlMatcher>>,
    /// Nearest state with a URL.
    pub navigable: Option<StateId>,
    /// Parameters declared by this state.
    pub own_params: Arc<ParamSet>,
    /// Parameters of the state and its ancestors.
    pub params: Arc<ParamSet>,
    /// Qualified views.
    pub views: Vec<(String, ViewDeclaration)>,
    /// Ancestor path including the state.
    pub path: Vec<StateId>,
    /// Names of the state and its ancestors.
    pub includes: BTreeSet<String>,
}

impl StateDraft {
    fn new(id: StateId, declaration: StateDeclaration) -> Self {
        Self {
            name: declaration.name.clone(),
            declaration,
            id,
            parent: None,
            data: Params::new(),
            url: None,
            navigable: None,
            own_params: Arc::new(ParamSet::new()),
            params: Arc::new(ParamSet::new()),
            views: Vec::new(),
            path: Vec::new(),
            includes: BTreeSet::new(),
        }
    }

    /// Whether this draft is the implicit root.
    pub fn is_root(&self) -> bool {
        self.id == StateId::ROOT
    }
}

/// Read access to already-built states while a step runs.
pub struct BuildContext<'a> {
    pub(crate) states: &'a [Arc<State>],
    pub(crate) by_name: &'a HashMap<String, StateId>,
    pub(crate) factory: &'a MatcherFactory,
}

impl<'a> BuildContext<'a> {
    /// A built state by id.
    pub fn state(&self, id: StateId) -> Option<&'a Arc<State>> {
        self.states.get(id.index())
    }

    /// A built state by full name.
    pub fn find(&self, name: &str) -> Option<&'a Arc<State>> {
        self.by_name.get(name).and_then(|id| self.state(*id))
    }

    /// The implicit root, once built.
    pub fn root(&self) -> Option<&'a Arc<State>> {
        self.state(StateId::ROOT)
    }

    /// The factory URLs are compiled with.
    pub fn factory(&self) -> &'a MatcherFactory {
        self.factory
    }

    /// The draft's parent, which must already be set and built.
    pub fn parent_of(&self, draft: &StateDraft) -> Option<&'a Arc<State>> {
        draft.parent.and_then(|id| self.state(id))
    }
}

/// One step's implementation.
pub type StepFn = Arc<dyn Fn(&mut StateDraft, &BuildContext<'_>) -> Result<()> + Send + Sync>;

/// The name of a declaration's parent. Empty means the root.
pub fn parent_name(declaration: &StateDeclaration) -> String {
    match declaration.name.rfind('.') {
        Some(pos) => declaration.name[..pos].to_string(),
        None => declaration.parent.clone().unwrap_or_default(),
    }
}

/// The overridable build pipeline.
#[derive(Clone)]
pub struct StateBuilder {
    steps: Vec<(BuildStep, StepFn)>,
}

impl Default for StateBuilder {
    fn default() -> Self {
        let steps = BuildStep::ORDER
            .iter()
            .map(|step| (*step, default_step(*step)))
            .collect();
        Self { steps }
    }
}

impl StateBuilder {
    /// The standard pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current implementation of `step`.
    pub fn step(&self, step: BuildStep) -> StepFn {
        self.steps
            .iter()
            .find(|(s, _)| *s == step)
            .map(|(_, f)| Arc::clone(f))
            .unwrap_or_else(|| default_step(step))
    }

    /// Replace `step` with `f`, which receives the replaced implementation.
    pub fn decorate<F>(&mut self, step: BuildStep, f: F)
    where
        F: Fn(&mut StateDraft, &BuildContext<'_>, &StepFn) -> Result<()> + Send + Sync + 'static,
    {
        let prior = self.step(step);
        let decorated: StepFn =
            Arc::new(move |draft: &mut StateDraft, ctx: &BuildContext<'_>| f(draft, ctx, &prior));
        for (s, slot) in &mut self.steps {
            if *s == step {
                *slot = Arc::clone(&decorated);
            }
        }
    }

    /// Run the pipeline and plan the state's resolve maps.
    pub(crate) fn build(
        &self,
        id: StateId,
        declaration: StateDeclaration,
        ctx: &BuildContext<'_>,
    ) -> Result<State> {
        let mut draft = StateDraft::new(id, declaration);
        for (step, f) in &self.steps {
            log::trace!("Building state '{}': {}", draft.name, step);
            f(&mut draft, ctx)?;
        }

        let plan = Resolver::study(&draft.declaration.resolve)?;
        for (_, view) in &draft.views {
            Resolver::study(&view.resolve)?;
        }

        Ok(State {
            id: draft.id,
            name: draft.name,
            parent: draft.parent,
            url: draft.url,
            navigable: draft.navigable,
            own_params: draft.own_params,
            params: draft.params,
            data: draft.data,
            views: draft.views,
            path: draft.path,
            includes: draft.includes,
            plan,
            declaration: draft.declaration,
        })
    }
}

impl fmt::Debug for StateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateBuilder")
            .field("steps", &self.steps.iter().map(|(s, _)| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Default steps
// ============================================================================

fn default_step(step: BuildStep) -> StepFn {
    match step {
        BuildStep::Parent => Arc::new(parent_step),
        BuildStep::Data => Arc::new(data_step),
        BuildStep::Url => Arc::new(url_step),
        BuildStep::Navigable => Arc::new(navigable_step),
        BuildStep::OwnParams => Arc::new(own_params_step),
        BuildStep::Params => Arc::new(params_step),
        BuildStep::Views => Arc::new(views_step),
        BuildStep::Path => Arc::new(path_step),
        BuildStep::Includes => Arc::new(includes_step),
    }
}

fn parent_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    if draft.is_root() {
        draft.parent = None;
        return Ok(());
    }
    let name = parent_name(&draft.declaration);
    let parent = ctx.find(&name).ok_or_else(|| {
        Error::config(format!(
            "Parent state '{name}' of '{}' is not registered",
            draft.name
        ))
    })?;
    draft.parent = Some(parent.id());
    Ok(())
}

fn data_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let mut data = ctx
        .parent_of(draft)
        .map(|p| p.data().clone())
        .unwrap_or_default();
    data.extend(draft.declaration.data.clone());
    draft.data = data;
    Ok(())
}

fn url_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let Some(url) = draft.declaration.url.clone() else {
        draft.url = None;
        return Ok(());
    };
    let config = MatcherConfig {
        params: draft.declaration.params.clone(),
        ..MatcherConfig::default()
    };
    let matcher = if let Some(absolute) = url.strip_prefix('^') {
        ctx.factory().compile(absolute, &config)?
    } else {
        let base = ctx
            .parent_of(draft)
            .and_then(|p| p.navigable())
            .and_then(|id| ctx.state(id))
            .or_else(|| ctx.root())
            .and_then(|s| s.url())
            .ok_or_else(|| {
                Error::config(format!("Invalid url '{url}' in state '{}'", draft.name))
            })?;
        base.concat(&url, &config)?
    };
    log::debug!("State '{}' matches '{}'", draft.name, matcher.source());
    draft.url = Some(Arc::new(matcher));
    Ok(())
}

fn navigable_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    draft.navigable = if draft.is_root() {
        None
    } else if draft.url.is_some() {
        Some(draft.id)
    } else {
        ctx.parent_of(draft).and_then(|p| p.navigable())
    };
    Ok(())
}

fn own_params_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let mut own = ParamSet::new();
    if let Some(url) = &draft.url {
        for param in url.params().own() {
            own.insert(param.clone())?;
        }
    }
    let param_ctx = ctx.factory().context();
    for (id, config) in &draft.declaration.params {
        let in_url = draft
            .url
            .as_ref()
            .is_some_and(|u| u.params().get(id).is_some());
        if in_url || own.contains_own(id) {
            continue;
        }
        own.insert(Param::new(
            id.as_str(),
            None,
            Some(config),
            ParamLocation::Config,
            &param_ctx,
        )?)?;
    }
    draft.own_params = Arc::new(own);
    Ok(())
}

fn params_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let Some(parent) = ctx.parent_of(draft) else {
        draft.params = Arc::new(ParamSet::new());
        return Ok(());
    };
    let mut params = ParamSet::child(parent.params());
    for param in draft.own_params.own() {
        params.insert(param.clone())?;
    }
    draft.params = Arc::new(params);
    Ok(())
}

fn views_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let Some(parent) = ctx.parent_of(draft) else {
        draft.views = Vec::new();
        return Ok(());
    };
    // Declared views belong to the state; the implicit one fills the parent's.
    draft.views = match &draft.declaration.views {
        Some(views) => views
            .iter()
            .map(|(name, view)| (qualify(name, &draft.name), view.clone()))
            .collect(),
        None => vec![(qualify("", parent.name()), draft.declaration.implicit_view())],
    };
    Ok(())
}

fn qualify(view: &str, state: &str) -> String {
    if view.contains('@') {
        view.to_string()
    } else {
        format!("{view}@{state}")
    }
}

fn path_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    draft.path = match ctx.parent_of(draft) {
        Some(parent) => {
            let mut path = parent.path().to_vec();
            path.push(draft.id);
            path
        }
        None => Vec::new(),
    };
    Ok(())
}

fn includes_step(draft: &mut StateDraft, ctx: &BuildContext<'_>) -> Result<()> {
    let mut includes = ctx
        .parent_of(draft)
        .map(|p| p.includes.clone())
        .unwrap_or_default();
    includes.insert(draft.name.clone());
    draft.includes = includes;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::StateRegistry;
    use serde_json::json;
    use waypost_core::ParamConfig;

    fn registry() -> StateRegistry {
        StateRegistry::new(MatcherFactory::new()).unwrap()
    }

    // ========================================================================
    // Parent names
    // ========================================================================

    #[test]
    fn test_parent_name_from_dots() {
        let decl = StateDeclaration::new("a.b.c").parent("ignored");
        assert_eq!(parent_name(&decl), "a.b");
    }

    #[test]
    fn test_parent_name_explicit() {
        assert_eq!(parent_name(&StateDeclaration::new("b").parent("a")), "a");
        assert_eq!(parent_name(&StateDeclaration::new("top")), "");
    }

    // ========================================================================
    // Default steps
    // ========================================================================

    #[test]
    fn test_url_concatenates_onto_nearest_url() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("users").url("/users")).unwrap();
        reg.register(StateDeclaration::new("users.list")).unwrap();
        reg.register(StateDeclaration::new("users.list.item").url("/{id:int}"))
            .unwrap();
        let item = reg.get("users.list.item").unwrap();
        assert_eq!(item.url().unwrap().source(), "/users/{id:int}");
        let list = reg.get("users.list").unwrap();
        assert_eq!(list.navigable(), reg.get("users").map(|s| s.id()));
    }

    #[test]
    fn test_absolute_url() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("users").url("/users")).unwrap();
        reg.register(StateDeclaration::new("users.login").url("^/login"))
            .unwrap();
        assert_eq!(reg.get("users.login").unwrap().url().unwrap().source(), "/login");
    }

    #[test]
    fn test_data_inherits() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("a").data("x", 1).data("y", 2))
            .unwrap();
        reg.register(StateDeclaration::new("a.b").data("y", 3)).unwrap();
        let b = reg.get("a.b").unwrap();
        assert_eq!(b.data().get("x"), Some(&json!(1)));
        assert_eq!(b.data().get("y"), Some(&json!(3)));
    }

    #[test]
    fn test_params_layer_onto_parent() {
        let mut reg = registry();
        reg.register(
            StateDeclaration::new("docs")
                .url("/docs/:section")
                .param("lang", ParamConfig::with_default("en")),
        )
        .unwrap();
        reg.register(StateDeclaration::new("docs.page").url("/{page:int}"))
            .unwrap();
        let docs = reg.get("docs").unwrap();
        assert_eq!(docs.own_params().own_keys(), vec!["section", "lang"]);
        let page = reg.get("docs.page").unwrap();
        assert_eq!(page.own_params().own_keys(), vec!["page"]);
        assert_eq!(page.params().keys(), vec!["section", "lang", "page"]);
    }

    #[test]
    fn test_views_are_qualified() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("home").template("<home/>"))
            .unwrap();
        reg.register(
            StateDeclaration::new("home.panel")
                .view("side", ViewDeclaration::inline("<side/>"))
                .view("main@", ViewDeclaration::inline("<main/>")),
        )
        .unwrap();
        let home = reg.get("home").unwrap();
        let names: Vec<_> = home.views().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["@"]);
        let panel = reg.get("home.panel").unwrap();
        let names: Vec<_> = panel.views().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["main@", "side@home.panel"]);
    }

    #[test]
    fn test_child_views_named_after_owner() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("inbox")).unwrap();
        reg.register(StateDeclaration::new("inbox.thread")).unwrap();
        reg.register(
            StateDeclaration::new("inbox.thread.reply")
                .view("editor", ViewDeclaration::inline("<editor/>"))
                .view("", ViewDeclaration::inline("<reply/>")),
        )
        .unwrap();
        reg.register(StateDeclaration::new("inbox.thread.meta").template("<meta/>"))
            .unwrap();

        let reply = reg.get("inbox.thread.reply").unwrap();
        let names: Vec<_> = reply.views().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["@inbox.thread.reply", "editor@inbox.thread.reply"]);

        let meta = reg.get("inbox.thread.meta").unwrap();
        let names: Vec<_> = meta.views().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["@inbox.thread"]);
    }

    #[test]
    fn test_path_and_includes() {
        let mut reg = registry();
        reg.register(StateDeclaration::new("a")).unwrap();
        reg.register(StateDeclaration::new("a.b")).unwrap();
        let a = reg.get("a").unwrap();
        let b = reg.get("a.b").unwrap();
        assert_eq!(b.path(), &[a.id(), b.id()]);
        assert!(b.includes("a"));
        assert!(b.includes(""));
        assert!(!a.includes("a.b"));
    }

    // ========================================================================
    // Decoration
    // ========================================================================

    #[test]
    fn test_decorate_receives_prior() {
        let mut builder = StateBuilder::new();
        builder.decorate(BuildStep::Data, |draft, ctx, prior| {
            prior(draft, ctx)?;
            draft.data.insert("decorated".into(), json!(true));
            Ok(())
        });
        let mut reg = StateRegistry::with_builder(MatcherFactory::new(), builder).unwrap();
        reg.register(StateDeclaration::new("a").data("own", 1)).unwrap();
        let a = reg.get("a").unwrap();
        assert_eq!(a.data().get("own"), Some(&json!(1)));
        assert_eq!(a.data().get("decorated"), Some(&json!(true)));
    }

    #[test]
    fn test_decorate_twice_chains() {
        let mut builder = StateBuilder::new();
        builder.decorate(BuildStep::Data, |draft, ctx, prior| {
            prior(draft, ctx)?;
            draft.data.insert("n".into(), json!(1));
            Ok(())
        });
        builder.decorate(BuildStep::Data, |draft, ctx, prior| {
            prior(draft, ctx)?;
            let n = draft.data.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            draft.data.insert("n".into(), json!(n + 1));
            Ok(())
        });
        let mut reg = StateRegistry::with_builder(MatcherFactory::new(), builder).unwrap();
        reg.register(StateDeclaration::new("a")).unwrap();
        assert_eq!(reg.get("a").unwrap().data().get("n"), Some(&json!(2)));
    }

    #[test]
    fn test_decorated_step_can_fail() {
        let mut builder = StateBuilder::new();
        builder.decorate(BuildStep::Url, |draft, ctx, prior| {
            if draft.declaration.url.as_deref() == Some("/forbidden") {
                return Err(Error::config("forbidden url"));
            }
            prior(draft, ctx)
        });
        let mut reg = StateRegistry::with_builder(MatcherFactory::new(), builder).unwrap();
        assert!(reg.register(StateDeclaration::new("a").url("/forbidden")).is_err());
        assert!(reg.register(StateDeclaration::new("b").url("/fine")).is_ok());
    }

    #[test]
    fn test_step_order() {
        assert_eq!(BuildStep::ORDER[0], BuildStep::Parent);
        assert_eq!(BuildStep::ORDER[8].to_string(), "includes");
    }
}
