//! State declarations and built states.
//!
//! A [`StateDeclaration`] is what the application writes, either in code or
//! in a manifest. Registration turns it into an immutable [`State`] with its
//! inherited pieces (URL, parameters, views, path) already computed.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use waypost_core::{ParamConfig, ParamSet, Params, UrlMatcher};
use waypost_resolve::{Invocable, Invocables, Locals, Rejection, ResolvePlan};

// ============================================================================
// Hooks
// ============================================================================

/// What an enter or exit hook sees.
#[derive(Debug)]
pub struct HookContext<'a> {
    /// The state being entered or exited.
    pub state: &'a State,
    /// That state's parameter values.
    pub params: &'a Params,
    /// That state's resolved values.
    pub locals: &'a Locals,
}

/// An enter or exit callback. Returning a rejection fails the transition.
pub type Hook = Arc<dyn Fn(&HookContext<'_>) -> Result<(), Rejection> + Send + Sync>;

// ============================================================================
// Declarations
// ============================================================================

/// One named view of a state.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViewDeclaration {
    /// Inline template.
    pub template: Option<String>,
    /// Template location, fetched through the template loader.
    pub template_url: Option<String>,
    /// Controller name, passed through untouched.
    pub controller: Option<String>,
    /// Values resolved for this view only.
    pub resolve: Invocables,
}

impl ViewDeclaration {
    /// A view with an inline template.
    pub fn inline(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
            ..Self::default()
        }
    }

    /// A view whose template is loaded from `url`.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            template_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the controller name.
    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    /// Add a resolve entry.
    pub fn with_resolve(mut self, key: impl Into<String>, invocable: Invocable) -> Self {
        self.resolve.insert(key, invocable);
        self
    }
}

/// A state as declared by the application.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateDeclaration {
    /// Dotted name; the prefix before the last dot names the parent.
    pub name: String,
    /// URL pattern. A leading `^` makes it absolute.
    pub url: Option<String>,
    /// Explicit parent, used when the name has no dot.
    pub parent: Option<String>,
    /// Parameter configuration, shared with the URL pattern.
    pub params: BTreeMap<String, ParamConfig>,
    /// Values to resolve before entering.
    pub resolve: Invocables,
    /// Named views. Absent means one unnamed view built from the
    /// state-level template fields.
    pub views: Option<BTreeMap<String, ViewDeclaration>>,
    /// Abstract states are only entered as ancestors.
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    /// Arbitrary data, inherited by descendants.
    pub data: Params,
    /// Re-enter when only search parameters change.
    pub reload_on_search: bool,
    /// Inline template of the implicit view.
    pub template: Option<String>,
    /// Template location of the implicit view.
    pub template_url: Option<String>,
    /// Controller of the implicit view.
    pub controller: Option<String>,
    /// Called after the state is entered.
    #[serde(skip)]
    pub on_enter: Option<Hook>,
    /// Called before the state is exited.
    #[serde(skip)]
    pub on_exit: Option<Hook>,
}

impl Default for StateDeclaration {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: None,
            parent: None,
            params: BTreeMap::new(),
            resolve: Invocables::new(),
            views: None,
            is_abstract: false,
            data: Params::new(),
            reload_on_search: true,
            template: None,
            template_url: None,
            controller: None,
            on_enter: None,
            on_exit: None,
        }
    }
}

impl StateDeclaration {
    /// Start a declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the URL pattern.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set an explicit parent.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Configure a parameter.
    pub fn param(mut self, id: impl Into<String>, config: ParamConfig) -> Self {
        self.params.insert(id.into(), config);
        self
    }

    /// Add a resolve entry.
    pub fn resolve(mut self, key: impl Into<String>, invocable: Invocable) -> Self {
        self.resolve.insert(key, invocable);
        self
    }

    /// Add a named view.
    pub fn view(mut self, name: impl Into<String>, view: ViewDeclaration) -> Self {
        self.views
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), view);
        self
    }

    /// Mark the state abstract.
    pub fn abstract_state(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Add a data entry.
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Keep the state entered when only search parameters change.
    pub fn reload_on_search(mut self, value: bool) -> Self {
        self.reload_on_search = value;
        self
    }

    /// Set the inline template of the implicit view.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Set the template location of the implicit view.
    pub fn template_url(mut self, url: impl Into<String>) -> Self {
        self.template_url = Some(url.into());
        self
    }

    /// Set the enter hook.
    pub fn on_enter<F>(mut self, f: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> Result<(), Rejection> + Send + Sync + 'static,
    {
        self.on_enter = Some(Arc::new(f));
        self
    }

    /// Set the exit hook.
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> Result<(), Rejection> + Send + Sync + 'static,
    {
        self.on_exit = Some(Arc::new(f));
        self
    }

    /// The implicit view, built from the state-level template fields.
    pub(crate) fn implicit_view(&self) -> ViewDeclaration {
        ViewDeclaration {
            template: self.template.clone(),
            template_url: self.template_url.clone(),
            controller: self.controller.clone(),
            resolve: Invocables::new(),
        }
    }
}

impl fmt::Debug for StateDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateDeclaration")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("parent", &self.parent)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .field("resolve", &self.resolve.keys().collect::<Vec<_>>())
            .field("views", &self.views.as_ref().map(|v| v.keys().collect::<Vec<_>>()))
            .field("abstract", &self.is_abstract)
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Built states
// ============================================================================

/// Index of a state in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// The implicit root state.
    pub const ROOT: StateId = StateId(0);

    /// Position in the registry.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A registered state.
pub struct State {
    pub(crate) id: StateId,
    pub(crate) name: String,
    pub(crate) parent: Option<StateId>,
    pub(crate) url: Option<Arc<UrlMatcher>>,
    pub(crate) navigable: Option<StateId>,
    pub(crate) own_params: Arc<ParamSet>,
    pub(crate) params: Arc<ParamSet>,
    pub(crate) data: Params,
    pub(crate) views: Vec<(String, ViewDeclaration)>,
    pub(crate) path: Vec<StateId>,
    pub(crate) includes: BTreeSet<String>,
    pub(crate) plan: ResolvePlan,
    pub(crate) declaration: StateDeclaration,
}

impl State {
    /// Registry id.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Full dotted name. The root's name is empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the implicit root.
    pub fn is_root(&self) -> bool {
        self.id == StateId::ROOT
    }

    /// Parent id. Only the root has none.
    pub fn parent(&self) -> Option<StateId> {
        self.parent
    }

    /// Compiled URL, concatenated onto the nearest ancestor's.
    pub fn url(&self) -> Option<&Arc<UrlMatcher>> {
        self.url.as_ref()
    }

    /// Nearest state on the path (this one included) that has a URL.
    pub fn navigable(&self) -> Option<StateId> {
        self.navigable
    }

    /// Parameters declared by this state alone.
    pub fn own_params(&self) -> &Arc<ParamSet> {
        &self.own_params
    }

    /// Parameters of this state and its ancestors.
    pub fn params(&self) -> &Arc<ParamSet> {
        &self.params
    }

    /// Data, with this state's entries over inherited ones.
    pub fn data(&self) -> &Params {
        &self.data
    }

    /// Views keyed by qualified name (`view@state`).
    pub fn views(&self) -> &[(String, ViewDeclaration)] {
        &self.views
    }

    /// Ids from the top-level ancestor down to this state. Empty for root.
    pub fn path(&self) -> &[StateId] {
        &self.path
    }

    /// Whether `name` is this state or one of its ancestors.
    pub fn includes(&self, name: &str) -> bool {
        self.includes.contains(name)
    }

    /// The planned resolve map.
    pub fn plan(&self) -> &ResolvePlan {
        &self.plan
    }

    /// Whether the state can only be entered as an ancestor.
    pub fn is_abstract(&self) -> bool {
        self.declaration.is_abstract
    }

    /// Whether search-only parameter changes re-enter the state.
    pub fn reload_on_search(&self) -> bool {
        self.declaration.reload_on_search
    }

    /// The declaration this state was built from.
    pub fn declaration(&self) -> &StateDeclaration {
        &self.declaration
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("url", &self.url.as_ref().map(|u| u.source().to_string()))
            .field("navigable", &self.navigable)
            .field("params", &self.params.keys())
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
