//! View resolution.
//!
//! Each view of an entered state gets its own resolution, layered over the
//! state's. Besides the view's own resolve map it always produces
//! `$template`, taken from the inline template or fetched through the
//! [`TemplateLoader`], and `$controller` when one is declared.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use waypost_core::{Injector, Params};
use waypost_resolve::{Invocable, Invocables, Locals, Rejection, ResolveError, Resolution, Resolver};

use crate::state::ViewDeclaration;

/// Resolved key holding a view's template.
pub const TEMPLATE_KEY: &str = "$template";

/// Resolved key holding a view's controller name.
pub const CONTROLLER_KEY: &str = "$controller";

/// Fetches templates by location.
///
/// Implementations are free to cache; the engine asks once per entered view.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Load the template at `url` for a view whose state has `params`.
    async fn load(&self, url: &str, params: &Params) -> Result<String, Rejection>;
}

/// A loader backed by a fixed map.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    templates: HashMap<String, String>,
}

impl StaticTemplates {
    /// An empty loader; every load rejects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template.
    pub fn with(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(url, body);
        self
    }

    /// Add a template.
    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(url.into(), body.into());
    }
}

#[async_trait]
impl TemplateLoader for StaticTemplates {
    async fn load(&self, url: &str, _params: &Params) -> Result<String, Rejection> {
        self.templates
            .get(url)
            .cloned()
            .ok_or_else(|| Rejection::new(format!("Template '{url}' not found")))
    }
}

/// The resolve map for one view: its own entries plus the template.
fn view_invocables(
    view: &ViewDeclaration,
    loader: Arc<dyn TemplateLoader>,
    params: Params,
) -> Invocables {
    let mut map = view.resolve.clone();
    let template = match (&view.template, &view.template_url) {
        (Some(inline), _) => Invocable::value(inline.clone()),
        (None, Some(url)) => {
            let url = url.clone();
            Invocable::func(Vec::<String>::new(), move |_| {
                let loader = Arc::clone(&loader);
                let url = url.clone();
                let params = params.clone();
                async move { loader.load(&url, &params).await.map(Value::String) }
            })
        }
        (None, None) => Invocable::value(Value::Null),
    };
    map.insert(TEMPLATE_KEY, template);
    if let Some(controller) = &view.controller {
        map.insert(CONTROLLER_KEY, Invocable::value(controller.clone()));
    }
    map
}

/// Resolve every view once the state's own resolution has settled.
pub(crate) async fn resolve_views(
    views: Vec<(String, ViewDeclaration)>,
    state: Resolution,
    params: Params,
    loader: Arc<dyn TemplateLoader>,
    injector: Arc<dyn Injector>,
) -> Result<BTreeMap<String, Arc<Locals>>, ResolveError> {
    state.settle().await?;
    let pending = views.into_iter().map(|(name, view)| {
        let invocables = view_invocables(&view, Arc::clone(&loader), params.clone());
        let state = state.clone();
        let injector = Arc::clone(&injector);
        async move {
            let plan = Resolver::study(&invocables)?;
            let locals = plan
                .resolve(Params::new(), Some(&state), injector)
                .settle()
                .await?;
            Ok::<_, ResolveError>((name, locals))
        }
    });
    Ok(try_join_all(pending).await?.into_iter().collect())
}
