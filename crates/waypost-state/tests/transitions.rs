//! Integration tests for the transition engine.
//!
//! These tests drive a `StateEngine` end to end: registration, resolution,
//! hooks, events, supersession and the URL round trip through a
//! `MemoryLocation`.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tokio::sync::Notify;

use waypost_core::Params;
use waypost_resolve::{Invocable, Rejection};
use waypost_state::{
    CancelEvent, Error, ErrorEvent, HrefOptions, LocationProvider, MemoryLocation, NotFoundEvent,
    Registration, RuleHandler, StartEvent, StateDeclaration, StateEngine, StaticTemplates,
    SuccessEvent, TEMPLATE_KEY, TransitionError, TransitionFuture, TransitionListener,
    TransitionOptions,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn params(pairs: &[(&str, Value)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn engine_at(url: &str) -> (StateEngine, Arc<MemoryLocation>) {
    let location = Arc::new(MemoryLocation::new(url));
    let engine = StateEngine::builder()
        .location(location.clone())
        .build()
        .unwrap();
    (engine, location)
}

/// Counts enter hooks per state.
#[derive(Default)]
struct Entries(Mutex<Vec<String>>);

impl Entries {
    fn hook(self: &Arc<Self>, decl: StateDeclaration) -> StateDeclaration {
        let entries = Arc::clone(self);
        decl.on_enter(move |ctx| {
            entries.0.lock().unwrap().push(ctx.state.name().to_string());
            Ok(())
        })
    }

    fn count(&self, name: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|n| *n == name).count()
    }
}

/// Records every event it sees.
#[derive(Default)]
struct Recorder {
    starts: AtomicUsize,
    cancels: AtomicUsize,
    successes: AtomicUsize,
    errors: Mutex<Vec<TransitionError>>,
    prevent_start: bool,
}

impl TransitionListener for Recorder {
    fn on_start(&self, event: &StartEvent) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.prevent_start {
            event.prevent();
        }
    }

    fn on_cancel(&self, _event: &CancelEvent) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, _event: &SuccessEvent) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, event: &ErrorEvent) {
        self.errors.lock().unwrap().push(event.error.clone());
    }
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_children_registered_before_parents() {
    let (engine, _) = engine_at("/");
    let queued = engine
        .register(StateDeclaration::new("shop.cart").url("/cart"))
        .unwrap();
    assert_eq!(
        queued,
        Registration::Queued {
            parent: "shop".into()
        }
    );
    assert_eq!(engine.pending(), vec!["shop.cart".to_string()]);
    assert!(engine.get("shop.cart").is_none());

    let built = engine
        .register(StateDeclaration::new("shop").url("/shop"))
        .unwrap();
    assert_eq!(built.built().len(), 2);
    assert!(engine.pending().is_empty());
    assert_eq!(engine.router().len(), 2);

    engine
        .transition_to("shop.cart", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.router().location().url(), "/shop/cart");
}

#[tokio::test]
async fn test_broken_queued_child_leaves_parent_routed() {
    let (engine, location) = engine_at("/a/good");
    engine
        .register(StateDeclaration::new("a.bad").url("/{id}/{id}"))
        .unwrap();
    engine
        .register(StateDeclaration::new("a.good").url("/good"))
        .unwrap();

    let outcome = engine
        .register(StateDeclaration::new("a").url("/a"))
        .unwrap();
    assert_eq!(outcome.built().len(), 2);
    assert_eq!(outcome.rejected()[0].0, "a.bad");
    assert!(matches!(outcome.rejected()[0].1, Error::Core(_)));
    assert!(engine.get("a.bad").is_none());
    assert!(engine.pending().is_empty());
    assert_eq!(engine.router().len(), 2);

    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "a.good");

    location.set_url("/a", false);
    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "a");

    engine
        .register(StateDeclaration::new("a.bad").url("/bad/{id}"))
        .unwrap();
    assert_eq!(engine.router().len(), 3);
}

// =============================================================================
// Kept states
// =============================================================================

#[tokio::test]
async fn test_parent_is_kept_when_entering_child() {
    let (engine, location) = engine_at("/");
    let entries = Arc::new(Entries::default());
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = loads.clone();

    engine
        .register(entries.hook(StateDeclaration::new("list").url("/list").resolve(
            "items",
            Invocable::func(Vec::<String>::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(json!(["a", "b"])) }
            }),
        )))
        .unwrap();
    engine
        .register(entries.hook(StateDeclaration::new("list.detail").url("/{id}")))
        .unwrap();

    engine
        .transition_to("list", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    engine
        .go(".detail", params(&[("id", json!("42"))]))
        .await
        .unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(entries.count("list"), 1);
    assert_eq!(entries.count("list.detail"), 1);
    assert_eq!(engine.params(), params(&[("id", json!("42"))]));
    assert_eq!(location.url(), "/list/42");

    let detail = engine.locals("list.detail").unwrap();
    assert_eq!(detail.get("items"), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn test_changed_parent_param_reenters_parent() {
    let (engine, _) = engine_at("/");
    let entries = Arc::new(Entries::default());
    engine
        .register(entries.hook(StateDeclaration::new("org").url("/org/:org")))
        .unwrap();
    engine
        .register(entries.hook(StateDeclaration::new("org.repo").url("/:repo")))
        .unwrap();

    let to = |org: &str, repo: &str| params(&[("org", json!(org)), ("repo", json!(repo))]);
    engine
        .transition_to("org.repo", to("acme", "api"), TransitionOptions::default())
        .await
        .unwrap();
    engine
        .transition_to("org.repo", to("acme", "web"), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(entries.count("org"), 1);
    assert_eq!(entries.count("org.repo"), 2);

    engine
        .transition_to("org.repo", to("other", "web"), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(entries.count("org"), 2);
    assert_eq!(entries.count("org.repo"), 3);
}

#[tokio::test]
async fn test_exit_hooks_run_child_first() {
    let (engine, _) = engine_at("/");
    let exits = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "a.b", "a.b.c"] {
        let exits = exits.clone();
        engine
            .register(StateDeclaration::new(name).on_exit(move |ctx| {
                exits.lock().unwrap().push(ctx.state.name().to_string());
                Ok(())
            }))
            .unwrap();
    }
    engine.register(StateDeclaration::new("z")).unwrap();

    engine
        .transition_to("a.b.c", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    engine
        .transition_to("z", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(*exits.lock().unwrap(), vec!["a.b.c", "a.b", "a"]);
    assert!(engine.locals("a.b").is_none());
}

#[tokio::test]
async fn test_reload_from_reenters_subtree_only() {
    let (engine, _) = engine_at("/");
    let entries = Arc::new(Entries::default());
    engine
        .register(entries.hook(StateDeclaration::new("app")))
        .unwrap();
    engine
        .register(entries.hook(StateDeclaration::new("app.page")))
        .unwrap();
    engine
        .transition_to("app.page", Params::new(), TransitionOptions::default())
        .await
        .unwrap();

    engine.reload(Some("app.page")).await.unwrap();
    assert_eq!(entries.count("app"), 1);
    assert_eq!(entries.count("app.page"), 2);

    engine.reload(None).await.unwrap();
    assert_eq!(entries.count("app"), 2);
    assert_eq!(entries.count("app.page"), 3);
}

// =============================================================================
// Failed commits
// =============================================================================

fn home_with_resolve(engine: &StateEngine) {
    engine
        .register(StateDeclaration::new("home").url("/home").resolve(
            "h",
            Invocable::func(Vec::<String>::new(), |_| async { Ok(json!("home data")) }),
        ))
        .unwrap();
}

#[tokio::test]
async fn test_enter_hook_rejection_leaves_current_intact() {
    let (engine, location) = engine_at("/");
    home_with_resolve(&engine);
    engine
        .register(
            StateDeclaration::new("b")
                .url("/b")
                .on_enter(|_| Err(Rejection::new("nope"))),
        )
        .unwrap();
    engine
        .transition_to("home", Params::new(), TransitionOptions::default())
        .await
        .unwrap();

    let err = engine
        .transition_to("b", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().reason(), &json!("nope"));
    assert_eq!(engine.current().name(), "home");
    assert_eq!(
        engine.locals("home").unwrap().get("h"),
        Some(&json!("home data"))
    );
    assert!(engine.locals("b").is_none());
    assert_eq!(location.url(), "/home");
    assert!(!engine.transition_in_flight());
}

#[tokio::test]
async fn test_exit_hook_rejection_leaves_current_intact() {
    let (engine, location) = engine_at("/");
    engine
        .register(
            StateDeclaration::new("editor")
                .url("/editor")
                .on_exit(|_| Err(Rejection::new("unsaved changes"))),
        )
        .unwrap();
    engine.register(StateDeclaration::new("list").url("/list")).unwrap();
    engine
        .transition_to("editor", Params::new(), TransitionOptions::default())
        .await
        .unwrap();

    let err = engine
        .transition_to("list", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().reason(), &json!("unsaved changes"));
    assert_eq!(engine.current().name(), "editor");
    assert!(engine.locals("editor").is_some());
    assert!(engine.locals("list").is_none());
    assert_eq!(location.url(), "/editor");
}

#[tokio::test]
async fn test_transition_started_by_enter_hook_supersedes() {
    let (engine, location) = engine_at("/");
    let slot: Arc<Mutex<Option<StateEngine>>> = Arc::new(Mutex::new(None));
    let started: Arc<Mutex<Option<TransitionFuture>>> = Arc::new(Mutex::new(None));
    home_with_resolve(&engine);
    {
        let slot = slot.clone();
        let started = started.clone();
        engine
            .register(StateDeclaration::new("b").url("/b").on_enter(move |_| {
                if let Some(engine) = slot.lock().unwrap().as_ref() {
                    let next =
                        engine.transition_to("c", Params::new(), TransitionOptions::default());
                    *started.lock().unwrap() = Some(next);
                }
                Ok(())
            }))
            .unwrap();
    }
    engine.register(StateDeclaration::new("c").url("/c")).unwrap();
    engine
        .transition_to("home", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    *slot.lock().unwrap() = Some(engine.clone());

    let err = engine
        .transition_to("b", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_superseded());
    assert_eq!(engine.current().name(), "home");
    assert!(engine.locals("home").is_some());
    assert!(engine.locals("b").is_none());
    assert_eq!(location.url(), "/home");

    let next = started.lock().unwrap().take().unwrap();
    let state = next.await.unwrap();
    slot.lock().unwrap().take();
    assert_eq!(state.name(), "c");
    assert_eq!(engine.current().name(), "c");
    assert!(engine.locals("home").is_none());
    assert!(engine.locals("b").is_none());
    assert!(engine.locals("c").is_some());
    assert_eq!(location.url(), "/c");
}

// =============================================================================
// Supersession
// =============================================================================

#[tokio::test]
async fn test_newer_transition_supersedes_older() {
    let (engine, location) = engine_at("/");
    let entries = Arc::new(Entries::default());
    let gate = Arc::new(Notify::new());
    let release = gate.clone();

    engine
        .register(entries.hook(StateDeclaration::new("slow").url("/slow").resolve(
            "data",
            Invocable::func(Vec::<String>::new(), move |_| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(json!("late"))
                }
            }),
        )))
        .unwrap();
    engine
        .register(entries.hook(StateDeclaration::new("fast").url("/fast")))
        .unwrap();

    let first = tokio::spawn(engine.transition_to(
        "slow",
        Params::new(),
        TransitionOptions::default(),
    ));
    tokio::task::yield_now().await;
    assert!(engine.transition_in_flight());

    engine
        .transition_to("fast", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    release.notify_one();

    let err = first.await.unwrap().unwrap_err();
    assert!(err.is_superseded());
    assert_eq!(entries.count("slow"), 0);
    assert_eq!(engine.current().name(), "fast");
    assert_eq!(location.history(), vec!["/", "/fast"]);
    assert!(engine.locals("slow").is_none());
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_prevented_start_cancels() {
    let (engine, location) = engine_at("/");
    let recorder = Arc::new(Recorder {
        prevent_start: true,
        ..Recorder::default()
    });
    engine.subscribe(recorder.clone());
    engine
        .register(StateDeclaration::new("home").url("/home"))
        .unwrap();

    let err = engine
        .transition_to("home", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_prevented());
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.cancels.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.successes.load(Ordering::SeqCst), 0);
    assert!(engine.current().is_root());
    assert_eq!(location.url(), "/");
}

#[tokio::test]
async fn test_silent_transition_fires_nothing() {
    let (engine, _) = engine_at("/");
    let recorder = Arc::new(Recorder {
        prevent_start: true,
        ..Recorder::default()
    });
    engine.subscribe(recorder.clone());
    engine.register(StateDeclaration::new("home")).unwrap();
    engine
        .transition_to(
            "home",
            Params::new(),
            TransitionOptions::default().notify(false),
        )
        .await
        .unwrap();
    assert_eq!(recorder.starts.load(Ordering::SeqCst), 0);
    assert_eq!(engine.current().name(), "home");
}

#[tokio::test]
async fn test_missing_template_fires_error() {
    let (engine, _) = engine_at("/");
    let recorder = Arc::new(Recorder::default());
    engine.subscribe(recorder.clone());
    engine
        .register(StateDeclaration::new("page").template_url("page.html"))
        .unwrap();

    let err = engine
        .transition_to("page", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.rejection().is_some());
    assert_eq!(*recorder.errors.lock().unwrap(), vec![err]);
    assert!(engine.current().is_root());
}

#[tokio::test]
async fn test_loaded_templates_reach_views() {
    let loader = StaticTemplates::new().with("page.html", "<page/>");
    let engine = StateEngine::builder()
        .template_loader(Arc::new(loader))
        .build()
        .unwrap();
    engine
        .register(StateDeclaration::new("page").template_url("page.html"))
        .unwrap();
    engine
        .transition_to("page", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    let locals = engine.locals("page").unwrap();
    let view = locals.views().values().next().unwrap();
    assert_eq!(view.get(TEMPLATE_KEY), Some(&json!("<page/>")));
}

// =============================================================================
// Not Found
// =============================================================================

enum NotFoundPolicy {
    Prevent,
    Redirect(&'static str),
    Retry(StateEngine),
}

struct OnNotFound(NotFoundPolicy);

impl TransitionListener for OnNotFound {
    fn on_not_found(&self, event: &NotFoundEvent) {
        match &self.0 {
            NotFoundPolicy::Prevent => event.prevent(),
            NotFoundPolicy::Redirect(to) => event.redirect(*to, Params::new()),
            NotFoundPolicy::Retry(engine) => {
                let engine = engine.clone();
                let name = event.to.clone();
                event.retry(Box::pin(async move {
                    engine.register(StateDeclaration::new(name)).unwrap();
                }));
            }
        }
    }
}

#[tokio::test]
async fn test_not_found_prevented_aborts() {
    let (engine, _) = engine_at("/");
    engine.subscribe(Arc::new(OnNotFound(NotFoundPolicy::Prevent)));
    let err = engine
        .transition_to("ghost", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_aborted());
}

#[tokio::test]
async fn test_not_found_redirect() {
    let (engine, _) = engine_at("/");
    engine.register(StateDeclaration::new("home")).unwrap();
    engine.subscribe(Arc::new(OnNotFound(NotFoundPolicy::Redirect("home"))));
    let state = engine
        .transition_to("ghost", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(state.name(), "home");
}

#[tokio::test]
async fn test_not_found_redirect_to_missing_fails() {
    let (engine, _) = engine_at("/");
    engine.subscribe(Arc::new(OnNotFound(NotFoundPolicy::Redirect("nowhere"))));
    let err = engine
        .transition_to("ghost", Params::new(), TransitionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_failed());
}

#[tokio::test]
async fn test_not_found_retry_after_lazy_registration() {
    let (engine, _) = engine_at("/");
    engine.subscribe(Arc::new(OnNotFound(NotFoundPolicy::Retry(engine.clone()))));
    let state = engine
        .transition_to("lazy", Params::new(), TransitionOptions::default())
        .await
        .unwrap();
    assert_eq!(state.name(), "lazy");
    assert_eq!(engine.current().name(), "lazy");
}

// =============================================================================
// URL Round Trip
// =============================================================================

fn contacts(engine: &StateEngine) {
    engine
        .register(StateDeclaration::new("contacts").url("/contacts"))
        .unwrap();
    engine
        .register(StateDeclaration::new("contacts.detail").url("/{id:int}"))
        .unwrap();
}

#[tokio::test]
async fn test_user_navigation_drives_transitions() {
    let (engine, location) = engine_at("/");
    contacts(&engine);
    engine
        .transition_to(
            "contacts.detail",
            params(&[("id", json!(12))]),
            TransitionOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(location.url(), "/contacts/12");

    location.set_url("/contacts", false);
    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "contacts");
    assert_eq!(location.url(), "/contacts");

    assert!(location.back());
    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "contacts.detail");
    assert_eq!(engine.params().get("id"), Some(&json!(12)));
}

#[tokio::test]
async fn test_otherwise_redirects_unknown_urls() {
    let (engine, location) = engine_at("/missing");
    contacts(&engine);
    engine
        .router()
        .otherwise(RuleHandler::Redirect("/contacts".into()));
    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "contacts");
    assert_eq!(location.url(), "/contacts");
}

#[tokio::test]
async fn test_failed_url_transition_restores_location() {
    let (engine, location) = engine_at("/");
    engine.register(StateDeclaration::new("home").url("/home")).unwrap();
    engine
        .register(
            StateDeclaration::new("locked")
                .url("/locked")
                .on_enter(|_| Err(Rejection::new("locked"))),
        )
        .unwrap();
    engine
        .transition_to("home", Params::new(), TransitionOptions::default())
        .await
        .unwrap();

    location.set_url("/locked", false);
    assert!(engine.on_location_change().await);
    assert_eq!(engine.current().name(), "home");
    assert_eq!(location.url(), "/home");
}

#[tokio::test]
async fn test_href_in_html5_mode() {
    let location = Arc::new(
        MemoryLocation::new("/")
            .with_origin("https", "example.com", 8443)
            .with_base_href("/app/"),
    );
    let engine = StateEngine::builder()
        .location(location)
        .router_config(waypost_state::RouterConfig {
            html5_mode: true,
            ..Default::default()
        })
        .build()
        .unwrap();
    contacts(&engine);

    let relative = engine
        .href(
            "contacts.detail",
            params(&[("id", json!(3))]),
            &HrefOptions::default(),
        )
        .unwrap();
    assert_eq!(relative.as_deref(), Some("/app/contacts/3"));

    let absolute = engine
        .href(
            "contacts.detail",
            params(&[("id", json!(3))]),
            &HrefOptions {
                absolute: true,
                ..HrefOptions::default()
            },
        )
        .unwrap();
    assert_eq!(
        absolute.as_deref(),
        Some("https://example.com:8443/app/contacts/3")
    );
}

#[tokio::test]
async fn test_state_matching_globs() {
    let (engine, _) = engine_at("/");
    engine.register(StateDeclaration::new("admin")).unwrap();
    engine.register(StateDeclaration::new("admin.users")).unwrap();
    engine
        .register(StateDeclaration::new("admin.users.edit"))
        .unwrap();
    engine
        .transition_to("admin.users.edit", Params::new(), TransitionOptions::default())
        .await
        .unwrap();

    assert!(engine.is("admin.users.edit", None));
    assert!(engine.includes("admin", None));
    assert!(engine.includes("admin.**", None));
    assert!(engine.includes("*.users.*", None));
    assert!(!engine.includes("*.users", None));
    assert!(!engine.includes("admin.settings", None));
}
