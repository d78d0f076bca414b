//! Transition notifications.
//!
//! Listeners implement [`TransitionListener`] and override the callbacks
//! they care about. Start, not-found and error events can be prevented;
//! not-found events can also redirect and hand back a retry future.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use waypost_core::Params;

use crate::error::TransitionError;
use crate::guard;

/// Source and target of a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionInfo {
    /// Target state name.
    pub to: String,
    /// Target parameters.
    pub to_params: Params,
    /// State the transition started from.
    pub from: String,
    /// Parameters at the start.
    pub from_params: Params,
}

/// A flag listeners can raise.
#[derive(Debug, Default)]
struct Prevent(AtomicBool);

impl Prevent {
    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fired before anything is resolved. Preventing it cancels the transition.
#[derive(Debug)]
pub struct StartEvent {
    /// Source and target.
    pub info: TransitionInfo,
    prevented: Prevent,
}

impl StartEvent {
    pub(crate) fn new(info: TransitionInfo) -> Self {
        Self {
            info,
            prevented: Prevent::default(),
        }
    }

    /// Cancel the transition.
    pub fn prevent(&self) {
        self.prevented.raise();
    }

    /// Whether a listener cancelled the transition.
    pub fn is_prevented(&self) -> bool {
        self.prevented.is_raised()
    }
}

/// Fired after a transition committed.
#[derive(Debug, Clone)]
pub struct SuccessEvent {
    /// Source and target.
    pub info: TransitionInfo,
}

/// Fired when a start listener cancelled a transition.
#[derive(Debug, Clone)]
pub struct CancelEvent {
    /// Source and target.
    pub info: TransitionInfo,
}

/// Fired when a transition failed after it started resolving.
///
/// Preventing it keeps the router from restoring the last known URL.
#[derive(Debug)]
pub struct ErrorEvent {
    /// Source and target.
    pub info: TransitionInfo,
    /// What went wrong.
    pub error: TransitionError,
    prevented: Prevent,
}

impl ErrorEvent {
    pub(crate) fn new(info: TransitionInfo, error: TransitionError) -> Self {
        Self {
            info,
            error,
            prevented: Prevent::default(),
        }
    }

    /// Skip the location resync.
    pub fn prevent(&self) {
        self.prevented.raise();
    }

    /// Whether a listener skipped the resync.
    pub fn is_prevented(&self) -> bool {
        self.prevented.is_raised()
    }
}

/// Fired when the target state is unknown.
pub struct NotFoundEvent {
    /// The requested target.
    pub to: String,
    /// The requested parameters.
    pub to_params: Params,
    /// State the transition started from.
    pub from: String,
    /// Parameters at the start.
    pub from_params: Params,
    prevented: Prevent,
    redirect: Mutex<Option<(String, Params)>>,
    retry: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl NotFoundEvent {
    pub(crate) fn new(to: String, to_params: Params, from: String, from_params: Params) -> Self {
        Self {
            to,
            to_params,
            from,
            from_params,
            prevented: Prevent::default(),
            redirect: Mutex::new(None),
            retry: Mutex::new(None),
        }
    }

    /// Abort the transition.
    pub fn prevent(&self) {
        self.prevented.raise();
    }

    /// Whether a listener aborted the transition.
    pub fn is_prevented(&self) -> bool {
        self.prevented.is_raised()
    }

    /// Try a different target instead.
    pub fn redirect(&self, to: impl Into<String>, params: Params) {
        *guard::lock(&self.redirect) = Some((to.into(), params));
    }

    /// Wait for `retry` (typically lazy registration) and try again once.
    pub fn retry(&self, retry: BoxFuture<'static, ()>) {
        *guard::lock(&self.retry) = Some(retry);
    }

    pub(crate) fn take_redirect(&self) -> Option<(String, Params)> {
        guard::lock(&self.redirect).take()
    }

    pub(crate) fn take_retry(&self) -> Option<BoxFuture<'static, ()>> {
        guard::lock(&self.retry).take()
    }
}

impl fmt::Debug for NotFoundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotFoundEvent")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("prevented", &self.is_prevented())
            .finish_non_exhaustive()
    }
}

/// Receives transition notifications. Every method defaults to doing nothing.
pub trait TransitionListener: Send + Sync {
    /// A transition is about to resolve.
    fn on_start(&self, _event: &StartEvent) {}

    /// A start listener cancelled a transition.
    fn on_cancel(&self, _event: &CancelEvent) {}

    /// A transition committed.
    fn on_success(&self, _event: &SuccessEvent) {}

    /// A transition failed.
    fn on_error(&self, _event: &ErrorEvent) {}

    /// A target state is unknown.
    fn on_not_found(&self, _event: &NotFoundEvent) {}
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// The listeners of one engine.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TransitionListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// A bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn subscribe(&self, listener: Arc<dyn TransitionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        guard::write(&self.listeners).push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = guard::write(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        guard::read(&self.listeners).len()
    }

    /// Whether nobody listens.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `f` on each listener, outside the lock so listeners may
    /// subscribe or start transitions.
    pub(crate) fn emit(&self, f: impl Fn(&dyn TransitionListener)) {
        let listeners: Vec<_> = guard::read(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").field("listeners", &self.len()).finish()
    }
}
