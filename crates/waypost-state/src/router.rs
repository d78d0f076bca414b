//! The URL router.
//!
//! An ordered list of rules maps the current location to an action. Each
//! rule pairs a [`RuleMatcher`] with a [`RuleHandler`]; the first rule
//! whose handler does not skip wins, and an optional fallback runs when
//! none does.
//!
//! The router also writes URLs back: [`UrlRouter::push`] records what it
//! wrote so the resulting location change is not dispatched again.

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use waypost_core::{MatcherConfig, MatcherFactory, Params, UrlMatcher};

use crate::error::Result;
use crate::guard;
use crate::location::LocationProvider;

/// Redirects followed by one [`UrlRouter::sync`] before giving up.
const MAX_REDIRECTS: usize = 10;

/// Router options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Path URLs instead of `#`-prefixed ones.
    pub html5_mode: bool,
    /// Inserted after `#` in hash mode, e.g. `!`.
    pub hash_prefix: String,
    /// Overrides the location's document base.
    pub base_href: Option<String>,
}

/// What a handler decided.
pub enum RuleOutcome {
    /// Not handled; try the next rule.
    Skip,
    /// Handled; stop.
    Handled,
    /// Replace the location with this URL and dispatch again.
    Redirect(String),
    /// Handled by starting work that [`UrlRouter::sync`] awaits.
    Navigate(BoxFuture<'static, ()>),
}

impl fmt::Debug for RuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => f.write_str("Skip"),
            Self::Handled => f.write_str("Handled"),
            Self::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
            Self::Navigate(_) => f.write_str("Navigate"),
        }
    }
}

/// What a matcher extracted from the location.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleMatch {
    /// Decoded parameters from a URL matcher.
    Params(Params),
    /// Capture groups from a regex, group 0 first.
    Captures(Vec<Option<String>>),
    /// A predicate accepted the location.
    Location,
}

/// A predicate over the location.
pub type PredicateFn = Arc<dyn Fn(&dyn LocationProvider) -> bool + Send + Sync>;

/// A rule handler function.
pub type RuleFn = Arc<dyn Fn(&RuleMatch, &dyn LocationProvider) -> RuleOutcome + Send + Sync>;

/// Decides whether a rule applies to the location.
#[derive(Clone)]
pub enum RuleMatcher {
    /// A compiled URL pattern, matched against path and search.
    Url(Arc<UrlMatcher>),
    /// A regex matched against the raw path.
    Regex(Regex),
    /// Arbitrary test.
    Predicate(PredicateFn),
}

impl RuleMatcher {
    /// Wrap a predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&dyn LocationProvider) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    fn matches(&self, location: &dyn LocationProvider) -> Option<RuleMatch> {
        match self {
            Self::Url(matcher) => match matcher.exec(&location.path(), &location.search()) {
                Ok(found) => found.map(RuleMatch::Params),
                Err(e) => {
                    log::warn!("Rule '{}' failed to match: {e}", matcher.source());
                    None
                }
            },
            Self::Regex(re) => {
                let path = location.path();
                re.captures(&path).map(|caps| {
                    RuleMatch::Captures(
                        caps.iter()
                            .map(|m| m.map(|m| m.as_str().to_string()))
                            .collect(),
                    )
                })
            }
            Self::Predicate(f) => f(location).then_some(RuleMatch::Location),
        }
    }
}

impl fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(m) => f.debug_tuple("Url").field(&m.source()).finish(),
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// What to do when a rule matches.
#[derive(Clone)]
pub enum RuleHandler {
    /// Redirect. For URL matchers the target is itself a pattern formatted
    /// with the matched parameters; for regexes `$1`..`$99` and `$$` (the
    /// whole match) are interpolated.
    Redirect(String),
    /// Run a function.
    Call(RuleFn),
}

impl RuleHandler {
    /// Wrap a handler function.
    pub fn call<F>(f: F) -> Self
    where
        F: Fn(&RuleMatch, &dyn LocationProvider) -> RuleOutcome + Send + Sync + 'static,
    {
        Self::Call(Arc::new(f))
    }
}

impl fmt::Debug for RuleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redirect(url) => f.debug_tuple("Redirect").field(url).finish(),
            Self::Call(_) => f.write_str("Call"),
        }
    }
}

#[derive(Clone)]
enum Action {
    Redirect(String),
    Format(Arc<UrlMatcher>),
    Call(RuleFn),
}

#[derive(Clone)]
struct Rule {
    matcher: RuleMatcher,
    action: Action,
}

impl Rule {
    fn evaluate(&self, location: &dyn LocationProvider) -> RuleOutcome {
        let Some(found) = self.matcher.matches(location) else {
            return RuleOutcome::Skip;
        };
        match &self.action {
            Action::Redirect(target) => match &found {
                RuleMatch::Captures(caps) => RuleOutcome::Redirect(interpolate(target, caps)),
                _ => RuleOutcome::Redirect(target.clone()),
            },
            Action::Format(target) => {
                let params = match found {
                    RuleMatch::Params(params) => params,
                    _ => Params::new(),
                };
                match target.format(&params) {
                    Ok(Some(url)) => RuleOutcome::Redirect(url),
                    Ok(None) => RuleOutcome::Skip,
                    Err(e) => {
                        log::warn!("Redirect to '{}' failed: {e}", target.source());
                        RuleOutcome::Skip
                    }
                }
            }
            Action::Call(f) => f(&found, location),
        }
    }
}

/// Replace `$$` with group 0 and `$N` with group N.
fn interpolate(target: &str, caps: &[Option<String>]) -> String {
    let mut out = String::with_capacity(target.len());
    let mut chars = target.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'$') {
            chars.next();
            out.push_str(caps.first().cloned().flatten().as_deref().unwrap_or_default());
            continue;
        }
        let mut digits = String::new();
        while digits.len() < 2 {
            match chars.peek() {
                Some(d) if d.is_ascii_digit() => {
                    digits.push(*d);
                    chars.next();
                }
                _ => break,
            }
        }
        match digits.parse::<usize>() {
            Ok(n) => out.push_str(caps.get(n).cloned().flatten().as_deref().unwrap_or_default()),
            Err(_) => out.push('$'),
        }
    }
    out
}

/// Maps locations to handlers and writes URLs back.
pub struct UrlRouter {
    rules: RwLock<Vec<Rule>>,
    otherwise: RwLock<Option<Rule>>,
    location: Arc<dyn LocationProvider>,
    config: RouterConfig,
    factory: MatcherFactory,
    last_pushed: Mutex<Option<String>>,
    last_known: Mutex<Option<String>>,
}

impl UrlRouter {
    /// A router with no rules.
    pub fn new(
        location: Arc<dyn LocationProvider>,
        config: RouterConfig,
        factory: MatcherFactory,
    ) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            otherwise: RwLock::new(None),
            location,
            config,
            factory,
            last_pushed: Mutex::new(None),
            last_known: Mutex::new(None),
        }
    }

    /// The location this router drives.
    pub fn location(&self) -> &Arc<dyn LocationProvider> {
        &self.location
    }

    /// Router options.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Add a rule.
    pub fn when(&self, matcher: RuleMatcher, handler: RuleHandler) -> Result<()> {
        let action = match (&matcher, handler) {
            (RuleMatcher::Url(_), RuleHandler::Redirect(target)) => Action::Format(Arc::new(
                self.factory.compile(&target, &MatcherConfig::default())?,
            )),
            (_, RuleHandler::Redirect(target)) => Action::Redirect(target),
            (_, RuleHandler::Call(f)) => Action::Call(f),
        };
        log::debug!("Adding URL rule {matcher:?}");
        guard::write(&self.rules).push(Rule { matcher, action });
        Ok(())
    }

    /// Add a rule for a URL pattern.
    pub fn when_url(&self, pattern: &str, handler: RuleHandler) -> Result<()> {
        let matcher = self.factory.compile(pattern, &MatcherConfig::default())?;
        self.when(RuleMatcher::Url(Arc::new(matcher)), handler)
    }

    /// Add a rule for a path regex.
    pub fn when_regex(&self, regex: Regex, handler: RuleHandler) -> Result<()> {
        self.when(RuleMatcher::Regex(regex), handler)
    }

    /// Add a rule that inspects the location itself.
    pub fn rule<F>(&self, f: F)
    where
        F: Fn(&dyn LocationProvider) -> RuleOutcome + Send + Sync + 'static,
    {
        let rule = Rule {
            matcher: RuleMatcher::predicate(|_| true),
            action: Action::Call(Arc::new(
                move |_: &RuleMatch, location: &dyn LocationProvider| f(location),
            )),
        };
        guard::write(&self.rules).push(rule);
    }

    /// Set the fallback for locations no rule handles.
    pub fn otherwise(&self, handler: RuleHandler) {
        let action = match handler {
            RuleHandler::Redirect(target) => Action::Redirect(target),
            RuleHandler::Call(f) => Action::Call(f),
        };
        *guard::write(&self.otherwise) = Some(Rule {
            matcher: RuleMatcher::predicate(|_| true),
            action,
        });
    }

    /// Number of rules, fallback excluded.
    pub fn len(&self) -> usize {
        guard::read(&self.rules).len()
    }

    /// Whether no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatch the current location.
    ///
    /// Redirects replace the location and dispatch again. Returns whether
    /// anything handled the location. A location this router just pushed is
    /// not dispatched.
    pub async fn sync(&self) -> bool {
        for _ in 0..MAX_REDIRECTS {
            match self.dispatch() {
                None => return true,
                Some(RuleOutcome::Redirect(url)) => {
                    log::debug!("Redirecting to '{url}'");
                    self.location.set_url(&url, true);
                }
                Some(RuleOutcome::Navigate(work)) => {
                    work.await;
                    return true;
                }
                Some(RuleOutcome::Handled) => return true,
                Some(RuleOutcome::Skip) => return false,
            }
        }
        log::warn!(
            "Gave up on '{}' after {MAX_REDIRECTS} redirects",
            self.location.url()
        );
        false
    }

    /// Run the rules once. `None` means the location was suppressed.
    fn dispatch(&self) -> Option<RuleOutcome> {
        let url = self.location.url();
        {
            let mut last_pushed = guard::lock(&self.last_pushed);
            if last_pushed.as_deref() == Some(url.as_str()) {
                log::trace!("Skipping dispatch of pushed url '{url}'");
                return None;
            }
            *last_pushed = None;
        }

        let rules = guard::read(&self.rules).clone();
        log::trace!("Dispatching '{url}' over {} rules", rules.len());
        for rule in &rules {
            match rule.evaluate(self.location.as_ref()) {
                RuleOutcome::Skip => continue,
                outcome => return Some(outcome),
            }
        }
        let otherwise = guard::read(&self.otherwise).clone();
        Some(match otherwise {
            Some(rule) => rule.evaluate(self.location.as_ref()),
            None => RuleOutcome::Skip,
        })
    }

    /// Write `matcher` formatted with `params` to the location.
    ///
    /// A `#` entry in `params` becomes the URL fragment. Returns the URL
    /// written, or `None` if the params do not format.
    pub fn push(&self, matcher: &UrlMatcher, params: &Params, replace: bool) -> Result<Option<String>> {
        let Some(mut url) = matcher.format(params)? else {
            return Ok(None);
        };
        if let Some(hash) = params.get("#").and_then(Value::as_str) {
            url.push('#');
            url.push_str(hash);
        }
        self.location.set_url(&url, replace);
        *guard::lock(&self.last_pushed) = Some(self.location.url());
        Ok(Some(url))
    }

    /// With `read`, remember the current location. Otherwise restore the
    /// remembered location if it changed.
    pub fn update(&self, read: bool) {
        let mut last_known = guard::lock(&self.last_known);
        if read {
            *last_known = Some(self.location.url());
            return;
        }
        if let Some(known) = last_known.as_deref() {
            if self.location.url() != known {
                self.location.set_url(known, true);
            }
        }
    }

    /// Build a link for `matcher` formatted with `params`.
    pub fn href(&self, matcher: &UrlMatcher, params: &Params, absolute: bool) -> Result<Option<String>> {
        let Some(mut url) = matcher.format(params)? else {
            return Ok(None);
        };
        let html5 = self.config.html5_mode;
        if !html5 {
            url = format!("#{}{}", self.config.hash_prefix, url);
        }
        if let Some(hash) = params.get("#").and_then(Value::as_str) {
            url.push('#');
            url.push_str(hash);
        }

        let base = self
            .config
            .base_href
            .clone()
            .unwrap_or_else(|| self.location.base_href());
        if base != "/" && !base.is_empty() {
            if html5 {
                url = format!("{}{}", base.trim_end_matches('/'), url);
            } else if absolute {
                url = format!("{}{}", base.trim_start_matches('/'), url);
            }
        }

        if !absolute {
            return Ok(Some(url));
        }
        let slash = if html5 { "" } else { "/" };
        let port = match self.location.port() {
            80 | 443 => String::new(),
            port => format!(":{port}"),
        };
        Ok(Some(format!(
            "{}://{}{}{}{}",
            self.location.protocol(),
            self.location.host(),
            port,
            slash,
            url
        )))
    }
}

impl fmt::Debug for UrlRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlRouter")
            .field("rules", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
