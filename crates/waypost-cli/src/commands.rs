//! Handlers for the manifest commands.
//!
//! Each handler builds its report as a string so `run` prints it and tests
//! can inspect it.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use waypost_core::Params;
use waypost_state::{HrefOptions, LocationProvider, State, StateEngine, TransitionOptions};

use crate::config::WaypostConfig;
use crate::manifest::{Manifest, parse_params};

// ============================================================================
// check
// ============================================================================

/// List every registered state with its URL, parameters and views.
pub fn check(manifest: &Manifest, config: &WaypostConfig) -> Result<String> {
    let engine = manifest.engine(config, "/")?;
    let mut out = String::new();
    for state in engine.states().iter().filter(|s| !s.is_root()) {
        describe(&mut out, state);
    }
    out.push_str(&format!("{} states OK\n", engine.states().len() - 1));
    Ok(out)
}

fn describe(out: &mut String, state: &State) {
    let url = state.url().map(|u| u.source()).unwrap_or("-");
    let kind = if state.is_abstract() { " (abstract)" } else { "" };
    out.push_str(&format!("{}{kind}  {url}\n", state.name()));
    let params = state.params().keys();
    if !params.is_empty() {
        out.push_str(&format!("    params: {}\n", params.join(", ")));
    }
    for (name, _) in state.views() {
        out.push_str(&format!("    view: {name}\n"));
    }
}

// ============================================================================
// match
// ============================================================================

/// Dispatch `url` and report the state it leads to.
pub async fn match_url(manifest: &Manifest, config: &WaypostConfig, url: &str) -> Result<String> {
    let engine = manifest.engine(config, url)?;
    if !engine.on_location_change().await || engine.current().is_root() {
        bail!("No state matches '{url}'");
    }
    Ok(summary(&engine))
}

// ============================================================================
// href
// ============================================================================

/// Build a link to `state`.
pub fn href(
    manifest: &Manifest,
    config: &WaypostConfig,
    state: &str,
    params: &[String],
    absolute: bool,
) -> Result<String> {
    let engine = manifest.engine(config, "/")?;
    if engine.get(state).is_none() {
        bail!("Unknown state '{state}'");
    }
    let options = HrefOptions {
        absolute,
        ..HrefOptions::default()
    };
    engine
        .href(state, parse_params(params)?, &options)?
        .with_context(|| format!("State '{state}' has no URL for these parameters"))
}

// ============================================================================
// go
// ============================================================================

/// Transition to `state`, optionally starting from the state `from` leads to.
pub async fn go(
    manifest: &Manifest,
    config: &WaypostConfig,
    state: &str,
    params: &[String],
    from: Option<&str>,
) -> Result<String> {
    let engine = manifest.engine(config, from.unwrap_or("/"))?;
    if let Some(url) = from {
        if !engine.on_location_change().await {
            bail!("No state matches '{url}'");
        }
    }
    engine
        .transition_to(state, parse_params(params)?, TransitionOptions::default())
        .await
        .with_context(|| format!("Transition to '{state}' failed"))?;

    let mut out = summary(&engine);
    let path = engine.current().path().to_vec();
    for state in engine.states().iter().filter(|s| path.contains(&s.id())) {
        let Some(locals) = engine.locals(state.name()) else {
            continue;
        };
        let own = json_object(locals.globals().own());
        out.push_str(&format!("resolved {}: {own}\n", state.name()));
        for (view, values) in locals.views() {
            out.push_str(&format!("    view {view}: {}\n", json_object(values.own())));
        }
    }
    Ok(out)
}

// ============================================================================
// Helpers
// ============================================================================

fn summary(engine: &StateEngine) -> String {
    let state = engine.current();
    format!(
        "state: {}\nparams: {}\nurl: {}\n",
        state.name(),
        json_object(&engine.params()),
        engine.router().location().url()
    )
}

fn json_object(params: &Params) -> Value {
    Value::Object(params.clone().into_iter().collect())
}

// ============================================================================
// Tests
// ============================================================================
