//! The location seam.
//!
//! The router never talks to a browser or window directly. It reads and
//! writes the current URL through a [`LocationProvider`]. [`MemoryLocation`]
//! keeps everything in memory, which is all the CLI and the tests need.

use std::sync::{Mutex, MutexGuard};
use waypost_core::{Params, parse_query};

use crate::guard;

/// Access to the application's current location.
///
/// `url` is the application-relative URL: path plus optional `?query`,
/// still percent-encoded.
pub trait LocationProvider: Send + Sync {
    /// The current URL.
    fn url(&self) -> String;

    /// Replace the current URL. With `replace` the history entry is
    /// overwritten instead of appended.
    fn set_url(&self, url: &str, replace: bool);

    /// `http`, `https`, ...
    fn protocol(&self) -> String;

    /// Host name.
    fn host(&self) -> String;

    /// Port number.
    fn port(&self) -> u16;

    /// The document base, `/` unless the application is mounted elsewhere.
    fn base_href(&self) -> String {
        "/".to_string()
    }

    /// The raw path part of [`url`](Self::url).
    fn path(&self) -> String {
        let url = self.url();
        let end = url.find(['?', '#']).unwrap_or(url.len());
        url[..end].to_string()
    }

    /// The decoded search parameters of [`url`](Self::url).
    fn search(&self) -> Params {
        let url = self.url();
        let url = url.split('#').next().unwrap_or_default();
        match url.split_once('?') {
            Some((_, query)) => parse_query(query),
            None => Params::new(),
        }
    }
}

#[derive(Debug)]
struct History {
    entries: Vec<String>,
}

/// An in-memory location with a simple history stack.
#[derive(Debug)]
pub struct MemoryLocation {
    history: Mutex<History>,
    protocol: String,
    host: String,
    port: u16,
    base_href: String,
}

impl Default for MemoryLocation {
    fn default() -> Self {
        Self::new("/")
    }
}

impl MemoryLocation {
    /// Start at `url` on `http://localhost`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(History {
                entries: vec![url.into()],
            }),
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 80,
            base_href: "/".to_string(),
        }
    }

    /// Set protocol, host and port.
    pub fn with_origin(mut self, protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        self.protocol = protocol.into();
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the document base.
    pub fn with_base_href(mut self, base_href: impl Into<String>) -> Self {
        self.base_href = base_href.into();
        self
    }

    /// Every URL visited, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.lock().entries.clone()
    }

    /// Drop the newest entry. Returns `false` at the start of history.
    pub fn back(&self) -> bool {
        let mut history = self.lock();
        if history.entries.len() < 2 {
            return false;
        }
        history.entries.pop();
        true
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        guard::lock(&self.history)
    }
}

impl LocationProvider for MemoryLocation {
    fn url(&self) -> String {
        self.lock().entries.last().cloned().unwrap_or_default()
    }

    fn set_url(&self, url: &str, replace: bool) {
        let mut history = self.lock();
        if replace {
            history.entries.pop();
        }
        history.entries.push(url.to_string());
    }

    fn protocol(&self) -> String {
        self.protocol.clone()
    }

    fn host(&self) -> String {
        self.host.clone()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn base_href(&self) -> String {
        self.base_href.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_and_search() {
        let loc = MemoryLocation::new("/users/a%20b?sort=name&tag=x&tag=y#top");
        assert_eq!(loc.path(), "/users/a%20b");
        let search = loc.search();
        assert_eq!(search.get("sort"), Some(&json!("name")));
        assert_eq!(search.get("tag"), Some(&json!(["x", "y"])));
    }

    #[test]
    fn test_push_and_replace() {
        let loc = MemoryLocation::default();
        loc.set_url("/a", false);
        loc.set_url("/b", true);
        assert_eq!(loc.url(), "/b");
        assert_eq!(loc.history(), vec!["/", "/b"]);
    }

    #[test]
    fn test_back() {
        let loc = MemoryLocation::new("/a");
        loc.set_url("/b", false);
        assert!(loc.back());
        assert_eq!(loc.url(), "/a");
        assert!(!loc.back());
    }

    #[test]
    fn test_origin() {
        let loc = MemoryLocation::default()
            .with_origin("https", "example.com", 443)
            .with_base_href("/app/");
        assert_eq!(loc.protocol(), "https");
        assert_eq!(loc.host(), "example.com");
        assert_eq!(loc.port(), 443);
        assert_eq!(loc.base_href(), "/app/");
    }
}
