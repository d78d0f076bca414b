//! Low-level pattern helpers: placeholder scanning, regex quoting and URL
//! component encoding.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use serde_json::Value;

use crate::Params;
use crate::error::Result;
use crate::param::SquashPolicy;

/// Path placeholders: `:name`, `*name`, `{name}` and `{name:regexp}`.
const PATH_PLACEHOLDER: &str = r"([:*])([\w\[\]]+)|\{([\w\[\]]+)(?::((?:[^{}\\]+|\\.|\{(?:[^{}\\]+|\\.)*\})+))?\}";

/// Search placeholders additionally allow bare names and dashes.
const SEARCH_PLACEHOLDER: &str = r"([:]?)([\w\[\]-]+)|\{([\w\[\]-]+)(?::((?:[^{}\\]+|\\.|\{(?:[^{}\\]+|\\.)*\})+))?\}";

/// Valid parameter ids.
const PARAM_NAME: &str = r"^\w+(-+\w+)*(?:\[\])?$";

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One placeholder found while scanning a pattern.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Placeholder {
    /// Parameter id.
    pub id: String,
    /// `true` for the `*name` catch-all form.
    pub catch_all: bool,
    /// Inline regexp or type name, for the `{name:...}` form.
    pub regexp: Option<String>,
    /// Byte offset where the placeholder starts.
    pub start: usize,
    /// Byte offset just past the placeholder.
    pub end: usize,
}

/// Compiled scanners, built once per pattern compilation.
pub(crate) struct Scanners {
    path: Regex,
    search: Regex,
    name: Regex,
}

impl Scanners {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            path: Regex::new(PATH_PLACEHOLDER)?,
            search: Regex::new(SEARCH_PLACEHOLDER)?,
            name: Regex::new(PARAM_NAME)?,
        })
    }

    /// Path placeholders in order of appearance.
    pub(crate) fn path_placeholders(&self, pattern: &str) -> Vec<Placeholder> {
        scan(&self.path, pattern)
    }

    /// Search placeholders in order of appearance.
    pub(crate) fn search_placeholders(&self, search: &str) -> Vec<Placeholder> {
        scan(&self.search, search)
    }

    /// Whether `id` is a valid parameter name.
    pub(crate) fn is_valid_name(&self, id: &str) -> bool {
        self.name.is_match(id)
    }
}

fn scan(re: &Regex, haystack: &str) -> Vec<Placeholder> {
    re.captures_iter(haystack)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            Some(Placeholder {
                id,
                catch_all: caps.get(1).is_some_and(|m| m.as_str() == "*"),
                regexp: caps.get(4).map(|m| m.as_str().to_string()),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Escape a literal segment and, if given, append a capture group for
/// `capture` shaped by the squash policy.
pub(crate) fn quote(
    literal: &str,
    capture: Option<&str>,
    squash: &SquashPolicy,
    optional: bool,
) -> String {
    let mut result = regex::escape(literal);
    let Some(capture) = capture else {
        return result;
    };
    match squash {
        SquashPolicy::Off => {
            result.push('(');
            result.push_str(capture);
            result.push(')');
            if optional {
                result.push('?');
            }
        }
        SquashPolicy::Collapse => {
            if result.ends_with('/') {
                result.pop();
            }
            result.push_str("(?:/(");
            result.push_str(capture);
            result.push_str(")|/)?");
        }
        SquashPolicy::Literal(s) => {
            result.push('(');
            result.push_str(s);
            result.push('|');
            result.push_str(capture);
            result.push_str(")?");
        }
    }
    result
}

/// Percent-encode the way `encodeURIComponent` does.
pub fn encode_uri_component(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Percent-decode a URL component. Invalid UTF-8 is replaced.
pub fn decode_uri_component(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Encode an array element so that its own dashes survive the `-` join.
pub(crate) fn encode_dashes(s: &str) -> String {
    encode_uri_component(s).replace('-', "%5C%2D")
}

/// Split a path value on unescaped dashes, unescaping `\-`.
pub(crate) fn decode_path_array(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_backslash = false;
    for c in s.chars() {
        if c == '-' && !prev_backslash {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
        prev_backslash = c == '\\';
    }
    parts.push(current);
    parts.into_iter().map(|p| p.replace("\\-", "-")).collect()
}

/// Parse a query string (with or without the leading `?`).
///
/// Keys repeated in the query become arrays.
pub fn parse_query(search: &str) -> Params {
    let mut params = Params::new();
    let search = search.strip_prefix('?').unwrap_or(search);
    for pair in search.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_uri_component(key);
        let value = Value::String(decode_uri_component(value));
        match params.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                params.insert(key, value);
            }
        }
    }
    params
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_placeholders() {
        let scanners = Scanners::new().unwrap();
        let found = scanners.path_placeholders("/users/:id/{page:int}/*rest");
        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["id", "page", "rest"]);
        assert_eq!(found[1].regexp.as_deref(), Some("int"));
        assert!(found[2].catch_all);
    }

    #[test]
    fn test_placeholder_regexp_with_braces() {
        let scanners = Scanners::new().unwrap();
        let found = scanners.path_placeholders("/y/{year:[0-9]{4}}");
        assert_eq!(found[0].regexp.as_deref(), Some("[0-9]{4}"));
        assert_eq!(found[0].end, "/y/{year:[0-9]{4}}".len());
    }

    #[test]
    fn test_search_placeholders_allow_dashes() {
        let scanners = Scanners::new().unwrap();
        let found = scanners.search_placeholders("?sort-by&page");
        let ids: Vec<_> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["sort-by", "page"]);
    }

    #[test]
    fn test_param_names() {
        let scanners = Scanners::new().unwrap();
        assert!(scanners.is_valid_name("id"));
        assert!(scanners.is_valid_name("sort-by"));
        assert!(scanners.is_valid_name("ids[]"));
        assert!(!scanners.is_valid_name("-x"));
        assert!(!scanners.is_valid_name("a[]b"));
    }

    #[test]
    fn test_quote_shapes() {
        assert_eq!(quote("/a.b", None, &SquashPolicy::Off, false), r"/a\.b");
        assert_eq!(quote("/a/", Some("[^/]*"), &SquashPolicy::Off, true), "/a/([^/]*)?");
        assert_eq!(
            quote("/a/", Some(r"\d+"), &SquashPolicy::Collapse, true),
            r"/a(?:/(\d+)|/)?"
        );
        assert_eq!(
            quote("/a/", Some(r"\d+"), &SquashPolicy::Literal("~".into()), true),
            r"/a/(~|\d+)?"
        );
    }

    #[test]
    fn test_encode_uri_component() {
        assert_eq!(encode_uri_component("a b/c"), "a%20b%2Fc");
        assert_eq!(encode_uri_component("it's-(ok)"), "it's-(ok)");
        assert_eq!(encode_dashes("a-b"), "a%5C%2Db");
    }

    #[test]
    fn test_decode_path_array() {
        assert_eq!(decode_path_array("a-b-c"), vec!["a", "b", "c"]);
        assert_eq!(decode_path_array(r"a\-b-c"), vec!["a-b", "c"]);
        assert_eq!(decode_path_array("solo"), vec!["solo"]);
    }

    #[test]
    fn test_parse_query() {
        let params = parse_query("?q=a%20b&tag=x&tag=y&flag");
        assert_eq!(params.get("q"), Some(&json!("a b")));
        assert_eq!(params.get("tag"), Some(&json!(["x", "y"])));
        assert_eq!(params.get("flag"), Some(&json!("")));
    }
}
