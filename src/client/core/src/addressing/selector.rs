//! Selectors: path expressions with optional predicate, properties and fragment.
//!
//! ```text
//! /s1/s2/../sn?x>1&y<2&..&z=4(p1=v1;p2=v2;..;pn=vn)#a;x;y;..;z
//! |          | |            | |                  |  |        |
//! |-- expr --| |-- filter --| |--- properties ---|  |fragment|
//! ```
//!
//! The path expression may contain `*` (any characters except `/`) and `**`
//! (any characters including `/`). Wildcards are kept as written; matching
//! is done by the remote side.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use super::path::{canonicalize, Path};
use super::properties::Properties;
use crate::error::{DataspaceError, Result};

const REGEX_PATH: &str = r"[^\[\]?#]+";
const REGEX_PREDICATE: &str = r"[^\[\]\(\)#]+";
const REGEX_PROPERTIES: &str = ".*";
const REGEX_FRAGMENT: &str = ".*";

/// Property key prefixes that turn a query into a time-series query.
const SERIES_PROPERTY_PREFIXES: [&str; 2] = ["starttime", "stoptime"];

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        let pattern = format!(
            r"^({})(\?({})?(\(({})\))?)?(#({}))?$",
            REGEX_PATH, REGEX_PREDICATE, REGEX_PROPERTIES, REGEX_FRAGMENT
        );
        Regex::new(&pattern).expect("selector grammar is a valid regex")
    })
}

/// A parsed, immutable selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    path: String,
    predicate: String,
    properties: String,
    fragment: String,
    optional_part: String,
    text: String,
}

impl Selector {
    /// Parse a selector string.
    pub fn new(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        if s.is_empty() {
            return Err(DataspaceError::invalid_selector(s, "empty string"));
        }

        let caps = grammar()
            .captures(s)
            .ok_or_else(|| DataspaceError::invalid_selector(s, "not matching the selector grammar"))?;

        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str());
        Ok(Self::from_parts(group(1), group(3), group(5), group(7)))
    }

    fn from_parts(path: &str, predicate: &str, properties: &str, fragment: &str) -> Self {
        let mut optional_part = String::from(predicate);
        if !properties.is_empty() {
            optional_part.push('(');
            optional_part.push_str(properties);
            optional_part.push(')');
        }
        if !fragment.is_empty() {
            optional_part.push('#');
            optional_part.push_str(fragment);
        }

        let mut text = String::from(path);
        if !optional_part.is_empty() {
            text.push('?');
            text.push_str(&optional_part);
        }

        Self {
            path: path.to_string(),
            predicate: predicate.to_string(),
            properties: properties.to_string(),
            fragment: fragment.to_string(),
            optional_part,
            text,
        }
    }

    /// The path expression part.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The predicate (filter) part.
    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    /// The properties part, without the surrounding parentheses.
    pub fn properties(&self) -> &str {
        &self.properties
    }

    /// The fragment part, without the leading `#`.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Everything after the `?`, sent verbatim with a query.
    pub fn optional_part(&self) -> &str {
        &self.optional_part
    }

    /// The properties part parsed as key/value pairs.
    pub fn parsed_properties(&self) -> Properties {
        Properties::parse(&self.properties)
    }

    /// True if the path expression does not start with `/`.
    pub fn is_relative(&self) -> bool {
        !self.path.starts_with('/')
    }

    /// A new selector whose path expression is prefixed by `prefix`.
    pub fn add_prefix(&self, prefix: &Path) -> Selector {
        let path = canonicalize(&format!("{}/{}", prefix.as_str(), self.path));
        Self::from_parts(&path, &self.predicate, &self.properties, &self.fragment)
    }

    /// True if any property key asks for a time series (`starttime...` or `stoptime...`).
    pub fn is_for_series(&self) -> bool {
        self.properties
            .split(';')
            .any(|p| SERIES_PROPERTY_PREFIXES.iter().any(|prefix| p.starts_with(prefix)))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Selector {
    type Err = DataspaceError;

    fn from_str(s: &str) -> Result<Self> {
        Selector::new(s)
    }
}

impl From<&Path> for Selector {
    fn from(path: &Path) -> Self {
        Self::from_parts(path.as_str(), "", "", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_selector_all_parts() {
        let s = Selector::new("/a/b?x>1(p=v)#f").unwrap();
        assert_eq!(s.path(), "/a/b");
        assert_eq!(s.predicate(), "x>1");
        assert_eq!(s.properties(), "p=v");
        assert_eq!(s.fragment(), "f");
        assert_eq!(s.optional_part(), "x>1(p=v)#f");
        assert_eq!(s.to_string(), "/a/b?x>1(p=v)#f");
    }

    #[test]
    fn test_wildcard_selector_with_all_parts() {
        let s = Selector::new("/demo/*?x>1(n=3)#field").unwrap();
        assert_eq!(s.path(), "/demo/*");
        assert_eq!(s.predicate(), "x>1");
        assert_eq!(s.properties(), "n=3");
        assert_eq!(s.fragment(), "field");

        let err = Selector::new("/demo/*?[x>1](n=3)#field").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSelector);
    }

    #[test]
    fn test_selector_path_only() {
        let s = Selector::new("/demo/**").unwrap();
        assert_eq!(s.path(), "/demo/**");
        assert_eq!(s.optional_part(), "");
        assert_eq!(s.to_string(), "/demo/**");
    }

    #[test]
    fn test_selector_properties_without_predicate() {
        let s = Selector::new("/demo/*?(starttime=0;stoptime=now)").unwrap();
        assert_eq!(s.predicate(), "");
        assert_eq!(s.properties(), "starttime=0;stoptime=now");
        assert_eq!(s.optional_part(), "(starttime=0;stoptime=now)");
        assert!(s.is_for_series());
    }

    #[test]
    fn test_selector_fragment_only() {
        let s = Selector::new("/a#x;y").unwrap();
        assert_eq!(s.fragment(), "x;y");
        assert_eq!(s.to_string(), "/a?#x;y");
    }

    #[test]
    fn test_selector_round_trips_through_display() {
        for text in ["/a/b?x>1(p=v)#f", "/a/*/c", "rel/**?(k=v)", "/a?y<2"] {
            let s = Selector::new(text).unwrap();
            assert_eq!(Selector::new(s.to_string()).unwrap(), s);
        }
    }

    #[test]
    fn test_selector_rejects_invalid() {
        for text in ["", "?x", "#frag", "/a[0]", "/a?x(p=v"] {
            let err = Selector::new(text).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidSelector, "{text}");
        }
    }

    #[test]
    fn test_series_detection() {
        assert!(!Selector::new("/a?(p=v)").unwrap().is_for_series());
        assert!(Selector::new("/a?(p=v;stoptime=10)").unwrap().is_for_series());
        assert!(!Selector::new("/a?starttime>1").unwrap().is_for_series());
    }

    #[test]
    fn test_add_prefix_to_relative() {
        let root = Path::new("/demo").unwrap();
        let s = Selector::new("sensors/*?(p=v)").unwrap();
        assert!(s.is_relative());
        let abs = s.add_prefix(&root);
        assert_eq!(abs.path(), "/demo/sensors/*");
        assert_eq!(abs.to_string(), "/demo/sensors/*?(p=v)");
    }

    #[test]
    fn test_parsed_properties() {
        let s = Selector::new("/a?(k1=v1;k2=v2)").unwrap();
        let props = s.parsed_properties();
        assert_eq!(props.get("k1"), Some("v1"));
        assert_eq!(props.get("k2"), Some("v2"));
    }
}
