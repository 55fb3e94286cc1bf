//! Path pattern matching.
//!
//! # Responsibilities
//! - Match a concrete request path against a route pattern
//! - Extract `:name` (single segment) and `*name` (rest of path) parameters
//!
//! # Design Decisions
//! - Empty segments (leading/trailing/double slashes) are ignored on both sides
//! - Parameters are captured verbatim, never coerced
//! - A wildcard ends matching immediately, even with zero remaining segments
//! - No regex to guarantee O(n) matching

use std::collections::HashMap;

/// A captured path parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Captured by a `:name` segment.
    One(String),
    /// Captured by a `*name` segment.
    Rest(Vec<String>),
}

/// Parameters extracted by a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: HashMap<String, ParamValue>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        self.values.insert(name.into(), value);
    }

    /// Single-segment parameter by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.values.get(name)? {
            ParamValue::One(v) => Some(v.as_str()),
            ParamValue::Rest(_) => None,
        }
    }

    /// Wildcard parameter by name.
    pub fn rest(&self, name: &str) -> Option<&[String]> {
        match self.values.get(name)? {
            ParamValue::Rest(v) => Some(v.as_slice()),
            ParamValue::One(_) => None,
        }
    }

    pub fn value(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.values.iter()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Match `path` against `pattern`.
///
/// Returns the captured parameters, or `None` when the path does not match.
pub fn match_path(path: &str, pattern: &str) -> Option<Params> {
    let path_segs = segments(path);
    let pattern_segs = segments(pattern);
    let mut params = Params::new();

    for (i, pattern_seg) in pattern_segs.iter().enumerate() {
        if let Some(name) = pattern_seg.strip_prefix('*') {
            let rest = path_segs
                .get(i..)
                .map(|s| s.iter().map(|p| p.to_string()).collect())
                .unwrap_or_default();
            params.insert(name, ParamValue::Rest(rest));
            return Some(params);
        }

        let path_seg = path_segs.get(i);

        if let Some(name) = pattern_seg.strip_prefix(':') {
            let value = path_seg?;
            params.insert(name, ParamValue::One(value.to_string()));
            continue;
        }

        if path_seg != Some(pattern_seg) {
            return None;
        }
    }

    if path_segs.len() > pattern_segs.len() {
        return None;
    }

    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_segment() {
        let params = match_path("/a/42/b", "/a/:id/b").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_named_segment_missing() {
        assert!(match_path("/a/b", "/a/:id/b").is_none());
        assert!(match_path("/a", "/a/:id").is_none());
    }

    #[test]
    fn test_literal_mismatch() {
        assert!(match_path("/a/42/c", "/a/:id/b").is_none());
        assert!(match_path("/users", "/user").is_none());
    }

    #[test]
    fn test_longer_path_rejected() {
        assert!(match_path("/a/b/c", "/a/b").is_none());
    }

    #[test]
    fn test_wildcard_captures_rest() {
        let params = match_path("/f/x/y/z", "/f/*rest").unwrap();
        assert_eq!(
            params.rest("rest"),
            Some(&["x".to_string(), "y".to_string(), "z".to_string()][..])
        );
    }

    #[test]
    fn test_wildcard_empty_capture() {
        let params = match_path("/f", "/f/*rest").unwrap();
        assert_eq!(params.rest("rest"), Some(&[][..]));
    }

    #[test]
    fn test_wildcard_skips_suffix() {
        // Anything after the wildcard segment is never examined.
        let params = match_path("/f/a/b", "/f/*rest/ignored").unwrap();
        assert_eq!(params.rest("rest").map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_slashes_ignored() {
        let params = match_path("//a//7/", "a/:n").unwrap();
        assert_eq!(params.get("n"), Some("7"));
    }

    #[test]
    fn test_root() {
        assert!(match_path("/", "/").unwrap().is_empty());
        assert!(match_path("/x", "/").is_none());
    }

    #[test]
    fn test_param_verbatim() {
        let params = match_path("/item/007", "/item/:id").unwrap();
        assert_eq!(params.get("id"), Some("007"));
        assert_eq!(params.rest("id"), None);
    }
}
