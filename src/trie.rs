//! C6 — Route Trie: compressed radix trie over URL path fragments with
//! typed parameter edges.
//!
//! Grounded directly on `crow::Trie` in
//! `examples/original_source/crow/include/crow/routing.h` (`Node`,
//! `optimizeNode`/`optimize`, `find`, `add`, `find_route_indexes`),
//! re-expressed with an explicit arena of 32-bit indices instead of
//! pointers into a `std::deque`, and Rust parsing instead of
//! `strtoll`/`strtod`.

use crate::error::RegistrationFault;
use crate::params::Params;

/// Reserved rule index meaning "no terminal rule at this node".
pub const NO_RULE: u32 = 0;
/// Reserved rule index meaning "redirect: add a trailing slash" — a
/// `Trie`-level sentinel, not a per-rule flag (SPEC_FULL.md §10.4).
pub const REDIRECT_SLASH: u32 = 1;
/// First index handed to a real, user-registered rule.
pub const FIRST_REAL_RULE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    Int,
    Uint,
    Double,
    String,
    Path,
}

const PARAM_KINDS: [ParamKind; 5] = [
    ParamKind::Int,
    ParamKind::Uint,
    ParamKind::Double,
    ParamKind::String,
    ParamKind::Path,
];

#[derive(Debug, Clone, Default)]
struct Node {
    rule_index: u32,
    param_children: [u32; 5],
    children: Vec<(String, u32)>,
}

impl Node {
    fn is_simple(&self) -> bool {
        self.rule_index == NO_RULE && self.param_children.iter().all(|&c| c == 0)
    }
}

pub struct Trie {
    nodes: Vec<Node>,
}

impl Trie {
    pub fn new() -> Self {
        Self { nodes: vec![Node::default()] }
    }

    fn new_node(&mut self) -> u32 {
        self.nodes.push(Node::default());
        (self.nodes.len() - 1) as u32
    }

    /// Inserts `pattern`, binding its terminal node to `rule_index`. Fails
    /// with `DuplicateRoute` if a rule is already bound there.
    pub fn add(&mut self, pattern: &str, rule_index: u32) -> Result<(), RegistrationFault> {
        let mut idx: u32 = 0;
        let bytes = pattern.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'<' {
                let rest = &pattern[i..];
                let (kind, consumed) = parse_param_token(rest)
                    .ok_or_else(|| RegistrationFault::MalformedPattern(pattern.to_string()))?;
                let slot = kind as usize;
                if self.nodes[idx as usize].param_children[slot] == 0 {
                    let new_idx = self.new_node();
                    self.nodes[idx as usize].param_children[slot] = new_idx;
                }
                idx = self.nodes[idx as usize].param_children[slot];
                i += consumed;
            } else {
                let piece = &pattern[i..i + 1];
                let existing = self.nodes[idx as usize]
                    .children
                    .iter()
                    .find(|(k, _)| k == piece)
                    .map(|(_, v)| *v);
                idx = match existing {
                    Some(v) => v,
                    None => {
                        let new_idx = self.new_node();
                        self.nodes[idx as usize].children.push((piece.to_string(), new_idx));
                        new_idx
                    }
                };
                i += 1;
            }
        }
        if self.nodes[idx as usize].rule_index != NO_RULE {
            return Err(RegistrationFault::DuplicateRoute(pattern.to_string()));
        }
        self.nodes[idx as usize].rule_index = rule_index;
        Ok(())
    }

    /// Validates the root is simple, then runs the structural merge pass.
    /// Panics (a startup-time invariant violation, like the original's
    /// `throw std::runtime_error`) if the root carries a rule or param
    /// children — that would mean the empty pattern was registered.
    pub fn validate_and_optimize(&mut self) {
        assert!(self.nodes[0].is_simple(), "trie root must be a simple node");
        self.optimize_node(0);
    }

    fn optimize_node(&mut self, node_idx: u32) {
        let param_children = self.nodes[node_idx as usize].param_children;
        for child in param_children {
            if child != 0 {
                self.optimize_node(child);
            }
        }
        if self.nodes[node_idx as usize].children.is_empty() {
            return;
        }
        let can_merge = self.nodes[node_idx as usize]
            .children
            .iter()
            .all(|(_, c)| self.nodes[*c as usize].is_simple());

        if can_merge {
            let mut merged: Vec<(String, u32)> = Vec::new();
            for (prefix, child_idx) in self.nodes[node_idx as usize].children.clone() {
                for (suffix, grandchild) in &self.nodes[child_idx as usize].children {
                    merged.push((format!("{prefix}{suffix}"), *grandchild));
                }
            }
            self.nodes[node_idx as usize].children = merged;
            self.optimize_node(node_idx);
        } else {
            let children = self.nodes[node_idx as usize].children.clone();
            for (_, child_idx) in children {
                self.optimize_node(child_idx);
            }
        }
    }

    /// Matches `url` against the trie, returning the rule index with the
    /// smallest non-zero value among every reachable match (stable
    /// preference for earlier-registered rules), plus the parameter bundle
    /// collected along that path.
    pub fn find(&self, url: &str) -> (u32, Params) {
        let mut params = Params::new();
        let (found, _) = self.find_at(url, 0, 0, &mut params);
        // params were mutated in place along the winning path by find_at's
        // bookkeeping; re-run isn't needed since find_at restores bundle
        // state on backtrack and leaves only the winning path's values.
        (found, params)
    }

    fn find_at(&self, url: &str, node_idx: u32, pos: usize, params: &mut Params) -> (u32, bool) {
        let node = &self.nodes[node_idx as usize];
        if pos == url.len() {
            return (node.rule_index, node.rule_index != NO_RULE);
        }

        let mut found = NO_RULE;
        let mut best_params: Option<Params> = None;

        macro_rules! consider {
            ($child:expr, $consumed:expr, $push:expr) => {{
                let snapshot = params.clone();
                $push;
                let (ret, _) = self.find_at(url, $child, $consumed, params);
                if ret != NO_RULE && (found == NO_RULE || found > ret) {
                    found = ret;
                    best_params = Some(params.clone());
                }
                *params = snapshot;
            }};
        }

        for kind in PARAM_KINDS {
            let slot = kind as usize;
            let child = node.param_children[slot];
            if child == 0 {
                continue;
            }
            match kind {
                ParamKind::Int => {
                    if let Some((value, consumed)) = parse_i64_prefix(&url[pos..]) {
                        consider!(child, pos + consumed, params.push_int(value));
                    }
                }
                ParamKind::Uint => {
                    if let Some((value, consumed)) = parse_u64_prefix(&url[pos..]) {
                        consider!(child, pos + consumed, params.push_uint(value));
                    }
                }
                ParamKind::Double => {
                    if let Some((value, consumed)) = parse_f64_prefix(&url[pos..]) {
                        consider!(child, pos + consumed, params.push_double(value));
                    }
                }
                ParamKind::String => {
                    let rest = &url[pos..];
                    let end = rest.find('/').unwrap_or(rest.len());
                    if end != 0 {
                        let segment = rest[..end].to_string();
                        consider!(child, pos + end, params.push_string(segment));
                    }
                }
                ParamKind::Path => {
                    if pos != url.len() {
                        let segment = url[pos..].to_string();
                        consider!(child, url.len(), params.push_string(segment));
                    }
                }
            }
        }

        for (fragment, child) in &node.children {
            if url[pos..].starts_with(fragment.as_str()) {
                consider!(*child, pos + fragment.len(), ());
            }
        }

        if let Some(winning) = best_params {
            *params = winning;
        }
        (found, found != NO_RULE)
    }

    /// Enumerates every rule index reachable under `prefix` (introspection).
    pub fn find_routes_under(&self, prefix: &str) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect_routes(prefix, 0, 0, &mut out);
        out
    }

    fn collect_routes(&self, prefix: &str, node_idx: u32, pos: usize, out: &mut Vec<u32>) {
        let node = &self.nodes[node_idx as usize];
        if pos >= prefix.len() && node.rule_index != NO_RULE && node.rule_index != REDIRECT_SLASH {
            out.push(node.rule_index);
        }
        for (fragment, child_idx) in &node.children {
            let past_prefix = pos >= prefix.len();
            if past_prefix
                || prefix[pos..].starts_with(fragment.as_str())
                || fragment.starts_with(&prefix[pos..])
            {
                self.collect_routes(prefix, *child_idx, pos + fragment.len(), out);
            }
        }
    }
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_param_token(s: &str) -> Option<(ParamKind, usize)> {
    const TOKENS: &[(&str, ParamKind)] = &[
        ("<int>", ParamKind::Int),
        ("<uint>", ParamKind::Uint),
        ("<float>", ParamKind::Double),
        ("<double>", ParamKind::Double),
        ("<str>", ParamKind::String),
        ("<string>", ParamKind::String),
        ("<path>", ParamKind::Path),
    ];
    TOKENS
        .iter()
        .find(|(token, _)| s.starts_with(token))
        .map(|(token, kind)| (*kind, token.len()))
}

fn parse_i64_prefix(s: &str) -> Option<(i64, usize)> {
    let end = numeric_prefix_len(s, true, false);
    if end == 0 {
        return None;
    }
    s[..end].parse::<i64>().ok().map(|v| (v, end))
}

fn parse_u64_prefix(s: &str) -> Option<(u64, usize)> {
    let end = numeric_prefix_len(s, false, false);
    if end == 0 {
        return None;
    }
    s[..end].parse::<u64>().ok().map(|v| (v, end))
}

fn parse_f64_prefix(s: &str) -> Option<(f64, usize)> {
    let end = numeric_prefix_len(s, true, true);
    if end == 0 {
        return None;
    }
    s[..end].parse::<f64>().ok().map(|v| (v, end))
}

/// Longest byte-prefix of `s` that looks like a number, mirroring what
/// `strtoll`/`strtoull`/`strtod` would consume. `allow_sign` permits a
/// leading `+`/`-`; `allow_dot` permits a single decimal point.
fn numeric_prefix_len(s: &str, allow_sign: bool, allow_dot: bool) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if i < bytes.len() && allow_sign && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            seen_digit = true;
            i += 1;
        } else if allow_dot && bytes[i] == b'.' && !seen_dot {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    if seen_digit {
        i
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_round_trip() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/", FIRST_REAL_RULE).unwrap();
        trie.validate_and_optimize();
        let (idx, _) = trie.find("/redfish/v1/");
        assert_eq!(idx, FIRST_REAL_RULE);
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut trie = Trie::new();
        trie.add("/a", FIRST_REAL_RULE).unwrap();
        let err = trie.add("/a", FIRST_REAL_RULE + 1).unwrap_err();
        assert!(matches!(err, RegistrationFault::DuplicateRoute(_)));
    }

    #[test]
    fn string_param_extracted() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/Chassis/<str>", FIRST_REAL_RULE).unwrap();
        trie.validate_and_optimize();
        let (idx, params) = trie.find("/redfish/v1/Chassis/1U");
        assert_eq!(idx, FIRST_REAL_RULE);
        assert_eq!(params.strings, vec!["1U"]);
    }

    #[test]
    fn int_param_extracted_and_typed() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/Jobs/<int>", FIRST_REAL_RULE).unwrap();
        trie.validate_and_optimize();
        let (idx, params) = trie.find("/redfish/v1/Jobs/42");
        assert_eq!(idx, FIRST_REAL_RULE);
        assert_eq!(params.ints, vec![42]);
    }

    #[test]
    fn path_param_is_greedy() {
        let mut trie = Trie::new();
        trie.add("/files/<path>", FIRST_REAL_RULE).unwrap();
        trie.validate_and_optimize();
        let (idx, params) = trie.find("/files/a/b/c.txt");
        assert_eq!(idx, FIRST_REAL_RULE);
        assert_eq!(params.strings, vec!["a/b/c.txt"]);
    }

    #[test]
    fn no_match_returns_zero() {
        let mut trie = Trie::new();
        trie.add("/a", FIRST_REAL_RULE).unwrap();
        trie.validate_and_optimize();
        let (idx, _) = trie.find("/b");
        assert_eq!(idx, NO_RULE);
    }

    /// Property P2 (specificity): a literal match is preferred over a
    /// same-length parameterized one because it's registered first and
    /// gets the smaller rule index.
    #[test]
    fn smaller_rule_index_wins() {
        let mut trie = Trie::new();
        trie.add("/a/<str>", FIRST_REAL_RULE).unwrap();
        trie.add("/a/b", FIRST_REAL_RULE + 1).unwrap();
        trie.validate_and_optimize();
        let (idx, _) = trie.find("/a/b");
        assert_eq!(idx, FIRST_REAL_RULE);
    }

    /// Property P3 (trailing slash): registering the reserved redirect
    /// index at the slashless form works exactly like a normal rule as far
    /// as the trie is concerned — the Router gives index 1 its meaning.
    #[test]
    fn trailing_slash_sentinel_is_just_a_rule_index() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/Chassis/", FIRST_REAL_RULE).unwrap();
        trie.add("/redfish/v1/Chassis", REDIRECT_SLASH).unwrap();
        trie.validate_and_optimize();
        let (idx, _) = trie.find("/redfish/v1/Chassis");
        assert_eq!(idx, REDIRECT_SLASH);
    }

    /// Property P4 (optimize preserves semantics): merge pass must not
    /// change any match outcome.
    #[test]
    fn optimize_preserves_matches() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/Chassis", FIRST_REAL_RULE).unwrap();
        trie.add("/redfish/v1/Managers", FIRST_REAL_RULE + 1).unwrap();
        let before_a = trie.find("/redfish/v1/Chassis").0;
        let before_b = trie.find("/redfish/v1/Managers").0;
        trie.validate_and_optimize();
        assert_eq!(trie.find("/redfish/v1/Chassis").0, before_a);
        assert_eq!(trie.find("/redfish/v1/Managers").0, before_b);
    }

    #[test]
    fn find_routes_under_prefix() {
        let mut trie = Trie::new();
        trie.add("/redfish/v1/Chassis", FIRST_REAL_RULE).unwrap();
        trie.add("/redfish/v1/Managers", FIRST_REAL_RULE + 1).unwrap();
        trie.validate_and_optimize();
        let mut routes = trie.find_routes_under("/redfish/v1/");
        routes.sort();
        assert_eq!(routes, vec![FIRST_REAL_RULE, FIRST_REAL_RULE + 1]);
    }
}
