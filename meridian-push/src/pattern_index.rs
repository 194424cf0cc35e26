//! Segment trie indexes between watch patterns and concrete service keys.
//!
//! Two tries per namespace:
//! - the pattern trie answers "which patterns match this key" by walking the
//!   key's path segments through literal, `*` and `**` branches;
//! - the service trie answers "which keys match this pattern" by walking the
//!   pattern's segments through the known key paths.
//!
//! Both walks only visit branches compatible with the input, so the cost of a
//! lookup follows the shape of the trie rather than the number of registered
//! patterns times the number of known keys.
//!
//! Each index is guarded by a single `RwLock`; a lookup runs under one read
//! guard and therefore observes every registration completed before it and
//! none that started after it.

use meridian_core::{Pattern, Segment, ServiceKey};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

#[derive(Debug)]
struct TrieNode<V> {
    literal: HashMap<String, TrieNode<V>>,
    any_one: Option<Box<TrieNode<V>>>,
    any_suffix: HashSet<V>,
    terminal: HashSet<V>,
}

impl<V> Default for TrieNode<V> {
    fn default() -> Self {
        Self {
            literal: HashMap::new(),
            any_one: None,
            any_suffix: HashSet::new(),
            terminal: HashSet::new(),
        }
    }
}

impl<V: Eq + Hash + Clone> TrieNode<V> {
    fn is_empty(&self) -> bool {
        self.literal.is_empty()
            && self.any_one.is_none()
            && self.any_suffix.is_empty()
            && self.terminal.is_empty()
    }

    fn insert_pattern(&mut self, segments: &[Segment], value: V) -> bool {
        match segments.split_first() {
            None => self.terminal.insert(value),
            Some((Segment::AnySuffix, _)) => self.any_suffix.insert(value),
            Some((Segment::AnyOne, rest)) => self
                .any_one
                .get_or_insert_with(Box::default)
                .insert_pattern(rest, value),
            Some((Segment::Literal(lit), rest)) => self
                .literal
                .entry(lit.clone())
                .or_default()
                .insert_pattern(rest, value),
        }
    }

    fn remove_pattern(&mut self, segments: &[Segment], value: &V) -> bool {
        match segments.split_first() {
            None => self.terminal.remove(value),
            Some((Segment::AnySuffix, _)) => self.any_suffix.remove(value),
            Some((Segment::AnyOne, rest)) => {
                let Some(child) = self.any_one.as_mut() else {
                    return false;
                };
                let removed = child.remove_pattern(rest, value);
                if child.is_empty() {
                    self.any_one = None;
                }
                removed
            }
            Some((Segment::Literal(lit), rest)) => {
                let Some(child) = self.literal.get_mut(lit) else {
                    return false;
                };
                let removed = child.remove_pattern(rest, value);
                if child.is_empty() {
                    self.literal.remove(lit);
                }
                removed
            }
        }
    }

    fn collect_patterns(&self, path: &[&str], out: &mut HashSet<V>) {
        let Some((head, rest)) = path.split_first() else {
            out.extend(self.terminal.iter().cloned());
            return;
        };
        out.extend(self.any_suffix.iter().cloned());
        if let Some(child) = self.literal.get(*head) {
            child.collect_patterns(rest, out);
        }
        if let Some(child) = &self.any_one {
            child.collect_patterns(rest, out);
        }
    }

    fn insert_path(&mut self, path: &[&str], value: V) -> bool {
        match path.split_first() {
            None => self.terminal.insert(value),
            Some((head, rest)) => self
                .literal
                .entry((*head).to_string())
                .or_default()
                .insert_path(rest, value),
        }
    }

    fn remove_path(&mut self, path: &[&str], value: &V) -> bool {
        match path.split_first() {
            None => self.terminal.remove(value),
            Some((head, rest)) => {
                let Some(child) = self.literal.get_mut(*head) else {
                    return false;
                };
                let removed = child.remove_path(rest, value);
                if child.is_empty() {
                    self.literal.remove(*head);
                }
                removed
            }
        }
    }

    fn collect_paths(&self, segments: &[Segment], out: &mut Vec<V>) {
        match segments.split_first() {
            None => out.extend(self.terminal.iter().cloned()),
            Some((Segment::Literal(lit), rest)) => {
                if let Some(child) = self.literal.get(lit.as_str()) {
                    child.collect_paths(rest, out);
                }
            }
            Some((Segment::AnyOne, rest)) => {
                for child in self.literal.values() {
                    child.collect_paths(rest, out);
                }
            }
            Some((Segment::AnySuffix, _)) => {
                for child in self.literal.values() {
                    child.collect_subtree(out);
                }
            }
        }
    }

    fn collect_subtree(&self, out: &mut Vec<V>) {
        out.extend(self.terminal.iter().cloned());
        for child in self.literal.values() {
            child.collect_subtree(out);
        }
    }
}

/// Bidirectional index between registered watch patterns and known service keys.
#[derive(Debug, Default)]
pub struct PatternIndex {
    patterns: RwLock<HashMap<String, TrieNode<Pattern>>>,
    services: RwLock<HashMap<String, TrieNode<ServiceKey>>>,
}

impl PatternIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watched pattern. Returns false if it was already registered.
    pub fn add_pattern(&self, pattern: &Pattern) -> bool {
        self.patterns
            .write()
            .entry(pattern.namespace().to_string())
            .or_default()
            .insert_pattern(pattern.segments(), pattern.clone())
    }

    pub fn remove_pattern(&self, pattern: &Pattern) -> bool {
        let mut patterns = self.patterns.write();
        let Some(root) = patterns.get_mut(pattern.namespace()) else {
            return false;
        };
        let removed = root.remove_pattern(pattern.segments(), pattern);
        if root.is_empty() {
            patterns.remove(pattern.namespace());
        }
        removed
    }

    /// Every registered pattern whose wildcard expression matches `key`.
    pub fn match_patterns(&self, key: &ServiceKey) -> HashSet<Pattern> {
        let mut matched = HashSet::new();
        let patterns = self.patterns.read();
        if let Some(root) = patterns.get(&key.namespace) {
            root.collect_patterns(&key.path_segments(), &mut matched);
        }
        matched
    }

    /// Record a service key as known. Returns false if it already was.
    pub fn add_service(&self, key: &ServiceKey) -> bool {
        self.services
            .write()
            .entry(key.namespace.clone())
            .or_default()
            .insert_path(&key.path_segments(), key.clone())
    }

    pub fn remove_service(&self, key: &ServiceKey) -> bool {
        let mut services = self.services.write();
        let Some(root) = services.get_mut(&key.namespace) else {
            return false;
        };
        let removed = root.remove_path(&key.path_segments(), key);
        if root.is_empty() {
            services.remove(&key.namespace);
        }
        removed
    }

    /// Every known service key matched by `pattern`, in key order.
    pub fn match_service_keys(&self, pattern: &Pattern) -> BTreeSet<ServiceKey> {
        let mut matched = Vec::new();
        let services = self.services.read();
        if let Some(root) = services.get(pattern.namespace()) {
            root.collect_paths(pattern.segments(), &mut matched);
        }
        matched.into_iter().collect()
    }
}

#[cfg(test)]
#[path = "pattern_index_test.rs"]
mod tests;
