//! Identity-merge engine
//!
//! Folds the elements of one category, ordered from the outermost ancestor
//! to the device itself, into a keyed collection. What happens on a key
//! collision (override, inherit, evict neighbours) is decided by a
//! [`MergePolicy`].

use std::fmt;
use tracing::debug;

use crate::element::{AttributeError, Element};

/// Per-parse state shared by all merge passes of one pack
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    /// Pack name or path, used in log messages
    pub pack: String,
    /// Part number of the device currently being resolved
    pub part_number: String,
    /// Overlapping-memory warnings emitted so far; at most one per pack
    pub overlap_warnings: usize,
}

impl ParseContext {
    pub fn new(pack: impl Into<String>) -> Self {
        Self {
            pack: pack.into(),
            part_number: String::new(),
            overlap_warnings: 0,
        }
    }
}

/// Insertion-ordered key to element mapping.
///
/// Re-inserting an existing key replaces the value in place; removing and
/// inserting moves it to the end.
#[derive(Debug, Clone)]
pub struct KeyedElements<K> {
    entries: Vec<(K, Element)>,
}

impl<K> Default for KeyedElements<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K: PartialEq> KeyedElements<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&Element> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: K, element: Element) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = element,
            None => self.entries.push((key, element)),
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<Element> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &Element) -> bool) {
        self.entries.retain(|(k, e)| keep(k, e));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Element)> {
        self.entries.iter().map(|(k, e)| (k, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_values(self) -> Vec<Element> {
        self.entries.into_iter().map(|(_, e)| e).collect()
    }
}

/// Category-specific rules for the identity merge
pub trait MergePolicy {
    type Key: PartialEq + fmt::Debug;

    /// Category name used in log messages
    fn category(&self) -> &'static str;

    /// Whether the element takes part in the merge at all
    fn accepts(&self, _ctx: &ParseContext, _element: &Element) -> bool {
        true
    }

    /// Identity key of an element
    fn key(&self, ctx: &ParseContext, element: &Element) -> Result<Self::Key, AttributeError>;

    /// Fold one element into the collection. The default replaces any entry
    /// with the same key.
    fn apply(
        &self,
        _ctx: &mut ParseContext,
        merged: &mut KeyedElements<Self::Key>,
        key: Self::Key,
        element: Element,
    ) -> Result<(), AttributeError> {
        merged.insert(key, element);
        Ok(())
    }
}

/// Run one identity-merge pass over `levels`, outermost first.
///
/// An element that fails to parse is logged and skipped; the rest of the
/// pass carries on.
pub fn merge<'a, P, I>(policy: &P, ctx: &mut ParseContext, levels: I) -> Vec<Element>
where
    P: MergePolicy,
    I: IntoIterator<Item = &'a [Element]>,
{
    let mut merged = KeyedElements::new();
    for level in levels {
        for element in level {
            if !policy.accepts(ctx, element) {
                continue;
            }
            let result = policy
                .key(ctx, element)
                .and_then(|key| policy.apply(ctx, &mut merged, key, element.clone()));
            if let Err(err) = result {
                debug!(
                    pack = %ctx.pack,
                    part = %ctx.part_number,
                    category = policy.category(),
                    "error parsing pack: {}",
                    err
                );
            }
        }
    }
    merged.into_values()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ByName;

    impl MergePolicy for ByName {
        type Key = String;

        fn category(&self) -> &'static str {
            "test"
        }

        fn key(&self, _ctx: &ParseContext, element: &Element) -> Result<String, AttributeError> {
            element.required("name").map(str::to_string)
        }
    }

    #[test]
    fn test_keyed_elements_order() {
        let mut map = KeyedElements::new();
        map.insert(1, Element::new("a"));
        map.insert(2, Element::new("b"));
        map.insert(1, Element::new("c"));
        let tags: Vec<_> = map.iter().map(|(_, e)| e.tag().to_string()).collect();
        assert_eq!(tags, vec!["c", "b"]);

        map.remove(&1);
        map.insert(1, Element::new("d"));
        let tags: Vec<_> = map.iter().map(|(_, e)| e.tag().to_string()).collect();
        assert_eq!(tags, vec!["b", "d"]);
    }

    #[test]
    fn test_merge_skips_bad_elements() {
        let outer = vec![
            Element::new("x").with_attr("name", "a").with_attr("v", "1"),
            Element::new("x"),
        ];
        let inner = vec![Element::new("x").with_attr("name", "a").with_attr("v", "2")];

        let mut ctx = ParseContext::new("TEST_DFP");
        let merged = merge(&ByName, &mut ctx, [outer.as_slice(), inner.as_slice()]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].attr("v"), Some("2"));
    }
}
