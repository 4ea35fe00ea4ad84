//! Primary map plus secondary indices, mutated as one unit.
//!
//! Callers hold a single lock around [`CacheIndex`], so the primary map and
//! every index change together. Nothing in here awaits.

use element_resolver_types::{CacheKey, ElementCategory, ElementRef};
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};

/// A cached element with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached element handle.
    pub element: ElementRef,
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// When the entry was inserted.
    pub created_at: Instant,
    /// Last insert or hit; drives TTL and LRU.
    pub last_accessed: Instant,
    /// Enclosing entry, when the parent is tracked.
    pub parent: Option<CacheKey>,
    /// Entries that name this one as parent.
    pub children: HashSet<CacheKey>,
    /// Stable identifier, when known.
    pub identifier: Option<String>,
    /// Element category, when known.
    pub category: Option<ElementCategory>,
    /// Free-form metadata supplied at insert.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CacheEntry {
    /// A fresh entry with no relations.
    pub fn new(key: CacheKey, element: ElementRef, now: Instant) -> Self {
        Self {
            element,
            key,
            created_at: now,
            last_accessed: now,
            parent: None,
            children: HashSet::new(),
            identifier: None,
            category: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Whether the entry has gone unaccessed for longer than `ttl`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_accessed) > ttl
    }
}

/// Entries and their identifier, category and parent/child indices.
#[derive(Debug, Default)]
pub(crate) struct CacheIndex {
    entries: HashMap<CacheKey, CacheEntry>,
    by_identifier: HashMap<String, CacheKey>,
    by_category: HashMap<ElementCategory, HashSet<CacheKey>>,
}

impl CacheIndex {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.entries.keys()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Refresh the access time and return the element.
    pub(crate) fn touch(&mut self, key: &CacheKey, now: Instant) -> Option<ElementRef> {
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = now;
        Some(entry.element.clone())
    }

    pub(crate) fn key_for_identifier(&self, identifier: &str) -> Option<CacheKey> {
        self.by_identifier.get(identifier).cloned()
    }

    pub(crate) fn keys_for_category(&self, category: ElementCategory) -> Vec<CacheKey> {
        self.by_category
            .get(&category)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Insert a new entry and index it.
    ///
    /// The parent link is kept only when the parent is itself tracked. An
    /// existing entry under the same key is replaced.
    pub(crate) fn insert(&mut self, mut entry: CacheEntry) {
        if self.entries.contains_key(&entry.key) {
            self.remove(&entry.key.clone());
        }
        entry.children.clear();

        if let Some(parent) = entry.parent.clone() {
            match self.entries.get_mut(&parent) {
                Some(parent_entry) if parent != entry.key => {
                    parent_entry.children.insert(entry.key.clone());
                }
                _ => entry.parent = None,
            }
        }

        if let Some(identifier) = &entry.identifier {
            // last writer wins; the displaced key keeps its own identifier field
            self.by_identifier
                .insert(identifier.clone(), entry.key.clone());
        }
        if let Some(category) = entry.category {
            self.by_category
                .entry(category)
                .or_default()
                .insert(entry.key.clone());
        }

        self.entries.insert(entry.key.clone(), entry);
    }

    /// Remove one entry from the primary map and every index.
    ///
    /// Children are kept but lose their parent link.
    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;

        if let Some(identifier) = &entry.identifier {
            if self.by_identifier.get(identifier) == Some(key) {
                self.by_identifier.remove(identifier);
            }
        }
        if let Some(category) = entry.category {
            if let Some(keys) = self.by_category.get_mut(&category) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_category.remove(&category);
                }
            }
        }
        if let Some(parent) = &entry.parent {
            if let Some(parent_entry) = self.entries.get_mut(parent) {
                parent_entry.children.remove(key);
            }
        }
        for child in &entry.children {
            if let Some(child_entry) = self.entries.get_mut(child) {
                child_entry.parent = None;
            }
        }

        Some(entry)
    }

    /// Remove `root` and every descendant, parents before children.
    ///
    /// Returns the removed keys in removal order. Cycles are cut by the
    /// visited set.
    pub(crate) fn remove_cascade(&mut self, root: &CacheKey) -> Vec<CacheKey> {
        let mut removed = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root.clone()];

        while let Some(key) = stack.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(entry) = self.remove(&key) else {
                continue;
            };
            stack.extend(
                entry
                    .children
                    .into_iter()
                    .filter(|child| !visited.contains(child)),
            );
            removed.push(key);
        }

        removed
    }

    /// Keys whose entries are past `ttl`.
    pub(crate) fn expired_keys(&self, now: Instant, ttl: Duration) -> Vec<CacheKey> {
        self.entries
            .values()
            .filter(|entry| entry.is_expired(now, ttl))
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// The `count` least recently accessed keys, oldest first.
    pub(crate) fn oldest_keys(&self, count: usize) -> Vec<CacheKey> {
        let mut by_age: Vec<(&Instant, &CacheKey)> = self
            .entries
            .values()
            .map(|entry| (&entry.last_accessed, &entry.key))
            .collect();
        by_age.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(b.1)));
        by_age
            .into_iter()
            .take(count)
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.by_identifier.clear();
        self.by_category.clear();
        count
    }

    /// Verify that every index agrees with the primary map.
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        for (identifier, key) in &self.by_identifier {
            let entry = self
                .entries
                .get(key)
                .ok_or_else(|| format!("identifier {identifier} points at missing {key}"))?;
            if entry.identifier.as_deref() != Some(identifier.as_str()) {
                return Err(format!("identifier {identifier} points at {key} which disagrees"));
            }
        }
        for (category, keys) in &self.by_category {
            for key in keys {
                let entry = self
                    .entries
                    .get(key)
                    .ok_or_else(|| format!("category {category} lists missing {key}"))?;
                if entry.category != Some(*category) {
                    return Err(format!("category {category} lists {key} which disagrees"));
                }
            }
        }
        for (key, entry) in &self.entries {
            if &entry.key != key {
                return Err(format!("entry stored under {key} claims {}", entry.key));
            }
            for child in &entry.children {
                let child_entry = self
                    .entries
                    .get(child)
                    .ok_or_else(|| format!("{key} lists missing child {child}"))?;
                if child_entry.parent.as_ref() != Some(key) {
                    return Err(format!("{child} is listed under {key} but has another parent"));
                }
            }
            if let Some(parent) = &entry.parent {
                let parent_entry = self
                    .entries
                    .get(parent)
                    .ok_or_else(|| format!("{key} names missing parent {parent}"))?;
                if !parent_entry.children.contains(key) {
                    return Err(format!("{parent} does not list its child {key}"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use element_resolver_types::LocatorStrategy;

    fn key(selector: &str) -> CacheKey {
        CacheKey::new(LocatorStrategy::AccessibilityId, selector)
    }

    fn entry(selector: &str, parent: Option<&str>, now: Instant) -> CacheEntry {
        let mut entry = CacheEntry::new(key(selector), ElementRef::new(selector), now);
        entry.parent = parent.map(key);
        entry
    }

    #[test]
    fn test_insert_links_tracked_parent_only() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        index.insert(entry("form", None, now));
        index.insert(entry("email", Some("form"), now));
        index.insert(entry("orphan", Some("missing"), now));

        assert!(index.get(&key("form")).unwrap().children.contains(&key("email")));
        assert_eq!(index.get(&key("orphan")).unwrap().parent, None);
        assert!(index.check_invariants().is_ok());
    }

    #[test]
    fn test_cascade_removes_descendants_once() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        index.insert(entry("a", None, now));
        index.insert(entry("b", Some("a"), now));
        index.insert(entry("c", Some("b"), now));
        index.insert(entry("d", Some("a"), now));
        index.insert(entry("other", None, now));

        let removed = index.remove_cascade(&key("a"));
        assert_eq!(removed.len(), 4);
        assert_eq!(removed[0], key("a"));
        let pos = |k: &str| removed.iter().position(|r| r == &key(k)).unwrap();
        assert!(pos("b") < pos("c"));
        assert_eq!(index.len(), 1);
        assert!(index.check_invariants().is_ok());
    }

    #[test]
    fn test_cascade_survives_cycle() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        index.insert(entry("a", None, now));
        index.insert(entry("b", Some("a"), now));
        // force a cycle b -> a
        index.entries.get_mut(&key("b")).unwrap().children.insert(key("a"));

        let removed = index.remove_cascade(&key("a"));
        assert_eq!(removed.len(), 2);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_remove_orphans_children_and_cleans_indices() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        let mut parent = entry("list", None, now);
        parent.category = Some(ElementCategory::List);
        parent.identifier = Some("main_list".into());
        index.insert(parent);
        index.insert(entry("row", Some("list"), now));

        index.remove(&key("list"));
        assert_eq!(index.key_for_identifier("main_list"), None);
        assert!(index.keys_for_category(ElementCategory::List).is_empty());
        assert_eq!(index.get(&key("row")).unwrap().parent, None);
        assert!(index.check_invariants().is_ok());
    }

    #[test]
    fn test_identifier_last_writer_wins() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        let mut first = entry("first", None, now);
        first.identifier = Some("shared".into());
        let mut second = entry("second", None, now);
        second.identifier = Some("shared".into());
        index.insert(first);
        index.insert(second);

        assert_eq!(index.key_for_identifier("shared"), Some(key("second")));
        // removing the displaced entry leaves the winner indexed
        index.remove(&key("first"));
        assert_eq!(index.key_for_identifier("shared"), Some(key("second")));
    }

    #[test]
    fn test_oldest_and_expired() {
        let start = Instant::now();
        let mut index = CacheIndex::default();
        index.insert(entry("old", None, start));
        index.insert(entry("new", None, start + Duration::from_secs(10)));

        assert_eq!(index.oldest_keys(1), vec![key("old")]);
        let later = start + Duration::from_secs(15);
        assert_eq!(
            index.expired_keys(later, Duration::from_secs(12)),
            vec![key("old")]
        );
    }

    #[test]
    fn test_check_invariants_detects_corruption() {
        let now = Instant::now();
        let mut index = CacheIndex::default();
        index.insert(entry("a", None, now));
        index.by_identifier.insert("ghost".into(), key("missing"));
        assert!(index.check_invariants().is_err());
    }
}
