//! Ordered string→string environment map with secret tracking and
//! OS-aware PATH helpers.

use std::collections::HashSet;

use indexmap::IndexMap;

#[cfg(windows)]
const PATH_KEY: &str = "Path";
#[cfg(not(windows))]
const PATH_KEY: &str = "PATH";

#[cfg(windows)]
const PATH_SEP: char = ';';
#[cfg(not(windows))]
const PATH_SEP: char = ':';

/// Insertion-ordered environment, as composed through the cascade in
/// `EnvComposer`. `set` preserves first-insertion index on update, matching
/// the ordering guarantee P4/R... invariants rely on.
#[derive(Debug, Clone, Default)]
pub struct EnvStore {
    values: IndexMap<String, String>,
    secrets: HashSet<String>,
}

impl EnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from the current process environment.
    pub fn from_process_env() -> Self {
        let mut store = Self::new();
        for (k, v) in std::env::vars() {
            store.set(&k, &v);
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Idempotent on value, but the key keeps its first-insertion index.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.values.shift_remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values_iter(&self) -> impl Iterator<Item = &str> {
        self.values.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn mark_secret(&mut self, key: &str) {
        self.secrets.insert(key.to_string());
    }

    pub fn is_secret(&self, key: &str) -> bool {
        self.secrets.contains(key)
    }

    pub fn secrets(&self) -> impl Iterator<Item = &str> {
        self.secrets.iter().map(String::as_str)
    }

    pub fn to_map(&self) -> std::collections::HashMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn path_key() -> &'static str {
        PATH_KEY
    }

    pub fn get_path(&self) -> Vec<String> {
        self.get(PATH_KEY)
            .map(Self::split_path)
            .unwrap_or_default()
    }

    pub fn set_path(&mut self, entries: &[String]) {
        self.set(PATH_KEY, &entries.join(&PATH_SEP.to_string()));
    }

    pub fn split_path(value: &str) -> Vec<String> {
        value
            .split(PATH_SEP)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_path(&self, entry: &str) -> bool {
        self.get_path().iter().any(|p| Self::path_eq(p, entry))
    }

    /// No-op when the first element already matches — prevents the
    /// duplicate-insertion churn that would otherwise accumulate across
    /// repeated task invocations that all prepend the same directory.
    pub fn prepend_path(&mut self, entry: &str) {
        let mut entries = self.get_path();
        if entries.first().is_some_and(|first| Self::path_eq(first, entry)) {
            return;
        }
        entries.retain(|p| !Self::path_eq(p, entry));
        entries.insert(0, entry.to_string());
        self.set_path(&entries);
    }

    pub fn append_path(&mut self, entry: &str) {
        let mut entries = self.get_path();
        if entries.iter().any(|p| Self::path_eq(p, entry)) {
            return;
        }
        entries.push(entry.to_string());
        self.set_path(&entries);
    }

    #[cfg(windows)]
    fn path_eq(a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }

    #[cfg(not(windows))]
    fn path_eq(a: &str, b: &str) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_first_insertion_order() {
        let mut store = EnvStore::new();
        store.set("A", "1");
        store.set("B", "2");
        store.set("A", "3");
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(store.get("A"), Some("3"));
    }

    #[test]
    fn prepend_path_is_idempotent() {
        let mut store = EnvStore::new();
        store.set_path(&["/usr/bin".into()]);
        store.prepend_path("/opt/tool/bin");
        store.prepend_path("/opt/tool/bin");
        assert_eq!(store.get_path(), vec!["/opt/tool/bin", "/usr/bin"]);
    }

    #[test]
    fn prepend_path_moves_existing_entry_to_front() {
        let mut store = EnvStore::new();
        store.set_path(&["/a".into(), "/b".into()]);
        store.prepend_path("/b");
        assert_eq!(store.get_path(), vec!["/b", "/a"]);
    }

    #[test]
    fn prepend_path_no_empty_segments() {
        let mut store = EnvStore::new();
        store.set("PATH", "/a::/b:");
        store.prepend_path("/c");
        assert!(store.get_path().iter().all(|p| !p.is_empty()));
    }

    #[test]
    fn secrets_tracked_independently_of_values() {
        let mut store = EnvStore::new();
        store.set("TOKEN", "xyz");
        store.mark_secret("TOKEN");
        assert!(store.is_secret("TOKEN"));
        assert!(!store.is_secret("OTHER"));
    }
}
