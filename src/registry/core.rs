//! # Registry: authoritative map of supervised entries.
//!
//! In-memory mapping `id → Entry` plus a secondary `name → id` index.
//! All access happens from the supervisor's serialized context, so the
//! registry performs no locking of its own — single-writer by
//! construction.
//!
//! ## Rules
//! - Names are unique across retained entries (entries in `stopped` are
//!   never retained, so the index covers everything it holds).
//! - `resolve` tries the id first, then the name.
//! - Ids are opaque 10-character alphanumeric strings.

use std::collections::HashMap;

use rand::{distr::Alphanumeric, Rng};

use crate::error::{Error, Result};

use super::entry::{Entry, EntryState};

/// Length of generated entry ids.
const ID_LEN: usize = 10;

/// Authoritative in-memory map of supervised entries.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
    names: HashMap<String, String>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a fresh 10-character alphanumeric id not present in the
    /// registry.
    pub fn generate_id(&self) -> String {
        loop {
            let id: String = rand::rng()
                .sample_iter(Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if !self.entries.contains_key(&id) {
                return id;
            }
        }
    }

    /// Inserts an entry; fails when the name is already taken by a live
    /// entry. Entries arriving in `stopped` (snapshot restore) do not
    /// reserve their name.
    pub fn add(&mut self, entry: Entry) -> Result<()> {
        let live = entry.state != EntryState::Stopped;
        if live && self.names.contains_key(&entry.name) {
            return Err(Error::InvalidConfig {
                reason: format!("name '{}' is already in use", entry.name),
            });
        }
        if live {
            self.names.insert(entry.name.clone(), entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    /// Removes an entry by id, keeping the name index consistent.
    pub fn remove(&mut self, id: &str) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        if self.names.get(&entry.name).is_some_and(|owner| owner == id) {
            self.names.remove(&entry.name);
        }
        Some(entry)
    }

    /// Re-reserves a retained entry's name before it is revived. Fails
    /// when another live entry took the name in the meantime.
    pub fn reclaim_name(&mut self, id: &str) -> Result<()> {
        let Some(entry) = self.entries.get(id) else {
            return Err(Error::NotFound {
                target: id.to_string(),
            });
        };
        match self.names.get(&entry.name) {
            Some(owner) if owner != id => Err(Error::InvalidConfig {
                reason: format!("name '{}' is already in use", entry.name),
            }),
            _ => {
                self.names.insert(entry.name.clone(), id.to_string());
                Ok(())
            }
        }
    }

    /// Frees an entry's name for reuse once it transitions to `stopped`
    /// while staying retained for inspection.
    pub fn release_name(&mut self, id: &str) {
        if let Some(entry) = self.entries.get(id) {
            if self.names.get(&entry.name).is_some_and(|owner| owner == id) {
                self.names.remove(&entry.name);
            }
        }
    }

    /// Looks up an entry by id.
    #[inline]
    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Looks up an entry by id, mutably.
    #[inline]
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.get_mut(id)
    }

    /// Looks up an entry by name.
    pub fn get_by_name(&self, name: &str) -> Option<&Entry> {
        self.names.get(name).and_then(|id| self.entries.get(id))
    }

    /// Resolves a client-supplied target: id first, then name.
    pub fn resolve(&self, target: &str) -> Option<&Entry> {
        self.get(target).or_else(|| self.get_by_name(target))
    }

    /// Resolves a target to its id.
    pub fn resolve_id(&self, target: &str) -> Option<String> {
        self.resolve(target).map(|e| e.id.clone())
    }

    /// Returns all entries sorted by name.
    pub fn list(&self) -> Vec<&Entry> {
        let mut all: Vec<&Entry> = self.entries.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Returns all ids (unsorted).
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of retained entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are retained.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EntrySpec;

    fn spec(name: &str) -> EntrySpec {
        EntrySpec::new(name, "app.js")
    }

    #[test]
    fn generated_ids_are_ten_alphanumerics() {
        let reg = Registry::new();
        for _ in 0..32 {
            let id = reg.generate_id();
            assert_eq!(id.len(), 10);
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn resolve_tries_id_then_name() {
        let mut reg = Registry::new();
        let id = reg.generate_id();
        reg.add(Entry::new(id.clone(), spec("api"))).unwrap();

        assert_eq!(reg.resolve(&id).unwrap().name, "api");
        assert_eq!(reg.resolve("api").unwrap().id, id);
        assert!(reg.resolve("worker").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut reg = Registry::new();
        reg.add(Entry::new(reg.generate_id(), spec("api"))).unwrap();
        let err = reg
            .add(Entry::new(reg.generate_id(), spec("api")))
            .unwrap_err();
        assert_eq!(err.as_label(), "invalid_config");
    }

    #[test]
    fn remove_frees_the_name() {
        let mut reg = Registry::new();
        let id = reg.generate_id();
        reg.add(Entry::new(id.clone(), spec("api"))).unwrap();
        assert!(reg.remove(&id).is_some());
        assert!(reg.is_empty());
        // The name is reusable immediately.
        reg.add(Entry::new(reg.generate_id(), spec("api"))).unwrap();
    }

    #[test]
    fn list_is_sorted_by_name() {
        let mut reg = Registry::new();
        for name in ["zeta", "alpha", "mid"] {
            reg.add(Entry::new(reg.generate_id(), spec(name))).unwrap();
        }
        let names: Vec<&str> = reg.list().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
