use std::collections::HashMap;

use speakin_types::UserId;
use speakin_types::models::Counterpart;

/// Known conversation counterparts, unique by id. The first profile
/// inserted for an id wins.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    entries: Vec<Counterpart>,
    index: HashMap<UserId, usize>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id is already present.
    pub fn insert(&mut self, counterpart: Counterpart) -> bool {
        if self.index.contains_key(&counterpart.id) {
            return false;
        }
        self.index.insert(counterpart.id, self.entries.len());
        self.entries.push(counterpart);
        true
    }

    /// Insert every new counterpart; returns how many were added.
    pub fn extend(&mut self, counterparts: impl IntoIterator<Item = Counterpart>) -> usize {
        counterparts
            .into_iter()
            .map(|c| self.insert(c))
            .filter(|added| *added)
            .count()
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: UserId) -> Option<&Counterpart> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn ids(&self) -> Vec<UserId> {
        self.entries.iter().map(|c| c.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Counterpart> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive substring match on the display name. An empty query
    /// matches everyone.
    pub fn search(&self, query: &str) -> Vec<&Counterpart> {
        let needle = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|c| needle.is_empty() || c.display_name().to_lowercase().contains(&needle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use speakin_types::models::Persona;

    use super::*;

    fn student(id: UserId, name: &str) -> Counterpart {
        Counterpart {
            id,
            profile_image: None,
            persona: Persona::Student { name: name.into() },
        }
    }

    fn tutor(id: UserId, speakin_name: &str) -> Counterpart {
        Counterpart {
            id,
            profile_image: None,
            persona: Persona::Tutor {
                speakin_name: speakin_name.into(),
            },
        }
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let mut roster = Roster::new();
        assert!(roster.insert(tutor(5, "Tutor Bob")));
        assert!(!roster.insert(student(5, "Bob")));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get(5).unwrap().display_name(), "Tutor Bob");
    }

    #[test]
    fn extend_counts_only_new_entries() {
        let mut roster = Roster::new();
        roster.insert(student(1, "Ana"));
        let added = roster.extend(vec![student(1, "Ana"), student(2, "Ben"), student(3, "Cy")]);
        assert_eq!(added, 2);
        assert_eq!(roster.ids(), vec![1, 2, 3]);
    }

    #[test]
    fn search_matches_display_name_case_insensitively() {
        let mut roster = Roster::new();
        roster.extend(vec![
            student(1, "Ana Lima"),
            tutor(2, "Tutor Bob"),
            student(3, "Bobby"),
        ]);

        let hits: Vec<UserId> = roster.search("BOB").iter().map(|c| c.id).collect();
        assert_eq!(hits, vec![2, 3]);
        assert_eq!(roster.search("  ").len(), 3);
    }
}
