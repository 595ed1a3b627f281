//! Reference model of the collection store.
//!
//! Deliberately naive: every mutation re-sorts the whole list. Property
//! tests compare the real store against it.

use marksync_protocol::{Bookmark, MutationEvent};

/// Naive collection model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelStore {
    items: Vec<Bookmark>,
}

impl ModelStore {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents; first occurrence of an ID wins.
    pub fn replace_all(&mut self, items: Vec<Bookmark>) {
        self.items.clear();
        for item in items {
            if !self.items.iter().any(|b| b.id == item.id) {
                self.items.push(item);
            }
        }
        self.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Applies one event.
    pub fn apply(&mut self, event: MutationEvent) {
        match event {
            MutationEvent::Insert(bookmark) => self.upsert(bookmark),
            MutationEvent::Update(bookmark) => {
                if self.items.iter().any(|b| b.id == bookmark.id) {
                    self.upsert(bookmark);
                }
            }
            MutationEvent::Delete(id) => self.items.retain(|b| b.id != id),
        }
    }

    fn upsert(&mut self, bookmark: Bookmark) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|b| b.id == bookmark.id && b.created_at == bookmark.created_at)
        {
            *existing = bookmark;
            return;
        }
        self.items.retain(|b| b.id != bookmark.id);
        // New entries go ahead of older-or-equal ones.
        self.items.insert(0, bookmark);
        self.items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Current entries.
    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    /// IDs in order.
    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|b| b.id.clone()).collect()
    }
}
