//! Local collection store.
//!
//! Holds the client's ordered view of the principal's bookmarks, newest
//! first, and patches it with decoded mutation events. Every change is
//! published to observers as a full snapshot.

use marksync_protocol::{Bookmark, MutationEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot handed to observers.
pub type Collection = Arc<Vec<Bookmark>>;

/// What `apply` did to the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new entry was added.
    Inserted,
    /// An existing entry was overwritten.
    Replaced,
    /// An entry was removed.
    Removed,
    /// Nothing changed (unknown ID).
    Ignored,
}

impl ApplyOutcome {
    /// Returns true if the collection changed.
    pub fn changed(&self) -> bool {
        !matches!(self, ApplyOutcome::Ignored)
    }
}

/// Ordered set of bookmarks sorted by `created_at` descending.
///
/// All operations are synchronous and total.
pub struct BookmarkStore {
    items: Vec<Bookmark>,
    observers: watch::Sender<Collection>,
}

impl BookmarkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (observers, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            items: Vec::new(),
            observers,
        }
    }

    /// Replaces the contents with `items`, sorted newest first.
    ///
    /// Entries with equal timestamps keep their input order. If an ID
    /// appears more than once the first occurrence wins.
    pub fn replace_all(&mut self, items: Vec<Bookmark>) {
        let mut seen = HashSet::with_capacity(items.len());
        let mut items: Vec<Bookmark> = items
            .into_iter()
            .filter(|b| seen.insert(b.id.clone()))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        self.items = items;
        self.publish();
    }

    /// Applies a mutation event.
    ///
    /// - Insert: adds in order, or overwrites in place if the ID exists
    /// - Update: overwrites in place, ignored if the ID is unknown
    /// - Delete: removes, ignored if the ID is unknown
    pub fn apply(&mut self, event: MutationEvent) -> ApplyOutcome {
        let outcome = match event {
            MutationEvent::Insert(bookmark) => match self.position(&bookmark.id) {
                Some(index) => {
                    self.overwrite(index, bookmark);
                    ApplyOutcome::Replaced
                }
                None => {
                    self.insert_sorted(bookmark);
                    ApplyOutcome::Inserted
                }
            },
            MutationEvent::Update(bookmark) => match self.position(&bookmark.id) {
                Some(index) => {
                    self.overwrite(index, bookmark);
                    ApplyOutcome::Replaced
                }
                None => ApplyOutcome::Ignored,
            },
            MutationEvent::Delete(id) => match self.position(&id) {
                Some(index) => {
                    self.items.remove(index);
                    ApplyOutcome::Removed
                }
                None => ApplyOutcome::Ignored,
            },
        };

        if outcome.changed() {
            self.publish();
        }
        outcome
    }

    /// Empties the store.
    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.publish();
        }
    }

    /// Returns the current entries, newest first.
    pub fn items(&self) -> &[Bookmark] {
        &self.items
    }

    /// Returns an owned copy of the current entries.
    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.items.clone()
    }

    /// Looks up an entry by ID.
    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.items.iter().find(|b| b.id == id)
    }

    /// Returns true if an entry with this ID exists.
    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Subscribes to collection changes.
    ///
    /// The receiver starts with the current snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Collection> {
        self.observers.subscribe()
    }

    /// Inserts ahead of every entry that is not strictly newer.
    fn insert_sorted(&mut self, bookmark: Bookmark) {
        let index = self
            .items
            .partition_point(|existing| existing.created_at > bookmark.created_at);
        self.items.insert(index, bookmark);
    }

    fn overwrite(&mut self, index: usize, bookmark: Bookmark) {
        if self.items[index].created_at == bookmark.created_at {
            self.items[index] = bookmark;
        } else {
            self.items.remove(index);
            self.insert_sorted(bookmark);
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|b| b.id == id)
    }

    fn publish(&self) {
        self.observers.send_replace(Arc::new(self.items.clone()));
    }
}

impl Default for BookmarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BookmarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BookmarkStore")
            .field("len", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_protocol::parse_timestamp;

    fn bookmark(id: &str, created_at: &str) -> Bookmark {
        Bookmark::new(
            id,
            format!("title {}", id),
            format!("https://{}.example", id),
            "u1",
            parse_timestamp(created_at).unwrap(),
        )
    }

    fn ids(store: &BookmarkStore) -> Vec<&str> {
        store.items().iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn replace_all_sorts_newest_first() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![
            bookmark("a", "2024-01-01"),
            bookmark("c", "2024-03-01"),
            bookmark("b", "2024-02-01"),
        ]);
        assert_eq!(ids(&store), vec!["c", "b", "a"]);
    }

    #[test]
    fn replace_all_discards_previous_contents() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("old", "2024-01-01")]);
        store.replace_all(vec![bookmark("new", "2023-01-01")]);
        assert_eq!(ids(&store), vec!["new"]);
    }

    #[test]
    fn replace_all_keeps_first_duplicate() {
        let mut store = BookmarkStore::new();
        let mut dup = bookmark("a", "2024-01-01");
        dup.title = "second".into();
        store.replace_all(vec![bookmark("a", "2024-01-01"), dup]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().title, "title a");
    }

    #[test]
    fn insert_keeps_order() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("1", "2024-01-01"), bookmark("3", "2024-01-03")]);

        assert_eq!(
            store.apply(MutationEvent::Insert(bookmark("2", "2024-01-02"))),
            ApplyOutcome::Inserted
        );
        assert_eq!(ids(&store), vec!["3", "2", "1"]);

        store.apply(MutationEvent::Insert(bookmark("4", "2024-01-04")));
        store.apply(MutationEvent::Insert(bookmark("0", "2023-12-31")));
        assert_eq!(ids(&store), vec!["4", "3", "2", "1", "0"]);
    }

    #[test]
    fn insert_with_equal_timestamp_goes_first() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("old", "2024-01-01")]);
        store.apply(MutationEvent::Insert(bookmark("new", "2024-01-01")));
        assert_eq!(ids(&store), vec!["new", "old"]);
    }

    #[test]
    fn duplicate_insert_overwrites() {
        let mut store = BookmarkStore::new();
        store.apply(MutationEvent::Insert(bookmark("1", "2024-01-01")));

        let mut again = bookmark("1", "2024-01-01");
        again.title = "renamed".into();
        assert_eq!(
            store.apply(MutationEvent::Insert(again)),
            ApplyOutcome::Replaced
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("1").unwrap().title, "renamed");
    }

    #[test]
    fn update_unknown_is_ignored() {
        let mut store = BookmarkStore::new();
        assert_eq!(
            store.apply(MutationEvent::Update(bookmark("ghost", "2024-01-01"))),
            ApplyOutcome::Ignored
        );
        assert!(store.is_empty());
    }

    #[test]
    fn update_replaces_in_place() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("1", "2024-01-01"), bookmark("2", "2024-01-02")]);

        let mut changed = bookmark("1", "2024-01-01");
        changed.url = "https://changed.example".into();
        assert_eq!(
            store.apply(MutationEvent::Update(changed)),
            ApplyOutcome::Replaced
        );
        assert_eq!(ids(&store), vec!["2", "1"]);
        assert_eq!(store.get("1").unwrap().url, "https://changed.example");
    }

    #[test]
    fn overwrite_with_new_timestamp_moves_entry() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("1", "2024-01-01"), bookmark("2", "2024-01-02")]);
        store.apply(MutationEvent::Update(bookmark("1", "2024-01-03")));
        assert_eq!(ids(&store), vec!["1", "2"]);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut store = BookmarkStore::new();
        store.replace_all(vec![bookmark("1", "2024-01-01")]);

        assert_eq!(store.apply(MutationEvent::Delete("1".into())), ApplyOutcome::Removed);
        assert_eq!(store.apply(MutationEvent::Delete("1".into())), ApplyOutcome::Ignored);
        assert!(store.is_empty());
    }

    #[test]
    fn observers_see_every_change() {
        let mut store = BookmarkStore::new();
        let mut rx = store.subscribe();
        assert!(rx.borrow_and_update().is_empty());

        store.apply(MutationEvent::Insert(bookmark("1", "2024-01-01")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.apply(MutationEvent::Delete("missing".into()));
        assert!(!rx.has_changed().unwrap());

        store.clear();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }
}
