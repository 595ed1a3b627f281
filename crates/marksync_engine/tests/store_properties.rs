//! Property tests for the collection store.

use marksync_engine::BookmarkStore;
use marksync_protocol::MutationEvent;
use marksync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

fn assert_sorted_and_unique(store: &BookmarkStore) -> Result<(), TestCaseError> {
    let items = store.items();
    for pair in items.windows(2) {
        prop_assert!(pair[0].created_at >= pair[1].created_at);
    }
    let unique: HashSet<&str> = items.iter().map(|b| b.id.as_str()).collect();
    prop_assert_eq!(unique.len(), items.len());
    Ok(())
}

proptest! {
    #[test]
    fn matches_reference_model(
        initial in collection_strategy(12),
        events in mutation_sequence_strategy(40),
    ) {
        let mut store = BookmarkStore::new();
        let mut model = ModelStore::new();
        store.replace_all(initial.clone());
        model.replace_all(initial);

        for event in events {
            store.apply(event.clone());
            model.apply(event);
            prop_assert_eq!(store.items(), model.items());
        }
    }

    #[test]
    fn stays_sorted_and_unique(
        initial in collection_strategy(12),
        events in mutation_sequence_strategy(40),
    ) {
        let mut store = BookmarkStore::new();
        store.replace_all(initial);
        assert_sorted_and_unique(&store)?;

        for event in events {
            store.apply(event);
            assert_sorted_and_unique(&store)?;
        }
    }

    #[test]
    fn delete_is_idempotent(
        initial in collection_strategy(12),
        id in bookmark_id_strategy(),
    ) {
        let mut store = BookmarkStore::new();
        store.replace_all(initial);

        store.apply(MutationEvent::Delete(id.clone()));
        let once = store.snapshot();
        store.apply(MutationEvent::Delete(id.clone()));

        prop_assert_eq!(store.snapshot(), once);
        prop_assert!(!store.contains(&id));
    }

    #[test]
    fn replace_all_discards_prior_state(
        first in collection_strategy(12),
        second in collection_strategy(12),
    ) {
        let mut store = BookmarkStore::new();
        store.replace_all(first);
        store.replace_all(second.clone());

        let mut fresh = BookmarkStore::new();
        fresh.replace_all(second);
        prop_assert_eq!(store.items(), fresh.items());
    }
}
