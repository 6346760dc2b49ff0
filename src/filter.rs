use std::cmp::Reverse;

use crate::search::Item;
use crate::storage::Subscription;

/// Selects the items of a search that have not been notified for `sub` yet, newest first.
///
/// Promoted items are always dropped. An unsynced subscription only gets the newest item so
/// that the first poll establishes a baseline instead of replaying the whole result page.
pub fn new_items(mut items: Vec<Item>, sub: &Subscription) -> Vec<Item> {
    items.retain(|item| !item.promoted);

    // the search is supposed to return the newest items first; don't rely on it
    items.sort_by_key(|item| Reverse(item.freshness));

    if !sub.synced {
        items.truncate(1);
    } else {
        items.retain(|item| item.freshness > sub.last_seen);
    }

    items
}

/// The cursor a subscription advances to after notifying `items`.
pub fn next_cursor(items: &[Item]) -> Option<i64> {
    items.iter().map(|item| item.freshness).max()
}
