//! Pure queue ordering functions.

use keeper_types::constants::QUEUE_ITEM_PREFIX;

/// Queue items in consumption order.
///
/// Item names share one prefix and a fixed-width sequence suffix, so sorting by
/// the full name is creation order. Children that are not items are dropped.
pub fn order_items(mut children: Vec<String>) -> Vec<String> {
    children.retain(|name| name.starts_with(QUEUE_ITEM_PREFIX));
    children.sort();
    children
}
