//! Pure lock ordering functions.

use keeper_types::constants::LOCK_NODE_PREFIX;
use keeper_types::path::sequence_of;

/// Node name prefix for one lock instance on one session.
///
/// The trailing `-` separates the instance number from the sequence suffix
/// the service appends, so no prefix is a prefix of another instance's.
///
/// ```
/// use keeper_coordination::verified::lock_node_prefix;
///
/// assert_eq!(lock_node_prefix(0x1f, 2), "lock-1f-2-");
/// ```
#[inline]
pub fn lock_node_prefix(session_id: i64, instance: u64) -> String {
    format!("{LOCK_NODE_PREFIX}-{session_id:x}-{instance}-")
}

/// Lock siblings ordered by sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SiblingOrder {
    /// Names in ascending sequence order.
    pub ordered: Vec<String>,
    /// Names without a decimal sequence suffix.
    pub ignored: Vec<String>,
}

/// Order sibling names numerically by their sequence suffix.
///
/// Ties (which the service never produces under one parent) fall back to the
/// name so the result is total.
pub fn order_siblings(names: &[String]) -> SiblingOrder {
    let mut sequenced = Vec::with_capacity(names.len());
    let mut ignored = Vec::new();
    for name in names {
        match sequence_of(name) {
            Some(sequence) => sequenced.push((sequence, name)),
            None => ignored.push(name.clone()),
        }
    }
    sequenced.sort();
    SiblingOrder {
        ordered: sequenced.into_iter().map(|(_, name)| name.clone()).collect(),
        ignored,
    }
}

/// First sibling created with `prefix`, if any.
///
/// Used to rediscover a node whose create reply was lost.
pub fn find_own_node<'a>(names: &'a [String], prefix: &str) -> Option<&'a str> {
    names.iter().map(String::as_str).find(|name| name.starts_with(prefix))
}

/// Where a lock node stands among its ordered siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPosition<'a> {
    /// The node is not among the siblings.
    Missing,
    /// The node has the lowest sequence number and owns the lock.
    Lowest,
    /// The node waits on the sibling immediately before it.
    Behind {
        /// The next lower sibling.
        neighbor: &'a str,
    },
}

/// Locate `own` in `ordered`.
pub fn lock_position<'a>(ordered: &'a [String], own: &str) -> LockPosition<'a> {
    match ordered.iter().position(|name| name == own) {
        None => LockPosition::Missing,
        Some(0) => LockPosition::Lowest,
        Some(idx) => LockPosition::Behind {
            neighbor: ordered[idx - 1].as_str(),
        },
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ordering_is_numeric_not_lexicographic() {
        let order = order_siblings(&names(&["lock-b-0-100", "lock-a-0-99", "lock-c-0-0000000101"]));
        assert_eq!(order.ordered, names(&["lock-a-0-99", "lock-b-0-100", "lock-c-0-0000000101"]));
        assert!(order.ignored.is_empty());
    }

    #[test]
    fn names_without_sequence_are_ignored() {
        let order = order_siblings(&names(&["lock-a-0-0000000002", "README", "lock-b-0-"]));
        assert_eq!(order.ordered, names(&["lock-a-0-0000000002"]));
        assert_eq!(order.ignored, names(&["README", "lock-b-0-"]));
    }

    #[test]
    fn own_node_is_found_by_exact_prefix() {
        let siblings = names(&["lock-1f-10-0000000004", "lock-1f-1-0000000007"]);
        assert_eq!(find_own_node(&siblings, "lock-1f-1-"), Some("lock-1f-1-0000000007"));
        assert_eq!(find_own_node(&siblings, "lock-1f-2-"), None);
    }

    #[test]
    fn position_names_the_next_lower_sibling() {
        let ordered = names(&["a-1", "b-2", "c-3"]);
        assert_eq!(lock_position(&ordered, "a-1"), LockPosition::Lowest);
        assert_eq!(lock_position(&ordered, "c-3"), LockPosition::Behind { neighbor: "b-2" });
        assert_eq!(lock_position(&ordered, "d-4"), LockPosition::Missing);
    }

    #[test]
    fn negative_session_ids_render_as_hex() {
        assert_eq!(lock_node_prefix(-1, 0), "lock-ffffffffffffffff-0-");
    }

    proptest! {
        #[test]
        fn ordered_sequences_ascend(seqs in prop::collection::hash_set(0u64..10_000_000_000, 0..32)) {
            let siblings: Vec<String> = seqs.iter().map(|seq| format!("lock-x-0-{seq:010}")).collect();
            let order = order_siblings(&siblings);
            prop_assert_eq!(order.ordered.len(), siblings.len());
            let parsed: Vec<u64> = order.ordered.iter().filter_map(|name| sequence_of(name)).collect();
            prop_assert!(parsed.windows(2).all(|pair| pair[0] < pair[1]));
        }

        #[test]
        fn exactly_one_sibling_is_lowest(seqs in prop::collection::hash_set(0u64..1_000_000, 1..32)) {
            let siblings: Vec<String> = seqs.iter().map(|seq| format!("lock-x-{seq}-{seq:010}")).collect();
            let order = order_siblings(&siblings);
            let lowest = order
                .ordered
                .iter()
                .filter(|own| lock_position(&order.ordered, own) == LockPosition::Lowest)
                .count();
            prop_assert_eq!(lowest, 1);
        }
    }
}
