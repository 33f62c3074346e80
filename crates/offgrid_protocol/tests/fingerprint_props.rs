//! Property tests for fingerprints and the entry status machine.

use offgrid_protocol::{EntryStatus, Fingerprint, Request};
use proptest::prelude::*;

fn query_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z]{1,4}", "[a-z0-9]{0,4}", 0..5)
        .prop_map(|m| m.into_iter().collect())
}

fn status() -> impl Strategy<Value = EntryStatus> {
    prop_oneof![
        Just(EntryStatus::Pending),
        Just(EntryStatus::Submitting),
        Just(EntryStatus::Submitted),
        Just(EntryStatus::Failed),
    ]
}

fn to_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

proptest! {
    #[test]
    fn query_permutations_share_a_fingerprint(pairs in query_pairs(), seed in any::<u64>()) {
        let mut shuffled = pairs.clone();
        let len = shuffled.len();
        if len > 1 {
            shuffled.rotate_left((seed as usize) % len);
        }
        let a = Request::get(format!("/items?{}", to_query(&pairs)));
        let b = Request::get(format!("/items?{}", to_query(&shuffled)));
        prop_assert_eq!(Fingerprint::of(&a, &[]), Fingerprint::of(&b, &[]));
    }

    #[test]
    fn submitted_is_terminal(next in status()) {
        prop_assert!(!EntryStatus::Submitted.can_transition_to(next));
    }

    #[test]
    fn failed_never_skips_pending(next in status()) {
        prop_assert_eq!(
            EntryStatus::Failed.can_transition_to(next),
            next == EntryStatus::Pending
        );
    }
}
