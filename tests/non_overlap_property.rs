//! Property test for the non-overlap invariant.
//!
//! Models a cluster of concurrent submissions as a sequence of reservation
//! attempts against the closed-interval overlap test: whatever subset
//! survives must be pairwise disjoint, and every refused window must
//! genuinely conflict with a survivor.

use chrono::{Duration, TimeZone, Utc};
use overtime_approval_service::models::request::Window;
use proptest::prelude::*;

fn window_at(offset_minutes: i64, length_minutes: i64) -> Window {
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    Window {
        starts_at: base + Duration::minutes(offset_minutes),
        ends_at: base + Duration::minutes(offset_minutes + length_minutes),
    }
}

proptest! {
    #[test]
    fn survivors_of_a_submission_storm_never_overlap(
        specs in prop::collection::vec((0i64..10_000, 1i64..600), 1..40)
    ) {
        let mut accepted: Vec<Window> = Vec::new();
        let mut refused: Vec<Window> = Vec::new();

        for (offset, length) in specs {
            let window = window_at(offset, length);
            if accepted.iter().any(|held| held.overlaps(&window)) {
                refused.push(window);
            } else {
                accepted.push(window);
            }
        }

        // The invariant: at most one survivor per overlapping cluster.
        for (index, first) in accepted.iter().enumerate() {
            for second in &accepted[index + 1..] {
                prop_assert!(
                    !first.overlaps(second),
                    "accepted windows overlap: {first:?} vs {second:?}"
                );
            }
        }

        // No spurious refusals: every refused window conflicts with a survivor.
        for window in &refused {
            prop_assert!(accepted.iter().any(|held| held.overlaps(window)));
        }
    }

    #[test]
    fn overlap_test_is_symmetric(
        (a_off, a_len) in (0i64..10_000, 1i64..600),
        (b_off, b_len) in (0i64..10_000, 1i64..600),
    ) {
        let a = window_at(a_off, a_len);
        let b = window_at(b_off, b_len);
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    #[test]
    fn a_window_always_overlaps_itself((off, len) in (0i64..10_000, 1i64..600)) {
        let w = window_at(off, len);
        prop_assert!(w.overlaps(&w));
    }
}
