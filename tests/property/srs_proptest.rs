//! Property-based tests for the SRS table and the reconciliation rule

use chrono::{TimeDelta, TimeZone, Utc};
use kioku::client::offline::{reconcile, Reconciliation, RowVersion};
use kioku::shared::srs;
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_next_stage_stays_in_range(stage in 1u8..=8, meaning in 0u32..20, reading in 0u32..20) {
        let next = srs::next_stage(stage, meaning, reading);
        prop_assert!((srs::FIRST_REVIEW_STAGE..=srs::BURNED_STAGE).contains(&next));
        if meaning + reading == 0 {
            prop_assert_eq!(next, stage + 1);
        } else {
            prop_assert!(next <= stage);
        }
    }

    #[test]
    fn test_reviews_unlock_on_the_hour(stage in 1u8..=8, minutes in 0i64..100_000) {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(minutes);
        let due = srs::next_review_at(stage, at).expect("reviewable stage");
        prop_assert!(due > at - TimeDelta::hours(1));
        prop_assert_eq!(srs::floor_to_hour(due), due);
    }

    #[test]
    fn test_older_versions_never_win(stored in 0i64..10_000, incoming in 0i64..10_000, pending in any::<bool>()) {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let row = RowVersion::new(base + TimeDelta::seconds(stored))
            .with_pending(pending.then_some(base));
        let outcome = reconcile(Some(&row), base + TimeDelta::seconds(incoming));

        prop_assert_eq!(outcome.writes(), incoming >= stored);
        if outcome.writes() {
            let expected = if pending { Reconciliation::ReplaceShadowed } else { Reconciliation::Replace };
            prop_assert_eq!(outcome, expected);
        }
    }
}
