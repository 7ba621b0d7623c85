//! Property-based tests for page commits and cursor movement

use crate::common::{memory_db, ts, voice_actor};
use chrono::TimeDelta;
use kioku::client::local_db::sync::Checkpoint;
use kioku::client::remote::ResourceItems;
use kioku::shared::Resource;
use proptest::prelude::*;

/// One page commit: item stamps (minutes after 01:00), watermark, and
/// whether more pages follow
type PageCommit = (Vec<(i64, i64)>, Option<i64>, bool);

fn page_commit() -> impl Strategy<Value = PageCommit> {
    (
        prop::collection::vec((1i64..20, 0i64..600), 0..4),
        prop::option::of(0i64..600),
        any::<bool>(),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_cursor_never_moves_backwards(pages in prop::collection::vec(page_commit(), 1..12)) {
        runtime().block_on(async {
            let db = memory_db().await;
            let stamp = |minutes: i64| ts(1, 0) + TimeDelta::minutes(minutes);
            let mut previous = None;

            for (index, (items, watermark, more)) in pages.into_iter().enumerate() {
                let actors = items.iter().map(|(id, at)| voice_actor(*id, stamp(*at))).collect();
                let watermark = watermark.map(stamp);
                let checkpoint = if more {
                    Checkpoint::Resume { token: index.to_string(), watermark }
                } else {
                    Checkpoint::Complete { watermark }
                };
                db.commit_page(&ResourceItems::VoiceActors(actors), &checkpoint)
                    .await
                    .expect("page committed");

                let state = db.cursor_state(Resource::VoiceActors).await.expect("cursor");
                prop_assert!(state.cursor >= previous, "cursor went from {:?} to {:?}", previous, state.cursor);
                if !more {
                    prop_assert_eq!(state.resume_token, None);
                    prop_assert!(state.cursor >= watermark);
                }
                previous = state.cursor;
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_stored_rows_keep_newest_version(updates in prop::collection::vec((1i64..5, 0i64..600), 1..30)) {
        runtime().block_on(async {
            let db = memory_db().await;
            let stamp = |minutes: i64| ts(1, 0) + TimeDelta::minutes(minutes);

            for (id, at) in &updates {
                let page = ResourceItems::VoiceActors(vec![voice_actor(*id, stamp(*at))]);
                db.commit_page(&page, &Checkpoint::None).await.expect("page committed");
            }

            let stored = db.get_voice_actors().await.expect("voice actors");
            for actor in stored {
                let newest = updates
                    .iter()
                    .filter(|(id, _)| *id == actor.id)
                    .map(|(_, at)| stamp(*at))
                    .max();
                prop_assert_eq!(Some(actor.data_updated_at), newest);
            }
            Ok(())
        })?;
    }
}
