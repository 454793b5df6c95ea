//! Postgres stores against a real database.
//!
//! Needs a Docker daemon for the Postgres container.

mod common;

use std::sync::Arc;

use arena_core::common::now_millis;
use arena_core::domains::contests::{
    Arena, Contest, ContestRound, ContestStore, Feature, FeatureOrigin, Participant,
    ParticipantRole, PlayerState, PostgresContestStore, RoundPhase,
};
use arena_core::kernel::jobs::{
    Job, JobHistory, JobMethod, JobState, JobStore, PostgresJobStore, QueueService, ReplyEnvelope,
    ReplyState,
};
use arena_core::kernel::TestBroker;
use common::migrated_pool;

async fn job_store() -> PostgresJobStore {
    PostgresJobStore::new(migrated_pool().await.unwrap())
}

#[tokio::test]
async fn concurrent_claims_never_share_a_job() {
    let store = Arc::new(job_store().await);
    for i in 0..20 {
        store
            .insert(Job::builder().url(format!("http://x/{i}")).build())
            .await
            .unwrap();
    }

    let now = now_millis();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = store.claim_next(now).await.unwrap() {
                assert_eq!(job.state, JobState::Request);
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}

#[tokio::test]
async fn claims_skip_future_jobs() {
    let store = job_store().await;
    let now = now_millis();
    let later = store
        .insert(Job::builder().url("later").send_at(now + 60_000).build())
        .await
        .unwrap();
    let due = store.insert(Job::builder().url("due").build()).await.unwrap();

    assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, due.id);
    assert!(store.claim_next(now).await.unwrap().is_none());
    assert_eq!(store.claim_next(now + 60_000).await.unwrap().unwrap().id, later.id);
}

#[tokio::test]
async fn stale_transition_is_refused() {
    let store = job_store().await;
    let job = store.insert(Job::builder().build()).await.unwrap();

    let mut next = job.clone();
    next.state = JobState::Complete;
    let history = JobHistory::new(job.id, JobState::Request, JobState::Complete, "", "");
    assert!(store
        .save_transition(&next, JobState::Request, history)
        .await
        .unwrap()
        .is_none());
    assert!(store.history(job.id).await.unwrap().is_empty());
    assert_eq!(store.find(job.id).await.unwrap().unwrap().state, JobState::Idle);

    let history = JobHistory::new(job.id, JobState::Idle, JobState::Complete, "done", "42");
    let saved = store
        .save_transition(&next, JobState::Idle, history)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.state, JobState::Complete);
    let latest = store.latest_history(job.id).await.unwrap().unwrap();
    assert_eq!(latest.message, "done");
    assert_eq!(latest.data, "42");
}

#[tokio::test]
async fn failed_child_fails_the_batch() {
    let broker = Arc::new(TestBroker::new());
    let queue = QueueService::new(Arc::new(job_store().await), broker.clone());
    let (batch, children) = queue
        .add_batch(
            "arena.contest.c1.role_call",
            vec![
                Job::builder().channel("arena.contest.c1.role_call.a").url("http://a/health").build(),
                Job::builder().channel("arena.contest.c1.role_call.b").url("http://b/health").build(),
            ],
        )
        .await
        .unwrap();
    assert_eq!(batch.method, JobMethod::Final);

    let a = queue.get_next().await.unwrap().unwrap();
    let b = queue.get_next().await.unwrap().unwrap();
    assert_eq!(a.id, children[0].id);
    assert_eq!(b.id, children[1].id);

    queue.update_state(a.id, JobState::Complete, "ok", None, 0).await.unwrap();
    let current = queue.store().find(batch.id).await.unwrap().unwrap();
    assert_eq!(current.state, JobState::Request);

    queue.update_state(b.id, JobState::Fail, "down", None, 0).await.unwrap();
    let current = queue.store().find(batch.id).await.unwrap().unwrap();
    assert_eq!(current.state, JobState::Fail);
    assert!(queue.get_next().await.unwrap().is_none());

    let finals = broker.messages_matching("arena.contest.c1.role_call");
    assert_eq!(finals.len(), 1);
    let envelope = ReplyEnvelope::parse(&finals[0].text()).unwrap();
    assert_eq!(envelope.state, ReplyState::Fail);
    assert_eq!(envelope.child_data.unwrap().len(), 2);
}

// =============================================================================
// Contests
// =============================================================================

struct Seeded {
    store: PostgresContestStore,
    contest: Contest,
    players: Vec<Participant>,
}

/// Arena plus a contest seating `names` as players, in that order.
async fn seed(names: &[&str]) -> Seeded {
    let store = PostgresContestStore::new(migrated_pool().await.unwrap());
    let arena = store
        .insert_arena(Arena::builder().name("Pit").build(), vec![])
        .await
        .unwrap();

    let mut players = Vec::new();
    for name in names {
        let participant = Participant::builder()
            .name(*name)
            .role(ParticipantRole::Player)
            .endpoint(format!("http://{name}.test"))
            .build();
        players.push(store.insert_participant(participant).await.unwrap());
    }

    let contest = store
        .insert_contest(
            Contest::builder().name("Cup").arena_id(arena.id).build(),
            players.iter().map(|p| p.id).collect(),
        )
        .await
        .unwrap();
    Seeded {
        store,
        contest,
        players,
    }
}

#[tokio::test]
async fn participants_and_player_states_follow_seat_order() {
    let seeded = seed(&["zed", "amy", "bob"]).await;
    let store = &seeded.store;

    let names: Vec<_> = store
        .participants(seeded.contest.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["zed", "amy", "bob"]);

    let round = ContestRound::new(seeded.contest.id, 0, RoundPhase::CreatingRound);
    // Inserted out of seat order on purpose.
    let states = seeded
        .players
        .iter()
        .rev()
        .map(|p| {
            PlayerState::builder()
                .round_id(round.id)
                .participant_id(p.id)
                .inventory(vec!["rope".to_string()])
                .build()
        })
        .collect();
    let round = store.create_round(round, states, vec![]).await.unwrap();

    let seated: Vec<_> = store
        .player_states(round.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.participant_id)
        .collect();
    let expected: Vec<_> = seeded.players.iter().map(|p| p.id).collect();
    assert_eq!(seated, expected);

    let found = store.find_round(seeded.contest.id, 0).await.unwrap().unwrap();
    assert_eq!(found.id, round.id);
    assert_eq!(found.state, RoundPhase::CreatingRound);
}

#[tokio::test]
async fn apply_effects_is_all_or_nothing() {
    let seeded = seed(&["amy", "bob"]).await;
    let store = &seeded.store;

    let round = ContestRound::new(seeded.contest.id, 1, RoundPhase::ApplyingEffects);
    let state = PlayerState::builder()
        .round_id(round.id)
        .participant_id(seeded.players[0].id)
        .build();
    let feature = Feature::builder()
        .round_id(round.id)
        .name("Boulder")
        .position("1,1")
        .origin(FeatureOrigin::Random)
        .build();
    store
        .create_round(round.clone(), vec![state.clone()], vec![feature.clone()])
        .await
        .unwrap();

    let mut changed = state.clone();
    changed.score = 50;
    changed.position = "2,3".to_string();
    let ghost = PlayerState::builder()
        .round_id(round.id)
        .participant_id(seeded.players[1].id)
        .build();
    assert!(store
        .apply_effects(vec![changed.clone(), ghost], vec![])
        .await
        .is_err());
    assert_eq!(store.player_states(round.id).await.unwrap()[0].score, 0);

    let mut moved = feature.clone();
    moved.position = "4,4".to_string();
    store.apply_effects(vec![changed], vec![moved]).await.unwrap();

    let stored = &store.player_states(round.id).await.unwrap()[0];
    assert_eq!(stored.score, 50);
    assert_eq!(stored.position, "2,3");
    assert_eq!(stored.inventory, Vec::<String>::new());
    let features = store.features(round.id).await.unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].position, "4,4");
}
