//! Test fixtures for seeding contests and scripting agents.

use anyhow::Result;
use arena_core::domains::contests::{
    Arena, ArenaFeature, Contest, ContestState, ContestStore, MemoryContestStore, Participant,
    ParticipantRole,
};
use arena_core::kernel::{topics, BrokerMessage, PromptType, TestBroker};
use serde_json::{json, Value};

/// What to seed.
#[derive(Debug, Clone)]
pub struct ContestSetup {
    /// One player per endpoint, in seat order.
    pub player_endpoints: Vec<String>,
    pub max_random_features: i32,
    /// `(name, position)` features defined on the arena.
    pub fixed_features: Vec<(String, String)>,
    pub state: ContestState,
}

impl ContestSetup {
    pub fn players(count: usize) -> Self {
        Self {
            player_endpoints: (0..count)
                .map(|seat| format!("http://player-{}.test", seat))
                .collect(),
            max_random_features: 0,
            fixed_features: vec![("Well".to_string(), "5,5".to_string())],
            state: ContestState::Pending,
        }
    }
}

pub struct ContestFixture {
    pub contest: Contest,
    pub arena: Arena,
    pub players: Vec<Participant>,
    pub arena_agent: Participant,
    pub judge: Participant,
    pub announcer: Participant,
}

impl ContestFixture {
    pub fn player_ids(&self) -> Vec<String> {
        self.players.iter().map(|p| p.id.to_string()).collect()
    }
}

/// Seed an arena, its agents and a contest seating them.
pub async fn seed_contest(store: &MemoryContestStore, setup: ContestSetup) -> Result<ContestFixture> {
    let arena = Arena::builder()
        .name("Test Arena")
        .description("A walled square")
        .max_random_features(setup.max_random_features)
        .build();
    let features = setup
        .fixed_features
        .iter()
        .map(|(name, position)| {
            ArenaFeature::builder()
                .arena_id(arena.id)
                .name(name.clone())
                .position(position.clone())
                .build()
        })
        .collect();
    let arena = store.insert_arena(arena, features).await?;

    let mut players = Vec::new();
    for (seat, endpoint) in setup.player_endpoints.iter().enumerate() {
        players.push(
            store
                .insert_participant(participant(&format!("Player {}", seat), ParticipantRole::Player, endpoint))
                .await?,
        );
    }
    let arena_agent = store
        .insert_participant(participant("Arena", ParticipantRole::Arena, "http://arena-agent.test"))
        .await?;
    let judge = store
        .insert_participant(participant("Judge", ParticipantRole::Judge, "http://judge.test"))
        .await?;
    let announcer = store
        .insert_participant(participant("Announcer", ParticipantRole::Announcer, "http://announcer.test"))
        .await?;

    let seats = players
        .iter()
        .chain([&arena_agent, &judge, &announcer])
        .map(|p| p.id)
        .collect();
    let contest = Contest::builder()
        .name("Test Contest")
        .arena_id(arena.id)
        .state(setup.state)
        .build();
    let contest = store.insert_contest(contest, seats).await?;

    Ok(ContestFixture {
        contest,
        arena,
        players,
        arena_agent,
        judge,
        announcer,
    })
}

fn participant(name: &str, role: ParticipantRole, endpoint: &str) -> Participant {
    Participant::builder()
        .name(name)
        .role(role)
        .endpoint(endpoint)
        .build()
}

// =============================================================================
// Scripted agents
// =============================================================================

/// Participant id of an agent request subject.
pub fn addressee(message: &BrokerMessage) -> String {
    message.subject.split('.').nth(1).unwrap_or_default().to_string()
}

/// Answer every `prompt` request with a complete envelope whose data is the
/// JSON built by `reply` from the request and its body.
pub fn reply_json<F>(broker: &TestBroker, prompt: PromptType, reply: F)
where
    F: Fn(&BrokerMessage, &Value) -> Value + Send + Sync + 'static,
{
    broker.on_publish(&format!("agent.*.{}.request.*", prompt), move |message| {
        let subject = topics::response_for(&message.subject)?;
        let body: Value = serde_json::from_slice(&message.payload).unwrap_or(Value::Null);
        let envelope = json!({
            "state": "complete",
            "data": reply(message, &body).to_string(),
        });
        Some(BrokerMessage::new(subject, envelope.to_string()))
    });
}

/// Answer every `prompt` request with plain text.
pub fn reply_text(broker: &TestBroker, prompt: PromptType, text: &'static str) {
    broker.on_publish(&format!("agent.*.{}.request.*", prompt), move |message| {
        let subject = topics::response_for(&message.subject)?;
        Some(BrokerMessage::new(subject, text))
    });
}

/// Script the players, judge and announcer: players always advance, the
/// judge allows everything and the announcer narrates. Effects and feature
/// generation are left to each test.
pub fn script_agents(broker: &TestBroker) {
    reply_json(broker, PromptType::PlayerAction, |_, _| json!({"action": "advance"}));
    reply_json(broker, PromptType::JudgeAction, |_, body| {
        json!({"verdict": "allowed", "action": body["action"]["action"].clone()})
    });
    reply_text(broker, PromptType::DescribeSetup, "The arena is quiet.");
    reply_text(broker, PromptType::DescribeResults, "The dust settles.");
}

/// Effects reply setting one player's score.
pub fn score_effect(participant_id: &str, score: i32) -> Value {
    json!({"players": [{"participantId": participant_id, "score": score}]})
}
