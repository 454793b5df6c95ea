//! Contest persistence.
//!
//! [`ContestStore`] is the session the machines commit through. Every method
//! is one unit of work; the multi-row writes (`create_round`,
//! `apply_effects`) are transactional.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::models::{
    Arena, ArenaFeature, Contest, ContestRound, Feature, JudgeResult, Participant, PlayerAction,
    PlayerState,
};
use crate::common::{ArenaId, ContestId, ParticipantId, RoundId};

#[async_trait]
pub trait ContestStore: Send + Sync {
    // ------------------------------------------------------------------
    // Contests, arenas, participants
    // ------------------------------------------------------------------

    async fn insert_arena(&self, arena: Arena, features: Vec<ArenaFeature>) -> Result<Arena>;

    async fn insert_participant(&self, participant: Participant) -> Result<Participant>;

    /// Insert a contest with its participants, seated in the given order.
    async fn insert_contest(&self, contest: Contest, participants: Vec<ParticipantId>)
        -> Result<Contest>;

    async fn find_contest(&self, id: ContestId) -> Result<Option<Contest>>;

    /// Contests not yet in `complete` or `fail`.
    async fn unfinished_contests(&self) -> Result<Vec<Contest>>;

    /// Persist state, current round and winner.
    async fn update_contest(&self, contest: &Contest) -> Result<()>;

    async fn find_arena(&self, id: ArenaId) -> Result<Option<Arena>>;

    async fn arena_features(&self, arena_id: ArenaId) -> Result<Vec<ArenaFeature>>;

    /// Participants of a contest in seat order.
    async fn participants(&self, contest_id: ContestId) -> Result<Vec<Participant>>;

    // ------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------

    async fn find_round(&self, contest_id: ContestId, round_no: i32) -> Result<Option<ContestRound>>;

    async fn latest_round(&self, contest_id: ContestId) -> Result<Option<ContestRound>>;

    /// Insert a round together with its player states and features.
    async fn create_round(
        &self,
        round: ContestRound,
        player_states: Vec<PlayerState>,
        features: Vec<Feature>,
    ) -> Result<ContestRound>;

    /// Persist narrative, ending narrative and state.
    async fn update_round(&self, round: &ContestRound) -> Result<()>;

    // ------------------------------------------------------------------
    // Round contents
    // ------------------------------------------------------------------

    async fn features(&self, round_id: RoundId) -> Result<Vec<Feature>>;

    async fn add_features(&self, features: Vec<Feature>) -> Result<()>;

    async fn player_states(&self, round_id: RoundId) -> Result<Vec<PlayerState>>;

    /// Write changed player states and features together.
    async fn apply_effects(&self, players: Vec<PlayerState>, features: Vec<Feature>) -> Result<()>;

    async fn add_player_action(&self, action: PlayerAction) -> Result<PlayerAction>;

    /// Actions of a round in creation order.
    async fn player_actions(&self, round_id: RoundId) -> Result<Vec<PlayerAction>>;

    async fn add_judge_result(&self, result: JudgeResult) -> Result<JudgeResult>;

    async fn judge_results(&self, round_id: RoundId) -> Result<Vec<JudgeResult>>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryContests {
    arenas: Vec<Arena>,
    arena_features: Vec<ArenaFeature>,
    participants: Vec<Participant>,
    /// (contest, participant), in seat order.
    seats: Vec<(ContestId, ParticipantId)>,
    contests: Vec<Contest>,
    rounds: Vec<ContestRound>,
    features: Vec<Feature>,
    player_states: Vec<PlayerState>,
    actions: Vec<PlayerAction>,
    judge_results: Vec<JudgeResult>,
}

/// In-memory contest store for tests and embedded use.
#[derive(Default)]
pub struct MemoryContestStore {
    inner: Mutex<MemoryContests>,
}

impl MemoryContestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every round of a contest, by round number.
    pub async fn rounds(&self, contest_id: ContestId) -> Vec<ContestRound> {
        let inner = self.inner.lock().await;
        let mut rounds: Vec<_> = inner
            .rounds
            .iter()
            .filter(|r| r.contest_id == contest_id)
            .cloned()
            .collect();
        rounds.sort_by_key(|r| r.round_no);
        rounds
    }
}

#[async_trait]
impl ContestStore for MemoryContestStore {
    async fn insert_arena(&self, arena: Arena, features: Vec<ArenaFeature>) -> Result<Arena> {
        let mut inner = self.inner.lock().await;
        inner.arenas.push(arena.clone());
        inner.arena_features.extend(features);
        Ok(arena)
    }

    async fn insert_participant(&self, participant: Participant) -> Result<Participant> {
        let mut inner = self.inner.lock().await;
        inner.participants.push(participant.clone());
        Ok(participant)
    }

    async fn insert_contest(
        &self,
        contest: Contest,
        participants: Vec<ParticipantId>,
    ) -> Result<Contest> {
        let mut inner = self.inner.lock().await;
        inner.contests.push(contest.clone());
        inner
            .seats
            .extend(participants.into_iter().map(|p| (contest.id, p)));
        Ok(contest)
    }

    async fn find_contest(&self, id: ContestId) -> Result<Option<Contest>> {
        let inner = self.inner.lock().await;
        Ok(inner.contests.iter().find(|c| c.id == id).cloned())
    }

    async fn unfinished_contests(&self) -> Result<Vec<Contest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .contests
            .iter()
            .filter(|c| !c.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn update_contest(&self, contest: &Contest) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .contests
            .iter_mut()
            .find(|c| c.id == contest.id)
            .with_context(|| format!("contest {} not found", contest.id))?;
        stored.state = contest.state;
        stored.current_round = contest.current_round;
        stored.winner_id = contest.winner_id;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn find_arena(&self, id: ArenaId) -> Result<Option<Arena>> {
        let inner = self.inner.lock().await;
        Ok(inner.arenas.iter().find(|a| a.id == id).cloned())
    }

    async fn arena_features(&self, arena_id: ArenaId) -> Result<Vec<ArenaFeature>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .arena_features
            .iter()
            .filter(|f| f.arena_id == arena_id)
            .cloned()
            .collect())
    }

    async fn participants(&self, contest_id: ContestId) -> Result<Vec<Participant>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .seats
            .iter()
            .filter(|(c, _)| *c == contest_id)
            .filter_map(|(_, p)| inner.participants.iter().find(|x| x.id == *p).cloned())
            .collect())
    }

    async fn find_round(&self, contest_id: ContestId, round_no: i32) -> Result<Option<ContestRound>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rounds
            .iter()
            .find(|r| r.contest_id == contest_id && r.round_no == round_no)
            .cloned())
    }

    async fn latest_round(&self, contest_id: ContestId) -> Result<Option<ContestRound>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rounds
            .iter()
            .filter(|r| r.contest_id == contest_id)
            .max_by_key(|r| r.round_no)
            .cloned())
    }

    async fn create_round(
        &self,
        round: ContestRound,
        player_states: Vec<PlayerState>,
        features: Vec<Feature>,
    ) -> Result<ContestRound> {
        let mut inner = self.inner.lock().await;
        if inner
            .rounds
            .iter()
            .any(|r| r.contest_id == round.contest_id && r.round_no == round.round_no)
        {
            anyhow::bail!(
                "round {} already exists for contest {}",
                round.round_no,
                round.contest_id
            );
        }
        inner.rounds.push(round.clone());
        inner.player_states.extend(player_states);
        inner.features.extend(features);
        Ok(round)
    }

    async fn update_round(&self, round: &ContestRound) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let stored = inner
            .rounds
            .iter_mut()
            .find(|r| r.id == round.id)
            .with_context(|| format!("round {} not found", round.id))?;
        stored.narrative = round.narrative.clone();
        stored.ending_narrative = round.ending_narrative.clone();
        stored.state = round.state;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn features(&self, round_id: RoundId) -> Result<Vec<Feature>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .features
            .iter()
            .filter(|f| f.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn add_features(&self, features: Vec<Feature>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.features.extend(features);
        Ok(())
    }

    async fn player_states(&self, round_id: RoundId) -> Result<Vec<PlayerState>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .player_states
            .iter()
            .filter(|s| s.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn apply_effects(&self, players: Vec<PlayerState>, features: Vec<Feature>) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Validate everything before touching anything.
        for player in &players {
            if !inner.player_states.iter().any(|s| s.id == player.id) {
                anyhow::bail!("player state {} not found", player.id);
            }
        }
        for feature in &features {
            if !inner.features.iter().any(|f| f.id == feature.id) {
                anyhow::bail!("feature {} not found", feature.id);
            }
        }

        for player in players {
            if let Some(stored) = inner.player_states.iter_mut().find(|s| s.id == player.id) {
                *stored = player;
            }
        }
        for feature in features {
            if let Some(stored) = inner.features.iter_mut().find(|f| f.id == feature.id) {
                stored.description = feature.description;
                stored.position = feature.position;
            }
        }
        Ok(())
    }

    async fn add_player_action(&self, action: PlayerAction) -> Result<PlayerAction> {
        let mut inner = self.inner.lock().await;
        inner.actions.push(action.clone());
        Ok(action)
    }

    async fn player_actions(&self, round_id: RoundId) -> Result<Vec<PlayerAction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .actions
            .iter()
            .filter(|a| a.round_id == round_id)
            .cloned()
            .collect())
    }

    async fn add_judge_result(&self, result: JudgeResult) -> Result<JudgeResult> {
        let mut inner = self.inner.lock().await;
        inner.judge_results.push(result.clone());
        Ok(result)
    }

    async fn judge_results(&self, round_id: RoundId) -> Result<Vec<JudgeResult>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .judge_results
            .iter()
            .filter(|r| r.round_id == round_id)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PostgresContestStore {
    pool: PgPool,
}

impl PostgresContestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContestStore for PostgresContestStore {
    async fn insert_arena(&self, arena: Arena, features: Vec<ArenaFeature>) -> Result<Arena> {
        let mut tx = self.pool.begin().await?;

        let arena = sqlx::query_as::<_, Arena>(
            r#"
            INSERT INTO arenas (id, name, description, width, height, max_random_features, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(arena.id)
        .bind(&arena.name)
        .bind(&arena.description)
        .bind(arena.width)
        .bind(arena.height)
        .bind(arena.max_random_features)
        .bind(arena.created_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert arena")?;

        for feature in &features {
            sqlx::query(
                r#"
                INSERT INTO arena_features (id, arena_id, name, description, position, origin)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(feature.id)
            .bind(feature.arena_id)
            .bind(&feature.name)
            .bind(&feature.description)
            .bind(&feature.position)
            .bind(feature.origin)
            .execute(&mut *tx)
            .await
            .context("failed to insert arena feature")?;
        }

        tx.commit().await?;
        Ok(arena)
    }

    async fn insert_participant(&self, participant: Participant) -> Result<Participant> {
        sqlx::query_as::<_, Participant>(
            r#"
            INSERT INTO participants (id, name, role, endpoint, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(participant.id)
        .bind(&participant.name)
        .bind(participant.role)
        .bind(&participant.endpoint)
        .bind(participant.created_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert participant")
    }

    async fn insert_contest(
        &self,
        contest: Contest,
        participants: Vec<ParticipantId>,
    ) -> Result<Contest> {
        let mut tx = self.pool.begin().await?;

        let contest = sqlx::query_as::<_, Contest>(
            r#"
            INSERT INTO contests (
                id, name, arena_id, current_round, player_positions, player_inventories,
                state, winner_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(contest.id)
        .bind(&contest.name)
        .bind(contest.arena_id)
        .bind(contest.current_round)
        .bind(&contest.player_positions)
        .bind(Json(&contest.player_inventories))
        .bind(contest.state)
        .bind(contest.winner_id)
        .bind(contest.created_at)
        .bind(contest.updated_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert contest")?;

        for (seat, participant_id) in participants.iter().enumerate() {
            sqlx::query(
                "INSERT INTO contest_participants (contest_id, participant_id, seat) VALUES ($1, $2, $3)",
            )
            .bind(contest.id)
            .bind(participant_id)
            .bind(seat as i32)
            .execute(&mut *tx)
            .await
            .context("failed to seat participant")?;
        }

        tx.commit().await?;
        Ok(contest)
    }

    async fn find_contest(&self, id: ContestId) -> Result<Option<Contest>> {
        let contest = sqlx::query_as::<_, Contest>("SELECT * FROM contests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(contest)
    }

    async fn unfinished_contests(&self) -> Result<Vec<Contest>> {
        let contests = sqlx::query_as::<_, Contest>(
            "SELECT * FROM contests WHERE state NOT IN ('complete', 'fail') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(contests)
    }

    async fn update_contest(&self, contest: &Contest) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contests
            SET state = $2, current_round = $3, winner_id = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(contest.id)
        .bind(contest.state)
        .bind(contest.current_round)
        .bind(contest.winner_id)
        .execute(&self.pool)
        .await
        .context("failed to update contest")?;
        Ok(())
    }

    async fn find_arena(&self, id: ArenaId) -> Result<Option<Arena>> {
        let arena = sqlx::query_as::<_, Arena>("SELECT * FROM arenas WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(arena)
    }

    async fn arena_features(&self, arena_id: ArenaId) -> Result<Vec<ArenaFeature>> {
        let features = sqlx::query_as::<_, ArenaFeature>(
            "SELECT * FROM arena_features WHERE arena_id = $1 ORDER BY id",
        )
        .bind(arena_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(features)
    }

    async fn participants(&self, contest_id: ContestId) -> Result<Vec<Participant>> {
        let participants = sqlx::query_as::<_, Participant>(
            r#"
            SELECT p.*
            FROM participants p
            JOIN contest_participants cp ON cp.participant_id = p.id
            WHERE cp.contest_id = $1
            ORDER BY cp.seat
            "#,
        )
        .bind(contest_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(participants)
    }

    async fn find_round(&self, contest_id: ContestId, round_no: i32) -> Result<Option<ContestRound>> {
        let round = sqlx::query_as::<_, ContestRound>(
            "SELECT * FROM contest_rounds WHERE contest_id = $1 AND round_no = $2",
        )
        .bind(contest_id)
        .bind(round_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn latest_round(&self, contest_id: ContestId) -> Result<Option<ContestRound>> {
        let round = sqlx::query_as::<_, ContestRound>(
            "SELECT * FROM contest_rounds WHERE contest_id = $1 ORDER BY round_no DESC LIMIT 1",
        )
        .bind(contest_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(round)
    }

    async fn create_round(
        &self,
        round: ContestRound,
        player_states: Vec<PlayerState>,
        features: Vec<Feature>,
    ) -> Result<ContestRound> {
        let mut tx = self.pool.begin().await?;

        let round = sqlx::query_as::<_, ContestRound>(
            r#"
            INSERT INTO contest_rounds (
                id, contest_id, round_no, narrative, ending_narrative, state, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(round.id)
        .bind(round.contest_id)
        .bind(round.round_no)
        .bind(&round.narrative)
        .bind(&round.ending_narrative)
        .bind(round.state)
        .bind(round.created_at)
        .bind(round.updated_at)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert round")?;

        for state in &player_states {
            sqlx::query(
                r#"
                INSERT INTO player_states (id, round_id, participant_id, position, inventory, health, score)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(state.id)
            .bind(state.round_id)
            .bind(state.participant_id)
            .bind(&state.position)
            .bind(&state.inventory)
            .bind(state.health)
            .bind(state.score)
            .execute(&mut *tx)
            .await
            .context("failed to insert player state")?;
        }

        for feature in &features {
            insert_feature(&mut *tx, feature).await?;
        }

        tx.commit().await?;
        Ok(round)
    }

    async fn update_round(&self, round: &ContestRound) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE contest_rounds
            SET narrative = $2, ending_narrative = $3, state = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(round.id)
        .bind(&round.narrative)
        .bind(&round.ending_narrative)
        .bind(round.state)
        .execute(&self.pool)
        .await
        .context("failed to update round")?;
        Ok(())
    }

    async fn features(&self, round_id: RoundId) -> Result<Vec<Feature>> {
        let features = sqlx::query_as::<_, Feature>(
            "SELECT * FROM features WHERE round_id = $1 ORDER BY created_at, id",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(features)
    }

    async fn add_features(&self, features: Vec<Feature>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for feature in &features {
            insert_feature(&mut *tx, feature).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn player_states(&self, round_id: RoundId) -> Result<Vec<PlayerState>> {
        let states = sqlx::query_as::<_, PlayerState>(
            r#"
            SELECT ps.*
            FROM player_states ps
            JOIN contest_rounds r ON r.id = ps.round_id
            LEFT JOIN contest_participants cp
                ON cp.contest_id = r.contest_id AND cp.participant_id = ps.participant_id
            WHERE ps.round_id = $1
            ORDER BY cp.seat, ps.id
            "#,
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(states)
    }

    async fn apply_effects(&self, players: Vec<PlayerState>, features: Vec<Feature>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Dropping `tx` on an early return rolls everything back.
        for player in &players {
            let updated = sqlx::query(
                r#"
                UPDATE player_states
                SET position = $2, inventory = $3, health = $4, score = $5
                WHERE id = $1
                "#,
            )
            .bind(player.id)
            .bind(&player.position)
            .bind(&player.inventory)
            .bind(player.health)
            .bind(player.score)
            .execute(&mut *tx)
            .await
            .context("failed to update player state")?;
            if updated.rows_affected() == 0 {
                anyhow::bail!("player state {} not found", player.id);
            }
        }

        for feature in &features {
            let updated =
                sqlx::query("UPDATE features SET description = $2, position = $3 WHERE id = $1")
                    .bind(feature.id)
                    .bind(&feature.description)
                    .bind(&feature.position)
                    .execute(&mut *tx)
                    .await
                    .context("failed to update feature")?;
            if updated.rows_affected() == 0 {
                anyhow::bail!("feature {} not found", feature.id);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn add_player_action(&self, action: PlayerAction) -> Result<PlayerAction> {
        sqlx::query_as::<_, PlayerAction>(
            r#"
            INSERT INTO player_actions (id, round_id, participant_id, action, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(action.id)
        .bind(action.round_id)
        .bind(action.participant_id)
        .bind(&action.action)
        .bind(&action.payload)
        .bind(action.created_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert player action")
    }

    async fn player_actions(&self, round_id: RoundId) -> Result<Vec<PlayerAction>> {
        let actions = sqlx::query_as::<_, PlayerAction>(
            "SELECT * FROM player_actions WHERE round_id = $1 ORDER BY created_at, id",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(actions)
    }

    async fn add_judge_result(&self, result: JudgeResult) -> Result<JudgeResult> {
        sqlx::query_as::<_, JudgeResult>(
            r#"
            INSERT INTO judge_results (id, round_id, action_id, judge_id, verdict, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(result.id)
        .bind(result.round_id)
        .bind(result.action_id)
        .bind(result.judge_id)
        .bind(&result.verdict)
        .bind(result.created_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert judge result")
    }

    async fn judge_results(&self, round_id: RoundId) -> Result<Vec<JudgeResult>> {
        let results = sqlx::query_as::<_, JudgeResult>(
            "SELECT * FROM judge_results WHERE round_id = $1 ORDER BY created_at, id",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(results)
    }
}

async fn insert_feature<'e, E>(executor: E, feature: &Feature) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO features (id, round_id, name, description, position, origin, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(feature.id)
    .bind(feature.round_id)
    .bind(&feature.name)
    .bind(&feature.description)
    .bind(&feature.position)
    .bind(feature.origin)
    .bind(feature.created_at)
    .execute(executor)
    .await
    .context("failed to insert feature")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::contests::models::{ParticipantRole, RoundPhase};

    #[tokio::test]
    async fn participants_come_back_in_seat_order() {
        let store = MemoryContestStore::new();
        let arena = store
            .insert_arena(Arena::builder().name("Pit").build(), vec![])
            .await
            .unwrap();
        let mut ids = Vec::new();
        for name in ["zed", "amy", "bob"] {
            let p = Participant::builder()
                .name(name)
                .role(ParticipantRole::Player)
                .endpoint(format!("http://{name}"))
                .build();
            ids.push(store.insert_participant(p).await.unwrap().id);
        }
        let contest = store
            .insert_contest(Contest::builder().arena_id(arena.id).build(), ids.clone())
            .await
            .unwrap();

        let seated: Vec<_> = store
            .participants(contest.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(seated, ids);
    }

    #[tokio::test]
    async fn round_numbers_are_unique_per_contest() {
        let store = MemoryContestStore::new();
        let contest_id = ContestId::new();
        store
            .create_round(ContestRound::new(contest_id, 0, RoundPhase::Idle), vec![], vec![])
            .await
            .unwrap();
        assert!(store
            .create_round(ContestRound::new(contest_id, 0, RoundPhase::Idle), vec![], vec![])
            .await
            .is_err());
        assert_eq!(store.latest_round(contest_id).await.unwrap().unwrap().round_no, 0);
    }

    #[tokio::test]
    async fn apply_effects_is_all_or_nothing() {
        let store = MemoryContestStore::new();
        let round = ContestRound::new(ContestId::new(), 1, RoundPhase::InProgress);
        let state = PlayerState::builder()
            .round_id(round.id)
            .participant_id(ParticipantId::new())
            .build();
        store
            .create_round(round.clone(), vec![state.clone()], vec![])
            .await
            .unwrap();

        let mut changed = state.clone();
        changed.score = 50;
        let ghost = PlayerState::builder()
            .round_id(round.id)
            .participant_id(ParticipantId::new())
            .build();
        assert!(store.apply_effects(vec![changed.clone(), ghost], vec![]).await.is_err());
        assert_eq!(store.player_states(round.id).await.unwrap()[0].score, 0);

        store.apply_effects(vec![changed], vec![]).await.unwrap();
        assert_eq!(store.player_states(round.id).await.unwrap()[0].score, 50);
    }
}
