//! Persistence for jobs and their history.
//!
//! Every [`JobStore`] method is one atomic unit of work. [`PostgresJobStore`]
//! uses a single statement or an explicit transaction; [`MemoryJobStore`]
//! holds one async mutex for the duration of each call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;

use super::job::{Job, JobHistory, JobState};
use crate::common::JobId;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<Job>;

    /// Insert a batch parent and its children together.
    async fn insert_batch(&self, batch: Job, children: Vec<Job>) -> Result<(Job, Vec<Job>)>;

    async fn find(&self, id: JobId) -> Result<Option<Job>>;

    /// Children of a batch, in creation order.
    async fn children(&self, parent_id: JobId) -> Result<Vec<Job>>;

    /// Atomically take the oldest due idle job and move it to `request`.
    async fn claim_next(&self, now: i64) -> Result<Option<Job>>;

    /// Write `job` and append `history`, but only if the stored state is
    /// still `expected`. Returns `None` when another writer got there first.
    async fn save_transition(
        &self,
        job: &Job,
        expected: JobState,
        history: JobHistory,
    ) -> Result<Option<Job>>;

    async fn latest_history(&self, job_id: JobId) -> Result<Option<JobHistory>>;

    async fn history(&self, job_id: JobId) -> Result<Vec<JobHistory>>;
}

// =============================================================================
// Postgres
// =============================================================================

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_JOB: &str = r#"
    INSERT INTO jobs (
        id, parent_id, channel, data, method, url, priority,
        send_at, state, started_at, finished_at, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    RETURNING *
"#;

const INSERT_HISTORY: &str = r#"
    INSERT INTO job_history (id, job_id, from_state, to_state, message, data, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

fn bind_job<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, Job, sqlx::postgres::PgArguments>,
    job: &'q Job,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, Job, sqlx::postgres::PgArguments> {
    query
        .bind(job.id)
        .bind(job.parent_id)
        .bind(&job.channel)
        .bind(&job.data)
        .bind(job.method)
        .bind(&job.url)
        .bind(job.priority)
        .bind(job.send_at)
        .bind(job.state)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(job.created_at)
}

async fn insert_history<'e, E>(executor: E, history: &JobHistory) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(INSERT_HISTORY)
        .bind(history.id)
        .bind(history.job_id)
        .bind(history.from_state)
        .bind(history.to_state)
        .bind(&history.message)
        .bind(&history.data)
        .bind(history.created_at)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let job = bind_job(sqlx::query_as::<_, Job>(INSERT_JOB), &job)
            .fetch_one(&self.pool)
            .await
            .context("failed to insert job")?;
        Ok(job)
    }

    async fn insert_batch(&self, batch: Job, children: Vec<Job>) -> Result<(Job, Vec<Job>)> {
        let mut tx = self.pool.begin().await?;

        let batch = bind_job(sqlx::query_as::<_, Job>(INSERT_JOB), &batch)
            .fetch_one(&mut *tx)
            .await
            .context("failed to insert batch job")?;

        let mut inserted = Vec::with_capacity(children.len());
        for child in &children {
            let child = bind_job(sqlx::query_as::<_, Job>(INSERT_JOB), child)
                .fetch_one(&mut *tx)
                .await
                .context("failed to insert batch child")?;
            inserted.push(child);
        }

        tx.commit().await?;
        Ok((batch, inserted))
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn children(&self, parent_id: JobId) -> Result<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE parent_id = $1 ORDER BY created_at, id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE state = 'idle' AND send_at <= $1
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET
                state = 'request',
                started_at = CASE WHEN started_at = 0 THEN $1 ELSE started_at END
            WHERE id IN (SELECT id FROM next_job)
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to claim job")?;

        if let Some(job) = &job {
            let history = JobHistory::new(job.id, JobState::Idle, JobState::Request, "dequeued", "");
            insert_history(&mut *tx, &history).await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn save_transition(
        &self,
        job: &Job,
        expected: JobState,
        history: JobHistory,
    ) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = $2, send_at = $3, started_at = $4, finished_at = $5
            WHERE id = $1 AND state = $6
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.state)
        .bind(job.send_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(expected)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update job state")?;

        if updated.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_history(&mut *tx, &history).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn latest_history(&self, job_id: JobId) -> Result<Option<JobHistory>> {
        let row = sqlx::query_as::<_, JobHistory>(
            r#"
            SELECT * FROM job_history
            WHERE job_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn history(&self, job_id: JobId) -> Result<Vec<JobHistory>> {
        let rows = sqlx::query_as::<_, JobHistory>(
            "SELECT * FROM job_history WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
struct MemoryJobs {
    /// Insertion order is creation order.
    jobs: Vec<Job>,
    history: Vec<JobHistory>,
}

/// In-memory job store for tests and embedded use.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryJobs>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job.
    pub async fn all(&self) -> Vec<Job> {
        self.inner.lock().await.jobs.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> Result<Job> {
        let mut inner = self.inner.lock().await;
        inner.jobs.push(job.clone());
        Ok(job)
    }

    async fn insert_batch(&self, batch: Job, children: Vec<Job>) -> Result<(Job, Vec<Job>)> {
        let mut inner = self.inner.lock().await;
        inner.jobs.push(batch.clone());
        inner.jobs.extend(children.iter().cloned());
        Ok((batch, children))
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn children(&self, parent_id: JobId) -> Result<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .iter()
            .filter(|j| j.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn claim_next(&self, now: i64) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let Some(job) = inner.jobs.iter_mut().find(|j| j.is_due(now)) else {
            return Ok(None);
        };

        job.state = JobState::Request;
        if job.started_at == 0 {
            job.started_at = now;
        }
        let claimed = job.clone();

        inner.history.push(JobHistory::new(
            claimed.id,
            JobState::Idle,
            JobState::Request,
            "dequeued",
            "",
        ));
        Ok(Some(claimed))
    }

    async fn save_transition(
        &self,
        job: &Job,
        expected: JobState,
        history: JobHistory,
    ) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let Some(stored) = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id && j.state == expected)
        else {
            return Ok(None);
        };

        stored.state = job.state;
        stored.send_at = job.send_at;
        stored.started_at = job.started_at;
        stored.finished_at = job.finished_at;
        let updated = stored.clone();

        inner.history.push(history);
        Ok(Some(updated))
    }

    async fn latest_history(&self, job_id: JobId) -> Result<Option<JobHistory>> {
        let inner = self.inner.lock().await;
        Ok(inner.history.iter().rev().find(|h| h.job_id == job_id).cloned())
    }

    async fn history(&self, job_id: JobId) -> Result<Vec<JobHistory>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .history
            .iter()
            .filter(|h| h.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::now_millis;
    use std::sync::Arc;

    #[tokio::test]
    async fn claim_is_fifo_and_skips_future_jobs() {
        let store = MemoryJobStore::new();
        let now = now_millis();
        let later = store
            .insert(Job::builder().url("later").send_at(now + 60_000).build())
            .await
            .unwrap();
        let first = store.insert(Job::builder().url("first").build()).await.unwrap();
        let second = store.insert(Job::builder().url("second").build()).await.unwrap();

        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next(now).await.unwrap().unwrap().id, second.id);
        assert!(store.claim_next(now).await.unwrap().is_none());
        assert_eq!(store.claim_next(now + 60_000).await.unwrap().unwrap().id, later.id);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_job() {
        let store = Arc::new(MemoryJobStore::new());
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
    async fn stale_transition_is_refused() {
        let store = MemoryJobStore::new();
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
    }
}
