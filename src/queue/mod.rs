//! Stage job queue: durable, idempotent, retry-aware.
//!
//! Jobs are rows in the shared SQLite store. A partial unique index over
//! live (waiting/active) jobs makes duplicate enqueues collapse by
//! idempotency key; claims run under `BEGIN IMMEDIATE` so concurrent
//! workers never double-claim. Jobs that exhaust their stage's retry
//! ceiling move to a dead-letter status and are never re-processed
//! automatically.

mod job;
mod retry;

pub use job::{JobPayload, JobStatus, Stage, StageJob};
pub use retry::{BackoffKind, RetryPolicy, StagePolicies};

use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, Row};
use tracing::warn;

use crate::repository::{connect, to_option, Result};

/// Options for a single enqueue.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Higher runs first; orders cross-scan fairness, not intra-scan order.
    pub priority: i32,
    /// Earliest execution delay.
    pub delay: Option<std::time::Duration>,
}

/// Outcome of reporting a job failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Rescheduled with backoff; the job will run again.
    Rescheduled { next_attempt: u32 },
    /// Retries exhausted; the job was dead-lettered.
    DeadLettered,
}

/// SQLite-backed stage job queue.
pub struct JobQueue {
    db_path: PathBuf,
    policies: StagePolicies,
}

impl JobQueue {
    pub fn new(db_path: &Path, policies: StagePolicies) -> Result<Self> {
        let queue = Self {
            db_path: db_path.to_path_buf(),
            policies,
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stage TEXT NOT NULL,
                scan_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'waiting',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                run_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_error TEXT
            );

            -- Dedup applies to live jobs only: a completed or dead job
            -- does not block a fresh enqueue of the same key.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_live_key
                ON jobs(idempotency_key)
                WHERE status = 'waiting' OR status = 'active';

            CREATE INDEX IF NOT EXISTS idx_jobs_claim
                ON jobs(stage, status, run_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_scan
                ON jobs(scan_id, status);
        "#,
        )?;
        Ok(())
    }

    /// Enqueue a stage job. Returns false when a live job with the same
    /// idempotency key already exists (the enqueue is a no-op).
    pub fn enqueue(&self, payload: &JobPayload, opts: EnqueueOptions) -> Result<bool> {
        let stage = payload.stage();
        let policy = self.policies.for_stage(stage);
        let now = Utc::now();
        let run_at = match opts.delay {
            Some(delay) => {
                now + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero())
            }
            None => now,
        };

        let conn = self.connect()?;
        let rows = conn.execute(
            r#"
            INSERT OR IGNORE INTO jobs (
                stage, scan_id, payload, idempotency_key, priority,
                status, attempts, max_attempts, run_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'waiting', 0, ?6, ?7, ?8)
            "#,
            params![
                stage.as_str(),
                payload.scan_id(),
                serde_json::to_string(payload)?,
                payload.idempotency_key(),
                opts.priority,
                policy.max_attempts,
                run_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(rows > 0)
    }

    /// Atomically claim the next runnable job for a stage, marking it
    /// active and counting the attempt.
    pub fn claim(&self, stage: Stage) -> Result<Option<StageJob>> {
        let conn = self.connect()?;
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result: Result<Option<StageJob>> = (|| {
            let now = Utc::now().to_rfc3339();
            let claimed = to_option(conn.query_row(
                r#"
                SELECT * FROM jobs
                WHERE stage = ?1 AND status = 'waiting' AND run_at <= ?2
                ORDER BY priority DESC, id ASC
                LIMIT 1
                "#,
                params![stage.as_str(), now],
                row_to_job,
            ))?;

            match claimed {
                Some(mut job) => {
                    conn.execute(
                        "UPDATE jobs SET status = 'active', attempts = attempts + 1 WHERE id = ?",
                        params![job.id],
                    )?;
                    job.attempt += 1;
                    Ok(Some(job))
                }
                None => Ok(None),
            }
        })();

        if result.is_ok() {
            conn.execute("COMMIT", [])?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }
        result
    }

    /// Mark a claimed job completed.
    pub fn complete(&self, job_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE jobs SET status = 'completed' WHERE id = ?",
            params![job_id],
        )?;
        Ok(())
    }

    /// Report a failed execution: reschedule with the stage's backoff, or
    /// dead-letter once the attempt ceiling is reached.
    pub fn fail(&self, job: &StageJob, error: &str) -> Result<FailOutcome> {
        let policy = self.policies.for_stage(job.payload.stage());
        let conn = self.connect()?;

        if job.attempt >= job.max_attempts {
            conn.execute(
                "UPDATE jobs SET status = 'dead', last_error = ?1 WHERE id = ?2",
                params![error, job.id],
            )?;
            warn!(
                "Job {} ({}) dead-lettered after {} attempts: {}",
                job.id,
                job.payload.stage().as_str(),
                job.attempt,
                error
            );
            return Ok(FailOutcome::DeadLettered);
        }

        let delay = policy.delay_after(job.attempt);
        let run_at =
            Utc::now() + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::zero());
        conn.execute(
            r#"
            UPDATE jobs SET status = 'waiting', run_at = ?1, last_error = ?2
            WHERE id = ?3
            "#,
            params![run_at.to_rfc3339(), error, job.id],
        )?;
        Ok(FailOutcome::Rescheduled {
            next_attempt: job.attempt + 1,
        })
    }

    /// Jobs for a scan not yet in a terminal queue state.
    pub fn live_count(&self, scan_id: &str) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE scan_id = ? AND status IN ('waiting', 'active')",
            params![scan_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Dead-lettered jobs for a scan.
    pub fn dead_jobs(&self, scan_id: &str) -> Result<Vec<StageJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE scan_id = ? AND status = 'dead' ORDER BY id ASC",
        )?;
        let jobs = stmt
            .query_map(params![scan_id], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<StageJob> {
    let payload: String = row.get("payload")?;
    let payload: JobPayload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })?;
    Ok(StageJob {
        id: row.get("id")?,
        payload,
        priority: row.get("priority")?,
        attempt: row.get::<_, i64>("attempts")? as u32,
        max_attempts: row.get::<_, i64>("max_attempts")? as u32,
    })
}
