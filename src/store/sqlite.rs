use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::diagnostic::session::{
    DiagnosticQuestion, DiagnosticResponse, DiagnosticSession, SessionStatus, SessionSummary,
};
use crate::mastery::sequential::CusumState;
use crate::mastery::types::{
    AttemptRecord, Belief, BeliefKey, Difficulty, Evidence, MasteryStatus, SkillId,
};
use crate::store::{
    AttemptLog, BeliefStore, SessionStore, SkillScoreStore, SkillWrite, StatusEntry, StoreError,
};

pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// SQLite-backed store. Every write is a single statement or one transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database at `url` and applies the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Each in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url, "sqlite store ready");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for stmt in split_sql_statements(SCHEMA_SQL) {
            let sql = strip_comment_lines(&stmt);
            if sql.is_empty() {
                continue;
            }
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Splits a schema script on `;`, ignoring semicolons inside quotes.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            ';' if !in_single_quote && !in_double_quote => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

fn strip_comment_lines(stmt: &str) -> String {
    stmt.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn skill_from_db(value: i64) -> Result<SkillId, StoreError> {
    SkillId::try_from(value).map_err(|_| StoreError::Corrupt(format!("skill id out of range: {value}")))
}

fn difficulty_from_db(value: i64) -> Result<Difficulty, StoreError> {
    Difficulty::new(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn count_from_db(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("outcome count out of range: {value}")))
}

async fn upsert_belief(conn: &mut SqliteConnection, write: &SkillWrite, now: i64) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO "skill_beliefs"
           ("user_id", "skill_id", "course_id", "alpha", "beta", "successes", "failures", "updated_at")
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT ("user_id", "skill_id", "course_id")
           DO UPDATE SET "alpha" = excluded."alpha", "beta" = excluded."beta",
                         "successes" = excluded."successes", "failures" = excluded."failures",
                         "updated_at" = excluded."updated_at""#,
    )
    .bind(&write.key.user_id)
    .bind(i64::from(write.key.skill_id))
    .bind(&write.key.course_id)
    .bind(write.belief.alpha)
    .bind(write.belief.beta)
    .bind(i64::from(write.evidence.successes))
    .bind(i64::from(write.evidence.failures))
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_status(conn: &mut SqliteConnection, key: &BeliefKey, entry: &StatusEntry) -> Result<(), StoreError> {
    sqlx::query(
        r#"INSERT INTO "mastery_status" ("user_id", "skill_id", "course_id", "status", "log_likelihood_ratio", "updated_at")
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT ("user_id", "skill_id", "course_id")
           DO UPDATE SET "status" = excluded."status",
                         "log_likelihood_ratio" = excluded."log_likelihood_ratio",
                         "updated_at" = excluded."updated_at""#,
    )
    .bind(&key.user_id)
    .bind(i64::from(key.skill_id))
    .bind(&key.course_id)
    .bind(entry.status.as_str())
    .bind(entry.log_likelihood_ratio)
    .bind(entry.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_cusum(conn: &mut SqliteConnection, key: &BeliefKey, state: &CusumState) -> Result<(), StoreError> {
    let observations = i64::try_from(state.observations).unwrap_or(i64::MAX);
    sqlx::query(
        r#"INSERT INTO "cusum_state" ("user_id", "skill_id", "course_id", "upper", "lower", "observations")
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT ("user_id", "skill_id", "course_id")
           DO UPDATE SET "upper" = excluded."upper", "lower" = excluded."lower",
                         "observations" = excluded."observations""#,
    )
    .bind(&key.user_id)
    .bind(i64::from(key.skill_id))
    .bind(&key.course_id)
    .bind(state.upper)
    .bind(state.lower)
    .bind(observations)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_attempt(conn: &mut SqliteConnection, record: &AttemptRecord) -> Result<(), StoreError> {
    let skill_ids = serde_json::to_string(&record.skill_ids)?;
    sqlx::query(
        r#"INSERT INTO "attempt_events"
           ("user_id", "question_id", "course_id", "skill_ids", "finished", "is_correct", "difficulty", "response_time_ms", "timestamp")
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&record.user_id)
    .bind(&record.question_id)
    .bind(&record.course_id)
    .bind(skill_ids)
    .bind(record.finished)
    .bind(record.is_correct)
    .bind(i64::from(record.difficulty))
    .bind(record.response_time_ms)
    .bind(record.timestamp)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_response(row: &SqliteRow) -> Result<DiagnosticResponse, StoreError> {
    Ok(DiagnosticResponse {
        question_id: row.try_get("question_id")?,
        skill_id: skill_from_db(row.try_get("skill_id")?)?,
        difficulty: difficulty_from_db(row.try_get("difficulty")?)?,
        user_answer: row.try_get("user_answer")?,
        correct_answer: row.try_get("correct_answer")?,
        is_correct: row.try_get("is_correct")?,
        response_time_seconds: row.try_get("response_time_seconds")?,
        answered_at: row.try_get("answered_at")?,
    })
}

#[async_trait]
impl BeliefStore for SqliteStore {
    async fn load_belief(&self, key: &BeliefKey) -> Result<Option<Belief>, StoreError> {
        let row = sqlx::query(
            r#"SELECT "alpha", "beta" FROM "skill_beliefs"
               WHERE "user_id" = ? AND "skill_id" = ? AND "course_id" = ?"#,
        )
        .bind(&key.user_id)
        .bind(i64::from(key.skill_id))
        .bind(&key.course_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok::<_, StoreError>(Belief {
                alpha: r.try_get("alpha")?,
                beta: r.try_get("beta")?,
            })
        })
        .transpose()
    }

    async fn load_evidence(&self, key: &BeliefKey) -> Result<Evidence, StoreError> {
        let row = sqlx::query(
            r#"SELECT "successes", "failures" FROM "skill_beliefs"
               WHERE "user_id" = ? AND "skill_id" = ? AND "course_id" = ?"#,
        )
        .bind(&key.user_id)
        .bind(i64::from(key.skill_id))
        .bind(&key.course_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Evidence::default());
        };
        Ok(Evidence {
            successes: count_from_db(row.try_get("successes")?)?,
            failures: count_from_db(row.try_get("failures")?)?,
        })
    }

    async fn load_status(&self, key: &BeliefKey) -> Result<Option<StatusEntry>, StoreError> {
        let row = sqlx::query(
            r#"SELECT "status", "log_likelihood_ratio", "updated_at" FROM "mastery_status"
               WHERE "user_id" = ? AND "skill_id" = ? AND "course_id" = ?"#,
        )
        .bind(&key.user_id)
        .bind(i64::from(key.skill_id))
        .bind(&key.course_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("status")?;
        let status = MasteryStatus::parse(&raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown mastery status: {raw}")))?;
        Ok(Some(StatusEntry {
            status,
            log_likelihood_ratio: row.try_get("log_likelihood_ratio")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn save_status(&self, key: &BeliefKey, entry: &StatusEntry) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_status(&mut conn, key, entry).await
    }

    async fn load_cusum(&self, key: &BeliefKey) -> Result<Option<CusumState>, StoreError> {
        let row = sqlx::query(
            r#"SELECT "upper", "lower", "observations" FROM "cusum_state"
               WHERE "user_id" = ? AND "skill_id" = ? AND "course_id" = ?"#,
        )
        .bind(&key.user_id)
        .bind(i64::from(key.skill_id))
        .bind(&key.course_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let observations: i64 = r.try_get("observations")?;
            Ok::<_, StoreError>(CusumState {
                upper: r.try_get("upper")?,
                lower: r.try_get("lower")?,
                observations: observations.max(0) as u64,
            })
        })
        .transpose()
    }

    async fn save_cusum(&self, key: &BeliefKey, state: &CusumState) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_cusum(&mut conn, key, state).await
    }
}

#[async_trait]
impl AttemptLog for SqliteStore {
    async fn has_correct_attempt(
        &self,
        user_id: &str,
        course_id: &str,
        question_id: &str,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"SELECT 1 AS "hit" FROM "attempt_events"
               WHERE "user_id" = ? AND "course_id" = ? AND "question_id" = ?
                 AND "finished" = 1 AND "is_correct" = 1
               LIMIT 1"#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn commit_attempt(
        &self,
        writes: &[SkillWrite],
        record: Option<&AttemptRecord>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;
        for write in writes {
            upsert_belief(&mut tx, write, now).await?;
            if let Some(state) = &write.cusum {
                upsert_cusum(&mut tx, &write.key, state).await?;
            }
            if let Some(entry) = &write.status {
                upsert_status(&mut tx, &write.key, entry).await?;
            }
        }
        if let Some(record) = record {
            insert_attempt(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn insert_session(&self, session: &DiagnosticSession) -> Result<(), StoreError> {
        let questions = serde_json::to_string(&session.questions)?;
        let skill_updates = serde_json::to_string(&session.skill_updates)?;
        sqlx::query(
            r#"INSERT INTO "diagnostic_sessions"
               ("id", "user_id", "status", "questions", "current_difficulty", "correct_streak",
                "incorrect_streak", "skill_updates", "created_at")
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.status.as_str())
        .bind(questions)
        .bind(i64::from(session.current_difficulty))
        .bind(i64::from(session.correct_streak))
        .bind(i64::from(session.incorrect_streak))
        .bind(skill_updates)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_response(
        &self,
        session: &DiagnosticSession,
        response: &DiagnosticResponse,
    ) -> Result<(), StoreError> {
        if session.responses.last() != Some(response) {
            return Err(StoreError::Corrupt(format!(
                "response {} is not the last one of session {}",
                response.question_id, session.id
            )));
        }
        let seq = session.responses.len() - 1;
        let questions = serde_json::to_string(&session.questions)?;
        let skill_updates = serde_json::to_string(&session.skill_updates)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO "diagnostic_responses"
               ("session_id", "seq", "question_id", "skill_id", "difficulty", "user_answer",
                "correct_answer", "is_correct", "response_time_seconds", "answered_at")
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.id)
        .bind(seq as i64)
        .bind(&response.question_id)
        .bind(i64::from(response.skill_id))
        .bind(i64::from(response.difficulty))
        .bind(&response.user_answer)
        .bind(&response.correct_answer)
        .bind(response.is_correct)
        .bind(response.response_time_seconds)
        .bind(response.answered_at)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"UPDATE "diagnostic_sessions"
               SET "questions" = ?, "current_difficulty" = ?, "correct_streak" = ?,
                   "incorrect_streak" = ?, "skill_updates" = ?
               WHERE "id" = ?"#,
        )
        .bind(questions)
        .bind(i64::from(session.current_difficulty))
        .bind(i64::from(session.correct_streak))
        .bind(i64::from(session.incorrect_streak))
        .bind(skill_updates)
        .bind(&session.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Corrupt(format!(
                "session {} was never inserted",
                session.id
            )));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn complete_session(
        &self,
        session: &DiagnosticSession,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        let summary_json = serde_json::to_string(summary)?;
        let skill_updates = serde_json::to_string(&session.skill_updates)?;
        sqlx::query(
            r#"UPDATE "diagnostic_sessions"
               SET "status" = ?, "total_questions" = ?, "correct_answers" = ?, "final_difficulty" = ?,
                   "summary" = ?, "skill_updates" = ?, "completed_at" = ?
               WHERE "id" = ?"#,
        )
        .bind(SessionStatus::Completed.as_str())
        .bind(i64::from(summary.total_questions))
        .bind(i64::from(summary.correct_answers))
        .bind(i64::from(summary.final_difficulty))
        .bind(summary_json)
        .bind(skill_updates)
        .bind(summary.completed_at)
        .bind(&session.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<DiagnosticSession>, StoreError> {
        let row = sqlx::query(
            r#"SELECT "id", "user_id", "status", "questions", "current_difficulty", "correct_streak",
                      "incorrect_streak", "skill_updates", "created_at", "completed_at"
               FROM "diagnostic_sessions" WHERE "id" = ?"#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw_status: String = row.try_get("status")?;
        let status = SessionStatus::parse(&raw_status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown session status: {raw_status}")))?;
        let questions: Vec<DiagnosticQuestion> =
            serde_json::from_str(&row.try_get::<String, _>("questions")?)?;
        let skill_updates: BTreeMap<SkillId, f64> =
            serde_json::from_str(&row.try_get::<String, _>("skill_updates")?)?;
        let correct_streak: i64 = row.try_get("correct_streak")?;
        let incorrect_streak: i64 = row.try_get("incorrect_streak")?;

        let responses = sqlx::query(
            r#"SELECT "question_id", "skill_id", "difficulty", "user_answer", "correct_answer",
                      "is_correct", "response_time_seconds", "answered_at"
               FROM "diagnostic_responses" WHERE "session_id" = ? ORDER BY "seq""#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_response)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DiagnosticSession {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status,
            questions,
            responses,
            current_difficulty: difficulty_from_db(row.try_get("current_difficulty")?)?,
            correct_streak: correct_streak.max(0) as u32,
            incorrect_streak: incorrect_streak.max(0) as u32,
            skill_updates,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        }))
    }
}

#[async_trait]
impl SkillScoreStore for SqliteStore {
    async fn load_skill_scores(&self, user_id: &str) -> Result<HashMap<SkillId, u8>, StoreError> {
        let rows = sqlx::query(r#"SELECT "skill_id", "score" FROM "skill_scores" WHERE "user_id" = ?"#)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        let mut scores = HashMap::with_capacity(rows.len());
        for row in rows {
            let skill = skill_from_db(row.try_get("skill_id")?)?;
            let score: i64 = row.try_get("score")?;
            scores.insert(skill, score.clamp(0, 100) as u8);
        }
        Ok(scores)
    }

    async fn save_skill_scores(
        &self,
        user_id: &str,
        scores: &HashMap<SkillId, u8>,
    ) -> Result<(), StoreError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        for (&skill, &score) in scores {
            sqlx::query(
                r#"INSERT INTO "skill_scores" ("user_id", "skill_id", "score", "updated_at")
                   VALUES (?, ?, ?, ?)
                   ON CONFLICT ("user_id", "skill_id")
                   DO UPDATE SET "score" = excluded."score", "updated_at" = excluded."updated_at""#,
            )
            .bind(user_id)
            .bind(i64::from(skill))
            .bind(i64::from(score.min(100)))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
