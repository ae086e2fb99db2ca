use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::generation::generator::GeneratedQuestion;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: Uuid,
    pub content_area: String,
    pub question: String,
    pub options_json: String,
    pub correct_answer: String,
    pub explanation: String,
    pub question_type: String,
    pub difficulty: Option<i64>,
    pub model: Option<String>,
    pub generation_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QuestionsRepo {
    pool: SqlitePool,
}

impl QuestionsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts on an existing connection so callers can share a transaction.
    pub async fn insert_on(
        conn: &mut SqliteConnection,
        area: &str,
        q: &GeneratedQuestion,
        generation_job_id: Option<Uuid>,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO questions (
                id, content_area, question, options_json, correct_answer,
                explanation, question_type, difficulty, model,
                generation_job_id, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(area)
        .bind(&q.question)
        .bind(q.options.to_string())
        .bind(&q.correct_answer)
        .bind(&q.explanation)
        .bind(&q.question_type)
        .bind(q.difficulty)
        .bind(q.model.as_deref())
        .bind(generation_job_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(id)
    }

    /// Pool size per content area, areas without questions omitted.
    pub async fn counts_by_area(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT content_area, COUNT(*)
            FROM questions
            GROUP BY content_area
            ORDER BY content_area
            "#,
        )
        .fetch_all(&self.pool)
        .await
    }

    /// Most recent question texts of an area, newest first.
    pub async fn recent_stems(&self, area: &str, limit: i64) -> Result<Vec<String>, sqlx::Error> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        sqlx::query_scalar(
            r#"
            SELECT question
            FROM questions
            WHERE content_area = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(area)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<QuestionRow>, sqlx::Error> {
        sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT *
            FROM questions
            WHERE generation_job_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
    }
}
