//! SQLite database client for persistent storage.
//!
//! Implements [`EvaluationStore`], [`PromptCatalog`] and [`DatasetCatalog`]
//! on one sqlx connection pool. The file is opened in WAL mode; SQLite still
//! serializes writers, which is why the engine puts a
//! [`SerializedStore`](super::SerializedStore) in front of it.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::migrations::MigrationRunner;
use super::{DatasetCatalog, EvaluationStore, NewPrompt, PromptCatalog};
use crate::error::StoreError;
use crate::evaluation::{
    DatasetMessage, Evaluation, EvaluationResult, EvaluationStatus, NewEvaluation,
    NewEvaluationResult, PromptConfig, ResultFilter, StatusUpdate,
};

const EVALUATION_COLUMNS: &str = "id, name, description, prompt_id, dataset_id, \
     prompt_stop_sequences, status, started_at, completed_at, last_heartbeat, timeout_at, \
     can_resume, failure_reason, total_messages, processed_messages, correct_predictions, \
     incorrect_predictions, error_count, accuracy, total_time_ms, created_by, created_at";

const RESULT_COLUMNS: &str = "id, evaluation_id, dataset_message_id, llm_label, \
     llm_full_response, response_time_ms, error_message, retry_count, created_at";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `database_url` (e.g. `sqlite://evals.db` or
    /// `sqlite::memory:`) and applies pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every connection to an in-memory database is a separate database,
        // so those pools hold exactly one connection for their whole life.
        let pool_opts = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_opts.connect_with(opts).await?;
        let store = Self { pool };
        store.run_migrations().await?;

        info!(url = database_url, "SQLite store opened");
        Ok(store)
    }

    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        Self::connect(&format!("sqlite://{}", path)).await
    }

    /// In-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<usize, StoreError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }

    // =========================================================================
    // Catalog seeding
    // =========================================================================

    /// Inserts a prompt and returns it with its assigned id.
    pub async fn insert_prompt(&self, prompt: NewPrompt) -> Result<PromptConfig, StoreError> {
        let stop_sequences = serde_json::to_string(&prompt.stop_sequences)?;

        let result = sqlx::query(
            r#"
            INSERT INTO prompts (
                name, model_id, prompt_text, max_tokens, temperature, top_p,
                stop_sequences, opening_tag, closing_tag, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&prompt.name)
        .bind(&prompt.model_id)
        .bind(&prompt.prompt_text)
        .bind(prompt.max_tokens.map(i64::from))
        .bind(prompt.temperature)
        .bind(prompt.top_p)
        .bind(stop_sequences)
        .bind(&prompt.opening_tag)
        .bind(&prompt.closing_tag)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(prompt.into_config(result.last_insert_rowid()))
    }

    /// Inserts a dataset with its labelled messages and returns its id.
    pub async fn insert_dataset(
        &self,
        name: &str,
        messages: &[(String, bool)],
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let dataset_id = sqlx::query("INSERT INTO datasets (name, created_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for (content, label) in messages {
            sqlx::query(
                "INSERT INTO dataset_messages (dataset_id, message_content, label) VALUES (?1, ?2, ?3)",
            )
            .bind(dataset_id)
            .bind(content)
            .bind(*label)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(dataset_id, messages = messages.len(), "Dataset inserted");
        Ok(dataset_id)
    }

    /// Lists evaluations, newest first.
    pub async fn list_evaluations(&self) -> Result<Vec<Evaluation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM evaluations ORDER BY id DESC",
            EVALUATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(evaluation_from_row).collect()
    }

    async fn fetch_result(
        &self,
        evaluation_id: i64,
        dataset_message_id: i64,
    ) -> Result<EvaluationResult, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evaluation_results WHERE evaluation_id = ?1 AND dataset_message_id = ?2",
            RESULT_COLUMNS
        ))
        .bind(evaluation_id)
        .bind(dataset_message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result_from_row(&row))
    }
}

fn filter_clause(filter: ResultFilter) -> &'static str {
    match filter {
        ResultFilter::All => "",
        ResultFilter::ErrorsOnly => " AND error_message IS NOT NULL",
    }
}

fn evaluation_from_row(row: &SqliteRow) -> Result<Evaluation, StoreError> {
    let status: String = row.get("status");
    let status = EvaluationStatus::from_str(&status).map_err(StoreError::InvalidData)?;
    let stop_sequences: String = row.get("prompt_stop_sequences");

    Ok(Evaluation {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        prompt_id: row.get("prompt_id"),
        dataset_id: row.get("dataset_id"),
        stop_sequences: serde_json::from_str(&stop_sequences)?,
        status,
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        last_heartbeat: row.get("last_heartbeat"),
        timeout_at: row.get("timeout_at"),
        can_resume: row.get("can_resume"),
        failure_reason: row.get("failure_reason"),
        total_messages: row.get("total_messages"),
        processed_messages: row.get("processed_messages"),
        correct_predictions: row.get("correct_predictions"),
        incorrect_predictions: row.get("incorrect_predictions"),
        error_count: row.get("error_count"),
        accuracy: row.get("accuracy"),
        total_time_ms: row.get("total_time_ms"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

fn result_from_row(row: &SqliteRow) -> EvaluationResult {
    EvaluationResult {
        id: row.get("id"),
        evaluation_id: row.get("evaluation_id"),
        dataset_message_id: row.get("dataset_message_id"),
        llm_label: row.get("llm_label"),
        llm_full_response: row.get("llm_full_response"),
        response_time_ms: row.get("response_time_ms"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl EvaluationStore for SqliteStore {
    async fn create_evaluation(&self, new: NewEvaluation) -> Result<Evaluation, StoreError> {
        let stop_sequences = serde_json::to_string(&new.stop_sequences)?;

        let id = sqlx::query(
            r#"
            INSERT INTO evaluations (
                name, description, prompt_id, dataset_id, prompt_stop_sequences,
                status, total_messages, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8)
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.prompt_id)
        .bind(new.dataset_id)
        .bind(stop_sequences)
        .bind(new.total_messages)
        .bind(&new.created_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get_evaluation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Evaluation {}", id)))
    }

    async fn get_evaluation(&self, id: i64) -> Result<Option<Evaluation>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM evaluations WHERE id = ?1",
            EVALUATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(evaluation_from_row).transpose()
    }

    async fn delete_evaluation(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM evaluation_results WHERE evaluation_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM evaluations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::NotFound(format!("Evaluation {}", id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: i64,
        status: EvaluationStatus,
        update: StatusUpdate,
    ) -> Result<Evaluation, StoreError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE evaluations SET status = ");
        qb.push_bind(status.as_str());

        if let Some(v) = update.started_at {
            qb.push(", started_at = ").push_bind(v);
        }
        if let Some(v) = update.completed_at {
            qb.push(", completed_at = ").push_bind(v);
        }
        if let Some(v) = update.last_heartbeat {
            qb.push(", last_heartbeat = ").push_bind(v);
        }
        if let Some(v) = update.timeout_at {
            qb.push(", timeout_at = ").push_bind(v);
        }
        if let Some(v) = update.can_resume {
            qb.push(", can_resume = ").push_bind(v);
        }
        if let Some(v) = update.failure_reason {
            qb.push(", failure_reason = ").push_bind(v);
        }
        if let Some(v) = update.processed_messages {
            qb.push(", processed_messages = ").push_bind(v);
        }
        if let Some(v) = update.correct_predictions {
            qb.push(", correct_predictions = ").push_bind(v);
        }
        if let Some(v) = update.incorrect_predictions {
            qb.push(", incorrect_predictions = ").push_bind(v);
        }
        if let Some(v) = update.error_count {
            qb.push(", error_count = ").push_bind(v);
        }
        if let Some(v) = update.accuracy {
            qb.push(", accuracy = ").push_bind(v);
        }
        if let Some(v) = update.total_time_ms {
            qb.push(", total_time_ms = ").push_bind(v);
        }

        qb.push(" WHERE id = ").push_bind(id);

        let affected = qb.build().execute(&self.pool).await?.rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("Evaluation {}", id)));
        }

        self.get_evaluation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Evaluation {}", id)))
    }

    async fn update_progress(
        &self,
        id: i64,
        processed_messages: i64,
        total_time_ms: i64,
    ) -> Result<(), StoreError> {
        let affected = sqlx::query(
            "UPDATE evaluations SET processed_messages = ?1, total_time_ms = ?2 WHERE id = ?3",
        )
        .bind(processed_messages)
        .bind(total_time_ms)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("Evaluation {}", id)));
        }
        Ok(())
    }

    async fn touch_heartbeat(&self, id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE evaluations SET last_heartbeat = ?1 WHERE id = ?2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_result(
        &self,
        result: NewEvaluationResult,
    ) -> Result<EvaluationResult, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO evaluation_results (
                evaluation_id, dataset_message_id, llm_label, llm_full_response,
                response_time_ms, error_message, retry_count, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (evaluation_id, dataset_message_id) DO UPDATE SET
                llm_label = excluded.llm_label,
                llm_full_response = excluded.llm_full_response,
                response_time_ms = excluded.response_time_ms,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                created_at = excluded.created_at
            "#,
        )
        .bind(result.evaluation_id)
        .bind(result.dataset_message_id)
        .bind(result.llm_label)
        .bind(&result.llm_full_response)
        .bind(result.response_time_ms)
        .bind(&result.error_message)
        .bind(result.retry_count)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.fetch_result(result.evaluation_id, result.dataset_message_id)
            .await
    }

    async fn list_results(&self, evaluation_id: i64) -> Result<Vec<EvaluationResult>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM evaluation_results WHERE evaluation_id = ?1 ORDER BY dataset_message_id",
            RESULT_COLUMNS
        ))
        .bind(evaluation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(result_from_row).collect())
    }

    async fn delete_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM evaluation_results WHERE evaluation_id = ?1{}",
            filter_clause(filter)
        );
        let deleted = sqlx::query(&sql)
            .bind(evaluation_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    async fn count_results(
        &self,
        evaluation_id: i64,
        filter: ResultFilter,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM evaluation_results WHERE evaluation_id = ?1{}",
            filter_clause(filter)
        );
        let row = sqlx::query(&sql)
            .bind(evaluation_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("n");
        Ok(count as u64)
    }
}

#[async_trait]
impl PromptCatalog for SqliteStore {
    async fn get_prompt(&self, id: i64) -> Result<Option<PromptConfig>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, model_id, prompt_text, max_tokens, temperature, top_p,
                   stop_sequences, opening_tag, closing_tag
            FROM prompts
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stop_sequences: String = row.get("stop_sequences");
        Ok(Some(PromptConfig {
            id: row.get("id"),
            name: row.get("name"),
            model_id: row.get("model_id"),
            prompt_text: row.get("prompt_text"),
            max_tokens: row
                .get::<Option<i64>, _>("max_tokens")
                .map(|v| v.clamp(0, u32::MAX as i64) as u32),
            temperature: row.get("temperature"),
            top_p: row.get("top_p"),
            stop_sequences: serde_json::from_str(&stop_sequences)?,
            opening_tag: row.get("opening_tag"),
            closing_tag: row.get("closing_tag"),
        }))
    }
}

#[async_trait]
impl DatasetCatalog for SqliteStore {
    async fn dataset_exists(&self, dataset_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT id FROM datasets WHERE id = ?1")
            .bind(dataset_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn dataset_messages(&self, dataset_id: i64) -> Result<Vec<DatasetMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, message_content, label FROM dataset_messages WHERE dataset_id = ?1 ORDER BY id",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DatasetMessage {
                id: row.get("id"),
                message_content: row.get("message_content"),
                label: row.get("label"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (SqliteStore, PromptConfig, i64) {
        let store = SqliteStore::in_memory().await.expect("open store");
        let prompt = store
            .insert_prompt(
                NewPrompt::new(
                    "spam",
                    "model-a",
                    "Spam? {{messageContent}}",
                    "<answer>",
                    "</answer>",
                )
                .with_temperature(0.2)
                .with_stop_sequences(vec!["</answer>".to_string()]),
            )
            .await
            .expect("insert prompt");
        let dataset_id = store
            .insert_dataset(
                "inbox",
                &[("win".to_string(), true), ("hello".to_string(), false)],
            )
            .await
            .expect("insert dataset");
        (store, prompt, dataset_id)
    }

    fn new_evaluation(prompt: &PromptConfig, dataset_id: i64) -> NewEvaluation {
        NewEvaluation {
            name: "first".to_string(),
            description: Some("desc".to_string()),
            prompt_id: prompt.id,
            dataset_id,
            stop_sequences: prompt.stop_sequences.clone(),
            total_messages: 2,
            created_by: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let store = SqliteStore::in_memory().await.expect("open store");
        assert_eq!(store.run_migrations().await.expect("rerun"), 0);

        let applied = MigrationRunner::new(store.pool().clone())
            .list_applied_migrations()
            .await
            .expect("list");
        assert_eq!(applied.len(), super::super::schema::all_schema_statements().len());
    }

    #[tokio::test]
    async fn test_catalog_round_trip() {
        let (store, prompt, dataset_id) = seeded().await;

        let loaded = store
            .get_prompt(prompt.id)
            .await
            .expect("query")
            .expect("prompt exists");
        assert_eq!(loaded, prompt);
        assert!(store.get_prompt(999).await.expect("query").is_none());

        let messages = store.dataset_messages(dataset_id).await.expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_content, "win");
        assert!(messages[0].label);
        assert!(!messages[1].label);
        assert!(store.dataset_exists(dataset_id).await.expect("query"));
        assert!(!store.dataset_exists(999).await.expect("query"));
    }

    #[tokio::test]
    async fn test_status_update_sets_and_clears_fields() {
        let (store, prompt, dataset_id) = seeded().await;
        let evaluation = store
            .create_evaluation(new_evaluation(&prompt, dataset_id))
            .await
            .expect("create");
        assert_eq!(evaluation.status, EvaluationStatus::Pending);
        assert_eq!(evaluation.stop_sequences, vec!["</answer>".to_string()]);

        let now = Utc::now();
        let running = store
            .update_status(
                evaluation.id,
                EvaluationStatus::Running,
                StatusUpdate::new()
                    .started_at(Some(now))
                    .failure_reason(Some("old".to_string()))
                    .can_resume(true),
            )
            .await
            .expect("update");
        assert_eq!(running.status, EvaluationStatus::Running);
        assert_eq!(running.started_at, Some(now));
        assert!(running.can_resume);

        let cleared = store
            .update_status(
                evaluation.id,
                EvaluationStatus::Pending,
                StatusUpdate::new()
                    .started_at(None)
                    .failure_reason(None)
                    .clear_stats(),
            )
            .await
            .expect("update");
        assert_eq!(cleared.started_at, None);
        assert_eq!(cleared.failure_reason, None);
        assert_eq!(cleared.accuracy, None);

        let missing = store
            .update_status(999, EvaluationStatus::Running, StatusUpdate::new())
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_results_filtering_and_upsert() {
        let (store, prompt, dataset_id) = seeded().await;
        let evaluation = store
            .create_evaluation(new_evaluation(&prompt, dataset_id))
            .await
            .expect("create");
        let messages = store.dataset_messages(dataset_id).await.expect("messages");

        store
            .insert_result(NewEvaluationResult::answered(
                evaluation.id,
                messages[0].id,
                Some(true),
                "<answer>true</answer>".to_string(),
                120,
                0,
            ))
            .await
            .expect("insert");
        let failed = store
            .insert_result(NewEvaluationResult::failed(
                evaluation.id,
                messages[1].id,
                "throttled".to_string(),
                3,
            ))
            .await
            .expect("insert");
        assert_eq!(failed.llm_label, None);
        assert_eq!(failed.retry_count, 3);

        assert_eq!(
            store
                .count_results(evaluation.id, ResultFilter::All)
                .await
                .expect("count"),
            2
        );
        assert_eq!(
            store
                .count_results(evaluation.id, ResultFilter::ErrorsOnly)
                .await
                .expect("count"),
            1
        );

        // A second result for the same message replaces the first.
        store
            .insert_result(NewEvaluationResult::answered(
                evaluation.id,
                messages[1].id,
                Some(false),
                "<answer>false</answer>".to_string(),
                80,
                0,
            ))
            .await
            .expect("upsert");
        let results = store.list_results(evaluation.id).await.expect("list");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_error()));

        assert_eq!(
            store
                .delete_results(evaluation.id, ResultFilter::ErrorsOnly)
                .await
                .expect("delete"),
            0
        );
        assert_eq!(
            store
                .delete_results(evaluation.id, ResultFilter::All)
                .await
                .expect("delete"),
            2
        );
    }

    #[tokio::test]
    async fn test_progress_heartbeat_and_delete() {
        let (store, prompt, dataset_id) = seeded().await;
        let evaluation = store
            .create_evaluation(new_evaluation(&prompt, dataset_id))
            .await
            .expect("create");

        store
            .update_progress(evaluation.id, 1, 250)
            .await
            .expect("progress");
        let beat = Utc::now();
        store
            .touch_heartbeat(evaluation.id, beat)
            .await
            .expect("heartbeat");

        let loaded = store
            .get_evaluation(evaluation.id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(loaded.processed_messages, 1);
        assert_eq!(loaded.total_time_ms, 250);
        assert_eq!(loaded.last_heartbeat, Some(beat));

        store.delete_evaluation(evaluation.id).await.expect("delete");
        assert!(store
            .get_evaluation(evaluation.id)
            .await
            .expect("get")
            .is_none());
        assert!(matches!(
            store.delete_evaluation(evaluation.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("evals.db");
        let path = path.to_string_lossy().to_string();

        let id = {
            let store = SqliteStore::open(&path).await.expect("open");
            let prompt = store
                .insert_prompt(NewPrompt::new("p", "m", "{{messageContent}}", "<a>", "</a>"))
                .await
                .expect("prompt");
            let dataset_id = store
                .insert_dataset("d", &[("x".to_string(), true)])
                .await
                .expect("dataset");
            let evaluation = store
                .create_evaluation(new_evaluation(&prompt, dataset_id))
                .await
                .expect("create");
            store.pool().close().await;
            evaluation.id
        };

        let reopened = SqliteStore::open(&path).await.expect("reopen");
        let loaded = reopened.get_evaluation(id).await.expect("get");
        assert!(loaded.is_some());
    }
}
