//! Database schema constants.
//!
//! SQLite schema for the prompt and dataset catalogs, evaluation runs and
//! their per-message results. Timestamps are stored as RFC 3339 text and
//! booleans as integers.

/// Prompt catalog.
pub const CREATE_PROMPTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS prompts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    model_id TEXT NOT NULL,
    prompt_text TEXT NOT NULL,
    max_tokens INTEGER,
    temperature REAL,
    top_p REAL,
    stop_sequences TEXT NOT NULL DEFAULT '[]',
    opening_tag TEXT NOT NULL,
    closing_tag TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Dataset catalog.
pub const CREATE_DATASETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Labelled dataset messages.
pub const CREATE_DATASET_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dataset_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    dataset_id INTEGER NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    message_content TEXT NOT NULL,
    label INTEGER NOT NULL
)
"#;

/// Evaluation runs.
pub const CREATE_EVALUATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    prompt_id INTEGER NOT NULL REFERENCES prompts(id),
    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
    prompt_stop_sequences TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'running', 'completed', 'failed', 'paused')),
    started_at TEXT,
    completed_at TEXT,
    last_heartbeat TEXT,
    timeout_at TEXT,
    can_resume INTEGER NOT NULL DEFAULT 0,
    failure_reason TEXT,
    total_messages INTEGER NOT NULL DEFAULT 0,
    processed_messages INTEGER NOT NULL DEFAULT 0,
    correct_predictions INTEGER,
    incorrect_predictions INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER,
    accuracy REAL,
    total_time_ms INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

/// Per-message results, at most one per message and evaluation.
pub const CREATE_EVALUATION_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS evaluation_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    evaluation_id INTEGER NOT NULL REFERENCES evaluations(id) ON DELETE CASCADE,
    dataset_message_id INTEGER NOT NULL,
    llm_label INTEGER,
    llm_full_response TEXT,
    response_time_ms INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (evaluation_id, dataset_message_id)
)
"#;

/// Indexes for the common lookups.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_dataset_messages_dataset ON dataset_messages(dataset_id)",
    "CREATE INDEX IF NOT EXISTS idx_evaluations_status ON evaluations(status)",
    "CREATE INDEX IF NOT EXISTS idx_evaluations_created_by ON evaluations(created_by)",
    "CREATE INDEX IF NOT EXISTS idx_results_evaluation ON evaluation_results(evaluation_id)",
];

/// Returns all schema statements in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_PROMPTS_TABLE,
        CREATE_DATASETS_TABLE,
        CREATE_DATASET_MESSAGES_TABLE,
        CREATE_EVALUATIONS_TABLE,
        CREATE_EVALUATION_RESULTS_TABLE,
    ];
    statements.extend_from_slice(CREATE_INDEXES);
    statements
}

/// Table names.
pub mod tables {
    pub const PROMPTS: &str = "prompts";
    pub const DATASETS: &str = "datasets";
    pub const DATASET_MESSAGES: &str = "dataset_messages";
    pub const EVALUATIONS: &str = "evaluations";
    pub const EVALUATION_RESULTS: &str = "evaluation_results";
    pub const MIGRATIONS: &str = "_migrations";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 5 + CREATE_INDEXES.len());

        let position = |table: &str| {
            statements
                .iter()
                .position(|s| s.contains(&format!("CREATE TABLE IF NOT EXISTS {} ", table)))
                .expect("table present")
        };
        assert!(position(tables::DATASETS) < position(tables::DATASET_MESSAGES));
        assert!(position(tables::EVALUATIONS) < position(tables::EVALUATION_RESULTS));
    }

    #[test]
    fn test_results_are_unique_per_message() {
        assert!(CREATE_EVALUATION_RESULTS_TABLE.contains("UNIQUE (evaluation_id, dataset_message_id)"));
    }
}
