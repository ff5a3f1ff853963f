//! SQLite schema definitions
//!
//! `SCHEMA` always describes the latest version; fresh databases apply it
//! directly, existing ones step through `migrations`.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- =============================================================================
-- 1. Traces (timestamps are microseconds since epoch)
-- =============================================================================
CREATE TABLE IF NOT EXISTS traces (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    session_id TEXT,
    user_id TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT,
    input TEXT,
    output TEXT,
    start_time INTEGER,
    end_time INTEGER,
    latency_ms INTEGER,
    total_cost_usd REAL NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    span_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    incomplete INTEGER NOT NULL DEFAULT 0,
    anomaly_count INTEGER NOT NULL DEFAULT 0,
    ingested_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traces_start_time ON traces(start_time DESC);
CREATE INDEX IF NOT EXISTS idx_traces_session ON traces(session_id) WHERE session_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_traces_user ON traces(user_id) WHERE user_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_traces_ingested_at ON traces(ingested_at DESC);

-- =============================================================================
-- 2. Spans (ids are unique within a trace only)
-- =============================================================================
CREATE TABLE IF NOT EXISTS spans (
    trace_id TEXT NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    span_type TEXT NOT NULL,
    parent_span_id TEXT,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    latency_ms INTEGER,
    input TEXT,
    output TEXT,
    attributes TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'ok' CHECK(status IN ('ok', 'error')),
    error_message TEXT,
    latency_mismatch INTEGER NOT NULL DEFAULT 0,
    model TEXT,
    prompt_tokens INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    total_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (trace_id, id)
);

CREATE INDEX IF NOT EXISTS idx_spans_id ON spans(id);
CREATE INDEX IF NOT EXISTS idx_spans_model ON spans(model) WHERE model IS NOT NULL;

-- =============================================================================
-- 3. Evaluations (append-only, outlive trace replacement)
-- =============================================================================
CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    target_kind TEXT NOT NULL CHECK(target_kind IN ('trace', 'span')),
    trace_id TEXT NOT NULL,
    span_id TEXT,
    evaluator_type TEXT NOT NULL,
    score REAL NOT NULL CHECK(score >= 0 AND score <= 1),
    label TEXT,
    explanation TEXT,
    metadata TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evaluations_trace ON evaluations(trace_id, created_at);
CREATE INDEX IF NOT EXISTS idx_evaluations_span ON evaluations(span_id, created_at) WHERE span_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_evaluations_type_score ON evaluations(evaluator_type, score);
"#;
