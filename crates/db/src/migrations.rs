/// Inline SQL migrations for the jobstream database schema.
///
/// Timestamps are Unix milliseconds. A row is live while `expires_at` is in
/// the future; reads treat expired rows as absent before the purge task
/// deletes them.

pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id            TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    resource_id       TEXT NOT NULL,
    capability        TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending',
    phase             TEXT NOT NULL DEFAULT 'initializing',
    progress          INTEGER NOT NULL DEFAULT 0,
    message           TEXT NOT NULL DEFAULT '',
    total_units       INTEGER NOT NULL DEFAULT 0,
    completed_units   INTEGER NOT NULL DEFAULT 0,
    result_refs       TEXT,
    error_kind        TEXT,
    error_message     TEXT,
    error_recoverable INTEGER,
    cancel_requested  INTEGER NOT NULL DEFAULT 0,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL,
    expires_at        INTEGER NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_expires ON jobs(expires_at);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id, created_at DESC);"#,
    // Migration 2: per-user active job pointer
    r#"
CREATE TABLE IF NOT EXISTS active_jobs (
    user_id    TEXT PRIMARY KEY,
    job_id     TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
"#,
    r#"CREATE INDEX IF NOT EXISTS idx_active_jobs_job ON active_jobs(job_id);"#,
];
