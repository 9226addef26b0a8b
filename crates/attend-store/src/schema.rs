/// Tables are created if missing; there are no migrations.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
    subject       INTEGER,
    name          TEXT,
    uid           TEXT,
    section       TEXT,
    course        TEXT,
    created_at    TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_accounts_subject ON accounts(subject);

CREATE TABLE IF NOT EXISTS faces (
    subject INTEGER PRIMARY KEY,
    name    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    subject   INTEGER NOT NULL,
    name      TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    date      TEXT NOT NULL,
    UNIQUE (subject, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
"#;
