//! SQL schema for the Cohort SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS persons (
    person_id      TEXT PRIMARY KEY,
    email          TEXT UNIQUE,     -- NULL allowed; at most one person per email
    phone          TEXT,
    first_name     TEXT,
    last_name      TEXT,
    first_seen_at  TEXT NOT NULL,   -- ISO 8601 UTC; server-assigned
    last_seen_at   TEXT NOT NULL,
    active_days    INTEGER NOT NULL DEFAULT 0,
    core_actions   INTEGER NOT NULL DEFAULT 0,
    lifetime_value REAL    NOT NULL DEFAULT 0
);

-- One external identity maps to exactly one person at a time. Merges
-- repoint person_id in bulk; rows are never duplicated.
CREATE TABLE IF NOT EXISTS identity_links (
    link_id     TEXT PRIMARY KEY,
    source      TEXT NOT NULL,       -- 'user' | 'stripe' | 'posthog' | 'meta'
    external_id TEXT NOT NULL,
    person_id   TEXT NOT NULL REFERENCES persons(person_id),
    created_at  TEXT NOT NULL,
    UNIQUE (source, external_id)
);

-- Replaced wholesale by the feature-computation job; read-only elsewhere.
CREATE TABLE IF NOT EXISTS person_features (
    person_id              TEXT PRIMARY KEY REFERENCES persons(person_id),
    active_days            INTEGER NOT NULL,
    core_actions           INTEGER NOT NULL,
    days_since_signup      INTEGER NOT NULL,
    days_since_last_active INTEGER NOT NULL,
    event_counts           TEXT NOT NULL DEFAULT '{}',  -- JSON object
    computed_at            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS segments (
    segment_id    TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    description   TEXT,
    rules_json    TEXT NOT NULL,       -- serialised RuleNode
    enabled       INTEGER NOT NULL DEFAULT 1,
    action_type   TEXT,
    action_config TEXT,                -- JSON payload for the automation
    created_at    TEXT NOT NULL
);

-- Membership rows are stamped with left_at on churn, never deleted, so
-- this table doubles as churn history.
CREATE TABLE IF NOT EXISTS segment_members (
    member_id  TEXT PRIMARY KEY,
    person_id  TEXT NOT NULL REFERENCES persons(person_id),
    segment_id TEXT NOT NULL REFERENCES segments(segment_id),
    joined_at  TEXT NOT NULL,
    left_at    TEXT
);

-- At most one active membership per (person, segment).
CREATE UNIQUE INDEX IF NOT EXISTS segment_members_active_idx
    ON segment_members(person_id, segment_id) WHERE left_at IS NULL;

CREATE INDEX IF NOT EXISTS identity_links_person_idx  ON identity_links(person_id);
CREATE INDEX IF NOT EXISTS segment_members_person_idx ON segment_members(person_id);
CREATE INDEX IF NOT EXISTS segment_members_segment_idx ON segment_members(segment_id);

PRAGMA user_version = 1;
";
