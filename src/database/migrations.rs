//! Database migrations for shipment-sync
//!
//! This module contains SQL migrations for the SQLite database schema.

/// SQL statement to create the initial database schema
pub const CREATE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Seller accounts
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    client_id TEXT NOT NULL UNIQUE,
    client_secret TEXT NOT NULL,
    access_token TEXT,
    token_expires_at TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

-- Per-account, per-endpoint rate budget and scan flags
CREATE TABLE IF NOT EXISTS endpoint_trackers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    endpoint TEXT NOT NULL,
    remaining_requests INTEGER NOT NULL DEFAULT 0,
    reset_at TEXT NOT NULL,
    completed_categories TEXT NOT NULL DEFAULT '[]',
    UNIQUE(account_id, endpoint)
);

CREATE INDEX IF NOT EXISTS idx_trackers_budget ON endpoint_trackers(reset_at, remaining_requests);

-- Shipments discovered by the list scan
CREATE TABLE IF NOT EXISTS tracked_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    external_id TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'not_started',
    discovered_at TEXT NOT NULL,
    started_at TEXT,
    UNIQUE(account_id, external_id)
);

CREATE INDEX IF NOT EXISTS idx_records_account_state ON tracked_records(account_id, state, id);
CREATE INDEX IF NOT EXISTS idx_records_state_started ON tracked_records(state, started_at);

-- Detail payloads, stored verbatim
CREATE TABLE IF NOT EXISTS record_details (
    record_id INTEGER PRIMARY KEY REFERENCES tracked_records(id) ON DELETE CASCADE,
    payload TEXT NOT NULL,
    fetched_at TEXT NOT NULL
);
"#;
