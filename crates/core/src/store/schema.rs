//! Schema of the standard record store layout.
//!
//! Real stores only need the tables and owner columns that the configured
//! collections reference; [`super::RecordStore::initialize`] creates this
//! layout for fresh stores and tests.

/// Identity table, flat dependent tables, and the team table whose
/// `confirmed_users` column is a JSON array of `{ "id", "email", ... }`.
pub const STANDARD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY,
    email        TEXT,
    provider     TEXT NOT NULL,
    provider_id  TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_users_provider ON users (provider);

CREATE TABLE IF NOT EXISTS datasets (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_datasets_user_id ON datasets (user_id);

CREATE TABLE IF NOT EXISTS layers (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_layers_user_id ON layers (user_id);

CREATE TABLE IF NOT EXISTS widgets (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_widgets_user_id ON widgets (user_id);

CREATE TABLE IF NOT EXISTS subscriptions (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_subscriptions_user_id ON subscriptions (user_id);

CREATE TABLE IF NOT EXISTS teams (
    id               TEXT PRIMARY KEY,
    name             TEXT,
    confirmed_users  TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS vocabularies (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_vocabularies_user_id ON vocabularies (user_id);

CREATE TABLE IF NOT EXISTS areas (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_areas_user_id ON areas (user_id);

CREATE TABLE IF NOT EXISTS metadatas (
    id       TEXT PRIMARY KEY,
    user_id  TEXT,
    name     TEXT
);
CREATE INDEX IF NOT EXISTS idx_metadatas_user_id ON metadatas (user_id);
"#;
