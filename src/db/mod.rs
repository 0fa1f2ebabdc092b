pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Current schema version, written to `user_version` after migration.
const SCHEMA_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(StoreError::Migration(format!(
                "database schema version {version} is newer than this build supports"
            )));
        }

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: songs + tracks corpus tables, content-addressed patterns,
    /// and per-occurrence instance rows.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS songs (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                source_path     TEXT NOT NULL UNIQUE,
                file_size       INTEGER NOT NULL,
                file_modified   TEXT NOT NULL,

                -- Metadata from the note-stream document
                title           TEXT,
                artist          TEXT,
                album           TEXT,
                genre           TEXT,
                year            INTEGER,

                created_at      TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_songs_artist ON songs(artist);
            CREATE INDEX IF NOT EXISTS idx_songs_genre ON songs(genre);

            CREATE TABLE IF NOT EXISTS song_tags (
                song_id     INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                tag         TEXT NOT NULL,
                UNIQUE(song_id, tag)
            );
            CREATE INDEX IF NOT EXISTS idx_song_tags_tag ON song_tags(tag);

            CREATE TABLE IF NOT EXISTS tracks (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                song_id           INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
                name              TEXT NOT NULL,
                channel           INTEGER,

                -- Per-track analysis summary
                note_count        INTEGER NOT NULL,
                chunk_count       INTEGER NOT NULL,
                unique_patterns   INTEGER NOT NULL,
                repetition_ratio  REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tracks_song ON tracks(song_id);

            -- Content-addressed: the primary key is the combined
            -- fingerprint hash in hex, so one row per distinct pattern
            CREATE TABLE IF NOT EXISTS patterns (
                hash              TEXT PRIMARY KEY,
                pattern_type      TEXT NOT NULL,
                num_bars          INTEGER NOT NULL,
                grid_size         INTEGER NOT NULL,

                -- Fingerprint payload, JSON-encoded sequences
                onset_grid        TEXT NOT NULL,
                accent_grid       TEXT NOT NULL,
                rhythm_hash       TEXT NOT NULL,
                intervals         TEXT NOT NULL,
                pitch_classes     TEXT NOT NULL,
                contour           TEXT NOT NULL,
                range_semitones   INTEGER NOT NULL,
                mean_pitch        REAL NOT NULL,
                pitch_hash        TEXT NOT NULL,

                occurrence_count  INTEGER NOT NULL DEFAULT 1,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_patterns_rhythm ON patterns(rhythm_hash);
            CREATE INDEX IF NOT EXISTS idx_patterns_pitch ON patterns(pitch_hash);
            CREATE INDEX IF NOT EXISTS idx_patterns_occurrence ON patterns(occurrence_count);
            CREATE INDEX IF NOT EXISTS idx_patterns_bars ON patterns(num_bars);

            CREATE TABLE IF NOT EXISTS pattern_instances (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern_hash    TEXT NOT NULL REFERENCES patterns(hash) ON DELETE CASCADE,
                track_id        INTEGER NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                start_bar       INTEGER NOT NULL,
                end_bar         INTEGER NOT NULL,
                transposition   INTEGER NOT NULL,
                confidence      REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_instances_pattern ON pattern_instances(pattern_hash);
            CREATE INDEX IF NOT EXISTS idx_instances_track ON pattern_instances(track_id);
            ",
        )?;
        Ok(())
    }
}
