pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Current schema version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// Tables in drop order (fact table first).
pub const TABLES: &[&str] = &["songplays", "users", "songs", "artists", "time"];

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
            return Err(DbError::Migration(format!(
                "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.create_tables()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// Star schema: one fact table (songplays) and four dimensions.
    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS songs (
                song_id     TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                artist_id   TEXT NOT NULL,
                year        INTEGER NOT NULL,
                duration    REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_songs_title ON songs(title);

            CREATE TABLE IF NOT EXISTS artists (
                artist_id   TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                location    TEXT,
                latitude    REAL,
                longitude   REAL
            );
            CREATE INDEX IF NOT EXISTS idx_artists_name ON artists(name);

            CREATE TABLE IF NOT EXISTS users (
                user_id     TEXT PRIMARY KEY,
                first_name  TEXT,
                last_name   TEXT,
                gender      TEXT,
                level       TEXT NOT NULL
            );

            -- start_time is UTC, formatted YYYY-MM-DD HH:MM:SS.mmm
            CREATE TABLE IF NOT EXISTS time (
                start_time  TEXT PRIMARY KEY,
                hour        INTEGER NOT NULL,
                day         INTEGER NOT NULL,
                week        INTEGER NOT NULL,
                month       INTEGER NOT NULL,
                year        INTEGER NOT NULL,
                weekday     INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS songplays (
                songplay_id TEXT PRIMARY KEY,
                start_time  TEXT NOT NULL REFERENCES time(start_time),
                user_id     TEXT,
                level       TEXT NOT NULL,
                song_id     TEXT,
                artist_id   TEXT,
                session_id  INTEGER NOT NULL,
                location    TEXT,
                user_agent  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_songplays_user ON songplays(user_id);
            CREATE INDEX IF NOT EXISTS idx_songplays_song ON songplays(song_id);
            ",
        )?;
        Ok(())
    }

    /// Drop every table and recreate the schema from scratch.
    pub fn reset(&self) -> Result<()> {
        for table in TABLES {
            self.conn.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        }
        self.create_tables()?;
        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        log::info!("Dropped and recreated {} tables", TABLES.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(db: &Database) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    #[test]
    fn test_schema_has_five_tables() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            table_names(&db),
            vec!["artists", "songplays", "songs", "time", "users"]
        );
    }

    #[test]
    fn test_reset_clears_rows() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO users (user_id, level) VALUES ('1', 'free')",
                [],
            )
            .unwrap();
        db.reset().unwrap();

        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(table_names(&db).len(), 5);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("future.db");
        {
            let db = Database::open(&path).unwrap();
            db.conn.pragma_update(None, "user_version", 99).unwrap();
        }
        assert!(matches!(Database::open(&path), Err(DbError::Migration(_))));
    }
}
