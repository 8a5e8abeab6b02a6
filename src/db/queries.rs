use super::models::{ArtistRow, SongKey, SongRow, SongplayRow, TableCounts, TimeRow, UserRow};
use super::{Database, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;

/// What to do when a catalog row (song or artist) already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Keep the first row seen; later duplicates are dropped.
    #[default]
    Ignore,
    /// Overwrite with the most recently loaded row.
    Update,
}

/// What an insert did to its target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowWrite {
    Inserted,
    /// An existing row was overwritten by an upsert.
    Updated,
    /// The key already existed and the row was left alone.
    Ignored,
}

impl RowWrite {
    fn from_insert(changed: usize) -> Self {
        if changed > 0 { Self::Inserted } else { Self::Ignored }
    }

    fn from_upsert(existed: bool) -> Self {
        if existed { Self::Updated } else { Self::Inserted }
    }
}

// Inserts take a plain `&Connection` so they run inside whatever transaction
// the caller holds (a `Transaction` derefs to `Connection`).

/// SQLite counts an `ON CONFLICT DO UPDATE` as a changed row, so upserts look
/// the key up first to tell an insert from an update.
fn key_exists(conn: &Connection, sql: &str, key: &str) -> Result<bool> {
    let found = conn
        .prepare_cached(sql)?
        .query_row(params![key], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_song(conn: &Connection, s: &SongRow, policy: ConflictPolicy) -> Result<RowWrite> {
    let sql = match policy {
        ConflictPolicy::Ignore => {
            "INSERT INTO songs (song_id, title, artist_id, year, duration)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(song_id) DO NOTHING"
        }
        ConflictPolicy::Update => {
            "INSERT INTO songs (song_id, title, artist_id, year, duration)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(song_id) DO UPDATE SET
                title = excluded.title,
                artist_id = excluded.artist_id,
                year = excluded.year,
                duration = excluded.duration"
        }
    };
    let existed = policy == ConflictPolicy::Update
        && key_exists(conn, "SELECT 1 FROM songs WHERE song_id = ?1", &s.song_id)?;
    let changed = conn
        .prepare_cached(sql)?
        .execute(params![s.song_id, s.title, s.artist_id, s.year, s.duration])?;
    Ok(match policy {
        ConflictPolicy::Ignore => RowWrite::from_insert(changed),
        ConflictPolicy::Update => RowWrite::from_upsert(existed),
    })
}

pub fn insert_artist(conn: &Connection, a: &ArtistRow, policy: ConflictPolicy) -> Result<RowWrite> {
    let sql = match policy {
        ConflictPolicy::Ignore => {
            "INSERT INTO artists (artist_id, name, location, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(artist_id) DO NOTHING"
        }
        ConflictPolicy::Update => {
            "INSERT INTO artists (artist_id, name, location, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(artist_id) DO UPDATE SET
                name = excluded.name,
                location = excluded.location,
                latitude = excluded.latitude,
                longitude = excluded.longitude"
        }
    };
    let existed = policy == ConflictPolicy::Update
        && key_exists(conn, "SELECT 1 FROM artists WHERE artist_id = ?1", &a.artist_id)?;
    let changed = conn
        .prepare_cached(sql)?
        .execute(params![a.artist_id, a.name, a.location, a.latitude, a.longitude])?;
    Ok(match policy {
        ConflictPolicy::Ignore => RowWrite::from_insert(changed),
        ConflictPolicy::Update => RowWrite::from_upsert(existed),
    })
}

pub fn insert_time(conn: &Connection, t: &TimeRow) -> Result<RowWrite> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO time (start_time, hour, day, week, month, year, weekday)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(start_time) DO NOTHING",
        )?
        .execute(params![t.start_time, t.hour, t.day, t.week, t.month, t.year, t.weekday])?;
    Ok(RowWrite::from_insert(changed))
}

/// Users are always upserted: `level` changes over time and the latest wins.
/// Names and gender missing from the newer event keep their stored values.
pub fn upsert_user(conn: &Connection, u: &UserRow) -> Result<RowWrite> {
    let existed = key_exists(conn, "SELECT 1 FROM users WHERE user_id = ?1", &u.user_id)?;
    conn.prepare_cached(
        "INSERT INTO users (user_id, first_name, last_name, gender, level)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(user_id) DO UPDATE SET
            first_name = COALESCE(excluded.first_name, users.first_name),
            last_name = COALESCE(excluded.last_name, users.last_name),
            gender = COALESCE(excluded.gender, users.gender),
            level = excluded.level",
    )?
    .execute(params![u.user_id, u.first_name, u.last_name, u.gender, u.level])?;
    Ok(RowWrite::from_upsert(existed))
}

pub fn insert_songplay(conn: &Connection, p: &SongplayRow) -> Result<RowWrite> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO songplays (
                songplay_id, start_time, user_id, level, song_id, artist_id,
                session_id, location, user_agent
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(songplay_id) DO NOTHING",
        )?
        .execute(params![
            p.songplay_id, p.start_time, p.user_id, p.level, p.song_id, p.artist_id,
            p.session_id, p.location, p.user_agent,
        ])?;
    Ok(RowWrite::from_insert(changed))
}

/// Resolve (title, artist name, duration) to `(song_id, artist_id)` by exact match.
pub fn find_song(conn: &Connection, key: &SongKey) -> Result<Option<(String, String)>> {
    let found = conn
        .prepare_cached(
            "SELECT s.song_id, s.artist_id
             FROM songs s
             JOIN artists a ON a.artist_id = s.artist_id
             WHERE s.title = ?1 AND a.name = ?2 AND s.duration = ?3
             ORDER BY s.song_id
             LIMIT 1",
        )?
        .query_row(params![key.title, key.artist_name, key.duration], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    Ok(found)
}

impl Database {
    /// Row counts for all five tables.
    pub fn table_counts(&self) -> Result<TableCounts> {
        let count = |table: &str| -> Result<i64> {
            let n = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n)
        };

        Ok(TableCounts {
            songs: count("songs")?,
            artists: count("artists")?,
            users: count("users")?,
            time: count("time")?,
            songplays: count("songplays")?,
        })
    }

    /// Level currently stored for a user, if the user exists.
    pub fn user_level(&self, user_id: &str) -> Result<Option<String>> {
        let level = self
            .conn
            .query_row(
                "SELECT level FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(level)
    }
}
