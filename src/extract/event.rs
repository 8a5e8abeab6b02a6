use chrono::{DateTime, Datelike, Timelike, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Deserializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

use super::{read_records, ExtractError, RecordPolicy};
use crate::db::models::{SongKey, SongplayRow, TimeRow, UserRow};
use crate::db::queries;

/// The only event type that represents an actual song play.
pub const PLAY_PAGE: &str = "NextSong";

/// Format used for `start_time` in the `time` and `songplays` tables.
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One line of an activity log (partial).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEvent {
    page: String,
    ts: i64,
    #[serde(default, deserialize_with = "user_id_opt")]
    user_id: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    length: Option<f64>,
    #[serde(default)]
    session_id: Option<i64>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    user_agent: Option<String>,
}

/// Logs carry `userId` as a string, a number, or `""` for logged-out users.
fn user_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match Option::<RawId>::deserialize(deserializer)? {
        Some(RawId::Text(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(RawId::Int(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A play whose song/artist ids have not been looked up yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSongplay {
    pub row: SongplayRow,
    /// `None` when the event lacks a title, artist or length to match on.
    pub key: Option<SongKey>,
}

/// Everything one log file contributes, in load order: time rows, then
/// users, then songplays.
#[derive(Debug, Default)]
pub struct EventBatch {
    /// One per play event, duplicates included.
    pub times: Vec<TimeRow>,
    /// Distinct by `user_id` in first-seen order, carrying the latest values seen.
    pub users: Vec<UserRow>,
    pub plays: Vec<PendingSongplay>,
    /// Non-play events dropped by the page filter.
    pub filtered: usize,
    pub skipped: usize,
}

struct PlayEvent {
    time: TimeRow,
    user: Option<UserRow>,
    play: PendingSongplay,
}

/// Split an epoch-millisecond timestamp into calendar fields, in UTC.
pub fn time_row(ts_ms: i64) -> Option<TimeRow> {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(ts_ms)?;
    Some(TimeRow {
        start_time: dt.format(START_TIME_FORMAT).to_string(),
        hour: dt.hour(),
        day: dt.day(),
        week: dt.iso_week().week(),
        month: dt.month(),
        year: dt.year(),
        weekday: dt.weekday().num_days_from_monday(),
    })
}

/// Stable id for a play, so reloading the same file inserts nothing new.
pub fn songplay_id(ts_ms: i64, user_id: Option<&str>, session_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", ts_ms, user_id.unwrap_or(""), session_id).as_bytes());
    // First 16 bytes of the digest, as 32 hex chars
    hasher.finalize()[..16].iter().map(|b| format!("{b:02x}")).collect()
}

fn to_play(e: LogEvent) -> Result<Option<PlayEvent>, String> {
    if e.page != PLAY_PAGE {
        return Ok(None);
    }

    let time = time_row(e.ts).ok_or_else(|| format!("timestamp {} out of range", e.ts))?;
    let level = e.level.ok_or("missing field `level`")?;
    let session_id = e.session_id.ok_or("missing field `sessionId`")?;

    let user = e.user_id.as_ref().map(|id| UserRow {
        user_id: id.clone(),
        first_name: e.first_name,
        last_name: e.last_name,
        gender: e.gender,
        level: level.clone(),
    });

    let key = match (e.song, e.artist, e.length) {
        (Some(title), Some(artist_name), Some(duration)) => Some(SongKey {
            title,
            artist_name,
            duration,
        }),
        _ => None,
    };

    let row = SongplayRow {
        songplay_id: songplay_id(e.ts, e.user_id.as_deref(), session_id),
        start_time: time.start_time.clone(),
        user_id: e.user_id,
        level,
        song_id: None,
        artist_id: None,
        session_id,
        location: e.location,
        user_agent: e.user_agent,
    };

    Ok(Some(PlayEvent {
        time,
        user,
        play: PendingSongplay { row, key },
    }))
}

/// Extract time, user and (unresolved) songplay rows from a log file.
///
/// Only `NextSong` events survive. Events without a user id produce no user
/// row but still produce a songplay with a null `user_id`.
pub fn extract_log_file(path: &Path, policy: RecordPolicy) -> Result<EventBatch, ExtractError> {
    let extracted = read_records(path, policy, to_play)?;

    let mut batch = EventBatch {
        filtered: extracted.filtered,
        skipped: extracted.skipped,
        ..Default::default()
    };
    let mut user_index: HashMap<String, usize> = HashMap::new();

    for event in extracted.records {
        batch.times.push(event.time);
        if let Some(user) = event.user {
            match user_index.get(&user.user_id) {
                Some(&i) => batch.users[i] = user,
                None => {
                    user_index.insert(user.user_id.clone(), batch.users.len());
                    batch.users.push(user);
                }
            }
        }
        batch.plays.push(event.play);
    }

    Ok(batch)
}

/// Fill in `song_id`/`artist_id` from the catalog. A miss leaves both null.
pub fn resolve_songplay(conn: &Connection, pending: PendingSongplay) -> Result<SongplayRow, ExtractError> {
    let mut row = pending.row;
    if let Some(key) = &pending.key {
        if let Some((song_id, artist_id)) = queries::find_song(conn, key)? {
            row.song_id = Some(song_id);
            row.artist_id = Some(artist_id);
        } else {
            log::trace!("No catalog match for {:?} by {:?}", key.title, key.artist_name);
        }
    }
    Ok(row)
}
