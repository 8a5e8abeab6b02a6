use super::queries::RowWrite;

/// A row for the `songs` dimension, taken from one catalog record.
#[derive(Debug, Clone, PartialEq)]
pub struct SongRow {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    /// 0 means the year is unknown; it is stored as-is.
    pub year: i32,
    pub duration: f64,
}

/// A row for the `artists` dimension, co-created with a [`SongRow`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistRow {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Calendar decomposition of an event timestamp (UTC).
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRow {
    pub start_time: String,
    pub hour: u32,
    pub day: u32,
    /// ISO-8601 week number.
    pub week: u32,
    pub month: u32,
    pub year: i32,
    /// 0 = Monday .. 6 = Sunday.
    pub weekday: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub level: String,
}

/// Fact row for one song-play event.
///
/// `song_id`/`artist_id` stay `None` until the loader resolves them against the
/// catalog; an unresolved lookup is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct SongplayRow {
    pub songplay_id: String,
    pub start_time: String,
    pub user_id: Option<String>,
    pub level: String,
    pub song_id: Option<String>,
    pub artist_id: Option<String>,
    pub session_id: i64,
    pub location: Option<String>,
    pub user_agent: Option<String>,
}

/// Search key used to resolve a songplay against loaded songs and artists.
#[derive(Debug, Clone, PartialEq)]
pub struct SongKey {
    pub title: String,
    pub artist_name: String,
    pub duration: f64,
}

/// Total rows per table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub songs: i64,
    pub artists: i64,
    pub users: i64,
    pub time: i64,
    pub songplays: i64,
}

/// New rows inserted during a load, per table. Rows dropped or overwritten
/// by an on-conflict clause are not counted here.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub songs: u64,
    pub artists: u64,
    pub users: u64,
    pub time: u64,
    pub songplays: u64,
    /// Existing rows overwritten by an upsert, across all tables.
    pub updated: u64,
    /// Inserted songplays whose song/artist lookup found a match.
    pub resolved: u64,
}

impl LoadStats {
    /// Count one write against `table`'s insert counter.
    pub fn tally(&mut self, write: RowWrite, table: fn(&mut LoadStats) -> &mut u64) {
        match write {
            RowWrite::Inserted => *table(self) += 1,
            RowWrite::Updated => self.updated += 1,
            RowWrite::Ignored => {}
        }
    }

    pub fn add(&mut self, other: &LoadStats) {
        self.songs += other.songs;
        self.artists += other.artists;
        self.users += other.users;
        self.time += other.time;
        self.songplays += other.songplays;
        self.updated += other.updated;
        self.resolved += other.resolved;
    }
}
