use serde::Deserialize;
use std::path::Path;

use super::{read_records, ExtractError, Extracted, RecordPolicy};
use crate::db::models::{ArtistRow, SongRow};

/// One line of a song-catalog file (partial; unused fields such as
/// `num_songs` are ignored).
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    song_id: String,
    title: String,
    artist_id: String,
    artist_name: String,
    #[serde(default)]
    artist_location: Option<String>,
    #[serde(default, alias = "latitude")]
    artist_latitude: Option<f64>,
    #[serde(default, alias = "longitude")]
    artist_longitude: Option<f64>,
    year: i32,
    duration: f64,
}

/// A song and its performing artist, taken from a single catalog line.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub song: SongRow,
    pub artist: ArtistRow,
}

impl From<CatalogRecord> for CatalogEntry {
    fn from(r: CatalogRecord) -> Self {
        Self {
            song: SongRow {
                song_id: r.song_id,
                title: r.title,
                artist_id: r.artist_id.clone(),
                year: r.year,
                duration: r.duration,
            },
            artist: ArtistRow {
                artist_id: r.artist_id,
                name: r.artist_name,
                location: r.artist_location,
                latitude: r.artist_latitude,
                longitude: r.artist_longitude,
            },
        }
    }
}

fn validate(r: CatalogRecord) -> Result<Option<CatalogEntry>, String> {
    if r.song_id.trim().is_empty() {
        return Err("empty song_id".to_string());
    }
    if r.artist_id.trim().is_empty() {
        return Err("empty artist_id".to_string());
    }
    Ok(Some(r.into()))
}

/// Extract song and artist rows from a catalog file.
pub fn extract_song_file(
    path: &Path,
    policy: RecordPolicy,
) -> Result<Extracted<CatalogEntry>, ExtractError> {
    read_records(path, policy, validate)
}
