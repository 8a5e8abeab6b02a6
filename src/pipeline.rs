//! Sequences locate → extract → load for both data roots, one transaction per file.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::models::{LoadStats, TableCounts};
use crate::db::queries::{self, ConflictPolicy, RowWrite};
use crate::db::{Database, DbError};
use crate::extract::{event, song, ExtractError, RecordPolicy};
use crate::scanner::{self, ScanError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("{0}")]
    Extract(#[from] ExtractError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Failed to load {path}: {source}")]
    FileFailed {
        path: String,
        #[source]
        source: Box<PipelineError>,
    },
}

/// Knobs for a load run.
#[derive(Debug, Clone)]
pub struct EtlOptions {
    /// Data file extension, without the dot.
    pub extension: String,
    pub conflict: ConflictPolicy,
    pub record_policy: RecordPolicy,
    /// Stop the run at the first file that fails to load.
    pub fail_fast: bool,
    pub show_progress: bool,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self {
            extension: crate::DATA_EXTENSION.to_string(),
            conflict: ConflictPolicy::default(),
            record_policy: RecordPolicy::default(),
            fail_fast: false,
            show_progress: true,
        }
    }
}

/// Outcome of loading one file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileReport {
    pub rows: LoadStats,
    pub filtered: usize,
    pub skipped: usize,
}

/// Totals for one data root.
#[derive(Debug, Default)]
pub struct PhaseSummary {
    pub files_found: usize,
    pub files_loaded: usize,
    /// Files rolled back, with the cause.
    pub failures: Vec<(PathBuf, String)>,
    pub records_filtered: usize,
    pub records_skipped: usize,
    pub rows: LoadStats,
}

impl PhaseSummary {
    fn record(&mut self, report: &FileReport) {
        self.files_loaded += 1;
        self.records_filtered += report.filtered;
        self.records_skipped += report.skipped;
        self.rows.add(&report.rows);
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub catalog: PhaseSummary,
    pub events: PhaseSummary,
    /// Table sizes after the run.
    pub totals: TableCounts,
}

impl RunSummary {
    pub fn files_failed(&self) -> usize {
        self.catalog.failures.len() + self.events.failures.len()
    }
}

/// Load every catalog file, then every log file.
///
/// The catalog goes first because songplay resolution looks up songs and
/// artists already in the database.
pub fn run_etl(
    db: &Database,
    song_dir: &Path,
    log_dir: &Path,
    opts: &EtlOptions,
) -> Result<RunSummary, PipelineError> {
    let catalog = process_data(db, song_dir, opts, load_song_file)?;
    let events = process_data(db, log_dir, opts, load_log_file)?;
    let totals = db.table_counts()?;

    Ok(RunSummary {
        catalog,
        events,
        totals,
    })
}

/// Locate the data files under `dir` and feed each through `load_file`,
/// committing per file.
pub fn process_data<F>(
    db: &Database,
    dir: &Path,
    opts: &EtlOptions,
    load_file: F,
) -> Result<PhaseSummary, PipelineError>
where
    F: Fn(&Database, &Path, &EtlOptions) -> Result<FileReport, PipelineError>,
{
    let files = scanner::find_data_files(dir, &opts.extension)?;
    let total = files.len();
    println!("{} files found in {}", total, dir.display());

    let mut summary = PhaseSummary {
        files_found: total,
        ..Default::default()
    };

    let pb = progress_bar(total as u64, opts.show_progress);

    for path in &files {
        match load_file(db, path.as_path(), opts) {
            Ok(report) => {
                log::info!(
                    "Loaded {}: {} filtered, {} skipped",
                    path.display(),
                    report.filtered,
                    report.skipped
                );
                summary.record(&report);
            }
            Err(e) => {
                log::error!("Rolled back {}: {}", path.display(), e);
                if opts.fail_fast {
                    pb.abandon();
                    return Err(PipelineError::FileFailed {
                        path: path.display().to_string(),
                        source: Box::new(e),
                    });
                }
                summary.failures.push((path.clone(), e.to_string()));
            }
        }
        pb.inc(1);
    }

    pb.finish();
    Ok(summary)
}

fn progress_bar(total: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stdout());
    match ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos}/{len} files processed ({eta})") {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => log::debug!("Progress template rejected: {}", e),
    }
    pb
}

/// Insert the songs and artists from one catalog file.
pub fn load_song_file(
    db: &Database,
    path: &Path,
    opts: &EtlOptions,
) -> Result<FileReport, PipelineError> {
    let extracted = song::extract_song_file(path, opts.record_policy)?;
    let mut report = FileReport {
        filtered: extracted.filtered,
        skipped: extracted.skipped,
        ..Default::default()
    };

    let tx = db.conn.unchecked_transaction().map_err(DbError::from)?;
    for entry in &extracted.records {
        let write = queries::insert_song(&tx, &entry.song, opts.conflict)?;
        report.rows.tally(write, |r| &mut r.songs);
        let write = queries::insert_artist(&tx, &entry.artist, opts.conflict)?;
        report.rows.tally(write, |r| &mut r.artists);
    }
    tx.commit().map_err(DbError::from)?;

    Ok(report)
}

/// Insert the time, user and songplay rows from one log file.
///
/// Time and user rows go in before any songplay so each fact row's
/// dimensions already exist.
pub fn load_log_file(
    db: &Database,
    path: &Path,
    opts: &EtlOptions,
) -> Result<FileReport, PipelineError> {
    let batch = event::extract_log_file(path, opts.record_policy)?;
    let mut report = FileReport {
        filtered: batch.filtered,
        skipped: batch.skipped,
        ..Default::default()
    };

    let tx = db.conn.unchecked_transaction().map_err(DbError::from)?;
    for t in &batch.times {
        let write = queries::insert_time(&tx, t)?;
        report.rows.tally(write, |r| &mut r.time);
    }
    for u in &batch.users {
        let write = queries::upsert_user(&tx, u)?;
        report.rows.tally(write, |r| &mut r.users);
    }
    for pending in batch.plays {
        let row = event::resolve_songplay(&tx, pending)?;
        let write = queries::insert_songplay(&tx, &row)?;
        if write == RowWrite::Inserted && row.song_id.is_some() {
            report.rows.resolved += 1;
        }
        report.rows.tally(write, |r| &mut r.songplays);
    }
    tx.commit().map_err(DbError::from)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use std::fs;
    use tempfile::TempDir;

    const SONG: &str = r#"{"num_songs": 1, "artist_id": "ARD7TVE1187B99BFB1", "artist_latitude": null, "artist_longitude": null, "artist_location": "California - LA", "artist_name": "Casual", "song_id": "SOMZWCG12A8C13C480", "title": "I Didn't Mean To", "duration": 218.93179, "year": 0}"#;

    const MATCHING_PLAY: &str = r#"{"artist":"Casual","auth":"Logged In","firstName":"Walter","gender":"M","itemInSession":0,"lastName":"Frye","length":218.93179,"level":"free","location":"San Francisco-Oakland-Hayward, CA","method":"PUT","page":"NextSong","registration":1540919166796.0,"sessionId":38,"song":"I Didn't Mean To","status":200,"ts":1541105830796,"userAgent":"Mozilla/5.0","userId":"39"}"#;
    const OTHER_PLAY: &str = r#"{"artist":"Des'ree","auth":"Logged In","firstName":"Kaylee","gender":"F","itemInSession":1,"lastName":"Summers","length":246.30812,"level":"free","location":"Phoenix-Mesa-Scottsdale, AZ","method":"PUT","page":"NextSong","registration":1540344794796.0,"sessionId":139,"song":"You Gotta Be","status":200,"ts":1541106106796,"userAgent":"Mozilla/5.0","userId":"8"}"#;
    const PAGE_VIEW: &str = r#"{"artist":null,"auth":"Logged In","firstName":"Kaylee","gender":"F","itemInSession":2,"lastName":"Summers","length":null,"level":"free","location":"Phoenix-Mesa-Scottsdale, AZ","method":"GET","page":"PageView","registration":1540344794796.0,"sessionId":139,"song":null,"status":200,"ts":1541106352796,"userAgent":"Mozilla/5.0","userId":"8"}"#;

    struct Fixture {
        _dir: TempDir,
        song_dir: PathBuf,
        log_dir: PathBuf,
    }

    fn fixture(log_lines: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let song_dir = dir.path().join("song_data");
        let log_dir = dir.path().join("log_data");
        fs::create_dir_all(song_dir.join("A").join("A")).unwrap();
        fs::create_dir_all(log_dir.join("2018").join("11")).unwrap();
        fs::write(song_dir.join("A").join("A").join("TRAAAAW128F429D538.json"), SONG).unwrap();
        fs::write(
            log_dir.join("2018").join("11").join("2018-11-01-events.json"),
            log_lines.join("\n"),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            song_dir,
            log_dir,
        }
    }

    fn quiet() -> EtlOptions {
        EtlOptions {
            show_progress: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end() {
        let fx = fixture(&[MATCHING_PLAY, OTHER_PLAY, PAGE_VIEW]);
        let db = Database::open_in_memory().unwrap();

        let summary = run_etl(&db, &fx.song_dir, &fx.log_dir, &quiet()).unwrap();
        assert_eq!(summary.files_failed(), 0);
        assert_eq!(summary.catalog.files_found, 1);
        assert_eq!(summary.events.files_loaded, 1);
        assert_eq!(summary.events.records_filtered, 1);
        assert_eq!(summary.events.rows.resolved, 1);

        let t = summary.totals;
        assert_eq!(t.songs, 1);
        assert_eq!(t.artists, 1);
        assert_eq!(t.time, 2);
        assert_eq!(t.users, 2);
        assert_eq!(t.songplays, 2);

        let resolved: Vec<(Option<String>, Option<String>)> = {
            let mut stmt = db
                .conn
                .prepare("SELECT song_id, artist_id FROM songplays ORDER BY start_time")
                .unwrap();
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(
            resolved,
            vec![
                (
                    Some("SOMZWCG12A8C13C480".to_string()),
                    Some("ARD7TVE1187B99BFB1".to_string())
                ),
                (None, None),
            ]
        );
    }

    #[test]
    fn test_reprocessing_is_idempotent() {
        let fx = fixture(&[MATCHING_PLAY, OTHER_PLAY, PAGE_VIEW]);
        let db = Database::open_in_memory().unwrap();

        let first = run_etl(&db, &fx.song_dir, &fx.log_dir, &quiet()).unwrap();
        let second = run_etl(&db, &fx.song_dir, &fx.log_dir, &quiet()).unwrap();

        assert_eq!(first.totals, second.totals);
        assert_eq!(first.events.rows.users, 2);
        assert_eq!(first.events.rows.resolved, 1);
        assert_eq!(second.catalog.rows, LoadStats::default());
        assert_eq!(second.events.rows.users, 0);
        assert_eq!(second.events.rows.updated, 2);
        assert_eq!(second.events.rows.time, 0);
        assert_eq!(second.events.rows.songplays, 0);
        assert_eq!(second.events.rows.resolved, 0);
    }

    #[test]
    fn test_level_change_across_files() {
        let fx = fixture(&[OTHER_PLAY]);
        let later = OTHER_PLAY
            .replace(r#""level":"free""#, r#""level":"paid""#)
            .replace("1541106106796", "1541199999000");
        fs::write(fx.log_dir.join("2018").join("11").join("2018-11-02-events.json"), later).unwrap();

        let db = Database::open_in_memory().unwrap();
        run_etl(&db, &fx.song_dir, &fx.log_dir, &quiet()).unwrap();

        assert_eq!(db.user_level("8").unwrap().as_deref(), Some("paid"));
        let levels: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT level FROM songplays WHERE user_id = ?1 ORDER BY start_time")
                .unwrap();
            stmt.query_map(params!["8"], |r| r.get(0))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(levels, vec!["free", "paid"]);
    }

    #[test]
    fn test_anonymous_play_has_no_user_row() {
        let anon = MATCHING_PLAY.replace(r#""userId":"39""#, r#""userId":"""#);
        let fx = fixture(&[anon.as_str()]);
        let db = Database::open_in_memory().unwrap();

        let summary = run_etl(&db, &fx.song_dir, &fx.log_dir, &quiet()).unwrap();
        assert_eq!(summary.totals.users, 0);
        assert_eq!(summary.totals.songplays, 1);
    }

    #[test]
    fn test_bad_file_skipped_by_default() {
        let fx = fixture(&[MATCHING_PLAY]);
        fs::write(fx.song_dir.join("broken.json"), "{\"song_id\": 12").unwrap();
        let db = Database::open_in_memory().unwrap();

        let opts = EtlOptions {
            record_policy: RecordPolicy::Abort,
            ..quiet()
        };
        let summary = run_etl(&db, &fx.song_dir, &fx.log_dir, &opts).unwrap();
        assert_eq!(summary.catalog.failures.len(), 1);
        assert_eq!(summary.catalog.files_loaded, 1);
        assert_eq!(summary.totals.songs, 1);
        assert_eq!(summary.totals.songplays, 1);
    }

    #[test]
    fn test_fail_fast_halts_and_rolls_back() {
        let fx = fixture(&[MATCHING_PLAY]);
        // Sorts ahead of the good catalog file.
        fs::write(
            fx.song_dir.join("A").join("0-partial.json"),
            format!("{}\nnot json\n", SONG.replace("SOMZWCG12A8C13C480", "SOPARTIAL")),
        )
        .unwrap();
        let db = Database::open_in_memory().unwrap();

        let opts = EtlOptions {
            record_policy: RecordPolicy::Abort,
            fail_fast: true,
            ..quiet()
        };
        let err = run_etl(&db, &fx.song_dir, &fx.log_dir, &opts).unwrap_err();
        assert!(matches!(err, PipelineError::FileFailed { .. }));

        let counts = db.table_counts().unwrap();
        assert_eq!(counts.songs, 0);
        assert_eq!(counts.songplays, 0);
    }

    #[test]
    fn test_db_failure_rolls_back_file() {
        let fx = fixture(&[MATCHING_PLAY, OTHER_PLAY]);
        let db = Database::open_in_memory().unwrap();
        db.conn.execute("DROP TABLE songplays", []).unwrap();

        let log_file = fx.log_dir.join("2018").join("11").join("2018-11-01-events.json");
        assert!(load_log_file(&db, &log_file, &quiet()).is_err());

        let (time, users): (i64, i64) = db
            .conn
            .query_row(
                "SELECT (SELECT COUNT(*) FROM time), (SELECT COUNT(*) FROM users)",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((time, users), (0, 0));
    }

    #[test]
    fn test_empty_roots() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let summary = run_etl(&db, dir.path(), dir.path(), &quiet()).unwrap();
        assert_eq!(summary.catalog.files_found, 0);
        assert_eq!(summary.totals, TableCounts::default());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            run_etl(&db, &missing, dir.path(), &quiet()),
            Err(PipelineError::Scan(_))
        ));
    }
}
