//! Corpus ingest: walk note-stream documents, analyze each song's tracks
//! (segment, fingerprint, deduplicate), and index the results.
//!
//! Documents are processed in chunks: a chunk is analyzed in parallel with
//! rayon, then each song is written in its own transaction before the next
//! chunk starts. This keeps memory bounded and makes progress durable: a
//! crash mid-ingest loses at most the chunk in flight, never part of a song.

use crate::config::AnalysisConfig;
use crate::db::models::{NewSong, PatternWrite, TrackPatterns};
use crate::db::Database;
use crate::dedup::{deduplicate, DedupError};
use crate::fingerprint::{fingerprint, CombinedFingerprint};
use crate::notes::{MeterChange, MeterMap, NoteEvent, MIDI_MAX};
use crate::segment::{segment, SegmentError};
use crate::SUPPORTED_EXTENSIONS;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Invalid document {path}: {message}")]
    InvalidDocument { path: String, message: String },
    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),
    #[error("Deduplication error: {0}")]
    Dedup(#[from] DedupError),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::StoreError),
}

pub struct IngestResult {
    pub scanned: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// One song's note streams as they arrive on disk.
#[derive(Debug, Deserialize)]
pub struct SongDocument {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meter_map: Vec<MeterChange>,
    /// Song length in bars; inferred from the notes when absent.
    pub total_bars: Option<u32>,
    pub tracks: Vec<TrackDocument>,
}

#[derive(Debug, Deserialize)]
pub struct TrackDocument {
    pub name: String,
    pub channel: Option<u8>,
    pub notes: Vec<NoteEvent>,
}

/// A candidate file that passed the unchanged-skip check.
struct PendingFile {
    path: PathBuf,
    file_size: i64,
    file_modified: String,
}

/// Walk `paths` for note-stream documents and index each one.
///
/// Unchanged files (same size and mtime as last time) are skipped unless
/// `force` is set. A bad document fails alone; the rest of the run
/// continues.
pub fn ingest(
    db: &Database,
    paths: &[String],
    options: &AnalysisConfig,
    force: bool,
    jobs: usize,
) -> std::result::Result<IngestResult, IngestError> {
    // First pass: collect candidate documents
    let mut files: Vec<PathBuf> = Vec::new();
    for path in paths {
        for entry in WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_lowercase();
            if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                files.push(entry.into_path());
            }
        }
    }

    let mut result = IngestResult {
        scanned: 0,
        indexed: 0,
        skipped: 0,
        failed: 0,
    };

    // Second pass: drop files already indexed at this size+mtime
    let mut pending: Vec<PendingFile> = Vec::new();
    for path in files {
        result.scanned += 1;
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Cannot stat {}: {}", path.display(), e);
                result.failed += 1;
                continue;
            }
        };
        let file_size = meta.len() as i64;
        let file_modified = format_mtime(&meta);
        let source_path = path.to_string_lossy().to_string();

        if !force && db.song_unchanged(&source_path, file_size, &file_modified)? {
            result.skipped += 1;
            continue;
        }
        pending.push(PendingFile {
            path,
            file_size,
            file_modified,
        });
    }

    if pending.is_empty() {
        log::info!("No documents to index");
        return Ok(result);
    }

    log::info!("Indexing {} documents with {} workers", pending.len(), jobs);

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .unwrap();

    // Analyze a chunk in parallel, then write each song in its own
    // transaction. Chunk size = jobs * 2 keeps the pool busy while only
    // one chunk of analyzed songs is in memory.
    let chunk_size = jobs.max(1) * 2;
    for chunk in pending.chunks(chunk_size) {
        let analyzed: Vec<_> = pool.install(|| {
            use rayon::prelude::*;
            chunk
                .par_iter()
                .map(|file| {
                    let outcome = process_file(file, options);
                    pb.inc(1);
                    (file, outcome)
                })
                .collect()
        });

        for (file, outcome) in analyzed {
            match outcome {
                Ok((song, tracks)) => match db.index_song(&song, &tracks) {
                    Ok(_) => result.indexed += 1,
                    Err(e) => {
                        log::error!("DB error indexing {}: {}", file.path.display(), e);
                        result.failed += 1;
                    }
                },
                Err(e) => {
                    log::warn!("Skipping {}: {}", file.path.display(), e);
                    result.failed += 1;
                }
            }
        }

        pb.set_message(format!("{} indexed, {} failed", result.indexed, result.failed));
    }

    pb.finish_with_message(format!(
        "Done: {} indexed, {} skipped, {} failed",
        result.indexed, result.skipped, result.failed
    ));

    Ok(result)
}

/// Parse, validate, and analyze one document. Pure aside from the read, so
/// safe to fan out across worker threads.
fn process_file(
    file: &PendingFile,
    options: &AnalysisConfig,
) -> std::result::Result<(NewSong, Vec<TrackPatterns>), IngestError> {
    let doc = load_document(&file.path)?;
    let tracks = analyze_document(&doc, options)?;

    let song = NewSong {
        source_path: file.path.to_string_lossy().to_string(),
        file_size: file.file_size,
        file_modified: file.file_modified.clone(),
        title: doc.title,
        artist: doc.artist,
        album: doc.album,
        genre: doc.genre,
        year: doc.year,
        tags: doc.tags,
    };
    Ok((song, tracks))
}

fn load_document(path: &Path) -> std::result::Result<SongDocument, IngestError> {
    let text = std::fs::read_to_string(path)?;
    let doc: SongDocument = serde_json::from_str(&text).map_err(|e| IngestError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate(&doc, path)?;
    Ok(doc)
}

fn validate(doc: &SongDocument, path: &Path) -> std::result::Result<(), IngestError> {
    let invalid = |message: String| IngestError::InvalidDocument {
        path: path.display().to_string(),
        message,
    };

    if let Some(first) = doc.meter_map.first() {
        if first.bar != 0 {
            return Err(invalid(format!(
                "meter map must start at bar 0, got bar {}",
                first.bar
            )));
        }
        if first.beats_per_bar <= 0.0 {
            return Err(invalid(format!(
                "meter map starts with non-positive beats per bar {}",
                first.beats_per_bar
            )));
        }
    }

    for track in &doc.tracks {
        for (i, note) in track.notes.iter().enumerate() {
            if note.pitch > MIDI_MAX {
                return Err(invalid(format!(
                    "track '{}' note {} has pitch {} above the MIDI range",
                    track.name, i, note.pitch
                )));
            }
            if note.velocity > MIDI_MAX {
                return Err(invalid(format!(
                    "track '{}' note {} has velocity {} above the MIDI range",
                    track.name, i, note.velocity
                )));
            }
            if !(note.duration_beats > 0.0) {
                return Err(invalid(format!(
                    "track '{}' note {} has non-positive duration",
                    track.name, i
                )));
            }
            if !note.start_beat.is_finite() || note.start_beat < 0.0 {
                return Err(invalid(format!(
                    "track '{}' note {} has invalid start beat {}",
                    track.name, i, note.start_beat
                )));
            }
        }
    }

    Ok(())
}

/// Run the discovery pipeline over every track of a parsed document.
fn analyze_document(
    doc: &SongDocument,
    options: &AnalysisConfig,
) -> std::result::Result<Vec<TrackPatterns>, IngestError> {
    let meter = MeterMap::new(doc.meter_map.clone());

    let mut tracks = Vec::with_capacity(doc.tracks.len());
    for track in &doc.tracks {
        let total_bars = doc.total_bars.unwrap_or_else(|| {
            let furthest = track
                .notes
                .iter()
                .map(|n| n.end_beat())
                .fold(0.0_f64, f64::max);
            meter.bars_covering(furthest)
        });

        let chunks = segment(&track.notes, &meter, options.chunk_bars, total_bars)?;
        let fingerprints: Vec<CombinedFingerprint> = chunks
            .iter()
            .map(|c| fingerprint(c, options.grid_size))
            .collect();
        let outcome = deduplicate(
            &chunks,
            &fingerprints,
            options.rhythm_threshold,
            options.pitch_threshold,
            options.allow_transposition,
        )?;

        log::debug!(
            "Track '{}': {} chunks, {} unique patterns, repetition {:.2}",
            track.name,
            outcome.total_chunks,
            outcome.unique_patterns,
            outcome.repetition_ratio
        );

        // Every member is attributed to its cluster's canonical pattern
        let mut writes = Vec::with_capacity(outcome.total_chunks);
        for cluster in &outcome.clusters {
            let canonical_fp = &fingerprints[cluster.canonical];
            for member in &cluster.members {
                let chunk = &chunks[member.index];
                writes.push(PatternWrite {
                    fingerprint: canonical_fp.clone(),
                    start_bar: chunk.start_bar as i64,
                    end_bar: chunk.end_bar as i64,
                    transposition: member.transposition,
                    confidence: cluster.confidence,
                });
            }
        }

        tracks.push(TrackPatterns {
            name: track.name.clone(),
            channel: track.channel.map(|c| c as i32),
            note_count: track.notes.len() as i64,
            chunk_count: outcome.total_chunks as i64,
            unique_patterns: outcome.unique_patterns as i64,
            repetition_ratio: outcome.repetition_ratio,
            patterns: writes,
        });
    }

    Ok(tracks)
}

fn format_mtime(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchQuery;
    use serde_json::json;
    use tempfile::TempDir;

    fn options() -> AnalysisConfig {
        AnalysisConfig {
            chunk_bars: 1,
            grid_size: 16,
            rhythm_threshold: 0.8,
            pitch_threshold: 0.7,
            allow_transposition: true,
        }
    }

    fn write_doc(dir: &TempDir, name: &str, doc: serde_json::Value) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, doc.to_string()).unwrap();
        dir.path().to_string_lossy().to_string()
    }

    /// Quarter-note riff as JSON notes, one bar from `start`.
    fn riff_notes(base: u8, start: f64) -> Vec<serde_json::Value> {
        [0u8, 3, 5, 7]
            .iter()
            .enumerate()
            .map(|(i, step)| {
                json!({
                    "pitch": base + step,
                    "velocity": 90,
                    "start_beat": start + i as f64,
                    "duration_beats": 0.5,
                })
            })
            .collect()
    }

    fn repeated_riff_doc(bars: usize) -> serde_json::Value {
        let notes: Vec<_> = (0..bars)
            .flat_map(|bar| riff_notes(60, bar as f64 * 4.0))
            .collect();
        json!({
            "title": "Chameleon",
            "artist": "Herbie Hancock",
            "genre": "Jazz-Funk",
            "tags": ["live"],
            "total_bars": bars,
            "tracks": [{"name": "bass", "channel": 0, "notes": notes}],
        })
    }

    #[test]
    fn test_ingest_end_to_end() {
        let dir = TempDir::new().unwrap();
        let root = write_doc(&dir, "chameleon.json", repeated_riff_doc(4));
        let db = Database::open_in_memory().unwrap();

        let result = ingest(&db, &[root], &options(), false, 2).unwrap();
        assert_eq!(result.scanned, 1);
        assert_eq!(result.indexed, 1);
        assert_eq!(result.failed, 0);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_songs, 1);
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.total_patterns, 1);
        assert_eq!(stats.total_instances, 4);

        let results = db.search(&SearchQuery::default()).unwrap();
        assert_eq!(results.results[0].pattern.occurrence_count, 4);
        assert_eq!(results.results[0].artists, vec!["Herbie Hancock"]);

        // Track summary: four chunks, one pattern, 3/4 repeats
        let (chunk_count, unique, ratio): (i64, i64, f64) = db
            .conn
            .query_row(
                "SELECT chunk_count, unique_patterns, repetition_ratio FROM tracks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(chunk_count, 4);
        assert_eq!(unique, 1);
        assert!((ratio - 0.75).abs() < 1e-10);
    }

    #[test]
    fn test_unchanged_files_skip_unless_forced() {
        let dir = TempDir::new().unwrap();
        let root = write_doc(&dir, "chameleon.json", repeated_riff_doc(4));
        let db = Database::open_in_memory().unwrap();

        ingest(&db, &[root.clone()], &options(), false, 1).unwrap();
        let again = ingest(&db, &[root.clone()], &options(), false, 1).unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(again.indexed, 0);

        // Force re-runs the pipeline; counts stay consistent, not doubled
        let forced = ingest(&db, &[root], &options(), true, 1).unwrap();
        assert_eq!(forced.indexed, 1);
        let results = db.search(&SearchQuery::default()).unwrap();
        assert_eq!(results.results[0].pattern.occurrence_count, 4);
        assert_eq!(db.stats().unwrap().total_songs, 1);
    }

    #[test]
    fn test_transposed_repeat_lands_on_one_pattern() {
        let dir = TempDir::new().unwrap();
        let mut notes = riff_notes(60, 0.0);
        notes.extend(riff_notes(65, 4.0));
        let root = write_doc(
            &dir,
            "modulating.json",
            json!({
                "title": "Modulating Riff",
                "artist": "The Meters",
                "total_bars": 2,
                "tracks": [{"name": "guitar", "notes": notes}],
            }),
        );
        let db = Database::open_in_memory().unwrap();

        ingest(&db, &[root], &options(), false, 1).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_patterns, 1);
        assert_eq!(stats.total_instances, 2);

        let results = db.search(&SearchQuery::default()).unwrap();
        let hash = results.results[0].pattern.hash;
        let instances = db.instances_for_pattern(&hash, 10).unwrap();
        let mut shifts: Vec<i32> = instances.iter().map(|i| i.transposition).collect();
        shifts.sort_unstable();
        assert_eq!(shifts, vec![0, 5]);
    }

    #[test]
    fn test_total_bars_inferred_from_notes() {
        let dir = TempDir::new().unwrap();
        // Last note ends at beat 5.0, so the song spans two 4/4 bars
        let root = write_doc(
            &dir,
            "short.json",
            json!({
                "tracks": [{"name": "lead", "notes": [
                    {"pitch": 60, "velocity": 80, "start_beat": 0.0, "duration_beats": 0.5},
                    {"pitch": 64, "velocity": 80, "start_beat": 4.5, "duration_beats": 0.5},
                ]}],
            }),
        );
        let db = Database::open_in_memory().unwrap();

        ingest(&db, &[root], &options(), false, 1).unwrap();

        let chunk_count: i64 = db
            .conn
            .query_row("SELECT chunk_count FROM tracks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(chunk_count, 2);
    }

    #[test]
    fn test_invalid_pitch_fails_that_file_only() {
        let dir = TempDir::new().unwrap();
        write_doc(
            &dir,
            "bad.json",
            json!({
                "tracks": [{"name": "broken", "notes": [
                    {"pitch": 200, "velocity": 80, "start_beat": 0.0, "duration_beats": 1.0},
                ]}],
            }),
        );
        let root = write_doc(&dir, "good.json", repeated_riff_doc(2));
        let db = Database::open_in_memory().unwrap();

        let result = ingest(&db, &[root], &options(), false, 1).unwrap();
        assert_eq!(result.scanned, 2);
        assert_eq!(result.indexed, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(db.stats().unwrap().total_songs, 1);
    }

    #[test]
    fn test_malformed_json_counts_as_failed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("garbage.json"), "{not json").unwrap();
        let db = Database::open_in_memory().unwrap();

        let result = ingest(
            &db,
            &[dir.path().to_string_lossy().to_string()],
            &options(),
            false,
            1,
        )
        .unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.indexed, 0);
    }

    #[test]
    fn test_meter_map_must_start_at_bar_zero() {
        let dir = TempDir::new().unwrap();
        let root = write_doc(
            &dir,
            "offset_meter.json",
            json!({
                "meter_map": [{"bar": 2, "beats_per_bar": 3.0}],
                "tracks": [{"name": "drums", "notes": []}],
            }),
        );
        let db = Database::open_in_memory().unwrap();

        let result = ingest(&db, &[root], &options(), false, 1).unwrap();
        assert_eq!(result.failed, 1);
    }

    #[test]
    fn test_non_document_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("readme.txt"), "not a song").unwrap();
        let root = write_doc(&dir, "song.json", repeated_riff_doc(1));
        let db = Database::open_in_memory().unwrap();

        let result = ingest(&db, &[root], &options(), false, 1).unwrap();
        assert_eq!(result.scanned, 1);
        assert_eq!(result.indexed, 1);
    }

    #[test]
    fn test_empty_track_indexes_with_no_patterns() {
        let dir = TempDir::new().unwrap();
        let root = write_doc(
            &dir,
            "silent.json",
            json!({
                "title": "Tacet",
                "tracks": [{"name": "rests", "notes": []}],
            }),
        );
        let db = Database::open_in_memory().unwrap();

        let result = ingest(&db, &[root], &options(), false, 1).unwrap();
        assert_eq!(result.indexed, 1);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_songs, 1);
        assert_eq!(stats.total_tracks, 1);
        assert_eq!(stats.total_patterns, 0);
    }
}
