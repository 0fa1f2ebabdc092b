use crate::fingerprint::CombinedFingerprint;
use crate::hash::{PatternHash, PitchHash, RhythmHash};

/// Data for inserting or replacing a song (ingest phase).
pub struct NewSong {
    pub source_path: String,
    pub file_size: i64,
    pub file_modified: String,

    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub tags: Vec<String>,
}

/// One analyzed track with its discovered patterns, ready to store.
pub struct TrackPatterns {
    pub name: String,
    pub channel: Option<i32>,
    pub note_count: i64,
    pub chunk_count: i64,
    pub unique_patterns: i64,
    pub repetition_ratio: f64,
    pub patterns: Vec<PatternWrite>,
}

/// One occurrence to persist: the canonical fingerprint it belongs to
/// plus where and how it appeared.
pub struct PatternWrite {
    pub fingerprint: CombinedFingerprint,
    pub start_bar: i64,
    pub end_bar: i64,
    pub transposition: i32,
    pub confidence: f64,
}

/// A pattern row read back from the database.
#[derive(Debug, Clone)]
pub struct PatternRecord {
    pub hash: PatternHash,
    pub pattern_type: String,
    pub num_bars: i64,
    pub grid_size: i64,
    pub onset_grid: Vec<u8>,
    pub accent_grid: Vec<f32>,
    pub rhythm_hash: RhythmHash,
    pub intervals: Vec<i16>,
    pub pitch_classes: [u32; 12],
    pub contour: Vec<i8>,
    pub range_semitones: i64,
    pub mean_pitch: f64,
    pub pitch_hash: PitchHash,
    pub occurrence_count: i64,
    pub created_at: String,
}

impl PatternRecord {
    /// Active onset-step indices, matching the in-memory fingerprint form.
    pub fn active_steps(&self) -> Vec<usize> {
        self.onset_grid
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| (on != 0).then_some(i))
            .collect()
    }

    pub fn pitch_class_vector(&self) -> [f64; 12] {
        let mut v = [0.0_f64; 12];
        for (out, &count) in v.iter_mut().zip(&self.pitch_classes) {
            *out = count as f64;
        }
        v
    }
}

/// One occurrence row joined with its track and song for display.
#[derive(Debug, Clone)]
pub struct InstanceDetail {
    pub song_title: Option<String>,
    pub artist: Option<String>,
    pub track_name: String,
    pub start_bar: i64,
    pub end_bar: i64,
    pub transposition: i32,
    pub confidence: f64,
}

/// Corpus-wide statistics.
#[derive(Debug)]
pub struct LibraryStats {
    pub total_songs: i64,
    pub total_tracks: i64,
    pub total_patterns: i64,
    pub total_instances: i64,
    pub patterns_by_type: Vec<(String, i64)>,
    pub avg_repetition_ratio: f64,
    pub top_artists: Vec<(String, i64)>,
}
