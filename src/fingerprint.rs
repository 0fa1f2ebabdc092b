//! Chunk fingerprinting: rhythm and pitch signatures plus the combined
//! content hash used for pattern identity.
//!
//! Hashes are computed from integer data only (onset flags, intervals) so
//! identical chunks always produce byte-identical hashes. Velocity lands in
//! the accent grid and mean pitch stays a plain field; neither feeds the
//! hashes, so dynamics never split a rhythm and a transposed melody keeps
//! its pitch hash with the shift still recoverable from mean pitch.

use crate::hash::{PatternHash, PitchHash, RhythmHash};
use crate::segment::BarChunk;
use serde::{Deserialize, Serialize};

/// Onset/accent grid for one chunk at a fixed subdivision.
#[derive(Debug, Clone, PartialEq)]
pub struct RhythmFingerprint {
    /// One flag per grid step: does a note start here?
    pub onset_grid: Vec<bool>,
    /// Normalized velocity per step; 0.0 where no onset. Same length as
    /// `onset_grid`, never hashed.
    pub accent_grid: Vec<f32>,
    pub grid_size: u32,
    pub bar_count: u32,
    pub hash: RhythmHash,
}

impl RhythmFingerprint {
    /// Quantize a chunk's onsets to a `grid_size`-per-bar grid.
    ///
    /// Steps that round past the end of the chunk are dropped. When two
    /// notes land on the same step the onset flag is set once and the
    /// accent keeps the louder of the two.
    pub fn from_chunk(chunk: &BarChunk, grid_size: u32) -> Self {
        let bar_count = chunk.bar_count();
        let steps = (grid_size as usize) * (bar_count as usize);
        let mut onset_grid = vec![false; steps];
        let mut accent_grid = vec![0.0_f32; steps];

        let step_width = chunk.beats_per_bar / grid_size as f64;
        for note in &chunk.notes {
            let idx = (note.start_beat / step_width).floor() as usize;
            if idx >= steps {
                continue;
            }
            onset_grid[idx] = true;
            accent_grid[idx] = accent_grid[idx].max(note.normalized_velocity());
        }

        let hash = hash_onsets(grid_size, &onset_grid);
        Self {
            onset_grid,
            accent_grid,
            grid_size,
            bar_count,
            hash,
        }
    }

    /// Indices of active steps, for set-based similarity.
    pub fn active_steps(&self) -> Vec<usize> {
        self.onset_grid
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }
}

/// Interval/contour/histogram signature of a chunk's melodic content.
#[derive(Debug, Clone, PartialEq)]
pub struct PitchFingerprint {
    /// Signed semitone steps between consecutive onsets.
    pub intervals: Vec<i16>,
    /// Counts of `pitch mod 12` across the chunk.
    pub pitch_classes: [u32; 12],
    /// Sign of each interval: -1 down, 0 same, 1 up.
    pub contour: Vec<i8>,
    pub range_semitones: u8,
    /// Arithmetic mean of absolute pitches; 0.0 for an empty chunk.
    /// Kept out of the hash so transposed occurrences share identity while
    /// the shift between them stays recoverable.
    pub mean_pitch: f64,
    pub hash: PitchHash,
}

impl PitchFingerprint {
    pub fn from_chunk(chunk: &BarChunk) -> Self {
        let mut sorted: Vec<_> = chunk.notes.iter().collect();
        sorted.sort_by(|a, b| {
            a.start_beat
                .total_cmp(&b.start_beat)
                .then_with(|| a.pitch.cmp(&b.pitch))
                .then_with(|| a.velocity.cmp(&b.velocity))
        });

        let intervals: Vec<i16> = sorted
            .windows(2)
            .map(|w| w[1].pitch as i16 - w[0].pitch as i16)
            .collect();
        let contour: Vec<i8> = intervals.iter().map(|&i| i.signum() as i8).collect();

        let mut pitch_classes = [0u32; 12];
        for n in &sorted {
            pitch_classes[n.pitch_class()] += 1;
        }

        let (range_semitones, mean_pitch) = if sorted.is_empty() {
            (0, 0.0)
        } else {
            let min = sorted.iter().map(|n| n.pitch).min().unwrap_or(0);
            let max = sorted.iter().map(|n| n.pitch).max().unwrap_or(0);
            let mean =
                sorted.iter().map(|n| n.pitch as f64).sum::<f64>() / sorted.len() as f64;
            (max - min, mean)
        };

        let hash = hash_intervals(&intervals);
        Self {
            intervals,
            pitch_classes,
            contour,
            range_semitones,
            mean_pitch,
            hash,
        }
    }

    /// Histogram as floats, for cosine similarity.
    pub fn pitch_class_vector(&self) -> [f64; 12] {
        let mut v = [0.0_f64; 12];
        for (out, &count) in v.iter_mut().zip(&self.pitch_classes) {
            *out = count as f64;
        }
        v
    }
}

/// What a pattern contains, derived from its fingerprint content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Two or more pitched onsets: an interval sequence exists.
    Melodic,
    /// Onsets but no interval sequence (a lone hit).
    Rhythmic,
    /// Pure silence.
    Empty,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Melodic => "melodic",
            Self::Rhythmic => "rhythmic",
            Self::Empty => "empty",
        }
    }
}

/// One chunk's rhythm and pitch signatures with the combined identity hash.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedFingerprint {
    pub rhythm: RhythmFingerprint,
    pub pitch: PitchFingerprint,
    pub hash: PatternHash,
}

impl CombinedFingerprint {
    pub fn kind(&self) -> PatternKind {
        if !self.pitch.intervals.is_empty() {
            PatternKind::Melodic
        } else if self.rhythm.onset_grid.iter().any(|&on| on) {
            PatternKind::Rhythmic
        } else {
            PatternKind::Empty
        }
    }

    /// Structured form for logging, caching, or cross-process transport.
    /// Accents are rounded to 3 decimals; hashes serialize as hex.
    pub fn to_transport_form(&self) -> FingerprintTransport {
        FingerprintTransport {
            num_bars: self.rhythm.bar_count,
            grid_size: self.rhythm.grid_size,
            onset_grid: self.rhythm.onset_grid.iter().map(|&on| on as u8).collect(),
            accent_grid: self
                .rhythm
                .accent_grid
                .iter()
                .map(|&a| (a * 1000.0).round() / 1000.0)
                .collect(),
            intervals: self.pitch.intervals.clone(),
            pitch_classes: self.pitch.pitch_classes,
            contour: self.pitch.contour.clone(),
            range_semitones: self.pitch.range_semitones,
            mean_pitch: self.pitch.mean_pitch,
            rhythm_hash: self.rhythm.hash,
            pitch_hash: self.pitch.hash,
            pattern_hash: self.hash,
        }
    }
}

/// Wire/cache form of a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintTransport {
    pub num_bars: u32,
    pub grid_size: u32,
    pub onset_grid: Vec<u8>,
    pub accent_grid: Vec<f32>,
    pub intervals: Vec<i16>,
    pub pitch_classes: [u32; 12],
    pub contour: Vec<i8>,
    pub range_semitones: u8,
    pub mean_pitch: f64,
    pub rhythm_hash: RhythmHash,
    pub pitch_hash: PitchHash,
    pub pattern_hash: PatternHash,
}

/// Fingerprint one chunk at the given grid resolution.
///
/// Never fails: an empty chunk yields a well-formed all-zero fingerprint,
/// since silent bars are normal and still occupy bar positions.
pub fn fingerprint(chunk: &BarChunk, grid_size: u32) -> CombinedFingerprint {
    let rhythm = RhythmFingerprint::from_chunk(chunk, grid_size);
    let pitch = PitchFingerprint::from_chunk(chunk);
    let hash = PatternHash::combine(&rhythm.hash, &pitch.hash);
    CombinedFingerprint {
        rhythm,
        pitch,
        hash,
    }
}

/// Digest grid geometry plus onset flags. Step count rides along implicitly
/// (one byte per step after the fixed prefix), so a 1-bar and a 2-bar grid
/// of silence stay distinct.
fn hash_onsets(grid_size: u32, onset_grid: &[bool]) -> RhythmHash {
    let mut buf = Vec::with_capacity(4 + onset_grid.len());
    buf.extend_from_slice(&grid_size.to_le_bytes());
    buf.extend(onset_grid.iter().map(|&on| on as u8));
    RhythmHash::from_content(&buf)
}

/// Digest the interval sequence only.
fn hash_intervals(intervals: &[i16]) -> PitchHash {
    let mut buf = Vec::with_capacity(4 + intervals.len() * 2);
    buf.extend_from_slice(&(intervals.len() as u32).to_le_bytes());
    for iv in intervals {
        buf.extend_from_slice(&iv.to_le_bytes());
    }
    PitchHash::from_content(&buf)
}
