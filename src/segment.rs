//! Bar-aligned segmentation of a track's notes into fixed-size chunks.
//!
//! Chunks are the unit everything downstream works on: fingerprints are
//! computed per chunk, and pattern instances are recorded as bar ranges.

use crate::notes::{MeterMap, NoteEvent};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("chunk size must be at least one bar, got {0}")]
    InvalidRange(u32),
}

/// A contiguous, bar-aligned slice of one track's notes.
///
/// Note timing is re-based to the chunk's own start: the first bar of the
/// chunk is local beat 0, and every note's local start beat lies in
/// `[0, bar_count × beats_per_bar)`. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct BarChunk {
    /// First bar of the chunk (inclusive).
    pub start_bar: u32,
    /// One past the last bar of the chunk (exclusive).
    pub end_bar: u32,
    /// Meter in effect at the chunk's start bar, held for the whole chunk.
    pub beats_per_bar: f64,
    /// Notes whose onset falls inside the chunk, in chunk-local time.
    pub notes: Vec<NoteEvent>,
}

impl BarChunk {
    pub fn bar_count(&self) -> u32 {
        self.end_bar - self.start_bar
    }

    /// Length of the chunk in local beats.
    pub fn beat_span(&self) -> f64 {
        self.bar_count() as f64 * self.beats_per_bar
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }
}

/// Slice `notes` into non-overlapping chunks of `chunk_bars` bars each.
///
/// Only the final chunk may be shorter, when `total_bars` is not an exact
/// multiple. The meter active at each chunk's start bar governs that whole
/// chunk; a mid-chunk meter change takes effect at the next chunk boundary.
/// A note belongs to the chunk containing its onset; notes sustaining in
/// from an earlier chunk are not duplicated.
pub fn segment(
    notes: &[NoteEvent],
    meter: &MeterMap,
    chunk_bars: u32,
    total_bars: u32,
) -> Result<Vec<BarChunk>, SegmentError> {
    if chunk_bars == 0 {
        return Err(SegmentError::InvalidRange(chunk_bars));
    }

    let mut chunks = Vec::with_capacity(total_bars.div_ceil(chunk_bars) as usize);
    let mut start_bar = 0u32;
    let mut start_beat = 0.0_f64;

    while start_bar < total_bars {
        let end_bar = (start_bar + chunk_bars).min(total_bars);
        let bar_count = end_bar - start_bar;
        let beats_per_bar = meter.beats_per_bar_at(start_bar);
        let end_beat = start_beat + bar_count as f64 * beats_per_bar;

        let local_notes: Vec<NoteEvent> = notes
            .iter()
            .filter(|n| n.start_beat >= start_beat && n.start_beat < end_beat)
            .map(|n| NoteEvent {
                start_beat: n.start_beat - start_beat,
                ..n.clone()
            })
            .collect();

        chunks.push(BarChunk {
            start_bar,
            end_bar,
            beats_per_bar,
            notes: local_notes,
        });

        start_bar = end_bar;
        start_beat = end_beat;
    }

    Ok(chunks)
}
