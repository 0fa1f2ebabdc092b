//! Note-event and meter input model.
//!
//! These are the records an external decoder hands to the pipeline: notes
//! with beat-domain timing plus the meter changes needed to place bar lines.
//! Everything downstream (segmentation, fingerprinting) works purely in this
//! representation and never sees a source file format.

use serde::{Deserialize, Serialize};

/// Highest valid MIDI pitch/velocity value.
pub const MIDI_MAX: u8 = 127;

/// Beats per bar assumed when a song carries no meter information.
pub const DEFAULT_BEATS_PER_BAR: f64 = 4.0;

/// A single timed note in beat coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub start_beat: f64,
    pub duration_beats: f64,
    #[serde(default)]
    pub channel: u8,
}

impl NoteEvent {
    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }

    /// Velocity scaled to [0, 1]; out-of-range input clamps to full scale.
    pub fn normalized_velocity(&self) -> f32 {
        self.velocity.min(MIDI_MAX) as f32 / MIDI_MAX as f32
    }

    pub fn pitch_class(&self) -> usize {
        (self.pitch % 12) as usize
    }
}

/// A meter change: `beats_per_bar` takes effect at `bar`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterChange {
    pub bar: u32,
    pub beats_per_bar: f64,
}

/// Ordered meter changes for one song.
///
/// The input contract puts the first change at bar 0; an empty map behaves
/// as constant 4 beats per bar. Entries with a non-positive beat count are
/// invalid and dropped on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterMap {
    changes: Vec<MeterChange>,
}

impl MeterMap {
    pub fn new(changes: Vec<MeterChange>) -> Self {
        let mut changes: Vec<MeterChange> = changes
            .into_iter()
            .filter(|c| {
                if c.beats_per_bar > 0.0 {
                    true
                } else {
                    log::warn!(
                        "dropping meter change at bar {} with non-positive beats_per_bar {}",
                        c.bar,
                        c.beats_per_bar
                    );
                    false
                }
            })
            .collect();
        changes.sort_by_key(|c| c.bar);
        Self { changes }
    }

    /// A map with one meter for the whole song.
    pub fn constant(beats_per_bar: f64) -> Self {
        Self::new(vec![MeterChange {
            bar: 0,
            beats_per_bar,
        }])
    }

    /// Beats per bar in effect at `bar`: the latest change at or before it.
    /// Meter changes are rare, so a reverse linear scan is fine.
    pub fn beats_per_bar_at(&self, bar: u32) -> f64 {
        self.changes
            .iter()
            .rev()
            .find(|c| c.bar <= bar)
            .map(|c| c.beats_per_bar)
            .unwrap_or(DEFAULT_BEATS_PER_BAR)
    }

    pub fn changes(&self) -> &[MeterChange] {
        &self.changes
    }

    /// Smallest number of bars whose beat span covers `end_beat`, walking
    /// the map bar by bar from zero.
    pub fn bars_covering(&self, end_beat: f64) -> u32 {
        if end_beat <= 0.0 {
            return 0;
        }
        let mut bar = 0u32;
        let mut beat = 0.0_f64;
        while beat < end_beat {
            beat += self.beats_per_bar_at(bar);
            bar += 1;
        }
        bar
    }
}

impl Default for MeterMap {
    fn default() -> Self {
        Self::constant(DEFAULT_BEATS_PER_BAR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_velocity() {
        let note = NoteEvent {
            pitch: 60,
            velocity: 127,
            start_beat: 0.0,
            duration_beats: 1.0,
            channel: 0,
        };
        assert!((note.normalized_velocity() - 1.0).abs() < 1e-6);

        let soft = NoteEvent { velocity: 0, ..note.clone() };
        assert_eq!(soft.normalized_velocity(), 0.0);

        // Out-of-range velocity clamps rather than exceeding full scale
        let loud = NoteEvent { velocity: 200, ..note };
        assert!((loud.normalized_velocity() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pitch_class_wraps_octaves() {
        let c4 = NoteEvent {
            pitch: 60,
            velocity: 64,
            start_beat: 0.0,
            duration_beats: 1.0,
            channel: 0,
        };
        let c5 = NoteEvent { pitch: 72, ..c4.clone() };
        assert_eq!(c4.pitch_class(), 0);
        assert_eq!(c4.pitch_class(), c5.pitch_class());
    }

    #[test]
    fn test_empty_map_defaults_to_four() {
        let map = MeterMap::new(vec![]);
        assert_eq!(map.beats_per_bar_at(0), 4.0);
        assert_eq!(map.beats_per_bar_at(100), 4.0);
    }

    #[test]
    fn test_latest_change_at_or_before_bar_wins() {
        let map = MeterMap::new(vec![
            MeterChange { bar: 0, beats_per_bar: 4.0 },
            MeterChange { bar: 8, beats_per_bar: 3.0 },
            MeterChange { bar: 16, beats_per_bar: 7.0 },
        ]);
        assert_eq!(map.beats_per_bar_at(0), 4.0);
        assert_eq!(map.beats_per_bar_at(7), 4.0);
        assert_eq!(map.beats_per_bar_at(8), 3.0);
        assert_eq!(map.beats_per_bar_at(15), 3.0);
        assert_eq!(map.beats_per_bar_at(16), 7.0);
        assert_eq!(map.beats_per_bar_at(999), 7.0);
    }

    #[test]
    fn test_changes_sorted_on_construction() {
        let map = MeterMap::new(vec![
            MeterChange { bar: 8, beats_per_bar: 3.0 },
            MeterChange { bar: 0, beats_per_bar: 4.0 },
        ]);
        assert_eq!(map.changes()[0].bar, 0);
        assert_eq!(map.beats_per_bar_at(4), 4.0);
    }

    #[test]
    fn test_non_positive_meter_dropped() {
        let map = MeterMap::new(vec![
            MeterChange { bar: 0, beats_per_bar: 4.0 },
            MeterChange { bar: 4, beats_per_bar: 0.0 },
        ]);
        assert_eq!(map.changes().len(), 1);
        assert_eq!(map.beats_per_bar_at(10), 4.0);
    }

    #[test]
    fn test_bars_covering_uniform_meter() {
        let map = MeterMap::constant(4.0);
        assert_eq!(map.bars_covering(0.0), 0);
        assert_eq!(map.bars_covering(4.0), 1);
        assert_eq!(map.bars_covering(4.1), 2);
        assert_eq!(map.bars_covering(16.0), 4);
    }

    #[test]
    fn test_bars_covering_with_meter_change() {
        // 2 bars of 4 beats, then 3 beats per bar: beat 11 ends inside bar 3
        let map = MeterMap::new(vec![
            MeterChange { bar: 0, beats_per_bar: 4.0 },
            MeterChange { bar: 2, beats_per_bar: 3.0 },
        ]);
        assert_eq!(map.bars_covering(8.0), 2);
        assert_eq!(map.bars_covering(11.0), 3);
        assert_eq!(map.bars_covering(11.5), 4);
    }
}
