//! Similarity primitives shared by fuzzy deduplication and pattern search.
//!
//! Three measures: Jaccard over onset-step index sets, cosine over
//! pitch-class histograms, and positional contour agreement. Composite
//! scores are means of these, computed by the callers that need them.

use crate::fingerprint::{PitchFingerprint, RhythmFingerprint};
use std::cmp::Ordering;

/// Jaccard similarity between two onset-step index sets.
///
/// Inputs must be sorted ascending without duplicates (the order
/// `RhythmFingerprint::active_steps` produces). Two silent grids are
/// identical rhythms, so both-empty yields 1.0; one-sided silence yields 0.0.
pub fn jaccard_similarity(a: &[usize], b: &[usize]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }

    let mut i = 0;
    let mut j = 0;
    let mut intersection = 0usize;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                intersection += 1;
                i += 1;
                j += 1;
            }
        }
    }

    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Cosine similarity between two vectors. Returns 0.0 when either vector
/// has (near-)zero magnitude.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;

    for i in 0..a.len().min(b.len()) {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        0.0
    } else {
        dot / denom
    }
}

/// Fraction of contour positions that agree.
///
/// Contours of different lengths describe differently-shaped melodies and
/// score 0.0 outright; two empty contours trivially agree.
pub fn contour_match(a: &[i8], b: &[i8]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.len() != b.len() {
        return 0.0;
    }

    let matching = a.iter().zip(b).filter(|(x, y)| x == y).count();
    matching as f64 / a.len() as f64
}

/// Rhythm similarity between two fingerprints: Jaccard over active steps.
pub fn rhythm_similarity(a: &RhythmFingerprint, b: &RhythmFingerprint) -> f64 {
    jaccard_similarity(&a.active_steps(), &b.active_steps())
}

/// Pitch similarity between two fingerprints: mean of pitch-class cosine
/// and contour agreement.
pub fn pitch_similarity(a: &PitchFingerprint, b: &PitchFingerprint) -> f64 {
    let cosine = cosine_similarity(&a.pitch_class_vector(), &b.pitch_class_vector());
    let contour = contour_match(&a.contour, &b.contour);
    (cosine + contour) / 2.0
}
