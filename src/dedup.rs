//! Pattern clustering: exact hash grouping followed by an optional fuzzy
//! merge of near-identical clusters.
//!
//! Two sequential passes. The exact pass buckets chunks by combined hash,
//! which catches literal repeats and transposed repeats (the hash is
//! transposition-invariant). The fuzzy pass compares the surviving clusters
//! pairwise and collapses connected components of sufficiently similar ones,
//! so a slightly embellished riff still folds into its parent pattern.

use crate::fingerprint::CombinedFingerprint;
use crate::hash::PatternHash;
use crate::segment::BarChunk;
use crate::similarity::{pitch_similarity, rhythm_similarity};
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("chunk count {0} does not match fingerprint count {1}")]
    LengthMismatch(usize, usize),
}

/// One occurrence inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Index into the chunk/fingerprint slices passed to `deduplicate`.
    pub index: usize,
    /// Semitone shift of this occurrence relative to the canonical one;
    /// 0 when no constant shift was detected.
    pub transposition: i32,
}

/// A discovered pattern: canonical occurrence plus every chunk judged to
/// be a repeat of it.
#[derive(Debug, Clone)]
pub struct PatternCluster {
    /// Chunk index of the canonical occurrence.
    pub canonical: usize,
    /// All occurrences, canonical included, ascending by chunk index.
    pub members: Vec<ClusterMember>,
    /// 1.0 for a pure exact cluster; 1/k when k exact clusters were
    /// fuzzy-merged into this one.
    pub confidence: f64,
}

/// Result of deduplicating one batch of chunks.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub clusters: Vec<PatternCluster>,
    pub total_chunks: usize,
    pub unique_patterns: usize,
    /// Fraction of chunks that are repeats of an earlier pattern.
    pub repetition_ratio: f64,
}

/// Detect a constant semitone shift between two fingerprints.
///
/// Requires rhythm similarity at or above `rhythm_threshold` and identical
/// interval sequences (a true transposition never changes intervals). The
/// shift is `round(a.mean_pitch - b.mean_pitch)`; shifts beyond an octave
/// are rejected as coincidence.
pub fn find_transposition(
    a: &CombinedFingerprint,
    b: &CombinedFingerprint,
    rhythm_threshold: f64,
    allow_transposition: bool,
) -> Option<i32> {
    if !allow_transposition {
        return None;
    }
    if rhythm_similarity(&a.rhythm, &b.rhythm) < rhythm_threshold {
        return None;
    }
    if a.pitch.intervals != b.pitch.intervals {
        return None;
    }
    let shift = (a.pitch.mean_pitch - b.pitch.mean_pitch).round() as i32;
    if shift.abs() > 12 {
        return None;
    }
    Some(shift)
}

/// Cluster a batch of chunks into distinct patterns.
///
/// The fuzzy pass only runs when either threshold is below 1.0, and only
/// compares clusters whose grids share bar count and resolution, which
/// bounds the pairwise cost to same-geometry buckets.
pub fn deduplicate(
    chunks: &[BarChunk],
    fingerprints: &[CombinedFingerprint],
    rhythm_threshold: f64,
    pitch_threshold: f64,
    allow_transposition: bool,
) -> Result<DedupOutcome, DedupError> {
    if chunks.len() != fingerprints.len() {
        return Err(DedupError::LengthMismatch(chunks.len(), fingerprints.len()));
    }

    // Exact pass: bucket by combined hash, first-seen member is canonical.
    let mut exact: Vec<ExactCluster> = Vec::new();
    let mut by_hash: HashMap<PatternHash, usize> = HashMap::new();
    for (i, fp) in fingerprints.iter().enumerate() {
        match by_hash.entry(fp.hash) {
            Entry::Occupied(e) => exact[*e.get()].members.push(i),
            Entry::Vacant(v) => {
                v.insert(exact.len());
                exact.push(ExactCluster { members: vec![i] });
            }
        }
    }

    // Fuzzy pass: union clusters whose canonical fingerprints agree.
    let mut components = UnionFind::new(exact.len());
    if (rhythm_threshold < 1.0 || pitch_threshold < 1.0) && exact.len() > 1 {
        let merge_floor = rhythm_threshold.min(pitch_threshold);

        let mut buckets: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
        for (ci, cluster) in exact.iter().enumerate() {
            let rf = &fingerprints[cluster.canonical()].rhythm;
            buckets
                .entry((rf.bar_count, rf.grid_size))
                .or_default()
                .push(ci);
        }

        for ids in buckets.values() {
            for x in 0..ids.len() {
                for y in (x + 1)..ids.len() {
                    let fa = &fingerprints[exact[ids[x]].canonical()];
                    let fb = &fingerprints[exact[ids[y]].canonical()];

                    let rhythm = rhythm_similarity(&fa.rhythm, &fb.rhythm);
                    if rhythm < rhythm_threshold {
                        continue;
                    }
                    let pitch = pitch_similarity(&fa.pitch, &fb.pitch);
                    if (rhythm + pitch) / 2.0 >= merge_floor {
                        components.union(ids[x], ids[y]);
                    }
                }
            }
        }
    }

    // Collect connected components into final clusters.
    let mut grouped: HashMap<usize, Vec<usize>> = HashMap::new();
    for ci in 0..exact.len() {
        grouped.entry(components.find(ci)).or_default().push(ci);
    }

    let mut clusters: Vec<PatternCluster> = Vec::with_capacity(grouped.len());
    for cluster_ids in grouped.into_values() {
        // Largest original cluster wins canonical; earlier-seen breaks ties.
        let lead = cluster_ids
            .iter()
            .copied()
            .max_by_key(|&ci| (exact[ci].members.len(), Reverse(ci)))
            .unwrap_or(0);
        let canonical = exact[lead].canonical();
        let canonical_fp = &fingerprints[canonical];

        let mut indices: Vec<usize> = cluster_ids
            .iter()
            .flat_map(|&ci| exact[ci].members.iter().copied())
            .collect();
        indices.sort_unstable();

        let members = indices
            .into_iter()
            .map(|index| ClusterMember {
                index,
                transposition: find_transposition(
                    &fingerprints[index],
                    canonical_fp,
                    rhythm_threshold,
                    allow_transposition,
                )
                .unwrap_or(0),
            })
            .collect();

        clusters.push(PatternCluster {
            canonical,
            members,
            confidence: 1.0 / cluster_ids.len() as f64,
        });
    }
    clusters.sort_by_key(|c| c.members.first().map(|m| m.index).unwrap_or(usize::MAX));

    let total_chunks = chunks.len();
    let unique_patterns = clusters.len();
    let repetition_ratio = if total_chunks == 0 {
        0.0
    } else {
        (total_chunks - unique_patterns) as f64 / total_chunks as f64
    };

    Ok(DedupOutcome {
        clusters,
        total_chunks,
        unique_patterns,
        repetition_ratio,
    })
}

struct ExactCluster {
    /// Chunk indices in first-seen order; the first is canonical.
    members: Vec<usize>,
}

impl ExactCluster {
    fn canonical(&self) -> usize {
        self.members[0]
    }
}

/// Union-find over exact-cluster ids, union by size with path compression.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let mut ra = self.find(a);
        let mut rb = self.find(b);
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}
