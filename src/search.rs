//! Pattern search: filtered, sorted, paginated lookup over the stored
//! corpus, plus similarity ranking against one target pattern.
//!
//! Filters compose into a single WHERE clause; attribute filters (artist,
//! genre, tags) reach through instances and tracks to song metadata via
//! EXISTS subqueries, so a pattern matches if any of its occurrences does.
//! The total count always runs against the same predicate as the page
//! itself, before limit/offset.

use crate::db::models::PatternRecord;
use crate::db::queries::{pattern_from_row, PATTERN_COLUMNS};
use crate::db::{Database, Result};
use crate::hash::{PatternHash, PitchHash, RhythmHash};
use crate::similarity::{cosine_similarity, jaccard_similarity};
use rusqlite::types::ToSql;
use std::str::FromStr;

/// Distinct songs/artists/genres attached to each result for display.
pub const ENRICHMENT_CAP: usize = 10;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Most frequently occurring first.
    #[default]
    Occurrence,
    Newest,
    Oldest,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "occurrence" | "occurrences" | "relevance" => Ok(Self::Occurrence),
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => Err(format!(
                "unknown sort order '{other}' (expected occurrence, newest, or oldest)"
            )),
        }
    }
}

/// A composable pattern query. All filter fields are optional and AND
/// together when present.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub rhythm_hash: Option<RhythmHash>,
    pub pitch_hash: Option<PitchHash>,
    pub num_bars: Option<u32>,
    pub min_occurrences: Option<i64>,
    /// Artist substring, matched against any song the pattern occurs in.
    pub artist: Option<String>,
    /// Genre substring, matched the same way.
    pub genre: Option<String>,
    /// Any-match tag set.
    pub tags: Vec<String>,
    pub sort: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            rhythm_hash: None,
            pitch_hash: None,
            num_bars: None,
            min_occurrences: None,
            artist: None,
            genre: None,
            tags: Vec::new(),
            sort: SortOrder::default(),
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
        }
    }
}

/// One search hit with its display enrichment.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern: PatternRecord,
    pub song_ids: Vec<i64>,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
}

/// A page of search results.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub results: Vec<PatternMatch>,
    /// Matches for the whole predicate, ignoring limit/offset.
    pub total_count: i64,
    pub has_more: bool,
}

/// A pattern ranked against a similarity target.
#[derive(Debug, Clone)]
pub struct SimilarPattern {
    pub pattern: PatternRecord,
    pub similarity: f64,
}

impl Database {
    /// Run a filtered, sorted, paginated pattern search.
    pub fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(hash) = query.rhythm_hash {
            conditions.push("rhythm_hash = ?".to_string());
            params.push(Box::new(hash));
        }
        if let Some(hash) = query.pitch_hash {
            conditions.push("pitch_hash = ?".to_string());
            params.push(Box::new(hash));
        }
        if let Some(bars) = query.num_bars {
            conditions.push("num_bars = ?".to_string());
            params.push(Box::new(bars as i64));
        }
        if let Some(min) = query.min_occurrences {
            conditions.push("occurrence_count >= ?".to_string());
            params.push(Box::new(min));
        }
        if let Some(artist) = &query.artist {
            conditions.push(
                "EXISTS (SELECT 1 FROM pattern_instances pi
                 JOIN tracks t ON t.id = pi.track_id
                 JOIN songs s ON s.id = t.song_id
                 WHERE pi.pattern_hash = patterns.hash
                   AND s.artist LIKE '%' || ? || '%')"
                    .to_string(),
            );
            params.push(Box::new(artist.clone()));
        }
        if let Some(genre) = &query.genre {
            conditions.push(
                "EXISTS (SELECT 1 FROM pattern_instances pi
                 JOIN tracks t ON t.id = pi.track_id
                 JOIN songs s ON s.id = t.song_id
                 WHERE pi.pattern_hash = patterns.hash
                   AND s.genre LIKE '%' || ? || '%')"
                    .to_string(),
            );
            params.push(Box::new(genre.clone()));
        }
        if !query.tags.is_empty() {
            let placeholders = vec!["?"; query.tags.len()].join(", ");
            conditions.push(format!(
                "EXISTS (SELECT 1 FROM pattern_instances pi
                 JOIN tracks t ON t.id = pi.track_id
                 JOIN song_tags st ON st.song_id = t.song_id
                 WHERE pi.pattern_hash = patterns.hash
                   AND st.tag IN ({placeholders}))"
            ));
            for tag in &query.tags {
                params.push(Box::new(tag.clone()));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let total_count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM patterns{where_clause}"),
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;

        let order_clause = match query.sort {
            SortOrder::Occurrence => "occurrence_count DESC, rowid ASC",
            SortOrder::Newest => "created_at DESC, rowid DESC",
            SortOrder::Oldest => "created_at ASC, rowid ASC",
        };

        params.push(Box::new(query.limit as i64));
        params.push(Box::new(query.offset as i64));
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns{where_clause}
             ORDER BY {order_clause} LIMIT ? OFFSET ?"
        ))?;
        let page = stmt
            .query_map(
                rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
                pattern_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_more = query.offset + page.len() < total_count as usize;

        let mut results = Vec::with_capacity(page.len());
        for pattern in page {
            let (song_ids, artists, genres) = match self.enrichment_lists(&pattern.hash) {
                Ok(lists) => lists,
                Err(e) => {
                    log::warn!("enrichment failed for pattern {}: {e}", pattern.hash);
                    (Vec::new(), Vec::new(), Vec::new())
                }
            };
            results.push(PatternMatch {
                pattern,
                song_ids,
                artists,
                genres,
            });
        }

        Ok(SearchResults {
            results,
            total_count,
            has_more,
        })
    }

    /// Rank every other stored pattern against the target by the mean of
    /// rhythm Jaccard and pitch-class cosine. Keeps scores at or above
    /// `threshold`, best first, at most `limit` entries. A score of zero
    /// never matches, whatever the threshold. An unknown target yields an
    /// empty list.
    pub fn find_similar(
        &self,
        hash: &PatternHash,
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarPattern>> {
        let target = match self.get_pattern(hash)? {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let target_steps = target.active_steps();
        let target_classes = target.pitch_class_vector();

        let mut scored: Vec<SimilarPattern> = Vec::new();
        for candidate in self.all_patterns()? {
            if candidate.hash == target.hash {
                continue;
            }
            let rhythm = jaccard_similarity(&target_steps, &candidate.active_steps());
            let pitch = cosine_similarity(&target_classes, &candidate.pitch_class_vector());
            let similarity = (rhythm + pitch) / 2.0;
            if similarity > 0.0 && similarity >= threshold {
                scored.push(SimilarPattern {
                    pattern: candidate,
                    similarity,
                });
            }
        }

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit);
        Ok(scored)
    }

    fn enrichment_lists(
        &self,
        hash: &PatternHash,
    ) -> Result<(Vec<i64>, Vec<String>, Vec<String>)> {
        let mut song_stmt = self.conn.prepare_cached(
            "SELECT DISTINCT s.id FROM pattern_instances pi
             JOIN tracks t ON t.id = pi.track_id
             JOIN songs s ON s.id = t.song_id
             WHERE pi.pattern_hash = ?1
             ORDER BY s.id LIMIT ?2",
        )?;
        let song_ids: Vec<i64> = song_stmt
            .query_map(rusqlite::params![hash, ENRICHMENT_CAP as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut artist_stmt = self.conn.prepare_cached(
            "SELECT DISTINCT s.artist FROM pattern_instances pi
             JOIN tracks t ON t.id = pi.track_id
             JOIN songs s ON s.id = t.song_id
             WHERE pi.pattern_hash = ?1 AND s.artist IS NOT NULL
             ORDER BY s.artist LIMIT ?2",
        )?;
        let artists: Vec<String> = artist_stmt
            .query_map(rusqlite::params![hash, ENRICHMENT_CAP as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut genre_stmt = self.conn.prepare_cached(
            "SELECT DISTINCT s.genre FROM pattern_instances pi
             JOIN tracks t ON t.id = pi.track_id
             JOIN songs s ON s.id = t.song_id
             WHERE pi.pattern_hash = ?1 AND s.genre IS NOT NULL
             ORDER BY s.genre LIMIT ?2",
        )?;
        let genres: Vec<String> = genre_stmt
            .query_map(rusqlite::params![hash, ENRICHMENT_CAP as i64], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((song_ids, artists, genres))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{NewSong, PatternWrite, TrackPatterns};
    use crate::fingerprint::{fingerprint, CombinedFingerprint};
    use crate::notes::NoteEvent;
    use crate::segment::BarChunk;

    fn note(pitch: u8, start_beat: f64) -> NoteEvent {
        NoteEvent {
            pitch,
            velocity: 90,
            start_beat,
            duration_beats: 0.5,
            channel: 0,
        }
    }

    fn one_bar(notes: Vec<NoteEvent>) -> CombinedFingerprint {
        fingerprint(
            &BarChunk {
                start_bar: 0,
                end_bar: 1,
                beats_per_bar: 4.0,
                notes,
            },
            16,
        )
    }

    /// Quarter-note riff; all bases share rhythm and intervals.
    fn riff(base: u8) -> CombinedFingerprint {
        one_bar(vec![
            note(base, 0.0),
            note(base + 3, 1.0),
            note(base + 5, 2.0),
            note(base + 7, 3.0),
        ])
    }

    /// Sparse offbeat figure, disjoint from `riff` in both dimensions.
    fn offbeat() -> CombinedFingerprint {
        one_bar(vec![note(61, 0.5), note(68, 2.5)])
    }

    /// Two-bar phrase for bar-count filtering.
    fn long_phrase() -> CombinedFingerprint {
        fingerprint(
            &BarChunk {
                start_bar: 0,
                end_bar: 2,
                beats_per_bar: 4.0,
                notes: vec![note(60, 0.0), note(62, 4.0)],
            },
            16,
        )
    }

    fn song(path: &str, artist: &str, genre: &str, tags: &[&str]) -> NewSong {
        NewSong {
            source_path: path.to_string(),
            file_size: 1024,
            file_modified: "1700000000".to_string(),
            title: Some(path.trim_end_matches(".json").to_string()),
            artist: Some(artist.to_string()),
            album: None,
            genre: Some(genre.to_string()),
            year: Some(1973),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn track(writes: Vec<PatternWrite>) -> TrackPatterns {
        TrackPatterns {
            name: "keys".to_string(),
            channel: Some(1),
            note_count: 32,
            chunk_count: writes.len() as i64,
            unique_patterns: writes.len() as i64,
            repetition_ratio: 0.0,
            patterns: writes,
        }
    }

    fn write(fp: &CombinedFingerprint, start_bar: i64) -> PatternWrite {
        PatternWrite {
            fingerprint: fp.clone(),
            start_bar,
            end_bar: start_bar + fp.rhythm.bar_count as i64,
            transposition: 0,
            confidence: 1.0,
        }
    }

    /// Three songs, three patterns: the riff occurs three times across two
    /// songs, the offbeat figure and the two-bar phrase once each.
    fn seeded_db() -> (Database, CombinedFingerprint, CombinedFingerprint, CombinedFingerprint) {
        let db = Database::open_in_memory().unwrap();
        let a = riff(60);
        let b = offbeat();
        let c = long_phrase();

        db.index_song(
            &song("/corpus/herbie/chameleon.json", "Herbie Hancock", "Jazz-Funk", &["live"]),
            &[track(vec![write(&a, 0), write(&a, 4)])],
        )
        .unwrap();
        db.index_song(
            &song("/corpus/meters/cissy_strut.json", "The Meters", "Funk", &["studio", "classic"]),
            &[track(vec![write(&a, 0), write(&b, 1)])],
        )
        .unwrap();
        db.index_song(
            &song("/corpus/herbie/watermelon_man.json", "Herbie Hancock", "Jazz", &["studio"]),
            &[track(vec![write(&c, 0)])],
        )
        .unwrap();

        (db, a, b, c)
    }

    #[test]
    fn test_unfiltered_search_sorts_by_occurrence() {
        let (db, a, _, _) = seeded_db();
        let results = db.search(&SearchQuery::default()).unwrap();

        assert_eq!(results.total_count, 3);
        assert!(!results.has_more);
        assert_eq!(results.results.len(), 3);
        // The riff has three sightings and leads the page
        assert_eq!(results.results[0].pattern.hash, a.hash);
        assert_eq!(results.results[0].pattern.occurrence_count, 3);
    }

    #[test]
    fn test_pagination_window_and_has_more() {
        let (db, _, _, _) = seeded_db();

        let page1 = db
            .search(&SearchQuery {
                limit: 2,
                offset: 0,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page1.results.len(), 2);
        assert_eq!(page1.total_count, 3);
        assert!(page1.has_more);

        // Final partial page: one row back, nothing beyond it
        let page2 = db
            .search(&SearchQuery {
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page2.results.len(), 1);
        assert_eq!(page2.total_count, 3);
        assert!(!page2.has_more);
    }

    #[test]
    fn test_filter_by_num_bars() {
        let (db, _, _, c) = seeded_db();
        let results = db
            .search(&SearchQuery {
                num_bars: Some(2),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(results.total_count, 1);
        assert_eq!(results.results[0].pattern.hash, c.hash);
        assert!(!results.has_more);
    }

    #[test]
    fn test_filter_by_min_occurrences() {
        let (db, a, _, _) = seeded_db();
        let results = db
            .search(&SearchQuery {
                min_occurrences: Some(2),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(results.total_count, 1);
        assert_eq!(results.results[0].pattern.hash, a.hash);
    }

    #[test]
    fn test_filter_by_artist_substring() {
        let (db, a, _, c) = seeded_db();
        let results = db
            .search(&SearchQuery {
                artist: Some("herbie".to_string()),
                ..Default::default()
            })
            .unwrap();

        let hashes: Vec<_> = results.results.iter().map(|r| r.pattern.hash).collect();
        assert_eq!(results.total_count, 2);
        assert!(hashes.contains(&a.hash));
        assert!(hashes.contains(&c.hash));
    }

    #[test]
    fn test_filter_by_genre_substring() {
        let (db, a, b, _) = seeded_db();
        // "Funk" hits both Jazz-Funk and Funk songs
        let results = db
            .search(&SearchQuery {
                genre: Some("Funk".to_string()),
                ..Default::default()
            })
            .unwrap();

        let hashes: Vec<_> = results.results.iter().map(|r| r.pattern.hash).collect();
        assert_eq!(results.total_count, 2);
        assert!(hashes.contains(&a.hash));
        assert!(hashes.contains(&b.hash));
    }

    #[test]
    fn test_filter_by_tags_any_match() {
        let (db, a, _, _) = seeded_db();
        let results = db
            .search(&SearchQuery {
                tags: vec!["live".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.total_count, 1);
        assert_eq!(results.results[0].pattern.hash, a.hash);

        // Any-match: adding a second tag can only widen the result
        let results = db
            .search(&SearchQuery {
                tags: vec!["live".to_string(), "classic".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.total_count, 2);
    }

    #[test]
    fn test_filter_by_rhythm_hash() {
        let (db, a, _, _) = seeded_db();
        let results = db
            .search(&SearchQuery {
                rhythm_hash: Some(a.rhythm.hash),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(results.total_count, 1);
        assert_eq!(results.results[0].pattern.rhythm_hash, a.rhythm.hash);
    }

    #[test]
    fn test_combined_filters_and_all_excluded() {
        let (db, _, _, _) = seeded_db();
        let results = db
            .search(&SearchQuery {
                artist: Some("Meters".to_string()),
                num_bars: Some(2),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(results.total_count, 0);
        assert!(results.results.is_empty());
        assert!(!results.has_more);
    }

    #[test]
    fn test_recency_sorts_break_ties_by_insertion() {
        let (db, a, b, c) = seeded_db();

        // All rows share one created_at second, so order falls to rowid
        let newest = db
            .search(&SearchQuery {
                sort: SortOrder::Newest,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(newest.results[0].pattern.hash, c.hash);

        let oldest = db
            .search(&SearchQuery {
                sort: SortOrder::Oldest,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(oldest.results[0].pattern.hash, a.hash);
        assert_eq!(oldest.results[1].pattern.hash, b.hash);
    }

    #[test]
    fn test_enrichment_lists_on_results() {
        let (db, a, _, _) = seeded_db();
        let results = db.search(&SearchQuery::default()).unwrap();
        let top = &results.results[0];
        assert_eq!(top.pattern.hash, a.hash);

        assert_eq!(top.song_ids.len(), 2);
        assert!(top.artists.contains(&"Herbie Hancock".to_string()));
        assert!(top.artists.contains(&"The Meters".to_string()));
        assert!(top.genres.contains(&"Funk".to_string()));
        assert!(top.song_ids.len() <= ENRICHMENT_CAP);
    }

    #[test]
    fn test_find_similar_ranks_by_score() {
        let (db, a, _, _) = seeded_db();
        // Same rhythm as the riff, different melody: rhythm Jaccard 1.0
        let cousin = one_bar(vec![
            note(60, 0.0),
            note(72, 1.0),
            note(60, 2.0),
            note(72, 3.0),
        ]);
        db.upsert_pattern(&cousin).unwrap();

        let similar = db.find_similar(&a.hash, 0.3, 10).unwrap();
        assert!(!similar.is_empty());
        assert_eq!(similar[0].pattern.hash, cousin.hash);
        assert!(similar[0].similarity > 0.5);
        // Descending by score
        for pair in similar.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_find_similar_respects_threshold_and_limit() {
        let (db, a, _, _) = seeded_db();
        let cousin = one_bar(vec![
            note(60, 0.0),
            note(72, 1.0),
            note(60, 2.0),
            note(72, 3.0),
        ]);
        db.upsert_pattern(&cousin).unwrap();

        let strict = db.find_similar(&a.hash, 0.99, 10).unwrap();
        assert!(strict.is_empty());

        let capped = db.find_similar(&a.hash, 0.0, 1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].pattern.hash, cousin.hash);
    }

    #[test]
    fn test_find_similar_zero_overlap_never_matches() {
        let (db, a, b, _) = seeded_db();
        // The offbeat figure shares no onsets and no pitch classes with
        // the riff, so it scores exactly zero and stays out even at 0.0
        let similar = db.find_similar(&a.hash, 0.0, 10).unwrap();
        assert!(similar.iter().all(|s| s.pattern.hash != b.hash));
    }

    #[test]
    fn test_find_similar_unknown_target_is_empty() {
        let (db, _, _, _) = seeded_db();
        let phantom = one_bar(vec![note(40, 0.0), note(41, 3.75)]);
        assert!(db.find_similar(&phantom.hash, 0.0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_sort_order_parsing() {
        assert_eq!("occurrence".parse::<SortOrder>(), Ok(SortOrder::Occurrence));
        assert_eq!("NEWEST".parse::<SortOrder>(), Ok(SortOrder::Newest));
        assert_eq!("oldest".parse::<SortOrder>(), Ok(SortOrder::Oldest));
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
