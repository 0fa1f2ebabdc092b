use super::models::{
    InstanceDetail, LibraryStats, NewSong, PatternRecord, TrackPatterns,
};
use super::{Database, Result};
use crate::fingerprint::CombinedFingerprint;
use crate::hash::{PatternHash, PitchHash, RhythmHash};
use rusqlite::params;

/// Column list shared by every pattern SELECT, in `pattern_from_row` order.
pub(crate) const PATTERN_COLUMNS: &str = "hash, pattern_type, num_bars, grid_size, \
     onset_grid, accent_grid, rhythm_hash, intervals, pitch_classes, contour, \
     range_semitones, mean_pitch, pitch_hash, occurrence_count, created_at";

impl Database {
    /// Store one song's full analysis in a single transaction: song row,
    /// tags, tracks, pattern upserts, and instance rows. If the path was
    /// indexed before, the old version is removed first so occurrence
    /// counts stay equal to live instance counts. Returns the song id.
    pub fn index_song(&self, song: &NewSong, tracks: &[TrackPatterns]) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;

        let existing: std::result::Result<i64, _> = tx.query_row(
            "SELECT id FROM songs WHERE source_path = ?1",
            params![song.source_path],
            |row| row.get(0),
        );
        match existing {
            Ok(old_id) => remove_song_tx(&tx, old_id)?,
            Err(rusqlite::Error::QueryReturnedNoRows) => {}
            Err(e) => return Err(e.into()),
        }

        tx.execute(
            "INSERT INTO songs (
                source_path, file_size, file_modified,
                title, artist, album, genre, year, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))",
            params![
                song.source_path,
                song.file_size,
                song.file_modified,
                song.title,
                song.artist,
                song.album,
                song.genre,
                song.year,
            ],
        )?;
        let song_id = tx.last_insert_rowid();

        if !song.tags.is_empty() {
            let mut stmt = tx
                .prepare_cached("INSERT OR IGNORE INTO song_tags (song_id, tag) VALUES (?1, ?2)")?;
            for tag in &song.tags {
                stmt.execute(params![song_id, tag])?;
            }
        }

        for track in tracks {
            tx.execute(
                "INSERT INTO tracks (
                    song_id, name, channel,
                    note_count, chunk_count, unique_patterns, repetition_ratio
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    song_id,
                    track.name,
                    track.channel,
                    track.note_count,
                    track.chunk_count,
                    track.unique_patterns,
                    track.repetition_ratio,
                ],
            )?;
            let track_id = tx.last_insert_rowid();

            for write in &track.patterns {
                upsert_pattern_tx(&tx, &write.fingerprint)?;
                record_instance_tx(
                    &tx,
                    &write.fingerprint.hash,
                    track_id,
                    write.start_bar,
                    write.end_bar,
                    write.transposition,
                    write.confidence,
                )?;
            }
        }

        tx.commit()?;
        Ok(song_id)
    }

    /// Insert a pattern row, or bump its occurrence count if the hash is
    /// already stored. Single statement, so concurrent callers cannot race
    /// a read-then-write. Returns the pattern's identity either way.
    pub fn upsert_pattern(&self, fp: &CombinedFingerprint) -> Result<PatternHash> {
        upsert_pattern_tx(&self.conn, fp)?;
        Ok(fp.hash)
    }

    /// Remove one song and everything that hangs off it: its pattern
    /// sightings are given back, tracks and instances cascade away, and
    /// patterns left with no occurrences anywhere are purged.
    pub fn delete_song(&self, song_id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        remove_song_tx(&tx, song_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Record one occurrence of a stored pattern. Returns the instance id.
    pub fn record_instance(
        &self,
        hash: &PatternHash,
        track_id: i64,
        start_bar: i64,
        end_bar: i64,
        transposition: i32,
        confidence: f64,
    ) -> Result<i64> {
        record_instance_tx(
            &self.conn,
            hash,
            track_id,
            start_bar,
            end_bar,
            transposition,
            confidence,
        )
    }

    /// Look up a pattern by its combined hash.
    pub fn get_pattern(&self, hash: &PatternHash) -> Result<Option<PatternRecord>> {
        let result = self.conn.query_row(
            &format!("SELECT {PATTERN_COLUMNS} FROM patterns WHERE hash = ?1"),
            params![hash],
            pattern_from_row,
        );
        match result {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All patterns sharing a rhythm hash, regardless of pitch content.
    pub fn patterns_by_rhythm_hash(&self, hash: &RhythmHash) -> Result<Vec<PatternRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE rhythm_hash = ?1 ORDER BY rowid"
        ))?;
        let patterns = stmt
            .query_map(params![hash], pattern_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// All patterns sharing a pitch hash, regardless of rhythm.
    pub fn patterns_by_pitch_hash(&self, hash: &PitchHash) -> Result<Vec<PatternRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE pitch_hash = ?1 ORDER BY rowid"
        ))?;
        let patterns = stmt
            .query_map(params![hash], pattern_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// Resolve a hex prefix to full pattern hashes, for abbreviated CLI
    /// references. Non-hex input matches nothing.
    pub fn find_patterns_by_prefix(&self, prefix: &str) -> Result<Vec<PatternHash>> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT hash FROM patterns WHERE hash LIKE ?1 ORDER BY hash")?;
        let hashes = stmt
            .query_map(params![format!("{}%", prefix.to_lowercase())], |row| {
                row.get(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(hashes)
    }

    /// Occurrences of one pattern with song/track context, oldest first.
    pub fn instances_for_pattern(
        &self,
        hash: &PatternHash,
        limit: usize,
    ) -> Result<Vec<InstanceDetail>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.title, s.artist, t.name,
                    pi.start_bar, pi.end_bar, pi.transposition, pi.confidence
             FROM pattern_instances pi
             JOIN tracks t ON t.id = pi.track_id
             JOIN songs s ON s.id = t.song_id
             WHERE pi.pattern_hash = ?1
             ORDER BY pi.id
             LIMIT ?2",
        )?;
        let instances = stmt
            .query_map(params![hash, limit as i64], |row| {
                Ok(InstanceDetail {
                    song_title: row.get(0)?,
                    artist: row.get(1)?,
                    track_name: row.get(2)?,
                    start_bar: row.get(3)?,
                    end_bar: row.get(4)?,
                    transposition: row.get(5)?,
                    confidence: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(instances)
    }

    /// Every stored pattern, in insertion order. Used by similarity scans.
    pub fn all_patterns(&self) -> Result<Vec<PatternRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {PATTERN_COLUMNS} FROM patterns ORDER BY rowid"))?;
        let patterns = stmt
            .query_map([], pattern_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// Check if a source path is already indexed and unchanged (same size
    /// and mtime).
    pub fn song_unchanged(
        &self,
        source_path: &str,
        file_size: i64,
        file_modified: &str,
    ) -> Result<bool> {
        let result: std::result::Result<(i64, String), _> = self.conn.query_row(
            "SELECT file_size, file_modified FROM songs WHERE source_path = ?1",
            params![source_path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );

        match result {
            Ok((size, mtime)) => Ok(size == file_size && mtime == file_modified),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Get corpus statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let total_songs: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM songs", [], |row| row.get(0))?;
        let total_tracks: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        let total_patterns: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        let total_instances: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pattern_instances",
            [],
            |row| row.get(0),
        )?;

        let mut type_stmt = self.conn.prepare(
            "SELECT pattern_type, COUNT(*) FROM patterns
             GROUP BY pattern_type ORDER BY COUNT(*) DESC",
        )?;
        let patterns_by_type: Vec<(String, i64)> = type_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let avg_repetition_ratio: f64 = self.conn.query_row(
            "SELECT COALESCE(AVG(repetition_ratio), 0.0) FROM tracks",
            [],
            |row| row.get(0),
        )?;

        let mut artist_stmt = self.conn.prepare(
            "SELECT COALESCE(artist, 'Unknown'), COUNT(*)
             FROM songs
             GROUP BY COALESCE(artist, 'Unknown')
             ORDER BY COUNT(*) DESC
             LIMIT 20",
        )?;
        let top_artists: Vec<(String, i64)> = artist_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_songs,
            total_tracks,
            total_patterns,
            total_instances,
            patterns_by_type,
            avg_repetition_ratio,
            top_artists,
        })
    }
}

/// Atomic insert-or-increment for one pattern (used within a transaction).
fn upsert_pattern_tx(conn: &rusqlite::Connection, fp: &CombinedFingerprint) -> Result<()> {
    let t = fp.to_transport_form();
    let mut stmt = conn.prepare_cached(
        "INSERT INTO patterns (
            hash, pattern_type, num_bars, grid_size,
            onset_grid, accent_grid, rhythm_hash,
            intervals, pitch_classes, contour,
            range_semitones, mean_pitch, pitch_hash,
            occurrence_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1)
        ON CONFLICT(hash) DO UPDATE SET
            occurrence_count = occurrence_count + 1",
    )?;
    stmt.execute(params![
        fp.hash,
        fp.kind().as_str(),
        t.num_bars as i64,
        t.grid_size as i64,
        serde_json::to_string(&t.onset_grid)?,
        serde_json::to_string(&t.accent_grid)?,
        fp.rhythm.hash,
        serde_json::to_string(&t.intervals)?,
        serde_json::to_string(&t.pitch_classes)?,
        serde_json::to_string(&t.contour)?,
        t.range_semitones as i64,
        t.mean_pitch,
        fp.pitch.hash,
    ])?;
    Ok(())
}

fn record_instance_tx(
    conn: &rusqlite::Connection,
    hash: &PatternHash,
    track_id: i64,
    start_bar: i64,
    end_bar: i64,
    transposition: i32,
    confidence: f64,
) -> Result<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO pattern_instances (
            pattern_hash, track_id, start_bar, end_bar, transposition, confidence
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    stmt.execute(params![
        hash,
        track_id,
        start_bar,
        end_bar,
        transposition,
        confidence,
    ])?;
    Ok(conn.last_insert_rowid())
}

/// Remove a song before re-indexing: give back its pattern sightings,
/// delete the song (tracks and instances cascade), then drop patterns
/// that no longer occur anywhere.
fn remove_song_tx(conn: &rusqlite::Connection, song_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE patterns SET occurrence_count = occurrence_count - (
            SELECT COUNT(*) FROM pattern_instances pi
            JOIN tracks t ON t.id = pi.track_id
            WHERE pi.pattern_hash = patterns.hash AND t.song_id = ?1
         )
         WHERE hash IN (
            SELECT DISTINCT pi.pattern_hash FROM pattern_instances pi
            JOIN tracks t ON t.id = pi.track_id
            WHERE t.song_id = ?1
         )",
        params![song_id],
    )?;
    conn.execute("DELETE FROM songs WHERE id = ?1", params![song_id])?;
    conn.execute("DELETE FROM patterns WHERE occurrence_count <= 0", [])?;
    Ok(())
}

/// Map one pattern row, decoding the JSON-encoded sequence columns.
pub(crate) fn pattern_from_row(row: &rusqlite::Row) -> rusqlite::Result<PatternRecord> {
    Ok(PatternRecord {
        hash: row.get(0)?,
        pattern_type: row.get(1)?,
        num_bars: row.get(2)?,
        grid_size: row.get(3)?,
        onset_grid: json_column(row, 4)?,
        accent_grid: json_column(row, 5)?,
        rhythm_hash: row.get(6)?,
        intervals: json_column(row, 7)?,
        pitch_classes: json_column(row, 8)?,
        contour: json_column(row, 9)?,
        range_semitones: row.get(10)?,
        mean_pitch: row.get(11)?,
        pitch_hash: row.get(12)?,
        occurrence_count: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
