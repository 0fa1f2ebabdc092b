use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riffbank::db::models::{InstanceDetail, PatternRecord};
use riffbank::search::{SearchQuery, SimilarPattern, SortOrder};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "riffbank", version, about = "Musical motif discovery and pattern library")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan directories for note-stream documents and index their patterns
    Index {
        /// Directories to index (defaults to config file corpus_dirs)
        paths: Vec<String>,

        /// Force re-indexing even if files haven't changed
        #[arg(long)]
        force: bool,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Search the pattern library with filters
    Search {
        /// Filter by rhythm hash (full hex)
        #[arg(long)]
        rhythm_hash: Option<String>,

        /// Filter by pitch hash (full hex)
        #[arg(long)]
        pitch_hash: Option<String>,

        /// Filter by pattern length in bars
        #[arg(long)]
        bars: Option<u32>,

        /// Minimum occurrence count
        #[arg(long)]
        min_occurrences: Option<i64>,

        /// Filter by artist (substring match)
        #[arg(short, long)]
        artist: Option<String>,

        /// Filter by genre (substring match)
        #[arg(short, long)]
        genre: Option<String>,

        /// Filter by song tag (repeat to match any of several)
        #[arg(short, long)]
        tag: Vec<String>,

        /// Sort order: occurrence, newest, oldest
        #[arg(short, long, default_value = "occurrence")]
        sort: String,

        /// Number of results per page
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Number of results to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Find stored patterns similar to a given one
    Similar {
        /// Pattern hash (hex, prefix allowed)
        hash: String,

        /// Minimum combined similarity, 0.0 to 1.0 (default from config)
        #[arg(long)]
        threshold: Option<f64>,

        /// Number of results
        #[arg(short = 'n', long, default_value = "15")]
        limit: usize,
    },

    /// Show a pattern's fingerprint and every place it occurs
    Show {
        /// Pattern hash (hex, prefix allowed)
        hash: String,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = riffbank::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli.db_path
        .or(config.db_path.clone())
        .unwrap_or_else(riffbank::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = riffbank::db::Database::open(&db_path)
        .context("Failed to open database")?;

    match cli.command {
        Commands::Index { paths, force, jobs } => {
            // Resolve index paths: CLI args > config corpus_dirs
            let index_paths = if !paths.is_empty() {
                paths
            } else if !config.corpus_dirs.is_empty() {
                config.corpus_dirs.iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect()
            } else {
                anyhow::bail!(
                    "No directories to index. Pass paths as arguments or set corpus_dirs in config."
                );
            };

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let result = riffbank::ingest::ingest(
                &db, &index_paths, &config.analysis, force, workers,
            )
            .context("Indexing failed")?;
            println!(
                "Index complete: {} scanned, {} indexed, {} skipped, {} failed",
                result.scanned, result.indexed, result.skipped, result.failed
            );
        }

        Commands::Search {
            rhythm_hash, pitch_hash, bars, min_occurrences,
            artist, genre, tag, sort, limit, offset,
        } => {
            let sort: SortOrder = sort.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            let query = SearchQuery {
                rhythm_hash: rhythm_hash
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .context("Invalid rhythm hash")?,
                pitch_hash: pitch_hash
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .context("Invalid pitch hash")?,
                num_bars: bars,
                min_occurrences,
                artist,
                genre,
                tags: tag,
                sort,
                limit,
                offset,
            };

            let results = db.search(&query).context("Search failed")?;

            if results.results.is_empty() {
                println!("No patterns found.");
                return Ok(());
            }

            println!(
                "Showing {}-{} of {} patterns:",
                offset + 1,
                offset + results.results.len(),
                results.total_count
            );
            println!();
            print_search_table(&results.results);

            if results.has_more {
                println!();
                println!(
                    "More results available (re-run with --offset {})",
                    offset + results.results.len()
                );
            }
        }

        Commands::Similar { hash, threshold, limit } => {
            let pattern = match resolve_pattern(&db, &hash)? {
                Some(p) => p,
                None => {
                    println!("No pattern matching \"{}\".", hash);
                    return Ok(());
                }
            };

            let threshold = threshold.unwrap_or(config.search.similar_threshold);
            let results = db.find_similar(&pattern.hash, threshold, limit)
                .context("Similarity query failed")?;

            if results.is_empty() {
                println!(
                    "No patterns similar to {} at threshold {:.2}.",
                    short_hash(&pattern.hash.to_hex()),
                    threshold
                );
                return Ok(());
            }

            println!(
                "Patterns similar to {} ({}):",
                short_hash(&pattern.hash.to_hex()),
                pattern.pattern_type
            );
            println!();
            print_similar_table(&results);
        }

        Commands::Show { hash } => {
            let pattern = match resolve_pattern(&db, &hash)? {
                Some(p) => p,
                None => {
                    println!("No pattern matching \"{}\".", hash);
                    return Ok(());
                }
            };

            print_pattern_detail(&pattern);

            let instances = db.instances_for_pattern(&pattern.hash, 50)
                .context("Instance query failed")?;
            if instances.is_empty() {
                println!("No recorded instances.");
            } else {
                println!("Found in:");
                println!();
                print_instance_table(&instances);
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Songs:          {}", stats.total_songs);
            println!("Tracks:         {}", stats.total_tracks);
            println!("Patterns:       {}", stats.total_patterns);
            println!("Instances:      {}", stats.total_instances);
            println!("Avg repetition: {:.2}", stats.avg_repetition_ratio);
            println!();

            if !stats.patterns_by_type.is_empty() {
                println!("Patterns by type:");
                for (kind, count) in &stats.patterns_by_type {
                    println!("  {:<10} {}", kind, count);
                }
                println!();
            }

            if !stats.top_artists.is_empty() {
                println!("Top artists:");
                for (artist, count) in &stats.top_artists {
                    println!("  {:<30} {}", artist, count);
                }
            }
        }
    }

    Ok(())
}

/// Resolve a hex hash prefix to exactly one stored pattern.
/// Errors when the prefix is ambiguous; `None` when nothing matches.
fn resolve_pattern(db: &riffbank::db::Database, prefix: &str) -> Result<Option<PatternRecord>> {
    let matches = db.find_patterns_by_prefix(prefix).context("Lookup failed")?;
    match matches.len() {
        0 => Ok(None),
        1 => db.get_pattern(&matches[0]).context("Lookup failed"),
        n => {
            let shown: Vec<String> = matches
                .iter()
                .take(5)
                .map(|h| short_hash(&h.to_hex()))
                .collect();
            anyhow::bail!(
                "Hash prefix \"{}\" matches {} patterns: {}{}",
                prefix,
                n,
                shown.join(", "),
                if n > 5 { ", ..." } else { "" }
            )
        }
    }
}

fn short_hash(hex: &str) -> String {
    hex.chars().take(12).collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

/// Print a table of search results.
fn print_search_table(results: &[riffbank::search::PatternMatch]) {
    println!(
        "{:<13} {:<9} {:>4} {:>5} {:>6}  {}",
        "Hash", "Type", "Bars", "Occ", "Songs", "Artists"
    );
    println!("{}", "-".repeat(78));

    for m in results {
        let p = &m.pattern;
        println!(
            "{:<13} {:<9} {:>4} {:>5} {:>6}  {}",
            short_hash(&p.hash.to_hex()),
            p.pattern_type,
            p.num_bars,
            p.occurrence_count,
            m.song_ids.len(),
            truncate(&m.artists.join(", "), 34),
        );
    }

    println!();
    println!("Use `show <hash>` for a pattern's full fingerprint and instances.");
}

/// Print a table of similar patterns with their scores.
fn print_similar_table(results: &[SimilarPattern]) {
    println!(
        "{:<13} {:<9} {:>4} {:>5} {:>6}",
        "Hash", "Type", "Bars", "Occ", "Sim"
    );
    println!("{}", "-".repeat(42));

    for s in results {
        println!(
            "{:<13} {:<9} {:>4} {:>5} {:>6.3}",
            short_hash(&s.pattern.hash.to_hex()),
            s.pattern.pattern_type,
            s.pattern.num_bars,
            s.pattern.occurrence_count,
            s.similarity,
        );
    }

    println!();
    println!("Sim = mean of rhythm grid overlap and pitch-class similarity");
}

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

fn pitch_label(mean: f64) -> String {
    if mean <= 0.0 {
        return "-".to_string();
    }
    let midi = mean.round() as i64;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    format!("{}{}", name, midi / 12 - 1)
}

/// Print one pattern's full fingerprint.
fn print_pattern_detail(p: &PatternRecord) {
    println!("Pattern {} ({})", p.hash.to_hex(), p.pattern_type);
    println!("{}", "=".repeat(44));
    println!(
        "Bars: {}    Grid: {} steps/bar    Occurrences: {}",
        p.num_bars, p.grid_size, p.occurrence_count
    );
    println!(
        "Range: {} semitones    Mean pitch: {:.1} ({})",
        p.range_semitones,
        p.mean_pitch,
        pitch_label(p.mean_pitch)
    );
    println!("Created: {}", p.created_at);
    println!();

    // One row per bar, X for accented onsets, x for quiet ones
    println!("Rhythm:");
    let steps = p.grid_size.max(1) as usize;
    for (bar, row) in p.onset_grid.chunks(steps).enumerate() {
        let mut line = String::with_capacity(steps);
        for (i, &on) in row.iter().enumerate() {
            if on == 0 {
                line.push('.');
            } else {
                let accent = p.accent_grid.get(bar * steps + i).copied().unwrap_or(0.0);
                line.push(if accent >= 0.66 { 'X' } else { 'x' });
            }
        }
        println!("  |{}|", line);
    }
    println!();

    if !p.intervals.is_empty() {
        let intervals: Vec<String> = p.intervals.iter().map(|i| format!("{:+}", i)).collect();
        println!("Intervals: {}", intervals.join(" "));
        let contour: String = p
            .contour
            .iter()
            .map(|&c| match c.signum() {
                1 => '/',
                -1 => '\\',
                _ => '-',
            })
            .collect();
        println!("Contour:   {}", contour);
    }

    let classes: Vec<String> = p
        .pitch_classes
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count > 0)
        .map(|(pc, &count)| format!("{}:{}", NOTE_NAMES[pc], count))
        .collect();
    if !classes.is_empty() {
        println!("Pitch classes: {}", classes.join("  "));
    }
    println!();
}

/// Print a table of pattern instances.
fn print_instance_table(instances: &[InstanceDetail]) {
    println!(
        "{:<25} {:<18} {:<12} {:>7} {:>6} {:>5}",
        "Song", "Artist", "Track", "Bars", "Shift", "Conf"
    );
    println!("{}", "-".repeat(80));

    for i in instances {
        let title = i.song_title.as_deref().unwrap_or("?");
        let artist = i.artist.as_deref().unwrap_or("Unknown");
        println!(
            "{:<25} {:<18} {:<12} {:>7} {:>+6} {:>5.2}",
            truncate(title, 25),
            truncate(artist, 18),
            truncate(&i.track_name, 12),
            format!("{}-{}", i.start_bar, i.end_bar),
            i.transposition,
            i.confidence,
        );
    }
}
