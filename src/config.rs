use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan for note-stream documents (used when `index` has no CLI args).
    pub corpus_dirs: Vec<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Pattern discovery settings.
    pub analysis: AnalysisConfig,
    /// Search settings.
    pub search: SearchConfig,
}

/// Knobs for the segmentation and deduplication pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Window length in bars for pattern extraction.
    pub chunk_bars: u32,
    /// Rhythm grid resolution in steps per bar.
    pub grid_size: u32,
    /// Minimum rhythm similarity for a fuzzy merge (1.0 = exact only).
    pub rhythm_threshold: f64,
    /// Minimum pitch similarity for a fuzzy merge (1.0 = exact only).
    pub pitch_threshold: f64,
    /// Treat transposed repeats of a shape as the same pattern.
    pub allow_transposition: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chunk_bars: 4,
            grid_size: 16,
            rhythm_threshold: 0.8,
            pitch_threshold: 0.7,
            allow_transposition: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum combined similarity for `similar` results.
    pub similar_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similar_threshold: 0.6,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/riffbank/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        match toml::from_str::<AppConfig>(&contents) {
                            Ok(config) => {
                                log::info!("Loaded config from {}", path.display());
                                config.sanitized()
                            }
                            Err(e) => {
                                log::warn!(
                                    "Failed to parse {}: {}. Using defaults.",
                                    path.display(),
                                    e
                                );
                                Self::default()
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!(
                            "Failed to read {}: {}. Using defaults.",
                            path.display(),
                            e
                        );
                        Self::default()
                    }
                }
            }
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Clamp zero grid or window sizes back to workable values.
    fn sanitized(mut self) -> Self {
        if self.analysis.chunk_bars == 0 {
            log::warn!("chunk_bars must be at least 1, using 1");
            self.analysis.chunk_bars = 1;
        }
        if self.analysis.grid_size == 0 {
            log::warn!("grid_size must be at least 1, using 1");
            self.analysis.grid_size = 1;
        }
        self
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("riffbank.db")
    } else {
        // Fallback: current directory
        PathBuf::from("riffbank.db")
    }
}
