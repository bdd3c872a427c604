//! Application configuration.
//!
//! Settings are read from a TOML file. Besides logging, scheduler and storage
//! options it carries two things the organizer depends on:
//! - an optional replacement category table, validated once at load time
//! - file filter rules (hidden files, exact names, extensions, globs, regexes,
//!   and include patterns that override all exclusions)
//!
//! # Configuration File Format
//!
//! ```toml
//! data_dir = "/var/lib/tidyd"
//!
//! [logging]
//! level = "info"
//!
//! [scheduler]
//! enabled = true
//! sync_interval_seconds = 5
//!
//! [filters]
//! skip_hidden_files = false
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.tmp"]
//! extensions = ["part"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//!
//! [[categories]]
//! name = "Images"
//! extensions = [".jpg", ".png"]
//! ```

use crate::category::{CategoryDef, CategoryTable};
use crate::error::{Error, Result};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCAL_CONFIG: &str = ".tidydrc.toml";

/// Top level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where run history and scheduled jobs are stored.
    pub data_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub filters: FilterRules,
    /// Replaces the built-in category table when present.
    pub categories: Option<Vec<CategoryDef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `TIDYD_LOG`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When false, `tidyd daemon` refuses to start the scheduling loop.
    pub enabled: bool,
    /// How often the daemon re-reads the job table to pick up jobs added,
    /// changed or removed by other commands.
    pub sync_interval_seconds: u64,
}

impl SchedulerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_seconds: 5,
        }
    }
}

/// File filter rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterRules {
    /// Leave files starting with "." alone. Off by default, so dot-files are
    /// organized like any other file.
    #[serde(default)]
    pub skip_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Patterns that win over every exclude rule.
    #[serde(default)]
    pub include: IncludeRules,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact file names, e.g. "Thumbs.db".
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name, e.g. "*.tmp".
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions without the dot, matched case-insensitively.
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub regex: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl AppConfig {
    /// Loads configuration, trying in order:
    /// 1. `config_path` when given (must exist)
    /// 2. `.tidydrc.toml` in the current directory
    /// 3. `~/.config/tidyd/config.toml`
    /// 4. built-in defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".config").join("tidyd").join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// The configured category table, or the built-in one.
    pub fn category_table(&self) -> Result<CategoryTable> {
        match &self.categories {
            Some(definitions) => CategoryTable::new(definitions.clone()),
            None => Ok(CategoryTable::default()),
        }
    }

    pub fn compile_filters(&self) -> Result<CompiledFilters> {
        CompiledFilters::new(&self.filters)
    }

    /// Resolved data directory: the configured one, else
    /// `~/.local/share/tidyd`, else `./.tidyd`.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        match home_dir() {
            Some(home) => home.join(".local").join("share").join("tidyd"),
            None => PathBuf::from(".tidyd"),
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Filter rules with every pattern compiled up front.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    skip_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern)
                .map_err(|e| Error::Config(format!("invalid glob pattern '{}': {}", pattern, e)))
        })
        .collect()
}

impl CompiledFilters {
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first glob or regex that fails to
    /// compile.
    pub fn new(rules: &FilterRules) -> Result<Self> {
        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| Error::Config(format!("invalid regex '{}': {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            skip_hidden_files: rules.skip_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns: compile_globs(&rules.exclude.patterns)?,
            exclude_regexes,
            include_patterns: compile_globs(&rules.include.patterns)?,
        })
    }

    /// Whether a file, given by its path relative to the source directory,
    /// takes part in organization.
    ///
    /// Include patterns are checked first and always win. Then, in order: hidden
    /// files, exact names, extensions, globs, regexes. Anything left is included.
    pub fn should_include(&self, relative_path: &Path) -> bool {
        let file_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self
            .include_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return true;
        }

        if self.skip_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = relative_path.extension()
            && self
                .exclude_extensions
                .contains(&ext.to_string_lossy().to_lowercase())
        {
            return false;
        }

        if self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches_path(relative_path))
        {
            return false;
        }

        !self
            .exclude_regexes
            .iter()
            .any(|regex| regex.is_match(&file_name))
    }
}
