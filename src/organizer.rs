//! Moves files into category or date subdirectories.
//!
//! [`FileOrganizer`] snapshots the immediate files of a source directory once,
//! decides a folder for each one, resolves a collision-free destination and then
//! either reports the plan ([`FileOrganizer::preview`]) or performs the moves
//! ([`FileOrganizer::execute`]). Both modes share the same decision code, so a
//! preview taken just before an execute on an unchanged directory predicts it
//! exactly.

use crate::category::{CategoryTable, OTHERS};
use crate::config::CompiledFilters;
use crate::destination;
use crate::error::{Error, Result};
use crate::run::FileMoveRecord;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Folder layout used when none is given for a by-date run.
pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m";

/// How files are grouped into subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// By extension category, e.g. `Images/`.
    ByType,
    /// By last-modified time formatted with a strftime pattern, e.g. `2024/05/`.
    ByDate,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::ByType => f.write_str("by_type"),
            OperationKind::ByDate => f.write_str("by_date"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "by_type" => Ok(OperationKind::ByType),
            "by_date" => Ok(OperationKind::ByDate),
            other => Err(Error::validation(format!(
                "unknown operation kind '{}': expected by_type or by_date",
                other
            ))),
        }
    }
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_create_others() -> bool {
    true
}

/// Parameters of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeRequest {
    pub source_directory: PathBuf,
    pub operation_kind: OperationKind,
    /// Only used by [`OperationKind::ByDate`].
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Only used by [`OperationKind::ByType`]; when false, unmatched files stay put.
    #[serde(default = "default_create_others")]
    pub create_others: bool,
}

impl OrganizeRequest {
    pub fn by_type(source_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_directory: source_directory.into(),
            operation_kind: OperationKind::ByType,
            date_format: default_date_format(),
            create_others: true,
        }
    }

    pub fn by_date(source_directory: impl Into<PathBuf>, date_format: impl Into<String>) -> Self {
        Self {
            source_directory: source_directory.into(),
            operation_kind: OperationKind::ByDate,
            date_format: date_format.into(),
            create_others: true,
        }
    }

    pub fn with_create_others(mut self, create_others: bool) -> Self {
        self.create_others = create_others;
        self
    }

    /// Rejects requests that could never run, before touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.source_directory.as_os_str().is_empty() {
            return Err(Error::validation("source directory is required"));
        }
        if self.operation_kind == OperationKind::ByDate {
            validate_date_format(&self.date_format)?;
        }
        Ok(())
    }
}

/// Checks that `format` only uses known strftime tokens and always yields a
/// relative folder path inside the source directory.
pub fn validate_date_format(format: &str) -> Result<()> {
    if format.trim().is_empty() {
        return Err(Error::validation("date format must not be empty"));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::validation(format!(
            "date format '{}' contains an unknown strftime token",
            format
        )));
    }

    let sample = Utc::now().format(format).to_string();
    let path = Path::new(&sample);
    let relative = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !relative {
        return Err(Error::validation(format!(
            "date format '{}' must produce a relative folder name",
            format
        )));
    }
    Ok(())
}

/// A move the organizer would perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub file_name: String,
}

/// Result of [`FileOrganizer::preview`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub total_files: usize,
    pub moves: Vec<PlannedMove>,
    pub stats: BTreeMap<String, usize>,
    pub categories_to_create: Vec<String>,
}

/// Result of [`FileOrganizer::execute`], complete or partial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub stats: BTreeMap<String, usize>,
    pub move_log: Vec<FileMoveRecord>,
}

impl Execution {
    /// Sorted, deduplicated folder names touched by the run.
    pub fn categories(&self) -> Vec<String> {
        self.stats.keys().cloned().collect()
    }
}

/// An execute that stopped at its first failure.
///
/// Moves made before the failure are not rolled back; they are in `partial`.
#[derive(Debug)]
pub struct Aborted {
    pub error: Error,
    pub partial: Execution,
}

impl From<Aborted> for Error {
    fn from(aborted: Aborted) -> Self {
        aborted.error
    }
}

impl From<Error> for Aborted {
    fn from(error: Error) -> Self {
        Aborted {
            error,
            partial: Execution::default(),
        }
    }
}

/// Organizes the immediate files of a directory.
#[derive(Debug, Clone, Default)]
pub struct FileOrganizer {
    categories: CategoryTable,
    filters: CompiledFilters,
}

impl FileOrganizer {
    pub fn new(categories: CategoryTable, filters: CompiledFilters) -> Self {
        Self {
            categories,
            filters,
        }
    }

    pub fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    /// Plans an organization without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad request, [`Error::InvalidDirectory`]
    /// when the source is missing or not a directory, or an I/O error if the
    /// directory or a file's metadata cannot be read.
    pub fn preview(&self, request: &OrganizeRequest) -> Result<Preview> {
        let (root, files) = self.snapshot(request)?;

        let mut planned: HashSet<PathBuf> = HashSet::new();
        let mut moves = Vec::new();
        let mut stats = BTreeMap::new();

        for file in files {
            let Some(planned_move) = self.plan(request, &root, &file, &planned)? else {
                continue;
            };
            planned.insert(planned_move.destination.clone());
            *stats.entry(planned_move.category.clone()).or_insert(0) += 1;
            moves.push(planned_move);
        }

        let categories_to_create = stats.keys().cloned().collect();
        tracing::debug!(
            source = %root.display(),
            files = moves.len(),
            "planned organization"
        );

        Ok(Preview {
            total_files: moves.len(),
            moves,
            stats,
            categories_to_create,
        })
    }

    /// Moves every selected file into its folder, in listing order.
    ///
    /// Stops at the first failure and returns the moves made so far inside
    /// [`Aborted`]; nothing is rolled back.
    pub fn execute(&self, request: &OrganizeRequest) -> std::result::Result<Execution, Aborted> {
        let (root, files) = self.snapshot(request)?;

        let mut planned: HashSet<PathBuf> = HashSet::new();
        let mut execution = Execution::default();

        for file in files {
            let step = self
                .plan(request, &root, &file, &planned)
                .and_then(|planned_move| match planned_move {
                    Some(planned_move) => {
                        perform_move(&planned_move.source, &planned_move.destination)?;
                        Ok(Some(planned_move))
                    }
                    None => Ok(None),
                });

            match step {
                Ok(Some(done)) => {
                    tracing::debug!(
                        from = %done.source.display(),
                        to = %done.destination.display(),
                        category = %done.category,
                        "moved file"
                    );
                    planned.insert(done.destination.clone());
                    *execution.stats.entry(done.category).or_insert(0) += 1;
                    execution.move_log.push((done.source, done.destination));
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        source = %root.display(),
                        moved = execution.move_log.len(),
                        error = %error,
                        "organization aborted"
                    );
                    return Err(Aborted {
                        error,
                        partial: execution,
                    });
                }
            }
        }

        tracing::info!(
            source = %root.display(),
            files_moved = execution.move_log.len(),
            categories = execution.stats.len(),
            "organization complete"
        );
        Ok(execution)
    }

    /// Validates the request, resolves the source directory and lists its
    /// regular files once, sorted by name.
    ///
    /// Symlinks are never followed: a link to a regular file is left in place,
    /// as are subdirectories.
    fn snapshot(&self, request: &OrganizeRequest) -> Result<(PathBuf, Vec<PathBuf>)> {
        request.validate()?;

        let invalid = || Error::InvalidDirectory {
            path: request.source_directory.clone(),
        };
        let root = fs::canonicalize(&request.source_directory).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => invalid(),
            _ => Error::io(&request.source_directory, e),
        })?;
        if !root.is_dir() {
            return Err(invalid());
        }

        let entries = fs::read_dir(&root).map_err(|e| Error::io(&root, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&root, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.filters.should_include(Path::new(&entry.file_name())) {
                files.push(entry.path());
            }
        }
        files.sort();

        Ok((root, files))
    }

    /// Decides the folder and destination for one file, or `None` to leave it.
    fn plan(
        &self,
        request: &OrganizeRequest,
        root: &Path,
        file: &Path,
        planned: &HashSet<PathBuf>,
    ) -> Result<Option<PlannedMove>> {
        let category = match request.operation_kind {
            OperationKind::ByType => {
                let category = self.categories.classify_path(file);
                if category == OTHERS && !request.create_others {
                    return Ok(None);
                }
                category.to_string()
            }
            OperationKind::ByDate => {
                let metadata = fs::metadata(file).map_err(|e| Error::io(file, e))?;
                let modified = metadata.modified().map_err(|e| Error::io(file, e))?;
                let modified: DateTime<Local> = modified.into();
                modified.format(&request.date_format).to_string()
            }
        };

        let file_name = file.file_name().ok_or_else(|| Error::Io {
            path: file.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "file has no name component"),
        })?;
        let candidate = root.join(&category).join(file_name);
        let destination = destination::resolve_with(&candidate, |p| planned.contains(p));

        Ok(Some(PlannedMove {
            source: file.to_path_buf(),
            destination,
            category,
            file_name: file_name.to_string_lossy().into_owned(),
        }))
    }
}

/// Moves `from` to `to`, creating `to`'s parent directories first.
///
/// Falls back to copy and remove when a rename crosses filesystems.
pub(crate) fn perform_move(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let failed = |source: io::Error| Error::MoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            tracing::warn!(
                from = %from.display(),
                to = %to.display(),
                "rename crosses filesystems, copying instead"
            );
            fs::copy(from, to).map_err(failed)?;
            fs::remove_file(from).map_err(failed)
        }
        Err(e) => Err(failed(e)),
    }
}
