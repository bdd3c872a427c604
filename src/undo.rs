//! Reverting organization runs.
//!
//! Undo replays a move log backwards, moving each file from its destination
//! back to its source. It is best effort: entries whose file has disappeared are
//! skipped, failures are recorded, and processing always continues to the end of
//! the log. The report is the only signal of partial success.

use crate::organizer::perform_move;
use crate::run::FileMoveRecord;
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of replaying one move log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoReport {
    /// Number of files moved back to their original location.
    pub restored: usize,
    /// Entries whose file was no longer at its destination.
    pub skipped: Vec<(PathBuf, String)>,
    /// Entries that could not be restored.
    pub failed: Vec<(PathBuf, String)>,
}

impl UndoReport {
    pub fn total_processed(&self) -> usize {
        self.restored + self.failed.len() + self.skipped.len()
    }

    /// True when every entry was restored.
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Restores files recorded in a move log.
pub struct UndoManager;

impl UndoManager {
    /// Moves every `(source, destination)` pair back, last move first.
    ///
    /// # Edge Cases Handled
    ///
    /// * **Destination missing**: skipped, the file was moved or deleted since
    /// * **Source occupied**: the occupying file is renamed aside with a
    ///   `.bak.<timestamp>` suffix before restoring
    /// * **Permission denied / other I/O**: recorded as a failure, undo continues
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidyd::undo::UndoManager;
    /// use std::path::PathBuf;
    ///
    /// let log = vec![(
    ///     PathBuf::from("/data/inbox/photo.jpg"),
    ///     PathBuf::from("/data/inbox/Images/photo.jpg"),
    /// )];
    /// let report = UndoManager::undo(&log);
    /// println!("Restored {} files", report.restored);
    /// ```
    pub fn undo(move_log: &[FileMoveRecord]) -> UndoReport {
        let mut report = UndoReport::default();

        for (source, destination) in move_log.iter().rev() {
            if !destination.exists() {
                tracing::info!(
                    destination = %destination.display(),
                    "file no longer at its destination, skipping"
                );
                report.skipped.push((
                    destination.clone(),
                    "File not found at expected location".to_string(),
                ));
                continue;
            }

            match Self::restore_file(source, destination) {
                Ok(()) => report.restored += 1,
                Err(reason) => {
                    tracing::warn!(
                        source = %source.display(),
                        destination = %destination.display(),
                        reason = %reason,
                        "failed to restore file"
                    );
                    report.failed.push((destination.clone(), reason));
                }
            }
        }

        tracing::info!(
            restored = report.restored,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "undo finished"
        );
        report
    }

    fn restore_file(source: &Path, destination: &Path) -> Result<(), String> {
        if source.exists() {
            let backup_path = Self::generate_backup_path(source);
            fs::rename(source, &backup_path)
                .map_err(|e| format!("Could not back up conflicting file: {}", e))?;
            tracing::info!(
                path = %source.display(),
                backup = %backup_path.display(),
                "moved conflicting file aside"
            );
        }

        perform_move(destination, source).map_err(|e| format!("Failed to restore file: {}", e))
    }

    /// `file.txt` becomes `file.txt.bak.20251109-143052`.
    fn generate_backup_path(original_path: &Path) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let filename = original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let backup = PathBuf::from(format!("{}.bak.{}", filename, timestamp));

        match original_path.parent() {
            Some(parent) => crate::destination::resolve(&parent.join(backup)),
            None => backup,
        }
    }
}
