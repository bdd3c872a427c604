//! Run bookkeeping around the organizer.
//!
//! Manual requests and scheduled jobs both go through [`OrganizeService`], so
//! every organization leaves exactly one [`Run`] in the history store.

use crate::error::{Error, Result};
use crate::organizer::{Aborted, FileOrganizer, OrganizeRequest, Preview};
use crate::run::{Run, RunStatus};
use crate::store::RecordStore;
use crate::undo::{UndoManager, UndoReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A run after undo, with what the undo actually managed to restore.
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub run: Run,
    pub report: UndoReport,
}

/// Selection for [`OrganizeService::list_runs`].
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// How many categories [`OrganizeService::stats`] ranks.
pub const TOP_CATEGORIES: usize = 10;

/// Totals over the whole run history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_runs: usize,
    pub total_files_moved: usize,
    pub completed_runs: usize,
    pub failed_runs: usize,
    pub runs_by_kind: BTreeMap<String, usize>,
    pub top_categories: Vec<CategoryShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub files: usize,
    /// Share of all files moved by completed runs, 0 to 100.
    pub percentage: f64,
}

pub struct OrganizeService {
    organizer: FileOrganizer,
    runs: Arc<RecordStore<Run>>,
}

impl OrganizeService {
    pub fn new(organizer: FileOrganizer, runs: Arc<RecordStore<Run>>) -> Self {
        Self { organizer, runs }
    }

    pub fn organizer(&self) -> &FileOrganizer {
        &self.organizer
    }

    pub fn preview(&self, request: &OrganizeRequest) -> Result<Preview> {
        self.organizer.preview(request)
    }

    /// Organizes (or, with `dry_run`, only plans) and records the run.
    ///
    /// A request that fails validation records nothing. Any later failure is
    /// recorded as a failed run, keeping the moves made before it, and comes
    /// back as [`Error::RunFailed`].
    pub fn execute(&self, request: &OrganizeRequest, dry_run: bool) -> Result<Run> {
        request.validate()?;
        let mut run = self.runs.insert(Run::pending(request, dry_run))?;
        tracing::info!(
            run_id = run.id,
            source = %request.source_directory.display(),
            kind = %request.operation_kind,
            dry_run,
            "run started"
        );

        let failure = if dry_run {
            match self.organizer.preview(request) {
                Ok(preview) => {
                    run.complete_dry_run(preview)?;
                    None
                }
                Err(error) => Some((error, None)),
            }
        } else {
            match self.organizer.execute(request) {
                Ok(execution) => {
                    run.complete(execution)?;
                    None
                }
                Err(Aborted { error, partial }) => Some((error, Some(partial))),
            }
        };

        match failure {
            None => {
                self.runs.update(&run)?;
                tracing::info!(
                    run_id = run.id,
                    files_moved = run.files_moved,
                    categories = run.categories_created,
                    "run completed"
                );
                Ok(run)
            }
            Some((error, partial)) => {
                run.fail(&error, partial)?;
                self.runs.update(&run)?;
                tracing::warn!(
                    run_id = run.id,
                    files_moved = run.files_moved,
                    error = %error,
                    "run failed"
                );
                Err(Error::RunFailed {
                    run_id: run.id,
                    source: Box::new(error),
                })
            }
        }
    }

    /// Moves every file of a completed run back and marks it undone.
    pub fn undo(&self, run_id: u64) -> Result<UndoOutcome> {
        let run = self.runs.fetch(run_id)?;
        run.ensure_undoable()?;
        self.revert(run)
    }

    /// Reverses the moves a failed run made before it stopped.
    pub fn undo_partial(&self, run_id: u64) -> Result<UndoOutcome> {
        let run = self.runs.fetch(run_id)?;
        run.ensure_partially_undoable()?;
        self.revert(run)
    }

    fn revert(&self, run: Run) -> Result<UndoOutcome> {
        let report = UndoManager::undo(&run.move_log);
        let run = self.runs.modify(run.id, |r| r.mark_undone())?;
        tracing::info!(
            run_id = run.id,
            restored = report.restored,
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "run undone"
        );
        Ok(UndoOutcome { run, report })
    }

    pub fn get_run(&self, run_id: u64) -> Result<Run> {
        self.runs.fetch(run_id)
    }

    /// Runs matching `filter`, newest first.
    pub fn list_runs(&self, filter: &RunFilter) -> Vec<Run> {
        let mut runs = self.runs.list();
        runs.reverse();
        runs.into_iter()
            .filter(|run| filter.status.is_none_or(|status| run.status == status))
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// Aggregates the run history. Category counts come from completed runs
    /// that actually moved files; dry runs and undone runs are left out.
    pub fn stats(&self) -> HistoryStats {
        let runs = self.runs.list();
        let mut runs_by_kind = BTreeMap::new();
        let mut category_totals: BTreeMap<String, usize> = BTreeMap::new();

        for run in &runs {
            *runs_by_kind.entry(run.operation_kind.to_string()).or_insert(0) += 1;
            if run.status == RunStatus::Completed && !run.dry_run {
                for (category, count) in &run.stats {
                    *category_totals.entry(category.clone()).or_insert(0) += count;
                }
            }
        }

        let categorized: usize = category_totals.values().sum();
        let mut ranked: Vec<(String, usize)> = category_totals.into_iter().collect();
        // Stable sort keeps name order among equal counts.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let top_categories = ranked
            .into_iter()
            .take(TOP_CATEGORIES)
            .map(|(category, files)| CategoryShare {
                category,
                files,
                percentage: files as f64 * 100.0 / categorized as f64,
            })
            .collect();

        HistoryStats {
            total_runs: runs.len(),
            total_files_moved: runs.iter().map(|run| run.files_moved).sum(),
            completed_runs: runs.iter().filter(|r| r.status == RunStatus::Completed).count(),
            failed_runs: runs.iter().filter(|r| r.status == RunStatus::Failed).count(),
            runs_by_kind,
            top_categories,
        }
    }

    pub fn delete_run(&self, run_id: u64) -> Result<()> {
        if !self.runs.delete(run_id)? {
            return Err(Error::NotFound {
                entity: "run",
                id: run_id,
            });
        }
        tracing::info!(run_id, "run deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn service() -> OrganizeService {
        OrganizeService::new(FileOrganizer::default(), Arc::new(RecordStore::in_memory()))
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), name).expect("Failed to write file");
    }

    #[test]
    fn test_stats_aggregate_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        touch(base, "a.jpg");
        touch(base, "b.jpg");
        touch(base, "c.txt");
        let service = service();

        service
            .execute(&OrganizeRequest::by_type(base), true)
            .expect("dry run");
        service
            .execute(&OrganizeRequest::by_type(base), false)
            .expect("execute");
        touch(base, "d.zip");
        service
            .execute(&OrganizeRequest::by_date(base, "%Y"), false)
            .expect("by date");
        let _ = service.execute(&OrganizeRequest::by_type(base.join("missing")), false);

        let stats = service.stats();
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.total_files_moved, 4);
        assert_eq!(stats.completed_runs, 3);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.runs_by_kind.get("by_type"), Some(&3));
        assert_eq!(stats.runs_by_kind.get("by_date"), Some(&1));

        let names: Vec<&str> = stats
            .top_categories
            .iter()
            .map(|share| share.category.as_str())
            .collect();
        // The by-date run adds a year folder with one file, tied with Documents.
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "Images");
        assert!(names.contains(&"Documents"));
        assert_eq!(stats.top_categories[0].files, 2);
        assert!((stats.top_categories[0].percentage - 50.0).abs() < 1e-9);
        let total: f64 = stats.top_categories.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_stats_of_empty_history() {
        let stats = service().stats();
        assert_eq!(stats.total_runs, 0);
        assert!(stats.runs_by_kind.is_empty());
        assert!(stats.top_categories.is_empty());
    }

    #[test]
    fn test_execute_records_completed_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        touch(temp_dir.path(), "a.jpg");
        touch(temp_dir.path(), "b.txt");
        let service = service();

        let run = service
            .execute(&OrganizeRequest::by_type(temp_dir.path()), false)
            .expect("execute");

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.files_moved, 2);
        assert_eq!(service.get_run(run.id).expect("stored"), run);
    }

    #[test]
    fn test_dry_run_moves_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        touch(temp_dir.path(), "a.jpg");
        let service = service();

        let run = service
            .execute(&OrganizeRequest::by_type(temp_dir.path()), true)
            .expect("dry run");

        assert!(run.dry_run);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.files_moved, 0);
        assert!(run.move_log.is_empty());
        assert_eq!(run.stats.get("Images"), Some(&1));
        assert_eq!(run.categories_created, 1);
        assert!(temp_dir.path().join("a.jpg").exists());
        assert!(matches!(service.undo(run.id), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_invalid_request_records_nothing() {
        let service = service();
        let request = OrganizeRequest::by_date("/tmp", "");

        let err = service.execute(&request, false).expect_err("empty format");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(service.list_runs(&RunFilter::default()).is_empty());
    }

    #[test]
    fn test_missing_directory_records_failed_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let service = service();
        let request = OrganizeRequest::by_type(temp_dir.path().join("missing"));

        let err = service.execute(&request, false).expect_err("missing dir");
        let Error::RunFailed { run_id, .. } = &err else {
            panic!("expected RunFailed, got {:?}", err);
        };
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let run = service.get_run(*run_id).expect("failed run stored");
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.is_some());
        assert!(run.move_log.is_empty());
        assert!(matches!(
            service.undo_partial(run.id),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_undo_marks_run_undone() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        touch(temp_dir.path(), "a.jpg");
        let service = service();
        let run = service
            .execute(&OrganizeRequest::by_type(temp_dir.path()), false)
            .expect("execute");

        let outcome = service.undo(run.id).expect("undo");
        assert_eq!(outcome.run.status, RunStatus::Undone);
        assert_eq!(outcome.report.restored, 1);
        assert!(temp_dir.path().join("a.jpg").exists());

        assert!(matches!(service.undo(run.id), Err(Error::Conflict(_))));
        assert!(matches!(
            service.undo(999),
            Err(Error::NotFound { entity: "run", id: 999 })
        ));
    }

    #[test]
    fn test_list_runs_newest_first_with_filter() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let service = service();
        let request = OrganizeRequest::by_type(temp_dir.path());
        let first = service.execute(&request, true).expect("dry run");
        service
            .execute(&OrganizeRequest::by_type(temp_dir.path().join("gone")), false)
            .expect_err("missing dir");
        let third = service.execute(&request, true).expect("dry run");

        let all = service.list_runs(&RunFilter::default());
        let ids: Vec<u64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![third.id, 2, first.id]);

        let failed = service.list_runs(&RunFilter {
            status: Some(RunStatus::Failed),
            ..RunFilter::default()
        });
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 2);

        let page = service.list_runs(&RunFilter {
            limit: Some(1),
            offset: 1,
            ..RunFilter::default()
        });
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 2);
    }

    #[test]
    fn test_delete_run() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let service = service();
        let run = service
            .execute(&OrganizeRequest::by_type(temp_dir.path()), true)
            .expect("dry run");

        service.delete_run(run.id).expect("delete");
        assert!(service.get_run(run.id).is_err());
        assert!(matches!(
            service.delete_run(run.id),
            Err(Error::NotFound { .. })
        ));
    }
}
