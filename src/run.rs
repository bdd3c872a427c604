//! Organization run history records.
//!
//! A [`Run`] is written when an organization starts and moves through a small
//! state machine: `pending -> completed | failed`, `completed -> undone`.
//! `failed` runs that kept a partial move log may also be undone.

use crate::error::{Error, Result};
use crate::organizer::{Execution, OperationKind, OrganizeRequest, Preview};
use crate::store::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One executed move, `(source, destination)`.
pub type FileMoveRecord = (PathBuf, PathBuf);

/// Lifecycle state of a [`Run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Completed,
    Failed,
    Undone,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Undone => "undone",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "undone" => Ok(RunStatus::Undone),
            other => Err(Error::validation(format!("unknown run status '{}'", other))),
        }
    }
}

/// Persisted outcome of one organization (or dry run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: u64,
    pub operation_kind: OperationKind,
    pub source_directory: PathBuf,
    pub date_format: Option<String>,
    pub dry_run: bool,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_moved: usize,
    pub categories_created: usize,
    pub stats: BTreeMap<String, usize>,
    pub move_log: Vec<FileMoveRecord>,
    pub error_message: Option<String>,
}

impl Run {
    /// A new pending run for `request`. The id is assigned by the store.
    pub fn pending(request: &OrganizeRequest, dry_run: bool) -> Self {
        Self {
            id: 0,
            operation_kind: request.operation_kind,
            source_directory: request.source_directory.clone(),
            date_format: match request.operation_kind {
                OperationKind::ByDate => Some(request.date_format.clone()),
                OperationKind::ByType => None,
            },
            dry_run,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            files_moved: 0,
            categories_created: 0,
            stats: BTreeMap::new(),
            move_log: Vec::new(),
            error_message: None,
        }
    }

    fn expect_status(&self, expected: RunStatus, action: &str) -> Result<()> {
        if self.status != expected {
            return Err(Error::conflict(format!(
                "cannot {} run {}: status is {}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }

    /// `pending -> completed` after a successful execute.
    pub fn complete(&mut self, execution: Execution) -> Result<()> {
        self.expect_status(RunStatus::Pending, "complete")?;
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.files_moved = execution.move_log.len();
        self.categories_created = execution.stats.len();
        self.stats = execution.stats;
        self.move_log = execution.move_log;
        Ok(())
    }

    /// `pending -> completed` for a dry run; nothing was moved.
    pub fn complete_dry_run(&mut self, preview: Preview) -> Result<()> {
        self.expect_status(RunStatus::Pending, "complete")?;
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.files_moved = 0;
        self.categories_created = preview.categories_to_create.len();
        self.stats = preview.stats;
        Ok(())
    }

    /// `pending -> failed`, keeping whatever was moved before the abort.
    pub fn fail(&mut self, error: &Error, partial: Option<Execution>) -> Result<()> {
        self.expect_status(RunStatus::Pending, "fail")?;
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.to_string());
        if let Some(execution) = partial {
            self.files_moved = execution.move_log.len();
            self.categories_created = execution.stats.len();
            self.stats = execution.stats;
            self.move_log = execution.move_log;
        }
        Ok(())
    }

    /// Checks that a regular undo is allowed: completed with a non-empty log.
    pub fn ensure_undoable(&self) -> Result<()> {
        self.expect_status(RunStatus::Completed, "undo")?;
        if self.move_log.is_empty() {
            return Err(Error::conflict(format!(
                "run {} has no move log to undo",
                self.id
            )));
        }
        Ok(())
    }

    /// Checks that a partial undo is allowed: failed with a non-empty log.
    pub fn ensure_partially_undoable(&self) -> Result<()> {
        self.expect_status(RunStatus::Failed, "partially undo")?;
        if self.move_log.is_empty() {
            return Err(Error::conflict(format!(
                "run {} moved nothing before failing",
                self.id
            )));
        }
        Ok(())
    }

    /// `completed | failed -> undone`.
    pub fn mark_undone(&mut self) -> Result<()> {
        match self.status {
            RunStatus::Completed | RunStatus::Failed => {
                self.status = RunStatus::Undone;
                Ok(())
            }
            _ => Err(Error::conflict(format!(
                "cannot undo run {}: status is {}",
                self.id, self.status
            ))),
        }
    }
}

impl Record for Run {
    const ENTITY: &'static str = "run";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OrganizeRequest {
        OrganizeRequest::by_type("/data/inbox")
    }

    fn execution(moves: usize) -> Execution {
        let mut stats = BTreeMap::new();
        stats.insert("Images".to_string(), moves);
        Execution {
            stats,
            move_log: (0..moves)
                .map(|i| {
                    (
                        PathBuf::from(format!("/data/inbox/{}.jpg", i)),
                        PathBuf::from(format!("/data/inbox/Images/{}.jpg", i)),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_complete_fills_counts_from_log() {
        let mut run = Run::pending(&request(), false);
        run.complete(execution(3)).expect("pending run completes");

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.files_moved, 3);
        assert_eq!(run.files_moved, run.move_log.len());
        assert_eq!(run.categories_created, 1);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_by_type_run_has_no_date_format() {
        let run = Run::pending(&request(), false);
        assert_eq!(run.date_format, None);

        let run = Run::pending(&OrganizeRequest::by_date("/data/inbox", "%Y"), false);
        assert_eq!(run.date_format.as_deref(), Some("%Y"));
    }

    #[test]
    fn test_completed_run_cannot_fail() {
        let mut run = Run::pending(&request(), false);
        run.complete(execution(1)).expect("pending run completes");

        let err = run
            .fail(&Error::validation("late"), None)
            .expect_err("completed is not pending");
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_failed_run_keeps_partial_log() {
        let mut run = Run::pending(&request(), false);
        let cause = Error::conflict("disk full");
        run.fail(&cause, Some(execution(2))).expect("pending run fails");

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.move_log.len(), 2);
        assert_eq!(run.files_moved, 2);
        assert!(run.error_message.as_deref().unwrap_or("").contains("disk full"));
        assert!(run.ensure_undoable().is_err());
        assert!(run.ensure_partially_undoable().is_ok());
    }

    #[test]
    fn test_undo_requires_completed_with_log() {
        let pending = Run::pending(&request(), false);
        assert!(matches!(
            pending.ensure_undoable(),
            Err(Error::Conflict(_))
        ));

        let mut empty = Run::pending(&request(), false);
        empty.complete(execution(0)).expect("pending run completes");
        assert!(matches!(empty.ensure_undoable(), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_undone_is_terminal() {
        let mut run = Run::pending(&request(), false);
        run.complete(execution(1)).expect("pending run completes");
        run.mark_undone().expect("completed run can be undone");

        assert_eq!(run.status, RunStatus::Undone);
        assert!(run.mark_undone().is_err());
        assert!(run.ensure_undoable().is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RunStatus::Pending,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Undone,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().ok(), Some(status));
        }
        assert!("running".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_move_log_serializes_as_pairs() {
        let mut run = Run::pending(&request(), false);
        run.complete(execution(1)).expect("pending run completes");

        let value = serde_json::to_value(&run).expect("run serializes");
        assert_eq!(
            value["move_log"],
            serde_json::json!([["/data/inbox/0.jpg", "/data/inbox/Images/0.jpg"]])
        );
        assert_eq!(value["operation_kind"], "by_type");
        assert_eq!(value["stats"]["Images"], 1);
    }
}
