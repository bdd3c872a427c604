//! tidyd - organize directories by file type or date, with recorded runs that
//! can be undone and a scheduler for unattended jobs.
//!
//! The pieces, bottom up:
//! - [`category`] and [`destination`] decide where a file goes
//! - [`organizer`] previews or performs a whole directory, [`undo`] reverses it
//! - [`run`] and [`store`] keep the history, [`service`] ties them together
//! - [`trigger`], [`scheduler`] and [`jobs`] run organizations on a schedule

pub mod category;
pub mod cli;
pub mod config;
pub mod destination;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod organizer;
pub mod output;
pub mod run;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod trigger;
pub mod undo;

pub use category::{CategoryDef, CategoryTable, OTHERS};
pub use config::{AppConfig, CompiledFilters};
pub use error::{Error, ErrorKind, Result};
pub use jobs::{JobManager, JobOutcome, JobRunner, JobUpdate, NewJob, ScheduledJob};
pub use organizer::{Execution, FileOrganizer, OperationKind, OrganizeRequest, Preview};
pub use run::{FileMoveRecord, Run, RunStatus};
pub use scheduler::{JobHandler, JobScheduler};
pub use service::{CategoryShare, HistoryStats, OrganizeService, RunFilter, UndoOutcome};
pub use trigger::{ScheduleConfig, Trigger};
pub use undo::{UndoManager, UndoReport};
