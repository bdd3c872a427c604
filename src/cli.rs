//! Command-line interface for tidyd.
//!
//! Parsing is done with clap's derive API; [`run_cli`] wires the stores, the
//! organizer and the scheduler together and dispatches one command.

use crate::config::AppConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::{JobManager, JobOutcome, JobRunner, JobUpdate, NewJob, ScheduledJob};
use crate::organizer::{FileOrganizer, OperationKind, OrganizeRequest, DEFAULT_DATE_FORMAT};
use crate::output::OutputFormatter;
use crate::run::RunStatus;
use crate::scheduler::JobScheduler;
use crate::service::{OrganizeService, RunFilter};
use crate::store::RecordStore;
use crate::trigger::ScheduleConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

pub const RUNS_FILE: &str = "runs.json";
pub const JOBS_FILE: &str = "jobs.json";

#[derive(Debug, Parser)]
#[command(name = "tidyd", version)]
#[command(about = "Organize directories by file type or date, undo runs, schedule jobs")]
pub struct Cli {
    /// Configuration file to use instead of the default search
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding run history and jobs
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show what organizing a directory would do
    Preview(OrganizeArgs),
    /// Organize a directory and record the run
    Organize {
        #[command(flatten)]
        args: OrganizeArgs,
        /// Record a run without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Move the files of a run back where they came from
    Undo {
        run_id: u64,
        /// Undo the moves of a failed run
        #[arg(long)]
        partial: bool,
    },
    /// List, show, delete or summarize recorded runs
    History {
        #[command(subcommand)]
        action: Option<HistoryCommand>,
        #[arg(long)]
        status: Option<RunStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },
    /// Run the scheduler until interrupted
    Daemon,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    Show { run_id: u64 },
    Delete { run_id: u64 },
    /// Totals over all recorded runs
    Stats,
}

#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// Create a scheduled job
    Add {
        name: String,
        directory: PathBuf,
        #[command(flatten)]
        schedule: ScheduleArgs,
        /// Organize into date folders instead of categories
        #[arg(long)]
        by_date: bool,
        #[arg(long)]
        date_format: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Create the job without registering it
        #[arg(long)]
        disabled: bool,
    },
    List,
    Show {
        job_id: u64,
    },
    /// Change some fields of a job
    Update {
        job_id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        directory: Option<PathBuf>,
        #[arg(long)]
        kind: Option<OperationKind>,
        #[arg(long)]
        date_format: Option<String>,
        #[command(flatten)]
        schedule: ScheduleArgs,
    },
    Remove {
        job_id: u64,
    },
    Enable {
        job_id: u64,
    },
    Disable {
        job_id: u64,
    },
    /// Run a job once, now
    Run {
        job_id: u64,
    },
}

#[derive(Debug, Args)]
pub struct OrganizeArgs {
    pub directory: PathBuf,
    /// Organize into folders named after each file's modification date
    #[arg(long)]
    pub by_date: bool,
    /// strftime pattern for date folders
    #[arg(long, requires = "by_date")]
    pub date_format: Option<String>,
    /// Leave files of unknown type where they are
    #[arg(long, conflicts_with = "by_date")]
    pub no_others: bool,
}

impl OrganizeArgs {
    pub fn request(&self) -> OrganizeRequest {
        if self.by_date {
            let format = self
                .date_format
                .clone()
                .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
            OrganizeRequest::by_date(&self.directory, format)
        } else {
            OrganizeRequest::by_type(&self.directory).with_create_others(!self.no_others)
        }
    }
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Five-field cron expression, evaluated in UTC
    #[arg(long)]
    pub cron: Option<String>,
    #[arg(long)]
    pub every_seconds: Option<u64>,
    #[arg(long)]
    pub every_minutes: Option<u64>,
    #[arg(long)]
    pub every_hours: Option<u64>,
    #[arg(long)]
    pub every_days: Option<u64>,
}

impl ScheduleArgs {
    /// `None` when no schedule flag was given.
    pub fn to_config(&self) -> Option<ScheduleConfig> {
        let config = ScheduleConfig {
            cron_expression: self.cron.clone(),
            interval_seconds: self.every_seconds,
            interval_minutes: self.every_minutes,
            interval_hours: self.every_hours,
            interval_days: self.every_days,
        };
        (config != ScheduleConfig::default()).then_some(config)
    }
}

/// Process exit code for a failed command.
pub fn exit_code(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::PermissionDenied => 4,
        ErrorKind::Conflict => 5,
        ErrorKind::Io | ErrorKind::Internal => 1,
    }
}

/// Everything a command may need, built from the configuration.
struct Context {
    config: AppConfig,
    service: Arc<OrganizeService>,
    scheduler: Arc<JobScheduler>,
    manager: JobManager,
    runner: Arc<JobRunner>,
}

impl Context {
    fn open(config: AppConfig, data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| config.data_dir());
        tracing::debug!(data_dir = %data_dir.display(), "opening stores");

        let runs = Arc::new(RecordStore::open(data_dir.join(RUNS_FILE))?);
        let jobs = Arc::new(RecordStore::<ScheduledJob>::open(data_dir.join(JOBS_FILE))?);
        let organizer = FileOrganizer::new(config.category_table()?, config.compile_filters()?);
        let service = Arc::new(OrganizeService::new(organizer, runs));
        let scheduler = Arc::new(JobScheduler::new());

        Ok(Self {
            manager: JobManager::new(Arc::clone(&jobs), Arc::clone(&scheduler)),
            runner: Arc::new(JobRunner::new(
                jobs,
                Arc::clone(&service),
                Arc::clone(&scheduler),
            )),
            config,
            service,
            scheduler,
        })
    }
}

/// Runs one parsed command against the given configuration.
///
/// ```no_run
/// use clap::Parser;
/// use tidyd::cli::{run_cli, Cli};
/// use tidyd::config::AppConfig;
///
/// # async fn demo() -> tidyd::Result<()> {
/// let cli = Cli::parse_from(["tidyd", "preview", "/home/user/Downloads"]);
/// run_cli(cli, AppConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_cli(cli: Cli, config: AppConfig) -> Result<()> {
    let context = Context::open(config, cli.data_dir)?;

    match cli.command {
        Commands::Preview(args) => preview(&context, &args),
        Commands::Organize { args, dry_run } => organize(&context, &args, dry_run),
        Commands::Undo { run_id, partial } => undo(&context, run_id, partial),
        Commands::History {
            action,
            status,
            limit,
            offset,
        } => history(&context, action, status, limit, offset),
        Commands::Jobs { action } => jobs(&context, action),
        Commands::Daemon => daemon(&context).await,
    }
}

fn preview(context: &Context, args: &OrganizeArgs) -> Result<()> {
    let request = args.request();
    OutputFormatter::info(&format!(
        "Previewing {} ({})",
        request.source_directory.display(),
        request.operation_kind
    ));
    let preview = context.service.preview(&request)?;
    OutputFormatter::preview(&preview);
    Ok(())
}

fn organize(context: &Context, args: &OrganizeArgs, dry_run: bool) -> Result<()> {
    let request = args.request();
    let spinner = OutputFormatter::spinner(&format!(
        "Organizing {}",
        request.source_directory.display()
    ));
    let result = context.service.execute(&request, dry_run);
    spinner.finish_and_clear();

    let run = match result {
        Ok(run) => run,
        Err(error) => {
            if let Error::RunFailed { run_id, .. } = &error
                && let Ok(run) = context.service.get_run(*run_id)
                && !run.move_log.is_empty()
            {
                OutputFormatter::warning(&format!(
                    "{} files were moved before the failure. Use 'tidyd undo {} --partial' to move them back.",
                    run.files_moved, run_id
                ));
            }
            return Err(error);
        }
    };

    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Recorded run {}; no files were moved.", run.id));
        OutputFormatter::summary_table(&run.stats, run.stats.values().sum());
    } else {
        OutputFormatter::summary_table(&run.stats, run.files_moved);
        OutputFormatter::success(&format!(
            "Run {} complete. Use 'tidyd undo {}' to revert.",
            run.id, run.id
        ));
    }
    Ok(())
}

fn undo(context: &Context, run_id: u64, partial: bool) -> Result<()> {
    let outcome = if partial {
        context.service.undo_partial(run_id)?
    } else {
        context.service.undo(run_id)?
    };
    OutputFormatter::header(&format!("Undo of run {}", run_id));
    OutputFormatter::undo_report(&outcome.report);
    if outcome.report.is_complete_success() {
        OutputFormatter::success("All files restored.");
    } else {
        OutputFormatter::warning("Some files could not be restored; see above.");
    }
    Ok(())
}

fn history(
    context: &Context,
    action: Option<HistoryCommand>,
    status: Option<RunStatus>,
    limit: usize,
    offset: usize,
) -> Result<()> {
    match action {
        None => {
            let runs = context.service.list_runs(&RunFilter {
                status,
                limit: Some(limit),
                offset,
            });
            OutputFormatter::run_table(&runs);
        }
        Some(HistoryCommand::Show { run_id }) => {
            OutputFormatter::run_details(&context.service.get_run(run_id)?);
        }
        Some(HistoryCommand::Delete { run_id }) => {
            context.service.delete_run(run_id)?;
            OutputFormatter::success(&format!("Deleted run {}", run_id));
        }
        Some(HistoryCommand::Stats) => OutputFormatter::history_stats(&context.service.stats()),
    }
    Ok(())
}

fn jobs(context: &Context, action: JobsCommand) -> Result<()> {
    let manager = &context.manager;
    match action {
        JobsCommand::Add {
            name,
            directory,
            schedule,
            by_date,
            date_format,
            description,
            disabled,
        } => {
            let job = manager.create(NewJob {
                name,
                description,
                operation_kind: if by_date {
                    OperationKind::ByDate
                } else {
                    OperationKind::ByType
                },
                source_directory: directory,
                date_format,
                schedule: schedule.to_config().unwrap_or_default(),
                enabled: !disabled,
            })?;
            OutputFormatter::success(&format!("Created job {}", job.id));
            OutputFormatter::job_details(&job);
        }
        JobsCommand::List => OutputFormatter::job_table(&manager.list()),
        JobsCommand::Show { job_id } => OutputFormatter::job_details(&manager.get(job_id)?),
        JobsCommand::Update {
            job_id,
            name,
            description,
            directory,
            kind,
            date_format,
            schedule,
        } => {
            let job = manager.update(
                job_id,
                JobUpdate {
                    name,
                    description,
                    operation_kind: kind,
                    source_directory: directory,
                    date_format,
                    schedule: schedule.to_config(),
                    enabled: None,
                },
            )?;
            OutputFormatter::success(&format!("Updated job {}", job.id));
            OutputFormatter::job_details(&job);
        }
        JobsCommand::Remove { job_id } => {
            manager.delete(job_id)?;
            OutputFormatter::success(&format!("Removed job {}", job_id));
        }
        JobsCommand::Enable { job_id } => {
            manager.enable(job_id)?;
            OutputFormatter::success(&format!("Enabled job {}", job_id));
        }
        JobsCommand::Disable { job_id } => {
            manager.disable(job_id)?;
            OutputFormatter::success(&format!("Disabled job {}", job_id));
        }
        JobsCommand::Run { job_id } => {
            let job = manager.get(job_id)?;
            if !job.enabled {
                return Err(Error::conflict(format!("job {} is disabled", job_id)));
            }
            match context.runner.run_job(job_id) {
                JobOutcome::Completed(run) => OutputFormatter::success(&format!(
                    "Job {} moved {} files (run {})",
                    job_id, run.files_moved, run.id
                )),
                JobOutcome::Failed { error, .. } => return Err(error),
                JobOutcome::Skipped => {
                    OutputFormatter::warning(&format!("Job {} was not run", job_id))
                }
            }
        }
    }
    Ok(())
}

async fn daemon(context: &Context) -> Result<()> {
    if !context.config.scheduler.enabled {
        return Err(Error::Config(
            "the scheduler is disabled ([scheduler] enabled = false)".to_string(),
        ));
    }

    let registered = context.manager.sync_registrations();
    context.scheduler.start(context.runner.clone())?;
    OutputFormatter::success(&format!(
        "Scheduler running with {} jobs. Press Ctrl-C to stop.",
        registered
    ));

    let mut resync = tokio::time::interval(context.config.scheduler.sync_interval());
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    resync.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(error) = result {
                    tracing::error!(error = %error, "could not listen for Ctrl-C");
                }
                break;
            }
            _ = resync.tick() => {
                let registered = context.manager.sync_registrations();
                tracing::debug!(registered, "job registrations synced");
            }
        }
    }

    context.scheduler.stop();
    OutputFormatter::info("Scheduler stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_organize_args_build_request() {
        let cli = Cli::parse_from(["tidyd", "organize", "/data", "--no-others", "--dry-run"]);
        let Commands::Organize { args, dry_run } = cli.command else {
            panic!("expected organize");
        };
        assert!(dry_run);
        let request = args.request();
        assert_eq!(request.operation_kind, OperationKind::ByType);
        assert!(!request.create_others);

        let cli = Cli::parse_from(["tidyd", "preview", "/data", "--by-date", "--date-format", "%Y"]);
        let Commands::Preview(args) = cli.command else {
            panic!("expected preview");
        };
        let request = args.request();
        assert_eq!(request.operation_kind, OperationKind::ByDate);
        assert_eq!(request.date_format, "%Y");
    }

    #[test]
    fn test_schedule_args() {
        let cli = Cli::parse_from(["tidyd", "jobs", "add", "dl", "/data", "--every-hours", "2"]);
        let Commands::Jobs {
            action: JobsCommand::Add { schedule, .. },
        } = cli.command
        else {
            panic!("expected jobs add");
        };
        let config = schedule.to_config().expect("schedule given");
        assert_eq!(config.interval_hours, Some(2));
        assert_eq!(config.cron_expression, None);

        let empty = ScheduleArgs {
            cron: None,
            every_seconds: None,
            every_minutes: None,
            every_hours: None,
            every_days: None,
        };
        assert!(empty.to_config().is_none());
    }

    #[test]
    fn test_history_status_parses() {
        let cli = Cli::parse_from(["tidyd", "history", "--status", "failed", "--limit", "5"]);
        let Commands::History { status, limit, .. } = cli.command else {
            panic!("expected history");
        };
        assert_eq!(status, Some(RunStatus::Failed));
        assert_eq!(limit, 5);
        assert!(Cli::try_parse_from(["tidyd", "history", "--status", "running"]).is_err());
    }

    #[test]
    fn test_history_stats_parses() {
        let cli = Cli::parse_from(["tidyd", "history", "stats"]);
        assert!(matches!(
            cli.command,
            Commands::History {
                action: Some(HistoryCommand::Stats),
                ..
            }
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Error::validation("x")), 2);
        assert_eq!(exit_code(&Error::NotFound { entity: "run", id: 1 }), 3);
        assert_eq!(
            exit_code(&Error::PermissionDenied {
                path: PathBuf::from("/root")
            }),
            4
        );
        assert_eq!(exit_code(&Error::conflict("x")), 5);
        assert_eq!(exit_code(&Error::Store("x".to_string())), 1);
    }
}
