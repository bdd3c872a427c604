//! Terminal output for the `tidyd` command.
//!
//! All user-facing printing goes through [`OutputFormatter`]; diagnostics go
//! through `tracing` to stderr.

use crate::jobs::ScheduledJob;
use crate::organizer::Preview;
use crate::run::{Run, RunStatus};
use crate::service::HistoryStats;
use crate::undo::UndoReport;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;

pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidyd::output::OutputFormatter;
    /// OutputFormatter::success("Run 3 undone");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red to stderr.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message.red());
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// A spinner shown while a run executes. Finish it with
    /// `finish_and_clear` before printing results.
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Prints file counts per category with a total row.
    pub fn summary_table(stats: &BTreeMap<String, usize>, total_files: usize) {
        Self::header("SUMMARY");

        let width = stats
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max("Category".len());

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 10));
        for (category, count) in stats {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total_files.to_string().green().bold(),
            plural(total_files),
            width = width
        );
    }

    pub fn preview(preview: &Preview) {
        if preview.moves.is_empty() {
            Self::info("No files to organize.");
            return;
        }
        Self::header("PLANNED MOVES");
        for planned in &preview.moves {
            let target = planned
                .destination
                .strip_prefix(planned.source.parent().unwrap_or(planned.source.as_path()))
                .unwrap_or(&planned.destination);
            println!(
                "  {} {} {}",
                planned.file_name,
                "→".cyan(),
                target.display()
            );
        }
        Self::summary_table(&preview.stats, preview.total_files);
    }

    pub fn run_details(run: &Run) {
        Self::header(&format!("Run {}", run.id));
        println!("  Status:      {}", status_label(run.status));
        println!("  Kind:        {}", run.operation_kind);
        println!("  Directory:   {}", run.source_directory.display());
        if let Some(format) = &run.date_format {
            println!("  Date format: {}", format);
        }
        if run.dry_run {
            println!("  Dry run:     yes");
        }
        println!("  Created:     {}", run.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(completed_at) = run.completed_at {
            println!("  Finished:    {}", completed_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        println!("  Files moved: {}", run.files_moved);
        if let Some(message) = &run.error_message {
            println!("  Error:       {}", message.red());
        }
        if !run.stats.is_empty() {
            Self::summary_table(&run.stats, run.stats.values().sum());
        }
    }

    pub fn run_table(runs: &[Run]) {
        if runs.is_empty() {
            Self::info("No runs recorded.");
            return;
        }
        println!(
            "{:>5}  {:<10}  {:<8}  {:>6}  {:<20}  {}",
            "ID".bold(),
            "STATUS".bold(),
            "KIND".bold(),
            "FILES".bold(),
            "CREATED".bold(),
            "DIRECTORY".bold()
        );
        for run in runs {
            let kind = if run.dry_run {
                format!("{}*", run.operation_kind)
            } else {
                run.operation_kind.to_string()
            };
            println!(
                "{:>5}  {:<10}  {:<8}  {:>6}  {:<20}  {}",
                run.id,
                status_label(run.status),
                kind,
                run.files_moved,
                run.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                run.source_directory.display()
            );
        }
        if runs.iter().any(|run| run.dry_run) {
            println!("{}", "* dry run".dimmed());
        }
    }

    pub fn history_stats(stats: &HistoryStats) {
        Self::header("HISTORY");
        println!("  Runs:        {}", stats.total_runs);
        println!("  Completed:   {}", stats.completed_runs.to_string().green());
        println!("  Failed:      {}", stats.failed_runs.to_string().red());
        println!("  Files moved: {}", stats.total_files_moved);
        for (kind, count) in &stats.runs_by_kind {
            println!("  {:<12} {}", format!("{}:", kind), count);
        }

        if stats.top_categories.is_empty() {
            return;
        }
        Self::header("TOP CATEGORIES");
        let width = stats
            .top_categories
            .iter()
            .map(|share| share.category.len())
            .max()
            .unwrap_or(0);
        for share in &stats.top_categories {
            println!(
                "  {:<width$}  {:>6} {:>6.1}%",
                share.category,
                share.files,
                share.percentage,
                width = width
            );
        }
    }

    pub fn undo_report(report: &UndoReport) {
        println!("  Restored: {}", report.restored.to_string().green());
        if !report.skipped.is_empty() {
            println!("  Skipped:  {}", report.skipped.len().to_string().yellow());
            for (path, reason) in &report.skipped {
                println!("    - {}: {}", path.display(), reason);
            }
        }
        if !report.failed.is_empty() {
            println!("  Failed:   {}", report.failed.len().to_string().red());
            for (path, reason) in &report.failed {
                eprintln!("    - {}: {}", path.display(), reason);
            }
        }
    }

    pub fn job_details(job: &ScheduledJob) {
        Self::header(&format!("Job {}: {}", job.id, job.name));
        if let Some(description) = &job.description {
            println!("  {}", description.dimmed());
        }
        println!("  Enabled:   {}", enabled_label(job.enabled));
        println!("  Kind:      {}", job.operation_kind);
        println!("  Directory: {}", job.source_directory.display());
        if let Some(format) = &job.date_format {
            println!("  Format:    {}", format);
        }
        println!("  Trigger:   {}", job.trigger);
        println!("  Runs:      {}", job.run_count);
        println!("  Last run:  {}", optional_time(job.last_run));
        println!("  Next run:  {}", optional_time(job.next_run));
    }

    pub fn job_table(jobs: &[ScheduledJob]) {
        if jobs.is_empty() {
            Self::info("No scheduled jobs.");
            return;
        }
        println!(
            "{:>5}  {:<20}  {:<8}  {:<24}  {:>5}  {:<20}",
            "ID".bold(),
            "NAME".bold(),
            "ENABLED".bold(),
            "TRIGGER".bold(),
            "RUNS".bold(),
            "NEXT RUN".bold()
        );
        for job in jobs {
            println!(
                "{:>5}  {:<20}  {:<8}  {:<24}  {:>5}  {:<20}",
                job.id,
                job.name,
                enabled_label(job.enabled),
                job.trigger.to_string(),
                job.run_count,
                optional_time(job.next_run)
            );
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().cyan(),
        RunStatus::Completed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Undone => status.as_str().yellow(),
    }
}

fn enabled_label(enabled: bool) -> ColoredString {
    if enabled { "yes".green() } else { "no".dimmed() }
}

fn optional_time(time: Option<chrono::DateTime<chrono::Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
