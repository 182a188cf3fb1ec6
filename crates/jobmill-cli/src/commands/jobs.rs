//! Job inspection and operator commands.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use jobmill_core::clock::Clock;
use jobmill_core::error::AppError;
use jobmill_database::JobRepository;
use jobmill_entity::job::{DEFAULT_QUEUE, Frequency, Job, JobFilter, JobId, JobState, NewJob};
use jobmill_worker::JobQueue;

/// Arguments for job commands
#[derive(Debug, Args)]
pub struct JobsArgs {
    /// Job subcommand
    #[command(subcommand)]
    pub command: JobsCommand,
}

/// Job states selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a worker
    Claimed,
    /// Permanently failed
    Failed,
    /// Any state
    All,
}

impl From<StateArg> for JobState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Pending => Self::Pending,
            StateArg::Claimed => Self::Claimed,
            StateArg::Failed => Self::Failed,
            StateArg::All => Self::All,
        }
    }
}

/// Job subcommands
#[derive(Debug, Subcommand)]
pub enum JobsCommand {
    /// List jobs
    List {
        /// Only jobs in this state
        #[arg(short, long, value_enum, default_value = "all")]
        state: StateArg,
        /// Only jobs on this queue
        #[arg(short, long)]
        queue: Option<String>,
        /// Maximum number of jobs shown
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Show a single job
    Show {
        /// Job ID
        id: i64,
    },
    /// Enqueue a job
    Enqueue {
        /// Job name
        name: String,
        /// JSON arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
        /// Target queue
        #[arg(short, long, default_value = DEFAULT_QUEUE)]
        queue: String,
        /// First eligible time (RFC 3339)
        #[arg(long, conflicts_with = "delay")]
        at: Option<DateTime<Utc>>,
        /// Delay before the job becomes eligible, in seconds
        #[arg(long)]
        delay: Option<u32>,
        /// Recurrence rule, e.g. "every 15 minutes" or "daily at 03:00"
        #[arg(long)]
        frequency: Option<String>,
    },
    /// Make a failed job claimable again
    Requeue {
        /// Job ID
        id: i64,
    },
    /// Delete a job so it is never claimed again
    Delete {
        /// Job ID
        id: i64,
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
    /// Delete failed jobs older than the retention window
    Purge {
        /// Keep failures newer than this many days
        #[arg(long, default_value_t = 7)]
        older_than_days: u32,
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
    /// Show job counts by state
    Stats,
}

/// Job display row
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    /// Job ID
    id: i64,
    /// Name
    name: String,
    /// Queue
    queue: String,
    /// State
    state: String,
    /// Perform at
    perform_at: String,
    /// Attempts
    attempts: i32,
    /// Frequency
    frequency: String,
    /// Last error
    last_error: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.0,
            name: job.name.clone(),
            queue: job.queue.clone(),
            state: state_label(job).to_string(),
            perform_at: job.perform_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            attempts: job.number_attempts,
            frequency: job.frequency.clone().unwrap_or_default(),
            last_error: truncate(&job.last_error, 40),
        }
    }
}

/// Execute job commands
pub async fn execute(
    args: &JobsArgs,
    config_path: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    let config = super::load_config(config_path)?;
    let pool = super::create_db_pool(&config).await?;
    let clock = super::system_clock();
    let queue = JobQueue::new(Arc::new(JobRepository::new(pool, clock.clone())));

    match &args.command {
        JobsCommand::List {
            state,
            queue: queue_name,
            limit,
        } => {
            let filter = JobFilter {
                state: (*state).into(),
                queue: queue_name.clone(),
                limit: (*limit).max(1),
            };
            let jobs = queue.list(&filter).await?;
            match format {
                OutputFormat::Json => output::print_json(&jobs),
                OutputFormat::Table => {
                    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
                    output::print_list(&rows, format);
                }
            }
        }
        JobsCommand::Show { id } => {
            let job = queue
                .find(JobId(*id))
                .await?
                .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
            print_job(&job, format);
        }
        JobsCommand::Enqueue {
            name,
            args: raw_args,
            queue: queue_name,
            at,
            delay,
            frequency,
        } => {
            let args: serde_json::Value = serde_json::from_str(raw_args)
                .map_err(|e| AppError::validation(format!("Invalid JSON arguments: {e}")))?;

            let mut job = NewJob::new(name.clone(), args).queue(queue_name.clone());
            if let Some(at) = at {
                job = job.perform_at(*at);
            } else if let Some(delay) = delay {
                job = job.perform_at(clock.now() + Duration::seconds(i64::from(*delay)));
            }
            if let Some(frequency) = frequency {
                job = job.frequency(frequency.parse::<Frequency>()?);
            }

            tracing::debug!(job.name = %name, queue = %queue_name, "Enqueueing job");
            let id = queue.enqueue(job).await?;
            output::print_success(&format!("Job '{}' enqueued (id: {})", name, id));
        }
        JobsCommand::Requeue { id } => {
            queue.requeue(JobId(*id)).await?;
            output::print_success(&format!("Job {} requeued", id));
        }
        JobsCommand::Delete { id, force } => {
            if !output::confirm(&format!("Delete job {id}?"), *force)? {
                println!("Cancelled.");
                return Ok(());
            }
            queue.delete(JobId(*id)).await?;
            output::print_success(&format!("Job {} deleted", id));
        }
        JobsCommand::Purge {
            older_than_days,
            force,
        } => {
            let prompt = format!("Delete failed jobs older than {older_than_days} days?");
            if !output::confirm(&prompt, *force)? {
                println!("Cancelled.");
                return Ok(());
            }
            let cutoff = clock.now() - Duration::days(i64::from(*older_than_days));
            let purged = queue.purge_failed(cutoff).await?;
            if purged == 0 {
                output::print_warning("No failed jobs matched.");
            } else {
                output::print_success(&format!("Purged {} failed jobs", purged));
            }
        }
        JobsCommand::Stats => {
            let stats = queue.stats().await?;
            match format {
                OutputFormat::Json => output::print_json(&stats),
                OutputFormat::Table => {
                    println!("Job Queue Status:");
                    output::print_kv("Pending", &stats.pending.to_string());
                    output::print_kv("Claimed", &stats.claimed.to_string());
                    output::print_kv("Failed", &stats.failed.to_string());
                    output::print_kv("Worker Concurrency", &config.worker.concurrency.to_string());
                    output::print_kv("Worker Queues", &config.worker.queues.join(", "));
                }
            }
        }
    }

    Ok(())
}

fn print_job(job: &Job, format: OutputFormat) {
    match format {
        OutputFormat::Json => output::print_json(job),
        OutputFormat::Table => {
            println!("Job {}:", job.id);
            output::print_kv("Name", &job.name);
            output::print_kv("Queue", &job.queue);
            output::print_kv("State", state_label(job));
            output::print_kv("Perform At", &job.perform_at.to_rfc3339());
            output::print_kv(
                "Locked At",
                &job.locked_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            );
            output::print_kv("Attempts", &job.number_attempts.to_string());
            output::print_kv("Frequency", job.frequency.as_deref().unwrap_or(""));
            output::print_kv(
                "Failed At",
                &job.failed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            );
            output::print_kv("Last Error", &job.last_error);
            output::print_kv("Args", &job.args.to_string());
            output::print_kv("Created At", &job.created_at.to_rfc3339());
        }
    }
}

fn state_label(job: &Job) -> &'static str {
    [JobState::Failed, JobState::Claimed, JobState::Pending]
        .into_iter()
        .find(|state| state.matches(job.locked_at, job.failed_at))
        .unwrap_or(JobState::All)
        .as_str()
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let head: String = value.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
