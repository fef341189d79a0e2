//! Admin subcommand handlers.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::info;

use jobhive::{JobArgs, JobId, JobStorage};

use crate::cli::{Commands, Format};

/// Handle a store-backed subcommand.
pub(crate) async fn handle(command: Commands, storage: &JobStorage, format: Format) -> Result<()> {
    match command {
        Commands::CheckConfig => Ok(()),
        Commands::Stats => stats(storage, format).await,
        Commands::Queues => queues(storage, format).await,
        Commands::Servers => servers(storage, format).await,
        Commands::Processing => processing(storage, format).await,
        Commands::Scheduled => scheduled(storage, format).await,
        Commands::Failed => failed(storage, format).await,
        Commands::Succeeded => succeeded(storage, format).await,
        Commands::Timeline { hourly } => timeline(storage, hourly, format).await,
        Commands::Job { id } => job(storage, &JobId::from(id), format).await,
        Commands::Retry { id } => {
            let id = JobId::from(id);
            if !storage.retry(&id).await? {
                bail!("job {id} is not failed or has no known queue");
            }
            info!(job_id = %id, "Job requeued");
            Ok(())
        }
        Commands::Discard { id } => {
            let id = JobId::from(id);
            if !storage.discard(&id).await? {
                bail!("job {id} is not failed");
            }
            info!(job_id = %id, "Job discarded");
            Ok(())
        }
        Commands::Promote { id } => {
            let id = JobId::from(id);
            if !storage.promote_by_id(&id).await? {
                bail!("job {id} is not scheduled");
            }
            info!(job_id = %id, "Job enqueued");
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn describe(job_type: Option<&str>, args: &JobArgs) -> String {
    let args: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}({})", job_type.unwrap_or("?"), args.join(", "))
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

async fn stats(storage: &JobStorage, format: Format) -> Result<()> {
    let stats = storage.statistics().await?;
    if format == Format::Json {
        return print_json(&stats);
    }
    println!("Servers:    {}", stats.servers);
    println!("Queues:     {}", stats.queues);
    println!("Scheduled:  {}", stats.scheduled);
    println!("Enqueued:   {}", stats.enqueued);
    println!("Processing: {}", stats.processing);
    println!("Succeeded:  {}", stats.succeeded);
    println!("Failed:     {}", stats.failed);
    Ok(())
}

async fn queues(storage: &JobStorage, format: Format) -> Result<()> {
    let queues = storage.queues().await?;
    if format == Format::Json {
        return print_json(&queues);
    }
    if queues.is_empty() {
        println!("No queues.");
        return Ok(());
    }
    for queue in &queues {
        println!(
            "{} ({} waiting, servers: {})",
            queue.name,
            queue.length,
            if queue.servers.is_empty() {
                "-".to_string()
            } else {
                queue.servers.join(", ")
            }
        );
        for (id, job) in &queue.first_jobs {
            match job {
                Some(job) => println!(
                    "  {:<38} {} enqueued {}",
                    id,
                    describe(job.job_type.as_deref(), &job.args),
                    or_dash(job.enqueued_at)
                ),
                None => println!("  {:<38} <unavailable>", id),
            }
        }
    }
    Ok(())
}

async fn servers(storage: &JobStorage, format: Format) -> Result<()> {
    let servers = storage.servers().await?;
    if format == Format::Json {
        return print_json(&servers);
    }
    if servers.is_empty() {
        println!("No servers.");
        return Ok(());
    }
    println!("{:<40} {:<16} {:>6}  STARTED", "NAME", "QUEUE", "WORKERS");
    for server in &servers {
        println!(
            "{:<40} {:<16} {:>6}  {}",
            server.name,
            server.queue,
            server.concurrency,
            or_dash(server.started_at)
        );
    }
    Ok(())
}

async fn processing(storage: &JobStorage, format: Format) -> Result<()> {
    let jobs = storage.processing_jobs().await?;
    if format == Format::Json {
        return print_json(&jobs);
    }
    for (id, job) in &jobs {
        match job {
            Some(job) => println!(
                "{:<38} {} on {} since {}",
                id,
                describe(job.job_type.as_deref(), &job.args),
                or_dash(job.server_name.as_deref()),
                or_dash(job.started_at)
            ),
            None => println!("{:<38} <unavailable>", id),
        }
    }
    println!("{} processing", jobs.len());
    Ok(())
}

async fn scheduled(storage: &JobStorage, format: Format) -> Result<()> {
    let jobs = storage.scheduled_jobs().await?;
    if format == Format::Json {
        return print_json(&jobs);
    }
    for (id, job) in &jobs {
        match job {
            Some(job) => println!(
                "{:<38} {} -> {} at {}",
                id,
                describe(job.job_type.as_deref(), &job.args),
                or_dash(job.queue.as_deref()),
                job.enqueue_at
            ),
            None => println!("{:<38} <unavailable>", id),
        }
    }
    println!("{} scheduled", jobs.len());
    Ok(())
}

async fn failed(storage: &JobStorage, format: Format) -> Result<()> {
    let jobs = storage.failed_jobs().await?;
    if format == Format::Json {
        return print_json(&jobs);
    }
    for (id, job) in &jobs {
        match job {
            Some(job) => {
                println!(
                    "{:<38} {} in {} at {}",
                    id,
                    describe(job.job_type.as_deref(), &job.args),
                    or_dash(job.queue.as_deref()),
                    or_dash(job.failed_at)
                );
                println!(
                    "  {}: {}",
                    or_dash(job.exception_type.as_deref()),
                    or_dash(job.exception_message.as_deref())
                );
            }
            None => println!("{:<38} <unavailable>", id),
        }
    }
    println!("{} failed", jobs.len());
    Ok(())
}

async fn succeeded(storage: &JobStorage, format: Format) -> Result<()> {
    let jobs = storage.succeeded_jobs().await?;
    if format == Format::Json {
        return print_json(&jobs);
    }
    for (id, job) in &jobs {
        match job {
            Some(job) => println!(
                "{:<38} {} in {} at {}",
                id,
                describe(job.job_type.as_deref(), &job.args),
                or_dash(job.queue.as_deref()),
                or_dash(job.succeeded_at)
            ),
            None => println!("{:<38} <expired>", id),
        }
    }
    Ok(())
}

async fn timeline(storage: &JobStorage, hourly: bool, format: Format) -> Result<()> {
    if hourly {
        let succeeded = storage.hourly_succeeded().await?;
        let failed = storage.hourly_failed().await?;
        if format == Format::Json {
            return print_json(&serde_json::json!({ "succeeded": succeeded, "failed": failed }));
        }
        println!("{:<20} {:>10} {:>10}", "HOUR", "SUCCEEDED", "FAILED");
        for (ok, bad) in succeeded.iter().zip(&failed) {
            println!(
                "{:<20} {:>10} {:>10}",
                ok.hour.format("%Y-%m-%d %H:00"),
                ok.count,
                bad.count
            );
        }
    } else {
        let succeeded = storage.succeeded_by_dates().await?;
        let failed = storage.failed_by_dates().await?;
        if format == Format::Json {
            return print_json(&serde_json::json!({ "succeeded": succeeded, "failed": failed }));
        }
        println!("{:<12} {:>10} {:>10}", "DATE", "SUCCEEDED", "FAILED");
        for (ok, bad) in succeeded.iter().zip(&failed) {
            println!("{:<12} {:>10} {:>10}", ok.date.to_string(), ok.count, bad.count);
        }
    }
    Ok(())
}

async fn job(storage: &JobStorage, id: &JobId, format: Format) -> Result<()> {
    let Some(details) = storage.job_details(id).await? else {
        bail!("job {id} not found");
    };
    if format == Format::Json {
        return print_json(&details);
    }
    println!("Job:  {}", id);
    println!("Type: {}", or_dash(details.job_type.as_deref()));
    for (name, value) in &details.arguments {
        println!("  arg {name} = {value}");
    }
    for (name, value) in &details.properties {
        println!("{name}: {value}");
    }
    if let Some(lease) = storage.lease(id).await? {
        println!("Leased by {} on {}", lease.server, lease.queue);
    }
    Ok(())
}
