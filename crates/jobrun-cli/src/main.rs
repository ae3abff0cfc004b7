//! JobRun CLI - run backup, restore and checksum jobs through the engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobrun_engine::{
    EngineConfig, EngineError, ExecutionClass, JobEngine, JobSpec, OutputId, ResourceKey, Task,
    TaskId, TaskState,
};

mod jobs;

use jobs::{ChecksumJob, CopyTreeJob};

/// JobRun CLI - long-running job engine playground
#[derive(Parser)]
#[command(name = "jobrun")]
#[command(about = "Run backup, restore and checksum jobs on the JobRun engine", long_about = None)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct EngineArgs {
    /// Synchronous worker slots (0 = number of CPUs)
    #[arg(long, default_value_t = 0)]
    max_sync: usize,

    /// Asynchronous worker slots (0 = number of CPUs)
    #[arg(long, default_value_t = 0)]
    max_async: usize,

    /// Seconds results stay fetchable (0 = five minutes)
    #[arg(long, default_value_t = 300)]
    expiration_secs: u64,

    /// Seconds a synchronous submission waits for a worker slot
    #[arg(long, default_value_t = 30)]
    connection_timeout_secs: u64,

    /// Status polling interval in milliseconds
    #[arg(long, default_value_t = 200)]
    poll_ms: u64,

    /// Cancel each task this many milliseconds after submitting it
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Print task snapshots as JSON
    #[arg(long)]
    json: bool,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            max_synchronous_processes: self.max_sync,
            max_asynchronous_processes: self.max_async,
            resource_expiration_timeout: Duration::from_secs(self.expiration_secs),
            connection_timeout: Duration::from_secs(self.connection_timeout_secs),
            ..EngineConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Back up a workspace directory
    Backup {
        /// Workspace to back up
        source: PathBuf,

        /// Directory to write the backup into
        destination: PathBuf,

        /// Pause after each copied file, in milliseconds
        #[arg(long, default_value_t = 0)]
        throttle_ms: u64,
    },

    /// Restore a backup into a workspace directory
    Restore {
        /// Backup directory
        backup: PathBuf,

        /// Workspace to restore into
        target: PathBuf,

        /// Pause after each copied file, in milliseconds
        #[arg(long, default_value_t = 0)]
        throttle_ms: u64,
    },

    /// Compute SHA-256 checksums of files as a process job
    Checksum {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory for the result file
        #[arg(long, default_value = "jobrun-results")]
        output_dir: PathBuf,

        /// Run as a synchronous execution bounded by the connection timeout
        #[arg(long)]
        sync: bool,
    },

    /// Back up and restore the same workspace while a checksum runs,
    /// showing resource serialization
    Demo {
        /// Scratch directory for the demo workspace
        #[arg(long, default_value = "jobrun-demo")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobrun=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let engine = JobEngine::start(cli.engine.config())?;

    match cli.command {
        Commands::Backup {
            source,
            destination,
            throttle_ms,
        } => {
            let job = CopyTreeJob::new(&source, &destination)
                .with_throttle(Duration::from_millis(throttle_ms));
            let id = engine.submit(JobSpec::backup(ResourceKey::from_path(&source), job));
            watch(&engine, &cli.engine, &[id]).await?;
        }
        Commands::Restore {
            backup,
            target,
            throttle_ms,
        } => {
            let job =
                CopyTreeJob::new(&backup, &target).with_throttle(Duration::from_millis(throttle_ms));
            let id = engine.submit(JobSpec::restore(ResourceKey::from_path(&target), job));
            watch(&engine, &cli.engine, &[id]).await?;
        }
        Commands::Checksum {
            files,
            output_dir,
            sync,
        } => {
            checksum(&engine, &cli.engine, files, output_dir, sync).await?;
        }
        Commands::Demo { dir } => {
            demo(&engine, &cli.engine, dir).await?;
        }
    }

    engine.shutdown();
    Ok(())
}

async fn checksum(
    engine: &JobEngine,
    args: &EngineArgs,
    files: Vec<PathBuf>,
    output_dir: PathBuf,
    sync: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let class = if sync {
        ExecutionClass::Sync
    } else {
        ExecutionClass::Async
    };
    let spec = JobSpec::process("checksum", class, ChecksumJob::new(files, output_dir));

    let id = match engine.submit_bounded(spec).await {
        Ok(id) => id,
        Err(EngineError::Capacity { task_id, waited }) => {
            println!(
                "Task {task_id} rejected: no synchronous slot within {}s",
                waited.as_secs()
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let finished = watch(engine, args, &[id]).await?;
    if finished.iter().any(|t| t.state == TaskState::Completed) {
        let location = engine.fetch_result(&id, &OutputId::default())?;
        println!("Result: {}", location.display());
    }
    Ok(())
}

async fn demo(
    engine: &JobEngine,
    args: &EngineArgs,
    dir: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = dir.join("workspace");
    let backup = dir.join("backup");
    seed_workspace(&workspace)?;
    info!(workspace = %workspace.display(), "Seeded demo workspace");

    let resource = ResourceKey::from_path(&workspace);
    let throttle = Duration::from_millis(20);
    let backup_id = engine.submit(JobSpec::backup(
        resource.clone(),
        CopyTreeJob::new(&workspace, &backup).with_throttle(throttle),
    ));
    let restore_id = engine.submit(JobSpec::restore(
        resource,
        CopyTreeJob::new(&backup, &workspace).with_throttle(throttle),
    ));
    let inputs = std::fs::read_dir(&workspace)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    let checksum_id = engine.submit(
        JobSpec::process(
            "checksum",
            ExecutionClass::Async,
            ChecksumJob::new(inputs, dir.join("results")),
        )
        .with_label("requester", "demo"),
    );

    watch(engine, args, &[backup_id, restore_id, checksum_id]).await?;

    println!();
    for (kind, tasks) in engine.list_grouped() {
        println!("{} ({}):", kind, tasks.len());
        for task in tasks {
            println!("  {:<36}  {:<10}  {}", task.id, task.state, format_time(&task));
        }
    }
    println!();
    print!("{}", engine.metrics());
    Ok(())
}

fn seed_workspace(workspace: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(workspace.join("styles"))?;
    for i in 0..10 {
        std::fs::write(
            workspace.join(format!("layer_{i:02}.xml")),
            format!("<layer id=\"{i}\"/>"),
        )?;
    }
    std::fs::write(workspace.join("styles/default.sld"), "<StyledLayerDescriptor/>")
}

/// Poll the tasks until all are terminal, printing every state change.
async fn watch(
    engine: &JobEngine,
    args: &EngineArgs,
    ids: &[TaskId],
) -> Result<Vec<Task>, Box<dyn std::error::Error>> {
    let poll = Duration::from_millis(args.poll_ms.max(10));
    let cancel_after = args.cancel_after_ms.map(Duration::from_millis);
    let started = tokio::time::Instant::now();
    let mut last: HashMap<TaskId, TaskState> = HashMap::new();
    let mut cancelled = false;

    loop {
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            let task = engine.status(id)?;
            if last.insert(*id, task.state) != Some(task.state) {
                print_task(&task, args.json)?;
            }
            snapshots.push(task);
        }

        if snapshots.iter().all(Task::is_terminal) {
            return Ok(snapshots);
        }

        if let Some(after) = cancel_after {
            if !cancelled && started.elapsed() >= after {
                for id in ids {
                    engine.cancel(id)?;
                }
                cancelled = true;
            }
        }

        tokio::time::sleep(poll).await;
    }
}

fn print_task(task: &Task, json: bool) -> Result<(), serde_json::Error> {
    if json {
        println!("{}", serde_json::to_string(task)?);
        return Ok(());
    }

    let name = task.name.as_deref().unwrap_or(task.kind.name());
    println!("{:<36}  {:<8}  {:<10}  {}", task.id, name, task.state, format_time(task));
    if let Some(error) = &task.error {
        println!("  Error: {}", error);
    }
    Ok(())
}

fn format_time(task: &Task) -> String {
    let at = task
        .completed_at
        .or(task.started_at)
        .unwrap_or(task.submitted_at);
    at.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
