use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dispatch_lite::agent::JobAgent;
use dispatch_lite::config::{AgentConfig, ResolverConfig, RetryConfig};
use dispatch_lite::execution::{AttemptRecord, ExecutionOutcome};
use dispatch_lite::inventory::{
    Cluster, Command, Criterion, FallThrough, InMemoryInventory, InventoryStore, ResolutionEngine,
};
use dispatch_lite::job::{JobRequest, JobStatus};
use dispatch_lite::shutdown::install_kill_handler;

#[derive(Parser, Debug)]
#[command(name = "dispatch-lite")]
#[command(version)]
#[command(about = "Resolve job criteria against a resource inventory and run jobs through a staged agent")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Reserve, resolve, set up and run a job locally
    Run {
        #[command(flatten)]
        inventory: InventoryArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show which cluster/command pairs a set of criteria resolves to
    Resolve {
        #[command(flatten)]
        inventory: InventoryArgs,

        #[command(flatten)]
        criteria: CriteriaArgs,
    },

    /// List clusters, optionally filtered by a criterion
    Clusters {
        #[command(flatten)]
        inventory: InventoryArgs,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// List commands, optionally filtered by a criterion
    Commands {
        #[command(flatten)]
        inventory: InventoryArgs,

        #[command(flatten)]
        filter: FilterArgs,
    },
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct InventoryArgs {
    /// Inventory JSON file: {"clusters": [...], "commands": [...]}
    #[arg(long, short = 'i')]
    inventory: PathBuf,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct CriteriaArgs {
    /// Cluster criterion, most preferred first (e.g. "tags=sched:adhoc|type:yarn")
    #[arg(long = "cluster-criterion", short = 'c', required = true)]
    cluster_criteria: Vec<Criterion>,

    /// Command criterion (e.g. "tags=type:spark,version=3.1")
    #[arg(long, short = 'm')]
    command_criterion: Criterion,

    /// What happens when the first matching cluster criterion has no usable command
    #[arg(long, default_value = "zero-clusters")]
    fall_through: FallThroughArg,
}

#[derive(Parser, Debug)]
struct FilterArgs {
    /// Only list records matching this criterion
    #[arg(long)]
    criterion: Option<Criterion>,

    /// Do not restrict criteria without a status to UP clusters / ACTIVE commands
    #[arg(long)]
    any_status: bool,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    criteria: CriteriaArgs,

    /// Job name
    #[arg(long, default_value = "adhoc")]
    name: String,

    /// User the job runs for
    #[arg(long, default_value = "dispatch")]
    user: String,

    /// Requested job id (reservation fails if taken)
    #[arg(long)]
    job_id: Option<String>,

    /// Parent directory for job directories
    #[arg(long)]
    jobs_root: Option<PathBuf>,

    /// Hostname reported to the job service
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// Setup script sourced before the command runs
    #[arg(long)]
    setup_file: Option<String>,

    /// Dependency file staged into the job directory (repeatable)
    #[arg(long = "dependency")]
    dependencies: Vec<String>,

    /// Environment variable for the job, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_var)]
    environment: Vec<(String, String)>,

    /// Kill the job and fail it after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Attempts per stage before retryable failures escalate
    #[arg(long, default_value = "5")]
    max_attempts: u32,

    /// Remove the job directory once the job ends
    #[arg(long)]
    delete_job_dir: bool,

    /// Arguments appended to the resolved command
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FallThroughArg {
    ZeroClusters,
    NoEligibleCommand,
}

impl From<FallThroughArg> for FallThrough {
    fn from(arg: FallThroughArg) -> Self {
        match arg {
            FallThroughArg::ZeroClusters => FallThrough::ZeroClusters,
            FallThroughArg::NoEligibleCommand => FallThrough::NoEligibleCommand,
        }
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ResolvedPairOutput {
    cluster_id: String,
    cluster_name: String,
    command_id: String,
    command_name: String,
    preferred: bool,
}

#[derive(Serialize)]
struct ResolutionOutput {
    criterion_index: usize,
    criterion: String,
    pairs: Vec<ResolvedPairOutput>,
}

#[derive(Serialize)]
struct RunOutput {
    job_id: Option<String>,
    job_status: Option<JobStatus>,
    outcome: Option<ExecutionOutcome>,
    cluster_id: Option<String>,
    command_id: Option<String>,
    job_directory: Option<PathBuf>,
    attempts: Vec<AttemptRecord>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn load_inventory(args: &InventoryArgs) -> Result<Arc<dyn InventoryStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(InMemoryInventory::from_json_file(&args.inventory)?))
}

fn print_clusters(clusters: &[Cluster], output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(clusters)?),
        OutputFormat::Table => {
            if clusters.is_empty() {
                println!("No clusters found.");
                return Ok(());
            }
            println!("{:<24} {:<20} {:<10} {:<15} TAGS", "CLUSTER ID", "NAME", "VERSION", "STATUS");
            println!("{}", "-".repeat(90));
            for cluster in clusters {
                let tags: Vec<&str> = cluster.tags.iter().map(String::as_str).collect();
                println!(
                    "{:<24} {:<20} {:<10} {:<15} {}",
                    cluster.id,
                    cluster.name,
                    cluster.version,
                    cluster.status.as_str(),
                    tags.join(",")
                );
            }
        }
    }
    Ok(())
}

fn print_commands(commands: &[Command], output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(commands)?),
        OutputFormat::Table => {
            if commands.is_empty() {
                println!("No commands found.");
                return Ok(());
            }
            println!("{:<24} {:<20} {:<10} {:<12} EXECUTABLE", "COMMAND ID", "NAME", "VERSION", "STATUS");
            println!("{}", "-".repeat(90));
            for command in commands {
                println!(
                    "{:<24} {:<20} {:<10} {:<12} {}",
                    command.id,
                    command.name,
                    command.version,
                    command.status.as_str(),
                    command.executable.join(" ")
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_resolve(inventory: InventoryArgs, criteria: CriteriaArgs) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = ResolverConfig::default().with_fall_through(criteria.fall_through.into());
    let engine = ResolutionEngine::new(load_inventory(&inventory)?, resolver);

    let resolution = match engine.resolve(&criteria.cluster_criteria, &criteria.command_criterion) {
        Ok(resolution) => resolution,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let preferred_id = resolution.preferred().map(|p| p.cluster.id.clone());

    let output = ResolutionOutput {
        criterion_index: resolution.criterion_index(),
        criterion: criteria.cluster_criteria[resolution.criterion_index()].to_string(),
        pairs: resolution
            .pairs()
            .map(|p| ResolvedPairOutput {
                cluster_id: p.cluster.id.clone(),
                cluster_name: p.cluster.name.clone(),
                command_id: p.command.id.clone(),
                command_name: p.command.name.clone(),
                preferred: preferred_id.as_deref() == Some(p.cluster.id.as_str()),
            })
            .collect(),
    };

    match inventory.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("Matched criterion #{}: {}", output.criterion_index, output.criterion);
            println!();
            println!("{:<3} {:<24} {:<20} {:<24} COMMAND NAME", "", "CLUSTER ID", "CLUSTER NAME", "COMMAND ID");
            println!("{}", "-".repeat(90));
            for pair in &output.pairs {
                let marker = if pair.preferred { "*" } else { "" };
                println!(
                    "{:<3} {:<24} {:<20} {:<24} {}",
                    marker, pair.cluster_id, pair.cluster_name, pair.command_id, pair.command_name
                );
            }
        }
    }
    Ok(())
}

fn handle_list(
    inventory: InventoryArgs,
    filter: FilterArgs,
    clusters: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = load_inventory(&inventory)?;
    let engine = ResolutionEngine::new(store.clone(), ResolverConfig::default());
    let add_default_status = !filter.any_status;

    if clusters {
        let found: Vec<Cluster> = match &filter.criterion {
            Some(criterion) => engine.find_matching_clusters(criterion, add_default_status),
            None => store.snapshot().clusters().cloned().collect(),
        };
        print_clusters(&found, &inventory.output)
    } else {
        let found: Vec<Command> = match &filter.criterion {
            Some(criterion) => engine.find_matching_commands(criterion, add_default_status),
            None => store.snapshot().commands().cloned().collect(),
        };
        print_commands(&found, &inventory.output)
    }
}

async fn handle_run(inventory: InventoryArgs, run: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AgentConfig::default()
        .with_hostname(run.hostname)
        .with_retry(RetryConfig {
            max_attempts: run.max_attempts,
            ..RetryConfig::default()
        })
        .with_delete_job_directory(run.delete_job_dir);
    if let Some(root) = run.jobs_root {
        config.jobs_root = root;
    }
    let resolver = ResolverConfig::default().with_fall_through(run.criteria.fall_through.into());

    let mut request = JobRequest::new(
        run.name,
        run.user,
        run.criteria.cluster_criteria,
        run.criteria.command_criterion,
    )?
    .with_args(run.args)
    .with_dependencies(run.dependencies);
    if let Some(id) = run.job_id {
        request = request.with_requested_id(id);
    }
    if let Some(setup_file) = run.setup_file {
        request = request.with_setup_file(setup_file);
    }
    if let Some(timeout) = run.timeout_secs {
        request = request.with_timeout_secs(timeout);
    }
    for (key, value) in run.environment {
        request = request.with_env(key, value);
    }

    tracing::info!(
        jobs_root = %config.jobs_root.display(),
        hostname = %config.hostname,
        max_attempts = config.retry.max_attempts,
        "Starting job agent"
    );

    let (agent, _job_service) = JobAgent::local(config, load_inventory(&inventory)?, resolver);
    let kill = CancellationToken::new();
    install_kill_handler(kill.clone());

    let ctx = agent.execute(agent.new_context(request), kill).await;
    let output = RunOutput {
        job_id: ctx.reserved_job_id().map(str::to_string),
        job_status: ctx.current_job_status(),
        outcome: ctx.outcome().cloned(),
        cluster_id: ctx.cluster_id().map(str::to_string),
        command_id: ctx.command_id().map(str::to_string),
        job_directory: ctx.job_directory().map(|p| p.to_path_buf()),
        attempts: ctx.attempts().to_vec(),
    };

    match inventory.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
            println!("Job ID:     {}", or_dash(&output.job_id));
            println!("Cluster:    {}", or_dash(&output.cluster_id));
            println!("Command:    {}", or_dash(&output.command_id));
            if let Some(dir) = &output.job_directory {
                println!("Directory:  {}", dir.display());
            }
            if let Some(status) = output.job_status {
                println!("Status:     {}", status);
            }
            if let Some(outcome) = &output.outcome {
                println!("Outcome:    {}", outcome);
            }
            println!();
            println!("{:<28} {:<8} {:<10} RESULT", "STAGE", "ATTEMPT", "FINALIZER");
            println!("{}", "-".repeat(70));
            for attempt in &output.attempts {
                println!(
                    "{:<28} {:<8} {:<10} {:?}",
                    attempt.stage.to_string(),
                    attempt.attempt,
                    if attempt.finalizer { "yes" } else { "" },
                    attempt.result
                );
            }
        }
    }

    if !output.outcome.as_ref().is_some_and(ExecutionOutcome::is_success) {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run { inventory, run } => handle_run(inventory, run).await?,
        Commands::Resolve {
            inventory,
            criteria,
        } => handle_resolve(inventory, criteria)?,
        Commands::Clusters { inventory, filter } => handle_list(inventory, filter, true)?,
        Commands::Commands { inventory, filter } => handle_list(inventory, filter, false)?,
    }

    Ok(())
}
