//! Sandcell CLI
//!
//! A command-line tool for running untrusted code snippets in nsjail
//! sandboxes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandcell::{
    Config, Coordinator, EXAMPLE_CONFIG, ExecutionRequest, ExecutionResult, ExitStatus,
    ResourceLimits, SubmitError, prepare_cgroup,
};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandcell")]
#[command(about = "A tool for running untrusted code in nsjail sandboxes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: sandcell.toml)
        #[arg(short, long, default_value = "sandcell.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a code file through the sandboxed interpreter
    Run {
        /// File containing the code to run
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Extra arguments passed to the interpreter
        #[arg(last = true)]
        args: Vec<String>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Run a code snippet given on the command line
    Eval {
        /// The code to run
        code: String,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[derive(clap::Args)]
struct LimitArgs {
    /// Wall time limit in seconds
    #[arg(short, long)]
    time_limit: Option<f64>,

    /// CPU time limit in seconds
    #[arg(long)]
    cpu_limit: Option<f64>,

    /// Memory limit in megabytes
    #[arg(short, long)]
    memory_limit: Option<u64>,
}

impl LimitArgs {
    /// Only explicitly-specified values are set, so unset fields fall back
    /// to the configured defaults.
    fn to_limits(&self) -> ResourceLimits {
        let mut limits = ResourceLimits::none();
        if let Some(wall) = self.time_limit {
            limits = limits.with_wall_time(wall);
        }
        if let Some(cpu) = self.cpu_limit {
            limits = limits.with_cpu_time(cpu);
        }
        if let Some(mb) = self.memory_limit {
            limits = limits.with_memory(mb * ResourceLimits::MB);
        }
        limits
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    // Set up cgroup hierarchy if cgroup mode is enabled
    if config.cgroup {
        match prepare_cgroup(&config.cg_root) {
            Ok(true) => debug!("cgroup hierarchy ready"),
            Ok(false) => {
                warn!(
                    "cgroup support unavailable (memory controller not found), falling back to RLIMIT_AS"
                );
                config.cgroup = false;
            }
            Err(e) => {
                warn!("cgroup setup failed: {e}, falling back to RLIMIT_AS memory limiting");
                config.cgroup = false;
            }
        }
    }

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run { file, args, limits } => {
            let code = tokio::fs::read_to_string(&file)
                .await
                .context("failed to read code file")?;
            run_code(config, code, args, limits.to_limits()).await
        }
        Commands::Eval { code, limits } => {
            run_code(config, code, Vec::new(), limits.to_limits()).await
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

async fn run_code(
    config: Config,
    code: String,
    args: Vec<String>,
    limits: ResourceLimits,
) -> Result<()> {
    let coordinator = Coordinator::new(config).context("failed to start coordinator")?;

    let request = ExecutionRequest::new(code).with_args(args).with_limits(limits);

    info!("executing code");
    let result = match coordinator.submit(request).await {
        Ok(result) => result,
        Err(SubmitError::Busy) => anyhow::bail!("all execution slots are busy"),
        Err(SubmitError::Closed) => anyhow::bail!("coordinator is closed"),
    };

    print_result(&result).await?;

    // Exit with a code that reflects the sandboxed outcome
    match result.status {
        ExitStatus::Success(0) => Ok(()),
        ExitStatus::Success(code) => std::process::exit(code),
        ExitStatus::TimedOut => std::process::exit(124),
        _ => std::process::exit(1),
    }
}

async fn print_result(result: &ExecutionResult) -> Result<()> {
    print!("{}", String::from_utf8_lossy(&result.stdout));
    eprint!("{}", String::from_utf8_lossy(&result.stderr));

    if result.stdout_truncated || result.stderr_truncated {
        warn!("output was truncated at the configured cap");
    }
    if let Some(ref message) = result.message {
        warn!("{message}");
    }

    // Files the code left behind land next to the caller
    for attachment in &result.attachments {
        tokio::fs::write(&attachment.path, &attachment.content)
            .await
            .with_context(|| format!("failed to write output file '{}'", attachment.path))?;
        info!(file = %attachment.path, size = attachment.content.len(), "wrote output file");
    }

    // Log execution info via tracing (stderr), keeping stdout clean for piping
    info!(
        status = ?result.status,
        wall_time = format_args!("{:.3}s", result.wall_time.as_secs_f64()),
        peak_memory = result.peak_memory,
        "execution result"
    );

    Ok(())
}

fn show_config(config: &Config) {
    println!("Execution:");
    println!("  Interpreter: {}", config.interpreter.join(" "));
    println!("  Pool size: {}", config.pool_size);
    println!("  Queue depth: {}", config.queue_depth);
    println!("  User: {}:{}", config.uid, config.gid);
    println!();
    println!("Default resource limits:");
    println!("  CPU time: {:?} s", config.default_limits.cpu_time);
    println!("  Wall time: {:?} s", config.default_limits.wall_time);
    println!("  Memory: {:?} bytes", config.default_limits.memory);
    println!("  Max processes: {:?}", config.default_limits.max_processes);
    println!("  Max output: {:?} bytes", config.default_limits.max_output);
    println!();
    println!("nsjail binary: {}", config.nsjail_binary().display());
    println!("cgroup mode: {}", config.cgroup);
    println!("Mounts configured: {}", config.sandbox_mounts.len());
}

async fn init_config(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
