use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use runner::{SandboxService, ServiceConfig};
use sandbox::ExecutionRequest;
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "sbx-runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report host capabilities and the isolation tier that would be used
    Check(CheckArgs),
    /// Execute one script request and print the result as JSON
    Run(Box<RunArgs>),
}

#[derive(Args)]
struct ConfigArgs {
    /// Base directory for package/venv caches
    #[arg(long, env = "SBX_CACHE_DIR")]
    cache_dir: Option<PathBuf>,
    /// Path to the nsjail binary
    #[arg(long, env = "SBX_NSJAIL_BIN")]
    nsjail_bin: Option<PathBuf>,
    /// Read-only rootfs for the full-isolation tier
    #[arg(long, env = "SBX_ROOTFS")]
    rootfs: Option<PathBuf>,
    /// Host python3 used by the degraded tiers
    #[arg(long, env = "SBX_PYTHON")]
    python: Option<PathBuf>,
    /// Dependency install timeout in seconds
    #[arg(long, env = "SBX_INSTALL_TIMEOUT", default_value_t = 180)]
    install_timeout: u64,
    /// Never use the full-isolation tier
    #[arg(long, env = "SBX_DISABLE_FULL_ISOLATION")]
    disable_full_isolation: bool,
    /// Never use the PID-namespace tier
    #[arg(long, env = "SBX_DISABLE_PID_NAMESPACE")]
    disable_pid_namespace: bool,
}

impl ConfigArgs {
    fn resolve(self) -> sandbox::Result<ServiceConfig> {
        ServiceConfig::resolve(
            self.cache_dir,
            self.nsjail_bin,
            self.rootfs,
            self.python,
            self.install_timeout,
            self.disable_full_isolation,
            self.disable_pid_namespace,
        )
    }
}

#[derive(Args)]
struct CheckArgs {
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Script file to execute
    script: PathBuf,
    /// Inputs as an inline JSON object
    #[arg(long)]
    inputs: Option<String>,
    /// Dependency spec (repeatable)
    #[arg(long = "dep")]
    dependencies: Vec<String>,
    /// Wall-clock timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Allow network module imports and jail egress
    #[arg(long)]
    allow_network: bool,
    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env")]
    env: Vec<String>,
    /// Tenant identifier salting the package cache key
    #[arg(long)]
    workspace: Option<String>,
    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Check(args) => run_check(args).await,
        Command::Run(args) => run_script(*args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_check(args: CheckArgs) -> sandbox::Result<ExitCode> {
    let config = args.config.resolve()?;
    let settings = config.nsjail_settings();

    match sandbox_nsjail::check_prerequisites(&settings).await {
        Ok(()) => tracing::info!("[OK] full isolation prerequisites satisfied"),
        Err(e) => tracing::warn!("full isolation unavailable: {e}"),
    }

    let service = SandboxService::new(&config);
    let tier = service.detector().select().await;
    println!("selected tier: {tier}");
    Ok(ExitCode::SUCCESS)
}

async fn run_script(args: RunArgs) -> sandbox::Result<ExitCode> {
    let script = tokio::fs::read_to_string(&args.script).await?;
    let inputs = match &args.inputs {
        Some(text) => serde_json::from_str(text).map_err(|e| {
            sandbox::SandboxError::Validation(vec![format!("inputs is not a JSON object: {e}")])
        })?,
        None => sandbox::Inputs::new(),
    };
    let env_vars = parse_env_pairs(&args.env)?;

    let config = args.config.resolve()?;
    let service = SandboxService::new(&config);

    let request = ExecutionRequest {
        script,
        inputs,
        dependencies: args.dependencies,
        timeout_seconds: args.timeout,
        allow_network: args.allow_network,
        env_vars,
        workspace_id: args.workspace,
        trust_mode: None,
    };

    let result = service.execute(request).await?;
    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|e| sandbox::SandboxError::Execution(format!("render result: {e}")))?;
    println!("{rendered}");

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn parse_env_pairs(pairs: &[String]) -> sandbox::Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(sandbox::SandboxError::Validation(vec![format!(
                "env entry '{pair}' is not KEY=VALUE"
            )]));
        };
        env.insert(key.to_string(), value.to_string());
    }
    Ok(env)
}
