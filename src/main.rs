//! Kubefirst CLI - provision and tear down GitOps management clusters

use clap::{Parser, Subcommand};

use kubefirst::commands::{create, destroy, reset, status};
use kubefirst::telemetry::{init_tracing, LogFormat};

/// Kubefirst - checkpointed provisioner for GitOps management clusters
#[derive(Parser, Debug)]
#[command(name = "kubefirst", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, env = "K1_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a cluster, or resume a previous create
    ///
    /// Steps whose checkpoint is already done are skipped, so re-running
    /// after a failure continues from the failed step.
    Create(create::CreateArgs),

    /// Destroy a cluster created by `create`
    ///
    /// Only resources whose create step was attempted are removed.
    Destroy(destroy::DestroyArgs),

    /// Show stored clusters or one cluster's checkpoints
    Status(status::StatusArgs),

    /// Return failed checkpoints to pending
    Reset(reset::ResetArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    match cli.command {
        Commands::Create(args) => {
            let record = create::run(args).await?;
            println!(
                "cluster {} provisioned: {}",
                record.cluster_name,
                record.ingress_url("argocd")
            );
        }
        Commands::Destroy(args) => {
            let record = destroy::run(args).await?;
            println!("cluster {} deleted", record.cluster_name);
        }
        Commands::Status(args) => print!("{}", status::run(args).await?),
        Commands::Reset(args) => {
            let reset = reset::run(args).await?;
            if reset.is_empty() {
                println!("no failed checkpoints");
            }
            for step in reset {
                println!("reset {step}");
            }
        }
    }
    Ok(())
}
