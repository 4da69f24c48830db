mod commands;
mod shell;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bosun_common::config::AppConfig;
use bosun_core::controller::PartitionController;
use bosun_core::local::LocalBackend;
use bosun_core::rpc;
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};
use log::info;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "bosun", version, about = "Partition control plane for distributed data processing")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive control shell
    Shell(ShellArgs),
    /// Serve the gRPC control interface
    Serve(ServeArgs),
}

#[derive(Parser)]
struct ShellArgs {
    /// Commands to execute in batch mode instead of reading input
    #[arg(long, num_args = 1.., value_name = "CMD")]
    cmds: Vec<String>,
    /// File containing commands to execute in batch mode
    #[arg(long, value_name = "PATH")]
    cf: Option<PathBuf>,
}

#[derive(Parser)]
struct ServeArgs {
    /// The IP address that the server binds to
    #[arg(long)]
    host: Option<IpAddr>,
    /// The port number that the server listens on
    #[arg(long)]
    port: Option<u16>,
}

async fn shutdown() {
    _ = tokio::signal::ctrl_c().await;
    info!("shutting down the bosun server...");
}

fn build_controller(config: &AppConfig) -> Result<Arc<PartitionController>, Box<dyn std::error::Error + Send + Sync>> {
    let backend = Arc::new(LocalBackend::default());
    let controller = PartitionController::from_config(backend, &config.controller)?;
    Ok(Arc::new(controller))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Shell(args) => {
            let controller = build_controller(&config)?;
            controller.restore().await;
            let shell = shell::Shell::new(controller);
            if !args.cmds.is_empty() || args.cf.is_some() {
                let mut cmds = args.cmds;
                if let Some(path) = &args.cf {
                    cmds.extend(commands::read_command_file(path)?);
                }
                shell.run_batch(cmds).await;
            } else {
                shell.run_interactive().await?;
            }
        }
        Command::Serve(args) => {
            let controller = build_controller(&config)?;
            controller.restore().await;
            let host = args
                .host
                .map(|h| h.to_string())
                .unwrap_or_else(|| config.server.listen_host.clone());
            let port = args.port.unwrap_or(config.server.listen_port);
            let listener = TcpListener::bind(format!("{host}:{port}")).await?;
            rpc::serve(controller, listener, shutdown()).await?;
            info!("the bosun server has stopped");
        }
    }
    Ok(())
}
