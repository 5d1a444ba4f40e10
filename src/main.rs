use clap::Parser;
use kube_lvs_ctl::config::{Cli, Role};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    let result = match cli.role {
        Role::Director(args) => kube_lvs_ctl::commands::director::run(args).await,
        Role::RealServer(args) => kube_lvs_ctl::commands::realserver::run(args).await,
    };

    if let Err(e) = result {
        eprintln!("kube-lvs-ctl: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
