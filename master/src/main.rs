use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use common::{planner, RunConfig};
use master::cli::Cli;
use master::{render, runner};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.run_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    init_tracing(config.verbose);

    if let Err(e) = run(&cli, &config).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sitebench=debug,master=debug,common=debug"
    } else {
        "sitebench=info,master=info"
    };

    // stdout queda para el reporte
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: &Cli, config: &RunConfig) -> Result<()> {
    let command = cli.worker_command();

    if config.verbose {
        let total = config.total_jobs();
        println!("{}", render::render_config(config, &command));
        println!(
            "{}",
            render::render_plan(total, planner::jobs_per_worker(total, config.workers))
        );
    }

    let report = runner::run(config, &command).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render::render_report(&report));
    }

    Ok(())
}
