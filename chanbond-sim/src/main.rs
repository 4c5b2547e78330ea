use anyhow::Result;

mod cli;
mod config;
mod runtime;
mod scenario;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = <cli::Cli as clap::Parser>::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => config::default_config_path()?,
    };

    match cli.command.unwrap_or(cli::Command::Run) {
        cli::Command::PrintConfigPath => {
            println!("{}", config_path.display());
            Ok(())
        }
        cli::Command::InitConfig { force } => {
            let cfg = scenario::ScenarioConfig::example();
            config::save(&config_path, &cfg, force)?;
            println!("Wrote example scenario to {}", config_path.display());
            Ok(())
        }
        cli::Command::Run => {
            let cfg = config::load(&config_path)?;
            let summary = runtime::run_scenario(&cfg, Box::new(|m| tracing::info!("{m}")))?;
            println!(
                "delivered={} errors={} sends={} aborted={}",
                summary.delivered,
                summary.errors,
                summary.sends.len(),
                summary.aborted_sends
            );
            Ok(())
        }
    }
}
