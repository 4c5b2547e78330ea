use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "chanbond-sim",
    version,
    about = "Replay a channel-bonding scenario against simulated radios"
)]
pub struct Cli {
    /// Path to scenario file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scenario (default)
    Run,

    /// Write the example scenario (does not overwrite unless --force)
    InitConfig {
        /// Overwrite existing scenario file
        #[arg(long)]
        force: bool,
    },

    /// Print the resolved scenario file path
    PrintConfigPath,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init_config_force() {
        let cli = Cli::try_parse_from(["chanbond-sim", "--config", "s.toml", "init-config", "--force"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("s.toml")));
        assert!(matches!(cli.command, Some(Command::InitConfig { force: true })));
    }

    #[test]
    fn test_command_is_optional() {
        let cli = Cli::try_parse_from(["chanbond-sim"]).unwrap();
        assert!(cli.command.is_none());
    }
}
