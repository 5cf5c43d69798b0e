use clap::Parser;

#[derive(Parser)]
#[command(name = "jukebox-rs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Parser)]
pub enum Commands {
    /// Connect to chat and start playing requests.
    Run {
        #[arg(long, default_value = "config.toml")]
        config: String,
    },
    /// Load and verify the configuration, then exit.
    Check {
        #[arg(long, default_value = "config.toml")]
        config: String,
    },
}
