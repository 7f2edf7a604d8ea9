use std::path::PathBuf;

/// Command-line entry point for the reality mesh server.
#[derive(clap::Parser)]
#[command(name = "realityd", about = "Runs a reality invalidation/versioning mesh server")]
pub struct Cli {
    /// Path to a JSON config file (see reality::config::Config).
    #[arg(long, env = "REALITY_CONFIG")]
    pub config: PathBuf,

    /// Override host from the config file.
    #[arg(long)]
    pub host: Option<String>,

    /// Override port from the config file.
    #[arg(long)]
    pub port: Option<u16>,
}
