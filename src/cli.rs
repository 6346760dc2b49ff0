use clap::ValueHint;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, vintwatch looks for a file named `vintwatch.toml` in the following directories
    /// (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        long,
        env = "VINTWATCH_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// Address of the HTTP command server.
    #[arg(long, env = "VINTWATCH_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file.
    #[arg(long, env = "VINTWATCH_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// Discord bot token used to deliver notifications.
    #[arg(long, env = "VINTWATCH_DISCORD_TOKEN", hide_env_values = true)]
    pub discord_token: Option<String>,

    /// Bearer token required to change subscriptions over HTTP.
    #[arg(long, env = "VINTWATCH_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
