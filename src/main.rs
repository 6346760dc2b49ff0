mod cli;
mod config;
mod filter;
mod notify;
mod poller;
mod render;
mod search;
mod server;
mod state;
mod storage;
mod template;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use cli::Args;
use poller::Poller;
use search::VintedClient;
use server::Server;
use state::State;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("VINTWATCH_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // before logging is set up: the .env file may configure the log filter
    let dotenv = dotenvy::dotenv();
    set_up_logging();

    match dotenv {
        Ok(path) => debug!("Loaded environment variables from `{}`", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Could not load the .env file: {e}"),
    }

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("could not listen for Ctrl-C: {e:#}");
                return;
            }

            debug!("Received Ctrl-C; shutting down");
            cancel.cancel();
        }
    });

    let mut tasks = match start(cancel.clone()).await {
        Ok(tasks) => tasks,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut exit_code = ExitCode::SUCCESS;

    while let Some(task_result) = tasks.join_next().await {
        cancel.cancel();

        match task_result {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }

            Err(e) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    exit_code
}

async fn start(cancel: CancellationToken) -> Result<JoinSet<Result<()>>> {
    let mut args = Args::parse();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain(["./vintwatch.toml".into(), "/etc/vintwatch.toml".into()])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(args);
    let state = State::new(config).await?;

    let search = Arc::new(VintedClient::new(&state.cfg.user_agent)?);
    let poller = Poller::new(
        state.storage.clone(),
        search,
        state.notifier.clone(),
        state.poller_settings()?,
        state.poll_now.clone(),
    );
    let server = Server::new(state).await?;

    let mut tasks = JoinSet::new();
    tasks.spawn(poller.run(cancel.clone()));
    tasks.spawn(server.serve(cancel.clone()));

    Ok(tasks)
}
