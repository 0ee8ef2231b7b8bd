use clap::Parser;
use dct_rs::{
    cmd,
    settings::{LogMethod, LogSettings, Settings},
    Error, Result,
};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, clap::Parser)]
#[command(name = env!("CARGO_BIN_NAME"), version = env!("CARGO_PKG_VERSION"))]
/// Packet data connection tracker
pub struct Cli {
    /// Settings file to merge over the built in defaults
    #[arg(short = 'c')]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, clap::Subcommand)]
pub enum Cmd {
    Server(cmd::server::Cmd),
    Apns(cmd::apns::Cmd),
    Retry(cmd::retry::Cmd),
}

fn mk_logger(settings: &LogSettings) -> Result<WorkerGuard> {
    let (writer, guard) = match settings.method {
        LogMethod::Stdio => tracing_appender::non_blocking(std::io::stdout()),
        LogMethod::File => {
            std::fs::create_dir_all(&settings.path)?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(
                &settings.path,
                concat!(env!("CARGO_BIN_NAME"), ".log"),
            ))
        }
    };
    let filter = EnvFilter::try_new(&settings.level).map_err(Error::custom)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            settings
                .timestamp
                .then(|| fmt::layer().with_writer(writer.clone())),
        )
        .with(
            (!settings.timestamp).then(|| fmt::layer().without_time().with_writer(writer)),
        )
        .init();
    Ok(guard)
}

pub fn main() -> Result {
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;
    // flushes buffered log lines when dropped
    let _log_guard = mk_logger(&settings.log)?;

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async {
            let (shutdown_trigger, shutdown_listener) = triggered::trigger();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                shutdown_trigger.trigger();
            });
            run(cli, settings, &shutdown_listener).await
        })
}

pub async fn run(cli: Cli, settings: Settings, shutdown_listener: &triggered::Listener) -> Result {
    match cli.cmd {
        Cmd::Server(cmd) => cmd.run(shutdown_listener, settings).await,
        Cmd::Apns(cmd) => cmd.run(settings).await,
        Cmd::Retry(cmd) => cmd.run(settings).await,
    }
}
