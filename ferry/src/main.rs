use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ferry_observability::{MetricsExporter, init_observability};
use snafu::{ResultExt, Report};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    error::{ObservabilitySnafu, Result},
    replay::ReplayArgs,
};

mod args;
mod error;
mod replay;

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Ferry change-data-capture sink")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay newline-delimited JSON records through the sink into an in-memory store
    Replay {
        #[clap(flatten)]
        inner: ReplayArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(err = ?err, "ferry failed");
            let code = u8::try_from(err.kind().exit_code()).unwrap_or(1);
            eprintln!("{}", Report::from_error(err));
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_observability(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        MetricsExporter::default(),
    )
    .context(ObservabilitySnafu {})?;

    let ct = CancellationToken::new();

    let ct_clone = ct.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ct_clone.cancel();
    });

    match cli.command {
        Commands::Replay { inner } => inner.run(ct).await,
    }
}
