mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cli::Cli;
use procvisor::logging::{self, LogConfig};
use procvisor::{Master, PubSub, ShutdownCause, Subscribe, WorkerCommand};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log = LogConfig::new().with_format(cli.log_format);
    if let Some(filter) = cli.log_filter() {
        log = log.with_filter(filter);
    }
    logging::init(log.with_env_overrides());

    match run(cli).await {
        Ok(ShutdownCause::ForkLoop) => ExitCode::from(1),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ShutdownCause> {
    let cmd = WorkerCommand::new(&cli.program)
        .args(&cli.args)
        .silent(cli.silent);

    #[cfg(feature = "logging")]
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(procvisor::LogWriter::new())];
    #[cfg(not(feature = "logging"))]
    let subs: Vec<Arc<dyn Subscribe>> = Vec::new();

    let mut builder = Master::builder(cli.config())
        .command(cmd)
        .with_subscribers(subs);
    if cli.pubsub {
        builder = builder.message_handler(PubSub);
    }
    let master = builder
        .build()
        .with_context(|| format!("cannot supervise {}", cli.program.display()))?;

    tracing::info!(program = %cli.program.display(), workers = master.target(), "master started");
    let report = master.run().await.context("master failed")?;
    Ok(report.cause)
}
