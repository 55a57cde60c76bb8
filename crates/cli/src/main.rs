use anyhow::Context;
use clap::Parser;
use config::Config;
use flume::bounded;
use orchestrator::{ControlPlane, Services};
use routerd::{
    cli::Cli,
    signals::{SignalEvent, wait_for_signal},
};
use std::{fs::OpenOptions, sync::Mutex};
use tracing::{debug, error, info, warn};
use tracing_log::AsTrace;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbosity.log_level_filter().as_trace().into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_file(true)
        .with_line_number(true);

    match &cli.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        None => Config::new(),
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.dump_config {
        let config = load_config(&cli)?;
        let rendered = config.to_toml()?;
        #[allow(clippy::print_stdout)]
        {
            println!("{rendered}");
        }
        return Ok(());
    }

    init_logging(&cli)?;
    debug!(config = ?cli);

    let config = load_config(&cli)?;
    let services = Services::system(&config)?;
    let mut plane = ControlPlane::new(config, services).await?;
    plane.restore().await;
    plane.start().await;
    info!("routerd started");

    let (events_tx, events_rx) = bounded(8);

    loop {
        tokio::select! {
            err = wait_for_signal(&events_tx) => {
                error!(error = ?err, "Error while waiting for signal");
                plane.stop().await;
                err?;
                break;
            }
            res = events_rx.recv_async() => {
                let event = res?;
                debug!(?event, "Received signal event");
                match event {
                    SignalEvent::SigHUP => match load_config(&cli) {
                        Ok(config) => {
                            plane.reload(config);
                            info!("configuration reloaded");
                        }
                        Err(err) => warn!(%err, "reload failed, keeping current configuration"),
                    },
                    SignalEvent::SigUSR1 => plane.dump_info(),
                    SignalEvent::SigUSR2 => {
                        if let Err(err) = plane.save().await {
                            warn!(%err, "telemetry save failed");
                        }
                    }
                    event if event.is_shutdown() => {
                        info!(?event, "shutting down");
                        plane.stop().await;
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}
