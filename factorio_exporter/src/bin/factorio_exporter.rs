use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use factorio_exporter::{
    channel::{Channel, Rcon},
    commander::{self, Reloader},
    config::{self, Config},
    pacer::Pacer,
    server::{self, Endpoints},
    signals,
    source::{self, Source, file, remote},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{runtime::Builder, signal, task::JoinSet};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

/// Time between RCON connection attempts at startup.
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Command script error: {0}")]
    Commander(#[from] commander::Error),
    #[error("Metrics server error: {0}")]
    Server(#[from] server::Error),
    #[error("Failed to install telemetry recorder: {0}")]
    Recorder(#[from] metrics_exporter_prometheus::BuildError),
}

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// path on disk to the YAML configuration file
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_CONFIG_PATH")]
    config_path: Option<PathBuf>,
    /// the port to expose the metrics endpoint on
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_METRICS_PORT")]
    metrics_port: Option<u16>,
    /// read snapshots from this file, exclusive of the rcon options
    #[clap(
        long,
        env = "FACTORIO_PROMETHEUS_EXPORTER_SNAPSHOT_PATH",
        conflicts_with_all = [
            "rcon_address",
            "rcon_port",
            "rcon_password",
            "rcon_script_path",
            "autopause_script_path",
            "autopause_interval_millis",
        ]
    )]
    snapshot_path: Option<PathBuf>,
    /// the address of the Factorio server, selects the rcon source
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_RCON_ADDRESS")]
    rcon_address: Option<String>,
    /// the RCON port of the Factorio server, selects the rcon source
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_RCON_PORT")]
    rcon_port: Option<u16>,
    /// the RCON password, read from the server's rconpw file if absent
    #[clap(
        long,
        env = "FACTORIO_PROMETHEUS_EXPORTER_RCON_PASSWORD",
        hide_env_values = true
    )]
    rcon_password: Option<String>,
    /// the Lua script whose output is the snapshot, selects the rcon source
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_RCON_SCRIPT_PATH")]
    rcon_script_path: Option<PathBuf>,
    /// the Lua script sent periodically to manage pausing, enables autopause
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_AUTOPAUSE_SCRIPT_PATH")]
    autopause_script_path: Option<PathBuf>,
    /// milliseconds between autopause sends, enables autopause
    #[clap(long, env = "FACTORIO_PROMETHEUS_EXPORTER_AUTOPAUSE_INTERVAL_MILLIS")]
    autopause_interval_millis: Option<u64>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 10)]
    max_shutdown_delay: u16,
}

/// Load the configuration file, if any, and apply command line overrides.
fn get_config(args: &Args) -> Result<Config, Error> {
    let mut config = match &args.config_path {
        Some(path) => {
            debug!("loading configuration from {}", path.display());
            config::load_config_from_path(path)?
        }
        None => Config::default(),
    };

    if let Some(port) = args.metrics_port {
        config.metrics_addr.set_port(port);
    }
    if let Some(path) = &args.snapshot_path {
        config.source = source::Config::File(file::Config { path: path.clone() });
    }
    if args.rcon_address.is_some()
        || args.rcon_port.is_some()
        || args.rcon_password.is_some()
        || args.rcon_script_path.is_some()
    {
        let mut rcon = match &config.source {
            source::Config::Rcon(rcon) => rcon.clone(),
            source::Config::File(_) => remote::Config::default(),
        };
        if let Some(address) = &args.rcon_address {
            rcon.address.clone_from(address);
        }
        if let Some(port) = args.rcon_port {
            rcon.port = port;
        }
        if let Some(password) = &args.rcon_password {
            rcon.password = Some(password.clone());
        }
        if let Some(path) = &args.rcon_script_path {
            rcon.script_path.clone_from(path);
        }
        config.source = source::Config::Rcon(rcon);
    }
    if args.autopause_script_path.is_some() || args.autopause_interval_millis.is_some() {
        let mut autopause = config.autopause.take().unwrap_or_default();
        if let Some(path) = &args.autopause_script_path {
            autopause.script_path.clone_from(path);
        }
        if let Some(interval_millis) = args.autopause_interval_millis {
            autopause.interval_millis = interval_millis;
        }
        config.autopause = Some(autopause);
    }

    config.validate()?;
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let telemetry = PrometheusBuilder::new().install_recorder()?;
    let (shutdown_watcher, shutdown_broadcast) = signals::signal();
    let mut tasks: JoinSet<Result<(), Error>> = JoinSet::new();

    let source = match &config.source {
        source::Config::File(file_config) => {
            info!("reading snapshots from {}", file_config.path.display());
            Source::File(file::File::new(file_config))
        }
        source::Config::Rcon(rcon) => {
            let password = rcon.password()?;
            let (reloader, command) = Reloader::load(&rcon.script_path).await?;
            let watcher = shutdown_watcher.clone();
            tasks.spawn(async move { Ok(reloader.run(watcher).await?) });

            let transport = tokio::select! {
                transport = Rcon::connect_with_retry(rcon.addr(), password, CONNECT_BACKOFF) => transport,
                _ = signal::ctrl_c() => {
                    info!("received ctrl-c before connecting");
                    shutdown_broadcast.signal();
                    while tasks.join_next().await.is_some() {}
                    return Ok(());
                }
            };
            let channel = Channel::new(transport);

            if let Some(autopause) = &config.autopause {
                let (reloader, pause_command) = Reloader::load(&autopause.script_path).await?;
                let watcher = shutdown_watcher.clone();
                tasks.spawn(async move { Ok(reloader.run(watcher).await?) });

                let pacer = Pacer::new(
                    channel.clone(),
                    pause_command,
                    autopause.interval(),
                    rcon.timeout(),
                    shutdown_watcher.clone(),
                );
                tasks.spawn(async move {
                    pacer.run().await;
                    Ok(())
                });
            }

            Source::Remote(remote::Remote::new(channel, command, rcon.timeout()))
        }
    };

    let endpoints = Arc::new(Endpoints::new(&source, Some(telemetry)));
    let addr = config.metrics_addr;
    let concurrency_limit = config.concurrent_requests_max;
    let watcher = shutdown_watcher.clone();
    tasks.spawn(async move {
        Ok(server::run_httpd(addr, concurrency_limit, watcher, endpoints).await?)
    });

    // Every task holds its own watcher. `signal_and_wait` below only returns
    // once all of them are gone.
    drop(shutdown_watcher);
    let res = loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break Ok(());
            }
            Some(res) = tasks.join_next() => {
                match res {
                    Ok(Ok(())) => debug!("task shut down"),
                    Ok(Err(err)) => {
                        error!("task shut down unexpectedly: {err}");
                        break Err(err);
                    }
                    Err(err) => warn!("could not join task: {err}"),
                }
            }
        }
    };
    shutdown_broadcast.signal_and_wait().await;
    while tasks.join_next().await.is_some() {}
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting factorio-exporter {version}.");

    let args = Args::parse();
    let config = get_config(&args)?;
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
